//! Two-pole IIR filter sections, scalar reference
//!
//! A stage is five coefficients: `[gain, fb1, fb2, ff1, ff2]`. Per sample:
//!
//! ```text
//! new_hist = input * gain - hist1 * fb1 - hist2 * fb2   (poles)
//! output   = new_hist     + hist1 * ff1 + hist2 * ff2   (zeros)
//! hist2 = hist1; hist1 = new_hist
//! ```
//!
//! The TVF cascades two such sections (nine coefficients, one shared gain):
//! section 1 fully updates its history before its output feeds section 2.
//! Every accelerated kernel reproduces this order of operations exactly.

use std::f64::consts::PI;

use mt_core::{MtError, MtResult};

use crate::fixed::{FixedCascadeCoefficients, FixedCoefficients};

/// Coefficients in one stage (gain + one section)
pub const STAGE_COEFFICIENTS: usize = 5;
/// Coefficients in the two-section cascade (gain + two sections)
pub const CASCADE_COEFFICIENTS: usize = 9;

/// Feedback and feed-forward pairs of one section: `[fb1, fb2, ff1, ff2]`
pub type Section = [f32; 4];

/// Single-stage coefficients.
///
/// The fixed-point form is quantized once here, so the fixed-point kernel
/// never re-quantizes on the sample path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterCoefficients {
    coeffs: [f32; STAGE_COEFFICIENTS],
    fixed: FixedCoefficients,
}

impl FilterCoefficients {
    pub fn new(gain: f32, fb1: f32, fb2: f32, ff1: f32, ff2: f32) -> Self {
        Self {
            coeffs: [gain, fb1, fb2, ff1, ff2],
            fixed: FixedCoefficients::from_float(gain, &[fb1, fb2, ff1, ff2]),
        }
    }

    /// Pass-through stage
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 0.0)
    }

    pub fn from_slice(coeffs: &[f32]) -> MtResult<Self> {
        let coeffs: [f32; STAGE_COEFFICIENTS] =
            coeffs.try_into().map_err(|_| MtError::CoefficientCount {
                expected: STAGE_COEFFICIENTS,
                actual: coeffs.len(),
            })?;
        let [gain, fb1, fb2, ff1, ff2] = coeffs;
        Ok(Self::new(gain, fb1, fb2, ff1, ff2))
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.coeffs[0]
    }

    #[inline]
    pub fn section(&self) -> Section {
        [self.coeffs[1], self.coeffs[2], self.coeffs[3], self.coeffs[4]]
    }

    #[inline]
    pub fn as_array(&self) -> &[f32; STAGE_COEFFICIENTS] {
        &self.coeffs
    }

    /// Fixed-point form used by the vector fixed-point kernel
    #[inline]
    pub fn fixed(&self) -> &FixedCoefficients {
        &self.fixed
    }
}

impl Default for FilterCoefficients {
    fn default() -> Self {
        Self::identity()
    }
}

/// Two-section cascade coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeCoefficients {
    coeffs: [f32; CASCADE_COEFFICIENTS],
    fixed: FixedCascadeCoefficients,
}

impl CascadeCoefficients {
    pub fn new(gain: f32, first: Section, second: Section) -> Self {
        Self {
            coeffs: [
                gain, first[0], first[1], first[2], first[3], second[0], second[1], second[2],
                second[3],
            ],
            fixed: FixedCascadeCoefficients::from_float(gain, &[first, second]),
        }
    }

    pub fn identity() -> Self {
        Self::new(1.0, [0.0; 4], [0.0; 4])
    }

    pub fn from_slice(coeffs: &[f32]) -> MtResult<Self> {
        let coeffs: [f32; CASCADE_COEFFICIENTS] =
            coeffs.try_into().map_err(|_| MtError::CoefficientCount {
                expected: CASCADE_COEFFICIENTS,
                actual: coeffs.len(),
            })?;
        let [gain, a1, a2, a3, a4, b1, b2, b3, b4] = coeffs;
        Ok(Self::new(gain, [a1, a2, a3, a4], [b1, b2, b3, b4]))
    }

    /// Four-pole resonant lowpass.
    ///
    /// Two analog Butterworth sections are mapped through a prewarped
    /// bilinear transform; `resonance` divides both damping terms
    /// (1.0 is maximally flat, larger values peak at the cutoff).
    pub fn lowpass(sample_rate: f32, cutoff_hz: f32, resonance: f32) -> MtResult<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(MtError::InvalidFilter(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }
        if !(cutoff_hz.is_finite() && cutoff_hz > 0.0 && cutoff_hz < sample_rate * 0.5) {
            return Err(MtError::InvalidFilter(format!(
                "cutoff {cutoff_hz} Hz outside (0, {}) Hz",
                sample_rate * 0.5
            )));
        }
        if !(resonance.is_finite() && resonance > 0.0) {
            return Err(MtError::InvalidFilter(format!(
                "resonance must be positive, got {resonance}"
            )));
        }

        let fs = sample_rate as f64;
        let fc = cutoff_hz as f64;
        let q = resonance as f64;
        // Prewarp so the digital cutoff lands on fc.
        let wp = 2.0 * fs * (PI * fc / fs).tan();

        let mut gain = 1.0f64;
        let mut sections = [[0.0f32; 4]; 2];
        for (section, damping) in sections.iter_mut().zip(BUTTERWORTH_DAMPING) {
            // Denominator s^2 + (d / q) s + 1, scaled to the cutoff.
            let (b0, b1, b2) = (1.0, damping / q / wp, 1.0 / (wp * wp));
            let (a0, a1, a2) = (1.0, 0.0, 0.0);
            let (s, k) = bilinear([a0, a1, a2], [b0, b1, b2], fs);
            *section = s;
            gain *= k;
        }

        Ok(Self::new(gain as f32, sections[0], sections[1]))
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.coeffs[0]
    }

    /// Section `index` (0 or 1)
    #[inline]
    pub fn section(&self, index: usize) -> Section {
        let base = 1 + index * 4;
        [
            self.coeffs[base],
            self.coeffs[base + 1],
            self.coeffs[base + 2],
            self.coeffs[base + 3],
        ]
    }

    #[inline]
    pub fn as_array(&self) -> &[f32; CASCADE_COEFFICIENTS] {
        &self.coeffs
    }

    /// Fixed-point form used by the vector fixed-point kernel
    #[inline]
    pub fn fixed(&self) -> &FixedCascadeCoefficients {
        &self.fixed
    }
}

impl Default for CascadeCoefficients {
    fn default() -> Self {
        Self::identity()
    }
}

/// Damping terms of the 4th-order Butterworth prototype
const BUTTERWORTH_DAMPING: [f64; 2] = [0.765367, 1.847759];

/// Bilinear transform of `(a0 + a1 s + a2 s^2) / (b0 + b1 s + b2 s^2)`.
///
/// Returns the section `[fb1, fb2, ff1, ff2]` normalized to a unit leading
/// numerator term, plus the gain factor pulled out of it.
fn bilinear(num: [f64; 3], den: [f64; 3], fs: f64) -> (Section, f64) {
    let [a0, a1, a2] = num;
    let [b0, b1, b2] = den;
    let fs2 = fs * fs;

    let ad = 4.0 * a2 * fs2 + 2.0 * a1 * fs + a0;
    let bd = 4.0 * b2 * fs2 + 2.0 * b1 * fs + b0;

    let fb1 = (2.0 * b0 - 8.0 * b2 * fs2) / bd;
    let fb2 = (4.0 * b2 * fs2 - 2.0 * b1 * fs + b0) / bd;
    let ff1 = (2.0 * a0 - 8.0 * a2 * fs2) / ad;
    let ff2 = (4.0 * a2 * fs2 - 2.0 * a1 * fs + a0) / ad;

    ([fb1 as f32, fb2 as f32, ff1 as f32, ff2 as f32], ad / bd)
}

/// History pair of one section. Owned by exactly one voice.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FilterHistory {
    pub hist1: f32,
    pub hist2: f32,
}

impl FilterHistory {
    pub const fn new(hist1: f32, hist2: f32) -> Self {
        Self { hist1, hist2 }
    }

    pub fn reset(&mut self) {
        self.hist1 = 0.0;
        self.hist2 = 0.0;
    }
}

/// History of both cascade sections
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CascadeHistory {
    pub stages: [FilterHistory; 2],
}

impl CascadeHistory {
    pub fn reset(&mut self) {
        self.stages.iter_mut().for_each(FilterHistory::reset);
    }
}

/// One section applied to an already-scaled input.
#[inline(always)]
pub fn section_scalar(acc: f32, history: &mut FilterHistory, c: &Section) -> f32 {
    let new_hist = acc - history.hist1 * c[0] - history.hist2 * c[1];
    let output = new_hist + history.hist1 * c[2] + history.hist2 * c[3];
    history.hist2 = history.hist1;
    history.hist1 = new_hist;
    output
}

/// Filter one sample through a single stage
#[inline]
pub fn filter_sample(input: f32, history: &mut FilterHistory, coeffs: &FilterCoefficients) -> f32 {
    section_scalar(input * coeffs.gain(), history, &coeffs.section())
}

/// Filter one sample through the two-section cascade
#[inline]
pub fn filter_cascade_sample(
    input: f32,
    history: &mut CascadeHistory,
    coeffs: &CascadeCoefficients,
) -> f32 {
    let [first, second] = &mut history.stages;
    let out = section_scalar(input * coeffs.gain(), first, &coeffs.section(0));
    section_scalar(out, second, &coeffs.section(1))
}

/// Convert a float filter output back onto the 16-bit sample grid.
///
/// Truncates toward zero and saturates at the i16 range (NaN becomes 0).
#[inline(always)]
pub fn to_pcm(value: f32) -> i16 {
    value as i16
}
