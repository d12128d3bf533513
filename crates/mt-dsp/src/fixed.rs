//! 16-bit fixed-point filter domain
//!
//! Samples and histories are i16. Products are formed the way a packed
//! multiply-add unit forms them: two 16x16 products summed into 32 bits, so
//! nothing is lost before the accumulator is rounded back to 16 bits.
//!
//! - Feedback coefficients are Q2.14. A stable section has `|fb1| < 2` and
//!   `|fb2| < 1`, so they always fit.
//! - Feed-forward coefficients are Q3.13 (range -4.0..4.0). The `[1, 2, 1]`
//!   numerator of a lowpass is exact.
//! - A gain is a Q2.14 mantissa plus a right shift, so gains far below one
//!   Q2.14 step keep their full precision.
//!
//! A cascade splits its single float gain: section 2 takes the gain that
//! normalizes its own DC response, section 1 takes the rest. Both histories
//! then stay near the signal level instead of collapsing to a few LSBs.
//!
//! All 32-bit sums and the final narrowing to i16 wrap. This is a separate
//! numeric domain from the float filter; it is only required to agree with
//! its own vectorized version, bit for bit.

use crate::filter::{FilterHistory, Section};

/// Fractional bits of gains and feedback coefficients
pub const FB_FRAC_BITS: u32 = 14;
/// Fractional bits of feed-forward coefficients
pub const FF_FRAC_BITS: u32 = 13;
/// Largest right shift a gain may carry
pub const MAX_GAIN_SHIFT: u32 = 24;

/// Fixed-point section `[fb1, fb2, ff1, ff2]`: Q2.14 feedback, Q3.13
/// feed-forward.
pub type FixedSection = [i16; 4];

/// High 16 bits of the 32-bit product
#[inline(always)]
pub fn mul_high(a: i16, b: i16) -> i16 {
    ((a as i32 * b as i32) >> 16) as i16
}

/// Quantize `coeff` with `frac_bits` fractional bits, saturating.
///
/// Returns the value and whether it had to be clamped.
pub fn quantize(coeff: f32, frac_bits: u32) -> (i16, bool) {
    let scaled = (coeff * (1u32 << frac_bits) as f32).round();
    if scaled.is_nan() {
        return (0, true);
    }
    let clamped = scaled.clamp(i16::MIN as f32, i16::MAX as f32);
    (clamped as i16, clamped != scaled)
}

/// Arithmetic right shift rounding half up
#[inline(always)]
fn round_shift(value: i32, bits: u32) -> i32 {
    value.wrapping_add(1 << (bits - 1)) >> bits
}

/// Gain as `mantissa / 2^14 / 2^shift`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedGain {
    pub mantissa: i16,
    pub shift: u32,
}

impl FixedGain {
    pub const UNITY: Self = Self {
        mantissa: 1 << FB_FRAC_BITS,
        shift: 0,
    };

    /// Quantize with the largest shift that keeps the mantissa in range.
    ///
    /// Gains of 2.0 and above saturate (flagged in the second field).
    pub fn from_float(gain: f32) -> (Self, bool) {
        let mut shift = 0;
        while shift < MAX_GAIN_SHIFT
            && (gain * (1u64 << (FB_FRAC_BITS + shift + 1)) as f32).abs() < i16::MAX as f32
        {
            shift += 1;
        }
        let (mantissa, saturated) = quantize(gain * (1u32 << shift) as f32, FB_FRAC_BITS);
        (Self { mantissa, shift }, saturated)
    }

    /// Sample times the gain, in Q14 accumulator units
    #[inline(always)]
    pub fn apply(&self, sample: i16) -> i32 {
        (sample as i32 * self.mantissa as i32) >> self.shift
    }

    pub fn value(&self) -> f32 {
        self.mantissa as f32 / (1u64 << (FB_FRAC_BITS + self.shift)) as f32
    }
}

fn quantize_section(section: &Section, saturated: &mut bool) -> FixedSection {
    let mut fixed = [0; 4];
    for (i, (&c, q)) in section.iter().zip(fixed.iter_mut()).enumerate() {
        let frac_bits = if i < 2 { FB_FRAC_BITS } else { FF_FRAC_BITS };
        let (value, sat) = quantize(c, frac_bits);
        *saturated |= sat;
        *q = value;
    }
    fixed
}

/// Gain that brings the DC response of `section` to one.
///
/// Sections without a usable DC response (a zero at DC, a pole at DC, or a
/// normalizer out of gain range) keep unity.
fn dc_normalizing_gain(section: &Section) -> f32 {
    let zeros = 1.0 + section[2] + section[3];
    let poles = 1.0 + section[0] + section[1];
    let gain = poles / zeros;
    if zeros.abs() > f32::EPSILON && gain.is_finite() && gain > 0.0 && gain < 2.0 {
        gain
    } else {
        1.0
    }
}

/// Fixed-point single-stage coefficients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedCoefficients {
    pub gain: FixedGain,
    pub section: FixedSection,
}

impl FixedCoefficients {
    pub fn from_float(gain: f32, section: &Section) -> Self {
        let (fixed_gain, mut saturated) = FixedGain::from_float(gain);
        let fixed_section = quantize_section(section, &mut saturated);
        if saturated {
            log::debug!("stage coefficients saturated in fixed point: {gain} {section:?}");
        }
        Self {
            gain: fixed_gain,
            section: fixed_section,
        }
    }
}

/// Fixed-point cascade coefficients with the gain split per section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedCascadeCoefficients {
    pub gains: [FixedGain; 2],
    pub sections: [FixedSection; 2],
}

impl FixedCascadeCoefficients {
    pub fn from_float(gain: f32, sections: &[Section; 2]) -> Self {
        let second_gain = dc_normalizing_gain(&sections[1]);
        let (first, sat_first) = FixedGain::from_float(gain / second_gain);
        let (second, sat_second) = FixedGain::from_float(second_gain);
        let mut saturated = sat_first || sat_second;
        let fixed_sections = [
            quantize_section(&sections[0], &mut saturated),
            quantize_section(&sections[1], &mut saturated),
        ];
        if saturated {
            log::debug!("cascade coefficients saturated in fixed point: {gain} {sections:?}");
        }
        Self {
            gains: [first, second],
            sections: fixed_sections,
        }
    }
}

/// History pair in the sample domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedHistory {
    pub hist1: i16,
    pub hist2: i16,
}

impl FixedHistory {
    /// Take over a float history (saturating, truncating)
    pub fn from_float(history: &FilterHistory) -> Self {
        Self {
            hist1: history.hist1 as i16,
            hist2: history.hist2 as i16,
        }
    }

    /// Write back into a float history; the values are exact in f32.
    pub fn store(&self, history: &mut FilterHistory) {
        history.hist1 = self.hist1 as f32;
        history.hist2 = self.hist2 as f32;
    }
}

/// Finish a section from its multiply-add sums.
///
/// `acc` is the scaled input, `poles = h1*fb1 + h2*fb2` (Q14) and
/// `zeros = h1*ff1 + h2*ff2` (Q13), all as a packed multiply-add returns them.
#[inline(always)]
pub fn section_from_sums(acc: i32, poles: i32, zeros: i32, history: &mut FixedHistory) -> i16 {
    let new_hist = round_shift(acc.wrapping_sub(poles), FB_FRAC_BITS) as i16;
    let output = round_shift(
        ((new_hist as i32) << FF_FRAC_BITS).wrapping_add(zeros),
        FF_FRAC_BITS,
    ) as i16;
    history.hist2 = history.hist1;
    history.hist1 = new_hist;
    output
}

/// One fixed-point section applied to a scaled input (Q14 units)
#[inline(always)]
pub fn section_fixed(acc: i32, history: &mut FixedHistory, c: &FixedSection) -> i16 {
    let (h1, h2) = (history.hist1 as i32, history.hist2 as i32);
    let poles = (h1 * c[0] as i32).wrapping_add(h2 * c[1] as i32);
    let zeros = (h1 * c[2] as i32).wrapping_add(h2 * c[3] as i32);
    section_from_sums(acc, poles, zeros, history)
}

/// Filter one sample through a fixed-point stage
#[inline]
pub fn filter_sample_fixed(
    input: i16,
    history: &mut FixedHistory,
    coeffs: &FixedCoefficients,
) -> i16 {
    section_fixed(coeffs.gain.apply(input), history, &coeffs.section)
}

/// Filter one sample through the fixed-point cascade
#[inline]
pub fn filter_cascade_sample_fixed(
    input: i16,
    history: &mut [FixedHistory; 2],
    coeffs: &FixedCascadeCoefficients,
) -> i16 {
    let [first, second] = history;
    let out = section_fixed(coeffs.gains[0].apply(input), first, &coeffs.sections[0]);
    section_fixed(coeffs.gains[1].apply(out), second, &coeffs.sections[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::CascadeCoefficients;

    #[test]
    fn test_mul_high() {
        assert_eq!(mul_high(0x4000, 0x4000), 0x1000);
        assert_eq!(mul_high(-1, 1), -1); // arithmetic shift floors
        assert_eq!(mul_high(i16::MIN, i16::MIN), 0x4000);
        assert_eq!(mul_high(1000, 0), 0);
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(1.0, FB_FRAC_BITS), (16384, false));
        assert_eq!(quantize(-0.5, FB_FRAC_BITS), (-8192, false));
        assert_eq!(quantize(2.0, FB_FRAC_BITS), (i16::MAX, true));
        assert_eq!(quantize(2.0, FF_FRAC_BITS), (16384, false));
        assert_eq!(quantize(-3.0, FB_FRAC_BITS), (i16::MIN, true));
        assert_eq!(quantize(f32::NAN, FB_FRAC_BITS), (0, true));
    }

    #[test]
    fn test_gain_keeps_precision_when_small() {
        assert_eq!(FixedGain::from_float(1.0), (FixedGain::UNITY, false));

        let (gain, saturated) = FixedGain::from_float(6.65e-5);
        assert!(!saturated);
        assert_eq!(gain.shift, 14);
        assert!(gain.mantissa > 16384);
        assert!(((gain.value() - 6.65e-5) / 6.65e-5).abs() < 1e-4);

        let (gain, saturated) = FixedGain::from_float(-0.3);
        assert!(!saturated);
        assert!((gain.value() + 0.3).abs() < 1e-4);

        assert!(FixedGain::from_float(3.0).1);
        assert_eq!(FixedGain::from_float(0.0).0.mantissa, 0);
    }

    #[test]
    fn test_identity_is_exact() {
        let coeffs = FixedCoefficients::from_float(1.0, &[0.0; 4]);
        let mut history = FixedHistory::default();
        for x in [-32768i16, -1001, -1, 0, 1, 3, 1000, 32767] {
            assert_eq!(filter_sample_fixed(x, &mut history, &coeffs), x);
        }
    }

    #[test]
    fn test_fixed_impulse_tracks_float_shape() {
        let coeffs = FixedCoefficients::from_float(1.0, &[0.5, 0.25, 0.1, 0.05]);
        assert_eq!(coeffs.gain, FixedGain::UNITY);
        assert_eq!(coeffs.section, [8192, 4096, 819, 410]);

        let mut history = FixedHistory::default();
        let out: Vec<i16> = [16000, 0, 0, 0]
            .iter()
            .map(|&x| filter_sample_fixed(x, &mut history, &coeffs))
            .collect();
        // Float reference scaled by 16000: [16000, -6400, 0, 1600]
        assert_eq!(out, vec![16000, -6400, 1, 1600]);
    }

    #[test]
    fn test_lowpass_numerator_is_exact() {
        let float = CascadeCoefficients::lowpass(32000.0, 500.0, 0.707).unwrap();
        let fixed = float.fixed();
        for section in &fixed.sections {
            assert_eq!(section[2], 2 << FF_FRAC_BITS);
            assert_eq!(section[3], 1 << FF_FRAC_BITS);
        }
    }

    #[test]
    fn test_cascade_gain_split_across_sections() {
        for cutoff in [100.0, 500.0, 1000.0, 8000.0] {
            let float = CascadeCoefficients::lowpass(32000.0, cutoff, 0.707).unwrap();
            let fixed = float.fixed();
            let [first, second] = fixed.gains;
            // Each section carries its own share, neither collapses to an LSB.
            assert!(first.mantissa.abs() > 8192, "{cutoff}: {first:?}");
            assert!(second.mantissa.abs() > 8192, "{cutoff}: {second:?}");
            let total = first.value() * second.value();
            assert!(((total - float.gain()) / float.gain()).abs() < 1e-3, "{cutoff}");
        }
    }

    #[test]
    fn test_overflow_wraps() {
        let coeffs = FixedCoefficients {
            gain: FixedGain::UNITY,
            section: [0, 0, 1 << FF_FRAC_BITS, 0],
        };
        let mut history = FixedHistory {
            hist1: 30000,
            hist2: 0,
        };
        // 30000 + 30000 wraps past i16::MAX.
        let out = filter_sample_fixed(30000, &mut history, &coeffs);
        assert_eq!(out, 30000i16.wrapping_add(30000));
    }

    #[test]
    fn test_history_roundtrip_through_float() {
        let fixed = FixedHistory {
            hist1: -12345,
            hist2: 32767,
        };
        let mut float = FilterHistory::default();
        fixed.store(&mut float);
        assert_eq!(FixedHistory::from_float(&float), fixed);
    }
}
