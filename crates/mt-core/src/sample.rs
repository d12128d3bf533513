//! Sample types and audio buffer definitions
//!
//! The synthesizer renders signed 16-bit PCM throughout. Partials produce
//! mono blocks; the mixdown is interleaved stereo (`L R L R ...`).

/// Type alias for PCM samples
pub type PcmSample = i16;

/// Interleaved stereo frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct StereoFrame {
    pub left: PcmSample,
    pub right: PcmSample,
}

impl StereoFrame {
    #[inline]
    pub const fn new(left: PcmSample, right: PcmSample) -> Self {
        Self { left, right }
    }
}

/// Left/right pan gains.
///
/// Both gains are applied with a 16-bit multiply-high, so the effective
/// gain is `value / 65536` (Q0.16 on the magnitude, sign carried by i16).
/// `0x7FFF` is the loudest representable setting, just under one half.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PanVolume {
    pub left: i16,
    pub right: i16,
}

impl PanVolume {
    #[inline]
    pub const fn new(left: i16, right: i16) -> Self {
        Self { left, right }
    }

    /// Same gain on both sides
    #[inline]
    pub const fn center(volume: i16) -> Self {
        Self {
            left: volume,
            right: volume,
        }
    }
}

/// Audio buffer trait for generic buffer operations
pub trait AudioBuffer {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn clear(&mut self);
}

/// Mono block produced by one partial
#[derive(Debug, Clone, Default)]
pub struct PartialBuffer {
    samples: Vec<PcmSample>,
}

impl PartialBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            samples: vec![0; size],
        }
    }

    pub fn from_samples(samples: Vec<PcmSample>) -> Self {
        Self { samples }
    }

    /// Reuse the allocation for a block of `len` samples, zeroed.
    pub fn prepare(&mut self, len: usize) {
        self.samples.clear();
        self.samples.resize(len, 0);
    }

    #[inline]
    pub fn samples(&self) -> &[PcmSample] {
        &self.samples
    }

    #[inline]
    pub fn samples_mut(&mut self) -> &mut [PcmSample] {
        &mut self.samples
    }
}

impl AudioBuffer for PartialBuffer {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn clear(&mut self) {
        self.samples.fill(0);
    }
}

/// Interleaved stereo mix buffer
#[derive(Debug, Clone, Default)]
pub struct MixBuffer {
    samples: Vec<PcmSample>,
}

impl MixBuffer {
    /// Buffer holding `frames` stereo frames
    pub fn new(frames: usize) -> Self {
        Self {
            samples: vec![0; frames * 2],
        }
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    #[inline]
    pub fn samples(&self) -> &[PcmSample] {
        &self.samples
    }

    #[inline]
    pub fn samples_mut(&mut self) -> &mut [PcmSample] {
        &mut self.samples
    }

    #[inline]
    pub fn frame(&self, index: usize) -> StereoFrame {
        StereoFrame::new(self.samples[index * 2], self.samples[index * 2 + 1])
    }

    pub fn iter_frames(&self) -> impl Iterator<Item = StereoFrame> + '_ {
        self.samples
            .chunks_exact(2)
            .map(|pair| StereoFrame::new(pair[0], pair[1]))
    }
}

impl AudioBuffer for MixBuffer {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn clear(&mut self) {
        self.samples.fill(0);
    }
}
