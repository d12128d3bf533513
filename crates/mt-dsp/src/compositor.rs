//! Sample buffer compositor
//!
//! Drives one audio block: each partial is filtered in place with its own
//! history, a slave partial is folded into its master (added or
//! ring-modulated), the result is panned into stereo and summed, and the sum
//! is scaled by the master volume into the caller's interleaved output.

use mt_core::{ensure_len, AudioBuffer, DspConfig, MixBuffer, MtError, MtResult, PanVolume};

use crate::cpu::cpu_features;
use crate::filter::{CascadeCoefficients, CascadeHistory, FilterCoefficients, FilterHistory};
use crate::kernel::{select_kernel, FilterKernel};

/// Filter applied to a voice
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum VoiceFilter {
    #[default]
    Bypass,
    Single(FilterCoefficients),
    Cascade(CascadeCoefficients),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
enum VoiceHistory {
    #[default]
    None,
    Single(FilterHistory),
    Cascade(CascadeHistory),
}

impl VoiceHistory {
    fn for_filter(filter: &VoiceFilter) -> Self {
        match filter {
            VoiceFilter::Bypass => VoiceHistory::None,
            VoiceFilter::Single(_) => VoiceHistory::Single(FilterHistory::default()),
            VoiceFilter::Cascade(_) => VoiceHistory::Cascade(CascadeHistory::default()),
        }
    }

    fn matches(&self, filter: &VoiceFilter) -> bool {
        matches!(
            (self, filter),
            (VoiceHistory::None, VoiceFilter::Bypass)
                | (VoiceHistory::Single(_), VoiceFilter::Single(_))
                | (VoiceHistory::Cascade(_), VoiceFilter::Cascade(_))
        )
    }
}

/// Per-partial state that persists across blocks.
///
/// The filter history lives here and nowhere else, so two voices can never
/// share or alias it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Voice {
    filter: VoiceFilter,
    history: VoiceHistory,
    pub pan: PanVolume,
}

impl Voice {
    pub fn new(filter: VoiceFilter, pan: PanVolume) -> Self {
        Self {
            history: VoiceHistory::for_filter(&filter),
            filter,
            pan,
        }
    }

    #[inline]
    pub fn filter(&self) -> &VoiceFilter {
        &self.filter
    }

    /// Swap in recomputed coefficients.
    ///
    /// History carries over while the filter shape stays the same, so a
    /// cutoff sweep does not click; a shape change starts from silence.
    pub fn set_filter(&mut self, filter: VoiceFilter) {
        if !self.history.matches(&filter) {
            self.history = VoiceHistory::for_filter(&filter);
        }
        self.filter = filter;
    }

    /// Zero the filter history
    pub fn reset(&mut self) {
        self.history = VoiceHistory::for_filter(&self.filter);
    }

    /// Filter `samples` in place
    pub fn process(&mut self, kernel: &dyn FilterKernel, samples: &mut [i16]) {
        match (&self.filter, &mut self.history) {
            (VoiceFilter::Single(coeffs), VoiceHistory::Single(history)) => {
                kernel.filter_block(samples, coeffs, history)
            }
            (VoiceFilter::Cascade(coeffs), VoiceHistory::Cascade(history)) => {
                kernel.filter_cascade_block(samples, coeffs, history)
            }
            _ => {}
        }
    }
}

/// How a slave partial combines with its master
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PairMode {
    /// `master + slave`
    #[default]
    Mix,
    /// `master + master * slave`
    RingMix,
    /// `master * slave`
    Ring,
}

impl PairMode {
    /// Fold `slave` into `master` with `kernel`'s mixing operation
    #[inline]
    pub fn apply(self, kernel: &dyn FilterKernel, master: &mut [i16], slave: &[i16]) {
        match self {
            Self::Mix => kernel.mix_buffers(master, slave),
            Self::RingMix => kernel.mix_buffers_ring_mix(master, slave),
            Self::Ring => kernel.mix_buffers_ring(master, slave),
        }
    }
}

/// One partial's block and its persistent voice
#[derive(Debug)]
pub struct PartialBlock<'a> {
    pub voice: &'a mut Voice,
    pub samples: &'a mut [i16],
}

/// A master partial with an optional slave folded into it
#[derive(Debug)]
pub struct PartialPair<'a> {
    pub mode: PairMode,
    pub master: PartialBlock<'a>,
    pub slave: Option<PartialBlock<'a>>,
}

impl<'a> PartialPair<'a> {
    pub fn single(voice: &'a mut Voice, samples: &'a mut [i16]) -> Self {
        Self {
            mode: PairMode::Mix,
            master: PartialBlock { voice, samples },
            slave: None,
        }
    }

    pub fn pair(mode: PairMode, master: PartialBlock<'a>, slave: PartialBlock<'a>) -> Self {
        Self {
            mode,
            master,
            slave: Some(slave),
        }
    }
}

/// Block renderer
pub struct Compositor {
    kernel: &'static dyn FilterKernel,
    master_volume: i16,
    /// Stereo sum of all pairs
    accum: MixBuffer,
    /// One pair panned to stereo
    panned: MixBuffer,
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("kernel", &self.kernel.kind())
            .field("block_len", &self.block_len())
            .field("master_volume", &self.master_volume)
            .finish()
    }
}

impl Compositor {
    /// Renderer using the kernel `config` asks for (or the best available)
    pub fn new(config: &DspConfig) -> MtResult<Self> {
        config.validate()?;
        let kernel = select_kernel(cpu_features(), config.kernel);
        let mut compositor = Self::with_kernel(kernel, config.block_len);
        compositor.master_volume = config.master_volume;
        Ok(compositor)
    }

    /// Renderer on an explicit kernel
    pub fn with_kernel(kernel: &'static dyn FilterKernel, block_len: usize) -> Self {
        Self {
            kernel,
            master_volume: i16::MAX,
            accum: MixBuffer::new(block_len),
            panned: MixBuffer::new(block_len),
        }
    }

    #[inline]
    pub fn kernel(&self) -> &'static dyn FilterKernel {
        self.kernel
    }

    #[inline]
    pub fn block_len(&self) -> usize {
        self.accum.frames()
    }

    #[inline]
    pub fn master_volume(&self) -> i16 {
        self.master_volume
    }

    pub fn set_master_volume(&mut self, volume: i16) {
        self.master_volume = volume;
    }

    /// Fold `slave` into `master` according to `mode`
    pub fn combine(&self, mode: PairMode, master: &mut [i16], slave: &[i16]) -> MtResult<()> {
        ensure_len("combine", master.len(), slave.len())?;
        mode.apply(self.kernel, master, slave);
        Ok(())
    }

    /// Render all pairs and add the mixdown into `output`.
    ///
    /// `output` is interleaved stereo and is accumulated into, not
    /// overwritten. Every partial must hold `output.len() / 2` samples.
    /// Partial buffers are filtered and combined in place.
    pub fn render(&mut self, pairs: &mut [PartialPair<'_>], output: &mut [i16]) -> MtResult<()> {
        if output.len() % 2 != 0 {
            return Err(MtError::LengthMismatch {
                operation: "render",
                expected: output.len() + 1,
                actual: output.len(),
            });
        }
        let frames = output.len() / 2;
        if frames > self.accum.frames() {
            return Err(MtError::BlockTooLarge {
                len: frames,
                max: self.accum.frames(),
            });
        }
        for pair in pairs.iter() {
            ensure_len("render", frames, pair.master.samples.len())?;
            if let Some(slave) = &pair.slave {
                ensure_len("render", frames, slave.samples.len())?;
            }
        }

        let kernel = self.kernel;
        self.accum.clear();
        let accum = &mut self.accum.samples_mut()[..frames * 2];
        let panned = &mut self.panned.samples_mut()[..frames * 2];

        for pair in pairs.iter_mut() {
            let master = &mut pair.master;
            master.voice.process(kernel, master.samples);

            if let Some(slave) = pair.slave.as_mut() {
                slave.voice.process(kernel, slave.samples);
                pair.mode.apply(kernel, master.samples, slave.samples);
            }

            let pan = master.voice.pan;
            kernel.pan_and_scale(master.samples, pan.left, pan.right, panned);
            kernel.mix_buffers(accum, panned);
        }

        kernel.produce_output(accum, output, self.master_volume);
        Ok(())
    }
}
