//! mt-dsp: MT-32 partial filter and mixing kernels
//!
//! The per-block signal path of the synth: every partial is filtered through
//! its own IIR state, paired partials are mixed or ring-modulated, and the
//! result is panned and scaled into the stereo output.
//!
//! ## Modules
//! - `cpu` - Runtime detection of SIMD and legacy vector extensions
//! - `filter` - Scalar reference filter, coefficient sets, lowpass design
//! - `fixed` - 16-bit fixed-point filter arithmetic (multiply-add model)
//! - `kernel` - Scalar, SIMD float and vector fixed-point kernels, dispatch
//! - `compositor` - Block rendering from partial pairs to stereo output

pub mod compositor;
pub mod cpu;
pub mod filter;
pub mod fixed;
pub mod kernel;

pub use compositor::{Compositor, PairMode, PartialBlock, PartialPair, Voice, VoiceFilter};
pub use cpu::{cpu_features, detect_legacy_vector_ext, detect_simd, CpuFeatures};
pub use filter::{
    CascadeCoefficients, CascadeHistory, FilterCoefficients, FilterHistory, CASCADE_COEFFICIENTS,
    STAGE_COEFFICIENTS,
};
pub use kernel::{
    active_kernel, available_kernels, kernel_for, select_kernel, FilterKernel, KernelKind,
};
