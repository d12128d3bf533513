//! Kernel dispatch
//!
//! Every kernel implements the same contract ([`FilterKernel`]) with a
//! different numeric representation or vectorization. One kernel is chosen
//! from the detected CPU features and cached; call sites never branch on
//! the CPU themselves.
//!
//! # Q-formats
//! - Filter inputs/outputs: i16 PCM, converted to f32 sample units by the
//!   float kernels (no normalization) and back with a truncating,
//!   saturating cast.
//! - `mix_buffers_ring_mix` / `mix_buffers_ring`: both operands Q0.15,
//!   product taken with multiply-high (divide by 65536 after the 32-bit
//!   product), so full scale times full scale is one half.
//! - `produce_output` volume and `pan_and_scale` gains: multiply-high,
//!   effective gain `v / 65536`.
//! - All adds wrap in two's complement.
//!
//! # Remainders
//! Vector kernels process `len / width` full chunks and hand the remaining
//! `len % width` samples to the scalar functions. No sample is dropped.

use std::sync::OnceLock;

use mt_core::{ensure_len, KernelPreference, MtResult};

use crate::cpu::{cpu_features, CpuFeatures};
use crate::filter::{
    to_pcm, CascadeCoefficients, CascadeHistory, FilterCoefficients, FilterHistory,
};

pub mod scalar;
pub mod simd;
pub mod vector_fixed;

pub use scalar::ScalarKernel;
pub use simd::SimdFloatKernel;
pub use vector_fixed::VectorFixedPointKernel;

/// Kernel variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    /// Portable scalar reference
    Scalar,
    /// Packed f32 filter, 8 x i16 mixing
    SimdFloat,
    /// Packed 16-bit fixed-point filter, 4 x i16 mixing
    VectorFixedPoint,
}

impl KernelKind {
    /// Samples per iteration of the mixing loops
    pub const fn vector_width(self) -> usize {
        match self {
            KernelKind::Scalar => 1,
            KernelKind::SimdFloat => 8,
            KernelKind::VectorFixedPoint => 4,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            KernelKind::Scalar => "Scalar",
            KernelKind::SimdFloat => "SIMD float",
            KernelKind::VectorFixedPoint => "Vector fixed-point",
        }
    }
}

/// Filter and mixing contract shared by all kernels.
///
/// Buffer pairs must have matching lengths (`out` of `pan_and_scale` twice
/// the mono length). A mismatch trips a debug assertion; release builds
/// process the common prefix. Use the checked free functions in this module
/// when lengths come from outside.
pub trait FilterKernel: Send + Sync {
    fn kind(&self) -> KernelKind;

    fn vector_width(&self) -> usize {
        self.kind().vector_width()
    }

    /// One sample through a single stage
    fn filter_sample(
        &self,
        input: f32,
        history: &mut FilterHistory,
        coeffs: &FilterCoefficients,
    ) -> f32;

    /// One sample through the two-section cascade
    fn filter_cascade_sample(
        &self,
        input: f32,
        history: &mut CascadeHistory,
        coeffs: &CascadeCoefficients,
    ) -> f32;

    /// Filter a partial block in place
    fn filter_block(
        &self,
        block: &mut [i16],
        coeffs: &FilterCoefficients,
        history: &mut FilterHistory,
    ) {
        for sample in block.iter_mut() {
            *sample = to_pcm(self.filter_sample(*sample as f32, history, coeffs));
        }
    }

    /// Filter a partial block in place through the cascade
    fn filter_cascade_block(
        &self,
        block: &mut [i16],
        coeffs: &CascadeCoefficients,
        history: &mut CascadeHistory,
    ) {
        for sample in block.iter_mut() {
            *sample = to_pcm(self.filter_cascade_sample(*sample as f32, history, coeffs));
        }
    }

    /// `buf1[i] += buf2[i]`
    fn mix_buffers(&self, buf1: &mut [i16], buf2: &[i16]);

    /// `buf1[i] += mul_high(buf1[i], buf2[i])`
    fn mix_buffers_ring_mix(&self, buf1: &mut [i16], buf2: &[i16]);

    /// `buf1[i] = mul_high(buf1[i], buf2[i])`
    fn mix_buffers_ring(&self, buf1: &mut [i16], buf2: &[i16]);

    /// `output[i] += mul_high(input[i], volume)`
    fn produce_output(&self, input: &[i16], output: &mut [i16], volume: i16);

    /// Interleave `mono` into `out` as `[L, R, ...]` with separate gains
    fn pan_and_scale(&self, mono: &[i16], left: i16, right: i16, out: &mut [i16]);
}

impl std::fmt::Debug for dyn FilterKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterKernel")
            .field("kind", &self.kind())
            .finish()
    }
}

/// Kernel for `kind`, if this CPU can run it
pub fn kernel_for(kind: KernelKind) -> Option<&'static dyn FilterKernel> {
    match kind {
        KernelKind::Scalar => Some(&scalar::SCALAR),
        KernelKind::SimdFloat => SimdFloatKernel::get().map(|k| k as &'static dyn FilterKernel),
        KernelKind::VectorFixedPoint => {
            VectorFixedPointKernel::get().map(|k| k as &'static dyn FilterKernel)
        }
    }
}

/// Every kernel this CPU can run, scalar first
pub fn available_kernels() -> Vec<&'static dyn FilterKernel> {
    [
        KernelKind::Scalar,
        KernelKind::SimdFloat,
        KernelKind::VectorFixedPoint,
    ]
    .into_iter()
    .filter_map(kernel_for)
    .collect()
}

/// Whether `features` describe a CPU that can run `kind`
fn supports(features: CpuFeatures, kind: KernelKind) -> bool {
    match kind {
        KernelKind::Scalar => true,
        KernelKind::SimdFloat => features.has_simd_float() && features.has_packed_int16(),
        KernelKind::VectorFixedPoint => features.has_packed_int16(),
    }
}

/// `kind`, if both `features` and the running CPU allow it
fn permitted(features: CpuFeatures, kind: KernelKind) -> Option<&'static dyn FilterKernel> {
    kernel_for(kind).filter(|_| supports(features, kind))
}

/// Best kernel allowed by `features`.
///
/// `features` can only narrow the choice: a kernel is never returned unless
/// the running CPU supports it as well.
fn auto_kernel(features: CpuFeatures) -> &'static dyn FilterKernel {
    if let Some(kernel) = permitted(features, KernelKind::SimdFloat) {
        return kernel;
    }
    if features.has_legacy_vector() {
        if let Some(kernel) = permitted(features, KernelKind::VectorFixedPoint) {
            return kernel;
        }
    }
    &scalar::SCALAR
}

/// Pick a kernel for `features` honoring `preference`.
///
/// A forced kernel is used only when `features` list what it needs and the
/// running CPU can run it; otherwise the automatic choice for `features`
/// is used.
pub fn select_kernel(
    features: CpuFeatures,
    preference: KernelPreference,
) -> &'static dyn FilterKernel {
    let forced = match preference {
        KernelPreference::Auto => None,
        KernelPreference::Scalar => Some(KernelKind::Scalar),
        KernelPreference::SimdFloat => Some(KernelKind::SimdFloat),
        KernelPreference::VectorFixedPoint => Some(KernelKind::VectorFixedPoint),
    };

    let kernel = match forced {
        Some(kind) => permitted(features, kind).unwrap_or_else(|| {
            let fallback = auto_kernel(features);
            log::warn!(
                "{} kernel unavailable for these CPU features, using {}",
                kind.name(),
                fallback.kind().name()
            );
            fallback
        }),
        None => auto_kernel(features),
    };
    log::info!(
        "Selected {} kernel (width {})",
        kernel.kind().name(),
        kernel.vector_width()
    );
    kernel
}

static ACTIVE: OnceLock<&'static dyn FilterKernel> = OnceLock::new();

/// Process-wide kernel chosen from the detected CPU features
pub fn active_kernel() -> &'static dyn FilterKernel {
    *ACTIVE.get_or_init(|| select_kernel(cpu_features(), KernelPreference::Auto))
}

// ============ Checked entry points ============

/// Filter a partial block with the active kernel
#[inline]
pub fn filter_block(block: &mut [i16], coeffs: &FilterCoefficients, history: &mut FilterHistory) {
    active_kernel().filter_block(block, coeffs, history)
}

/// Filter a partial block through the cascade with the active kernel
#[inline]
pub fn filter_cascade_block(
    block: &mut [i16],
    coeffs: &CascadeCoefficients,
    history: &mut CascadeHistory,
) {
    active_kernel().filter_cascade_block(block, coeffs, history)
}

pub fn mix_buffers(buf1: &mut [i16], buf2: &[i16]) -> MtResult<()> {
    ensure_len("mix_buffers", buf1.len(), buf2.len())?;
    active_kernel().mix_buffers(buf1, buf2);
    Ok(())
}

pub fn mix_buffers_ring_mix(buf1: &mut [i16], buf2: &[i16]) -> MtResult<()> {
    ensure_len("mix_buffers_ring_mix", buf1.len(), buf2.len())?;
    active_kernel().mix_buffers_ring_mix(buf1, buf2);
    Ok(())
}

pub fn mix_buffers_ring(buf1: &mut [i16], buf2: &[i16]) -> MtResult<()> {
    ensure_len("mix_buffers_ring", buf1.len(), buf2.len())?;
    active_kernel().mix_buffers_ring(buf1, buf2);
    Ok(())
}

pub fn produce_output(input: &[i16], output: &mut [i16], volume: i16) -> MtResult<()> {
    ensure_len("produce_output", output.len(), input.len())?;
    active_kernel().produce_output(input, output, volume);
    Ok(())
}

/// Allocating variant of [`FilterKernel::pan_and_scale`]
pub fn pan_and_scale(mono: &[i16], left: i16, right: i16) -> Vec<i16> {
    let mut out = vec![0; mono.len() * 2];
    active_kernel().pan_and_scale(mono, left, right, &mut out);
    out
}

/// Pan into a caller-provided interleaved buffer
pub fn pan_and_scale_into(mono: &[i16], left: i16, right: i16, out: &mut [i16]) -> MtResult<()> {
    ensure_len("pan_and_scale", mono.len() * 2, out.len())?;
    active_kernel().pan_and_scale(mono, left, right, out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mt_core::MtError;

    #[test]
    fn test_forced_scalar() {
        let kernel = select_kernel(cpu_features(), KernelPreference::Scalar);
        assert_eq!(kernel.kind(), KernelKind::Scalar);
    }

    #[test]
    fn test_no_features_selects_scalar() {
        let kernel = select_kernel(CpuFeatures::none(), KernelPreference::Auto);
        assert_eq!(kernel.kind(), KernelKind::Scalar);
    }

    #[test]
    fn test_forced_kernel_respects_features() {
        for preference in [KernelPreference::SimdFloat, KernelPreference::VectorFixedPoint] {
            let kernel = select_kernel(CpuFeatures::none(), preference);
            assert_eq!(kernel.kind(), KernelKind::Scalar, "{preference:?}");
        }

        // Packed integers without packed float: fixed point may be forced,
        // float SIMD may not.
        let int_only = CpuFeatures {
            sse2: true,
            ..CpuFeatures::none()
        };
        let kernel = select_kernel(int_only, KernelPreference::SimdFloat);
        assert_ne!(kernel.kind(), KernelKind::SimdFloat);
        if VectorFixedPointKernel::get().is_some() {
            let kernel = select_kernel(int_only, KernelPreference::VectorFixedPoint);
            assert_eq!(kernel.kind(), KernelKind::VectorFixedPoint);
        }
    }

    #[test]
    fn test_auto_prefers_simd_float() {
        let kernel = select_kernel(cpu_features(), KernelPreference::Auto);
        if SimdFloatKernel::get().is_some() {
            assert_eq!(kernel.kind(), KernelKind::SimdFloat);
        }
        assert_eq!(active_kernel().kind(), kernel.kind());
    }

    #[test]
    fn test_available_always_has_scalar() {
        let kernels = available_kernels();
        assert_eq!(kernels[0].kind(), KernelKind::Scalar);
        #[cfg(target_arch = "x86_64")]
        assert_eq!(kernels.len(), 3);
    }

    #[test]
    fn test_checked_entry_points_reject_mismatch() {
        let mut a = vec![0i16; 8];
        let err = mix_buffers(&mut a, &[1; 7]).unwrap_err();
        assert!(matches!(
            err,
            MtError::LengthMismatch {
                operation: "mix_buffers",
                expected: 8,
                actual: 7
            }
        ));
        assert!(mix_buffers_ring_mix(&mut a, &[0; 9]).is_err());
        assert!(mix_buffers_ring(&mut a, &[0; 3]).is_err());
        assert!(produce_output(&[0; 3], &mut a, 100).is_err());
        assert!(pan_and_scale_into(&[0; 4], 1, 1, &mut a).is_ok());
        assert!(pan_and_scale_into(&[0; 5], 1, 1, &mut a).is_err());
    }

    #[test]
    fn test_pan_and_scale_allocates_stereo() {
        let out = pan_and_scale(&[16384; 11], 32767, 0);
        assert_eq!(out.len(), 22);
        for frame in out.chunks_exact(2) {
            assert_eq!(frame, [8191, 0]);
        }
    }
}
