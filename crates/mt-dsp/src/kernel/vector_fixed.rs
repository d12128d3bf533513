//! Packed 16-bit fixed-point kernel
//!
//! The alternate-precision path for legacy vector hardware: four i16 lanes
//! per operation (one 64-bit vector register). Gains are applied four
//! samples at a time; each section forms its pole and zero sums with one
//! packed multiply-add. It does not reproduce the float kernels; it
//! reproduces [`crate::fixed`] exactly.
//!
//! The fixed-point coefficients are the ones cached on the float
//! coefficient types, so nothing is quantized on the sample path.
//!
//! The float entry points (`filter_sample`, `filter_cascade_sample`) round
//! the input onto the i16 grid, run the fixed-point path, and hand back the
//! i16 result as f32. Float histories carry integer values in this mode.

use super::{scalar, FilterKernel, KernelKind};
use crate::cpu::cpu_features;
use crate::filter::{
    to_pcm, CascadeCoefficients, CascadeHistory, FilterCoefficients, FilterHistory,
};
use crate::fixed::{filter_cascade_sample_fixed, filter_sample_fixed, FixedHistory};

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
use x86_impl as arch;

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
use fallback_impl as arch;

/// Packed 16-bit fixed-point kernel.
///
/// Only obtainable through [`VectorFixedPointKernel::get`].
#[derive(Debug)]
pub struct VectorFixedPointKernel {
    _detected: (),
}

static VECTOR_FIXED: VectorFixedPointKernel = VectorFixedPointKernel { _detected: () };

impl VectorFixedPointKernel {
    /// The kernel, if the running CPU has packed 16-bit integer support
    pub fn get() -> Option<&'static Self> {
        let supported = cfg!(any(target_arch = "x86", target_arch = "x86_64"))
            && cpu_features().sse2;
        supported.then_some(&VECTOR_FIXED)
    }
}

fn take_history(stages: &[FilterHistory; 2]) -> [FixedHistory; 2] {
    [
        FixedHistory::from_float(&stages[0]),
        FixedHistory::from_float(&stages[1]),
    ]
}

fn store_history(fixed: &[FixedHistory; 2], stages: &mut [FilterHistory; 2]) {
    fixed[0].store(&mut stages[0]);
    fixed[1].store(&mut stages[1]);
}

// SAFETY (all `arch` calls): the kernel exists only after `get` confirmed SSE2.
impl FilterKernel for VectorFixedPointKernel {
    fn kind(&self) -> KernelKind {
        KernelKind::VectorFixedPoint
    }

    fn filter_sample(
        &self,
        input: f32,
        history: &mut FilterHistory,
        coeffs: &FilterCoefficients,
    ) -> f32 {
        let mut hist = FixedHistory::from_float(history);
        let out = filter_sample_fixed(to_pcm(input), &mut hist, coeffs.fixed());
        hist.store(history);
        out as f32
    }

    fn filter_cascade_sample(
        &self,
        input: f32,
        history: &mut CascadeHistory,
        coeffs: &CascadeCoefficients,
    ) -> f32 {
        let mut hist = take_history(&history.stages);
        let out = filter_cascade_sample_fixed(to_pcm(input), &mut hist, coeffs.fixed());
        store_history(&hist, &mut history.stages);
        out as f32
    }

    fn filter_block(
        &self,
        block: &mut [i16],
        coeffs: &FilterCoefficients,
        history: &mut FilterHistory,
    ) {
        let mut hist = FixedHistory::from_float(history);
        unsafe { arch::filter_block(block, coeffs.fixed(), &mut hist) }
        hist.store(history);
    }

    fn filter_cascade_block(
        &self,
        block: &mut [i16],
        coeffs: &CascadeCoefficients,
        history: &mut CascadeHistory,
    ) {
        let mut hist = take_history(&history.stages);
        unsafe { arch::filter_cascade_block(block, coeffs.fixed(), &mut hist) }
        store_history(&hist, &mut history.stages);
    }

    fn mix_buffers(&self, buf1: &mut [i16], buf2: &[i16]) {
        debug_assert_eq!(buf1.len(), buf2.len());
        unsafe { arch::mix_buffers(buf1, buf2) }
    }

    fn mix_buffers_ring_mix(&self, buf1: &mut [i16], buf2: &[i16]) {
        debug_assert_eq!(buf1.len(), buf2.len());
        unsafe { arch::mix_buffers_ring_mix(buf1, buf2) }
    }

    fn mix_buffers_ring(&self, buf1: &mut [i16], buf2: &[i16]) {
        debug_assert_eq!(buf1.len(), buf2.len());
        unsafe { arch::mix_buffers_ring(buf1, buf2) }
    }

    fn produce_output(&self, input: &[i16], output: &mut [i16], volume: i16) {
        debug_assert_eq!(input.len(), output.len());
        unsafe { arch::produce_output(input, output, volume) }
    }

    fn pan_and_scale(&self, mono: &[i16], left: i16, right: i16, out: &mut [i16]) {
        debug_assert_eq!(mono.len() * 2, out.len());
        unsafe { arch::pan_and_scale(mono, left, right, out) }
    }
}

// ============ x86 / x86_64 (SSE2 on 64-bit halves) ============

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86_impl {
    #![allow(unused_unsafe)]

    #[cfg(target_arch = "x86")]
    use std::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::*;

    use super::scalar;
    use crate::fixed::{
        self, filter_cascade_sample_fixed, filter_sample_fixed, FixedCascadeCoefficients,
        FixedCoefficients, FixedGain, FixedHistory, FixedSection,
    };

    const LANES: usize = 4;

    #[inline(always)]
    unsafe fn load4(ptr: *const i16) -> __m128i {
        unsafe { _mm_loadl_epi64(ptr as *const __m128i) }
    }

    #[inline(always)]
    unsafe fn store4(ptr: *mut i16, value: __m128i) {
        unsafe { _mm_storel_epi64(ptr as *mut __m128i, value) }
    }

    #[inline]
    #[target_feature(enable = "sse2")]
    unsafe fn load_section(c: &FixedSection) -> __m128i {
        unsafe { _mm_set_epi16(0, 0, 0, 0, c[3], c[2], c[1], c[0]) }
    }

    /// Four samples times `gain`, widened to 32 bits
    #[inline]
    #[target_feature(enable = "sse2")]
    unsafe fn scale4(ptr: *const i16, gain: &FixedGain) -> [i32; LANES] {
        let mut acc = [0i32; LANES];
        unsafe {
            let x = load4(ptr);
            let m = _mm_set1_epi16(gain.mantissa);
            let product = _mm_unpacklo_epi16(_mm_mullo_epi16(x, m), _mm_mulhi_epi16(x, m));
            let scaled = _mm_sra_epi32(product, _mm_cvtsi32_si128(gain.shift as i32));
            _mm_storeu_si128(acc.as_mut_ptr() as *mut __m128i, scaled);
        }
        acc
    }

    /// One section: lanes `[h1, h2, h1, h2]` against `[fb1, fb2, ff1, ff2]`
    /// give the pole sum and the zero sum in a single multiply-add.
    #[inline]
    #[target_feature(enable = "sse2")]
    unsafe fn section_with(acc: i32, history: &mut FixedHistory, coef: __m128i) -> i16 {
        unsafe {
            let (h1, h2) = (history.hist1, history.hist2);
            let hist = _mm_set_epi16(0, 0, 0, 0, h2, h1, h2, h1);
            let sums = _mm_madd_epi16(hist, coef);
            let poles = _mm_cvtsi128_si32(sums);
            let zeros = _mm_cvtsi128_si32(_mm_srli_si128::<4>(sums));
            fixed::section_from_sums(acc, poles, zeros, history)
        }
    }

    #[target_feature(enable = "sse2")]
    pub unsafe fn filter_block(
        block: &mut [i16],
        coeffs: &FixedCoefficients,
        history: &mut FixedHistory,
    ) {
        let mut chunks = block.chunks_exact_mut(LANES);
        unsafe {
            let coef = load_section(&coeffs.section);
            for chunk in &mut chunks {
                let acc = scale4(chunk.as_ptr(), &coeffs.gain);
                for (sample, acc) in chunk.iter_mut().zip(acc) {
                    *sample = section_with(acc, history, coef);
                }
            }
        }
        for sample in chunks.into_remainder() {
            *sample = filter_sample_fixed(*sample, history, coeffs);
        }
    }

    #[target_feature(enable = "sse2")]
    pub unsafe fn filter_cascade_block(
        block: &mut [i16],
        coeffs: &FixedCascadeCoefficients,
        history: &mut [FixedHistory; 2],
    ) {
        let mut chunks = block.chunks_exact_mut(LANES);
        unsafe {
            let c0 = load_section(&coeffs.sections[0]);
            let c1 = load_section(&coeffs.sections[1]);
            let [first, second] = &mut *history;
            for chunk in &mut chunks {
                let acc = scale4(chunk.as_ptr(), &coeffs.gains[0]);
                for (sample, acc) in chunk.iter_mut().zip(acc) {
                    let out = section_with(acc, first, c0);
                    *sample = section_with(coeffs.gains[1].apply(out), second, c1);
                }
            }
        }
        for sample in chunks.into_remainder() {
            *sample = filter_cascade_sample_fixed(*sample, history, coeffs);
        }
    }

    #[target_feature(enable = "sse2")]
    pub unsafe fn mix_buffers(buf1: &mut [i16], buf2: &[i16]) {
        let len = buf1.len().min(buf2.len());
        let simd_len = len - (len % LANES);
        unsafe {
            let dst = buf1.as_mut_ptr();
            let src = buf2.as_ptr();
            for i in (0..simd_len).step_by(LANES) {
                let sum = _mm_add_epi16(load4(dst.add(i)), load4(src.add(i)));
                store4(dst.add(i), sum);
            }
        }
        scalar::mix_buffers(&mut buf1[simd_len..len], &buf2[simd_len..len]);
    }

    #[target_feature(enable = "sse2")]
    pub unsafe fn mix_buffers_ring_mix(buf1: &mut [i16], buf2: &[i16]) {
        let len = buf1.len().min(buf2.len());
        let simd_len = len - (len % LANES);
        unsafe {
            let dst = buf1.as_mut_ptr();
            let src = buf2.as_ptr();
            for i in (0..simd_len).step_by(LANES) {
                let a = load4(dst.add(i));
                let ring = _mm_mulhi_epi16(a, load4(src.add(i)));
                store4(dst.add(i), _mm_add_epi16(a, ring));
            }
        }
        scalar::mix_buffers_ring_mix(&mut buf1[simd_len..len], &buf2[simd_len..len]);
    }

    #[target_feature(enable = "sse2")]
    pub unsafe fn mix_buffers_ring(buf1: &mut [i16], buf2: &[i16]) {
        let len = buf1.len().min(buf2.len());
        let simd_len = len - (len % LANES);
        unsafe {
            let dst = buf1.as_mut_ptr();
            let src = buf2.as_ptr();
            for i in (0..simd_len).step_by(LANES) {
                let ring = _mm_mulhi_epi16(load4(dst.add(i)), load4(src.add(i)));
                store4(dst.add(i), ring);
            }
        }
        scalar::mix_buffers_ring(&mut buf1[simd_len..len], &buf2[simd_len..len]);
    }

    #[target_feature(enable = "sse2")]
    pub unsafe fn produce_output(input: &[i16], output: &mut [i16], volume: i16) {
        let len = input.len().min(output.len());
        let simd_len = len - (len % LANES);
        unsafe {
            let vol = _mm_set1_epi16(volume);
            let src = input.as_ptr();
            let dst = output.as_mut_ptr();
            for i in (0..simd_len).step_by(LANES) {
                let scaled = _mm_mulhi_epi16(load4(src.add(i)), vol);
                store4(dst.add(i), _mm_add_epi16(load4(dst.add(i)), scaled));
            }
        }
        scalar::produce_output(&input[simd_len..len], &mut output[simd_len..len], volume);
    }

    #[target_feature(enable = "sse2")]
    pub unsafe fn pan_and_scale(mono: &[i16], left: i16, right: i16, out: &mut [i16]) {
        let len = mono.len().min(out.len() / 2);
        let simd_len = len - (len % LANES);
        unsafe {
            let l = _mm_set1_epi16(left);
            let r = _mm_set1_epi16(right);
            let src = mono.as_ptr();
            let dst = out.as_mut_ptr();
            for i in (0..simd_len).step_by(LANES) {
                let x = load4(src.add(i));
                let frames = _mm_unpacklo_epi16(_mm_mulhi_epi16(x, l), _mm_mulhi_epi16(x, r));
                _mm_storeu_si128(dst.add(2 * i) as *mut __m128i, frames);
            }
        }
        scalar::pan_and_scale(
            &mono[simd_len..len],
            left,
            right,
            &mut out[2 * simd_len..2 * len],
        );
    }
}

// Never reached: `VectorFixedPointKernel::get` returns `None` here.
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
mod fallback_impl {
    use super::scalar;
    use crate::fixed::{
        filter_cascade_sample_fixed, filter_sample_fixed, FixedCascadeCoefficients,
        FixedCoefficients, FixedHistory,
    };

    pub unsafe fn filter_block(
        block: &mut [i16],
        coeffs: &FixedCoefficients,
        history: &mut FixedHistory,
    ) {
        for sample in block.iter_mut() {
            *sample = filter_sample_fixed(*sample, history, coeffs);
        }
    }

    pub unsafe fn filter_cascade_block(
        block: &mut [i16],
        coeffs: &FixedCascadeCoefficients,
        history: &mut [FixedHistory; 2],
    ) {
        for sample in block.iter_mut() {
            *sample = filter_cascade_sample_fixed(*sample, history, coeffs);
        }
    }

    pub unsafe fn mix_buffers(buf1: &mut [i16], buf2: &[i16]) {
        scalar::mix_buffers(buf1, buf2)
    }

    pub unsafe fn mix_buffers_ring_mix(buf1: &mut [i16], buf2: &[i16]) {
        scalar::mix_buffers_ring_mix(buf1, buf2)
    }

    pub unsafe fn mix_buffers_ring(buf1: &mut [i16], buf2: &[i16]) {
        scalar::mix_buffers_ring(buf1, buf2)
    }

    pub unsafe fn produce_output(input: &[i16], output: &mut [i16], volume: i16) {
        scalar::produce_output(input, output, volume)
    }

    pub unsafe fn pan_and_scale(mono: &[i16], left: i16, right: i16, out: &mut [i16]) {
        scalar::pan_and_scale(mono, left, right, out)
    }
}
