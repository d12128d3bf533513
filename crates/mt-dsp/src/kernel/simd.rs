//! Packed single-precision filter kernel
//!
//! The filter section is computed with one 4-wide multiply:
//! `[h1, h2, h1, h2] * [fb1, fb2, ff1, ff2]`, then the lanes are folded into
//! the accumulator one at a time in the scalar order (two subtracts, history
//! update, two adds). The cascade runs that twice, strictly in sequence,
//! since section 2 depends on the finished output of section 1. Because the
//! order of every float operation matches the scalar kernel, results are
//! bit-identical to it.
//!
//! Mixing runs on eight i16 lanes with wrapping adds and multiply-high.
//!
//! Backends: SSE + SSE2 on x86/x86_64, NEON on aarch64.

use super::{scalar, FilterKernel, KernelKind};
use crate::cpu::{cpu_features, CpuFeatures};
use crate::filter::{CascadeCoefficients, CascadeHistory, FilterCoefficients, FilterHistory};

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
use x86_impl as arch;

#[cfg(target_arch = "aarch64")]
use arm_impl as arch;

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
use fallback_impl as arch;

/// Packed single-precision kernel.
///
/// Only obtainable through [`SimdFloatKernel::get`], which checks the CPU.
#[derive(Debug)]
pub struct SimdFloatKernel {
    _detected: (),
}

static SIMD_FLOAT: SimdFloatKernel = SimdFloatKernel { _detected: () };

impl SimdFloatKernel {
    /// The kernel, if the running CPU supports it
    pub fn get() -> Option<&'static Self> {
        Self::supported(cpu_features()).then_some(&SIMD_FLOAT)
    }

    fn supported(features: CpuFeatures) -> bool {
        if cfg!(any(target_arch = "x86", target_arch = "x86_64")) {
            features.sse && features.sse2
        } else if cfg!(target_arch = "aarch64") {
            features.neon
        } else {
            false
        }
    }
}

// SAFETY (all methods): `SimdFloatKernel` values exist only after `get`
// confirmed the CPU extensions `arch` is compiled for.
impl FilterKernel for SimdFloatKernel {
    fn kind(&self) -> KernelKind {
        KernelKind::SimdFloat
    }

    fn filter_sample(
        &self,
        input: f32,
        history: &mut FilterHistory,
        coeffs: &FilterCoefficients,
    ) -> f32 {
        unsafe { arch::section(input * coeffs.gain(), history, &coeffs.section()) }
    }

    fn filter_cascade_sample(
        &self,
        input: f32,
        history: &mut CascadeHistory,
        coeffs: &CascadeCoefficients,
    ) -> f32 {
        let [first, second] = &mut history.stages;
        unsafe {
            let out = arch::section(input * coeffs.gain(), first, &coeffs.section(0));
            arch::section(out, second, &coeffs.section(1))
        }
    }

    fn filter_block(
        &self,
        block: &mut [i16],
        coeffs: &FilterCoefficients,
        history: &mut FilterHistory,
    ) {
        unsafe { arch::filter_block(block, coeffs.gain(), &coeffs.section(), history) }
    }

    fn filter_cascade_block(
        &self,
        block: &mut [i16],
        coeffs: &CascadeCoefficients,
        history: &mut CascadeHistory,
    ) {
        unsafe {
            arch::filter_cascade_block(
                block,
                coeffs.gain(),
                &[coeffs.section(0), coeffs.section(1)],
                &mut history.stages,
            )
        }
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

// ============ x86 / x86_64 (SSE, SSE2) ============

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86_impl {
    #![allow(unused_unsafe)]

    #[cfg(target_arch = "x86")]
    use std::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::*;

    use super::scalar;
    use crate::filter::{to_pcm, FilterHistory, Section};

    const LANES: usize = 8;
    /// Rotate lanes down by one: [p0, p1, p2, p3] -> [p1, p2, p3, p0]
    const ROTATE: i32 = 0x39;

    #[inline]
    #[target_feature(enable = "sse")]
    unsafe fn section_with(acc: f32, history: &mut FilterHistory, coef: __m128) -> f32 {
        unsafe {
            let hist = _mm_set_ps(history.hist2, history.hist1, history.hist2, history.hist1);
            let prod = _mm_mul_ps(coef, hist);

            let mut out = _mm_sub_ss(_mm_set_ss(acc), prod);
            let prod = _mm_shuffle_ps::<ROTATE>(prod, prod);
            out = _mm_sub_ss(out, prod);
            let new_hist = _mm_cvtss_f32(out);

            let prod = _mm_shuffle_ps::<ROTATE>(prod, prod);
            out = _mm_add_ss(out, prod);
            let prod = _mm_shuffle_ps::<ROTATE>(prod, prod);
            out = _mm_add_ss(out, prod);

            history.hist2 = history.hist1;
            history.hist1 = new_hist;
            _mm_cvtss_f32(out)
        }
    }

    #[target_feature(enable = "sse")]
    pub unsafe fn section(acc: f32, history: &mut FilterHistory, c: &Section) -> f32 {
        unsafe { section_with(acc, history, _mm_loadu_ps(c.as_ptr())) }
    }

    #[target_feature(enable = "sse")]
    pub unsafe fn filter_block(
        block: &mut [i16],
        gain: f32,
        c: &Section,
        history: &mut FilterHistory,
    ) {
        unsafe {
            let coef = _mm_loadu_ps(c.as_ptr());
            for sample in block.iter_mut() {
                *sample = to_pcm(section_with(*sample as f32 * gain, history, coef));
            }
        }
    }

    #[target_feature(enable = "sse")]
    pub unsafe fn filter_cascade_block(
        block: &mut [i16],
        gain: f32,
        sections: &[Section; 2],
        history: &mut [FilterHistory; 2],
    ) {
        unsafe {
            let c0 = _mm_loadu_ps(sections[0].as_ptr());
            let c1 = _mm_loadu_ps(sections[1].as_ptr());
            let [first, second] = history;
            for sample in block.iter_mut() {
                let out = section_with(*sample as f32 * gain, first, c0);
                *sample = to_pcm(section_with(out, second, c1));
            }
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
                let a = _mm_loadu_si128(dst.add(i) as *const __m128i);
                let b = _mm_loadu_si128(src.add(i) as *const __m128i);
                _mm_storeu_si128(dst.add(i) as *mut __m128i, _mm_add_epi16(a, b));
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
                let a = _mm_loadu_si128(dst.add(i) as *const __m128i);
                let b = _mm_loadu_si128(src.add(i) as *const __m128i);
                let ring = _mm_mulhi_epi16(a, b);
                _mm_storeu_si128(dst.add(i) as *mut __m128i, _mm_add_epi16(a, ring));
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
                let a = _mm_loadu_si128(dst.add(i) as *const __m128i);
                let b = _mm_loadu_si128(src.add(i) as *const __m128i);
                _mm_storeu_si128(dst.add(i) as *mut __m128i, _mm_mulhi_epi16(a, b));
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
                let x = _mm_loadu_si128(src.add(i) as *const __m128i);
                let o = _mm_loadu_si128(dst.add(i) as *const __m128i);
                let scaled = _mm_mulhi_epi16(x, vol);
                _mm_storeu_si128(dst.add(i) as *mut __m128i, _mm_add_epi16(o, scaled));
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
                let x = _mm_loadu_si128(src.add(i) as *const __m128i);
                let lv = _mm_mulhi_epi16(x, l);
                let rv = _mm_mulhi_epi16(x, r);
                // L0 R0 L1 R1 ... L7 R7
                _mm_storeu_si128(dst.add(2 * i) as *mut __m128i, _mm_unpacklo_epi16(lv, rv));
                _mm_storeu_si128(
                    dst.add(2 * i + LANES) as *mut __m128i,
                    _mm_unpackhi_epi16(lv, rv),
                );
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

// ============ ARM NEON ============

#[cfg(target_arch = "aarch64")]
mod arm_impl {
    #![allow(unused_unsafe)]

    use std::arch::aarch64::*;

    use super::scalar;
    use crate::filter::{to_pcm, FilterHistory, Section};

    const LANES: usize = 8;

    #[inline(always)]
    unsafe fn section_with(acc: f32, history: &mut FilterHistory, coef: float32x4_t) -> f32 {
        unsafe {
            let hist = [history.hist1, history.hist2, history.hist1, history.hist2];
            let prod = vmulq_f32(coef, vld1q_f32(hist.as_ptr()));
            let new_hist = acc - vgetq_lane_f32::<0>(prod) - vgetq_lane_f32::<1>(prod);
            let out = new_hist + vgetq_lane_f32::<2>(prod) + vgetq_lane_f32::<3>(prod);
            history.hist2 = history.hist1;
            history.hist1 = new_hist;
            out
        }
    }

    /// High half of the 32-bit lane products
    #[inline(always)]
    unsafe fn mulhi(a: int16x8_t, b: int16x8_t) -> int16x8_t {
        unsafe {
            let lo = vmull_s16(vget_low_s16(a), vget_low_s16(b));
            let hi = vmull_high_s16(a, b);
            vcombine_s16(vshrn_n_s32::<16>(lo), vshrn_n_s32::<16>(hi))
        }
    }

    pub unsafe fn section(acc: f32, history: &mut FilterHistory, c: &Section) -> f32 {
        unsafe { section_with(acc, history, vld1q_f32(c.as_ptr())) }
    }

    pub unsafe fn filter_block(
        block: &mut [i16],
        gain: f32,
        c: &Section,
        history: &mut FilterHistory,
    ) {
        unsafe {
            let coef = vld1q_f32(c.as_ptr());
            for sample in block.iter_mut() {
                *sample = to_pcm(section_with(*sample as f32 * gain, history, coef));
            }
        }
    }

    pub unsafe fn filter_cascade_block(
        block: &mut [i16],
        gain: f32,
        sections: &[Section; 2],
        history: &mut [FilterHistory; 2],
    ) {
        unsafe {
            let c0 = vld1q_f32(sections[0].as_ptr());
            let c1 = vld1q_f32(sections[1].as_ptr());
            let [first, second] = history;
            for sample in block.iter_mut() {
                let out = section_with(*sample as f32 * gain, first, c0);
                *sample = to_pcm(section_with(out, second, c1));
            }
        }
    }

    pub unsafe fn mix_buffers(buf1: &mut [i16], buf2: &[i16]) {
        let len = buf1.len().min(buf2.len());
        let simd_len = len - (len % LANES);
        unsafe {
            let dst = buf1.as_mut_ptr();
            let src = buf2.as_ptr();
            for i in (0..simd_len).step_by(LANES) {
                let a = vld1q_s16(dst.add(i));
                let b = vld1q_s16(src.add(i));
                vst1q_s16(dst.add(i), vaddq_s16(a, b));
            }
        }
        scalar::mix_buffers(&mut buf1[simd_len..len], &buf2[simd_len..len]);
    }

    pub unsafe fn mix_buffers_ring_mix(buf1: &mut [i16], buf2: &[i16]) {
        let len = buf1.len().min(buf2.len());
        let simd_len = len - (len % LANES);
        unsafe {
            let dst = buf1.as_mut_ptr();
            let src = buf2.as_ptr();
            for i in (0..simd_len).step_by(LANES) {
                let a = vld1q_s16(dst.add(i));
                let b = vld1q_s16(src.add(i));
                vst1q_s16(dst.add(i), vaddq_s16(a, mulhi(a, b)));
            }
        }
        scalar::mix_buffers_ring_mix(&mut buf1[simd_len..len], &buf2[simd_len..len]);
    }

    pub unsafe fn mix_buffers_ring(buf1: &mut [i16], buf2: &[i16]) {
        let len = buf1.len().min(buf2.len());
        let simd_len = len - (len % LANES);
        unsafe {
            let dst = buf1.as_mut_ptr();
            let src = buf2.as_ptr();
            for i in (0..simd_len).step_by(LANES) {
                let a = vld1q_s16(dst.add(i));
                let b = vld1q_s16(src.add(i));
                vst1q_s16(dst.add(i), mulhi(a, b));
            }
        }
        scalar::mix_buffers_ring(&mut buf1[simd_len..len], &buf2[simd_len..len]);
    }

    pub unsafe fn produce_output(input: &[i16], output: &mut [i16], volume: i16) {
        let len = input.len().min(output.len());
        let simd_len = len - (len % LANES);
        unsafe {
            let vol = vdupq_n_s16(volume);
            let src = input.as_ptr();
            let dst = output.as_mut_ptr();
            for i in (0..simd_len).step_by(LANES) {
                let x = vld1q_s16(src.add(i));
                let o = vld1q_s16(dst.add(i));
                vst1q_s16(dst.add(i), vaddq_s16(o, mulhi(x, vol)));
            }
        }
        scalar::produce_output(&input[simd_len..len], &mut output[simd_len..len], volume);
    }

    pub unsafe fn pan_and_scale(mono: &[i16], left: i16, right: i16, out: &mut [i16]) {
        let len = mono.len().min(out.len() / 2);
        let simd_len = len - (len % LANES);
        unsafe {
            let l = vdupq_n_s16(left);
            let r = vdupq_n_s16(right);
            let src = mono.as_ptr();
            let dst = out.as_mut_ptr();
            for i in (0..simd_len).step_by(LANES) {
                let x = vld1q_s16(src.add(i));
                // Interleaving store: L0 R0 L1 R1 ...
                vst2q_s16(dst.add(2 * i), int16x8x2_t(mulhi(x, l), mulhi(x, r)));
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

// ============ Other architectures ============

// Never reached: `SimdFloatKernel::get` returns `None` here.
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
mod fallback_impl {
    use super::scalar;
    use crate::filter::{section_scalar, to_pcm, FilterHistory, Section};

    pub unsafe fn section(acc: f32, history: &mut FilterHistory, c: &Section) -> f32 {
        section_scalar(acc, history, c)
    }

    pub unsafe fn filter_block(
        block: &mut [i16],
        gain: f32,
        c: &Section,
        history: &mut FilterHistory,
    ) {
        for sample in block.iter_mut() {
            *sample = to_pcm(section_scalar(*sample as f32 * gain, history, c));
        }
    }

    pub unsafe fn filter_cascade_block(
        block: &mut [i16],
        gain: f32,
        sections: &[Section; 2],
        history: &mut [FilterHistory; 2],
    ) {
        let [first, second] = history;
        for sample in block.iter_mut() {
            let out = section_scalar(*sample as f32 * gain, first, &sections[0]);
            *sample = to_pcm(section_scalar(out, second, &sections[1]));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{filter_cascade_sample, filter_sample};

    #[test]
    fn test_simd_filter_matches_scalar_bitwise() {
        let Some(kernel) = SimdFloatKernel::get() else {
            return;
        };
        let coeffs = FilterCoefficients::new(0.9, -1.2, 0.45, 0.3, -0.07);
        let (mut hs, mut hv) = (FilterHistory::default(), FilterHistory::default());
        for i in 0..256 {
            let x = ((i * 37 % 101) as f32 - 50.0) * 13.5;
            let expect = filter_sample(x, &mut hs, &coeffs);
            let got = kernel.filter_sample(x, &mut hv, &coeffs);
            assert_eq!(got.to_bits(), expect.to_bits(), "sample {i}");
        }
        assert_eq!(hs, hv);
    }

    #[test]
    fn test_simd_cascade_matches_scalar_bitwise() {
        let Some(kernel) = SimdFloatKernel::get() else {
            return;
        };
        let coeffs = CascadeCoefficients::lowpass(32000.0, 3000.0, 2.0).unwrap();
        let (mut hs, mut hv) = (CascadeHistory::default(), CascadeHistory::default());
        for i in 0..512 {
            let x = if i % 64 < 32 { 8000.0 } else { -8000.0 };
            let expect = filter_cascade_sample(x, &mut hs, &coeffs);
            let got = kernel.filter_cascade_sample(x, &mut hv, &coeffs);
            assert_eq!(got.to_bits(), expect.to_bits(), "sample {i}");
        }
    }

    #[test]
    fn test_simd_pan_tail() {
        let Some(kernel) = SimdFloatKernel::get() else {
            return;
        };
        let mono: Vec<i16> = (0..11).map(|i| i * 3000 - 15000).collect();
        let mut got = vec![0; 22];
        let mut expect = vec![0; 22];
        kernel.pan_and_scale(&mono, 30000, -12000, &mut got);
        scalar::pan_and_scale(&mono, 30000, -12000, &mut expect);
        assert_eq!(got, expect);
    }
}
