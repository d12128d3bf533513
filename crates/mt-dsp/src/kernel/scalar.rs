//! Portable scalar kernel
//!
//! Reference semantics for every kernel. The free functions double as the
//! remainder path of the vector kernels, so a tail shorter than one vector
//! is processed with exactly the same arithmetic.

use super::{FilterKernel, KernelKind};
use crate::filter::{
    filter_cascade_sample, filter_sample, CascadeCoefficients, CascadeHistory,
    FilterCoefficients, FilterHistory,
};
use crate::fixed::mul_high;

/// Portable scalar kernel
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarKernel;

pub(crate) static SCALAR: ScalarKernel = ScalarKernel;

impl FilterKernel for ScalarKernel {
    fn kind(&self) -> KernelKind {
        KernelKind::Scalar
    }

    fn filter_sample(
        &self,
        input: f32,
        history: &mut FilterHistory,
        coeffs: &FilterCoefficients,
    ) -> f32 {
        filter_sample(input, history, coeffs)
    }

    fn filter_cascade_sample(
        &self,
        input: f32,
        history: &mut CascadeHistory,
        coeffs: &CascadeCoefficients,
    ) -> f32 {
        filter_cascade_sample(input, history, coeffs)
    }

    fn mix_buffers(&self, buf1: &mut [i16], buf2: &[i16]) {
        debug_assert_eq!(buf1.len(), buf2.len());
        mix_buffers(buf1, buf2);
    }

    fn mix_buffers_ring_mix(&self, buf1: &mut [i16], buf2: &[i16]) {
        debug_assert_eq!(buf1.len(), buf2.len());
        mix_buffers_ring_mix(buf1, buf2);
    }

    fn mix_buffers_ring(&self, buf1: &mut [i16], buf2: &[i16]) {
        debug_assert_eq!(buf1.len(), buf2.len());
        mix_buffers_ring(buf1, buf2);
    }

    fn produce_output(&self, input: &[i16], output: &mut [i16], volume: i16) {
        debug_assert_eq!(input.len(), output.len());
        produce_output(input, output, volume);
    }

    fn pan_and_scale(&self, mono: &[i16], left: i16, right: i16, out: &mut [i16]) {
        debug_assert_eq!(mono.len() * 2, out.len());
        pan_and_scale(mono, left, right, out);
    }
}

/// `buf1[i] += buf2[i]`
#[inline]
pub fn mix_buffers(buf1: &mut [i16], buf2: &[i16]) {
    for (a, &b) in buf1.iter_mut().zip(buf2) {
        *a = a.wrapping_add(b);
    }
}

/// `buf1[i] += mul_high(buf1[i], buf2[i])`
#[inline]
pub fn mix_buffers_ring_mix(buf1: &mut [i16], buf2: &[i16]) {
    for (a, &b) in buf1.iter_mut().zip(buf2) {
        *a = a.wrapping_add(mul_high(*a, b));
    }
}

/// `buf1[i] = mul_high(buf1[i], buf2[i])`
#[inline]
pub fn mix_buffers_ring(buf1: &mut [i16], buf2: &[i16]) {
    for (a, &b) in buf1.iter_mut().zip(buf2) {
        *a = mul_high(*a, b);
    }
}

/// `output[i] += mul_high(input[i], volume)`
#[inline]
pub fn produce_output(input: &[i16], output: &mut [i16], volume: i16) {
    for (o, &x) in output.iter_mut().zip(input) {
        *o = o.wrapping_add(mul_high(x, volume));
    }
}

/// Mono to interleaved stereo with separate left/right gains
#[inline]
pub fn pan_and_scale(mono: &[i16], left: i16, right: i16, out: &mut [i16]) {
    for (frame, &x) in out.chunks_exact_mut(2).zip(mono) {
        frame[0] = mul_high(x, left);
        frame[1] = mul_high(x, right);
    }
}
