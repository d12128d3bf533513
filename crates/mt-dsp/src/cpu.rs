//! Runtime CPU feature detection
//!
//! Probes the processor once and caches the answer for the process lifetime.
//! Detection is a pure function of the hardware, so a race on first use only
//! computes the same value twice.
//!
//! # Probes
//! - Packed single-precision SIMD: CPUID leaf 1, EDX bit 25 (SSE); NEON is
//!   mandatory on aarch64.
//! - Legacy packed vector extension: extended leaf `0x8000_0001`, EDX bit 31
//!   (3DNow). The extended range is checked before the leaf is queried.
//! - On 32-bit x86 the CPUID instruction itself is probed first by toggling
//!   the EFLAGS ID bit; pre-CPUID processors report nothing.

use std::sync::OnceLock;

const LEAF1_EDX_MMX: u32 = 1 << 23;
const LEAF1_EDX_SSE: u32 = 1 << 25;
const LEAF1_EDX_SSE2: u32 = 1 << 26;
const EXT_LEAF: u32 = 0x8000_0001;
const EXT_EDX_3DNOW: u32 = 1 << 31;

/// Vector extensions present on the running CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuFeatures {
    pub mmx: bool,
    pub sse: bool,
    pub sse2: bool,
    pub amd_3dnow: bool,
    pub neon: bool,
}

impl CpuFeatures {
    /// A CPU with no vector extensions at all
    pub const fn none() -> Self {
        Self {
            mmx: false,
            sse: false,
            sse2: false,
            amd_3dnow: false,
            neon: false,
        }
    }

    /// Packed single-precision float arithmetic is available
    #[inline]
    pub const fn has_simd_float(&self) -> bool {
        self.sse || self.neon
    }

    /// Packed 16-bit integer arithmetic usable by the mixing kernels
    #[inline]
    pub const fn has_packed_int16(&self) -> bool {
        self.sse2 || self.neon
    }

    /// Legacy vendor vector extension is available
    #[inline]
    pub const fn has_legacy_vector(&self) -> bool {
        self.amd_3dnow
    }

    /// Probe the running CPU (uncached)
    pub fn probe() -> Self {
        let mut features = Self::none();

        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            if let Some(edx) = x86::leaf_edx(1) {
                features.mmx = edx & LEAF1_EDX_MMX != 0;
                features.sse = edx & LEAF1_EDX_SSE != 0;
                features.sse2 = edx & LEAF1_EDX_SSE2 != 0;
            }
            if let Some(edx) = x86::leaf_edx(EXT_LEAF) {
                features.amd_3dnow = edx & EXT_EDX_3DNOW != 0;
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            features.neon = true;
        }

        features
    }
}

static FEATURES: OnceLock<CpuFeatures> = OnceLock::new();

/// Cached features of the running CPU
pub fn cpu_features() -> CpuFeatures {
    *FEATURES.get_or_init(|| {
        let features = CpuFeatures::probe();
        log::debug!("CPU features: {:?}", features);
        features
    })
}

/// Packed single-precision SIMD is available
#[inline]
pub fn detect_simd() -> bool {
    cpu_features().has_simd_float()
}

/// Legacy packed vector extension (3DNow) is available
#[inline]
pub fn detect_legacy_vector_ext() -> bool {
    cpu_features().has_legacy_vector()
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86 {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::{__cpuid, __get_cpuid_max};
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::{__cpuid, __get_cpuid_max};

    /// EFLAGS ID-bit probe; CPUID always exists on x86_64.
    #[inline]
    fn has_cpuid() -> bool {
        #[cfg(target_arch = "x86")]
        {
            std::arch::x86::has_cpuid()
        }
        #[cfg(target_arch = "x86_64")]
        {
            true
        }
    }

    /// EDX of `leaf`, or `None` if CPUID or the leaf is unsupported.
    #[allow(unused_unsafe)]
    pub(super) fn leaf_edx(leaf: u32) -> Option<u32> {
        if !has_cpuid() {
            return None;
        }
        // Base and extended leaves report their own maximum.
        let range = leaf & 0x8000_0000;
        // SAFETY: CPUID presence was established above.
        let (max_leaf, _) = unsafe { __get_cpuid_max(range) };
        if max_leaf < leaf {
            return None;
        }
        // SAFETY: the leaf is within the reported range.
        Some(unsafe { __cpuid(leaf) }.edx)
    }
}
