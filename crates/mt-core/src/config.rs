//! Kernel and render configuration

use serde::{Deserialize, Serialize};

use crate::{MtError, MtResult, MAX_SAMPLES_PER_RUN};

/// Environment variable forcing a kernel (`auto`, `scalar`, `simd`, `fixed`)
pub const ENV_KERNEL: &str = "MT32_DSP_KERNEL";
/// Environment variable overriding the block length in frames
pub const ENV_BLOCK_LEN: &str = "MT32_DSP_BLOCK_LEN";
/// Environment variable overriding the master volume
pub const ENV_MASTER_VOLUME: &str = "MT32_DSP_MASTER_VOLUME";

/// Largest block the renderer will allocate scratch for
pub const MAX_BLOCK_LEN: usize = 65536;

/// Which compute kernel to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelPreference {
    /// Best kernel the CPU supports
    #[default]
    Auto,
    /// Portable scalar reference
    Scalar,
    /// Packed single-precision float filter, packed 16-bit mixing
    SimdFloat,
    /// Packed 16-bit fixed-point filter and mixing
    VectorFixedPoint,
}

impl KernelPreference {
    /// Parse the short names accepted in the environment.
    pub fn parse(value: &str) -> MtResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "scalar" => Ok(Self::Scalar),
            "simd" | "simd_float" => Ok(Self::SimdFloat),
            "fixed" | "vector_fixed_point" => Ok(Self::VectorFixedPoint),
            other => Err(MtError::InvalidConfig(format!("unknown kernel '{other}'"))),
        }
    }
}

/// Render configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DspConfig {
    pub kernel: KernelPreference,
    /// Maximum frames rendered per call
    pub block_len: usize,
    /// Multiply-high gain applied on the final mixdown
    pub master_volume: i16,
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            kernel: KernelPreference::Auto,
            block_len: MAX_SAMPLES_PER_RUN,
            master_volume: i16::MAX,
        }
    }
}

impl DspConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> MtResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> MtResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Defaults overridden by `MT32_DSP_*` environment variables.
    pub fn from_env() -> MtResult<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (the environment, a settings map).
    pub fn with_overrides<F>(mut self, lookup: F) -> MtResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kernel) = lookup(ENV_KERNEL) {
            self.kernel = KernelPreference::parse(&kernel)?;
        }
        if let Some(len) = lookup(ENV_BLOCK_LEN) {
            self.block_len = len
                .trim()
                .parse()
                .map_err(|_| MtError::InvalidConfig(format!("bad block length '{len}'")))?;
        }
        if let Some(volume) = lookup(ENV_MASTER_VOLUME) {
            self.master_volume = volume
                .trim()
                .parse()
                .map_err(|_| MtError::InvalidConfig(format!("bad master volume '{volume}'")))?;
        }
        self.validate()?;
        log::debug!("DSP config: {:?}", self);
        Ok(self)
    }

    pub fn validate(&self) -> MtResult<()> {
        if self.block_len == 0 || self.block_len > MAX_BLOCK_LEN {
            return Err(MtError::InvalidConfig(format!(
                "block_len must be in 1..={MAX_BLOCK_LEN}, got {}",
                self.block_len
            )));
        }
        Ok(())
    }
}
