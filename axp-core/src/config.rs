//! Emulator-core configuration: the "init function taking CPU count,
//! memory size, PAL image address, SRM image address, per-CPU options"
//! from spec.md §6, plus the Open-Question switches SPEC_FULL.md §5
//! resolves instead of leaving unguessed.

use thiserror::Error;

use axp_mmu::EvictionPolicy;

/// User/Kernel VA-range boundaries for [`crate::va::classify_address`]
/// (Open Question #1). Absent ⇒ `classify_address` always returns
/// `AddressClass::Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VaRanges {
    pub user_max: u64,
    pub kernel_min: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PerCpuConfig {
    pub tlb_eviction_policy: EvictionPolicyConfig,
    pub trace: bool,
}

impl Default for PerCpuConfig {
    fn default() -> Self {
        Self { tlb_eviction_policy: EvictionPolicyConfig::Srrip, trace: false }
    }
}

/// Serializable mirror of [`axp_mmu::EvictionPolicy`] (that enum's
/// `Random` variant carries a non-default seed, which a config file
/// shouldn't need to spell out every time). SRRIP is the default per
/// spec.md §4.4 step 5.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EvictionPolicyConfig {
    #[default]
    Srrip,
    Clock,
    Random,
}

impl EvictionPolicyConfig {
    pub fn resolve(self, seed: u64) -> EvictionPolicy {
        match self {
            EvictionPolicyConfig::Srrip => EvictionPolicy::Srrip,
            EvictionPolicyConfig::Clock => EvictionPolicy::Clock,
            EvictionPolicyConfig::Random => EvictionPolicy::Random { seed },
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub cpu_count: u32,
    pub memory_size: u64,
    pub pal_image_base: u64,
    pub srm_image_base: Option<u64>,
    pub per_cpu: Vec<PerCpuConfig>,
    pub va_ranges: Option<VaRanges>,
    pub sde0_enabled: bool,
    pub reservation_granule_bytes: u64,
    pub tlb_sets: usize,
    pub tlb_ways: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cpu_count must be at least 1")]
    ZeroCpus,
    #[error("pal_image_base {0:#x} is not 16KB-aligned")]
    PalBaseMisaligned(u64),
    #[error("memory_size {0:#x} is not a multiple of the page size")]
    MemorySizeMisaligned(u64),
    #[error("reservation_granule_bytes {0} must be a power of two >= 16")]
    InvalidGranule(u64),
    #[error("per_cpu has {have} entries but cpu_count is {want}")]
    PerCpuCountMismatch { have: usize, want: u32 },
}

/// 16KB alignment requirement on `PAL_BASE` (spec.md §4, §6).
const PAL_BASE_ALIGN: u64 = 0x4000;

pub struct ConfigBuilder {
    cpu_count: u32,
    memory_size: u64,
    pal_image_base: u64,
    srm_image_base: Option<u64>,
    per_cpu: Option<Vec<PerCpuConfig>>,
    va_ranges: Option<VaRanges>,
    sde0_enabled: bool,
    reservation_granule_bytes: u64,
    tlb_sets: usize,
    tlb_ways: usize,
}

impl Config {
    pub fn builder(cpu_count: u32, memory_size: u64, pal_image_base: u64) -> ConfigBuilder {
        ConfigBuilder {
            cpu_count,
            memory_size,
            pal_image_base,
            srm_image_base: None,
            per_cpu: None,
            va_ranges: None,
            sde0_enabled: true,
            reservation_granule_bytes: 64,
            tlb_sets: 64,
            tlb_ways: 4,
        }
    }
}

impl ConfigBuilder {
    pub fn srm_image_base(mut self, base: u64) -> Self {
        self.srm_image_base = Some(base);
        self
    }

    pub fn per_cpu(mut self, per_cpu: Vec<PerCpuConfig>) -> Self {
        self.per_cpu = Some(per_cpu);
        self
    }

    pub fn va_ranges(mut self, ranges: VaRanges) -> Self {
        self.va_ranges = Some(ranges);
        self
    }

    pub fn sde0_enabled(mut self, enabled: bool) -> Self {
        self.sde0_enabled = enabled;
        self
    }

    pub fn reservation_granule_bytes(mut self, bytes: u64) -> Self {
        self.reservation_granule_bytes = bytes;
        self
    }

    pub fn tlb_shape(mut self, sets: usize, ways: usize) -> Self {
        self.tlb_sets = sets;
        self.tlb_ways = ways;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        if self.cpu_count == 0 {
            return Err(ConfigError::ZeroCpus);
        }
        if self.pal_image_base % PAL_BASE_ALIGN != 0 {
            return Err(ConfigError::PalBaseMisaligned(self.pal_image_base));
        }
        if self.memory_size % axp_types::PAGE_SIZE != 0 {
            return Err(ConfigError::MemorySizeMisaligned(self.memory_size));
        }
        if !self.reservation_granule_bytes.is_power_of_two() || self.reservation_granule_bytes < 16
        {
            return Err(ConfigError::InvalidGranule(self.reservation_granule_bytes));
        }
        let per_cpu = match self.per_cpu {
            Some(v) => {
                if v.len() != self.cpu_count as usize {
                    return Err(ConfigError::PerCpuCountMismatch {
                        have: v.len(),
                        want: self.cpu_count,
                    });
                }
                v
            }
            None => vec![PerCpuConfig::default(); self.cpu_count as usize],
        };

        Ok(Config {
            cpu_count: self.cpu_count,
            memory_size: self.memory_size,
            pal_image_base: self.pal_image_base,
            srm_image_base: self.srm_image_base,
            per_cpu,
            va_ranges: self.va_ranges,
            sde0_enabled: self.sde0_enabled,
            reservation_granule_bytes: self.reservation_granule_bytes,
            tlb_sets: self.tlb_sets,
            tlb_ways: self.tlb_ways,
        })
    }
}
