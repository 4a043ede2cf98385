//! Transfer-size policy.
//!
//! The policy is selected by name, either on the command line or through the
//! `PAGECAT_POLICY` environment variable:
//! - `bytewise`: one byte per read and write. Baseline only.
//! - `page`: one page per read, heap buffer without page alignment.
//! - `aligned-page`: one page per read into a page-aligned buffer.
//! - `block-lcm`: `lcm(page, fs_block)` per read, no multiplier.
//! - `tuned`: `lcm(page, fs_block) * 8`, or `page * 128` when `fstat` fails.
//! - `advised` (default): `tuned` sizing with the 64 KiB LCM guard, plus a
//!   sequential-access hint on the input.
//!
//! The constants behind each preset are heuristics, not measured optima.
//! Every knob can be overridden through [`TransferPolicyBuilder`].

use serde::Serialize;

use crate::error::PolicyError;
use crate::math::is_power_of_two;
use crate::size::{KIB, MIB};

/// Environment variable consulted by [`TransferPolicy::from_env`].
pub const POLICY_ENV: &str = "PAGECAT_POLICY";

/// Default multiplier applied to the aligned base size.
pub const DEFAULT_MULTIPLIER: usize = 8;
/// Default ceiling on the final transfer size.
pub const DEFAULT_MAX_SIZE: usize = MIB;
/// Largest LCM accepted before falling back to `max(page, fs_block)`.
pub const DEFAULT_LCM_CEILING: usize = 64 * KIB;
/// Smallest plausible filesystem block size.
pub const DEFAULT_MIN_FS_BLOCK: usize = 512;
/// Largest plausible filesystem block size.
pub const DEFAULT_MAX_FS_BLOCK: usize = MIB;

/// How the base transfer size is derived before the multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "bytes")]
pub enum Sizing {
    /// A fixed byte count; page and block sizes are ignored.
    Fixed(usize),
    /// The memory page size.
    Page,
    /// `lcm(page, fs_block)` after the block size passes the sanity filter.
    BlockLcm,
}

/// Named policy, one per historical variant of the copier.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    Bytewise,
    Page,
    AlignedPage,
    BlockLcm,
    Tuned,
    #[default]
    Advised,
}

impl Preset {
    pub const ALL: [Preset; 6] = [
        Preset::Bytewise,
        Preset::Page,
        Preset::AlignedPage,
        Preset::BlockLcm,
        Preset::Tuned,
        Preset::Advised,
    ];

    /// Parse from string (case-insensitive). Unknown names yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bytewise" | "byte" | "naive" | "1" => Some(Self::Bytewise),
            "page" | "2" => Some(Self::Page),
            "aligned-page" | "aligned_page" | "aligned" | "3" => Some(Self::AlignedPage),
            "block-lcm" | "block_lcm" | "lcm" | "block" | "4" => Some(Self::BlockLcm),
            "tuned" | "5" => Some(Self::Tuned),
            "advised" | "fadvise" | "default" | "6" => Some(Self::Advised),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bytewise => "bytewise",
            Self::Page => "page",
            Self::AlignedPage => "aligned-page",
            Self::BlockLcm => "block-lcm",
            Self::Tuned => "tuned",
            Self::Advised => "advised",
        }
    }
}

/// Every knob that shapes the transfer size and the copy setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransferPolicy {
    pub preset: Preset,
    pub sizing: Sizing,
    /// Multiplier applied to the base size.
    pub multiplier: usize,
    /// Multiplier applied to the page size when `fstat` itself fails.
    /// `None` keeps the regular path (block size treated as the page size).
    pub stat_failure_multiplier: Option<usize>,
    /// LCMs above this fall back to `max(page, fs_block)`. `None` disables the guard.
    pub lcm_ceiling: Option<usize>,
    pub min_fs_block: usize,
    pub max_fs_block: usize,
    /// Absolute ceiling on the transfer size.
    pub max_size: usize,
    /// Allocate the buffer on a page boundary.
    pub page_aligned: bool,
    /// Issue `POSIX_FADV_SEQUENTIAL` before the first read.
    pub sequential_hint: bool,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self::preset(Preset::default())
    }
}

impl TransferPolicy {
    /// The policy a preset stands for.
    #[must_use]
    pub const fn preset(preset: Preset) -> Self {
        let base = Self {
            preset,
            sizing: Sizing::BlockLcm,
            multiplier: DEFAULT_MULTIPLIER,
            stat_failure_multiplier: None,
            lcm_ceiling: Some(DEFAULT_LCM_CEILING),
            min_fs_block: DEFAULT_MIN_FS_BLOCK,
            max_fs_block: DEFAULT_MAX_FS_BLOCK,
            max_size: DEFAULT_MAX_SIZE,
            page_aligned: true,
            sequential_hint: false,
        };
        match preset {
            Preset::Bytewise => Self {
                sizing: Sizing::Fixed(1),
                multiplier: 1,
                page_aligned: false,
                ..base
            },
            Preset::Page => Self {
                sizing: Sizing::Page,
                multiplier: 1,
                page_aligned: false,
                ..base
            },
            Preset::AlignedPage => Self {
                sizing: Sizing::Page,
                multiplier: 1,
                ..base
            },
            Preset::BlockLcm => Self {
                multiplier: 1,
                ..base
            },
            Preset::Tuned => Self {
                stat_failure_multiplier: Some(128),
                lcm_ceiling: None,
                min_fs_block: 1,
                ..base
            },
            Preset::Advised => Self {
                sequential_hint: true,
                ..base
            },
        }
    }

    /// Parse a preset name; unknown names fall back to the default preset.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        Self::preset(Preset::parse(s).unwrap_or_default())
    }

    /// Policy named by `PAGECAT_POLICY`, or the default when unset.
    #[must_use]
    pub fn from_env() -> Self {
        policy_from_env_value(std::env::var(POLICY_ENV).ok().as_deref())
    }

    #[must_use]
    pub fn builder() -> TransferPolicyBuilder {
        TransferPolicyBuilder::new(Self::default())
    }

    /// Builder seeded with this policy's values.
    #[must_use]
    pub fn to_builder(self) -> TransferPolicyBuilder {
        TransferPolicyBuilder::new(self)
    }
}

fn policy_from_env_value(raw: Option<&str>) -> TransferPolicy {
    raw.map(TransferPolicy::from_str_loose).unwrap_or_default()
}

/// Overrides individual knobs of a base policy; [`build`](Self::build)
/// validates the result.
#[derive(Debug, Clone)]
#[must_use]
pub struct TransferPolicyBuilder {
    policy: TransferPolicy,
}

impl TransferPolicyBuilder {
    pub fn new(base: TransferPolicy) -> Self {
        Self { policy: base }
    }

    pub fn sizing(mut self, sizing: Sizing) -> Self {
        self.policy.sizing = sizing;
        self
    }

    pub fn multiplier(mut self, multiplier: usize) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    pub fn stat_failure_multiplier(mut self, multiplier: Option<usize>) -> Self {
        self.policy.stat_failure_multiplier = multiplier;
        self
    }

    pub fn lcm_ceiling(mut self, ceiling: Option<usize>) -> Self {
        self.policy.lcm_ceiling = ceiling;
        self
    }

    pub fn fs_block_bounds(mut self, min: usize, max: usize) -> Self {
        self.policy.min_fs_block = min;
        self.policy.max_fs_block = max;
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.policy.max_size = max_size;
        self
    }

    pub fn page_aligned(mut self, aligned: bool) -> Self {
        self.policy.page_aligned = aligned;
        self
    }

    pub fn sequential_hint(mut self, hint: bool) -> Self {
        self.policy.sequential_hint = hint;
        self
    }

    pub fn build(self) -> Result<TransferPolicy, PolicyError> {
        let p = self.policy;
        if p.multiplier == 0 || p.stat_failure_multiplier == Some(0) {
            return Err(PolicyError::ZeroMultiplier);
        }
        if p.max_size == 0 {
            return Err(PolicyError::ZeroMaxSize);
        }
        if p.sizing == Sizing::Fixed(0) {
            return Err(PolicyError::ZeroFixedSize);
        }
        for bound in [p.min_fs_block, p.max_fs_block] {
            if !is_power_of_two(bound) {
                return Err(PolicyError::BoundNotPowerOfTwo(bound));
            }
        }
        if p.min_fs_block > p.max_fs_block {
            return Err(PolicyError::InvertedBlockBounds {
                min: p.min_fs_block,
                max: p.max_fs_block,
            });
        }
        Ok(p)
    }
}
