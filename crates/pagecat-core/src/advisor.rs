//! Transfer-size advisor.
//!
//! Derives one read size per invocation from two alignment domains: the
//! memory page size `P` and the filesystem's preferred block size `B`.
//!
//! ```text
//! B' = B            if B is a power of two in [min_fs_block, max_fs_block]
//!    = P            otherwise (including fstat failure and B == 0)
//! L  = lcm(P, B')
//! base = L          if L <= lcm_ceiling
//!      = max(P, B') otherwise
//! size = clamp(base * multiplier, 1, max_size)
//! ```
//!
//! [`recommend`] is the pure core; [`advise`] feeds it live system values.

use serde::Serialize;

use crate::config::{Sizing, TransferPolicy};
use crate::copy::InputSource;
use crate::math::{is_power_of_two, lcm};
use crate::sys::{self, DEFAULT_PAGE_SIZE};

/// Where the block size used for sizing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSource {
    /// The reported `st_blksize` passed the sanity filter.
    Reported,
    /// `fstat` failed; the page size stood in.
    StatFailed,
    /// The reported value was zero, not a power of two, or out of range.
    Rejected,
    /// The sizing mode does not look at the block size.
    Unused,
}

/// The advisor's decision, with the inputs that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferPlan {
    pub page_size: usize,
    /// Raw `st_blksize`, when `fstat` succeeded.
    pub reported_block_size: Option<u64>,
    /// Block size after filtering.
    pub block_size: usize,
    pub block_source: BlockSource,
    /// Size before the multiplier.
    pub base_size: usize,
    pub multiplier: usize,
    /// Final bytes per read. Always in `1..=max_size`.
    pub transfer_size: usize,
    /// True when `max_size` cut the result down.
    pub clamped: bool,
}

/// Compute the transfer size from explicit inputs.
///
/// `page_size == 0` is treated as "unavailable" and replaced with 4096.
/// `reported_block_size == None` means the block-size query failed.
#[must_use]
pub fn recommend(
    page_size: usize,
    reported_block_size: Option<u64>,
    policy: &TransferPolicy,
) -> TransferPlan {
    let page = if page_size == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size
    };
    let mut multiplier = policy.multiplier.max(1);

    let (block_size, block_source, base_size) = match policy.sizing {
        Sizing::Fixed(n) => (page, BlockSource::Unused, n.max(1)),
        Sizing::Page => (page, BlockSource::Unused, page),
        Sizing::BlockLcm => {
            let (block, source) = filter_block_size(page, reported_block_size, policy);
            if source == BlockSource::StatFailed {
                if let Some(m) = policy.stat_failure_multiplier {
                    multiplier = m.max(1);
                }
            }
            (block, source, aligned_base(page, block, policy.lcm_ceiling))
        }
    };

    let unclamped = base_size.saturating_mul(multiplier);
    let transfer_size = unclamped.min(policy.max_size).max(1);

    TransferPlan {
        page_size: page,
        reported_block_size,
        block_size,
        block_source,
        base_size,
        multiplier,
        transfer_size,
        clamped: transfer_size < unclamped,
    }
}

/// Query the page size and `source`'s block size, then [`recommend`].
///
/// Never fails: a failed block-size query degrades to the page size.
pub fn advise<S: InputSource + ?Sized>(source: &S, policy: &TransferPolicy) -> TransferPlan {
    let page = sys::page_size();
    let reported = match policy.sizing {
        Sizing::BlockLcm => source.preferred_block_size().ok(),
        Sizing::Fixed(_) | Sizing::Page => None,
    };
    recommend(page, reported, policy)
}

fn filter_block_size(
    page: usize,
    reported: Option<u64>,
    policy: &TransferPolicy,
) -> (usize, BlockSource) {
    let Some(raw) = reported else {
        return (page, BlockSource::StatFailed);
    };
    match usize::try_from(raw) {
        Ok(b)
            if is_power_of_two(b) && (policy.min_fs_block..=policy.max_fs_block).contains(&b) =>
        {
            (b, BlockSource::Reported)
        }
        _ => (page, BlockSource::Rejected),
    }
}

fn aligned_base(page: usize, block: usize, ceiling: Option<usize>) -> usize {
    match (lcm(page, block), ceiling) {
        (Some(l), Some(c)) if l <= c => l,
        (Some(l), None) => l,
        _ => page.max(block),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preset;
    use crate::size::{KIB, MIB};

    fn advised() -> TransferPolicy {
        TransferPolicy::preset(Preset::Advised)
    }

    #[test]
    fn common_case_page_and_block_equal() {
        let plan = recommend(4096, Some(4096), &advised());
        assert_eq!(plan.block_source, BlockSource::Reported);
        assert_eq!(plan.base_size, 4096);
        assert_eq!(plan.transfer_size, 32 * KIB);
        assert!(!plan.clamped);
    }

    #[test]
    fn larger_block_wins_lcm() {
        let plan = recommend(4096, Some(64 * KIB as u64), &advised());
        assert_eq!(plan.base_size, 64 * KIB);
        assert_eq!(plan.transfer_size, 512 * KIB);
    }

    #[test]
    fn small_block_rounds_up_to_page() {
        let plan = recommend(4096, Some(512), &advised());
        assert_eq!(plan.block_size, 512);
        assert_eq!(plan.base_size, 4096);
    }

    #[test]
    fn lcm_over_ceiling_falls_back_to_max() {
        // 256 KiB blocks: lcm == 256 KiB > 64 KiB ceiling, so max(P, B) is used.
        let plan = recommend(4096, Some(256 * KIB as u64), &advised());
        assert_eq!(plan.base_size, 256 * KIB);
        assert_eq!(plan.transfer_size, MIB);
        assert!(plan.clamped);
    }

    #[test]
    fn coprime_page_uses_max_not_lcm() {
        // A 6000-byte "page" against 4 KiB blocks: lcm is 1.5 MB, far past the ceiling.
        let plan = recommend(6000, Some(4096), &advised());
        assert_eq!(plan.base_size, 6000);
        assert_eq!(plan.transfer_size, 48_000);
    }

    #[test]
    fn rejected_block_sizes_fall_back_to_page() {
        for bad in [0u64, 1536, 6000, 256, 2 * MIB as u64, u64::MAX] {
            let plan = recommend(4096, Some(bad), &advised());
            assert_eq!(plan.block_source, BlockSource::Rejected, "{bad}");
            assert_eq!(plan.block_size, 4096, "{bad}");
            assert_eq!(plan.transfer_size, 32 * KIB, "{bad}");
        }
    }

    #[test]
    fn stat_failure_uses_page() {
        let plan = recommend(4096, None, &advised());
        assert_eq!(plan.block_source, BlockSource::StatFailed);
        assert_eq!(plan.transfer_size, 32 * KIB);
    }

    #[test]
    fn tuned_stat_failure_uses_128x_page() {
        let plan = recommend(4096, None, &TransferPolicy::preset(Preset::Tuned));
        assert_eq!(plan.multiplier, 128);
        assert_eq!(plan.transfer_size, 512 * KIB);
    }

    #[test]
    fn tuned_accepts_tiny_power_of_two_blocks() {
        let plan = recommend(4096, Some(256), &TransferPolicy::preset(Preset::Tuned));
        assert_eq!(plan.block_source, BlockSource::Reported);
        assert_eq!(plan.base_size, 4096);
    }

    #[test]
    fn missing_page_size_defaults_to_4096() {
        let plan = recommend(0, Some(4096), &advised());
        assert_eq!(plan.page_size, 4096);
        assert_eq!(plan.transfer_size, 32 * KIB);
    }

    #[test]
    fn block_lcm_preset_has_no_multiplier() {
        let policy = TransferPolicy::preset(Preset::BlockLcm);
        let plan = recommend(4096, Some(16 * KIB as u64), &policy);
        assert_eq!(plan.transfer_size, 16 * KIB);
    }

    #[test]
    fn page_and_fixed_sizing_ignore_block() {
        let page = recommend(16 * KIB, Some(4096), &TransferPolicy::preset(Preset::Page));
        assert_eq!(page.block_source, BlockSource::Unused);
        assert_eq!(page.transfer_size, 16 * KIB);

        let byte = recommend(4096, Some(4096), &TransferPolicy::preset(Preset::Bytewise));
        assert_eq!(byte.transfer_size, 1);
    }

    #[test]
    fn clamp_to_max_size() {
        let policy = TransferPolicy::builder()
            .multiplier(1024)
            .max_size(256 * KIB)
            .build()
            .unwrap();
        let plan = recommend(4096, Some(4096), &policy);
        assert_eq!(plan.transfer_size, 256 * KIB);
        assert!(plan.clamped);
    }

    #[test]
    fn huge_multiplier_saturates_instead_of_overflowing() {
        let policy = TransferPolicy::builder()
            .multiplier(usize::MAX)
            .build()
            .unwrap();
        let plan = recommend(4096, Some(4096), &policy);
        assert_eq!(plan.transfer_size, MIB);
    }

    #[test]
    fn output_is_bounded_and_deterministic() {
        let pages = [0usize, 512, 4096, 6000, 16 * KIB, 64 * KIB];
        let blocks = [
            None,
            Some(0u64),
            Some(1),
            Some(512),
            Some(1536),
            Some(4096),
            Some(65536),
            Some(1 << 20),
            Some(1 << 21),
        ];
        for preset in Preset::ALL {
            let policy = TransferPolicy::preset(preset);
            for &p in &pages {
                for &b in &blocks {
                    let a = recommend(p, b, &policy);
                    assert!(a.transfer_size >= 1);
                    assert!(a.transfer_size <= policy.max_size);
                    assert_eq!(a, recommend(p, b, &policy));
                }
            }
        }
    }
}
