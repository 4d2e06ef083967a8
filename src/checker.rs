//! Two-pass FAT consistency check: per-file chain cross-checking with
//! badblock-aware recovery, then a global divergence count against a
//! recoverable-error budget.

use log::{info, warn};

use crate::error::{Error, Result};
use crate::image::{ClusterIdx, Image, BAD, FILE_END};

/// Above this many cross-copy divergences (outside of any live file chain)
/// the image is considered too damaged to trust.
pub const MAX_RECOVERABLE_ERRORS: usize = 20;

/// Whether a checker run should try to heal BAD-vs-live divergences inside
/// file chains (`-m` in the original tool) and whether it should proceed
/// anyway past the global divergence budget (`-f`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    pub match_badblocks: bool,
    pub force_not_consistent: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub repaired_cells: usize,
    pub recoverable_divergences: usize,
}

/// Runs both passes, repairing what `options` allows in place on `image`.
pub fn check(image: &mut Image, options: CheckOptions) -> Result<CheckReport> {
    info!("checking FAT tables consistency");
    let repaired_cells = check_file_chains(image, options)?;

    info!("checking FAT tables for recoverable errors");
    let recoverable_divergences = check_global_divergence(image, options)?;

    Ok(CheckReport { repaired_cells, recoverable_divergences })
}

/// Pass A: walks every root entry's chain along the primary FAT, comparing
/// every other copy against it cell by cell. A mismatch where neither side
/// is `BAD` is an unrecoverable inconsistency; a mismatch where one side is
/// `BAD` is healed in place when `options.match_badblocks` is set, copying
/// from whichever side is not `BAD` (preferring the primary copy as the
/// source of truth unless the primary itself is the `BAD` side).
fn check_file_chains(image: &mut Image, options: CheckOptions) -> Result<usize> {
    let mut repaired = 0;

    for entry_idx in 0..image.root().len() {
        let start_cluster = image.root()[entry_idx].first_cluster;
        repaired += check_one_chain(image, entry_idx, start_cluster, options)?;
    }

    Ok(repaired)
}

fn check_one_chain(image: &mut Image, entry_idx: usize, start_cluster: ClusterIdx, options: CheckOptions) -> Result<usize> {
    let limit = image.boot_record().cluster_count;
    let mut current = start_cluster;
    let mut hops: u32 = 0;
    let mut repaired = 0;

    loop {
        if hops > limit {
            return Err(Error::ChainCycle { entry: entry_idx, limit });
        }

        let copy_count = image.fat().copy_count();
        for copy in 1..copy_count {
            let primary_value = image.fat().get(0, current);
            let other_value = image.fat().get(copy, current);

            if primary_value != other_value {
                if primary_value != BAD && other_value != BAD {
                    return Err(Error::ChainInconsistent { entry: entry_idx, cluster: current });
                }

                if !options.match_badblocks {
                    return Err(Error::ChainInconsistent { entry: entry_idx, cluster: current });
                }

                warn!("cluster {} diverges between copy 0 and copy {}, attempting recovery", current, copy);
                if primary_value != BAD {
                    image.fat_mut().set(copy, current, primary_value);
                } else {
                    image.fat_mut().primary_mut()[current as usize] = other_value;
                }
                repaired += 1;
            }
        }

        if image.fat().get(0, current) == BAD {
            return Err(Error::UnrecoverableBadBlock { entry: entry_idx, cluster: current });
        }

        let next = image.fat().get(0, current);
        if next == FILE_END {
            break;
        }
        current = next;
        hops += 1;
    }

    Ok(repaired)
}

/// Pass B: compares every cluster's entry across all copies, independent of
/// whether it belongs to a live chain. Counts divergences and fails once
/// they exceed [`MAX_RECOVERABLE_ERRORS`], unless `options.force_not_consistent`
/// overrides that budget.
fn check_global_divergence(image: &Image, options: CheckOptions) -> Result<usize> {
    let mut divergences = 0;
    let cluster_count = image.boot_record().cluster_count;
    let copy_count = image.fat().copy_count();

    for cluster in 0..cluster_count {
        for copy in 1..copy_count {
            if image.fat().get(0, cluster) != image.fat().get(copy, cluster) {
                divergences += 1;
            }
        }
    }

    if divergences > MAX_RECOVERABLE_ERRORS && !options.force_not_consistent {
        return Err(Error::TooManyDivergences { count: divergences, threshold: MAX_RECOVERABLE_ERRORS });
    }

    Ok(divergences)
}
