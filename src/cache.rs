//! Precomputed bookkeeping that the defragmenter consumes: free-cluster
//! count, the work queue of occupied clusters, each file's chain, and the
//! aligned base offset each file will be moved to.

use crate::image::{ClusterIdx, Image, RootEntry, BAD, UNUSED};
use crate::ranges::Ranges;

/// Cached facts about an [`Image`] derived once before defragmentation
/// starts, mirroring the original tool's `cache_counts` pass but also
/// working out where each file belongs once clusters are packed.
#[derive(Debug, Clone)]
pub struct Cache {
    pub free_clusters_count: u32,
    pub occupied_work_queue: Vec<ClusterIdx>,
    pub chains: Vec<Vec<ClusterIdx>>,
    pub file_base_offset: Vec<ClusterIdx>,
    pub bad_ranges: Ranges,
}

impl Cache {
    /// Builds the cache from `image`'s current FAT and root directory. The
    /// image is assumed to have already passed [`crate::checker::check`].
    pub fn build(image: &Image) -> Self {
        let bad_ranges = image.bad_ranges();
        let primary = image.fat().primary();
        let real_cluster_count = image.real_cluster_count() as usize;

        let mut free_clusters_count = 0;
        let mut occupied_work_queue = Vec::new();
        for (idx, &entry) in primary.iter().enumerate().take(real_cluster_count) {
            let idx = idx as ClusterIdx;
            if entry == UNUSED {
                free_clusters_count += 1;
            } else if entry != BAD {
                occupied_work_queue.push(idx);
            }
        }

        let chains: Vec<Vec<ClusterIdx>> =
            (0..image.root().len()).map(|entry_idx| image.chain_for(entry_idx).unwrap_or_default()).collect();

        let file_base_offset = Self::compute_base_offsets(image.root(), image.cluster_size(), &bad_ranges);

        Self { free_clusters_count, occupied_work_queue, chains, file_base_offset, bad_ranges }
    }

    /// The offset each file should start at once every file is packed back
    /// to back in root-directory order, skipping over `BAD` clusters. File
    /// `i`'s base offset is the `n`-th non-`BAD` slot from 0, where `n` is
    /// the sum, over every file before it, of `(file_size / cluster_size) +
    /// 1` — the original's own accounting, which always reserves one spare
    /// cluster per file even when `file_size` divides `cluster_size`
    /// exactly. This is deliberately not the realized chain length: a file
    /// whose chain is shorter than its reserved allotment leaves a gap of
    /// that many spare clusters behind it after defragmentation.
    fn compute_base_offsets(root: &[RootEntry], cluster_size: u32, bad_ranges: &Ranges) -> Vec<ClusterIdx> {
        let mut offsets = Vec::with_capacity(root.len());
        let mut clusters_so_far: u32 = 0;

        for entry in root {
            let base = bad_ranges.nth_free_slot_from(0, clusters_so_far);
            offsets.push(base);
            clusters_so_far += entry.clusters_needed(cluster_size);
        }

        offsets
    }

    /// The aligned destination of the `offset_in_file`-th cluster (0-indexed)
    /// of file `entry_idx`: its base offset, advanced past any `BAD`
    /// clusters found along the way.
    pub fn aligned_position(&self, entry_idx: usize, offset_in_file: u32) -> ClusterIdx {
        let base = self.file_base_offset[entry_idx];
        self.bad_ranges.nth_free_slot_from(base, offset_in_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{BootRecord, FatTables, RootEntry, FILE_END};

    fn two_file_image() -> Image {
        // clusters: 0=BAD, 1..=3 file A's chain, 4..=5 file B's chain
        let boot = BootRecord::new("vol", 12, 1, 16, 6, 0, "OK");
        let mut fat = FatTables::new_unused(1, 6);
        fat.set(0, 0, BAD);
        fat.set(0, 1, 2);
        fat.set(0, 2, 3);
        fat.set(0, 3, FILE_END);
        fat.set(0, 4, 5);
        fat.set(0, 5, FILE_END);

        let mut image = Image::new(boot, fat, Vec::new(), vec![vec![0u8; 16]; 6]);
        image.push_entry(RootEntry::new("a", "rwxrwxrwx", 1, 48, 1));
        image.push_entry(RootEntry::new("b", "rwxrwxrwx", 1, 32, 4));
        image
    }

    #[test]
    fn counts_free_and_occupied_clusters() {
        let image = two_file_image();
        let cache = Cache::build(&image);
        assert_eq!(cache.free_clusters_count, 0);
        assert_eq!(cache.occupied_work_queue.len(), 5);
        assert!(!cache.occupied_work_queue.contains(&0));
    }

    #[test]
    fn builds_chains_per_root_entry() {
        let image = two_file_image();
        let cache = Cache::build(&image);
        assert_eq!(cache.chains[0], vec![1, 2, 3]);
        assert_eq!(cache.chains[1], vec![4, 5]);
    }

    #[test]
    fn base_offsets_pack_files_back_to_back_skipping_bad_clusters() {
        let image = two_file_image();
        let cache = Cache::build(&image);
        // file A (size 48, cluster size 16) reserves 48/16 + 1 = 4 clusters
        // even though its actual chain is only 3 long; it starts at the 0th
        // non-BAD slot, which is 1.
        assert_eq!(cache.file_base_offset[0], 1);
        // file B starts right after A's 4 reserved clusters: the 4th
        // non-BAD slot from 0.
        assert_eq!(cache.file_base_offset[1], 5);
    }

    #[test]
    fn aligned_position_advances_within_a_files_run() {
        let image = two_file_image();
        let cache = Cache::build(&image);
        assert_eq!(cache.aligned_position(0, 0), 1);
        assert_eq!(cache.aligned_position(0, 1), 2);
        assert_eq!(cache.aligned_position(0, 2), 3);
        assert_eq!(cache.aligned_position(1, 0), 5);
        assert_eq!(cache.aligned_position(1, 1), 6);
    }
}
