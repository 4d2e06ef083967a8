use crate::error::{Error, Result};
use crate::image::{BootRecord, ClusterIdx, FatTables, RootEntry, BAD, FILE_END, UNUSED};
use crate::ranges::Ranges;

/// The whole in-memory pseudoFAT image: boot record, redundant FAT copies,
/// flat root directory, and cluster payloads.
///
/// Owned exclusively by the top-level session; the checker borrows it for
/// reads (and brief in-place repairs), the defragmenter borrows it under the
/// concurrency model of a shared mutex.
#[derive(Debug, Clone)]
pub struct Image {
    boot_record: BootRecord,
    fat: FatTables,
    root: Vec<RootEntry>,
    clusters: Vec<Vec<u8>>,
}

impl Image {
    pub fn new(boot_record: BootRecord, fat: FatTables, root: Vec<RootEntry>, clusters: Vec<Vec<u8>>) -> Self {
        Self { boot_record, fat, root, clusters }
    }

    pub fn boot_record(&self) -> &BootRecord {
        &self.boot_record
    }

    pub fn boot_record_mut(&mut self) -> &mut BootRecord {
        &mut self.boot_record
    }

    pub fn fat(&self) -> &FatTables {
        &self.fat
    }

    pub fn fat_mut(&mut self) -> &mut FatTables {
        &mut self.fat
    }

    pub fn root(&self) -> &[RootEntry] {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut [RootEntry] {
        &mut self.root
    }

    pub fn real_cluster_count(&self) -> u32 {
        self.boot_record.real_cluster_count()
    }

    pub fn cluster_size(&self) -> u32 {
        self.boot_record.cluster_size
    }

    pub fn cluster(&self, idx: ClusterIdx) -> &[u8] {
        &self.clusters[idx as usize]
    }

    pub fn cluster_mut(&mut self, idx: ClusterIdx) -> &mut [u8] {
        &mut self.clusters[idx as usize]
    }

    /// Appends a new root entry, growing `root_directory_max_entries_count`.
    pub fn push_entry(&mut self, entry: RootEntry) -> usize {
        self.root.push(entry);
        self.boot_record.root_directory_max_entries_count = self.root.len() as i64;
        self.root.len() - 1
    }

    /// Set of cluster indices marked `BAD` in the primary FAT copy, as
    /// observed right now. Callers that need this repeatedly (the cache, the
    /// defragmenter) should compute it once and keep the result, since the
    /// set is stable once the checker has run.
    pub fn bad_ranges(&self) -> Ranges {
        let mut ranges = Ranges::new();
        let real_cluster_count = self.real_cluster_count() as usize;
        for (idx, &entry) in self.fat.primary().iter().enumerate().take(real_cluster_count) {
            if entry == BAD {
                ranges.insert_one(idx as ClusterIdx);
            }
        }
        ranges
    }

    /// Swaps the payload buffers at `a` and `b`. O(1): exchanges two `Vec`
    /// headers, no bytes are copied.
    pub fn swap_cluster_payloads(&mut self, a: ClusterIdx, b: ClusterIdx) {
        if a == b {
            return;
        }
        self.clusters.swap(a as usize, b as usize);
    }

    /// Finds the unique cluster index `p` whose primary FAT entry points at
    /// `source`, i.e. `source`'s predecessor in whatever chain it belongs to.
    /// Returns `None` if `source` is a chain head (no predecessor) or is
    /// itself unreferenced.
    pub fn predecessor_of(&self, source: ClusterIdx) -> Option<ClusterIdx> {
        self.fat.primary().iter().position(|&entry| entry == source).map(|idx| idx as ClusterIdx)
    }

    /// Implements the `move_cluster(source, dest)` contract of the
    /// defragmenter: redirects the predecessor's link, swaps the payload
    /// buffers, carries `source`'s outgoing FAT link over to `dest` in every
    /// copy, marks `source` `UNUSED` in every copy, and fixes up the root
    /// entry if `source` was a chain head. Must be called with the caller
    /// holding the global move lock; this method does not lock anything
    /// itself.
    pub fn move_cluster(&mut self, source: ClusterIdx, dest: ClusterIdx) -> Result<()> {
        if let Some(predecessor) = self.predecessor_of(source) {
            for copy in 0..self.fat.copy_count() {
                self.fat.set(copy, predecessor, dest);
            }
        }

        self.swap_cluster_payloads(source, dest);

        for copy in 0..self.fat.copy_count() {
            let carried = self.fat.get(copy, source);
            self.fat.set(copy, dest, carried);
            self.fat.set(copy, source, UNUSED);
        }

        for entry in self.root.iter_mut() {
            if entry.first_cluster == source {
                entry.first_cluster = dest;
            }
        }

        Ok(())
    }

    /// Walks `entry`'s chain in the primary FAT copy, failing if it exceeds
    /// `cluster_count` hops (a cycle).
    pub fn chain_for(&self, entry_idx: usize) -> Result<Vec<ClusterIdx>> {
        let entry = &self.root[entry_idx];
        let mut iter = self.fat.chain_iter(entry.first_cluster);
        let chain: Vec<ClusterIdx> = iter.by_ref().collect();

        if iter.truncated() {
            return Err(Error::ChainCycle { entry: entry_idx, limit: self.boot_record.cluster_count });
        }

        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::RootEntry;

    fn small_image() -> Image {
        let boot = BootRecord::new("vol", 12, 1, 16, 5, 0, "OK");
        let mut fat = FatTables::new_unused(1, 5);
        fat.set(0, 0, 1);
        fat.set(0, 1, FILE_END);
        let mut image = Image::new(boot, fat, Vec::new(), vec![vec![0u8; 16]; 5]);
        image.push_entry(RootEntry::new("a", "rwxrwxrwx", 1, 8, 0));
        image
    }

    #[test]
    fn chain_for_walks_primary_fat() {
        let image = small_image();
        assert_eq!(image.chain_for(0).unwrap(), vec![0, 1]);
    }

    #[test]
    fn move_cluster_redirects_predecessor_and_swaps_payload() {
        let mut image = small_image();
        image.cluster_mut(1).copy_from_slice(&[7u8; 16]);

        image.move_cluster(1, 3).unwrap();

        assert_eq!(image.fat().get(0, 0), 3);
        assert_eq!(image.fat().get(0, 3), FILE_END);
        assert_eq!(image.fat().get(0, 1), UNUSED);
        assert_eq!(image.cluster(3), &[7u8; 16]);
    }

    #[test]
    fn move_cluster_updates_root_entry_when_moving_the_head() {
        let mut image = small_image();
        image.move_cluster(0, 2).unwrap();
        assert_eq!(image.root()[0].first_cluster, 2);
        assert_eq!(image.fat().get(0, 2), 1);
        assert_eq!(image.fat().get(0, 0), UNUSED);
    }

    #[test]
    fn predecessor_of_head_is_none() {
        let image = small_image();
        assert_eq!(image.predecessor_of(0), None);
        assert_eq!(image.predecessor_of(1), Some(0));
    }
}
