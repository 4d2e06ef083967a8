//! Test-utility helpers for manufacturing images with known content:
//! appending a random junk file, or appending a file copied from a byte
//! slice (optionally scattering its clusters at random and fudging the
//! recorded size). Not part of the core read/check/defrag pipeline; used
//! by the interactive creation mode and by tests that need a populated
//! image without hand-building one cluster at a time.

use rand::Rng;

use crate::error::{Error, Result};
use crate::image::{ClusterIdx, Image, RootEntry, FILE_END, UNUSED};

/// Clusters held back from "pick a random free cluster" selections so a
/// handful always remain available for bookkeeping; mirrors the original
/// tool's `free_clusters_count - 5` headroom.
const RANDOM_PICK_HEADROOM: u32 = 5;

fn free_clusters_count(image: &Image) -> u32 {
    (0..image.real_cluster_count()).filter(|&idx| image.fat().get(0, idx) == UNUSED).count() as u32
}

fn find_nth_free_cluster(image: &Image, n: u32) -> Option<ClusterIdx> {
    let mut remaining = n;
    for idx in 0..image.real_cluster_count() {
        if image.fat().get(0, idx) == UNUSED {
            if remaining == 0 {
                return Some(idx);
            }
            remaining -= 1;
        }
    }
    None
}

/// Sets `index`'s entry to `value` in every FAT copy, except that copy 1
/// gets `UNUSED` instead whenever `value` is `FILE_END`. This reproduces a
/// quirk of the original randomized-file generator that deliberately seeds
/// a one-cell divergence between copy 0 and copy 1 at every chain's tail,
/// so generated images exercise the checker's recovery path.
fn set_fat_entry(image: &mut Image, index: ClusterIdx, value: u32) {
    for copy in 0..image.fat().copy_count() {
        let stored = if value == FILE_END && copy == 1 { UNUSED } else { value };
        image.fat_mut().set(copy, index, stored);
    }
}

fn set_cluster_content(image: &mut Image, index: ClusterIdx, content: &[u8]) {
    let cluster_size = image.cluster_size() as usize;
    let cluster = image.cluster_mut(index);
    for byte in cluster.iter_mut() {
        *byte = 0;
    }
    let n = content.len().min(cluster_size);
    cluster[..n].copy_from_slice(&content[..n]);
}

/// Appends a file of random name, size (0..2000 bytes), and scattered
/// cluster layout to `image`. `break_length_by` is added to the naive
/// cluster-count estimate, letting callers manufacture slightly-too-short
/// or slightly-too-long chains.
pub fn write_randomized_entry(image: &mut Image, break_length_by: i32, rng: &mut impl Rng) -> Result<()> {
    let free = free_clusters_count(image);
    if free <= RANDOM_PICK_HEADROOM {
        return Err(Error::InsufficientFreeSpace { free, required: RANDOM_PICK_HEADROOM + 1 });
    }

    let mut name = String::with_capacity(12);
    for _ in 0..8 {
        name.push((b'A' + rng.gen_range(0..27)) as char);
    }
    name.push_str(".txt");

    let file_size: i64 = rng.gen_range(0..2000);

    let first_pick = rng.gen_range(0..free - RANDOM_PICK_HEADROOM);
    let first_cluster =
        find_nth_free_cluster(image, first_pick).ok_or_else(|| Error::InternalInvariant("no free cluster for random entry".to_string()))?;
    set_fat_entry(image, first_cluster, FILE_END);
    set_cluster_content(image, first_cluster, b"obsah zacatku souboru");

    let cluster_size = image.cluster_size() as i64;
    let extra_clusters = (file_size / cluster_size) + break_length_by as i64;
    let mut prev = first_cluster;

    for i in 0..extra_clusters.max(0) {
        let free_now = free_clusters_count(image);
        if free_now == 0 {
            break;
        }
        let pick = rng.gen_range(0..free_now.max(1));
        let tmp = match find_nth_free_cluster(image, pick) {
            Some(idx) => idx,
            None => break,
        };

        set_fat_entry(image, prev, tmp);
        set_fat_entry(image, tmp, FILE_END);
        set_cluster_content(image, tmp, format!("nejaky obsah{}", i).as_bytes());
        prev = tmp;
    }

    image.push_entry(RootEntry::new(&name, "rwxrwxrwx", 1, file_size, first_cluster));
    Ok(())
}

/// Appends `data` as a file named `filename`. When `randomize` is false the
/// chain is laid out starting at `dest` and walking forward one cluster at
/// a time (skipping whatever is already occupied); when true, every
/// cluster in the chain is chosen at random among the free clusters.
/// `endfile_rec` lets callers seed a non-standard terminator for testing
/// the checker against a chain that never reaches `FILE_END`.
///
/// Per the original tool's own accounting, a zero-byte `data` still
/// consumes exactly one cluster and still produces a root entry (with
/// `file_size == 0`); callers should not assume an empty file is a no-op.
pub fn write_source_file(
    image: &mut Image,
    filename: &str,
    data: &[u8],
    dest: ClusterIdx,
    randomize: bool,
    break_length_by: i64,
    endfile_rec: u32,
    rng: &mut impl Rng,
) -> Result<()> {
    let free = free_clusters_count(image);
    if free == 0 {
        return Err(Error::InsufficientFreeSpace { free: 0, required: 1 });
    }

    let first_cluster = if randomize {
        let pick = rng.gen_range(0..free.saturating_sub(RANDOM_PICK_HEADROOM).max(1));
        find_nth_free_cluster(image, pick).ok_or_else(|| Error::InternalInvariant("no free cluster for source file".to_string()))?
    } else {
        dest
    };
    set_fat_entry(image, first_cluster, endfile_rec);

    let cluster_size = image.cluster_size() as usize;
    let mut chunks = data.chunks(cluster_size.max(1));
    let mut file_size: i64 = 0;

    let first_chunk = match chunks.next() {
        Some(chunk) => chunk,
        None => {
            image.push_entry(RootEntry::new(filename, "rwxrwxrwx", 1, 0, first_cluster));
            return Ok(());
        }
    };
    set_cluster_content(image, first_cluster, first_chunk);
    file_size += first_chunk.len() as i64;

    let mut prev = first_cluster;
    for chunk in chunks {
        if free_clusters_count(image) == 0 {
            return Err(Error::InsufficientFreeSpace { free: 0, required: 1 });
        }

        let tmp = if randomize {
            let free_now = free_clusters_count(image);
            let pick = rng.gen_range(0..free_now.max(1));
            find_nth_free_cluster(image, pick).ok_or_else(|| Error::InternalInvariant("no free cluster for source file".to_string()))?
        } else {
            let mut candidate = prev + 1;
            while candidate < image.real_cluster_count() && image.fat().get(0, candidate) != UNUSED {
                candidate += 1;
            }
            candidate
        };

        set_fat_entry(image, prev, tmp);
        set_fat_entry(image, tmp, endfile_rec);
        set_cluster_content(image, tmp, chunk);
        file_size += chunk.len() as i64;
        prev = tmp;
    }

    if break_length_by != 0 && (break_length_by > 0 || -break_length_by > file_size) {
        file_size += break_length_by;
    }

    image.push_entry(RootEntry::new(filename, "rwxrwxrwx", 1, file_size, first_cluster));
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::image::{BootRecord, FatTables};

    fn blank_image(cluster_count: u32, cluster_size: u32) -> Image {
        let boot = BootRecord::new("vol", 12, 2, cluster_size, cluster_count, 0, "OK");
        let fat = FatTables::new_unused(2, cluster_count as usize);
        Image::new(boot, fat, Vec::new(), vec![vec![0u8; cluster_size as usize]; cluster_count as usize])
    }

    #[test]
    fn write_source_file_lays_out_a_sequential_chain_when_not_randomized() {
        let mut image = blank_image(10, 4);
        let mut rng = StdRng::seed_from_u64(1);
        write_source_file(&mut image, "a.bin", b"0123456789ab", 0, false, 0, FILE_END, &mut rng).unwrap();

        assert_eq!(image.root().len(), 1);
        assert_eq!(image.root()[0].file_name(), "a.bin");
        assert_eq!(image.chain_for(0).unwrap(), vec![0, 1, 2]);
        assert_eq!(image.cluster(0), b"0123");
        assert_eq!(image.cluster(1), b"4567");
        assert_eq!(image.cluster(2), b"89ab");
    }

    #[test]
    fn write_source_file_of_empty_data_still_allocates_one_cluster() {
        let mut image = blank_image(4, 8);
        let mut rng = StdRng::seed_from_u64(2);
        write_source_file(&mut image, "empty.bin", b"", 0, false, 0, FILE_END, &mut rng).unwrap();

        assert_eq!(image.root()[0].file_size, 0);
        assert_eq!(image.fat().get(0, 0), FILE_END);
    }

    #[test]
    fn write_source_file_seeds_a_copy1_divergence_at_the_chain_tail() {
        let mut image = blank_image(4, 8);
        let mut rng = StdRng::seed_from_u64(3);
        write_source_file(&mut image, "a.bin", b"hello", 0, false, 0, FILE_END, &mut rng).unwrap();
        assert_eq!(image.fat().get(0, 0), FILE_END);
        assert_eq!(image.fat().get(1, 0), UNUSED);
    }

    #[test]
    fn write_randomized_entry_fails_without_enough_headroom() {
        let mut image = blank_image(3, 8);
        let mut rng = StdRng::seed_from_u64(4);
        let result = write_randomized_entry(&mut image, 0, &mut rng);
        assert!(matches!(result, Err(Error::InsufficientFreeSpace { .. })));
    }

    #[test]
    fn write_randomized_entry_appends_a_root_entry_with_headroom() {
        let mut image = blank_image(20, 16);
        let mut rng = StdRng::seed_from_u64(5);
        write_randomized_entry(&mut image, 0, &mut rng).unwrap();
        assert_eq!(image.root().len(), 1);
        assert!(image.root()[0].file_name().ends_with(".txt"));
    }
}
