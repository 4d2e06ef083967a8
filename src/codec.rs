//! On-disk layout and (de)serialization of a pseudoFAT image: boot record,
//! `fat_copies` FAT tables, the root directory, then the cluster payload
//! array, back to back with no padding between sections.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use fs2::FileExt;

use crate::error::{Error, Result};
use crate::image::{BootRecord, FatTables, Image, RootEntry, FILE_MOD_LEN, FILE_NAME_LEN, SIGNATURE_LEN, VOLUME_DESC_LEN};
use crate::util::{u32_slice_as_bytes, ExactAlign};

/// Checks the boot record fields that the codec itself is responsible for
/// rejecting before any FAT/root/cluster data is read: an unrecognized
/// `fat_type` or a zero `cluster_size` both mean the stream is not a
/// pseudoFAT image worth parsing further.
fn validate_boot_record(boot_record: &BootRecord) -> Result<()> {
    if !boot_record.has_valid_fat_type() {
        return Err(Error::MalformedImage(format!("fat_type {} is not one of 12, 16, 32", boot_record.fat_type)));
    }
    if boot_record.cluster_size == 0 {
        return Err(Error::MalformedImage("cluster_size must be greater than 0".to_string()));
    }
    Ok(())
}

fn write_boot_record(w: &mut impl Write, boot_record: &BootRecord) -> std::io::Result<()> {
    w.write_all(&boot_record.volume_descriptor)?;
    w.write_all(&boot_record.fat_type.to_ne_bytes())?;
    w.write_all(&boot_record.fat_copies.to_ne_bytes())?;
    w.write_all(&boot_record.cluster_size.to_ne_bytes())?;
    w.write_all(&boot_record.root_directory_max_entries_count.to_ne_bytes())?;
    w.write_all(&boot_record.cluster_count.to_ne_bytes())?;
    w.write_all(&boot_record.reserved_cluster_count.to_ne_bytes())?;
    w.write_all(&boot_record.signature)
}

fn read_boot_record(r: &mut impl Read) -> std::io::Result<BootRecord> {
    let mut volume_descriptor = [0u8; VOLUME_DESC_LEN];
    r.read_exact(&mut volume_descriptor)?;

    let mut buf4 = [0u8; 4];
    r.read_exact(&mut buf4)?;
    let fat_type = i32::from_ne_bytes(buf4);
    r.read_exact(&mut buf4)?;
    let fat_copies = i32::from_ne_bytes(buf4);
    r.read_exact(&mut buf4)?;
    let cluster_size = u32::from_ne_bytes(buf4);

    let mut buf8 = [0u8; 8];
    r.read_exact(&mut buf8)?;
    let root_directory_max_entries_count = i64::from_ne_bytes(buf8);

    r.read_exact(&mut buf4)?;
    let cluster_count = u32::from_ne_bytes(buf4);
    r.read_exact(&mut buf4)?;
    let reserved_cluster_count = u32::from_ne_bytes(buf4);

    let mut signature = [0u8; SIGNATURE_LEN];
    r.read_exact(&mut signature)?;

    Ok(BootRecord {
        volume_descriptor,
        fat_type,
        fat_copies,
        cluster_size,
        root_directory_max_entries_count,
        cluster_count,
        reserved_cluster_count,
        signature,
    })
}

fn write_root_entry(w: &mut impl Write, entry: &RootEntry) -> std::io::Result<()> {
    w.write_all(&entry.file_name)?;
    w.write_all(&entry.file_mod)?;
    w.write_all(&entry.file_type.to_ne_bytes())?;
    w.write_all(&entry.file_size.to_ne_bytes())?;
    w.write_all(&entry.first_cluster.to_ne_bytes())
}

fn read_root_entry(r: &mut impl Read) -> std::io::Result<RootEntry> {
    let mut file_name = [0u8; FILE_NAME_LEN];
    r.read_exact(&mut file_name)?;
    let mut file_mod = [0u8; FILE_MOD_LEN];
    r.read_exact(&mut file_mod)?;

    let mut buf2 = [0u8; 2];
    r.read_exact(&mut buf2)?;
    let file_type = i16::from_ne_bytes(buf2);

    let mut buf8 = [0u8; 8];
    r.read_exact(&mut buf8)?;
    let file_size = i64::from_ne_bytes(buf8);

    let mut buf4 = [0u8; 4];
    r.read_exact(&mut buf4)?;
    let first_cluster = u32::from_ne_bytes(buf4);

    Ok(RootEntry { file_name, file_mod, file_type, file_size, first_cluster })
}

fn read_u32_array(r: &mut impl Read, count: usize) -> std::io::Result<Vec<u32>> {
    let mut bytes = vec![0u8; count * 4];
    r.read_exact(&mut bytes)?;
    // SAFETY: `bytes` is a plain heap buffer of the right length; casting it
    // to u32 only needs 4-byte alignment, which a byte vec never guarantees,
    // so align_to may trim leading/trailing bytes on an unlucky allocation.
    // In practice the global allocator returns word-aligned buffers, and
    // `exact_align_to` panics loudly rather than silently truncating if it
    // ever doesn't.
    let cells: &[u32] = unsafe { bytes.exact_align_to::<u32>() };
    Ok(cells.to_vec())
}

/// Opens `path`, takes an advisory exclusive lock on the file for the
/// lifetime of the returned handle, and parses the whole image into memory.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<(File, Image)> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    file.try_lock_exclusive()?;

    let boot_record = read_boot_record(&mut file)?;
    validate_boot_record(&boot_record)?;

    let fat_copies = boot_record.fat_copies as usize;
    let cluster_count = boot_record.cluster_count as usize;
    let mut copies = Vec::with_capacity(fat_copies);
    for _ in 0..fat_copies {
        copies.push(read_u32_array(&mut file, cluster_count)?);
    }
    let fat = FatTables::from_copies(copies);

    let entry_count = boot_record.root_directory_max_entries_count as usize;
    let mut root = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        root.push(read_root_entry(&mut file)?);
    }

    let cluster_size = boot_record.cluster_size as usize;
    let real_cluster_count = boot_record.real_cluster_count() as usize;
    let mut clusters = Vec::with_capacity(real_cluster_count);
    for _ in 0..real_cluster_count {
        let mut cluster = vec![0u8; cluster_size];
        file.read_exact(&mut cluster)?;
        clusters.push(cluster);
    }

    Ok((file, Image::new(boot_record, fat, root, clusters)))
}

/// Rewrites `path` from scratch with `image`'s current in-memory contents.
/// The caller is expected to already hold the lock returned by
/// [`load_image`] (or to be writing a brand new file under `create`).
pub fn save_image<P: AsRef<Path>>(path: P, image: &Image) -> Result<()> {
    let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
    file.try_lock_exclusive()?;

    write_boot_record(&mut file, image.boot_record())?;

    for copy in image.fat().copies() {
        file.write_all(u32_slice_as_bytes(copy))?;
    }

    for entry in image.root() {
        write_root_entry(&mut file, entry)?;
    }

    for cluster in 0..image.real_cluster_count() {
        file.write_all(image.cluster(cluster))?;
    }

    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::NamedTempFile;

    use super::*;
    use crate::image::{ClusterIdx, FILE_END, UNUSED};

    fn sample_image() -> Image {
        let boot = BootRecord::new("test volume", 12, 2, 8, 4, 0, "OK");
        let mut fat = FatTables::new_unused(2, 4);
        fat.set_all_copies(0, 1);
        fat.set_all_copies(1, FILE_END);
        fat.set_all_copies(2, UNUSED);
        fat.set_all_copies(3, UNUSED);

        let mut clusters = vec![vec![0u8; 8]; 4];
        clusters[0] = b"hello!!!".to_vec();
        clusters[1] = b"world!!!".to_vec();

        let mut image = Image::new(boot, fat, Vec::new(), clusters);
        image.push_entry(RootEntry::new("greeting.txt", "rwxrwxrwx", 1, 16, 0));
        image
    }

    #[test]
    fn round_trips_an_image_through_disk() {
        let tmp = NamedTempFile::new().unwrap();
        let original = sample_image();

        save_image(tmp.path(), &original).unwrap();
        let (_file, loaded) = load_image(tmp.path()).unwrap();

        assert_eq!(loaded.boot_record().cluster_count, original.boot_record().cluster_count);
        assert_eq!(loaded.boot_record().volume_descriptor(), "test volume");
        assert_eq!(loaded.fat().copy_count(), 2);
        assert_eq!(loaded.fat().get(0, 0), 1);
        assert_eq!(loaded.fat().get(0, 1), FILE_END);
        assert_eq!(loaded.root().len(), 1);
        assert_eq!(loaded.root()[0].file_name(), "greeting.txt");
        assert_eq!(loaded.cluster(0 as ClusterIdx), b"hello!!!");
        assert_eq!(loaded.cluster(1 as ClusterIdx), b"world!!!");
    }

    #[test]
    fn fails_on_a_truncated_file() {
        let tmp = NamedTempFile::new().unwrap();
        save_image(tmp.path(), &sample_image()).unwrap();

        let bytes = std::fs::read(tmp.path()).unwrap();
        std::fs::write(tmp.path(), &bytes[..bytes.len() - 4]).unwrap();

        assert!(load_image(tmp.path()).is_err());
    }

    #[test]
    fn rejects_an_unrecognized_fat_type() {
        let tmp = NamedTempFile::new().unwrap();
        let mut image = sample_image();
        image.boot_record_mut().fat_type = 64;
        save_image(tmp.path(), &image).unwrap();

        let result = load_image(tmp.path());
        assert!(matches!(result, Err(crate::error::Error::MalformedImage(_))));
    }

    #[test]
    fn rejects_a_zero_cluster_size() {
        let tmp = NamedTempFile::new().unwrap();
        let mut image = sample_image();
        image.boot_record_mut().cluster_size = 0;
        save_image(tmp.path(), &image).unwrap();

        let result = load_image(tmp.path());
        assert!(matches!(result, Err(crate::error::Error::MalformedImage(_))));
    }
}
