//! Human-readable ASCII map of cluster layout, for diagnosing layout before
//! and after defragmentation.

use std::fmt::Write as _;

use crate::image::{Image, BAD};

const COLUMNS: usize = 16;

/// Labels assigned to files in root-directory order, cycling back to `?`
/// once every letter/digit/symbol is exhausted. Mirrors the original
/// tool's 90-character alphabet.
const FILE_LETTERS: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789<>$!+-*/°~#&@{}[]|^()=_;:§'%";

/// Renders `image` as a grid of fixed-width cells, one per cluster, 16 per
/// row. A cluster belonging to a file is labelled with that file's letter
/// followed by its 0-based position in the file's chain; `BAD` clusters
/// render as `!`; unused clusters render as `_`.
pub fn dump(image: &Image) -> String {
    let labels = build_labels(image);
    let spacing = column_width(&labels);

    let mut out = String::new();
    let cluster_count = image.boot_record().cluster_count;

    for k in 0..cluster_count {
        let cell = match labels.get(&k) {
            Some(label) => label.clone(),
            None if image.fat().get(0, k) == BAD => "!".to_string(),
            None => "_".to_string(),
        };
        let _ = write!(out, "{:<width$}", cell, width = spacing);

        if k > 0 && (k + 1) % COLUMNS as u32 == 0 {
            out.push('\n');
        }
    }
    out.push('\n');
    out
}

fn build_labels(image: &Image) -> std::collections::HashMap<u32, String> {
    let letters: Vec<char> = FILE_LETTERS.chars().collect();
    let mut labels = std::collections::HashMap::new();

    for (entry_idx, entry) in image.root().iter().enumerate() {
        let letter = letters.get(entry_idx).copied().unwrap_or('?');
        if let Ok(chain) = image.chain_for(entry_idx) {
            for (offset, &cluster) in chain.iter().enumerate() {
                labels.insert(cluster, format!("{}{}", letter, offset));
            }
        } else {
            let _ = entry; // chain walk failed; leave cluster unlabeled rather than panic in a diagnostic tool
        }
    }

    labels
}

fn column_width(labels: &std::collections::HashMap<u32, String>) -> usize {
    let widest = labels.values().map(|label| label.len()).max().unwrap_or(1);
    widest + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{BootRecord, FatTables, RootEntry, FILE_END, UNUSED};

    fn small_image() -> Image {
        let boot = BootRecord::new("vol", 12, 1, 16, 4, 0, "OK");
        let mut fat = FatTables::new_unused(1, 4);
        fat.set(0, 0, 1);
        fat.set(0, 1, FILE_END);
        fat.set(0, 2, BAD);
        fat.set(0, 3, UNUSED);
        let mut image = Image::new(boot, fat, Vec::new(), vec![vec![0u8; 16]; 4]);
        image.push_entry(RootEntry::new("a", "rwxrwxrwx", 1, 16, 0));
        image
    }

    #[test]
    fn labels_file_clusters_with_letter_and_offset() {
        let image = small_image();
        let rendered = dump(&image);
        assert!(rendered.contains("A0"));
        assert!(rendered.contains("A1"));
    }

    #[test]
    fn marks_bad_and_unused_clusters() {
        let image = small_image();
        let rendered = dump(&image);
        assert!(rendered.contains('!'));
        assert!(rendered.contains('_'));
    }
}
