/// Length in bytes of the volume descriptor text field.
pub const VOLUME_DESC_LEN: usize = 251;
/// Length in bytes of the signature text field.
pub const SIGNATURE_LEN: usize = 4;

/// Singleton metadata record describing the shape of a pseudoFAT image.
///
/// Created once alongside the image and never mutated afterwards except by
/// the codec round-trip (which reproduces it bit-for-bit).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootRecord {
    pub volume_descriptor: [u8; VOLUME_DESC_LEN],
    /// One of 12, 16, 32. Informational only: every FAT cell is a 32-bit
    /// unsigned integer regardless of this value.
    pub fat_type: i32,
    pub fat_copies: i32,
    pub cluster_size: u32,
    pub root_directory_max_entries_count: i64,
    pub cluster_count: u32,
    pub reserved_cluster_count: u32,
    pub signature: [u8; SIGNATURE_LEN],
}

impl BootRecord {
    pub fn new(
        volume_descriptor: &str,
        fat_type: i32,
        fat_copies: i32,
        cluster_size: u32,
        cluster_count: u32,
        reserved_cluster_count: u32,
        signature: &str,
    ) -> Self {
        let mut vd = [0u8; VOLUME_DESC_LEN];
        let n = volume_descriptor.len().min(VOLUME_DESC_LEN);
        vd[..n].copy_from_slice(&volume_descriptor.as_bytes()[..n]);

        let mut sig = [0u8; SIGNATURE_LEN];
        let n = signature.len().min(SIGNATURE_LEN);
        sig[..n].copy_from_slice(&signature.as_bytes()[..n]);

        Self {
            volume_descriptor: vd,
            fat_type,
            fat_copies,
            cluster_size,
            root_directory_max_entries_count: 0,
            cluster_count,
            reserved_cluster_count,
            signature: sig,
        }
    }

    /// True if `fat_type` is one of the values the format recognizes. The
    /// value is cosmetic metadata; the in-memory FAT cell width is always 32 bits.
    pub fn has_valid_fat_type(&self) -> bool {
        matches!(self.fat_type, 12 | 16 | 32)
    }

    pub fn volume_descriptor(&self) -> String {
        trimmed_nul_string(&self.volume_descriptor)
    }

    pub fn signature(&self) -> String {
        trimmed_nul_string(&self.signature)
    }

    /// Number of clusters available for allocation, i.e. not set aside by
    /// `reserved_cluster_count`.
    pub fn real_cluster_count(&self) -> u32 {
        self.cluster_count - self.reserved_cluster_count
    }
}

fn trimmed_nul_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_real_cluster_count() {
        let br = BootRecord::new("vol", 12, 2, 512, 100, 10, "OK");
        assert_eq!(br.real_cluster_count(), 90);
    }

    #[test]
    fn trims_nul_padded_text_fields() {
        let br = BootRecord::new("hello", 12, 2, 512, 100, 0, "OK");
        assert_eq!(br.volume_descriptor(), "hello");
        assert_eq!(br.signature(), "OK");
    }

    #[test]
    fn rejects_unknown_fat_type_as_invalid() {
        let mut br = BootRecord::new("vol", 12, 2, 512, 100, 0, "OK");
        assert!(br.has_valid_fat_type());
        br.fat_type = 64;
        assert!(!br.has_valid_fat_type());
    }
}
