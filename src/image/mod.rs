mod boot_record;
mod fat_table;
mod image;
mod root_entry;

pub use self::boot_record::*;
pub use self::fat_table::*;
pub use self::image::*;
pub use self::root_entry::*;

/// An index identifying a cluster in the image. A pseudoFAT image's cluster
/// count fits into a `u32`, so a valid index never overflows this type.
pub type ClusterIdx = u32;
