use std::io;

use thiserror::Error;

use crate::image::ClusterIdx;

/// Everything that can go wrong while loading, checking, or defragmenting
/// a pseudoFAT image.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("malformed image: {0}")]
    MalformedImage(String),

    #[error("FAT copies disagree on a live chain at cluster {cluster} (file entry {entry})")]
    ChainInconsistent { entry: usize, cluster: ClusterIdx },

    #[error("cluster {cluster} is marked BAD in every FAT copy (file entry {entry})")]
    UnrecoverableBadBlock { entry: usize, cluster: ClusterIdx },

    #[error("chain walk for file entry {entry} exceeded {limit} hops, a cycle is present")]
    ChainCycle { entry: usize, limit: u32 },

    #[error("{count} FAT divergences found, exceeding the recoverable threshold of {threshold}")]
    TooManyDivergences { count: usize, threshold: usize },

    #[error("insufficient free space for defragmentation: {free} free of {required} required")]
    InsufficientFreeSpace { free: u32, required: u32 },

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

pub type Result<T> = std::result::Result<T, Error>;
