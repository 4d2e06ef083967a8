//! pseudoFAT image manipulation: creation, FAT-consistency checking, and
//! concurrent defragmentation of a simplified FAT-style on-disk image.
//!
//! The binary (`src/main.rs`) is a thin CLI driver over this library; the
//! library itself never touches `std::env` or process exit codes.

use std::mem::size_of;

use static_assertions::const_assert;

pub mod cache;
pub mod checker;
pub mod codec;
pub mod config;
pub mod defrag;
pub mod dump;
pub mod error;
pub mod image;
pub mod inject;
mod ranges;
mod util;

pub use ranges::Ranges;

// Cluster indices are stored as `u32` but used to index `Vec`s via `as usize`;
// this assumption only holds on platforms where `usize` is at least as wide.
const_assert!(size_of::<usize>() >= size_of::<u32>());
