//! Create-mode parameters, optionally loaded from a TOML batch-creation
//! file and overridable by CLI flags. Field names mirror the CLI flag
//! names exactly so either source can populate a [`CreateConfig`].

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

fn default_cluster_size() -> u32 {
    512
}
fn default_fat_type() -> i32 {
    12
}
fn default_fat_copies() -> i32 {
    2
}
fn default_volume_descriptor() -> String {
    "NEW VOLUME".to_string()
}
fn default_signature() -> String {
    "OK".to_string()
}

/// Parameters for building a fresh image in `create` mode. Defaults match
/// the original tool's command-line defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateConfig {
    pub cluster_count: u32,
    #[serde(default = "default_cluster_size")]
    pub cluster_size: u32,
    #[serde(default = "default_fat_type")]
    pub fat_type: i32,
    #[serde(default = "default_fat_copies")]
    pub fat_copies: i32,
    #[serde(default = "default_volume_descriptor")]
    pub volume_descriptor: String,
    #[serde(default)]
    pub reserved_cluster_count: u32,
    #[serde(default = "default_signature")]
    pub signature: String,
}

impl Default for CreateConfig {
    fn default() -> Self {
        Self {
            cluster_count: 0,
            cluster_size: default_cluster_size(),
            fat_type: default_fat_type(),
            fat_copies: default_fat_copies(),
            volume_descriptor: default_volume_descriptor(),
            reserved_cluster_count: 0,
            signature: default_signature(),
        }
    }
}

impl CreateConfig {
    /// Parses a batch-creation TOML file in the shape of this struct.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::MalformedImage(format!("invalid create-config TOML: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster_count == 0 {
            return Err(Error::MalformedImage("cluster_count must be greater than 0".to_string()));
        }
        if self.cluster_size == 0 {
            return Err(Error::MalformedImage("cluster_size must be greater than 0".to_string()));
        }
        if !matches!(self.fat_type, 12 | 16 | 32) {
            return Err(Error::MalformedImage("fat_type must be 12, 16, or 32".to_string()));
        }
        if self.fat_copies < 1 {
            return Err(Error::MalformedImage("fat_copies must be at least 1".to_string()));
        }
        if self.signature != "OK" && self.signature != "NOK" {
            return Err(Error::MalformedImage("signature must be \"OK\" or \"NOK\"".to_string()));
        }
        Ok(())
    }
}
