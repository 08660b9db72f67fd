//! Error types for registry operations

use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

/// Registry operation errors
///
/// Absent keys are not errors: lookups return `Option` and deletes return
/// `bool`. The variants here cover allocation failure, rejected duplicate
/// rules and calls made outside the `Active` lifecycle state.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to allocate {index} index: {source}")]
    Allocation {
        index: &'static str,
        #[source]
        source: TryReserveError,
    },

    #[error("Rule for binary already exists: {0}")]
    AlreadyExists(String),

    #[error("{0} index is not initialized")]
    NotInitialized(&'static str),

    #[error("Classification context has been torn down")]
    TornDown,

    #[error("Bucket count must be a non-zero power of two, got {0}")]
    InvalidBucketCount(usize),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    #[error("Process not found: {0}")]
    ProcessNotFound(u32),

    #[error("Invalid limit value: {0}")]
    InvalidLimit(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse configuration: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
