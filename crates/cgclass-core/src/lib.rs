//! cgclass Core Library
//!
//! In-memory registry behind a cgroup process classifier: rule, process,
//! group and partition indices owned by a single classification context.

pub mod config;
pub mod context;
pub mod error;
pub mod index;
pub mod types;

pub use config::{GroupConfig, PartitionConfig, RegistryConfig, RegistrySettings};
pub use context::{ClassificationContext, ContextState, ContextStats};
pub use error::{RegistryError, Result};
pub use index::{
    GroupIndex, PartitionIndex, ProcHandle, ProcessIndex, ProcessIndexStats, RuleIndex,
    DEFAULT_PROCESS_BUCKETS,
};
pub use types::{Group, Partition, ProcDef, Process, ResourceLimits};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
