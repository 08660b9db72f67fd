//! Registry configuration
//!
//! A TOML file describing index sizing plus the partitions, groups and
//! rules loaded into a fresh context:
//!
//! ```toml
//! [registry]
//! process_buckets = 1024
//!
//! [[partitions]]
//! name = "background"
//! path = "/sys/fs/cgroup/cpu/background"
//! cpu_shares = 128
//!
//! [[groups]]
//! name = "indexers"
//! partition = "background"
//!
//! [[rules]]
//! binary = "/usr/bin/tracker-miner-fs"
//! group = "indexers"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::context::ClassificationContext;
use crate::error::{RegistryError, Result};
use crate::index::DEFAULT_PROCESS_BUCKETS;
use crate::types::{Group, Partition, ProcDef, ResourceLimits};

/// Index sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Number of process index buckets (power of two, fixed for the
    /// lifetime of the context)
    #[serde(default = "default_process_buckets")]
    pub process_buckets: usize,

    /// Capacity reserved up front in the rule, group and partition indices
    #[serde(default)]
    pub initial_capacity: usize,
}

fn default_process_buckets() -> usize {
    DEFAULT_PROCESS_BUCKETS
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            process_buckets: default_process_buckets(),
            initial_capacity: 0,
        }
    }
}

/// Partition definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub name: String,

    /// Cgroup directory backing the partition
    pub path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<u64>,

    /// Memory max in MB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_max_mb: Option<u64>,

    /// Memory high in MB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_high_mb: Option<u64>,
}

fn mb_to_bytes(mb: Option<u64>, field: &str) -> Result<Option<u64>> {
    mb.map(|mb| {
        mb.checked_mul(1024 * 1024).ok_or_else(|| {
            RegistryError::InvalidLimit(format!("{} of {} MB overflows u64 bytes", field, mb))
        })
    })
    .transpose()
}

impl PartitionConfig {
    /// Limits in bytes; fails if a MB value does not fit in u64 bytes
    pub fn get_limits(&self) -> Result<ResourceLimits> {
        Ok(ResourceLimits {
            cpu_shares: self.cpu_shares,
            memory_max: mb_to_bytes(self.memory_max_mb, "memory_max_mb")?,
            memory_high: mb_to_bytes(self.memory_high_mb, "memory_high_mb")?,
        })
    }

    pub fn to_partition(&self) -> Result<Partition> {
        let limits = self.get_limits()?;
        Ok(Partition::new(self.name.clone(), self.path.clone()).with_limits(limits))
    }
}

/// Group definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Partition the group is attached to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
}

impl GroupConfig {
    pub fn to_group(&self) -> Group {
        Group {
            name: self.name.clone(),
            description: self.description.clone(),
            partition: self.partition.clone(),
            ..Group::default()
        }
    }
}

/// Complete registry configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub partitions: Vec<PartitionConfig>,

    #[serde(default)]
    pub groups: Vec<GroupConfig>,

    #[serde(default)]
    pub rules: Vec<ProcDef>,
}

impl RegistryConfig {
    /// Load configuration from TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RegistryConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Sample configuration written by `generate-config`
    pub fn example() -> Self {
        Self {
            registry: RegistrySettings::default(),
            partitions: vec![
                PartitionConfig {
                    name: "foreground".to_string(),
                    path: PathBuf::from("/sys/fs/cgroup/cpu/foreground"),
                    cpu_shares: Some(1024),
                    memory_max_mb: None,
                    memory_high_mb: None,
                },
                PartitionConfig {
                    name: "background".to_string(),
                    path: PathBuf::from("/sys/fs/cgroup/cpu/background"),
                    cpu_shares: Some(128),
                    memory_max_mb: Some(512),
                    memory_high_mb: Some(384),
                },
            ],
            groups: vec![
                GroupConfig {
                    name: "desktop".to_string(),
                    description: Some("Interactive applications".to_string()),
                    partition: Some("foreground".to_string()),
                },
                GroupConfig {
                    name: "indexers".to_string(),
                    description: Some("File indexing and thumbnailing".to_string()),
                    partition: Some("background".to_string()),
                },
            ],
            rules: vec![
                ProcDef::new("/usr/bin/firefox").with_group("desktop"),
                ProcDef::new("/usr/bin/tracker-miner-fs").with_group("indexers"),
            ],
        }
    }

    /// Validate configuration values
    ///
    /// Duplicate names are not rejected here: groups and partitions defined
    /// twice are overwritten on load, duplicate rules are skipped.
    pub fn validate(&self) -> Result<()> {
        let buckets = self.registry.process_buckets;
        if !buckets.is_power_of_two() {
            return Err(RegistryError::InvalidBucketCount(buckets));
        }

        let mut partitions = HashSet::new();
        for part in &self.partitions {
            if part.name.is_empty() {
                return Err(RegistryError::Config(
                    "Partition name must not be empty".to_string(),
                ));
            }
            part.get_limits()
                .and_then(|limits| limits.validate())
                .map_err(|e| RegistryError::Config(format!("Partition {}: {}", part.name, e)))?;
            partitions.insert(part.name.as_str());
        }

        let mut groups = HashSet::new();
        for group in &self.groups {
            if group.name.is_empty() {
                return Err(RegistryError::Config(
                    "Group name must not be empty".to_string(),
                ));
            }
            if let Some(part) = &group.partition {
                if !partitions.contains(part.as_str()) {
                    return Err(RegistryError::Config(format!(
                        "Group {} refers to unknown partition {}",
                        group.name, part
                    )));
                }
            }
            groups.insert(group.name.as_str());
        }

        for rule in &self.rules {
            if rule.binary.is_empty() {
                return Err(RegistryError::Config(
                    "Rule binary must not be empty".to_string(),
                ));
            }
            if let Some(group) = &rule.group {
                if !groups.contains(group.as_str()) {
                    return Err(RegistryError::Config(format!(
                        "Rule for {} refers to unknown group {}",
                        rule.binary, group
                    )));
                }
            }
        }

        Ok(())
    }

    /// Initialise a context and load partitions, groups and rules into it
    ///
    /// A rule whose binary is already present is logged and skipped.
    pub fn build_context(&self) -> Result<ClassificationContext> {
        let mut ctx = ClassificationContext::new(self.registry.clone());
        ctx.init_all()?;

        for part in &self.partitions {
            ctx.insert_partition(part.to_partition()?)?;
        }

        for group in &self.groups {
            ctx.insert_group(group.to_group())?;
        }

        let mut skipped = 0;
        for rule in &self.rules {
            match ctx.insert_rule(rule.clone()) {
                Ok(()) => {}
                Err(RegistryError::AlreadyExists(binary)) => {
                    warn!("Skipping duplicate rule for {}", binary);
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Loaded {} partitions, {} groups, {} rules ({} skipped)",
            self.partitions.len(),
            self.groups.len(),
            self.rules.len() - skipped,
            skipped
        );

        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextState;

    #[test]
    fn test_config_default() {
        let config = RegistryConfig::default();

        assert_eq!(config.registry.process_buckets, 1024);
        assert_eq!(config.registry.initial_capacity, 0);
        assert!(config.partitions.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_is_valid() {
        assert!(RegistryConfig::example().validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_buckets() {
        let mut config = RegistryConfig::default();
        config.registry.process_buckets = 1000;

        assert!(matches!(
            config.validate(),
            Err(RegistryError::InvalidBucketCount(1000))
        ));
    }

    #[test]
    fn test_validation_unknown_partition() {
        let mut config = RegistryConfig::example();
        config.groups[0].partition = Some("missing".to_string());

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown partition missing"));
    }

    #[test]
    fn test_validation_unknown_group() {
        let mut config = RegistryConfig::example();
        config.rules.push(ProcDef::new("/usr/bin/foo").with_group("missing"));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown group missing"));
    }

    #[test]
    fn test_validation_bad_limits() {
        let mut config = RegistryConfig::example();
        config.partitions[1].memory_high_mb = Some(1024);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Partition background"));
    }

    #[test]
    fn test_partition_limits_overflow() {
        let mut config = RegistryConfig::example();
        config.partitions[1].memory_max_mb = Some(i64::MAX as u64);

        assert!(matches!(
            config.partitions[1].get_limits(),
            Err(RegistryError::InvalidLimit(_))
        ));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Partition background"));
        assert!(err.to_string().contains("overflows"));
        assert!(config.build_context().is_err());
    }

    #[test]
    fn test_partition_limits_conversion() {
        let config = RegistryConfig::example();
        let limits = config.partitions[1].get_limits().unwrap();

        assert_eq!(limits.cpu_shares, Some(128));
        assert_eq!(limits.memory_max, Some(512 * 1024 * 1024));
        assert_eq!(limits.memory_high, Some(384 * 1024 * 1024));
    }

    #[test]
    fn test_config_serialization() {
        let config = RegistryConfig::example();
        let toml_str = toml::to_string(&config).unwrap();

        assert!(toml_str.contains("[registry]"));
        assert!(toml_str.contains("[[partitions]]"));
        assert!(toml_str.contains("[[rules]]"));

        let parsed: RegistryConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [registry]
            process_buckets = 256

            [[partitions]]
            name = "background"
            path = "/sys/fs/cgroup/cpu/background"
            cpu_shares = 64

            [[groups]]
            name = "indexers"
            partition = "background"

            [[rules]]
            binary = "/usr/bin/tracker-miner-fs"
            group = "indexers"
            criteria = ["uid >= 1000"]
        "#;

        let config: RegistryConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.registry.process_buckets, 256);
        assert_eq!(config.partitions[0].cpu_shares, Some(64));
        assert_eq!(config.groups[0].description, None);
        assert_eq!(config.rules[0].criteria, vec!["uid >= 1000".to_string()]);
    }

    #[test]
    fn test_load_and_save_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cgclass.toml");

        RegistryConfig::example().save_to_file(&path).unwrap();
        let loaded = RegistryConfig::load_from_file(&path).unwrap();

        assert_eq!(loaded, RegistryConfig::example());
    }

    #[test]
    fn test_load_missing_file() {
        let result = RegistryConfig::load_from_file("/nonexistent/cgclass.toml");
        assert!(matches!(result, Err(RegistryError::Io(_))));
    }

    #[test]
    fn test_build_context() {
        let ctx = RegistryConfig::example().build_context().unwrap();

        assert_eq!(ctx.state(), ContextState::Active);
        assert_eq!(
            ctx.lookup_group("indexers").unwrap().unwrap().partition.as_deref(),
            Some("background")
        );
        assert_eq!(
            ctx.lookup_rule("/usr/bin/firefox").unwrap().unwrap().group.as_deref(),
            Some("desktop")
        );
        assert_eq!(
            ctx.lookup_partition("background").unwrap().unwrap().limits.cpu_shares,
            Some(128)
        );
    }

    #[test]
    fn test_build_context_skips_duplicate_rules() {
        let mut config = RegistryConfig::example();
        config
            .rules
            .push(ProcDef::new("/usr/bin/firefox").with_group("indexers"));

        let ctx = config.build_context().unwrap();

        assert_eq!(ctx.stats().unwrap().rules, 2);
        assert_eq!(
            ctx.lookup_rule("/usr/bin/firefox").unwrap().unwrap().group.as_deref(),
            Some("desktop")
        );
    }

    #[test]
    fn test_build_context_invalid_buckets() {
        let mut config = RegistryConfig::default();
        config.registry.process_buckets = 3;

        assert!(matches!(
            config.build_context(),
            Err(RegistryError::InvalidBucketCount(3))
        ));
    }
}
