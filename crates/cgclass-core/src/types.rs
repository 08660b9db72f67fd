//! Records stored in the classification indices

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::{RegistryError, Result};

/// Classification rule for a binary
///
/// The match criteria are opaque to the registry; they are carried for the
/// rule engine that consults the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcDef {
    /// Binary identifier (path or name), unique within the rule index
    pub binary: String,

    /// Group a process matching this rule is classified into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Match statements evaluated by the rule engine
    #[serde(default)]
    pub criteria: Vec<String>,
}

impl ProcDef {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            group: None,
            criteria: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_criterion(mut self, statement: impl Into<String>) -> Self {
        self.criteria.push(statement.into());
        self
    }
}

/// A live process tracked by the process index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub pid: u32,

    /// Executable the process was started from
    pub binary: String,

    /// First argument as seen at exec time
    pub argv0: Option<String>,

    /// Name of the group the process is classified into
    pub group: Option<String>,
}

impl Process {
    pub fn new(pid: u32, binary: impl Into<String>) -> Self {
        Self {
            pid,
            binary: binary.into(),
            argv0: None,
            group: None,
        }
    }

    pub fn with_argv0(mut self, argv0: impl Into<String>) -> Self {
        self.argv0 = Some(argv0.into());
        self
    }

    pub fn is_classified(&self) -> bool {
        self.group.is_some()
    }
}

/// Named aggregation of processes sharing a classification outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub description: Option<String>,

    /// Partition the group draws its resources from
    pub partition: Option<String>,

    /// Pids currently classified into this group
    pub members: BTreeSet<u32>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// Resource limits of a partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Relative CPU share (cgroup v1 `cpu.shares` range 2-262144)
    pub cpu_shares: Option<u64>,

    /// Hard memory limit (bytes)
    pub memory_max: Option<u64>,

    /// Soft memory limit (bytes)
    pub memory_high: Option<u64>,
}

impl ResourceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cpu_shares(mut self, shares: u64) -> Self {
        self.cpu_shares = Some(shares);
        self
    }

    pub fn with_memory_max(mut self, bytes: u64) -> Self {
        self.memory_max = Some(bytes);
        self
    }

    pub fn with_memory_high(mut self, bytes: u64) -> Self {
        self.memory_high = Some(bytes);
        self
    }

    /// Validate limits are reasonable
    pub fn validate(&self) -> Result<()> {
        if let Some(shares) = self.cpu_shares {
            if !(2..=262_144).contains(&shares) {
                return Err(RegistryError::InvalidLimit(format!(
                    "CPU shares must be between 2-262144, got {}",
                    shares
                )));
            }
        }

        if self.memory_max == Some(0) {
            return Err(RegistryError::InvalidLimit(
                "Memory max limit cannot be 0".to_string(),
            ));
        }

        if let (Some(high), Some(max)) = (self.memory_high, self.memory_max) {
            if high > max {
                return Err(RegistryError::InvalidLimit(
                    "Memory high limit cannot exceed max limit".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Named top-level resource budget that groups attach to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,

    /// Cgroup directory backing the partition
    pub path: PathBuf,

    pub limits: ResourceLimits,
}

impl Partition {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            limits: ResourceLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}
