//! Classification context owning the four indices
//!
//! The context is created at startup, initialised with [`init_all`], driven
//! from a single control loop through `&mut self`, and torn down at
//! shutdown. Records refer to each other by key only: a process names its
//! group, a group names its partition and lists its member pids.
//!
//! [`init_all`]: ClassificationContext::init_all

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RegistrySettings;
use crate::error::{RegistryError, Result};
use crate::index::{
    GroupIndex, PartitionIndex, ProcHandle, ProcessIndex, ProcessIndexStats, RuleIndex,
};
use crate::types::{Group, Partition, ProcDef, Process};

/// Lifecycle state of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Uninitialized,
    Active,
    TornDown,
}

/// Entry counts across all indices
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ContextStats {
    pub rules: usize,
    pub groups: usize,
    pub partitions: usize,
    pub processes: ProcessIndexStats,
}

/// Owner of the rule, process, group and partition indices
#[derive(Debug)]
pub struct ClassificationContext {
    settings: RegistrySettings,
    torn_down: bool,
    rules: Option<RuleIndex>,
    processes: Option<ProcessIndex>,
    groups: Option<GroupIndex>,
    partitions: Option<PartitionIndex>,
}

fn active<'a, T>(slot: &'a Option<T>, torn_down: bool, index: &'static str) -> Result<&'a T> {
    match slot {
        Some(table) => Ok(table),
        None if torn_down => Err(RegistryError::TornDown),
        None => Err(RegistryError::NotInitialized(index)),
    }
}

fn active_mut<'a, T>(
    slot: &'a mut Option<T>,
    torn_down: bool,
    index: &'static str,
) -> Result<&'a mut T> {
    match slot {
        Some(table) => Ok(table),
        None if torn_down => Err(RegistryError::TornDown),
        None => Err(RegistryError::NotInitialized(index)),
    }
}

impl ClassificationContext {
    /// Create an uninitialised context
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            settings,
            torn_down: false,
            rules: None,
            processes: None,
            groups: None,
            partitions: None,
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn state(&self) -> ContextState {
        if self.torn_down {
            ContextState::TornDown
        } else if self.rules.is_some()
            && self.processes.is_some()
            && self.groups.is_some()
            && self.partitions.is_some()
        {
            ContextState::Active
        } else {
            ContextState::Uninitialized
        }
    }

    /// Initialise all four indices
    ///
    /// On failure the indices created by this call are dropped again; indices
    /// that were already initialised keep their contents.
    pub fn init_all(&mut self) -> Result<()> {
        let fresh_rules = self.rules.is_none();
        let fresh_processes = self.processes.is_none();
        let fresh_groups = self.groups.is_none();
        let fresh_partitions = self.partitions.is_none();

        match self.init_each() {
            Ok(()) => {
                info!(
                    "Classification context initialized ({} process buckets)",
                    self.settings.process_buckets
                );
                Ok(())
            }
            Err(e) => {
                if fresh_rules {
                    self.rules = None;
                }
                if fresh_processes {
                    self.processes = None;
                }
                if fresh_groups {
                    self.groups = None;
                }
                if fresh_partitions {
                    self.partitions = None;
                }
                Err(e)
            }
        }
    }

    fn init_each(&mut self) -> Result<()> {
        self.init_rules()?;
        self.init_processes()?;
        self.init_groups()?;
        self.init_partitions()
    }

    /// Release all indices; calling it again is a no-op
    pub fn teardown_all(&mut self) {
        if self.torn_down {
            return;
        }

        self.teardown_rules();
        self.teardown_processes();
        self.teardown_groups();
        self.teardown_partitions();
        self.torn_down = true;

        info!("Classification context torn down");
    }

    fn ensure_not_torn_down(&self) -> Result<()> {
        if self.torn_down {
            Err(RegistryError::TornDown)
        } else {
            Ok(())
        }
    }

    pub fn init_rules(&mut self) -> Result<()> {
        self.ensure_not_torn_down()?;
        if self.rules.is_none() {
            self.rules = Some(RuleIndex::with_capacity(self.settings.initial_capacity)?);
        }
        Ok(())
    }

    pub fn init_processes(&mut self) -> Result<()> {
        self.ensure_not_torn_down()?;
        if self.processes.is_none() {
            self.processes = Some(ProcessIndex::with_buckets(self.settings.process_buckets)?);
        }
        Ok(())
    }

    pub fn init_groups(&mut self) -> Result<()> {
        self.ensure_not_torn_down()?;
        if self.groups.is_none() {
            self.groups = Some(GroupIndex::with_capacity(self.settings.initial_capacity)?);
        }
        Ok(())
    }

    pub fn init_partitions(&mut self) -> Result<()> {
        self.ensure_not_torn_down()?;
        if self.partitions.is_none() {
            self.partitions = Some(PartitionIndex::with_capacity(
                self.settings.initial_capacity,
            )?);
        }
        Ok(())
    }

    pub fn teardown_rules(&mut self) {
        self.rules = None;
    }

    pub fn teardown_processes(&mut self) {
        if let Some(processes) = self.processes.take() {
            if !processes.is_empty() {
                warn!(
                    "Dropping {} tracked processes with the process index",
                    processes.len()
                );
            }
        }
    }

    pub fn teardown_groups(&mut self) {
        self.groups = None;
    }

    pub fn teardown_partitions(&mut self) {
        self.partitions = None;
    }

    pub fn rule_index(&self) -> Result<&RuleIndex> {
        active(&self.rules, self.torn_down, "rule")
    }

    pub fn process_index(&self) -> Result<&ProcessIndex> {
        active(&self.processes, self.torn_down, "process")
    }

    pub fn group_index(&self) -> Result<&GroupIndex> {
        active(&self.groups, self.torn_down, "group")
    }

    pub fn partition_index(&self) -> Result<&PartitionIndex> {
        active(&self.partitions, self.torn_down, "partition")
    }

    fn rules_mut(&mut self) -> Result<&mut RuleIndex> {
        active_mut(&mut self.rules, self.torn_down, "rule")
    }

    fn processes_mut(&mut self) -> Result<&mut ProcessIndex> {
        active_mut(&mut self.processes, self.torn_down, "process")
    }

    fn groups_mut(&mut self) -> Result<&mut GroupIndex> {
        active_mut(&mut self.groups, self.torn_down, "group")
    }

    fn partitions_mut(&mut self) -> Result<&mut PartitionIndex> {
        active_mut(&mut self.partitions, self.torn_down, "partition")
    }

    // ===== Rules =====

    pub fn insert_rule(&mut self, rule: ProcDef) -> Result<()> {
        self.rules_mut()?.insert(rule)
    }

    pub fn delete_rule(&mut self, binary: &str) -> Result<bool> {
        Ok(self.rules_mut()?.delete(binary))
    }

    pub fn lookup_rule(&self, binary: &str) -> Result<Option<&ProcDef>> {
        Ok(self.rule_index()?.lookup(binary))
    }

    // ===== Processes =====

    /// Start tracking a process; the caller guarantees the pid is not
    /// already tracked
    pub fn insert_process(&mut self, process: Process) -> Result<ProcHandle> {
        Ok(self.processes_mut()?.insert(process))
    }

    /// Detach a process from the process index
    ///
    /// Group membership is left alone; use [`release_process`] when the
    /// process has exited.
    ///
    /// [`release_process`]: ClassificationContext::release_process
    pub fn remove_process(&mut self, pid: u32) -> Result<Option<Process>> {
        Ok(self.processes_mut()?.remove(pid))
    }

    pub fn unhash_process(&mut self, handle: ProcHandle) -> Result<Option<Process>> {
        Ok(self.processes_mut()?.unhash(handle))
    }

    pub fn lookup_process(&self, pid: u32) -> Result<Option<&Process>> {
        Ok(self.process_index()?.lookup(pid))
    }

    /// Classify a tracked process into `group`, leaving any previous group
    pub fn assign_process(&mut self, pid: u32, group: &str) -> Result<()> {
        if self.group_index()?.lookup(group).is_none() {
            return Err(RegistryError::GroupNotFound(group.to_string()));
        }

        let process = self
            .processes_mut()?
            .lookup_mut(pid)
            .ok_or(RegistryError::ProcessNotFound(pid))?;
        let previous = process.group.replace(group.to_string());

        let groups = self.groups_mut()?;
        if let Some(previous) = previous.filter(|p| p != group) {
            if let Some(old) = groups.lookup_mut(&previous) {
                old.members.remove(&pid);
            }
        }
        if let Some(new) = groups.lookup_mut(group) {
            new.members.insert(pid);
        }

        debug!("Assigned process {} to group {}", pid, group);
        Ok(())
    }

    /// Drop an exited process from the process index and from its group
    ///
    /// With duplicate pids in the index this releases the one inserted
    /// first; use [`release_handle`] to target a specific record.
    ///
    /// [`release_handle`]: ClassificationContext::release_handle
    pub fn release_process(&mut self, pid: u32) -> Result<Option<Process>> {
        let removed = self.processes_mut()?.remove(pid);
        self.drop_membership(removed)
    }

    /// Unhash an exited process by handle and drop it from its group
    pub fn release_handle(&mut self, handle: ProcHandle) -> Result<Option<Process>> {
        let removed = self.processes_mut()?.unhash(handle);
        self.drop_membership(removed)
    }

    fn drop_membership(&mut self, removed: Option<Process>) -> Result<Option<Process>> {
        let Some(process) = removed else {
            return Ok(None);
        };

        if let Some(name) = &process.group {
            if let Some(group) = self.groups_mut()?.lookup_mut(name) {
                group.members.remove(&process.pid);
            }
        }

        Ok(Some(process))
    }

    // ===== Groups =====

    /// Insert a group, replacing any group of the same name
    ///
    /// Members of the replaced group carry over into the new record, so
    /// processes classified into it stay reachable from the group.
    pub fn insert_group(&mut self, mut group: Group) -> Result<Option<Group>> {
        let groups = self.groups_mut()?;
        if let Some(existing) = groups.lookup(&group.name) {
            group.members.extend(existing.members.iter().copied());
        }
        Ok(groups.insert(group))
    }

    /// Delete a group; returns `false` if absent or the group index is not
    /// initialised. Member processes lose their group back-reference.
    pub fn delete_group(&mut self, name: &str) -> bool {
        let Some(group) = self.groups.as_mut().and_then(|g| g.take(name)) else {
            return false;
        };

        if let Some(processes) = self.processes.as_mut() {
            for pid in &group.members {
                if let Some(process) = processes.lookup_mut(*pid) {
                    if process.group.as_deref() == Some(name) {
                        process.group = None;
                    }
                }
            }
        }

        true
    }

    pub fn lookup_group(&self, name: &str) -> Result<Option<&Group>> {
        Ok(self.group_index()?.lookup(name))
    }

    /// Attach a group to a partition
    pub fn attach_group(&mut self, group: &str, partition: &str) -> Result<()> {
        if self.partition_index()?.lookup(partition).is_none() {
            return Err(RegistryError::PartitionNotFound(partition.to_string()));
        }

        let entry = self
            .groups_mut()?
            .lookup_mut(group)
            .ok_or_else(|| RegistryError::GroupNotFound(group.to_string()))?;
        entry.partition = Some(partition.to_string());

        debug!("Attached group {} to partition {}", group, partition);
        Ok(())
    }

    /// Detach a group from its partition, returning the partition name
    pub fn detach_group(&mut self, group: &str) -> Result<Option<String>> {
        let entry = self
            .groups_mut()?
            .lookup_mut(group)
            .ok_or_else(|| RegistryError::GroupNotFound(group.to_string()))?;
        Ok(entry.partition.take())
    }

    // ===== Partitions =====

    pub fn insert_partition(&mut self, partition: Partition) -> Result<Option<Partition>> {
        Ok(self.partitions_mut()?.insert(partition))
    }

    /// Delete a partition; returns `false` if absent or the partition index
    /// is not initialised. Groups attached to it are detached.
    pub fn delete_partition(&mut self, name: &str) -> bool {
        let removed = self
            .partitions
            .as_mut()
            .map(|p| p.delete(name))
            .unwrap_or(false);

        if removed {
            if let Some(groups) = self.groups.as_mut() {
                for group in groups.iter_mut() {
                    if group.partition.as_deref() == Some(name) {
                        group.partition = None;
                    }
                }
            }
        }

        removed
    }

    pub fn lookup_partition(&self, name: &str) -> Result<Option<&Partition>> {
        Ok(self.partition_index()?.lookup(name))
    }

    pub fn stats(&self) -> Result<ContextStats> {
        Ok(ContextStats {
            rules: self.rule_index()?.len(),
            groups: self.group_index()?.len(),
            partitions: self.partition_index()?.len(),
            processes: self.process_index()?.stats(),
        })
    }
}

impl Default for ClassificationContext {
    fn default() -> Self {
        Self::new(RegistrySettings::default())
    }
}
