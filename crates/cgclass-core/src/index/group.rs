//! Group index keyed by group name

use std::collections::HashMap;
use tracing::debug;

use super::reserve_map;
use crate::error::Result;
use crate::types::Group;

/// Group name -> group
///
/// Groups may be redefined by configuration: inserting under an existing
/// name replaces the stored group.
#[derive(Debug)]
pub struct GroupIndex {
    groups: HashMap<String, Group>,
}

impl GroupIndex {
    pub fn new() -> Result<Self> {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self {
            groups: reserve_map("group", capacity)?,
        })
    }

    /// Insert a group, returning the one it replaced
    pub fn insert(&mut self, group: Group) -> Option<Group> {
        let replaced = self.groups.insert(group.name.clone(), group);
        if let Some(old) = &replaced {
            debug!("Group {} redefined", old.name);
        }
        replaced
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.take(name).is_some()
    }

    /// Remove a group and hand it back
    pub fn take(&mut self, name: &str) -> Option<Group> {
        self.groups.remove(name)
    }

    pub fn lookup(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Group> {
        self.groups.values_mut()
    }
}
