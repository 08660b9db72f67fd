//! Rule index keyed by binary identifier

use std::collections::HashMap;
use tracing::{debug, warn};

use super::reserve_map;
use crate::error::{RegistryError, Result};
use crate::types::ProcDef;

/// Binary identifier -> classification rule
///
/// Rules are operator-authored, so a second rule for the same binary is
/// rejected and the stored one is left untouched.
#[derive(Debug)]
pub struct RuleIndex {
    rules: HashMap<String, ProcDef>,
}

impl RuleIndex {
    pub fn new() -> Result<Self> {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self {
            rules: reserve_map("rule", capacity)?,
        })
    }

    /// Insert a rule, failing with `AlreadyExists` on a duplicate binary
    pub fn insert(&mut self, rule: ProcDef) -> Result<()> {
        if self.rules.contains_key(&rule.binary) {
            warn!("procdef for '{}' already exists", rule.binary);
            return Err(RegistryError::AlreadyExists(rule.binary));
        }

        debug!("Inserted rule for {}", rule.binary);
        self.rules.insert(rule.binary.clone(), rule);
        Ok(())
    }

    pub fn lookup(&self, binary: &str) -> Option<&ProcDef> {
        self.rules.get(binary)
    }

    /// Remove the rule for `binary`, returning whether one was stored
    pub fn delete(&mut self, binary: &str) -> bool {
        self.rules.remove(binary).is_some()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterate over stored rules in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = &ProcDef> {
        self.rules.values()
    }
}
