//! Lookup tables owned by the classification context
//!
//! - `RuleIndex`: binary identifier -> `ProcDef`, rejects duplicates
//! - `ProcessIndex`: pid -> `Process`, fixed bucket count, no duplicate check
//! - `GroupIndex`: name -> `Group`, last insert wins
//! - `PartitionIndex`: name -> `Partition`, last insert wins

pub mod group;
pub mod partition;
pub mod process;
pub mod rule;

pub use group::GroupIndex;
pub use partition::PartitionIndex;
pub use process::{ProcHandle, ProcessIndex, ProcessIndexStats, DEFAULT_PROCESS_BUCKETS};
pub use rule::RuleIndex;

use std::collections::HashMap;

use crate::error::{RegistryError, Result};

/// Allocate a string-keyed map up front so allocation failure surfaces at init
pub(crate) fn reserve_map<T>(index: &'static str, capacity: usize) -> Result<HashMap<String, T>> {
    let mut map = HashMap::new();
    map.try_reserve(capacity)
        .map_err(|source| RegistryError::Allocation { index, source })?;
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_map() {
        let map: HashMap<String, u32> = reserve_map("rule", 64).unwrap();
        assert!(map.capacity() >= 64);
    }

    #[test]
    fn test_reserve_map_overflow() {
        let result: Result<HashMap<String, u32>> = reserve_map("group", usize::MAX);
        assert!(matches!(
            result,
            Err(RegistryError::Allocation { index: "group", .. })
        ));
    }
}
