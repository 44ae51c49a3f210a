//! Ordered target list: primary first, fallbacks after it.

use crate::error::{HoldfastError, HoldfastResult};
use holdfast_provider::TargetId;
use std::collections::HashSet;

/// Non-empty, duplicate-free list of targets in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetList {
    targets: Vec<TargetId>,
}

impl TargetList {
    /// Trim entries, drop blanks and repeated ids, and refuse an empty result.
    pub fn new<I, T>(entries: I) -> HoldfastResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let targets: Vec<TargetId> = entries
            .into_iter()
            .map(|entry| entry.as_ref().trim().to_string())
            .filter(|entry| !entry.is_empty())
            .filter(|entry| seen.insert(entry.clone()))
            .map(TargetId::from)
            .collect();

        if targets.is_empty() {
            return Err(HoldfastError::ConfigInvalid(
                "target list must contain at least one target".to_string(),
            ));
        }

        Ok(Self { targets })
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetId> {
        self.targets.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.as_str().to_string()).collect()
    }
}

impl<'a> IntoIterator for &'a TargetList {
    type Item = &'a TargetId;
    type IntoIter = std::slice::Iter<'a, TargetId>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.iter()
    }
}
