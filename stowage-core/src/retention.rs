//! Declarative per data-type retention rules.

use crate::DataType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Bounds on how old and how many records of one data type may be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionPolicy {
    /// Records strictly older than this are removed.
    pub max_age_ms: u64,
    /// When set, only the newest `max_count` records are kept.
    #[serde(default)]
    pub max_count: Option<usize>,
}

impl RetentionPolicy {
    pub fn new(max_age: Duration, max_count: Option<usize>) -> Self {
        Self {
            max_age_ms: max_age.as_millis() as u64,
            max_count,
        }
    }

    pub fn days(days: u64, max_count: Option<usize>) -> Self {
        Self {
            max_age_ms: days * DAY_MS,
            max_count,
        }
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

/// Retention policies keyed by data type. Types without an entry are never
/// cleaned up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetentionTable(BTreeMap<DataType, RetentionPolicy>);

impl Default for RetentionTable {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert(DataType::Conversation, RetentionPolicy::days(90, Some(1000)));
        table.insert(DataType::Background, RetentionPolicy::days(30, Some(50)));
        table.insert(DataType::Location, RetentionPolicy::days(180, Some(200)));
        table.insert(DataType::Weather, RetentionPolicy::days(1, None));
        table.insert(DataType::Event, RetentionPolicy::days(365, None));
        Self(table)
    }
}

impl RetentionTable {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, data_type: DataType) -> Option<&RetentionPolicy> {
        self.0.get(&data_type)
    }

    pub fn set(&mut self, data_type: DataType, policy: RetentionPolicy) {
        self.0.insert(data_type, policy);
    }

    pub fn remove(&mut self, data_type: DataType) -> Option<RetentionPolicy> {
        self.0.remove(&data_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DataType, &RetentionPolicy)> {
        self.0.iter().map(|(dt, p)| (*dt, p))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
