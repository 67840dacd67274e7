//! Topic/table association and the allow-list of dispatchable tables

use crate::{LullError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Immutable, one-topic-per-table association loaded at startup
#[derive(Debug, Clone, Default)]
pub struct TopicTableMapping {
    by_topic: HashMap<String, String>,
    by_table: HashMap<String, String>,
    /// Tables in configuration order
    order: Vec<String>,
}

impl TopicTableMapping {
    /// Build from `(table, topic)` pairs
    pub fn new<I, T, P>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (T, P)>,
        T: Into<String>,
        P: Into<String>,
    {
        let mut mapping = Self::default();

        for (table, topic) in pairs {
            let (table, topic) = (table.into(), topic.into());

            if table.trim().is_empty() || topic.trim().is_empty() {
                return Err(LullError::InvalidMapping(format!(
                    "empty table or topic in pair ({:?}, {:?})",
                    table, topic
                )));
            }
            if mapping.by_table.contains_key(&table) {
                return Err(LullError::InvalidMapping(format!(
                    "table '{}' is mapped more than once",
                    table
                )));
            }
            if let Some(owner) = mapping.by_topic.get(&topic) {
                return Err(LullError::InvalidMapping(format!(
                    "topic '{}' is already mapped to table '{}'",
                    topic, owner
                )));
            }

            mapping.by_topic.insert(topic.clone(), table.clone());
            mapping.by_table.insert(table.clone(), topic);
            mapping.order.push(table);
        }

        Ok(mapping)
    }

    pub fn table_for(&self, topic: &str) -> Option<&str> {
        self.by_topic.get(topic).map(String::as_str)
    }

    pub fn topic_for(&self, table: &str) -> Option<&str> {
        self.by_table.get(table).map(String::as_str)
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.by_table.contains_key(table)
    }

    /// Subscription list, in configuration order
    pub fn topics(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter_map(|table| self.topic_for(table))
            .collect()
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Reference to a downstream job definition, typically a SQL script path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobDescriptor(String);

impl JobDescriptor {
    pub fn new(script: impl Into<String>) -> Self {
        Self(script.into())
    }

    pub fn script(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tables allowed to dispatch, with their job descriptors.
///
/// Always a subset of the tracked tables of the mapping it was built against.
#[derive(Debug, Clone, Default)]
pub struct JobCatalog {
    jobs: HashMap<String, JobDescriptor>,
}

impl JobCatalog {
    pub fn new<I, T>(mapping: &TopicTableMapping, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (T, JobDescriptor)>,
        T: Into<String>,
    {
        let mut jobs = HashMap::new();

        for (table, descriptor) in entries {
            let table = table.into();
            if !mapping.contains_table(&table) {
                return Err(LullError::InvalidMapping(format!(
                    "job '{}' is configured for untracked table '{}'",
                    descriptor, table
                )));
            }
            if descriptor.script().trim().is_empty() {
                return Err(LullError::InvalidMapping(format!(
                    "empty job script for table '{}'",
                    table
                )));
            }
            jobs.insert(table, descriptor);
        }

        Ok(Self { jobs })
    }

    pub fn get(&self, table: &str) -> Option<&JobDescriptor> {
        self.jobs.get(table)
    }

    pub fn is_dispatchable(&self, table: &str) -> bool {
        self.jobs.contains_key(table)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
