//! Linear stage tables with bounded fallback chains.

use crate::config::StageConfigOverride;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// One stage implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// Symbolic name, unique within its table.
    pub name: String,
    /// Parameters handed to the task factory.
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    /// Configuration defaults for this stage.
    #[serde(default)]
    pub defaults: StageConfigOverride,
    /// Finer-grained stages run by a nested manager in this slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substages: Option<StageTable>,
}

impl StageDescriptor {
    /// Creates a descriptor with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: HashMap::new(),
            defaults: StageConfigOverride::default(),
            substages: None,
        }
    }

    /// Adds a factory parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Sets the configuration defaults.
    #[must_use]
    pub fn with_defaults(mut self, defaults: StageConfigOverride) -> Self {
        self.defaults = defaults;
        self
    }

    /// Sets the nested stage table.
    #[must_use]
    pub fn with_substages(mut self, substages: StageTable) -> Self {
        self.substages = Some(substages);
        self
    }
}

/// A table slot: one descriptor or an ordered fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageEntry {
    /// A single implementation.
    Single(StageDescriptor),
    /// Implementations tried in order when the previous one is exhausted.
    Fallback(Vec<StageDescriptor>),
}

impl StageEntry {
    /// Returns the implementations of this slot in fallback order.
    #[must_use]
    pub fn descriptors(&self) -> &[StageDescriptor] {
        match self {
            Self::Single(descriptor) => std::slice::from_ref(descriptor),
            Self::Fallback(chain) => chain,
        }
    }
}

/// Identity of one descriptor inside a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageRef {
    /// Descriptor name.
    pub name: String,
    /// Slot index.
    pub position: usize,
    /// Fallback index inside the slot.
    pub sub_position: usize,
}

impl fmt::Display for StageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}.{}]", self.name, self.position, self.sub_position)
    }
}

/// The ordered definition of one operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageTable {
    entries: Vec<StageEntry>,
}

impl StageTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a single-implementation stage.
    #[must_use]
    pub fn stage(mut self, descriptor: StageDescriptor) -> Self {
        self.entries.push(StageEntry::Single(descriptor));
        self
    }

    /// Appends a stage with a fallback chain.
    #[must_use]
    pub fn fallback(mut self, chain: Vec<StageDescriptor>) -> Self {
        self.entries.push(StageEntry::Fallback(chain));
        self
    }

    /// Returns the number of positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no positions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the slots in order.
    #[must_use]
    pub fn entries(&self) -> &[StageEntry] {
        &self.entries
    }

    /// Returns the descriptor at (position, sub-position).
    #[must_use]
    pub fn descriptor(&self, position: usize, sub_position: usize) -> Option<&StageDescriptor> {
        self.entries
            .get(position)
            .and_then(|entry| entry.descriptors().get(sub_position))
    }

    /// Returns the identity of the descriptor at (position, sub-position).
    #[must_use]
    pub fn stage_ref(&self, position: usize, sub_position: usize) -> Option<StageRef> {
        self.descriptor(position, sub_position).map(|d| StageRef {
            name: d.name.clone(),
            position,
            sub_position,
        })
    }

    /// Finds the (position, sub-position) of a descriptor by name.
    #[must_use]
    pub fn locate(&self, name: &str) -> Option<(usize, usize)> {
        self.entries.iter().enumerate().find_map(|(position, entry)| {
            entry
                .descriptors()
                .iter()
                .position(|d| d.name == name)
                .map(|sub_position| (position, sub_position))
        })
    }

    /// Iterates every descriptor with its coordinates.
    pub fn descriptors(&self) -> impl Iterator<Item = (usize, usize, &StageDescriptor)> {
        self.entries.iter().enumerate().flat_map(|(position, entry)| {
            entry
                .descriptors()
                .iter()
                .enumerate()
                .map(move |(sub_position, d)| (position, sub_position, d))
        })
    }

    /// Checks the table invariants, recursing into nested tables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidTable` for an empty fallback chain, an
    /// empty name or a name used twice in one table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (position, entry) in self.entries.iter().enumerate() {
            if entry.descriptors().is_empty() {
                return Err(ConfigError::InvalidTable(format!(
                    "empty fallback chain at position {position}"
                )));
            }
            for descriptor in entry.descriptors() {
                if descriptor.name.trim().is_empty() {
                    return Err(ConfigError::InvalidTable(format!(
                        "unnamed stage at position {position}"
                    )));
                }
                if !seen.insert(descriptor.name.as_str()) {
                    return Err(ConfigError::InvalidTable(format!(
                        "stage '{}' appears more than once",
                        descriptor.name
                    )));
                }
                if let Some(substages) = &descriptor.substages {
                    substages.validate().map_err(|e| {
                        ConfigError::InvalidTable(format!("in '{}': {e}", descriptor.name))
                    })?;
                }
            }
        }
        Ok(())
    }
}
