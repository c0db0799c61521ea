//! Per-stage configuration and its override cascade.

use crate::errors::ConfigError;
use crate::pipeline::StageTable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Resolved configuration of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Wall-clock limit per attempt in seconds. 0 means unbounded.
    pub timeout_secs: u64,
    /// Extra attempts of the same implementation before falling back.
    pub retries: u32,
    /// Whether terminal outcomes inside a nested pipeline are forwarded to
    /// the embedding pipeline as they happen.
    pub raisable: bool,
    /// Halt nodes here instead of running the stage.
    pub breakpoint: bool,
    /// Stage-specific settings the scheduler does not interpret.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 0,
            retries: 0,
            raisable: true,
            breakpoint: false,
            extra: HashMap::new(),
        }
    }
}

impl StageConfig {
    /// Returns the timeout, or `None` when unbounded.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Applies an override on top of this configuration.
    pub fn apply(&mut self, o: &StageConfigOverride) {
        if let Some(timeout_secs) = o.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
        if let Some(retries) = o.retries {
            self.retries = retries;
        }
        if let Some(raisable) = o.raisable {
            self.raisable = raisable;
        }
        if let Some(breakpoint) = o.breakpoint {
            self.breakpoint = breakpoint;
        }
        self.extra
            .extend(o.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// A partial stage configuration. Set fields win over what they cover.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfigOverride {
    /// Overrides `timeout_secs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Overrides `retries`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Overrides `raisable`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raisable: Option<bool>,
    /// Overrides `breakpoint`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakpoint: Option<bool>,
    /// Merged key by key into `extra`.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl StageConfigOverride {
    /// Creates an empty override.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout in seconds.
    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Sets the raisable flag.
    #[must_use]
    pub fn raisable(mut self, raisable: bool) -> Self {
        self.raisable = Some(raisable);
        self
    }

    /// Sets the breakpoint flag.
    #[must_use]
    pub fn breakpoint(mut self, breakpoint: bool) -> Self {
        self.breakpoint = Some(breakpoint);
        self
    }

    /// Adds an extra setting.
    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Folds `other` into `self`; fields set in `other` win.
    pub fn merge(&mut self, other: &Self) {
        if other.timeout_secs.is_some() {
            self.timeout_secs = other.timeout_secs;
        }
        if other.retries.is_some() {
            self.retries = other.retries;
        }
        if other.raisable.is_some() {
            self.raisable = other.raisable;
        }
        if other.breakpoint.is_some() {
            self.breakpoint = other.breakpoint;
        }
        self.extra
            .extend(other.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Caller overrides for a stage table and, recursively, its nested tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    /// Overrides keyed by stage name.
    pub stages: HashMap<String, StageConfigOverride>,
    /// Overrides for the nested table of a stage, keyed by that stage's name.
    pub nested: HashMap<String, ConfigOverrides>,
}

impl ConfigOverrides {
    /// Creates empty overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (merging) an override for a stage.
    #[must_use]
    pub fn stage(mut self, name: impl Into<String>, o: StageConfigOverride) -> Self {
        self.stages.entry(name.into()).or_default().merge(&o);
        self
    }

    /// Adds (merging) an override for a substage of a stage.
    #[must_use]
    pub fn substage(
        mut self,
        stage: impl Into<String>,
        substage: impl Into<String>,
        o: StageConfigOverride,
    ) -> Self {
        self.nested
            .entry(stage.into())
            .or_default()
            .stages
            .entry(substage.into())
            .or_default()
            .merge(&o);
        self
    }

    /// Returns the overrides that apply inside the nested table of `stage`.
    #[must_use]
    pub fn for_nested(&self, stage: &str) -> Self {
        self.nested.get(stage).cloned().unwrap_or_default()
    }

    /// Folds `other` into `self`; entries in `other` win.
    pub fn merge(&mut self, other: &Self) {
        for (name, o) in &other.stages {
            self.stages.entry(name.clone()).or_default().merge(o);
        }
        for (name, nested) in &other.nested {
            self.nested.entry(name.clone()).or_default().merge(nested);
        }
    }

    /// Checks that every key names a stage of `table`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStage` for an unknown stage key and `UnknownSubstage`
    /// for a nested key that does not resolve inside its stage.
    pub fn validate_against(&self, table: &StageTable) -> Result<(), ConfigError> {
        for name in self.stages.keys() {
            if table.locate(name).is_none() {
                return Err(ConfigError::UnknownStage(name.clone()));
            }
        }
        for (stage, nested) in &self.nested {
            let (position, sub_position) = table
                .locate(stage)
                .ok_or_else(|| ConfigError::UnknownStage(stage.clone()))?;
            let substages = table
                .descriptor(position, sub_position)
                .and_then(|d| d.substages.as_ref());
            match substages {
                Some(substages) => {
                    nested.validate_against(substages).map_err(|e| match e {
                        ConfigError::UnknownStage(substage) => ConfigError::UnknownSubstage {
                            stage: stage.clone(),
                            substage,
                        },
                        other => other,
                    })?;
                }
                None => {
                    if let Some(substage) = nested.stages.keys().next() {
                        return Err(ConfigError::UnknownSubstage {
                            stage: stage.clone(),
                            substage: substage.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Resolved configuration for every stage name of one table.
#[derive(Debug, Clone, Default)]
pub struct StageConfigMap {
    configs: HashMap<String, StageConfig>,
}

impl StageConfigMap {
    /// Resolves the configuration of every descriptor in `table`.
    ///
    /// Each name is resolved once: crate defaults, then the descriptor's own
    /// defaults, then `overrides`.
    ///
    /// # Errors
    ///
    /// Fails if an override names a stage missing from the table.
    pub fn resolve(table: &StageTable, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        overrides.validate_against(table)?;

        let mut configs = HashMap::new();
        for (_, _, descriptor) in table.descriptors() {
            configs.entry(descriptor.name.clone()).or_insert_with(|| {
                let mut config = StageConfig::default();
                config.apply(&descriptor.defaults);
                if let Some(o) = overrides.stages.get(&descriptor.name) {
                    config.apply(o);
                }
                config
            });
        }
        Ok(Self { configs })
    }

    /// Returns the configuration of a stage.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StageConfig> {
        self.configs.get(name)
    }

    /// Returns the number of resolved stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Returns true if no stage was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
