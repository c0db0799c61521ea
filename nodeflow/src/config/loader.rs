//! Operation documents and manager settings.

use super::{BreakpointRequest, BreakpointTarget, ConfigOverrides};
use crate::errors::ConfigError;
use crate::pipeline::StageTable;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Timing knobs of a task manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSettings {
    /// Interval of the reaping watchdog.
    pub watchdog_interval_ms: u64,
    /// Time running tasks get to stop on their own during a kill.
    pub kill_grace_ms: u64,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            watchdog_interval_ms: 5000,
            kill_grace_ms: 500,
        }
    }
}

impl ManagerSettings {
    /// Returns the watchdog interval, never shorter than one millisecond.
    #[must_use]
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.max(1))
    }

    /// Returns the kill grace period.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// One operation as written in a configuration document.
///
/// ```json
/// {
///   "name": "deploy",
///   "stages": [{"name": "set_boot"}, [{"name": "tree"}, {"name": "chain"}]],
///   "overrides": {"stages": {"tree": {"retries": 2}}},
///   "breakpoint": "chain"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationConfig {
    /// Operation name, used as the pipeline name in logs.
    pub name: String,
    /// The stage table.
    pub stages: StageTable,
    /// Caller overrides.
    #[serde(default)]
    pub overrides: ConfigOverrides,
    /// Optional `stage[:substage]` breakpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoint: Option<String>,
    /// Manager timing.
    #[serde(default)]
    pub manager: ManagerSettings,
}

/// A validated operation, ready to build a task manager from.
#[derive(Debug, Clone)]
pub struct ResolvedOperation {
    /// Operation name.
    pub name: String,
    /// The validated stage table.
    pub stages: StageTable,
    /// Caller overrides with the breakpoint folded in.
    pub overrides: ConfigOverrides,
    /// The resolved breakpoint.
    pub breakpoint: Option<BreakpointTarget>,
    /// Manager timing.
    pub manager: ManagerSettings,
}

impl OperationConfig {
    /// Parses an operation document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` on malformed JSON.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Reads and parses an operation document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` when the file cannot be read and
    /// `ConfigError::Parse` on malformed JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Validates the document and resolves names to coordinates.
    ///
    /// # Errors
    ///
    /// Fails on an invalid table, an override naming an unknown stage, or a
    /// malformed or unresolvable breakpoint.
    pub fn resolve(self) -> Result<ResolvedOperation, ConfigError> {
        self.stages.validate()?;
        self.overrides.validate_against(&self.stages)?;

        let mut overrides = self.overrides;
        let breakpoint = match self.breakpoint.as_deref() {
            Some(raw) => {
                let target = raw.parse::<BreakpointRequest>()?.resolve(&self.stages)?;
                target.apply_to(&mut overrides);
                Some(target)
            }
            None => None,
        };

        Ok(ResolvedOperation {
            name: self.name,
            stages: self.stages,
            overrides,
            breakpoint,
            manager: self.manager,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DEPLOY: &str = r#"{
        "name": "deploy",
        "stages": [
            {"name": "set_boot", "defaults": {"timeout_secs": 60}},
            [{"name": "tree", "substages": [{"name": "format"}, {"name": "untar"}]},
             {"name": "chain"}],
            {"name": "reboot"}
        ],
        "overrides": {"stages": {"tree": {"retries": 2}}},
        "breakpoint": "tree:untar",
        "manager": {"watchdog_interval_ms": 250}
    }"#;

    #[test]
    fn test_parse_and_resolve() {
        let config = OperationConfig::from_json_str(DEPLOY).unwrap();
        assert_eq!(config.manager.watchdog_interval(), Duration::from_millis(250));
        assert_eq!(config.manager.kill_grace(), Duration::from_millis(500));

        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.name, "deploy");
        assert_eq!(resolved.stages.len(), 3);
        assert_eq!(resolved.overrides.stages["tree"].retries, Some(2));
        assert_eq!(
            resolved.overrides.for_nested("tree").stages["untar"].breakpoint,
            Some(true)
        );

        let target = resolved.breakpoint.unwrap();
        assert_eq!((target.position, target.sub_position), (1, 0));
    }

    #[test]
    fn test_unresolvable_breakpoint_fails_at_load() {
        let mut config = OperationConfig::from_json_str(DEPLOY).unwrap();
        config.breakpoint = Some("kexec".to_string());
        assert!(matches!(config.resolve(), Err(ConfigError::UnknownStage(_))));

        let mut config = OperationConfig::from_json_str(DEPLOY).unwrap();
        config.breakpoint = Some("tree::".to_string());
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::MalformedBreakpoint(_))
        ));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DEPLOY.as_bytes()).unwrap();

        let config = OperationConfig::from_path(file.path()).unwrap();
        assert_eq!(config.name, "deploy");

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            OperationConfig::from_path(missing),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_malformed_document() {
        let err = OperationConfig::from_json_str("{\"name\": 3}").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
