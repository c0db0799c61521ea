//! External `stage[:substage]` breakpoint requests.

use super::{ConfigOverrides, StageConfigOverride};
use crate::errors::ConfigError;
use crate::pipeline::StageTable;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static BREAKPOINT_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*([^:\s]+)(?::([^:\s]+))?\s*$").ok());

/// A parsed but unresolved breakpoint request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointRequest {
    /// The outer stage name.
    pub stage: String,
    /// The substage inside the outer stage's nested table.
    pub substage: Option<String>,
}

impl BreakpointRequest {
    /// Resolves the request against a stage table.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStage` or `UnknownSubstage` when a name does not
    /// appear where the request says it should.
    pub fn resolve(&self, table: &StageTable) -> Result<BreakpointTarget, ConfigError> {
        let (position, sub_position) = table
            .locate(&self.stage)
            .ok_or_else(|| ConfigError::UnknownStage(self.stage.clone()))?;

        let substage = match &self.substage {
            None => None,
            Some(name) => {
                let unknown = || ConfigError::UnknownSubstage {
                    stage: self.stage.clone(),
                    substage: name.clone(),
                };
                let nested = table
                    .descriptor(position, sub_position)
                    .and_then(|d| d.substages.as_ref())
                    .ok_or_else(unknown)?;
                let (position, sub_position) = nested.locate(name).ok_or_else(unknown)?;
                Some(SubstageTarget {
                    name: name.clone(),
                    position,
                    sub_position,
                })
            }
        };

        Ok(BreakpointTarget {
            stage: self.stage.clone(),
            position,
            sub_position,
            substage,
        })
    }
}

impl FromStr for BreakpointRequest {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::MalformedBreakpoint(s.to_string());
        let captures = BREAKPOINT_PATTERN
            .as_ref()
            .and_then(|re| re.captures(s))
            .ok_or_else(malformed)?;
        let stage = captures.get(1).ok_or_else(malformed)?.as_str().to_string();
        let substage = captures.get(2).map(|m| m.as_str().to_string());
        Ok(Self { stage, substage })
    }
}

impl fmt::Display for BreakpointRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.substage {
            Some(substage) => write!(f, "{}:{substage}", self.stage),
            None => f.write_str(&self.stage),
        }
    }
}

/// Coordinates of a substage inside its stage's nested table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstageTarget {
    /// Substage name.
    pub name: String,
    /// Slot in the nested table.
    pub position: usize,
    /// Fallback index in that slot.
    pub sub_position: usize,
}

/// A breakpoint resolved to table coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointTarget {
    /// Outer stage name.
    pub stage: String,
    /// Outer slot.
    pub position: usize,
    /// Outer fallback index.
    pub sub_position: usize,
    /// Inner coordinates, for `stage:substage` requests.
    pub substage: Option<SubstageTarget>,
}

impl BreakpointTarget {
    /// Folds the breakpoint into a set of overrides.
    ///
    /// A plain stage request breaks at the stage itself. A substage request
    /// leaves the outer stage running and breaks inside its nested table.
    pub fn apply_to(&self, overrides: &mut ConfigOverrides) {
        let on = StageConfigOverride::new().breakpoint(true);
        match &self.substage {
            None => {
                overrides
                    .stages
                    .entry(self.stage.clone())
                    .or_default()
                    .merge(&on);
            }
            Some(substage) => {
                overrides
                    .nested
                    .entry(self.stage.clone())
                    .or_default()
                    .stages
                    .entry(substage.name.clone())
                    .or_default()
                    .merge(&on);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageDescriptor;

    fn table() -> StageTable {
        StageTable::new()
            .stage(StageDescriptor::new("set_boot"))
            .fallback(vec![
                StageDescriptor::new("deploy_tree").with_substages(
                    StageTable::new()
                        .stage(StageDescriptor::new("format"))
                        .stage(StageDescriptor::new("untar")),
                ),
                StageDescriptor::new("deploy_chain"),
            ])
    }

    #[test]
    fn test_parse_requests() {
        let request: BreakpointRequest = "deploy_tree".parse().unwrap();
        assert_eq!(request.stage, "deploy_tree");
        assert_eq!(request.substage, None);

        let request: BreakpointRequest = " deploy_tree:untar ".parse().unwrap();
        assert_eq!(request.substage.as_deref(), Some("untar"));
        assert_eq!(request.to_string(), "deploy_tree:untar");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", ":untar", "a:b:c", "deploy tree", "deploy:"] {
            let err = bad.parse::<BreakpointRequest>().unwrap_err();
            assert!(matches!(err, ConfigError::MalformedBreakpoint(_)), "{bad}");
        }
    }

    #[test]
    fn test_resolve_to_coordinates() {
        let target = "deploy_chain".parse::<BreakpointRequest>().unwrap().resolve(&table()).unwrap();
        assert_eq!((target.position, target.sub_position), (1, 1));
        assert!(target.substage.is_none());

        let target = "deploy_tree:untar"
            .parse::<BreakpointRequest>()
            .unwrap()
            .resolve(&table())
            .unwrap();
        assert_eq!((target.position, target.sub_position), (1, 0));
        let substage = target.substage.unwrap();
        assert_eq!((substage.position, substage.sub_position), (1, 0));
    }

    #[test]
    fn test_resolve_unknown_names() {
        let err = "kexec".parse::<BreakpointRequest>().unwrap().resolve(&table()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStage(_)));

        let err = "deploy_tree:mkfs"
            .parse::<BreakpointRequest>()
            .unwrap()
            .resolve(&table())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSubstage { .. }));

        let err = "set_boot:format"
            .parse::<BreakpointRequest>()
            .unwrap()
            .resolve(&table())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSubstage { .. }));
    }

    #[test]
    fn test_apply_to_overrides() {
        let mut overrides = ConfigOverrides::new();
        let target = "deploy_tree:format"
            .parse::<BreakpointRequest>()
            .unwrap()
            .resolve(&table())
            .unwrap();
        target.apply_to(&mut overrides);

        assert!(overrides.stages.get("deploy_tree").is_none());
        assert_eq!(
            overrides.for_nested("deploy_tree").stages["format"].breakpoint,
            Some(true)
        );

        let target = "set_boot".parse::<BreakpointRequest>().unwrap().resolve(&table()).unwrap();
        target.apply_to(&mut overrides);
        assert_eq!(overrides.stages["set_boot"].breakpoint, Some(true));
    }
}
