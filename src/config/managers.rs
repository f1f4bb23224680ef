//! Purpose: Typed views over manager-specific `configuration` mappings.
//! Exports: `VersionManagerConfig`, `ManagerSpec::configuration_as`.
//! Role: Lets callers decode the opaque per-manager mapping on demand.
//! Invariants: The stored mapping is never rewritten by decoding it.
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::schema::ManagerSpec;
use crate::core::error::{Error, ErrorKind};

pub const VERSION_MANAGER: &str = "version";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionManagerConfig {
    pub maintainers: Vec<String>,
    pub assignees: Vec<String>,
    pub labels: Vec<String>,
    pub changelog_file: bool,
}

impl ManagerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            configuration: None,
        }
    }

    /// Decode the configuration mapping; an absent mapping decodes as `T::default()`.
    pub fn configuration_as<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned + Default,
    {
        let Some(configuration) = &self.configuration else {
            return Ok(T::default());
        };
        serde_yaml::from_value(configuration.clone()).map_err(|err| {
            Error::new(ErrorKind::Config)
                .with_message(format!(
                    "invalid configuration for manager {:?}: {err}",
                    self.name
                ))
                .with_source(err)
        })
    }
}
