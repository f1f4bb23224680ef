//! Purpose: Typed schema for the `.thoth.yaml` configuration document.
//! Exports: `ThothConfig`, `RuntimeEnvironment`, `OperatingSystem`, `Hardware`,
//! `ManagerSpec`, `RecommendationType`, `RequirementsFormat`.
//! Role: Single deserialization target for the document; serializes back losslessly.
//! Invariants: List order of `runtime_environments` and `managers` is preserved.
//! Invariants: Unknown root keys are carried through untouched.
//! Invariants: Null and absent optional values are equivalent; both serialize as absent.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThothConfig {
    pub host: String,
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements_format: Option<RequirementsFormat>,
    /// Document-wide default, used when neither the caller nor the selected
    /// runtime environment names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation_type: Option<RecommendationType>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub runtime_environments: Vec<RuntimeEnvironment>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub managers: Vec<ManagerSpec>,
    #[serde(flatten)]
    pub extra: Mapping,
}

fn default_tls_verify() -> bool {
    true
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEnvironment {
    #[serde(default, deserialize_with = "scalar_string")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "OperatingSystem::is_empty"
    )]
    pub operating_system: OperatingSystem,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Hardware::is_empty"
    )]
    pub hardware: Hardware,
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub python_version: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub cuda_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation_type: Option<RecommendationType>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatingSystem {
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hardware {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_family: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_model: Option<u32>,
}

impl OperatingSystem {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.version.is_none()
    }
}

impl Hardware {
    pub fn is_empty(&self) -> bool {
        self.cpu_family.is_none() && self.cpu_model.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManagerSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Value>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementsFormat {
    #[default]
    Pipenv,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RecommendationType {
    Testing,
    #[default]
    Stable,
    Latest,
}

impl RecommendationType {
    pub const ALL: [RecommendationType; 3] = [
        RecommendationType::Testing,
        RecommendationType::Stable,
        RecommendationType::Latest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecommendationType::Testing => "testing",
            RecommendationType::Stable => "stable",
            RecommendationType::Latest => "latest",
        }
    }
}

impl fmt::Display for RecommendationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecommendationType {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "testing" => Ok(RecommendationType::Testing),
            "stable" => Ok(RecommendationType::Stable),
            "latest" => Ok(RecommendationType::Latest),
            _ => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid recommendation type {input:?}"))
                .with_hint("Use testing, stable, or latest.")),
        }
    }
}

impl TryFrom<String> for RecommendationType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse().map_err(|_| {
            format!("invalid recommendation type {value:?}, expected one of testing, stable, latest")
        })
    }
}

impl From<RecommendationType> for String {
    fn from(value: RecommendationType) -> Self {
        value.as_str().to_string()
    }
}

impl ThothConfig {
    /// A document naming only the service host; every other key takes its default.
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            tls_verify: default_tls_verify(),
            requirements_format: None,
            recommendation_type: None,
            runtime_environments: Vec::new(),
            managers: Vec::new(),
            extra: Mapping::new(),
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, Error> {
        let value: Value = serde_yaml::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Config)
                .with_message(format!("configuration is not valid YAML: {err}"))
                .with_source(err)
        })?;
        if !value.is_mapping() {
            return Err(Error::new(ErrorKind::Config)
                .with_message("configuration document must be a mapping")
                .with_hint("Start the file with top-level keys such as `host:`."));
        }
        serde_yaml::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Config)
                .with_message(format!("invalid configuration: {err}"))
                .with_source(err)
        })
    }

    pub fn to_yaml_string(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode configuration yaml")
                .with_source(err)
        })
    }

    /// Select a runtime environment by name, or the first one when `name` is `None`.
    pub fn runtime_environment(
        &self,
        name: Option<&str>,
    ) -> Result<Option<&RuntimeEnvironment>, Error> {
        let Some(name) = name else {
            return Ok(self.runtime_environments.first());
        };
        self.runtime_environments
            .iter()
            .find(|env| env.name.as_deref() == Some(name))
            .map(Some)
            .ok_or_else(|| {
                let available = self
                    .runtime_environments
                    .iter()
                    .filter_map(|env| env.name.as_deref())
                    .collect::<Vec<_>>();
                let hint = if available.is_empty() {
                    "The configuration defines no runtime environments.".to_string()
                } else {
                    format!("Available runtime environments: {}.", available.join(", "))
                };
                Error::new(ErrorKind::NotFound)
                    .with_message(format!("no runtime environment named {name:?}"))
                    .with_hint(hint)
            })
    }

    pub fn manager(&self, name: &str) -> Option<&ManagerSpec> {
        self.managers.iter().find(|manager| manager.name == name)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// YAML reads `python_version: 3.8` or `version: 39` as numbers; keep them as text.
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(Value::Bool(flag)) => Ok(Some(flag.to_string())),
        Some(_) => Err(serde::de::Error::custom("expected a scalar string value")),
    }
}
