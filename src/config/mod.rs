//! Purpose: Locate, load, override, and bootstrap the `.thoth.yaml` document.
//! Exports: schema types, validation, manager views, `load`, `ConfigOverrides`,
//! `resolve_config_path`, `render_default`, `write_default`.
//! Role: The only path by which the CLI and client obtain configuration.
//! Invariants: The document is read once per process and never written back by loading.
//! Invariants: Overrides come from explicit flags first, then environment variables.
mod managers;
mod schema;
mod validate;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::error::{Error, ErrorKind, map_io_error_kind};
use crate::template::{self, TemplateContext};

pub use managers::{VERSION_MANAGER, VersionManagerConfig};
pub use schema::{
    Hardware, ManagerSpec, OperatingSystem, RecommendationType, RequirementsFormat,
    RuntimeEnvironment, ThothConfig,
};
pub use validate::{
    MISSING_RECOMMENDATION_TYPE, Severity, ValidationIssue, ValidationReport, ValidationStatus,
    validate,
};

pub const DEFAULT_CONFIG_FILE: &str = ".thoth.yaml";
pub const DEFAULT_HOST: &str = "khemenu.thoth-station.ninja";

pub const CONFIG_ENV: &str = "THAMOS_CONFIG";
pub const HOST_ENV: &str = "THAMOS_HOST";
pub const TLS_VERIFY_ENV: &str = "THAMOS_TLS_VERIFY";

const DEFAULT_TEMPLATE: &str = r#"host: {host}
tls_verify: {tls_verify}
requirements_format: {requirements_format}

runtime_environments:
  - name: {runtime_environment_name}
    operating_system:
      name: {os_name}
      version: {os_version}
    hardware:
      cpu_family: {cpu_family}
      cpu_model: {cpu_model}
    python_version: {python_version}
    cuda_version: {cuda_version}
    recommendation_type: {recommendation_type}

managers:
  - name: pipfile-requirements
  - name: info
  - name: version
    configuration:
      maintainers: []
      assignees: []
      labels: [bot]
      changelog_file: true
"#;

/// Settings that take precedence over the document's own values.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub tls_verify: Option<bool>,
}

impl ConfigOverrides {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup(HOST_ENV).filter(|value| !value.trim().is_empty());
        let tls_verify = match lookup(TLS_VERIFY_ENV) {
            Some(value) => Some(parse_flag(TLS_VERIFY_ENV, &value)?),
            None => None,
        };
        Ok(Self { host, tls_verify })
    }

    /// Layer `other` on top of `self`; set fields in `other` win.
    pub fn merge(self, other: ConfigOverrides) -> Self {
        Self {
            host: other.host.or(self.host),
            tls_verify: other.tls_verify.or(self.tls_verify),
        }
    }
}

impl ThothConfig {
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(host) = &overrides.host {
            debug!(host = %host, "using explicit host");
            self.host = host.clone();
        }
        if let Some(tls_verify) = overrides.tls_verify {
            self.tls_verify = tls_verify;
        }
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("invalid value {value:?} for {name}"))
            .with_hint("Use 0 or 1.")),
    }
}

pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

pub fn load(path: &Path) -> Result<ThothConfig, Error> {
    let text = read_document(path)?;
    debug!(path = %path.display(), "loaded configuration");
    ThothConfig::from_yaml_str(&text).map_err(|err| err.with_path(path))
}

/// Load a document whose values still carry placeholders, substituting them first.
///
/// Flow mappings must spell their braces as `{{` and `}}` in such documents.
pub fn load_rendered(path: &Path, context: &TemplateContext) -> Result<ThothConfig, Error> {
    let text = read_document(path)?;
    let rendered = template::render(&text, context).map_err(|err| err.with_path(path))?;
    ThothConfig::from_yaml_str(&rendered).map_err(|err| err.with_path(path))
}

fn read_document(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|err| {
        let kind = map_io_error_kind(&err);
        let mut out = Error::new(kind)
            .with_message("failed to read configuration file")
            .with_path(path)
            .with_source(err);
        if kind == ErrorKind::NotFound {
            out = out.with_hint("Run `thamos config` to create one, or pass --config.");
        }
        out
    })
}

/// Render the built-in document template from host facts.
///
/// Context values are raw text; they are encoded as YAML scalars here so that
/// versions like `3.10` stay strings and missing facts become `null`.
pub fn render_default(context: &TemplateContext) -> Result<String, Error> {
    let quoted = |key: &str| context.get(key).map(yaml_quote);
    let bare = |key: &str| context.get(key).map(str::to_string);

    let runtime_environment_name = match (context.get("os_name"), context.get("os_version")) {
        (Some(name), Some(version)) => yaml_quote(&format!("{name}:{version}")),
        (Some(name), None) => yaml_quote(name),
        _ => yaml_quote("default"),
    };

    let encoded = TemplateContext::new()
        .with("host", quoted("host").unwrap_or_else(|| yaml_quote(DEFAULT_HOST)))
        .with("tls_verify", bare("tls_verify").unwrap_or_else(|| "true".to_string()))
        .with(
            "requirements_format",
            bare("requirements_format").unwrap_or_else(|| "pipenv".to_string()),
        )
        .with("runtime_environment_name", runtime_environment_name)
        .with("os_name", null_or(quoted("os_name")))
        .with("os_version", null_or(quoted("os_version")))
        .with("cpu_family", null_or(bare("cpu_family")))
        .with("cpu_model", null_or(bare("cpu_model")))
        .with("python_version", null_or(quoted("python_version")))
        .with("cuda_version", null_or(quoted("cuda_version")))
        .with(
            "recommendation_type",
            bare("recommendation_type").unwrap_or_else(|| "stable".to_string()),
        );
    template::render(DEFAULT_TEMPLATE, &encoded)
}

/// Write a freshly rendered document to `path`, refusing to clobber unless `force`.
pub fn write_default(
    path: &Path,
    context: &TemplateContext,
    force: bool,
) -> Result<ThothConfig, Error> {
    if path.exists() && !force {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("configuration file already exists")
            .with_path(path)
            .with_hint("Pass --force to overwrite it."));
    }
    let text = render_default(context)?;
    let config = ThothConfig::from_yaml_str(&text)?;
    std::fs::write(path, &text).map_err(|err| {
        Error::new(map_io_error_kind(&err))
            .with_message("failed to write configuration file")
            .with_path(path)
            .with_source(err)
    })?;
    Ok(config)
}

fn null_or(value: Option<String>) -> String {
    value.unwrap_or_else(|| "null".to_string())
}

fn yaml_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::{
        ConfigOverrides, HOST_ENV, RecommendationType, TLS_VERIFY_ENV, load, load_rendered,
        render_default, write_default,
    };
    use crate::core::error::ErrorKind;
    use crate::template::TemplateContext;

    fn context() -> TemplateContext {
        TemplateContext::new()
            .with("host", "thoth.example")
            .with("os_name", "rhel")
            .with("os_version", "8")
            .with("python_version", "3.10")
            .with("cpu_family", "6")
            .with("cpu_model", "85")
    }

    #[test]
    fn default_template_renders_valid_document() {
        let text = render_default(&context()).expect("render");
        let config = crate::config::ThothConfig::from_yaml_str(&text).expect("parse");
        assert_eq!(config.host, "thoth.example");
        assert!(config.tls_verify);
        let env = &config.runtime_environments[0];
        assert_eq!(env.name.as_deref(), Some("rhel:8"));
        assert_eq!(env.python_version.as_deref(), Some("3.10"));
        assert_eq!(env.cuda_version, None);
        assert_eq!(env.hardware.cpu_model, Some(85));
        assert_eq!(env.recommendation_type, Some(RecommendationType::Stable));
        assert_eq!(config.managers.len(), 3);
        assert!(crate::config::validate(&config).is_ok());
    }

    #[test]
    fn default_template_tolerates_missing_facts() {
        let text = render_default(&TemplateContext::new()).expect("render");
        let config = crate::config::ThothConfig::from_yaml_str(&text).expect("parse");
        assert_eq!(config.host, super::DEFAULT_HOST);
        let env = &config.runtime_environments[0];
        assert_eq!(env.name.as_deref(), Some("default"));
        assert_eq!(env.operating_system.name, None);
        assert_eq!(env.hardware.cpu_family, None);
    }

    #[test]
    fn write_default_refuses_to_overwrite() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".thoth.yaml");
        write_default(&path, &context(), false).expect("write");
        let err = write_default(&path, &context(), false).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
        write_default(&path, &context(), true).expect("force");
        let loaded = load(&path).expect("load");
        assert_eq!(loaded.host, "thoth.example");
    }

    #[test]
    fn load_reports_missing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load(&temp.path().join("missing.yaml")).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.hint().is_some());
    }

    #[test]
    fn load_rendered_substitutes_placeholders() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".thoth.yaml");
        std::fs::write(
            &path,
            "host: {host}\nruntime_environments:\n  - name: '{os_name}:{os_version}'\n    recommendation_type: latest\n",
        )
        .expect("write");
        let config = load_rendered(&path, &context()).expect("load");
        assert_eq!(config.runtime_environments[0].name.as_deref(), Some("rhel:8"));
    }

    #[test]
    fn overrides_read_environment_lookup() {
        let overrides = ConfigOverrides::from_lookup(|key| match key {
            HOST_ENV => Some("override.example".to_string()),
            TLS_VERIFY_ENV => Some("0".to_string()),
            _ => None,
        })
        .expect("overrides");
        assert_eq!(overrides.host.as_deref(), Some("override.example"));
        assert_eq!(overrides.tls_verify, Some(false));

        let mut config = crate::config::ThothConfig::from_yaml_str("host: h\n").expect("parse");
        config.apply_overrides(&overrides);
        assert_eq!(config.host, "override.example");
        assert!(!config.tls_verify);
    }

    #[test]
    fn overrides_reject_bad_flag() {
        let err = ConfigOverrides::from_lookup(|key| {
            (key == TLS_VERIFY_ENV).then(|| "maybe".to_string())
        })
        .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn explicit_overrides_win_over_environment() {
        let env = ConfigOverrides {
            host: Some("env.example".to_string()),
            tls_verify: Some(true),
        };
        let flags = ConfigOverrides {
            host: Some("flag.example".to_string()),
            tls_verify: None,
        };
        let merged = env.merge(flags);
        assert_eq!(merged.host.as_deref(), Some("flag.example"));
        assert_eq!(merged.tls_verify, Some(true));
    }
}
