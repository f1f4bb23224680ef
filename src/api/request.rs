//! Purpose: Build analysis submissions from configuration and caller options.
//! Exports: `AdviseOptions`, `ProvenanceOptions`, `ImageAnalysisOptions`,
//! `resolve_recommendation_type`, `advise_payload`.
//! Role: Pure request shaping; no I/O happens here.
//! Invariants: The runtime environment payload never carries `recommendation_type`.
//! Invariants: Recommendation type precedence is explicit > environment > document > stable.
use serde::Serialize;

use crate::config::{RecommendationType, RuntimeEnvironment, ThothConfig};
use crate::core::error::{Error, ErrorKind};
use crate::stack::PythonStack;

#[derive(Clone, Debug, PartialEq)]
pub struct AdviseOptions {
    pub recommendation_type: Option<RecommendationType>,
    pub runtime_environment: Option<RuntimeEnvironment>,
    pub limit: Option<u32>,
    pub count: Option<u32>,
    pub force: bool,
    pub debug: bool,
    pub nowait: bool,
}

impl Default for AdviseOptions {
    fn default() -> Self {
        Self {
            recommendation_type: None,
            runtime_environment: None,
            limit: None,
            count: Some(1),
            force: false,
            debug: false,
            nowait: false,
        }
    }
}

impl AdviseOptions {
    /// Fill the runtime environment from the configuration when the caller gave none.
    pub fn with_config_environment(
        mut self,
        config: &ThothConfig,
        name: Option<&str>,
    ) -> Result<Self, Error> {
        if self.runtime_environment.is_some() && name.is_some() {
            return Err(Error::new(ErrorKind::Usage).with_message(
                "cannot use an explicit runtime environment and a runtime environment name at the same time",
            ));
        }
        if self.runtime_environment.is_none() {
            self.runtime_environment = config.runtime_environment(name)?.cloned();
        }
        Ok(self)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProvenanceOptions {
    pub force: bool,
    pub debug: bool,
    pub nowait: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageAnalysisOptions {
    pub registry_user: Option<String>,
    pub registry_password: Option<String>,
    pub verify_tls: bool,
    pub force: bool,
    pub debug: bool,
    pub nowait: bool,
}

impl Default for ImageAnalysisOptions {
    fn default() -> Self {
        Self {
            registry_user: None,
            registry_password: None,
            verify_tls: true,
            force: false,
            debug: false,
            nowait: false,
        }
    }
}

pub fn resolve_recommendation_type(
    explicit: Option<RecommendationType>,
    environment: Option<&RuntimeEnvironment>,
    document: Option<RecommendationType>,
) -> RecommendationType {
    explicit
        .or_else(|| environment.and_then(|env| env.recommendation_type))
        .or(document)
        .unwrap_or_default()
}

#[derive(Serialize)]
pub(crate) struct AdvisePayload<'a> {
    pub application_stack: &'a PythonStack,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_environment: Option<RuntimeEnvironment>,
}

pub(crate) fn advise_payload<'a>(
    stack: &'a PythonStack,
    runtime_environment: Option<&RuntimeEnvironment>,
) -> AdvisePayload<'a> {
    let runtime_environment = runtime_environment.map(|env| RuntimeEnvironment {
        recommendation_type: None,
        ..env.clone()
    });
    AdvisePayload {
        application_stack: stack,
        runtime_environment,
    }
}

pub(crate) fn advise_query(
    recommendation_type: RecommendationType,
    options: &AdviseOptions,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("recommendation_type", recommendation_type.as_str().to_string()),
        ("debug", options.debug.to_string()),
        ("force", options.force.to_string()),
    ];
    if let Some(limit) = options.limit {
        query.push(("limit", limit.to_string()));
    }
    if let Some(count) = options.count {
        query.push(("count", count.to_string()));
    }
    query
}

pub(crate) fn image_query(image: &str, options: &ImageAnalysisOptions) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("image", image.to_string()),
        ("debug", options.debug.to_string()),
        ("verify_tls", options.verify_tls.to_string()),
        ("force", options.force.to_string()),
    ];
    if let Some(user) = &options.registry_user {
        query.push(("registry_user", user.clone()));
    }
    if let Some(password) = &options.registry_password {
        query.push(("registry_password", password.clone()));
    }
    query
}

#[cfg(test)]
mod tests {
    use super::{
        AdviseOptions, ImageAnalysisOptions, advise_payload, advise_query, image_query,
        resolve_recommendation_type,
    };
    use crate::config::{RecommendationType, RuntimeEnvironment, ThothConfig};
    use crate::core::error::ErrorKind;
    use crate::stack::PythonStack;

    fn env(recommendation_type: Option<RecommendationType>) -> RuntimeEnvironment {
        RuntimeEnvironment {
            name: Some("rhel:8".to_string()),
            python_version: Some("3.8".to_string()),
            recommendation_type,
            ..RuntimeEnvironment::default()
        }
    }

    #[test]
    fn explicit_recommendation_type_wins() {
        let env = env(Some(RecommendationType::Latest));
        let resolved = resolve_recommendation_type(
            Some(RecommendationType::Testing),
            Some(&env),
            Some(RecommendationType::Stable),
        );
        assert_eq!(resolved, RecommendationType::Testing);
    }

    #[test]
    fn environment_beats_document() {
        let env = env(Some(RecommendationType::Latest));
        let resolved =
            resolve_recommendation_type(None, Some(&env), Some(RecommendationType::Testing));
        assert_eq!(resolved, RecommendationType::Latest);

        let resolved = resolve_recommendation_type(None, None, Some(RecommendationType::Testing));
        assert_eq!(resolved, RecommendationType::Testing);
    }

    #[test]
    fn stable_is_the_fallback() {
        assert_eq!(
            resolve_recommendation_type(None, Some(&env(None)), None),
            RecommendationType::Stable
        );
    }

    #[test]
    fn payload_drops_recommendation_type() {
        let stack = PythonStack::new("[packages]", "");
        let env = env(Some(RecommendationType::Latest));
        let payload = serde_json::to_value(advise_payload(&stack, Some(&env))).expect("json");
        let runtime = &payload["runtime_environment"];
        assert_eq!(runtime["name"], "rhel:8");
        assert!(runtime.get("recommendation_type").is_none());
        assert_eq!(payload["application_stack"]["requirements"], "[packages]");
    }

    #[test]
    fn payload_without_environment_omits_key() {
        let stack = PythonStack::new("[packages]", "");
        let payload = serde_json::to_value(advise_payload(&stack, None)).expect("json");
        assert!(payload.get("runtime_environment").is_none());
    }

    #[test]
    fn advise_query_includes_optional_limits() {
        let options = AdviseOptions {
            limit: Some(5),
            ..AdviseOptions::default()
        };
        let query = advise_query(RecommendationType::Latest, &options);
        assert!(query.contains(&("recommendation_type", "latest".to_string())));
        assert!(query.contains(&("limit", "5".to_string())));
        assert!(query.contains(&("count", "1".to_string())));
    }

    #[test]
    fn image_query_skips_absent_credentials() {
        let query = image_query("quay.io/thoth/s2i:latest", &ImageAnalysisOptions::default());
        assert!(!query.iter().any(|(key, _)| key.starts_with("registry_")));

        let options = ImageAnalysisOptions {
            registry_user: Some("bot".to_string()),
            ..ImageAnalysisOptions::default()
        };
        let query = image_query("img", &options);
        assert!(query.contains(&("registry_user", "bot".to_string())));
        assert!(!query.iter().any(|(key, _)| *key == "registry_password"));
    }

    #[test]
    fn config_environment_fills_default() {
        let config = ThothConfig::from_yaml_str(
            "host: h\nruntime_environments:\n  - name: a\n  - name: b\n",
        )
        .expect("parse");
        let options = AdviseOptions::default()
            .with_config_environment(&config, Some("b"))
            .expect("options");
        assert_eq!(
            options.runtime_environment.and_then(|env| env.name).as_deref(),
            Some("b")
        );
    }

    #[test]
    fn explicit_environment_and_name_conflict() {
        let config = ThothConfig::from_yaml_str("host: h\n").expect("parse");
        let options = AdviseOptions {
            runtime_environment: Some(env(None)),
            ..AdviseOptions::default()
        };
        let err = options
            .with_config_environment(&config, Some("a"))
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
