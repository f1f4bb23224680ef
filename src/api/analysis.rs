//! Purpose: Model analyses run by the recommendation service.
//! Exports: `AnalysisKind`, `AnalysisStatus`, `AnalysisReport`, `AnalysisOutcome`, `PollPolicy`.
//! Role: Shared vocabulary between request builders, the HTTP client, and the CLI.
//! Invariants: The analysis kind is derived from the id prefix alone.
//! Invariants: Poll delays double from `initial` and never exceed `max`.
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Advise,
    Provenance,
    Image,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 3] = [
        AnalysisKind::Advise,
        AnalysisKind::Provenance,
        AnalysisKind::Image,
    ];

    pub fn id_prefix(self) -> &'static str {
        match self {
            AnalysisKind::Advise => "adviser-",
            AnalysisKind::Provenance => "provenance-checker-",
            AnalysisKind::Image => "package-extract-",
        }
    }

    /// Path segments of the endpoint family, relative to the API root.
    pub(crate) fn endpoint(self) -> &'static [&'static str] {
        match self {
            AnalysisKind::Advise => &["advise", "python"],
            AnalysisKind::Provenance => &["provenance", "python"],
            AnalysisKind::Image => &["analyze"],
        }
    }

    pub fn from_id(analysis_id: &str) -> Result<Self, Error> {
        Self::ALL
            .into_iter()
            .find(|kind| analysis_id.starts_with(kind.id_prefix()))
            .ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!(
                        "cannot determine analysis type from identifier {analysis_id:?}"
                    ))
                    .with_hint(
                        "Analysis ids start with adviser-, provenance-checker-, or package-extract-.",
                    )
            })
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AnalysisKind::Advise => "advise",
            AnalysisKind::Provenance => "provenance",
            AnalysisKind::Image => "image",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStatus {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalysisStatus {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub analysis_id: String,
    pub kind: AnalysisKind,
    pub result: Value,
    pub metadata: Value,
}

impl AnalysisReport {
    /// The `report` member; advise and provenance results carry one.
    pub fn report(&self) -> Option<&Value> {
        self.result.get("report")
    }

    /// Whether the service flagged the analysis result as an error.
    pub fn has_error(&self) -> bool {
        self.result
            .get("error")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AnalysisOutcome {
    Submitted { analysis_id: String },
    Completed(AnalysisReport),
}

impl AnalysisOutcome {
    pub fn analysis_id(&self) -> &str {
        match self {
            AnalysisOutcome::Submitted { analysis_id } => analysis_id,
            AnalysisOutcome::Completed(report) => &report.analysis_id,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
            timeout: None,
        }
    }
}

impl PollPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

#[derive(Deserialize)]
pub(crate) struct SubmitResponse {
    pub analysis_id: String,
    #[serde(default)]
    pub cached: bool,
}

#[derive(Deserialize)]
pub(crate) struct StatusEnvelope {
    pub status: AnalysisStatus,
}

#[derive(Deserialize)]
pub(crate) struct ResultEnvelope {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Deserialize)]
pub(crate) struct LogEnvelope {
    pub log: String,
}
