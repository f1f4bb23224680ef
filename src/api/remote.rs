//! Purpose: Blocking HTTP client for the recommendation service's user API.
//! Exports: `ThothClient`.
//! Role: Submit analyses, poll their status, and fetch results and logs.
//! Invariants: Every endpoint path is relative to the discovered `/api/v1` root.
//! Invariants: `tls_verify = false` disables certificate validation for every request.
//! Invariants: HTTP failures map to `ErrorKind` by status; transport failures are `Io`.
#![allow(clippy::result_large_err)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};
use ureq::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use ureq::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use ureq::rustls::{DigitallySignedStruct, Error as TlsError, SignatureScheme};
use url::Url;

use super::analysis::{
    AnalysisKind, AnalysisOutcome, AnalysisReport, AnalysisStatus, LogEnvelope, PollPolicy,
    ResultEnvelope, StatusEnvelope, SubmitResponse,
};
use super::request::{
    AdviseOptions, ImageAnalysisOptions, ProvenanceOptions, advise_payload, advise_query,
    image_query, resolve_recommendation_type,
};
use crate::config::{RecommendationType, ThothConfig};
use crate::core::error::{Error, ErrorKind};
use crate::stack::PythonStack;

type ApiResult<T> = Result<T, Error>;

const API_PATH: &[&str] = &["api", "v1"];
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ThothClient {
    inner: Arc<ThothClientInner>,
}

#[derive(Debug)]
struct ThothClientInner {
    api_url: Url,
    tls_verify: bool,
    poll: PollPolicy,
    agent: ureq::Agent,
}

#[derive(Debug)]
struct AcceptAllServerCertVerifier;

impl ServerCertVerifier for AcceptAllServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        ureq::rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[derive(serde::Deserialize)]
struct ErrorEnvelope {
    error: String,
}

impl ThothClient {
    /// Client for an already known API root such as `https://host/api/v1`.
    pub fn new(api_url: impl AsRef<str>, tls_verify: bool) -> ApiResult<Self> {
        let api_url = normalize_api_url(api_url.as_ref())?;
        Ok(Self {
            inner: Arc::new(ThothClientInner {
                api_url,
                tls_verify,
                poll: PollPolicy::default(),
                agent: build_agent(tls_verify),
            }),
        })
    }

    /// Resolve `host` to an API root, probing https before http for bare host names.
    pub fn discover(host: &str, tls_verify: bool) -> ApiResult<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("no host configured")
                .with_hint("Set `host` in .thoth.yaml or pass --host."));
        }
        if host.starts_with("http://") || host.starts_with("https://") {
            return Self::new(host, tls_verify);
        }

        let agent = build_agent(tls_verify);
        let mut last_err = None;
        for scheme in ["https", "http"] {
            let candidate = normalize_api_url(&format!("{scheme}://{host}"))?;
            debug!(url = %candidate, "probing API endpoint");
            match agent
                .get(candidate.as_str())
                .timeout(PROBE_TIMEOUT)
                .call()
            {
                Ok(_) | Err(ureq::Error::Status(_, _)) => {
                    debug!(url = %candidate, "using API endpoint");
                    return Self::new(candidate.as_str(), tls_verify);
                }
                Err(ureq::Error::Transport(err)) => {
                    debug!(url = %candidate, error = %err, "API endpoint unreachable");
                    last_err = Some(err);
                }
            }
        }

        let mut err = Error::new(ErrorKind::Io)
            .with_message(format!("no API reachable at host {host:?}"))
            .with_hint("Check `host` in .thoth.yaml and your network connection.");
        if let Some(source) = last_err {
            err = err.with_source(source);
        }
        Err(err)
    }

    pub fn from_config(config: &ThothConfig) -> ApiResult<Self> {
        Self::discover(&config.host, config.tls_verify)
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.poll = poll;
        } else {
            self.inner = Arc::new(ThothClientInner {
                api_url: self.inner.api_url.clone(),
                tls_verify: self.inner.tls_verify,
                poll,
                agent: self.inner.agent.clone(),
            });
        }
        self
    }

    pub fn api_url(&self) -> &Url {
        &self.inner.api_url
    }

    pub fn tls_verify(&self) -> bool {
        self.inner.tls_verify
    }

    pub fn advise(
        &self,
        stack: &PythonStack,
        options: &AdviseOptions,
        document_default: Option<RecommendationType>,
    ) -> ApiResult<AnalysisOutcome> {
        if stack.requirements.trim().is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("no Pipfile content provided for advises"));
        }
        let runtime_environment = options.runtime_environment.as_ref();
        let recommendation_type = resolve_recommendation_type(
            options.recommendation_type,
            runtime_environment,
            document_default,
        );
        let payload = advise_payload(stack, runtime_environment);
        let query = advise_query(recommendation_type, options);
        let analysis_id = self.submit(AnalysisKind::Advise, &query, Some(&payload))?;
        self.finish(AnalysisKind::Advise, analysis_id, options.nowait)
    }

    pub fn provenance_check(
        &self,
        stack: &PythonStack,
        options: &ProvenanceOptions,
    ) -> ApiResult<AnalysisOutcome> {
        if stack.requirements.trim().is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("no Pipfile content provided for provenance checks"));
        }
        let query = vec![
            ("debug", options.debug.to_string()),
            ("force", options.force.to_string()),
        ];
        let analysis_id = self.submit(AnalysisKind::Provenance, &query, Some(stack))?;
        self.finish(AnalysisKind::Provenance, analysis_id, options.nowait)
    }

    pub fn image_analysis(
        &self,
        image: &str,
        options: &ImageAnalysisOptions,
    ) -> ApiResult<AnalysisOutcome> {
        if image.trim().is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("no image provided"));
        }
        let query = image_query(image, options);
        let analysis_id = self.submit::<()>(AnalysisKind::Image, &query, None)?;
        self.finish(AnalysisKind::Image, analysis_id, options.nowait)
    }

    pub fn status(&self, analysis_id: &str) -> ApiResult<AnalysisStatus> {
        let kind = AnalysisKind::from_id(analysis_id)?;
        let url = self.analysis_url(kind, analysis_id, Some("status"))?;
        let envelope: StatusEnvelope = self
            .request_json::<(), _>("GET", &url, &[], None)
            .map_err(|err| err.with_analysis_id(analysis_id))?;
        Ok(envelope.status)
    }

    pub fn log(&self, analysis_id: &str) -> ApiResult<String> {
        let kind = AnalysisKind::from_id(analysis_id)?;
        let url = self.analysis_url(kind, analysis_id, Some("log"))?;
        let envelope: LogEnvelope = self
            .request_json::<(), _>("GET", &url, &[], None)
            .map_err(|err| err.with_analysis_id(analysis_id))?;
        Ok(envelope.log)
    }

    /// Fetch the result of a finished analysis.
    pub fn result(&self, analysis_id: &str) -> ApiResult<AnalysisReport> {
        let kind = AnalysisKind::from_id(analysis_id)?;
        let url = self.analysis_url(kind, analysis_id, None)?;
        // The service explains failed analyses in the error body.
        let envelope: ResultEnvelope = self
            .execute::<(), _>("GET", &url, &[], None, Some(ErrorKind::Analysis))
            .map_err(|err| err.with_analysis_id(analysis_id))?;
        debug!(analysis_id, metadata = %envelope.metadata, "retrieved analysis result");
        Ok(AnalysisReport {
            analysis_id: analysis_id.to_string(),
            kind,
            result: envelope.result,
            metadata: envelope.metadata,
        })
    }

    /// Poll until the analysis reports `finished_at`.
    pub fn wait_for_analysis(&self, analysis_id: &str) -> ApiResult<AnalysisStatus> {
        let poll = self.inner.poll;
        let started = Instant::now();
        let mut delay = poll.initial;
        loop {
            let status = self.status(analysis_id)?;
            if status.is_finished() {
                return Ok(status);
            }
            if let Some(timeout) = poll.timeout {
                if started.elapsed() + delay > timeout {
                    return Err(Error::new(ErrorKind::Remote)
                        .with_message(format!("analysis did not finish within {timeout:?}"))
                        .with_analysis_id(analysis_id)
                        .with_hint(format!(
                            "Check later with `thamos status {analysis_id}`."
                        )));
                }
            }
            debug!(
                analysis_id,
                delay_ms = delay.as_millis() as u64,
                state = status.state.as_deref().unwrap_or("unknown"),
                "waiting for analysis to finish"
            );
            std::thread::sleep(delay);
            delay = poll.next_delay(delay);
        }
    }

    fn finish(
        &self,
        kind: AnalysisKind,
        analysis_id: String,
        nowait: bool,
    ) -> ApiResult<AnalysisOutcome> {
        if nowait {
            return Ok(AnalysisOutcome::Submitted { analysis_id });
        }
        self.wait_for_analysis(&analysis_id)?;
        debug!(analysis_id, %kind, "retrieving analysis result");
        Ok(AnalysisOutcome::Completed(self.result(&analysis_id)?))
    }

    fn submit<T>(
        &self,
        kind: AnalysisKind,
        query: &[(&str, String)],
        body: Option<&T>,
    ) -> ApiResult<String>
    where
        T: Serialize,
    {
        let url = build_url(&self.inner.api_url, kind.endpoint())?;
        let response: SubmitResponse = self.request_json("POST", &url, query, body)?;
        info!(
            analysis_id = %response.analysis_id,
            cached = response.cached,
            "successfully submitted {kind} analysis"
        );
        Ok(response.analysis_id)
    }

    fn analysis_url(
        &self,
        kind: AnalysisKind,
        analysis_id: &str,
        leaf: Option<&str>,
    ) -> ApiResult<Url> {
        let mut segments = kind.endpoint().to_vec();
        segments.push(analysis_id);
        if let Some(leaf) = leaf {
            segments.push(leaf);
        }
        build_url(&self.inner.api_url, &segments)
    }

    fn request_json<T, R>(
        &self,
        method: &str,
        url: &Url,
        query: &[(&str, String)],
        body: Option<&T>,
    ) -> ApiResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        self.execute(method, url, query, body, None)
    }

    /// `explained_kind` replaces the status-derived kind when the server sent an error body.
    fn execute<T, R>(
        &self,
        method: &str,
        url: &Url,
        query: &[(&str, String)],
        body: Option<&T>,
        explained_kind: Option<ErrorKind>,
    ) -> ApiResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let started = Instant::now();
        let mut request = self
            .inner
            .agent
            .request(method, url.as_str())
            .set("Accept", "application/json");
        for (key, value) in query {
            request = request.query(key, value);
        }
        let response = match body {
            Some(body) => {
                let payload = serde_json::to_string(body).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode request json")
                        .with_source(err)
                })?;
                request
                    .set("Content-Type", "application/json")
                    .send_string(&payload)
            }
            None => request.call(),
        };
        debug!(
            method,
            url = %url,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request finished"
        );

        match response {
            Ok(resp) => read_json_response(resp),
            Err(ureq::Error::Status(code, resp)) => {
                Err(parse_error_response(code, resp, explained_kind))
            }
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Io)
                .with_message("request failed")
                .with_source(err)),
        }
    }
}

fn build_agent(tls_verify: bool) -> ureq::Agent {
    if tls_verify {
        return ureq::AgentBuilder::new().build();
    }
    let _ = ureq::rustls::crypto::aws_lc_rs::default_provider().install_default();
    let tls_config = ureq::rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAllServerCertVerifier))
        .with_no_client_auth();
    ureq::builder().tls_config(Arc::new(tls_config)).build()
}

fn normalize_api_url(raw: &str) -> ApiResult<Url> {
    let mut url = Url::parse(raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid service url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(
            Error::new(ErrorKind::Usage).with_message("service url must use http or https scheme")
        );
    }
    let path = url.path().trim_end_matches('/').to_string();
    if path.is_empty() {
        url = build_url(&url, API_PATH)?;
    } else {
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(api_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = api_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("service url cannot be a base")
        })?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn read_json_response<R>(response: ureq::Response) -> ApiResult<R>
where
    R: DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Remote)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn parse_error_response(
    status: u16,
    response: ureq::Response,
    explained_kind: Option<ErrorKind>,
) -> Error {
    let body = response.into_string().unwrap_or_default();
    let kind = error_kind_from_status(status);
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => {
            debug!(status, error = %envelope.error, "error response from server");
            Error::new(explained_kind.unwrap_or(kind)).with_message(envelope.error)
        }
        Err(_) => {
            if let Ok(value) = serde_json::from_str::<Value>(&body) {
                debug!(status, body = %value, "unrecognized error response from server");
            }
            Error::new(kind).with_message(format!("remote error status {status}"))
        }
    }
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 413 | 422 => ErrorKind::Usage,
        401 | 403 => ErrorKind::Permission,
        404 => ErrorKind::NotFound,
        _ => ErrorKind::Remote,
    }
}
