//! Purpose: `thamos` CLI entry point.
//! Role: Binary crate root; parses args, loads `.thoth.yaml`, runs commands, emits JSON on stdout.
//! Invariants: Commands emit JSON on stdout except `log`, `config --dry-run`, and human `validate`.
//! Invariants: Errors are emitted as text on a TTY and as a JSON envelope otherwise.
//! Invariants: Process exit code is derived from `to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{
    ArgAction, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use thamos::api::{
    AdviseOptions, AnalysisOutcome, ImageAnalysisOptions, PollPolicy, ProvenanceOptions,
    ThothClient,
};
use thamos::config::{
    self, ConfigOverrides, RecommendationType, Severity, ThothConfig, ValidationReport,
};
use thamos::notice::{Notice, notice_json};
use thamos::{Error, ErrorKind, to_exit_code};

const LOG_ENV: &str = "THAMOS_LOG";

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint(clap_error_hint(&err)),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing(cli.verbose);
    let color_mode = cli.color;
    let globals = GlobalArgs {
        config: cli.config,
        host: cli.host,
        no_tls_verify: cli.no_tls_verify,
        color: color_mode,
    };

    command_dispatch::dispatch_command(cli.command, &globals)
        .map_err(add_io_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "thamos",
    version,
    about = "Client for the Thoth recommendation service",
    long_about = None,
    before_help = r#"Reads .thoth.yaml from the working directory (or --config / THAMOS_CONFIG).

Mental model:
  - `config` writes a .thoth.yaml describing this machine
  - `validate` checks a .thoth.yaml without contacting the service
  - `advise` submits Pipfile + Pipfile.lock and prints the recommendation
"#,
    after_help = r#"EXAMPLES
  $ thamos config
  $ thamos validate
  $ thamos advise --runtime-environment 'fedora:39'
  $ thamos advise --no-wait
  $ thamos status adviser-210301120000-1a2b3c4d
  $ thamos log adviser-210301120000-1a2b3c4d

ENVIRONMENT
  THAMOS_CONFIG      path of the configuration document
  THAMOS_HOST        service host, overrides `host`
  THAMOS_TLS_VERIFY  0|1, overrides `tls_verify`
  THAMOS_LOG         tracing filter (e.g. debug)"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Configuration document (default: ./.thoth.yaml)",
        value_hint = ValueHint::FilePath
    )]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Service host, overrides the document's `host`")]
    host: Option<String>,
    #[arg(long, global = true, help = "Skip TLS certificate validation")]
    no_tls_verify: bool,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,
    #[arg(
        short,
        long,
        global = true,
        action = ArgAction::Count,
        help = "Increase log verbosity (-v info, -vv debug)"
    )]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

struct GlobalArgs {
    config: Option<PathBuf>,
    host: Option<String>,
    no_tls_verify: bool,
    color: ColorMode,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Check the configuration document without contacting the service")]
    Validate {
        #[arg(long, help = "Emit the validation report as JSON")]
        json: bool,
    },
    #[command(about = "Print the parsed configuration document as JSON")]
    Show {
        #[arg(long, help = "Print only the named runtime environment")]
        runtime_environment: Option<String>,
    },
    #[command(about = "Write a .thoth.yaml describing this machine")]
    Config {
        #[arg(long, help = "Overwrite an existing document")]
        force: bool,
        #[arg(long, help = "Print the document instead of writing it")]
        dry_run: bool,
    },
    #[command(about = "Ask for a recommended software stack")]
    Advise {
        #[arg(
            long,
            default_value = ".",
            help = "Directory holding Pipfile and Pipfile.lock",
            value_hint = ValueHint::DirPath
        )]
        dir: PathBuf,
        #[arg(short = 'r', long, help = "Runtime environment name from the document")]
        runtime_environment: Option<String>,
        #[arg(long, value_parser = parse_recommendation_type, help = "testing|stable|latest")]
        recommendation_type: Option<RecommendationType>,
        #[arg(long, help = "Maximum number of stacks the resolver considers")]
        limit: Option<u32>,
        #[arg(long, default_value_t = 1, help = "Number of stacks to report")]
        count: u32,
        #[command(flatten)]
        submit: SubmitArgs,
    },
    #[command(about = "Check provenance of packages in Pipfile.lock")]
    ProvenanceCheck {
        #[arg(
            long,
            default_value = ".",
            help = "Directory holding Pipfile and Pipfile.lock",
            value_hint = ValueHint::DirPath
        )]
        dir: PathBuf,
        #[command(flatten)]
        submit: SubmitArgs,
    },
    #[command(about = "Analyze a container image")]
    ImageAnalysis {
        image: String,
        #[arg(long)]
        registry_user: Option<String>,
        #[arg(long)]
        registry_password: Option<String>,
        #[arg(long, help = "Do not verify the registry's TLS certificate")]
        no_registry_tls_verify: bool,
        #[command(flatten)]
        submit: SubmitArgs,
    },
    #[command(about = "Show the status of an analysis")]
    Status { analysis_id: String },
    #[command(about = "Print the log of an analysis")]
    Log { analysis_id: String },
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Print version info")]
    Version,
}

#[derive(clap::Args)]
struct SubmitArgs {
    #[arg(long, help = "Print the analysis id without waiting for the result")]
    no_wait: bool,
    #[arg(long, help = "Ignore cached results on the service")]
    force: bool,
    #[arg(long, help = "Run the analysis in debug mode")]
    debug: bool,
    #[arg(long, help = "Stop waiting after this long (e.g. 90s, 10m)")]
    timeout: Option<String>,
}

impl SubmitArgs {
    fn poll_policy(&self) -> Result<PollPolicy, Error> {
        let policy = PollPolicy::default();
        match self.timeout.as_deref() {
            Some(value) => Ok(policy.with_timeout(parse_duration(value)?)),
            None => Ok(policy),
        }
    }
}

fn parse_recommendation_type(input: &str) -> Result<RecommendationType, String> {
    input
        .parse()
        .map_err(|err: Error| err.message().unwrap_or("invalid value").to_string())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn config_overrides(globals: &GlobalArgs) -> Result<ConfigOverrides, Error> {
    let flags = ConfigOverrides {
        host: globals.host.clone(),
        tls_verify: globals.no_tls_verify.then_some(false),
    };
    Ok(ConfigOverrides::from_env()?.merge(flags))
}

/// Load the document and apply flag and environment overrides.
fn load_config(globals: &GlobalArgs) -> Result<(PathBuf, ThothConfig), Error> {
    let path = config::resolve_config_path(globals.config.as_deref());
    let mut config = config::load(&path)?;
    config.apply_overrides(&config_overrides(globals)?);
    Ok((path, config))
}

/// Configuration for commands that only need to reach the service.
///
/// An explicit host makes the document optional.
fn load_service_config(globals: &GlobalArgs) -> Result<ThothConfig, Error> {
    let overrides = config_overrides(globals)?;
    let path = config::resolve_config_path(globals.config.as_deref());
    let mut config = match (&overrides.host, path.exists()) {
        (Some(host), false) => ThothConfig::with_host(host.clone()),
        _ => config::load(&path)?,
    };
    config.apply_overrides(&overrides);
    Ok(config)
}

fn emit_config_warnings(report: &ValidationReport, cmd: &str, color_mode: ColorMode) {
    for issue in &report.issues {
        if issue.severity != Severity::Warning {
            continue;
        }
        let mut details = Map::new();
        details.insert("path".to_string(), json!(issue.path));
        emit_notice(
            &Notice {
                kind: issue.code.clone(),
                time: notice_time_now().unwrap_or_default(),
                cmd: cmd.to_string(),
                analysis_id: None,
                message: issue.message.clone(),
                details,
            },
            color_mode,
        );
    }
}

fn ensure_valid(report: &ValidationReport, path: &Path) -> Result<(), Error> {
    if report.is_ok() {
        return Ok(());
    }
    let first = report
        .issues
        .iter()
        .find(|issue| issue.severity == Severity::Error);
    let message = match first {
        Some(issue) => format!("invalid configuration: {}: {}", issue.path, issue.message),
        None => "invalid configuration".to_string(),
    };
    Err(Error::new(ErrorKind::Config)
        .with_message(message)
        .with_path(path)
        .with_hint("Run `thamos validate` for the full report."))
}

fn outcome_json(outcome: &AnalysisOutcome) -> Value {
    match outcome {
        AnalysisOutcome::Submitted { analysis_id } => json!({ "analysis_id": analysis_id }),
        AnalysisOutcome::Completed(report) => json!({
            "analysis_id": report.analysis_id,
            "kind": report.kind,
            "result": report.result,
        }),
    }
}

fn outcome_exit(outcome: &AnalysisOutcome) -> RunOutcome {
    match outcome {
        AnalysisOutcome::Completed(report) if report.has_error() => {
            RunOutcome::with_code(to_exit_code(ErrorKind::Analysis))
        }
        _ => RunOutcome::ok(),
    }
}

fn emit_validation_human(report: &ValidationReport, config: &ThothConfig, path: &Path) {
    if report.is_ok() {
        println!(
            "ok: {} ({} runtime environments, {} managers)",
            path.display(),
            config.runtime_environments.len(),
            config.managers.len()
        );
    } else {
        println!("invalid: {}", path.display());
    }
    for issue in &report.issues {
        let label = match issue.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        println!("  {label}: {}: {}", issue.path, issue.message);
    }
}

fn parse_duration(input: &str) -> Result<Duration, Error> {
    let invalid = || {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid duration {input:?}"))
            .with_hint("Use a number plus ms|s|m|h (e.g. 90s).")
    };
    let trimmed = input.trim();
    let split = trimmed.char_indices().find(|(_, ch)| !ch.is_ascii_digit());
    let (num_str, unit) = match split {
        Some((idx, _)) => trimmed.split_at(idx),
        None => return Err(invalid()),
    };
    let value: u64 = num_str.parse().map_err(|_| invalid())?;
    let millis = match unit {
        "ms" => value,
        "s" => value.saturating_mul(1_000),
        "m" => value.saturating_mul(60_000),
        "h" => value.saturating_mul(3_600_000),
        _ => return Err(invalid()),
    };
    Ok(Duration::from_millis(millis))
}

fn add_io_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Io || err.hint().is_some() {
        return err;
    }
    err.with_hint("Check network connectivity to the service, or rerun with -vv for details.")
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_version_output() {
    emit_json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }));
}

const RED: &str = "31";
const YELLOW: &str = "33";

fn paint(label: &str, code: &str, enabled: bool) -> String {
    if enabled {
        format!("\u{1b}[{code}m{label}\u{1b}[0m")
    } else {
        label.to_string()
    }
}

/// Write one diagnostic to stderr: `text` on a TTY, the JSON envelope otherwise.
fn emit_stderr(color_mode: ColorMode, text: impl FnOnce(bool) -> String, value: Value) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", text(color_mode.use_color(is_tty)));
    } else {
        eprintln!(
            "{}",
            serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string())
        );
    }
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    emit_stderr(color_mode, |color| error_text(err, color), error_json(err));
}

fn notice_time_now() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let text = |color| {
        let mut line = format!("{} {}", paint("notice:", YELLOW, color), notice.message);
        if let Some(analysis_id) = &notice.analysis_id {
            line.push_str(&format!(" (analysis: {analysis_id})"));
        }
        line
    };
    emit_stderr(color_mode, text, notice_json(notice));
}

fn error_message(err: &Error) -> String {
    let fallback = match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::NotFound => "not found",
        ErrorKind::Config => "invalid configuration",
        ErrorKind::Permission => "permission denied",
        ErrorKind::Io => "i/o error",
        ErrorKind::Remote => "service error",
        ErrorKind::Analysis => "analysis failed",
    };
    err.message().unwrap_or(fallback).to_string()
}

fn error_causes(err: &Error) -> Vec<String> {
    std::iter::successors(err.source(), |&source| source.source())
        .map(ToString::to_string)
        .collect()
}

/// Optional context members shared by the text and JSON renderings.
fn error_context(err: &Error) -> Vec<(&'static str, String)> {
    let mut context = Vec::new();
    if let Some(hint) = err.hint() {
        context.push(("hint", hint.to_string()));
    }
    if let Some(path) = err.path() {
        context.push(("path", path.display().to_string()));
    }
    if let Some(analysis_id) = err.analysis_id() {
        context.push(("analysis_id", analysis_id.to_string()));
    }
    context
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    for (key, value) in error_context(err) {
        inner.insert(key.to_string(), json!(value));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }
    json!({ "error": inner })
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        paint("error:", RED, use_color),
        error_message(err)
    )];
    let causes = error_causes(err);
    let first_cause = causes.first().map(|cause| ("caused by", cause.clone()));
    for (key, value) in error_context(err).into_iter().chain(first_cause) {
        let label = if key == "analysis_id" { "analysis" } else { key };
        lines.push(format!("{} {value}", paint(&format!("{label}:"), YELLOW, use_color)));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    err.to_string()
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("error:").trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

/// Point at `--help` for the subcommand named in clap's usage line.
fn clap_error_hint(err: &clap::Error) -> String {
    let command = err
        .to_string()
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: ").map(str::to_string))
        .map(|usage| {
            usage
                .split_whitespace()
                .take_while(|token| !token.starts_with(['-', '<', '[']))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|command| command.starts_with("thamos"))
        .unwrap_or_else(|| "thamos".to_string());
    format!("Try `{command} --help`.")
}
