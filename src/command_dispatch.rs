//! Purpose: Hold top-level CLI command dispatch for `thamos`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every service command validates the document before contacting the service.
//! Invariants: A missing per-environment recommendation type only warns; the fallback chain decides.
//! Invariants: Helpers in `main.rs` remain the source of output formatting.

use super::*;

use thamos::api::AnalysisKind;
use thamos::config::{MISSING_RECOMMENDATION_TYPE, validate};
use thamos::discovery;
use thamos::stack::read_stack;

pub(super) fn dispatch_command(command: Command, globals: &GlobalArgs) -> Result<RunOutcome, Error> {
    let color_mode = globals.color;
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "thamos", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output();
            Ok(RunOutcome::ok())
        }
        Command::Validate { json } => {
            let (path, config) = load_config(globals)?;
            let report = validate(&config).with_source(&path);
            if json {
                let value = serde_json::to_value(&report).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode validation report")
                        .with_source(err)
                })?;
                emit_json(value);
            } else {
                emit_validation_human(&report, &config, &path);
            }
            let exit_code = if report.is_ok() {
                0
            } else {
                to_exit_code(ErrorKind::Config)
            };
            Ok(RunOutcome::with_code(exit_code))
        }
        Command::Show {
            runtime_environment,
        } => {
            let (_, config) = load_config(globals)?;
            let value = match runtime_environment.as_deref() {
                Some(name) => serde_json::to_value(config.runtime_environment(Some(name))?),
                None => serde_json::to_value(&config),
            }
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode configuration")
                    .with_source(err)
            })?;
            emit_json(value);
            Ok(RunOutcome::ok())
        }
        Command::Config { force, dry_run } => {
            let path = config::resolve_config_path(globals.config.as_deref());
            let mut context = discovery::discover_context();
            if let Some(host) = config_overrides(globals)?.host {
                context.insert("host", host);
            }
            if globals.no_tls_verify {
                context.insert("tls_verify", "false");
            }
            if dry_run {
                print!("{}", config::render_default(&context)?);
                return Ok(RunOutcome::ok());
            }
            let written = config::write_default(&path, &context, force)?;
            emit_json(json!({
                "path": path.display().to_string(),
                "host": written.host,
                "runtime_environments": written
                    .runtime_environments
                    .iter()
                    .map(|env| env.name.clone())
                    .collect::<Vec<_>>(),
            }));
            Ok(RunOutcome::ok())
        }
        Command::Advise {
            dir,
            runtime_environment,
            recommendation_type,
            limit,
            count,
            submit,
        } => {
            let (path, config) = load_config(globals)?;
            let report = validate(&config).relax(MISSING_RECOMMENDATION_TYPE);
            emit_config_warnings(&report, "advise", color_mode);
            ensure_valid(&report, &path)?;

            let format = config.requirements_format.unwrap_or_default();
            let stack = read_stack(&dir, format)?;
            let options = AdviseOptions {
                recommendation_type,
                runtime_environment: None,
                limit,
                count: Some(count),
                force: submit.force,
                debug: submit.debug,
                nowait: submit.no_wait,
            }
            .with_config_environment(&config, runtime_environment.as_deref())?;

            let client = ThothClient::from_config(&config)?.with_poll_policy(submit.poll_policy()?);
            let outcome = client.advise(&stack, &options, config.recommendation_type)?;
            emit_json(outcome_json(&outcome));
            Ok(outcome_exit(&outcome))
        }
        Command::ProvenanceCheck { dir, submit } => {
            let (path, config) = load_config(globals)?;
            let report = validate(&config).relax(MISSING_RECOMMENDATION_TYPE);
            emit_config_warnings(&report, "provenance-check", color_mode);
            ensure_valid(&report, &path)?;

            let format = config.requirements_format.unwrap_or_default();
            let stack = read_stack(&dir, format)?;
            let options = ProvenanceOptions {
                force: submit.force,
                debug: submit.debug,
                nowait: submit.no_wait,
            };
            let client = ThothClient::from_config(&config)?.with_poll_policy(submit.poll_policy()?);
            let outcome = client.provenance_check(&stack, &options)?;
            emit_json(outcome_json(&outcome));
            Ok(outcome_exit(&outcome))
        }
        Command::ImageAnalysis {
            image,
            registry_user,
            registry_password,
            no_registry_tls_verify,
            submit,
        } => {
            if registry_user.is_some() != registry_password.is_some() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("registry credentials need both a user and a password")
                    .with_hint("Pass --registry-user and --registry-password together."));
            }
            let config = load_service_config(globals)?;
            let options = ImageAnalysisOptions {
                registry_user,
                registry_password,
                verify_tls: !no_registry_tls_verify,
                force: submit.force,
                debug: submit.debug,
                nowait: submit.no_wait,
            };
            let client = ThothClient::from_config(&config)?.with_poll_policy(submit.poll_policy()?);
            let outcome = client.image_analysis(&image, &options)?;
            emit_json(outcome_json(&outcome));
            Ok(outcome_exit(&outcome))
        }
        Command::Status { analysis_id } => {
            AnalysisKind::from_id(&analysis_id)?;
            let config = load_service_config(globals)?;
            let client = ThothClient::from_config(&config)?;
            let status = client.status(&analysis_id)?;
            emit_json(json!({
                "analysis_id": analysis_id,
                "status": status,
            }));
            Ok(RunOutcome::ok())
        }
        Command::Log { analysis_id } => {
            AnalysisKind::from_id(&analysis_id)?;
            let config = load_service_config(globals)?;
            let client = ThothClient::from_config(&config)?;
            let log = client.log(&analysis_id)?;
            print!("{log}");
            if !log.ends_with('\n') {
                println!();
            }
            Ok(RunOutcome::ok())
        }
    }
}
