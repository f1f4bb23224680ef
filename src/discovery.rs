//! Purpose: Gather local host facts used to bootstrap a configuration document.
//! Exports: `discover_context`, `HostFacts`, and the pure parsers behind it.
//! Role: Feeds `config::render_default` for the `thamos config` command.
//! Invariants: A failing probe leaves its fact unset; discovery itself never fails.
//! Invariants: Parsers are pure so they can be tested against captured output.
use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::template::TemplateContext;

const OS_RELEASE_PATH: &str = "/etc/os-release";
const CPUINFO_PATH: &str = "/proc/cpuinfo";

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HostFacts {
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub cpu_family: Option<u32>,
    pub cpu_model: Option<u32>,
    pub python_version: Option<String>,
    pub cuda_version: Option<String>,
}

impl HostFacts {
    pub fn probe() -> Self {
        let (os_name, os_version) = read_probe_file(Path::new(OS_RELEASE_PATH))
            .map(|text| parse_os_release(&text))
            .unwrap_or_default();
        let (cpu_family, cpu_model) = read_probe_file(Path::new(CPUINFO_PATH))
            .map(|text| parse_cpuinfo(&text))
            .unwrap_or_default();
        let python_version =
            run_probe("python3", &["--version"]).and_then(|out| parse_python_version(&out));
        let cuda_version =
            run_probe("nvcc", &["--version"]).and_then(|out| parse_nvcc_version(&out));

        Self {
            os_name,
            os_version,
            cpu_family,
            cpu_model,
            python_version,
            cuda_version,
        }
    }

    pub fn to_context(&self) -> TemplateContext {
        let mut context = TemplateContext::new();
        let text_facts = [
            ("os_name", &self.os_name),
            ("os_version", &self.os_version),
            ("python_version", &self.python_version),
            ("cuda_version", &self.cuda_version),
        ];
        for (key, value) in text_facts {
            if let Some(value) = value {
                context.insert(key, value.clone());
            }
        }
        if let Some(family) = self.cpu_family {
            context.insert("cpu_family", family.to_string());
        }
        if let Some(model) = self.cpu_model {
            context.insert("cpu_model", model.to_string());
        }
        context
    }
}

pub fn discover_context() -> TemplateContext {
    HostFacts::probe().to_context()
}

fn read_probe_file(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "host probe file unavailable");
            None
        }
    }
}

fn run_probe(program: &str, args: &[&str]) -> Option<String> {
    let output = match Command::new(program).args(args).output() {
        Ok(output) => output,
        Err(err) => {
            debug!(program, error = %err, "host probe command unavailable");
            return None;
        }
    };
    if !output.status.success() {
        debug!(program, status = ?output.status.code(), "host probe command failed");
        return None;
    }
    // python3 < 3.4 printed its version on stderr.
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Some(text)
}

pub fn parse_os_release(text: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut version = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "ID" => name = Some(value.to_string()),
            "VERSION_ID" => version = Some(value.to_string()),
            _ => {}
        }
    }
    (name, version)
}

pub fn parse_cpuinfo(text: &str) -> (Option<u32>, Option<u32>) {
    let mut family = None;
    let mut model = None;
    for line in text.lines() {
        // Only the first processor block matters.
        if line.trim().is_empty() && (family.is_some() || model.is_some()) {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "cpu family" => family = value.parse().ok(),
            "model" => model = value.parse().ok(),
            _ => {}
        }
    }
    (family, model)
}

/// `Python 3.11.4` -> `3.11`.
pub fn parse_python_version(text: &str) -> Option<String> {
    let version = text
        .split_whitespace()
        .skip_while(|word| !word.eq_ignore_ascii_case("python"))
        .nth(1)?;
    major_minor(version)
}

/// `Cuda compilation tools, release 11.8, V11.8.89` -> `11.8`.
pub fn parse_nvcc_version(text: &str) -> Option<String> {
    let (_, rest) = text.split_once("release ")?;
    let version = rest.split([',', ' ', '\n']).next()?;
    major_minor(version)
}

fn major_minor(version: &str) -> Option<String> {
    let mut parts = version.trim().split('.');
    let major = parts.next().filter(|part| part.parse::<u32>().is_ok())?;
    let minor = parts.next().filter(|part| part.parse::<u32>().is_ok())?;
    Some(format!("{major}.{minor}"))
}
