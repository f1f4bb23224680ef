//! Purpose: Read the project's dependency manifests for submission.
//! Exports: `PythonStack`, `read_stack`, `PIPFILE`, `PIPFILE_LOCK`.
//! Role: Bridges `requirements_format` to the payload the service expects.
//! Invariants: A missing lock file is an empty lock, never an error.
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RequirementsFormat;
use crate::core::error::{Error, ErrorKind, map_io_error_kind};

pub const PIPFILE: &str = "Pipfile";
pub const PIPFILE_LOCK: &str = "Pipfile.lock";

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PythonStack {
    pub requirements: String,
    pub requirements_lock: String,
}

impl PythonStack {
    pub fn new(requirements: impl Into<String>, requirements_lock: impl Into<String>) -> Self {
        Self {
            requirements: requirements.into(),
            requirements_lock: requirements_lock.into(),
        }
    }
}

pub fn read_stack(dir: &Path, format: RequirementsFormat) -> Result<PythonStack, Error> {
    match format {
        RequirementsFormat::Pipenv => read_pipenv(dir),
    }
}

fn read_pipenv(dir: &Path) -> Result<PythonStack, Error> {
    let pipfile = dir.join(PIPFILE);
    let requirements = std::fs::read_to_string(&pipfile).map_err(|err| {
        Error::new(map_io_error_kind(&err))
            .with_message("failed to read Pipfile")
            .with_path(&pipfile)
            .with_hint("Run the command from the project root or pass --dir.")
            .with_source(err)
    })?;

    let lock_path = dir.join(PIPFILE_LOCK);
    let requirements_lock = match std::fs::read_to_string(&lock_path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %lock_path.display(), "no lock file, submitting Pipfile only");
            String::new()
        }
        Err(err) => {
            return Err(Error::new(map_io_error_kind(&err))
                .with_message("failed to read Pipfile.lock")
                .with_path(&lock_path)
                .with_source(err));
        }
    };

    if requirements.trim().is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("Pipfile is empty")
            .with_path(&pipfile));
    }
    Ok(PythonStack::new(requirements, requirements_lock))
}

#[cfg(test)]
mod tests {
    use super::{PIPFILE, PIPFILE_LOCK, read_stack};
    use crate::config::RequirementsFormat;
    use crate::core::error::ErrorKind;

    #[test]
    fn reads_pipfile_and_lock() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join(PIPFILE), "[packages]\nflask = \"*\"\n").expect("pipfile");
        std::fs::write(temp.path().join(PIPFILE_LOCK), "{}").expect("lock");
        let stack = read_stack(temp.path(), RequirementsFormat::Pipenv).expect("stack");
        assert!(stack.requirements.contains("flask"));
        assert_eq!(stack.requirements_lock, "{}");
    }

    #[test]
    fn missing_lock_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join(PIPFILE), "[packages]\n").expect("pipfile");
        let stack = read_stack(temp.path(), RequirementsFormat::Pipenv).expect("stack");
        assert!(stack.requirements_lock.is_empty());
    }

    #[test]
    fn missing_pipfile_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = read_stack(temp.path(), RequirementsFormat::Pipenv).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
