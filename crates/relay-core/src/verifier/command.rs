//! Shell command check
//!
//! Runs `verification_reference` through `sh -c`. Exit status 0 is `met`,
//! anything else `failed`. The last stdout line that parses as a number is
//! reported as the observed value, so `grep -c TODO src/*.rs` works as a
//! threshold check even though grep exits 1 on zero matches.

use super::{CheckError, CheckOutcome, CheckReport, CriterionCheck};
use crate::types::Criterion;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Check that shells out per criterion
#[derive(Debug, Clone)]
pub struct CommandCheck {
    shell: String,
    workdir: Option<PathBuf>,
}

impl Default for CommandCheck {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            workdir: None,
        }
    }
}

impl CommandCheck {
    /// Create check using `sh`
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a different shell (must accept `-c <script>`)
    #[inline]
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run commands from `dir`
    #[inline]
    #[must_use]
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

#[async_trait::async_trait]
impl CriterionCheck for CommandCheck {
    async fn check(&self, criterion: &Criterion) -> Result<CheckReport, CheckError> {
        let script = criterion.verification_reference.trim();
        if script.is_empty() {
            return Err(CheckError::Custom(format!(
                "criterion {} has no verification command",
                criterion.key
            )));
        }

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        tracing::debug!(key = %criterion.key, command = %script, "running check command");
        let output = cmd.output().await.map_err(|source| CheckError::Spawn {
            command: script.to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let outcome = if output.status.success() {
            CheckOutcome::Met
        } else {
            tracing::debug!(
                key = %criterion.key,
                code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "check command exited non-zero"
            );
            CheckOutcome::Failed
        };

        Ok(CheckReport {
            outcome,
            observed_value: last_number(&stdout),
        })
    }
}

/// Last line of `text` that parses as a number
fn last_number(text: &str) -> Option<f64> {
    text.lines()
        .rev()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .next()
}
