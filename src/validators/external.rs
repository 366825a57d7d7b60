// src/validators/external.rs — External Python static analysers
//
// Each rule writes the candidate to a scoped temp file, invokes the tool as
// a subprocess under a per-rule timeout, and parses its output (JSON where
// supported). A missing executable degrades to a passing score with a
// "tool not installed" warning and never blocks the pipeline.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{RuleContext, ValidatorRule};
use crate::core::types::{RuleSeverity, ValidationScore};
use crate::infra::errors::CrucibleError;

/// Outcome of invoking an external tool on a temp file.
pub(crate) enum ToolRun {
    NotInstalled,
    TimedOut,
    Completed {
        stdout: String,
        #[allow(dead_code)]
        stderr: String,
        success: bool,
    },
}

/// Write `code` to a temp file with `suffix` and run
/// `program [args_before] file [args_after]` under `timeout`.
///
/// The temp file is released on every exit path; the subprocess is killed
/// when the timeout expires.
pub(crate) async fn run_on_temp_file(
    program: &str,
    args_before: &[&str],
    args_after: &[&str],
    code: &str,
    suffix: &str,
    timeout: Duration,
) -> Result<ToolRun, CrucibleError> {
    if which::which(program).is_err() {
        return Ok(ToolRun::NotInstalled);
    }

    let file = tempfile::Builder::new()
        .prefix("crucible-")
        .suffix(suffix)
        .tempfile()
        .map_err(CrucibleError::Io)?;
    std::fs::write(file.path(), code).map_err(CrucibleError::Io)?;

    let mut cmd = Command::new(program);
    cmd.args(args_before)
        .arg(file.path())
        .args(args_after)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => return Ok(ToolRun::TimedOut),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ToolRun::NotInstalled)
        }
        Ok(Err(e)) => return Err(CrucibleError::Io(e)),
        Ok(Ok(out)) => out,
    };

    Ok(ToolRun::Completed {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        success: output.status.success(),
    })
}

pub(crate) fn not_installed_score(name: &str, weight: f32) -> ValidationScore {
    ValidationScore::passing(name, 0.9, weight)
        .with_warnings(vec![format!("{} not installed, check skipped", name)])
        .with_severity(RuleSeverity::Warning)
}

pub(crate) fn timed_out_score(name: &str, weight: f32, timeout: Duration) -> ValidationScore {
    ValidationScore::failing(
        name,
        0.0,
        weight,
        vec![format!("{} timed out after {}s", name, timeout.as_secs())],
    )
}

/// Score from diagnostic counts: errors dominate, warnings nibble.
pub(crate) fn diagnostics_score(errors: &[String], warnings: &[String]) -> f32 {
    let deduction = errors.len() as f32 * 0.15 + warnings.len() as f32 * 0.03;
    (1.0 - deduction).max(0.0)
}

// ---------------------------------------------------------------------------
// ruff
// ---------------------------------------------------------------------------

pub struct RuffRule {
    weight: f32,
    timeout: Duration,
}

impl RuffRule {
    pub fn new(weight: f32, timeout: Duration) -> Self {
        Self { weight, timeout }
    }
}

#[async_trait]
impl ValidatorRule for RuffRule {
    fn name(&self) -> &str {
        "static_ruff"
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self, code: &str, _context: &RuleContext) -> Result<ValidationScore, CrucibleError> {
        let run = run_on_temp_file(
            "ruff",
            &["check"],
            &["--output-format=json"],
            code,
            ".py",
            self.timeout,
        )
        .await?;

        match run {
            ToolRun::NotInstalled => Ok(not_installed_score(self.name(), self.weight)),
            ToolRun::TimedOut => Ok(timed_out_score(self.name(), self.weight, self.timeout)),
            ToolRun::Completed { stdout, .. } => {
                let (errors, warnings) = parse_ruff_json(&stdout);
                let score = diagnostics_score(&errors, &warnings);
                if errors.is_empty() {
                    Ok(ValidationScore::passing(self.name(), score, self.weight)
                        .with_warnings(warnings))
                } else {
                    Ok(ValidationScore::failing(self.name(), score, self.weight, errors)
                        .with_warnings(warnings))
                }
            }
        }
    }
}

/// Parse ruff's JSON output: an array of `{code, message, location: {row, column}}`.
pub(crate) fn parse_ruff_json(stdout: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Ok(items) = serde_json::from_str::<serde_json::Value>(stdout) else {
        return (errors, warnings);
    };
    let Some(items) = items.as_array() else {
        return (errors, warnings);
    };

    for item in items {
        let code = item["code"].as_str().unwrap_or("R000");
        let message = item["message"].as_str().unwrap_or("");
        let row = item["location"]["row"].as_u64().unwrap_or(0);
        let text = format!("{} {} (line {})", code, message, row);
        if code.starts_with('W') {
            warnings.push(text);
        } else {
            errors.push(text);
        }
    }
    (errors, warnings)
}

// ---------------------------------------------------------------------------
// mypy
// ---------------------------------------------------------------------------

pub struct MypyRule {
    weight: f32,
    timeout: Duration,
}

impl MypyRule {
    pub fn new(weight: f32, timeout: Duration) -> Self {
        Self { weight, timeout }
    }
}

#[async_trait]
impl ValidatorRule for MypyRule {
    fn name(&self) -> &str {
        "static_mypy"
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self, code: &str, _context: &RuleContext) -> Result<ValidationScore, CrucibleError> {
        let run = run_on_temp_file(
            "mypy",
            &["--no-error-summary", "--no-color-output"],
            &[],
            code,
            ".py",
            self.timeout,
        )
        .await?;

        match run {
            ToolRun::NotInstalled => Ok(not_installed_score(self.name(), self.weight)),
            ToolRun::TimedOut => Ok(timed_out_score(self.name(), self.weight, self.timeout)),
            ToolRun::Completed { stdout, .. } => {
                let (errors, warnings) = parse_mypy_output(&stdout);
                let score = diagnostics_score(&errors, &warnings);
                if errors.is_empty() {
                    Ok(ValidationScore::passing(self.name(), score, self.weight)
                        .with_warnings(warnings))
                } else {
                    Ok(ValidationScore::failing(self.name(), score, self.weight, errors)
                        .with_warnings(warnings))
                }
            }
        }
    }
}

/// Parse mypy line output: `file.py:12: error: message` / `...: note: ...`.
pub(crate) fn parse_mypy_output(stdout: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() || line.contains(": note:") {
            continue;
        }
        if let Some(idx) = line.find(": error: ") {
            let location = &line[..idx];
            let message = &line[idx + 9..];
            let line_no = location.rsplit(':').next().unwrap_or("?");
            errors.push(format!("{} (line {})", message, line_no));
        } else if let Some(idx) = line.find(": warning: ") {
            let message = &line[idx + 11..];
            warnings.push(message.to_string());
        }
    }
    (errors, warnings)
}

// ---------------------------------------------------------------------------
// bandit
// ---------------------------------------------------------------------------

pub struct BanditRule {
    weight: f32,
    timeout: Duration,
}

impl BanditRule {
    pub fn new(weight: f32, timeout: Duration) -> Self {
        Self { weight, timeout }
    }
}

#[async_trait]
impl ValidatorRule for BanditRule {
    fn name(&self) -> &str {
        "static_bandit"
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self, code: &str, _context: &RuleContext) -> Result<ValidationScore, CrucibleError> {
        let run =
            run_on_temp_file("bandit", &["-f", "json", "-q"], &[], code, ".py", self.timeout)
                .await?;

        match run {
            ToolRun::NotInstalled => Ok(not_installed_score(self.name(), self.weight)),
            ToolRun::TimedOut => Ok(timed_out_score(self.name(), self.weight, self.timeout)),
            ToolRun::Completed { stdout, .. } => {
                let (errors, warnings) = parse_bandit_json(&stdout);
                let score = diagnostics_score(&errors, &warnings);
                if errors.is_empty() {
                    Ok(ValidationScore::passing(self.name(), score, self.weight)
                        .with_warnings(warnings))
                } else {
                    Ok(ValidationScore::failing(self.name(), score, self.weight, errors)
                        .with_warnings(warnings))
                }
            }
        }
    }
}

/// Parse bandit JSON: `{results: [{test_id, issue_text, line_number,
/// issue_severity}]}`. HIGH severity issues are errors, the rest warnings.
pub(crate) fn parse_bandit_json(stdout: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Ok(root) = serde_json::from_str::<serde_json::Value>(stdout) else {
        return (errors, warnings);
    };
    let Some(results) = root["results"].as_array() else {
        return (errors, warnings);
    };

    for item in results {
        let test_id = item["test_id"].as_str().unwrap_or("B000");
        let text = item["issue_text"].as_str().unwrap_or("");
        let line = item["line_number"].as_u64().unwrap_or(0);
        let formatted = format!("[SECURITY] {} {} (line {})", test_id, text, line);
        if item["issue_severity"].as_str() == Some("HIGH") {
            errors.push(formatted);
        } else {
            warnings.push(formatted);
        }
    }
    (errors, warnings)
}
