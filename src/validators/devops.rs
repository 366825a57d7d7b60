// src/validators/devops.rs — External DevOps analysers
//
// One rule per tool: yamllint, kubeval, kube-linter, tflint, checkov,
// actionlint, ansible-lint, shellcheck, helm-lint, docker-compose.
//
// Each rule merges two diagnostic sources: the external tool's output when
// the binary is installed, and built-in best-practice checks that run
// unconditionally. A missing binary therefore degrades to the built-in
// checks with a "not installed" note instead of silently passing broken
// manifests.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::external::{diagnostics_score, run_on_temp_file, ToolRun};
use super::{RuleContext, ValidatorRule};
use crate::core::types::ValidationScore;
use crate::infra::errors::CrucibleError;

/// All ten DevOps rules with their default weights and timeouts.
pub fn all_devops_rules(default_timeout: Duration) -> Vec<Arc<dyn ValidatorRule>> {
    let t = |secs: u64| default_timeout.max(Duration::from_secs(secs)).min(Duration::from_secs(15));
    vec![
        Arc::new(DevOpsRule::new(Tool::Yamllint, 2.0, t(5))),
        Arc::new(DevOpsRule::new(Tool::Kubeval, 3.0, t(10))),
        Arc::new(DevOpsRule::new(Tool::KubeLinter, 3.0, t(10))),
        Arc::new(DevOpsRule::new(Tool::Tflint, 3.0, t(10))),
        Arc::new(DevOpsRule::new(Tool::Checkov, 3.0, t(15))),
        Arc::new(DevOpsRule::new(Tool::Actionlint, 2.5, t(5))),
        Arc::new(DevOpsRule::new(Tool::AnsibleLint, 2.5, t(10))),
        Arc::new(DevOpsRule::new(Tool::Shellcheck, 3.0, t(5))),
        Arc::new(DevOpsRule::new(Tool::HelmLint, 2.5, t(10))),
        Arc::new(DevOpsRule::new(Tool::DockerCompose, 2.5, t(10))),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Yamllint,
    Kubeval,
    KubeLinter,
    Tflint,
    Checkov,
    Actionlint,
    AnsibleLint,
    Shellcheck,
    HelmLint,
    DockerCompose,
}

impl Tool {
    fn rule_name(&self) -> &'static str {
        match self {
            Tool::Yamllint => "yamllint",
            Tool::Kubeval => "kubeval",
            Tool::KubeLinter => "kube-linter",
            Tool::Tflint => "tflint",
            Tool::Checkov => "checkov",
            Tool::Actionlint => "actionlint",
            Tool::AnsibleLint => "ansible-lint",
            Tool::Shellcheck => "shellcheck",
            Tool::HelmLint => "helm-lint",
            Tool::DockerCompose => "docker-compose",
        }
    }

    fn file_suffix(&self) -> &'static str {
        match self {
            Tool::Tflint => ".tf",
            Tool::Shellcheck => ".sh",
            _ => ".yaml",
        }
    }
}

pub struct DevOpsRule {
    tool: Tool,
    weight: f32,
    timeout: Duration,
}

impl DevOpsRule {
    pub fn new(tool: Tool, weight: f32, timeout: Duration) -> Self {
        Self {
            tool,
            weight,
            timeout,
        }
    }

    async fn run_external(&self, code: &str) -> Result<(Vec<String>, Vec<String>, bool), CrucibleError> {
        // Returns (errors, warnings, tool_available)
        let run = match self.tool {
            Tool::Yamllint => {
                run_on_temp_file("yamllint", &["-f", "parsable"], &[], code, ".yaml", self.timeout)
                    .await?
            }
            Tool::Kubeval => {
                run_on_temp_file("kubeval", &["--output=json"], &[], code, ".yaml", self.timeout)
                    .await?
            }
            Tool::KubeLinter => {
                run_on_temp_file(
                    "kube-linter",
                    &["lint", "--format=json"],
                    &[],
                    code,
                    ".yaml",
                    self.timeout,
                )
                .await?
            }
            Tool::Tflint => return self.run_tflint(code).await,
            Tool::Checkov => {
                run_on_temp_file(
                    "checkov",
                    &["--quiet", "-o", "json", "-f"],
                    &[],
                    code,
                    self.tool.file_suffix(),
                    self.timeout,
                )
                .await?
            }
            Tool::Actionlint => {
                run_on_temp_file("actionlint", &[], &[], code, ".yaml", self.timeout).await?
            }
            Tool::AnsibleLint => {
                run_on_temp_file("ansible-lint", &["-p"], &[], code, ".yaml", self.timeout).await?
            }
            Tool::Shellcheck => {
                run_on_temp_file("shellcheck", &["-f", "json"], &[], code, ".sh", self.timeout)
                    .await?
            }
            Tool::HelmLint => return self.run_helm_lint(code).await,
            Tool::DockerCompose => return self.run_docker_compose(code).await,
        };

        Ok(match run {
            ToolRun::NotInstalled => (vec![], vec![], false),
            ToolRun::TimedOut => (
                vec![format!(
                    "{} timed out after {}s",
                    self.tool.rule_name(),
                    self.timeout.as_secs()
                )],
                vec![],
                true,
            ),
            ToolRun::Completed { stdout, success, .. } => {
                let (errors, warnings) = match self.tool {
                    Tool::Yamllint => parse_yamllint_output(&stdout),
                    Tool::Kubeval => parse_kubeval_json(&stdout, success),
                    Tool::KubeLinter => parse_kube_linter_json(&stdout, success),
                    Tool::Checkov => parse_checkov_json(&stdout),
                    Tool::Actionlint => parse_actionlint_output(&stdout),
                    Tool::AnsibleLint => parse_ansible_lint_output(&stdout),
                    Tool::Shellcheck => parse_shellcheck_json(&stdout),
                    _ => (vec![], vec![]),
                };
                (errors, warnings, true)
            }
        })
    }

    /// tflint operates on a module directory, not a single file.
    async fn run_tflint(&self, code: &str) -> Result<(Vec<String>, Vec<String>, bool), CrucibleError> {
        if which::which("tflint").is_err() {
            return Ok((vec![], vec![], false));
        }
        let dir = tempfile::tempdir().map_err(CrucibleError::Io)?;
        std::fs::write(dir.path().join("main.tf"), code).map_err(CrucibleError::Io)?;

        let mut cmd = Command::new("tflint");
        cmd.args(["--format=json"])
            .current_dir(dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => Ok((
                vec![format!("tflint timed out after {}s", self.timeout.as_secs())],
                vec![],
                true,
            )),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok((vec![], vec![], false)),
            Ok(Err(e)) => Err(CrucibleError::Io(e)),
            Ok(Ok(out)) => {
                let stdout = String::from_utf8_lossy(&out.stdout);
                let (errors, warnings) = parse_tflint_json(&stdout);
                Ok((errors, warnings, true))
            }
        }
    }

    /// helm lint wants a chart layout: build one around the template.
    async fn run_helm_lint(&self, code: &str) -> Result<(Vec<String>, Vec<String>, bool), CrucibleError> {
        if which::which("helm").is_err() {
            return Ok((vec![], vec![], false));
        }
        let dir = tempfile::tempdir().map_err(CrucibleError::Io)?;
        let chart = dir.path().join("chart");
        std::fs::create_dir_all(chart.join("templates")).map_err(CrucibleError::Io)?;
        std::fs::write(
            chart.join("Chart.yaml"),
            "apiVersion: v2\nname: crucible-lint\nversion: 0.1.0\n",
        )
        .map_err(CrucibleError::Io)?;
        std::fs::write(chart.join("templates/manifest.yaml"), code).map_err(CrucibleError::Io)?;

        let mut cmd = Command::new("helm");
        cmd.arg("lint")
            .arg(&chart)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => Ok((
                vec![format!("helm lint timed out after {}s", self.timeout.as_secs())],
                vec![],
                true,
            )),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok((vec![], vec![], false)),
            Ok(Err(e)) => Err(CrucibleError::Io(e)),
            Ok(Ok(out)) => {
                let stdout = String::from_utf8_lossy(&out.stdout);
                let (errors, warnings) = parse_helm_lint_output(&stdout);
                Ok((errors, warnings, true))
            }
        }
    }

    /// `docker compose config` (v2), falling back to `docker-compose` (v1).
    async fn run_docker_compose(
        &self,
        code: &str,
    ) -> Result<(Vec<String>, Vec<String>, bool), CrucibleError> {
        let file = tempfile::Builder::new()
            .prefix("crucible-")
            .suffix(".yaml")
            .tempfile()
            .map_err(CrucibleError::Io)?;
        std::fs::write(file.path(), code).map_err(CrucibleError::Io)?;

        let attempts: [(&str, Vec<&str>); 2] = [
            ("docker", vec!["compose", "-f"]),
            ("docker-compose", vec!["-f"]),
        ];

        for (program, pre) in attempts {
            if which::which(program).is_err() {
                continue;
            }
            let mut cmd = Command::new(program);
            cmd.args(&pre)
                .arg(file.path())
                .args(["config", "-q"])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            match tokio::time::timeout(self.timeout, cmd.output()).await {
                Err(_) => {
                    return Ok((
                        vec![format!(
                            "docker-compose timed out after {}s",
                            self.timeout.as_secs()
                        )],
                        vec![],
                        true,
                    ))
                }
                Ok(Err(_)) => continue,
                Ok(Ok(out)) => {
                    if out.status.success() {
                        return Ok((vec![], vec![], true));
                    }
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    let errors: Vec<String> = stderr
                        .lines()
                        .filter(|l| !l.trim().is_empty())
                        .take(5)
                        .map(|l| l.trim().to_string())
                        .collect();
                    return Ok((errors, vec![], true));
                }
            }
        }
        Ok((vec![], vec![], false))
    }

    fn builtin_checks(&self, code: &str) -> (Vec<String>, Vec<String>) {
        match self.tool {
            Tool::Yamllint => builtin_yaml_checks(code),
            Tool::Kubeval => builtin_manifest_shape_checks(code),
            Tool::KubeLinter => builtin_kubernetes_checks(code),
            Tool::Tflint => builtin_hcl_checks(code),
            Tool::Checkov => builtin_terraform_security_checks(code),
            Tool::Actionlint => builtin_actions_checks(code),
            Tool::AnsibleLint => builtin_ansible_checks(code),
            Tool::Shellcheck => builtin_bash_checks(code),
            Tool::HelmLint => builtin_helm_checks(code),
            Tool::DockerCompose => builtin_compose_checks(code),
        }
    }
}

#[async_trait]
impl ValidatorRule for DevOpsRule {
    fn name(&self) -> &str {
        self.tool.rule_name()
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self, code: &str, _context: &RuleContext) -> Result<ValidationScore, CrucibleError> {
        let (mut errors, mut warnings, tool_available) = self.run_external(code).await?;

        let (builtin_errors, builtin_warnings) = self.builtin_checks(code);
        errors.extend(builtin_errors);
        warnings.extend(builtin_warnings);

        if !tool_available {
            warnings.push(format!(
                "{} not installed, built-in checks only",
                self.tool.rule_name()
            ));
        }

        // A clean degraded run reports exactly the missing-tool score.
        let score = if !tool_available && errors.is_empty() {
            0.9
        } else {
            diagnostics_score(&errors, &warnings)
        };

        if errors.is_empty() {
            Ok(ValidationScore::passing(self.name(), score, self.weight).with_warnings(warnings))
        } else {
            Ok(ValidationScore::failing(self.name(), score, self.weight, errors)
                .with_warnings(warnings))
        }
    }
}

// ---------------------------------------------------------------------------
// Output parsers
// ---------------------------------------------------------------------------

/// yamllint parsable format: `file.yaml:3:1: [error] trailing spaces (trailing-spaces)`.
pub(crate) fn parse_yamllint_output(stdout: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.contains("[error]") {
            errors.push(line.to_string());
        } else if line.contains("[warning]") {
            warnings.push(line.to_string());
        }
    }
    (errors, warnings)
}

/// kubeval JSON: array of `{filename, kind, status, errors: [..]}`.
pub(crate) fn parse_kubeval_json(stdout: &str, success: bool) -> (Vec<String>, Vec<String>) {
    if success && stdout.trim().is_empty() {
        return (vec![], vec![]);
    }
    let Ok(items) = serde_json::from_str::<serde_json::Value>(stdout) else {
        if success {
            return (vec![], vec![]);
        }
        return (vec!["kubeval output unparseable".into()], vec![]);
    };
    let mut errors = Vec::new();
    if let Some(items) = items.as_array() {
        for item in items {
            if item["status"].as_str() == Some("invalid") {
                let kind = item["kind"].as_str().unwrap_or("?");
                for e in item["errors"].as_array().unwrap_or(&vec![]) {
                    errors.push(format!("{}: {}", kind, e.as_str().unwrap_or("")));
                }
            }
        }
    }
    (errors, vec![])
}

/// kube-linter JSON: `{"Reports": [{"Check": .., "Diagnostic": {"Message": ..}}]}`.
pub(crate) fn parse_kube_linter_json(stdout: &str, success: bool) -> (Vec<String>, Vec<String>) {
    if success && stdout.trim().is_empty() {
        return (vec![], vec![]);
    }
    let Ok(root) = serde_json::from_str::<serde_json::Value>(stdout) else {
        if success {
            return (vec![], vec![]);
        }
        return (vec!["kube-linter output unparseable".into()], vec![]);
    };
    let mut errors = Vec::new();
    if let Some(reports) = root["Reports"].as_array() {
        for report in reports {
            let check = report["Check"].as_str().unwrap_or("?");
            let message = report["Diagnostic"]["Message"].as_str().unwrap_or("");
            errors.push(format!("[{}] {}", check, message));
        }
    }
    (errors, vec![])
}

/// tflint JSON: `{"issues": [{"rule": {"name", "severity"}, "message"}]}`.
pub(crate) fn parse_tflint_json(stdout: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let Ok(root) = serde_json::from_str::<serde_json::Value>(stdout) else {
        return (errors, warnings);
    };
    if let Some(issues) = root["issues"].as_array() {
        for issue in issues {
            let name = issue["rule"]["name"].as_str().unwrap_or("?");
            let message = issue["message"].as_str().unwrap_or("");
            let text = format!("[{}] {}", name, message);
            if issue["rule"]["severity"].as_str() == Some("error") {
                errors.push(text);
            } else {
                warnings.push(text);
            }
        }
    }
    (errors, warnings)
}

/// checkov JSON: `{"results": {"failed_checks": [{"check_id", "check_name"}]}}`.
pub(crate) fn parse_checkov_json(stdout: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let Ok(root) = serde_json::from_str::<serde_json::Value>(stdout) else {
        return (errors, vec![]);
    };
    if let Some(failed) = root["results"]["failed_checks"].as_array() {
        for check in failed {
            let id = check["check_id"].as_str().unwrap_or("?");
            let name = check["check_name"].as_str().unwrap_or("");
            errors.push(format!("[{}] {}", id, name));
        }
    }
    (errors, vec![])
}

/// actionlint default format: `file:line:col: message [check-name]`.
pub(crate) fn parse_actionlint_output(stdout: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('|') || line.starts_with('^') {
            continue;
        }
        // A diagnostic line has at least file:line:col: prefix
        if line.splitn(4, ':').count() == 4 {
            errors.push(line.to_string());
        }
    }
    (errors, vec![])
}

/// ansible-lint -p format: `file.yml:5: [E403] Package installs should not use latest`.
pub(crate) fn parse_ansible_lint_output(stdout: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(bracket) = line.find('[') {
            let code = &line[bracket..];
            if code.starts_with("[E") {
                errors.push(line.to_string());
            } else if code.starts_with("[W") {
                warnings.push(line.to_string());
            }
        }
    }
    (errors, warnings)
}

/// shellcheck -f json: array of `{line, level, code, message}`.
pub(crate) fn parse_shellcheck_json(stdout: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let Ok(items) = serde_json::from_str::<serde_json::Value>(stdout) else {
        return (errors, warnings);
    };
    if let Some(items) = items.as_array() {
        for item in items {
            let line = item["line"].as_u64().unwrap_or(0);
            let code = item["code"].as_u64().unwrap_or(0);
            let message = item["message"].as_str().unwrap_or("");
            let text = format!("SC{} {} (line {})", code, message, line);
            match item["level"].as_str() {
                Some("error") => errors.push(text),
                _ => warnings.push(text),
            }
        }
    }
    (errors, warnings)
}

/// helm lint lines: `[ERROR] templates/: parse error ...` / `[WARNING] ...`.
pub(crate) fn parse_helm_lint_output(stdout: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.starts_with("[ERROR]") {
            errors.push(line.to_string());
        } else if line.starts_with("[WARNING]") {
            warnings.push(line.to_string());
        }
    }
    (errors, warnings)
}

// ---------------------------------------------------------------------------
// Built-in best-practice checks (run with or without the external tool)
// ---------------------------------------------------------------------------

pub(crate) fn builtin_yaml_checks(code: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for (idx, line) in code.lines().enumerate() {
        if line.starts_with('\t') {
            errors.push(format!("tab indentation is not valid YAML (line {})", idx + 1));
        }
        if line.ends_with(' ') || line.ends_with('\t') {
            warnings.push(format!("trailing whitespace (line {})", idx + 1));
        }
    }
    (errors, warnings)
}

pub(crate) fn builtin_manifest_shape_checks(code: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    if !code.contains("apiVersion:") {
        errors.push("manifest is missing apiVersion".into());
    }
    if !code.contains("kind:") {
        errors.push("manifest is missing kind".into());
    }
    if code.contains("apiVersion: apps/v1beta") {
        errors.push("deprecated apiVersion apps/v1beta*, use apps/v1".into());
    }
    (errors, vec![])
}

pub(crate) fn builtin_kubernetes_checks(code: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    if code.contains(":latest") {
        errors.push("[latest-tag] image uses ':latest' tag, pin a specific version".into());
    }
    if code.contains("kind: Deployment") && !code.contains("resources:") {
        errors.push("[unset-cpu-requirements] deployment has no resource requests/limits".into());
    }
    if code.contains("kind: Deployment") && !code.contains("livenessProbe") {
        warnings.push("[no-liveness-probe] deployment has no health probes".into());
    }
    (errors, warnings)
}

pub(crate) fn builtin_hcl_checks(code: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut depth = 0i32;
    for (idx, line) in code.lines().enumerate() {
        for c in line.chars() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        errors.push(format!("unmatched closing brace (line {})", idx + 1));
                        depth = 0;
                    }
                }
                _ => {}
            }
        }
    }
    if depth > 0 {
        errors.push(format!("{} unclosed brace(s)", depth));
    }
    (errors, vec![])
}

pub(crate) fn builtin_terraform_security_checks(code: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    if code.contains("acl") && code.contains("acl = \"") {
        errors.push("S3 ACL argument is deprecated in AWS provider 5.x".into());
    }
    if code.contains("aws_s3_bucket\"") || code.contains("aws_s3_bucket \"") {
        if !code.contains("aws_s3_bucket_public_access_block") {
            errors.push("S3 bucket has no public access block".into());
        }
        if !code.contains("server_side_encryption") {
            warnings.push("S3 bucket has no encryption configuration".into());
        }
    }
    (errors, warnings)
}

pub(crate) fn builtin_actions_checks(code: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !code.lines().any(|l| l.trim_start().starts_with("on:") || l.trim_end() == "on:") {
        errors.push("workflow has no 'on:' trigger".into());
    }

    const OUTDATED: [(&str, &str); 5] = [
        ("checkout@v2", "checkout@v4"),
        ("checkout@v3", "checkout@v4"),
        ("setup-python@v2", "setup-python@v5"),
        ("setup-python@v3", "setup-python@v5"),
        ("setup-python@v4", "setup-python@v5"),
    ];
    for (old, new) in OUTDATED {
        if code.contains(old) {
            warnings.push(format!("outdated action {}, update to {}", old, new));
        }
    }
    if code.contains("setup-python@") && !code.contains("cache:") {
        warnings.push("setup-python without cache".into());
    }
    (errors, warnings)
}

pub(crate) fn builtin_ansible_checks(code: &str) -> (Vec<String>, Vec<String>) {
    let mut warnings = Vec::new();
    for (idx, line) in code.lines().enumerate() {
        if line.trim() == "state: latest" {
            warnings.push(format!(
                "package installs should pin a version, not 'latest' (line {})",
                idx + 1
            ));
        }
    }
    (vec![], warnings)
}

pub(crate) fn builtin_bash_checks(code: &str) -> (Vec<String>, Vec<String>) {
    let mut warnings = Vec::new();
    let first = code.lines().next().unwrap_or("");
    if !first.starts_with("#!") {
        warnings.push("script has no shebang".into());
    }
    if code.contains('`') {
        warnings.push("legacy backtick substitution, prefer $(...)".into());
    }
    if !code.contains("set -e") && !code.contains("set -euo") {
        warnings.push("no 'set -e'; failures will be ignored".into());
    }
    (vec![], warnings)
}

pub(crate) fn builtin_helm_checks(code: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let open = code.matches("{{").count();
    let close = code.matches("}}").count();
    if open != close {
        errors.push(format!(
            "unbalanced template delimiters: {} '{{{{' vs {} '}}}}'",
            open, close
        ));
    }
    (errors, vec![])
}

pub(crate) fn builtin_compose_checks(code: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    if !code.lines().any(|l| l.trim_end() == "services:") {
        errors.push("compose file has no services section".into());
    }
    if code.lines().any(|l| l.starts_with("version:")) {
        warnings.push("top-level 'version' key is obsolete in Compose v2".into());
    }
    (errors, warnings)
}
