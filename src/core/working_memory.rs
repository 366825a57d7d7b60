// src/core/working_memory.rs — Structured scratchpad for tool loops
//
// Small models lose track of the original goal after a few tool iterations.
// WorkingMemory extracts facts from tool results deterministically (never
// from LLM output) and produces a compact, budgeted prompt section.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::basename;

pub const MAX_FACTS: usize = 15;
pub const MAX_DECISIONS: usize = 5;
pub const MAX_TOOL_LOG: usize = 10;
pub const MAX_PLAN_STEPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Active,
    Done,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub tool: String,
    pub summary: String,
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingMemory {
    pub goal: String,
    pub plan: Vec<PlanStep>,
    /// Insertion-ordered facts; re-adding a key moves it to the end.
    facts: Vec<(String, String)>,
    decisions: Vec<String>,
    tool_log: Vec<ToolRecord>,
    current_step: usize,
    iteration: u32,
}

impl WorkingMemory {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Default::default()
        }
    }

    // ------------------------------------------------------------------
    // Plan management
    // ------------------------------------------------------------------

    pub fn set_plan(&mut self, steps: &[&str]) {
        self.plan = steps
            .iter()
            .take(MAX_PLAN_STEPS)
            .map(|s| PlanStep {
                description: s.to_string(),
                status: StepStatus::Pending,
            })
            .collect();
        if let Some(first) = self.plan.first_mut() {
            first.status = StepStatus::Active;
        }
        self.current_step = 0;
    }

    pub fn advance_step(&mut self) {
        self.finish_step(StepStatus::Done);
    }

    pub fn skip_step(&mut self) {
        self.finish_step(StepStatus::Skipped);
    }

    fn finish_step(&mut self, status: StepStatus) {
        if self.plan.is_empty() {
            return;
        }
        if let Some(step) = self.plan.get_mut(self.current_step) {
            step.status = status;
        }
        self.current_step += 1;
        if let Some(step) = self.plan.get_mut(self.current_step) {
            step.status = StepStatus::Active;
        }
    }

    pub fn current_step_description(&self) -> &str {
        self.plan
            .get(self.current_step)
            .map(|s| s.description.as_str())
            .unwrap_or("")
    }

    /// e.g. "2/5 steps done"
    pub fn plan_progress(&self) -> String {
        if self.plan.is_empty() {
            return String::new();
        }
        let done = self
            .plan
            .iter()
            .filter(|s| s.status == StepStatus::Done)
            .count();
        format!("{}/{} steps done", done, self.plan.len())
    }

    // ------------------------------------------------------------------
    // Facts and decisions
    // ------------------------------------------------------------------

    /// Store a discovered fact; overwrites and refreshes position when the
    /// key exists, evicts the oldest entry when over capacity.
    pub fn add_fact(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.facts.retain(|(k, _)| *k != key);
        self.facts.push((key, value.into()));
        while self.facts.len() > MAX_FACTS {
            self.facts.remove(0);
        }
    }

    pub fn get_fact(&self, key: &str) -> Option<&str> {
        self.facts
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    pub fn record_decision(&mut self, decision: impl Into<String>) {
        self.decisions.push(decision.into());
        if self.decisions.len() > MAX_DECISIONS {
            let overflow = self.decisions.len() - MAX_DECISIONS;
            self.decisions.drain(..overflow);
        }
    }

    // ------------------------------------------------------------------
    // Tool result processing
    // ------------------------------------------------------------------

    /// Extract a one-line summary and key facts from a tool result. Main
    /// integration point, called after every tool execution.
    pub fn update_from_tool_result(&mut self, tool_name: &str, params: &Value, result: &Value) {
        self.iteration += 1;
        let success = result["success"].as_bool().unwrap_or(true);
        let summary = extract_summary(tool_name, params, result);

        self.tool_log.push(ToolRecord {
            tool: tool_name.to_string(),
            summary,
            success,
        });
        if self.tool_log.len() > MAX_TOOL_LOG {
            let overflow = self.tool_log.len() - MAX_TOOL_LOG;
            self.tool_log.drain(..overflow);
        }

        if !success {
            let message = result["error"].as_str().unwrap_or("unknown error");
            let message: String = message.chars().take(200).collect();
            self.add_fact(format!("error_{}", self.iteration), message);
            return;
        }

        match tool_name {
            "read" => self.extract_read_facts(params, result),
            "grep" => self.extract_grep_facts(params, result),
            "bash" | "git" => self.extract_bash_facts(tool_name, params, result),
            "glob" => self.extract_glob_facts(params, result),
            "edit" | "write" => self.extract_write_facts(tool_name, params),
            "ls" => self.extract_ls_facts(params, result),
            _ => {}
        }
    }

    fn extract_read_facts(&mut self, params: &Value, result: &Value) {
        let path = file_path_param(params);
        let content = result["content"].as_str().unwrap_or("");
        let total_lines = result["total_lines"]
            .as_u64()
            .unwrap_or_else(|| content.lines().count() as u64);
        let preview: String = content
            .chars()
            .take(300)
            .map(|c| if c == '\n' { ' ' } else { c })
            .collect();
        let preview = preview.trim();
        if !preview.is_empty() {
            self.add_fact(
                format!("file:{}", basename(path)),
                format!("{} lines. {}...", total_lines, preview),
            );
        }
    }

    fn extract_grep_facts(&mut self, params: &Value, result: &Value) {
        let pattern = params["pattern"].as_str().unwrap_or("?");
        let key = format!("grep:{}", crate::util::truncate_chars(pattern, 30));
        let matches = result["matches"].as_array().cloned().unwrap_or_default();
        if matches.is_empty() {
            self.add_fact(key, "no matches");
            return;
        }
        let mut files: Vec<&str> = matches
            .iter()
            .take(10)
            .filter_map(|m| m["file"].as_str())
            .collect();
        files.dedup();
        let first_lines: Vec<String> = matches
            .iter()
            .take(3)
            .filter_map(|m| m["line"].as_str())
            .map(|l| crate::util::truncate_chars(l, 80).to_string())
            .collect();
        self.add_fact(
            key,
            format!(
                "{} matches in {:?}. First: {:?}",
                matches.len(),
                files,
                first_lines
            ),
        );
    }

    fn extract_bash_facts(&mut self, tool: &str, params: &Value, result: &Value) {
        let cmd = params["command"].as_str().unwrap_or("?");
        let exit_code = result["exit_code"].as_i64().unwrap_or(0);
        let stdout = result["stdout"].as_str().unwrap_or("");
        let stderr = result["stderr"].as_str().unwrap_or("");
        let output = if stdout.is_empty() { stderr } else { stdout };
        let output = crate::util::truncate_chars(output, 200).trim();
        self.add_fact(
            format!("{}:{}", tool, crate::util::truncate_chars(cmd, 25)),
            format!("exit={}. {}", exit_code, output),
        );
    }

    fn extract_glob_facts(&mut self, params: &Value, result: &Value) {
        let pattern = params["pattern"].as_str().unwrap_or("?");
        let files = result["files"].as_array().cloned().unwrap_or_default();
        let names: Vec<&str> = files
            .iter()
            .take(8)
            .filter_map(|f| f.as_str())
            .map(basename)
            .collect();
        self.add_fact(
            format!("glob:{}", crate::util::truncate_chars(pattern, 25)),
            format!("{} files: {:?}", files.len(), names),
        );
    }

    fn extract_write_facts(&mut self, tool: &str, params: &Value) {
        let path = file_path_param(params);
        self.add_fact(
            format!("modified:{}", basename(path)),
            format!("{} applied successfully", tool),
        );
    }

    fn extract_ls_facts(&mut self, params: &Value, result: &Value) {
        let path = params["path"]
            .as_str()
            .or_else(|| params["directory"].as_str())
            .unwrap_or(".");
        let items = result["items"].as_array().cloned().unwrap_or_default();
        let names: Vec<&str> = items
            .iter()
            .take(8)
            .filter_map(|i| i["name"].as_str())
            .collect();
        self.add_fact(
            format!("ls:{}", basename(path)),
            format!("{} items: {:?}", items.len(), names),
        );
    }

    // ------------------------------------------------------------------
    // Compact output
    // ------------------------------------------------------------------

    /// Structured memory section for the LLM prompt, at most `max_chars`
    /// characters. Truncation never cuts a section header in half: sections
    /// are added whole until the budget is reached, then a marker is added.
    pub fn compact(&self, max_chars: usize) -> String {
        const TRUNCATION_MARK: &str = "\n[...truncated]";
        let mut sections: Vec<String> = Vec::new();

        if !self.goal.is_empty() {
            sections.push(format!("GOAL: {}", crate::util::truncate_chars(&self.goal, 200)));
        }

        if !self.plan.is_empty() {
            let lines: Vec<String> = self
                .plan
                .iter()
                .enumerate()
                .map(|(i, step)| {
                    let icon = match step.status {
                        StepStatus::Done => "done",
                        StepStatus::Active => ">>>",
                        StepStatus::Skipped => "skip",
                        StepStatus::Pending => "...",
                    };
                    format!(
                        "  [{}] {}. {}",
                        icon,
                        i + 1,
                        crate::util::truncate_chars(&step.description, 60)
                    )
                })
                .collect();
            sections.push(format!("PLAN:\n{}", lines.join("\n")));
        }

        if !self.facts.is_empty() {
            let lines: Vec<String> = self
                .facts
                .iter()
                .map(|(k, v)| format!("  - {}: {}", k, crate::util::truncate_chars(v, 120)))
                .collect();
            sections.push(format!("FACTS:\n{}", lines.join("\n")));
        }

        if !self.decisions.is_empty() {
            let lines: Vec<String> = self
                .decisions
                .iter()
                .map(|d| format!("  - {}", crate::util::truncate_chars(d, 100)))
                .collect();
            sections.push(format!("DECISIONS:\n{}", lines.join("\n")));
        }

        if !self.tool_log.is_empty() {
            let recent: Vec<&str> = self
                .tool_log
                .iter()
                .rev()
                .take(5)
                .rev()
                .map(|r| r.summary.as_str())
                .collect();
            sections.push(format!("RECENT: {}", recent.join(" | ")));
        }

        let mut output = String::from("## Working Memory");
        for section in sections {
            let addition_len = 1 + section.chars().count();
            if output.chars().count() + addition_len + TRUNCATION_MARK.len() > max_chars {
                output.push_str(TRUNCATION_MARK);
                break;
            }
            output.push('\n');
            output.push_str(&section);
        }

        if output.chars().count() > max_chars {
            let keep = max_chars.saturating_sub(TRUNCATION_MARK.len());
            let cut: String = output.chars().take(keep).collect();
            output = cut + TRUNCATION_MARK;
            if output.chars().count() > max_chars {
                output = output.chars().take(max_chars).collect();
            }
        }
        output
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn file_path_param(params: &Value) -> &str {
    params["file_path"]
        .as_str()
        .or_else(|| params["path"].as_str())
        .unwrap_or("unknown")
}

fn extract_summary(tool: &str, params: &Value, result: &Value) -> String {
    let success = result["success"].as_bool().unwrap_or(true);
    let status = if success { "OK" } else { "FAIL" };

    match tool {
        "read" => {
            let path = file_path_param(params);
            let lines = result["total_lines"]
                .as_u64()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".into());
            format!("read({}) -> {} lines [{}]", basename(path), lines, status)
        }
        "grep" => {
            let pattern = params["pattern"].as_str().unwrap_or("?");
            let matches = result["matches"].as_array().map(|a| a.len()).unwrap_or(0);
            format!("grep({}) -> {} matches [{}]", pattern, matches, status)
        }
        "bash" | "git" => {
            let cmd = params["command"].as_str().unwrap_or("?");
            format!("{}({}) [{}]", tool, crate::util::truncate_chars(cmd, 40), status)
        }
        "glob" => {
            let pattern = params["pattern"].as_str().unwrap_or("?");
            let files = result["files"].as_array().map(|a| a.len()).unwrap_or(0);
            format!("glob({}) -> {} files [{}]", pattern, files, status)
        }
        "edit" | "write" => {
            let path = file_path_param(params);
            format!("{}({}) [{}]", tool, basename(path), status)
        }
        "ls" => {
            let path = params["path"]
                .as_str()
                .or_else(|| params["directory"].as_str())
                .unwrap_or("?");
            let items = result["items"].as_array().map(|a| a.len()).unwrap_or(0);
            format!("ls({}) -> {} items [{}]", basename(path), items, status)
        }
        _ => format!("{}() [{}]", tool, status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ─── Plan management ────────────────────────────────────────

    #[test]
    fn test_set_plan_activates_first() {
        let mut m = WorkingMemory::new("fix the bug");
        m.set_plan(&["Read app.py", "Find the import", "Fix it"]);
        assert_eq!(m.plan[0].status, StepStatus::Active);
        assert_eq!(m.plan[1].status, StepStatus::Pending);
        assert_eq!(m.current_step_description(), "Read app.py");
    }

    #[test]
    fn test_advance_step() {
        let mut m = WorkingMemory::new("g");
        m.set_plan(&["a", "b"]);
        m.advance_step();
        assert_eq!(m.plan[0].status, StepStatus::Done);
        assert_eq!(m.plan[1].status, StepStatus::Active);
        assert_eq!(m.plan_progress(), "1/2 steps done");
    }

    #[test]
    fn test_skip_step() {
        let mut m = WorkingMemory::new("g");
        m.set_plan(&["a", "b"]);
        m.skip_step();
        assert_eq!(m.plan[0].status, StepStatus::Skipped);
        assert_eq!(m.plan[1].status, StepStatus::Active);
    }

    #[test]
    fn test_advance_past_end() {
        let mut m = WorkingMemory::new("g");
        m.set_plan(&["a"]);
        m.advance_step();
        m.advance_step();
        assert_eq!(m.current_step_description(), "");
    }

    #[test]
    fn test_plan_capped() {
        let mut m = WorkingMemory::new("g");
        let steps: Vec<String> = (0..15).map(|i| format!("step {}", i)).collect();
        let refs: Vec<&str> = steps.iter().map(|s| s.as_str()).collect();
        m.set_plan(&refs);
        assert_eq!(m.plan.len(), MAX_PLAN_STEPS);
    }

    // ─── Facts ──────────────────────────────────────────────────

    #[test]
    fn test_fact_overwrite_refreshes() {
        let mut m = WorkingMemory::new("g");
        m.add_fact("a", "1");
        m.add_fact("b", "2");
        m.add_fact("a", "3");
        assert_eq!(m.get_fact("a"), Some("3"));
        assert_eq!(m.fact_count(), 2);
    }

    #[test]
    fn test_fact_lru_eviction() {
        let mut m = WorkingMemory::new("g");
        for i in 0..(MAX_FACTS + 3) {
            m.add_fact(format!("k{}", i), "v");
        }
        assert_eq!(m.fact_count(), MAX_FACTS);
        assert!(m.get_fact("k0").is_none());
        assert!(m.get_fact("k17").is_some());
    }

    #[test]
    fn test_decisions_capped() {
        let mut m = WorkingMemory::new("g");
        for i in 0..8 {
            m.record_decision(format!("d{}", i));
        }
        assert_eq!(m.decisions.len(), MAX_DECISIONS);
        assert_eq!(m.decisions[0], "d3");
    }

    // ─── Tool result extraction ─────────────────────────────────

    #[test]
    fn test_read_extraction() {
        let mut m = WorkingMemory::new("g");
        m.update_from_tool_result(
            "read",
            &json!({"file_path": "core/agent.py"}),
            &json!({"success": true, "content": "import os\nimport sys\n", "total_lines": 45}),
        );
        let fact = m.get_fact("file:agent.py").unwrap();
        assert!(fact.contains("45 lines"));
        assert!(fact.contains("import os"));
        assert_eq!(m.tool_log.len(), 1);
        assert_eq!(m.tool_log[0].summary, "read(agent.py) -> 45 lines [OK]");
    }

    #[test]
    fn test_grep_extraction() {
        let mut m = WorkingMemory::new("g");
        m.update_from_tool_result(
            "grep",
            &json!({"pattern": "TODO"}),
            &json!({"success": true, "matches": [
                {"file": "a.py", "line": "# TODO fix"},
                {"file": "b.py", "line": "# TODO later"}
            ]}),
        );
        let fact = m.get_fact("grep:TODO").unwrap();
        assert!(fact.contains("2 matches"));
    }

    #[test]
    fn test_grep_no_matches() {
        let mut m = WorkingMemory::new("g");
        m.update_from_tool_result(
            "grep",
            &json!({"pattern": "xyzzy"}),
            &json!({"success": true, "matches": []}),
        );
        assert_eq!(m.get_fact("grep:xyzzy"), Some("no matches"));
    }

    #[test]
    fn test_bash_extraction() {
        let mut m = WorkingMemory::new("g");
        m.update_from_tool_result(
            "bash",
            &json!({"command": "pytest -q"}),
            &json!({"success": true, "exit_code": 1, "stdout": "", "stderr": "2 failed"}),
        );
        let fact = m.get_fact("bash:pytest -q").unwrap();
        assert!(fact.contains("exit=1"));
        assert!(fact.contains("2 failed"));
    }

    #[test]
    fn test_glob_extraction() {
        let mut m = WorkingMemory::new("g");
        m.update_from_tool_result(
            "glob",
            &json!({"pattern": "**/*.py"}),
            &json!({"success": true, "files": ["src/a.py", "src/b.py"]}),
        );
        let fact = m.get_fact("glob:**/*.py").unwrap();
        assert!(fact.contains("2 files"));
        assert!(fact.contains("a.py"));
    }

    #[test]
    fn test_write_extraction() {
        let mut m = WorkingMemory::new("g");
        m.update_from_tool_result(
            "edit",
            &json!({"file_path": "src/main.rs"}),
            &json!({"success": true}),
        );
        assert!(m.get_fact("modified:main.rs").unwrap().contains("edit"));
    }

    #[test]
    fn test_ls_extraction() {
        let mut m = WorkingMemory::new("g");
        m.update_from_tool_result(
            "ls",
            &json!({"path": "core"}),
            &json!({"success": true, "items": [{"name": "agent.py"}, {"name": "tools.py"}]}),
        );
        assert!(m.get_fact("ls:core").unwrap().contains("2 items"));
    }

    #[test]
    fn test_failed_tool_records_error_fact() {
        let mut m = WorkingMemory::new("g");
        m.update_from_tool_result(
            "read",
            &json!({"file_path": "missing.py"}),
            &json!({"success": false, "error": "file not found"}),
        );
        assert_eq!(m.get_fact("error_1"), Some("file not found"));
        assert!(!m.tool_log[0].success);
        assert!(m.tool_log[0].summary.contains("FAIL"));
    }

    #[test]
    fn test_tool_log_capped() {
        let mut m = WorkingMemory::new("g");
        for i in 0..15 {
            m.update_from_tool_result(
                "bash",
                &json!({"command": format!("cmd{}", i)}),
                &json!({"success": true, "exit_code": 0, "stdout": "ok"}),
            );
        }
        assert_eq!(m.tool_log.len(), MAX_TOOL_LOG);
    }

    // ─── Compact ────────────────────────────────────────────────

    #[test]
    fn test_compact_has_sections() {
        let mut m = WorkingMemory::new("fix the import error");
        m.set_plan(&["read", "fix"]);
        m.add_fact("file:app.py", "45 lines");
        m.record_decision("use absolute imports");
        m.update_from_tool_result(
            "read",
            &json!({"file_path": "app.py"}),
            &json!({"success": true, "content": "x", "total_lines": 45}),
        );

        let out = m.compact(2000);
        assert!(out.starts_with("## Working Memory"));
        assert!(out.contains("GOAL: fix the import error"));
        assert!(out.contains("PLAN:"));
        assert!(out.contains("[>>>] 1. read"));
        assert!(out.contains("FACTS:"));
        assert!(out.contains("DECISIONS:"));
        assert!(out.contains("RECENT:"));
    }

    #[test]
    fn test_compact_respects_budget() {
        let mut m = WorkingMemory::new("g".repeat(100));
        for i in 0..MAX_FACTS {
            m.add_fact(format!("key{}", i), "v".repeat(100));
        }
        for budget in [100usize, 300, 500, 2000] {
            let out = m.compact(budget);
            assert!(
                out.chars().count() <= budget,
                "budget {} exceeded: {}",
                budget,
                out.len()
            );
        }
    }

    #[test]
    fn test_compact_never_splits_section_header() {
        let mut m = WorkingMemory::new("short goal");
        for i in 0..10 {
            m.add_fact(format!("key{}", i), "value".repeat(20));
        }
        let out = m.compact(200);
        // Either the FACTS section is present in full form or absent; a bare
        // partial header must not appear at the end.
        if let Some(idx) = out.find("FACTS") {
            assert!(out[idx..].starts_with("FACTS:\n"));
        }
    }

    #[test]
    fn test_compact_empty_memory() {
        let m = WorkingMemory::default();
        assert_eq!(m.compact(500), "## Working Memory");
    }

    // ─── Serde round-trip + clear ───────────────────────────────

    #[test]
    fn test_serde_roundtrip() {
        let mut m = WorkingMemory::new("goal");
        m.set_plan(&["a", "b"]);
        m.advance_step();
        m.add_fact("k", "v");
        m.record_decision("d");

        let json = serde_json::to_string(&m).unwrap();
        let back: WorkingMemory = serde_json::from_str(&json).unwrap();
        assert_eq!(back.goal, "goal");
        assert_eq!(back.plan.len(), 2);
        assert_eq!(back.plan[0].status, StepStatus::Done);
        assert_eq!(back.get_fact("k"), Some("v"));
        assert_eq!(back.current_step_description(), "b");
    }

    #[test]
    fn test_clear() {
        let mut m = WorkingMemory::new("goal");
        m.add_fact("k", "v");
        m.clear();
        assert!(m.goal.is_empty());
        assert_eq!(m.fact_count(), 0);
        assert_eq!(m.compact(500), "## Working Memory");
    }
}
