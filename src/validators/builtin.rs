// src/validators/builtin.rs — Always-available validation rules
//
// These rules run without any external tooling. The syntax check is
// structural (bracket/quote balance, block-colon and indentation checks);
// full-fidelity Python diagnostics come from the external analysers when
// those are installed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{RuleContext, ValidatorRule};
use crate::core::types::{RuleSeverity, ValidationScore};
use crate::infra::errors::CrucibleError;
use crate::oss::pattern_store::PatternStore;

// ---------------------------------------------------------------------------
// ast_syntax
// ---------------------------------------------------------------------------

/// Structural syntax check. Fails fast: a candidate with broken syntax is
/// not worth running the remaining rules on.
pub struct AstSyntaxRule {
    weight: f32,
}

impl AstSyntaxRule {
    pub fn new(weight: f32) -> Self {
        Self { weight }
    }
}

#[async_trait]
impl ValidatorRule for AstSyntaxRule {
    fn name(&self) -> &str {
        "ast_syntax"
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(2)
    }

    async fn check(&self, code: &str, _context: &RuleContext) -> Result<ValidationScore, CrucibleError> {
        let errors = python_syntax_errors(code);
        if errors.is_empty() {
            Ok(ValidationScore::passing(self.name(), 1.0, self.weight))
        } else {
            Ok(ValidationScore::failing(self.name(), 0.0, self.weight, errors))
        }
    }
}

/// Structural Python syntax errors: unbalanced brackets, unterminated
/// strings, block statements without a trailing colon.
pub fn python_syntax_errors(code: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if code.trim().is_empty() {
        errors.push("SyntaxError: empty code".into());
        return errors;
    }

    errors.extend(bracket_errors(code));
    errors.extend(block_colon_errors(code));
    errors
}

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        '{' => '}',
        _ => open,
    }
}

/// Scan for unbalanced brackets and unterminated strings, skipping over
/// string literals and comments.
fn bracket_errors(code: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut in_string: Option<char> = None;
    let mut triple = false;
    let mut escaped = false;
    let mut string_start_line = 0usize;

    let chars: Vec<char> = code.chars().collect();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            // Single-quoted strings do not span lines.
            if in_string.is_some() && !triple {
                errors.push(format!(
                    "SyntaxError: unterminated string literal (line {})",
                    string_start_line
                ));
                in_string = None;
            }
            escaped = false;
            i += 1;
            continue;
        }

        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                if triple {
                    if i + 2 < chars.len() && chars[i + 1] == quote && chars[i + 2] == quote {
                        in_string = None;
                        triple = false;
                        i += 3;
                        continue;
                    }
                } else {
                    in_string = None;
                }
            }
            i += 1;
            continue;
        }

        match c {
            '#' => {
                // Comment: skip to end of line
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '\'' | '"' => {
                in_string = Some(c);
                string_start_line = line;
                if i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c {
                    triple = true;
                    i += 3;
                    continue;
                }
                triple = false;
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => match stack.pop() {
                None => errors.push(format!(
                    "SyntaxError: unmatched closing '{}' (line {})",
                    c, line
                )),
                Some((open, open_line)) => {
                    if closing_for(open) != c {
                        errors.push(format!(
                            "SyntaxError: mismatched '{}' opened on line {} closed by '{}' on line {}",
                            open, open_line, c, line
                        ));
                    }
                }
            },
            _ => {}
        }
        i += 1;
    }

    if in_string.is_some() {
        errors.push(format!(
            "SyntaxError: unterminated string literal (line {})",
            string_start_line
        ));
    }
    for (open, open_line) in stack {
        errors.push(format!(
            "SyntaxError: unclosed '{}' (line {})",
            open, open_line
        ));
    }
    errors
}

const BLOCK_KEYWORDS: [&str; 11] = [
    "def", "class", "if", "elif", "else", "for", "while", "try", "except", "finally", "with",
];

/// Block statements must end with a colon (ignoring trailing comments and
/// explicit line continuations).
fn block_colon_errors(code: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let mut open_brackets = 0i32;

    for (idx, raw) in code.lines().enumerate() {
        let line = strip_comment(raw);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let starts_block = BLOCK_KEYWORDS.iter().any(|kw| {
            trimmed == *kw
                || trimmed.starts_with(&format!("{} ", kw))
                || trimmed.starts_with(&format!("{}(", kw))
                || trimmed.starts_with(&format!("{}:", kw))
        });

        let balance: i32 = trimmed
            .chars()
            .map(|c| match c {
                '(' | '[' | '{' => 1,
                ')' | ']' | '}' => -1,
                _ => 0,
            })
            .sum();

        if starts_block
            && open_brackets == 0
            && balance == 0
            && !trimmed.ends_with(':')
            && !trimmed.ends_with('\\')
        {
            errors.push(format!(
                "SyntaxError: expected ':' at end of block statement (line {})",
                idx + 1
            ));
        }

        open_brackets = (open_brackets + balance).max(0);
    }
    errors
}

fn strip_comment(line: &str) -> &str {
    // Good enough for line-level checks: a '#' outside quotes starts a comment.
    let mut in_string: Option<char> = None;
    for (i, c) in line.char_indices() {
        match in_string {
            Some(q) if c == q => in_string = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => in_string = Some(c),
                '#' => return &line[..i],
                _ => {}
            },
        }
    }
    line
}

// ---------------------------------------------------------------------------
// no_forbidden_imports
// ---------------------------------------------------------------------------

const FORBIDDEN_IMPORTS: [&str; 5] = ["telnetlib", "ftplib", "pickle", "marshal", "shelve"];
const SUSPICIOUS_IMPORTS: [&str; 3] = ["subprocess", "socket", "ctypes"];

pub struct ForbiddenImportsRule {
    weight: f32,
}

impl ForbiddenImportsRule {
    pub fn new(weight: f32) -> Self {
        Self { weight }
    }
}

#[async_trait]
impl ValidatorRule for ForbiddenImportsRule {
    fn name(&self) -> &str {
        "no_forbidden_imports"
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    async fn check(&self, code: &str, _context: &RuleContext) -> Result<ValidationScore, CrucibleError> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for (idx, raw) in code.lines().enumerate() {
            let line = raw.trim();
            let imported = if let Some(rest) = line.strip_prefix("import ") {
                Some(rest)
            } else {
                line.strip_prefix("from ")
            };
            let Some(imported) = imported else { continue };
            let module = imported
                .split([' ', '.', ','])
                .next()
                .unwrap_or("")
                .trim();

            if FORBIDDEN_IMPORTS.contains(&module) {
                errors.push(format!(
                    "Forbidden import '{}' (line {})",
                    module,
                    idx + 1
                ));
            } else if SUSPICIOUS_IMPORTS.contains(&module) {
                warnings.push(format!(
                    "Import '{}' needs review (line {})",
                    module,
                    idx + 1
                ));
            }
        }

        if errors.is_empty() {
            let score = if warnings.is_empty() { 1.0 } else { 0.9 };
            Ok(ValidationScore::passing(self.name(), score, self.weight).with_warnings(warnings))
        } else {
            Ok(ValidationScore::failing(self.name(), 0.0, self.weight, errors)
                .with_warnings(warnings))
        }
    }
}

// ---------------------------------------------------------------------------
// no_eval_exec
// ---------------------------------------------------------------------------

pub struct NoEvalExecRule {
    weight: f32,
}

impl NoEvalExecRule {
    pub fn new(weight: f32) -> Self {
        Self { weight }
    }
}

#[async_trait]
impl ValidatorRule for NoEvalExecRule {
    fn name(&self) -> &str {
        "no_eval_exec"
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    async fn check(&self, code: &str, _context: &RuleContext) -> Result<ValidationScore, CrucibleError> {
        const BANNED: [&str; 3] = ["eval(", "exec(", "__import__("];
        let mut errors = Vec::new();

        for (idx, raw) in code.lines().enumerate() {
            let line = strip_comment(raw);
            for banned in BANNED {
                if let Some(pos) = line.find(banned) {
                    // Skip method calls like obj.eval(...)
                    let preceded_by_dot = pos > 0 && line.as_bytes()[pos - 1] == b'.';
                    if !preceded_by_dot {
                        errors.push(format!(
                            "Dynamic execution '{}' detected (line {})",
                            banned.trim_end_matches('('),
                            idx + 1
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(ValidationScore::passing(self.name(), 1.0, self.weight))
        } else {
            Ok(ValidationScore::failing(self.name(), 0.0, self.weight, errors))
        }
    }
}

// ---------------------------------------------------------------------------
// code_length
// ---------------------------------------------------------------------------

pub struct CodeLengthRule {
    weight: f32,
}

impl CodeLengthRule {
    pub fn new(weight: f32) -> Self {
        Self { weight }
    }
}

#[async_trait]
impl ValidatorRule for CodeLengthRule {
    fn name(&self) -> &str {
        "code_length"
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Warning
    }

    async fn check(&self, code: &str, _context: &RuleContext) -> Result<ValidationScore, CrucibleError> {
        let lines = code.lines().filter(|l| !l.trim().is_empty()).count();

        if lines == 0 {
            return Ok(ValidationScore::failing(
                self.name(),
                0.0,
                self.weight,
                vec!["Generated code is empty".into()],
            ));
        }
        if lines > 500 {
            return Ok(ValidationScore::failing(
                self.name(),
                0.3,
                self.weight,
                vec![format!("Code too long: {} non-empty lines (max 500)", lines)],
            ));
        }

        let mut warnings = Vec::new();
        let mut score = 1.0;
        if lines > 200 {
            warnings.push(format!("Code is long: {} non-empty lines", lines));
            score = 0.8;
        }
        Ok(ValidationScore::passing(self.name(), score, self.weight).with_warnings(warnings))
    }
}

// ---------------------------------------------------------------------------
// complexity
// ---------------------------------------------------------------------------

pub struct ComplexityRule {
    weight: f32,
}

impl ComplexityRule {
    pub fn new(weight: f32) -> Self {
        Self { weight }
    }
}

#[async_trait]
impl ValidatorRule for ComplexityRule {
    fn name(&self) -> &str {
        "complexity"
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Warning
    }

    async fn check(&self, code: &str, _context: &RuleContext) -> Result<ValidationScore, CrucibleError> {
        const BRANCH_KEYWORDS: [&str; 7] = ["if ", "elif ", "for ", "while ", "except", "and ", "or "];

        let branches: usize = code
            .lines()
            .map(|l| {
                let t = l.trim_start();
                BRANCH_KEYWORDS
                    .iter()
                    .filter(|kw| t.starts_with(**kw) || t.contains(&format!(" {}", kw)))
                    .count()
            })
            .sum();

        let max_indent = code
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.len() - l.trim_start().len())
            .max()
            .unwrap_or(0);

        let mut warnings = Vec::new();
        let mut score: f32 = 1.0;

        if branches > 25 {
            warnings.push(format!("High branch count: {}", branches));
            score -= 0.3;
        } else if branches > 15 {
            warnings.push(format!("Elevated branch count: {}", branches));
            score -= 0.15;
        }

        // Indentation depth as a nesting proxy (4 spaces per level)
        if max_indent > 20 {
            warnings.push(format!("Deep nesting: indent {} chars", max_indent));
            score -= 0.2;
        }

        Ok(ValidationScore::passing(self.name(), score.max(0.2), self.weight)
            .with_warnings(warnings))
    }
}

// ---------------------------------------------------------------------------
// docstring
// ---------------------------------------------------------------------------

pub struct DocstringRule {
    weight: f32,
}

impl DocstringRule {
    pub fn new(weight: f32) -> Self {
        Self { weight }
    }
}

#[async_trait]
impl ValidatorRule for DocstringRule {
    fn name(&self) -> &str {
        "docstring"
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Info
    }

    async fn check(&self, code: &str, _context: &RuleContext) -> Result<ValidationScore, CrucibleError> {
        let lines: Vec<&str> = code.lines().collect();
        let mut total = 0usize;
        let mut documented = 0usize;
        let mut warnings = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            let t = line.trim_start();
            if !(t.starts_with("def ") || t.starts_with("async def ") || t.starts_with("class ")) {
                continue;
            }
            total += 1;
            let next = lines
                .iter()
                .skip(idx + 1)
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim())
                .unwrap_or("");
            if next.starts_with("\"\"\"") || next.starts_with("'''") {
                documented += 1;
            } else {
                let name = t
                    .trim_start_matches("async ")
                    .trim_start_matches("def ")
                    .trim_start_matches("class ")
                    .split(['(', ':'])
                    .next()
                    .unwrap_or("?");
                warnings.push(format!("Missing docstring: {} (line {})", name, idx + 1));
            }
        }

        let score = if total == 0 {
            1.0
        } else {
            0.5 + 0.5 * (documented as f32 / total as f32)
        };
        Ok(ValidationScore::passing(self.name(), score, self.weight).with_warnings(warnings))
    }
}

// ---------------------------------------------------------------------------
// type_hints
// ---------------------------------------------------------------------------

pub struct TypeHintsRule {
    weight: f32,
}

impl TypeHintsRule {
    pub fn new(weight: f32) -> Self {
        Self { weight }
    }
}

#[async_trait]
impl ValidatorRule for TypeHintsRule {
    fn name(&self) -> &str {
        "type_hints"
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Info
    }

    async fn check(&self, code: &str, _context: &RuleContext) -> Result<ValidationScore, CrucibleError> {
        let mut total = 0usize;
        let mut hinted = 0usize;
        let mut warnings = Vec::new();

        for (idx, line) in code.lines().enumerate() {
            let t = line.trim_start();
            if !(t.starts_with("def ") || t.starts_with("async def ")) {
                continue;
            }
            total += 1;
            let has_return = t.contains("->");
            // A ':' after the opening paren signals at least one annotation.
            let has_params = t
                .find('(')
                .map(|p| t[p..].contains(':'))
                .unwrap_or(false);
            if has_return || has_params {
                hinted += 1;
            } else {
                warnings.push(format!("No type hints on function (line {})", idx + 1));
            }
        }

        let score = if total == 0 {
            1.0
        } else {
            0.5 + 0.5 * (hinted as f32 / total as f32)
        };
        Ok(ValidationScore::passing(self.name(), score, self.weight).with_warnings(warnings))
    }
}

// ---------------------------------------------------------------------------
// oss_patterns
// ---------------------------------------------------------------------------

/// Soft check against the learned OSS pattern store: when the code uses a
/// framework the store knows, nudge toward the commonly paired patterns.
/// Degrades to a pass with a note when no store is available.
pub struct OssPatternsRule {
    weight: f32,
    store: Option<Arc<PatternStore>>,
}

impl OssPatternsRule {
    pub fn new(weight: f32, store: Option<Arc<PatternStore>>) -> Self {
        Self { weight, store }
    }
}

#[async_trait]
impl ValidatorRule for OssPatternsRule {
    fn name(&self) -> &str {
        "oss_patterns"
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Info
    }

    async fn check(&self, code: &str, _context: &RuleContext) -> Result<ValidationScore, CrucibleError> {
        let Some(store) = &self.store else {
            return Ok(
                ValidationScore::passing(self.name(), 0.9, self.weight)
                    .with_warnings(vec!["pattern store not available".into()]),
            );
        };

        let frameworks = match store.frameworks_in(code) {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!("Pattern store query failed: {}", e);
                return Ok(ValidationScore::passing(self.name(), 0.9, self.weight)
                    .with_warnings(vec!["pattern store unavailable".into()]));
            }
        };

        if frameworks.is_empty() {
            return Ok(ValidationScore::passing(self.name(), 1.0, self.weight));
        }

        let mut warnings = Vec::new();
        let mut matched = 0usize;
        for fw in &frameworks {
            let companions = store.companion_patterns(fw, 3).unwrap_or_default();
            let found = companions.iter().any(|p| code.contains(p.as_str()));
            if found || companions.is_empty() {
                matched += 1;
            } else {
                warnings.push(format!(
                    "{} projects commonly pair with: {}",
                    fw,
                    companions.join(", ")
                ));
            }
        }

        let score = 0.7 + 0.3 * (matched as f32 / frameworks.len() as f32);
        Ok(ValidationScore::passing(self.name(), score, self.weight).with_warnings(warnings))
    }
}
