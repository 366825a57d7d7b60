// src/router/patterns.rs — Tier-0 pattern matcher
//
// An ordered list of compiled regexes mapping common command phrasings
// straight to a tool intent. First match wins, no backtracking across
// rules. Fails closed: anything unmatched falls through to the next tier.

use regex::Regex;

use super::params::{extract_params, ParamMap};
use super::{RouteMethod, RouteResult};

pub const PATTERN_CONFIDENCE: f32 = 0.95;

pub struct PatternMatcher {
    rules: Vec<(Regex, &'static str)>,
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternMatcher {
    pub fn new() -> Self {
        let rx = |p: &str| Regex::new(p).expect("pattern rule regex is valid");
        let rules: Vec<(Regex, &'static str)> = vec![
            // help
            (rx(r"(?i)^\s*(?:help|\?|commands)\s*$"), "help"),
            (rx(r"(?i)^what can you do\??$"), "help"),
            (rx(r"(?i)^(?:show\s+)?(?:available\s+)?(?:usage|capabilities)\s*$"), "help"),
            // git goes straight to bash
            (
                rx(r"(?i)^\s*git\s+(?:status|diff|log|add|commit|push|pull|fetch|stash|branch|checkout|switch|merge|rebase|show|blame|tag)\b"),
                "bash",
            ),
            (rx(r"(?i)^(?:commit the changes|push to origin|check git status)$"), "bash"),
            // read
            (
                rx(r#"(?i)^\s*(?:read|cat|open|view|display)\s+(?:file\s+)?["']?[^\s"']+["']?\s*$"#),
                "read",
            ),
            (rx(r#"(?i)^show\s+(?:me\s+)?(?:the\s+)?(?:file\s+|contents?\s+of\s+)?\S+\.\w{1,5}\s*$"#), "read"),
            (rx(r#"(?i)^what'?s?\s+in\s+\S+\.\w{1,5}\s*$"#), "read"),
            (rx(r"(?i)^read\s+lines\s+\d+-\d+\s+of\s+\S+$"), "read"),
            // grep
            (rx(r#"(?i)^\s*grep\s+"#), "grep"),
            (rx(r#"(?i)^search\s+(?:for\s+)?["'].+["']"#), "grep"),
            (rx(r"(?i)^where\s+is\s+(?:the\s+)?(?:function|class|method|def)\s+\w+"), "grep"),
            (rx(r"(?i)^find\s+(?:all\s+)?(?:occurrences|references|usages)\s+(?:of|to)\s+"), "grep"),
            (rx(r"(?i)^search\s+the\s+codebase\s+for\s+"), "grep"),
            // glob before generic find
            (rx(r#"(?i)^(?:find|search|glob)\s+(?:for\s+)?["']?\*"#), "glob"),
            (rx(r"(?i)^find\s+(?:all\s+)?files\s+(?:matching|with|named)\s+"), "glob"),
            (rx(r"(?i)^(?:find|show|list)\s+all\s+\.?\w+\s+files?\s*(?:recursively)?\s*$"), "glob"),
            // ls
            (rx(r#"(?i)^\s*(?:ls|dir)\s*["']?[^\s"']*["']?\s*$"#), "ls"),
            (rx(r"(?i)^list\s+(?:the\s+)?(?:current\s+)?(?:files|directory|folder)"), "ls"),
            (rx(r"(?i)^(?:show|list)\s+(?:me\s+)?(?:the\s+)?(?:directory|folder|project)\s+(?:contents?|structure|listing)"), "ls"),
            (rx(r"(?i)^what(?:'s| files are| is)\s+in\s+the\s+\S+\s+(?:folder|directory)\??$"), "ls"),
            // write
            (rx(r#"(?i)^(?:create|make)\s+(?:a\s+)?(?:new\s+)?(?:empty\s+)?file\s+"#), "write"),
            (rx(r#"(?i)^write\s+.+\s+to\s+\S+\s*$"#), "write"),
            (rx(r#"(?i)^save\s+(?:this|it|.+)\s+to\s+\S+\s*$"#), "write"),
            // edit
            (rx(r#"(?i)^(?:replace|change)\s+["'].+["']\s+(?:with|to)\s+["'].+["']\s+in\s+"#), "edit"),
            (rx(r"(?i)^fix\s+the\s+typo\s+in\s+\S+$"), "edit"),
            // bash
            (rx(r"(?i)^\s*(?:run|exec|execute)\s+\S+"), "bash"),
            (rx(r"^\s*[`$]\s*\S+"), "bash"),
            (rx(r"(?i)^(?:install\s+dependencies|restart\s+the\s+service|start\s+the\s+server)$"), "bash"),
            (rx(r"(?i)^(?:pip|npm|cargo|make|pytest|mypy|ruff|docker)\s+\S+"), "bash"),
            (rx(r"(?i)^(?:pwd|whoami)\s*$"), "bash"),
            (rx(r"(?i)^(?:head|tail)\s+\S+\.\w+"), "read"),
            (rx(r"(?i)^check\s+(?:the\s+)?(?:python|node|rust)\s+version$"), "bash"),
            // Russian command phrasings
            (rx(r"(?i)^прочитай(?:\s+мне)?(?:\s+файл)?\s+\S+"), "read"),
            (rx(r"(?i)^покажи\s+(?:файл|содержимое|исходный\s+код)\s+\S+"), "read"),
            (rx(r"(?i)^открой\s+\S+\.\w{1,5}\s*$"), "read"),
            (rx(r"(?i)^выведи\s+файл\s+\S+"), "read"),
            (rx(r"(?i)^что\s+в\s+файле\s+\S+"), "read"),
            (rx(r"(?i)^найди\s+все\s+(?:\S+\s+)?файлы"), "glob"),
            (rx(r"(?i)^покажи\s+все\s+\S+\s+файлы"), "glob"),
            (rx(r#"(?i)^найди\s+['"].+['"]"#), "grep"),
            (rx(r"(?i)^найди\s+все\s+вхождения\s+"), "grep"),
            (rx(r"(?i)^поиск\s+"), "grep"),
            (rx(r"(?i)^где\s+(?:определ|использ|вызыва)"), "grep"),
            (rx(r"(?i)^(?:запусти|выполни)\s+\S+"), "bash"),
            (rx(r"(?i)^(?:установи\s+зависимости|собери\s+проект|перезапусти\s+сервис)$"), "bash"),
            (rx(r"(?i)^(?:сделай|покажи)\s+git\s+\S+"), "bash"),
            (rx(r"(?i)^(?:список|перечисли)\s+файл"), "ls"),
            (rx(r"(?i)^что\s+в\s+папке\s+\S+"), "ls"),
            (rx(r"(?i)^покажи\s+структуру\s+проекта$"), "ls"),
            (rx(r"(?i)^покажи\s+файлы\s+в\s+\S+"), "ls"),
            (rx(r"(?i)^создай\s+(?:новый\s+|пустой\s+)?файл\s+\S+"), "write"),
            (rx(r"(?i)^(?:сохрани|запиши)\s+в\s+\S+"), "write"),
            (rx(r#"(?i)^замени\s+['"].+['"]\s+на\s+['"].+['"]"#), "edit"),
            (rx(r"(?i)^исправь\s+опечатку\s+в\s+\S+"), "edit"),
            (rx(r"(?i)^помощь\s*$"), "help"),
            (rx(r"(?i)^что\s+ты\s+умеешь\??$"), "help"),
            (rx(r"(?i)^покажи\s+доступные\s+команды$"), "help"),
            (rx(r"(?i)^как\s+пользоваться\??$"), "help"),
        ];
        Self { rules }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// First matching rule wins. Deterministic; returns None when no rule
    /// fires.
    pub fn match_query(&self, query: &str) -> Option<RouteResult> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        for (regex, tool) in &self.rules {
            if regex.is_match(query) {
                return Some(RouteResult {
                    tool: tool.to_string(),
                    params: extract_params(query, tool),
                    confidence: PATTERN_CONFIDENCE,
                    method: RouteMethod::Pattern,
                });
            }
        }
        None
    }

    /// Canonical textual command for an intent. Inverse of `match_query`:
    /// `match_query(format_intent(tool, params))` recovers the intent.
    pub fn format_intent(tool: &str, params: &ParamMap) -> String {
        let get = |key: &str| params.get(key).map(|s| s.as_str()).unwrap_or("");
        match tool {
            "read" => format!("read {}", get("file_path")),
            "grep" => {
                if params.contains_key("path") {
                    format!("grep \"{}\" in {}", get("pattern"), get("path"))
                } else {
                    format!("grep \"{}\"", get("pattern"))
                }
            }
            "bash" => format!("run {}", get("command")),
            "ls" => format!("ls {}", get("path")).trim_end().to_string(),
            "glob" => format!("glob for {}", get("pattern")),
            "write" => {
                if get("content").is_empty() {
                    format!("create file {}", get("file_path"))
                } else {
                    format!("write {} to {}", get("content"), get("file_path"))
                }
            }
            "edit" => format!(
                "replace '{}' with '{}' in {}",
                get("old_string"),
                get("new_string"),
                get("file_path")
            ),
            _ => "help".to_string(),
        }
    }
}
