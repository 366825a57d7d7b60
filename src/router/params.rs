// src/router/params.rs — Per-tool parameter extractors
//
// Shared by both routing tiers: the pattern matcher extracts parameters from
// the same regex set its classification used, and the neural router re-runs
// these extractors after classifying an intent. Falls back to `_raw_input`.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

pub type ParamMap = HashMap<String, String>;

type ExtractFn = fn(&Captures) -> Option<ParamMap>;

struct Extractor {
    regex: Regex,
    extract: ExtractFn,
}

fn single(key: &str, value: &str) -> ParamMap {
    let mut map = HashMap::new();
    map.insert(key.to_string(), value.to_string());
    map
}

fn extract_file_path(caps: &Captures) -> Option<ParamMap> {
    let path = caps.get(1)?.as_str();
    Some(single("file_path", path))
}

fn extract_trailing_file(caps: &Captures) -> Option<ParamMap> {
    let path = caps.get(1)?.as_str();
    if !path.contains('.') {
        return None;
    }
    Some(single("file_path", path))
}

fn extract_pattern(caps: &Captures) -> Option<ParamMap> {
    Some(single("pattern", caps.get(1)?.as_str()))
}

fn extract_pattern_and_path(caps: &Captures) -> Option<ParamMap> {
    let mut map = single("pattern", caps.get(1)?.as_str());
    if let Some(path) = caps.get(2) {
        if !path.as_str().is_empty() {
            map.insert("path".into(), path.as_str().to_string());
        }
    }
    Some(map)
}

fn extract_command(caps: &Captures) -> Option<ParamMap> {
    Some(single("command", caps.get(1)?.as_str()))
}

fn extract_optional_path(caps: &Captures) -> Option<ParamMap> {
    let mut map = HashMap::new();
    if let Some(path) = caps.get(1) {
        if !path.as_str().is_empty() {
            map.insert("path".into(), path.as_str().to_string());
        }
    }
    Some(map)
}

fn extract_glob_pattern(caps: &Captures) -> Option<ParamMap> {
    Some(single("pattern", caps.get(1)?.as_str()))
}

fn extract_extension_glob(caps: &Captures) -> Option<ParamMap> {
    let ext = caps.get(1)?.as_str();
    Some(single("pattern", &format!("**/*.{}", ext)))
}

fn extract_write(caps: &Captures) -> Option<ParamMap> {
    let mut map = single("content", caps.get(1)?.as_str());
    map.insert("file_path".into(), caps.get(2)?.as_str().to_string());
    Some(map)
}

fn extract_new_file(caps: &Captures) -> Option<ParamMap> {
    let mut map = single("file_path", caps.get(1)?.as_str());
    map.insert("content".into(), String::new());
    Some(map)
}

fn extract_edit(caps: &Captures) -> Option<ParamMap> {
    let mut map = single("old_string", caps.get(1)?.as_str());
    map.insert("new_string".into(), caps.get(2)?.as_str().to_string());
    map.insert("file_path".into(), caps.get(3)?.as_str().to_string());
    Some(map)
}

fn extractors() -> &'static HashMap<&'static str, Vec<Extractor>> {
    static EXTRACTORS: OnceLock<HashMap<&'static str, Vec<Extractor>>> = OnceLock::new();
    EXTRACTORS.get_or_init(|| {
        let rx = |p: &str| Regex::new(p).expect("param extractor regex is valid");
        let mut map: HashMap<&'static str, Vec<Extractor>> = HashMap::new();

        map.insert(
            "read",
            vec![
                Extractor {
                    regex: rx(
                        r#"(?i)(?:read|show|cat|open|view|display)\s+(?:me\s+)?(?:the\s+)?(?:file\s+|contents?\s+of\s+|source\s+of\s+)?["']?([^\s"']+)["']?"#,
                    ),
                    extract: extract_file_path,
                },
                Extractor {
                    regex: rx(r#"(?i)(?:what'?s?\s+in|contents?\s+of)\s+["']?([^\s"']+)["']?"#),
                    extract: extract_file_path,
                },
                Extractor {
                    regex: rx(r#"["']?(\S+\.\w{1,5})["']?\s*$"#),
                    extract: extract_trailing_file,
                },
            ],
        );

        map.insert(
            "grep",
            vec![
                Extractor {
                    regex: rx(
                        r#"(?i)(?:grep|search|find)\s+(?:for\s+)?["'](.+?)["']\s+(?:in\s+)?["']?([^\s"']+)?["']?"#,
                    ),
                    extract: extract_pattern_and_path,
                },
                Extractor {
                    regex: rx(r#"(?i)(?:grep|search|find|look)\s+(?:for\s+)?["'](.+?)["']"#),
                    extract: extract_pattern,
                },
                Extractor {
                    regex: rx(
                        r"(?i)(?:where\s+is|find)\s+(?:the\s+)?(?:function|class|method|def)\s+(\w+)",
                    ),
                    extract: extract_pattern,
                },
            ],
        );

        map.insert(
            "bash",
            vec![
                Extractor {
                    regex: rx(r"(?i)(?:run|exec|execute)\s+[`\x22']?(.+?)[`\x22']?$"),
                    extract: extract_command,
                },
                Extractor {
                    regex: rx(r"^[`$]\s*(.+)$"),
                    extract: extract_command,
                },
                Extractor {
                    regex: rx(r"(?i)(git\s+\S+(?:\s+\S+)*)"),
                    extract: extract_command,
                },
            ],
        );

        map.insert(
            "ls",
            vec![
                Extractor {
                    regex: rx(r#"(?i)^(?:ls|list|dir)\s*["']?([^\s"']*)["']?$"#),
                    extract: extract_optional_path,
                },
                Extractor {
                    regex: rx(
                        r#"(?i)(?:list|show)\s+(?:files|directory|folder|contents?)\s*(?:in|of)?\s*["']?([^\s"']*)["']?"#,
                    ),
                    extract: extract_optional_path,
                },
            ],
        );

        map.insert(
            "glob",
            vec![
                Extractor {
                    regex: rx(r#"(?i)(?:find|search|glob)\s+(?:for\s+)?["']?(\*\*?[^\s"']+)["']?"#),
                    extract: extract_glob_pattern,
                },
                Extractor {
                    regex: rx(r"(?i)find\s+(?:all\s+)?(?:files?\s+)?(?:with\s+)?\.(\w+)\s+(?:files?|extension)"),
                    extract: extract_extension_glob,
                },
                Extractor {
                    regex: rx(r"(?i)(?:find|show|list)\s+all\s+\.?(\w+)\s+files?"),
                    extract: extract_extension_glob,
                },
            ],
        );

        map.insert(
            "write",
            vec![
                Extractor {
                    regex: rx(
                        r#"(?i)(?:write|save)\s+["']?(.+?)["']?\s+(?:to|in)\s+["']?([^\s"']+)["']?"#,
                    ),
                    extract: extract_write,
                },
                Extractor {
                    regex: rx(
                        r#"(?i)(?:create|new)\s+(?:a\s+)?(?:new\s+)?(?:empty\s+)?file\s+(?:called\s+)?["']?([^\s"']+)["']?"#,
                    ),
                    extract: extract_new_file,
                },
            ],
        );

        map.insert(
            "edit",
            vec![Extractor {
                regex: rx(
                    r#"(?i)(?:replace|change)\s+["'](.+?)["']\s+(?:to|with)\s+["'](.+?)["']\s+in\s+(?:file\s+)?["']?([^\s"']+)["']?"#,
                ),
                extract: extract_edit,
            }],
        );

        map.insert("find", vec![]);
        map.insert("help", vec![]);

        map
    })
}

/// Extract parameters for a classified tool intent. Deterministic in
/// (query, intent); returns `{_raw_input: query}` when nothing matches.
pub fn extract_params(query: &str, tool: &str) -> ParamMap {
    if let Some(entries) = extractors().get(tool) {
        for entry in entries {
            if let Some(caps) = entry.regex.captures(query) {
                if let Some(params) = (entry.extract)(&caps) {
                    return params;
                }
            }
        }
    }
    single("_raw_input", query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_params() {
        let p = extract_params("read core/agent.py", "read");
        assert_eq!(p.get("file_path").unwrap(), "core/agent.py");
    }

    #[test]
    fn test_read_contents_of() {
        let p = extract_params("what's in config.json", "read");
        assert_eq!(p.get("file_path").unwrap(), "config.json");
    }

    #[test]
    fn test_read_trailing_file_only_with_extension() {
        let p = extract_params("please look at main.py", "read");
        assert_eq!(p.get("file_path").unwrap(), "main.py");
        let p = extract_params("please look at everything", "read");
        assert!(p.contains_key("_raw_input"));
    }

    #[test]
    fn test_grep_quoted_pattern_with_path() {
        let p = extract_params("search for 'def route' in router.py", "grep");
        assert_eq!(p.get("pattern").unwrap(), "def route");
        assert_eq!(p.get("path").unwrap(), "router.py");
    }

    #[test]
    fn test_grep_function_name() {
        let p = extract_params("where is the function process_stream", "grep");
        assert_eq!(p.get("pattern").unwrap(), "process_stream");
    }

    #[test]
    fn test_bash_run_command() {
        let p = extract_params("run pip install requests", "bash");
        assert_eq!(p.get("command").unwrap(), "pip install requests");
    }

    #[test]
    fn test_bash_git_command() {
        let p = extract_params("git status", "bash");
        assert_eq!(p.get("command").unwrap(), "git status");
    }

    #[test]
    fn test_bash_dollar_prefix() {
        let p = extract_params("$ make build", "bash");
        assert_eq!(p.get("command").unwrap(), "make build");
    }

    #[test]
    fn test_ls_with_path() {
        let p = extract_params("list files in core/", "ls");
        assert_eq!(p.get("path").unwrap(), "core/");
    }

    #[test]
    fn test_ls_bare() {
        let p = extract_params("ls", "ls");
        assert!(!p.contains_key("_raw_input"));
        assert!(!p.contains_key("path"));
    }

    #[test]
    fn test_glob_extension() {
        let p = extract_params("find all .py files", "glob");
        assert_eq!(p.get("pattern").unwrap(), "**/*.py");
    }

    #[test]
    fn test_glob_named_type() {
        let p = extract_params("find all python files", "glob");
        assert_eq!(p.get("pattern").unwrap(), "**/*.python");
    }

    #[test]
    fn test_glob_literal_pattern() {
        let p = extract_params("glob for **/*.toml", "glob");
        assert_eq!(p.get("pattern").unwrap(), "**/*.toml");
    }

    #[test]
    fn test_write_content_to_file() {
        let p = extract_params("write hello world to test.txt", "write");
        assert_eq!(p.get("content").unwrap(), "hello world");
        assert_eq!(p.get("file_path").unwrap(), "test.txt");
    }

    #[test]
    fn test_write_new_file() {
        let p = extract_params("create a new file called helper.py", "write");
        assert_eq!(p.get("file_path").unwrap(), "helper.py");
        assert_eq!(p.get("content").unwrap(), "");
    }

    #[test]
    fn test_edit_replace() {
        let p = extract_params("replace 'old_func' with 'new_func' in utils.py", "edit");
        assert_eq!(p.get("old_string").unwrap(), "old_func");
        assert_eq!(p.get("new_string").unwrap(), "new_func");
        assert_eq!(p.get("file_path").unwrap(), "utils.py");
    }

    #[test]
    fn test_raw_input_fallback() {
        let p = extract_params("do something unusual", "grep");
        assert_eq!(p.get("_raw_input").unwrap(), "do something unusual");
    }

    #[test]
    fn test_help_always_raw() {
        let p = extract_params("help", "help");
        assert!(p.contains_key("_raw_input"));
    }

    #[test]
    fn test_deterministic() {
        let a = extract_params("read core/agent.py", "read");
        let b = extract_params("read core/agent.py", "read");
        assert_eq!(a, b);
    }
}
