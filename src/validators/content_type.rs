// src/validators/content_type.rs — Content-type detection
//
// Decides which rule family applies to a piece of generated content.
// Signature checks are ordered: Helm template delimiters win over Kubernetes,
// compose/actions/ansible win over generic YAML.

/// Detect the content type of a code snippet.
///
/// Returns one of: "python", "kubernetes", "github_actions", "docker_compose",
/// "helm", "ansible", "terraform", "dockerfile", "bash", "yaml", "unknown".
pub fn detect_content_type(code: &str) -> &'static str {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return "unknown";
    }

    // Helm beats Kubernetes: Go-template delimiters referencing chart values.
    if trimmed.contains("{{ .Values")
        || trimmed.contains("{{ .Release")
        || trimmed.contains("{{ .Chart")
        || trimmed.contains("{{- .Values")
        || trimmed.contains("{{.Values")
    {
        return "helm";
    }

    if is_terraform(trimmed) {
        return "terraform";
    }

    if is_dockerfile(trimmed) {
        return "dockerfile";
    }

    if trimmed.contains("apiVersion:") && trimmed.contains("kind:") {
        return "kubernetes";
    }

    if is_github_actions(trimmed) {
        return "github_actions";
    }

    if is_docker_compose(trimmed) {
        return "docker_compose";
    }

    if is_ansible(trimmed) {
        return "ansible";
    }

    if is_bash(trimmed) {
        return "bash";
    }

    if is_python(trimmed) {
        return "python";
    }

    if is_yaml(trimmed) {
        return "yaml";
    }

    "unknown"
}

fn is_terraform(code: &str) -> bool {
    for line in code.lines() {
        let line = line.trim_start();
        if (line.starts_with("resource \"")
            || line.starts_with("variable \"")
            || line.starts_with("provider \"")
            || line.starts_with("module \"")
            || line.starts_with("data \"")
            || line.starts_with("terraform {")
            || line.starts_with("output \""))
            && code.contains('{')
        {
            return true;
        }
    }
    false
}

fn is_dockerfile(code: &str) -> bool {
    let mut has_from = false;
    let mut has_instruction = false;
    for line in code.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let word = line.split_whitespace().next().unwrap_or("");
        match word {
            "FROM" => has_from = true,
            "RUN" | "CMD" | "COPY" | "ADD" | "WORKDIR" | "ENTRYPOINT" | "EXPOSE" | "ENV" => {
                has_instruction = true
            }
            _ => {}
        }
    }
    has_from && has_instruction
}

fn is_github_actions(code: &str) -> bool {
    let has_on = code
        .lines()
        .any(|l| l.trim_end() == "on:" || l.trim_start().starts_with("on:"));
    let has_jobs = code.lines().any(|l| l.trim_end() == "jobs:");
    let has_steps = code.contains("runs-on:") || code.contains("uses:") || code.contains("steps:");
    has_on && has_jobs && has_steps
}

fn is_docker_compose(code: &str) -> bool {
    let has_services = code.lines().any(|l| l.trim_end() == "services:");
    let has_container = code.contains("image:") || code.contains("build:");
    has_services && has_container
}

fn is_ansible(code: &str) -> bool {
    if code.contains("ansible.builtin.") {
        return true;
    }
    let has_task_list = code.lines().any(|l| l.trim_start().starts_with("- name:"));
    if !has_task_list {
        return false;
    }
    const MODULE_KEYS: [&str; 10] = [
        "hosts:", "tasks:", "become:", "apt:", "yum:", "dnf:", "loop:", "with_items:",
        "template:", "gather_facts:",
    ];
    MODULE_KEYS
        .iter()
        .any(|k| code.lines().any(|l| l.trim_start().starts_with(k)))
}

fn is_bash(code: &str) -> bool {
    let first = code.lines().next().unwrap_or("").trim();
    if first.starts_with("#!") && (first.contains("bash") || first.contains("/sh")) {
        return true;
    }
    let bashisms = [
        code.contains("function ") && code.contains("() {"),
        code.contains("if [[ "),
        code.contains("fi\n") || code.trim_end().ends_with("fi"),
        code.contains("; do") || code.contains("; then"),
        code.contains("echo \"$"),
    ];
    bashisms.iter().filter(|b| **b).count() >= 2
}

fn is_python(code: &str) -> bool {
    code.lines().any(|l| {
        let l = l.trim_start();
        l.starts_with("def ")
            || l.starts_with("class ")
            || l.starts_with("import ")
            || l.starts_with("from ")
            || l.starts_with("async def ")
    })
}

fn is_yaml(code: &str) -> bool {
    let mut mapping_lines = 0;
    let mut total = 0;
    for line in code.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        total += 1;
        let trimmed = line.trim_start();
        if trimmed.starts_with("- ") {
            mapping_lines += 1;
            continue;
        }
        if let Some(colon) = trimmed.find(':') {
            let key = &trimmed[..colon];
            if !key.is_empty() && !key.contains(char::is_whitespace) {
                mapping_lines += 1;
            }
        }
    }
    total > 0 && mapping_lines * 2 >= total
}
