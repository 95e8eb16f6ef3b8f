use std::collections::HashMap;
use std::path::Path;

/// Substitute `{{key}}` placeholders in each prompt block. Unknown keys are
/// left as written.
pub fn format_system_prompt(blocks: &[String], context: &HashMap<String, String>) -> Vec<String> {
    blocks.iter().map(|b| substitute(b, context)).collect()
}

fn substitute(template: &str, context: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match context.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Values every session can fill in: `cwd`, `date`, `platform`.
pub fn default_prompt_context(cwd: &Path) -> HashMap<String, String> {
    HashMap::from([
        ("cwd".to_string(), cwd.display().to_string()),
        (
            "date".to_string(),
            chrono::Local::now().format("%Y-%m-%d").to_string(),
        ),
        ("platform".to_string(), std::env::consts::OS.to_string()),
    ])
}
