// Shared prompt constants and prompt-building utilities.
// Each service that needs LLM calls defines its own prompts.rs alongside it.
// This file contains cross-cutting prompt fragments.

use serde_json::Value;

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant \
    helping job seekers prepare applications. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Instruction against inventing candidate experience.
pub const NO_FABRICATION_INSTRUCTION: &str = "\
    CRITICAL: Use only facts present in the candidate's CV. \
    Do NOT invent employers, titles, dates, degrees, certifications, or metrics. \
    If the CV does not support a requirement, leave it out rather than guessing.";

/// Builds the system prompt for a call whose output must match `schema`.
pub fn schema_system_prompt(schema: &Value) -> Result<String, serde_json::Error> {
    let schema_json = serde_json::to_string_pretty(schema)?;
    Ok(format!(
        "{JSON_ONLY_SYSTEM}\n\nYour response MUST be a JSON object matching this JSON schema:\n{schema_json}"
    ))
}

/// Replaces `{name}` placeholders in a single pass over `template`. Inserted values are
/// not scanned again, so text containing `{...}` is kept as written.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let extra: usize = values.iter().map(|(_, value)| value.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let placeholder = values.iter().find(|(name, _)| {
            tail.strip_prefix(*name)
                .is_some_and(|after| after.starts_with('}'))
        });
        match placeholder {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}
