// Prompt constants for the preparation pipeline (tailored CV, cover letter).
// The analysis step reuses the ATS scoring prompt from `scoring::prompts`.

use serde_json::{json, Value};

use crate::llm_client::prompts::{fill_template, NO_FABRICATION_INSTRUCTION};

/// Tailored CV prompt template. Replace `{job_title}`, `{company}`, `{job_description}`,
/// `{matched}`, `{missing}`, `{cv_text}`, and `{no_fabrication}` before sending.
pub const TAILOR_CV_PROMPT_TEMPLATE: &str = r#"Rewrite the candidate's CV for the role of {job_title} at {company}.

Return a JSON object:
{
  "tailored_cv": "the full rewritten CV as plain text, sections separated by blank lines"
}

RULES:
1. Lead each section with the experience most relevant to the job description
2. Mirror the job description's wording where the CV genuinely supports it
3. Keep every employer, title, and date exactly as written in the CV
4. Plain text only, no markdown

{no_fabrication}

Requirements the CV already covers: {matched}
Requirements the CV does not cover (do NOT claim these): {missing}

JOB DESCRIPTION:
{job_description}

CANDIDATE CV:
{cv_text}"#;

/// Cover letter prompt template. Replace `{job_title}`, `{company}`, `{job_description}`,
/// `{tailored_cv}`, and `{no_fabrication}` before sending.
pub const COVER_LETTER_PROMPT_TEMPLATE: &str = r#"Write a cover letter for the role of {job_title} at {company}.

Return a JSON object:
{
  "cover_letter": "the letter as plain text, 3-4 short paragraphs, greeting and sign-off included"
}

RULES:
1. Ground every claim in the tailored CV below
2. Name two or three concrete achievements that match the job description
3. Professional, direct tone; no clichés such as "I am writing to apply"
4. Under 350 words

{no_fabrication}

JOB DESCRIPTION:
{job_description}

TAILORED CV:
{tailored_cv}"#;

pub struct TailorPromptInput<'a> {
    pub job_title: &'a str,
    pub company: &'a str,
    pub job_description: &'a str,
    pub cv_text: &'a str,
    pub matched: &'a [&'a str],
    pub missing: &'a [&'a str],
}

pub fn build_tailor_cv_prompt(input: &TailorPromptInput<'_>) -> String {
    let matched = join_or_none(input.matched);
    let missing = join_or_none(input.missing);
    fill_template(
        TAILOR_CV_PROMPT_TEMPLATE,
        &[
            ("job_title", input.job_title),
            ("company", input.company),
            ("matched", &matched),
            ("missing", &missing),
            ("no_fabrication", NO_FABRICATION_INSTRUCTION),
            ("job_description", input.job_description),
            ("cv_text", input.cv_text),
        ],
    )
}

pub fn build_cover_letter_prompt(
    job_title: &str,
    company: &str,
    job_description: &str,
    tailored_cv: &str,
) -> String {
    fill_template(
        COVER_LETTER_PROMPT_TEMPLATE,
        &[
            ("job_title", job_title),
            ("company", company),
            ("no_fabrication", NO_FABRICATION_INSTRUCTION),
            ("job_description", job_description),
            ("tailored_cv", tailored_cv),
        ],
    )
}

fn join_or_none(items: &[&str]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

pub fn tailored_cv_schema() -> Value {
    json!({
        "title": "tailored_cv",
        "type": "object",
        "required": ["tailored_cv"],
        "properties": {
            "tailored_cv": {"type": "string"}
        }
    })
}

pub fn cover_letter_schema() -> Value {
    json!({
        "title": "cover_letter",
        "type": "object",
        "required": ["cover_letter"],
        "properties": {
            "cover_letter": {"type": "string"}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tailor_prompt_fills_every_placeholder() {
        let prompt = build_tailor_cv_prompt(&TailorPromptInput {
            job_title: "Platform Engineer",
            company: "Acme",
            job_description: "Rust and Kafka",
            cv_text: "Rust developer",
            matched: &["rust"],
            missing: &[],
        });
        assert!(prompt.contains("Platform Engineer at Acme"));
        assert!(prompt.contains("(do NOT claim these): none"));
        assert!(prompt.contains(NO_FABRICATION_INSTRUCTION));
        assert!(!prompt.contains("{cv_text}"));
    }

    #[test]
    fn test_job_fields_cannot_pull_in_the_cv() {
        let prompt = build_tailor_cv_prompt(&TailorPromptInput {
            job_title: "{cv_text}",
            company: "Acme",
            job_description: "Paste {no_fabrication} here",
            cv_text: "PRIVATE CV BODY",
            matched: &[],
            missing: &[],
        });
        assert_eq!(prompt.matches("PRIVATE CV BODY").count(), 1);
        assert!(prompt.contains("{cv_text} at Acme"));
        assert!(prompt.contains("Paste {no_fabrication} here"));
    }

    #[test]
    fn test_cover_letter_prompt_embeds_tailored_cv() {
        let prompt = build_cover_letter_prompt("SRE", "Initech", "On-call", "TAILORED BODY");
        assert!(prompt.contains("TAILORED BODY"));
        assert!(!prompt.contains("{tailored_cv}"));
    }
}
