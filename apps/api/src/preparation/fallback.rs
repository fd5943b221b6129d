//! Deterministic stand-ins used when the generation service is unavailable.
//!
//! Both only rearrange what the candidate already wrote; nothing is invented.

use crate::models::application::ApplicationRow;
use crate::scoring::normalizer::MatchResult;

/// Matched skills named in fallback text.
const MAX_SKILLS: usize = 8;

/// Prepends a targeted summary line, keeps the CV body verbatim, and appends a
/// key-skills line built from the requirements the CV already covers.
pub fn tailor_cv(cv_text: &str, analysis: &MatchResult, application: &ApplicationRow) -> String {
    let skills = top_skills(analysis);
    let role = describe_role(application);

    let mut sections = Vec::with_capacity(3);
    if skills.is_empty() {
        sections.push(format!("Candidate for {role}."));
    } else {
        sections.push(format!(
            "Candidate for {role} with hands-on experience in {}.",
            skills.join(", ")
        ));
    }
    sections.push(cv_text.trim().to_string());
    if !skills.is_empty() {
        sections.push(format!("Key skills for this role: {}", skills.join(", ")));
    }
    sections.join("\n\n")
}

/// Fixed-template cover letter naming the role, the company, the matched skills, and
/// the opening line of the tailored CV.
pub fn cover_letter(
    application: &ApplicationRow,
    analysis: &MatchResult,
    tailored_cv: &str,
) -> String {
    let greeting = match non_empty(&application.company) {
        Some(company) => format!("Dear {company} hiring team,"),
        None => "Dear hiring team,".to_string(),
    };
    let role = describe_role(application);

    let mut letter = vec![
        greeting,
        format!("I would like to be considered for {role}."),
    ];

    let skills = top_skills(analysis);
    if !skills.is_empty() {
        letter.push(format!(
            "My background covers several of the requirements you list, including {}.",
            skills.join(", ")
        ));
    }

    if let Some(headline) = tailored_cv.lines().map(str::trim).find(|l| !l.is_empty()) {
        letter.push(format!("In short: {}.", headline.trim_end_matches('.')));
    }

    letter.push(
        "My CV is attached with the details. I would welcome the chance to discuss how I can contribute."
            .to_string(),
    );
    letter.push("Kind regards".to_string());
    letter.join("\n\n")
}

fn top_skills(analysis: &MatchResult) -> Vec<&str> {
    analysis
        .matched_factors
        .iter()
        .take(MAX_SKILLS)
        .map(String::as_str)
        .collect()
}

fn describe_role(application: &ApplicationRow) -> String {
    match (
        non_empty(&application.job_title),
        non_empty(&application.company),
    ) {
        (Some(title), Some(company)) => format!("the {title} role at {company}"),
        (Some(title), None) => format!("the {title} role"),
        (None, Some(company)) => format!("the open role at {company}"),
        (None, None) => "this role".to_string(),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::normalizer::ScoringMethod;
    use uuid::Uuid;

    fn application(job_title: &str, company: &str) -> ApplicationRow {
        ApplicationRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            job_title: job_title.to_string(),
            company: company.to_string(),
            job_description: "Rust and Kafka".to_string(),
            cv_text: None,
        }
    }

    fn analysis(matched: &[&str]) -> MatchResult {
        MatchResult {
            score: 50,
            matched_factors: matched.iter().map(|s| s.to_string()).collect(),
            missing_factors: Default::default(),
            explanation: String::new(),
            method: ScoringMethod::Basic,
        }
    }

    #[test]
    fn test_tailored_cv_keeps_body_and_brackets_it() {
        let cv = "Jane Doe\nBuilt Rust services at Initech.";
        let tailored = tailor_cv(cv, &analysis(&["kafka", "rust"]), &application("SRE", "Acme"));

        assert!(tailored.starts_with("Candidate for the SRE role at Acme"));
        assert!(tailored.contains(cv));
        assert!(tailored.ends_with("Key skills for this role: kafka, rust"));
    }

    #[test]
    fn test_tailored_cv_without_matches_has_no_skills_line() {
        let tailored = tailor_cv("Jane Doe", &analysis(&[]), &application("", ""));
        assert_eq!(tailored, "Candidate for this role.\n\nJane Doe");
    }

    #[test]
    fn test_cover_letter_references_tailored_cv_headline() {
        let app = application("Backend Engineer", "Acme");
        let letter = cover_letter(&app, &analysis(&["rust"]), "\n  Rust engineer, 6 years.\nMore");

        assert!(letter.starts_with("Dear Acme hiring team,"));
        assert!(letter.contains("the Backend Engineer role at Acme"));
        assert!(letter.contains("including rust"));
        assert!(letter.contains("In short: Rust engineer, 6 years."));
    }

    #[test]
    fn test_cover_letter_handles_missing_company() {
        let letter = cover_letter(&application("Analyst", " "), &analysis(&[]), "");
        assert!(letter.starts_with("Dear hiring team,"));
        assert!(letter.contains("the Analyst role."));
        assert!(!letter.contains("In short"));
    }
}
