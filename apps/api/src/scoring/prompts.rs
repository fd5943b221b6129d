// Prompt constants for match / ATS scoring.

use crate::llm_client::prompts::fill_template;

/// ATS scoring prompt template. Replace `{resume_text}` and `{job_description}` before sending.
pub const ATS_SCORE_PROMPT_TEMPLATE: &str = r#"Act as an applicant tracking system and an experienced technical recruiter.
Score how well the candidate's CV matches the job description.

Return a JSON object:
{
  "score": 0-100 integer,
  "matched_factors": ["skills, qualifications, or experience the CV clearly covers"],
  "missing_factors": ["requirements from the job description the CV does not cover"],
  "explanation": "2-4 sentences explaining the score"
}

SCORING RULES:
1. Hard requirements (must-have skills, minimum years, required degrees) weigh most
2. Use exact keywords from the job description in matched_factors / missing_factors
3. Do NOT reward keyword stuffing; judge evidence of real experience
4. Keep each factor under 6 words

CANDIDATE CV:
{resume_text}

JOB DESCRIPTION:
{job_description}"#;

pub fn build_ats_prompt(resume_text: &str, job_description: &str) -> String {
    fill_template(
        ATS_SCORE_PROMPT_TEMPLATE,
        &[
            ("resume_text", resume_text),
            ("job_description", job_description),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_text_in_cv_is_not_expanded() {
        let prompt = build_ats_prompt("Skills: {job_description}", "Kubernetes operator work");

        assert!(prompt.contains("CANDIDATE CV:\nSkills: {job_description}\n"));
        assert_eq!(prompt.matches("Kubernetes operator work").count(), 1);
        assert!(!prompt.contains("{resume_text}"));
    }
}
