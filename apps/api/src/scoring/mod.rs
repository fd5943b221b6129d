// Match / ATS scoring: keyword tokenization, the AI-or-fallback normalizer,
// and the metered ATS scoring endpoint.

pub mod ats;
pub mod handlers;
pub mod keywords;
pub mod normalizer;
pub mod prompts;
