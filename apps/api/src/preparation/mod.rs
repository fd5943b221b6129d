// Application preparation: the status state machine, application persistence,
// deterministic fallbacks, and the metered analyze → tailor → cover-letter pipeline.

pub mod fallback;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod postgres;
pub mod prompts;
pub mod store;
