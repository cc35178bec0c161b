use crate::config::Config;
use crate::pipeline::MatchingPipeline;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: MatchingPipeline,
    pub config: Config,
}
