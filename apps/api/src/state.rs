use crate::batch::registry::BatchRegistry;
use crate::batch::BatchScheduler;
use crate::config::Config;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Holds the extractor and analysis client every batch runs against.
    pub scheduler: BatchScheduler,
    pub registry: BatchRegistry,
}
