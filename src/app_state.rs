use crate::ai::TextGenerator;
use crate::config::Config;
use crate::session::SessionEvents;
use crate::store::DocumentStore;
use std::sync::Arc;

/// Everything handlers share, built once in `main`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub generator: Arc<dyn TextGenerator>,
    pub sessions: Arc<SessionEvents>,
    pub config: Config,
}
