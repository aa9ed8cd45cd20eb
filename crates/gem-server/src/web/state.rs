// web/state.rs
// Web server state management

use std::sync::Arc;

use crate::config::ProviderSecrets;
use crate::db::DatabasePool;
use crate::registry::Registry;
use crate::router::Brain;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Database pool (queue + receipts + audit)
    pub pool: Arc<DatabasePool>,

    /// Frozen tool catalogue
    pub registry: Arc<Registry>,

    /// Router front-end
    pub brain: Arc<Brain>,

    /// Provider secrets (webhook HMAC, SMS)
    pub secrets: ProviderSecrets,
}

impl AppState {
    pub fn new(pool: Arc<DatabasePool>, registry: Arc<Registry>, secrets: ProviderSecrets) -> Self {
        let brain = Arc::new(Brain::new(pool.clone(), registry.clone()));
        Self {
            pool,
            registry,
            brain,
            secrets,
        }
    }
}
