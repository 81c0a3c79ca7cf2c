use std::sync::Arc;

use rd_bridge::AgentBridge;
use rd_domain::config::Config;
use rd_store::ConversationStore;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<ConversationStore>,
    pub bridge: AgentBridge,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = Arc::new(ConversationStore::new(config.sessions_dir()));
        let bridge = AgentBridge::from_config(&config);
        Self {
            config: Arc::new(config),
            store,
            bridge,
        }
    }
}
