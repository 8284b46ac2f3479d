use std::sync::Arc;

use hoard_index::Index;
use hoard_schema::Signer;
use hoard_search::SearchHandler;
use hoard_store::BlobStore;

use crate::config::ServerConfig;

/// Everything the HTTP handlers need, shared behind an `Arc`.
pub struct ServerState {
    pub store: Arc<dyn BlobStore>,
    pub index: Arc<Index>,
    pub search: SearchHandler,
    pub signer: Option<Arc<Signer>>,
    pub config: ServerConfig,
    /// Names of configured sync handlers, for discovery.
    pub sync_handlers: Vec<String>,
}

impl ServerState {
    pub fn new(
        store: Arc<dyn BlobStore>,
        index: Arc<Index>,
        signer: Option<Arc<Signer>>,
        config: ServerConfig,
    ) -> Arc<Self> {
        let owner = signer.as_ref().map(|s| s.public_key_ref().clone());
        let search = SearchHandler::new(Arc::clone(&index), owner);
        Arc::new(Self {
            store,
            index,
            search,
            signer,
            config,
            sync_handlers: Vec::new(),
        })
    }
}
