use std::sync::Arc;

use dedup_crypto::ContentAddresser;
use dedup_store::DedupStore;

/// Shared handler state.
#[derive(Clone, Debug)]
pub struct AppState {
    pub store: Arc<DedupStore>,
    pub addresser: ContentAddresser,
    pub max_upload_size: u64,
}

impl AppState {
    pub fn new(store: Arc<DedupStore>, max_upload_size: u64) -> Self {
        Self {
            store,
            addresser: ContentAddresser::new(),
            max_upload_size,
        }
    }
}
