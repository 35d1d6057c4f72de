use std::sync::Arc;

use crate::services::{job_store::JobStore, queue::JobQueue, storage::MediaStorage};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub storage: Arc<dyn MediaStorage>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        storage: Arc<dyn MediaStorage>,
    ) -> Self {
        Self {
            store,
            queue,
            storage,
        }
    }
}
