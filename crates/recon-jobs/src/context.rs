use recon_store::Store;

use crate::cancel::CancelToken;
use crate::config::JobConfig;

/// Everything a job needs: the store handle, a configuration snapshot, and
/// the cancellation token. Cloned per job; no module-level mutable state.
#[derive(Clone)]
pub struct JobContext {
    pub store: Store,
    pub config: JobConfig,
    pub cancel: CancelToken,
}

impl JobContext {
    pub fn new(store: Store) -> Self {
        JobContext {
            store,
            config: JobConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(store: Store, config: JobConfig) -> Self {
        JobContext {
            store,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Cooperative pause between batches so unrelated jobs and request
    /// handlers make progress.
    pub async fn yield_between_batches(&self) {
        tokio::time::sleep(self.config.batch_delay).await;
    }
}
