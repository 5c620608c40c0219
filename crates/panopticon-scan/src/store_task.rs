//! Store calls from async code.

use std::sync::Arc;
use std::time::Duration;

use panopticon_store::{execute_with_retry, ReconciliationStore, StoreError};

use crate::error::Result;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Run a store operation off the runtime, retrying while the database is busy.
pub(crate) async fn with_store<T, F>(store: &Arc<ReconciliationStore>, op: F) -> Result<T>
where
    T: Send + 'static,
    F: Fn(&ReconciliationStore) -> std::result::Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    let result = tokio::task::spawn_blocking(move || {
        execute_with_retry(RETRY_ATTEMPTS, RETRY_DELAY, || op(store.as_ref()))
    })
    .await??;
    Ok(result)
}
