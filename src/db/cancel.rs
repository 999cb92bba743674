// In-flight statement tracking for cancel_query and disconnect

use crate::db::error::DbError;
use crate::db::traits::Canceller;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// A running statement that can be aborted.
///
/// `canceller` asks the server to stop, which lets the statement fail on its own
/// and keeps the connection usable. `abort` drops the statement future and is
/// used when the engine has no cancel primitive or the request did not go out.
#[derive(Clone)]
pub struct InFlight {
    canceller: Option<Arc<dyn Canceller>>,
    abort: CancellationToken,
}

impl InFlight {
    pub fn new(canceller: Option<Arc<dyn Canceller>>, abort: CancellationToken) -> Self {
        Self { canceller, abort }
    }

    pub async fn cancel(&self) {
        match &self.canceller {
            Some(canceller) => {
                if let Err(e) = canceller.cancel().await {
                    tracing::warn!(error = %e, "cancel request failed, dropping statement");
                    self.abort.cancel();
                }
            }
            None => self.abort.cancel(),
        }
    }
}

/// Keyed set of in-flight statements
pub struct CancelRegistry<K> {
    entries: Mutex<HashMap<K, InFlight>>,
}

impl<K> CancelRegistry<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Track `entry` under `key` until the returned ticket drops
    pub fn register(self: &Arc<Self>, key: K, entry: InFlight) -> CancelTicket<K> {
        let previous = self.lock().insert(key.clone(), entry);
        if previous.is_some() {
            tracing::debug!(key = ?key, "in-flight key reused, replacing");
        }
        CancelTicket {
            registry: self.clone(),
            key,
        }
    }

    /// Cancel one statement. Returns false when nothing runs under `key`.
    pub async fn cancel(&self, key: &K) -> bool {
        let entry = self.lock().get(key).cloned();
        match entry {
            Some(entry) => {
                entry.cancel().await;
                true
            }
            None => false,
        }
    }

    /// Cancel everything currently tracked
    pub async fn cancel_all(&self) {
        let entries: Vec<InFlight> = self.lock().values().cloned().collect();
        for entry in entries {
            entry.cancel().await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, InFlight>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K> Default for CancelRegistry<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes its entry from the registry on drop
pub struct CancelTicket<K>
where
    K: Eq + Hash,
{
    registry: Arc<CancelRegistry<K>>,
    key: K,
}

impl<K> Drop for CancelTicket<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.registry
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Race `fut` against `token`
pub async fn abortable<T, F>(token: &CancellationToken, reason: &str, fut: F) -> Result<T, DbError>
where
    F: std::future::Future<Output = Result<T, DbError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DbError::Cancelled(reason.to_string())),
        result = fut => result,
    }
}
