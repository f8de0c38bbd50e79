//! Plugin-service adapter: wraps a store handle behind the generic
//! start/stop lifecycle that plugin hosts drive.

use crate::core::StatePayload;
use crate::store::SessionRuntimeStore;

/// Lifecycle wrapper around a [`SessionRuntimeStore`] handle.
///
/// `start` is a no-op (the store is live from `open`); `stop` delegates to
/// [`SessionRuntimeStore::close`], so a host shutting its services down gets
/// the final flush for free.
pub struct PluginService<T, R = ()> {
    id: String,
    store: SessionRuntimeStore<T, R>,
}

impl<T, R> PluginService<T, R>
where
    T: StatePayload,
    R: StatePayload,
{
    pub(crate) fn new(id: String, store: SessionRuntimeStore<T, R>) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The store is already running once opened; hosts call this uniformly
    /// across their services.
    pub fn start(&self) {}

    pub async fn stop(&self) {
        self.store.close().await;
    }

    /// Access to the wrapped store handle.
    pub fn store(&self) -> &SessionRuntimeStore<T, R> {
        &self.store
    }
}
