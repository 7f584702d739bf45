use crate::warehouse::{
    Connector,
    Warehouse,
    WarehouseError,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::sync::RwLock;

/// Upper bound for the health probe issued before a stored session is reused.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the single warehouse session shared by all scrapes.
///
/// Readers get a clone of the `Arc`, so a session is never closed while a reader still uses it. Only a reconnect
/// replaces the stored session, under the write lock.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    current: RwLock<Option<Arc<dyn Warehouse>>>,
    probe_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_probe_timeout(connector, PROBE_TIMEOUT)
    }

    pub fn with_probe_timeout(connector: Arc<dyn Connector>, probe_timeout: Duration) -> Self {
        Self {
            connector,
            current: RwLock::new(None),
            probe_timeout,
        }
    }

    /// Returns a session that just answered a health probe, reconnecting if needed.
    ///
    /// Fails only when a new session cannot be established.
    pub async fn get_healthy(&self) -> Result<Arc<dyn Warehouse>, WarehouseError> {
        let stale = {
            let current = self.current.read().await;
            current.clone()
        };

        if let Some(warehouse) = &stale {
            match self.probe(warehouse.as_ref()).await {
                Ok(()) => return Ok(Arc::clone(warehouse)),
                Err(e) => debug!(error = %e, "Health probe failed, reconnecting"),
            }
        }

        let mut current = self.current.write().await;

        // Someone else may have repaired the session while we waited for the lock.
        if let Some(warehouse) = current.as_ref() {
            let replaced = match &stale {
                Some(stale) => !Arc::ptr_eq(stale, warehouse),
                None => true,
            };
            if replaced && self.probe(warehouse.as_ref()).await.is_ok() {
                return Ok(Arc::clone(warehouse));
            }
        }

        if let Some(old) = current.take() {
            old.close().await;
        }

        let warehouse = self.connector.connect().await?;
        *current = Some(Arc::clone(&warehouse));
        Ok(warehouse)
    }

    /// Drops the stored session so the next [`ConnectionManager::get_healthy`] reconnects.
    pub async fn invalidate(&self) {
        let old = self.current.write().await.take();
        if let Some(old) = old {
            old.close().await;
        }
    }

    async fn probe(&self, warehouse: &dyn Warehouse) -> Result<(), WarehouseError> {
        match tokio::time::timeout(self.probe_timeout, warehouse.ping(self.probe_timeout)).await {
            Ok(result) => result,
            Err(_) => Err(WarehouseError::Timeout(self.probe_timeout)),
        }
    }
}
