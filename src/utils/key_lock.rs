use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

// ============================================================================
// Per-Key Serialization Point
// ============================================================================
//
// The materialize read-modify-write is a race window: two events for the
// same key on different workers can interleave and lose an update. Broker
// partitioning already serializes per key across processes; this lock map
// guarantees at most one in-flight fold per (tenant, aggregate) when
// parallelism is introduced WITHIN a partition. Cross-key folds stay fully
// concurrent.
//
// ============================================================================

#[derive(Clone, Default)]
pub struct KeyLocks {
    locks: Arc<Mutex<HashMap<(Uuid, Uuid), Arc<Mutex<()>>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the fold lock for one `(tenant_id, aggregate_root_id)` key.
    /// The key stays locked until the returned guard drops.
    pub async fn acquire(&self, tenant_id: Uuid, aggregate_root_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry((tenant_id, aggregate_root_id))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
