use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per upload id. Confirm and rollback on the same upload run
/// one at a time; different uploads never wait on each other.
#[derive(Debug, Clone, Default)]
pub struct UploadLocks {
    slots: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

pub type UploadGuard = OwnedMutexGuard<()>;

impl UploadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, upload_id: Uuid) -> UploadGuard {
        let slot = {
            let mut slots = self.slots.lock().await;
            // Slots only the map still references are idle.
            slots.retain(|id, slot| *id == upload_id || Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(upload_id).or_default())
        };
        slot.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}
