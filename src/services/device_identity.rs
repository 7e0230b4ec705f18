//! Device identity - durable `SCANNER-<random>` identifier for this scanner

use crate::domain::types::DeviceId;
use crate::io::store::KeyValueStore;
use tracing::{info, warn};
use uuid::Uuid;

/// Fixed storage key for the identity
pub const DEVICE_ID_KEY: &str = "scanner_device_id";

/// Length of the random suffix after the prefix
const SUFFIX_LEN: usize = 12;

fn generate_device_id() -> DeviceId {
    let random = Uuid::new_v4().simple().to_string();
    DeviceId::new(format!("{}{}", DeviceId::PREFIX, &random[..SUFFIX_LEN]))
}

/// Return the stored device identity, creating and persisting one if absent.
///
/// Never fails: if the store cannot be written the fresh identity is still
/// returned for this session and creation is retried on the next start. A
/// store that refuses writes (unreadable file on disk) keeps its contents.
pub fn get_or_create_device_id(store: &dyn KeyValueStore) -> DeviceId {
    if let Some(existing) = store.get(DEVICE_ID_KEY) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return DeviceId::new(existing);
        }
    }

    let device_id = generate_device_id();
    match store.set(DEVICE_ID_KEY, device_id.as_str()) {
        Ok(()) => info!(device_id = %device_id, "device_id_created"),
        Err(e) => warn!(device_id = %device_id, error = %e, "device_id_persist_failed"),
    }
    device_id
}
