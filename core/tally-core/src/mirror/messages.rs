//! Notes received from the peer, kept newest-first in the shared region.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::region::{RegionWrite, SharedRegion};
use crate::clock::Clock;
use crate::error::RegionError;

pub const MESSAGES_KEY: &str = "savedMessages";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageItem {
    pub id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

pub struct MessageLog {
    region: Arc<dyn SharedRegion>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl MessageLog {
    pub fn new(region: Arc<dyn SharedRegion>, clock: Arc<dyn Clock>) -> Self {
        Self {
            region,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn save(&self, text: &str) -> Result<MessageItem, RegionError> {
        let _guard = self.lock()?;
        let item = MessageItem {
            id: ulid::Ulid::new().to_string(),
            text: text.to_string(),
            timestamp: self.clock.now(),
        };
        let mut items = self.list()?;
        items.insert(0, item.clone());
        self.write(&items)?;
        Ok(item)
    }

    pub fn list(&self) -> Result<Vec<MessageItem>, RegionError> {
        let snapshot = self.region.snapshot()?;
        let Some(blob) = snapshot.get_blob(MESSAGES_KEY) else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(blob) {
            Ok(items) => Ok(items),
            Err(err) => {
                warn!(error = %err, "Malformed saved messages; treating as empty");
                Ok(Vec::new())
            }
        }
    }

    /// Returns whether an item with `id` was removed.
    pub fn delete(&self, id: &str) -> Result<bool, RegionError> {
        let _guard = self.lock()?;
        let mut items = self.list()?;
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            return Ok(false);
        }
        self.write(&items)?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<(), RegionError> {
        let _guard = self.lock()?;
        self.region.commit(&[RegionWrite::remove(MESSAGES_KEY)])
    }

    fn write(&self, items: &[MessageItem]) -> Result<(), RegionError> {
        let blob = serde_json::to_string(items).map_err(|err| RegionError::Malformed {
            key: MESSAGES_KEY.to_string(),
            details: err.to_string(),
        })?;
        self.region.commit(&[RegionWrite::blob(MESSAGES_KEY, blob)])
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, RegionError> {
        self.write_lock
            .lock()
            .map_err(|_| RegionError::WriteFailed("message log lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::counter::tests::StepClock;
    use crate::mirror::region::MemoryRegion;

    fn log() -> MessageLog {
        MessageLog::new(Arc::new(MemoryRegion::default()), Arc::new(StepClock::new()))
    }

    #[test]
    fn newest_first() {
        let log = log();
        log.save("first").expect("save");
        log.save("second").expect("save");

        let texts: Vec<String> = log
            .list()
            .expect("list")
            .into_iter()
            .map(|item| item.text)
            .collect();
        assert_eq!(texts, vec!["second", "first"]);
    }

    #[test]
    fn delete_by_id() {
        let log = log();
        let keep = log.save("keep").expect("save");
        let drop = log.save("drop").expect("save");

        assert!(log.delete(&drop.id).expect("delete"));
        assert!(!log.delete(&drop.id).expect("second delete"));
        assert_eq!(log.list().expect("list"), vec![keep]);
    }

    #[test]
    fn clear_empties_the_log() {
        let log = log();
        log.save("a").expect("save");
        log.clear().expect("clear");
        assert!(log.list().expect("list").is_empty());
    }
}
