use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{ContentRecord, DeliveryPhase};
use crate::store::ContentStore;

/// In-process [`ContentStore`]. Used by tests and single-process demos.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, ContentRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_records<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut HashMap<String, ContentRecord>) -> T,
    {
        let mut records = self
            .records
            .lock()
            .map_err(|e| anyhow!("Memory store lock poisoned: {}", e))?;
        Ok(f(&mut records))
    }
}

impl ContentStore for MemoryStore {
    fn insert(&self, record: &ContentRecord) -> Result<(), StoreError> {
        self.with_records(|records| {
            if records.contains_key(&record.id) {
                return Err(StoreError::Backend(anyhow!("Duplicate content id {}", record.id)));
            }
            records.insert(record.id.clone(), record.clone());
            Ok(())
        })?
    }

    fn find_by_id(&self, id: &str) -> Result<Option<ContentRecord>, StoreError> {
        self.with_records(|records| records.get(id).cloned())
    }

    fn find_by_owner(&self, owner: &str) -> Result<Vec<ContentRecord>, StoreError> {
        self.with_records(|records| {
            let mut owned: Vec<ContentRecord> = records
                .values()
                .filter(|r| r.owner.as_deref() == Some(owner))
                .cloned()
                .collect();
            owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            owned
        })
    }

    fn find_reclaimable(&self, now: DateTime<Utc>) -> Result<Vec<ContentRecord>, StoreError> {
        self.with_records(|records| {
            records
                .values()
                .filter(|r| r.is_reclaimable(now))
                .cloned()
                .collect()
        })
    }

    fn compare_and_swap(
        &self,
        expected_revision: u64,
        next: &ContentRecord,
    ) -> Result<bool, StoreError> {
        self.with_records(|records| match records.get_mut(&next.id) {
            Some(current) if current.revision == expected_revision => {
                let mut stored = next.clone();
                stored.revision = expected_revision + 1;
                *current = stored;
                true
            }
            _ => false,
        })
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.with_records(|records| records.remove(id).is_some())
    }

    fn delete_if_revision(&self, id: &str, expected_revision: u64) -> Result<bool, StoreError> {
        self.with_records(|records| match records.get(id) {
            Some(current) if current.revision == expected_revision => {
                records.remove(id);
                true
            }
            _ => false,
        })
    }

    fn release_delivery_claims(&self) -> Result<usize, StoreError> {
        self.with_records(|records| {
            let mut released = 0;
            for record in records.values_mut() {
                if record.phase != DeliveryPhase::Delivering && record.deliveries_in_flight == 0 {
                    continue;
                }
                if record.phase == DeliveryPhase::Delivering {
                    record.phase = DeliveryPhase::MetadataShown;
                }
                record.view_count = record.view_count.saturating_sub(record.deliveries_in_flight);
                record.deliveries_in_flight = 0;
                record.revision += 1;
                released += 1;
            }
            released
        })
    }
}
