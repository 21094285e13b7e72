use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::ContentRecord;

/// Durable storage for content records.
///
/// Calls are blocking; the lifecycle layer runs them on the blocking pool.
/// Implementations must be safe for concurrent access and apply
/// `compare_and_swap` and `delete_if_revision` atomically.
pub trait ContentStore: Send + Sync + 'static {
    fn insert(&self, record: &ContentRecord) -> Result<(), StoreError>;

    fn find_by_id(&self, id: &str) -> Result<Option<ContentRecord>, StoreError>;

    /// All records stamped with `owner`, newest first.
    fn find_by_owner(&self, owner: &str) -> Result<Vec<ContentRecord>, StoreError>;

    /// Records the sweeper should purge: exactly those for which
    /// [`ContentRecord::is_reclaimable`] holds at `now`.
    fn find_reclaimable(&self, now: DateTime<Utc>) -> Result<Vec<ContentRecord>, StoreError>;

    /// Overwrite the mutable fields of `next` iff the stored revision still
    /// equals `expected_revision`; the stored revision becomes
    /// `expected_revision + 1`. Returns `false` on conflict or if the record
    /// is gone.
    fn compare_and_swap(
        &self,
        expected_revision: u64,
        next: &ContentRecord,
    ) -> Result<bool, StoreError>;

    /// Idempotent. Returns `true` if a record was removed.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Remove the record only if nobody changed it since `expected_revision`.
    fn delete_if_revision(&self, id: &str, expected_revision: u64) -> Result<bool, StoreError>;

    /// Release every unsettled transfer: `Delivering` claims go back to
    /// `MetadataShown` and counted reservations return their views. Run at
    /// startup so a crash mid-transfer strands nothing.
    fn release_delivery_claims(&self) -> Result<usize, StoreError>;
}
