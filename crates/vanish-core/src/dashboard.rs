use chrono::{DateTime, Utc};
use vanish_types::api::{LinkCounts, LinkStatus};

use crate::error::ShareError;
use crate::lifecycle::{ContentService, Deactivation};
use crate::model::{ContentKind, ContentRecord, FileMeta};

/// One row of an owner's dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedLink {
    pub id: String,
    pub kind: ContentKind,
    pub file: Option<FileMeta>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub status: LinkStatus,
}

#[derive(Debug, Clone, Default)]
pub struct OwnedLinks {
    pub links: Vec<OwnedLink>,
    pub counts: LinkCounts,
}

/// Derived status. Deactivation wins over expiry.
pub fn status(record: &ContentRecord, now: DateTime<Utc>) -> LinkStatus {
    if !record.is_active {
        LinkStatus::Deactivated
    } else if record.expires_at <= now {
        LinkStatus::Expired
    } else {
        LinkStatus::Active
    }
}

impl OwnedLink {
    fn project(record: &ContentRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind(),
            file: record.file().map(FileMeta::from),
            created_at: record.created_at,
            expires_at: record.expires_at,
            is_active: record.is_active,
            deactivated_at: record.deactivated_at,
            status: status(record, now),
        }
    }
}

impl ContentService {
    /// Every record `owner` created, newest first, with per-status counts.
    pub async fn list_owned(&self, owner: &str, now: DateTime<Utc>) -> Result<OwnedLinks, ShareError> {
        let owner = owner.to_owned();
        let records = self.blocking(move |store| store.find_by_owner(&owner)).await?;

        let mut counts = LinkCounts::default();
        let links = records
            .iter()
            .map(|record| {
                let link = OwnedLink::project(record, now);
                match link.status {
                    LinkStatus::Active => counts.active += 1,
                    LinkStatus::Expired => counts.expired += 1,
                    LinkStatus::Deactivated => counts.deactivated += 1,
                }
                link
            })
            .collect();

        Ok(OwnedLinks { links, counts })
    }

    /// Deactivate a record the caller owns. Someone else's record and a
    /// missing one are indistinguishable.
    pub async fn deactivate_owned(
        &self,
        id: &str,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Deactivation, ShareError> {
        self.deactivate(id, Some(owner), now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{ExpiryRequest, NewContent, ServiceConfig, StagedFile};
    use crate::memory::MemoryStore;
    use crate::storage::Storage;
    use chrono::Duration;
    use std::sync::Arc;

    async fn service() -> (ContentService, Arc<Storage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::new(dir.path().to_path_buf()).await.unwrap());
        let service = ContentService::new(
            Arc::new(MemoryStore::new()),
            storage.clone(),
            ServiceConfig::default(),
        );
        (service, storage, dir)
    }

    fn owned_text(owner: &str, minutes: i64) -> NewContent {
        NewContent {
            text: Some("note".to_string()),
            owner: Some(owner.to_string()),
            expiry: ExpiryRequest::in_minutes(minutes),
            ..NewContent::default()
        }
    }

    #[tokio::test]
    async fn buckets_by_status() {
        let (service, storage, _dir) = service().await;
        let t0 = Utc::now();

        let short = service.create(owned_text("alice", 1), t0).await.unwrap();
        let long = service
            .create(owned_text("alice", 60), t0 + Duration::seconds(1))
            .await
            .unwrap();
        let blob = storage.put(b"pdf").await.unwrap();
        let file = service
            .create(
                NewContent {
                    file: Some(StagedFile {
                        blob_path: blob,
                        file_name: "r.pdf".to_string(),
                        file_size: 3,
                        mime_type: "application/pdf".to_string(),
                    }),
                    owner: Some("alice".to_string()),
                    ..NewContent::default()
                },
                t0 + Duration::seconds(2),
            )
            .await
            .unwrap();
        service.create(owned_text("bob", 60), t0).await.unwrap();

        let now = t0 + Duration::minutes(2);
        service.deactivate_owned(&file.id, "alice", now).await.unwrap();

        let owned = service.list_owned("alice", now).await.unwrap();
        assert_eq!(
            owned.counts,
            LinkCounts { active: 1, expired: 1, deactivated: 1 }
        );

        let ids: Vec<&str> = owned.links.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec![file.id.as_str(), long.id.as_str(), short.id.as_str()]);

        let deactivated = &owned.links[0];
        assert_eq!(deactivated.status, LinkStatus::Deactivated);
        assert_eq!(deactivated.deactivated_at, Some(now));
        assert_eq!(deactivated.file.as_ref().unwrap().file_name, "r.pdf");
        assert_eq!(owned.links[1].status, LinkStatus::Active);
        assert_eq!(owned.links[2].status, LinkStatus::Expired);
    }

    #[tokio::test]
    async fn expiry_instant_counts_as_expired() {
        let (service, _storage, _dir) = service().await;
        let t0 = Utc::now();
        let created = service.create(owned_text("alice", 5), t0).await.unwrap();

        let owned = service.list_owned("alice", created.expires_at).await.unwrap();
        assert_eq!(owned.links[0].status, LinkStatus::Expired);
    }

    #[tokio::test]
    async fn non_owner_cannot_deactivate() {
        let (service, _storage, _dir) = service().await;
        let now = Utc::now();
        let created = service.create(owned_text("alice", 5), now).await.unwrap();

        let err = service.deactivate_owned(&created.id, "bob", now).await.unwrap_err();
        assert!(matches!(err, ShareError::NotFound));
        let err = service.deactivate_owned("nope000000", "bob", now).await.unwrap_err();
        assert!(matches!(err, ShareError::NotFound));

        assert_eq!(
            service.deactivate_owned(&created.id, "alice", now).await.unwrap(),
            Deactivation::Deactivated
        );
        assert_eq!(
            service.deactivate_owned(&created.id, "alice", now).await.unwrap(),
            Deactivation::AlreadyInactive
        );
    }

    #[tokio::test]
    async fn empty_dashboard() {
        let (service, _storage, _dir) = service().await;
        let owned = service.list_owned("nobody", Utc::now()).await.unwrap();
        assert!(owned.links.is_empty());
        assert_eq!(owned.counts, LinkCounts::default());
    }
}
