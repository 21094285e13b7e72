use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use crate::error::{InvalidInput, ShareError, StoreError};
use crate::model::{
    ContentBody, ContentKind, ContentRecord, ContentSnapshot, DeliveryPhase, FileBody,
};
use crate::password::hash_password;
use crate::policy::{self, Decision};
use crate::storage::Storage;
use crate::store::ContentStore;

pub use crate::policy::Intent;

/// Default lifetime of an upload when no expiry is requested.
pub const DEFAULT_EXPIRY_MINUTES: i64 = 10;

/// Length of the public link token.
const ID_LENGTH: usize = 10;

/// Conditional updates retried before giving up. A consumer can only lose a
/// race to another successful mutation, so this bounds the work per call.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Who may delete a record by id. An owned record is only ever deletable by
/// its owner; the policy decides the fate of anonymous uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Anonymous uploads cannot be deleted, only left to expire.
    #[default]
    OwnerOnly,
    /// Anyone holding the id of an anonymous upload may delete it.
    AllowAnonymous,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the web client; share links are `{share_base}/view/{id}`.
    pub share_base: String,
    pub delete_policy: DeletePolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            share_base: "http://localhost:5173".to_string(),
            delete_policy: DeletePolicy::default(),
        }
    }
}

/// Requested lifetime. An explicit date and/or time wins over `minutes`.
#[derive(Debug, Clone, Default)]
pub struct ExpiryRequest {
    pub minutes: Option<i64>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

impl ExpiryRequest {
    pub fn in_minutes(minutes: i64) -> Self {
        Self { minutes: Some(minutes), ..Self::default() }
    }

    /// Absolute expiry for a request made at `now`. Explicit date/time is UTC;
    /// a date alone means the end of that day, a time alone means today.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, InvalidInput> {
        if self.date.is_none() && self.time.is_none() {
            let minutes = self.minutes.unwrap_or(DEFAULT_EXPIRY_MINUTES);
            if minutes < 0 {
                return Err(InvalidInput::InvalidExpiry(format!(
                    "negative minutes: {}",
                    minutes
                )));
            }
            return Duration::try_minutes(minutes)
                .and_then(|d| now.checked_add_signed(d))
                .ok_or_else(|| InvalidInput::InvalidExpiry(format!("out of range: {}", minutes)));
        }

        let date = self.date.unwrap_or_else(|| now.date_naive());
        let time = self
            .time
            .or_else(|| NaiveTime::from_hms_opt(23, 59, 0))
            .ok_or_else(|| InvalidInput::InvalidExpiry("bad time".to_string()))?;
        Ok(date.and_time(time).and_utc())
    }
}

/// A file already written to blob storage, waiting for its record.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub blob_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
}

#[derive(Debug, Default)]
pub struct NewContent {
    pub text: Option<String>,
    pub file: Option<StagedFile>,
    pub expiry: ExpiryRequest,
    pub password: Option<String>,
    pub one_time_view: bool,
    pub max_views: Option<u32>,
    pub owner: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Created {
    pub id: String,
    pub share_link: String,
    pub expires_at: DateTime<Utc>,
    pub kind: ContentKind,
}

#[derive(Debug)]
pub enum Consumed {
    /// Inline content: text, or file metadata.
    Shown(ContentSnapshot),
    /// A file body ready to stream.
    Delivery(Delivery),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deactivation {
    Deactivated,
    AlreadyInactive,
}

/// Create, consume, delete and deactivate content records.
///
/// Every mutation is read, pure transition, then `compare_and_swap` against
/// the revision that was read, retried on conflict. No per-record locks and
/// no cached state: each decision re-reads the store.
#[derive(Clone)]
pub struct ContentService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    store: Arc<dyn ContentStore>,
    storage: Arc<Storage>,
    config: ServiceConfig,
}

impl ContentService {
    pub fn new(store: Arc<dyn ContentStore>, storage: Arc<Storage>, config: ServiceConfig) -> Self {
        Self {
            inner: Arc::new(ServiceInner { store, storage, config }),
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.inner.storage
    }

    pub fn share_link(&self, id: &str) -> String {
        format!("{}/view/{}", self.inner.config.share_base.trim_end_matches('/'), id)
    }

    // ── Create ──────────────────────────────────────────────────────────

    /// Persist a new record. On any failure the staged blob, if one was
    /// passed in, is removed so no orphan survives.
    pub async fn create(&self, input: NewContent, now: DateTime<Utc>) -> Result<Created, ShareError> {
        let staged = input.file.as_ref().map(|f| f.blob_path.clone());
        match self.create_record(input, now).await {
            Ok(created) => Ok(created),
            Err(e) => {
                if let Some(blob) = staged {
                    self.remove_blob(&blob).await;
                }
                Err(e)
            }
        }
    }

    async fn create_record(&self, input: NewContent, now: DateTime<Utc>) -> Result<Created, ShareError> {
        let text = input.text.filter(|t| !t.is_empty());
        let body = match (text, input.file) {
            (Some(text), None) => ContentBody::Text(text),
            (None, Some(file)) => ContentBody::File(FileBody {
                blob_path: Some(file.blob_path),
                file_name: file.file_name,
                file_size: file.file_size,
                mime_type: file.mime_type,
            }),
            _ => return Err(InvalidInput::BothOrNeitherProvided.into()),
        };

        if input.max_views == Some(0) {
            return Err(InvalidInput::InvalidMaxViews.into());
        }
        let expires_at = input.expiry.resolve(now)?;

        let password_hash = match input.password.filter(|p| !p.is_empty()) {
            Some(password) => Some(
                tokio::task::spawn_blocking(move || hash_password(&password))
                    .await
                    .map_err(|e| StoreError::Task(e.to_string()))?
                    .map_err(StoreError::Backend)?,
            ),
            None => None,
        };

        let record = ContentRecord {
            id: generate_id(),
            body,
            password_hash,
            one_time_view: input.one_time_view,
            max_views: input.max_views,
            view_count: 0,
            expires_at,
            owner: input.owner,
            is_active: true,
            deactivated_at: None,
            created_at: now,
            phase: DeliveryPhase::Fresh,
            deliveries_in_flight: 0,
            revision: 0,
        };
        let id = record.id.clone();
        let kind = record.kind();

        self.blocking(move |store| store.insert(&record))
            .await
            .inspect_err(|e| error!("Failed to store content {}: {}", id, e))?;

        info!("Content {} created ({}, expires {})", id, kind, expires_at);

        Ok(Created {
            share_link: self.share_link(&id),
            id,
            expires_at,
            kind,
        })
    }

    // ── Consume ─────────────────────────────────────────────────────────

    /// Authorize and apply one consumption.
    ///
    /// An expired record is purged before `Expired` is returned. For a
    /// `FetchBody`, the returned [`Delivery`] must be completed once every
    /// byte has been sent; dropping it instead gives the view back.
    pub async fn consume(
        &self,
        id: &str,
        password: Option<&str>,
        now: DateTime<Utc>,
        intent: Intent,
    ) -> Result<Consumed, ShareError> {
        let password = password.filter(|p| !p.is_empty()).map(str::to_owned);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let lookup = id.to_owned();
            let supplied = password.clone();
            let (record, decision) = self
                .blocking(move |store| {
                    let record = store.find_by_id(&lookup)?;
                    let decision = policy::evaluate(record.as_ref(), supplied.as_deref(), now, intent);
                    Ok((record, decision))
                })
                .await?;

            let record = match (decision, record) {
                (Decision::Allow, Some(record)) => record,
                (Decision::Expired, Some(record)) => {
                    if let Err(e) = self.purge(&record).await {
                        error!("Failed to purge expired content {}: {}", record.id, e);
                    }
                    info!("Content {} expired on access", record.id);
                    return Err(ShareError::Expired);
                }
                (decision, _) => {
                    return Err(decision.into_error().unwrap_or(ShareError::NotFound));
                }
            };

            let expected = record.revision;
            match plan(&record, intent) {
                Plan::Count { mut next, reveal_text } => {
                    if self.swap(expected, &next).await? {
                        next.revision = expected + 1;
                        debug!("Content {} viewed ({} views)", next.id, next.view_count);
                        return Ok(Consumed::Shown(next.snapshot(reveal_text)));
                    }
                }
                Plan::ShowAndDestroy => {
                    let target = record.id.clone();
                    if self
                        .blocking(move |store| store.delete_if_revision(&target, expected))
                        .await?
                    {
                        let mut shown = record;
                        shown.view_count = shown.view_count.saturating_add(1);
                        info!("One-time content {} viewed and destroyed", shown.id);
                        return Ok(Consumed::Shown(shown.snapshot(true)));
                    }
                }
                Plan::Claim { mut next, settlement } => {
                    if self.swap(expected, &next).await? {
                        next.revision = expected + 1;
                        return self.open_delivery(next, settlement).await.map(Consumed::Delivery);
                    }
                }
            }

            debug!("Content {} changed during consume, retrying", id);
        }

        warn!("Content {}: consume gave up after {} conflicts", id, MAX_CAS_ATTEMPTS);
        Err(StoreError::Contention(MAX_CAS_ATTEMPTS).into())
    }

    /// `consume` with `Intent::Peek`.
    pub async fn peek(
        &self,
        id: &str,
        password: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ContentSnapshot, ShareError> {
        match self.consume(id, password, now, Intent::Peek).await? {
            Consumed::Shown(snapshot) => Ok(snapshot),
            // peeks never claim a body transfer
            Consumed::Delivery(delivery) => {
                let snapshot = delivery.snapshot().clone();
                delivery.abort().await;
                Ok(snapshot)
            }
        }
    }

    /// `consume` with `Intent::FetchBody`.
    pub async fn fetch_body(
        &self,
        id: &str,
        password: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Delivery, ShareError> {
        match self.consume(id, password, now, Intent::FetchBody).await? {
            Consumed::Delivery(delivery) => Ok(delivery),
            Consumed::Shown(_) => Err(InvalidInput::NotAFile.into()),
        }
    }

    async fn open_delivery(
        &self,
        claimed: ContentRecord,
        settlement: Settlement,
    ) -> Result<Delivery, ShareError> {
        let ticket = DeliveryTicket {
            service: self.clone(),
            id: claimed.id.clone(),
            blob: claimed.blob_path().map(str::to_owned),
            settlement,
        };

        let Some(blob) = ticket.blob.clone() else {
            ticket.abort().await;
            return Err(ShareError::NotFound);
        };

        match self.inner.storage.open(&blob).await {
            Ok(file) => Ok(Delivery {
                snapshot: claimed.snapshot(false),
                file,
                ticket: Some(ticket),
            }),
            Err(e) => {
                error!("Failed to open blob {} for content {}: {}", blob, claimed.id, e);
                ticket.abort().await;
                Err(e.into())
            }
        }
    }

    // ── Delete / deactivate ─────────────────────────────────────────────

    /// Hard-delete a record and its blob. Who may do this is governed by the
    /// configured [`DeletePolicy`]; a refused caller sees `NotFound`.
    pub async fn delete(&self, id: &str, requester: Option<&str>) -> Result<(), ShareError> {
        let record = self.find(id).await?.ok_or(ShareError::NotFound)?;

        let allowed = match (record.owner.as_deref(), requester) {
            (Some(owner), Some(requester)) => owner == requester,
            (Some(_), None) => false,
            (None, _) => self.inner.config.delete_policy == DeletePolicy::AllowAnonymous,
        };
        if !allowed {
            return Err(ShareError::NotFound);
        }

        self.purge(&record).await?;
        info!("Content {} deleted", id);
        Ok(())
    }

    /// Deactivate in place. A file's blob is removed immediately and its
    /// reference cleared, so this cannot be undone. `owner`, when given,
    /// scopes the lookup: another owner's record reports `NotFound`.
    pub async fn deactivate(
        &self,
        id: &str,
        owner: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Deactivation, ShareError> {
        let scope = owner.map(str::to_owned);
        let owned_by_scope = move |record: &ContentRecord| match &scope {
            Some(owner) => record.owner.as_deref() == Some(owner.as_str()),
            None => true,
        };

        let outcome = self
            .update(id, |record| {
                if !owned_by_scope(record) || !record.is_active {
                    return None;
                }
                let mut next = record.clone();
                next.is_active = false;
                next.deactivated_at = Some(now);
                if let ContentBody::File(file) = &mut next.body {
                    file.blob_path = None;
                }
                Some(next)
            })
            .await?;

        match outcome {
            Updated::Missing => Err(ShareError::NotFound),
            Updated::Unchanged(current) if !owned_by_scope(&current) => Err(ShareError::NotFound),
            Updated::Unchanged(_) => Ok(Deactivation::AlreadyInactive),
            Updated::Changed { before } => {
                if let Some(blob) = before.blob_path() {
                    self.remove_blob(blob).await;
                }
                info!("Content {} deactivated", id);
                Ok(Deactivation::Deactivated)
            }
        }
    }

    /// Return every stranded `Delivering` claim to `MetadataShown`.
    pub async fn recover_delivery_claims(&self) -> Result<usize, ShareError> {
        let released = self.blocking(|store| store.release_delivery_claims()).await?;
        if released > 0 {
            warn!("Released {} delivery claims left by a previous run", released);
        }
        Ok(released)
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    /// Run a store call on the blocking pool.
    pub(crate) async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn ContentStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.inner.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StoreError::Task(e.to_string())
            })?
    }

    pub(crate) async fn find(&self, id: &str) -> Result<Option<ContentRecord>, StoreError> {
        let id = id.to_owned();
        self.blocking(move |store| store.find_by_id(&id)).await
    }

    async fn swap(&self, expected: u64, next: &ContentRecord) -> Result<bool, StoreError> {
        let next = next.clone();
        self.blocking(move |store| store.compare_and_swap(expected, &next)).await
    }

    /// Read-modify-CAS loop. `f` returns `None` to leave the record alone.
    async fn update<F>(&self, id: &str, f: F) -> Result<Updated, StoreError>
    where
        F: Fn(&ContentRecord) -> Option<ContentRecord>,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(current) = self.find(id).await? else {
                return Ok(Updated::Missing);
            };
            let Some(next) = f(&current) else {
                return Ok(Updated::Unchanged(current));
            };
            if self.swap(current.revision, &next).await? {
                return Ok(Updated::Changed { before: current });
            }
        }
        Err(StoreError::Contention(MAX_CAS_ATTEMPTS))
    }

    /// Remove a record and its blob. The blob goes first and only on a
    /// best-effort basis: a missing or stuck blob never keeps the record alive.
    pub(crate) async fn purge(&self, record: &ContentRecord) -> Result<bool, StoreError> {
        if let Some(blob) = record.blob_path() {
            self.remove_blob(blob).await;
        }
        let id = record.id.clone();
        self.blocking(move |store| store.delete(&id)).await
    }

    async fn remove_blob(&self, blob: &str) {
        if let Err(e) = self.inner.storage.delete(blob).await {
            warn!("Failed to delete blob {}: {}", blob, e);
        }
    }
}

fn generate_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect()
}

enum Updated {
    Missing,
    Unchanged(ContentRecord),
    Changed { before: ContentRecord },
}

// ── Transitions ─────────────────────────────────────────────────────────

enum Plan {
    /// Persist `next` (one more view) and show it.
    Count { next: ContentRecord, reveal_text: bool },
    /// One-time text: the view is the deletion.
    ShowAndDestroy,
    /// Persist `next` as the claim for a body transfer.
    Claim { next: ContentRecord, settlement: Settlement },
}

/// How a body transfer is settled once it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    /// The reserved view stands on completion and is given back otherwise.
    /// Either way the in-flight mark is cleared.
    Counted,
    /// Delete record and blob on completion; otherwise restore the phase and
    /// count that were current before the claim.
    OneTime { previous_phase: DeliveryPhase, previous_count: u32 },
}

/// The state change an allowed consumption makes. Pure.
fn plan(record: &ContentRecord, intent: Intent) -> Plan {
    let mut next = record.clone();
    match (intent, record.one_time_view, record.kind()) {
        (Intent::Peek, true, ContentKind::Text) => Plan::ShowAndDestroy,
        (Intent::Peek, true, ContentKind::File) => {
            next.view_count = next.view_count.saturating_add(1);
            next.phase = DeliveryPhase::MetadataShown;
            Plan::Count { next, reveal_text: false }
        }
        (Intent::Peek, false, _) => {
            next.view_count = next.view_count.saturating_add(1);
            Plan::Count { next, reveal_text: true }
        }
        (Intent::FetchBody, true, _) => {
            let settlement = Settlement::OneTime {
                previous_phase: record.phase,
                previous_count: record.view_count,
            };
            if record.phase == DeliveryPhase::Fresh {
                next.view_count = next.view_count.saturating_add(1);
            }
            next.phase = DeliveryPhase::Delivering;
            Plan::Claim { next, settlement }
        }
        (Intent::FetchBody, false, _) => {
            next.view_count = next.view_count.saturating_add(1);
            next.deliveries_in_flight = next.deliveries_in_flight.saturating_add(1);
            Plan::Claim { next, settlement: Settlement::Counted }
        }
    }
}

// ── Delivery ────────────────────────────────────────────────────────────

/// An authorized file body transfer.
///
/// Read the bytes with [`Delivery::read`], then call [`Delivery::complete`].
/// A delivery dropped before completion (client went away, write failed)
/// releases its claim in the background, leaving the record as it was.
pub struct Delivery {
    snapshot: ContentSnapshot,
    file: tokio::fs::File,
    ticket: Option<DeliveryTicket>,
}

impl Delivery {
    pub fn snapshot(&self) -> &ContentSnapshot {
        &self.snapshot
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf).await
    }

    /// Settle after every byte went out. For a one-time file this deletes the
    /// record and its blob.
    pub async fn complete(mut self) -> Result<(), ShareError> {
        match self.ticket.take() {
            Some(ticket) => ticket.complete().await,
            None => Ok(()),
        }
    }

    /// Give the view back now instead of on drop.
    pub async fn abort(mut self) {
        if let Some(ticket) = self.ticket.take() {
            ticket.abort().await;
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(ticket.abort());
            }
            Err(_) => warn!(
                "Delivery of {} dropped outside a runtime; claim left for expiry",
                ticket.id
            ),
        }
    }
}

struct DeliveryTicket {
    service: ContentService,
    id: String,
    blob: Option<String>,
    settlement: Settlement,
}

impl DeliveryTicket {
    async fn complete(self) -> Result<(), ShareError> {
        match self.settlement {
            Settlement::Counted => {
                self.service
                    .update(&self.id, |record| {
                        let mut next = record.clone();
                        next.deliveries_in_flight = record.deliveries_in_flight.checked_sub(1)?;
                        Some(next)
                    })
                    .await
                    .inspect_err(|e| error!("Failed to settle delivery of {}: {}", self.id, e))?;
                debug!("Content {} delivered", self.id);
                Ok(())
            }
            Settlement::OneTime { .. } => {
                let id = self.id.clone();
                self.service
                    .blocking(move |store| store.delete(&id))
                    .await
                    .inspect_err(|e| error!("Failed to delete delivered content {}: {}", self.id, e))?;
                if let Some(blob) = &self.blob {
                    self.service.remove_blob(blob).await;
                }
                info!("One-time file {} delivered and destroyed", self.id);
                Ok(())
            }
        }
    }

    async fn abort(self) {
        let result = match self.settlement {
            Settlement::Counted => {
                self.service
                    .update(&self.id, |record| {
                        let mut next = record.clone();
                        next.deliveries_in_flight = record.deliveries_in_flight.checked_sub(1)?;
                        next.view_count = record.view_count.saturating_sub(1);
                        Some(next)
                    })
                    .await
            }
            Settlement::OneTime { previous_phase, previous_count } => {
                self.service
                    .update(&self.id, move |record| {
                        if record.phase != DeliveryPhase::Delivering {
                            return None;
                        }
                        let mut next = record.clone();
                        next.phase = previous_phase;
                        next.view_count = previous_count;
                        Some(next)
                    })
                    .await
            }
        };

        match result {
            Ok(_) => info!("Delivery of {} interrupted, view released", self.id),
            Err(e) => error!("Failed to release delivery claim on {}: {}", self.id, e),
        }
    }
}
