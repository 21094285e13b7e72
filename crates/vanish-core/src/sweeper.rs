use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::ShareError;
use crate::lifecycle::ContentService;

/// Background task that reclaims dead records.
///
/// Runs on an interval (first pass immediately), removing every record that
/// has expired or used up its views, together with its blob. Failures are
/// logged and the loop carries on.
pub async fn run_sweep_loop(service: ContentService, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        interval.tick().await;

        match sweep_once(&service, Utc::now()).await {
            Ok(count) => {
                if count > 0 {
                    info!("Sweep: reclaimed {} records", count);
                }
            }
            Err(e) => {
                warn!("Sweep error: {}", e);
            }
        }
    }
}

/// One reclamation pass. Returns how many records were removed.
///
/// Each record is deleted only if it is unchanged since it was listed, so a
/// consumer racing the sweep is never pulled out from under. Blob removal is
/// best-effort and never blocks the record deletion.
pub async fn sweep_once(service: &ContentService, now: DateTime<Utc>) -> Result<usize, ShareError> {
    let candidates = service
        .blocking(move |store| store.find_reclaimable(now))
        .await?;

    let mut reclaimed = 0;
    for record in candidates {
        let id = record.id.clone();
        let revision = record.revision;
        let removed = match service
            .blocking(move |store| store.delete_if_revision(&id, revision))
            .await
        {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Sweep: failed to delete {}: {}", record.id, e);
                continue;
            }
        };

        if !removed {
            debug!("Sweep: {} changed since listing, skipped", record.id);
            continue;
        }
        if let Some(blob) = record.blob_path() {
            if let Err(e) = service.storage().delete(blob).await {
                warn!("Sweep: failed to delete blob {} of {}: {}", blob, record.id, e);
            }
        }
        reclaimed += 1;
    }

    Ok(reclaimed)
}
