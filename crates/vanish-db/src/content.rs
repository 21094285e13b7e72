use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use vanish_core::{ContentRecord, ContentStore, StoreError};

use crate::Database;
use crate::models::{CONTENT_COLUMNS, ContentRow, format_ts};
use crate::queries::OptionalExt;

impl ContentStore for Database {
    fn insert(&self, record: &ContentRecord) -> Result<(), StoreError> {
        let row = ContentRow::from_record(record);
        self.with_conn_mut(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO content ({}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                    CONTENT_COLUMNS
                ),
                params![
                    row.id,
                    row.kind,
                    row.text_content,
                    row.blob_path,
                    row.file_name,
                    row.file_size,
                    row.mime_type,
                    row.password_hash,
                    row.one_time_view,
                    row.max_views,
                    row.view_count,
                    row.expires_at,
                    row.owner_id,
                    row.is_active,
                    row.deactivated_at,
                    row.created_at,
                    row.phase,
                    row.deliveries_in_flight,
                    row.revision,
                ],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<ContentRecord>, StoreError> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM content WHERE id = ?1", CONTENT_COLUMNS),
                [id],
                ContentRow::from_row,
            )
            .optional()
        })?;
        row.map(ContentRow::into_record).transpose()
    }

    fn find_by_owner(&self, owner: &str) -> Result<Vec<ContentRecord>, StoreError> {
        let rows = self.with_conn(|conn| {
            query_rows(
                conn,
                &format!(
                    "SELECT {} FROM content WHERE owner_id = ?1 ORDER BY created_at DESC",
                    CONTENT_COLUMNS
                ),
                params![owner],
            )
        })?;
        rows.into_iter().map(ContentRow::into_record).collect()
    }

    fn find_reclaimable(&self, now: DateTime<Utc>) -> Result<Vec<ContentRecord>, StoreError> {
        let rows = self.with_conn(|conn| {
            query_rows(
                conn,
                &format!(
                    "SELECT {} FROM content
                     WHERE expires_at <= ?1
                        OR (max_views IS NOT NULL
                            AND view_count >= max_views
                            AND deliveries_in_flight = 0
                            AND NOT (one_time_view = 1 AND kind = 'file'))",
                    CONTENT_COLUMNS
                ),
                params![format_ts(now)],
            )
        })?;
        rows.into_iter().map(ContentRow::into_record).collect()
    }

    fn compare_and_swap(
        &self,
        expected_revision: u64,
        next: &ContentRecord,
    ) -> Result<bool, StoreError> {
        let row = ContentRow::from_record(next);
        let expected = revision_param(&next.id, expected_revision)?;
        let changed = self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "UPDATE content
                 SET view_count = ?1, is_active = ?2, deactivated_at = ?3,
                     blob_path = ?4, phase = ?5, deliveries_in_flight = ?6,
                     revision = revision + 1
                 WHERE id = ?7 AND revision = ?8",
                params![
                    row.view_count,
                    row.is_active,
                    row.deactivated_at,
                    row.blob_path,
                    row.phase,
                    row.deliveries_in_flight,
                    row.id,
                    expected,
                ],
            )?)
        })?;
        Ok(changed == 1)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.with_conn_mut(|conn| {
            Ok(conn.execute("DELETE FROM content WHERE id = ?1", [id])?)
        })?;
        Ok(removed > 0)
    }

    fn delete_if_revision(&self, id: &str, expected_revision: u64) -> Result<bool, StoreError> {
        let expected = revision_param(id, expected_revision)?;
        let removed = self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "DELETE FROM content WHERE id = ?1 AND revision = ?2",
                params![id, expected],
            )?)
        })?;
        Ok(removed > 0)
    }

    fn release_delivery_claims(&self) -> Result<usize, StoreError> {
        let released = self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "UPDATE content
                 SET phase = CASE WHEN phase = 'delivering' THEN 'metadata_shown' ELSE phase END,
                     view_count = MAX(view_count - deliveries_in_flight, 0),
                     deliveries_in_flight = 0,
                     revision = revision + 1
                 WHERE phase = 'delivering' OR deliveries_in_flight > 0",
                [],
            )?)
        })?;
        Ok(released)
    }
}

/// Revisions are stored as SQLite integers; one past `i64::MAX` can never
/// have been written, so it is reported rather than clamped.
fn revision_param(id: &str, revision: u64) -> Result<i64, StoreError> {
    i64::try_from(revision).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: format!("revision: {}", e),
    })
}

fn query_rows(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> anyhow::Result<Vec<ContentRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, ContentRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
