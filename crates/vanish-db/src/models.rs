//! Row types that map directly to SQLite rows, kept apart from the core
//! model so the schema can change without touching the engine.

use chrono::{DateTime, SecondsFormat, Utc};
use vanish_core::{ContentBody, ContentRecord, DeliveryPhase, FileBody, StoreError};

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

pub struct ContentRow {
    pub id: String,
    pub kind: String,
    pub text_content: Option<String>,
    pub blob_path: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub password_hash: Option<String>,
    pub one_time_view: bool,
    pub max_views: Option<i64>,
    pub view_count: i64,
    pub expires_at: String,
    pub owner_id: Option<String>,
    pub is_active: bool,
    pub deactivated_at: Option<String>,
    pub created_at: String,
    pub phase: String,
    pub deliveries_in_flight: i64,
    pub revision: i64,
}

pub(crate) const CONTENT_COLUMNS: &str = "id, kind, text_content, blob_path, file_name, file_size, \
     mime_type, password_hash, one_time_view, max_views, view_count, expires_at, owner_id, \
     is_active, deactivated_at, created_at, phase, deliveries_in_flight, revision";

impl ContentRow {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            text_content: row.get(2)?,
            blob_path: row.get(3)?,
            file_name: row.get(4)?,
            file_size: row.get(5)?,
            mime_type: row.get(6)?,
            password_hash: row.get(7)?,
            one_time_view: row.get(8)?,
            max_views: row.get(9)?,
            view_count: row.get(10)?,
            expires_at: row.get(11)?,
            owner_id: row.get(12)?,
            is_active: row.get(13)?,
            deactivated_at: row.get(14)?,
            created_at: row.get(15)?,
            phase: row.get(16)?,
            deliveries_in_flight: row.get(17)?,
            revision: row.get(18)?,
        })
    }

    pub fn from_record(record: &ContentRecord) -> Self {
        let (kind, text_content, file) = match &record.body {
            ContentBody::Text(text) => ("text", Some(text.clone()), None),
            ContentBody::File(file) => ("file", None, Some(file)),
        };
        Self {
            id: record.id.clone(),
            kind: kind.to_string(),
            text_content,
            blob_path: file.and_then(|f| f.blob_path.clone()),
            file_name: file.map(|f| f.file_name.clone()),
            file_size: file.map(|f| i64::try_from(f.file_size).unwrap_or(i64::MAX)),
            mime_type: file.map(|f| f.mime_type.clone()),
            password_hash: record.password_hash.clone(),
            one_time_view: record.one_time_view,
            max_views: record.max_views.map(i64::from),
            view_count: i64::from(record.view_count),
            expires_at: format_ts(record.expires_at),
            owner_id: record.owner.clone(),
            is_active: record.is_active,
            deactivated_at: record.deactivated_at.map(format_ts),
            created_at: format_ts(record.created_at),
            phase: record.phase.as_str().to_string(),
            deliveries_in_flight: i64::from(record.deliveries_in_flight),
            revision: i64::try_from(record.revision).unwrap_or(i64::MAX),
        }
    }

    pub fn into_record(self) -> Result<ContentRecord, StoreError> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::Corrupt { id: id.clone(), reason };

        let body = match self.kind.as_str() {
            "text" => ContentBody::Text(
                self.text_content
                    .ok_or_else(|| corrupt("text row without text".to_string()))?,
            ),
            "file" => ContentBody::File(FileBody {
                blob_path: self.blob_path,
                file_name: self
                    .file_name
                    .ok_or_else(|| corrupt("file row without name".to_string()))?,
                file_size: u64::try_from(self.file_size.unwrap_or(0))
                    .map_err(|e| corrupt(format!("file_size: {}", e)))?,
                mime_type: self
                    .mime_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
            }),
            other => return Err(corrupt(format!("unknown kind {}", other))),
        };

        let max_views = self
            .max_views
            .map(u32::try_from)
            .transpose()
            .map_err(|e| corrupt(format!("max_views: {}", e)))?;
        let view_count =
            u32::try_from(self.view_count).map_err(|e| corrupt(format!("view_count: {}", e)))?;
        let deliveries_in_flight = u32::try_from(self.deliveries_in_flight)
            .map_err(|e| corrupt(format!("deliveries_in_flight: {}", e)))?;
        let revision =
            u64::try_from(self.revision).map_err(|e| corrupt(format!("revision: {}", e)))?;
        let phase = self.phase.parse::<DeliveryPhase>().map_err(corrupt)?;
        let expires_at = parse_ts(&self.expires_at).map_err(corrupt)?;
        let created_at = parse_ts(&self.created_at).map_err(corrupt)?;
        let deactivated_at = self
            .deactivated_at
            .as_deref()
            .map(parse_ts)
            .transpose()
            .map_err(corrupt)?;

        Ok(ContentRecord {
            id,
            body,
            password_hash: self.password_hash,
            one_time_view: self.one_time_view,
            max_views,
            view_count,
            expires_at,
            owner: self.owner_id,
            is_active: self.is_active,
            deactivated_at,
            created_at,
            phase,
            deliveries_in_flight,
            revision,
        })
    }
}

/// Fixed-width UTC form, so SQL text comparison orders by time.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {}: {}", s, e))
}
