use chrono::{DateTime, Utc};

pub use vanish_types::api::ContentKind;

/// Where a record stands on its way to single delivery.
///
/// Only one-time files move past `Fresh`. A deleted record has no phase; it
/// is simply absent from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPhase {
    /// Nothing consumed yet.
    Fresh,
    /// Metadata was shown once; the single body transfer is still owed.
    MetadataShown,
    /// A body transfer holds the claim. Reverts if the transfer never completes.
    Delivering,
}

impl DeliveryPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryPhase::Fresh => "fresh",
            DeliveryPhase::MetadataShown => "metadata_shown",
            DeliveryPhase::Delivering => "delivering",
        }
    }
}

impl std::str::FromStr for DeliveryPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fresh" => Ok(DeliveryPhase::Fresh),
            "metadata_shown" => Ok(DeliveryPhase::MetadataShown),
            "delivering" => Ok(DeliveryPhase::Delivering),
            _ => Err(format!("Invalid delivery phase: {}", s)),
        }
    }
}

/// An uploaded file. `blob_path` is cleared when the owner deactivates the
/// link; name, size and type stay behind for the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBody {
    pub blob_path: Option<String>,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBody {
    Text(String),
    File(FileBody),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecord {
    pub id: String,
    pub body: ContentBody,
    pub password_hash: Option<String>,
    pub one_time_view: bool,
    pub max_views: Option<u32>,
    pub view_count: u32,
    pub expires_at: DateTime<Utc>,
    pub owner: Option<String>,
    pub is_active: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub phase: DeliveryPhase,
    /// Counted body transfers that reserved a view and have not settled yet.
    pub deliveries_in_flight: u32,
    /// Optimistic concurrency version, bumped by every conditional update.
    pub revision: u64,
}

impl ContentRecord {
    pub fn kind(&self) -> ContentKind {
        match self.body {
            ContentBody::Text(_) => ContentKind::Text,
            ContentBody::File(_) => ContentKind::File,
        }
    }

    pub fn file(&self) -> Option<&FileBody> {
        match &self.body {
            ContentBody::File(file) => Some(file),
            ContentBody::Text(_) => None,
        }
    }

    pub fn blob_path(&self) -> Option<&str> {
        self.file().and_then(|f| f.blob_path.as_deref())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_views.is_some_and(|max| self.view_count >= max)
    }

    /// Whether the sweeper may remove the record at `now`.
    ///
    /// Expiry always reclaims. Exhaustion only does once nothing is owed: no
    /// counted transfer is still running, and the record is not a one-time
    /// file, whose single view is spent by the body transfer itself.
    pub fn is_reclaimable(&self, now: DateTime<Utc>) -> bool {
        if self.expires_at <= now {
            return true;
        }
        self.is_exhausted()
            && self.deliveries_in_flight == 0
            && !(self.one_time_view && self.kind() == ContentKind::File)
    }

    /// What a caller may see. Text is included only when `reveal_text` is set.
    pub fn snapshot(&self, reveal_text: bool) -> ContentSnapshot {
        let (text, file) = match &self.body {
            ContentBody::Text(text) => (reveal_text.then(|| text.clone()), None),
            ContentBody::File(file) => (None, Some(FileMeta::from(file))),
        };
        ContentSnapshot {
            id: self.id.clone(),
            kind: self.kind(),
            text,
            file,
            expires_at: self.expires_at,
            view_count: self.view_count,
            max_views: self.max_views,
            one_time_view: self.one_time_view,
        }
    }
}

/// File details safe to hand out: no blob path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
}

impl From<&FileBody> for FileMeta {
    fn from(file: &FileBody) -> Self {
        Self {
            file_name: file.file_name.clone(),
            file_size: file.file_size,
            mime_type: file.mime_type.clone(),
        }
    }
}

/// Result of a successful consumption. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSnapshot {
    pub id: String,
    pub kind: ContentKind,
    pub text: Option<String>,
    pub file: Option<FileMeta>,
    pub expires_at: DateTime<Utc>,
    pub view_count: u32,
    pub max_views: Option<u32>,
    pub one_time_view: bool,
}
