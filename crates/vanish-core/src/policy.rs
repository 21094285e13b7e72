use chrono::{DateTime, Utc};

use crate::error::{InvalidInput, ShareError};
use crate::model::{ContentKind, ContentRecord, DeliveryPhase};
use crate::password::verify_password;

/// What the caller is trying to do with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Show the content inline: text, or file metadata.
    Peek,
    /// Transfer a file's bytes.
    FetchBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    NotFound,
    /// The record exists but its expiry has passed. The caller purges it.
    Expired,
    NeedsPassword,
    BadPassword,
    /// `max_views` reached.
    Exhausted,
    /// One-time file whose single view is already used or in flight.
    AlreadyViewed,
    NotAFile,
}

impl Decision {
    /// The error a denial surfaces as. `None` for `Allow`.
    pub fn into_error(self) -> Option<ShareError> {
        match self {
            Decision::Allow => None,
            Decision::NotFound => Some(ShareError::NotFound),
            Decision::Expired => Some(ShareError::Expired),
            Decision::NeedsPassword => Some(ShareError::NeedsPassword),
            Decision::BadPassword => Some(ShareError::BadPassword),
            Decision::Exhausted | Decision::AlreadyViewed => Some(ShareError::Exhausted),
            Decision::NotAFile => Some(ShareError::InvalidInput(InvalidInput::NotAFile)),
        }
    }
}

/// Decide whether `record` may be consumed right now. Pure: no side effects.
///
/// An empty supplied password counts as none. Deactivated records look
/// exactly like missing ones.
pub fn evaluate(
    record: Option<&ContentRecord>,
    supplied_password: Option<&str>,
    now: DateTime<Utc>,
    intent: Intent,
) -> Decision {
    let Some(record) = record else {
        return Decision::NotFound;
    };

    if record.is_expired(now) {
        return Decision::Expired;
    }

    if !record.is_active {
        return Decision::NotFound;
    }

    if let Some(hash) = &record.password_hash {
        match supplied_password.filter(|p| !p.is_empty()) {
            None => return Decision::NeedsPassword,
            Some(password) if !verify_password(password, hash) => {
                return Decision::BadPassword;
            }
            Some(_) => {}
        }
    }

    if intent == Intent::FetchBody && record.kind() == ContentKind::Text {
        return Decision::NotAFile;
    }

    // A one-time file is one view spread over two steps: metadata, then body.
    if record.one_time_view && record.kind() == ContentKind::File {
        return match (intent, record.phase) {
            (Intent::Peek, DeliveryPhase::Fresh) if !record.is_exhausted() => Decision::Allow,
            (Intent::Peek, DeliveryPhase::Fresh) => Decision::Exhausted,
            (Intent::Peek, _) => Decision::AlreadyViewed,
            (Intent::FetchBody, DeliveryPhase::Delivering) => Decision::AlreadyViewed,
            (Intent::FetchBody, _) => Decision::Allow,
        };
    }

    if record.is_exhausted() {
        return Decision::Exhausted;
    }

    Decision::Allow
}
