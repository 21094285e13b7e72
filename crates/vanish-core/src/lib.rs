//! Vanish core: the lifecycle and access-control engine for shared content.
//!
//! - `policy`: pure access decision for a record, a supplied password and a clock
//! - `lifecycle`: create / consume / delete / deactivate with optimistic CAS
//! - `sweeper`: periodic reclamation of expired and exhausted records
//! - `dashboard`: per-owner projection into status buckets
//!
//! Persistence sits behind [`ContentStore`]; uploaded bytes live in [`Storage`].

pub mod dashboard;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod model;
pub mod password;
pub mod policy;
pub mod storage;
pub mod store;
pub mod sweeper;

pub use dashboard::{OwnedLink, OwnedLinks};
pub use error::{InvalidInput, ShareError, StoreError};
pub use lifecycle::{
    Consumed, ContentService, Created, Deactivation, DeletePolicy, Delivery, ExpiryRequest,
    Intent, NewContent, ServiceConfig, StagedFile,
};
pub use memory::MemoryStore;
pub use model::{ContentBody, ContentRecord, ContentSnapshot, DeliveryPhase, FileBody, FileMeta};
pub use policy::Decision;
pub use storage::Storage;
pub use store::ContentStore;
