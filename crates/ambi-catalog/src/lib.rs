//! The item catalog: one small JSON document per known video under
//! `items/`, binaries under `binaries/`, both keyed by the media server's
//! item id.
//!
//! The scheduler is the only writer of extraction state; the orchestrator
//! only reads. Writes go through a temp file and an atomic rename so a
//! concurrent reader never sees a half-written document. Documents are
//! never deleted: an item whose source file vanished simply stops being
//! eligible until the file comes back under the same id.

mod item;
mod store;

pub use item::{
    parse_server_date, CatalogItem, ExtractionStatus, ItemKind, NewItem, QueuePolicy,
};
pub use store::{Catalog, CatalogError, CatalogStats, QueueFilter, StorageInfo, UpsertOutcome};
