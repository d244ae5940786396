//! In-memory registry of domain records for one entity type.
//!
//! An [`EntityCollection`] keeps records in display order and guarantees
//! that no two records share an id. Records created locally carry a
//! [`LocalId`] until the server assigns a [`ServerId`].
//!
//! Every change is reported to a [`CollectionSink`] after it is applied.

mod collection;
mod error;
mod shared;
mod sink;
mod types;

pub use collection::{EntityCollection, InsertPosition};
pub use error::{CollectionError, CollectionResult};
pub use shared::SharedCollection;
pub use sink::{CollectionEvent, CollectionSink, NullSink, RecordingSink};
pub use types::{EntityId, EntityRecord, LocalId, ServerId, SyncState};
