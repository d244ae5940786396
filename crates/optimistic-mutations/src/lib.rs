//! Optimistic mutations for dashboard records.
//!
//! [`OptimisticMutationController`] applies create/update/delete to an
//! [`EntityCollection`](entity_collection::EntityCollection) before the
//! server answers, then confirms the change or restores the prior state.
//! Mutations on the same record are serialized; different records proceed
//! concurrently.

mod controller;
mod error;
mod intent;
mod locks;
pub mod models;
mod resource;

pub use controller::OptimisticMutationController;
pub use error::{MutationError, MutationResult};
pub use intent::{MutationIntent, MutationKind, PriorSnapshot};
pub use locks::{KeyedGuard, KeyedLocks};
pub use models::{Decision, DecisionStatus, Document, Meeting, Task, TaskStatus};
pub use resource::{merge_patch, parse_list, parse_server_record, Resource};
