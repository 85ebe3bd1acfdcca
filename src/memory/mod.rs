//! Knowledge records: store, recall, reflect, forget, and corridor promotion.
//!
//! The same [`MemoryStore`] type backs the per-workspace `memory.db` and the
//! shared corridor database; the two differ only in the embedding target
//! they enqueue and in the `source` tag their recall hits carry.

pub mod classify;
pub mod corridor;
pub mod forget;
pub mod recall;
pub mod reflect;
pub mod store;
pub mod types;

pub use classify::classify;
pub use corridor::{promote, Promotion};
pub use forget::ForgetResult;
pub use recall::{recall_across, scope_admits};
pub use reflect::{reflect_over, Contradiction, Pattern, Reflection};
pub use store::{normalize_tags, resolve_scope, MemoryStore};
pub use types::{NewRecord, RecallFilter, RecallHit, Record, RecordKind, Scope};
