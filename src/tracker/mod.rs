/// Generic history tracker
///
/// Schema-typed, file-backed record stores with fuzzy best-match lookup,
/// used by plugins to turn shorthand into the target a person usually means.

pub mod dedup;
pub mod item;
pub mod manager;
pub mod schema;
pub mod similarity;
pub mod store;

pub use dedup::{DedupStrategy, KeyedBuckets, PairwiseScan, DEFAULT_DEDUP_THRESHOLD};
pub use item::TrackerItem;
pub use manager::{SharedTracker, TrackerManager};
pub use schema::{ColumnType, Schema, Value, SEQ_SEPARATOR};
pub use similarity::{closeness, default_compare, default_merge, CompareFn, MergeFn};
pub use store::Tracker;
