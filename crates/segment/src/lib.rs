pub mod background;
pub mod cache;
pub mod counters;
pub mod error;
pub mod memory;
pub mod notify;
pub mod persistence;
pub mod queries;
pub mod reconcile;
pub mod rule_store;
pub mod scoring;
pub mod service;

// Re-export key types
pub use cache::{DefinitionSnapshot, SnapshotCell};
pub use counters::RecalculationSummary;
pub use error::{Result, SegmentError};
pub use memory::MemoryPersistence;
pub use notify::{BroadcastNotifier, ChangeNotification, ChangeNotifier, NoopNotifier};
pub use persistence::{PartialList, PersistenceService};
pub use reconcile::ReconcileSummary;
pub use service::{SegmentService, SegmentsAndScores};
