pub mod counter;
pub mod hardware;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod replicator;
pub mod walk;

pub use counter::count_entries;
pub use hardware::{HardwareAdapter, MountRecord, MountTable, SupportedFilesystem, filter_by_filesystem};
pub use models::{DestinationTarget, ReplicationPlan, ReplicationReport, RunSummary};
pub use orchestrator::Orchestrator;
pub use progress::{NullSink, ProgressFactory, ProgressMode, ProgressSink, ProgressState};
pub use replicator::{ReplicationError, Replicator};
pub use walk::{Walk, WalkEntry};
