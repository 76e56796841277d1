pub mod classifier;
pub mod config;
pub mod daemon;
pub mod daemon_control;
pub mod gate;
pub mod ipc;
pub mod pii;
pub mod pipeline;
pub mod redaction;
pub mod snapshot;
pub mod sources;
pub mod watcher;

pub use classifier::TrajectoryClassifier;
pub use daemon::Daemon;
pub use gate::{
    ConfigAdditions, ConfirmRequest, GateController, GateError, GateFailure, ProjectSelection,
    PublishRequest,
};
pub use pii::{PiiReport, PiiScanner};
pub use pipeline::{Pipeline, ProcessedSession};
pub use redaction::{RedactionEngine, RedactionRules};
pub use snapshot::{ExportSnapshotter, ProjectFilter, SnapshotOutcome};
pub use sources::{adapters_for_scope, load_sessions, SourceAdapter, SourceError};
