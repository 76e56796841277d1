pub mod artifacts;
pub mod cipher;
pub mod db;
pub mod digest;
pub mod migrations;
pub mod models;
pub mod salt;
pub mod store;

pub use artifacts::ArtifactStore;
pub use cipher::ArtifactCipher;
pub use db::{Database, SETTING_KEYS};
pub use salt::{generate_salt, load_or_create_salt};
pub use store::StateStore;
pub use models::{
    DaemonState, Defect, ExportSnapshot, ExportSummary, Finding, FindingLayer, FullNameScan,
    GateState, Location, Message, PublisherConfig, PushKind, PushRecord, QuarantineRecord,
    RecordMetadata, RedactedSession, RejectRecord, RetryState, ReviewAttestations, Role,
    ScanExample, Session, SessionRecord, SessionStats, Settings, Stage, TextField, ToolUse,
    TrajectoryLabel,
};
