pub mod engine;
pub mod notify;

pub use engine::{
    BatchDecision, BatchOutcome, DispatchReport, RequestContext, WorkflowEngine,
};
pub use notify::{
    NoopNotifier, Notification, NotificationError, NotificationPort, RecordingNotifier,
    TracingNotifier,
};
