//! Workflow orchestration core.
//!
//! | Module         | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | `state`        | `RunState`, outcomes, history and client projection |
//! | `request`      | Request validation ahead of any stage                |
//! | `reducer`      | Pure per-field merge of stage results               |
//! | `router`       | The fixed stage graph and iteration ceiling          |
//! | `orchestrator` | Control loop, retries, cancellation, checkpoints    |
//! | `checkpoint`   | Last-write-wins snapshots keyed by run id           |
//! | `events`       | Ordered per-run event delivery to observers          |

pub mod checkpoint;
pub mod events;
pub mod orchestrator;
pub mod reducer;
pub mod request;
pub mod router;
pub mod state;

pub use checkpoint::{CheckpointStore, RetentionPolicy};
pub use events::{EventEmitter, PipelineEvent, Subscription};
pub use orchestrator::{ExecutionPolicy, Orchestrator, RunHandle};
pub use request::{DebugRequest, RequestLimits};
pub use state::{FailureCause, FailureKind, Outcome, Phase, RunProjection, RunState};
