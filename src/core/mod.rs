//! Core application primitives (service, scheduling, HTTP surface)

pub mod clock;
pub mod http;
pub mod retry;
pub mod runtime;
pub mod scheduler;
pub mod service;

pub use clock::{Clock, SystemClock, TokioClock};
pub use http::{create_router, start_server, AppState};
pub use retry::RetryPolicy;
pub use runtime::{Collaborators, RuntimeError, SignalRuntime};
pub use scheduler::{utc_offset, ResetScheduler, SchedulerError};
pub use service::{SignalService, SignalView, SubmitError, Submission};
