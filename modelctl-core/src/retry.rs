//! # Convergence Polling
//!
//! The server applies changes asynchronously. After creating or updating a model, a caller
//! usually wants to wait until the model exists, until the change has been enacted, or until
//! the server has reported a status for it.
//!
//! * [`deadline`]: the cancellation token and deadline every wait goes through.
//! * [`poller`]: the [`RetryPoller`] loop, its operations and its observers.
pub mod deadline;
pub mod poller;

pub use deadline::{CancellationToken, Deadline};
pub use poller::{
    Connector, Convergence, FindModel, GetModel, PollObserver, PollOperation, ProgressMarks,
    RetryPoller, TracingObserver,
};
