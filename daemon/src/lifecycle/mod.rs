//! Process lifecycle: startup, hot reconfiguration and teardown

mod controller;
mod shutdown;
mod worker;

pub use controller::{ControllerStatus, LifecycleController, LifecycleError, LifecycleState};
pub use shutdown::ShutdownSignal;
pub use worker::{spawn, ControllerHandle};
