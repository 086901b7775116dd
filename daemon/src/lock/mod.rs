//! Process singleton lock
//!
//! A per-user marker file records the pid of the running instance. Markers
//! left behind by crashed processes are detected with a liveness probe and
//! reclaimed.

mod guard;
mod probe;

pub use guard::{LockError, LockHandle, UNPARSABLE_GRACE};
pub use probe::is_process_alive;
