//! External command execution.
//!
//! The tail source (`logtail2`) and the process-backed sinks (`send_nsca`,
//! `gmetric`) go through [`CommandRunner`], so tests swap in [`MockRunner`].

pub mod mock;
pub mod traits;

pub use mock::MockRunner;
pub use traits::{CommandRunner, CommandSpec, CommandStatus, RunningCommand, SystemRunner};
