//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{HandlerContext, Reply, handle_command};
pub use machine::{InContinuation, TerminalAction, TransferMode, TransferState, progress_mark};
