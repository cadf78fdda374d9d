//! Protocol module - fastboot wire definitions.

pub mod command;
pub mod constants;
pub mod response;

pub use command::{CommandKind, DISPATCH_TABLE, lookup_prefix, lookup_word, parse_hex_size, split_arg};
pub use constants::*;
pub use response::{Response, ResponseBuffer, ResponseError};
