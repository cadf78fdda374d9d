//! Transport layer module.

pub mod mock;
pub mod traits;

pub use mock::MockController;
pub use traits::{TransferStatus, TransportError, UsbController};
