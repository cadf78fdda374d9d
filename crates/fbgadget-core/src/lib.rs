//! fbgadget-core: device-side fastboot protocol engine in Rust.
//!
//! This crate implements the gadget (device) half of the fastboot protocol:
//! it receives ASCII commands over a bulk OUT endpoint, answers with
//! `OKAY`/`FAIL`/`DATA` frames on bulk IN, and runs the download and upload
//! data phases against a staging buffer.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, dispatch table, bounded response frames
//! - **Transport**: USB controller abstraction (mock)
//! - **State**: Transfer state and command handlers
//! - **Backend**: Collaborator traits (flash, slots, lock, attestation, platform)
//! - **Engine**: Completion-driven protocol engine
//! - **Events**: Observer pattern for operator feedback
//! - **Session**: Host-side driver for simulation and tests
//!
//! # Example
//!
//! ```no_run
//! use fbgadget_core::backend::{RecordingPlatform, Services};
//! use fbgadget_core::config::EngineConfig;
//! use fbgadget_core::session::HostSession;
//!
//! let services = Services::new(RecordingPlatform::new());
//! let mut host = HostSession::new(EngineConfig::default(), services)?;
//! let version = host.command("getvar:version")?;
//! println!("{version}");
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod staging;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use backend::{BackendError, Services};
pub use config::{BoardInfo, EngineConfig};
pub use engine::{FastbootEngine, Lifecycle};
pub use error::FastbootError;
pub use events::{Direction, FastbootEvent, FastbootObserver, NullObserver, TracingObserver};
pub use protocol::{CommandKind, Response};
pub use session::HostSession;
pub use staging::{StagingBuffer, StagingError};
pub use state::{TransferMode, TransferState};
pub use transport::{MockController, TransferStatus, TransportError, UsbController};
