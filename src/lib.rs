//! Host side of a framed serial link to an audio playback device: framing,
//! request/response matching, liveness, status queries, playback commands
//! and chunked file upload.

pub mod broker;
pub mod command;
pub mod config;
#[cfg(unix)]
pub mod device;
pub mod driver;
pub mod link;
pub mod liveness;
pub mod protocol;
pub mod server;
pub mod simulator;
pub mod status;
pub mod transfer;
pub mod utils;

pub use broker::{Channel, MessageBroker};
pub use config::{ClientConfig, LinkConfig};
pub use driver::{Driver, Flow};
pub use link::{Link, LinkError, LinkEvent};
pub use liveness::LinkState;
pub use simulator::DeviceSimulator;
pub use transfer::{FileTransfer, TransferFailure};
