//! Port abstraction layer.
//!
//! Provides the `SerialPortAdapter` trait and its implementations (serial,
//! TCP/telnet, mock), plus the lease registry that keeps one open handle per
//! device path.

pub mod error;
pub mod lease;
pub mod mock;
pub mod sync_port;
pub mod tcp_port;
pub mod traits;

pub use error::PortError;
pub use lease::PortLease;
pub use mock::MockSerialPort;
pub use sync_port::SyncSerialPort;
pub use tcp_port::TcpPort;
pub use traits::*;
