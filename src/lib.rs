//! A QUIC (RFC 9000/9001/9002/9221) transport core and QPACK (RFC 9204)
//! header-compression codec, split into the same layered pieces the
//! RFCs describe: packet framing and protection, key derivation, loss
//! detection and congestion control, flow control, connection migration,
//! and the connection object that drives them together.

#[macro_use]
pub mod macros;

pub mod config;
pub mod congestion;
pub mod connection;
pub mod crypto;
pub mod flowcontrol;
pub mod migration;
pub mod packet;
pub mod primitives;
pub mod qpack;
pub mod recovery;
pub mod result;
pub mod side;
pub mod stream;
pub mod tls;
pub mod version;
pub mod zero_rtt;

pub use config::{EndpointConfig, TransportConfig};
pub use connection::{Connection, ConnectionState};
pub use result::{QuicheError, QuicheResult};
pub use side::Side;
