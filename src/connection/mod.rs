//! The connection layer (§2, §4): ties packet codec, crypto, streams,
//! recovery, congestion, flow control, and migration into the single
//! object an application drives.

pub mod conn;
pub mod space;
pub mod state;
pub mod streams;
pub mod timer;

pub use conn::Connection;
pub use state::ConnectionState;
