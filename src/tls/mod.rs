pub mod adapter;
pub mod transport_parameters;

pub use adapter::{CryptoStream, CryptoStreams, KeyScheduleCallback, LevelSecrets};
pub use transport_parameters::TransportParameters;
