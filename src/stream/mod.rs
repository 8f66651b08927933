pub mod engine;
pub mod id;
pub mod reassembly;
pub mod recv;
pub mod send;

pub use engine::Stream;
pub use id::{Directionality, StreamId};
