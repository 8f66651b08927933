pub mod codec;
pub mod error;
pub mod frame;
pub mod header;
pub mod number;
pub mod types;

pub use types::*;
