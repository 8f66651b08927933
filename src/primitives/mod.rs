pub mod varint;

pub use varint::*;
