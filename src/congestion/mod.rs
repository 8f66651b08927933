pub mod new_reno;
pub mod pacer;

pub use new_reno::{CongestionState, NewReno};
