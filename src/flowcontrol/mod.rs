pub mod connection;
pub mod stream;

pub use connection::{RecvFlowControl, SendFlowControl};
pub use stream::{StreamRecvFlowControl, StreamSendFlowControl};
