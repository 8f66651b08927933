pub mod clock;
pub mod loss;
pub mod rtt;
pub mod sent;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use rtt::RttEstimator;
pub use sent::{SentPacket, SentPacketTracker};
