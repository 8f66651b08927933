pub mod anti_replay;
pub mod ticket;

pub use anti_replay::AntiReplayWindow;
pub use ticket::{SessionTicket, TicketCache};
