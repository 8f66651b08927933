//! QUIC wire version (§3, RFC 9000 §15).

pub const QUIC_VERSION_1: u32 = 0x0000_0001;
pub const VERSION_NEGOTIATION: u32 = 0x0000_0000;

pub fn is_supported(version: u32) -> bool {
    version == QUIC_VERSION_1
}
