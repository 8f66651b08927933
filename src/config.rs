//! Transport configuration (§6 transport parameters). Grounded in
//! quinn-proto's `config.rs` builder pattern: a `TransportConfig` with
//! `&mut self -> &mut Self` setters and `..Default::default()`-friendly
//! construction, plus a per-endpoint wrapper.

use std::time::Duration;

use crate::packet::types::ConnectionId;

/// Values a compliant peer must accept per §6; used to reject
/// configuration that would produce a non-interoperable transport.
pub const MIN_MAX_UDP_PAYLOAD_SIZE: u16 = 1200;
pub const DEFAULT_ACK_DELAY_EXPONENT: u8 = 3;
pub const DEFAULT_MAX_ACK_DELAY: Duration = Duration::from_millis(25);
pub const MAX_ACK_DELAY_EXPONENT: u8 = 20;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_idle_timeout: Option<Duration>,
    pub max_udp_payload_size: u16,
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    pub ack_delay_exponent: u8,
    pub max_ack_delay: Duration,
    pub disable_active_migration: bool,
    pub active_connection_id_limit: u64,
    pub max_datagram_frame_size: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_idle_timeout: Some(Duration::from_secs(30)),
            max_udp_payload_size: 1452,
            initial_max_data: 1 << 20,
            initial_max_stream_data_bidi_local: 1 << 20,
            initial_max_stream_data_bidi_remote: 1 << 20,
            initial_max_stream_data_uni: 1 << 20,
            initial_max_streams_bidi: 100,
            initial_max_streams_uni: 100,
            ack_delay_exponent: DEFAULT_ACK_DELAY_EXPONENT,
            max_ack_delay: DEFAULT_MAX_ACK_DELAY,
            disable_active_migration: false,
            active_connection_id_limit: 4,
            max_datagram_frame_size: None,
        }
    }
}

impl TransportConfig {
    pub fn max_idle_timeout(&mut self, v: Option<Duration>) -> &mut Self {
        self.max_idle_timeout = v;
        self
    }

    /// Clamps to the §6 floor: a stack advertising below 1200 bytes
    /// could never carry an Initial packet.
    pub fn max_udp_payload_size(&mut self, v: u16) -> &mut Self {
        self.max_udp_payload_size = v.max(MIN_MAX_UDP_PAYLOAD_SIZE);
        self
    }

    pub fn initial_max_data(&mut self, v: u64) -> &mut Self {
        self.initial_max_data = v;
        self
    }

    pub fn initial_max_stream_data_bidi_local(&mut self, v: u64) -> &mut Self {
        self.initial_max_stream_data_bidi_local = v;
        self
    }

    pub fn initial_max_stream_data_bidi_remote(&mut self, v: u64) -> &mut Self {
        self.initial_max_stream_data_bidi_remote = v;
        self
    }

    pub fn initial_max_stream_data_uni(&mut self, v: u64) -> &mut Self {
        self.initial_max_stream_data_uni = v;
        self
    }

    pub fn initial_max_streams_bidi(&mut self, v: u64) -> &mut Self {
        self.initial_max_streams_bidi = v;
        self
    }

    pub fn initial_max_streams_uni(&mut self, v: u64) -> &mut Self {
        self.initial_max_streams_uni = v;
        self
    }

    pub fn ack_delay_exponent(&mut self, v: u8) -> &mut Self {
        self.ack_delay_exponent = v.min(MAX_ACK_DELAY_EXPONENT);
        self
    }

    pub fn max_ack_delay(&mut self, v: Duration) -> &mut Self {
        self.max_ack_delay = v;
        self
    }

    pub fn disable_active_migration(&mut self, v: bool) -> &mut Self {
        self.disable_active_migration = v;
        self
    }

    pub fn active_connection_id_limit(&mut self, v: u64) -> &mut Self {
        self.active_connection_id_limit = v.max(2);
        self
    }

    pub fn max_datagram_frame_size(&mut self, v: Option<u64>) -> &mut Self {
        self.max_datagram_frame_size = v;
        self
    }
}

/// Per-endpoint configuration: the transport defaults applied to every
/// connection it opens or accepts, plus the connection ID this side
/// contributes during the handshake.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub transport: TransportConfig,
    pub initial_source_connection_id: ConnectionId,
}

impl EndpointConfig {
    pub fn new(transport: TransportConfig, initial_source_connection_id: ConnectionId) -> Self {
        Self { transport, initial_source_connection_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_payload_size_is_floored_at_the_minimum() {
        let mut cfg = TransportConfig::default();
        cfg.max_udp_payload_size(500);
        assert_eq!(cfg.max_udp_payload_size, MIN_MAX_UDP_PAYLOAD_SIZE);
    }

    #[test]
    fn connection_id_limit_is_floored_at_two() {
        let mut cfg = TransportConfig::default();
        cfg.active_connection_id_limit(1);
        assert_eq!(cfg.active_connection_id_limit, 2);
    }
}
