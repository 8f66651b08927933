//! QUIC transport parameters (§6, RFC 9000 §18): the TLS extension both
//! endpoints exchange during the handshake to advertise the
//! [`crate::config::TransportConfig`] values they intend to honor.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::TransportConfig;
use crate::packet::types::ConnectionId;
use crate::primitives::varint::VarInt;
use crate::result::{ConnectionError, QuicheResult};

const MAX_IDLE_TIMEOUT: u64 = 0x01;
const MAX_UDP_PAYLOAD_SIZE: u64 = 0x03;
const INITIAL_MAX_DATA: u64 = 0x04;
const INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 0x05;
const INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 0x06;
const INITIAL_MAX_STREAM_DATA_UNI: u64 = 0x07;
const INITIAL_MAX_STREAMS_BIDI: u64 = 0x08;
const INITIAL_MAX_STREAMS_UNI: u64 = 0x09;
const ACK_DELAY_EXPONENT: u64 = 0x0a;
const MAX_ACK_DELAY: u64 = 0x0b;
const DISABLE_ACTIVE_MIGRATION: u64 = 0x0c;
const ACTIVE_CONNECTION_ID_LIMIT: u64 = 0x0e;
const INITIAL_SOURCE_CONNECTION_ID: u64 = 0x0f;
const MAX_DATAGRAM_FRAME_SIZE: u64 = 0x20;

#[derive(Debug, Clone)]
pub struct TransportParameters {
    pub config: TransportConfig,
    pub initial_source_connection_id: ConnectionId,
}

impl TransportParameters {
    pub fn new(config: TransportConfig, initial_source_connection_id: ConnectionId) -> Self {
        Self { config, initial_source_connection_id }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        write_param_u64(
            &mut buf,
            MAX_IDLE_TIMEOUT,
            self.config.max_idle_timeout.map(|d| d.as_millis() as u64).unwrap_or(0),
        );
        write_param_u64(&mut buf, MAX_UDP_PAYLOAD_SIZE, self.config.max_udp_payload_size as u64);
        write_param_u64(&mut buf, INITIAL_MAX_DATA, self.config.initial_max_data);
        write_param_u64(
            &mut buf,
            INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
            self.config.initial_max_stream_data_bidi_local,
        );
        write_param_u64(
            &mut buf,
            INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
            self.config.initial_max_stream_data_bidi_remote,
        );
        write_param_u64(&mut buf, INITIAL_MAX_STREAM_DATA_UNI, self.config.initial_max_stream_data_uni);
        write_param_u64(&mut buf, INITIAL_MAX_STREAMS_BIDI, self.config.initial_max_streams_bidi);
        write_param_u64(&mut buf, INITIAL_MAX_STREAMS_UNI, self.config.initial_max_streams_uni);
        write_param_u64(&mut buf, ACK_DELAY_EXPONENT, self.config.ack_delay_exponent as u64);
        write_param_u64(&mut buf, MAX_ACK_DELAY, self.config.max_ack_delay.as_millis() as u64);
        if self.config.disable_active_migration {
            write_param_bytes(&mut buf, DISABLE_ACTIVE_MIGRATION, &[]);
        }
        write_param_u64(&mut buf, ACTIVE_CONNECTION_ID_LIMIT, self.config.active_connection_id_limit);
        write_param_bytes(
            &mut buf,
            INITIAL_SOURCE_CONNECTION_ID,
            self.initial_source_connection_id.as_slice(),
        );
        if let Some(max) = self.config.max_datagram_frame_size {
            write_param_u64(&mut buf, MAX_DATAGRAM_FRAME_SIZE, max);
        }
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> QuicheResult<Self> {
        let mut config = TransportConfig::default();
        let mut initial_source_connection_id = None;

        while buf.has_remaining() {
            let id = VarInt::decode(&mut buf)?.into_inner();
            let len = VarInt::decode(&mut buf)?.usize();
            if buf.remaining() < len {
                return Err(ConnectionError::TransportParameter("truncated transport parameter value").into());
            }
            let value = buf.copy_to_bytes(len);

            match id {
                MAX_IDLE_TIMEOUT => {
                    let ms = decode_varint_value(&value)?;
                    config.max_idle_timeout = if ms == 0 {
                        None
                    } else {
                        Some(std::time::Duration::from_millis(ms))
                    };
                }
                MAX_UDP_PAYLOAD_SIZE => {
                    config.max_udp_payload_size(decode_varint_value(&value)? as u16);
                }
                INITIAL_MAX_DATA => config.initial_max_data = decode_varint_value(&value)?,
                INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                    config.initial_max_stream_data_bidi_local = decode_varint_value(&value)?
                }
                INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                    config.initial_max_stream_data_bidi_remote = decode_varint_value(&value)?
                }
                INITIAL_MAX_STREAM_DATA_UNI => config.initial_max_stream_data_uni = decode_varint_value(&value)?,
                INITIAL_MAX_STREAMS_BIDI => config.initial_max_streams_bidi = decode_varint_value(&value)?,
                INITIAL_MAX_STREAMS_UNI => config.initial_max_streams_uni = decode_varint_value(&value)?,
                ACK_DELAY_EXPONENT => {
                    config.ack_delay_exponent(decode_varint_value(&value)? as u8);
                }
                MAX_ACK_DELAY => {
                    config.max_ack_delay = std::time::Duration::from_millis(decode_varint_value(&value)?)
                }
                DISABLE_ACTIVE_MIGRATION => config.disable_active_migration = true,
                ACTIVE_CONNECTION_ID_LIMIT => {
                    config.active_connection_id_limit(decode_varint_value(&value)?);
                }
                INITIAL_SOURCE_CONNECTION_ID => {
                    initial_source_connection_id = Some(ConnectionId::new(value.to_vec()))
                }
                MAX_DATAGRAM_FRAME_SIZE => config.max_datagram_frame_size = Some(decode_varint_value(&value)?),
                _ => {} // unknown parameters are ignored per RFC 9000 §7.4
            }
        }

        let initial_source_connection_id = initial_source_connection_id
            .ok_or(ConnectionError::TransportParameter("missing initial_source_connection_id"))?;

        Ok(Self { config, initial_source_connection_id })
    }
}

fn write_param_u64(buf: &mut BytesMut, id: u64, value: u64) {
    let encoded = VarInt::from_u64(value).expect("transport parameter values fit in a varint");
    write_param_bytes(buf, id, &encoded.to_vec());
}

fn write_param_bytes(buf: &mut BytesMut, id: u64, value: &[u8]) {
    VarInt::from_u64(id).unwrap().encode(buf);
    VarInt::from_u64(value.len() as u64).unwrap().encode(buf);
    buf.put_slice(value);
}

fn decode_varint_value(value: &Bytes) -> QuicheResult<u64> {
    let mut cursor = value.clone();
    Ok(VarInt::decode(&mut cursor)?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_parameters_round_trip() {
        let mut config = TransportConfig::default();
        config.initial_max_data(5_000_000);
        config.disable_active_migration(true);
        let cid = ConnectionId::new(vec![1, 2, 3, 4]);
        let params = TransportParameters::new(config, cid.clone());

        let encoded = params.encode();
        let decoded = TransportParameters::decode(encoded).unwrap();

        assert_eq!(decoded.config.initial_max_data, 5_000_000);
        assert!(decoded.config.disable_active_migration);
        assert_eq!(decoded.initial_source_connection_id.as_slice(), cid.as_slice());
    }

    #[test]
    fn unknown_parameter_ids_are_ignored() {
        let mut buf = BytesMut::new();
        write_param_bytes(&mut buf, 0xff, b"future extension");
        write_param_bytes(
            &mut buf,
            INITIAL_SOURCE_CONNECTION_ID,
            &[9, 9, 9, 9],
        );
        let decoded = TransportParameters::decode(buf.freeze()).unwrap();
        assert_eq!(decoded.initial_source_connection_id.as_slice(), &[9, 9, 9, 9]);
    }

    #[test]
    fn missing_initial_source_connection_id_is_rejected() {
        let buf = BytesMut::new();
        assert!(TransportParameters::decode(buf.freeze()).is_err());
    }
}
