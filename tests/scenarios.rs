//! End-to-end scenarios spanning more than one module, complementing the
//! inline `#[cfg(test)]` unit tests each module already carries.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use quic_engine::config::{EndpointConfig, TransportConfig};
use quic_engine::connection::Connection;
use quic_engine::packet::types::ConnectionId;
use quic_engine::side::Side;

#[test]
fn huffman_encodes_a_single_ascii_char_with_padding_ones() {
    // 'a' (0x61) has the 5-bit Huffman code 0b00011; the remaining 3 bits
    // of the single output byte are padding ones, giving 0x1F.
    let encoded = quic_engine::qpack::huffman::encode(&[0x61]);
    assert_eq!(encoded, vec![0x1F]);
    let decoded = quic_engine::qpack::huffman::decode(&encoded).unwrap();
    assert_eq!(decoded, vec![0x61]);
}

#[test]
fn qpack_static_indexed_headers_round_trip_through_the_wire_bytes() {
    let mut encoder = quic_engine::qpack::QpackEncoder::new(0);
    let headers = vec![
        (":method".to_string(), "GET".to_string()),
        (":path".to_string(), "/".to_string()),
        (":status".to_string(), "200".to_string()),
    ];
    let block = encoder.encode_header_block(&headers);
    assert!(encoder.take_pending_instructions().is_empty(), "static-only headers need no dynamic-table inserts");
    assert_eq!(&block[..], &[0x00, 0x00, 0x91, 0x81, 0x99][..]);

    let decoder = quic_engine::qpack::QpackDecoder::new(0);
    let mut buf = block.clone();
    let decoded = decoder.decode_header_block(&mut buf).unwrap();
    assert_eq!(decoded, headers);
}

#[test]
fn stream_reassembly_delivers_fragments_out_of_order_as_one_contiguous_read() {
    use quic_engine::stream::id::{Directionality, StreamId};
    use quic_engine::stream::recv::RecvStream;

    let id = StreamId::from_index(0, quic_engine::side::Side::Client, Directionality::Bidi);
    let mut recv = RecvStream::new(id, 1_000_000);
    recv.on_stream_frame(5, b"world", true).unwrap();
    recv.on_stream_frame(0, b"hello", false).unwrap();

    let mut out = [0u8; 32];
    let n = recv.read(&mut out);
    assert_eq!(&out[..n], b"helloworld");
}

#[test]
fn new_reno_halves_the_window_on_the_first_loss_of_a_recovery_period() {
    use quic_engine::congestion::new_reno::{CongestionState, NewReno, MAX_DATAGRAM_SIZE};

    let mut cc = NewReno::new(MAX_DATAGRAM_SIZE);
    let t0 = Instant::now();
    // drive the window up through slow start with a couple of big ACKs
    cc.on_packets_acked(40_000, t0);
    cc.on_packets_acked(40_000, t0 + Duration::from_millis(1));
    let window_before_loss = cc.window();
    assert!(window_before_loss > MAX_DATAGRAM_SIZE);

    let sent_time = t0 + Duration::from_millis(2);
    cc.on_congestion_event(sent_time, t0 + Duration::from_millis(10));

    assert_eq!(cc.state(), CongestionState::Recovery);
    assert!(cc.window() >= 2 * MAX_DATAGRAM_SIZE);
    assert_eq!(cc.window(), window_before_loss / 2);

    // a second loss inside the same recovery period must not react again
    let window_after_first_loss = cc.window();
    cc.on_congestion_event(sent_time, t0 + Duration::from_millis(11));
    assert_eq!(cc.window(), window_after_first_loss);
}

#[test]
fn path_validation_promotes_a_migrated_path_only_once_its_challenge_is_answered() {
    use quic_engine::migration::manager::PathManager;

    let local: SocketAddr = "127.0.0.1:60001".parse().unwrap();
    let remote: SocketAddr = "127.0.0.1:60002".parse().unwrap();
    let new_remote: SocketAddr = "127.0.0.1:60003".parse().unwrap();

    let mut manager = PathManager::new(local, remote, Duration::from_millis(25));
    let mut rng = rand::rngs::mock::StepRng::new(0x0102030405060708, 0);
    let now = Instant::now();
    let challenge = manager.on_new_remote_address(local, new_remote, &mut rng, now);

    // still on the original (handshake-validated) path until the response lands
    assert_eq!(manager.active_path().remote_addr, remote);

    assert!(manager.on_path_response(challenge));
    manager.promote_best_validated_path();
    assert_eq!(manager.active_path().remote_addr, new_remote);
}

#[tokio::test]
async fn a_client_and_server_complete_key_installation_and_exchange_application_data() {
    let addr_a: SocketAddr = "127.0.0.1:60101".parse().unwrap();
    let addr_b: SocketAddr = "127.0.0.1:60102".parse().unwrap();
    let cid_a = ConnectionId::new(vec![9, 9, 9, 9, 9, 9, 9, 9]);
    let cid_b = ConnectionId::new(vec![1, 1, 1, 1, 1, 1, 1, 1]);
    let config = EndpointConfig::new(TransportConfig::default(), cid_a.clone());
    let now = Instant::now();

    let mut client = Connection::new(Side::Client, addr_a, addr_b, config.clone(), cid_a.clone(), cid_b.clone(), now)
        .await
        .unwrap();
    let mut server = Connection::new(Side::Server, addr_b, addr_a, config, cid_b, cid_a, now).await.unwrap();

    // simulate the handshake completing by installing matching Application
    // secrets on both sides directly, the way the TLS adapter would once a
    // real handshake finishes.
    use quic_engine::connection::ConnectionState;
    use quic_engine::packet::types::EncryptionLevel;
    use quic_engine::tls::adapter::{KeyScheduleCallback, LevelSecrets};
    use quic_engine::crypto::keys::CipherSuite;

    let client_secrets = LevelSecrets { suite: CipherSuite::Aes128Gcm, local: vec![7u8; 32], remote: vec![8u8; 32] };
    let server_secrets = LevelSecrets { suite: CipherSuite::Aes128Gcm, local: vec![8u8; 32], remote: vec![7u8; 32] };
    client.on_secrets_available(EncryptionLevel::Application, client_secrets);
    server.on_secrets_available(EncryptionLevel::Application, server_secrets);
    assert_eq!(client.state(), ConnectionState::Connected);

    client.confirm_handshake();

    let id = client.open_stream(quic_engine::stream::id::Directionality::Bidi).unwrap();
    client.stream_write(id, b"ping", true).unwrap();

    let packet = client.poll_transmit(Instant::now()).unwrap().expect("a stream write produces a packet to send");
    server.on_datagram_received(packet, Instant::now()).unwrap();

    let mut buf = [0u8; 16];
    let n = server.stream_read(id, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"ping");
}
