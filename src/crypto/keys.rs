//! HKDF key derivation and AEAD seal/open (§4.4). Initial secrets are
//! derived deterministically from the per-version salt; Handshake and
//! Application secrets arrive from the TLS adapter (`tls::adapter`).
//!
//! Grounded in nushift's `quinn_noise::session`, which derives QUIC Initial
//! secrets with the same hkdf+sha2+chacha20poly1305 crate combination and
//! the same RFC 9001 label constants.

use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305,
};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::result::{CryptoError, QuicheResult};

/// RFC 9001 §5.2: the version-1 Initial salt.
pub const INITIAL_SALT_V1: [u8; 20] = [
    0x38, 0x76, 0x2c, 0xf7, 0xf5, 0x59, 0x34, 0xb3, 0x4d, 0x17, 0x9a, 0xe6, 0xa4, 0xc8, 0x0c, 0xad,
    0xcc, 0xbb, 0x7f, 0x0a,
];

const CLIENT_INITIAL_LABEL: &[u8] = b"client in";
const SERVER_INITIAL_LABEL: &[u8] = b"server in";
const KEY_LABEL: &[u8] = b"quic key";
const IV_LABEL: &[u8] = b"quic iv";
const HP_LABEL: &[u8] = b"quic hp";
const KEY_UPDATE_LABEL: &[u8] = b"quic ku";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    Aes128Gcm,
    Aes256Gcm,
    Chacha20Poly1305,
}

impl CipherSuite {
    pub fn key_len(self) -> usize {
        match self {
            CipherSuite::Aes128Gcm => 16,
            CipherSuite::Aes256Gcm => 32,
            CipherSuite::Chacha20Poly1305 => 32,
        }
    }

    pub fn hp_key_len(self) -> usize {
        self.key_len()
    }

    pub const IV_LEN: usize = 12;
    pub const TAG_LEN: usize = 16;
}

/// `HKDF-Expand-Label` (RFC 8446 §7.1), used by QUIC with a `"tls13 "`
/// prefix on every label (glossary).
fn hkdf_expand_label(hk: &Hkdf<Sha256>, label: &[u8], context: &[u8], out_len: usize) -> Vec<u8> {
    let mut full_label = Vec::with_capacity(6 + label.len());
    full_label.extend_from_slice(b"tls13 ");
    full_label.extend_from_slice(label);

    let mut info = Vec::with_capacity(2 + 1 + full_label.len() + 1 + context.len());
    info.extend_from_slice(&(out_len as u16).to_be_bytes());
    info.push(full_label.len() as u8);
    info.extend_from_slice(&full_label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);

    let mut out = vec![0u8; out_len];
    hk.expand(&info, &mut out).expect("hkdf expand length is bounded by sha256 output size limits");
    out
}

/// Derives the pair of Initial traffic secrets from the client's first
/// destination connection ID (RFC 9001 §5.2).
pub fn initial_secrets(dst_cid: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let (initial_secret, _) = Hkdf::<Sha256>::extract(Some(&INITIAL_SALT_V1), dst_cid);
    let hk = Hkdf::<Sha256>::from_prk(&initial_secret).expect("prk from extract output is always valid length");
    let client = hkdf_expand_label(&hk, CLIENT_INITIAL_LABEL, &[], 32);
    let server = hkdf_expand_label(&hk, SERVER_INITIAL_LABEL, &[], 32);
    (client, server)
}

#[derive(Clone)]
pub struct PacketKeys {
    pub suite: CipherSuite,
    pub key: Vec<u8>,
    pub iv: [u8; CipherSuite::IV_LEN],
    pub hp_key: Vec<u8>,
}

impl PacketKeys {
    /// Derives "quic key" / "quic iv" / "quic hp" from a traffic secret.
    pub fn derive(secret: &[u8], suite: CipherSuite) -> Self {
        let hk = Hkdf::<Sha256>::from_prk(secret).expect("traffic secrets are always full-length PRKs");
        let key = hkdf_expand_label(&hk, KEY_LABEL, &[], suite.key_len());
        let iv_bytes = hkdf_expand_label(&hk, IV_LABEL, &[], CipherSuite::IV_LEN);
        let hp_key = hkdf_expand_label(&hk, HP_LABEL, &[], suite.hp_key_len());
        let mut iv = [0u8; CipherSuite::IV_LEN];
        iv.copy_from_slice(&iv_bytes);
        Self { suite, key, iv, hp_key }
    }

    /// §4.4 key update: derives the next generation's traffic secret via
    /// the "quic ku" label, then re-derives key/iv/hp from it. The header
    /// protection key does not change across key updates (RFC 9001 §6).
    pub fn next_secret(secret: &[u8]) -> Vec<u8> {
        let hk = Hkdf::<Sha256>::from_prk(secret).expect("traffic secrets are always full-length PRKs");
        hkdf_expand_label(&hk, KEY_UPDATE_LABEL, &[], secret.len())
    }

    fn nonce(&self, packet_number: u64) -> [u8; CipherSuite::IV_LEN] {
        let mut nonce = self.iv;
        let pn_bytes = packet_number.to_be_bytes();
        for i in 0..8 {
            nonce[CipherSuite::IV_LEN - 8 + i] ^= pn_bytes[i];
        }
        nonce
    }

    /// AEAD seal: `aad` is the header bytes through the packet number
    /// (§4.2). Returns ciphertext with the 16-byte tag appended.
    pub fn seal(&self, packet_number: u64, aad: &[u8], plaintext: &[u8]) -> QuicheResult<Vec<u8>> {
        let nonce = self.nonce(packet_number);
        let payload = Payload { msg: plaintext, aad };
        let result = match self.suite {
            CipherSuite::Aes128Gcm => {
                let cipher = Aes128Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::SealFailed)?;
                cipher.encrypt((&nonce).into(), payload)
            }
            CipherSuite::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::SealFailed)?;
                cipher.encrypt((&nonce).into(), payload)
            }
            CipherSuite::Chacha20Poly1305 => {
                let cipher =
                    ChaCha20Poly1305::new_from_slice(&self.key).map_err(|_| CryptoError::SealFailed)?;
                cipher.encrypt((&nonce).into(), payload)
            }
        };
        result.map_err(|_| CryptoError::SealFailed.into())
    }

    /// AEAD open. On failure we must not leak whether the MAC check or a
    /// later step failed (§4.2): the `aead` crate already returns an
    /// opaque error for any failure mode, so no further branching here can
    /// introduce a timing side channel.
    pub fn open(&self, packet_number: u64, aad: &[u8], ciphertext: &[u8]) -> QuicheResult<Vec<u8>> {
        let nonce = self.nonce(packet_number);
        let payload = Payload { msg: ciphertext, aad };
        let result = match self.suite {
            CipherSuite::Aes128Gcm => {
                let cipher = Aes128Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::OpenFailed)?;
                cipher.decrypt((&nonce).into(), payload)
            }
            CipherSuite::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::OpenFailed)?;
                cipher.decrypt((&nonce).into(), payload)
            }
            CipherSuite::Chacha20Poly1305 => {
                let cipher =
                    ChaCha20Poly1305::new_from_slice(&self.key).map_err(|_| CryptoError::OpenFailed)?;
                cipher.decrypt((&nonce).into(), payload)
            }
        };
        result.map_err(|_| CryptoError::OpenFailed.into())
    }
}

/// A (client, server) or (send, recv) key pair for one encryption level.
#[derive(Clone)]
pub struct KeyPair {
    pub local: PacketKeys,
    pub remote: PacketKeys,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_secrets_are_deterministic_and_differ_by_side() {
        let dcid = [0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08];
        let (client1, server1) = initial_secrets(&dcid);
        let (client2, server2) = initial_secrets(&dcid);
        assert_eq!(client1, client2);
        assert_eq!(server1, server2);
        assert_ne!(client1, server1);
    }

    #[test]
    fn seal_then_open_round_trips() {
        let dcid = [1u8; 8];
        let (client_secret, _server_secret) = initial_secrets(&dcid);
        let keys = PacketKeys::derive(&client_secret, CipherSuite::Aes128Gcm);
        let aad = b"header-bytes";
        let plaintext = b"hello quic";
        let sealed = keys.seal(1, aad, plaintext).unwrap();
        let opened = keys.open(1, aad, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn open_fails_on_tampered_ciphertext() {
        let dcid = [1u8; 8];
        let (client_secret, _) = initial_secrets(&dcid);
        let keys = PacketKeys::derive(&client_secret, CipherSuite::Aes128Gcm);
        let mut sealed = keys.seal(1, b"aad", b"plaintext").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(keys.open(1, b"aad", &sealed).is_err());
    }

    #[test]
    fn key_update_changes_the_secret() {
        let dcid = [9u8; 8];
        let (client_secret, _) = initial_secrets(&dcid);
        let updated = PacketKeys::next_secret(&client_secret);
        assert_ne!(updated, client_secret);
        assert_eq!(updated.len(), client_secret.len());
    }
}
