//! World packet header cipher
//!
//! Two independent ARC4 streams keyed with HMAC-SHA1(seed, K), each with the
//! first 1024 keystream bytes discarded. Only headers pass through the
//! cipher; bodies travel in clear. Neither stream is ever reset, so every
//! header must be processed exactly once and in order.

use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use rc4::consts::U20;
use rc4::{KeyInit, Rc4, StreamCipher};
use sha1::Sha1;

use super::SessionKey;
use crate::constants::{ARC4_DROP_BYTES, SERVER_DECRYPTION_KEY, SERVER_ENCRYPTION_KEY};

type HmacSha1 = Hmac<Sha1>;

fn arc4_drop1024(seed: &[u8], key: &SessionKey) -> Result<Rc4<U20>, InvalidLength> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(seed)?;
    mac.update(key.as_bytes());
    let digest = mac.finalize().into_bytes();

    let mut cipher = Rc4::<U20>::new(&digest);
    let mut discard = [0u8; ARC4_DROP_BYTES];
    cipher.apply_keystream(&mut discard);
    Ok(cipher)
}

pub struct HeaderCrypt {
    send: Rc4<U20>,
    recv: Rc4<U20>,
}

impl HeaderCrypt {
    /// Server-side cipher pair for a verified session key.
    pub fn new(key: &SessionKey) -> Result<Self, InvalidLength> {
        Ok(Self {
            send: arc4_drop1024(&SERVER_ENCRYPTION_KEY, key)?,
            recv: arc4_drop1024(&SERVER_DECRYPTION_KEY, key)?,
        })
    }

    /// The client's view of the same pair: it encrypts with our decryption
    /// seed and decrypts with our encryption seed.
    #[cfg(test)]
    pub fn new_client(key: &SessionKey) -> Result<Self, InvalidLength> {
        Ok(Self {
            send: arc4_drop1024(&SERVER_DECRYPTION_KEY, key)?,
            recv: arc4_drop1024(&SERVER_ENCRYPTION_KEY, key)?,
        })
    }

    pub fn encrypt_send(&mut self, header: &mut [u8]) {
        self.send.apply_keystream(header);
    }

    pub fn decrypt_recv(&mut self, header: &mut [u8]) {
        self.recv.apply_keystream(header);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_key() -> SessionKey {
        let mut bytes = [0u8; 40];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = i as u8;
        }
        SessionKey::new(bytes)
    }

    #[test]
    fn test_keystream_vectors() {
        let mut crypt = HeaderCrypt::new(&counting_key()).unwrap();

        let mut out = [0u8; 8];
        crypt.encrypt_send(&mut out);
        assert_eq!(hex::encode(out), "da4770c4efd0bceb");

        let mut inbound = [0u8; 8];
        crypt.decrypt_recv(&mut inbound);
        assert_eq!(hex::encode(inbound), "e65788e6a6ce4785");
    }

    #[test]
    fn test_client_and_server_streams_pair_up() {
        let key = counting_key();
        let mut server = HeaderCrypt::new(&key).unwrap();
        let mut client = HeaderCrypt::new_client(&key).unwrap();

        for round in 0..5u8 {
            let plain = [round, 0x0C, 0xDC, 0x01, 0x00, 0x00];
            let mut wire = plain;
            client.encrypt_send(&mut wire);
            assert_ne!(wire, plain);
            server.decrypt_recv(&mut wire);
            assert_eq!(wire, plain);

            let plain = [0x00, 0x06, 0xDD, round];
            let mut wire = plain;
            server.encrypt_send(&mut wire);
            client.decrypt_recv(&mut wire);
            assert_eq!(wire, plain);
        }
    }

    #[test]
    fn test_streams_are_stateful() {
        let mut crypt = HeaderCrypt::new(&counting_key()).unwrap();
        let mut first = [0u8; 4];
        let mut second = [0u8; 4];
        crypt.encrypt_send(&mut first);
        crypt.encrypt_send(&mut second);

        assert_ne!(first, second);
    }
}
