//! Cryptography for the logon handshake and the world header cipher

use std::fmt;

use rand::RngCore;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::{DIGEST_LENGTH, RECONNECT_SEED_LENGTH, SESSION_KEY_LENGTH};

pub mod header_crypt;
pub mod srp6;
pub mod totp;

pub use header_crypt::HeaderCrypt;
pub use srp6::{Srp6Proof, Srp6Transcript};

/// The 40-byte key K agreed during SRP6. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LENGTH]);

impl SessionKey {
    pub fn new(bytes: [u8; SESSION_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; SESSION_KEY_LENGTH] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LENGTH] {
        &self.0
    }

    pub fn ct_eq(&self, other: &SessionKey) -> bool {
        ct_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Fill a fixed-size array from the thread-local CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::thread_rng().fill_bytes(&mut out);
    out
}

/// Constant-time comparison. Slices of different length never match.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// SHA1 over the concatenation of `parts`.
pub fn sha1_of(parts: &[&[u8]]) -> [u8; DIGEST_LENGTH] {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// R2 = SHA1(UPPER(I) | R1 | R | K), proving knowledge of a stored key.
pub fn reconnect_proof(
    username: &str,
    client_seed: &[u8; RECONNECT_SEED_LENGTH],
    server_seed: &[u8; RECONNECT_SEED_LENGTH],
    key: &SessionKey,
) -> [u8; DIGEST_LENGTH] {
    let username = username.to_ascii_uppercase();
    sha1_of(&[username.as_bytes(), client_seed, server_seed, key.as_bytes()])
}

pub fn verify_reconnect_proof(
    username: &str,
    client_seed: &[u8; RECONNECT_SEED_LENGTH],
    client_proof: &[u8; DIGEST_LENGTH],
    server_seed: &[u8; RECONNECT_SEED_LENGTH],
    key: &SessionKey,
) -> bool {
    let expected = reconnect_proof(username, client_seed, server_seed, key);
    ct_eq(&expected, client_proof)
}

/// Digest a world client sends in CMSG_AUTH_SESSION.
pub fn world_auth_digest(
    account: &str,
    client_seed: &[u8; 4],
    server_seed: &[u8; 4],
    key: &SessionKey,
) -> [u8; DIGEST_LENGTH] {
    sha1_of(&[
        account.as_bytes(),
        &0u32.to_le_bytes(),
        client_seed,
        server_seed,
        key.as_bytes(),
    ])
}
