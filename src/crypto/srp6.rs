//! SRP6 as spoken by the 3.3.5a client
//!
//! All big numbers travel little-endian and 32 bytes wide. The server keeps
//! only the salt and verifier; the password never reaches it.

use num_bigint::BigUint;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{ct_eq, random_bytes, sha1_of, SessionKey};
use crate::constants::{
    DIGEST_LENGTH, EPHEMERAL_KEY_LENGTH, PRIVATE_KEY_LENGTH, SALT_LENGTH, SESSION_KEY_LENGTH,
    SRP6_G, SRP6_K, SRP6_N_BE,
};

fn modulus() -> BigUint {
    BigUint::from_bytes_be(&SRP6_N_BE)
}

fn generator() -> BigUint {
    BigUint::from(SRP6_G)
}

fn to_le_array<const N: usize>(value: &BigUint) -> [u8; N] {
    let bytes = value.to_bytes_le();
    let mut out = [0u8; N];
    let len = bytes.len().min(N);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// x = SHA1(s | SHA1(UPPER(I) ":" UPPER(P)))
fn private_exponent(username: &str, password: &str, salt: &[u8; SALT_LENGTH]) -> BigUint {
    let username = username.to_ascii_uppercase();
    let password = password.to_ascii_uppercase();
    let inner = sha1_of(&[username.as_bytes(), b":", password.as_bytes()]);
    BigUint::from_bytes_le(&sha1_of(&[salt, &inner]))
}

/// v = g^x mod N for a known salt.
pub fn compute_verifier(
    username: &str,
    password: &str,
    salt: &[u8; SALT_LENGTH],
) -> [u8; EPHEMERAL_KEY_LENGTH] {
    let x = private_exponent(username, password, salt);
    to_le_array(&generator().modpow(&x, &modulus()))
}

/// Fresh salt and matching verifier for account creation or password reset.
pub fn make_registration(
    username: &str,
    password: &str,
) -> ([u8; SALT_LENGTH], [u8; EPHEMERAL_KEY_LENGTH]) {
    let salt = random_bytes::<SALT_LENGTH>();
    let verifier = compute_verifier(username, password, &salt);
    (salt, verifier)
}

/// Whether `password` matches a stored salt/verifier pair.
pub fn check_password(
    username: &str,
    password: &str,
    salt: &[u8; SALT_LENGTH],
    verifier: &[u8; EPHEMERAL_KEY_LENGTH],
) -> bool {
    ct_eq(&compute_verifier(username, password, salt), verifier)
}

/// Salt handed out for names that do not exist. Stable per name for the
/// lifetime of `secret`, so repeated lookups see the same value.
pub fn fake_salt(secret: &[u8; 32], username: &str) -> [u8; SALT_LENGTH] {
    let username = username.to_ascii_uppercase();
    let first = sha1_of(&[secret, username.as_bytes(), &[0]]);
    let second = sha1_of(&[secret, username.as_bytes(), &[1]]);
    let mut salt = [0u8; SALT_LENGTH];
    salt[..DIGEST_LENGTH].copy_from_slice(&first);
    salt[DIGEST_LENGTH..].copy_from_slice(&second[..SALT_LENGTH - DIGEST_LENGTH]);
    salt
}

/// K = SHA1-interleave(S): hash the even and odd bytes of S separately,
/// skipping leading zero bytes, and zip the two digests together.
fn sha1_interleave(s: &[u8; EPHEMERAL_KEY_LENGTH]) -> SessionKey {
    const HALF: usize = EPHEMERAL_KEY_LENGTH / 2;
    let mut even = [0u8; HALF];
    let mut odd = [0u8; HALF];
    for i in 0..HALF {
        even[i] = s[2 * i];
        odd[i] = s[2 * i + 1];
    }

    let mut p = s.iter().position(|&b| b != 0).unwrap_or(EPHEMERAL_KEY_LENGTH);
    if p % 2 == 1 {
        p += 1;
    }
    p /= 2;

    let even_hash = sha1_of(&[&even[p.min(HALF)..]]);
    let odd_hash = sha1_of(&[&odd[p.min(HALF)..]]);
    even.zeroize();
    odd.zeroize();

    let mut key = [0u8; SESSION_KEY_LENGTH];
    for i in 0..DIGEST_LENGTH {
        key[2 * i] = even_hash[i];
        key[2 * i + 1] = odd_hash[i];
    }
    SessionKey::new(key)
}

/// M1 = SHA1((H(N) xor H(g)) | H(I) | s | A | B | K)
fn client_proof(
    username_upper: &str,
    salt: &[u8; SALT_LENGTH],
    client_public: &[u8; EPHEMERAL_KEY_LENGTH],
    server_public: &[u8; EPHEMERAL_KEY_LENGTH],
    key: &SessionKey,
) -> [u8; DIGEST_LENGTH] {
    let mut n_le = SRP6_N_BE;
    n_le.reverse();
    let n_hash = sha1_of(&[&n_le]);
    let g_hash = sha1_of(&[&[SRP6_G as u8]]);
    let mut ng_hash = [0u8; DIGEST_LENGTH];
    for (i, byte) in ng_hash.iter_mut().enumerate() {
        *byte = n_hash[i] ^ g_hash[i];
    }
    let user_hash = sha1_of(&[username_upper.as_bytes()]);

    sha1_of(&[
        &ng_hash,
        &user_hash,
        salt,
        client_public,
        server_public,
        key.as_bytes(),
    ])
}

/// M2 = SHA1(A | M1 | K)
fn server_proof(
    client_public: &[u8; EPHEMERAL_KEY_LENGTH],
    client_proof: &[u8; DIGEST_LENGTH],
    key: &SessionKey,
) -> [u8; DIGEST_LENGTH] {
    sha1_of(&[client_public, client_proof, key.as_bytes()])
}

/// Result of a verified logon proof.
#[derive(Debug)]
pub struct Srp6Proof {
    pub session_key: SessionKey,
    pub server_proof: [u8; DIGEST_LENGTH],
}

/// Server side of one SRP6 exchange, from challenge to proof.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Srp6Transcript {
    username: String,
    salt: [u8; SALT_LENGTH],
    verifier: [u8; EPHEMERAL_KEY_LENGTH],
    private_b: [u8; PRIVATE_KEY_LENGTH],
    public_b: [u8; EPHEMERAL_KEY_LENGTH],
}

impl Srp6Transcript {
    pub fn new(
        username: &str,
        salt: [u8; SALT_LENGTH],
        verifier: [u8; EPHEMERAL_KEY_LENGTH],
    ) -> Self {
        Self::with_private_key(username, salt, verifier, random_bytes())
    }

    fn with_private_key(
        username: &str,
        salt: [u8; SALT_LENGTH],
        verifier: [u8; EPHEMERAL_KEY_LENGTH],
        private_b: [u8; PRIVATE_KEY_LENGTH],
    ) -> Self {
        let n = modulus();
        let v = BigUint::from_bytes_le(&verifier);
        let b = BigUint::from_bytes_le(&private_b);
        // B = (k*v + g^b) mod N
        let public_b = (BigUint::from(SRP6_K) * v + generator().modpow(&b, &n)) % &n;

        Self {
            username: username.to_ascii_uppercase(),
            salt,
            verifier,
            private_b,
            public_b: to_le_array(&public_b),
        }
    }

    pub fn salt(&self) -> &[u8; SALT_LENGTH] {
        &self.salt
    }

    pub fn server_public(&self) -> &[u8; EPHEMERAL_KEY_LENGTH] {
        &self.public_b
    }

    /// Check the client's A and M1. Returns the session key and M2 when the
    /// client knows the password, `None` otherwise.
    pub fn verify(
        &self,
        client_public: &[u8; EPHEMERAL_KEY_LENGTH],
        proof: &[u8; DIGEST_LENGTH],
    ) -> Option<Srp6Proof> {
        let n = modulus();
        let a = BigUint::from_bytes_le(client_public);
        if (&a % &n).bits() == 0 {
            return None;
        }

        let u = BigUint::from_bytes_le(&sha1_of(&[client_public, &self.public_b]));
        let v = BigUint::from_bytes_le(&self.verifier);
        let b = BigUint::from_bytes_le(&self.private_b);
        // S = (A * v^u)^b mod N
        let s = ((a * v.modpow(&u, &n)) % &n).modpow(&b, &n);
        let mut s_bytes: [u8; EPHEMERAL_KEY_LENGTH] = to_le_array(&s);
        let session_key = sha1_interleave(&s_bytes);
        s_bytes.zeroize();

        let expected = client_proof(
            &self.username,
            &self.salt,
            client_public,
            &self.public_b,
            &session_key,
        );
        if !ct_eq(&expected, proof) {
            return None;
        }

        Some(Srp6Proof {
            server_proof: server_proof(client_public, proof, &session_key),
            session_key,
        })
    }
}

/// Client half of the exchange, for driving the server in tests.
#[cfg(test)]
pub mod client {
    use super::*;

    pub struct ClientProof {
        pub client_public: [u8; EPHEMERAL_KEY_LENGTH],
        pub client_proof: [u8; DIGEST_LENGTH],
        pub session_key: SessionKey,
        pub expected_server_proof: [u8; DIGEST_LENGTH],
    }

    pub fn prove(
        username: &str,
        password: &str,
        salt: &[u8; SALT_LENGTH],
        server_public: &[u8; EPHEMERAL_KEY_LENGTH],
    ) -> ClientProof {
        prove_with_private_key(username, password, salt, server_public, &random_bytes::<19>())
    }

    pub fn prove_with_private_key(
        username: &str,
        password: &str,
        salt: &[u8; SALT_LENGTH],
        server_public: &[u8; EPHEMERAL_KEY_LENGTH],
        private_a: &[u8],
    ) -> ClientProof {
        let n = modulus();
        let g = generator();
        let a = BigUint::from_bytes_le(private_a);
        let client_public: [u8; EPHEMERAL_KEY_LENGTH] = to_le_array(&g.modpow(&a, &n));

        let u = BigUint::from_bytes_le(&sha1_of(&[&client_public, server_public]));
        let x = private_exponent(username, password, salt);
        let b = BigUint::from_bytes_le(server_public);
        let kgx = (BigUint::from(SRP6_K) * g.modpow(&x, &n)) % &n;
        // S = (B - k*g^x)^(a + u*x) mod N
        let base = (b + &n - kgx) % &n;
        let s = base.modpow(&(a + u * x), &n);
        let session_key = sha1_interleave(&to_le_array(&s));

        let username = username.to_ascii_uppercase();
        let proof = client_proof(&username, salt, &client_public, server_public, &session_key);
        ClientProof {
            client_public,
            client_proof: proof,
            expected_server_proof: server_proof(&client_public, &proof, &session_key),
            session_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_salt() -> [u8; SALT_LENGTH] {
        let mut salt = [0u8; SALT_LENGTH];
        for (i, byte) in salt.iter_mut().enumerate() {
            *byte = i as u8;
        }
        salt
    }

    #[test]
    fn test_verifier_vector() {
        let verifier = compute_verifier("tester", "password", &fixed_salt());

        assert_eq!(
            hex::encode(verifier),
            "5ea398bd09ac81127ad906c0654431ac01309a78d90d65f2e23e955c574c1136"
        );
    }

    #[test]
    fn test_known_exchange() {
        let salt = fixed_salt();
        let verifier = compute_verifier("TESTER", "PASSWORD", &salt);
        let transcript = Srp6Transcript::with_private_key("TESTER", salt, verifier, [0x42; 19]);

        assert_eq!(
            hex::encode(transcript.server_public()),
            "8291055616f5d5e9746751866c1c5e21ab334230727f568a307b9c50793b9d39"
        );

        let client = client::prove_with_private_key(
            "TESTER",
            "PASSWORD",
            &salt,
            transcript.server_public(),
            &[0x17; 19],
        );
        assert_eq!(
            hex::encode(client.client_public),
            "1f8f3269d45f18649a763c28965dfb935a18cd0d0d1f112279374d6a3bc4c187"
        );
        assert_eq!(hex::encode(client.client_proof), "56dfb2d7087f75a3b8a509256c9472106fa0fc0d");

        let proof = transcript
            .verify(&client.client_public, &client.client_proof)
            .unwrap();
        assert_eq!(
            hex::encode(proof.session_key.as_bytes()),
            "89912deaad5c5e0e1d32eb69e22448eaa10c322bb935bba687d0803862424083fcb3f5d43f5ed939"
        );
        assert_eq!(hex::encode(proof.server_proof), "7f3005bba904e5c20d2cb6476cebe5499af5e212");
        assert!(proof.session_key.ct_eq(&client.session_key));
    }

    #[test]
    fn test_proofs_agree_iff_passwords_match() {
        let (salt, verifier) = make_registration("alice", "secret");
        for (password, should_match) in [("secret", true), ("SECRET", true), ("wrong", false)] {
            let transcript = Srp6Transcript::new("alice", salt, verifier);
            let client = client::prove("alice", password, &salt, transcript.server_public());
            let result = transcript.verify(&client.client_public, &client.client_proof);

            assert_eq!(result.is_some(), should_match, "password {}", password);
            if let Some(proof) = result {
                assert_eq!(proof.server_proof, client.expected_server_proof);
            }
        }
    }

    #[test]
    fn test_flipped_bit_in_proof_rejected() {
        let (salt, verifier) = make_registration("TESTER", "PASSWORD");
        let transcript = Srp6Transcript::new("TESTER", salt, verifier);
        let mut client = client::prove("TESTER", "PASSWORD", &salt, transcript.server_public());
        client.client_proof[7] ^= 0x01;

        assert!(transcript
            .verify(&client.client_public, &client.client_proof)
            .is_none());
    }

    #[test]
    fn test_zero_client_public_rejected() {
        let (salt, verifier) = make_registration("TESTER", "PASSWORD");
        let transcript = Srp6Transcript::new("TESTER", salt, verifier);
        let mut n_le = SRP6_N_BE;
        n_le.reverse();

        assert!(transcript.verify(&[0u8; 32], &[0u8; 20]).is_none());
        assert!(transcript.verify(&n_le, &[0u8; 20]).is_none());
    }

    #[test]
    fn test_check_password() {
        let (salt, verifier) = make_registration("bob", "hunter2");

        assert!(check_password("BOB", "HUNTER2", &salt, &verifier));
        assert!(!check_password("bob", "hunter3", &salt, &verifier));
    }

    #[test]
    fn test_fake_salt_is_stable_per_name() {
        let secret = [9u8; 32];

        assert_eq!(fake_salt(&secret, "ghost"), fake_salt(&secret, "GHOST"));
        assert_ne!(fake_salt(&secret, "ghost"), fake_salt(&secret, "phantom"));
        assert_ne!(fake_salt(&secret, "ghost"), fake_salt(&[8u8; 32], "ghost"));
    }

    #[test]
    fn test_interleave_skips_leading_zeros() {
        let mut s = [0xAAu8; 32];
        s[0] = 0;
        s[1] = 0;
        s[2] = 0;
        // first non-zero at 3 -> p = 4 -> skip two bytes of each half
        let key = sha1_interleave(&s);
        let even_hash = sha1_of(&[&[0xAA; 14]]);

        assert_eq!(key.as_bytes()[0], even_hash[0]);
        assert_eq!(key.as_bytes()[2], even_hash[1]);
    }
}
