//! Time-based one-time passwords (RFC 6238, HMAC-SHA1, 6 digits)

use hmac::{Hmac, Mac};
use sha1::Sha1;

use super::ct_eq;

pub const STEP_SECS: u64 = 30;
const DIGITS: u32 = 6;
/// Steps of clock drift tolerated either side of now.
const WINDOW: u64 = 1;

/// Token for the step containing `timestamp` (seconds since the epoch).
pub fn generate(secret: &[u8], timestamp: u64) -> Option<u32> {
    let counter = timestamp / STEP_SECS;
    let mut mac = Hmac::<Sha1>::new_from_slice(secret).ok()?;
    mac.update(&counter.to_be_bytes());
    let hash = mac.finalize().into_bytes();

    let offset = (hash[hash.len() - 1] & 0x0F) as usize;
    let code = u32::from_be_bytes([
        hash[offset] & 0x7F,
        hash[offset + 1],
        hash[offset + 2],
        hash[offset + 3],
    ]);
    Some(code % 10u32.pow(DIGITS))
}

/// Check a client token against the current step and its neighbours.
pub fn verify(secret: &[u8], token: &str, timestamp: u64) -> bool {
    if token.len() != DIGITS as usize || !token.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let earliest = timestamp.saturating_sub(WINDOW * STEP_SECS);
    let latest = timestamp + WINDOW * STEP_SECS;
    let mut matched = false;
    let mut step = earliest;
    while step <= latest {
        if let Some(code) = generate(secret, step) {
            let expected = format!("{:0width$}", code, width = DIGITS as usize);
            matched |= ct_eq(expected.as_bytes(), token.as_bytes());
        }
        step += STEP_SECS;
    }
    matched
}
