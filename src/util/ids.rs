//! Session id generation

use rand::Rng;

const SLUG_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of a session slug
pub const SLUG_LEN: usize = 6;

/// Generate a random base-36 session slug.
/// Uniqueness is the caller's problem (the registry retries on collision).
pub fn generate_slug() -> String {
    let mut rng = rand::thread_rng();
    (0..SLUG_LEN)
        .map(|_| SLUG_CHARS[rng.gen_range(0..SLUG_CHARS.len())] as char)
        .collect()
}
