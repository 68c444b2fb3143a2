//! Room-password sealing. Stored form is `salt$hex(sha256(salt + secret))`;
//! the plaintext secret never reaches the store and verification only ever
//! compares derived digests.

use sha2::{Digest, Sha256};

pub fn seal(secret: &str) -> String {
    let salt = nanoid::nanoid!(16);
    format!("{salt}${}", digest(&salt, secret))
}

pub fn verify(stored: &str, supplied: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, sealed)) => digest(salt, supplied) == sealed,
        None => false,
    }
}

fn digest(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
