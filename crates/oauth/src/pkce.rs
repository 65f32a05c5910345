use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::RngCore,
    sha2::{Digest, Sha256},
};

use crate::types::PkceChallenge;

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate an S256 PKCE verifier/challenge pair.
#[must_use]
pub fn generate_pkce() -> PkceChallenge {
    let verifier = random_urlsafe(32);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    PkceChallenge {
        verifier,
        challenge,
    }
}

/// Generate a random `state` nonce for an authorization request.
#[must_use]
pub fn generate_state() -> String {
    random_urlsafe(24)
}
