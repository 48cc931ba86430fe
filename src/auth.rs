use sha2::{Digest, Sha256};

/// Hash a bearer token the way sessions are stored (SHA-256 hex).
/// Tokens themselves are issued by the login service; only the hash is looked up here.
pub fn hash_access_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let out = hasher.finalize();
    hex::encode(out)
}
