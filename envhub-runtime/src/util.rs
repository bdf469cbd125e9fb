use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use sha2::{Digest, Sha256};

use crate::error::{InstanceError, Result};

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| InstanceError::Upstream(format!("Failed to build HTTP client: {err}")))
}

/// Random lowercase alphanumeric string, safe for DNS-1123 names.
pub fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

/// Stable, label-safe key for a tenant identity. Raw tokens never leave the gateway.
pub fn tenant_key(identity: &str) -> String {
    let digest = Sha256::digest(identity.as_bytes());
    // 40 hex chars keeps it under the 63-char label value limit.
    hex::encode(&digest[..20])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_lowercase_alnum() {
        let s = random_suffix(6);
        assert_eq!(s.len(), 6);
        assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn tenant_key_is_stable_and_short() {
        let a = tenant_key("alice");
        assert_eq!(a, tenant_key("alice"));
        assert_ne!(a, tenant_key("bob"));
        assert_eq!(a.len(), 40);
    }
}
