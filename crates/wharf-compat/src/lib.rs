//! Version compatibility metadata for Wharf deployments: the manifest model,
//! the local manifest cache, the registry fetcher, and the hop evaluator.

pub mod evaluate;
pub mod fetch;
pub mod manifest;
pub mod semver;
pub mod store;

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let mut h = Sha256::new();
    h.update(bytes);
    let digest = h.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
