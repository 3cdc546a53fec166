//! Incremental SHA-256 over streamed bytes, and hex (de)coding of the
//! `hash` attributes used throughout the RRDP documents.
//!
//! Grounded on `rrdpit::sync::EncodedHash`, which already wraps
//! `ring::digest` and `hex` for whole-buffer hashing; here the digest
//! needs to be fed incrementally as bytes arrive off the wire, so we keep
//! `ring::digest::Context` open across many `update` calls instead of
//! hashing a single in-memory slice.

use ring::digest;

/// Number of bytes in a SHA-256 digest.
pub const DIGEST_LEN: usize = 32;

/// A SHA-256 context updated with every byte of a snapshot or delta body.
///
/// Per the data model invariant, a notification body is never fed to a
/// `Hasher` — only snapshot and delta sessions construct one.
pub struct Hasher {
    ctx: digest::Context,
}

impl Hasher {
    pub fn new() -> Self {
        Hasher {
            ctx: digest::Context::new(&digest::SHA256),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.ctx.update(bytes);
    }

    /// Consumes the hasher and returns the final digest.
    pub fn finish(self) -> [u8; DIGEST_LEN] {
        let digest = self.ctx.finish();
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(digest.as_ref());
        out
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes a hex `hash` attribute (64 hex digits, either case) into a
/// 32-byte digest.
pub fn decode_hex_hash(s: &str) -> Result<[u8; DIGEST_LEN], HashAttrError> {
    let bytes = hex::decode(s).map_err(|_| HashAttrError::NotHex(s.to_string()))?;
    if bytes.len() != DIGEST_LEN {
        return Err(HashAttrError::WrongLength(bytes.len()));
    }
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub fn encode_hex_hash(digest: &[u8; DIGEST_LEN]) -> String {
    hex::encode(digest)
}

#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum HashAttrError {
    #[display("hash attribute {_0:?} is not valid hex")]
    NotHex(String),

    #[display("hash attribute decodes to {_0} bytes, expected 32")]
    WrongLength(usize),
}

impl std::error::Error for HashAttrError {}
