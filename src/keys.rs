use openssl::hash::Hasher;

use crate::{
    security::{AuthProtocol, PrivProtocol},
    Error, Result,
};

const PASSWORD_STREAM_LEN: usize = 1_048_576;
const CHUNK_LEN: usize = 64;

/// Localized privacy keys are capped at 16 bytes: DES takes 8 key bytes
/// plus 8 pre-IV bytes, AES-128 takes all 16 as the key.
pub(crate) const PRIV_KEY_LEN: usize = 16;

/// RFC 3414 §A.2 password-to-key localization.
///
/// A 1,048,576-byte stream of the cyclically repeated passphrase is hashed
/// in 64-byte chunks to produce `Ku`, then `Kul = H(Ku || engine_id || Ku)`.
/// The result is 16 bytes for MD5 and 20 bytes for SHA-1, and is fully
/// deterministic.
pub fn localize(protocol: AuthProtocol, passphrase: &[u8], engine_id: &[u8]) -> Result<Vec<u8>> {
    if passphrase.is_empty() {
        return Err(Error::InvalidConfig);
    }
    let mut hasher = Hasher::new(protocol.digest()?)?;
    let mut chunk = [0u8; CHUNK_LEN];
    let mut index = 0;
    for _ in 0..PASSWORD_STREAM_LEN / CHUNK_LEN {
        for byte in &mut chunk {
            *byte = passphrase[index];
            index += 1;
            if index == passphrase.len() {
                index = 0;
            }
        }
        hasher.update(&chunk)?;
    }
    let ku = hasher.finish()?;
    hasher.update(&ku)?;
    hasher.update(engine_id)?;
    hasher.update(&ku)?;
    Ok(hasher.finish()?.to_vec())
}

/// Privacy key: the same transform keyed by the privacy passphrase, hashed
/// with the user's authentication protocol, truncated to [`PRIV_KEY_LEN`].
pub(crate) fn localize_priv(
    auth_protocol: AuthProtocol,
    priv_protocol: PrivProtocol,
    passphrase: &[u8],
    engine_id: &[u8],
) -> Result<Vec<u8>> {
    if priv_protocol == PrivProtocol::NoPriv {
        return Ok(Vec::new());
    }
    let mut key = localize(auth_protocol, passphrase, engine_id)?;
    key.truncate(PRIV_KEY_LEN);
    Ok(key)
}

/// Localized key material for one user at one authoritative engine.
///
/// Cached per engine ID; derivation reruns only after the engine changes
/// or the cache is invalidated.
#[derive(Debug, Clone)]
pub(crate) struct LocalizedKeys {
    pub engine_id: Vec<u8>,
    pub auth_key: Vec<u8>,
    pub priv_key: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGINE_ID: &[u8] = &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];

    // RFC 3414 §A.3.1
    #[test]
    fn localize_md5_rfc_vector() {
        let key = localize(AuthProtocol::Md5, b"maplesyrup", ENGINE_ID).unwrap();
        assert_eq!(
            key,
            [
                0x52, 0x6f, 0x5e, 0xed, 0x9f, 0xcc, 0xe2, 0x6f, 0x89, 0x64, 0xc2, 0x93, 0x07,
                0x87, 0xd8, 0x2b,
            ]
        );
    }

    // RFC 3414 §A.3.2
    #[test]
    fn localize_sha1_rfc_vector() {
        let key = localize(AuthProtocol::Sha1, b"maplesyrup", ENGINE_ID).unwrap();
        assert_eq!(
            key,
            [
                0x66, 0x95, 0xfe, 0xbc, 0x92, 0x88, 0xe3, 0x62, 0x82, 0x23, 0x5f, 0xc7, 0x15,
                0x1f, 0x12, 0x84, 0x97, 0xb3, 0x8f, 0x3f,
            ]
        );
    }

    #[test]
    fn localize_is_deterministic() {
        let a = localize(AuthProtocol::Sha1, b"some passphrase", b"engine").unwrap();
        let b = localize(AuthProtocol::Sha1, b"some passphrase", b"engine").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn different_engines_yield_different_keys() {
        let a = localize(AuthProtocol::Md5, b"passphrase", b"engine-a").unwrap();
        let b = localize(AuthProtocol::Md5, b"passphrase", b"engine-b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_passphrase_is_rejected() {
        assert_eq!(
            localize(AuthProtocol::Md5, b"", ENGINE_ID),
            Err(Error::InvalidConfig)
        );
    }

    #[test]
    fn priv_key_is_truncated() {
        let key = localize_priv(
            AuthProtocol::Sha1,
            PrivProtocol::Aes128,
            b"maplesyrup",
            ENGINE_ID,
        )
        .unwrap();
        assert_eq!(key.len(), PRIV_KEY_LEN);
    }
}
