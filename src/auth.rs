use openssl::{memcmp, pkey::PKey, sign::Signer};

use crate::{security::AuthProtocol, Error, Result};

/// msgAuthenticationParameters carries the first 12 bytes of the HMAC
/// (RFC 3414 §6.3.1, §7.3.1).
pub(crate) const AUTH_PARAMS_LEN: usize = 12;

fn hmac(protocol: AuthProtocol, key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let pkey = PKey::hmac(key)?;
    let mut signer = Signer::new(protocol.digest()?, &pkey)?;
    signer.update(message)?;
    Ok(signer.sign_to_vec()?)
}

/// Writes the truncated tag into the reserved slot of a framed message.
/// The slot must already hold 12 zero bytes.
pub(crate) fn sign(
    protocol: AuthProtocol,
    key: &[u8],
    message: &mut [u8],
    offset: usize,
) -> Result<()> {
    if offset + AUTH_PARAMS_LEN > message.len() {
        return Err(Error::MalformedAuthParams);
    }
    let tag = hmac(protocol, key, message)?;
    message[offset..offset + AUTH_PARAMS_LEN].copy_from_slice(&tag[..AUTH_PARAMS_LEN]);
    Ok(())
}

/// Saves the received tag, zeroes the slot in place, recomputes the HMAC
/// over the whole message and compares in constant time.
pub(crate) fn verify(
    protocol: AuthProtocol,
    key: &[u8],
    message: &mut [u8],
    offset: usize,
) -> Result<()> {
    if offset + AUTH_PARAMS_LEN > message.len() {
        return Err(Error::MalformedAuthParams);
    }
    let mut received = [0u8; AUTH_PARAMS_LEN];
    received.copy_from_slice(&message[offset..offset + AUTH_PARAMS_LEN]);
    message[offset..offset + AUTH_PARAMS_LEN].fill(0);
    let tag = hmac(protocol, key, message)?;
    if !memcmp::eq(&tag[..AUTH_PARAMS_LEN], &received) {
        return Err(Error::Unauthentic);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::localize;

    const SLOT: usize = 20;

    fn framed_message() -> (Vec<u8>, Vec<u8>) {
        let key = localize(AuthProtocol::Sha1, b"maplesyrup", b"test-engine-id").unwrap();
        let mut message = (0u8..100).collect::<Vec<_>>();
        message[SLOT..SLOT + AUTH_PARAMS_LEN].fill(0);
        (key, message)
    }

    #[test]
    fn sign_is_idempotent() {
        let (key, mut message) = framed_message();
        sign(AuthProtocol::Sha1, &key, &mut message, SLOT).unwrap();
        let first: Vec<u8> = message[SLOT..SLOT + AUTH_PARAMS_LEN].to_vec();

        message[SLOT..SLOT + AUTH_PARAMS_LEN].fill(0);
        sign(AuthProtocol::Sha1, &key, &mut message, SLOT).unwrap();
        assert_eq!(&message[SLOT..SLOT + AUTH_PARAMS_LEN], &first[..]);
    }

    #[test]
    fn verify_round_trip() {
        let (key, mut message) = framed_message();
        sign(AuthProtocol::Sha1, &key, &mut message, SLOT).unwrap();
        verify(AuthProtocol::Sha1, &key, &mut message, SLOT).unwrap();
    }

    #[test]
    fn tampering_is_detected() {
        let (key, mut message) = framed_message();
        sign(AuthProtocol::Sha1, &key, &mut message, SLOT).unwrap();

        let mut outside = message.clone();
        outside[0] ^= 0x01;
        assert_eq!(
            verify(AuthProtocol::Sha1, &key, &mut outside, SLOT),
            Err(Error::Unauthentic)
        );

        let mut inside = message.clone();
        inside[SLOT + 3] ^= 0x80;
        assert_eq!(
            verify(AuthProtocol::Sha1, &key, &mut inside, SLOT),
            Err(Error::Unauthentic)
        );
    }

    #[test]
    fn slot_must_fit() {
        let (key, mut message) = framed_message();
        let offset = message.len() - AUTH_PARAMS_LEN + 1;
        assert_eq!(
            verify(AuthProtocol::Sha1, &key, &mut message, offset),
            Err(Error::MalformedAuthParams)
        );
    }
}
