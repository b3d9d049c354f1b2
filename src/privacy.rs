use openssl::symm::{Cipher, Crypter, Mode};

use crate::{Error, Result};

/// msgPrivacyParameters always carries an 8-byte salt.
pub(crate) const SALT_LEN: usize = 8;

const DES_KEY_LEN: usize = 8;
const DES_BLOCK: usize = 8;
const AES_KEY_LEN: usize = 16;
const AES_IV_LEN: usize = 16;

fn run_crypter(mut crypter: Crypter, input: &[u8], block_size: usize) -> Result<Vec<u8>> {
    crypter.pad(false);
    let mut out = vec![0; input.len() + block_size];
    let mut count = crypter.update(input, &mut out)?;
    count += crypter.finalize(&mut out[count..])?;
    out.truncate(count);
    Ok(out)
}

fn des_iv(pre_iv: &[u8], salt: &[u8; SALT_LEN]) -> [u8; DES_BLOCK] {
    let mut iv = [0u8; DES_BLOCK];
    for (out, (pre, salt)) in iv.iter_mut().zip(pre_iv.iter().zip(salt.iter())) {
        *out = pre ^ salt;
    }
    iv
}

fn aes_iv(engine_boots: u32, engine_time: u32, salt: &[u8; SALT_LEN]) -> [u8; AES_IV_LEN] {
    let mut iv = [0u8; AES_IV_LEN];
    iv[..4].copy_from_slice(&engine_boots.to_be_bytes());
    iv[4..8].copy_from_slice(&engine_time.to_be_bytes());
    iv[8..].copy_from_slice(salt);
    iv
}

/// DES-CBC encryption (RFC 3414 §8.1.1.1).
///
/// Salt = engine_boots (BE) || 32-bit message counter (BE), IV = pre-IV
/// XOR salt, plaintext zero-padded to the block size. The padding is not
/// length-prefixed; the outer BER length recovers the plaintext.
pub(crate) fn encrypt_des(
    key: &[u8],
    engine_boots: u32,
    counter: u32,
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    if key.len() < DES_KEY_LEN * 2 {
        return Err(Error::InvalidConfig);
    }
    let mut salt = [0u8; SALT_LEN];
    salt[..4].copy_from_slice(&engine_boots.to_be_bytes());
    salt[4..].copy_from_slice(&counter.to_be_bytes());
    let iv = des_iv(&key[DES_KEY_LEN..DES_KEY_LEN * 2], &salt);

    let mut padded = plaintext.to_vec();
    let tail = padded.len() % DES_BLOCK;
    if tail != 0 {
        padded.resize(padded.len() + DES_BLOCK - tail, 0);
    }

    let crypter = Crypter::new(
        Cipher::des_cbc(),
        Mode::Encrypt,
        &key[..DES_KEY_LEN],
        Some(&iv),
    )?;
    let ciphertext = run_crypter(crypter, &padded, DES_BLOCK)?;
    Ok((ciphertext, salt.to_vec()))
}

pub(crate) fn decrypt_des(key: &[u8], priv_params: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if priv_params.len() != SALT_LEN {
        return Err(Error::MalformedPrivParams);
    }
    if key.len() < DES_KEY_LEN * 2 {
        return Err(Error::InvalidConfig);
    }
    if ciphertext.is_empty() || ciphertext.len() % DES_BLOCK != 0 {
        return Err(Error::DecryptionError);
    }
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(priv_params);
    let iv = des_iv(&key[DES_KEY_LEN..DES_KEY_LEN * 2], &salt);

    let crypter = Crypter::new(
        Cipher::des_cbc(),
        Mode::Decrypt,
        &key[..DES_KEY_LEN],
        Some(&iv),
    )
    .map_err(|_| Error::DecryptionError)?;
    run_crypter(crypter, ciphertext, DES_BLOCK)
}

/// AES-128-CFB encryption (RFC 3826 §3.1.2.1).
///
/// Salt = 64-bit message counter (BE); IV = engine_boots (BE) ||
/// engine_time (BE) || salt. CFB is a stream mode, so no padding.
pub(crate) fn encrypt_aes(
    key: &[u8],
    engine_boots: u32,
    engine_time: u32,
    counter: u64,
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    if key.len() < AES_KEY_LEN {
        return Err(Error::InvalidConfig);
    }
    let salt = counter.to_be_bytes();
    let iv = aes_iv(engine_boots, engine_time, &salt);

    let crypter = Crypter::new(
        Cipher::aes_128_cfb128(),
        Mode::Encrypt,
        &key[..AES_KEY_LEN],
        Some(&iv),
    )?;
    let ciphertext = run_crypter(crypter, plaintext, AES_KEY_LEN)?;
    Ok((ciphertext, salt.to_vec()))
}

/// The IV is rebuilt from the boots/time/salt fields carried by the
/// message itself, so decryption only needs the localized key.
pub(crate) fn decrypt_aes(
    key: &[u8],
    engine_boots: u32,
    engine_time: u32,
    priv_params: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if priv_params.len() != SALT_LEN {
        return Err(Error::MalformedPrivParams);
    }
    if key.len() < AES_KEY_LEN {
        return Err(Error::InvalidConfig);
    }
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(priv_params);
    let iv = aes_iv(engine_boots, engine_time, &salt);

    let crypter = Crypter::new(
        Cipher::aes_128_cfb128(),
        Mode::Decrypt,
        &key[..AES_KEY_LEN],
        Some(&iv),
    )
    .map_err(|_| Error::DecryptionError)?;
    run_crypter(crypter, ciphertext, AES_KEY_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = &[
        0x52, 0x6f, 0x5e, 0xed, 0x9f, 0xcc, 0xe2, 0x6f, 0x89, 0x64, 0xc2, 0x93, 0x07, 0x87, 0xd8,
        0x2b,
    ];

    #[test]
    fn des_pads_to_block_size() {
        for len in [1usize, 7, 8, 9, 20, 63, 64] {
            let plaintext = vec![0xabu8; len];
            let (ciphertext, salt) = encrypt_des(KEY, 3, 77, &plaintext).unwrap();
            assert_eq!(ciphertext.len(), (len + 7) / 8 * 8, "plaintext len {}", len);
            assert_eq!(salt.len(), SALT_LEN);

            let recovered = decrypt_des(KEY, &salt, &ciphertext).unwrap();
            assert_eq!(&recovered[..len], &plaintext[..]);
        }
    }

    #[test]
    fn des_salt_layout() {
        let (_, salt) = encrypt_des(KEY, 0x01020304, 0x0a0b0c0d, &[0u8; 8]).unwrap();
        assert_eq!(salt, [0x01, 0x02, 0x03, 0x04, 0x0a, 0x0b, 0x0c, 0x0d]);
    }

    #[test]
    fn des_rejects_unaligned_ciphertext() {
        assert_eq!(
            decrypt_des(KEY, &[0u8; 8], &[0u8; 13]),
            Err(Error::DecryptionError)
        );
    }

    #[test]
    fn des_rejects_bad_salt_length() {
        assert_eq!(
            decrypt_des(KEY, &[0u8; 4], &[0u8; 16]),
            Err(Error::MalformedPrivParams)
        );
    }

    #[test]
    fn aes_round_trip_multiple_blocks() {
        let plaintext = vec![0x5au8; 200];
        let (ciphertext, salt) = encrypt_aes(KEY, 7, 12345, 42, &plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());
        assert_eq!(salt, 42u64.to_be_bytes());

        let recovered = decrypt_aes(KEY, 7, 12345, &salt, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn aes_iv_depends_on_engine_clock() {
        let plaintext = b"same plaintext..";
        let (a, _) = encrypt_aes(KEY, 1, 100, 9, plaintext).unwrap();
        let (b, _) = encrypt_aes(KEY, 1, 101, 9, plaintext).unwrap();
        assert_ne!(a, b);
    }
}
