use crate::constants::*;
use crate::error::KrbError;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::TryRngCore;
use sha2::{Digest, Sha256};
use tracing::error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

type HmacSha256 = Hmac<Sha256>;

/// Derive one sub key from a master key: SHA256(master || label), truncated to
/// the length of the master key.
fn derive_subkey(master_key: &[u8], label: &[u8]) -> Result<Vec<u8>, KrbError> {
    let digest = Sha256::new()
        .chain_update(master_key)
        .chain_update(label)
        .finalize();

    digest
        .get(..master_key.len())
        .filter(|k| !k.is_empty())
        .map(|k| k.to_vec())
        .ok_or(KrbError::InvalidKeyLength)
}

/// Split a shared master key into the `(crypt_key, mac_key)` pair. The master
/// key itself is never used directly by a cipher or a MAC.
pub(crate) fn derive_subkeys(master_key: &[u8]) -> Result<(Vec<u8>, Vec<u8>), KrbError> {
    let crypt_key = derive_subkey(master_key, CRYPT_KEY_LABEL)?;
    let mac_key = derive_subkey(master_key, MAC_KEY_LABEL)?;
    Ok((crypt_key, mac_key))
}

pub(crate) fn random_bytes(buf: &mut [u8]) -> Result<(), KrbError> {
    OsRng.try_fill_bytes(buf).map_err(|err| {
        error!(?err, "Unable to read from the OS random source");
        KrbError::RandomSourceFailure
    })
}

fn pkcs7_pad(plaintext: &[u8]) -> Vec<u8> {
    let pad_len = AES_BLOCK_SIZE - (plaintext.len() % AES_BLOCK_SIZE);
    let mut padded = Vec::with_capacity(plaintext.len() + pad_len);
    padded.extend_from_slice(plaintext);
    // pad_len is in 1..=16 so this can't truncate.
    padded.resize(plaintext.len() + pad_len, pad_len as u8);
    padded
}

// Only the final byte is inspected. Peers pad the same way but have never
// verified the pad bytes themselves, so neither do we.
fn pkcs7_unpad(mut buf: Vec<u8>) -> Result<Vec<u8>, KrbError> {
    let Some(&pad_len) = buf.last() else {
        return Err(KrbError::CiphertextEmpty);
    };
    let pad_len = pad_len as usize;
    if pad_len == 0 || pad_len > buf.len() {
        return Err(KrbError::InvalidPadding);
    }
    buf.truncate(buf.len() - pad_len);
    Ok(buf)
}

fn cbc_encrypt_blocks<C>(crypt_key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), KrbError>
where
    C: KeyIvInit + BlockEncryptMut,
{
    debug_assert!(buf.len() % AES_BLOCK_SIZE == 0);
    let mut cipher = C::new_from_slices(crypt_key, iv).map_err(|_| KrbError::InvalidKeyLength)?;
    for block in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

fn cbc_decrypt_blocks<C>(crypt_key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), KrbError>
where
    C: KeyIvInit + BlockDecryptMut,
{
    debug_assert!(buf.len() % AES_BLOCK_SIZE == 0);
    let mut cipher = C::new_from_slices(crypt_key, iv).map_err(|_| KrbError::InvalidKeyLength)?;
    for block in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
        cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

fn encrypt_with_iv(
    master_key: &[u8],
    iv: &[u8; AES_BLOCK_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, KrbError> {
    let (crypt_key, _) = derive_subkeys(master_key)?;

    let mut body = pkcs7_pad(plaintext);
    match crypt_key.len() {
        AES_128_KEY_LEN => cbc_encrypt_blocks::<Aes128CbcEnc>(&crypt_key, iv, &mut body)?,
        AES_256_KEY_LEN => cbc_encrypt_blocks::<Aes256CbcEnc>(&crypt_key, iv, &mut body)?,
        _ => return Err(KrbError::InvalidKeyLength),
    }

    let mut ciphertext = Vec::with_capacity(AES_BLOCK_SIZE + body.len());
    ciphertext.extend_from_slice(iv);
    ciphertext.extend_from_slice(&body);
    Ok(ciphertext)
}

/// Encrypt under the crypt sub key of `master_key` with AES-CBC and PKCS#7
/// padding. The output is `IV || ciphertext` with a fresh random IV.
pub(crate) fn encrypt_cbc_pkcs7(master_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, KrbError> {
    let mut iv = [0u8; AES_BLOCK_SIZE];
    random_bytes(&mut iv)?;
    encrypt_with_iv(master_key, &iv, plaintext)
}

/// Reverse of [encrypt_cbc_pkcs7]. A wrong key is almost always reported as
/// `InvalidPadding`, but that is indistinguishable from corrupted input and must
/// not be relied upon.
pub(crate) fn decrypt_cbc_pkcs7(master_key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, KrbError> {
    if ciphertext.len() < AES_BLOCK_SIZE {
        return Err(KrbError::MalformedCiphertext);
    }

    let (iv, body) = ciphertext.split_at(AES_BLOCK_SIZE);
    if body.len() % AES_BLOCK_SIZE != 0 {
        return Err(KrbError::MalformedCiphertext);
    }

    let (crypt_key, _) = derive_subkeys(master_key)?;

    let mut plaintext = body.to_vec();
    match crypt_key.len() {
        AES_128_KEY_LEN => cbc_decrypt_blocks::<Aes128CbcDec>(&crypt_key, iv, &mut plaintext)?,
        AES_256_KEY_LEN => cbc_decrypt_blocks::<Aes256CbcDec>(&crypt_key, iv, &mut plaintext)?,
        _ => return Err(KrbError::InvalidKeyLength),
    }

    pkcs7_unpad(plaintext)
}

fn hmac_sha256(master_key: &[u8]) -> Result<HmacSha256, KrbError> {
    let (_, mac_key) = derive_subkeys(master_key)?;
    HmacSha256::new_from_slice(&mac_key).map_err(|_| KrbError::InvalidHmacKey)
}

/// HMAC-SHA256 over `data` under the mac sub key of `master_key`.
pub(crate) fn mac_hmac_sha256(master_key: &[u8], data: &[u8]) -> Result<Vec<u8>, KrbError> {
    let mut mac = hmac_sha256(master_key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Recompute the tag over `data` and compare it to `tag` in constant time.
pub(crate) fn verify_hmac_sha256(
    master_key: &[u8],
    data: &[u8],
    tag: &[u8],
) -> Result<(), KrbError> {
    let mut mac = hmac_sha256(master_key)?;
    mac.update(data);
    mac.verify_slice(tag)
        .map_err(|_| KrbError::MessageAuthenticationFailed)
}

/// Stretch a password into a long term key of `key_len` bytes.
pub(crate) fn derive_key_from_password(password: &str, key_len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; key_len];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        PASSWORD_SALT,
        PBKDF2_SHA256_ITER,
        &mut buf,
    );
    buf
}
