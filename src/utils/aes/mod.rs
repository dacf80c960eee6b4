//! Symmetric layer of the hybrid encryption protocol.
//!
//! The encapsulated pairing-target element is hashed with SHA3-512 and the
//! digest split into an AES-256 key and a CBC initialization vector. The
//! payload is zero-padded to the block size; the original length is
//! recorded in the container and decryption truncates back to it, the way
//! the kpabe toolkit recovers file contents.
use aes::cipher::block_padding::{NoPadding, ZeroPadding};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rabe_bn::Gt;
use sha3::{Digest, Sha3_512};

use crate::error::AbeError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const BLOCK_LEN: usize = 16;

/// Key and IV derived from the canonical encoding of the encapsulated
/// element: one SHA3-512 digest, split into two segments.
pub fn derive_key_iv(element: &Gt) -> Result<([u8; KEY_LEN], [u8; IV_LEN]), AbeError> {
    let encoded = bincode::serialize(element)
        .map_err(|_| AbeError::invariant("group element encoding failed"))?;
    let digest = Sha3_512::digest(&encoded);
    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    iv.copy_from_slice(&digest[KEY_LEN..KEY_LEN + IV_LEN]);
    Ok((key, iv))
}

/// Encrypts `plaintext` under the key derived from `element`, returning
/// the zero-padded CBC bytes and the IV that went into the container.
pub fn encrypt_symmetric(
    element: &Gt,
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; IV_LEN]), AbeError> {
    let (key, iv) = derive_key_iv(element)?;
    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<ZeroPadding>(plaintext);
    Ok((ciphertext, iv))
}

/// Inverse of [`encrypt_symmetric`], truncating to the recorded plaintext
/// length.
pub fn decrypt_symmetric(
    element: &Gt,
    ciphertext: &[u8],
    plaintext_len: usize,
) -> Result<Vec<u8>, AbeError> {
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(AbeError::malformed(
            "payload length is not a multiple of the cipher block size",
        ));
    }
    if plaintext_len > ciphertext.len() || ciphertext.len() - plaintext_len >= BLOCK_LEN {
        return Err(AbeError::malformed(
            "recorded plaintext length does not match the payload",
        ));
    }
    let (key, iv) = derive_key_iv(element)?;
    let mut plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| AbeError::malformed("symmetric decryption failed"))?;
    plaintext.truncate(plaintext_len);
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn random_element() -> Gt {
        rand::thread_rng().gen()
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let element = random_element();
        assert_eq!(derive_key_iv(&element).unwrap(), derive_key_iv(&element).unwrap());
        let other = random_element();
        assert_ne!(derive_key_iv(&element).unwrap(), derive_key_iv(&other).unwrap());
    }

    #[test]
    fn test_roundtrip_lengths() {
        let element = random_element();
        for len in [0usize, 1, BLOCK_LEN - 1, BLOCK_LEN, BLOCK_LEN + 1, 1000] {
            let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let (ciphertext, _iv) = encrypt_symmetric(&element, &plaintext).unwrap();
            assert_eq!(ciphertext.len() % BLOCK_LEN, 0);
            let recovered = decrypt_symmetric(&element, &ciphertext, len).unwrap();
            assert_eq!(recovered, plaintext);
        }
    }

    #[test]
    fn test_rejects_inconsistent_lengths() {
        let element = random_element();
        let (ciphertext, _) = encrypt_symmetric(&element, b"sixteen byte msg").unwrap();
        // recorded length points at a whole missing block
        assert!(decrypt_symmetric(&element, &ciphertext, ciphertext.len() + 1).is_err());
        assert!(decrypt_symmetric(&element, &ciphertext[..BLOCK_LEN - 1], 3).is_err());
    }

    #[test]
    fn test_wrong_element_yields_garbage() {
        let element = random_element();
        let plaintext = b"dance like no one's watching, encrypt like everyone is!";
        let (ciphertext, _) = encrypt_symmetric(&element, plaintext).unwrap();
        let wrong = random_element();
        match decrypt_symmetric(&wrong, &ciphertext, plaintext.len()) {
            Ok(recovered) => assert_ne!(recovered, plaintext.to_vec()),
            Err(_) => {}
        }
    }
}
