/*
    himd-rs
    https://github.com/himd-rs/himd

    Copyright 2026 The himd-rs contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! Cipher primitives of the Sony DRM scheme.
//!
//! Everything here is DES-shaped: key material is 8 or 16 bytes, block
//! payloads are DES-CBC ciphertext, and every MAC is the ANSI X9.19 retail
//! MAC. The EKB root table unwraps disc-scoped key material; only EKB
//! `0x00010012` is known. No padding is ever applied; all message lengths are
//! multiples of the DES block size by construction.

use std::sync::atomic::{AtomicBool, Ordering};

use cipher::block_padding::NoPadding;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use des::{Des, TdesEde3};

use crate::{HimdError, HIMD_EKB_VERSION};

type DesCbcEnc = cbc::Encryptor<Des>;
type DesCbcDec = cbc::Decryptor<Des>;

/// Root key of EKB `0x00010012`, the only key block retail Hi-MD media carry.
const EKB_ROOT_00010012: [u8; 24] = [
    0xF5, 0x1E, 0xCB, 0x2A, 0x80, 0x8F, 0x15, 0xFD, 0x54, 0x2E, 0xF5, 0x12, 0x3B, 0xCD, 0xBC,
    0xA4, 0xF5, 0x1E, 0xCB, 0x2A, 0x80, 0x8F, 0x15, 0xFD,
];

/// Shared secret of the authentication handshake: the first 16 bytes of the
/// EKB `0x00010012` root.
pub const MAIN_KEY: [u8; 16] = [
    0xF5, 0x1E, 0xCB, 0x2A, 0x80, 0x8F, 0x15, 0xFD, 0x54, 0x2E, 0xF5, 0x12, 0x3B, 0xCD, 0xBC,
    0xA4,
];

/// Look up the 24-byte root of an EKB number.
pub fn ekb_root(ekb: u32) -> Result<&'static [u8; 24], HimdError> {
    match ekb {
        HIMD_EKB_VERSION => Ok(&EKB_ROOT_00010012),
        other => Err(HimdError::UnknownEkb(other)),
    }
}

pub fn des_ecb_encrypt(key: &[u8; 8], data: &mut [u8]) {
    debug_assert_eq!(data.len() % 8, 0);
    let cipher = Des::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

pub fn des_ecb_decrypt(key: &[u8; 8], data: &mut [u8]) {
    debug_assert_eq!(data.len() % 8, 0);
    let cipher = Des::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(8) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

pub fn triple_des_ecb_encrypt(key: &[u8; 24], data: &mut [u8]) {
    debug_assert_eq!(data.len() % 8, 0);
    let cipher = TdesEde3::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

pub fn triple_des_ecb_decrypt(key: &[u8; 24], data: &mut [u8]) {
    debug_assert_eq!(data.len() % 8, 0);
    let cipher = TdesEde3::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(8) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

pub fn des_cbc_encrypt(key: &[u8; 8], iv: &[u8; 8], data: &mut [u8]) {
    let len = data.len();
    debug_assert_eq!(len % 8, 0);
    DesCbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .encrypt_padded_mut::<NoPadding>(data, len)
        .expect("message length is a multiple of the DES block size");
}

pub fn des_cbc_decrypt(key: &[u8; 8], iv: &[u8; 8], data: &mut [u8]) {
    debug_assert_eq!(data.len() % 8, 0);
    DesCbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .decrypt_padded_mut::<NoPadding>(data)
        .expect("message length is a multiple of the DES block size");
}

/// Unwrap the per-track key stored in a track slot.
pub fn create_track_key(ekb: u32, encrypted_key: &[u8; 8]) -> Result<[u8; 8], HimdError> {
    let root = ekb_root(ekb)?;
    let mut key = *encrypted_key;
    triple_des_ecb_decrypt(root, &mut key);
    Ok(key)
}

/// Wrap a freshly generated track key for storage in a track slot.
pub fn encrypt_track_key(track_key: &[u8; 8]) -> [u8; 8] {
    let mut key = *track_key;
    triple_des_ecb_encrypt(&EKB_ROOT_00010012, &mut key);
    key
}

/// Derive the key a single block's payload is encrypted under.
pub fn derive_block_key(track_key: &[u8; 8], fragment_key: &[u8; 8], block_key: &[u8; 8]) -> [u8; 8] {
    let mut mixed = [0u8; 8];
    for i in 0..8 {
        mixed[i] = track_key[i] ^ fragment_key[i];
    }
    let mut derived = *block_key;
    des_ecb_encrypt(&mixed, &mut derived);
    derived
}

/// Encrypt one block's audio payload in place.
pub fn encrypt_block(
    track_key: &[u8; 8],
    fragment_key: &[u8; 8],
    block_key: &[u8; 8],
    block_iv: &[u8; 8],
    audio_data: &mut [u8],
) {
    let derived = derive_block_key(track_key, fragment_key, block_key);
    des_cbc_encrypt(&derived, block_iv, audio_data);
}

/// Decrypt one block's audio payload in place.
pub fn decrypt_block(
    track_key: &[u8; 8],
    fragment_key: &[u8; 8],
    block_key: &[u8; 8],
    block_iv: &[u8; 8],
    audio_data: &mut [u8],
) {
    let derived = derive_block_key(track_key, fragment_key, block_key);
    des_cbc_decrypt(&derived, block_iv, audio_data);
}

/// ANSI X9.19 retail MAC over an 8-byte-aligned message, no padding.
pub fn retail_mac(message: &[u8], key: &[u8; 16]) -> [u8; 8] {
    debug_assert_eq!(message.len() % 8, 0);
    let k1: [u8; 8] = key[..8].try_into().expect("key halves are 8 bytes");
    let k2: [u8; 8] = key[8..].try_into().expect("key halves are 8 bytes");
    let mut buf = message.to_vec();
    des_cbc_encrypt(&k1, &[0u8; 8], &mut buf);
    let mut mac: [u8; 8] = buf[buf.len() - 8..].try_into().expect("message is non-empty");
    des_ecb_decrypt(&k2, &mut mac);
    des_ecb_encrypt(&k1, &mut mac);
    mac
}

/// MAC binding the ICV header and value to a session key.
pub fn create_icv_mac(header_icv: &[u8], session_key: &[u8; 8]) -> [u8; 8] {
    debug_assert_eq!(header_icv.len() % 8, 0);
    let mut buf = header_icv.to_vec();
    des_cbc_encrypt(session_key, &[0u8; 8], &mut buf);
    buf[buf.len() - 8..].try_into().expect("header is non-empty")
}

/// MAC over the signed region of a serialized track entry.
pub fn create_track_mac(track_key: &[u8; 8], track_entry: &[u8]) -> [u8; 8] {
    let mut mac_key = [0u8; 8];
    des_ecb_encrypt(track_key, &mut mac_key);
    let mut buf = track_entry.to_vec();
    des_cbc_encrypt(&mac_key, &[0u8; 8], &mut buf);
    buf[buf.len() - 8..].try_into().expect("entry is non-empty")
}

/// Unwrap one of the two MCLIST signing keys.
pub fn decrypt_maclist_key(key_cipher: &[u8; 16]) -> [u8; 16] {
    let mut key = *key_cipher;
    triple_des_ecb_decrypt(&EKB_ROOT_00010012, &mut key);
    key
}

/// Key stream seed for MP3 payload obfuscation. The same four bytes repeat
/// over the obfuscated span of every block of the track.
pub fn mp3_encryption_key(disc_id: &[u8; 16], track_number: u16) -> [u8; 4] {
    let tail = u32::from_be_bytes([disc_id[12], disc_id[13], disc_id[14], disc_id[15]]);
    let mixed = (track_number as u32)
        .wrapping_mul(0x6953_B2ED)
        .wrapping_add(0x6B_AAB1)
        ^ tail;
    mixed.to_be_bytes()
}

/// Block payload cipher work, offloadable to an accelerator. One provider
/// serves one stream at a time; concurrent reuse fails with `ProviderBusy`.
pub trait CryptoProvider {
    fn encrypt(
        &self,
        track_key: &[u8; 8],
        fragment_key: &[u8; 8],
        block_key: &[u8; 8],
        block_iv: &[u8; 8],
        data: &mut [u8],
    ) -> Result<(), HimdError>;

    fn decrypt(
        &self,
        track_key: &[u8; 8],
        fragment_key: &[u8; 8],
        block_key: &[u8; 8],
        block_iv: &[u8; 8],
        data: &mut [u8],
    ) -> Result<(), HimdError>;
}

/// Software provider backed by the primitives above.
#[derive(Default)]
pub struct SoftwareCrypto {
    busy: AtomicBool,
}

impl SoftwareCrypto {
    pub fn new() -> Self {
        SoftwareCrypto::default()
    }

    fn acquire(&self) -> Result<BusyGuard<'_>, HimdError> {
        if self.busy.swap(true, Ordering::Acquire) {
            return Err(HimdError::ProviderBusy);
        }
        Ok(BusyGuard { flag: &self.busy })
    }
}

struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl CryptoProvider for SoftwareCrypto {
    fn encrypt(
        &self,
        track_key: &[u8; 8],
        fragment_key: &[u8; 8],
        block_key: &[u8; 8],
        block_iv: &[u8; 8],
        data: &mut [u8],
    ) -> Result<(), HimdError> {
        let _guard = self.acquire()?;
        encrypt_block(track_key, fragment_key, block_key, block_iv, data);
        Ok(())
    }

    fn decrypt(
        &self,
        track_key: &[u8; 8],
        fragment_key: &[u8; 8],
        block_key: &[u8; 8],
        block_iv: &[u8; 8],
        data: &mut [u8],
    ) -> Result<(), HimdError> {
        let _guard = self.acquire()?;
        decrypt_block(track_key, fragment_key, block_key, block_iv, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The classic single-block DES vector.
    #[test]
    fn des_known_answer() {
        let key: [u8; 8] = hex::decode("133457799bbcdff1").unwrap().try_into().unwrap();
        let mut block: [u8; 8] = hex::decode("0123456789abcdef").unwrap().try_into().unwrap();
        des_ecb_encrypt(&key, &mut block);
        assert_eq!(hex::encode(block), "85e813540f0ab405");
        des_ecb_decrypt(&key, &mut block);
        assert_eq!(hex::encode(block), "0123456789abcdef");
    }

    #[test]
    fn track_key_round_trip() {
        let key = [0x13, 0x37, 0xC0, 0xDE, 0x00, 0xFF, 0x55, 0xAA];
        let wrapped = encrypt_track_key(&key);
        assert_ne!(wrapped, key);
        assert_eq!(create_track_key(HIMD_EKB_VERSION, &wrapped).unwrap(), key);
    }

    #[test]
    fn unknown_ekb_is_rejected() {
        assert!(matches!(
            create_track_key(0x00010013, &[0u8; 8]),
            Err(HimdError::UnknownEkb(0x00010013))
        ));
    }

    #[test]
    fn block_payload_round_trip() {
        let tk = [1u8; 8];
        let fk = [2u8; 8];
        let bk = [3u8; 8];
        let iv = [4u8; 8];
        let mut payload = vec![0u8; crate::HIMD_AUDIO_SIZE];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let original = payload.clone();
        encrypt_block(&tk, &fk, &bk, &iv, &mut payload);
        assert_ne!(payload, original);
        decrypt_block(&tk, &fk, &bk, &iv, &mut payload);
        assert_eq!(payload, original);
    }

    #[test]
    fn retail_mac_matches_manual_composition() {
        let key: [u8; 16] = MAIN_KEY;
        let message = [0x42u8; 32];
        // CBC-encrypt by hand, then apply the final X9.19 transform.
        let mut buf = message.to_vec();
        let k1: [u8; 8] = key[..8].try_into().unwrap();
        let k2: [u8; 8] = key[8..].try_into().unwrap();
        des_cbc_encrypt(&k1, &[0u8; 8], &mut buf);
        let mut expected: [u8; 8] = buf[24..].try_into().unwrap();
        des_ecb_decrypt(&k2, &mut expected);
        des_ecb_encrypt(&k1, &mut expected);
        assert_eq!(retail_mac(&message, &key), expected);
    }

    #[test]
    fn mp3_key_schedule() {
        let mut disc_id = [0u8; 16];
        assert_eq!(mp3_encryption_key(&disc_id, 1), [0x69, 0xBF, 0x5D, 0x9E]);
        disc_id[12..].copy_from_slice(&[0xFF; 4]);
        assert_eq!(
            mp3_encryption_key(&disc_id, 1),
            [0x69 ^ 0xFF, 0xBF ^ 0xFF, 0x5D ^ 0xFF, 0x9E ^ 0xFF]
        );
    }

    #[test]
    fn provider_rejects_reentrant_use() {
        let provider = SoftwareCrypto::new();
        let guard = provider.acquire().unwrap();
        assert!(matches!(
            provider.encrypt(&[0; 8], &[0; 8], &[0; 8], &[0; 8], &mut [0u8; 8]),
            Err(HimdError::ProviderBusy)
        ));
        drop(guard);
        assert!(provider
            .encrypt(&[0; 8], &[0; 8], &[0; 8], &[0; 8], &mut [0u8; 8])
            .is_ok());
    }
}
