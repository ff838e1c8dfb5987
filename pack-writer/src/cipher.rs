//! The ciphers the player firmware expects on pack files.
//!
//! V2 devices use the XXTEA block cipher under a common key baked into the
//! firmware; V3 devices use AES-CBC with key material read out of the target
//! device. Both only ever see the first [`FIRST_BLOCK_LEN`] bytes of a file.

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};

/// The 16-byte XXTEA key shared by every V2 device.
pub const COMMON_KEY_V2: [u8; 16] = [
    0x91, 0xBD, 0x7A, 0x0A, 0xA7, 0x54, 0x40, 0xA9, //
    0xBB, 0xD4, 0x9D, 0x6C, 0xE0, 0xDC, 0xC0, 0xE3,
];

/// How many leading bytes of each asset and index file are encrypted.
pub const FIRST_BLOCK_LEN: usize = 512;

const DELTA: u32 = 0x9E37_79B9;

/// Byte order in which UUID bytes are shuffled into the V2 device key.
const DEVICE_KEY_SHUFFLE: [usize; 16] = [
    11, 10, 9, 8, //
    15, 14, 13, 12, //
    3, 2, 1, 0, //
    7, 6, 5, 4,
];

/// Pack data bytes into 32-bit words, little-endian, zero-padding the last
/// word.
fn data_words(data: &[u8]) -> Vec<u32> {
    let mut words = vec![0u32; (data.len() + 3) / 4];
    for (i, byte) in data.iter().enumerate() {
        words[i >> 2] |= u32::from(*byte) << ((i & 3) * 8);
    }
    words
}

/// Pack the 16 key bytes into the four round subkeys.
///
/// The key does NOT use the little-endian packing of the data: bytes go in
/// reversed (`key[15 - i]` lands in word `i >> 2`) and the word vector is
/// then reversed again, which collapses to reading four big-endian words in
/// order. The firmware really does treat key and data differently.
fn key_words(key: &[u8; 16]) -> [u32; 4] {
    let mut words = [0u32; 4];
    for (word, bytes) in words.iter_mut().zip(key.chunks_exact(4)) {
        *word = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }
    words
}

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * 4);
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out
}

fn mix(z: u32, y: u32, sum: u32, key: &[u32; 4], p: usize, e: usize) -> u32 {
    (((z >> 5) ^ (y << 2)).wrapping_add((y >> 3) ^ (z << 4)))
        ^ ((sum ^ y).wrapping_add(key[(p & 3) ^ e] ^ z))
}

/// XXTEA-encrypt a buffer. Buffers shorter than two words (after the last
/// word is zero-padded) pass through unchanged; longer buffers round up to a
/// whole number of words.
pub fn xxtea_encrypt(data: &[u8], key: &[u8; 16]) -> Vec<u8> {
    let mut v = data_words(data);
    if v.len() < 2 {
        return data.to_vec();
    }
    let k = key_words(key);
    let n = v.len() - 1;
    let rounds = 52 / v.len() + 1;
    let mut sum = 0u32;
    let mut z = v[n];
    for _ in 0..rounds {
        sum = sum.wrapping_add(DELTA);
        let e = ((sum >> 2) & 3) as usize;
        for p in 0..n {
            let y = v[p + 1];
            v[p] = v[p].wrapping_add(mix(z, y, sum, &k, p, e));
            z = v[p];
        }
        let y = v[0];
        v[n] = v[n].wrapping_add(mix(z, y, sum, &k, n, e));
        z = v[n];
    }
    words_to_bytes(&v)
}

/// Invert [`xxtea_encrypt`]. Needed for deriving the V2 device key; packs
/// themselves are never decrypted here.
pub fn xxtea_decrypt(data: &[u8], key: &[u8; 16]) -> Vec<u8> {
    let mut v = data_words(data);
    if v.len() < 2 {
        return data.to_vec();
    }
    let k = key_words(key);
    let n = v.len() - 1;
    let rounds = 52 / v.len() + 1;
    let mut sum = (rounds as u32).wrapping_mul(DELTA);
    let mut y = v[0];
    for _ in 0..rounds {
        let e = ((sum >> 2) & 3) as usize;
        for p in (1..=n).rev() {
            let z = v[p - 1];
            v[p] = v[p].wrapping_sub(mix(z, y, sum, &k, p, e));
            y = v[p];
        }
        let z = v[n];
        v[0] = v[0].wrapping_sub(mix(z, y, sum, &k, 0, e));
        y = v[0];
        sum = sum.wrapping_sub(DELTA);
    }
    words_to_bytes(&v)
}

/// Derive the device-specific key a V2 player uses for its boot block:
/// XXTEA-decrypt the 16 pack-UUID bytes under the common key, then shuffle
/// the result with the fixed index sequence.
pub fn v2_specific_key(uuid_bytes: &[u8; 16]) -> [u8; 16] {
    let decrypted = xxtea_decrypt(uuid_bytes, &COMMON_KEY_V2);
    let mut key = [0u8; 16];
    for (dst, &src) in key.iter_mut().zip(DEVICE_KEY_SHUFFLE.iter()) {
        *dst = decrypted[src];
    }
    key
}

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("AES key must be 16, 24 or 32 bytes, got {0}")]
    KeyLength(usize),

    #[error("AES IV must be 16 bytes, got {0}")]
    IvLength(usize),
}

/// AES key material for V3 packs.
#[derive(Clone)]
pub enum AesKey {
    Aes128([u8; 16]),
    Aes192([u8; 24]),
    Aes256([u8; 32]),
}

impl AesKey {
    pub fn from_slice(key: &[u8]) -> Result<Self, CipherError> {
        match key.len() {
            16 => {
                let mut k = [0u8; 16];
                k.copy_from_slice(key);
                Ok(AesKey::Aes128(k))
            }
            24 => {
                let mut k = [0u8; 24];
                k.copy_from_slice(key);
                Ok(AesKey::Aes192(k))
            }
            32 => {
                let mut k = [0u8; 32];
                k.copy_from_slice(key);
                Ok(AesKey::Aes256(k))
            }
            n => Err(CipherError::KeyLength(n)),
        }
    }
}

fn aes_cbc_encrypt(data: &[u8], key: &AesKey, iv: &[u8; 16]) -> Vec<u8> {
    match key {
        AesKey::Aes128(key) => cbc::Encryptor::<aes::Aes128>::new(key.into(), iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        AesKey::Aes192(key) => cbc::Encryptor::<aes::Aes192>::new(key.into(), iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        AesKey::Aes256(key) => cbc::Encryptor::<aes::Aes256>::new(key.into(), iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(data),
    }
}

/// The cipher applied to every asset and index file of a pack.
#[derive(Clone)]
pub enum PackCipher {
    Xxtea { key: [u8; 16] },
    AesCbc { key: AesKey, iv: [u8; 16] },
}

impl PackCipher {
    /// The V2 cipher: XXTEA under the common key.
    pub fn v2() -> Self {
        PackCipher::Xxtea { key: COMMON_KEY_V2 }
    }

    /// The V3 cipher: AES-CBC under key material from the target device.
    pub fn v3(key: &[u8], iv: &[u8]) -> Result<Self, CipherError> {
        let key = AesKey::from_slice(key)?;
        let iv: [u8; 16] = iv
            .try_into()
            .map_err(|_| CipherError::IvLength(iv.len()))?;
        Ok(PackCipher::AesCbc { key, iv })
    }

    /// Encrypt a whole buffer.
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        match self {
            PackCipher::Xxtea { key } => xxtea_encrypt(data, key),
            PackCipher::AesCbc { key, iv } => aes_cbc_encrypt(data, key, iv),
        }
    }

    /// Encrypt at most the first [`FIRST_BLOCK_LEN`] bytes, splicing the
    /// ciphertext over the head and leaving the tail untouched. When the
    /// ciphertext outgrows the whole input (CBC padding, or XXTEA rounding a
    /// short buffer up to whole words) the ciphertext alone is returned.
    pub fn encrypt_first_block(&self, data: &[u8]) -> Vec<u8> {
        let head_len = FIRST_BLOCK_LEN.min(data.len());
        let encrypted = self.encrypt(&data[..head_len]);
        if encrypted.len() > data.len() {
            return encrypted;
        }
        let mut out = data.to_vec();
        out[..encrypted.len()].copy_from_slice(&encrypted);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::{prop_assert_eq, proptest};

    #[test]
    fn common_key_is_baked_in() {
        assert_eq!(hex::encode(COMMON_KEY_V2), "91bd7a0aa75440a9bbd49d6ce0dcc0e3");
    }

    #[test]
    fn key_packing_is_not_little_endian() {
        // Four big-endian reads of the key bytes, NOT the data packing.
        assert_eq!(
            key_words(&COMMON_KEY_V2),
            [0x91BD7A0A, 0xA75440A9, 0xBBD49D6C, 0xE0DCC0E3]
        );
    }

    #[test]
    fn data_packing_is_little_endian() {
        assert_eq!(
            data_words(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]),
            vec![0x03020100, 0x07060504]
        );
        // trailing bytes pad the last word with zeroes
        assert_eq!(data_words(&[0xAA, 0xBB]), vec![0x0000BBAA]);
    }

    #[test]
    fn short_buffers_pass_through() {
        let key = COMMON_KEY_V2;
        assert_eq!(xxtea_encrypt(&[], &key), Vec::<u8>::new());
        assert_eq!(xxtea_encrypt(&[1, 2, 3, 4], &key), vec![1, 2, 3, 4]);
        assert_eq!(xxtea_decrypt(&[1, 2, 3, 4], &key), vec![1, 2, 3, 4]);
    }

    #[test]
    fn encrypting_changes_the_head() {
        let data = [0u8; 64];
        let encrypted = xxtea_encrypt(&data, &COMMON_KEY_V2);
        assert_eq!(encrypted.len(), 64);
        assert_ne!(encrypted, data);
    }

    #[test]
    fn device_key_permutes_the_decrypted_uuid() {
        let uuid = *b"\xaa\xbb\xcc\xdd\xee\xff\x00\x11\x22\x33\x44\x55\x66\x77\x88\x99";
        let decrypted = xxtea_decrypt(&uuid, &COMMON_KEY_V2);
        let key = v2_specific_key(&uuid);
        for (i, &src) in DEVICE_KEY_SHUFFLE.iter().enumerate() {
            assert_eq!(key[i], decrypted[src]);
        }
    }

    #[test]
    fn aes_first_block_of_a_short_buffer_grows() {
        let cipher = PackCipher::v3(&[0x42; 16], &[0x17; 16]).expect("key material");
        let out = cipher.encrypt_first_block(&[0xAB; 10]);
        // PKCS#7 pads to a whole AES block, so the ciphertext replaces the
        // input outright.
        assert_eq!(out.len(), 16);
    }

    #[test]
    fn aes_cbc_round_trips() {
        use aes::cipher::BlockDecryptMut;

        let key = [0x42u8; 16];
        let iv = [0x17u8; 16];
        let cipher = PackCipher::v3(&key, &iv).expect("key material");
        let plain = b"thirty-two bytes of plaintext!!!";
        let encrypted = cipher.encrypt(plain);
        let decrypted = cbc::Decryptor::<aes::Aes128>::new(&key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&encrypted)
            .expect("padding");
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn v3_rejects_bad_key_material() {
        assert!(matches!(
            PackCipher::v3(&[0u8; 10], &[0u8; 16]),
            Err(CipherError::KeyLength(10))
        ));
        assert!(matches!(
            PackCipher::v3(&[0u8; 16], &[0u8; 8]),
            Err(CipherError::IvLength(8))
        ));
    }

    proptest! {
        #[test]
        fn xxtea_round_trips(data in proptest::collection::vec(proptest::num::u8::ANY, 8..256)) {
            // whole words only; odd tails round up and are covered by the
            // first-block contract instead
            let data = &data[..data.len() & !3];
            let encrypted = xxtea_encrypt(data, &COMMON_KEY_V2);
            prop_assert_eq!(xxtea_decrypt(&encrypted, &COMMON_KEY_V2), data);
        }

        #[test]
        fn first_block_preserves_the_tail(tail in proptest::collection::vec(proptest::num::u8::ANY, 0..64)) {
            let mut data = vec![0x5Au8; FIRST_BLOCK_LEN];
            data.extend_from_slice(&tail);
            let out = PackCipher::v2().encrypt_first_block(&data);
            prop_assert_eq!(out.len(), data.len());
            prop_assert_eq!(&out[FIRST_BLOCK_LEN..], &tail[..]);
            let head = xxtea_decrypt(&out[..FIRST_BLOCK_LEN], &COMMON_KEY_V2);
            prop_assert_eq!(&head[..], &data[..FIRST_BLOCK_LEN]);
        }
    }
}
