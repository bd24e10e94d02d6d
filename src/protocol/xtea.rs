//! XTEA block cipher used on every frame after login
//!
//! The key is expanded into round subkeys once per connection and the
//! expanded form is reused for both directions.

use crate::error::CipherError;

/// Cipher block size in bytes
pub const BLOCK_SIZE: usize = 8;

const ROUNDS: usize = 32;
const DELTA: u32 = 0x9E37_79B9;

/// Raw 128-bit key as sent by the client during login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XteaKey(pub [u32; 4]);

impl XteaKey {
    /// Precompute the round subkeys
    pub fn expand(&self) -> ExpandedKey {
        let mut subkeys = [0u32; ROUNDS * 2];
        let mut sum: u32 = 0;

        for round in 0..ROUNDS {
            subkeys[round * 2] = sum.wrapping_add(self.0[(sum & 3) as usize]);
            sum = sum.wrapping_add(DELTA);
            subkeys[round * 2 + 1] = sum.wrapping_add(self.0[((sum >> 11) & 3) as usize]);
        }

        ExpandedKey { subkeys }
    }
}

/// Round subkeys for one connection
#[derive(Clone, PartialEq, Eq)]
pub struct ExpandedKey {
    subkeys: [u32; ROUNDS * 2],
}

impl std::fmt::Debug for ExpandedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ExpandedKey(<redacted>)")
    }
}

impl ExpandedKey {
    /// Encrypt `buffer` in place
    pub fn encrypt(&self, buffer: &mut [u8]) -> Result<(), CipherError> {
        check_block_size(buffer)?;

        for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
            let (mut v0, mut v1) = load(block);
            for round in 0..ROUNDS {
                v0 = v0.wrapping_add(mix(v1) ^ self.subkeys[round * 2]);
                v1 = v1.wrapping_add(mix(v0) ^ self.subkeys[round * 2 + 1]);
            }
            store(block, v0, v1);
        }

        Ok(())
    }

    /// Decrypt `buffer` in place
    pub fn decrypt(&self, buffer: &mut [u8]) -> Result<(), CipherError> {
        check_block_size(buffer)?;

        for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
            let (mut v0, mut v1) = load(block);
            for round in (0..ROUNDS).rev() {
                v1 = v1.wrapping_sub(mix(v0) ^ self.subkeys[round * 2 + 1]);
                v0 = v0.wrapping_sub(mix(v1) ^ self.subkeys[round * 2]);
            }
            store(block, v0, v1);
        }

        Ok(())
    }
}

fn check_block_size(buffer: &[u8]) -> Result<(), CipherError> {
    if buffer.len() % BLOCK_SIZE != 0 {
        return Err(CipherError::BlockSize(buffer.len()));
    }
    Ok(())
}

#[inline]
fn mix(v: u32) -> u32 {
    ((v << 4) ^ (v >> 5)).wrapping_add(v)
}

#[inline]
fn load(block: &[u8]) -> (u32, u32) {
    (
        u32::from_le_bytes([block[0], block[1], block[2], block[3]]),
        u32::from_le_bytes([block[4], block[5], block[6], block[7]]),
    )
}

#[inline]
fn store(block: &mut [u8], v0: u32, v1: u32) {
    block[..4].copy_from_slice(&v0.to_le_bytes());
    block[4..].copy_from_slice(&v1.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: XteaKey = XteaKey([1, 2, 3, 4]);

    #[test]
    fn test_known_answer() {
        let mut block = [0x03, 0x00, 0x01, 0x02, 0x03, 0x33, 0x33, 0x33];
        KEY.expand().encrypt(&mut block).unwrap();
        assert_eq!(block, [0x5c, 0xb8, 0x3e, 0x2c, 0xc8, 0x1f, 0x36, 0x7d]);
    }

    #[test]
    fn test_decrypt_known_answer() {
        let mut block = [0x30, 0x60, 0x3f, 0x01, 0xf7, 0x8d, 0x16, 0xd1];
        KEY.expand().decrypt(&mut block).unwrap();
        assert_eq!(block, [0x01, 0x00, 0xff, 0x33, 0x33, 0x33, 0x33, 0x33]);
    }

    #[test]
    fn test_rejects_partial_block() {
        let key = KEY.expand();
        let mut buffer = vec![0u8; 12];
        assert_eq!(key.decrypt(&mut buffer), Err(CipherError::BlockSize(12)));
        assert_eq!(key.encrypt(&mut buffer[..7]), Err(CipherError::BlockSize(7)));
    }

    #[test]
    fn test_expansion_is_deterministic() {
        assert_eq!(KEY.expand(), KEY.expand());
        assert_ne!(KEY.expand(), XteaKey([4, 3, 2, 1]).expand());
    }

    proptest! {
        #[test]
        fn prop_round_trip(key in any::<[u32; 4]>(), blocks in prop::collection::vec(any::<[u8; 8]>(), 0..32)) {
            let plain: Vec<u8> = blocks.concat();
            let expanded = XteaKey(key).expand();

            let mut buffer = plain.clone();
            expanded.encrypt(&mut buffer).unwrap();
            expanded.decrypt(&mut buffer).unwrap();

            prop_assert_eq!(buffer, plain);
        }
    }
}
