//! Writing the `bt` boot block.

use crate::cipher::{v2_specific_key, xxtea_encrypt};
use crate::padding::write_zeros;
use std::io::{self, Write};

/// How much of the encrypted `ri` head seeds the V2 boot block.
const RI_HEAD_LEN: usize = 64;

/// Write the V2 boot block: the first 64 bytes of the *already encrypted*
/// `ri` file, encrypted once more under the device key derived from the
/// pack UUID.
pub fn write_boot_block_v2<S: Write>(
    to: &mut S,
    ri_encrypted: &[u8],
    pack_uuid: &[u8; 16],
) -> io::Result<()> {
    let key = v2_specific_key(pack_uuid);
    let head = &ri_encrypted[..RI_HEAD_LEN.min(ri_encrypted.len())];
    to.write_all(&xxtea_encrypt(head, &key))
}

/// Write the V3 boot block placeholder. The device writes the real block at
/// install time; sixty-four zero bytes keep the slot in place until then.
pub fn write_boot_block_v3<S: Write>(to: &mut S) -> io::Result<()> {
    write_zeros(to, RI_HEAD_LEN as u64)
}
