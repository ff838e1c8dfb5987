//! Writing the `ri` and `si` resource indices.

use std::io::{self, Write};

/// Length of one serialized resource record.
pub const RECORD_LEN: usize = 12;

/// Write a resource index for `count` assets.
///
/// Each record is the fixed 12-byte ASCII path `000\XXXXXXXX` of the asset
/// on the device, in positional order; the backslash is literal.
pub fn write_asset_index<S: Write>(to: &mut S, count: usize) -> io::Result<()> {
    for position in 0..count {
        write!(to, "000\\{position:08}")?;
    }
    Ok(())
}
