//! Writing the `li` list index: the flattened option runs of every action
//! node.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

/// Write the list index from already-resolved stage positions.
///
/// The slice is the concatenation of every action node's option run in
/// declaration order; the offsets stored in `ni` index into it by element.
pub fn write_list_index<S: Write>(to: &mut S, positions: &[u32]) -> io::Result<()> {
    for position in positions {
        to.write_u32::<LittleEndian>(*position)?;
    }
    Ok(())
}
