//! Writing the `ni` node index: a 512-byte header followed by one 44-byte
//! record per stage node.
//!
//! Every cross-reference in a record is positional: image and audio slots
//! index the `ri`/`si` lists, transitions index into `li` by element offset.

use crate::padding::write_zeros;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

/// Size of the `ni` header block. The first record starts here.
pub const HEADER_LEN: u32 = 512;
/// Size of one serialized stage record.
pub const NODE_LEN: u32 = 44;

const FORMAT_VERSION: u16 = 1;

/// Button and wheel behavior flags of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFlags {
    pub wheel: bool,
    pub ok: bool,
    pub home: bool,
    pub pause: bool,
    pub autoplay: bool,
}

impl Default for ControlFlags {
    fn default() -> Self {
        ControlFlags {
            wheel: true,
            ok: true,
            home: true,
            pause: false,
            autoplay: false,
        }
    }
}

/// A resolved OK or Home transition: where the option run starts in `li`,
/// how many options it holds, and which one is pre-selected.
#[derive(Debug, Clone, Copy)]
pub struct TransitionEntry {
    pub list_position: i32,
    pub option_count: i32,
    pub option_index: i32,
}

/// One stage node with every cross-reference resolved to a position.
#[derive(Debug, Clone)]
pub struct StageEntry {
    /// Position in the image asset list, -1 for stages without an image.
    pub image_position: i32,
    /// Position in the audio slot list. Every stage has one.
    pub audio_position: i32,
    pub ok_transition: Option<TransitionEntry>,
    pub home_transition: Option<TransitionEntry>,
    pub controls: ControlFlags,
}

fn write_transition<S: Write>(
    to: &mut S,
    transition: Option<&TransitionEntry>,
) -> io::Result<()> {
    match transition {
        Some(t) => {
            to.write_i32::<LittleEndian>(t.list_position)?;
            to.write_i32::<LittleEndian>(t.option_count)?;
            to.write_i32::<LittleEndian>(t.option_index)?;
        }
        None => {
            for _ in 0..3 {
                to.write_i32::<LittleEndian>(-1)?;
            }
        }
    }
    Ok(())
}

/// Write the node index of a pack.
///
/// `pack_version` is the story's own version counter, not the fixed format
/// version; `image_count` and `audio_count` are the lengths of the
/// positional asset lists.
pub fn write_node_index<S: Write>(
    to: &mut S,
    pack_version: i16,
    entries: &[StageEntry],
    image_count: u32,
    audio_count: u32,
) -> io::Result<()> {
    to.write_u16::<LittleEndian>(FORMAT_VERSION)?;
    to.write_i16::<LittleEndian>(pack_version)?;
    to.write_i32::<LittleEndian>(HEADER_LEN as i32)?;
    to.write_i32::<LittleEndian>(NODE_LEN as i32)?;
    to.write_i32::<LittleEndian>(entries.len() as i32)?;
    to.write_i32::<LittleEndian>(image_count as i32)?;
    to.write_i32::<LittleEndian>(audio_count as i32)?;
    to.write_i8(1)?; // factory flag
    write_zeros(to, u64::from(HEADER_LEN) - 25)?;

    for entry in entries {
        to.write_i32::<LittleEndian>(entry.image_position)?;
        to.write_i32::<LittleEndian>(entry.audio_position)?;
        write_transition(to, entry.ok_transition.as_ref())?;
        write_transition(to, entry.home_transition.as_ref())?;
        let controls = &entry.controls;
        for flag in [
            controls.wheel,
            controls.ok,
            controls.home,
            controls.pause,
            controls.autoplay,
        ] {
            to.write_i16::<LittleEndian>(flag as i16)?;
        }
        to.write_i16::<LittleEndian>(0)?; // record padding
    }
    Ok(())
}
