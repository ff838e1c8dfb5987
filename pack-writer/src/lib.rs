//! Emitters for the native pack format of the story-player device family:
//! encrypted 4-bit RLE bitmaps, the binary navigation indices, the boot
//! block, and the pack metadata file.
//!
//! The firmware parses all of these at fixed offsets and rejects any
//! deviation, so every writer here is byte-exact and tested against the
//! layout laws (sizes, offsets, record lengths) rather than against a
//! lenient reader.

pub mod asset_index;
pub mod bmp;
pub mod boot_block;
pub mod cipher;
pub mod list_index;
pub mod metadata;
pub mod node_index;
mod padding;

pub use cipher::PackCipher;

/// The canonical silent MP3 written into the audio slot of stages that
/// declare no audio. The firmware needs a parseable frame at every slot;
/// this exact 108-byte sequence (MPEG sync word, a Xing header at offset 36
/// with its TOC head, zero padding) is a device contract and is never
/// regenerated by an encoder.
pub const BLANK_MP3: [u8; 108] = [
    0xFF, 0xFB, 0x90, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x58, 0x69, 0x6E, 0x67, // "Xing"
    0x00, 0x00, 0x00, 0x0F, 0x00, 0x00, 0x00, 0x01, //
    0x00, 0x00, 0x00, 0x68, 0x00, 0x10, 0x20, 0x30, //
    0x40, 0x50, 0x60, 0x70, 0x80, 0x90, 0xA0, 0xB0, //
    0xC0, 0xD0, 0xE0, 0xFF, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00,
];
