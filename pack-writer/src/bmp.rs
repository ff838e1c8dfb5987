//! Writing the 4-bit grayscale RLE bitmap variant the player renders.
//!
//! The firmware expects one exact layout: a 118-byte preamble (file header,
//! BITMAPINFOHEADER, 16-entry gray palette) followed by an RLE4 pixel stream
//! with the bottom row first.

use byteorder::{LittleEndian, WriteBytesExt};
use int_conv::Truncate;
use std::io::{self, Write};

/// Width of the player screen; every pack image is fitted to it.
pub const IMAGE_WIDTH: u32 = 320;
/// Height of the player screen.
pub const IMAGE_HEIGHT: u32 = 240;

const FILE_HEADER_LEN: u32 = 14;
const DIB_HEADER_LEN: u32 = 40;
const PALETTE_LEN: u32 = 16 * 4;
/// Where the pixel stream starts: file header + DIB header + palette.
const PIXEL_DATA_OFFSET: u32 = FILE_HEADER_LEN + DIB_HEADER_LEN + PALETTE_LEN;

const BI_RLE4: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum WriteBmpError {
    #[error("expected {expected} luma bytes for a 320x240 bitmap, got {got}")]
    PixelCount { expected: usize, got: usize },

    #[error("IO error writing BMP")]
    Io(#[from] io::Error),
}

/// Encode one row of 8-bit luma pixels as RLE4 runs.
///
/// Each pixel quantizes to its high nibble; runs cap at 255 and emit as
/// `(length, color | color << 4)` pairs.
fn encode_row(stream: &mut Vec<u8>, row: &[u8]) {
    let mut run_len = 0u8;
    let mut run_color = 0u8;
    for (x, px) in row.iter().enumerate() {
        let q = px >> 4;
        if x == 0 {
            run_len = 1;
            run_color = q;
            continue;
        }
        if q == run_color && run_len < 255 {
            run_len += 1;
        } else {
            stream.push(run_len);
            stream.push(run_color << 4 | run_color);
            run_len = 1;
            run_color = q;
        }
    }
    stream.push(run_len);
    stream.push(run_color << 4 | run_color);
}

/// Write a 320x240 4-bit grayscale RLE4 BMP.
///
/// `pixels` holds one luma byte per pixel with rows already in bottom-up
/// order (BMP stores the bottom row first; the caller flips).
pub fn write_grayscale_bmp<S: Write>(to: &mut S, pixels: &[u8]) -> Result<(), WriteBmpError> {
    let expected = (IMAGE_WIDTH * IMAGE_HEIGHT) as usize;
    if pixels.len() != expected {
        return Err(WriteBmpError::PixelCount {
            expected,
            got: pixels.len(),
        });
    }

    let mut stream = Vec::with_capacity(expected / 8);
    let mut rows = pixels.chunks_exact(IMAGE_WIDTH as usize).peekable();
    while let Some(row) = rows.next() {
        encode_row(&mut stream, row);
        // end-of-line between rows
        if rows.peek().is_some() {
            stream.extend_from_slice(&[0x00, 0x00]);
        }
    }
    // end-of-bitmap
    stream.extend_from_slice(&[0x00, 0x01]);

    let data_size = stream.len() as u32;
    let file_size = PIXEL_DATA_OFFSET + data_size;

    to.write_all(b"BM")?;
    to.write_u32::<LittleEndian>(file_size)?;
    to.write_u32::<LittleEndian>(0)?; // reserved
    to.write_u32::<LittleEndian>(PIXEL_DATA_OFFSET)?;

    to.write_u32::<LittleEndian>(DIB_HEADER_LEN)?;
    to.write_i32::<LittleEndian>(IMAGE_WIDTH as i32)?;
    to.write_i32::<LittleEndian>(IMAGE_HEIGHT as i32)?;
    to.write_u16::<LittleEndian>(1)?; // color planes
    to.write_u16::<LittleEndian>(4)?; // bits per pixel
    to.write_u32::<LittleEndian>(BI_RLE4)?;
    to.write_u32::<LittleEndian>(data_size)?;
    to.write_u32::<LittleEndian>(0)?; // horizontal resolution
    to.write_u32::<LittleEndian>(0)?; // vertical resolution
    to.write_u32::<LittleEndian>(0)?; // palette colors (0 = full 2^bpp set)
    to.write_u32::<LittleEndian>(0)?; // important colors

    for i in 0..16u32 {
        let gray: u8 = (255 * i / 16).truncate();
        to.write_all(&[gray, gray, gray, 0])?;
    }

    to.write_all(&stream)?;
    Ok(())
}
