//! Converting portable Studio story packs into the native pack format a
//! family of story-player devices reads off its SD card.
//!
//! The encoder is a single-shot pipeline: validate the input archive, build
//! the positional views of the story graph, encode every image and audio
//! asset, serialize the binary indices, and package the result as a deflate
//! ZIP. Nothing is retried, no state survives between calls, and a failed
//! encode leaves only the input behind: intermediate files live in a
//! scratch directory that is dropped on every exit path, and the output
//! archive is renamed into place only once complete.

pub mod archive;
pub mod artwork;
pub mod audio;
pub mod story;

use crate::archive::StudioArchive;
use crate::audio::{FfmpegTranscoder, TranscodeCache, Transcoder};
use crate::story::{AudioSource, PackIndex, Story};
use pack_writer::cipher::{CipherError, PackCipher};
use pack_writer::metadata::PackMetadata;
use pack_writer::{BLANK_MP3, asset_index, boot_block, list_index, metadata, node_index};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Which device generation the pack is encrypted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackVersion {
    #[default]
    V2,
    V3,
}

/// Call-time options for one encode.
#[derive(Debug, Default)]
pub struct EncodeOptions {
    pub version: PackVersion,
    /// AES key for V3 packs: 16, 24 or 32 bytes read out of the target
    /// device.
    pub aes_key: Option<Vec<u8>>,
    /// AES IV for V3 packs: 16 bytes.
    pub aes_iv: Option<Vec<u8>>,
    /// Where to write the native ZIP; `<input stem>-native.zip` next to the
    /// input when unset.
    pub output: Option<PathBuf>,
}

/// Why an encode was aborted.
///
/// Input problems (`InvalidInput`, `InvalidGraph`, `MissingAssets`, `Image`)
/// are fixed by changing the pack; configuration problems
/// (`MissingKeyMaterial`, `BadKeyMaterial`, `Environment`) by changing the
/// call or the host; the rest are operational and safe to retry whole,
/// since nothing has been left behind.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("not a valid Studio pack: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    InvalidGraph(#[from] story::GraphError),

    /// Referenced assets missing from the archive; carries the first five
    /// names.
    #[error("{total} missing assets, including {names:?}")]
    MissingAssets { names: Vec<String>, total: usize },

    #[error("image asset {name:?} couldn't be converted")]
    Image {
        name: String,
        #[source]
        source: artwork::ArtworkError,
    },

    #[error("V3 packs need an AES key and IV from the target device")]
    MissingKeyMaterial,

    #[error(transparent)]
    BadKeyMaterial(#[from] CipherError),

    /// The external transcoder isn't installed where we can find it.
    #[error("transcoder lookup failed")]
    Environment(#[from] which::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("archive error")]
    Archive(#[from] zip::result::ZipError),
}

/// Encode one Studio pack, locating the stock ffmpeg transcoder on `PATH`.
///
/// `progress` is called on this thread with `(fraction, message)` pairs at
/// each pipeline boundary; keep it fast.
pub fn encode_pack(
    input: &Path,
    options: &EncodeOptions,
    mut progress: impl FnMut(f32, &str),
) -> Result<PathBuf, EncodeError> {
    // an already-native input never needs the transcoder
    progress(0.0, "checking pack format");
    if StudioArchive::open(input)?.is_native_pack() {
        info!("input is already a native pack");
        progress(1.0, "already native");
        return Ok(input.to_path_buf());
    }
    let transcoder = FfmpegTranscoder::locate()?;
    encode_pack_with(input, options, &transcoder, progress)
}

/// Encode one Studio pack with a caller-supplied transcoder.
#[instrument(skip(options, transcoder, progress), err)]
pub fn encode_pack_with(
    input: &Path,
    options: &EncodeOptions,
    transcoder: &dyn Transcoder,
    mut progress: impl FnMut(f32, &str),
) -> Result<PathBuf, EncodeError> {
    progress(0.0, "checking pack format");
    let mut studio = StudioArchive::open(input)?;
    if studio.is_native_pack() {
        info!("input is already a native pack");
        progress(1.0, "already native");
        return Ok(input.to_path_buf());
    }

    progress(0.05, "validating Studio pack");
    if !studio.has_story() {
        return Err(EncodeError::InvalidInput(
            "no story.json at the archive root".into(),
        ));
    }
    let story = Story::from_json(&studio.read_story()?)
        .map_err(|error| EncodeError::InvalidInput(format!("story.json: {error}")))?;
    story.validate()?;
    check_assets(&story, &studio)?;
    let cipher = pack_cipher(options)?;

    progress(0.1, "story graph loaded");
    let scratch = tempfile::tempdir()?;
    let input_dir = scratch.path().join("input");
    let output_dir = scratch.path().join("output");
    fs::create_dir_all(&input_dir)?;
    studio.extract_to(&input_dir)?;

    progress(0.15, "indexing assets");
    let index = PackIndex::build(&story);
    let pack_uuid = pack_uuid(&story);
    let reference = pack_reference(&pack_uuid);
    let content_dir = output_dir.join(".content").join(&reference);
    let rf_dir = content_dir.join("rf").join("000");
    let sf_dir = content_dir.join("sf").join("000");
    fs::create_dir_all(&rf_dir)?;
    fs::create_dir_all(&sf_dir)?;
    debug!(
        %pack_uuid,
        reference,
        stages = story.stage_nodes.len(),
        images = index.images.len(),
        "building content tree"
    );

    progress(0.2, "converting images");
    for asset in &index.images {
        let source = resolve_in(&input_dir, &studio, &asset.name)?;
        let bmp = artwork::encode_image(&source).map_err(|source| EncodeError::Image {
            name: asset.name.clone(),
            source,
        })?;
        fs::write(
            rf_dir.join(asset_file_name(asset.position)),
            cipher.encrypt_first_block(&bmp),
        )?;
        progress(
            0.2 + 0.2 * (asset.position + 1) as f32 / index.images.len().max(1) as f32,
            &format!("image {}/{}", asset.position + 1, index.images.len()),
        );
    }

    progress(0.4, "converting audio");
    let mut cache = TranscodeCache::default();
    for slot in &index.audio {
        let mp3: &[u8] = match &slot.source {
            AudioSource::Blank => &BLANK_MP3,
            AudioSource::Asset(name) => {
                let source = resolve_in(&input_dir, &studio, name)?;
                cache.convert(transcoder, name, &source, scratch.path())
            }
        };
        fs::write(
            sf_dir.join(asset_file_name(slot.position)),
            cipher.encrypt_first_block(mp3),
        )?;
        progress(
            0.4 + 0.35 * (slot.position + 1) as f32 / index.audio.len().max(1) as f32,
            &format!("audio {}/{}", slot.position + 1, index.audio.len()),
        );
    }

    progress(0.75, "writing indices");
    let entries = index.stage_entries(&story);
    let mut ni = Vec::new();
    node_index::write_node_index(
        &mut ni,
        story.version,
        &entries,
        index.images.len() as u32,
        index.audio.len() as u32,
    )?;
    let mut li = Vec::new();
    list_index::write_list_index(&mut li, &index.list_positions(&story))?;
    let mut ri = Vec::new();
    asset_index::write_asset_index(&mut ri, index.images.len())?;
    let mut si = Vec::new();
    asset_index::write_asset_index(&mut si, index.audio.len())?;

    let ri_encrypted = cipher.encrypt_first_block(&ri);
    fs::write(content_dir.join("ni"), &ni)?;
    fs::write(content_dir.join("li"), cipher.encrypt_first_block(&li))?;
    fs::write(content_dir.join("ri"), &ri_encrypted)?;
    fs::write(content_dir.join("si"), cipher.encrypt_first_block(&si))?;

    let mut bt = Vec::new();
    match options.version {
        PackVersion::V2 => {
            boot_block::write_boot_block_v2(&mut bt, &ri_encrypted, pack_uuid.as_bytes())?
        }
        PackVersion::V3 => boot_block::write_boot_block_v3(&mut bt)?,
    }
    fs::write(content_dir.join("bt"), &bt)?;

    progress(0.85, "writing metadata");
    let mut md = File::create(content_dir.join("md"))?;
    metadata::write_metadata(
        &mut md,
        &PackMetadata {
            title: story.title.clone().unwrap_or_default(),
            description: story.description.clone().unwrap_or_default(),
            uuid: pack_uuid.to_string(),
            reference: reference.clone(),
        },
    )?;

    progress(0.9, "packaging");
    let target = options
        .output
        .clone()
        .unwrap_or_else(|| default_output(input));
    archive::write_native_zip(&output_dir, &target)?;

    progress(1.0, "done");
    info!(output = ?target, "native pack written");
    Ok(target)
}

fn check_assets(story: &Story, studio: &StudioArchive) -> Result<(), EncodeError> {
    let missing: Vec<&str> = story
        .referenced_assets()
        .into_iter()
        .filter(|name| studio.resolve_asset(name).is_none())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(EncodeError::MissingAssets {
        total: missing.len(),
        names: missing
            .iter()
            .take(5)
            .map(|name| (*name).to_owned())
            .collect(),
    })
}

fn pack_cipher(options: &EncodeOptions) -> Result<PackCipher, EncodeError> {
    match options.version {
        PackVersion::V2 => Ok(PackCipher::v2()),
        PackVersion::V3 => {
            let (key, iv) = options
                .aes_key
                .as_deref()
                .zip(options.aes_iv.as_deref())
                .ok_or(EncodeError::MissingKeyMaterial)?;
            Ok(PackCipher::v3(key, iv)?)
        }
    }
}

/// The pack identity: the story's declared uuid, else the entrypoint
/// stage's, else a fresh one.
fn pack_uuid(story: &Story) -> Uuid {
    story
        .uuid
        .or_else(|| story.entrypoint().map(|node| node.uuid))
        .unwrap_or_else(Uuid::new_v4)
}

/// The on-device directory name: uppercase last 8 hex digits of the uuid.
fn pack_reference(uuid: &Uuid) -> String {
    let hex = format!("{:X}", uuid.simple());
    hex[hex.len() - 8..].to_owned()
}

fn asset_file_name(position: u32) -> String {
    format!("{position:08}")
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pack".to_owned());
    input.with_file_name(format!("{stem}-native.zip"))
}

fn resolve_in(
    input_dir: &Path,
    studio: &StudioArchive,
    name: &str,
) -> Result<PathBuf, EncodeError> {
    // validation already proved the name resolves
    let entry = studio
        .resolve_asset(name)
        .ok_or_else(|| EncodeError::MissingAssets {
            names: vec![name.to_owned()],
            total: 1,
        })?;
    Ok(input_dir.join(entry))
}

#[cfg(test)]
mod tests;
