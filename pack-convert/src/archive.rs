//! Reading Studio archives and packaging native-pack trees.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Name of the story graph at the root of a Studio archive.
pub const STORY_FILE: &str = "story.json";

const CONTENT_DIR: &str = ".content";

/// An opened Studio archive with its entry list cached for asset
/// resolution.
pub struct StudioArchive {
    archive: ZipArchive<File>,
    names: Vec<String>,
}

impl StudioArchive {
    pub fn open(path: &Path) -> Result<Self, ZipError> {
        let archive = ZipArchive::new(File::open(path)?)?;
        let names = archive.file_names().map(str::to_owned).collect();
        Ok(StudioArchive { archive, names })
    }

    pub fn has_story(&self) -> bool {
        self.names.iter().any(|name| name == STORY_FILE)
    }

    pub fn read_story(&mut self) -> Result<Vec<u8>, ZipError> {
        let mut entry = self.archive.by_name(STORY_FILE)?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Resolve an asset name to its archive entry: tried at the root first,
    /// then under `assets/`.
    pub fn resolve_asset(&self, name: &str) -> Option<String> {
        if self.names.iter().any(|entry| entry == name) {
            return Some(name.to_owned());
        }
        let nested = format!("assets/{name}");
        self.names
            .iter()
            .any(|entry| *entry == nested)
            .then_some(nested)
    }

    /// Unpack the whole archive into `dir` (the per-encode scratch area).
    pub fn extract_to(&mut self, dir: &Path) -> Result<(), ZipError> {
        self.archive.extract(dir)
    }

    /// Whether the archive already holds a native pack: every
    /// `.content/<REF>/` tree has the four indices plus image and sound
    /// directories.
    pub fn is_native_pack(&self) -> bool {
        let references: HashSet<&str> = self
            .names
            .iter()
            .filter_map(|name| {
                let rest = name.strip_prefix(CONTENT_DIR)?.strip_prefix('/')?;
                let (reference, _) = rest.split_once('/')?;
                (!reference.is_empty()).then_some(reference)
            })
            .collect();
        if references.is_empty() {
            return false;
        }
        references.iter().all(|reference| {
            let prefix = format!("{CONTENT_DIR}/{reference}/");
            let entries: Vec<&str> = self
                .names
                .iter()
                .filter_map(|name| name.strip_prefix(prefix.as_str()))
                .collect();
            ["ni", "li", "ri", "si"]
                .iter()
                .all(|index| entries.contains(index))
                && entries.iter().any(|entry| entry.starts_with("rf/"))
                && entries.iter().any(|entry| entry.starts_with("sf/"))
        })
    }
}

/// Write the content tree under `root` into a deflate ZIP at `target`.
///
/// The archive is assembled next to the target and renamed into place only
/// once complete, so a failed encode never leaves a half-written pack
/// behind.
pub fn write_native_zip(root: &Path, target: &Path) -> Result<(), ZipError> {
    let staging = target.with_extension("zip.partial");
    let result = write_tree(root, &staging).and_then(|entries| {
        debug!(entries, target = ?target, "archive complete");
        std::fs::rename(&staging, target).map_err(ZipError::from)
    });
    if result.is_err() {
        let _ = std::fs::remove_file(&staging);
    }
    result
}

fn write_tree(root: &Path, staging: &Path) -> Result<usize, ZipError> {
    let mut writer = ZipWriter::new(File::create(staging)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut written = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<_, io::Error>>()?;
        entries.sort();
        for path in entries {
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let name = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            writer.start_file(name, options)?;
            io::copy(&mut File::open(&path)?, &mut writer)?;
            written += 1;
        }
    }
    writer.finish()?;
    Ok(written)
}
