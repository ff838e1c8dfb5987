//! Writing the `md` metadata file: flat YAML-style key/value lines.

use std::io::{self, Write};

/// The human-facing metadata of a pack.
#[derive(Debug, Clone)]
pub struct PackMetadata {
    pub title: String,
    pub description: String,
    /// The pack UUID, formatted however the story declared it.
    pub uuid: String,
    /// The `.content/` directory name: uppercase last 8 hex of the UUID.
    pub reference: String,
}

/// Write the metadata file. Line order is fixed; the companion app shows
/// these fields verbatim.
pub fn write_metadata<S: Write>(to: &mut S, meta: &PackMetadata) -> io::Result<()> {
    writeln!(to, "title: {}", meta.title)?;
    writeln!(to, "description: {}", meta.description)?;
    writeln!(to, "uuid: {}", meta.uuid)?;
    writeln!(to, "ref: {}", meta.reference)?;
    writeln!(to, "packType: custom")?;
    Ok(())
}
