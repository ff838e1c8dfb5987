use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pack_convert::{EncodeOptions, PackVersion, encode_pack};
use rayon::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Pathnames of Studio pack ZIPs to convert to the native device
    /// format. Inputs already in the native format are left untouched.
    paths: Vec<PathBuf>,

    /// Where to write the native ZIP. Only valid with a single input;
    /// by default each pack is written to `<input>-native.zip`.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Device generation to encrypt for.
    #[arg(long, value_enum, default_value_t = VersionArg::V2)]
    pack_version: VersionArg,

    /// AES key for V3 packs, hex-encoded (16, 24 or 32 bytes).
    #[arg(long)]
    aes_key: Option<String>,

    /// AES IV for V3 packs, hex-encoded (16 bytes).
    #[arg(long)]
    aes_iv: Option<String>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum VersionArg {
    V2,
    V3,
}

fn main() -> anyhow::Result<()> {
    // Setup logging:
    let indicatif_layer = tracing_indicatif::IndicatifLayer::new();
    let filter = EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();
    let writer = indicatif_layer.get_stderr_writer();
    let app_log_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(writer);
    tracing_subscriber::registry()
        .with(filter)
        .with(app_log_layer)
        .with(indicatif_layer)
        .init();

    let Args {
        paths,
        output,
        pack_version,
        aes_key,
        aes_iv,
    } = Args::parse();
    if output.is_some() && paths.len() > 1 {
        anyhow::bail!("--output only makes sense with a single input pack");
    }
    let aes_key = aes_key
        .as_deref()
        .map(hex::decode)
        .transpose()
        .context("decoding --aes-key")?;
    let aes_iv = aes_iv
        .as_deref()
        .map(hex::decode)
        .transpose()
        .context("decoding --aes-iv")?;
    let version = match pack_version {
        VersionArg::V2 => PackVersion::V2,
        VersionArg::V3 => PackVersion::V3,
    };

    paths.into_par_iter().try_for_each(|path| {
        let options = EncodeOptions {
            version,
            aes_key: aes_key.clone(),
            aes_iv: aes_iv.clone(),
            output: output.clone(),
        };
        let converted = encode_pack(&path, &options, |fraction, message| {
            let percent = (fraction * 100.0) as u32;
            info!(percent, "{}", message);
        })
        .with_context(|| format!("when converting {:?}", path))?;
        info!(input = ?path, output = ?converted, "converted");
        Ok(())
    })
}
