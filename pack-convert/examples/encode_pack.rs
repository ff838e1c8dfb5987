use pack_convert::{EncodeOptions, encode_pack};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

fn main() {
    // Setup logging:
    let filter = EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .init();

    let output = encode_pack(
        "test-pack.zip".as_ref(),
        &EncodeOptions::default(),
        |fraction, message| eprintln!("{:3.0}% {}", fraction * 100.0, message),
    )
    .expect("converting test-pack.zip");
    println!("wrote {}", output.display());
}
