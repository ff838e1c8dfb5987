//! The external-transcoder seam.
//!
//! Every audio asset becomes a mono 44.1 kHz 64 kbps CBR MP3 with ID3v1,
//! ID3v2 and container metadata stripped. The re-encoding itself is done by
//! an external ffmpeg-compatible binary behind the [`Transcoder`] trait, so
//! tests and deployments can substitute their own.

use pack_writer::BLANK_MP3;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Wall-clock budget for one external transcode.
const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("transcoder exited with {status}: {stderr}")]
    Failed {
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("transcoder ran past its time limit")]
    TimedOut,

    #[error("IO error driving the transcoder")]
    Io(#[from] std::io::Error),
}

/// External audio transcoder seam.
pub trait Transcoder {
    fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError>;
}

/// Invokes an ffmpeg-compatible binary with the exact flag shape the device
/// format needs.
pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl FfmpegTranscoder {
    /// Find `ffmpeg` on `PATH`.
    pub fn locate() -> Result<Self, which::Error> {
        which::which("ffmpeg").map(|program| FfmpegTranscoder { program })
    }

    pub fn new(program: PathBuf) -> Self {
        FfmpegTranscoder { program }
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        let mut child = Command::new(&self.program)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-ar", "44100", "-ac", "1", "-b:a", "64k"])
            .args(["-map_metadata", "-1", "-id3v2_version", "0", "-write_id3v1", "0"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain both pipes off-thread so a chatty transcoder can't fill
        // them up and deadlock against the wait loop below.
        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();
        let stdout_drain = std::thread::spawn(move || drain(stdout));
        let stderr_drain = std::thread::spawn(move || drain(stderr));

        let deadline = Instant::now() + TRANSCODE_TIMEOUT;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                child.kill()?;
                child.wait()?;
                return Err(TranscodeError::TimedOut);
            }
            std::thread::sleep(Duration::from_millis(50));
        };
        let _ = stdout_drain.join();
        let stderr = stderr_drain.join().unwrap_or_default();
        if status.success() {
            debug!(input = ?input, "transcoded");
            Ok(())
        } else {
            Err(TranscodeError::Failed { status, stderr })
        }
    }
}

fn drain(mut pipe: impl Read) -> String {
    let mut buf = String::new();
    let _ = pipe.read_to_string(&mut buf);
    buf
}

/// Cache of transcoded MP3 bytes keyed by source asset name, for packs that
/// reference the same asset from several stages.
#[derive(Default)]
pub struct TranscodeCache {
    converted: HashMap<String, Vec<u8>>,
}

impl TranscodeCache {
    /// Fetch or produce the device MP3 for `name`.
    ///
    /// A failed transcode substitutes the blank sentinel (and logs the
    /// substitution) rather than sinking the whole pack over one bad asset.
    pub fn convert(
        &mut self,
        transcoder: &dyn Transcoder,
        name: &str,
        source: &Path,
        scratch: &Path,
    ) -> &[u8] {
        match self.converted.entry(name.to_owned()) {
            Entry::Occupied(hit) => hit.into_mut(),
            Entry::Vacant(slot) => {
                let bytes = match run_one(transcoder, source, scratch) {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        warn!(asset = name, %error, "transcode failed, substituting silence");
                        BLANK_MP3.to_vec()
                    }
                };
                slot.insert(bytes)
            }
        }
    }
}

fn run_one(
    transcoder: &dyn Transcoder,
    source: &Path,
    scratch: &Path,
) -> Result<Vec<u8>, TranscodeError> {
    let output = scratch.join("transcode.mp3");
    transcoder.transcode(source, &output)?;
    let bytes = std::fs::read(&output)?;
    std::fs::remove_file(&output)?;
    Ok(bytes)
}
