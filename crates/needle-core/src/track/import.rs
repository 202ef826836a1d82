//! Track import
//!
//! Decoding audio files is left to an external program, which keeps codecs
//! and their failure modes out of this process. The program is invoked as
//!
//! ```text
//! <command> [extra args...] <path> <sample rate>
//! ```
//!
//! and must write raw signed 16-bit little-endian interleaved stereo PCM at
//! that rate to stdout, then exit successfully.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use thiserror::Error;

use super::Track;
use crate::config::ImporterConfig;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Failed to start importer {command:?}: {source}")]
    Spawn {
        command: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read importer output: {0}")]
    Io(#[from] io::Error),

    #[error("Importer exited with {0}")]
    Exit(ExitStatus),

    #[error("Importer produced no audio for {0:?}")]
    Empty(PathBuf),
}

pub type ImportResult<T> = Result<T, ImportError>;

/// Produces a decoded track for a path at the device sample rate
///
/// Called on worker threads, never on the audio thread.
pub trait Importer: Send + Sync {
    fn import(&self, path: &Path, rate: u32) -> ImportResult<Track>;
}

impl<F> Importer for F
where
    F: Fn(&Path, u32) -> ImportResult<Track> + Send + Sync,
{
    fn import(&self, path: &Path, rate: u32) -> ImportResult<Track> {
        self(path, rate)
    }
}

/// Runs an external decoder program
#[derive(Debug, Clone)]
pub struct ScriptImporter {
    command: PathBuf,
    args: Vec<String>,
}

impl ScriptImporter {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn from_config(config: &ImporterConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.extra_args.clone(),
        }
    }

    /// Arguments placed before the path and rate
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn command(&self) -> &Path {
        &self.command
    }
}

impl Importer for ScriptImporter {
    fn import(&self, path: &Path, rate: u32) -> ImportResult<Track> {
        log::debug!("Importing {:?} via {:?} at {}Hz", path, self.command, rate);

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg(path)
            .arg(rate.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| ImportError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let bytes = collect_output(&mut child, stdout)?;

        let pcm: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        if pcm.len() < 2 {
            return Err(ImportError::Empty(path.to_path_buf()));
        }

        let track = Track::from_i16_interleaved(path.display().to_string(), rate, &pcm);
        log::info!(
            "Imported {:?}: {} frames ({:.1}s)",
            path,
            track.len(),
            track.duration()
        );
        Ok(track)
    }
}

/// Read everything the program writes, then reap it
///
/// A failed read kills the program so it never outlives the import.
fn collect_output(child: &mut Child, stdout: Option<impl Read>) -> ImportResult<Vec<u8>> {
    let mut bytes = Vec::new();
    if let Some(mut stdout) = stdout {
        if let Err(e) = stdout.read_to_end(&mut bytes) {
            log::warn!("Importer output failed ({}); killing pid {}", e, child.id());
            let _ = child.kill();
            let _ = child.wait();
            return Err(e.into());
        }
    }

    let status = child.wait()?;
    if !status.success() {
        return Err(ImportError::Exit(status));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    #[test]
    fn test_closure_importer() {
        let importer = |path: &Path, rate: u32| -> ImportResult<Track> {
            Ok(Track::new(path.display().to_string(), rate, vec![StereoSample::silence(); 8]))
        };
        let track = importer.import(Path::new("a.flac"), 44100).unwrap();
        assert_eq!(track.origin(), "a.flac");
        assert_eq!(track.len(), 8);
    }

    #[test]
    fn test_missing_program() {
        let importer = ScriptImporter::new("/nonexistent/needle-import");
        let err = importer.import(Path::new("a.flac"), 44100).unwrap_err();
        assert!(matches!(err, ImportError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_reads_pcm_from_program() {
        // $1 is the path and $2 the rate; two frames of +/- half scale
        let importer = ScriptImporter::new("sh").with_args([
            "-c",
            "test \"$2\" = 44100 && printf '\\000\\100\\000\\300\\000\\300\\000\\100'",
            "needle-import",
        ]);
        let track = importer.import(Path::new("song.mp3"), 44100).unwrap();
        assert_eq!(track.len(), 2);
        assert_eq!(track.samples()[0], StereoSample::new(0.5, -0.5));
        assert_eq!(track.samples()[1], StereoSample::new(-0.5, 0.5));
        assert_eq!(track.origin(), "song.mp3");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_program() {
        let importer = ScriptImporter::new("sh").with_args(["-c", "exit 3", "needle-import"]);
        let err = importer.import(Path::new("song.mp3"), 44100).unwrap_err();
        assert!(matches!(err, ImportError::Exit(status) if status.code() == Some(3)));
    }

    #[cfg(unix)]
    #[test]
    fn test_empty_output() {
        let importer = ScriptImporter::new("sh").with_args(["-c", "true", "needle-import"]);
        let err = importer.import(Path::new("song.mp3"), 44100).unwrap_err();
        assert!(matches!(err, ImportError::Empty(_)));
    }

    struct BrokenPipe;

    impl Read for BrokenPipe {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_read_failure_reaps_program() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let err = collect_output(&mut child, Some(BrokenPipe)).unwrap_err();
        assert!(matches!(err, ImportError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));

        // Killed and waited on, so the exit status is already known
        let status = child.try_wait().unwrap().expect("program should be reaped");
        assert!(!status.success());
    }
}
