//! # pds-readers
//!
//! Waveform file readers for photon-detector calibration.
//!
//! This crate turns files into `WaveformSet`s:
//! - plain-text waveform dumps (`.txt`, `.dat`)
//! - JSON waveform documents (`.json`)
//!
//! The text parser is built with `nom`. Several files can be read in parallel
//! and merged into a single set with [`read_many`].

pub mod error;
pub mod json;
pub mod text;

pub use error::{ReadError, ReadResult};
pub use json::{parse_json, JsonReader};
pub use text::{parse_text, TextReader};

use pds_types::WaveformSet;
use rayon::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Produces a `WaveformSet` from a file.
pub trait WaveformReader: Send + Sync {
    fn read(&self, path: &Path) -> ReadResult<WaveformSet>;
}

/// Supported on-disk formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

impl Format {
    /// Infer the format from the file extension.
    pub fn from_path(path: &Path) -> ReadResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "txt" | "dat" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ReadError::UnsupportedExtension(ext)),
        }
    }

    pub fn reader(self) -> &'static dyn WaveformReader {
        match self {
            Self::Text => &TextReader,
            Self::Json => &JsonReader,
        }
    }
}

/// Read one file, choosing the reader from its extension.
pub fn read_waveform_set(path: &Path) -> ReadResult<WaveformSet> {
    Format::from_path(path)?.reader().read(path)
}

/// Read several files in parallel and merge them, in input order, into one set.
pub fn read_many<P>(paths: &[P]) -> ReadResult<WaveformSet>
where
    P: AsRef<Path> + Sync,
{
    let sets = paths
        .par_iter()
        .map(|p| read_waveform_set(p.as_ref()))
        .collect::<ReadResult<Vec<_>>>()?;

    let mut sets = sets.into_iter();
    let mut merged = sets.next().ok_or(ReadError::NoInputs)?;
    for set in sets {
        debug!(waveforms = set.len(), "Merging input");
        merged.merge(set)?;
    }
    info!(files = paths.len(), waveforms = merged.len(), "Inputs read");
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pds_types::TypesError;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::from_path(Path::new("a/run.TXT")).unwrap(), Format::Text);
        assert_eq!(Format::from_path(Path::new("run.json")).unwrap(), Format::Json);
        assert!(matches!(
            Format::from_path(Path::new("run.hdf5")),
            Err(ReadError::UnsupportedExtension(ext)) if ext == "hdf5"
        ));
    }

    #[test]
    fn test_read_many_merges_in_order() {
        let dir = TempDir::new().unwrap();
        let text = write(
            &dir,
            "a.txt",
            "time_step_ns = 16\n1 0 104 0 0 0 : 1 2 3\n1 1 104 0 0 0 : 4 5 6\n",
        );
        let json = write(
            &dir,
            "b.json",
            r#"[{"run": 2, "record": 0, "endpoint": 105, "channel": 1, "adcs": [7, 8, 9]}]"#,
        );

        let set = read_many(&[text, json]).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.get(2).unwrap().endpoint(), 105);
        assert_eq!(set.runs().iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_read_many_failures() {
        let dir = TempDir::new().unwrap();
        let short = write(&dir, "short.txt", "time_step_ns = 16\n1 0 104 0 0 0 : 1 2\n");
        let long = write(&dir, "long.txt", "time_step_ns = 16\n1 0 104 0 0 0 : 1 2 3\n");
        assert!(matches!(
            read_many(&[short, long]),
            Err(ReadError::Types(TypesError::IncompatibleWaveformSet { expected: 2, actual: 3 }))
        ));

        let none: [&Path; 0] = [];
        assert!(matches!(read_many(&none), Err(ReadError::NoInputs)));
        assert!(matches!(
            read_waveform_set(&dir.path().join("missing.txt")),
            Err(ReadError::Io(_))
        ));
    }
}
