//! Log directory files: `metadata.json`, `state.json` and segment names.

use crate::config::Options;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the metadata file
pub const METADATA_FILE: &str = "metadata.json";

/// Name of the state file
pub const STATE_FILE: &str = "state.json";

/// Extension of log segment files
pub const SEGMENT_EXTENSION: &str = "seg";

/// File name of the log segment with the given index.
pub fn segment_file_name(index: usize) -> String {
    format!("{:08}.{}", index, SEGMENT_EXTENSION)
}

/// Settings fixed when the log is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Roll threshold in bytes.
    pub segment_size: u64,
    /// Offset bits of an address.
    pub segment_bit_shift: u32,
    /// Magic written into segment headers.
    pub magic: String,
    /// Creation time in milliseconds since the Unix epoch.
    pub created: u64,
}

impl Metadata {
    /// Metadata for a new log.
    pub fn new(options: &Options, created: u64) -> Self {
        Self {
            segment_size: options.segment_size,
            segment_bit_shift: options.segment_bit_shift,
            magic: options.magic.clone(),
            created,
        }
    }

    /// Overrides `options` with the persisted values, logging each mismatch.
    pub fn apply_to(&self, options: &mut Options) {
        if options.segment_size != self.segment_size {
            log::warn!(
                "Ignoring segment_size {}, log was created with {}",
                options.segment_size,
                self.segment_size
            );
            options.segment_size = self.segment_size;
        }
        if options.segment_bit_shift != self.segment_bit_shift {
            log::warn!(
                "Ignoring segment_bit_shift {}, log was created with {}",
                options.segment_bit_shift,
                self.segment_bit_shift
            );
            options.segment_bit_shift = self.segment_bit_shift;
        }
        if options.magic != self.magic {
            log::warn!("Ignoring magic {:?}, log was created with {:?}", options.magic, self.magic);
            options.magic = self.magic.clone();
        }
    }
}

/// Advisory checkpoint of the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Address of the next write when the state was saved.
    pub position: u64,
    /// Entries appended across all segments.
    pub entry_count: u64,
    /// Time of the last roll in milliseconds since the Unix epoch.
    pub last_roll_time: u64,
    /// Segment file names in address order.
    pub segments: Vec<String>,
}

/// Writes `value` as JSON, replacing `path` atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = temp_path(path);
    {
        let mut file = File::create(&tmp)?;
        serde_json::to_writer_pretty(&mut file, value)?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a JSON file, `None` if it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| Error::corrupted_log(format!("Failed to parse {:?}: {}", path, e)))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Segment files in `dir`, sorted by name.
pub fn list_segment_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == SEGMENT_EXTENSION) {
            if let Some(name) = path.file_name() {
                names.push(name.to_string_lossy().into_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_segment_file_name() {
        assert_eq!(segment_file_name(0), "00000000.seg");
        assert_eq!(segment_file_name(42), "00000042.seg");
    }

    #[test]
    fn test_state_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STATE_FILE);

        assert!(read_json::<State>(&path).unwrap().is_none());

        let state = State {
            position: 1 << 46 | 2048,
            entry_count: 17,
            last_roll_time: 1_700_000_000_000,
            segments: vec![segment_file_name(0), segment_file_name(1)],
        };
        write_json(&path, &state).unwrap();
        assert_eq!(read_json::<State>(&path).unwrap(), Some(state));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_corrupt_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(METADATA_FILE);
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(read_json::<Metadata>(&path), Err(Error::CorruptedLog(_))));
    }

    #[test]
    fn test_metadata_wins() {
        let persisted = Metadata::new(&Options::default().segment_size(1 << 20), 0);
        let mut options = Options::default().segment_size(1 << 22).magic("OTHER");
        persisted.apply_to(&mut options);

        assert_eq!(options.segment_size, 1 << 20);
        assert_eq!(options.magic, "STREAMLOG");
    }

    #[test]
    fn test_list_segment_files() {
        let dir = TempDir::new().unwrap();
        for name in ["00000001.seg", "00000000.seg", "state.json", "notes.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(list_segment_files(dir.path()).unwrap(), vec!["00000000.seg", "00000001.seg"]);
    }
}
