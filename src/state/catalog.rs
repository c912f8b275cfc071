//! Recordings directory
//!
//! Recordings are plain files; the directory listing is the catalog. There
//! is no separate metadata store: titles come from file names and durations
//! from the files themselves.

use crate::audio::codec::{self, RecordingFormat};
use crate::error::{CatalogError, CodecError};
use crate::models::Recording;
use chrono::{DateTime, Local, Utc};
use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const FILE_PREFIX: &str = "Recording-";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Directory-backed list of recordings
#[derive(Debug, Clone)]
pub struct RecordingCatalog {
    dir: PathBuf,
    format: RecordingFormat,
}

impl RecordingCatalog {
    pub fn new(dir: impl AsRef<Path>, format: RecordingFormat) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            format,
        }
    }

    /// `$XDG_DATA_HOME/voicenote/recordings`
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voicenote")
            .join("recordings")
    }

    /// Ensure the recordings directory exists
    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// Path for a new recording named after the current local time
    pub fn new_recording_path(&self) -> PathBuf {
        self.recording_path_at(Local::now())
    }

    fn recording_path_at(&self, time: DateTime<Local>) -> PathBuf {
        let stem = format!("{}{}", FILE_PREFIX, time.format(TIMESTAMP_FORMAT));
        let ext = self.format.extension();
        let path = self.dir.join(format!("{}.{}", stem, ext));
        if !path.exists() {
            return path;
        }
        let uuid = uuid::Uuid::new_v4().to_string()[..8].to_string();
        self.dir.join(format!("{}_{}.{}", stem, uuid, ext))
    }

    /// List all recordings, newest first.
    ///
    /// A missing directory lists as empty.
    pub fn list(&self) -> Result<Vec<Recording>, CatalogError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut recordings: Vec<Recording> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_recording_file(path))
            .map(|path| self.describe(path))
            .collect();

        recordings.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        debug!("Listed {} recordings in {:?}", recordings.len(), self.dir);
        Ok(recordings)
    }

    fn describe(&self, path: PathBuf) -> Recording {
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let created_at = fs::metadata(&path)
            .and_then(|m| m.created().or_else(|_| m.modified()))
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let duration_seconds = match Self::read_duration(&path) {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Cannot read duration of {:?}: {}", path, e);
                0.0
            }
        };

        Recording {
            id,
            title: title_of(&path),
            path,
            created_at,
            duration_seconds,
        }
    }

    /// Duration of a recording in seconds
    pub fn read_duration(path: &Path) -> Result<f64, CodecError> {
        codec::read_duration(path)
    }

    /// Delete a recording file
    pub fn delete(&self, path: &Path) -> Result<(), CatalogError> {
        match fs::remove_file(path) {
            Ok(()) => {
                info!("Deleted recording {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CatalogError::NoSuchRecording(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rename a recording to carry `title`, keeping its extension.
    ///
    /// Returns the new path.
    pub fn rename(&self, path: &Path, title: &str) -> Result<PathBuf, CatalogError> {
        let title = sanitize_title(title).ok_or(CatalogError::InvalidTitle)?;
        if !path.is_file() {
            return Err(CatalogError::NoSuchRecording(path.display().to_string()));
        }

        let file_name = match path.extension() {
            Some(ext) => format!("{}{}.{}", FILE_PREFIX, title, ext.to_string_lossy()),
            None => format!("{}{}", FILE_PREFIX, title),
        };
        let target = path.with_file_name(file_name);
        if target == path {
            return Ok(target);
        }
        if target.exists() {
            return Err(CatalogError::AlreadyExists(target));
        }

        fs::rename(path, &target)?;
        info!("Renamed {:?} to {:?}", path, target);
        Ok(target)
    }

    /// Find a recording by path, file name or title
    pub fn resolve(&self, name: &str) -> Result<PathBuf, CatalogError> {
        let direct = Path::new(name);
        if direct.is_absolute() || name.contains('/') {
            if direct.is_file() {
                return Ok(direct.to_path_buf());
            }
            return Err(CatalogError::NoSuchRecording(name.to_string()));
        }

        let in_dir = self.dir.join(name);
        if in_dir.is_file() {
            return Ok(in_dir);
        }

        self.list()?
            .into_iter()
            .find(|r| r.title == name)
            .map(|r| r.path)
            .ok_or_else(|| CatalogError::NoSuchRecording(name.to_string()))
    }
}

fn is_recording_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    let audio = path
        .extension()
        .and_then(|ext| RecordingFormat::from_extension(&ext.to_string_lossy()))
        .is_some();
    !hidden && audio && path.is_file()
}

/// Display title: the file stem without the `Recording-` prefix
fn title_of(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.strip_prefix(FILE_PREFIX) {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => stem,
    }
}

fn sanitize_title(title: &str) -> Option<String> {
    let title = title.trim().replace('/', "-");
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn catalog(dir: &Path) -> RecordingCatalog {
        RecordingCatalog::new(dir, RecordingFormat::Wav)
    }

    fn write_wav(path: &Path, seconds: f64) {
        let mut sink = codec::create_sink(RecordingFormat::Wav, path, 8_000, 0).unwrap();
        sink.write(&vec![0.1; (seconds * 8_000.0) as usize]).unwrap();
        sink.finalize().unwrap();
    }

    #[test]
    fn test_new_recording_path_format() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let time = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        let path = catalog.recording_path_at(time);
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "Recording-2024-03-09_14-05-07.wav"
        );

        fs::write(&path, b"").unwrap();
        let second = catalog.recording_path_at(time);
        assert_ne!(second, path);
        let name = second.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Recording-2024-03-09_14-05-07_"));
        assert!(name.ends_with(".wav"));
    }

    #[test]
    fn test_list_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());

        write_wav(&dir.path().join("Recording-2024-01-01_09-00-00.wav"), 1.0);
        write_wav(&dir.path().join("Recording-2024-06-01_09-00-00.WAV"), 2.0);
        fs::write(dir.path().join("notes.txt"), b"not audio").unwrap();
        fs::write(dir.path().join(".hidden.wav"), b"").unwrap();
        fs::write(dir.path().join("broken.wav"), b"RIFF").unwrap();

        let listed = catalog.list().unwrap();
        let titles: Vec<_> = listed.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(listed.len(), 3);
        assert!(titles.contains(&"2024-01-01_09-00-00"));
        assert!(titles.contains(&"broken"));
        assert!(!titles.contains(&".hidden"));

        let june = listed
            .iter()
            .position(|r| r.title == "2024-06-01_09-00-00")
            .unwrap();
        let january = listed
            .iter()
            .position(|r| r.title == "2024-01-01_09-00-00")
            .unwrap();
        assert!(june < january);
        assert!((listed[june].duration_seconds - 2.0).abs() < 1e-6);

        let broken = listed.iter().find(|r| r.title == "broken").unwrap();
        assert_eq!(broken.duration_seconds, 0.0);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(&dir.path().join("not-yet"));
        assert!(catalog.list().unwrap().is_empty());
    }

    #[test]
    fn test_rename_sanitizes_and_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let path = dir.path().join("Recording-2024-01-01_09-00-00.ogg");
        fs::write(&path, b"OggS").unwrap();

        let renamed = catalog.rename(&path, "  Standup a/b  ").unwrap();
        assert_eq!(
            renamed.file_name().unwrap().to_string_lossy(),
            "Recording-Standup a-b.ogg"
        );
        assert!(!path.exists());
        assert!(renamed.exists());
        assert_eq!(title_of(&renamed), "Standup a-b");

        // Same title again is a no-op.
        assert_eq!(catalog.rename(&renamed, "Standup a/b").unwrap(), renamed);
    }

    #[test]
    fn test_rename_rejects_empty_and_existing() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let first = dir.path().join("Recording-one.wav");
        let second = dir.path().join("Recording-two.wav");
        fs::write(&first, b"").unwrap();
        fs::write(&second, b"").unwrap();

        assert!(matches!(
            catalog.rename(&first, "   "),
            Err(CatalogError::InvalidTitle)
        ));
        assert!(matches!(
            catalog.rename(&first, "two"),
            Err(CatalogError::AlreadyExists(_))
        ));
        assert!(first.exists());
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let path = dir.path().join("Recording-x.wav");
        fs::write(&path, b"").unwrap();

        catalog.delete(&path).unwrap();
        assert!(!path.exists());
        assert!(matches!(
            catalog.delete(&path),
            Err(CatalogError::NoSuchRecording(_))
        ));
    }

    #[test]
    fn test_resolve_by_name_title_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());
        let path = dir.path().join("Recording-Groceries.wav");
        write_wav(&path, 0.1);

        assert_eq!(catalog.resolve("Recording-Groceries.wav").unwrap(), path);
        assert_eq!(catalog.resolve("Groceries").unwrap(), path);
        assert_eq!(catalog.resolve(&path.to_string_lossy()).unwrap(), path);
        assert!(matches!(
            catalog.resolve("Nothing"),
            Err(CatalogError::NoSuchRecording(_))
        ));
    }
}
