//! Transcript persistence
//!
//! Writes the accumulated final transcript under the transcripts
//! directory, one file per session keyed by the server-assigned id.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Directory name for saved transcripts, relative to the working directory
const TRANSCRIPTS_DIR: &str = "transcripts";

/// File extension for saved transcripts
const TRANSCRIPT_EXT: &str = "txt";

/// Default transcript directory
pub(crate) fn transcripts_dir() -> PathBuf {
    PathBuf::from(TRANSCRIPTS_DIR)
}

/// Write the final transcript for a session
///
/// A missing session id means the session never opened; nothing is
/// written and `NoSession` is returned so the caller can report the
/// skip. Otherwise the directory is created if absent and the lines are
/// written newline-joined to `<dir>/<session_id>.txt`, overwriting any
/// prior content.
pub(crate) fn persist(
    dir: &Path,
    session_id: Option<&str>,
    lines: &[String],
) -> Result<PathBuf, StorageError> {
    let session_id = session_id.ok_or(StorageError::NoSession)?;

    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| StorageError::CreateDirectory {
            path: dir.to_path_buf(),
            source: e,
        })?;
        info!("Created transcripts directory: {:?}", dir);
    }

    let filepath = dir.join(format!("{}.{}", session_id, TRANSCRIPT_EXT));

    let mut file = fs::File::create(&filepath).map_err(|e| StorageError::CreateFile {
        path: filepath.clone(),
        source: e,
    })?;

    file.write_all(lines.join("\n").as_bytes())
        .map_err(|e| StorageError::WriteFile {
            path: filepath.clone(),
            source: e,
        })?;

    file.flush().map_err(|e| StorageError::WriteFile {
        path: filepath.clone(),
        source: e,
    })?;

    info!("Saved transcript to: {:?}", filepath);
    Ok(filepath)
}

/// Storage errors with contextual information
#[derive(Debug, thiserror::Error)]
pub(crate) enum StorageError {
    #[error("No session id assigned - transcript not saved")]
    NoSession,

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create file {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_session_id_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("transcripts");

        let result = persist(&target, None, &lines(&["lost"]));

        assert!(matches!(result, Err(StorageError::NoSession)));
        assert!(!target.exists());
    }

    #[test]
    fn no_session_id_with_empty_buffer_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("transcripts");

        let result = persist(&target, None, &[]);

        assert!(matches!(result, Err(StorageError::NoSession)));
        assert!(!target.exists());
    }

    #[test]
    fn round_trips_lines_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let contents = lines(&["hello world", "second utterance", "third"]);

        let path = persist(dir.path(), Some("abc123"), &contents).unwrap();

        assert_eq!(path, dir.path().join("abc123.txt"));
        let written = fs::read_to_string(&path).unwrap();
        let read_back: Vec<String> = written.split('\n').map(String::from).collect();
        assert_eq!(read_back, contents);
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("transcripts");

        let path = persist(&target, Some("s1"), &lines(&["text"])).unwrap();

        assert!(target.is_dir());
        assert!(path.starts_with(&target));
    }

    #[test]
    fn overwrites_prior_content() {
        let dir = tempfile::tempdir().unwrap();

        persist(dir.path(), Some("s1"), &lines(&["old", "content"])).unwrap();
        let path = persist(dir.path(), Some("s1"), &lines(&["new"])).unwrap();

        assert_eq!(fs::read_to_string(path).unwrap(), "new");
    }

    #[test]
    fn empty_buffer_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();

        let path = persist(dir.path(), Some("s1"), &[]).unwrap();

        assert_eq!(fs::read_to_string(path).unwrap(), "");
    }
}
