//! Session storage
//!
//! One pretty-printed JSON file per (phase, name) pair, named
//! `{phase}-{name}.json`, written atomically. Scans (`list`, `latest`) skip
//! files that fail to read or parse; loading a named session does not.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::atomic::write_atomic;
use crate::domain::{Phase, Session, SessionStatus, is_valid_session_name, session_file_name};

/// Errors from session storage
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No {phase} session named '{name}'")]
    NotFound { phase: Phase, name: String },

    #[error("Session name '{name}' needs at least one letter or digit")]
    InvalidName { name: String },

    #[error("Failed to parse session file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize session for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Session I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SessionError {
    fn check_name(name: &str) -> Result<(), Self> {
        if is_valid_session_name(name) {
            Ok(())
        } else {
            Err(Self::InvalidName { name: name.to_string() })
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Directory of session files
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(?dir, "SessionStore::new: called");
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a (phase, name) pair
    pub fn path_for(&self, phase: Phase, name: &str) -> PathBuf {
        self.dir.join(session_file_name(phase, name))
    }

    /// Persist a session, bumping its `updated_at`
    pub fn save(&self, session: &mut Session) -> Result<PathBuf, SessionError> {
        SessionError::check_name(&session.name)?;
        session.updated_at = Utc::now();
        let path = self.path_for(session.phase, &session.name);
        debug!(?path, status = %session.status, "SessionStore::save: called");

        let json = serde_json::to_string_pretty(session).map_err(|source| SessionError::Serialize {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, json.as_bytes()).map_err(|e| SessionError::io(&path, e))?;
        Ok(path)
    }

    /// Load a specific session; a missing or malformed file is an error
    pub fn load(&self, phase: Phase, name: &str) -> Result<Session, SessionError> {
        SessionError::check_name(name)?;
        let path = self.path_for(phase, name);
        debug!(?path, "SessionStore::load: called");
        match read_session(&path) {
            Err(SessionError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Err(SessionError::NotFound {
                    phase,
                    name: name.to_string(),
                })
            }
            other => other,
        }
    }

    /// Every readable session, most recently updated first
    pub fn list(&self) -> Result<Vec<Session>, SessionError> {
        let mut sessions = self.scan()?;
        // Equal timestamps: later file names first, same winner as load_by_phase
        sessions.reverse();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Most recently updated session of a phase
    ///
    /// Files are visited in name order and the last of equally recent
    /// sessions wins, so ties resolve the same way every time.
    pub fn load_by_phase(&self, phase: Phase) -> Result<Option<Session>, SessionError> {
        debug!(%phase, "SessionStore::load_by_phase: called");
        Ok(self
            .scan()?
            .into_iter()
            .filter(|s| s.phase == phase)
            .max_by_key(|s| s.updated_at))
    }

    /// Most recently updated in-progress session of a phase
    pub fn latest_in_progress(&self, phase: Phase) -> Result<Option<Session>, SessionError> {
        debug!(%phase, "SessionStore::latest_in_progress: called");
        Ok(self
            .scan()?
            .into_iter()
            .filter(|s| s.phase == phase && s.status == SessionStatus::InProgress)
            .max_by_key(|s| s.updated_at))
    }

    /// Remove a session file; returns whether one existed
    pub fn delete(&self, phase: Phase, name: &str) -> Result<bool, SessionError> {
        let path = self.path_for(phase, name);
        debug!(?path, "SessionStore::delete: called");
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(?path, "Session deleted");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SessionError::io(&path, e)),
        }
    }

    /// Readable sessions in file-name order
    fn scan(&self) -> Result<Vec<Session>, SessionError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SessionError::io(&self.dir, e)),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json") && path.is_file())
            .collect();
        paths.sort();

        let mut sessions = Vec::with_capacity(paths.len());
        for path in paths {
            match read_session(&path) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(error = %e, "SessionStore: skipping unreadable session file"),
            }
        }
        debug!(count = sessions.len(), "SessionStore::scan: loaded sessions");
        Ok(sessions)
    }
}

fn read_session(path: &Path) -> Result<Session, SessionError> {
    let content = fs::read_to_string(path).map_err(|e| SessionError::io(path, e))?;
    serde_json::from_str(&content).map_err(|source| SessionError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_writes_pretty_json_at_deterministic_path() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());
        let mut session = Session::new(Phase::Prd, "user-auth");

        let path = store.save(&mut session).unwrap();
        assert_eq!(path, temp.path().join("prd-user-auth.json"));

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\n  \"sessionId\""));
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());
        let err = store.load(Phase::Design, "nope").unwrap_err();
        assert!(matches!(err, SessionError::NotFound { .. }), "got {:?}", err);
    }

    #[test]
    fn test_load_malformed_is_parse_error() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());
        fs::write(store.path_for(Phase::Prd, "bad"), "{").unwrap();
        let err = store.load(Phase::Prd, "bad").unwrap_err();
        assert!(matches!(err, SessionError::Parse { .. }), "got {:?}", err);
    }

    #[test]
    fn test_names_without_letters_or_digits_are_rejected() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());

        let mut session = Session::new(Phase::Prd, "!!!");
        let err = store.save(&mut session).unwrap_err();
        assert!(matches!(err, SessionError::InvalidName { .. }), "got {:?}", err);
        assert!(!store.path_for(Phase::Prd, "!!!").exists());

        let err = store.load(Phase::Prd, "  ").unwrap_err();
        assert!(matches!(err, SessionError::InvalidName { .. }), "got {:?}", err);
    }

    #[test]
    fn test_serialize_error_names_the_failure() {
        let source = serde_json::from_str::<u8>("x").unwrap_err();
        let err = SessionError::Serialize {
            path: PathBuf::from("prd-auth.json"),
            source,
        };
        assert!(err.to_string().starts_with("Failed to serialize session for prd-auth.json"));
    }

    #[test]
    fn test_latest_in_progress_ignores_finished() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());

        let mut open = Session::new(Phase::Prd, "open");
        store.save(&mut open).unwrap();

        let mut done = Session::new(Phase::Prd, "done");
        done.status = SessionStatus::Completed;
        store.save(&mut done).unwrap();

        let latest = store.latest_in_progress(Phase::Prd).unwrap().unwrap();
        assert_eq!(latest.name, "open");
        assert_eq!(store.load_by_phase(Phase::Prd).unwrap().unwrap().name, "done");
        assert!(store.latest_in_progress(Phase::Design).unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());
        let mut session = Session::new(Phase::PlanCreate, "x");
        store.save(&mut session).unwrap();

        assert!(store.delete(Phase::PlanCreate, "x").unwrap());
        assert!(!store.delete(Phase::PlanCreate, "x").unwrap());
    }

    #[test]
    fn test_missing_dir_scans_empty() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path().join("absent"));
        assert!(store.list().unwrap().is_empty());
        assert!(store.load_by_phase(Phase::Prd).unwrap().is_none());
    }
}
