//! Event Logger - persists events to JSONL files
//!
//! The EventLogger subscribes to the EventBus and writes every event to a
//! per-source JSONL file (`{runs_dir}/{plan-id}/events.jsonl`) for history
//! and replay. When `runs_dir` is the plans directory, each plan's run log
//! sits next to its `plan.json`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::Context;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{Event, EventLogEntry};

/// File name of the per-source event log
pub const EVENTS_FILE: &str = "events.jsonl";

/// Event logger that writes events to JSONL files
pub struct EventLogger {
    /// Base directory; one subdirectory per event source
    runs_dir: PathBuf,
    /// Open file writers per source
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    /// Create a new event logger
    pub fn new(runs_dir: impl AsRef<Path>) -> Self {
        let runs_dir = runs_dir.as_ref().to_path_buf();
        debug!(?runs_dir, "EventLogger::new: creating logger");
        Self {
            runs_dir,
            writers: HashMap::new(),
        }
    }

    /// Write an event to its source's log file
    pub fn write_event(&mut self, event: &Event) -> eyre::Result<()> {
        let source = event.source().to_string();
        debug!(%source, event_type = event.event_type(), "EventLogger::write_event");

        if !self.writers.contains_key(&source) {
            let dir = self.runs_dir.join(&source);
            fs::create_dir_all(&dir).with_context(|| format!("Failed to create log dir {}", dir.display()))?;

            let log_path = dir.join(EVENTS_FILE);
            debug!(?log_path, "EventLogger: opening log file");
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .with_context(|| format!("Failed to open {}", log_path.display()))?;
            self.writers.insert(source.clone(), BufWriter::new(file));
        }

        let Some(writer) = self.writers.get_mut(&source) else {
            return Ok(());
        };

        let entry = EventLogEntry::new(event.clone());
        let json = serde_json::to_string(&entry)?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Close the writer for a source (e.g., when a run ends)
    pub fn close(&mut self, source: &str) {
        debug!(%source, "EventLogger::close");
        if let Some(mut writer) = self.writers.remove(source) {
            let _ = writer.flush();
        }
    }

    /// Run the logger, consuming events from the bus until it closes
    ///
    /// This is meant to be spawned as a background task.
    pub async fn run(mut self, mut rx: broadcast::Receiver<Event>) {
        debug!("EventLogger::run: starting event logger");

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let source = event.source().to_string();

                    if let Err(e) = self.write_event(&event) {
                        error!(%source, error = %e, "EventLogger: failed to write event");
                    }

                    if event.ends_run() {
                        self.close(&source);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (source, mut writer) in self.writers.drain() {
            debug!(%source, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read events back from a source's log file
///
/// Unparseable lines are skipped with a warning.
pub fn read_events(runs_dir: impl AsRef<Path>, source: &str) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = runs_dir.as_ref().join(source).join(EVENTS_FILE);
    debug!(?log_path, "read_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path).with_context(|| format!("Failed to read {}", log_path.display()))?;
    let mut entries = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_events: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_events: loaded entries");
    Ok(entries)
}

/// Spawn the event logger as a background task
///
/// Subscribes before returning so no event emitted afterwards is missed.
pub fn spawn_event_logger(event_bus: &Arc<EventBus>, runs_dir: impl AsRef<Path>) -> tokio::task::JoinHandle<()> {
    let logger = EventLogger::new(runs_dir);
    let rx = event_bus.subscribe();
    tokio::spawn(async move {
        logger.run(rx).await;
    })
}
