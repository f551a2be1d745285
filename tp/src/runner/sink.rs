//! Line sinks for runner output

use std::fs::{self, File};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::{LineSink, OutputSink};
use crate::events::EventEmitter;

/// Drops every line
pub struct NullLineSink;

impl LineSink for NullLineSink {
    fn line(&self, _line: &str) {}
}

/// Keeps lines in memory
#[derive(Default)]
pub struct MemoryLineSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryLineSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl LineSink for MemoryLineSink {
    fn line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

/// Path of the output log for one attempt
pub fn attempt_log_path(plan_dir: &Path, task_id: &str, attempt: u32) -> PathBuf {
    plan_dir.join("logs").join(format!("{}-attempt-{}.log", task_id, attempt))
}

/// Forwards lines as `AttemptOutput` events and appends them to the attempt log
struct AttemptLineSink {
    emitter: EventEmitter,
    task_id: String,
    attempt: u32,
    is_stderr: bool,
    log: Option<Arc<Mutex<LineWriter<File>>>>,
}

impl LineSink for AttemptLineSink {
    fn line(&self, line: &str) {
        self.emitter
            .attempt_output(&self.task_id, self.attempt, line, self.is_stderr);

        let Some(log) = &self.log else {
            return;
        };
        if let Ok(mut file) = log.lock() {
            let prefix = if self.is_stderr { "[stderr] " } else { "" };
            if let Err(e) = writeln!(file, "{}{}", prefix, line) {
                warn!(task_id = %self.task_id, error = %e, "Failed to write attempt log");
            }
        }
    }
}

/// Output sink for one attempt: events plus `{plan_dir}/logs/{task}-attempt-{n}.log`
///
/// If the log file cannot be opened the attempt still runs and output only
/// goes to events.
pub fn attempt_output_sink(emitter: &EventEmitter, plan_dir: &Path, task_id: &str, attempt: u32) -> OutputSink {
    let path = attempt_log_path(plan_dir, task_id, attempt);
    debug!(?path, "attempt_output_sink: called");

    let log = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|_| File::create(&path))
        .map(|file| Arc::new(Mutex::new(LineWriter::new(file))));
    let log = match log {
        Ok(log) => Some(log),
        Err(e) => {
            warn!(?path, error = %e, "Failed to open attempt log, continuing without it");
            None
        }
    };

    let make = |is_stderr| -> Arc<dyn LineSink> {
        Arc::new(AttemptLineSink {
            emitter: emitter.clone(),
            task_id: task_id.to_string(),
            attempt,
            is_stderr,
            log: log.clone(),
        })
    };
    OutputSink::new(make(false), make(true))
}
