//! Applies command file directives to a running job.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::command::{Command, CommandFile};

use super::control::JobControl;

/// Re-reads the command file and applies what changed.
///
/// A directive is applied when the file content differs from the previous
/// read, so leaving `COMMAND=PAUSE` in place does not re-pause a job that was
/// resumed another way.
#[derive(Debug)]
pub struct CommandWatcher {
    path: PathBuf,
    control: JobControl,
    last_content: Option<String>,
    warned: bool,
}

impl CommandWatcher {
    /// Watch `path` on behalf of `control`.
    pub fn new(path: impl Into<PathBuf>, control: JobControl) -> Self {
        Self {
            path: path.into(),
            control,
            last_content: None,
            warned: false,
        }
    }

    /// Path being watched.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file once and apply any new directives.
    ///
    /// Returns the directives that were applied, or `None` if the file was
    /// unchanged or unreadable.
    pub fn poll(&mut self) -> Option<CommandFile> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                self.warn_unreadable(&e);
                return None;
            }
        };
        self.warned = false;

        if self.last_content.as_deref() == Some(content.as_str()) {
            return None;
        }
        let parsed = CommandFile::parse(&content);
        self.last_content = Some(content);

        for problem in &parsed.invalid {
            warn!(path = %self.path.display(), "Ignoring command file entry: {problem}");
        }

        if let Some(count) = parsed.thread_count {
            if count != self.control.state().thread_count() {
                info!(thread_count = count, "Command file changed thread count");
                self.control.set_thread_count(count);
            }
        }
        match parsed.command {
            Some(Command::Pause) => self.control.pause(),
            Some(Command::Resume) => self.control.resume(),
            Some(Command::Stop) => {
                self.control.stop();
            }
            None => {}
        }
        Some(parsed)
    }

    fn warn_unreadable(&mut self, err: &io::Error) {
        if !self.warned {
            warn!(path = %self.path.display(), error = %err, "Command file is not readable");
            self.warned = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{JobPhase, JobState};
    use crate::util::clock::system_clock;
    use std::io::Write;
    use std::sync::Arc;

    fn control() -> JobControl {
        let control = JobControl::new(Arc::new(JobState::new(2)), system_clock());
        control.state().transition(JobPhase::Running);
        control
    }

    fn rewrite(file: &tempfile::NamedTempFile, text: &str) {
        let mut handle = std::fs::File::create(file.path()).unwrap();
        handle.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn applies_only_changed_content() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let control = control();
        let mut watcher = CommandWatcher::new(file.path(), control.clone());

        rewrite(&file, "COMMAND=PAUSE\n");
        assert!(watcher.poll().is_some());
        assert!(control.state().is_paused());

        control.resume();
        assert!(watcher.poll().is_none());
        assert!(!control.state().is_paused());

        rewrite(&file, "COMMAND=PAUSE\nTHREAD-COUNT=5\n");
        let applied = watcher.poll().unwrap();
        assert_eq!(applied.thread_count, Some(5));
        assert!(control.state().is_paused());
        assert_eq!(control.state().thread_count(), 5);
    }

    #[test]
    fn stop_command_requests_stop() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let control = control();
        let mut watcher = CommandWatcher::new(file.path(), control.clone());

        rewrite(&file, "COMMAND=STOP");
        watcher.poll();
        assert!(control.state().stop_requested());
    }

    #[test]
    fn missing_file_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let control = control();
        let mut watcher = CommandWatcher::new(dir.path().join("absent.properties"), control.clone());

        assert!(watcher.poll().is_none());
        assert!(watcher.poll().is_none());
        assert!(!control.state().stop_requested());
    }
}
