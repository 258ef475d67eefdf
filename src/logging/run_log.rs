use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Instant,
};

use log::{LevelFilter, Log, Metadata, Record};

use osutils::files;

use super::LogEntry;

/// JSON-lines log of a single command invocation, kept for post-mortem
/// inspection. Each run truncates the previous log of the same command.
pub struct RunLog {
    path: PathBuf,
    file: Option<Mutex<File>>,
    command: String,
    started: Instant,
    max_level: LevelFilter,
}

impl RunLog {
    /// Opens `{dir}/zroot-{command}.log`. Failing to open it disables the
    /// log instead of failing the command.
    pub fn new(dir: impl AsRef<Path>, command: &str) -> Self {
        let path = dir.as_ref().join(format!("zroot-{command}.log"));
        let file = match files::create_file(&path) {
            Ok(f) => Some(Mutex::new(f)),
            Err(err) => {
                eprintln!(
                    "Logging setup error: failed to create run log '{}': {:?}",
                    path.display(),
                    err
                );
                None
            }
        };

        Self {
            path,
            file,
            command: command.to_owned(),
            started: Instant::now(),
            max_level: LevelFilter::Trace,
        }
    }

    pub fn with_max_level(self, max_level: LevelFilter) -> Self {
        Self { max_level, ..self }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_logger(self) -> Box<dyn Log> {
        Box::new(self)
    }

    fn write_entry(&self, record: &Record) -> Result<(), Box<dyn std::error::Error + '_>> {
        let Some(file) = self.file.as_ref() else {
            return Ok(());
        };

        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let mut line = serde_json::to_string(&LogEntry::new(&self.command, elapsed_ms, record))?;
        line.push('\n');

        let mut file = file.lock()?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl Log for RunLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.file.is_some() && metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        // A lost line must never fail the command.
        let _ = self.write_entry(record);
    }

    fn flush(&self) {
        if let Some(file) = self.file.as_ref() {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use log::Level;
    use tempfile::tempdir;

    use crate::logging::Level as EntryLevel;

    #[test]
    fn test_path() {
        let dir = tempdir().unwrap();
        let log = RunLog::new(dir.path().join("logs"), "provision");
        assert_eq!(log.path(), dir.path().join("logs/zroot-provision.log"));
        assert!(log.path().exists(), "Missing directories are created");
    }

    #[test]
    fn test_filter() {
        let dir = tempdir().unwrap();
        let logger = RunLog::new(dir.path(), "status")
            .with_max_level(LevelFilter::Info)
            .into_logger();

        assert!(logger.enabled(&Metadata::builder().level(Level::Info).build()));
        assert!(!logger.enabled(&Metadata::builder().level(Level::Debug).build()));
    }

    #[test]
    fn test_disabled() {
        // A file where the directory should be.
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("logs");
        fs::write(&blocker, "").unwrap();

        let log = RunLog::new(&blocker, "teardown");
        assert!(log.file.is_none());
        let logger = log.into_logger();
        assert!(!logger.enabled(&Metadata::builder().level(Level::Error).build()));
        logger.log(&Record::builder().args(format_args!("dropped")).build());
    }

    #[test]
    fn test_run_log() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("zroot-teardown.log"), "previous run\n").unwrap();

        let log = RunLog::new(dir.path(), "teardown");
        let path = log.path().to_owned();
        let logger = log.into_logger();

        for (level, message) in [
            (Level::Info, "unmount /mnt/zroot: done"),
            (Level::Warn, "Ignoring teardown failure"),
        ] {
            logger.log(
                &Record::builder()
                    .args(format_args!("{message}"))
                    .level(level)
                    .target("zroot::engine::teardown")
                    .file(Some(file!()))
                    .line(Some(7))
                    .build(),
            );
        }
        logger.flush();

        let content = fs::read_to_string(path).unwrap();
        let entries: Vec<LogEntry> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(entries.len(), 2, "The previous run is truncated");
        assert_eq!(entries[0].command, "teardown");
        assert_eq!(entries[0].level, EntryLevel::Info);
        assert_eq!(entries[0].message, "unmount /mnt/zroot: done");
        assert_eq!(entries[1].level, EntryLevel::Warn);
        assert_eq!(entries[1].target, "zroot::engine::teardown");
        assert_eq!(entries[1].file, file!());
        assert!(entries[0].elapsed_ms <= entries[1].elapsed_ms);
    }
}
