use serde::{Deserialize, Serialize};

pub mod multilog;
pub mod run_log;

/// One line of a run log.
#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    /// Command the record was emitted by.
    pub command: String,
    /// Milliseconds since the run log was opened.
    pub elapsed_ms: u64,
    pub level: Level,
    pub message: String,
    pub target: String,
    pub module: String,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl From<log::Level> for Level {
    fn from(value: log::Level) -> Self {
        match value {
            log::Level::Error => Level::Error,
            log::Level::Warn => Level::Warn,
            log::Level::Info => Level::Info,
            log::Level::Debug => Level::Debug,
            log::Level::Trace => Level::Trace,
        }
    }
}

impl LogEntry {
    fn new(command: &str, elapsed_ms: u64, record: &log::Record) -> Self {
        Self {
            command: command.to_owned(),
            elapsed_ms,
            level: record.level().into(),
            message: record.args().to_string(),
            target: record.target().to_string(),
            module: record.module_path().unwrap_or_default().to_string(),
            file: record.file().unwrap_or_default().to_string(),
            line: record.line().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry() {
        let entry = LogEntry::new(
            "teardown",
            1500,
            &log::Record::builder()
                .args(format_args!("unmount /mnt/zroot/boot: done"))
                .level(log::Level::Info)
                .target("zroot::engine::teardown")
                .module_path(Some("zroot::engine::teardown"))
                .file(Some("src/engine/teardown.rs"))
                .line(Some(188))
                .build(),
        );

        assert_eq!(entry.command, "teardown");
        assert_eq!(entry.elapsed_ms, 1500);
        assert_eq!(entry.level, Level::Info);
        assert_eq!(entry.message, "unmount /mnt/zroot/boot: done");
        assert_eq!(entry.target, "zroot::engine::teardown");
        assert_eq!(entry.module, "zroot::engine::teardown");
        assert_eq!(entry.file, "src/engine/teardown.rs");
        assert_eq!(entry.line, 188);

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["level"], "info");
    }
}
