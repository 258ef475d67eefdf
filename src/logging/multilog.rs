use log::{LevelFilter, Log, Metadata, Record};

/// Hands every record to each logger that accepts it.
pub struct MultiLogger {
    loggers: Vec<Box<dyn Log>>,
    max_level: LevelFilter,
}

impl Default for MultiLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiLogger {
    pub fn new() -> Self {
        Self {
            loggers: Vec::new(),
            max_level: LevelFilter::Trace,
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn Log>) -> Self {
        self.loggers.push(logger);
        self
    }

    /// Global ceiling; records above it are never even built.
    pub fn with_max_level(mut self, max_level: LevelFilter) -> Self {
        self.max_level = max_level;
        self
    }

    pub fn init(self) -> Result<(), log::SetLoggerError> {
        log::set_max_level(self.max_level);
        log::set_boxed_logger(Box::new(self))
    }
}

impl Log for MultiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level && self.loggers.iter().any(|l| l.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        if record.level() > self.max_level {
            return;
        }
        for logger in self.loggers.iter().filter(|l| l.enabled(record.metadata())) {
            logger.log(record);
        }
    }

    fn flush(&self) {
        self.loggers.iter().for_each(|l| l.flush());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use log::Level;

    /// Keeps the messages of the records it accepts.
    struct RecordingLogger {
        level: LevelFilter,
        messages: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingLogger {
        fn boxed(level: LevelFilter) -> (Box<dyn Log>, Arc<Mutex<Vec<String>>>) {
            let messages = Arc::new(Mutex::new(Vec::new()));
            let logger = Box::new(RecordingLogger {
                level,
                messages: messages.clone(),
            });
            (logger, messages)
        }
    }

    impl Log for RecordingLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= self.level
        }

        fn log(&self, record: &Record) {
            self.messages
                .lock()
                .unwrap()
                .push(record.args().to_string());
        }

        fn flush(&self) {}
    }

    fn emit(logger: &MultiLogger, level: Level, message: &str) {
        logger.log(
            &Record::builder()
                .args(format_args!("{message}"))
                .level(level)
                .build(),
        );
    }

    #[test]
    fn test_enabled() {
        let (quiet, _) = RecordingLogger::boxed(LevelFilter::Off);
        let multi_logger = MultiLogger::new().with_logger(quiet);
        assert!(!multi_logger.enabled(&Metadata::builder().level(Level::Error).build()));

        let (quiet, _) = RecordingLogger::boxed(LevelFilter::Off);
        let (verbose, _) = RecordingLogger::boxed(LevelFilter::Trace);
        let multi_logger = MultiLogger::new()
            .with_logger(quiet)
            .with_logger(verbose)
            .with_max_level(LevelFilter::Info);
        assert!(multi_logger.enabled(&Metadata::builder().level(Level::Info).build()));
        assert!(!multi_logger.enabled(&Metadata::builder().level(Level::Debug).build()));
    }

    #[test]
    fn test_fan_out() {
        let (console, console_messages) = RecordingLogger::boxed(LevelFilter::Info);
        let (file, file_messages) = RecordingLogger::boxed(LevelFilter::Trace);
        let multi_logger = MultiLogger::new()
            .with_logger(console)
            .with_logger(file)
            .with_max_level(LevelFilter::Debug);

        emit(&multi_logger, Level::Info, "create-pool pool:demo: done");
        emit(&multi_logger, Level::Debug, "Provisioning dataset 'demo/home'");
        emit(&multi_logger, Level::Trace, "Executing 'zfs list'");

        assert_eq!(
            *console_messages.lock().unwrap(),
            vec!["create-pool pool:demo: done"]
        );
        assert_eq!(
            *file_messages.lock().unwrap(),
            vec![
                "create-pool pool:demo: done",
                "Provisioning dataset 'demo/home'"
            ]
        );
    }
}
