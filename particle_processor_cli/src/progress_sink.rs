use indicatif::MultiProgress;
use spdlog::formatter::Formatter;
use spdlog::sink::{Sink, StdStreamSink};
use spdlog::{ErrorHandler, LevelFilter, Record, Result};
use std::sync::Arc;

/// Terminal sink that hides the progress bars while a record is written, then redraws them.
pub struct ProgressSink {
    inner: Arc<StdStreamSink>,
    progress: MultiProgress,
}

impl ProgressSink {
    pub fn new(inner: Arc<StdStreamSink>, progress: MultiProgress) -> Self {
        Self { inner, progress }
    }
}

impl Sink for ProgressSink {
    fn log(&self, record: &Record) -> Result<()> {
        self.progress.suspend(|| self.inner.log(record))
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    fn level_filter(&self) -> LevelFilter {
        self.inner.level_filter()
    }

    fn set_level_filter(&self, level_filter: LevelFilter) {
        self.inner.set_level_filter(level_filter)
    }

    fn set_formatter(&self, formatter: Box<dyn Formatter>) {
        self.inner.set_formatter(formatter)
    }

    fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        self.inner.set_error_handler(handler)
    }
}
