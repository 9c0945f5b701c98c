use core::fmt;

use log::LevelFilter;
use spin::Once;

/// Where formatted log lines go: the console driver in the kernel,
/// `eprintln!` in host tools.
pub type ConsoleSink = fn(fmt::Arguments<'_>);

/// Select Graphic Rendition escape sequences for the level tag.
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
// White is actually kinda grey. Bright white is white.
const WHITE: &str = "\x1b[37m";
const CLEAR_FORMAT: &str = "\x1b[0m";

struct Logger {
    sink: Once<ConsoleSink>,
}

static LOGGER: Logger = Logger { sink: Once::new() };

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(sink) = self.sink.get() else {
            return;
        };
        let color = match record.level() {
            log::Level::Error => RED,
            log::Level::Warn => YELLOW,
            log::Level::Info => GREEN,
            log::Level::Debug | log::Level::Trace => WHITE,
        };
        sink(format_args!(
            "{color}[{}]{CLEAR_FORMAT} {}",
            record.level(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

/// Installs the logger. Only the first call succeeds.
pub fn init(sink: ConsoleSink) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER)?;
    LOGGER.sink.call_once(|| sink);
    log::set_max_level(LevelFilter::Info);
    log::debug!("Logging initialized");
    Ok(())
}

pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
