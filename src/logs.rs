use log::LevelFilter;
use log4rs::{
    Config,
    append::{
        console::{ConsoleAppender, Target},
        rolling_file::{
            RollingFileAppender,
            policy::compound::{
                CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
            },
        },
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};
use thiserror::Error;

const LOG_SIZE_LIMIT: u64 = 10 * 1024 * 1024; // 10 MB

const LOG_FILE_COUNT: u32 = 3;

const LOG_PATTERN: &str = "{l} - {m}{n}";

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("LOG_ARCHIVE_PATTERN must be set when LOG_FILE_PATH is set")]
    MissingArchivePattern,

    #[error("invalid log archive pattern: {0}")]
    Roller(String),

    #[error("log file setup failed: {0}")]
    File(#[from] std::io::Error),

    #[error("log config rejected: {0}")]
    Config(#[from] log4rs::config::runtime::ConfigErrors),

    #[error("logger already installed: {0}")]
    Install(#[from] log::SetLoggerError),
}

/// Installs the process logger.
///
/// Lines go to stdout. `LOG_FILE_PATH` adds a size-rolled file next to it.
/// `verbose` lowers the threshold to `debug`, which lets the SMTP client's
/// own command trace through.
///
/// The threshold is fixed here, once, from `MAIL_DEBUG` as the process
/// starts. Changing `MAIL_DEBUG` later still toggles the per-invocation
/// `info` lines, since those are decided on every call, but lettre's
/// `debug` trace stays hidden or shown until a restart.
pub fn init_logger(verbose: bool) -> Result<(), LoggerError> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let stdout = ConsoleAppender::builder()
        .target(Target::Stdout)
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();

    let mut config =
        Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));
    let mut root = Root::builder().appender("stdout");

    if let Ok(file_path) = std::env::var("LOG_FILE_PATH") {
        let archive_pattern =
            std::env::var("LOG_ARCHIVE_PATTERN").map_err(|_| LoggerError::MissingArchivePattern)?;

        let trigger = SizeTrigger::new(LOG_SIZE_LIMIT);
        let roller = FixedWindowRoller::builder()
            .build(&archive_pattern, LOG_FILE_COUNT)
            .map_err(|e| LoggerError::Roller(e.to_string()))?;
        let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

        let logfile = RollingFileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build(file_path, Box::new(policy))?;

        config = config.appender(Appender::builder().build("logfile", Box::new(logfile)));
        root = root.appender("logfile");
    }

    let config = config.build(root.build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}
