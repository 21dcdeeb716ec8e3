// Based on https://github.com/estk/log4rs/pull/295

use anyhow::Context;
use log::LevelFilter;
use log4rs::Handle;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        rolling_file::{
            policy::compound::{
                roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
            },
            RollingFileAppender,
        },
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};

/// Log file and archive pattern for `app_name`
fn log_file_paths(app_name: &str) -> (String, String) {
    // Pattern: https://docs.rs/log4rs/*/log4rs/append/rolling_file/policy/compound/roll/fixed_window/struct.FixedWindowRollerBuilder.html#method.build
    (
        format!("log/{app_name}.log"),
        format!("log/{app_name}_{{}}.log"),
    )
}

/// Logs to stderr at `level` and to a rolling file under `log/` named after `app_name`
pub fn init_logging(level: LevelFilter, app_name: &str) -> anyhow::Result<Handle> {
    let (file_path, archive_pattern) = log_file_paths(app_name);

    // stderr logger, filtered at the CLI level below
    let stderr = ConsoleAppender::builder().target(Target::Stderr).build();

    // Rolling policy for the log file
    let trigger = SizeTrigger::new(2_097_152); // 2mb (2 * 1024 * 1024)
    let roller = FixedWindowRoller::builder()
        .build(&archive_pattern, 10) // Roll based on pattern and max 10 archive files
        .context("Failed to create FixedWindowRoller")?;
    let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

    // Log file (with rolling)
    let log_file = RollingFileAppender::builder()
        // Pattern: https://docs.rs/log4rs/*/log4rs/encode/pattern/index.html
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {l} - {m}\n",
        )))
        .build(&file_path, Box::new(policy))
        .with_context(|| format!("Failed to create log file at {file_path:?}"))?;

    // Only stderr is filtered. The root level below caps both appenders
    let config = Config::builder()
        .appender(Appender::builder().build("log_file", Box::new(log_file)))
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(level)))
                .build("stderr", Box::new(stderr)),
        )
        .build(
            Root::builder()
                .appender("log_file")
                .appender("stderr")
                .build(level),
        )
        .context("Failed to configure logging")?;

    // Keep the handle to change the log level at runtime,
    // e.g. turn on trace while chasing a failed send and back off afterwards
    let handle = log4rs::init_config(config).context("Failed to init_config")?;

    Ok(handle)
}
