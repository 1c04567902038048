/// Configure logging globally for the process. If log4rs is already
/// initialized, the call is a no-op.
/// - dir: base directory for rolling log files; if None, console only.
/// - level: error|warn|info|debug|trace
/// - retention: number of rolled files to keep (default 7)
pub fn configure_logging(
    dir: Option<&std::path::Path>,
    level: Option<&str>,
    retention: Option<usize>,
) {
    use log::LevelFilter;
    use log4rs::append::console::{ConsoleAppender, Target};
    use log4rs::append::rolling_file::RollingFileAppender;
    use log4rs::append::rolling_file::policy::compound::{
        CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
    };
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let keep = retention.unwrap_or(7) as u32;
    let lvl = match level.unwrap_or("info").to_ascii_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };
    let enc_pattern = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";

    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(enc_pattern)))
        .build();
    let mut builder =
        Config::builder().appender(Appender::builder().build("console", Box::new(console)));
    let mut root = Root::builder().appender("console");

    if let Some(base) = dir {
        let _ = std::fs::create_dir_all(base);
        let roller = FixedWindowRoller::builder()
            .build(&format!("{}", base.join("fluxbase.{}.log").display()), keep)
            .unwrap();
        let policy =
            CompoundPolicy::new(Box::new(SizeTrigger::new(10 * 1024 * 1024)), Box::new(roller));
        let appender = RollingFileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(enc_pattern)))
            .build(base.join("fluxbase.log"), Box::new(policy))
            .unwrap();
        builder = builder.appender(Appender::builder().build("file", Box::new(appender)));
        root = root.appender("file");
    }

    let config = builder.build(root.build(lvl)).unwrap();
    let _ = log4rs::init_config(config);
}

/// Configure logging from environment variables if present:
/// - FLUXBASE_LOG_DIR
/// - FLUXBASE_LOG_LEVEL
/// - FLUXBASE_LOG_RETENTION
pub fn configure_from_env() {
    let dir = std::env::var("FLUXBASE_LOG_DIR").ok().map(std::path::PathBuf::from);
    let level = std::env::var("FLUXBASE_LOG_LEVEL").ok();
    let retention =
        std::env::var("FLUXBASE_LOG_RETENTION").ok().and_then(|s| s.parse::<usize>().ok());
    configure_logging(dir.as_deref(), level.as_deref(), retention);
}
