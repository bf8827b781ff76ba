use super::*;
use mule_dtn::bundle::Eid;
use mule_dtn::neighbors::Neighbor;
use std::path::PathBuf;
use std::time::Duration;

pub struct Settings {
    pub config: mule_dtn::config::Config,
    pub role: roles::Role,
    pub telemetry: roles::TelemetryConfig,
    /// How often the daemon logs a metrics snapshot. Zero disables it.
    pub metrics_period: Duration,
}

#[derive(Debug)]
pub struct SettingsError(String);

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SettingsError {}

fn bad(msg: impl Into<String>) -> SettingsError {
    SettingsError(msg.into())
}

fn options() -> getopts::Options {
    let mut opts = getopts::Options::new();
    opts.optflag("h", "help", "print this help menu")
        .optflag("v", "version", "print the version information")
        .optopt("c", "config", "use a custom configuration file", "FILE");
    opts
}

fn init_logger(config: &config::Config) -> Result<(), SettingsError> {
    let log_level = get::<String>(config, "log_level")?
        .unwrap_or_else(|| "info".to_string())
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .map_err(|e| bad(format!("Invalid 'log_level' value in configuration: {e}")))?;

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(
            log_level > tracing_subscriber::filter::LevelFilter::from_level(tracing::Level::INFO),
        )
        .init();
    Ok(())
}

fn get<'de, T: serde::Deserialize<'de>>(
    config: &config::Config,
    key: &str,
) -> Result<Option<T>, SettingsError> {
    match config.get::<T>(key) {
        Ok(v) => Ok(Some(v)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(bad(format!("Invalid '{key}' value in configuration: {e}"))),
    }
}

fn get_seconds(
    config: &config::Config,
    key: &str,
    default: u64,
) -> Result<Duration, SettingsError> {
    Ok(Duration::from_secs(get(config, key)?.unwrap_or(default)))
}

/// Neighbors are either a TOML array of `eid:host:port` strings or one
/// comma-separated string (the environment-variable form).
fn load_neighbors(config: &config::Config) -> Result<Vec<Neighbor>, SettingsError> {
    let Some(v) = get::<config::Value>(config, "neighbors")? else {
        return Ok(Vec::new());
    };

    let specs: Vec<String> = match v.kind {
        config::ValueKind::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        config::ValueKind::Array(a) => a
            .into_iter()
            .map(|v| match v.kind {
                config::ValueKind::String(s) => Ok(s),
                other => Err(bad(format!(
                    "Invalid neighbor entry '{other}' in configuration"
                ))),
            })
            .collect::<Result<_, _>>()?,
        other => {
            return Err(bad(format!(
                "Invalid 'neighbors' value '{other}' in configuration"
            )));
        }
    };

    specs
        .iter()
        .map(|s| {
            s.parse()
                .map_err(|e| bad(format!("Invalid neighbor '{s}': {e}")))
        })
        .collect()
}

fn load(config: &config::Config) -> Result<Settings, SettingsError> {
    let node_id: Eid = get::<String>(config, "node_id")?
        .ok_or_else(|| bad("A 'node_id' value is required"))?
        .parse()
        .map_err(|e| bad(format!("Invalid 'node_id' value in configuration: {e}")))?;

    let role: roles::Role = get::<String>(config, "node_role")?
        .unwrap_or_else(|| "relay".to_string())
        .parse()
        .map_err(|e: String| bad(e))?;

    let defaults = mule_dtn::config::Config::default();
    let storage_dir = get::<PathBuf>(config, "storage_dir")?
        .unwrap_or_else(|| std::env::temp_dir().join(format!("dtn_bundles_{node_id}")));

    let node_config = mule_dtn::config::Config {
        listen_address: get::<String>(config, "listen_address")?
            .map(|s| {
                s.parse()
                    .map_err(|e| bad(format!("Invalid 'listen_address' value: {e}")))
            })
            .transpose()?
            .unwrap_or(defaults.listen_address),
        listen_port: get(config, "listen_port")?.unwrap_or(defaults.listen_port),
        neighbors: load_neighbors(config)?,
        storage_dir,
        delivery_log: get(config, "delivery_log")?,
        default_lifetime: get_seconds(
            config,
            "default_lifetime_s",
            defaults.default_lifetime.as_secs(),
        )?,
        sweeper_period: get_seconds(config, "sweeper_period_s", defaults.sweeper_period.as_secs())?,
        resend_period: get_seconds(config, "resend_period_s", defaults.resend_period.as_secs())?,
        max_frame_bytes: get(config, "max_frame_bytes")?.unwrap_or(defaults.max_frame_bytes),
        forward_workers: get(config, "forward_workers")?.unwrap_or(defaults.forward_workers),
        connect_timeout: get_seconds(
            config,
            "connect_timeout_s",
            defaults.connect_timeout.as_secs(),
        )?,
        read_timeout: get_seconds(config, "read_timeout_s", defaults.read_timeout.as_secs())?,
        node_id,
        ..defaults
    };

    let telemetry = roles::TelemetryConfig {
        destination: get::<String>(config, "telemetry_destination")?
            .map(|s| {
                s.parse::<Eid>()
                    .map_err(|e| bad(format!("Invalid 'telemetry_destination' value: {e}")))
            })
            .transpose()?,
        period: get_seconds(config, "telemetry_period_s", 10)?,
    };

    if matches!(role, roles::Role::Source) && telemetry.destination.is_none() {
        return Err(bad(
            "The 'source' role requires a 'telemetry_destination' value",
        ));
    }

    Ok(Settings {
        config: node_config,
        role,
        telemetry,
        metrics_period: get_seconds(config, "metrics_period_s", 30)?,
    })
}

/// Parse the command line and the configuration sources. `Ok(None)`
/// means help or version was printed and the process should exit
/// cleanly; errors are configuration errors (exit code 2).
pub fn init() -> Result<Option<Settings>, SettingsError> {
    let opts = options();
    let args: Vec<String> = std::env::args().collect();
    let program = args[0].clone();
    let flags = opts
        .parse(&args[1..])
        .map_err(|e| bad(format!("Failed to parse command line: {e}")))?;
    if flags.opt_present("h") {
        let brief = format!(
            "{} {} - {}\n\nUsage: {} [options]",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_DESCRIPTION"),
            program
        );
        print!("{}", opts.usage(&brief));
        return Ok(None);
    }
    if flags.opt_present("v") {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(None);
    }

    let mut b = config::Config::builder();

    let config_source: String;
    if let Some(source) = flags.opt_str("config") {
        config_source = format!("Using configuration file '{source}' specified on command line");
        b = b.add_source(config::File::with_name(&source).format(config::FileFormat::Toml));
    } else if let Ok(source) = std::env::var("MULE_DTND_CONFIG_FILE") {
        config_source = format!(
            "Using configuration file '{source}' specified by MULE_DTND_CONFIG_FILE environment variable"
        );
        b = b.add_source(config::File::with_name(&source).format(config::FileFormat::Toml));
    } else {
        config_source = "No configuration file; using environment and defaults".to_string();
        b = b.add_source(
            config::File::with_name("mule-dtnd")
                .required(false)
                .format(config::FileFormat::Toml),
        );
    }

    // Pull in environment vars
    b = b.add_source(config::Environment::with_prefix("MULE_DTND"));

    let config = b
        .build()
        .map_err(|e| bad(format!("Failed to load configuration: {e}")))?;

    init_logger(&config)?;
    info!(
        "{} version {} starting...",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    info!("{config_source}");

    load(&config).map(Some)
}
