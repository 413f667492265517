#![forbid(unsafe_code)]
#![warn(
    clippy::dbg_macro,
    clippy::decimal_literal_representation,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::print_stderr,
    clippy::print_stdout,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_in_result,
    clippy::unwrap_used,
    clippy::use_debug
)]


use anyhow::Context;
use csvlog::DailyCsvLog;
use inverter::Poller;
use record::BusAddress;
use serde::Deserialize;
use serial::SerialLine;
use std::{path::PathBuf, str::FromStr};

mod csvlog;
mod inverter;
mod record;
mod serial;

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Deserialize, Clone)]
struct Config {
    #[serde(default = "default_serial_device")]
    serial_device: String,
    #[serde(default = "default_addresses")]
    addresses: Vec<BusAddress>,
    #[serde(default = "default_log_dir")]
    log_dir: PathBuf,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    discovery: bool,
}

fn default_serial_device() -> String {
    "/dev/ttyUSB0".to_owned()
}

fn default_addresses() -> Vec<BusAddress> {
    (1..=8).filter_map(|a| BusAddress::new(a).ok()).collect()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/www/html/kaco")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    fn level(&self) -> anyhow::Result<log::Level> {
        log::Level::from_str(&self.log_level).context("Invalid log_level in config file.")
    }
}

fn run(config: &Config) -> anyhow::Result<()> {
    let started = std::time::Instant::now();

    let mut csv_log = DailyCsvLog::new(&config.log_dir);
    std::fs::create_dir_all(csv_log.dir())
        .with_context(|| format!("Failed to create log directory {}", csv_log.dir().display()))?;

    let line = SerialLine::open(&config.serial_device)?;
    let mut poller = Poller::new(line, config.discovery);
    let summary = poller.poll_all(&config.addresses, &mut csv_log);
    poller.into_inner().close();

    log::debug!(
        "Recorded {} of {} inverters ({} skipped)",
        summary.recorded,
        config.addresses.len(),
        summary.skipped
    );
    log::debug!("This request took {:.1} seconds", started.elapsed().as_secs_f64());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config_str =
        std::fs::read_to_string(CONFIG_FILE).context("Failed to read config file.")?;

    let config: Config = toml::from_str(&config_str).context("Failed to parse config file.")?;
    simple_logger::init_with_level(config.level()?)
        .context("Failed to init logging")?;

    run(&config)
}
