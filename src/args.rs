//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::Parser;

use crate::radio::{DirectionConfig, RadioConfig};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Center frequency in Hz (BLE advertising channel 37 by default)
    #[clap(short, long, default_value_t = 2_402_000_000)]
    pub freq: u64,
    /// Sample rate in samples per second
    #[clap(short, long, default_value_t = 4_000_000)]
    pub rate: u32,
    /// Analog bandwidth in Hz
    #[clap(short, long, default_value_t = 2_000_000)]
    pub bandwidth: u32,
    /// Gain for both directions, backend default when unset
    #[clap(short, long, allow_hyphen_values = true)]
    pub gain: Option<i32>,
    /// Enable TX and send this file (raw signed 8-bit IQ) block by block
    #[clap(long)]
    pub tx: Option<PathBuf>,
    /// Don't receive
    #[clap(long)]
    pub no_rx: bool,
    /// Directory to dump received snapshots into
    #[clap(short, long)]
    pub dump: Option<PathBuf>,
    /// Snapshots the dump hand-off ring holds
    #[clap(short, long, default_value_t = 256, value_parser = valid_capacity)]
    pub capacity: usize,
    /// Seconds between stats reports
    #[clap(long, default_value_t = 5)]
    pub stats_secs: u64,
    /// Use the software backend even when bladeRF support is built in
    #[clap(long)]
    pub sim: bool,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

impl Args {
    pub fn radio_config(&self) -> RadioConfig {
        let mut dir = DirectionConfig::new(self.freq, self.rate, self.bandwidth);
        dir.gain = self.gain;
        let mut config = RadioConfig::default();
        if !self.no_rx {
            config.rx = dir;
        }
        if self.tx.is_some() {
            config.tx = dir;
        }
        config
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn valid_capacity(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("capacity must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err("Invalid capacity".to_string()),
    }
}
