use std::{
    error::Error,
    f32::consts::TAU,
    fs,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use btle_rf::{
    args::{convert_filter, Args},
    configure_and_run,
    exfil::SnapshotDump,
    sim::SimDriver,
    Driver, RX_BUFFER_SAMPLES,
};
use clap::Parser;
use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

// Nap between polls when there was nothing to do. Has to stay well under the
// time the stream takes to fill half the ring (2 ms at 4 Msps).
const POLL_WAIT: Duration = Duration::from_micros(200);

// Offset of the synthetic tone from the carrier
const TONE_HZ: f32 = 250_000.0;

/// Pace a complex tone into the software backend at the configured rate
fn synthetic_feed(feeder: Sender<Vec<i16>>, rate: u32, stop: Arc<AtomicBool>) {
    let step = TAU * TONE_HZ / rate as f32;
    let period = Duration::from_secs_f64(RX_BUFFER_SAMPLES as f64 / rate as f64);
    let mut phase = 0f32;
    let mut next = Instant::now();
    while !stop.load(Ordering::Acquire) {
        let mut block = Vec::with_capacity(RX_BUFFER_SAMPLES * 2);
        for _ in 0..RX_BUFFER_SAMPLES {
            block.push((phase.cos() * 2000.0) as i16);
            block.push((phase.sin() * 2000.0) as i16);
            phase = (phase + step) % TAU;
        }
        if feeder.send(block).is_err() {
            break;
        }
        next += period;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }
    debug!("synthetic feed stopped");
}

fn run<D: Driver>(
    driver: D,
    args: &Args,
    payload: &[i8],
    stop: Arc<AtomicBool>,
) -> Result<(), Box<dyn Error>> {
    let config = args.radio_config();
    let mut radio = configure_and_run(driver, &config, stop.clone())?;
    let mut dump = match &args.dump {
        Some(dir) => Some(SnapshotDump::create(dir, args.capacity)?),
        None => None,
    };

    let block_len = radio.tx().map(|tx| tx.max_payload()).unwrap_or(1);
    let mut blocks = payload.chunks(block_len);
    let stats_period = Duration::from_secs(args.stats_secs);
    let mut last_stats = Instant::now();

    while !stop.load(Ordering::Acquire) {
        let mut idle = true;
        if config.rx.enabled {
            if let Some(snap) = radio.rx()?.process_one_buffer() {
                idle = false;
                if let Some(dump) = dump.as_mut() {
                    dump.push(snap.samples());
                }
            }
        }
        if config.tx.enabled {
            match blocks.next() {
                Some(block) => {
                    radio.tx()?.process_one_buffer(block)?;
                    idle = false;
                }
                None if !config.rx.enabled => {
                    info!("payload sent");
                    break;
                }
                None => {}
            }
        }
        if last_stats.elapsed() >= stats_period {
            info!("{}", radio.stats());
            last_stats = Instant::now();
        }
        if idle {
            thread::sleep(POLL_WAIT);
        }
    }

    let report = radio.stats();
    radio.stop_and_close();
    if let Some(dump) = dump {
        let dropped = dump.dropped();
        let bytes = dump.finish()?;
        info!(bytes, dropped, "snapshot dump closed");
    }
    info!("final {}", report);
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    // Get the CLI options
    let args = Args::parse();

    // Set the log level
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();

    if args.no_rx && args.tx.is_none() {
        return Err("nothing to do: RX disabled and no TX payload given".into());
    }

    // Payload bytes are already signed IQ components
    let payload: Vec<i8> = match &args.tx {
        Some(path) => fs::read(path)?.into_iter().map(|b| b as i8).collect(),
        None => Vec::new(),
    };

    // Setup the exit handler
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        warn!("stop requested");
        handler_stop.store(true, Ordering::Release);
    })?;

    #[cfg(feature = "bladerf")]
    if !args.sim {
        let driver = btle_rf::bladerf::BladerfDriver::new(None);
        return run(driver, &args, &payload, stop);
    }

    // Software backend, looped back so transmitted blocks show up in RX
    let sim = SimDriver::new().with_loopback(args.tx.is_some());
    if !args.no_rx && args.tx.is_none() {
        let feeder = sim.feeder();
        let feed_stop = stop.clone();
        let rate = args.rate;
        thread::Builder::new()
            .name("synthetic-feed".to_string())
            .spawn(move || synthetic_feed(feeder, rate, feed_stop))?;
    }
    run(sim, &args, &payload, stop)
}
