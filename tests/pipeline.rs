use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use btle_rf::sim::{Call, SimDriver};
use btle_rf::tuning::Tunable;
use btle_rf::{
    configure_and_run, DirectionConfig, Radio, RadioConfig, DEFAULT_RX_GAIN, LEN_BUF,
    LEN_BUF_MAX_NUM_PHY_SAMPLE, LEN_WINDOW, TX_BLOCK_SAMPLES,
};
use rand::prelude::*;

fn start(sim: &Arc<SimDriver>, config: RadioConfig) -> (Radio<Arc<SimDriver>>, Arc<AtomicBool>) {
    let stop = Arc::new(AtomicBool::new(false));
    let radio = configure_and_run(sim.clone(), &config, stop.clone()).unwrap();
    (radio, stop)
}

fn rx_config() -> RadioConfig {
    let rx = DirectionConfig::new(2_400_000_000, 20_000_000, 10_000_000);
    let mut config = RadioConfig::rx_only(rx);
    config.rx_timeout_ms = 5;
    config
}

/// Components numbered from `first`, reduced modulo 97 and scaled to Q11
fn counting(first: usize, len: usize) -> Vec<i16> {
    (first..first + len).map(|k| ((k % 97) as i16) << 4).collect()
}

fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn rx_only_window_after_full_delivery() {
    let sim = Arc::new(SimDriver::new());
    let (mut radio, _) = start(&sim, rx_config());

    let tuning = radio.rx().unwrap().tuning();
    assert_eq!(tuning.frequency, 2_400_000_000);
    assert_eq!(tuning.sample_rate, 20_000_000);
    assert_eq!(tuning.bandwidth, 10_000_000);
    assert_eq!(tuning.gain, DEFAULT_RX_GAIN);
    assert!(radio.tx().is_err());

    let first = LEN_BUF / 2;
    sim.feed(counting(0, first));
    wait_for("first half", || radio.stats().components >= first as u64);
    assert!(radio.rx().unwrap().process_one_buffer().is_none());

    sim.feed(counting(first, LEN_BUF_MAX_NUM_PHY_SAMPLE));
    wait_for("lookahead", || {
        radio.stats().components >= (first + LEN_BUF_MAX_NUM_PHY_SAMPLE) as u64
    });
    let rx = radio.rx().unwrap();
    let snap = rx.process_one_buffer().unwrap();
    assert_eq!(snap.start, 0);
    assert_eq!(snap.len(), LEN_WINDOW);
    for (i, &s) in snap.samples().iter().enumerate() {
        assert_eq!(s as usize, i % 97);
    }
    assert!(rx.process_one_buffer().is_none());

    let report = radio.stats();
    assert_eq!(report.windows, 1);
    assert_eq!(report.skipped, 0);
    radio.stop_and_close();
}

#[test]
fn stop_while_blocked_in_stream() {
    let sim = Arc::new(SimDriver::new());
    let (radio, stop) = start(&sim, rx_config());
    assert!(Arc::ptr_eq(&stop, &radio.stop_flag()));

    wait_for("stream start", || sim.is_streaming());
    // Nothing is fed, the stream only sees receive timeouts
    stop.store(true, Ordering::SeqCst);
    wait_for("stream exit", || !sim.is_streaming());

    let start = Instant::now();
    radio.stop_and_close();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(sim.calls().last(), Some(&Call::Close));
}

#[test]
fn transmitted_blocks_loop_back_into_windows() {
    let sim = Arc::new(SimDriver::new().with_loopback(true));
    let config = rx_config().with_tx(DirectionConfig::new(2_400_000_000, 20_000_000, 10_000_000));
    let (mut radio, _) = start(&sim, config);

    let mut rng = StdRng::seed_from_u64(11);
    let mut sent = Vec::new();
    for _ in 0..3 {
        let payload: Vec<i8> = (0..2 * TX_BLOCK_SAMPLES).map(|_| rng.gen()).collect();
        radio.tx().unwrap().process_one_buffer(&payload).unwrap();
        sent.extend_from_slice(&payload);
    }
    assert_eq!(sim.transmitted().len(), 3);
    assert_eq!(radio.stats().tx_blocks, 3);

    wait_for("loopback", || radio.stats().components >= sent.len() as u64);
    let snap = radio.rx().unwrap().process_one_buffer().unwrap();
    // Widening by 16 and reducing back is lossless
    assert_eq!(snap.samples(), &sent[..LEN_WINDOW]);
    drop(radio);
    assert_eq!(sim.calls().iter().filter(|c| **c == Call::Close).count(), 1);
}
