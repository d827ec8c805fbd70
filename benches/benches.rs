use std::sync::Arc;

use btle_rf::{
    monitoring::CaptureStats, phase::PhaseExtractor, ring::SampleRing, tx::TxBlock, LEN_BUF,
    LEN_BUF_MAX_NUM_PHY_SAMPLE, RX_BUFFER_SAMPLES, TX_BLOCK_SAMPLES,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;

fn benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    // One receive buffer of SC16 Q11 components
    let block: Vec<i16> = (0..RX_BUFFER_SAMPLES * 2)
        .map(|_| rng.gen_range(-2048..2048))
        .collect();
    let mut payload = vec![0i8; 2 * TX_BLOCK_SAMPLES];
    rng.fill(&mut payload[..]);

    let ring = Arc::new(SampleRing::default());

    c.bench_function("ring write", |b| b.iter(|| ring.write(black_box(&block))));

    c.bench_function("window extraction", |b| {
        let ring = Arc::new(SampleRing::default());
        let mut extractor = PhaseExtractor::new(ring.clone(), Arc::new(CaptureStats::default()));
        // Offset by the margin, then half a ring per iteration, so every
        // iteration lands on a watch-point
        ring.write(&vec![0i16; LEN_BUF_MAX_NUM_PHY_SAMPLE]);
        let half = vec![16i16; LEN_BUF / 2];
        b.iter(|| {
            ring.write(black_box(&half));
            black_box(extractor.poll().map(|s| s.len()))
        })
    });

    c.bench_function("tx block build", |b| {
        let mut tx = TxBlock::default();
        b.iter(|| black_box(tx.fill(black_box(&payload)).map(|s| s.len())))
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
