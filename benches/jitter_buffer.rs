//! Hot-path benchmarks: decode, jitter buffer push/pull, full ingest

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sensor_audio_receiver::audio::buffer::JitterBuffer;
use sensor_audio_receiver::config::AppConfig;
use sensor_audio_receiver::pipeline::Pipeline;
use sensor_audio_receiver::protocol::{decode, SampleBatch};

fn sine_pcm(len: usize) -> Vec<i16> {
    (0..len)
        .map(|i| ((i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 16000.0).sin() * 16000.0) as i16)
        .collect()
}

fn bench_decode(c: &mut Criterion) {
    let binary = SampleBatch::new(0, Some(0), sine_pcm(512)).to_binary();
    let json = SampleBatch::new(0, Some(0), sine_pcm(512)).to_json();

    c.bench_function("decode_binary_512", |b| {
        b.iter(|| decode(black_box("esp32/audio/raw"), black_box(&binary)))
    });
    c.bench_function("decode_json_512", |b| {
        b.iter(|| decode(black_box("esp32/audio/raw"), black_box(&json)))
    });
}

fn bench_jitter_buffer(c: &mut Criterion) {
    let buffer = JitterBuffer::with_latency(16000, 500);
    let pcm = sine_pcm(512);
    let mut frame = vec![0.0f32; 512];

    c.bench_function("jitter_push_pull_512", |b| {
        b.iter(|| {
            buffer.push_pcm(black_box(&pcm));
            buffer.pull_into(black_box(&mut frame));
        })
    });
}

fn bench_ingest(c: &mut Criterion) {
    let pipeline = Pipeline::new(&AppConfig::default());
    let packets: Vec<_> = (0..256u16)
        .map(|seq| SampleBatch::new(0, Some(seq), sine_pcm(512)).to_binary())
        .collect();
    let mut next = 0usize;

    c.bench_function("ingest_binary_512", |b| {
        b.iter(|| {
            let packet = &packets[next % packets.len()];
            next += 1;
            pipeline.ingest(black_box("esp32/audio/raw"), black_box(packet))
        })
    });
}

criterion_group!(benches, bench_decode, bench_jitter_buffer, bench_ingest);
criterion_main!(benches);
