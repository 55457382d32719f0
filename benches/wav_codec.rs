use avatalk::audio::vad::{Vad, VadConfig};
use avatalk::audio::wav;
use avatalk::providers::mock::tone;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;

/// Typical clip lengths: a short reply, a long reply, a full capture buffer.
const CLIP_SECS: [u64; 3] = [3, 15, 60];

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("wav_encode");
    for secs in CLIP_SECS {
        let clip = tone(Duration::from_secs(secs), 16000);
        group.throughput(Throughput::Bytes(clip.pcm16_byte_len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(format!("{secs}s")), &clip, |b, clip| {
            b.iter(|| wav::encode_audio(black_box(clip)));
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("wav_decode");
    for secs in CLIP_SECS {
        let bytes = wav::encode_audio(&tone(Duration::from_secs(secs), 44100));
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(format!("{secs}s")), &bytes, |b, bytes| {
            b.iter(|| wav::decode(black_box(bytes)));
        });
    }
    group.finish();
}

fn bench_vad_tick(c: &mut Criterion) {
    let window = tone(Duration::from_millis(8), 16000).samples;
    c.bench_function("vad_tick", |b| {
        let mut vad = Vad::new(VadConfig::default());
        b.iter(|| vad.tick(black_box(&window), Duration::from_millis(16)));
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_vad_tick);
criterion_main!(benches);
