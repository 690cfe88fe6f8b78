//! Streaming throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use germcall::genomics::BaseCall;
use germcall::indel::ReadPathScores;
use germcall::*;

fn loaded_driver(len: u32, depth: u32) -> StreamDriver<RegionPloidy> {
    let bases: Vec<u8> = b"ACGTTGCA".iter().copied().cycle().take(len as usize).collect();
    let reference = ReferenceSegment::new("chrBench", 0, bases);
    let mut driver = StreamDriver::new(CallerConfig::default(), reference, RegionPloidy::diploid())
        .expect("default configuration is valid");

    for pos in 0..len {
        let ref_base = driver.reference().base(pos);
        for read in 0..depth {
            // every 97th position carries a het SNV
            let base = if pos % 97 == 0 && read % 2 == 0 { b'T' } else { ref_base };
            driver
                .session_mut()
                .pileups_mut()
                .observe(0, pos, ref_base, BaseCall::new(base, 35, 60, read % 3 == 0))
                .expect("single sample");
        }
    }

    let mut read_id = 0;
    for pos in (50..len).step_by(250) {
        let key = AlleleKey::deletion(pos, 1 + pos % 4);
        for i in 0..depth {
            let scores = if i % 2 == 0 {
                ReadPathScores::new(-12.0, -0.2)
            } else {
                ReadPathScores::new(-0.2, -12.0)
            };
            driver
                .session_mut()
                .indel_buffer_mut()
                .observe(key.clone(), 0, read_id, scores)
                .expect("single sample");
            read_id += 1;
        }
    }
    driver
}

fn benchmark_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_driver");
    for &len in &[1_000u32, 10_000] {
        group.bench_with_input(BenchmarkId::new("diploid_depth_30", len), &len, |b, &len| {
            b.iter_with_setup(
                || loaded_driver(len, 30),
                |mut driver| {
                    let config = CallerConfig::default();
                    let mut pipeline = PipelineBuilder::new(&config).build(RecordCollector::new());
                    driver.run(0..len, &mut pipeline).expect("calling succeeds");
                    black_box(pipeline.into_sink().into_records().len())
                },
            );
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_stream);
criterion_main!(benches);
