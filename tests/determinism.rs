mod common;

use std::collections::HashSet;

use blake3::hash;
use common::*;
use germcall::pipeline::{render_records, VcfSink};
use germcall::{AlleleKey, CallerConfig, PipelineBuilder};

fn run_to_vcf() -> String {
    let mut driver = diploid_driver(160);
    add_indel_reads(&mut driver, &AlleleKey::deletion(40, 2), 0, 8, 4);
    add_indel_reads(&mut driver, &AlleleKey::insertion(90, b"GT"), 100, 5, 5);
    add_indel_reads(&mut driver, &AlleleKey::insertion(90, b"G"), 200, 4, 0);
    add_reference_pileups(&mut driver, 35..50, 15);
    add_reference_pileups(&mut driver, 85..95, 15);
    add_base_calls(&mut driver, 88, b'T', 9);
    driver.session_mut().add_forced_site(120);

    let config = CallerConfig::default();
    let sink = VcfSink::new(Vec::new(), driver.reference().clone()).with_sample_name("NA12878");
    let mut pipeline = PipelineBuilder::new(&config).build(sink);
    let range = driver.reference().range();
    driver.run(range, &mut pipeline).expect("calling succeeds");
    String::from_utf8(pipeline.into_sink().into_inner()).expect("utf-8 output")
}

#[test]
fn streaming_caller_is_deterministic() {
    let mut fingerprints = HashSet::new();
    for _ in 0..5 {
        fingerprints.insert(hash(run_to_vcf().as_bytes()));
    }
    assert_eq!(fingerprints.len(), 1, "outputs diverged across runs");
}

#[test]
fn vcf_lines_are_position_sorted() {
    let vcf = run_to_vcf();
    assert!(vcf.contains("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tNA12878"));

    let positions: Vec<u32> = vcf
        .lines()
        .filter(|line| !line.starts_with('#'))
        .map(|line| line.split('\t').nth(1).unwrap().parse().unwrap())
        .collect();
    assert!(!positions.is_empty());
    assert!(positions.windows(2).all(|w| w[0] <= w[1]));
    assert!(vcf.contains("CIGAR=1M2D"));
}

#[test]
fn collected_records_render_like_the_streaming_sink() {
    let mut driver = diploid_driver(160);
    add_indel_reads(&mut driver, &AlleleKey::deletion(40, 2), 0, 8, 4);
    add_reference_pileups(&mut driver, 35..50, 15);
    let reference = driver.reference().clone();
    let records = call_all(&mut driver);

    let rendered = render_records(&reference, &records).unwrap();
    let mut driver = diploid_driver(160);
    add_indel_reads(&mut driver, &AlleleKey::deletion(40, 2), 0, 8, 4);
    add_reference_pileups(&mut driver, 35..50, 15);
    let config = CallerConfig::default();
    let mut pipeline = PipelineBuilder::new(&config).build(VcfSink::new(Vec::new(), reference));
    let range = driver.reference().range();
    driver.run(range, &mut pipeline).unwrap();
    let streamed = String::from_utf8(pipeline.into_sink().into_inner()).unwrap();

    assert_eq!(hash(rendered.as_bytes()), hash(streamed.as_bytes()));
}
