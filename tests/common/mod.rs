#![allow(dead_code)]

use germcall::genomics::BaseCall;
use germcall::indel::ReadPathScores;
use germcall::{
    AlleleKey, CallerConfig, IndelRecord, LocusRecord, PipelineBuilder, RecordCollector,
    ReferenceSegment, RegionPloidy, SiteRecord, StreamDriver,
};

/// Scores for a read that clearly prefers the allele.
pub const SUPPORTING: ReadPathScores = ReadPathScores {
    ref_lnp: -10.0,
    indel_lnp: -0.01,
};

/// Scores for a read that clearly prefers the reference.
pub const OPPOSING: ReadPathScores = ReadPathScores {
    ref_lnp: -0.01,
    indel_lnp: -10.0,
};

/// Deterministic `ACGT`-repeat reference of `len` bases on `chr20`.
pub fn reference(len: usize) -> ReferenceSegment {
    let bases: Vec<u8> = b"ACGT".iter().copied().cycle().take(len).collect();
    ReferenceSegment::new("chr20", 0, bases)
}

pub fn diploid_driver(len: usize) -> StreamDriver<RegionPloidy> {
    driver_with(CallerConfig::default(), len, RegionPloidy::diploid())
}

pub fn driver_with(
    config: CallerConfig,
    len: usize,
    ploidy: RegionPloidy,
) -> StreamDriver<RegionPloidy> {
    StreamDriver::new(config, reference(len), ploidy).expect("valid configuration")
}

/// Give `depth` reference-matching base calls to every position in `range`.
pub fn add_reference_pileups(
    driver: &mut StreamDriver<RegionPloidy>,
    range: std::ops::Range<u32>,
    depth: u32,
) {
    for pos in range {
        let ref_base = driver.reference().base(pos);
        for _ in 0..depth {
            driver
                .session_mut()
                .pileups_mut()
                .observe(0, pos, ref_base, BaseCall::new(ref_base, 35, 60, false))
                .expect("sample 0 exists");
        }
    }
}

/// Add base calls of `base` at `pos`.
pub fn add_base_calls(driver: &mut StreamDriver<RegionPloidy>, pos: u32, base: u8, count: u32) {
    let ref_base = driver.reference().base(pos);
    for _ in 0..count {
        driver
            .session_mut()
            .pileups_mut()
            .observe(0, pos, ref_base, BaseCall::new(base, 35, 60, false))
            .expect("sample 0 exists");
    }
}

/// Record `supporting` reads for `key` followed by `opposing` reads, with
/// read ids starting at `first_read`.
pub fn add_indel_reads(
    driver: &mut StreamDriver<RegionPloidy>,
    key: &AlleleKey,
    first_read: u32,
    supporting: u32,
    opposing: u32,
) {
    let buffer = driver.session_mut().indel_buffer_mut();
    for i in 0..supporting + opposing {
        let scores = if i < supporting { SUPPORTING } else { OPPOSING };
        buffer
            .observe(key.clone(), 0, first_read + i, scores)
            .expect("sample 0 exists");
    }
}

/// Run `driver` over its whole reference through the standard pipeline.
pub fn call_all(driver: &mut StreamDriver<RegionPloidy>) -> Vec<LocusRecord> {
    let config = CallerConfig::default();
    let mut pipeline = PipelineBuilder::new(&config).build(RecordCollector::new());
    let range = driver.reference().range();
    driver.run(range, &mut pipeline).expect("calling succeeds");
    pipeline.into_sink().into_records()
}

pub fn indels(records: &[LocusRecord]) -> Vec<&IndelRecord> {
    records
        .iter()
        .filter_map(|r| match r {
            LocusRecord::Indel(indel) => Some(indel),
            LocusRecord::Site(_) => None,
        })
        .collect()
}

pub fn sites(records: &[LocusRecord]) -> Vec<&SiteRecord> {
    records
        .iter()
        .filter_map(|r| match r {
            LocusRecord::Site(site) => Some(site),
            LocusRecord::Indel(_) => None,
        })
        .collect()
}

pub fn site_at(records: &[LocusRecord], pos: u32) -> &SiteRecord {
    sites(records)
        .into_iter()
        .find(|s| s.pos == pos)
        .unwrap_or_else(|| panic!("no site record at {pos}"))
}
