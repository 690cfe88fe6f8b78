mod common;

use common::*;
use germcall::genotype::SupportingReadStats;
use germcall::pipeline::{Filter, FilterSet, IndelSampleCall, SiteOverlap, SiteSampleCall};
use germcall::{
    AlleleKey, CallerConfig, GenotypeCall, IndelRecord, PipelineBuilder, RecordCollector,
    RegionPloidy, SiteRecord, VariantStage,
};

#[test]
fn het_deletion_is_called_once() {
    let mut driver = diploid_driver(200);
    let key = AlleleKey::deletion(100, 2);
    add_indel_reads(&mut driver, &key, 0, 8, 2);
    add_reference_pileups(&mut driver, 95..110, 10);

    let records = call_all(&mut driver);
    let indels = indels(&records);
    assert_eq!(indels.len(), 1);

    let indel = indels[0];
    assert_eq!(indel.pos(), 100);
    assert_eq!(indel.alleles, vec![key]);
    assert_eq!(indel.sample.genotype, GenotypeCall::Diploid(0, 1));
    assert!(indel.sample.gqx > 0);
    assert!(indel.filters.is_pass());
    assert_eq!(indel.sample.dpi, Some(10));
    assert_eq!(indel.sample.support.alt_counts, vec![8]);

    // every pileup position still yields exactly one site record
    let positions: Vec<u32> = sites(&records).iter().map(|s| s.pos).collect();
    assert_eq!(positions, (95..110).collect::<Vec<_>>());
    for pos in [100, 101] {
        let site = site_at(&records, pos);
        assert_eq!(site.overlap, Some(SiteOverlap::IndelOverlap));
        assert_eq!(site.sample.genotype, GenotypeCall::Haploid(0));
    }
    assert_eq!(site_at(&records, 102).overlap, None);
}

#[test]
fn competing_insertions_keep_two_alleles() {
    let mut driver = diploid_driver(120);
    let short = AlleleKey::insertion(50, b"T");
    let long = AlleleKey::insertion(50, b"TT");
    let weak = AlleleKey::insertion(50, b"TTT");
    add_indel_reads(&mut driver, &short, 0, 6, 0);
    add_indel_reads(&mut driver, &long, 100, 6, 0);
    add_indel_reads(&mut driver, &weak, 200, 3, 0);

    let records = call_all(&mut driver);
    let indels = indels(&records);
    assert_eq!(indels.len(), 1);

    let indel = indels[0];
    assert_eq!(indel.alleles.len(), 2);
    assert!(!indel.alleles.contains(&weak));
    assert_eq!(indel.sample.phred_loghood.len(), 6);
    assert_eq!(indel.sample.genotype, GenotypeCall::Diploid(1, 2));
    assert_eq!(indel.sample.support.alt_counts, vec![6, 6]);
}

#[test]
fn site_inside_deletion_carries_overlap() {
    let mut driver = diploid_driver(260);
    let key = AlleleKey::deletion(200, 3);
    add_indel_reads(&mut driver, &key, 0, 6, 6);
    add_reference_pileups(&mut driver, 198..206, 12);

    let records = call_all(&mut driver);
    assert_eq!(indels(&records).len(), 1);

    let site = site_at(&records, 201);
    assert_eq!(site.overlap, Some(SiteOverlap::IndelOverlap));
    assert_eq!(site.sample.ploidy, Some(1));
    assert_eq!(site.sample.genotype, GenotypeCall::Haploid(0));
    assert_eq!(site_at(&records, 203).overlap, None);
    assert_eq!(site_at(&records, 199).overlap, None);
}

fn variant_indel(range: std::ops::Range<u32>) -> IndelRecord {
    let len = range.end - range.start;
    IndelRecord {
        alleles: vec![AlleleKey::deletion(range.start, len)],
        range,
        qual: 120,
        is_forced_output: false,
        filters: FilterSet::new(),
        sample: IndelSampleCall {
            ploidy: Some(2),
            genotype: GenotypeCall::Diploid(0, 1),
            phred_loghood: vec![200, 0, 150],
            gq: 90,
            gq_polymorphic: 90,
            gqx: 90,
            support: SupportingReadStats {
                ref_count: 5,
                alt_counts: vec![6],
            },
            site_ploidy: vec![1; len as usize],
            ..IndelSampleCall::default()
        },
    }
}

fn het_site(pos: u32) -> SiteRecord {
    SiteRecord {
        pos,
        ref_base: b'G',
        alt_bases: vec![b'A'],
        qual: 80,
        n_used_calls: 20,
        n_unused_calls: 0,
        hpol: 1,
        strand_bias: None,
        is_forced_output: false,
        filters: FilterSet::new(),
        overlap: None,
        sample: SiteSampleCall {
            ploidy: Some(2),
            genotype: GenotypeCall::Diploid(0, 1),
            gq: 70,
            gqx: 70,
            allele_depths: vec![10, 10],
        },
    }
}

#[test]
fn overlapping_indels_mark_site_as_conflict() {
    let config = CallerConfig::default();
    let mut pipeline = PipelineBuilder::new(&config).build(RecordCollector::new());
    pipeline.process_indel(variant_indel(300..304)).unwrap();
    pipeline.process_indel(variant_indel(302..305)).unwrap();
    pipeline.process_site(het_site(303)).unwrap();
    pipeline.process_site(het_site(320)).unwrap();
    pipeline.flush().unwrap();

    let records = pipeline.into_sink().into_records();
    assert_eq!(records.len(), 4);
    for indel in indels(&records) {
        assert!(indel.filters.contains(Filter::IndelConflict));
    }
    let conflicted = site_at(&records, 303);
    assert_eq!(conflicted.overlap, Some(SiteOverlap::IndelConflict));
    assert_eq!(conflicted.sample.genotype, GenotypeCall::NoCall);
    assert!(conflicted.filters.contains(Filter::IndelConflict));

    let outside = site_at(&records, 320);
    assert_eq!(outside.overlap, None);
    assert!(outside.filters.is_pass());
}

#[test]
fn overlapping_deletions_called_jointly_conflict_where_both_delete() {
    let mut driver = diploid_driver(200);
    let first = AlleleKey::deletion(100, 4);
    let second = AlleleKey::deletion(102, 3);
    add_indel_reads(&mut driver, &first, 0, 6, 4);
    add_indel_reads(&mut driver, &second, 100, 6, 4);
    add_reference_pileups(&mut driver, 98..108, 10);

    let records = call_all(&mut driver);
    let indels = indels(&records);
    assert_eq!(indels.len(), 1);
    let joint = indels[0];
    assert_eq!(joint.alleles, vec![first, second]);
    assert_eq!(joint.sample.genotype, GenotypeCall::Diploid(1, 2));
    assert!(!joint.filters.contains(Filter::IndelConflict));

    for pos in [102, 103] {
        let site = site_at(&records, pos);
        assert_eq!(site.overlap, Some(SiteOverlap::IndelConflict));
        assert_eq!(site.sample.genotype, GenotypeCall::NoCall);
        assert!(site.filters.contains(Filter::IndelConflict));
    }
    let single = site_at(&records, 101);
    assert_eq!(single.overlap, Some(SiteOverlap::IndelOverlap));
    assert_eq!(single.sample.genotype, GenotypeCall::Haploid(0));
    assert_eq!(site_at(&records, 106).overlap, None);
}

#[test]
fn haploid_region_deletion_removes_site_copies() {
    let ploidy = RegionPloidy::diploid().with_region(90..130, 1).unwrap();
    let mut driver = driver_with(CallerConfig::default(), 200, ploidy);
    let key = AlleleKey::deletion(100, 2);
    add_indel_reads(&mut driver, &key, 0, 8, 2);
    add_reference_pileups(&mut driver, 98..104, 10);

    let records = call_all(&mut driver);
    let indels = indels(&records);
    assert_eq!(indels.len(), 1);
    assert_eq!(indels[0].sample.genotype, GenotypeCall::Haploid(1));
    assert_eq!(indels[0].sample.phred_loghood.len(), 2);
    assert_eq!(indels[0].sample.site_ploidy, vec![0, 0]);

    let deleted = site_at(&records, 100);
    assert_eq!(deleted.sample.ploidy, Some(0));
    assert_eq!(deleted.sample.genotype, GenotypeCall::NoCall);
    assert!(!deleted.filters.contains(Filter::SiteConflict));
    assert_eq!(site_at(&records, 103).sample.genotype, GenotypeCall::Haploid(0));
}

#[test]
fn indel_straddling_ploidy_change_is_flagged() {
    let ploidy = RegionPloidy::diploid().with_region(101..150, 1).unwrap();
    let mut driver = driver_with(CallerConfig::default(), 200, ploidy);
    add_indel_reads(&mut driver, &AlleleKey::deletion(100, 2), 0, 8, 2);

    let records = call_all(&mut driver);
    let indels = indels(&records);
    assert_eq!(indels.len(), 1);
    assert!(indels[0].sample.is_ploidy_conflict);
    assert!(indels[0].filters.contains(Filter::PloidyConflict));
}
