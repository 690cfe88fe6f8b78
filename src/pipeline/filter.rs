use tracing::trace;

use crate::pipeline::{Filter, IndelRecord, SiteRecord, VariantStage};
use crate::{CallerConfig, CallerError};

/// Locus filter thresholds; `None` disables a filter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FilterThresholds {
    /// LowGQX below this.
    pub min_gqx: Option<u32>,
    /// HighDepth above this.
    pub max_depth: Option<u32>,
    /// HighBaseFilt above this fraction of filtered calls.
    pub max_base_filter_frac: Option<f64>,
    /// HighSNVHPOL above this homopolymer length.
    pub max_snv_hpol: Option<u32>,
    /// HighSNVSB above this strand bias.
    pub max_snv_strand_bias: Option<f64>,
}

impl FilterThresholds {
    /// Thresholds configured in `config`.
    pub fn from_config(config: &CallerConfig) -> Self {
        Self {
            min_gqx: config.min_gqx,
            max_depth: config.max_depth,
            max_base_filter_frac: config.max_base_filter_frac,
            max_snv_hpol: config.max_snv_hpol,
            max_snv_strand_bias: config.max_snv_strand_bias,
        }
    }
}

/// Applies per-locus quality filters before records reach the next stage.
#[derive(Debug)]
pub struct QualityFilter<N> {
    next: N,
    thresholds: FilterThresholds,
}

impl<N: VariantStage> QualityFilter<N> {
    /// Filter in front of `next`.
    pub fn new(next: N, thresholds: FilterThresholds) -> Self {
        Self { next, thresholds }
    }

    /// Borrow the downstream stage.
    pub fn next(&self) -> &N {
        &self.next
    }

    /// Consume the filter, returning the downstream stage.
    pub fn into_next(self) -> N {
        self.next
    }

    fn is_low_gqx(&self, gqx: u32) -> bool {
        self.thresholds.min_gqx.is_some_and(|min| gqx < min)
    }

    fn is_high_depth(&self, depth: u32) -> bool {
        self.thresholds.max_depth.is_some_and(|max| depth > max)
    }

    fn site_filters(&self, site: &SiteRecord) -> impl Iterator<Item = Filter> {
        let t = &self.thresholds;
        let variant = site.is_variant();
        [
            (self.is_low_gqx(site.sample.gqx), Filter::LowGQX),
            (self.is_high_depth(site.depth()), Filter::HighDepth),
            (
                t.max_base_filter_frac.is_some_and(|max| site.filtered_fraction() > max),
                Filter::HighBaseFilt,
            ),
            (
                variant && t.max_snv_hpol.is_some_and(|max| site.hpol > max),
                Filter::HighSNVHPOL,
            ),
            (
                variant
                    && matches!(
                        (t.max_snv_strand_bias, site.strand_bias),
                        (Some(max), Some(sb)) if sb > max
                    ),
                Filter::HighSNVSB,
            ),
        ]
        .into_iter()
        .filter_map(|(applies, filter)| applies.then_some(filter))
    }
}

impl<N: VariantStage> VariantStage for QualityFilter<N> {
    fn process_site(&mut self, mut site: SiteRecord) -> Result<(), CallerError> {
        let filters: Vec<Filter> = self.site_filters(&site).collect();
        for filter in filters {
            site.filters.insert(filter);
        }
        self.next.process_site(site)
    }

    fn process_indel(&mut self, mut indel: IndelRecord) -> Result<(), CallerError> {
        if self.is_low_gqx(indel.sample.gqx) {
            indel.filters.insert(Filter::LowGQX);
        }
        if self.is_high_depth(indel.sample.support.total()) {
            indel.filters.insert(Filter::HighDepth);
        }
        if indel.sample.is_ploidy_conflict {
            indel.filters.insert(Filter::PloidyConflict);
        }
        trace!(pos = indel.pos(), filters = %indel.filters, "filtered indel");
        self.next.process_indel(indel)
    }

    fn flush(&mut self) -> Result<(), CallerError> {
        self.next.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotype::GenotypeCall;
    use crate::pipeline::{FilterSet, LocusRecord, RecordCollector, SiteSampleCall};

    fn site(gqx: u32, depth: u32) -> SiteRecord {
        SiteRecord {
            pos: 10,
            ref_base: b'A',
            alt_bases: Vec::new(),
            qual: 0,
            n_used_calls: depth,
            n_unused_calls: 0,
            hpol: 1,
            strand_bias: None,
            is_forced_output: false,
            filters: FilterSet::new(),
            overlap: None,
            sample: SiteSampleCall {
                ploidy: Some(2),
                genotype: GenotypeCall::Diploid(0, 0),
                gq: gqx,
                gqx,
                allele_depths: vec![depth],
            },
        }
    }

    #[test]
    fn low_gqx_and_high_depth_are_flagged() {
        let mut stage = QualityFilter::new(
            RecordCollector::new(),
            FilterThresholds {
                min_gqx: Some(15),
                max_depth: Some(50),
                ..FilterThresholds::default()
            },
        );
        stage.process_site(site(10, 20)).unwrap();
        stage.process_site(site(40, 80)).unwrap();
        stage.process_site(site(40, 20)).unwrap();
        stage.flush().unwrap();

        let records = stage.into_next().into_records();
        let filters: Vec<String> = records.iter().map(|r| r.filters().to_string()).collect();
        assert_eq!(filters, vec!["LowGQX", "HighDepth", "PASS"]);
        assert!(matches!(records[0], LocusRecord::Site(_)));
    }

    #[test]
    fn disabled_thresholds_pass_everything() {
        let mut stage = QualityFilter::new(RecordCollector::new(), FilterThresholds::default());
        stage.process_site(site(0, 10_000)).unwrap();
        assert!(stage.next().records()[0].filters().is_pass());
    }

    #[test]
    fn site_only_filters_follow_their_thresholds() {
        let variant = |hpol: u32, strand_bias: f64, unused: u32| SiteRecord {
            pos: 3,
            ref_base: b'C',
            alt_bases: vec![b'T'],
            qual: 60,
            n_used_calls: 20,
            n_unused_calls: unused,
            hpol,
            strand_bias: Some(strand_bias),
            is_forced_output: false,
            filters: FilterSet::new(),
            overlap: None,
            sample: SiteSampleCall {
                ploidy: Some(2),
                genotype: GenotypeCall::Diploid(0, 1),
                gq: 60,
                gqx: 60,
                allele_depths: vec![10, 10],
            },
        };
        let config = CallerConfig::default();
        let mut stage = QualityFilter::new(RecordCollector::new(), FilterThresholds::from_config(&config));
        stage.process_site(variant(9, -3.0, 0)).unwrap();
        stage.process_site(variant(2, 25.0, 0)).unwrap();
        stage.process_site(variant(2, -3.0, 20)).unwrap();
        stage.process_site(variant(2, -3.0, 5)).unwrap();

        let mut reference = variant(9, 25.0, 0);
        reference.alt_bases.clear();
        reference.sample.genotype = GenotypeCall::Diploid(0, 0);
        stage.process_site(reference).unwrap();

        let filters: Vec<String> = stage
            .into_next()
            .into_records()
            .iter()
            .map(|r| r.filters().to_string())
            .collect();
        assert_eq!(filters, vec!["HighSNVHPOL", "HighSNVSB", "HighBaseFilt", "PASS", "PASS"]);
    }
}
