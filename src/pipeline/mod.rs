//! Record pipeline: locus filtering, indel/site overlap resolution and sinks.
//!
//! Every stage implements [`VariantStage`] and owns the stage after it, so a
//! pipeline is a chain of values built by [`PipelineBuilder`]:
//!
//! ```text
//! driver → QualityFilter → OverlapResolver → sink
//! ```

mod filter;
mod overlap;
mod record;
mod vcf;

pub use filter::{FilterThresholds, QualityFilter};
pub use overlap::{OverlapResolver, ResolverState};
pub use record::{
    Filter, FilterSet, IndelRecord, IndelSampleCall, LocusRecord, SiteOverlap, SiteRecord,
    SiteSampleCall,
};
pub use vcf::{render_records, VcfSink};

use crate::{CallerConfig, CallerError};

/// Capability shared by every pipeline stage.
pub trait VariantStage {
    /// Accept a site record.
    fn process_site(&mut self, site: SiteRecord) -> Result<(), CallerError>;

    /// Accept an indel record.
    fn process_indel(&mut self, indel: IndelRecord) -> Result<(), CallerError>;

    /// Forward everything still buffered and flush downstream.
    fn flush(&mut self) -> Result<(), CallerError>;

    /// Dispatch a record of either kind.
    fn process(&mut self, record: LocusRecord) -> Result<(), CallerError> {
        match record {
            LocusRecord::Site(site) => self.process_site(site),
            LocusRecord::Indel(indel) => self.process_indel(indel),
        }
    }
}

/// Terminal stage keeping every record in arrival order.
#[derive(Debug, Default, Clone)]
pub struct RecordCollector {
    records: Vec<LocusRecord>,
    flushes: usize,
}

impl RecordCollector {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records received so far.
    pub fn records(&self) -> &[LocusRecord] {
        &self.records
    }

    /// Take the collected records.
    pub fn into_records(self) -> Vec<LocusRecord> {
        self.records
    }

    /// Number of flushes received.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }
}

impl VariantStage for RecordCollector {
    fn process_site(&mut self, site: SiteRecord) -> Result<(), CallerError> {
        self.records.push(LocusRecord::Site(site));
        Ok(())
    }

    fn process_indel(&mut self, indel: IndelRecord) -> Result<(), CallerError> {
        self.records.push(LocusRecord::Indel(indel));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CallerError> {
        self.flushes += 1;
        Ok(())
    }
}

/// Assembles the standard stage chain in front of a sink.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    thresholds: FilterThresholds,
}

impl PipelineBuilder {
    /// Builder using the filter thresholds in `config`.
    pub fn new(config: &CallerConfig) -> Self {
        Self {
            thresholds: FilterThresholds::from_config(config),
        }
    }

    /// Override the LowGQX threshold.
    pub fn with_min_gqx(mut self, min_gqx: Option<u32>) -> Self {
        self.thresholds.min_gqx = min_gqx;
        self
    }

    /// Override the HighDepth threshold.
    pub fn with_max_depth(mut self, max_depth: Option<u32>) -> Self {
        self.thresholds.max_depth = max_depth;
        self
    }

    /// Replace every threshold.
    pub fn with_thresholds(mut self, thresholds: FilterThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Take ownership of `sink` and wrap it in the filter and overlap stages.
    pub fn build<S: VariantStage>(self, sink: S) -> Pipeline<S> {
        let resolver = OverlapResolver::new(sink);
        Pipeline {
            head: QualityFilter::new(resolver, self.thresholds),
        }
    }
}

/// Owned stage chain ending in a sink of type `S`.
#[derive(Debug)]
pub struct Pipeline<S: VariantStage> {
    head: QualityFilter<OverlapResolver<S>>,
}

impl<S: VariantStage> Pipeline<S> {
    /// Borrow the sink.
    pub fn sink(&self) -> &S {
        self.head.next().next()
    }

    /// Consume the pipeline, returning the sink. Call [`VariantStage::flush`] first.
    pub fn into_sink(self) -> S {
        self.head.into_next().into_next()
    }
}

impl<S: VariantStage> VariantStage for Pipeline<S> {
    fn process_site(&mut self, site: SiteRecord) -> Result<(), CallerError> {
        self.head.process_site(site)
    }

    fn process_indel(&mut self, indel: IndelRecord) -> Result<(), CallerError> {
        self.head.process_indel(indel)
    }

    fn flush(&mut self) -> Result<(), CallerError> {
        self.head.flush()
    }
}
