//! # Streaming germline small-variant calling
//!
//! This library calls SNVs and indels from per-position pileups while
//! walking the reference in a single increasing pass.
//!
//! ## Core Pipeline
//!
//! 1. **Position stream**: visit each position once, SNP path then indel path
//! 2. **Orthogonal allele selection**: pick a clique of conflicting indel
//!    alleles that can be genotyped together without phase information
//! 3. **Genotype likelihoods**: phred-scaled likelihoods over ploidy 1 or 2
//! 4. **Overlap resolution**: merge overlapping indel/site records so every
//!    reportable range is emitted exactly once
//!
//! ## Usage Example
//!
//! ```ignore
//! use germcall::{CallerConfig, StreamDriver, PipelineBuilder, RecordCollector};
//!
//! let config = CallerConfig::default();
//! let mut driver = StreamDriver::new(config.clone(), reference, RegionPloidy::diploid())?;
//! // ... fill driver.session_mut() with pileups and indel evidence ...
//! let mut pipeline = PipelineBuilder::new(&config).build(RecordCollector::new());
//! driver.run(0..1_000, &mut pipeline)?;
//! let records = pipeline.into_sink().into_records();
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

pub mod driver;   // Position-ordered streaming driver and session state
pub mod genomics; // Pileups, reference context, ploidy, allele keys
pub mod genotype; // Genotype enumeration and likelihood engine
pub mod indel;    // Indel candidate arena and orthogonal allele selection
pub mod pipeline; // Record stages: filters, overlap resolution, sinks

pub use driver::{CallingSession, ForcedOutputTracker, StreamDriver};
pub use genomics::{AlleleKey, IndelKind, PileupColumn, PloidyMap, ReferenceSegment, RegionPloidy};
pub use genotype::{GenotypeCall, GenotypeLikelihoodEngine, GenotypeLikelihoods};
pub use indel::{AlleleCandidateGroup, AlleleId, IndelCandidateBuffer, OrthogonalAlleleSelector};
pub use pipeline::{
    IndelRecord, LocusRecord, OverlapResolver, Pipeline, PipelineBuilder, RecordCollector,
    SiteRecord, VariantStage,
};

use thiserror::Error;

/// Genotyping model used for both SNP and indel paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallingMode {
    /// Probabilistic diploid/haploid genotyping.
    #[default]
    Diploid,
    /// Allele-frequency reporting without a ploidy model.
    Continuous,
}

/// Configuration parameters for a calling run
#[derive(Debug, Clone)]
pub struct CallerConfig {
    /// Genotyping model.
    pub mode: CallingMode,

    /// Number of samples carried by the session (genotyping reports sample 0).
    pub sample_count: usize,

    /// Base calls below this Phred quality are counted as unused.
    pub min_base_quality: u8,

    /// Base calls from reads below this mapping quality are counted as unused.
    pub min_mapq: u8,

    /// SNV heterozygosity prior.
    pub snp_theta: f64,

    /// Indel heterozygosity prior.
    pub indel_theta: f64,

    /// Minimum supporting reads (summed over samples) for a candidate indel.
    pub min_candidate_indel_reads: u32,

    /// Minimum fraction of evaluated reads supporting a candidate indel.
    pub min_candidate_indel_read_frac: f64,

    /// Candidates evaluated against more reads than this are rejected.
    pub max_candidate_indel_depth: Option<f64>,

    /// Cap applied to every phred-scaled quality.
    pub max_genotype_quality: u32,

    /// Non-reference allele copies required for the polymorphic genotype subspace.
    pub min_polymorphic_alt_copies: u8,

    /// Minimum variant frequency reported in continuous mode.
    pub min_het_vf: f64,

    /// Loci below this GQX receive the LowGQX filter.
    pub min_gqx: Option<u32>,

    /// Loci deeper than this receive the HighDepth filter.
    pub max_depth: Option<u32>,

    /// Sites with a larger fraction of filtered base calls receive HighBaseFilt.
    pub max_base_filter_frac: Option<f64>,

    /// Variant sites in a longer homopolymer receive HighSNVHPOL.
    pub max_snv_hpol: Option<u32>,

    /// Variant sites with a larger strand bias receive HighSNVSB.
    pub max_snv_strand_bias: Option<f64>,

    /// Bound on select/extend rounds when growing an allele clique.
    pub max_extension_rounds: usize,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            mode: CallingMode::Diploid,
            sample_count: 1,
            min_base_quality: 17,
            min_mapq: 20,
            snp_theta: 1e-3,
            indel_theta: 1e-4,
            min_candidate_indel_reads: 2,
            min_candidate_indel_read_frac: 0.02,
            max_candidate_indel_depth: None,
            max_genotype_quality: 999,
            min_polymorphic_alt_copies: 1,
            min_het_vf: 0.01,
            min_gqx: Some(15),
            max_depth: None,
            max_base_filter_frac: Some(0.4),
            max_snv_hpol: Some(6),
            max_snv_strand_bias: Some(10.0),
            max_extension_rounds: 8,
        }
    }
}

impl CallerConfig {
    /// Select the calling mode.
    pub fn with_mode(mut self, mode: CallingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the number of samples.
    pub fn with_sample_count(mut self, sample_count: usize) -> Self {
        self.sample_count = sample_count;
        self
    }

    /// Set the minimum GQX used by the LowGQX filter (`None` disables it).
    pub fn with_min_gqx(mut self, min_gqx: Option<u32>) -> Self {
        self.min_gqx = min_gqx;
        self
    }

    /// Set the depth used by the HighDepth filter (`None` disables it).
    pub fn with_max_depth(mut self, max_depth: Option<u32>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the site-only filter thresholds (`None` disables a filter).
    pub fn with_site_filters(
        mut self,
        max_base_filter_frac: Option<f64>,
        max_snv_hpol: Option<u32>,
        max_snv_strand_bias: Option<f64>,
    ) -> Self {
        self.max_base_filter_frac = max_base_filter_frac;
        self.max_snv_hpol = max_snv_hpol;
        self.max_snv_strand_bias = max_snv_strand_bias;
        self
    }

    /// Set the candidate indel support thresholds.
    pub fn with_candidate_thresholds(mut self, min_reads: u32, min_read_frac: f64) -> Self {
        self.min_candidate_indel_reads = min_reads;
        self.min_candidate_indel_read_frac = min_read_frac;
        self
    }

    /// Check parameter ranges before a run starts.
    pub fn validate(&self) -> Result<(), CallerError> {
        if self.sample_count == 0 {
            return Err(CallerError::invalid_config("sample count must be > 0"));
        }
        for (name, theta) in [("snp_theta", self.snp_theta), ("indel_theta", self.indel_theta)] {
            if !(theta > 0.0 && theta <= 0.1) {
                return Err(CallerError::invalid_config(format!(
                    "{name} must be in (0, 0.1], got {theta}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.min_candidate_indel_read_frac) {
            return Err(CallerError::invalid_config(
                "candidate indel read fraction must be in [0, 1]",
            ));
        }
        if !(1..=2).contains(&self.min_polymorphic_alt_copies) {
            return Err(CallerError::invalid_config(
                "polymorphic allele copy threshold must be 1 or 2",
            ));
        }
        if !(0.0..=0.5).contains(&self.min_het_vf) {
            return Err(CallerError::invalid_config("min_het_vf must be in [0, 0.5]"));
        }
        if let Some(frac) = self.max_base_filter_frac {
            if !(0.0..=1.0).contains(&frac) {
                return Err(CallerError::invalid_config(
                    "max_base_filter_frac must be in [0, 1]",
                ));
            }
        }
        if self.max_snv_strand_bias.is_some_and(|sb| !sb.is_finite()) {
            return Err(CallerError::invalid_config("max_snv_strand_bias must be finite"));
        }
        if self.max_extension_rounds == 0 {
            return Err(CallerError::invalid_config("max_extension_rounds must be > 0"));
        }
        Ok(())
    }
}

/// Errors that can occur during calling
#[derive(Error, Debug)]
pub enum CallerError {
    /// Configuration rejected by [`CallerConfig::validate`].
    #[error("invalid caller configuration: {0}")]
    InvalidConfiguration(String),

    /// Ploidy outside {0, 1, 2}.
    #[error("invalid ploidy {ploidy} (expected 0, 1 or 2)")]
    InvalidPloidy {
        /// Offending ploidy value.
        ploidy: u8,
    },

    /// Genotype index outside the enumeration for the given ploidy and allele count.
    #[error("malformed genotype index {index} for ploidy {ploidy} with {allele_count} alleles")]
    MalformedGenotypeIndex {
        /// Offending index.
        index: usize,
        /// Ploidy the index was interpreted under.
        ploidy: u8,
        /// Allele count including the reference.
        allele_count: usize,
    },

    /// Driver positions must be strictly increasing.
    #[error("position {pos} visited after position {last}")]
    PositionOrder {
        /// Position requested.
        pos: u32,
        /// Last position processed.
        last: u32,
    },

    /// Allele handle does not refer to a live arena slot.
    #[error("unknown allele handle {0}")]
    UnknownAllele(u32),

    /// Sample index beyond the configured sample count.
    #[error("sample index {sample} out of range (sample count {sample_count})")]
    SampleOutOfRange {
        /// Requested sample.
        sample: usize,
        /// Configured sample count.
        sample_count: usize,
    },

    /// Failure writing records or diagnostic counts.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CallerError {
    /// Helper for constructing configuration errors.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        CallerError::InvalidConfiguration(msg.into())
    }
}
