use std::fmt;
use std::ops::Range;

use bitvec::prelude::*;

use crate::genomics::AlleleKey;
use crate::genotype::{GenotypeCall, SupportingReadStats};

/// Locus-level filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Filter {
    /// Locus overlaps more than one variant indel.
    IndelConflict,
    /// Site genotype is inconsistent with an overlapping indel.
    SiteConflict,
    /// GQX below the configured minimum.
    LowGQX,
    /// Too large a fraction of the site's base calls was filtered out.
    HighBaseFilt,
    /// SNV strand bias above the configured maximum.
    HighSNVSB,
    /// SNV inside a homopolymer longer than the configured maximum.
    HighSNVHPOL,
    /// Depth above the configured maximum.
    HighDepth,
    /// Locus crosses a ploidy change or lies in a no-call region.
    PloidyConflict,
}

impl Filter {
    /// Every filter, in header order.
    pub const ALL: [Filter; 8] = [
        Filter::IndelConflict,
        Filter::SiteConflict,
        Filter::LowGQX,
        Filter::HighBaseFilt,
        Filter::HighSNVSB,
        Filter::HighSNVHPOL,
        Filter::HighDepth,
        Filter::PloidyConflict,
    ];

    /// FILTER column label.
    pub fn label(self) -> &'static str {
        match self {
            Filter::IndelConflict => "IndelConflict",
            Filter::SiteConflict => "SiteConflict",
            Filter::LowGQX => "LowGQX",
            Filter::HighBaseFilt => "HighBaseFilt",
            Filter::HighSNVSB => "HighSNVSB",
            Filter::HighSNVHPOL => "HighSNVHPOL",
            Filter::HighDepth => "HighDepth",
            Filter::PloidyConflict => "PloidyConflict",
        }
    }

    /// Header description.
    pub fn description(self) -> &'static str {
        match self {
            Filter::IndelConflict => "Locus is in region with conflicting indel calls",
            Filter::SiteConflict => "Site genotype conflicts with proximal indel call",
            Filter::LowGQX => "Locus GQX is below threshold or not present",
            Filter::HighBaseFilt => {
                "The fraction of basecalls filtered out at a site is greater than the configured maximum"
            }
            Filter::HighSNVSB => "SNV strand bias value (SNVSB) exceeds the configured maximum",
            Filter::HighSNVHPOL => {
                "SNV contextual homopolymer length (SNVHPOL) exceeds the configured maximum"
            }
            Filter::HighDepth => "Locus depth is greater than the configured maximum",
            Filter::PloidyConflict => {
                "Genotype call from variant caller not consistent with chromosome ploidy"
            }
        }
    }

    fn bit(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Set of [`Filter`]s applied to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterSet {
    bits: BitArr!(for 8, in u8, Lsb0),
}

impl FilterSet {
    /// Empty set (a passing record).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `filter`.
    pub fn insert(&mut self, filter: Filter) {
        self.bits.set(filter.bit(), true);
    }

    /// Whether `filter` is set.
    pub fn contains(&self, filter: Filter) -> bool {
        self.bits[filter.bit()]
    }

    /// Add every filter of `other`.
    pub fn merge(&mut self, other: &FilterSet) {
        for filter in other.iter() {
            self.insert(filter);
        }
    }

    /// Whether no filter is set.
    pub fn is_pass(&self) -> bool {
        self.bits.not_any()
    }

    /// Set filters in header order.
    pub fn iter(&self) -> impl Iterator<Item = Filter> + '_ {
        Filter::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pass() {
            return f.write_str("PASS");
        }
        let labels: Vec<&str> = self.iter().map(Filter::label).collect();
        f.write_str(&labels.join(";"))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for FilterSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// How a site relates to overlapping indels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SiteOverlap {
    /// Site genotyped as part of one overlapping indel locus.
    IndelOverlap,
    /// Site inside a region with conflicting indel calls.
    IndelConflict,
}

/// Sample call at a site.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SiteSampleCall {
    /// Reported ploidy; `None` in continuous mode.
    pub ploidy: Option<u8>,
    /// Called genotype over `[ref] ++ alt_bases`.
    pub genotype: GenotypeCall,
    /// Genotype quality.
    pub gq: u32,
    /// Conservative genotype quality.
    pub gqx: u32,
    /// Cleaned calls per reported allele, reference first.
    pub allele_depths: Vec<u32>,
}

/// Single-base call at one reference position.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SiteRecord {
    /// 0-based position.
    pub pos: u32,
    /// Reference base.
    pub ref_base: u8,
    /// Alternate bases present in the call.
    pub alt_bases: Vec<u8>,
    /// Phred-scaled variant quality.
    pub qual: u32,
    /// Calls used for genotyping.
    pub n_used_calls: u32,
    /// Calls filtered out before genotyping.
    pub n_unused_calls: u32,
    /// Homopolymer length around the position.
    pub hpol: u32,
    /// Strand bias of the reported alternate; `None` without one.
    pub strand_bias: Option<f64>,
    /// Reported because the position was forced.
    pub is_forced_output: bool,
    /// Applied filters.
    pub filters: FilterSet,
    /// Overlap annotation set by the overlap resolver.
    pub overlap: Option<SiteOverlap>,
    /// Reported sample.
    pub sample: SiteSampleCall,
}

impl SiteRecord {
    /// Total calls at the site.
    pub fn depth(&self) -> u32 {
        self.n_used_calls + self.n_unused_calls
    }

    /// Whether the called genotype carries an alternate base.
    pub fn is_variant(&self) -> bool {
        self.sample.genotype.is_variant()
    }

    /// Fraction of the site's calls filtered out before genotyping.
    pub fn filtered_fraction(&self) -> f64 {
        match self.depth() {
            0 => 0.0,
            depth => self.n_unused_calls as f64 / depth as f64,
        }
    }
}

/// Sample call at an indel locus.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IndelSampleCall {
    /// Reported ploidy; `Some(0)` inside a no-call region, `None` in continuous mode.
    pub ploidy: Option<u8>,
    /// Locus crosses a ploidy change or a no-call region.
    pub is_ploidy_conflict: bool,
    /// Called genotype over `[ref] ++ alleles`.
    pub genotype: GenotypeCall,
    /// Phred-scaled genotype likelihoods in VCF order.
    pub phred_loghood: Vec<u32>,
    /// Genotype quality.
    pub gq: u32,
    /// Genotype quality within the polymorphic subspace.
    pub gq_polymorphic: u32,
    /// Conservative genotype quality.
    pub gqx: u32,
    /// Confidently supporting reads per allele.
    pub support: SupportingReadStats,
    /// Ploidy of every reference base in the locus range under the call.
    pub site_ploidy: Vec<u8>,
    /// Depth at the anchor site, filled in by the overlap resolver.
    pub dpi: Option<u32>,
}

/// Call over one or more indel alleles sharing a locus.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IndelRecord {
    /// Reference range covered by the alleles.
    pub range: Range<u32>,
    /// Non-reference alleles in genotype order.
    pub alleles: Vec<AlleleKey>,
    /// Phred-scaled variant quality.
    pub qual: u32,
    /// Reported because an allele was forced.
    pub is_forced_output: bool,
    /// Applied filters.
    pub filters: FilterSet,
    /// Reported sample.
    pub sample: IndelSampleCall,
}

impl IndelRecord {
    /// Leftmost allele start.
    pub fn pos(&self) -> u32 {
        self.range.start
    }

    /// Whether the called genotype carries a non-reference allele.
    pub fn is_variant(&self) -> bool {
        self.sample.genotype.is_variant()
    }

    /// Exclusive end of the region this record claims: its deleted bases,
    /// or the single position of a pure insertion.
    pub fn claimed_end(&self) -> u32 {
        self.range.end.max(self.range.start + 1)
    }
}

/// Record flowing through the pipeline.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum LocusRecord {
    /// Single-base call.
    Site(SiteRecord),
    /// Indel call.
    Indel(IndelRecord),
}

impl LocusRecord {
    /// Record start position.
    pub fn pos(&self) -> u32 {
        match self {
            LocusRecord::Site(site) => site.pos,
            LocusRecord::Indel(indel) => indel.pos(),
        }
    }

    /// Applied filters.
    pub fn filters(&self) -> &FilterSet {
        match self {
            LocusRecord::Site(site) => &site.filters,
            LocusRecord::Indel(indel) => &indel.filters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_set_renders_in_header_order() {
        let mut filters = FilterSet::new();
        assert_eq!(filters.to_string(), "PASS");
        filters.insert(Filter::LowGQX);
        filters.insert(Filter::IndelConflict);
        assert!(filters.contains(Filter::LowGQX));
        assert!(!filters.contains(Filter::HighDepth));
        assert_eq!(filters.to_string(), "IndelConflict;LowGQX");
    }

    #[test]
    fn merge_unions_filters() {
        let mut a = FilterSet::new();
        a.insert(Filter::SiteConflict);
        let mut b = FilterSet::new();
        b.insert(Filter::PloidyConflict);
        a.merge(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![Filter::SiteConflict, Filter::PloidyConflict]);
    }
}
