//! Genotype enumeration and likelihood computation.
//!
//! Genotypes are unordered allele multisets over `{ref} ∪ alts` indexed in
//! VCF order: allele `a` for ploidy 1, and `b(b+1)/2 + a` for the diploid
//! genotype `a/b` with `a <= b`.

mod likelihood;
mod site;

pub use likelihood::{GenotypeLikelihoodEngine, GenotypeLikelihoods, SupportingReadStats};
pub use site::{continuous_quality, strand_bias, SiteCall, SITE_ALLELE_COUNT};

use std::fmt;

use crate::CallerError;

/// Number of unordered genotypes for `ploidy` over `allele_count` alleles.
pub fn genotype_count(ploidy: u8, allele_count: usize) -> Result<usize, CallerError> {
    match ploidy {
        1 => Ok(allele_count),
        2 => Ok(allele_count * (allele_count + 1) / 2),
        _ => Err(CallerError::InvalidPloidy { ploidy }),
    }
}

/// Called genotype for one sample at one locus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum GenotypeCall {
    /// No genotype reported.
    #[default]
    NoCall,
    /// Single allele.
    Haploid(u8),
    /// Unordered allele pair, stored with the smaller index first.
    Diploid(u8, u8),
}

impl GenotypeCall {
    /// Diploid call with its alleles ordered.
    pub fn diploid(a: u8, b: u8) -> Self {
        GenotypeCall::Diploid(a.min(b), a.max(b))
    }

    /// Decode a VCF-order genotype index.
    pub fn from_index(ploidy: u8, index: usize, allele_count: usize) -> Result<Self, CallerError> {
        let malformed = CallerError::MalformedGenotypeIndex {
            index,
            ploidy,
            allele_count,
        };
        if index >= genotype_count(ploidy, allele_count)? || allele_count > u8::MAX as usize + 1 {
            return Err(malformed);
        }
        if ploidy == 1 {
            return Ok(GenotypeCall::Haploid(index as u8));
        }
        let mut b = 0usize;
        while (b + 1) * (b + 2) / 2 <= index {
            b += 1;
        }
        let a = index - b * (b + 1) / 2;
        Ok(GenotypeCall::Diploid(a as u8, b as u8))
    }

    /// VCF-order index of the genotype, `None` for a no-call.
    pub fn index(&self) -> Option<usize> {
        match *self {
            GenotypeCall::NoCall => None,
            GenotypeCall::Haploid(a) => Some(a as usize),
            GenotypeCall::Diploid(a, b) => {
                let (a, b) = (a.min(b) as usize, a.max(b) as usize);
                Some(b * (b + 1) / 2 + a)
            }
        }
    }

    /// Number of allele copies in the genotype.
    pub fn ploidy(&self) -> u8 {
        match self {
            GenotypeCall::NoCall => 0,
            GenotypeCall::Haploid(_) => 1,
            GenotypeCall::Diploid(..) => 2,
        }
    }

    /// Alleles in the genotype, in stored order.
    pub fn alleles(&self) -> Vec<u8> {
        match *self {
            GenotypeCall::NoCall => Vec::new(),
            GenotypeCall::Haploid(a) => vec![a],
            GenotypeCall::Diploid(a, b) => vec![a, b],
        }
    }

    /// Copies of non-reference alleles.
    pub fn non_ref_copies(&self) -> u8 {
        self.alleles().iter().filter(|&&a| a != 0).count() as u8
    }

    /// Whether `allele` appears in the genotype.
    pub fn contains(&self, allele: u8) -> bool {
        self.alleles().contains(&allele)
    }

    /// Whether any non-reference allele is called.
    pub fn is_variant(&self) -> bool {
        self.non_ref_copies() > 0
    }

    /// Whether a diploid genotype carries two distinct alleles.
    pub fn is_het(&self) -> bool {
        matches!(*self, GenotypeCall::Diploid(a, b) if a != b)
    }

    /// Diploid call implied by the frequency `vf` of one alternate allele:
    /// homozygous above `1 - min_het_vf`, heterozygous from `min_het_vf`.
    pub fn from_frequency(vf: f64, min_het_vf: f64) -> Self {
        if vf >= 1.0 - min_het_vf {
            GenotypeCall::Diploid(1, 1)
        } else if vf >= min_het_vf && vf > 0.0 {
            GenotypeCall::Diploid(0, 1)
        } else {
            GenotypeCall::Diploid(0, 0)
        }
    }

    /// Replace allele indices through `map` (old index → new index).
    pub fn remap(&self, map: impl Fn(u8) -> u8) -> Self {
        match *self {
            GenotypeCall::NoCall => GenotypeCall::NoCall,
            GenotypeCall::Haploid(a) => GenotypeCall::Haploid(map(a)),
            GenotypeCall::Diploid(a, b) => GenotypeCall::diploid(map(a), map(b)),
        }
    }
}

impl fmt::Display for GenotypeCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenotypeCall::NoCall => write!(f, "."),
            GenotypeCall::Haploid(a) => write!(f, "{a}"),
            GenotypeCall::Diploid(a, b) => write!(f, "{a}/{b}"),
        }
    }
}

/// Phred-scale an error probability, rounded and capped at `cap`.
pub fn error_prob_to_phred(prob: f64, cap: u32) -> u32 {
    if prob.is_nan() || prob <= 0.0 {
        return cap;
    }
    let phred = -10.0 * prob.log10();
    if phred >= cap as f64 {
        cap
    } else {
        phred.round().max(0.0) as u32
    }
}

/// `ln(Σ exp(x))` computed without overflow.
pub(crate) fn log_sum_exp(values: impl IntoIterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.into_iter().collect();
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}
