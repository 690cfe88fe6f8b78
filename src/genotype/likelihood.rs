use std::collections::BTreeMap;
use std::f64::consts::{LN_10, LN_2};

use tracing::trace;

use crate::genotype::{error_prob_to_phred, genotype_count, log_sum_exp, GenotypeCall};
use crate::indel::{AlleleCandidateGroup, AlleleId, IndelCandidateBuffer, ReadPathScores};
use crate::{CallerConfig, CallerError};

/// Posterior probability a read needs before it counts as supporting one allele.
const CONFIDENT_READ_POSTERIOR: f64 = 0.999;

/// Genotype likelihoods and call qualities for one sample at one locus.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GenotypeLikelihoods {
    /// Ploidy the genotypes were enumerated for.
    pub ploidy: u8,
    /// Allele count including the reference.
    pub allele_count: usize,
    /// Phred-scaled data likelihoods in VCF genotype order; the best is 0.
    pub phred_loghood: Vec<u32>,
    /// Index of the most probable genotype.
    pub max_gt: usize,
    /// Index of the most probable genotype with enough non-reference copies.
    pub max_polymorphic_gt: usize,
    /// Phred-scaled probability that `max_gt` is wrong.
    pub gq: u32,
    /// Phred-scaled probability that `max_polymorphic_gt` is wrong within
    /// the polymorphic subspace.
    pub gq_polymorphic: u32,
    /// Phred-scaled probability of the homozygous reference genotype.
    pub qual: u32,
}

impl GenotypeLikelihoods {
    /// Most probable genotype.
    pub fn call(&self) -> Result<GenotypeCall, CallerError> {
        GenotypeCall::from_index(self.ploidy, self.max_gt, self.allele_count)
    }

    /// Conservative genotype quality: 0 when the unconstrained and
    /// polymorphic maxima disagree, otherwise the smaller of the two GQs.
    pub fn gqx(&self) -> u32 {
        if self.max_gt != self.max_polymorphic_gt {
            0
        } else {
            self.gq.min(self.gq_polymorphic)
        }
    }
}

/// Reads confidently supporting each allele of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SupportingReadStats {
    /// Reads supporting the reference.
    pub ref_count: u32,
    /// Reads supporting each non-reference allele, in group order.
    pub alt_counts: Vec<u32>,
}

impl SupportingReadStats {
    /// Reads confidently assigned to any allele.
    pub fn total(&self) -> u32 {
        self.ref_count + self.alt_counts.iter().sum::<u32>()
    }
}

/// Computes genotype likelihoods from per-read allele likelihoods.
#[derive(Debug, Clone)]
pub struct GenotypeLikelihoodEngine {
    pub(super) snp_theta: f64,
    pub(super) indel_theta: f64,
    pub(super) min_polymorphic_alt_copies: u8,
    pub(super) max_quality: u32,
}

impl GenotypeLikelihoodEngine {
    /// Create an engine with the priors and caps from `config`.
    pub fn new(config: &CallerConfig) -> Self {
        Self {
            snp_theta: config.snp_theta,
            indel_theta: config.indel_theta,
            min_polymorphic_alt_copies: config.min_polymorphic_alt_copies,
            max_quality: config.max_genotype_quality,
        }
    }

    /// Genotype likelihoods of `group` in `sample` at ploidy 1 or 2.
    pub fn compute_likelihoods(
        &self,
        buffer: &IndelCandidateBuffer,
        group: &AlleleCandidateGroup,
        ploidy: u8,
        sample: usize,
    ) -> Result<GenotypeLikelihoods, CallerError> {
        let rows = read_matrix(buffer, group.ids(), sample)?;
        trace!(sample, ploidy, alleles = group.len(), reads = rows.len(), "indel likelihoods");
        self.evaluate(&rows, ploidy, group.len() + 1, self.indel_theta)
    }

    /// Likelihoods of the two-allele genotype {background, forced} where the
    /// background of each read is the best of its reference and `top` likelihoods.
    pub fn score_forced(
        &self,
        buffer: &IndelCandidateBuffer,
        top: &AlleleCandidateGroup,
        forced: AlleleId,
        ploidy: u8,
        sample: usize,
    ) -> Result<GenotypeLikelihoods, CallerError> {
        let mut alleles = top.ids().to_vec();
        alleles.push(forced);
        let rows: Vec<Vec<f64>> = read_matrix(buffer, &alleles, sample)?
            .into_iter()
            .map(|row| {
                // rows are {ref, top..., forced}
                let last = row.len() - 1;
                let background = row[..last].iter().copied().fold(f64::NEG_INFINITY, f64::max);
                vec![background, row[last]]
            })
            .collect();
        self.evaluate(&rows, ploidy, 2, self.indel_theta)
    }

    /// Count reads whose posterior for one allele of `{ref} ∪ group`
    /// against all others reaches 0.999.
    pub fn supporting_reads(
        &self,
        buffer: &IndelCandidateBuffer,
        group: &AlleleCandidateGroup,
        sample: usize,
    ) -> Result<SupportingReadStats, CallerError> {
        let mut stats = SupportingReadStats {
            ref_count: 0,
            alt_counts: vec![0; group.len()],
        };
        for row in read_matrix(buffer, group.ids(), sample)? {
            let total = log_sum_exp(row.iter().copied());
            let confident = row
                .iter()
                .position(|&lnp| (lnp - total).exp() >= CONFIDENT_READ_POSTERIOR);
            match confident {
                Some(0) => stats.ref_count += 1,
                Some(i) => stats.alt_counts[i - 1] += 1,
                None => {}
            }
        }
        Ok(stats)
    }

    /// Ploidy of every reference base in the group's range once the alleles
    /// of `call` are applied: each deleted base loses one copy per allele
    /// instance.
    pub fn site_ploidy(
        &self,
        buffer: &IndelCandidateBuffer,
        group: &AlleleCandidateGroup,
        call: &GenotypeCall,
        ploidy: u8,
    ) -> Result<Vec<u8>, CallerError> {
        let range = group.reference_range(buffer)?;
        let mut site_ploidy = vec![ploidy; (range.end - range.start) as usize];
        for allele in call.alleles() {
            if allele == 0 {
                continue;
            }
            let id = group.ids().get(allele as usize - 1).copied().ok_or(
                CallerError::MalformedGenotypeIndex {
                    index: call.index().unwrap_or(0),
                    ploidy,
                    allele_count: group.len() + 1,
                },
            )?;
            for pos in buffer.key(id)?.deleted_range() {
                let slot = &mut site_ploidy[(pos - range.start) as usize];
                *slot = slot.saturating_sub(1);
            }
        }
        Ok(site_ploidy)
    }

    /// Core computation shared by the SNP and indel paths.
    ///
    /// `rows` holds one vector of ln-likelihoods per read, indexed by allele
    /// with the reference first.
    pub(super) fn evaluate(
        &self,
        rows: &[Vec<f64>],
        ploidy: u8,
        allele_count: usize,
        theta: f64,
    ) -> Result<GenotypeLikelihoods, CallerError> {
        let n_gt = genotype_count(ploidy, allele_count)?;
        let priors = genotype_priors(theta, ploidy, allele_count)?;

        let mut calls = Vec::with_capacity(n_gt);
        let mut data = Vec::with_capacity(n_gt);
        for index in 0..n_gt {
            let call = GenotypeCall::from_index(ploidy, index, allele_count)?;
            data.push(rows.iter().map(|row| read_lnp(row, &call)).sum::<f64>());
            calls.push(call);
        }

        let best_data = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let phred_loghood = data
            .iter()
            .map(|&lnp| {
                let phred = (best_data - lnp) * 10.0 / LN_10;
                if phred.is_finite() {
                    (phred.round() as u32).min(self.max_quality)
                } else {
                    self.max_quality
                }
            })
            .collect();

        let posterior: Vec<f64> = data.iter().zip(&priors).map(|(d, p)| d + p).collect();
        let total = log_sum_exp(posterior.iter().copied());

        let all: Vec<usize> = (0..n_gt).collect();
        let max_gt = argmax(&posterior, &all);
        let gq = self.subspace_quality(&posterior, &all, max_gt);

        let min_copies = self.min_polymorphic_alt_copies.min(ploidy);
        let polymorphic: Vec<usize> = (0..n_gt)
            .filter(|&g| calls[g].non_ref_copies() >= min_copies)
            .collect();
        let (max_polymorphic_gt, gq_polymorphic) = if polymorphic.is_empty() {
            (max_gt, gq)
        } else {
            let best = argmax(&posterior, &polymorphic);
            (best, self.subspace_quality(&posterior, &polymorphic, best))
        };

        let qual = error_prob_to_phred((posterior[0] - total).exp(), self.max_quality);

        Ok(GenotypeLikelihoods {
            ploidy,
            allele_count,
            phred_loghood,
            max_gt,
            max_polymorphic_gt,
            gq,
            gq_polymorphic,
            qual,
        })
    }

    /// Phred-scaled probability mass of `subspace` outside `best`, conditional on `subspace`.
    fn subspace_quality(&self, posterior: &[f64], subspace: &[usize], best: usize) -> u32 {
        let total = log_sum_exp(subspace.iter().map(|&g| posterior[g]));
        let others = log_sum_exp(subspace.iter().filter(|&&g| g != best).map(|&g| posterior[g]));
        error_prob_to_phred((others - total).exp(), self.max_quality)
    }
}

/// ln P(read | genotype): haploid takes the allele's likelihood, diploid
/// averages the two haplotypes.
fn read_lnp(row: &[f64], call: &GenotypeCall) -> f64 {
    match *call {
        GenotypeCall::NoCall => 0.0,
        GenotypeCall::Haploid(a) => row[a as usize],
        GenotypeCall::Diploid(a, b) if a == b => row[a as usize],
        GenotypeCall::Diploid(a, b) => log_sum_exp([row[a as usize], row[b as usize]]) - LN_2,
    }
}

/// First index in `subspace` with the largest value.
fn argmax(values: &[f64], subspace: &[usize]) -> usize {
    let mut best = subspace[0];
    for &g in &subspace[1..] {
        if values[g] > values[best] {
            best = g;
        }
    }
    best
}

/// ln prior of every genotype under heterozygosity `theta`, split evenly
/// across the non-reference alleles.
pub(super) fn genotype_priors(theta: f64, ploidy: u8, allele_count: usize) -> Result<Vec<f64>, CallerError> {
    let n_gt = genotype_count(ploidy, allele_count)?;
    let n_alt = allele_count.saturating_sub(1);
    if n_alt == 0 {
        return Ok(vec![0.0; n_gt]);
    }
    let n = n_alt as f64;
    let alt_pairs = (n_alt * (n_alt.saturating_sub(1)) / 2) as f64;
    let hom_ref = if ploidy == 1 {
        1.0 - theta
    } else if n_alt > 1 {
        1.0 - 1.5 * theta - theta * theta
    } else {
        1.0 - 1.5 * theta
    };

    (0..n_gt)
        .map(|index| {
            let prior = match GenotypeCall::from_index(ploidy, index, allele_count)? {
                GenotypeCall::Haploid(0) | GenotypeCall::Diploid(0, 0) => hom_ref,
                GenotypeCall::Haploid(_) => theta / n,
                GenotypeCall::Diploid(0, _) => theta / n,
                GenotypeCall::Diploid(a, b) if a == b => theta / (2.0 * n),
                GenotypeCall::Diploid(..) => theta * theta / alt_pairs,
                GenotypeCall::NoCall => 1.0,
            };
            Ok(prior.ln())
        })
        .collect()
}

/// Per-read ln-likelihood rows over `{ref} ∪ alleles` for one sample.
///
/// The reference likelihood of a read is the best reference score any allele
/// recorded for it; a read with no score for an allele takes its reference
/// likelihood for that allele.
fn read_matrix(
    buffer: &IndelCandidateBuffer,
    alleles: &[AlleleId],
    sample: usize,
) -> Result<Vec<Vec<f64>>, CallerError> {
    let mut reads: BTreeMap<u32, Vec<Option<ReadPathScores>>> = BTreeMap::new();
    for (i, &id) in alleles.iter().enumerate() {
        let support = buffer
            .record(id)?
            .support
            .sample(sample)
            .ok_or(CallerError::SampleOutOfRange {
                sample,
                sample_count: buffer.sample_count(),
            })?;
        for (&read_id, &scores) in &support.read_path_lnp {
            reads.entry(read_id).or_insert_with(|| vec![None; alleles.len()])[i] = Some(scores);
        }
    }

    Ok(reads
        .into_values()
        .map(|row| {
            let ref_lnp = row
                .iter()
                .flatten()
                .map(|s| s.ref_lnp)
                .fold(f64::NEG_INFINITY, f64::max);
            std::iter::once(ref_lnp)
                .chain(row.iter().map(|s| s.map_or(ref_lnp, |s| s.indel_lnp)))
                .collect()
        })
        .collect())
}
