use crate::genomics::{base_index, index_base, CleanedPileup, StrandCounts, N_BASE};
use crate::genotype::{error_prob_to_phred, log_sum_exp, GenotypeCall, GenotypeLikelihoodEngine, GenotypeLikelihoods};
use crate::CallerError;

/// Alleles genotyped at a site: the reference and the two best-supported alternates.
pub const SITE_ALLELE_COUNT: usize = 3;

/// Posterior over `{ref, alt0, alt1}` at one site.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteCall {
    /// Bases in allele order; `alleles[0]` is the reference.
    pub alleles: [u8; SITE_ALLELE_COUNT],
    /// Cleaned calls observed for each allele.
    pub allele_depths: [u32; SITE_ALLELE_COUNT],
    /// Genotype likelihoods over the three alleles.
    pub likelihoods: GenotypeLikelihoods,
}

impl SiteCall {
    /// Most probable genotype.
    pub fn call(&self) -> Result<GenotypeCall, CallerError> {
        self.likelihoods.call()
    }

    /// Site GQX: GQ for a reference call, otherwise the smaller of GQ and QUAL.
    pub fn gqx(&self) -> Result<u32, CallerError> {
        let gl = &self.likelihoods;
        Ok(if self.call()?.is_variant() {
            gl.gq.min(gl.qual)
        } else {
            gl.gq
        })
    }
}

impl GenotypeLikelihoodEngine {
    /// SNV genotype posterior of one cleaned pileup.
    ///
    /// Returns `None` when the reference base is ambiguous.
    pub fn compute_site(&self, pileup: &CleanedPileup, ploidy: u8) -> Result<Option<SiteCall>, CallerError> {
        let Some(ref_idx) = base_index(pileup.ref_base) else {
            return Ok(None);
        };
        let counts = pileup.base_counts();

        let mut alts: Vec<usize> = (0..N_BASE).filter(|&i| i != ref_idx).collect();
        alts.sort_by(|&a, &b| counts[b].cmp(&counts[a]).then(a.cmp(&b)));
        let order = [ref_idx, alts[0], alts[1]];

        let rows: Vec<Vec<f64>> = pileup
            .used
            .iter()
            .filter_map(|call| {
                let observed = base_index(call.base)?;
                let error = call.error_prob();
                let matched = (1.0 - error).ln();
                let mismatched = (error / 3.0).ln();
                Some(
                    order
                        .iter()
                        .map(|&allele| if allele == observed { matched } else { mismatched })
                        .collect(),
                )
            })
            .collect();

        let likelihoods = self.evaluate(&rows, ploidy, SITE_ALLELE_COUNT, self.snp_theta)?;
        Ok(Some(SiteCall {
            alleles: order.map(index_base),
            allele_depths: order.map(|i| counts[i]),
            likelihoods,
        }))
    }
}

/// Allele-frequency quality: phred-scaled probability of seeing at least
/// `alt_count` of `depth` observations of one allele when each observation
/// is produced by error with probability `error_prob`.
pub fn continuous_quality(alt_count: u32, depth: u32, error_prob: f64, cap: u32) -> u32 {
    if alt_count == 0 || depth == 0 {
        return 0;
    }
    let p = error_prob.clamp(1e-6, 0.25);
    let (ln_p, ln_q) = (p.ln(), (1.0 - p).ln());

    // ln binomial pmf, built term by term from k = 0
    let mut term = depth as f64 * ln_q;
    let mut tail = Vec::with_capacity(depth.saturating_sub(alt_count) as usize + 1);
    for k in 0..=depth {
        if k > 0 {
            term += ((depth - k + 1) as f64 / k as f64).ln() + ln_p - ln_q;
        }
        if k >= alt_count {
            tail.push(term);
        }
    }
    error_prob_to_phred(log_sum_exp(tail).exp(), cap)
}

/// SNV strand bias (SNVSB) of `alt` called at frequency `alt_freq`.
///
/// Natural-log likelihood ratio of the best single-strand model, where the
/// alternate is real on one strand and error on the other, against the model
/// where it is real on both. Balanced evidence scores below zero.
pub fn strand_bias(pileup: &CleanedPileup, alt: u8, alt_freq: f64) -> f64 {
    let error = pileup.mean_error_prob().clamp(1e-6, 0.75);
    let noise = error / 3.0;
    let f = alt_freq.clamp(0.0, 1.0);
    let signal = (f * (1.0 - error) + (1.0 - f) * noise).clamp(noise, 1.0 - 1e-9);
    let ln_lik = |strand: &StrandCounts, p: f64| {
        strand.matching as f64 * p.ln() + (strand.total - strand.matching) as f64 * (1.0 - p).ln()
    };

    let [fwd, rev] = pileup.strand_counts(alt);
    let both = ln_lik(&fwd, signal) + ln_lik(&rev, signal);
    let fwd_only = ln_lik(&fwd, signal) + ln_lik(&rev, noise);
    let rev_only = ln_lik(&fwd, noise) + ln_lik(&rev, signal);
    fwd_only.max(rev_only) - both
}
