use tracing::{debug, trace};

use crate::genotype::GenotypeCall;
use crate::pipeline::{Filter, IndelRecord, SiteOverlap, SiteRecord, VariantStage};
use crate::CallerError;

/// What the resolver is currently holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    /// No indel cluster open; at most the latest site is held back in case
    /// an indel starting at the same position follows.
    AccumulatingSites,
    /// An indel cluster is open; indels overlapping it and sites inside its
    /// span are withheld.
    AccumulatingIndels,
    /// Buffered records are being resolved and forwarded.
    Draining,
}

/// Merges overlapping indel and site records so that every reference range
/// leaves the stage exactly once.
///
/// Sites inside a single variant indel are re-genotyped against the indel's
/// per-base ploidy; sites and indels in a region with several variant
/// indels are marked as conflicting.
#[derive(Debug)]
pub struct OverlapResolver<N> {
    next: N,
    state: ResolverState,
    pending_site: Option<SiteRecord>,
    indels: Vec<IndelRecord>,
    sites: Vec<SiteRecord>,
    indel_end: u32,
}

impl<N: VariantStage> OverlapResolver<N> {
    /// Resolver in front of `next`.
    pub fn new(next: N) -> Self {
        Self {
            next,
            state: ResolverState::AccumulatingSites,
            pending_site: None,
            indels: Vec::new(),
            sites: Vec::new(),
            indel_end: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> ResolverState {
        self.state
    }

    /// Borrow the downstream stage.
    pub fn next(&self) -> &N {
        &self.next
    }

    /// Consume the resolver, returning the downstream stage.
    pub fn into_next(self) -> N {
        self.next
    }

    fn forward_pending(&mut self) -> Result<(), CallerError> {
        match self.pending_site.take() {
            Some(site) => self.next.process_site(site),
            None => Ok(()),
        }
    }

    fn drain(&mut self) -> Result<(), CallerError> {
        if self.indels.is_empty() {
            debug_assert!(self.sites.is_empty());
            self.state = ResolverState::AccumulatingSites;
            return Ok(());
        }
        self.state = ResolverState::Draining;

        let mut indels = std::mem::take(&mut self.indels);
        let mut sites = std::mem::take(&mut self.sites);
        let variant: Vec<usize> = indels
            .iter()
            .enumerate()
            .filter(|(_, indel)| indel.is_variant())
            .map(|(i, _)| i)
            .collect();

        if let Some(anchor) = indels.first().map(IndelRecord::pos) {
            let dpi = sites.iter().find(|s| s.pos >= anchor).map(SiteRecord::depth);
            for indel in indels.iter_mut() {
                indel.sample.dpi = sites
                    .iter()
                    .find(|s| s.pos >= indel.pos())
                    .map(SiteRecord::depth)
                    .or(dpi);
            }
        }

        match variant.len() {
            0 => {}
            1 => {
                let indel = &indels[variant[0]];
                for site in sites.iter_mut() {
                    modify_overlapping_site(indel, site);
                }
            }
            n => {
                debug!(
                    pos = indels[0].pos(),
                    end = self.indel_end,
                    indels = n,
                    sites = sites.len(),
                    "conflicting indel cluster"
                );
                for site in sites.iter_mut() {
                    mark_conflict_site(site);
                }
                for indel in indels.iter_mut() {
                    indel.filters.insert(Filter::IndelConflict);
                }
            }
        }

        // an indel is anchored on the base before it, so it precedes the
        // site at its own position
        let mut sites = sites.into_iter().peekable();
        for indel in indels {
            while let Some(site) = sites.next_if(|s| s.pos < indel.pos()) {
                self.next.process_site(site)?;
            }
            self.next.process_indel(indel)?;
        }
        for site in sites {
            self.next.process_site(site)?;
        }

        self.state = ResolverState::AccumulatingSites;
        Ok(())
    }
}

/// Re-genotype a site lying inside the deleted span of a single variant indel.
fn modify_overlapping_site(indel: &IndelRecord, site: &mut SiteRecord) {
    let Some(offset) = site.pos.checked_sub(indel.range.start) else {
        return;
    };
    let Some(&ploidy) = indel.sample.site_ploidy.get(offset as usize) else {
        return;
    };
    let covered = indel
        .alleles
        .iter()
        .any(|allele| allele.deleted_range().contains(&site.pos));
    if !covered {
        return;
    }

    // distinct called alleles deleting this base
    let mut deleting: Vec<u8> = indel
        .sample
        .genotype
        .alleles()
        .into_iter()
        .filter(|&a| {
            a > 0
                && indel
                    .alleles
                    .get(usize::from(a) - 1)
                    .is_some_and(|allele| allele.deleted_range().contains(&site.pos))
        })
        .collect();
    deleting.sort_unstable();
    deleting.dedup();
    if deleting.len() > 1 {
        trace!(pos = site.pos, "site inside two called deletions");
        mark_conflict_site(site);
        return;
    }

    site.filters.merge(&indel.filters);
    site.sample.gq = site.sample.gq.min(indel.sample.gq);
    site.sample.gqx = site.sample.gqx.min(indel.sample.gqx);
    site.overlap = Some(SiteOverlap::IndelOverlap);
    site.sample.ploidy = Some(ploidy);

    match ploidy {
        0 => {
            if site.is_variant() {
                site.filters.insert(Filter::SiteConflict);
            }
            site.sample.genotype = GenotypeCall::NoCall;
        }
        1 => match site.sample.genotype {
            GenotypeCall::Diploid(a, b) if a == b => site.sample.genotype = GenotypeCall::Haploid(a),
            GenotypeCall::Diploid(..) => site.filters.insert(Filter::SiteConflict),
            _ => {}
        },
        _ => {}
    }
    trace!(pos = site.pos, ploidy, genotype = %site.sample.genotype, "site inside indel");
}

fn mark_conflict_site(site: &mut SiteRecord) {
    site.filters.insert(Filter::IndelConflict);
    site.sample.genotype = GenotypeCall::NoCall;
    site.overlap = Some(SiteOverlap::IndelConflict);
}

impl<N: VariantStage> VariantStage for OverlapResolver<N> {
    fn process_site(&mut self, site: SiteRecord) -> Result<(), CallerError> {
        if !self.indels.is_empty() && site.pos < self.indel_end {
            trace!(pos = site.pos, end = self.indel_end, "withholding site");
            self.sites.push(site);
            return Ok(());
        }
        self.drain()?;
        self.forward_pending()?;
        self.pending_site = Some(site);
        Ok(())
    }

    fn process_indel(&mut self, indel: IndelRecord) -> Result<(), CallerError> {
        if !self.indels.is_empty() && indel.pos() < self.indel_end {
            self.indel_end = self.indel_end.max(indel.claimed_end());
            self.indels.push(indel);
            return Ok(());
        }

        self.drain()?;
        match self.pending_site.take() {
            Some(site) if site.pos >= indel.pos() => self.sites.push(site),
            Some(site) => self.next.process_site(site)?,
            None => {}
        }
        self.indel_end = indel.claimed_end();
        self.indels.push(indel);
        self.state = ResolverState::AccumulatingIndels;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CallerError> {
        self.drain()?;
        self.forward_pending()?;
        self.next.flush()
    }
}
