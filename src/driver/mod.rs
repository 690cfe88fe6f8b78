//! Position-ordered streaming driver.
//!
//! The driver walks the reference once, in strictly increasing position
//! order. At each position it runs the SNP path and then the indel path for
//! the configured [`CallingMode`], hands the resulting records to a
//! [`VariantStage`], and evicts buffered state the walk has passed.

mod forced;

pub use forced::ForcedOutputTracker;

use std::fmt;
use std::io::Write;
use std::ops::Range;

use tracing::{debug, error, trace, warn};

use crate::genomics::{
    base_index, check_ploidy, index_base, AlleleKey, CleanedPileup, PileupBuffer, PileupColumn,
    PloidyMap, ReferenceSegment, N_BASE,
};
use crate::genotype::{continuous_quality, strand_bias, GenotypeCall, GenotypeLikelihoodEngine, GenotypeLikelihoods};
use crate::indel::{
    AlleleCandidateGroup, AlleleId, GroupPloidy, IndelCandidateBuffer, OrthogonalAlleleSelector,
};
use crate::pipeline::{
    FilterSet, IndelRecord, IndelSampleCall, SiteRecord, SiteSampleCall, VariantStage,
};
use crate::{CallerConfig, CallerError, CallingMode};

/// Sample whose genotypes are reported.
const REPORTED_SAMPLE: usize = 0;

/// Per-observation error probability for continuous-mode indel qualities.
const CONTINUOUS_INDEL_ERROR_PROB: f64 = 5e-3;

/// Mutable state of one calling run: candidate indels, forced-output
/// bookkeeping and pending pileups.
#[derive(Debug, Clone)]
pub struct CallingSession {
    pub(crate) indel_buffer: IndelCandidateBuffer,
    pub(crate) forced: ForcedOutputTracker,
    pub(crate) pileups: PileupBuffer,
}

impl CallingSession {
    /// Empty session sized for `config.sample_count` samples.
    pub fn new(config: &CallerConfig) -> Self {
        Self {
            indel_buffer: IndelCandidateBuffer::new(config),
            forced: ForcedOutputTracker::new(),
            pileups: PileupBuffer::new(config.sample_count),
        }
    }

    /// Candidate indel alleles.
    pub fn indel_buffer(&self) -> &IndelCandidateBuffer {
        &self.indel_buffer
    }

    /// Mutable access for loading indel evidence.
    pub fn indel_buffer_mut(&mut self) -> &mut IndelCandidateBuffer {
        &mut self.indel_buffer
    }

    /// Forced-output state.
    pub fn forced(&self) -> &ForcedOutputTracker {
        &self.forced
    }

    /// Pending pileups.
    pub fn pileups(&self) -> &PileupBuffer {
        &self.pileups
    }

    /// Mutable access for loading pileups.
    pub fn pileups_mut(&mut self) -> &mut PileupBuffer {
        &mut self.pileups
    }

    /// Require an indel allele in the output whatever its evidence.
    pub fn add_forced_allele(&mut self, key: AlleleKey) -> AlleleId {
        self.indel_buffer.add_forced_allele(key)
    }

    /// Require a site record at `pos`.
    pub fn add_forced_site(&mut self, pos: u32) {
        self.forced.add_forced_position(pos);
    }
}

/// Streams positions through the SNP and indel calling paths.
pub struct StreamDriver<P: PloidyMap> {
    config: CallerConfig,
    reference: ReferenceSegment,
    ploidy: P,
    session: CallingSession,
    engine: GenotypeLikelihoodEngine,
    counts: Option<Box<dyn Write>>,
    last_pos: Option<u32>,
    traversal_hold: bool,
    in_zero_ploidy: bool,
}

impl<P: PloidyMap> fmt::Debug for StreamDriver<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDriver")
            .field("config", &self.config)
            .field("chrom", self.reference.chrom())
            .field("session", &self.session)
            .field("counts", &self.counts.is_some())
            .field("last_pos", &self.last_pos)
            .field("traversal_hold", &self.traversal_hold)
            .finish()
    }
}

impl<P: PloidyMap> StreamDriver<P> {
    /// Create a driver after validating `config`.
    pub fn new(config: CallerConfig, reference: ReferenceSegment, ploidy: P) -> Result<Self, CallerError> {
        config.validate()?;
        let session = CallingSession::new(&config);
        let engine = GenotypeLikelihoodEngine::new(&config);
        Ok(Self {
            config,
            reference,
            ploidy,
            session,
            engine,
            counts: None,
            last_pos: None,
            traversal_hold: false,
            in_zero_ploidy: false,
        })
    }

    /// Write per-position base counts to `writer`.
    pub fn with_counts_writer(mut self, writer: impl Write + 'static) -> Self {
        self.counts = Some(Box::new(writer));
        self
    }

    /// Session state.
    pub fn session(&self) -> &CallingSession {
        &self.session
    }

    /// Mutable session state, for loading evidence ahead of the walk.
    pub fn session_mut(&mut self) -> &mut CallingSession {
        &mut self.session
    }

    /// Reference window being called.
    pub fn reference(&self) -> &ReferenceSegment {
        &self.reference
    }

    /// While set, positions without coverage still produce site records.
    pub fn set_traversal_hold(&mut self, hold: bool) {
        self.traversal_hold = hold;
    }

    /// Process every position of `range`, then flush `stage`.
    pub fn run<S: VariantStage>(&mut self, range: Range<u32>, stage: &mut S) -> Result<(), CallerError> {
        debug!(chrom = %self.reference.chrom(), start = range.start, end = range.end, "calling region");
        for pos in range {
            self.process_position(pos, stage)?;
        }
        self.finish(stage)
    }

    /// Flush everything still held by the pipeline.
    pub fn finish<S: VariantStage>(&mut self, stage: &mut S) -> Result<(), CallerError> {
        if let Some(counts) = self.counts.as_mut() {
            counts.flush()?;
        }
        stage.flush()
    }

    /// Call one position. Positions must be strictly increasing.
    pub fn process_position<S: VariantStage>(&mut self, pos: u32, stage: &mut S) -> Result<(), CallerError> {
        if let Some(last) = self.last_pos {
            if pos <= last {
                return Err(CallerError::PositionOrder { pos, last });
            }
        }
        self.last_pos = Some(pos);
        self.session.forced.prune_below(pos);

        let zero_ploidy =
            self.config.mode == CallingMode::Diploid && self.ploidy.ploidy(REPORTED_SAMPLE, pos) == 0;
        if zero_ploidy && !self.in_zero_ploidy {
            warn!(
                pos,
                chrom = %self.reference.chrom(),
                "entering zero-ploidy region, genotyping as diploid and reporting no-calls"
            );
        }
        self.in_zero_ploidy = zero_ploidy;

        if let Err(err) = self.process_variants(pos, stage) {
            error!(
                pos,
                chrom = %self.reference.chrom(),
                pileup = ?self.session.pileups.column(REPORTED_SAMPLE, pos),
                error = %err,
                "failed to process position"
            );
            return Err(err);
        }

        let evicted = self.session.indel_buffer.evict_before(pos);
        self.session.pileups.evict_before(pos.saturating_add(1));
        trace!(pos, evicted, "position done");
        Ok(())
    }

    fn process_variants<S: VariantStage>(&mut self, pos: u32, stage: &mut S) -> Result<(), CallerError> {
        self.process_snp(pos, stage)?;
        match self.config.mode {
            CallingMode::Diploid => self.process_indel_diploid(pos, stage),
            CallingMode::Continuous => self.process_indel_continuous(pos, stage),
        }
    }

    fn process_snp<S: VariantStage>(&mut self, pos: u32, stage: &mut S) -> Result<(), CallerError> {
        let is_forced = self.session.forced.is_forced_position(pos);
        let ref_base = self.reference.base(pos);
        let raw = self
            .session
            .pileups
            .column(REPORTED_SAMPLE, pos)
            .cloned()
            .unwrap_or_else(|| PileupColumn::new(pos, ref_base));
        if raw.is_empty() && !is_forced && !self.traversal_hold {
            return Ok(());
        }

        let mut cleaned = CleanedPileup::clean(&raw, self.config.min_base_quality, self.config.min_mapq);
        cleaned.ref_base = ref_base;
        if let Some(counts) = self.counts.as_mut() {
            cleaned.write_counts(counts.as_mut())?;
        }

        match self.config.mode {
            CallingMode::Diploid => self.snp_diploid(&cleaned, is_forced, stage),
            CallingMode::Continuous => self.snp_continuous(&cleaned, is_forced, stage),
        }
    }

    fn site_record(&self, cleaned: &CleanedPileup, is_forced: bool, sample: SiteSampleCall) -> SiteRecord {
        SiteRecord {
            pos: cleaned.position,
            ref_base: cleaned.ref_base,
            alt_bases: Vec::new(),
            qual: 0,
            n_used_calls: cleaned.n_used(),
            n_unused_calls: cleaned.n_unused,
            hpol: self.reference.homopolymer_len(cleaned.position),
            strand_bias: None,
            is_forced_output: is_forced,
            filters: FilterSet::new(),
            overlap: None,
            sample,
        }
    }

    fn snp_diploid<S: VariantStage>(
        &self,
        cleaned: &CleanedPileup,
        is_forced: bool,
        stage: &mut S,
    ) -> Result<(), CallerError> {
        let pos = cleaned.position;
        let reported = check_ploidy(self.ploidy.ploidy(REPORTED_SAMPLE, pos))?;
        let caller_ploidy = if reported == 0 { 2 } else { reported };
        let Some(site) = self.engine.compute_site(cleaned, caller_ploidy)? else {
            // ambiguous reference base
            if is_forced {
                let record = self.site_record(
                    cleaned,
                    is_forced,
                    SiteSampleCall {
                        ploidy: Some(reported),
                        genotype: GenotypeCall::NoCall,
                        gq: 0,
                        gqx: 0,
                        allele_depths: vec![0],
                    },
                );
                stage.process_site(record)?;
            }
            return Ok(());
        };
        let call = site.call()?;

        // report only the alternates present in the call
        let mut remap = [0u8; 3];
        let mut alt_bases = Vec::new();
        let mut allele_depths = vec![site.allele_depths[0]];
        for allele in 1..site.alleles.len() {
            if call.contains(allele as u8) {
                alt_bases.push(site.alleles[allele]);
                allele_depths.push(site.allele_depths[allele]);
                remap[allele] = alt_bases.len() as u8;
            }
        }
        let called = call.remap(|a| remap[a as usize]);
        let genotype = if reported == 0 { GenotypeCall::NoCall } else { called };

        let mut record = self.site_record(
            cleaned,
            is_forced,
            SiteSampleCall {
                ploidy: Some(reported),
                genotype,
                gq: site.likelihoods.gq,
                gqx: site.gqx()?,
                allele_depths,
            },
        );
        if let Some(&alt) = alt_bases.first() {
            let copies = called.alleles().iter().filter(|&&a| a == 1).count();
            let alt_freq = copies as f64 / f64::from(called.ploidy().max(1));
            record.strand_bias = Some(strand_bias(cleaned, alt, alt_freq));
        }
        record.alt_bases = alt_bases;
        record.qual = site.likelihoods.qual;
        if record.is_variant() {
            debug!(pos, genotype = %record.sample.genotype, qual = record.qual, "variant site");
        }
        stage.process_site(record)
    }

    fn snp_continuous<S: VariantStage>(
        &self,
        cleaned: &CleanedPileup,
        is_forced: bool,
        stage: &mut S,
    ) -> Result<(), CallerError> {
        let Some(ref_idx) = base_index(cleaned.ref_base) else {
            return Ok(());
        };
        let counts = cleaned.base_counts();
        let depth = cleaned.n_used();
        let error_prob = cleaned.mean_error_prob() / 3.0;
        let cap = self.config.max_genotype_quality;

        let mut emitted = false;
        for alt_idx in (0..N_BASE).filter(|&i| i != ref_idx) {
            let alt_count = counts[alt_idx];
            if alt_count == 0 {
                continue;
            }
            let vf = alt_count as f64 / depth as f64;
            if vf < self.config.min_het_vf && !is_forced {
                continue;
            }
            let qual = continuous_quality(alt_count, depth, error_prob, cap);
            let mut record = self.site_record(
                cleaned,
                is_forced,
                SiteSampleCall {
                    ploidy: None,
                    genotype: GenotypeCall::from_frequency(vf, self.config.min_het_vf),
                    gq: qual,
                    gqx: qual,
                    allele_depths: vec![counts[ref_idx], alt_count],
                },
            );
            record.alt_bases = vec![index_base(alt_idx)];
            record.qual = qual;
            record.strand_bias = Some(strand_bias(cleaned, index_base(alt_idx), vf));
            stage.process_site(record)?;
            emitted = true;
        }

        if !emitted && is_forced {
            let ref_quality = continuous_quality(counts[ref_idx], depth, error_prob, cap);
            let record = self.site_record(
                cleaned,
                is_forced,
                SiteSampleCall {
                    ploidy: None,
                    genotype: GenotypeCall::Diploid(0, 0),
                    gq: ref_quality,
                    gqx: ref_quality,
                    allele_depths: vec![counts[ref_idx]],
                },
            );
            stage.process_site(record)?;
        }
        Ok(())
    }

    fn process_indel_diploid<S: VariantStage>(&mut self, pos: u32, stage: &mut S) -> Result<(), CallerError> {
        let CallingSession {
            indel_buffer, forced, ..
        } = &mut self.session;
        let buffer: &IndelCandidateBuffer = indel_buffer;
        let selector = OrthogonalAlleleSelector::new(buffer, &self.ploidy, self.config.max_extension_rounds);
        let Some(selection) = selector.select(pos)? else {
            return Ok(());
        };
        let sample = REPORTED_SAMPLE;

        if selection.is_reportable {
            let ploidy = selector.group_ploidy(&selection.top)?;
            let gl = self
                .engine
                .compute_likelihoods(buffer, &selection.top, ploidy.caller[sample], sample)?;
            // forced alleles can join the top group from a later start
            let mut top_forced = Vec::new();
            for &id in selection.top.ids() {
                if buffer.record(id)?.support.is_forced_output {
                    top_forced.push(id);
                }
            }
            let has_forced = !top_forced.is_empty();
            if gl.call()?.is_variant() || has_forced {
                let record = indel_record(&self.engine, buffer, &selection.top, &gl, &ploidy, has_forced)?;
                debug!(
                    pos,
                    alleles = record.alleles.len(),
                    genotype = %record.sample.genotype,
                    qual = record.qual,
                    "indel call"
                );
                stage.process_indel(record)?;
                for id in top_forced {
                    forced.mark_emitted(buffer.key(id)?.clone());
                }
            }
        }

        for &id in selection.forced.ids() {
            let key = buffer.key(id)?;
            if forced.is_emitted(key) {
                continue;
            }
            let single = AlleleCandidateGroup::single(id);
            let ploidy = selector.group_ploidy(&single)?;
            let gl = self
                .engine
                .score_forced(buffer, &selection.top, id, ploidy.caller[sample], sample)?;
            let record = indel_record(&self.engine, buffer, &single, &gl, &ploidy, true)?;
            trace!(allele = %key, genotype = %record.sample.genotype, "forced indel output");
            stage.process_indel(record)?;
            forced.mark_emitted(key.clone());
        }
        Ok(())
    }

    fn process_indel_continuous<S: VariantStage>(&mut self, pos: u32, stage: &mut S) -> Result<(), CallerError> {
        let CallingSession {
            indel_buffer, forced, ..
        } = &mut self.session;
        let buffer: &IndelCandidateBuffer = indel_buffer;
        let sample = REPORTED_SAMPLE;
        let ids: Vec<AlleleId> = buffer.position_iter(pos).map(|(_, id)| id).collect();

        for id in ids {
            if !buffer.is_eligible(id)? {
                continue;
            }
            let record = buffer.record(id)?;
            let is_forced = record.support.is_forced_output;
            let group = AlleleCandidateGroup::single(id);
            let support = self.engine.supporting_reads(buffer, &group, sample)?;
            let alt_count = support.alt_counts.first().copied().unwrap_or(0);
            if alt_count == 0 && !is_forced {
                continue;
            }

            let total = support.total();
            let vf = if total > 0 { alt_count as f64 / total as f64 } else { 0.0 };
            let qual = continuous_quality(
                alt_count,
                total,
                CONTINUOUS_INDEL_ERROR_PROB,
                self.config.max_genotype_quality,
            );
            let indel = IndelRecord {
                range: record.key.deleted_range(),
                alleles: vec![record.key.clone()],
                qual,
                is_forced_output: is_forced,
                filters: FilterSet::new(),
                sample: IndelSampleCall {
                    ploidy: None,
                    genotype: GenotypeCall::from_frequency(vf, self.config.min_het_vf),
                    gq: qual,
                    gq_polymorphic: qual,
                    gqx: qual,
                    support,
                    ..IndelSampleCall::default()
                },
            };
            stage.process_indel(indel)?;
            if is_forced {
                forced.mark_emitted(record.key.clone());
            }
        }
        Ok(())
    }
}

/// Diploid-mode record for `group` from its likelihoods.
fn indel_record(
    engine: &GenotypeLikelihoodEngine,
    buffer: &IndelCandidateBuffer,
    group: &AlleleCandidateGroup,
    gl: &GenotypeLikelihoods,
    ploidy: &GroupPloidy,
    is_forced_output: bool,
) -> Result<IndelRecord, CallerError> {
    let sample = REPORTED_SAMPLE;
    let call = gl.call()?;
    let reported = ploidy.reported[sample];
    let genotype = if reported == 0 { GenotypeCall::NoCall } else { call };

    Ok(IndelRecord {
        range: group.reference_range(buffer)?,
        alleles: group.keys(buffer)?.into_iter().cloned().collect(),
        qual: gl.qual,
        is_forced_output,
        filters: FilterSet::new(),
        sample: IndelSampleCall {
            ploidy: Some(reported),
            is_ploidy_conflict: ploidy.conflict[sample],
            genotype,
            phred_loghood: gl.phred_loghood.clone(),
            gq: gl.gq,
            gq_polymorphic: gl.gq_polymorphic,
            gqx: gl.gqx(),
            support: engine.supporting_reads(buffer, group, sample)?,
            site_ploidy: engine.site_ploidy(buffer, group, &call, reported)?,
            dpi: None,
        },
    })
}
