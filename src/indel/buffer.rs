use std::cell::Cell;
use std::collections::BTreeMap;

use tracing::trace;

use crate::genomics::AlleleKey;
use crate::{CallerConfig, CallerError};

/// Stable handle to an allele record in the [`IndelCandidateBuffer`] arena.
///
/// Handles stay valid until the allele is evicted; a slot freed by eviction
/// may later be reused by a different allele.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlleleId(u32);

impl AlleleId {
    /// Raw slot index.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Natural-log likelihoods of one read under the reference and under the allele.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadPathScores {
    /// ln P(read | reference haplotype).
    pub ref_lnp: f64,
    /// ln P(read | allele haplotype).
    pub indel_lnp: f64,
}

impl ReadPathScores {
    /// Construct read scores.
    pub fn new(ref_lnp: f64, indel_lnp: f64) -> Self {
        Self { ref_lnp, indel_lnp }
    }

    /// Whether the read prefers the allele over the reference.
    pub fn supports_allele(&self) -> bool {
        self.indel_lnp > self.ref_lnp
    }
}

/// Read evidence for one allele in one sample, keyed by read id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlleleSampleSupport {
    /// Per-read path likelihoods.
    pub read_path_lnp: BTreeMap<u32, ReadPathScores>,
}

impl AlleleSampleSupport {
    /// Reads evaluated against the allele.
    pub fn read_count(&self) -> u32 {
        self.read_path_lnp.len() as u32
    }

    /// Reads preferring the allele over the reference.
    pub fn supporting_reads(&self) -> u32 {
        self.read_path_lnp
            .values()
            .filter(|scores| scores.supports_allele())
            .count() as u32
    }

    /// Ranking score: summed positive log-likelihood ratio of allele over reference.
    pub fn evidence_score(&self) -> f64 {
        self.read_path_lnp
            .values()
            .map(|scores| (scores.indel_lnp - scores.ref_lnp).max(0.0))
            .sum()
    }
}

/// Aggregated evidence and flags for one candidate allele.
#[derive(Debug, Clone)]
pub struct AlleleSupport {
    /// Must be reported whatever its genotype.
    pub is_forced_output: bool,
    is_candidate: Cell<Option<bool>>,
    samples: Vec<AlleleSampleSupport>,
}

impl AlleleSupport {
    fn new(sample_count: usize) -> Self {
        Self {
            is_forced_output: false,
            is_candidate: Cell::new(None),
            samples: vec![AlleleSampleSupport::default(); sample_count],
        }
    }

    /// Evidence for `sample`.
    pub fn sample(&self, sample: usize) -> Option<&AlleleSampleSupport> {
        self.samples.get(sample)
    }

    /// Evidence for every sample, in sample order.
    pub fn samples(&self) -> &[AlleleSampleSupport] {
        &self.samples
    }

    /// Whether any sample has at least one evaluated read.
    pub fn has_read_evidence(&self) -> bool {
        self.samples.iter().any(|s| !s.read_path_lnp.is_empty())
    }

    /// Cached result of the last candidacy test, cleared by new evidence.
    pub fn is_candidate(&self) -> Option<bool> {
        self.is_candidate.get()
    }
}

/// Arena slot contents.
#[derive(Debug, Clone)]
pub struct AlleleRecord {
    /// Allele identity.
    pub key: AlleleKey,
    /// Evidence gathered so far.
    pub support: AlleleSupport,
}

#[derive(Debug, Clone, Copy)]
struct CandidacyThresholds {
    min_reads: u32,
    min_read_frac: f64,
    max_depth: Option<f64>,
}

/// Position-ordered store of candidate indel alleles.
///
/// Records live in an arena addressed by [`AlleleId`]; a key index keeps
/// them in [`AlleleKey`] order for positional queries.
#[derive(Debug, Clone)]
pub struct IndelCandidateBuffer {
    slots: Vec<Option<AlleleRecord>>,
    free: Vec<u32>,
    index: BTreeMap<AlleleKey, AlleleId>,
    sample_count: usize,
    thresholds: CandidacyThresholds,
    largest_read_indel_span: u32,
}

impl IndelCandidateBuffer {
    /// Create an empty buffer using the candidacy thresholds in `config`.
    pub fn new(config: &CallerConfig) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: BTreeMap::new(),
            sample_count: config.sample_count,
            thresholds: CandidacyThresholds {
                min_reads: config.min_candidate_indel_reads,
                min_read_frac: config.min_candidate_indel_read_frac,
                max_depth: config.max_candidate_indel_depth,
            },
            largest_read_indel_span: 0,
        }
    }

    /// Number of samples tracked per allele.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Number of live alleles.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no allele is buffered.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn get_or_insert(&mut self, key: AlleleKey) -> AlleleId {
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        self.largest_read_indel_span = self.largest_read_indel_span.max(key.ref_span());
        let record = AlleleRecord {
            key: key.clone(),
            support: AlleleSupport::new(self.sample_count),
        };
        let id = match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(record);
                AlleleId(slot)
            }
            None => {
                self.slots.push(Some(record));
                AlleleId(self.slots.len() as u32 - 1)
            }
        };
        trace!(allele = %key, slot = id.0, "new indel candidate");
        self.index.insert(key, id);
        id
    }

    /// Record the likelihoods of one read for `key` in `sample`.
    ///
    /// The allele is created on its first observation.
    pub fn observe(
        &mut self,
        key: AlleleKey,
        sample: usize,
        read_id: u32,
        scores: ReadPathScores,
    ) -> Result<AlleleId, CallerError> {
        if sample >= self.sample_count {
            return Err(CallerError::SampleOutOfRange {
                sample,
                sample_count: self.sample_count,
            });
        }
        let id = self.get_or_insert(key);
        let record = self.record_mut(id)?;
        record.support.samples[sample]
            .read_path_lnp
            .insert(read_id, scores);
        record.support.is_candidate.set(None);
        Ok(id)
    }

    /// Register an allele that must be reported whatever its evidence.
    pub fn add_forced_allele(&mut self, key: AlleleKey) -> AlleleId {
        let id = self.get_or_insert(key);
        if let Some(Some(record)) = self.slots.get_mut(id.0 as usize) {
            record.support.is_forced_output = true;
        }
        id
    }

    /// Note the total indel reference span of one read; bounds look-ahead scans.
    pub fn note_read_indel_span(&mut self, span: u32) {
        self.largest_read_indel_span = self.largest_read_indel_span.max(span);
    }

    /// Largest total indel reference span of any read seen so far.
    pub fn largest_read_indel_span(&self) -> u32 {
        self.largest_read_indel_span
    }

    /// Handle for `key`, if buffered.
    pub fn id(&self, key: &AlleleKey) -> Option<AlleleId> {
        self.index.get(key).copied()
    }

    /// Record behind `id`.
    pub fn record(&self, id: AlleleId) -> Result<&AlleleRecord, CallerError> {
        self.slots
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(CallerError::UnknownAllele(id.0))
    }

    fn record_mut(&mut self, id: AlleleId) -> Result<&mut AlleleRecord, CallerError> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(CallerError::UnknownAllele(id.0))
    }

    /// Key behind `id`.
    pub fn key(&self, id: AlleleId) -> Result<&AlleleKey, CallerError> {
        self.record(id).map(|record| &record.key)
    }

    /// Alleles starting exactly at `pos`, in key order.
    pub fn position_iter(&self, pos: u32) -> impl Iterator<Item = (&AlleleKey, AlleleId)> + '_ {
        self.range_iter(pos, pos.saturating_add(1))
    }

    /// Alleles starting in `[begin, end)`, in key order.
    pub fn range_iter(&self, begin: u32, end: u32) -> impl Iterator<Item = (&AlleleKey, AlleleId)> + '_ {
        let end = end.max(begin);
        self.index
            .range(AlleleKey::lower_bound(begin)..AlleleKey::lower_bound(end))
            .map(|(key, &id)| (key, id))
    }

    /// Buffer-level candidacy test: enough supporting reads, at a high enough
    /// fraction of evaluated reads, and not above the depth cap.
    pub fn is_candidate(&self, id: AlleleId) -> Result<bool, CallerError> {
        let support = &self.record(id)?.support;
        if let Some(cached) = support.is_candidate.get() {
            return Ok(cached);
        }

        let (supporting, evaluated) = support.samples.iter().fold((0u32, 0u32), |acc, s| {
            (acc.0 + s.supporting_reads(), acc.1 + s.read_count())
        });
        let thresholds = &self.thresholds;
        let mut candidate = supporting >= thresholds.min_reads.max(1)
            && supporting as f64 >= thresholds.min_read_frac * evaluated as f64;
        if let Some(max_depth) = thresholds.max_depth {
            if max_depth > 0.0 && evaluated as f64 > max_depth {
                candidate = false;
            }
        }

        support.is_candidate.set(Some(candidate));
        Ok(candidate)
    }

    /// Whether the allele may enter an orthogonal group: forced alleles always
    /// may; others need read evidence and must pass [`Self::is_candidate`].
    pub fn is_eligible(&self, id: AlleleId) -> Result<bool, CallerError> {
        let record = self.record(id)?;
        if record.key.is_breakpoint() {
            return Ok(false);
        }
        if record.support.is_forced_output {
            return Ok(true);
        }
        if !record.support.has_read_evidence() {
            return Ok(false);
        }
        self.is_candidate(id)
    }

    /// Evict alleles whose whole reference span lies before `pos`.
    ///
    /// Returns the number of evicted alleles.
    pub fn evict_before(&mut self, pos: u32) -> usize {
        let expired: Vec<AlleleKey> = self
            .index
            .range(..AlleleKey::lower_bound(pos))
            .filter(|(key, _)| key.right_pos() < pos)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(id) = self.index.remove(key) {
                self.slots[id.0 as usize] = None;
                self.free.push(id.0);
            }
        }
        if !expired.is_empty() {
            trace!(pos, evicted = expired.len(), "evicted indel candidates");
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> IndelCandidateBuffer {
        IndelCandidateBuffer::new(&CallerConfig::default())
    }

    fn add_reads(buffer: &mut IndelCandidateBuffer, key: &AlleleKey, support: u32, total: u32) {
        for read in 0..total {
            let scores = if read < support {
                ReadPathScores::new(-5.0, -0.01)
            } else {
                ReadPathScores::new(-0.01, -5.0)
            };
            buffer.observe(key.clone(), 0, read, scores).unwrap();
        }
    }

    #[test]
    fn position_iter_returns_alleles_at_position_only() {
        let mut buffer = buffer();
        add_reads(&mut buffer, &AlleleKey::deletion(10, 2), 3, 5);
        add_reads(&mut buffer, &AlleleKey::insertion(10, b"AC"), 3, 5);
        add_reads(&mut buffer, &AlleleKey::deletion(11, 1), 3, 5);

        let at_ten: Vec<_> = buffer.position_iter(10).map(|(k, _)| k.clone()).collect();
        assert_eq!(at_ten.len(), 2);
        assert!(at_ten.iter().all(|k| k.pos == 10));
        assert_eq!(buffer.range_iter(9, 12).count(), 3);
        assert_eq!(buffer.largest_read_indel_span(), 2);
    }

    #[test]
    fn candidacy_requires_support_and_fraction() {
        let mut buffer = buffer();
        let strong = AlleleKey::deletion(5, 1);
        let weak = AlleleKey::deletion(8, 1);
        add_reads(&mut buffer, &strong, 4, 10);
        add_reads(&mut buffer, &weak, 1, 10);

        let strong_id = buffer.id(&strong).unwrap();
        let weak_id = buffer.id(&weak).unwrap();
        assert!(buffer.is_candidate(strong_id).unwrap());
        assert!(!buffer.is_candidate(weak_id).unwrap());

        // new evidence clears the cached verdict
        buffer
            .observe(weak.clone(), 0, 99, ReadPathScores::new(-6.0, -0.1))
            .unwrap();
        assert_eq!(buffer.record(weak_id).unwrap().support.is_candidate(), None);
        assert!(buffer.is_candidate(weak_id).unwrap());
    }

    #[test]
    fn forced_alleles_are_eligible_without_evidence() {
        let mut buffer = buffer();
        let id = buffer.add_forced_allele(AlleleKey::insertion(20, b"T"));
        assert!(buffer.is_eligible(id).unwrap());
        let bp = buffer.add_forced_allele(AlleleKey::breakpoint(21));
        assert!(!buffer.is_eligible(bp).unwrap());
    }

    #[test]
    fn eviction_waits_for_full_span_and_reuses_slots() {
        let mut buffer = buffer();
        let long = AlleleKey::deletion(10, 5);
        let short = AlleleKey::deletion(11, 1);
        add_reads(&mut buffer, &long, 2, 2);
        add_reads(&mut buffer, &short, 2, 2);
        let long_id = buffer.id(&long).unwrap();

        assert_eq!(buffer.evict_before(13), 1);
        assert!(buffer.id(&short).is_none());
        assert_eq!(buffer.id(&long), Some(long_id));

        assert_eq!(buffer.evict_before(16), 1);
        assert!(buffer.is_empty());
        assert!(matches!(
            buffer.record(long_id),
            Err(CallerError::UnknownAllele(_))
        ));

        let reused = buffer.add_forced_allele(AlleleKey::deletion(30, 1));
        assert!(reused == long_id || reused.index() < 2);
    }
}
