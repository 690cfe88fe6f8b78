use std::cmp::Ordering;
use std::ops::Range;

use tracing::{debug, trace};

use crate::genomics::{check_ploidy, AlleleKey, PloidyMap};
use crate::indel::{AlleleId, IndelCandidateBuffer};
use crate::CallerError;

/// Ordered set of mutually orthogonal alleles considered at one genotyping step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlleleCandidateGroup {
    alleles: Vec<AlleleId>,
}

impl AlleleCandidateGroup {
    /// Empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Group holding exactly `id`.
    pub fn single(id: AlleleId) -> Self {
        Self { alleles: vec![id] }
    }

    /// Append an allele unless already present.
    pub fn push(&mut self, id: AlleleId) {
        if !self.contains(id) {
            self.alleles.push(id);
        }
    }

    /// Remove the allele at `index`.
    pub fn remove(&mut self, index: usize) -> AlleleId {
        self.alleles.remove(index)
    }

    /// Number of alleles.
    pub fn len(&self) -> usize {
        self.alleles.len()
    }

    /// Whether the group is empty.
    pub fn is_empty(&self) -> bool {
        self.alleles.is_empty()
    }

    /// Whether `id` is a member.
    pub fn contains(&self, id: AlleleId) -> bool {
        self.alleles.contains(&id)
    }

    /// Member handles in group order.
    pub fn ids(&self) -> &[AlleleId] {
        &self.alleles
    }

    /// Member keys in group order.
    pub fn keys<'a>(&self, buffer: &'a IndelCandidateBuffer) -> Result<Vec<&'a AlleleKey>, CallerError> {
        self.alleles.iter().map(|&id| buffer.key(id)).collect()
    }

    /// Reference range covered by the group: leftmost start to rightmost end.
    pub fn reference_range(&self, buffer: &IndelCandidateBuffer) -> Result<Range<u32>, CallerError> {
        let mut range: Option<Range<u32>> = None;
        for &id in &self.alleles {
            let key = buffer.key(id)?;
            range = Some(match range {
                None => key.pos..key.right_pos(),
                Some(r) => r.start.min(key.pos)..r.end.max(key.right_pos()),
            });
        }
        Ok(range.unwrap_or(0..0))
    }

    /// Whether every pair of members conflicts (the group is a clique).
    pub fn is_clique(&self, buffer: &IndelCandidateBuffer) -> Result<bool, CallerError> {
        let keys = self.keys(buffer)?;
        Ok(keys
            .iter()
            .enumerate()
            .all(|(i, a)| keys[i + 1..].iter().all(|b| a.conflicts_with(b))))
    }

    fn sort_by_key(&mut self, buffer: &IndelCandidateBuffer) -> Result<(), CallerError> {
        let mut keyed = self
            .alleles
            .iter()
            .map(|&id| buffer.key(id).map(|key| (key, id)))
            .collect::<Result<Vec<_>, _>>()?;
        keyed.sort_by(|a, b| a.0.cmp(b.0));
        self.alleles = keyed.into_iter().map(|(_, id)| id).collect();
        Ok(())
    }
}

/// Per-sample ploidy of an allele group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPloidy {
    /// Ploidy as found in the ploidy map (0 = no-call region).
    pub reported: Vec<u8>,
    /// Ploidy used for computation (0 replaced by 2).
    pub caller: Vec<u8>,
    /// Whether the group spans a ploidy change or a no-call region.
    pub conflict: Vec<bool>,
}

/// Outcome of selecting alleles at one position.
#[derive(Debug, Clone)]
pub struct AlleleSelection {
    /// Eligible alleles starting at the position.
    pub orthogonal: AlleleCandidateGroup,
    /// Forced-output alleles among them.
    pub forced: AlleleCandidateGroup,
    /// Best jointly genotypable clique after extension.
    pub top: AlleleCandidateGroup,
    /// Ploidy over the span of the position's alleles.
    pub ploidy: GroupPloidy,
    /// Whether the top group should be reported from this position.
    pub is_reportable: bool,
}

/// Builds the conflict clique of indel alleles touching a position.
///
/// Without phase information only a clique of the conflict graph can be
/// genotyped jointly. Alleles starting at the same position form a clique by
/// definition; overlapping alleles starting elsewhere are then added greedily
/// while they conflict with every member, and the top alleles per sample are
/// re-selected until the group is stable.
#[derive(Debug)]
pub struct OrthogonalAlleleSelector<'a, P: PloidyMap> {
    buffer: &'a IndelCandidateBuffer,
    ploidy_map: &'a P,
    max_rounds: usize,
}

impl<'a, P: PloidyMap> OrthogonalAlleleSelector<'a, P> {
    /// Create a selector over `buffer`.
    pub fn new(buffer: &'a IndelCandidateBuffer, ploidy_map: &'a P, max_rounds: usize) -> Self {
        Self {
            buffer,
            ploidy_map,
            max_rounds: max_rounds.max(1),
        }
    }

    /// Eligible non-breakpoint alleles starting at `pos`.
    pub fn collect_position_candidates(&self, pos: u32) -> Result<AlleleCandidateGroup, CallerError> {
        let mut group = AlleleCandidateGroup::new();
        for (_, id) in self.buffer.position_iter(pos) {
            if self.buffer.is_eligible(id)? {
                group.push(id);
            }
        }
        Ok(group)
    }

    /// Per-sample ploidy over the group's reference range: the larger of the
    /// values at the range start and end.
    pub fn group_ploidy(&self, group: &AlleleCandidateGroup) -> Result<GroupPloidy, CallerError> {
        let range = group.reference_range(self.buffer)?;
        let sample_count = self.buffer.sample_count();
        let mut ploidy = GroupPloidy {
            reported: Vec::with_capacity(sample_count),
            caller: Vec::with_capacity(sample_count),
            conflict: Vec::with_capacity(sample_count),
        };
        for sample in 0..sample_count {
            let left = check_ploidy(self.ploidy_map.ploidy(sample, range.start))?;
            let right = check_ploidy(self.ploidy_map.ploidy(sample, range.end))?;
            let reported = left.max(right);
            let caller = if reported == 0 { 2 } else { reported };
            ploidy.reported.push(reported);
            ploidy.caller.push(caller);
            ploidy.conflict.push(reported == 0 || left != right);
        }
        Ok(ploidy)
    }

    fn score(&self, id: AlleleId, sample: usize) -> Result<f64, CallerError> {
        Ok(self
            .buffer
            .record(id)?
            .support
            .sample(sample)
            .map(|s| s.evidence_score())
            .unwrap_or(0.0))
    }

    fn best_score(&self, id: AlleleId) -> Result<f64, CallerError> {
        let mut best = 0.0f64;
        for sample in 0..self.buffer.sample_count() {
            best = best.max(self.score(id, sample)?);
        }
        Ok(best)
    }

    /// Sort `(score, id)` pairs by descending score, ties by ascending key.
    fn rank(&self, scored: &mut [(f64, AlleleId)]) -> Result<(), CallerError> {
        let buffer = self.buffer;
        let mut failure = None;
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal).then_with(|| {
                match (buffer.key(a.1), buffer.key(b.1)) {
                    (Ok(ka), Ok(kb)) => ka.cmp(kb),
                    (Err(e), _) | (_, Err(e)) => {
                        failure.get_or_insert(e);
                        Ordering::Equal
                    }
                }
            })
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Top `ploidy` alleles of `candidates` in one sample. Alleles without
    /// supporting evidence in the sample are never selected.
    pub fn select_top_in_sample(
        &self,
        sample: usize,
        ploidy: u8,
        candidates: &AlleleCandidateGroup,
    ) -> Result<Vec<AlleleId>, CallerError> {
        let mut scored = Vec::with_capacity(candidates.len());
        for &id in candidates.ids() {
            let score = self.score(id, sample)?;
            if score > 0.0 {
                scored.push((score, id));
            }
        }
        self.rank(&mut scored)?;
        Ok(scored
            .into_iter()
            .take(ploidy as usize)
            .map(|(_, id)| id)
            .collect())
    }

    /// Union over samples of each sample's top alleles, in key order.
    pub fn select_top_in_all_samples(
        &self,
        caller_ploidy: &[u8],
        candidates: &AlleleCandidateGroup,
    ) -> Result<AlleleCandidateGroup, CallerError> {
        let mut top = AlleleCandidateGroup::new();
        for (sample, &ploidy) in caller_ploidy.iter().enumerate() {
            for id in self.select_top_in_sample(sample, ploidy, candidates)? {
                top.push(id);
            }
        }
        top.sort_by_key(self.buffer)?;
        Ok(top)
    }

    /// Grow `top` with conflicting alleles starting at other positions within
    /// the look-ahead window around `pos`, then re-select, until stable.
    pub fn add_alleles_at_other_positions(
        &self,
        pos: u32,
        caller_ploidy: &[u8],
        mut top: AlleleCandidateGroup,
    ) -> Result<AlleleCandidateGroup, CallerError> {
        let span = self.buffer.largest_read_indel_span();
        let begin = pos.saturating_sub(span);
        let end = pos.saturating_add(span).saturating_add(1);

        for round in 0..self.max_rounds {
            let mut pool = Vec::new();
            for (key, id) in self.buffer.range_iter(begin, end) {
                if key.pos == pos || top.contains(id) {
                    continue;
                }
                if !self.buffer.is_eligible(id)? {
                    continue;
                }
                pool.push((self.best_score(id)?, id));
            }
            if pool.is_empty() {
                break;
            }
            self.rank(&mut pool)?;

            let mut clique = top.clone();
            for (_, id) in pool {
                let key = self.buffer.key(id)?;
                let mut conflicts_with_all = true;
                for &member in clique.ids() {
                    if !key.conflicts_with(self.buffer.key(member)?) {
                        conflicts_with_all = false;
                        break;
                    }
                }
                if conflicts_with_all {
                    clique.push(id);
                }
            }

            let next = self.select_top_in_all_samples(caller_ploidy, &clique)?;
            trace!(pos, round, clique = clique.len(), top = next.len(), "extension round");
            if next == top {
                break;
            }
            top = next;
        }
        Ok(top)
    }

    /// Run the full selection at `pos`; `None` when no eligible allele starts here.
    pub fn select(&self, pos: u32) -> Result<Option<AlleleSelection>, CallerError> {
        let orthogonal = self.collect_position_candidates(pos)?;
        if orthogonal.is_empty() {
            return Ok(None);
        }

        let ploidy = self.group_ploidy(&orthogonal)?;

        let mut forced = AlleleCandidateGroup::new();
        for &id in orthogonal.ids() {
            if self.buffer.record(id)?.support.is_forced_output {
                forced.push(id);
            }
        }

        let mut top = self.select_top_in_all_samples(&ploidy.caller, &orthogonal)?;
        if !top.is_empty() {
            top = self.add_alleles_at_other_positions(pos, &ploidy.caller, top)?;
        }

        // a cluster is reported once, from its leftmost start position
        let mut is_reportable = !top.is_empty();
        let mut starts_here = false;
        for key in top.keys(self.buffer)? {
            if key.pos < pos {
                is_reportable = false;
            }
            starts_here |= key.pos == pos;
        }
        let is_reportable = is_reportable && starts_here;

        debug!(
            pos,
            candidates = orthogonal.len(),
            forced = forced.len(),
            top = top.len(),
            is_reportable,
            "selected orthogonal alleles"
        );

        Ok(Some(AlleleSelection {
            orthogonal,
            forced,
            top,
            ploidy,
            is_reportable,
        }))
    }
}
