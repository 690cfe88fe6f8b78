use std::collections::BTreeMap;
use std::io::Write;

use crate::genomics::types::{base_index, BaseCall, N_BASE};
use crate::CallerError;

/// Raw pileup column for one sample at one reference position.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PileupColumn {
    /// Genomic coordinate (0-based) of the pileup position.
    pub position: u32,
    /// Reference base at this position.
    pub ref_base: u8,
    /// Base calls from all reads covering the position.
    pub calls: Vec<BaseCall>,
}

impl PileupColumn {
    /// Create an empty column.
    pub fn new(position: u32, ref_base: u8) -> Self {
        Self {
            position,
            ref_base: ref_base.to_ascii_uppercase(),
            calls: Vec::new(),
        }
    }

    /// Record one base call.
    pub fn observe(&mut self, call: BaseCall) {
        self.calls.push(call);
    }

    /// Total number of reads covering this position.
    pub fn depth(&self) -> u32 {
        self.calls.len() as u32
    }

    /// Whether no read covers this position.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Used calls on one strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StrandCounts {
    /// Calls from reads on this strand.
    pub total: u32,
    /// Of those, calls matching the queried base.
    pub matching: u32,
}

/// Filtered view of a pileup column used for genotyping.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedPileup {
    /// Genomic coordinate (0-based).
    pub position: u32,
    /// Reference base.
    pub ref_base: u8,
    /// Calls passing the base and mapping quality thresholds.
    pub used: Vec<BaseCall>,
    /// Calls rejected by the thresholds or carrying an ambiguous base.
    pub n_unused: u32,
}

impl CleanedPileup {
    /// Split raw calls into used and unused calls.
    pub fn clean(raw: &PileupColumn, min_base_quality: u8, min_mapq: u8) -> Self {
        let mut used = Vec::with_capacity(raw.calls.len());
        let mut n_unused = 0;
        for call in &raw.calls {
            let usable = base_index(call.base).is_some()
                && call.quality >= min_base_quality
                && call.mapq >= min_mapq;
            if usable {
                used.push(*call);
            } else {
                n_unused += 1;
            }
        }
        Self {
            position: raw.position,
            ref_base: raw.ref_base,
            used,
            n_unused,
        }
    }

    /// Number of calls used for genotyping.
    pub fn n_used(&self) -> u32 {
        self.used.len() as u32
    }

    /// Per-base observation counts [A, C, G, T].
    pub fn base_counts(&self) -> [u32; N_BASE] {
        let mut counts = [0u32; N_BASE];
        for call in &self.used {
            if let Some(idx) = base_index(call.base) {
                counts[idx] += 1;
            }
        }
        counts
    }

    /// Forward then reverse strand counts of `base` among the used calls.
    pub fn strand_counts(&self, base: u8) -> [StrandCounts; 2] {
        let mut strands = [StrandCounts::default(); 2];
        for call in &self.used {
            let strand = &mut strands[usize::from(call.is_reverse)];
            strand.total += 1;
            if call.base == base {
                strand.matching += 1;
            }
        }
        strands
    }

    /// Mean per-call error probability, used by the allele-frequency model.
    pub fn mean_error_prob(&self) -> f64 {
        if self.used.is_empty() {
            return 0.0;
        }
        self.used.iter().map(BaseCall::error_prob).sum::<f64>() / self.used.len() as f64
    }

    /// Write the diagnostic counts line: `pos\tA\tC\tG\tT\tunused\n` (1-based position).
    pub fn write_counts<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), CallerError> {
        let counts = self.base_counts();
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.position + 1,
            counts[0],
            counts[1],
            counts[2],
            counts[3],
            self.n_unused
        )?;
        Ok(())
    }
}

/// Per-sample pileup columns awaiting the driver.
#[derive(Debug, Clone)]
pub struct PileupBuffer {
    samples: Vec<BTreeMap<u32, PileupColumn>>,
}

impl PileupBuffer {
    /// Create an empty buffer for `sample_count` samples.
    pub fn new(sample_count: usize) -> Self {
        Self {
            samples: vec![BTreeMap::new(); sample_count],
        }
    }

    /// Add a base call to the column at `position`, creating the column on first use.
    pub fn observe(
        &mut self,
        sample: usize,
        position: u32,
        ref_base: u8,
        call: BaseCall,
    ) -> Result<(), CallerError> {
        let sample_count = self.samples.len();
        let columns = self
            .samples
            .get_mut(sample)
            .ok_or(CallerError::SampleOutOfRange {
                sample,
                sample_count,
            })?;
        columns
            .entry(position)
            .or_insert_with(|| PileupColumn::new(position, ref_base))
            .observe(call);
        Ok(())
    }

    /// Insert a whole column, replacing any existing one.
    pub fn insert_column(&mut self, sample: usize, column: PileupColumn) -> Result<(), CallerError> {
        let sample_count = self.samples.len();
        let columns = self
            .samples
            .get_mut(sample)
            .ok_or(CallerError::SampleOutOfRange {
                sample,
                sample_count,
            })?;
        columns.insert(column.position, column);
        Ok(())
    }

    /// Column for `sample` at `position`, if any read covered it.
    pub fn column(&self, sample: usize, position: u32) -> Option<&PileupColumn> {
        self.samples.get(sample)?.get(&position)
    }

    /// Drop every column below `position`.
    pub fn evict_before(&mut self, position: u32) {
        for columns in &mut self.samples {
            *columns = columns.split_off(&position);
        }
    }

    /// Total number of buffered columns over all samples.
    pub fn len(&self) -> usize {
        self.samples.iter().map(BTreeMap::len).sum()
    }

    /// Whether no column is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleaning_separates_low_quality_calls() {
        let mut column = PileupColumn::new(100, b'A');
        column.observe(BaseCall::new(b'A', 30, 60, false));
        column.observe(BaseCall::new(b'C', 5, 60, false));
        column.observe(BaseCall::new(b'C', 30, 3, true));
        column.observe(BaseCall::new(b'N', 30, 60, false));
        column.observe(BaseCall::new(b'C', 35, 60, true));

        let cleaned = CleanedPileup::clean(&column, 17, 20);
        assert_eq!(cleaned.n_used(), 2);
        assert_eq!(cleaned.n_unused, 3);
        assert_eq!(cleaned.base_counts(), [1, 1, 0, 0]);
        assert_eq!(
            cleaned.strand_counts(b'C'),
            [
                StrandCounts { total: 1, matching: 0 },
                StrandCounts { total: 1, matching: 1 },
            ]
        );
    }

    #[test]
    fn counts_line_is_tab_separated() {
        let mut column = PileupColumn::new(9, b'G');
        column.observe(BaseCall::new(b'G', 30, 60, false));
        column.observe(BaseCall::new(b'T', 30, 60, false));
        column.observe(BaseCall::new(b'T', 2, 60, false));
        let cleaned = CleanedPileup::clean(&column, 17, 20);

        let mut out = Vec::new();
        cleaned.write_counts(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "10\t0\t0\t1\t1\t1\n");
    }

    #[test]
    fn buffer_evicts_passed_columns() {
        let mut buffer = PileupBuffer::new(1);
        for pos in 0..5 {
            buffer
                .observe(0, pos, b'A', BaseCall::new(b'A', 30, 60, false))
                .unwrap();
        }
        buffer.evict_before(3);
        assert_eq!(buffer.len(), 2);
        assert!(buffer.column(0, 2).is_none());
        assert!(buffer.column(0, 3).is_some());
        assert!(buffer.observe(1, 0, b'A', BaseCall::new(b'A', 30, 60, false)).is_err());
    }
}
