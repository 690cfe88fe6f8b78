use std::ops::Range;
use std::sync::Arc;

/// Contiguous window of one reference contig.
#[derive(Debug, Clone)]
pub struct ReferenceSegment {
    chrom: Arc<str>,
    start: u32,
    bases: Arc<[u8]>,
}

impl ReferenceSegment {
    /// Wrap `bases`, the reference sequence beginning at 0-based `start`.
    pub fn new(chrom: impl Into<Arc<str>>, start: u32, bases: impl AsRef<[u8]>) -> Self {
        Self {
            chrom: chrom.into(),
            start,
            bases: Arc::from(bases.as_ref().to_ascii_uppercase()),
        }
    }

    /// Contig name.
    pub fn chrom(&self) -> &Arc<str> {
        &self.chrom
    }

    /// Covered range (half-open).
    pub fn range(&self) -> Range<u32> {
        self.start..self.start + self.bases.len() as u32
    }

    /// Reference base at `pos`, or `N` outside the window.
    pub fn base(&self, pos: u32) -> u8 {
        pos.checked_sub(self.start)
            .and_then(|offset| self.bases.get(offset as usize).copied())
            .unwrap_or(b'N')
    }

    /// Reference bases over `range`; positions outside the window read as `N`.
    pub fn slice(&self, range: Range<u32>) -> Vec<u8> {
        range.map(|pos| self.base(pos)).collect()
    }

    /// Length of the homopolymer an SNV at `pos` would sit in.
    ///
    /// Counts the run on each side of `pos`; when both flanks carry the same
    /// base the runs join through `pos`.
    pub fn homopolymer_len(&self, pos: u32) -> u32 {
        let left_base = pos.checked_sub(1).map(|p| self.base(p));
        let right_base = self.base(pos.saturating_add(1));

        let mut left_run = 0u32;
        if let Some(base) = left_base.filter(|&b| b != b'N') {
            let mut p = pos;
            while p > 0 && self.base(p - 1) == base {
                left_run += 1;
                p -= 1;
            }
        }

        let mut right_run = 0u32;
        if right_base != b'N' {
            let mut p = pos + 1;
            while self.base(p) == right_base {
                right_run += 1;
                p += 1;
            }
        }

        if left_base == Some(right_base) {
            left_run + right_run + 1
        } else {
            left_run.max(right_run) + 1
        }
    }
}
