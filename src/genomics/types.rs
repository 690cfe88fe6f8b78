use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Number of called nucleotides (A, C, G, T).
pub const N_BASE: usize = 4;

/// Map a nucleotide to its index in `[A, C, G, T]`.
pub fn base_index(base: u8) -> Option<usize> {
    match base {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' | b'U' | b'u' => Some(3),
        _ => None,
    }
}

/// Inverse of [`base_index`]; out-of-range indices map to `N`.
pub fn index_base(idx: usize) -> u8 {
    match idx {
        0 => b'A',
        1 => b'C',
        2 => b'G',
        3 => b'T',
        _ => b'N',
    }
}

/// Single base observation from one read at one reference position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BaseCall {
    /// Observed base as uppercase ASCII.
    pub base: u8,
    /// Base quality (Phred-scaled).
    pub quality: u8,
    /// Mapping quality of the read (Phred-scaled).
    pub mapq: u8,
    /// Whether the read maps to the reverse strand.
    pub is_reverse: bool,
}

impl BaseCall {
    /// Construct a new base call.
    pub fn new(base: u8, quality: u8, mapq: u8, is_reverse: bool) -> Self {
        Self {
            base: base.to_ascii_uppercase(),
            quality,
            mapq,
            is_reverse,
        }
    }

    /// Probability that the base call is wrong.
    pub fn error_prob(&self) -> f64 {
        10f64.powf(-(self.quality.max(1) as f64) / 10.0).min(0.75)
    }
}

/// Kind of edit an indel allele applies to the reference.
///
/// Variant order matters: it is the secondary sort key of [`AlleleKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum IndelKind {
    /// Reference bases removed.
    Deletion,
    /// Bases inserted before the key position.
    Insertion,
    /// Reference bases replaced by a different sequence.
    Swap,
    /// Unresolved breakend; tracked but never genotyped.
    Breakpoint,
}

/// Identity of a candidate indel allele.
///
/// Keys sort by start position first, so an ordered map of keys can be
/// walked position by position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AlleleKey {
    /// 0-based position of the first affected reference base.
    pub pos: u32,
    /// Edit kind.
    pub kind: IndelKind,
    /// Number of reference bases removed.
    pub delete_len: u32,
    /// Inserted sequence (empty for pure deletions).
    pub insert_seq: Arc<[u8]>,
}

impl AlleleKey {
    /// Deletion of `len` bases starting at `pos`.
    pub fn deletion(pos: u32, len: u32) -> Self {
        Self {
            pos,
            kind: IndelKind::Deletion,
            delete_len: len,
            insert_seq: Arc::from(Vec::new()),
        }
    }

    /// Insertion of `seq` immediately before `pos`.
    pub fn insertion(pos: u32, seq: impl AsRef<[u8]>) -> Self {
        Self {
            pos,
            kind: IndelKind::Insertion,
            delete_len: 0,
            insert_seq: Arc::from(seq.as_ref().to_ascii_uppercase()),
        }
    }

    /// Replacement of `len` reference bases by `seq`.
    pub fn swap(pos: u32, len: u32, seq: impl AsRef<[u8]>) -> Self {
        Self {
            pos,
            kind: IndelKind::Swap,
            delete_len: len,
            insert_seq: Arc::from(seq.as_ref().to_ascii_uppercase()),
        }
    }

    /// Breakend at `pos`.
    pub fn breakpoint(pos: u32) -> Self {
        Self {
            pos,
            kind: IndelKind::Breakpoint,
            delete_len: 0,
            insert_seq: Arc::from(Vec::new()),
        }
    }

    /// Smallest possible key at `pos`; every real allele at `pos` sorts at or after it.
    pub fn lower_bound(pos: u32) -> Self {
        Self::deletion(pos, 0)
    }

    /// Whether this is a breakend.
    pub fn is_breakpoint(&self) -> bool {
        self.kind == IndelKind::Breakpoint
    }

    /// First reference position after the removed bases.
    pub fn right_pos(&self) -> u32 {
        self.pos + self.delete_len
    }

    /// Reference bases removed by the allele.
    pub fn ref_span(&self) -> u32 {
        self.delete_len
    }

    /// Removed reference bases as a half-open range (empty for insertions).
    pub fn deleted_range(&self) -> Range<u32> {
        self.pos..self.right_pos()
    }

    /// Range used for conflict tests; extended by one base so that directly
    /// adjacent indels cannot be placed on one haplotype.
    pub fn conflict_range(&self) -> Range<u32> {
        self.pos..self.right_pos() + 1
    }

    /// Whether two alleles cannot co-occur on one haplotype.
    pub fn conflicts_with(&self, other: &AlleleKey) -> bool {
        if self.pos == other.pos {
            return true;
        }
        let a = self.conflict_range();
        let b = other.conflict_range();
        a.start < b.end && b.start < a.end
    }
}

impl fmt::Display for AlleleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seq = String::from_utf8_lossy(&self.insert_seq);
        match self.kind {
            IndelKind::Deletion => write!(f, "{}:{}D", self.pos, self.delete_len),
            IndelKind::Insertion => write!(f, "{}:{}I{}", self.pos, self.insert_seq.len(), seq),
            IndelKind::Swap => write!(
                f,
                "{}:{}D{}I{}",
                self.pos,
                self.delete_len,
                self.insert_seq.len(),
                seq
            ),
            IndelKind::Breakpoint => write!(f, "{}:BP", self.pos),
        }
    }
}
