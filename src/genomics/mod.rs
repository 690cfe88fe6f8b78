//! Genomics primitives consumed by the calling pipeline.
//!
//! Pileups, reference windows, ploidy lookup, and the identity type for
//! candidate indel alleles. Construction of these from alignment files
//! happens upstream of this crate.

mod pileup;
mod ploidy;
mod reference;
mod types;

pub use pileup::{CleanedPileup, PileupBuffer, PileupColumn, StrandCounts};
pub use ploidy::{check_ploidy, PloidyMap, RegionPloidy};
pub use reference::ReferenceSegment;
pub use types::{base_index, index_base, AlleleKey, BaseCall, IndelKind, N_BASE};
