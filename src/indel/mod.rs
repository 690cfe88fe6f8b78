//! Candidate indel alleles and the selection of jointly genotypable groups.

mod buffer;
mod group;

pub use buffer::{
    AlleleId, AlleleRecord, AlleleSampleSupport, AlleleSupport, IndelCandidateBuffer,
    ReadPathScores,
};
pub use group::{AlleleCandidateGroup, AlleleSelection, GroupPloidy, OrthogonalAlleleSelector};
