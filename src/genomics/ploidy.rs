use std::ops::Range;

use crate::CallerError;

/// Source of per-sample, per-position ploidy.
///
/// A value of 0 marks a no-call region; callers substitute 2 for computation.
pub trait PloidyMap {
    /// Ploidy of `sample` at `pos`.
    fn ploidy(&self, sample: usize, pos: u32) -> u8;
}

/// Ploidy given by a default plus overriding regions shared by all samples.
#[derive(Debug, Clone)]
pub struct RegionPloidy {
    default: u8,
    regions: Vec<(Range<u32>, u8)>,
}

impl RegionPloidy {
    /// Diploid everywhere.
    pub fn diploid() -> Self {
        Self {
            default: 2,
            regions: Vec::new(),
        }
    }

    /// Constant ploidy everywhere.
    pub fn uniform(ploidy: u8) -> Result<Self, CallerError> {
        check_ploidy(ploidy)?;
        Ok(Self {
            default: ploidy,
            regions: Vec::new(),
        })
    }

    /// Override ploidy on `range`; later regions take precedence.
    pub fn with_region(mut self, range: Range<u32>, ploidy: u8) -> Result<Self, CallerError> {
        check_ploidy(ploidy)?;
        self.regions.push((range, ploidy));
        Ok(self)
    }
}

impl PloidyMap for RegionPloidy {
    fn ploidy(&self, _sample: usize, pos: u32) -> u8 {
        self.regions
            .iter()
            .rev()
            .find(|(range, _)| range.contains(&pos))
            .map(|(_, ploidy)| *ploidy)
            .unwrap_or(self.default)
    }
}

/// Reject ploidy values outside {0, 1, 2}.
pub fn check_ploidy(ploidy: u8) -> Result<u8, CallerError> {
    if ploidy > 2 {
        return Err(CallerError::InvalidPloidy { ploidy });
    }
    Ok(ploidy)
}
