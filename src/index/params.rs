//! IVF tuning parameters.
//!
//! A fixed choice silently degrades either recall or latency as the corpus
//! grows, so both knobs are runtime configuration with size-keyed defaults.
//!
//! Recommended defaults by corpus size (partitions ~= 5*sqrt(n), probes ~=
//! 20% of partitions):
//!
//! | corpus size | partitions | probes |
//! |-------------|------------|--------|
//! | 1,000       | 158        | 31     |
//! | 10,000      | 500        | 100    |
//! | 100,000     | 1,581      | 316    |
//! | 1,000,000   | 5,000      | 1,000  |

/// Build-time partition count and query-time probe count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexParams {
    /// K-means clusters created at build time.
    pub partitions: usize,
    /// Clusters scanned per query.
    pub probes: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            partitions: 100,
            probes: 20,
        }
    }
}

impl IndexParams {
    /// Rule-of-thumb parameters for a corpus of `n` vectors.
    pub fn recommended(n: usize) -> Self {
        let partitions = ((5.0 * (n.max(1) as f64).sqrt()).round() as usize).max(1);
        let probes = (partitions / 5).max(1);
        Self { partitions, probes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommended_scales_with_sqrt() {
        let small = IndexParams::recommended(1_000);
        assert_eq!(small.partitions, 158);
        assert_eq!(small.probes, 31);

        let large = IndexParams::recommended(1_000_000);
        assert_eq!(large.partitions, 5_000);
        assert_eq!(large.probes, 1_000);
    }

    #[test]
    fn recommended_never_zero() {
        let params = IndexParams::recommended(0);
        assert!(params.partitions >= 1);
        assert!(params.probes >= 1);
    }
}
