//! XP-to-level curves.
//!
//! A [`LevelCurve`] maps accumulated XP to a level and back. Curves are pure
//! and stateless; the engine holds one behind an `Arc<dyn LevelCurve>` chosen
//! at startup from [`CurveConfig`].
//!
//! # Provided Curves
//!
//! | Curve | `level_for(xp)` | `xp_threshold_for(level)` |
//! |---|---|---|
//! | [`SqrtCurve`] | `isqrt(xp / k)` | `level^2 * k` |
//! | [`LinearCurve`] | `xp / step` | `level * step` |
//! | [`TriangularCurve`] | largest `L >= 1` with `step * L(L-1)/2 <= xp` | `step * L(L-1)/2` |
//! | [`TableCurve`] | number of table entries `<= xp` | entry `level - 1`, saturating |
//!
//! With `k = 100` the square-root curve gives level 1 at 100 XP, level 2 at
//! 400 XP and level 10 at 10,000 XP.

use std::fmt::Debug;
use std::sync::Arc;

use serde::Deserialize;

/// Default scale of the square-root curve.
pub const DEFAULT_SQRT_K: u64 = 100;

/// Errors raised when building a curve from configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CurveError {
    /// A scale or step parameter was zero.
    #[error("{curve} curve parameter must be greater than zero")]
    ZeroParameter {
        /// Curve kind that was misconfigured.
        curve: &'static str,
    },

    /// A threshold table had no entries.
    #[error("threshold table must not be empty")]
    EmptyTable,

    /// A threshold table was not strictly increasing.
    #[error("threshold table must be strictly increasing (entry {index} is {value}, previous is {previous})")]
    NotIncreasing {
        /// Position of the offending entry.
        index: usize,
        /// The offending entry.
        value: u64,
        /// The entry before it.
        previous: u64,
    },
}

/// Mapping between accumulated XP and level.
///
/// Implementations must be monotonic: `level_for` never decreases as XP
/// grows, and `xp_threshold_for(level)` is the smallest XP at which
/// `level_for` reaches `level` (saturating for unreachable levels).
pub trait LevelCurve: Send + Sync + Debug {
    /// Level reached with `xp` accumulated.
    fn level_for(&self, xp: u64) -> u32;

    /// Smallest XP at which `level` is reached.
    fn xp_threshold_for(&self, level: u32) -> u64;
}

fn clamp_level(level: u64) -> u32 {
    u32::try_from(level).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Square root
// ---------------------------------------------------------------------------

/// `level = isqrt(xp / k)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqrtCurve {
    k: u64,
}

impl SqrtCurve {
    /// Build a square-root curve with scale `k`.
    pub const fn new(k: u64) -> Result<Self, CurveError> {
        if k == 0 {
            return Err(CurveError::ZeroParameter { curve: "sqrt" });
        }
        Ok(Self { k })
    }
}

impl Default for SqrtCurve {
    fn default() -> Self {
        Self { k: DEFAULT_SQRT_K }
    }
}

impl LevelCurve for SqrtCurve {
    fn level_for(&self, xp: u64) -> u32 {
        let scaled = xp.checked_div(self.k).unwrap_or(0);
        clamp_level(scaled.isqrt())
    }

    fn xp_threshold_for(&self, level: u32) -> u64 {
        let level = u64::from(level);
        level.saturating_mul(level).saturating_mul(self.k)
    }
}

// ---------------------------------------------------------------------------
// Linear
// ---------------------------------------------------------------------------

/// `level = xp / step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearCurve {
    step: u64,
}

impl LinearCurve {
    /// Build a linear curve that gains one level every `step` XP.
    pub const fn new(step: u64) -> Result<Self, CurveError> {
        if step == 0 {
            return Err(CurveError::ZeroParameter { curve: "linear" });
        }
        Ok(Self { step })
    }
}

impl LevelCurve for LinearCurve {
    fn level_for(&self, xp: u64) -> u32 {
        clamp_level(xp.checked_div(self.step).unwrap_or(0))
    }

    fn xp_threshold_for(&self, level: u32) -> u64 {
        u64::from(level).saturating_mul(self.step)
    }
}

// ---------------------------------------------------------------------------
// Triangular
// ---------------------------------------------------------------------------

/// Advancing from level N to N+1 costs `N * step` XP; levels start at 1.
///
/// With `step = 100`: level 2 at 100 XP, level 3 at 300 XP, level 4 at
/// 600 XP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangularCurve {
    step: u64,
}

impl TriangularCurve {
    /// Build a triangular curve with per-level increment `step`.
    pub const fn new(step: u64) -> Result<Self, CurveError> {
        if step == 0 {
            return Err(CurveError::ZeroParameter { curve: "triangular" });
        }
        Ok(Self { step })
    }
}

impl LevelCurve for TriangularCurve {
    fn level_for(&self, xp: u64) -> u32 {
        // Largest L with L(L-1)/2 <= q is floor((1 + sqrt(1 + 8q)) / 2).
        let q = xp.checked_div(self.step).unwrap_or(0);
        let root = q.saturating_mul(8).saturating_add(1).isqrt();
        clamp_level(root.saturating_add(1) / 2)
    }

    fn xp_threshold_for(&self, level: u32) -> u64 {
        let level = u64::from(level);
        let below = level.saturating_sub(1);
        // One of two consecutive integers is even, so the halving is exact.
        let triangle = if level % 2 == 0 {
            (level / 2).saturating_mul(below)
        } else {
            level.saturating_mul(below / 2)
        };
        triangle.saturating_mul(self.step)
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Explicit thresholds: entry `i` is the XP needed for level `i + 1`.
///
/// Levels beyond the table are unreachable; their threshold saturates at
/// the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCurve {
    thresholds: Vec<u64>,
}

impl TableCurve {
    /// Build a table curve. The table must be non-empty and strictly increasing.
    pub fn new(thresholds: Vec<u64>) -> Result<Self, CurveError> {
        if thresholds.is_empty() {
            return Err(CurveError::EmptyTable);
        }
        for (index, pair) in thresholds.windows(2).enumerate() {
            match *pair {
                [previous, value] if value <= previous => {
                    return Err(CurveError::NotIncreasing {
                        index: index.saturating_add(1),
                        value,
                        previous,
                    });
                }
                _ => {}
            }
        }
        Ok(Self { thresholds })
    }

    /// Highest level the table defines.
    pub fn max_level(&self) -> u32 {
        clamp_level(u64::try_from(self.thresholds.len()).unwrap_or(u64::MAX))
    }
}

impl LevelCurve for TableCurve {
    fn level_for(&self, xp: u64) -> u32 {
        let reached = self.thresholds.partition_point(|&threshold| threshold <= xp);
        clamp_level(u64::try_from(reached).unwrap_or(u64::MAX))
    }

    fn xp_threshold_for(&self, level: u32) -> u64 {
        let Some(index) = usize::try_from(level).ok().and_then(|l| l.checked_sub(1)) else {
            return 0;
        };
        self.thresholds
            .get(index)
            .or_else(|| self.thresholds.last())
            .copied()
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Curve selection as written in `levelup-config.yaml`.
///
/// ```yaml
/// curve:
///   kind: sqrt
///   k: 100
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CurveConfig {
    /// [`SqrtCurve`].
    Sqrt {
        /// Scale factor.
        #[serde(default = "default_sqrt_k")]
        k: u64,
    },
    /// [`LinearCurve`].
    Linear {
        /// XP per level.
        step: u64,
    },
    /// [`TriangularCurve`].
    Triangular {
        /// Per-level increment.
        step: u64,
    },
    /// [`TableCurve`].
    Table {
        /// XP needed for levels 1, 2, 3, ...
        thresholds: Vec<u64>,
    },
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self::Sqrt { k: DEFAULT_SQRT_K }
    }
}

impl CurveConfig {
    /// Validate the parameters and build the curve.
    pub fn build(&self) -> Result<Arc<dyn LevelCurve>, CurveError> {
        Ok(match self {
            Self::Sqrt { k } => Arc::new(SqrtCurve::new(*k)?),
            Self::Linear { step } => Arc::new(LinearCurve::new(*step)?),
            Self::Triangular { step } => Arc::new(TriangularCurve::new(*step)?),
            Self::Table { thresholds } => Arc::new(TableCurve::new(thresholds.clone())?),
        })
    }
}

const fn default_sqrt_k() -> u64 {
    DEFAULT_SQRT_K
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_inverse(curve: &dyn LevelCurve, max_level: u32) {
        for level in 0..=max_level {
            let threshold = curve.xp_threshold_for(level);
            assert!(
                curve.level_for(threshold) >= level,
                "{curve:?}: level_for({threshold}) < {level}"
            );
            if let Some(just_below) = threshold.checked_sub(1) {
                assert!(
                    curve.level_for(just_below) < level,
                    "{curve:?}: threshold for {level} is not minimal"
                );
            }
        }
    }

    #[test]
    fn sqrt_matches_reference_values() {
        let curve = SqrtCurve::default();
        assert_eq!(curve.level_for(0), 0);
        assert_eq!(curve.level_for(99), 0);
        assert_eq!(curve.level_for(100), 1);
        assert_eq!(curve.level_for(399), 1);
        assert_eq!(curve.level_for(400), 2);
        assert_eq!(curve.level_for(10_000), 10);
        assert_eq!(curve.xp_threshold_for(3), 900);
        assert_eq!(curve.level_for(u64::MAX), 429_496_729);
    }

    #[test]
    fn sqrt_threshold_is_minimal() {
        assert_inverse(&SqrtCurve::default(), 200);
        assert_inverse(&SqrtCurve::new(7).unwrap_or_default(), 200);
    }

    #[test]
    fn linear_curve() {
        let curve = LinearCurve::new(250);
        assert!(curve.is_ok());
        let Ok(curve) = curve else { return };
        assert_eq!(curve.level_for(249), 0);
        assert_eq!(curve.level_for(250), 1);
        assert_eq!(curve.xp_threshold_for(4), 1_000);
        assert_inverse(&curve, 100);
    }

    #[test]
    fn triangular_follows_n_times_step() {
        let Ok(curve) = TriangularCurve::new(100) else {
            return;
        };
        assert_eq!(curve.level_for(0), 1);
        assert_eq!(curve.level_for(99), 1);
        assert_eq!(curve.level_for(100), 2);
        assert_eq!(curve.level_for(299), 2);
        assert_eq!(curve.level_for(300), 3);
        assert_eq!(curve.level_for(600), 4);
        assert_eq!(curve.xp_threshold_for(5), 1_000);
        assert_inverse(&curve, 150);
    }

    #[test]
    fn table_saturates_at_last_entry() {
        let Ok(curve) = TableCurve::new(vec![50, 150, 300, 500]) else {
            return;
        };
        assert_eq!(curve.level_for(0), 0);
        assert_eq!(curve.level_for(50), 1);
        assert_eq!(curve.level_for(499), 3);
        assert_eq!(curve.level_for(5_000), 4);
        assert_eq!(curve.max_level(), 4);
        assert_eq!(curve.xp_threshold_for(0), 0);
        assert_eq!(curve.xp_threshold_for(4), 500);
        assert_eq!(curve.xp_threshold_for(5), 500);
        assert_inverse(&curve, 4);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert_eq!(
            SqrtCurve::new(0),
            Err(CurveError::ZeroParameter { curve: "sqrt" })
        );
        assert!(LinearCurve::new(0).is_err());
        assert!(TriangularCurve::new(0).is_err());
        assert_eq!(TableCurve::new(Vec::new()), Err(CurveError::EmptyTable));
        assert_eq!(
            TableCurve::new(vec![10, 20, 20]),
            Err(CurveError::NotIncreasing {
                index: 2,
                value: 20,
                previous: 20
            })
        );
    }

    #[test]
    fn curve_config_from_yaml() {
        let parsed: Result<CurveConfig, _> =
            serde_yml::from_str("kind: table\nthresholds: [10, 30, 60]\n");
        assert!(
            matches!(parsed, Ok(CurveConfig::Table { ref thresholds }) if thresholds.len() == 3)
        );

        let parsed: Result<CurveConfig, _> = serde_yml::from_str("kind: sqrt\n");
        assert_eq!(parsed.ok(), Some(CurveConfig::Sqrt { k: 100 }));

        let bad = CurveConfig::Linear { step: 0 };
        assert!(bad.build().is_err());
    }
}
