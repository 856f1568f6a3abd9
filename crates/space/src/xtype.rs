use crate::errors::{Result, SpaceError};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// An enumeration to define the type of an input variable component
/// with its domain definition
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum XType {
    /// Continuous variable in [lower bound, upper bound]
    Float(f64, f64),
    /// Integer variable in lower bound .. upper bound (both included)
    Int(i32, i32),
    /// An ordered variable in { float_1, float_2, ..., float_n }
    Ord(Vec<f64>),
    /// A categorical variable valued by its level index in { 0, 1, ..., n-1 }
    Enum(usize),
}

impl XType {
    /// Interval `(lower, upper)` enclosing the admissible values
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            XType::Float(lb, ub) => (*lb, *ub),
            XType::Int(lb, ub) => (*lb as f64, *ub as f64),
            XType::Ord(v) => (
                v.iter().fold(f64::INFINITY, |a, &b| a.min(b)),
                v.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b)),
            ),
            XType::Enum(n) => (0., (*n - 1) as f64),
        }
    }

    /// Whether the variable takes real values
    pub fn is_float(&self) -> bool {
        matches!(self, XType::Float(_, _))
    }

    /// Whether the variable is ordinal (integer or ordered levels)
    pub fn is_ordinal(&self) -> bool {
        matches!(self, XType::Int(_, _) | XType::Ord(_))
    }

    /// Whether the variable is categorical
    pub fn is_categorical(&self) -> bool {
        matches!(self, XType::Enum(_))
    }

    pub(crate) fn check(&self) -> Result<()> {
        match self {
            XType::Float(lb, ub) if !(lb < ub) => Err(SpaceError::InvalidXType(format!(
                "Float lower bound {lb} should be less than upper bound {ub}"
            ))),
            XType::Int(lb, ub) if lb > ub => Err(SpaceError::InvalidXType(format!(
                "Int lower bound {lb} should not be greater than upper bound {ub}"
            ))),
            XType::Ord(v) if v.is_empty() || v.iter().any(|l| !l.is_finite()) => Err(
                SpaceError::InvalidXType("Ord levels should be finite and non empty".to_string()),
            ),
            XType::Enum(0) => Err(SpaceError::InvalidXType(
                "Enum should have at least one level".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Maps a value `u` of `[0, 1)` to an admissible value,
    /// discrete values being equiprobable.
    pub(crate) fn from_unit(&self, u: f64) -> f64 {
        match self {
            XType::Float(lb, ub) => lb + u * (ub - lb),
            XType::Int(lb, ub) => {
                let n = (ub - lb + 1) as f64;
                (*lb as f64 + (u * n).floor()).min(*ub as f64)
            }
            XType::Ord(v) => v[level(u, v.len())],
            XType::Enum(n) => level(u, *n) as f64,
        }
    }

    /// Projects a relaxed value to its closest admissible value
    pub fn round(&self, val: f64) -> f64 {
        let (lb, ub) = self.bounds();
        match self {
            XType::Float(_, _) => val.clamp(lb, ub),
            XType::Int(_, _) | XType::Enum(_) => val.round().clamp(lb, ub),
            XType::Ord(v) => take_closest(v, val),
        }
    }

    /// Whether `val` is an admissible value
    pub fn contains(&self, val: f64) -> bool {
        let (lb, ub) = self.bounds();
        match self {
            XType::Float(_, _) => lb <= val && val <= ub,
            XType::Int(_, _) | XType::Enum(_) => val.fract() == 0. && lb <= val && val <= ub,
            XType::Ord(v) => v.contains(&val),
        }
    }
}

fn level(u: f64, n: usize) -> usize {
    ((u * n as f64).floor() as usize).min(n - 1)
}

/// Find closest value to `val` in given slice `v`.
fn take_closest(v: &[f64], val: f64) -> f64 {
    v.iter()
        .copied()
        .fold((f64::INFINITY, v[0]), |(dmin, best), level| {
            let d = (val - level).abs();
            if d < dmin {
                (d, level)
            } else {
                (dmin, best)
            }
        })
        .1
}
