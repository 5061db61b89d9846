//! Multi-indices over a countable set of stochastic dimensions.
//!
//! A multi-index $\mu = (\mu_0, \mu_1, \dots)$ assigns a polynomial degree to each stochastic
//! dimension. Only finitely many degrees are non-zero, so we store the degrees up to (and
//! including) the last non-zero entry. Trailing zeros are never stored, which makes equality,
//! hashing and ordering structural.
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::error::Error;
use std::fmt;

/// A finitely supported multi-index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<u32>", into = "Vec<u32>")]
pub struct MultiIndex {
    degrees: Vec<u32>,
}

/// Returned when decrementing a multi-index would produce a negative degree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegativeDegreeError {
    pub multi_index: MultiIndex,
    pub dim: usize,
}

impl fmt::Display for NegativeDegreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot decrement dimension {} of multi-index {}: degree is zero",
            self.dim, self.multi_index
        )
    }
}

impl Error for NegativeDegreeError {}

impl MultiIndex {
    /// The zero multi-index, associated with the deterministic mean solution.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Construct a multi-index from a list of degrees. Trailing zeros are removed.
    pub fn from_degrees(degrees: impl Into<Vec<u32>>) -> Self {
        let mut degrees = degrees.into();
        while degrees.last() == Some(&0) {
            degrees.pop();
        }
        Self { degrees }
    }

    /// The unit multi-index $e_m$.
    pub fn unit(dim: usize) -> Self {
        Self::zero().increment(dim)
    }

    pub fn is_zero(&self) -> bool {
        self.degrees.is_empty()
    }

    /// The degree associated with dimension `dim`.
    pub fn degree(&self, dim: usize) -> u32 {
        self.degrees.get(dim).copied().unwrap_or(0)
    }

    /// The stored degrees, without trailing zeros.
    pub fn degrees(&self) -> &[u32] {
        &self.degrees
    }

    /// One past the largest dimension with a non-zero degree.
    ///
    /// This is the number of stochastic dimensions that need to be considered when
    /// coupling this multi-index to its neighbors.
    pub fn len(&self) -> usize {
        self.degrees.len()
    }

    /// The total polynomial degree $|\mu| = \sum_m \mu_m$.
    pub fn order(&self) -> u32 {
        self.degrees.iter().sum()
    }

    /// Iterate over `(dim, degree)` pairs with non-zero degree.
    pub fn support(&self) -> impl '_ + Iterator<Item = (usize, u32)> {
        self.degrees
            .iter()
            .enumerate()
            .filter(|(_, &d)| d > 0)
            .map(|(m, &d)| (m, d))
    }

    /// Return $\mu + e_m$.
    pub fn increment(&self, dim: usize) -> Self {
        let mut degrees = self.degrees.clone();
        if degrees.len() <= dim {
            degrees.resize(dim + 1, 0);
        }
        degrees[dim] += 1;
        Self { degrees }
    }

    /// Return $\mu - e_m$, or an error if $\mu_m = 0$.
    pub fn decrement(&self, dim: usize) -> Result<Self, NegativeDegreeError> {
        match self.degree(dim) {
            0 => Err(NegativeDegreeError {
                multi_index: self.clone(),
                dim,
            }),
            _ => {
                let mut degrees = self.degrees.clone();
                degrees[dim] -= 1;
                Ok(Self::from_degrees(degrees))
            }
        }
    }

    /// Whether `self` $\leq$ `other` in every component.
    pub fn is_contained_in(&self, other: &MultiIndex) -> bool {
        self.len() <= other.len()
            && self
                .degrees
                .iter()
                .enumerate()
                .all(|(m, &d)| d <= other.degree(m))
    }
}

impl From<Vec<u32>> for MultiIndex {
    fn from(degrees: Vec<u32>) -> Self {
        Self::from_degrees(degrees)
    }
}

impl From<MultiIndex> for Vec<u32> {
    fn from(mi: MultiIndex) -> Self {
        mi.degrees
    }
}

/// Multi-indices are ordered by total order first, then lexicographically by their degrees.
///
/// This makes iteration over an active set start with the mean and proceed through increasing
/// polynomial degrees.
impl Ord for MultiIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order()
            .cmp(&other.order())
            .then_with(|| self.degrees.cmp(&other.degrees))
    }
}

impl PartialOrd for MultiIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MultiIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.degrees.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}
