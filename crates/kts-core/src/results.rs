// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::KtsError;

/// Validates interior change points against sequence length `n`.
///
/// Change points must be strictly increasing and lie in `(0, n)`; the
/// implicit boundaries `0` and `n` are never listed.
pub fn validate_change_points(n: usize, points: &[usize]) -> Result<(), KtsError> {
    if n == 0 {
        return Err(KtsError::invalid_input("change points require n >= 1; got 0"));
    }

    let mut previous = 0usize;
    for (idx, &point) in points.iter().enumerate() {
        if point == 0 || point >= n {
            return Err(KtsError::invalid_input(format!(
                "change point[{idx}]={point} must lie in (0, {n})"
            )));
        }
        if idx > 0 && point <= previous {
            return Err(KtsError::invalid_input(format!(
                "change points must be strictly increasing: point[{}]={previous}, point[{idx}]={point}",
                idx - 1
            )));
        }
        previous = point;
    }
    Ok(())
}

/// Ordered segment boundaries for a sequence of length `n`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawChangePointSet"))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangePointSet {
    n: usize,
    points: Vec<usize>,
}

/// Unchecked wire form; deserialized sets pass through [`ChangePointSet::new`].
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawChangePointSet {
    n: usize,
    points: Vec<usize>,
}

#[cfg(feature = "serde")]
impl TryFrom<RawChangePointSet> for ChangePointSet {
    type Error = KtsError;

    fn try_from(raw: RawChangePointSet) -> Result<Self, Self::Error> {
        Self::new(raw.n, raw.points)
    }
}

impl ChangePointSet {
    pub fn new(n: usize, points: Vec<usize>) -> Result<Self, KtsError> {
        validate_change_points(n, &points)?;
        Ok(Self { n, points })
    }

    /// A single segment covering the whole sequence.
    pub fn empty(n: usize) -> Result<Self, KtsError> {
        Self::new(n, vec![])
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn segment_count(&self) -> usize {
        self.points.len() + 1
    }

    /// Change points followed by the terminal boundary `n`.
    pub fn breakpoints(&self) -> Vec<usize> {
        let mut breakpoints = Vec::with_capacity(self.points.len() + 1);
        breakpoints.extend_from_slice(&self.points);
        breakpoints.push(self.n);
        breakpoints
    }

    /// Half-open `[start, end)` ranges of every segment, in order.
    pub fn segments(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let starts = std::iter::once(0).chain(self.points.iter().copied());
        let ends = self.points.iter().copied().chain(std::iter::once(self.n));
        starts.zip(ends)
    }

    pub fn segment_lengths(&self) -> Vec<usize> {
        self.segments().map(|(start, end)| end - start).collect()
    }

    pub fn into_vec(self) -> Vec<usize> {
        self.points
    }
}
