//! Physical channel layout.
//!
//! Sensors are arranged on a fixed 2-D grid. [`Map`] is the generic grid and
//! [`ChannelMap`] the grid of `(endpoint, channel)` identities used to look up
//! per-channel data by physical position.

use crate::error::{TypesError, TypesResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one readout channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct UniqueChannel {
    pub endpoint: u32,
    pub channel: u32,
}

impl UniqueChannel {
    pub const fn new(endpoint: u32, channel: u32) -> Self {
        Self { endpoint, channel }
    }
}

impl fmt::Display for UniqueChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.endpoint, self.channel)
    }
}

impl From<(u32, u32)> for UniqueChannel {
    fn from((endpoint, channel): (u32, u32)) -> Self {
        Self::new(endpoint, channel)
    }
}

/// A rows x columns grid of values.
#[derive(Clone, Debug, PartialEq)]
pub struct Map<T> {
    data: Array2<T>,
}

impl<T> Map<T> {
    /// Build a map from its rows. Every row must have the same, non-zero length.
    pub fn new(rows: Vec<Vec<T>>) -> TypesResult<Self> {
        let nrows = rows.len();
        if nrows == 0 {
            return Err(TypesError::InvalidMapShape("a map needs at least one row".into()));
        }
        let ncols = rows[0].len();
        if ncols == 0 {
            return Err(TypesError::InvalidMapShape("a map needs at least one column".into()));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != ncols) {
            return Err(TypesError::InvalidMapShape(format!(
                "row {} has {} columns, expected {}",
                i,
                row.len(),
                ncols
            )));
        }

        let flat: Vec<T> = rows.into_iter().flatten().collect();
        let data = Array2::from_shape_vec((nrows, ncols), flat)
            .map_err(|e| TypesError::InvalidMapShape(e.to_string()))?;
        Ok(Self { data })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    #[inline]
    pub fn columns(&self) -> usize {
        self.data.ncols()
    }

    /// Value at `(row, column)`, if within the grid.
    pub fn get(&self, row: usize, column: usize) -> Option<&T> {
        self.data.get((row, column))
    }

    /// A map of the same shape with `f` applied to every cell.
    pub fn map<U, F>(&self, f: F) -> Map<U>
    where
        F: FnMut(&T) -> U,
    {
        Map { data: self.data.map(f) }
    }

    /// Cells in row-major order with their positions.
    pub fn iter_positions(&self) -> impl Iterator<Item = ((usize, usize), &T)> {
        self.data.indexed_iter()
    }
}

impl<T: Clone> Map<T> {
    /// A map where every cell holds `value`.
    pub fn from_unique_value(rows: usize, columns: usize, value: T) -> TypesResult<Self> {
        if rows == 0 || columns == 0 {
            return Err(TypesError::InvalidMapShape(format!(
                "cannot build a {}x{} map",
                rows, columns
            )));
        }
        Ok(Self {
            data: Array2::from_elem((rows, columns), value),
        })
    }
}

/// Physical arrangement of readout channels.
pub type ChannelMap = Map<UniqueChannel>;

impl Map<UniqueChannel> {
    /// Position of the first cell holding `channel`, scanning row-major.
    pub fn find_channel(&self, channel: UniqueChannel) -> Option<(usize, usize)> {
        self.iter_positions()
            .find(|&(_, &uc)| uc == channel)
            .map(|(pos, _)| pos)
    }

    pub fn contains(&self, channel: UniqueChannel) -> bool {
        self.data.iter().any(|&uc| uc == channel)
    }

    /// Build a channel map from `[endpoint, channel]` pairs laid out by row.
    pub fn from_pairs(rows: Vec<Vec<[u32; 2]>>) -> TypesResult<Self> {
        Map::new(
            rows.into_iter()
                .map(|row| row.into_iter().map(|[ep, ch]| UniqueChannel::new(ep, ch)).collect())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_map() -> ChannelMap {
        ChannelMap::from_pairs(vec![vec![[104, 0], [104, 1]], vec![[105, 0], [105, 7]]]).unwrap()
    }

    #[test]
    fn test_map_shape_checks() {
        assert!(Map::<u8>::new(vec![]).is_err());
        assert!(Map::<u8>::new(vec![vec![]]).is_err());
        assert!(Map::new(vec![vec![1, 2], vec![3]]).is_err());
        assert!(Map::from_unique_value(0, 3, 1u8).is_err());

        let map = Map::from_unique_value(2, 3, 'x').unwrap();
        assert_eq!((map.rows(), map.columns()), (2, 3));
        assert_eq!(map.get(1, 2), Some(&'x'));
        assert_eq!(map.get(2, 0), None);
    }

    #[test]
    fn test_find_channel() {
        let map = channel_map();
        assert_eq!(map.find_channel(UniqueChannel::new(105, 7)), Some((1, 1)));
        assert_eq!(map.find_channel(UniqueChannel::new(106, 0)), None);
        assert!(map.contains(UniqueChannel::new(104, 1)));
        assert_eq!(UniqueChannel::new(104, 1).to_string(), "104-1");

        let endpoints = map.map(|uc| uc.endpoint);
        assert_eq!(endpoints.get(1, 0), Some(&105));
    }

    #[test]
    fn test_iter_positions_row_major() {
        let positions: Vec<_> = channel_map().iter_positions().map(|(p, _)| p).collect();
        assert_eq!(positions, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }
}
