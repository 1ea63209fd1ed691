// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Number of pixel columns of the front-end chip.
pub const COLUMNS: usize = 80;
/// Number of pixel rows of the front-end chip.
pub const ROWS: usize = 336;
/// Number of double columns. A double column shares one shift register.
pub const DOUBLE_COLUMNS: usize = COLUMNS / 2;

/// Dense per-pixel storage, indexed by zero based `(column, row)`.
///
/// The values of one column are contiguous, which matches the way
/// the pixel shift registers are loaded (one double column at a time).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelMatrix {
    data: Vec<u8>,
}

impl PixelMatrix {
    pub fn filled(value: u8) -> Self {
        PixelMatrix {
            data: vec![value; COLUMNS * ROWS],
        }
    }

    pub fn zeros() -> Self {
        Self::filled(0)
    }

    pub fn from_fn(mut f: impl FnMut(usize, usize) -> u8) -> Self {
        let mut data = Vec::with_capacity(COLUMNS * ROWS);
        for column in 0..COLUMNS {
            for row in 0..ROWS {
                data.push(f(column, row));
            }
        }
        PixelMatrix { data }
    }

    /// Build a matrix from column-major data (`COLUMNS * ROWS` entries).
    pub fn from_column_major(data: Vec<u8>) -> Option<Self> {
        (data.len() == COLUMNS * ROWS).then_some(PixelMatrix { data })
    }

    pub fn get(&self, column: usize, row: usize) -> Option<u8> {
        (column < COLUMNS && row < ROWS).then(|| self.data[column * ROWS + row])
    }

    pub fn column(&self, column: usize) -> &[u8] {
        &self.data[column * ROWS..(column + 1) * ROWS]
    }

    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }

    pub fn max_value(&self) -> u8 {
        self.data.iter().copied().max().unwrap_or_default()
    }

    /// Iterate over the `(column, row)` coordinates of all non-zero pixels.
    pub fn iter_nonzero(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.data
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0)
            .map(|(idx, _)| (idx / ROWS, idx % ROWS))
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|v| **v != 0).count()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Default for PixelMatrix {
    fn default() -> Self {
        Self::zeros()
    }
}

impl Index<(usize, usize)> for PixelMatrix {
    type Output = u8;

    fn index(&self, (column, row): (usize, usize)) -> &Self::Output {
        assert!(column < COLUMNS && row < ROWS);
        &self.data[column * ROWS + row]
    }
}

impl IndexMut<(usize, usize)> for PixelMatrix {
    fn index_mut(&mut self, (column, row): (usize, usize)) -> &mut Self::Output {
        assert!(column < COLUMNS && row < ROWS);
        &mut self.data[column * ROWS + row]
    }
}

impl std::fmt::Debug for PixelMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PixelMatrix({COLUMNS}x{ROWS}, nonzero={}, max={})",
            self.count_nonzero(),
            self.max_value()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_major_layout() {
        let matrix = PixelMatrix::from_fn(|col, row| ((col + row) % 7) as u8);
        assert_eq!(matrix[(3, 5)], 1);
        assert_eq!(matrix.column(3)[5], 1);
        assert_eq!(matrix.get(79, 335), Some(((79 + 335) % 7) as u8));
        assert_eq!(matrix.get(80, 0), None);
        assert_eq!(matrix.get(0, 336), None);
    }

    #[test]
    fn test_iter_nonzero() {
        let mut matrix = PixelMatrix::zeros();
        matrix[(1, 2)] = 1;
        matrix[(79, 335)] = 3;
        let active: Vec<_> = matrix.iter_nonzero().collect();
        assert_eq!(active, vec![(1, 2), (79, 335)]);
        assert_eq!(matrix.count_nonzero(), 2);
        assert_eq!(matrix.max_value(), 3);
    }

    #[test]
    fn test_from_column_major_rejects_wrong_size() {
        assert!(PixelMatrix::from_column_major(vec![0; 10]).is_none());
        assert!(PixelMatrix::from_column_major(vec![0; COLUMNS * ROWS]).is_some());
    }
}
