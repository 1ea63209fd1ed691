// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

//! Pixel mask generators.
//!
//! Masks are [`PixelMatrix`] values of 80 columns by 336 rows. Column and row
//! numbers given by the caller are 1-based, as printed on the chip maps.
use fei4_register::{COLUMNS, Error, PixelMatrix, ROWS, Result};

fn check_coordinate(kind: &str, value: usize, max: usize) -> Result<usize> {
    if value == 0 || value > max {
        return Err(Error::validation(format!(
            "{kind} {value} out of range [1, {max}]"
        )));
    }
    Ok(value - 1)
}

/// Mask for one step of a scan which injects `1 / steps` of the pixels at a time.
///
/// Odd columns (1-based) select the rows `shift (mod steps)`, even columns the
/// rows `steps / 2 + shift (mod steps)`, so diagonal neighbors are never
/// selected together. `enable_columns` restricts the columns (1-based).
/// Pixels which are nonzero in `mask` are set to `default`.
pub fn make_pixel_mask(
    steps: usize,
    shift: usize,
    default: u8,
    value: u8,
    enable_columns: Option<&[usize]>,
    mask: Option<&PixelMatrix>,
) -> Result<PixelMatrix> {
    if steps == 0 {
        return Err(Error::validation("Number of mask steps must be positive"));
    }
    let mut columns = vec![enable_columns.is_none(); COLUMNS];
    for column in enable_columns.unwrap_or_default() {
        columns[check_coordinate("Column", *column, COLUMNS)?] = true;
    }
    let odd_offset = shift % steps;
    let even_offset = (steps / 2 + shift) % steps;
    let mut pixel_mask = PixelMatrix::from_fn(|col, row| {
        // Index 0 is the odd column 1.
        let offset = if col % 2 == 0 { odd_offset } else { even_offset };
        if columns[col] && row % steps == offset {
            value
        } else {
            default
        }
    });
    if let Some(mask) = mask {
        for (col, row) in mask.iter_nonzero() {
            pixel_mask[(col, row)] = default;
        }
    }
    Ok(pixel_mask)
}

/// Mask with `value` at the given pixels (1-based), `default` elsewhere.
pub fn make_pixel_mask_from_col_row(
    columns: &[usize],
    rows: &[usize],
    default: u8,
    value: u8,
) -> Result<PixelMatrix> {
    if columns.len() != rows.len() {
        return Err(Error::validation(format!(
            "Got {} columns but {} rows",
            columns.len(),
            rows.len()
        )));
    }
    let mut mask = PixelMatrix::filled(default);
    for (column, row) in columns.iter().zip(rows) {
        let col = check_coordinate("Column", *column, COLUMNS)?;
        let row = check_coordinate("Row", *row, ROWS)?;
        mask[(col, row)] = value;
    }
    Ok(mask)
}

/// Mask with `value` in the bounding rectangle of the given pixels (1-based).
///
/// Without columns or rows the mask is `default` everywhere.
pub fn make_box_pixel_mask_from_col_row(
    columns: &[usize],
    rows: &[usize],
    default: u8,
    value: u8,
) -> Result<PixelMatrix> {
    let bounds = |kind: &str, values: &[usize], max: usize| -> Result<Option<(usize, usize)>> {
        let indices = values
            .iter()
            .map(|v| check_coordinate(kind, *v, max))
            .collect::<Result<Vec<_>>>()?;
        Ok(indices.iter().min().zip(indices.iter().max()).map(|(a, b)| (*a, *b)))
    };
    let (Some((col_min, col_max)), Some((row_min, row_max))) =
        (bounds("Column", columns, COLUMNS)?, bounds("Row", rows, ROWS)?)
    else {
        return Ok(PixelMatrix::filled(default));
    };
    Ok(PixelMatrix::from_fn(|col, row| {
        if (col_min..=col_max).contains(&col) && (row_min..=row_max).contains(&row) {
            value
        } else {
            default
        }
    }))
}

/// Neighbors in the rows above and below each active pixel of `mask`.
pub fn make_xtalk_mask(mask: &PixelMatrix) -> PixelMatrix {
    let mut xtalk = PixelMatrix::zeros();
    for (col, row) in mask.iter_nonzero() {
        if row > 0 {
            xtalk[(col, row - 1)] = 1;
        }
        if row + 1 < ROWS {
            xtalk[(col, row + 1)] = 1;
        }
    }
    xtalk
}

/// Periodic pattern: every `row_distance`-th row in every `column_distance`-th
/// column, with every second selected column shifted by half a row period.
pub fn make_checkerboard_mask(
    column_distance: usize,
    row_distance: usize,
    column_offset: usize,
    row_offset: usize,
    default: u8,
    value: u8,
) -> Result<PixelMatrix> {
    if column_distance == 0 || row_distance == 0 {
        return Err(Error::validation("Checkerboard distances must be positive"));
    }
    // Row `r` of a column rolled by `shift` holds row `r - shift` of the base pattern.
    let selected = |row: usize, shift: usize| (row + ROWS - shift % ROWS) % ROWS % row_distance == 0;
    let period = 2 * column_distance;
    Ok(PixelMatrix::from_fn(|col, row| {
        let hit = if col >= column_offset && (col - column_offset) % period == 0 {
            selected(row, row_offset)
        } else if col >= column_offset + column_distance
            && (col - column_offset - column_distance) % period == 0
        {
            selected(row, row_distance / 2 + row_offset)
        } else {
            false
        };
        if hit { value } else { default }
    }))
}

/// One where `mask` is zero, zero elsewhere.
pub fn invert_pixel_mask(mask: &PixelMatrix) -> PixelMatrix {
    PixelMatrix::from_fn(|col, row| u8::from(mask[(col, row)] == 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pixel_mask_brick_pattern() {
        let mask = make_pixel_mask(3, 0, 0, 1, None, None).unwrap();
        // Column 1 (index 0): rows 0, 3, 6, ...; column 2 (index 1): rows 1, 4, 7, ...
        assert_eq!(mask[(0, 0)], 1);
        assert_eq!(mask[(0, 1)], 0);
        assert_eq!(mask[(1, 0)], 0);
        assert_eq!(mask[(1, 1)], 1);
        assert_eq!(mask[(2, 3)], 1);
        assert_eq!(mask.count_nonzero(), COLUMNS * ROWS / 3);
    }

    #[test]
    fn test_pixel_mask_enable_columns_and_mask() {
        let mut masked = PixelMatrix::zeros();
        masked[(1, 1)] = 1;
        let mask = make_pixel_mask(3, 0, 0, 1, Some(&[1, 2]), Some(&masked)).unwrap();
        assert_eq!(mask[(0, 0)], 1);
        assert_eq!(mask[(1, 1)], 0);
        assert_eq!(mask[(1, 4)], 1);
        assert!(mask.iter_nonzero().all(|(col, _)| col < 2));
        assert_eq!(mask.count_nonzero(), 2 * ROWS / 3 - 1);

        let inverted = make_pixel_mask(3, 1, 1, 0, None, Some(&masked)).unwrap();
        assert_eq!(inverted[(1, 1)], 1);
        assert_eq!(inverted[(0, 1)], 0);

        assert!(make_pixel_mask(3, 0, 0, 1, Some(&[81]), None).is_err());
        assert!(make_pixel_mask(3, 0, 0, 1, Some(&[0]), None).is_err());
        assert!(make_pixel_mask(0, 0, 0, 1, None, None).is_err());
    }

    #[test]
    fn test_mask_from_col_row() {
        let mask = make_pixel_mask_from_col_row(&[1, 80], &[1, 336], 0, 1).unwrap();
        assert_eq!(mask.iter_nonzero().collect::<Vec<_>>(), vec![(0, 0), (79, 335)]);
        assert!(make_pixel_mask_from_col_row(&[1], &[337], 0, 1).is_err());
        assert!(make_pixel_mask_from_col_row(&[1, 2], &[1], 0, 1).is_err());
    }

    #[test]
    fn test_box_mask() {
        let mask = make_box_pixel_mask_from_col_row(&[5, 10], &[50, 60], 0, 1).unwrap();
        assert_eq!(mask.count_nonzero(), 6 * 11);
        for (col, row) in mask.iter_nonzero() {
            assert!((4..=9).contains(&col));
            assert!((49..=59).contains(&row));
        }
        assert!(make_box_pixel_mask_from_col_row(&[0, 10], &[50, 60], 0, 1).is_err());
        assert_eq!(
            make_box_pixel_mask_from_col_row(&[], &[50, 60], 0, 1).unwrap(),
            PixelMatrix::zeros()
        );
        assert_eq!(
            make_box_pixel_mask_from_col_row(&[5], &[], 1, 0).unwrap(),
            PixelMatrix::filled(1)
        );
        assert!(make_box_pixel_mask_from_col_row(&[], &[337], 0, 1).is_err());
        let inverted = make_box_pixel_mask_from_col_row(&[10, 5], &[60, 50], 1, 0).unwrap();
        assert_eq!(inverted, invert_pixel_mask(&mask));
    }

    #[test]
    fn test_xtalk_mask() {
        let mask = make_pixel_mask_from_col_row(&[1, 3, 5], &[1, 100, 336], 0, 1).unwrap();
        let xtalk = make_xtalk_mask(&mask);
        assert_eq!(
            xtalk.iter_nonzero().collect::<Vec<_>>(),
            vec![(0, 1), (2, 98), (2, 100), (4, 334)]
        );
    }

    #[test]
    fn test_checkerboard_mask() {
        let mask = make_checkerboard_mask(1, 2, 0, 0, 0, 1).unwrap();
        assert_eq!(mask[(0, 0)], 1);
        assert_eq!(mask[(0, 1)], 0);
        assert_eq!(mask[(1, 0)], 0);
        assert_eq!(mask[(1, 1)], 1);
        assert_eq!(mask.count_nonzero(), COLUMNS * ROWS / 2);

        let sparse = make_checkerboard_mask(4, 8, 1, 2, 0, 1).unwrap();
        assert_eq!(sparse[(1, 2)], 1);
        assert_eq!(sparse[(1, 10)], 1);
        assert_eq!(sparse[(5, 6)], 1);
        assert_eq!(sparse[(9, 2)], 1);
        assert_eq!(sparse[(0, 2)], 0);
        assert!(make_checkerboard_mask(0, 2, 0, 0, 0, 1).is_err());
    }

    #[test]
    fn test_invert_pixel_mask() {
        let mut mask = PixelMatrix::zeros();
        mask[(3, 4)] = 5;
        let inverted = invert_pixel_mask(&mask);
        assert_eq!(inverted[(3, 4)], 0);
        assert_eq!(inverted.count_nonzero(), COLUMNS * ROWS - 1);
    }

    proptest! {
        #[test]
        fn prop_mask_steps_partition_matrix(steps in 1usize..=12) {
            let mut union = PixelMatrix::zeros();
            for shift in 0..steps {
                let mask = make_pixel_mask(steps, shift, 0, 1, None, None).unwrap();
                for (col, row) in mask.iter_nonzero() {
                    prop_assert_eq!(union[(col, row)], 0);
                    union[(col, row)] = 1;
                }
            }
            prop_assert_eq!(union, PixelMatrix::filled(1));
        }

        #[test]
        fn prop_mask_from_col_row(col in 1usize..=80, row in 1usize..=336) {
            let mask = make_pixel_mask_from_col_row(&[col], &[row], 0, 1).unwrap();
            prop_assert_eq!(mask.iter_nonzero().collect::<Vec<_>>(), vec![(col - 1, row - 1)]);
        }
    }
}
