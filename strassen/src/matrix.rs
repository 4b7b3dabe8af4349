//! Square integer matrices and the elementary operations Strassen needs.
//!
//! Elements are `i32` and every arithmetic step wraps on overflow, in debug
//! and release builds alike. Wrapping integers form a ring, so any
//! rearrangement of the same sums and products (Strassen included) yields
//! bit-identical results to the cubic definition.

use std::fmt;

use rand::Rng;

use crate::Error;

/// Element type of every matrix.
pub type Element = i32;

/// A square, row-major matrix of side `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
    side: usize,
    data: Vec<Element>,
}

impl Matrix {
    pub fn zeros(side: usize) -> Self {
        Self {
            side,
            data: vec![0; side * side],
        }
    }

    pub fn identity(side: usize) -> Self {
        let mut matrix = Self::zeros(side);
        for i in 0..side {
            matrix.data[i * side + i] = 1;
        }
        matrix
    }

    /// Builds a matrix from nested rows, rejecting non-square input.
    pub fn from_rows(rows: Vec<Vec<Element>>) -> Result<Self, Error> {
        let side = rows.len();
        let mut data = Vec::with_capacity(side * side);
        for (row, values) in rows.into_iter().enumerate() {
            if values.len() != side {
                return Err(Error::Ragged {
                    row,
                    len: values.len(),
                    side,
                });
            }
            data.extend(values);
        }
        Ok(Self { side, data })
    }

    /// Fills a matrix with uniform values in `0..10`.
    pub fn random<R: Rng>(side: usize, rng: &mut R) -> Self {
        let data = (0..side * side).map(|_| rng.gen_range(0..10)).collect();
        Self { side, data }
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn get(&self, row: usize, col: usize) -> Element {
        self.data[row * self.side + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: Element) {
        self.data[row * self.side + col] = value;
    }

    pub fn row(&self, row: usize) -> &[Element] {
        &self.data[row * self.side..(row + 1) * self.side]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Element]> {
        // chunks(0) panics, and an empty matrix has no rows anyway.
        self.data.chunks(self.side.max(1))
    }

    pub fn as_slice(&self) -> &[Element] {
        &self.data
    }

    pub fn into_flat(self) -> Vec<Element> {
        self.data
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.rows() {
            for value in row {
                write!(f, " {value}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn check_same_side(a: &Matrix, b: &Matrix) -> Result<(), Error> {
    if a.side != b.side {
        return Err(Error::DimensionMismatch(a.side, b.side));
    }
    Ok(())
}

fn zip_with(a: &Matrix, b: &Matrix, op: fn(Element, Element) -> Element) -> Result<Matrix, Error> {
    check_same_side(a, b)?;
    let data = a.data.iter().zip(&b.data).map(|(&x, &y)| op(x, y)).collect();
    Ok(Matrix {
        side: a.side,
        data,
    })
}

/// Elementwise `a + b`, wrapping on overflow.
pub fn add(a: &Matrix, b: &Matrix) -> Result<Matrix, Error> {
    zip_with(a, b, Element::wrapping_add)
}

/// Elementwise `a - b`, wrapping on overflow.
pub fn subtract(a: &Matrix, b: &Matrix) -> Result<Matrix, Error> {
    zip_with(a, b, Element::wrapping_sub)
}

fn check_block(parent: usize, row: usize, col: usize, size: usize) -> Result<(), Error> {
    let fits = row
        .checked_add(size)
        .zip(col.checked_add(size))
        .is_some_and(|(bottom, right)| bottom <= parent && right <= parent);
    if !fits {
        return Err(Error::BlockOutOfBounds {
            size,
            row,
            col,
            parent,
        });
    }
    Ok(())
}

/// Copies the `size`x`size` block of `parent` starting at (`row`, `col`).
pub fn split(parent: &Matrix, row: usize, col: usize, size: usize) -> Result<Matrix, Error> {
    check_block(parent.side, row, col, size)?;
    let mut data = Vec::with_capacity(size * size);
    for i in row..row + size {
        let start = i * parent.side + col;
        data.extend_from_slice(&parent.data[start..start + size]);
    }
    Ok(Matrix { side: size, data })
}

/// Writes `block` into `parent` with its top-left corner at (`row`, `col`).
///
/// Nothing outside the target region is touched.
pub fn join(block: &Matrix, parent: &mut Matrix, row: usize, col: usize) -> Result<(), Error> {
    check_block(parent.side, row, col, block.side)?;
    for (i, values) in block.rows().enumerate() {
        let start = (row + i) * parent.side + col;
        parent.data[start..start + block.side].copy_from_slice(values);
    }
    Ok(())
}

/// Row-major linearisation, the form matrices take on the wire.
pub fn flatten(matrix: &Matrix) -> Vec<Element> {
    matrix.data.clone()
}

/// Inverse of [`flatten`]. The buffer must hold exactly `side * side` values.
pub fn unflatten(buffer: Vec<Element>, side: usize) -> Result<Matrix, Error> {
    if Some(buffer.len()) != side.checked_mul(side) {
        return Err(Error::BufferLength {
            len: buffer.len(),
            side,
        });
    }
    Ok(Matrix { side, data: buffer })
}

/// The cubic definition `C[i][j] = sum_k A[i][k] * B[k][j]`.
pub fn naive_multiply(a: &Matrix, b: &Matrix) -> Result<Matrix, Error> {
    check_same_side(a, b)?;
    let n = a.side;
    let mut product = Matrix::zeros(n);
    // i-k-j order keeps the inner loop on contiguous rows of `b` and `product`.
    for i in 0..n {
        for k in 0..n {
            let scale = a.data[i * n + k];
            if scale == 0 {
                continue;
            }
            let b_row = &b.data[k * n..(k + 1) * n];
            let out = &mut product.data[i * n..(i + 1) * n];
            for (acc, &value) in out.iter_mut().zip(b_row) {
                *acc = acc.wrapping_add(scale.wrapping_mul(value));
            }
        }
    }
    Ok(product)
}

/// Embeds `matrix` in the top-left corner of a zero matrix of side `side`.
pub fn pad_to(matrix: &Matrix, side: usize) -> Result<Matrix, Error> {
    let mut padded = Matrix::zeros(side);
    join(matrix, &mut padded, 0, 0)?;
    Ok(padded)
}

/// Keeps the top-left `side`x`side` block of `matrix`.
pub fn truncate(matrix: &Matrix, side: usize) -> Result<Matrix, Error> {
    split(matrix, 0, 0, side)
}
