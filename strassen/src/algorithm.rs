//! Strassen's recursion, independent of how sub-products are obtained.
//!
//! [`StrassenCore::multiply`] is a two-state machine. At or below the cutover
//! it multiplies directly. Above it, it splits both operands into quadrants,
//! derives the seven operand pairs, hands them to a [`ProductEvaluator`] and
//! recombines the seven products into the result.

use tracing::trace;

use crate::Error;
use crate::matrix::{self, Matrix};

/// Side at or below which recursion stops.
pub const DEFAULT_CUTOVER: usize = 32;

/// The two factors of one Strassen sub-product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandPair {
    pub left: Matrix,
    pub right: Matrix,
}

impl OperandPair {
    fn new(left: Matrix, right: Matrix) -> Self {
        Self { left, right }
    }
}

/// The four same-size blocks of a matrix split at its midline.
#[derive(Debug, Clone)]
pub struct Quadrants {
    pub q11: Matrix,
    pub q12: Matrix,
    pub q21: Matrix,
    pub q22: Matrix,
}

impl Quadrants {
    /// Splits an even-sided matrix into its quadrants.
    pub fn split(parent: &Matrix) -> Result<Self, Error> {
        let half = parent.side() / 2;
        Ok(Self {
            q11: matrix::split(parent, 0, 0, half)?,
            q12: matrix::split(parent, 0, half, half)?,
            q21: matrix::split(parent, half, 0, half)?,
            q22: matrix::split(parent, half, half, half)?,
        })
    }

    /// Reassembles four quadrants into one matrix of twice their side.
    pub fn join(self) -> Result<Matrix, Error> {
        let half = self.q11.side();
        let mut parent = Matrix::zeros(half * 2);
        matrix::join(&self.q11, &mut parent, 0, 0)?;
        matrix::join(&self.q12, &mut parent, 0, half)?;
        matrix::join(&self.q21, &mut parent, half, 0)?;
        matrix::join(&self.q22, &mut parent, half, half)?;
        Ok(parent)
    }
}

/// One of the seven products M1..M7 of a Strassen step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubProduct {
    M1,
    M2,
    M3,
    M4,
    M5,
    M6,
    M7,
}

impl SubProduct {
    /// All seven products in index order.
    pub const ALL: [SubProduct; 7] = [
        SubProduct::M1,
        SubProduct::M2,
        SubProduct::M3,
        SubProduct::M4,
        SubProduct::M5,
        SubProduct::M6,
        SubProduct::M7,
    ];

    /// 1-based index, as in M1..M7.
    pub fn index(self) -> usize {
        self as usize + 1
    }

    pub fn from_index(index: usize) -> Option<Self> {
        index.checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }

    /// Derives this product's operand pair from the quadrants of A and B.
    pub fn derive(self, a: &Quadrants, b: &Quadrants) -> Result<OperandPair, Error> {
        use matrix::{add, subtract};

        let pair = match self {
            SubProduct::M1 => OperandPair::new(add(&a.q11, &a.q22)?, add(&b.q11, &b.q22)?),
            SubProduct::M2 => OperandPair::new(add(&a.q21, &a.q22)?, b.q11.clone()),
            SubProduct::M3 => OperandPair::new(a.q11.clone(), subtract(&b.q12, &b.q22)?),
            SubProduct::M4 => OperandPair::new(a.q22.clone(), subtract(&b.q21, &b.q11)?),
            SubProduct::M5 => OperandPair::new(add(&a.q11, &a.q12)?, b.q22.clone()),
            SubProduct::M6 => OperandPair::new(subtract(&a.q21, &a.q11)?, add(&b.q11, &b.q12)?),
            SubProduct::M7 => OperandPair::new(subtract(&a.q12, &a.q22)?, add(&b.q21, &b.q22)?),
        };
        Ok(pair)
    }
}

/// Derives all seven operand pairs, in index order.
pub fn derive_all(a: &Quadrants, b: &Quadrants) -> Result<[OperandPair; 7], Error> {
    let pairs = SubProduct::ALL
        .iter()
        .map(|product| product.derive(a, b))
        .collect::<Result<Vec<_>, _>>()?;
    into_seven(pairs)
}

/// Combines M1..M7 into the four result quadrants.
pub fn recombine(products: [Matrix; 7]) -> Result<Quadrants, Error> {
    use matrix::{add, subtract};

    let [m1, m2, m3, m4, m5, m6, m7] = products;
    Ok(Quadrants {
        q11: add(&subtract(&add(&m1, &m4)?, &m5)?, &m7)?,
        q12: add(&m3, &m5)?,
        q21: add(&m2, &m4)?,
        q22: add(&subtract(&add(&m1, &m3)?, &m2)?, &m6)?,
    })
}

/// Converts a vector of exactly seven items into an array.
pub(crate) fn into_seven<T>(items: Vec<T>) -> Result<[T; 7], Error> {
    items
        .try_into()
        .map_err(|items: Vec<T>| {
            Error::Protocol(format!("expected 7 sub-products, got {}", items.len()))
        })
}

/// The strategy that produces the seven sub-products of one recursive step.
///
/// Implementations decide *how* each `left * right` is computed (inline,
/// as pooled tasks, on remote ranks) but must return the products in the
/// order the pairs were given.
pub trait ProductEvaluator: Sync {
    fn evaluate(&self, core: &StrassenCore, pairs: [OperandPair; 7]) -> Result<[Matrix; 7], Error>;
}

/// Strassen's algorithm with a fixed cutover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrassenCore {
    cutover: usize,
}

impl Default for StrassenCore {
    fn default() -> Self {
        Self {
            cutover: DEFAULT_CUTOVER,
        }
    }
}

impl StrassenCore {
    pub fn new(cutover: usize) -> Result<Self, Error> {
        if cutover == 0 {
            return Err(Error::Config("cutover must be at least 1".to_string()));
        }
        Ok(Self { cutover })
    }

    pub fn cutover(&self) -> usize {
        self.cutover
    }

    /// Whether a product of side `side` is computed directly.
    pub fn is_base_case(&self, side: usize) -> bool {
        side <= self.cutover
    }

    /// Checks that `side` halves exactly at every level above the cutover.
    pub fn check_side(&self, side: usize) -> Result<(), Error> {
        let mut current = side;
        while !self.is_base_case(current) {
            if current % 2 != 0 {
                return Err(Error::NotPowerOfTwo {
                    side,
                    cutover: self.cutover,
                });
            }
            current /= 2;
        }
        Ok(())
    }

    /// Smallest side `>= side` that [`check_side`](Self::check_side) accepts.
    pub fn padded_side(&self, side: usize) -> usize {
        if self.check_side(side).is_ok() {
            side
        } else {
            side.next_power_of_two()
        }
    }

    /// Computes `a * b`, delegating the seven sub-products of each
    /// recursive step to `evaluator`.
    pub fn multiply<E>(&self, a: &Matrix, b: &Matrix, evaluator: &E) -> Result<Matrix, Error>
    where
        E: ProductEvaluator + ?Sized,
    {
        if a.side() != b.side() {
            return Err(Error::DimensionMismatch(a.side(), b.side()));
        }
        let side = a.side();
        if self.is_base_case(side) {
            return matrix::naive_multiply(a, b);
        }
        self.check_side(side)?;

        trace!(side, "strassen split");
        let pairs = {
            let a = Quadrants::split(a)?;
            let b = Quadrants::split(b)?;
            derive_all(&a, &b)?
        };
        let products = evaluator.evaluate(self, pairs)?;
        for product in &products {
            if product.side() != side / 2 {
                return Err(Error::DimensionMismatch(product.side(), side / 2));
            }
        }
        recombine(products)?.join()
    }
}
