//! Plain recursive evaluation, one sub-product after another.

use crate::Error;
use crate::algorithm::{OperandPair, ProductEvaluator, StrassenCore, into_seven};
use crate::matrix::Matrix;

/// Evaluates each sub-product by a direct recursive call, in index order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialEvaluator;

impl SequentialEvaluator {
    pub fn multiply(&self, core: &StrassenCore, a: &Matrix, b: &Matrix) -> Result<Matrix, Error> {
        core.multiply(a, b, self)
    }
}

impl ProductEvaluator for SequentialEvaluator {
    fn evaluate(&self, core: &StrassenCore, pairs: [OperandPair; 7]) -> Result<[Matrix; 7], Error> {
        let products = pairs
            .into_iter()
            .map(|pair| core.multiply(&pair.left, &pair.right, self))
            .collect::<Result<Vec<_>, _>>()?;
        into_seven(products)
    }
}
