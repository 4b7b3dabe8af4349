use proptest::prelude::*;
use strassen::matrix::{flatten, join, naive_multiply, split, unflatten};
use strassen::{Matrix, ParallelEvaluator, SequentialEvaluator, StrassenCore};

fn matrix_of(side: usize) -> impl Strategy<Value = Matrix> {
    prop::collection::vec(any::<i32>(), side * side)
        .prop_map(move |values| unflatten(values, side).unwrap())
}

fn any_matrix(max_side: usize) -> impl Strategy<Value = Matrix> {
    (0..=max_side).prop_flat_map(matrix_of)
}

/// Two matrices of the same power-of-two side up to 16.
fn operand_pair() -> impl Strategy<Value = (Matrix, Matrix)> {
    (0u32..=4).prop_flat_map(|exp| {
        let side = 1usize << exp;
        (matrix_of(side), matrix_of(side))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn flatten_round_trips(matrix in any_matrix(9)) {
        let side = matrix.side();
        prop_assert_eq!(unflatten(flatten(&matrix), side).unwrap(), matrix);
    }

    #[test]
    fn unflatten_round_trips(values in prop::collection::vec(any::<i32>(), 25)) {
        prop_assert_eq!(flatten(&unflatten(values.clone(), 5).unwrap()), values);
    }

    #[test]
    fn split_then_join_only_touches_the_block(
        (matrix, row, col, size) in any_matrix(8)
            .prop_filter("non-empty", |m| m.side() > 0)
            .prop_flat_map(|m| {
                let side = m.side();
                (Just(m), 0..side, 0..side)
            })
            .prop_flat_map(|(m, row, col)| {
                let limit = m.side() - row.max(col);
                (Just(m), Just(row), Just(col), 0..=limit)
            }),
        fill in any::<i32>(),
    ) {
        let block = split(&matrix, row, col, size).unwrap();

        let mut restored = matrix.clone();
        join(&block, &mut restored, row, col).unwrap();
        prop_assert_eq!(&restored, &matrix);

        let mut overwritten = matrix.clone();
        let filler = unflatten(vec![fill; size * size], size).unwrap();
        join(&filler, &mut overwritten, row, col).unwrap();
        for i in 0..matrix.side() {
            for j in 0..matrix.side() {
                let inside = (row..row + size).contains(&i) && (col..col + size).contains(&j);
                let expected = if inside { fill } else { matrix.get(i, j) };
                prop_assert_eq!(overwritten.get(i, j), expected);
            }
        }
    }

    #[test]
    fn strassen_matches_naive_even_when_overflowing(
        (a, b) in operand_pair(),
        cutover in 1usize..4
    ) {
        let core = StrassenCore::new(cutover).unwrap();
        let expected = naive_multiply(&a, &b).unwrap();
        prop_assert_eq!(SequentialEvaluator.multiply(&core, &a, &b).unwrap(), expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn parallel_matches_sequential((a, b) in operand_pair()) {
        let core = StrassenCore::new(2).unwrap();
        let parallel = ParallelEvaluator::new(3).unwrap();
        prop_assert_eq!(
            parallel.multiply(&core, &a, &b).unwrap(),
            SequentialEvaluator.multiply(&core, &a, &b).unwrap()
        );
    }
}
