//! Combinatorial input-space construction.
//!
//! Probing is tolerant of individual failures by sheer volume: the space is
//! a fixed boundary-value catalog crossed with exhaustive small ranges and
//! a slice of uniform random values, then replicated across every subset of
//! the precondition flags under permutation.

use std::collections::HashSet;

use rand::Rng;
use thiserror::Error;

use crate::flags::Flags;

/// Number of fully random values (or pairs) mixed into each value set.
pub const RANDOM_SAMPLES: usize = 50;

/// One concrete probe input: a value per dynamic operand plus the
/// precondition flag bits loaded before the instruction runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub values: Vec<u64>,
    pub flags: Flags,
}

#[derive(Debug, Clone, Copy, Error)]
pub enum InputSpaceError {
    #[error("instructions with {0} dynamic operands are not supported (at most 2)")]
    TooManyOperands(usize),
}

/// The fixed catalog of numerically interesting values: zero, one, values
/// adjacent to shift-width and byte/word/dword/qword boundaries, and every
/// power of two. Deduplicated, order-preserving. `extended` additionally
/// folds in all of `0..256`.
pub fn boundary_catalog(extended: bool) -> Vec<u64> {
    let named: &[u64] = &[
        0x0,
        0x1,
        7,
        8,
        15,
        16,
        17,
        31,
        32,
        33,
        63,
        64,
        65,
        0x7f,
        0x80,
        0xff,
        0x100,
        0x7fff,
        0x8000,
        0x10000,
        0x7fffffff,
        0x80000000,
        0x100000000,
        0x7fffffffffffffff,
        0x8000000000000000,
    ];

    let mut seen = HashSet::new();
    let mut catalog = Vec::new();
    let powers = (0..64).map(|i| 1u64 << i);
    let extension = if extended { 0..256u64 } else { 0..0u64 };
    for value in named.iter().copied().chain(powers).chain(extension) {
        if seen.insert(value) {
            catalog.push(value);
        }
    }
    catalog
}

/// Base value lists for `n` dynamic operands, before flag permutation.
///
/// - `n = 0`: one empty list.
/// - `n = 1`: every catalog value, every value in `0..1024`, plus
///   [`RANDOM_SAMPLES`] random values.
/// - `n = 2`: catalog x catalog, random x catalog, catalog x random, plus
///   [`RANDOM_SAMPLES`] random pairs.
pub fn value_sets(
    dynamic_operands: usize,
    extended: bool,
    rng: &mut impl Rng,
) -> Result<Vec<Vec<u64>>, InputSpaceError> {
    let catalog = boundary_catalog(extended);
    match dynamic_operands {
        0 => Ok(vec![vec![]]),
        1 => {
            let mut sets: Vec<Vec<u64>> = catalog.iter().map(|&v| vec![v]).collect();
            sets.extend((0..1024u64).map(|v| vec![v]));
            sets.extend((0..RANDOM_SAMPLES).map(|_| vec![rng.gen::<u64>()]));
            Ok(sets)
        }
        2 => {
            let mut sets: Vec<Vec<u64>> = Vec::new();
            for &a in &catalog {
                for &b in &catalog {
                    sets.push(vec![a, b]);
                }
            }
            for &v in &catalog {
                sets.push(vec![rng.gen::<u64>(), v]);
            }
            for &v in &catalog {
                sets.push(vec![v, rng.gen::<u64>()]);
            }
            sets.extend((0..RANDOM_SAMPLES).map(|_| vec![rng.gen::<u64>(), rng.gen::<u64>()]));
            Ok(sets)
        }
        n => Err(InputSpaceError::TooManyOperands(n)),
    }
}

/// Replicate every base value list across the power set of `permute`.
///
/// An empty permutation set yields exactly the base inputs with no flags
/// preloaded.
pub fn permute_with_flags(sets: Vec<Vec<u64>>, permute: Flags) -> Vec<Input> {
    let mut combinations = vec![Flags::empty()];
    for (_, flag) in permute.iter_names() {
        let with_flag: Vec<Flags> = combinations.iter().map(|&c| c | flag).collect();
        combinations.extend(with_flag);
    }

    sets.into_iter()
        .flat_map(|values| {
            combinations.iter().map(move |&flags| Input {
                values: values.clone(),
                flags,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0x5eed)
    }

    #[test]
    fn catalog_is_deduplicated() {
        for extended in [false, true] {
            let catalog = boundary_catalog(extended);
            let unique: HashSet<u64> = catalog.iter().copied().collect();
            assert_eq!(unique.len(), catalog.len());
        }
    }

    #[test]
    fn extended_catalog_adds_small_values() {
        let base = boundary_catalog(false);
        let extended = boundary_catalog(true);
        assert!(extended.len() > base.len());
        assert!(extended.contains(&200));
        assert!(!base.contains(&200));
    }

    #[test]
    fn zero_operands_yield_one_empty_input() {
        let sets = value_sets(0, false, &mut rng()).unwrap();
        assert_eq!(sets, vec![Vec::<u64>::new()]);
    }

    #[test]
    fn one_operand_count_is_catalog_plus_range_plus_random() {
        let catalog_len = boundary_catalog(false).len();
        let sets = value_sets(1, false, &mut rng()).unwrap();
        assert_eq!(sets.len(), catalog_len + 1024 + RANDOM_SAMPLES);
        assert!(sets.iter().all(|s| s.len() == 1));

        let inputs = permute_with_flags(sets, Flags::empty());
        assert_eq!(inputs.len(), catalog_len + 1024 + RANDOM_SAMPLES);
        assert!(inputs.iter().all(|i| i.flags.is_empty()));
    }

    #[test]
    fn two_operand_count_covers_all_combinations() {
        let catalog_len = boundary_catalog(false).len();
        let sets = value_sets(2, false, &mut rng()).unwrap();
        assert_eq!(
            sets.len(),
            catalog_len * catalog_len + 2 * catalog_len + RANDOM_SAMPLES
        );
        assert!(sets.iter().all(|s| s.len() == 2));
    }

    #[test]
    fn three_operands_are_rejected() {
        assert!(matches!(
            value_sets(3, false, &mut rng()),
            Err(InputSpaceError::TooManyOperands(3))
        ));
    }

    #[test]
    fn flag_permutation_is_the_power_set() {
        let sets = vec![vec![1u64], vec![2u64]];
        let inputs = permute_with_flags(sets, Flags::CF | Flags::ZF);
        assert_eq!(inputs.len(), 2 * 4);

        let masks: HashSet<u64> = inputs.iter().map(|i| i.flags.bits()).collect();
        let expected: HashSet<u64> = [
            Flags::empty().bits(),
            Flags::CF.bits(),
            Flags::ZF.bits(),
            (Flags::CF | Flags::ZF).bits(),
        ]
        .into_iter()
        .collect();
        assert_eq!(masks, expected);

        // Base-major order: all flag subsets of a value list are adjacent.
        assert!(inputs[..4].iter().all(|i| i.values == vec![1]));
        assert!(inputs[4..].iter().all(|i| i.values == vec![2]));
    }
}
