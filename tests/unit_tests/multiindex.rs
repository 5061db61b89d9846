use crate::mi;
use proptest::collection::vec;
use proptest::prelude::*;
use sgfem::multiindex::{MultiIndex, NegativeDegreeError};

#[test]
fn unit_and_zero() {
    assert!(MultiIndex::zero().is_zero());
    assert_eq!(MultiIndex::zero().len(), 0);
    assert_eq!(MultiIndex::unit(2), mi(&[0, 0, 1]));
    assert_eq!(MultiIndex::unit(2).order(), 1);
    assert_eq!(mi(&[2, 0, 1]).support().collect::<Vec<_>>(), vec![(0, 2), (2, 1)]);
}

#[test]
fn decrement_below_zero_is_an_error() {
    let mu = mi(&[1, 0, 3]);
    assert_eq!(mu.decrement(0).unwrap(), mi(&[0, 0, 3]));
    assert_eq!(mu.decrement(2).unwrap(), mi(&[1, 0, 2]));
    assert_eq!(
        mu.decrement(1),
        Err(NegativeDegreeError {
            multi_index: mu.clone(),
            dim: 1
        })
    );
    assert!(mu.decrement(7).is_err());
    // Decrementing the last non-zero degree shortens the index
    assert_eq!(mi(&[1]).decrement(0).unwrap(), MultiIndex::zero());
}

#[test]
fn ordering_starts_at_mean_and_grows_with_order() {
    let mut indices = vec![mi(&[0, 1]), mi(&[2]), mi(&[]), mi(&[1]), mi(&[1, 1])];
    indices.sort();
    assert_eq!(indices, vec![mi(&[]), mi(&[0, 1]), mi(&[1]), mi(&[1, 1]), mi(&[2])]);
}

#[test]
fn containment() {
    assert!(mi(&[]).is_contained_in(&mi(&[1])));
    assert!(mi(&[1, 0, 1]).is_contained_in(&mi(&[2, 1, 1])));
    assert!(!mi(&[0, 2]).is_contained_in(&mi(&[5, 1])));
    assert!(!mi(&[0, 0, 1]).is_contained_in(&mi(&[1, 1])));
}

#[test]
fn serializes_as_list_of_degrees() {
    let mu = mi(&[1, 0, 2]);
    let json = serde_json::to_string(&mu).unwrap();
    assert_eq!(json, "[1,0,2]");
    let parsed: MultiIndex = serde_json::from_str("[1,0,2,0]").unwrap();
    assert_eq!(parsed, mu);
}

proptest! {
    #[test]
    fn increment_then_decrement_is_identity(degrees in vec(0..4u32, 0..6), dim in 0..8usize) {
        let mu = MultiIndex::from_degrees(degrees);
        let up = mu.increment(dim);
        prop_assert_eq!(up.degree(dim), mu.degree(dim) + 1);
        prop_assert_eq!(up.order(), mu.order() + 1);
        prop_assert!(mu.is_contained_in(&up));
        prop_assert!(mu < up);
        prop_assert_eq!(up.decrement(dim).unwrap(), mu);
    }

    #[test]
    fn trailing_zeros_do_not_matter(degrees in vec(0..4u32, 0..6), zeros in 0..4usize) {
        let mut padded = degrees.clone();
        padded.extend(std::iter::repeat(0).take(zeros));
        let mu = MultiIndex::from_degrees(degrees);
        let nu = MultiIndex::from_degrees(padded);
        prop_assert_eq!(&mu, &nu);
        prop_assert!(mu.degrees().last().map_or(true, |&d| d > 0));
    }
}
