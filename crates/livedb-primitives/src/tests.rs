use crate::{canonical_cmp, normalize_date, NormalizeError, NullsOrder, Value};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::cmp::Ordering;

#[test]
fn date_equality_compares_by_instant() {
    let a = Value::Date(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    let b = Value::Date(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(a, b);
}

#[test]
fn nan_float_rejected_for_indexing() {
    assert_eq!(
        normalize_date(&Value::Float(f64::NAN)),
        Err(NormalizeError::NanFloat)
    );
    assert!(normalize_date(&Value::Float(1.5)).is_ok());
}

#[test]
fn mixed_variants_order_by_rank_not_value() {
    // An Int always sorts before a Text regardless of the underlying
    // values, because canonical ordering is rank-first.
    assert_eq!(
        canonical_cmp(&Value::Int(999), &Value::Text("a".into())),
        Ordering::Less
    );
}

#[test]
fn nulls_order_default_sorts_first() {
    use crate::compare::ordered_cmp;
    assert_eq!(
        ordered_cmp(&Value::Null, &Value::Int(1), NullsOrder::First),
        Ordering::Less
    );
    assert_eq!(
        ordered_cmp(&Value::Null, &Value::Int(1), NullsOrder::Last),
        Ordering::Greater
    );
}

proptest! {
    #[test]
    fn canonical_cmp_is_a_total_order(a in any::<i64>(), b in any::<i64>(), c in any::<i64>()) {
        let (va, vb, vc) = (Value::Int(a), Value::Int(b), Value::Int(c));
        // antisymmetry
        prop_assert_eq!(canonical_cmp(&va, &vb).reverse(), canonical_cmp(&vb, &va));
        // transitivity when a <= b <= c
        if canonical_cmp(&va, &vb) != Ordering::Greater && canonical_cmp(&vb, &vc) != Ordering::Greater {
            prop_assert_ne!(canonical_cmp(&va, &vc), Ordering::Greater);
        }
    }
}
