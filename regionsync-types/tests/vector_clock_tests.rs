use proptest::prelude::*;
use regionsync_types::{CausalOrder, RegionId, VectorClock};

fn region(name: &str) -> RegionId {
    RegionId::new(name).unwrap()
}

fn clock(entries: &[(&str, u64)]) -> VectorClock {
    entries.iter().map(|(r, t)| (region(r), *t)).collect()
}

// ── Basic operations ────────────────────────────────────────────

#[test]
fn new_clock_is_empty() {
    let vc = VectorClock::new();
    assert!(vc.is_empty());
    assert_eq!(vc.get(&region("eu")), 0);
}

#[test]
fn increment_returns_new_value() {
    let eu = region("eu");
    let mut vc = VectorClock::new();
    assert_eq!(vc.increment(&eu), 1);
    assert_eq!(vc.increment(&eu), 2);
    assert_eq!(vc.get(&eu), 2);
    assert_eq!(vc.len(), 1);
}

#[test]
fn merge_takes_elementwise_max() {
    let mut a = clock(&[("eu", 3), ("us", 1)]);
    let b = clock(&[("eu", 1), ("us", 4), ("ap", 2)]);
    a.merge(&b);
    assert_eq!(a.get(&region("eu")), 3);
    assert_eq!(a.get(&region("us")), 4);
    assert_eq!(a.get(&region("ap")), 2);
}

#[test]
fn observe_never_lowers() {
    let eu = region("eu");
    let mut vc = clock(&[("eu", 5)]);
    vc.observe(&eu, 2);
    assert_eq!(vc.get(&eu), 5);
}

// ── Comparison ──────────────────────────────────────────────────

#[test]
fn compare_orders_causally_related_clocks() {
    let a = clock(&[("eu", 1)]);
    let b = clock(&[("eu", 2)]);
    assert_eq!(a.compare(&b), CausalOrder::Before);
    assert_eq!(b.compare(&a), CausalOrder::After);
    assert!(a.is_before(&b));
    assert!(b.is_after(&a));
    assert!(b.dominates(&a));
}

#[test]
fn compare_detects_concurrency() {
    let a = clock(&[("eu", 2), ("us", 1)]);
    let b = clock(&[("eu", 1), ("us", 2)]);
    assert_eq!(a.compare(&b), CausalOrder::Concurrent);
    assert!(a.is_concurrent(&b));
    assert!(!a.dominates(&b));
}

#[test]
fn missing_keys_count_as_zero() {
    let a = clock(&[("eu", 1)]);
    let b = clock(&[("eu", 1), ("us", 0)]);
    assert_eq!(a.compare(&b), CausalOrder::Equal);
    assert_eq!(a, b);
}

#[test]
fn absent_clock_rules() {
    let a = clock(&[("eu", 1)]);
    assert_eq!(VectorClock::compare_optional(None, None), CausalOrder::Equal);
    assert_eq!(VectorClock::compare_optional(None, Some(&a)), CausalOrder::Before);
    assert_eq!(VectorClock::compare_optional(Some(&a), None), CausalOrder::After);
}

#[test]
fn serializes_as_flat_map() {
    let vc = clock(&[("eu", 3)]);
    let json = serde_json::to_value(&vc).unwrap();
    assert_eq!(json, serde_json::json!({ "eu": 3 }));
    let back: VectorClock = serde_json::from_value(json).unwrap();
    assert_eq!(back, vc);
}

#[test]
fn display_is_sorted() {
    let vc = clock(&[("us", 1), ("eu", 2)]);
    assert_eq!(vc.to_string(), "{eu: 2, us: 1}");
}

// ── Properties ──────────────────────────────────────────────────

fn arb_clock() -> impl Strategy<Value = VectorClock> {
    prop::collection::vec((prop::sample::select(vec!["eu", "us", "ap", "sa"]), 0u64..6), 0..6)
        .prop_map(|entries| entries.into_iter().map(|(r, t)| (region(r), t)).collect())
}

proptest! {
    #[test]
    fn compare_is_antisymmetric(a in arb_clock(), b in arb_clock()) {
        prop_assert_eq!(a.compare(&b), b.compare(&a).reverse());
    }

    #[test]
    fn merge_is_idempotent(a in arb_clock()) {
        prop_assert_eq!(a.merged(&a), a);
    }

    #[test]
    fn merge_is_commutative(a in arb_clock(), b in arb_clock()) {
        prop_assert_eq!(a.merged(&b), b.merged(&a));
    }

    #[test]
    fn merge_is_associative(a in arb_clock(), b in arb_clock(), c in arb_clock()) {
        prop_assert_eq!(a.merged(&b).merged(&c), a.merged(&b.merged(&c)));
    }

    #[test]
    fn merged_dominates_both_inputs(a in arb_clock(), b in arb_clock()) {
        let m = a.merged(&b);
        prop_assert!(m.dominates(&a));
        prop_assert!(m.dominates(&b));
    }

    #[test]
    fn increment_moves_strictly_after(a in arb_clock()) {
        let mut b = a.clone();
        b.increment(&region("eu"));
        prop_assert_eq!(b.compare(&a), CausalOrder::After);
    }
}
