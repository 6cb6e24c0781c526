//! Property tests for the layout algebra
//!
//! These tests check the laws `join` and `equivalent_to` must satisfy for the
//! inference rules to be order independent.

use proptest::prelude::*;
use tessel_layout::algebra::join;
use tessel_layout::{ImplicitDim, Offset, TargetShape, Tiling, VectorLayout};

const TARGET: TargetShape = TargetShape::new(8, 128);

fn offset() -> impl Strategy<Value = Offset> {
    prop_oneof![Just(Offset::Replicated), (0i64..4).prop_map(Offset::Fixed)]
}

fn implicit_dim() -> impl Strategy<Value = ImplicitDim> {
    prop_oneof![
        Just(ImplicitDim::None),
        Just(ImplicitDim::SecondMinor),
        Just(ImplicitDim::Minor),
    ]
}

fn layout() -> impl Strategy<Value = VectorLayout> {
    (
        prop_oneof![Just(8u32), Just(16u32), Just(32u32)],
        offset(),
        offset(),
        prop_oneof![Just(None), Just(Some(Tiling::new(1, 128)))],
        implicit_dim(),
    )
        .prop_map(|(bitwidth, o0, o1, tiling, implicit)| {
            let tiling = tiling.unwrap_or_else(|| TARGET.native_tiling(bitwidth));
            VectorLayout::new(bitwidth, [o0, o1], tiling, implicit)
        })
}

fn shape() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..300, 2..4)
}

// ============================================================
// join
// ============================================================

proptest! {
    #[test]
    fn join_is_commutative(a in layout(), b in layout(), shape in shape()) {
        prop_assert_eq!(join(&a, &b, &shape), join(&b, &a, &shape));
    }

    #[test]
    fn join_is_idempotent(a in layout(), shape in shape()) {
        prop_assert_eq!(join(&a, &a, &shape), Some(a));
    }

    #[test]
    fn join_is_associative(
        a in layout(),
        b in layout(),
        c in layout(),
        shape in shape(),
    ) {
        let left = join(&a, &b, &shape).and_then(|ab| join(&ab, &c, &shape));
        let right = join(&b, &c, &shape).and_then(|bc| join(&a, &bc, &shape));
        prop_assert_eq!(left, right);
    }

    // The joined layout never replicates an axis one of the inputs fixes.
    #[test]
    fn join_never_adds_replication(a in layout(), b in layout(), shape in shape()) {
        if let Some(joined) = join(&a, &b, &shape) {
            for axis in 0..2 {
                let fixed = !a.offsets()[axis].is_replicated() || !b.offsets()[axis].is_replicated();
                prop_assert!(!fixed || !joined.offsets()[axis].is_replicated());
            }
        }
    }
}

// ============================================================
// equivalent_to
// ============================================================

proptest! {
    #[test]
    fn equivalence_is_reflexive(a in layout(), shape in shape()) {
        prop_assert!(a.equivalent_to(&a, &shape, TARGET));
    }

    #[test]
    fn equivalence_is_symmetric(a in layout(), b in layout(), shape in shape()) {
        prop_assert_eq!(
            a.equivalent_to(&b, &shape, TARGET),
            b.equivalent_to(&a, &shape, TARGET)
        );
    }
}
