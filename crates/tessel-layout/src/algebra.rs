//! Layout algebra.
//!
//! Two operations combine layouts of the same vector shape:
//!
//! - [`join`] finds the strictest layout both sides admit, used when two
//!   producers feed one consumer (the branches of an `if`, the operands of
//!   an elementwise op).
//! - [`VectorLayout::equivalent_to`] decides whether two layouts place the
//!   data of a given shape into exactly the same vregs.

use crate::{ImplicitDim, Layout, Offset, TargetShape, VectorLayout};

/// Joins two offsets along one axis.
///
/// Replication yields to a concrete offset. Two different concrete offsets
/// have no common refinement.
#[must_use]
pub fn join_offset(a: Offset, b: Offset) -> Option<Offset> {
    match (a, b) {
        (Offset::Replicated, other) | (other, Offset::Replicated) => Some(other),
        (Offset::Fixed(x), Offset::Fixed(y)) if x == y => Some(a),
        (Offset::Fixed(_), Offset::Fixed(_)) => None,
    }
}

/// Joins two layouts of a vector of the given shape.
///
/// Returns `None` when the bitwidths, tilings or implicit dims differ, or
/// when both sides fix different offsets on the same axis.
#[must_use]
pub fn join(a: &VectorLayout, b: &VectorLayout, shape: &[i64]) -> Layout {
    debug_assert!(!shape.is_empty(), "layouts are never joined for rank 0");
    if a.bitwidth() != b.bitwidth()
        || a.tiling() != b.tiling()
        || a.implicit_dim() != b.implicit_dim()
    {
        return None;
    }
    let [a0, a1] = a.offsets();
    let [b0, b1] = b.offsets();
    let offsets = [join_offset(a0, b0)?, join_offset(a1, b1)?];
    Some(a.with_offsets(offsets))
}

/// Product of all dims in front of the two tiled ones.
fn leading_volume(ishape: &[i64]) -> i64 {
    ishape
        .iter()
        .rev()
        .skip(2)
        .product()
}

impl VectorLayout {
    /// Returns true if `self` and `other` assign the data of a vector of
    /// `shape` to the same vregs in the same positions.
    ///
    /// Differences are tolerated only where they cannot be observed: an
    /// offset on an axis of size 1 may be zero or replicated, implicit dims
    /// may differ when they produce the same tiled dims, and tilings may
    /// differ when the whole trailing 2D slice fits into one tile either way.
    #[must_use]
    pub fn equivalent_to(&self, other: &Self, shape: &[i64], target: TargetShape) -> bool {
        if self.bitwidth() != other.bitwidth() {
            return false;
        }

        let dims = self.tiled_dims(shape);
        if self.implicit_dim() != other.implicit_dim() {
            let lhs = self.implicit_shape(shape);
            let rhs = other.implicit_shape(shape);
            if dims != other.tiled_dims(shape) || leading_volume(&lhs) != leading_volume(&rhs) {
                return false;
            }
        }

        for (axis, &size) in dims.iter().enumerate() {
            let (x, y) = (self.offsets()[axis], other.offsets()[axis]);
            let unit_axis_alias = size == 1
                && matches!(
                    (x, y),
                    (Offset::Replicated | Offset::Fixed(0), Offset::Replicated | Offset::Fixed(0))
                );
            if x != y && !unit_axis_alias {
                return false;
            }
        }

        if self.tiling() != other.tiling() {
            if self.tiling().lane() != other.tiling().lane() {
                return false;
            }
            let fits = |layout: &Self| {
                let [o0, o1] = layout.offsets();
                let tiling = layout.tiling();
                o0.value_or(0) + dims[0] <= tiling.sublane()
                    && o1.value_or(0) + dims[1] <= tiling.lane()
            };
            if !fits(self) || !fits(other) {
                return false;
            }
        }

        debug_assert!(target.is_valid());
        true
    }

    /// Returns true if the layout has an implicit dimension.
    #[must_use]
    pub fn has_implicit_dim(&self) -> bool {
        self.implicit_dim() != ImplicitDim::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Tiling, REPLICATED, ZERO_OFFSETS};

    const TARGET: TargetShape = TargetShape::new(8, 128);

    fn native32() -> VectorLayout {
        VectorLayout::native(32, TARGET)
    }

    #[test]
    fn test_join_prefers_fixed_offset() {
        let a = native32();
        let b = a.with_offsets([Offset::ZERO, Offset::Replicated]);
        assert_eq!(join(&a, &b, &[8, 128]), Some(a));
        assert_eq!(join(&b, &a, &[8, 128]), Some(a));
    }

    #[test]
    fn test_join_replicated_stays_replicated() {
        let a = native32().with_offsets(REPLICATED);
        assert_eq!(join(&a, &a, &[8, 128]), Some(a));
    }

    #[test]
    fn test_join_conflicting_offsets() {
        let a = native32();
        let b = a.with_offsets([Offset::Fixed(2), Offset::ZERO]);
        assert_eq!(join(&a, &b, &[8, 128]), None);
    }

    #[test]
    fn test_join_rejects_structural_mismatch() {
        let a = native32();
        assert_eq!(join(&a, &VectorLayout::native(16, TARGET), &[8, 128]), None);
        assert_eq!(join(&a, &a.with_tiling(Tiling::new(1, 128)), &[8, 128]), None);
        assert_eq!(
            join(&a, &a.with_implicit_dim(ImplicitDim::SecondMinor), &[128]),
            None
        );
    }

    #[test]
    fn test_equivalent_unit_axis_offsets() {
        let a = native32();
        let b = a.with_offsets([Offset::Replicated, Offset::ZERO]);
        assert!(a.equivalent_to(&b, &[1, 128], TARGET));
        assert!(!a.equivalent_to(&b, &[8, 128], TARGET));
    }

    #[test]
    fn test_equivalent_implicit_dims() {
        let implicit = native32().with_implicit_dim(ImplicitDim::SecondMinor);
        let flat = native32();
        assert!(implicit.equivalent_to(&flat, &[1, 128], TARGET));
        assert!(!implicit.equivalent_to(&flat, &[4, 128], TARGET));
    }

    #[test]
    fn test_equivalent_single_tile() {
        let a = native32();
        let b = a.with_tiling(Tiling::new(1, 128));
        assert!(a.equivalent_to(&b, &[1, 128], TARGET));
        assert!(!a.equivalent_to(&b, &[2, 128], TARGET));
        let c = a.with_tiling(Tiling::new(8, 256));
        assert!(!a.equivalent_to(&c, &[1, 128], TARGET));
    }

    #[test]
    fn test_equivalent_requires_same_bitwidth() {
        let a = VectorLayout::native(16, TARGET).with_offsets(ZERO_OFFSETS);
        assert!(!a.equivalent_to(&native32(), &[8, 128], TARGET));
    }
}
