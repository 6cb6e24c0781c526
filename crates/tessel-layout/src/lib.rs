//! # Tessel Layouts
//!
//! This crate defines how a `vector<...>` value is spread across the vector
//! registers (vregs) of a 2D-tiled matrix accelerator.
//!
//! ## Overview
//!
//! A vreg is a rectangular tile of `sublanes x lanes` 32-bit cells (8 x 128
//! on current hardware). Narrower elements are packed, so a vreg holding
//! 16-bit data covers 16 x 128 elements. A [`VectorLayout`] records:
//!
//! | Field | Description |
//! |-------|-------------|
//! | `bitwidth` | Element width the layout applies to |
//! | `offsets` | Position of element `(0, 0)` inside the first tile, or replication |
//! | `tiling` | Shape of the tile placed into a single vreg |
//! | `implicit_dim` | Which tiled dim is synthesised for rank < 2 vectors |
//!
//! The last two (implicit) dimensions of a vector are tiled; all outer
//! dimensions iterate over independent vregs.
//!
//! ## Main Types
//!
//! - [`TargetShape`]: The vreg geometry of the target
//! - [`VectorLayout`]: An immutable layout descriptor
//! - [`Layout`]: A layout or "no layout" for non-vector values
//! - [`memory::Tile`]: One level of a memref's hierarchical tiling
//!
//! ## See Also
//!
//! - [`algebra`]: `join` and equivalence of layouts
//! - [`memory`]: Validation of memref tilings

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod algebra;
pub mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub use memory::{verify_memory_tiling, Tile, TilingError};

/// The element width a vreg cell natively holds.
pub const NATIVE_BITWIDTH: u32 = 32;

/// Geometry of one vector register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetShape {
    /// Number of sublanes (rows) in a vreg.
    pub sublanes: i64,
    /// Number of lanes (columns) in a vreg.
    pub lanes: i64,
}

impl TargetShape {
    /// Creates a target shape.
    #[must_use]
    pub const fn new(sublanes: i64, lanes: i64) -> Self {
        Self { sublanes, lanes }
    }

    /// The tiling that covers exactly one vreg of 32-bit data.
    #[must_use]
    pub const fn default_tiling(self) -> Tiling {
        Tiling::new(self.sublanes, self.lanes)
    }

    /// The tiling that covers exactly one vreg for elements of `bitwidth` bits.
    ///
    /// Narrower elements are packed along sublanes, so the tile grows taller.
    #[must_use]
    pub const fn native_tiling(self, bitwidth: u32) -> Tiling {
        Tiling::new(
            self.sublanes * NATIVE_BITWIDTH as i64 / bitwidth as i64,
            self.lanes,
        )
    }

    /// Returns true if both dimensions are positive.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.sublanes > 0 && self.lanes > 0
    }
}

impl Default for TargetShape {
    fn default() -> Self {
        Self::new(8, 128)
    }
}

impl fmt::Display for TargetShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.sublanes, self.lanes)
    }
}

/// The rectangular tile a layout places into a single vreg.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tiling([i64; 2]);

impl Tiling {
    /// Creates a tiling of `sublane x lane` elements.
    #[must_use]
    pub const fn new(sublane: i64, lane: i64) -> Self {
        Self([sublane, lane])
    }

    /// Tile size along the sublane (second-minor) axis.
    #[must_use]
    pub const fn sublane(self) -> i64 {
        self.0[0]
    }

    /// Tile size along the lane (minor) axis.
    #[must_use]
    pub const fn lane(self) -> i64 {
        self.0[1]
    }

    /// Returns the tiling as an array.
    #[must_use]
    pub const fn as_array(self) -> [i64; 2] {
        self.0
    }
}

impl std::ops::Index<usize> for Tiling {
    type Output = i64;

    fn index(&self, axis: usize) -> &i64 {
        &self.0[axis]
    }
}

impl fmt::Display for Tiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.0[0], self.0[1])
    }
}

/// Offset of a layout along one tiled axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Offset {
    /// The value is identical along this axis.
    Replicated,
    /// Logical index 0 sits at this position inside the first tile.
    Fixed(i64),
}

impl Offset {
    /// Offset zero.
    pub const ZERO: Self = Self::Fixed(0);

    /// Returns the fixed position, or `None` when replicated.
    #[must_use]
    pub const fn value(self) -> Option<i64> {
        match self {
            Self::Replicated => None,
            Self::Fixed(n) => Some(n),
        }
    }

    /// Returns the fixed position, or `default` when replicated.
    #[must_use]
    pub const fn value_or(self, default: i64) -> i64 {
        match self {
            Self::Replicated => default,
            Self::Fixed(n) => n,
        }
    }

    /// Returns true if the value is replicated along this axis.
    #[must_use]
    pub const fn is_replicated(self) -> bool {
        matches!(self, Self::Replicated)
    }
}

impl From<i64> for Offset {
    fn from(n: i64) -> Self {
        Self::Fixed(n)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replicated => f.write_str("*"),
            Self::Fixed(n) => write!(f, "{n}"),
        }
    }
}

/// Sublane and lane offsets of a layout.
pub type LayoutOffsets = [Offset; 2];

/// Both offsets replicated.
pub const REPLICATED: LayoutOffsets = [Offset::Replicated, Offset::Replicated];

/// Both offsets zero.
pub const ZERO_OFFSETS: LayoutOffsets = [Offset::ZERO, Offset::ZERO];

/// Which tiled dimension is synthesised with size 1 for low-rank vectors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImplicitDim {
    /// Both tiled dims are real dimensions of the vector.
    #[default]
    None,
    /// The sublane dim is implicit; the vector's last dim maps to lanes.
    SecondMinor,
    /// The lane dim is implicit; the vector's last dim maps to sublanes.
    Minor,
}

/// A vreg layout descriptor.
///
/// Layouts are immutable once built; the `with_*` methods return modified
/// copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorLayout {
    bitwidth: u32,
    offsets: LayoutOffsets,
    tiling: Tiling,
    implicit_dim: ImplicitDim,
}

/// A layout for a value, or `None` for scalars, indices and memrefs.
pub type Layout = Option<VectorLayout>;

/// The "no layout" marker attached to non-vector values.
pub const NO_LAYOUT: Layout = None;

impl VectorLayout {
    /// Creates a layout.
    #[must_use]
    pub fn new(
        bitwidth: u32,
        offsets: LayoutOffsets,
        tiling: Tiling,
        implicit_dim: ImplicitDim,
    ) -> Self {
        Self {
            bitwidth,
            offsets,
            tiling,
            implicit_dim,
        }
    }

    /// The layout with zero offsets and native tiling for `bitwidth`.
    #[must_use]
    pub fn native(bitwidth: u32, target: TargetShape) -> Self {
        Self::new(
            bitwidth,
            ZERO_OFFSETS,
            target.native_tiling(bitwidth),
            ImplicitDim::None,
        )
    }

    /// Element bitwidth.
    #[must_use]
    pub const fn bitwidth(&self) -> u32 {
        self.bitwidth
    }

    /// Sublane and lane offsets.
    #[must_use]
    pub const fn offsets(&self) -> LayoutOffsets {
        self.offsets
    }

    /// Tile shape.
    #[must_use]
    pub const fn tiling(&self) -> Tiling {
        self.tiling
    }

    /// Implicit dimension.
    #[must_use]
    pub const fn implicit_dim(&self) -> ImplicitDim {
        self.implicit_dim
    }

    /// Returns a copy with different offsets.
    #[must_use]
    pub fn with_offsets(self, offsets: LayoutOffsets) -> Self {
        Self { offsets, ..self }
    }

    /// Returns a copy with a different tiling.
    #[must_use]
    pub fn with_tiling(self, tiling: Tiling) -> Self {
        Self { tiling, ..self }
    }

    /// Returns a copy with a different implicit dim.
    #[must_use]
    pub fn with_implicit_dim(self, implicit_dim: ImplicitDim) -> Self {
        Self {
            implicit_dim,
            ..self
        }
    }

    /// Returns a copy where every replicated offset is replaced by zero.
    #[must_use]
    pub fn without_replication(self) -> Self {
        self.with_offsets([
            Offset::Fixed(self.offsets[0].value_or(0)),
            Offset::Fixed(self.offsets[1].value_or(0)),
        ])
    }

    /// Returns true if both offsets are replicated.
    #[must_use]
    pub fn is_fully_replicated(&self) -> bool {
        self.offsets == REPLICATED
    }

    /// Returns true if this layout matches one vreg exactly.
    ///
    /// Offsets must be zero or replicated, the tiling must be the native
    /// tiling for the bitwidth and there must be no implicit dim.
    #[must_use]
    pub fn has_native_tiling(&self, target: TargetShape) -> bool {
        self.offsets
            .iter()
            .all(|o| matches!(o, Offset::Replicated | Offset::Fixed(0)))
            && self.tiling == target.native_tiling(self.bitwidth)
            && self.implicit_dim == ImplicitDim::None
    }

    /// Returns `shape` with the implicit dimension materialised.
    #[must_use]
    pub fn implicit_shape(&self, shape: &[i64]) -> SmallVec<[i64; 4]> {
        let mut ishape: SmallVec<[i64; 4]> = shape.iter().copied().collect();
        match self.implicit_dim {
            ImplicitDim::None => {}
            ImplicitDim::Minor => ishape.push(1),
            ImplicitDim::SecondMinor => {
                let at = ishape.len().saturating_sub(1);
                ishape.insert(at, 1);
            }
        }
        ishape
    }

    /// Returns the two tiled dimensions of `shape` under this layout.
    ///
    /// Missing leading dims (rank 1 without an implicit dim) count as 1.
    #[must_use]
    pub fn tiled_dims(&self, shape: &[i64]) -> [i64; 2] {
        let ishape = self.implicit_shape(shape);
        match ishape.as_slice() {
            [] => [1, 1],
            [n] => [1, *n],
            [.., a, b] => [*a, *b],
        }
    }
}

impl fmt::Display for VectorLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{{{},{}}},{}",
            self.bitwidth, self.offsets[0], self.offsets[1], self.tiling
        )?;
        match self.implicit_dim {
            ImplicitDim::None => Ok(()),
            ImplicitDim::Minor => f.write_str(",-1"),
            ImplicitDim::SecondMinor => f.write_str(",-2"),
        }
    }
}

/// Returns true if `layout` is present and replicated along both axes.
#[must_use]
pub fn is_fully_replicated(layout: &Layout) -> bool {
    layout.as_ref().is_some_and(VectorLayout::is_fully_replicated)
}

/// Displays a [`Layout`], rendering the absent layout as `none`.
#[derive(Clone, Copy, Debug)]
pub struct DisplayLayout<'a>(pub &'a Layout);

impl fmt::Display for DisplayLayout<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(layout) => fmt::Display::fmt(layout, f),
            None => f.write_str("none"),
        }
    }
}
