//! Memref tiling validation.
//!
//! A memref in vector memory carries a hierarchy of tiles. Loads and stores
//! only understand a handful of hierarchies: a single level for 32-bit data,
//! and a row-compressed packing level underneath for narrower types.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{TargetShape, NATIVE_BITWIDTH};

/// One level of a hierarchical memref tiling.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tile(pub SmallVec<[i64; 2]>);

impl Tile {
    /// Creates a tile from its dimensions.
    #[must_use]
    pub fn new(dims: &[i64]) -> Self {
        Self(dims.iter().copied().collect())
    }

    /// Tile dimensions.
    #[must_use]
    pub fn dims(&self) -> &[i64] {
        &self.0
    }
}

/// Errors reported for an unsupported memref tiling.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TilingError {
    /// 32-bit data must use one tiling level.
    #[error("Only one-level tiling supported for 32-bit loads")]
    ExpectedOneLevel,
    /// Narrow 1D data must use three tiling levels.
    #[error("Only three-level tiling supported for 1D memory ops narrower than 32-bit")]
    ExpectedThreeLevels,
    /// Narrow 2D+ data must use two tiling levels.
    #[error("Only two-level tiling supported for 2D+ memory ops narrower than 32-bit")]
    ExpectedTwoLevels,
    /// The first level of a 1D tiling is not a multiple of the lane count.
    #[error("Invalid first-level tile in 1D memory op")]
    InvalidFirstLevel,
    /// The second level of a 1D tiling is not one vreg row.
    #[error("Invalid second-level tile in 1D memory op")]
    InvalidSecondLevel,
    /// The packing level is not two-dimensional.
    #[error("Expected 2D tiling for packed layout")]
    ExpectedPacked2D,
    /// The packing level does not compress rows into one 32-bit word.
    #[error("Expected compressed packed layout")]
    ExpectedCompressed,
    /// The packing factor exceeds the rows of the first-level tile.
    #[error("Packing cannot introduce padding")]
    PaddingIntroduced,
    /// Elements wider than a vreg cell.
    #[error("Loads of types wider than 32-bit unsupported")]
    TooWide,
    /// The memref carries no tiling at all.
    #[error("memref has no tiling")]
    Missing,
}

/// Validates the tiling of a memref accessed with elements of `bitwidth`
/// bits and returns the first-level tile.
///
/// # Errors
///
/// Returns a [`TilingError`] describing the first rule the hierarchy breaks.
pub fn verify_memory_tiling(
    tiles: &[Tile],
    rank: usize,
    bitwidth: u32,
    target: TargetShape,
) -> Result<&[i64], TilingError> {
    if bitwidth > NATIVE_BITWIDTH {
        return Err(TilingError::TooWide);
    }
    if bitwidth == NATIVE_BITWIDTH {
        if tiles.len() != 1 {
            return Err(TilingError::ExpectedOneLevel);
        }
        return Ok(tiles[0].dims());
    }

    let rows_per_tile = if rank == 1 {
        let [first, second, _] = tiles else {
            return Err(TilingError::ExpectedThreeLevels);
        };
        match first.dims() {
            [n] if n % target.lanes == 0 => {}
            _ => return Err(TilingError::InvalidFirstLevel),
        }
        if second.dims() != [target.lanes] {
            return Err(TilingError::InvalidSecondLevel);
        }
        first.dims()[0] / target.lanes
    } else {
        let [first, _] = tiles else {
            return Err(TilingError::ExpectedTwoLevels);
        };
        *first.dims().first().ok_or(TilingError::ExpectedTwoLevels)?
    };

    let packing = i64::from(NATIVE_BITWIDTH / bitwidth);
    let Some(row_compressed) = tiles.last() else {
        return Err(TilingError::Missing);
    };
    let [rows, cols] = row_compressed.dims() else {
        return Err(TilingError::ExpectedPacked2D);
    };
    if *rows != packing || *cols != 1 {
        return Err(TilingError::ExpectedCompressed);
    }
    if *rows > rows_per_tile {
        return Err(TilingError::PaddingIntroduced);
    }
    Ok(tiles[0].dims())
}
