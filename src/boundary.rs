//! Ghost-zone filling. Interior kernels never read outside the interior
//! unless a boundary pass has filled the ghost layers they reach into. Each
//! pass copies interior values into one ghost layer on one side of one
//! direction.

use core::fmt;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::expr::{Expr, FieldAccess, TimeLevel};
use crate::grid::Grid;
use crate::index_space::IndexSpace;
use crate::kernel::Statement;




#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Low,
    High,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Low => write!(f, "low"),
            Side::High => write!(f, "high"),
        }
    }
}




/**
 * How the ghost values on one side of a block are obtained.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// Copy from the opposite end of the interior.
    Periodic,
    /// Copy the nearest interior value.
    ZeroGradient,
}




/**
 * The boundary choice for both sides of one direction.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryPair {
    pub low: Boundary,
    pub high: Boundary,
}

impl BoundaryPair {
    pub fn both(boundary: Boundary) -> Self {
        Self { low: boundary, high: boundary }
    }

    pub fn side(&self, side: Side) -> Boundary {
        match side {
            Side::Low => self.low,
            Side::High => self.high,
        }
    }

    pub fn validate(&self, direction: usize) -> Result<()> {
        if (self.low == Boundary::Periodic) != (self.high == Boundary::Periodic) {
            return Err(Error::Config(format!(
                "direction {} is periodic on one side only",
                direction
            )));
        }
        Ok(())
    }
}




/**
 * Return the offset, relative to the ghost point being filled, of the
 * interior point it copies.
 */
pub fn source_offset(boundary: Boundary, side: Side, layer: usize, points: usize) -> i64 {
    let (layer, points) = (layer as i64, points as i64);
    match (boundary, side) {
        (Boundary::Periodic, Side::Low) => points,
        (Boundary::Periodic, Side::High) => -points,
        (Boundary::ZeroGradient, Side::Low) => layer,
        (Boundary::ZeroGradient, Side::High) => -layer,
    }
}




/**
 * Return the points of one ghost layer (counted from 1 outward). Directions
 * before `direction` span their ghost zones too, so that corners are filled
 * once the earlier directions are done; later directions span the interior.
 */
pub fn ghost_layer(grid: &Grid, ghost: &[usize], direction: usize, side: Side, layer: usize) -> IndexSpace {
    let ranges = (0..grid.ndim()).map(|d| {
        let n = grid.points[d] as i64;
        let g = ghost.get(d).copied().unwrap_or(0) as i64;
        let l = layer as i64;
        if d == direction {
            match side {
                Side::Low => -l..-l + 1,
                Side::High => n + l - 1..n + l,
            }
        } else if d < direction {
            -g..n + g
        } else {
            0..n
        }
    });
    IndexSpace::new(ranges.collect())
}




/**
 * Return the statements filling one ghost layer of each given field.
 */
pub fn ghost_statements(
    grid: &Grid,
    fields: &[String],
    level: TimeLevel,
    boundary: Boundary,
    direction: usize,
    side: Side,
    layer: usize,
) -> Result<Vec<Statement>> {
    let points = grid.points[direction];
    if boundary == Boundary::Periodic && layer > points {
        return Err(Error::Config(format!(
            "block {} needs {} ghost layers in direction {} but has only {} points",
            grid.block, layer, direction, points
        )));
    }
    let offset = source_offset(boundary, side, layer, points);
    let ndim = grid.ndim();

    Ok(fields
        .iter()
        .map(|name| {
            let target = FieldAccess::new(name, ndim, level);
            let source = target.shifted(direction, offset);
            Statement::new(target, Expr::field(source))
        })
        .collect())
}
