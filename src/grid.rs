use core::fmt;
use serde::Serialize;
use crate::error::{Error, Result};
use crate::expr::{Axis, Expr, FieldAccess, Index, Node};
use crate::index_space::IndexSpace;




/**
 * The discretisation grid of one block: number of interior points and
 * numeric spacing per direction, plus the ghost depth the block's kernels
 * require (zero until the block is built).
 */
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Grid {
    pub block: usize,
    pub coordinate: String,
    pub points: Vec<usize>,
    pub spacing: Vec<f64>,
    pub ghost: Vec<usize>,
}




/**
 * A concrete array reference: the array name, the index relative to the
 * point being updated, and the equivalent signed distance in the block's
 * row-major storage (ghost zones included).
 */
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexExpression {
    pub array: String,
    pub offset: Vec<i64>,
    pub linear: i64,
}

impl fmt::Display for IndexExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.linear {
            0 => write!(f, "{}[n]", self.array),
            n if n > 0 => write!(f, "{}[n+{}]", self.array, n),
            n => write!(f, "{}[n{}]", self.array, n),
        }
    }
}




// ============================================================================
impl Grid {

    pub fn new(block: usize, coordinate: &str, points: Vec<usize>, spacing: Vec<f64>) -> Result<Self> {
        if points.len() != spacing.len() {
            return Err(Error::Config(format!(
                "block {} has {} point counts but {} spacings",
                block,
                points.len(),
                spacing.len()
            )));
        }
        if let Some(dx) = spacing.iter().find(|dx| !(**dx > 0.0)) {
            return Err(Error::Config(format!("block {} has non-positive spacing {}", block, dx)));
        }
        let ghost = vec![0; points.len()];
        Ok(Self { block, coordinate: coordinate.to_string(), points, spacing, ghost })
    }

    pub fn with_ghost(mut self, ghost: Vec<usize>) -> Self {
        self.ghost = ghost;
        self
    }

    pub fn ndim(&self) -> usize {
        self.points.len()
    }


    /**
     * Return the interior points, indexed from zero.
     */
    pub fn interior(&self) -> IndexSpace {
        IndexSpace::from_shape(&self.points)
    }


    /**
     * Return the interior points together with the ghost zones.
     */
    pub fn padded(&self) -> IndexSpace {
        let ghost: Vec<i64> = self.ghost.iter().map(|&g| g as i64).collect();
        self.interior().extend_each(&ghost)
    }


    /**
     * Return the symbol standing for the grid spacing along a direction,
     * e.g. `dx0`. Its numeric value is `spacing[direction]`.
     */
    pub fn spacing_symbol(&self, direction: usize) -> Expr {
        Expr::symbol(&format!("d{}{}", self.coordinate, direction))
    }


    /**
     * Return an expression evaluated at a neighbouring point: field accesses
     * move along the direction, and the coordinate along that direction
     * advances by the corresponding multiple of the spacing.
     */
    pub fn shift_point(&self, expr: &Expr, direction: usize, by: i64) -> Expr {
        match expr.node() {
            Node::Field(access) => Expr::field(access.shifted(direction, by)),
            Node::Coordinate(Axis::Space(Index::Value(d))) if *d == direction && by != 0 => {
                expr.clone() + Expr::integer(by) * self.spacing_symbol(direction)
            }
            _ => expr.map_children(|c| self.shift_point(c, direction, by)),
        }
    }


    /**
     * Resolve a field access moved by `offset` points along `direction` to a
     * concrete array reference.
     */
    pub fn resolve_offset(&self, field: &FieldAccess, direction: usize, offset: i64) -> IndexExpression {
        let access = field.shifted(direction, offset);
        IndexExpression {
            array: access.array_name(),
            linear: self.padded().row_major_stride(&access.offset),
            offset: access.offset,
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::algebra::{Algebra, Canonical};
    use crate::expr::TimeLevel;

    #[test]
    fn spacing_symbols_are_named_after_the_coordinate() {
        let grid = Grid::new(0, "x", vec![10, 20], vec![0.1, 0.05]).unwrap();
        assert_eq!(grid.spacing_symbol(1), Expr::symbol("dx1"));
        assert_eq!(grid.ndim(), 2);
    }

    #[test]
    fn offsets_resolve_to_row_major_strides() {
        let grid = Grid::new(0, "x", vec![10, 20], vec![0.1, 0.1]).unwrap().with_ghost(vec![2, 2]);
        let u = FieldAccess::new("u", 2, TimeLevel::Next);
        let east = grid.resolve_offset(&u, 1, 1);
        assert_eq!(east.array, "u_new");
        assert_eq!(east.offset, vec![0, 1]);
        assert_eq!(east.linear, 1);
        let south = grid.resolve_offset(&u, 0, -1);
        assert_eq!(south.linear, -24);
        assert_eq!(south.to_string(), "u_new[n-24]");
    }

    #[test]
    fn shifting_advances_coordinates() {
        let grid = Grid::new(0, "x", vec![10], vec![0.1]).unwrap();
        let x = Expr::coordinate(Axis::Space(Index::Value(0)));
        let u = Expr::field(FieldAccess::new("u", 1, TimeLevel::Current));
        let shifted = grid.shift_point(&(x.clone() * u), 0, -1);
        let expected = (x - grid.spacing_symbol(0)) * Expr::field(FieldAccess::new("u", 1, TimeLevel::Current).at(vec![-1]));
        assert!(Canonical.equivalent(&shifted, &expected));
    }

    #[test]
    fn inconsistent_grids_are_rejected() {
        assert!(Grid::new(0, "x", vec![10, 10], vec![0.1]).is_err());
        assert!(Grid::new(0, "x", vec![10], vec![0.0]).is_err());
    }
}
