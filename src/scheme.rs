use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::expr::TimeLevel;
use crate::rational::Rational;




/**
 * Highest order of accuracy accepted for central differencing.
 */
pub const MAX_CENTRAL_ORDER: usize = 16;




/**
 * Finite difference scheme for spatial derivatives.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpatialScheme {
    /// Centred differences of the given (even) order of accuracy.
    Central { order: usize },
}




/**
 * Time integration scheme.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemporalScheme {
    /// Strong-stability-preserving Runge-Kutta in Shu-Osher form. One stage
    /// is forward Euler.
    RungeKutta { stages: u32 },
}




// ============================================================================
impl SpatialScheme {

    pub fn validate(&self) -> Result<()> {
        match self {
            SpatialScheme::Central { order } if (2..=MAX_CENTRAL_ORDER).contains(order) && order % 2 == 0 => Ok(()),
            SpatialScheme::Central { order } => Err(Error::Config(format!(
                "central differencing needs an even order of accuracy between 2 and {}, got {}",
                MAX_CENTRAL_ORDER, order
            ))),
        }
    }


    /**
     * Return the number of points on either side of the centre used to
     * approximate a derivative of the given order.
     */
    pub fn half_width(&self, derivative_order: usize) -> usize {
        match self {
            SpatialScheme::Central { order } => {
                ((derivative_order + 1) / 2 + order / 2).saturating_sub(1)
            }
        }
    }


    /**
     * Return the stencil of an m-th derivative as (offset, weight) pairs,
     * omitting zero weights. The weights are to be divided by `dx^m`.
     */
    pub fn weights(&self, derivative_order: usize) -> Option<Vec<(i64, Rational)>> {
        if derivative_order == 0 {
            return Some(vec![(0, Rational::ONE)]);
        }
        let w = self.half_width(derivative_order) as i64;
        let nodes: Vec<i64> = (-w..=w).collect();
        let weights = taylor_weights(&nodes, derivative_order)?;

        Some(nodes.into_iter().zip(weights).filter(|(_, c)| !c.is_zero()).collect())
    }
}




/**
 * Solve for the weights `c_k` such that `sum_k c_k f(x + k h)` approximates
 * `h^m f^(m)(x)` exactly for polynomials of degree below the node count.
 */
fn taylor_weights(nodes: &[i64], m: usize) -> Option<Vec<Rational>> {
    let n = nodes.len();
    if m >= n {
        return None;
    }
    let mut a = (0..n)
        .map(|p| nodes.iter().map(|&k| Rational::integer(k).powi(i32::try_from(p).ok()?)).collect())
        .collect::<Option<Vec<Vec<Rational>>>>()?;
    let factorial = (1..=m as i64).try_fold(Rational::ONE, |f, k| f.checked_mul(Rational::integer(k)))?;
    let mut b: Vec<Rational> = (0..n).map(|p| if p == m { factorial } else { Rational::ZERO }).collect();

    for col in 0..n {
        let pivot = (col..n).find(|&r| !a[r][col].is_zero())?;
        a.swap(col, pivot);
        b.swap(col, pivot);
        let p = a[col][col];
        for r in 0..n {
            if r != col && !a[r][col].is_zero() {
                let f = a[r][col].checked_div(p)?;
                for c in col..n {
                    a[r][c] = a[r][c].checked_sub(f.checked_mul(a[col][c])?)?;
                }
                b[r] = b[r].checked_sub(f.checked_mul(b[col])?)?;
            }
        }
    }
    (0..n).map(|i| b[i].checked_div(a[i][i])).collect()
}




// ============================================================================
impl TemporalScheme {

    pub fn validate(&self) -> Result<()> {
        match self {
            TemporalScheme::RungeKutta { stages: 1..=3 } => Ok(()),
            TemporalScheme::RungeKutta { stages } => Err(Error::Config(format!(
                "Runge-Kutta with {} stages is not supported (1, 2 or 3)",
                stages
            ))),
        }
    }

    pub fn stages(&self) -> u32 {
        match self {
            TemporalScheme::RungeKutta { stages } => *stages,
        }
    }


    /**
     * Return the weights `(a, 1 - a)` of stage k (counted from 1):
     * `q(k) = a q(n) + (1 - a) (q(k-1) + dt R(q(k-1)))`.
     */
    pub fn stage_weights(&self, stage: u32) -> (Rational, Rational) {
        match (self.stages(), stage) {
            (2, 2) => (Rational::new(1, 2), Rational::new(1, 2)),
            (3, 2) => (Rational::new(3, 4), Rational::new(1, 4)),
            (3, 3) => (Rational::new(1, 3), Rational::new(2, 3)),
            _ => (Rational::ZERO, Rational::ONE),
        }
    }


    /**
     * Return the time level stage k reads from.
     */
    pub fn input_level(&self, stage: u32) -> TimeLevel {
        if stage <= 1 {
            TimeLevel::Current
        } else {
            TimeLevel::Stage(stage - 1)
        }
    }


    /**
     * Return the time level stage k writes to.
     */
    pub fn output_level(&self, stage: u32) -> TimeLevel {
        if stage >= self.stages() {
            TimeLevel::Next
        } else {
            TimeLevel::Stage(stage)
        }
    }
}




/**
 * The schemes bound to each derivative role for one problem.
 */
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchemeBindings {
    pub temporal: Option<TemporalScheme>,
    pub spatial: BTreeMap<usize, SpatialScheme>,
}

impl SchemeBindings {

    pub fn new() -> Self {
        Self::default()
    }

    /**
     * Central differencing of the given order in every direction.
     */
    pub fn central(ndim: usize, order: usize) -> Self {
        Self {
            temporal: None,
            spatial: (0..ndim).map(|d| (d, SpatialScheme::Central { order })).collect(),
        }
    }

    pub fn with_temporal(mut self, scheme: TemporalScheme) -> Self {
        self.temporal = Some(scheme);
        self
    }

    pub fn with_spatial(mut self, direction: usize, scheme: SpatialScheme) -> Self {
        self.spatial.insert(direction, scheme);
        self
    }

    pub fn spatial(&self, direction: usize) -> Result<&SpatialScheme> {
        self.spatial.get(&direction).ok_or(Error::UnsupportedScheme {
            role: "spatial",
            direction: Some(direction),
        })
    }

    pub fn temporal(&self) -> Result<&TemporalScheme> {
        self.temporal.as_ref().ok_or(Error::UnsupportedScheme {
            role: "temporal",
            direction: None,
        })
    }

    pub fn validate(&self) -> Result<()> {
        for scheme in self.spatial.values() {
            scheme.validate()?;
        }
        if let Some(scheme) = &self.temporal {
            scheme.validate()?;
        }
        Ok(())
    }
}




/**
 * Bounds beyond which a derivative is reported as unresolved.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_derivative_order: usize,
    pub max_nesting: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_derivative_order: 4, max_nesting: 4 }
    }
}
