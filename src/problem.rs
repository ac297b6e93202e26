//! A code generation problem and the pipeline that turns it into blocks:
//! substitution, index expansion, discretisation, then kernel building per
//! block. Problems share nothing mutable, so batches run in parallel.

use std::collections::BTreeSet;
use log::info;
use rayon::prelude::*;
use crate::algebra::Algebra;
use crate::block::Block;
use crate::boundary::BoundaryPair;
use crate::discretise::{DiscreteEquation, Discretiser};
use crate::error::{Error, Result};
use crate::expand::{apply_substitutions, expand, IndexRanges};
use crate::expr::Equation;
use crate::grid::Grid;
use crate::parse::{parse_equation, Notation};
use crate::scheme::{Limits, SchemeBindings};




/**
 * Grid parameters and boundary choices of one block.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct BlockSpec {
    pub points: Vec<usize>,
    pub spacing: Vec<f64>,
    pub boundaries: Vec<BoundaryPair>,
}

impl BlockSpec {
    pub fn new(points: Vec<usize>, spacing: Vec<f64>) -> Self {
        Self { points, spacing, boundaries: Vec::new() }
    }

    pub fn with_boundaries(mut self, boundaries: Vec<BoundaryPair>) -> Self {
        self.boundaries = boundaries;
        self
    }
}




/**
 * Everything needed to generate the kernels of a time step: abstract
 * equations in Einstein notation, formulas defining auxiliary fields,
 * definitions substituted into both, and the schemes and grids to
 * discretise them with.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct Problem {
    pub name: String,
    pub ndim: usize,
    pub notation: Notation,
    pub equations: Vec<Equation>,
    pub formulas: Vec<Equation>,
    pub substitutions: Vec<Equation>,
    pub index_ranges: IndexRanges,
    pub schemes: SchemeBindings,
    pub limits: Limits,
    pub blocks: Vec<BlockSpec>,
}




// ============================================================================
impl Problem {


    pub fn new(name: &str, ndim: usize) -> Self {
        Self {
            name: name.to_string(),
            ndim,
            notation: Notation::default(),
            equations: Vec::new(),
            formulas: Vec::new(),
            substitutions: Vec::new(),
            index_ranges: IndexRanges::new(ndim),
            schemes: SchemeBindings::new(),
            limits: Limits::default(),
            blocks: Vec::new(),
        }
    }

    pub fn with_notation(mut self, notation: Notation) -> Self {
        self.notation = notation;
        self
    }

    pub fn with_equation(mut self, text: &str) -> Result<Self> {
        self.equations.push(parse_equation(text, &self.notation)?);
        Ok(self)
    }

    pub fn with_formula(mut self, text: &str) -> Result<Self> {
        self.formulas.push(parse_equation(text, &self.notation)?);
        Ok(self)
    }

    pub fn with_substitution(mut self, text: &str) -> Result<Self> {
        self.substitutions.push(parse_equation(text, &self.notation)?);
        Ok(self)
    }

    pub fn with_index_ranges(mut self, index_ranges: IndexRanges) -> Self {
        self.index_ranges = index_ranges;
        self
    }

    pub fn with_schemes(mut self, schemes: SchemeBindings) -> Self {
        self.schemes = schemes;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_block(mut self, block: BlockSpec) -> Self {
        self.blocks.push(block);
        self
    }


    /**
     * Check the parts of the problem that do not depend on the equations:
     * scheme parameters and the dimensionality of every block.
     */
    pub fn validate(&self) -> Result<()> {
        if self.ndim == 0 {
            return Err(Error::Config(format!("problem '{}' has no spatial dimensions", self.name)));
        }
        if self.index_ranges.ndim() != self.ndim {
            return Err(Error::Config(format!(
                "index ranges of problem '{}' are for {} dimensions, but the problem has {}",
                self.name,
                self.index_ranges.ndim(),
                self.ndim
            )));
        }
        self.schemes.validate()?;

        for (block, spec) in self.blocks.iter().enumerate() {
            if spec.points.len() != self.ndim {
                return Err(Error::DimensionMismatch {
                    block,
                    expected: self.ndim,
                    found: spec.points.len(),
                });
            }
        }
        Ok(())
    }


    /**
     * Return the explicit equations of the problem: formulas first, then
     * evolution equations, each expanded in declaration order after the
     * substitutions are applied.
     */
    pub fn explicit_equations(&self, algebra: &dyn Algebra) -> Result<Vec<Equation>> {
        let mut explicit = Vec::new();

        for equation in self.formulas.iter().chain(&self.equations) {
            let equation = apply_substitutions(equation, &self.substitutions)?;
            let expansion = expand(&equation, &self.index_ranges, algebra)?;
            info!("{} expands over {:?} into {} equations", equation, expansion.free_indices(), expansion.len());
            for equation in expansion {
                explicit.push(equation?);
            }
        }
        Ok(explicit)
    }


    fn build_block(&self, index: usize, spec: &BlockSpec, explicit: &[Equation], algebra: &dyn Algebra) -> Result<Block> {
        let grid = Grid::new(index, &self.notation.coordinate, spec.points.clone(), spec.spacing.clone())?;

        let discrete = {
            let discretiser = Discretiser::new(&self.schemes, &grid, self.limits, algebra);
            explicit
                .iter()
                .map(|equation| discretiser.discretise(equation))
                .collect::<Result<Vec<DiscreteEquation>>>()?
        };
        let mut defined = BTreeSet::new();

        for (equation, d) in explicit.iter().zip(&discrete) {
            if !defined.insert(d.field()) {
                return Err(Error::InvalidEquation {
                    equation: equation.to_string(),
                    reason: format!("field {} is defined more than once", d.field()),
                });
            }
        }
        Block::assemble(
            index,
            grid,
            explicit.to_vec(),
            &discrete,
            self.schemes.temporal.as_ref(),
            spec.boundaries.clone(),
        )
    }
}




/**
 * Generate the blocks of a problem, in block order.
 */
pub fn generate(problem: &Problem, algebra: &dyn Algebra) -> Result<Vec<Block>> {
    problem.validate()?;
    info!("generating '{}' ({} dimensions, {} blocks)", problem.name, problem.ndim, problem.blocks.len());

    let explicit = problem.explicit_equations(algebra)?;

    problem
        .blocks
        .iter()
        .enumerate()
        .map(|(index, spec)| problem.build_block(index, spec, &explicit, algebra))
        .collect()
}




/**
 * Generate several independent problems in parallel on the rayon thread
 * pool. Each problem gets its own result, in input order.
 */
pub fn generate_batch(problems: &[Problem], algebra: &dyn Algebra) -> Vec<Result<Vec<Block>>> {
    problems.par_iter().map(|problem| generate(problem, algebra)).collect()
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::algebra::Canonical;
    use crate::boundary::Boundary;
    use crate::expr::{Expr, FieldAccess, TimeLevel};
    use crate::kernel::{Kernel, Step};
    use crate::scheme::TemporalScheme;

    fn advection() -> Problem {
        Problem::new("advection", 1)
            .with_notation(Notation::default().with_constants(vec!["c"]))
            .with_equation("Eq(Der(u, t), -c*Der(u, x))")
            .unwrap()
            .with_schemes(SchemeBindings::central(1, 2).with_temporal(TemporalScheme::RungeKutta { stages: 1 }))
            .with_block(BlockSpec::new(vec![10], vec![0.1]))
    }

    fn euler(stages: u32) -> Problem {
        Problem::new("euler", 2)
            .with_notation(Notation::default().with_constants(vec!["gamma"]))
            .with_formula("Eq(u_i, rhou_i/rho)")
            .and_then(|p| p.with_formula("Eq(p, (gamma-1)*(rhoE - rho*u_j**2/2))"))
            .and_then(|p| p.with_equation("Eq(Der(rho, t), -Conservative(rho*u_j, x_j))"))
            .and_then(|p| p.with_equation("Eq(Der(rhou_i, t), -Conservative(rhou_i*u_j + KD(_i,_j)*p, x_j))"))
            .and_then(|p| p.with_equation("Eq(Der(rhoE, t), -Conservative((rhoE + p)*u_j, x_j))"))
            .unwrap()
            .with_schemes(SchemeBindings::central(2, 2).with_temporal(TemporalScheme::RungeKutta { stages }))
            .with_block(BlockSpec::new(vec![10, 10], vec![0.1, 0.1]).with_boundaries(vec![BoundaryPair::both(Boundary::Periodic); 2]))
    }

    fn u(offset: i64, level: TimeLevel) -> Expr {
        Expr::field(FieldAccess::new("u", 1, level).at(vec![offset]))
    }

    /**
     * No kernel reads a region a later kernel writes, at the same or an
     * earlier level.
     */
    fn is_valid_order(kernels: &[Kernel<Step>]) -> bool {
        kernels.iter().enumerate().all(|(n, early)| {
            kernels[n + 1..].iter().all(|late| {
                late.footprint.writes.iter().all(|w| {
                    early.footprint.reads.iter().all(|r| {
                        w.name != r.name
                            || w.level > r.level
                            || (w.level == r.level && !late.region(w).intersects(&early.region(r)))
                    })
                })
            })
        })
    }

    #[test]
    fn linear_advection_is_a_single_update() {
        let blocks = generate(&advection(), &Canonical).unwrap();
        assert_eq!(blocks.len(), 1);

        let block = &blocks[0];
        assert_eq!(block.kernels.len(), 1);

        let kernel = &block.kernels[0];
        assert_eq!(kernel.statements.len(), 1);
        assert_eq!(kernel.range.start(), vec![0]);
        assert_eq!(kernel.range.end(), vec![10]);
        assert_eq!(kernel.halo, vec![1]);
        assert_eq!(block.halo_required(0), 1);

        let statement = &kernel.statements[0];
        assert_eq!(statement.target, FieldAccess::new("u", 1, TimeLevel::Next));

        let c = Expr::symbol("c");
        let dt = Expr::symbol("dt");
        let dx = Expr::symbol("dx0");
        let expected = u(0, TimeLevel::Current)
            - c * dt / (Expr::integer(2) * dx) * (u(1, TimeLevel::Current) - u(-1, TimeLevel::Current));
        assert!(Canonical.equivalent(&statement.value, &expected));
    }

    #[test]
    fn generation_is_deterministic() {
        let problem = euler(3);
        let a = generate(&problem, &Canonical).unwrap();
        let b = generate(&problem, &Canonical).unwrap();
        assert_eq!(a, b);
        assert_eq!(format!("{:?}", a), format!("{:?}", b));
    }

    #[test]
    fn euler_kernels_are_in_dependency_order() {
        let blocks = generate(&euler(2), &Canonical).unwrap();
        let kernels = &blocks[0].kernels;
        assert_eq!(kernels.len(), 18);
        assert_eq!(kernels[0].name, "stage 0 boundary 0 low layer 1");
        assert_eq!(kernels[17].name, "stage 2 update");
        assert!(is_valid_order(kernels));
        assert_eq!(blocks[0].grid.ghost, vec![1, 1]);
        assert_eq!(blocks[0].halo_required(0), 1);
        assert_eq!(blocks[0].halo_required(1), 1);
    }

    #[test]
    fn formulas_precede_their_readers() {
        let blocks = generate(&euler(1), &Canonical).unwrap();
        let position = |name: &str| blocks[0].kernels.iter().position(|k| k.name == name).unwrap();
        assert!(position("stage 1 formula 0") < position("stage 1 formula 2"));
        assert!(position("stage 1 formula 1") < position("stage 1 formula 2"));
        assert!(position("stage 1 formula 2") < position("stage 1 update"));
        assert!(is_valid_order(&blocks[0].kernels));
    }

    #[test]
    fn cyclic_formulas_fail() {
        let problem = advection()
            .with_formula("Eq(p, 2*q)")
            .and_then(|p| p.with_formula("Eq(q, p + 1)"))
            .unwrap();
        assert!(matches!(generate(&problem, &Canonical), Err(Error::CyclicKernelDependency { .. })));
    }

    #[test]
    fn formulas_reading_their_own_neighbours_fail() {
        let problem = advection().with_formula("Eq(p, Der(p, x) + u)").unwrap();
        match generate(&problem, &Canonical) {
            Err(Error::CyclicKernelDependency { kernel, field, offset, level }) => {
                assert_eq!(kernel, "stage 1 formula 0");
                assert_eq!(field, "p");
                assert_ne!(offset, vec![0]);
                assert_eq!(level, TimeLevel::Current);
            }
            other => panic!("expected a cycle, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn oversized_coefficients_fail_cleanly() {
        let problem = advection().with_formula("Eq(p, 2**64*2**64*u)").unwrap();
        assert!(matches!(generate(&problem, &Canonical), Err(Error::CoefficientOverflow { .. })));
    }

    #[test]
    fn block_dimensions_must_match_the_problem() {
        let problem = advection().with_block(BlockSpec::new(vec![10, 10], vec![0.1, 0.1]));
        match generate(&problem, &Canonical) {
            Err(Error::DimensionMismatch { block, expected, found }) => {
                assert_eq!((block, expected, found), (1, 1, 2));
            }
            other => panic!("expected a dimension mismatch, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn index_mismatch_aborts_generation() {
        let problem = Problem::new("bad", 2)
            .with_equation("Eq(Der(u_i, t), v_j)")
            .unwrap()
            .with_schemes(SchemeBindings::central(2, 2).with_temporal(TemporalScheme::RungeKutta { stages: 1 }))
            .with_block(BlockSpec::new(vec![4, 4], vec![1.0, 1.0]));
        assert!(matches!(generate(&problem, &Canonical), Err(Error::IndexMismatch { .. })));
    }

    #[test]
    fn fields_may_only_be_defined_once() {
        let problem = advection().with_formula("Eq(u, 1)").unwrap();
        assert!(matches!(generate(&problem, &Canonical), Err(Error::InvalidEquation { .. })));
    }

    #[test]
    fn substitutions_are_applied_before_expansion() {
        let problem = Problem::new("diffusion", 2)
            .with_notation(Notation::default().with_constants(vec!["kappa"]))
            .with_substitution("Eq(q_i, -kappa*Der(T, x_i))")
            .and_then(|p| p.with_equation("Eq(Der(T, t), -Der(q_j, x_j))"))
            .unwrap()
            .with_schemes(SchemeBindings::central(2, 2).with_temporal(TemporalScheme::RungeKutta { stages: 1 }))
            .with_block(BlockSpec::new(vec![8, 8], vec![0.5, 0.5]));
        let blocks = generate(&problem, &Canonical).unwrap();
        let kernel = &blocks[0].kernels[0];
        assert_eq!(kernel.statements.len(), 1);
        assert!(kernel.footprint.reads.iter().all(|r| r.name == "T"));
        assert_eq!(kernel.halo, vec![2, 2]);
    }

    #[test]
    fn batches_report_each_problem() {
        let problems = vec![advection(), advection().with_block(BlockSpec::new(vec![4, 4], vec![1.0, 1.0])), euler(3)];
        let results = generate_batch(&problems, &Canonical);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::DimensionMismatch { .. })));
        assert!(results[2].is_ok());
    }
}
