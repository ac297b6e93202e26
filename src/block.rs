use std::collections::BTreeMap;
use log::{debug, info, warn};
use serde::Serialize;
use crate::boundary::{ghost_layer, ghost_statements, BoundaryPair, Side};
use crate::discretise::DiscreteEquation;
use crate::error::{Error, Result};
use crate::expr::{Equation, FieldAccess};
use crate::grid::{Grid, IndexExpression};
use crate::index_space::IndexSpace;
use crate::kernel::{Footprint, Kernel, KernelBuilder, Phase, Step};
use crate::scheme::TemporalScheme;




/**
 * The top-level unit handed to code emission: one grid, the explicit
 * equations discretised on it, and the ordered kernels of one time step.
 * The block owns its kernels.
 */
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Block {
    pub index: usize,
    pub grid: Grid,
    pub equations: Vec<Equation>,
    pub boundaries: Vec<BoundaryPair>,
    pub kernels: Vec<Kernel<Step>>,
}




/**
 * Return how many points a read, performed over the given range, reaches
 * outside the interior along one direction.
 */
fn depth_outside(grid: &Grid, range: &IndexSpace, read: &FieldAccess, direction: usize) -> usize {
    let region = range.translate(&read.offset);
    let r = region.range(direction);
    let n = grid.points[direction] as i64;
    (-r.start).max(r.end - n).max(0) as usize
}




// ============================================================================
impl Block {


    /**
     * Return the number of ghost layers needed along a direction: the
     * furthest any kernel reads outside the interior.
     */
    pub fn halo_required(&self, direction: usize) -> usize {
        self.kernels
            .iter()
            .flat_map(|k| k.footprint.reads.iter().map(move |r| depth_outside(&self.grid, &k.range, r, direction)))
            .max()
            .unwrap_or(0)
    }


    /**
     * Resolve a field access moved along a direction to a concrete array
     * reference in this block's storage.
     */
    pub fn resolve_offset(&self, field: &FieldAccess, direction: usize, offset: i64) -> IndexExpression {
        self.grid.resolve_offset(field, direction, offset)
    }


    /**
     * Build the kernels of one time step from discrete equations. Formulas
     * are computed at the start of every stage, before the residuals that
     * read them, over the interior widened by however far their readers
     * reach. When boundaries are declared, a boundary pass refills the ghost
     * layers before the first stage and after every intermediate stage.
     */
    pub fn assemble(
        index: usize,
        grid: Grid,
        equations: Vec<Equation>,
        discrete: &[DiscreteEquation],
        temporal: Option<&TemporalScheme>,
        boundaries: Vec<BoundaryPair>,
    ) -> Result<Self> {
        let ndim = grid.ndim();
        let scheme = temporal.copied().unwrap_or(TemporalScheme::RungeKutta { stages: 1 });
        let stages = scheme.stages();

        if !boundaries.is_empty() && boundaries.len() != ndim {
            return Err(Error::Config(format!(
                "block {} declares boundaries for {} directions but has {}",
                index,
                boundaries.len(),
                ndim
            )));
        }
        for (d, pair) in boundaries.iter().enumerate() {
            pair.validate(d)?;
        }
        let mut builder = KernelBuilder::new(ndim);

        for stage in 1..=stages {
            let mut slot = 0;
            for equation in discrete {
                for (phase, statement) in equation.stage_statements(&scheme, stage, ndim, slot) {
                    builder.push(Step::new(stage, phase), statement);
                }
                if !equation.is_evolution() {
                    slot += 1;
                }
            }
        }
        let footprints = builder.footprints();
        let widening = formula_widening(&footprints, ndim);
        let interior = grid.interior();

        let range_of = |key: &Step| match widening.get(key) {
            Some(w) => interior.extend_each(w),
            None => interior.clone(),
        };
        let mut ghost = vec![0; ndim];

        for (key, footprint) in &footprints {
            let range = range_of(key);
            for read in &footprint.reads {
                for (d, g) in ghost.iter_mut().enumerate() {
                    *g = (*g).max(depth_outside(&grid, &range, read, d));
                }
            }
        }

        let fields: Vec<String> = discrete
            .iter()
            .filter(|e| e.is_evolution())
            .map(|e| e.field().to_string())
            .collect();

        if boundaries.is_empty() {
            if ghost.iter().any(|&g| g > 0) {
                warn!("block {} needs ghost layers {:?} but declares no boundaries", index, ghost);
            }
        } else if !fields.is_empty() {
            for stage in 0..stages {
                let level = if stage == 0 { scheme.input_level(1) } else { scheme.output_level(stage) };
                for (direction, pair) in boundaries.iter().enumerate() {
                    for side in [Side::Low, Side::High] {
                        for layer in 1..=ghost[direction] {
                            let phase = Phase::Boundary { direction, side, layer };
                            let statements = ghost_statements(&grid, &fields, level, pair.side(side), direction, side, layer)?;
                            for statement in statements {
                                builder.push(Step::new(stage, phase), statement);
                            }
                        }
                    }
                }
            }
        }
        let kernels = builder.build(|key| match key.phase {
            Phase::Boundary { direction, side, layer } => ghost_layer(&grid, &ghost, direction, side, layer),
            _ => range_of(key),
        })?;

        info!("block {}: {} kernels, ghost depth {:?}", index, kernels.len(), ghost);

        Ok(Self {
            index,
            grid: grid.with_ghost(ghost),
            equations,
            boundaries,
            kernels,
        })
    }
}




/**
 * Return how far each formula kernel's range must extend past the interior,
 * so that every kernel reading its field (possibly another widened formula)
 * finds it computed. Cyclic formulas stop widening after one pass per
 * formula; the kernel builder reports the cycle.
 */
fn formula_widening(footprints: &BTreeMap<Step, Footprint>, ndim: usize) -> BTreeMap<Step, Vec<i64>> {
    let formulas: Vec<&Step> = footprints.keys().filter(|k| matches!(k.phase, Phase::Formula(_))).collect();
    let mut widening: BTreeMap<Step, Vec<i64>> = formulas.iter().map(|&&k| (k, vec![0; ndim])).collect();

    for _ in 0..=formulas.len() {
        let mut changed = false;

        for &key in &formulas {
            let mut required = vec![0; ndim];
            for write in &footprints[key].writes {
                for (reader, footprint) in footprints {
                    if reader == key {
                        continue;
                    }
                    let reader_widening = widening.get(reader).cloned().unwrap_or_else(|| vec![0; ndim]);
                    for read in footprint.reads_of(&write.name, write.level) {
                        for d in 0..ndim {
                            required[d] = required[d].max(read.offset[d].abs() + reader_widening[d]);
                        }
                    }
                }
            }
            if widening.get(key) != Some(&required) {
                debug!("{} widened by {:?}", key, required);
                widening.insert(*key, required);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    widening
}
