use std::collections::BTreeMap;
use std::path::Path;
use serde::Deserialize;
use crate::boundary::{Boundary, BoundaryPair};
use crate::error::{Error, Result};
use crate::expand::IndexRanges;
use crate::parse::Notation;
use crate::problem::{BlockSpec, Problem};
use crate::scheme::{Limits, SchemeBindings, SpatialScheme, TemporalScheme};




/**
 * A problem file, as written in TOML:
 *
 * ```toml
 * name = "advection"
 * ndim = 1
 * constants = ["c"]
 * equations = ["Eq(Der(u, t), -c*Der(u, x))"]
 *
 * [schemes]
 * temporal = { kind = "runge_kutta", stages = 1 }
 * spatial = { kind = "central", order = 2 }
 *
 * [[blocks]]
 * points = [100]
 * spacing = [0.01]
 * boundary = "periodic"
 * ```
 */
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProblemConfig {
    pub name: String,
    pub ndim: usize,
    pub coordinate: Option<String>,
    pub time: Option<String>,
    #[serde(default)]
    pub constants: Vec<String>,
    #[serde(default)]
    pub equations: Vec<String>,
    #[serde(default)]
    pub formulas: Vec<String>,
    #[serde(default)]
    pub substitutions: Vec<String>,
    /// Per-letter `[start, end)` overrides of the default index range.
    #[serde(default)]
    pub index_ranges: BTreeMap<String, [usize; 2]>,
    #[serde(default)]
    pub schemes: SchemesConfig,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub blocks: Vec<BlockConfig>,
}




/**
 * Scheme bindings: one spatial scheme for every direction, optionally
 * overridden per direction (keyed by the direction number).
 */
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemesConfig {
    pub temporal: Option<TemporalScheme>,
    pub spatial: Option<SpatialScheme>,
    #[serde(default)]
    pub directions: BTreeMap<String, SpatialScheme>,
}




#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockConfig {
    pub points: Vec<usize>,
    pub spacing: Vec<f64>,
    /// Same boundary on both sides of every direction.
    pub boundary: Option<Boundary>,
    #[serde(default)]
    pub boundaries: Vec<BoundaryPair>,
}




// ============================================================================
impl ProblemConfig {


    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }


    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }


    /**
     * Parse the equation text and assemble a validated problem.
     */
    pub fn into_problem(self) -> Result<Problem> {
        let mut notation = Notation::default().with_constants(self.constants);

        if let Some(coordinate) = self.coordinate {
            notation.coordinate = coordinate;
        }
        if let Some(time) = self.time {
            notation.time = time;
        }
        let mut index_ranges = IndexRanges::new(self.ndim);

        for (letter, [start, end]) in &self.index_ranges {
            if start >= end || *end > self.ndim {
                return Err(Error::Config(format!(
                    "index range {}..{} of '{}' is not within 0..{}",
                    start, end, letter, self.ndim
                )));
            }
            index_ranges = index_ranges.with(letter, *start..*end);
        }
        let mut problem = Problem::new(&self.name, self.ndim)
            .with_notation(notation)
            .with_index_ranges(index_ranges)
            .with_schemes(self.schemes.bindings(self.ndim)?)
            .with_limits(self.limits);

        for text in &self.substitutions {
            problem = problem.with_substitution(text)?;
        }
        for text in &self.formulas {
            problem = problem.with_formula(text)?;
        }
        for text in &self.equations {
            problem = problem.with_equation(text)?;
        }
        for block in self.blocks {
            problem = problem.with_block(block.into_spec()?);
        }
        problem.validate()?;
        Ok(problem)
    }
}




impl SchemesConfig {
    fn bindings(&self, ndim: usize) -> Result<SchemeBindings> {
        let mut bindings = match self.spatial {
            Some(scheme) => (0..ndim).fold(SchemeBindings::new(), |b, d| b.with_spatial(d, scheme)),
            None => SchemeBindings::new(),
        };
        for (key, scheme) in &self.directions {
            let direction: usize = key
                .parse()
                .map_err(|_| Error::Config(format!("'{}' is not a direction number", key)))?;
            if direction >= ndim {
                return Err(Error::Config(format!("direction {} is out of range for {} dimensions", direction, ndim)));
            }
            bindings = bindings.with_spatial(direction, *scheme);
        }
        if let Some(scheme) = self.temporal {
            bindings = bindings.with_temporal(scheme);
        }
        Ok(bindings)
    }
}




impl BlockConfig {
    fn into_spec(self) -> Result<BlockSpec> {
        let boundaries = match (self.boundary, self.boundaries.is_empty()) {
            (Some(_), false) => {
                return Err(Error::Config("a block may give either 'boundary' or 'boundaries', not both".into()))
            }
            (Some(boundary), true) => vec![BoundaryPair::both(boundary); self.points.len()],
            (None, _) => self.boundaries,
        };
        Ok(BlockSpec::new(self.points, self.spacing).with_boundaries(boundaries))
    }
}




/**
 * Read a problem file.
 */
pub fn load_problem<P: AsRef<Path>>(path: P) -> Result<Problem> {
    ProblemConfig::load(path)?.into_problem()
}
