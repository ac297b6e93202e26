use core::fmt;
use std::collections::{BTreeMap, BTreeSet};
use log::{debug, info};
use serde::Serialize;
use crate::adjacency_list::AdjacencyList;
use crate::boundary::Side;
use crate::error::{Error, Result};
use crate::expr::{Expr, FieldAccess, TimeLevel};
use crate::index_space::IndexSpace;




/**
 * A single discrete assignment: the target field access is set to the value
 * of an expression over field accesses at each point of the kernel's range.
 */
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Statement {
    pub target: FieldAccess,
    pub value: Expr,
}

impl Statement {
    pub fn new(target: FieldAccess, value: Expr) -> Self {
        Self { target, value }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.target, self.value)
    }
}




/**
 * The computational phases of one stage of a time step, in the order they
 * take precedence when kernels are otherwise unordered.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Phase {
    Formula(usize),
    Residual,
    Update,
    Boundary { direction: usize, side: Side, layer: usize },
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Formula(slot) => write!(f, "formula {}", slot),
            Phase::Residual => write!(f, "residual"),
            Phase::Update => write!(f, "update"),
            Phase::Boundary { direction, side, layer } => {
                write!(f, "boundary {} {} layer {}", direction, side, layer)
            }
        }
    }
}




/**
 * Grouping key of the kernels of a time-stepping program: the stage (0 for
 * the initial boundary pass) and the phase within it.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Step {
    pub stage: u32,
    pub phase: Phase,
}

impl Step {
    pub fn new(stage: u32, phase: Phase) -> Self {
        Self { stage, phase }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} {}", self.stage, self.phase)
    }
}




/**
 * Every field access a group of statements reads and writes.
 */
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Footprint {
    pub reads: BTreeSet<FieldAccess>,
    pub writes: BTreeSet<FieldAccess>,
}

impl Footprint {

    pub fn of(statements: &[Statement]) -> Self {
        let mut result = Self::default();
        for statement in statements {
            result.writes.insert(statement.target.clone());
            result.reads.extend(statement.value.field_accesses());
        }
        result
    }


    /**
     * Return the largest absolute read offset along each direction.
     */
    pub fn halo(&self, ndim: usize) -> Vec<usize> {
        let mut halo = vec![0; ndim];
        for read in &self.reads {
            for (h, o) in halo.iter_mut().zip(&read.offset) {
                *h = (*h).max(o.unsigned_abs() as usize);
            }
        }
        halo
    }


    /**
     * Return the reads of a given field at a given level.
     */
    pub fn reads_of<'a>(&'a self, name: &'a str, level: TimeLevel) -> impl Iterator<Item = &'a FieldAccess> {
        self.reads.iter().filter(move |r| r.name == name && r.level == level)
    }
}




/**
 * An ordered unit of discrete computation handed to code emission.
 */
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Kernel<K> {
    pub name: String,
    pub key: K,
    pub range: IndexSpace,
    pub statements: Vec<Statement>,
    pub footprint: Footprint,
    pub halo: Vec<usize>,
}

impl<K> Kernel<K> {

    /**
     * Return the points a read or write touches, when performed at every
     * point of this kernel's range.
     */
    pub fn region(&self, access: &FieldAccess) -> IndexSpace {
        self.range.translate(&access.offset)
    }
}

impl<K: fmt::Display> fmt::Display for Kernel<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kernel '{}' over", self.name)?;
        for d in 0..self.range.rank() {
            let r = self.range.range(d);
            write!(f, " i{}={}..{}", d, r.start, r.end)?;
        }
        writeln!(f, " (halo {:?})", self.halo)?;
        for statement in &self.statements {
            writeln!(f, "    {}", statement)?;
        }
        Ok(())
    }
}




/**
 * Collects statements under a caller-supplied phase key and turns them into
 * dependency-ordered kernels, one per key.
 */
pub struct KernelBuilder<K> {
    ndim: usize,
    groups: BTreeMap<K, Vec<Statement>>,
}




// ============================================================================
impl<K> KernelBuilder<K> where K: Ord + Clone + fmt::Display {


    pub fn new(ndim: usize) -> Self {
        Self { ndim, groups: BTreeMap::new() }
    }


    /**
     * Append a statement to the group of the given key. Statements within a
     * group keep the order they were pushed in.
     */
    pub fn push(&mut self, key: K, statement: Statement) {
        self.groups.entry(key).or_default().push(statement)
    }



    /**
     * Return the footprint each group will have.
     */
    pub fn footprints(&self) -> BTreeMap<K, Footprint> {
        self.groups.iter().map(|(k, s)| (k.clone(), Footprint::of(s))).collect()
    }


    /**
     * Freeze the groups into kernels and order them. The range function
     * gives the points each kernel runs over.
     *
     * Kernel A precedes kernel B whenever A writes a field B reads, at the
     * same or an earlier time level. At the same level the write and read
     * regions must also overlap; different levels are different arrays and
     * are ordered regardless. Among unconstrained kernels, smaller keys go
     * first.
     */
    pub fn build<F>(self, range: F) -> Result<Vec<Kernel<K>>>
    where
        F: Fn(&K) -> IndexSpace,
    {
        let ndim = self.ndim;
        let kernels: Vec<Kernel<K>> = self
            .groups
            .into_iter()
            .map(|(key, statements)| {
                let footprint = Footprint::of(&statements);
                Kernel {
                    name: key.to_string(),
                    range: range(&key),
                    halo: footprint.halo(ndim),
                    key,
                    statements,
                    footprint,
                }
            })
            .collect();

        for kernel in &kernels {
            if let Some(read) = self_dependency(kernel) {
                return Err(Error::CyclicKernelDependency {
                    kernel: kernel.name.clone(),
                    field: read.name.clone(),
                    offset: read.offset.clone(),
                    level: read.level,
                });
            }
        }
        let mut graph: AdjacencyList<usize, FieldAccess> = AdjacencyList::new();

        for (a, writer) in kernels.iter().enumerate() {
            for (b, reader) in kernels.iter().enumerate() {
                if a == b {
                    continue;
                }
                if let Some(read) = first_dependency(writer, reader) {
                    graph.insert(a, b, read.clone());
                }
            }
        }
        debug!("{} kernels with {} dependencies", kernels.len(), graph.edge_count());

        let vertices: Vec<usize> = (0..kernels.len()).collect();

        match graph.topological_sort(&vertices) {
            Ok(order) => {
                let mut slots: Vec<Option<Kernel<K>>> = kernels.into_iter().map(Some).collect();
                let ordered: Vec<Kernel<K>> = order.into_iter().filter_map(|n| slots[n].take()).collect();
                info!("ordered {} kernels", ordered.len());
                Ok(ordered)
            }
            Err(remaining) => Err(cycle_error(&kernels, &graph, &remaining)),
        }
    }
}

fn depends<K>(writer: &Kernel<K>, write: &FieldAccess, reader: &Kernel<K>, read: &FieldAccess) -> bool {
    write.name == read.name
        && (write.level < read.level
            || (write.level == read.level && writer.region(write).intersects(&reader.region(read))))
}

fn first_dependency<'a, K>(writer: &Kernel<K>, reader: &'a Kernel<K>) -> Option<&'a FieldAccess> {
    reader
        .footprint
        .reads
        .iter()
        .find(|read| writer.footprint.writes.iter().any(|write| depends(writer, write, reader, read)))
}

/**
 * Return a read through which a kernel would consume its own output. A read
 * of the point being written, at the level being written, is pointwise and
 * allowed.
 */
fn self_dependency<K>(kernel: &Kernel<K>) -> Option<&FieldAccess> {
    kernel.footprint.reads.iter().find(|read| {
        kernel.footprint.writes.iter().any(|write| {
            let pointwise = write.level == read.level && write.offset == read.offset;
            !pointwise && depends(kernel, write, kernel, read)
        })
    })
}

fn cycle_error<K>(kernels: &[Kernel<K>], graph: &AdjacencyList<usize, FieldAccess>, remaining: &[usize]) -> Error {
    for &b in remaining {
        let on_cycle = graph
            .incoming_edges(&b)
            .find(|(a, _)| remaining.contains(a));

        if let Some((_, read)) = on_cycle {
            return Error::CyclicKernelDependency {
                kernel: kernels[b].name.clone(),
                field: read.name.clone(),
                offset: read.offset.clone(),
                level: read.level,
            };
        }
    }
    Error::CyclicKernelDependency {
        kernel: remaining.first().map(|&n| kernels[n].name.clone()).unwrap_or_default(),
        field: String::new(),
        offset: Vec::new(),
        level: TimeLevel::Current,
    }
}




/**
 * Group `(key, statement)` pairs into kernels over a common range and order
 * them.
 */
pub fn build<K, I>(statements: I, range: IndexSpace) -> Result<Vec<Kernel<K>>>
where
    K: Ord + Clone + fmt::Display,
    I: IntoIterator<Item = (K, Statement)>,
{
    let mut builder = KernelBuilder::new(range.rank());
    for (key, statement) in statements {
        builder.push(key, statement);
    }
    builder.build(|_| range.clone())
}
