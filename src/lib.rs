//! Stencilgen turns systems of partial differential equations, written in
//! Einstein notation, into ordered finite-difference kernels for an explicit
//! time-stepping program. Abstract equations are expanded over their free
//! indices (with implied summation over repeated ones), their derivatives
//! are replaced by central-difference stencils, and the resulting discrete
//! statements are grouped into kernels ordered by their read/write
//! dependencies. Each block of the output carries its grid, its kernels and
//! the ghost depth they require; emitting backend source from it is left to
//! the consumer.

pub mod adjacency_list;
pub mod algebra;
pub mod block;
pub mod boundary;
pub mod config;
pub mod discretise;
pub mod emit;
pub mod error;
pub mod expand;
pub mod expr;
pub mod grid;
pub mod index_space;
pub mod kernel;
pub mod parse;
pub mod problem;
pub mod rational;
pub mod scheme;
pub mod special;
