//! Expansion of Einstein-notation equations into explicit scalar equations.
//!
//! A letter appearing once in a product (or a derivative, which behaves like a
//! product of its argument and its directions) is free; a letter appearing
//! twice is a dummy and is summed over its range at that node. The free set of
//! every term of a sum must agree.

use core::ops::Range;
use std::collections::{BTreeMap, BTreeSet};
use log::debug;
use serde::{Deserialize, Serialize};
use crate::algebra::Algebra;
use crate::error::{Error, Result};
use crate::expr::{Axis, Equation, Expr, Index, Node, Tensor};
use crate::index_space::IndexSpace;




/**
 * The range of values each index letter runs over. Letters default to
 * `0..ndim`.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexRanges {
    ndim: usize,
    overrides: BTreeMap<String, Range<usize>>,
}

impl IndexRanges {
    pub fn new(ndim: usize) -> Self {
        Self { ndim, overrides: BTreeMap::new() }
    }

    pub fn with(mut self, letter: &str, range: Range<usize>) -> Self {
        self.overrides.insert(letter.to_string(), range);
        self
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn range(&self, letter: &str) -> Range<usize> {
        self.overrides.get(letter).cloned().unwrap_or(0..self.ndim)
    }

    /**
     * Return the index space spanned by the given letters, in the order
     * given. The first letter varies slowest.
     */
    pub fn space(&self, letters: &[String]) -> IndexSpace {
        IndexSpace::new(
            letters
                .iter()
                .map(|l| self.range(l))
                .map(|r| r.start as i64..r.end as i64)
                .collect(),
        )
    }
}




// ============================================================================
fn leaf_letters(expr: &Expr) -> Vec<String> {
    let letters = |indices: &[Index]| -> Vec<String> {
        indices.iter().filter_map(|i| i.as_letter().map(String::from)).collect()
    };
    match expr.node() {
        Node::Tensor(t) => letters(&t.indices),
        Node::Coordinate(Axis::Space(Index::Letter(l))) => vec![l.clone()],
        Node::Delta(i, j) => letters(&[i.clone(), j.clone()]),
        Node::LeviCivita(indices) => letters(indices),
        _ => Vec::new(),
    }
}

/// Letters meeting at a product-like node, counted, in order of first
/// appearance.
fn local_counts(expr: &Expr) -> Vec<(String, usize)> {
    let letters = match expr.node() {
        Node::Mul(factors) => factors.iter().flat_map(outer_letters).collect(),
        Node::Der(d) => {
            let mut letters = outer_letters(&d.arg);
            for axis in &d.wrt {
                if let Axis::Space(Index::Letter(l)) = axis {
                    letters.push(l.clone())
                }
            }
            letters
        }
        _ => leaf_letters(expr),
    };
    let mut counts: Vec<(String, usize)> = Vec::new();
    for letter in letters {
        match counts.iter_mut().find(|(l, _)| *l == letter) {
            Some((_, n)) => *n += 1,
            None => counts.push((letter, 1)),
        }
    }
    counts
}

fn outer_letters(expr: &Expr) -> Vec<String> {
    match expr.node() {
        Node::Add(terms) => terms.first().map(outer_letters).unwrap_or_default(),
        Node::Pow(base, n) if *n != 2 => outer_letters(base),
        Node::Pow(..) | Node::Call(..) => Vec::new(),
        _ => local_counts(expr)
            .into_iter()
            .filter(|(_, n)| *n == 1)
            .map(|(l, _)| l)
            .collect(),
    }
}

fn dummies(expr: &Expr) -> Vec<String> {
    match expr.node() {
        Node::Pow(base, 2) => outer_letters(base),
        Node::Add(_) | Node::Pow(..) | Node::Call(..) => Vec::new(),
        _ => local_counts(expr)
            .into_iter()
            .filter(|(_, n)| *n == 2)
            .map(|(l, _)| l)
            .collect(),
    }
}

fn as_set(letters: &[String]) -> BTreeSet<&String> {
    letters.iter().collect()
}

fn validate(expr: &Expr) -> Result<()> {
    let invalid = |reason: String| Error::InvalidIndexUsage { term: expr.to_string(), reason };

    for child in expr.children() {
        validate(child)?;
    }
    match expr.node() {
        Node::Add(terms) => {
            let first = terms.first().map(outer_letters).unwrap_or_default();
            for term in terms.iter().skip(1) {
                let other = outer_letters(term);
                if as_set(&first) != as_set(&other) {
                    return Err(invalid(format!(
                        "terms of a sum have free indices {:?} and {:?}",
                        first, other
                    )));
                }
            }
        }
        Node::Pow(base, n) => {
            if *n != 2 && !outer_letters(base).is_empty() {
                return Err(invalid(format!("indexed term raised to the power {}", n)));
            }
        }
        Node::Call(function, arg) => {
            if !outer_letters(arg).is_empty() {
                return Err(invalid(format!("free index inside {}()", function.name())));
            }
        }
        _ => {
            if let Some((letter, n)) = local_counts(expr).into_iter().find(|(_, n)| *n > 2) {
                return Err(invalid(format!("index {} appears {} times", letter, n)));
            }
        }
    }
    Ok(())
}




/**
 * Return the free indices of an expression in order of first appearance,
 * after checking that every index is used consistently.
 */
pub fn free_indices(expr: &Expr) -> Result<Vec<String>> {
    validate(expr)?;
    Ok(outer_letters(expr))
}




/**
 * Return every index letter used anywhere in an expression.
 */
pub fn all_letters(expr: &Expr) -> BTreeSet<String> {
    let mut result = BTreeSet::new();
    expr.visit(&mut |e| {
        result.extend(leaf_letters(e));
        if let Node::Der(d) = e.node() {
            for axis in &d.wrt {
                if let Axis::Space(Index::Letter(l)) = axis {
                    result.insert(l.clone());
                }
            }
        }
    });
    result
}




/**
 * Rename index letters throughout an expression. Letters absent from the map
 * are left alone. No summation is performed.
 */
pub fn relabel(expr: &Expr, map: &BTreeMap<String, Index>) -> Expr {
    let index = |i: &Index| relabel_index(i, map);
    match expr.node() {
        Node::Tensor(t) => Expr::from_node(Node::Tensor(Tensor {
            name: t.name.clone(),
            indices: t.indices.iter().map(index).collect(),
            constant: t.constant,
        })),
        Node::Coordinate(a) => Expr::coordinate(relabel_axis(a, map)),
        Node::Delta(i, j) => Expr::delta(index(i), index(j)),
        Node::LeviCivita(indices) => Expr::levi_civita(indices.iter().map(index).collect()),
        Node::Der(d) => Expr::der(d.kind, relabel(&d.arg, map), relabel_axes(&d.wrt, map)),
        _ => expr.map_children(|c| relabel(c, map)),
    }
}

fn relabel_index(index: &Index, map: &BTreeMap<String, Index>) -> Index {
    match index {
        Index::Letter(l) => map.get(l).cloned().unwrap_or_else(|| index.clone()),
        Index::Value(_) => index.clone(),
    }
}

fn relabel_axis(axis: &Axis, map: &BTreeMap<String, Index>) -> Axis {
    match axis {
        Axis::Space(i) => Axis::Space(relabel_index(i, map)),
        Axis::Time => Axis::Time,
    }
}

fn relabel_axes(axes: &[Axis], map: &BTreeMap<String, Index>) -> Vec<Axis> {
    axes.iter().map(|a| relabel_axis(a, map)).collect()
}




// ============================================================================
type Assignment = BTreeMap<String, Index>;

fn sum_over<F>(letters: &[String], values: &Assignment, ranges: &IndexRanges, f: F) -> Expr
where
    F: Fn(&Assignment) -> Expr,
{
    if letters.is_empty() {
        return f(values);
    }
    let space = ranges.space(letters);
    let terms = space.iter().map(|combo| {
        let mut values = values.clone();
        for (letter, v) in letters.iter().zip(combo) {
            values.insert(letter.clone(), Index::Value(v as usize));
        }
        f(&values)
    });
    Expr::add(terms.collect())
}

fn instantiate(expr: &Expr, values: &Assignment, ranges: &IndexRanges, algebra: &dyn Algebra) -> Expr {
    let local = dummies(expr);
    match expr.node() {
        Node::Add(terms) => Expr::add(terms.iter().map(|t| instantiate(t, values, ranges, algebra)).collect()),
        Node::Call(function, arg) => Expr::call(*function, instantiate(arg, values, ranges, algebra)),
        Node::Pow(base, n) => sum_over(&local, values, ranges, |v| {
            Expr::pow(instantiate(base, v, ranges, algebra), *n)
        }),
        Node::Mul(factors) => sum_over(&local, values, ranges, |v| {
            Expr::mul(factors.iter().map(|f| instantiate(f, v, ranges, algebra)).collect())
        }),
        Node::Der(d) => sum_over(&local, values, ranges, |v| {
            Expr::der(d.kind, instantiate(&d.arg, v, ranges, algebra), relabel_axes(&d.wrt, v))
        }),
        _ => sum_over(&local, values, ranges, |v| {
            let leaf = relabel(expr, v);
            algebra.reduce_known_form(&leaf).unwrap_or(leaf)
        }),
    }
}




/**
 * A lazy, restartable sequence of explicit equations, one per combination of
 * free index values, in row-major order over the free indices as they appear
 * on the left-hand side.
 */
#[derive(Clone)]
pub struct Expansion<'a> {
    equation: Equation,
    free: Vec<String>,
    space: IndexSpace,
    ranges: IndexRanges,
    algebra: &'a dyn Algebra,
    position: usize,
}

impl<'a> Expansion<'a> {

    pub fn free_indices(&self) -> &[String] {
        &self.free
    }

    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl<'a> Iterator for Expansion<'a> {
    type Item = Result<Equation>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.space.len() {
            return None;
        }
        let combo = self.space.index_at(self.position);
        self.position += 1;

        let values: Assignment = self
            .free
            .iter()
            .cloned()
            .zip(combo.into_iter().map(|v| Index::Value(v as usize)))
            .collect();
        let lhs = instantiate(&self.equation.lhs, &values, &self.ranges, self.algebra);
        let rhs = instantiate(&self.equation.rhs, &values, &self.ranges, self.algebra);
        Some(self.algebra.simplify(&rhs).map(|rhs| Equation::new(lhs, rhs)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.space.len().saturating_sub(self.position);
        (n, Some(n))
    }
}

impl<'a> ExactSizeIterator for Expansion<'a> {}




/**
 * Expand an abstract equation over the given index ranges. The input is not
 * modified; the returned iterator yields explicit equations on demand.
 */
pub fn expand<'a>(equation: &Equation, ranges: &IndexRanges, algebra: &'a dyn Algebra) -> Result<Expansion<'a>> {
    let lhs = free_indices(&equation.lhs)?;
    let rhs = free_indices(&equation.rhs)?;

    if as_set(&lhs) != as_set(&rhs) && !equation.rhs.is_zero() {
        let sorted = |v: Vec<String>| -> Vec<String> { v.into_iter().collect::<BTreeSet<_>>().into_iter().collect() };
        return Err(Error::IndexMismatch {
            equation: equation.to_string(),
            lhs: sorted(lhs),
            rhs: sorted(rhs),
        });
    }
    let space = ranges.space(&lhs);
    debug!("expanding {} over {:?} ({} combinations)", equation, lhs, space.len());

    Ok(Expansion {
        equation: equation.clone(),
        free: lhs,
        space,
        ranges: ranges.clone(),
        algebra,
        position: 0,
    })
}




// ============================================================================
/**
 * Hands out index letters not yet used in a given set.
 */
struct FreshLetters {
    used: BTreeSet<String>,
    next: usize,
}

impl FreshLetters {
    fn new(used: BTreeSet<String>) -> Self {
        Self { used, next: 0 }
    }

    fn next_letter(&mut self) -> String {
        loop {
            let candidate = format!("k{}", self.next);
            self.next += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

fn definition_pattern(definition: &Equation) -> Result<(&Tensor, Vec<String>)> {
    let invalid = |reason: &str| Error::InvalidEquation {
        equation: definition.to_string(),
        reason: reason.to_string(),
    };
    let tensor = match definition.lhs.node() {
        Node::Tensor(t) if !t.constant => t,
        _ => return Err(invalid("a substitution must define a named quantity")),
    };
    let letters: Vec<String> = tensor.indices.iter().filter_map(|i| i.as_letter().map(String::from)).collect();
    if letters.len() != tensor.rank() || as_set(&letters).len() != letters.len() {
        return Err(invalid("the defined quantity must carry distinct index letters"));
    }
    Ok((tensor, letters))
}

fn substitute_once(expr: &Expr, definitions: &[Equation], fresh: &mut FreshLetters) -> Result<Expr> {
    if let Node::Tensor(t) = expr.node() {
        for definition in definitions {
            let (pattern, letters) = definition_pattern(definition)?;
            if pattern.name != t.name || pattern.rank() != t.rank() || t.constant {
                continue;
            }
            let mut map: Assignment = letters.iter().cloned().zip(t.indices.iter().cloned()).collect();
            for internal in all_letters(&definition.rhs) {
                if !map.contains_key(&internal) {
                    map.insert(internal, Index::Letter(fresh.next_letter()));
                }
            }
            return Ok(relabel(&definition.rhs, &map));
        }
        return Ok(expr.clone());
    }
    expr.try_map_children(|c| substitute_once(c, definitions, fresh))
}




/**
 * Replace every occurrence of a defined quantity on the right-hand side with
 * its definition. Definitions may refer to one another, but not recursively.
 */
pub fn apply_substitutions(equation: &Equation, definitions: &[Equation]) -> Result<Equation> {
    if definitions.is_empty() {
        return Ok(equation.clone());
    }
    let mut used = all_letters(&equation.lhs);
    used.extend(all_letters(&equation.rhs));
    for definition in definitions {
        used.extend(all_letters(&definition.rhs));
    }
    let mut fresh = FreshLetters::new(used);
    let mut rhs = equation.rhs.clone();

    for _ in 0..=definitions.len() {
        let next = substitute_once(&rhs, definitions, &mut fresh)?;
        if next == rhs {
            return Ok(Equation::new(equation.lhs.clone(), rhs));
        }
        rhs = next;
    }
    Err(Error::InvalidEquation {
        equation: equation.to_string(),
        reason: "substitutions refer to each other recursively".to_string(),
    })
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::algebra::Canonical;
    use crate::parse::{parse_equation, parse_expr, Notation};

    fn eq(text: &str) -> Equation {
        parse_equation(text, &Notation::default()).unwrap()
    }

    fn ex(text: &str) -> Expr {
        parse_expr(text, &Notation::default()).unwrap()
    }

    fn has_letters(e: &Equation) -> bool {
        !all_letters(&e.lhs).is_empty() || !all_letters(&e.rhs).is_empty()
    }

    #[test]
    fn expansion_is_complete() {
        let algebra = Canonical;
        let equation = eq("Eq(Der(rhou_i, t), -Der(rhou_i*u_j + KD(_i,_j)*p, x_j))");
        let explicit: Vec<_> = expand(&equation, &IndexRanges::new(3), &algebra).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(explicit.len(), 3);
        assert!(explicit.iter().all(|e| !has_letters(e)));
        assert_eq!(explicit[1].lhs, ex("Der(rhou_1, t)"));
    }

    #[test]
    fn combinations_are_row_major() {
        let algebra = Canonical;
        let equation = eq("Eq(tau_i_j, u_i*v_j)");
        let lhs: Vec<String> = expand(&equation, &IndexRanges::new(2), &algebra)
            .unwrap()
            .map(|e| e.unwrap().lhs.to_string())
            .collect();
        assert_eq!(lhs, vec!["tau00", "tau01", "tau10", "tau11"]);
    }

    #[test]
    fn dummy_indices_are_summed() {
        let algebra = Canonical;
        for (r, expected) in [(2, "a_0*b_0 + a_1*b_1"), (3, "a_0*b_0 + a_1*b_1 + a_2*b_2")] {
            let equation = eq("Eq(q, a_j*b_j)");
            let explicit: Vec<_> = expand(&equation, &IndexRanges::new(r), &algebra).unwrap().collect::<Result<_>>().unwrap();
            assert_eq!(explicit.len(), 1);
            assert!(algebra.equivalent(&explicit[0].rhs, &ex(expected)));
        }
    }

    #[test]
    fn squared_indexed_terms_contract() {
        let algebra = Canonical;
        let a: Vec<_> = expand(&eq("Eq(k, u_j**2)"), &IndexRanges::new(2), &algebra).unwrap().collect::<Result<_>>().unwrap();
        let b: Vec<_> = expand(&eq("Eq(k, u_j*u_j)"), &IndexRanges::new(2), &algebra).unwrap().collect::<Result<_>>().unwrap();
        assert!(algebra.equivalent(&a[0].rhs, &b[0].rhs));
    }

    #[test]
    fn kronecker_delta_reduces() {
        let algebra = Canonical;
        let equation = eq("Eq(m_i_j, KD(_i,_j)*p)");
        let rhs: Vec<Expr> = expand(&equation, &IndexRanges::new(2), &algebra).unwrap().map(|e| e.unwrap().rhs).collect();
        let p = ex("p");
        assert_eq!(rhs, vec![p.clone(), Expr::zero(), Expr::zero(), p]);
    }

    #[test]
    fn levi_civita_reduces() {
        let algebra = Canonical;
        let equation = eq("Eq(w_i, LC(_i,_j,_k)*Der(u_k, x_j))");
        let explicit: Vec<_> = expand(&equation, &IndexRanges::new(3), &algebra).unwrap().collect::<Result<_>>().unwrap();
        let expected = ex("Der(u_2, x_1) - Der(u_1, x_2)");
        assert!(algebra.equivalent(&explicit[0].rhs, &expected));
    }

    #[test]
    fn divergence_sums_over_direction() {
        let algebra = Canonical;
        let explicit: Vec<_> = expand(&eq("Eq(Der(rho, t), -Der(rhou_j, x_j))"), &IndexRanges::new(2), &algebra)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let expected = ex("-Der(rhou_0, x_0) - Der(rhou_1, x_1)");
        assert!(algebra.equivalent(&explicit[0].rhs, &expected));
    }

    #[test]
    fn mismatched_free_indices_are_rejected() {
        let algebra = Canonical;
        match expand(&eq("Eq(u_i, v_j)"), &IndexRanges::new(2), &algebra) {
            Err(Error::IndexMismatch { lhs, rhs, .. }) => {
                assert_eq!(lhs, vec!["i"]);
                assert_eq!(rhs, vec!["j"]);
            }
            _ => panic!("expected an index mismatch"),
        }
        assert!(matches!(
            expand(&eq("Eq(q, a_j*b_j*c_j)"), &IndexRanges::new(2), &algebra),
            Err(Error::InvalidIndexUsage { .. })
        ));
        assert!(matches!(
            expand(&eq("Eq(q_i, a_i + b)"), &IndexRanges::new(2), &algebra),
            Err(Error::InvalidIndexUsage { .. })
        ));
    }

    #[test]
    fn expansion_is_restartable() {
        let algebra = Canonical;
        let mut expansion = expand(&eq("Eq(u_i, v_i)"), &IndexRanges::new(3), &algebra).unwrap();
        let copy = expansion.clone();
        let first: Vec<Equation> = expansion.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(expansion.len(), 0);
        expansion.restart();
        let second: Vec<Equation> = expansion.collect::<Result<_>>().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, copy.collect::<Result<Vec<_>>>().unwrap());
    }

    #[test]
    fn index_ranges_can_be_overridden() {
        let algebra = Canonical;
        let ranges = IndexRanges::new(3).with("a", 0..2);
        let explicit: Vec<_> = expand(&eq("Eq(y_a, z_a)"), &ranges, &algebra).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(explicit.len(), 2);
    }

    #[test]
    fn substitution_renames_internal_indices() {
        let definition = eq("Eq(e_i, u_i*v_j*w_j)");
        let substituted = apply_substitutions(&eq("Eq(f_j, e_j)"), &[definition]).unwrap();
        assert_eq!(free_indices(&substituted.rhs).unwrap(), vec!["j"]);
        assert!(!all_letters(&substituted.rhs).contains("i"));
    }

    #[test]
    fn stress_tensor_substitution_expands() {
        let algebra = Canonical;
        let definition = eq("Eq(tau_i_j, mu*(Der(u_i, x_j) + Der(u_j, x_i)))");
        let equation = eq("Eq(Der(rhou_i, t), Der(tau_i_j, x_j))");
        let substituted = apply_substitutions(&equation, &[definition]).unwrap();
        let explicit: Vec<_> = expand(&substituted, &IndexRanges::new(2), &algebra).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(explicit.len(), 2);
        assert!(explicit.iter().all(|e| !has_letters(e)));
    }

    #[test]
    fn recursive_substitutions_are_rejected() {
        let a = eq("Eq(a, b + 1)");
        let b = eq("Eq(b, a + 1)");
        assert!(apply_substitutions(&eq("Eq(q, a)"), &[a, b]).is_err());
    }
}
