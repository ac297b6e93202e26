use std::collections::BTreeMap;
use crate::error::{Error, Result};
use crate::expr::{Expr, Index, Intrinsic, Node};
use crate::rational::Rational;




/**
 * The narrow symbolic capability the code generator consumes. Every stage
 * of the pipeline asks an `Algebra` to simplify, differentiate, substitute,
 * or collapse index-reduction symbols, and trusts the result; no stage
 * carries simplification logic of its own.
 *
 * Implementations must be pure: the same input yields the same output, and
 * concurrent read-only use from several threads must be safe.
 */
pub trait Algebra: Send + Sync {

    /**
     * Bring an expression to a canonical form, such that two expressions
     * which are equal up to commutative and associative reordering (and
     * collection of like terms) simplify to structurally equal trees. Fails
     * if a coefficient cannot be represented exactly.
     */
    fn simplify(&self, expr: &Expr) -> Result<Expr>;

    /**
     * Differentiate an expression analytically with respect to an atom
     * (a field access, tensor component, or symbol).
     */
    fn differentiate(&self, expr: &Expr, var: &Expr) -> Result<Expr>;

    /**
     * Replace every occurrence of `from` with `to`.
     */
    fn substitute(&self, expr: &Expr, from: &Expr, to: &Expr) -> Expr;

    /**
     * If the expression is a fully resolved Kronecker delta or Levi-Civita
     * symbol, return its numeric value.
     */
    fn reduce_known_form(&self, expr: &Expr) -> Option<Expr>;

    /**
     * Determine whether two expressions are symbolically equal. Expressions
     * whose difference cannot be simplified are not considered equal.
     */
    fn equivalent(&self, a: &Expr, b: &Expr) -> bool {
        matches!(self.simplify(&(a.clone() - b.clone())), Ok(d) if d.is_zero())
    }
}




/**
 * The default algebra: expressions are expanded into a sum of monomials with
 * exact rational coefficients. Anything which is not a sum, product, integer
 * power or number is an opaque atom (its own children simplified in turn).
 * Rational functions are not cancelled beyond matching atom exponents.
 */
#[derive(Clone, Copy, Debug, Default)]
pub struct Canonical;




type Monomial = BTreeMap<Expr, i32>;

#[derive(Clone, Debug, Default)]
struct Polynomial {
    terms: BTreeMap<Monomial, Rational>,
}




// ============================================================================
impl Polynomial {

    fn constant(r: Rational) -> Self {
        let mut terms = BTreeMap::new();
        if !r.is_zero() {
            terms.insert(Monomial::new(), r);
        }
        Self { terms }
    }

    fn atom(e: Expr, exponent: i32) -> Self {
        let mut monomial = Monomial::new();
        monomial.insert(e, exponent);
        let mut terms = BTreeMap::new();
        terms.insert(monomial, Rational::ONE);
        Self { terms }
    }

    fn insert(&mut self, monomial: Monomial, coefficient: Rational) -> Option<()> {
        let entry = self.terms.entry(monomial).or_insert(Rational::ZERO);
        *entry = entry.checked_add(coefficient)?;
        if entry.is_zero() {
            self.terms.retain(|_, c| !c.is_zero());
        }
        Some(())
    }

    fn add(mut self, other: Polynomial) -> Option<Self> {
        for (m, c) in other.terms {
            self.insert(m, c)?;
        }
        Some(self)
    }

    fn mul(&self, other: &Polynomial) -> Option<Self> {
        let mut result = Polynomial::default();
        for (ma, ca) in &self.terms {
            for (mb, cb) in &other.terms {
                let mut m = ma.clone();
                for (atom, n) in mb {
                    let e = m.entry(atom.clone()).or_insert(0);
                    *e = e.checked_add(*n)?;
                    if *e == 0 {
                        m.remove(atom);
                    }
                }
                result.insert(m, ca.checked_mul(*cb)?)?;
            }
        }
        Some(result)
    }


    /**
     * Raise to a non-negative power by repeated squaring.
     */
    fn pow(&self, n: u32) -> Option<Self> {
        let mut base = self.clone();
        let mut k = n;
        let mut result = Polynomial::constant(Rational::ONE);

        while k > 0 {
            if k & 1 == 1 {
                result = result.mul(&base)?;
            }
            k >>= 1;
            if k > 0 {
                base = base.mul(&base)?;
            }
        }
        Some(result)
    }

    fn as_single_term(&self) -> Option<(&Monomial, Rational)> {
        if self.terms.len() == 1 {
            self.terms.iter().next().map(|(m, c)| (m, *c))
        } else {
            None
        }
    }

    fn into_expr(self) -> Expr {
        let terms = self.terms.into_iter().map(|(monomial, c)| {
            let mut factors = Vec::with_capacity(monomial.len() + 1);
            if !c.is_one() || monomial.is_empty() {
                factors.push(Expr::number(c));
            }
            for (atom, n) in monomial {
                factors.push(Expr::pow(atom, n));
            }
            Expr::mul(factors)
        });
        Expr::add(terms.collect())
    }
}




fn overflow(expr: &Expr) -> Error {
    Error::CoefficientOverflow { expression: expr.to_string() }
}




// ============================================================================
impl Canonical {

    fn to_polynomial(&self, expr: &Expr) -> Result<Polynomial> {
        let polynomial = match expr.node() {
            Node::Number(r) => Some(Polynomial::constant(*r)),
            Node::Add(terms) => {
                let mut sum = Polynomial::default();
                for t in terms {
                    sum = sum.add(self.to_polynomial(t)?).ok_or_else(|| overflow(expr))?;
                }
                Some(sum)
            }
            Node::Mul(factors) => {
                let mut product = Polynomial::constant(Rational::ONE);
                for f in factors {
                    product = product.mul(&self.to_polynomial(f)?).ok_or_else(|| overflow(expr))?;
                }
                Some(product)
            }
            Node::Pow(base, n) => self.power(self.to_polynomial(base)?, *n),
            Node::Delta(..) | Node::LeviCivita(_) => match self.reduce_known_form(expr) {
                Some(value) => return self.to_polynomial(&value),
                None => Some(Polynomial::atom(expr.clone(), 1)),
            },
            Node::Call(function, arg) => Some(Polynomial::atom(Expr::call(*function, self.simplify(arg)?), 1)),
            Node::Der(_) => Some(Polynomial::atom(expr.try_map_children(|c| self.simplify(c))?, 1)),
            _ => Some(Polynomial::atom(expr.clone(), 1)),
        };
        polynomial.ok_or_else(|| overflow(expr))
    }

    fn power(&self, base: Polynomial, n: i32) -> Option<Polynomial> {
        if n >= 0 {
            return base.pow(n.unsigned_abs());
        }
        match base.as_single_term() {
            Some((monomial, c)) if !c.is_zero() => {
                let mut inverted = Monomial::new();
                for (atom, k) in monomial {
                    inverted.insert(atom.clone(), k.checked_mul(n)?);
                }
                let mut result = Polynomial::default();
                result.insert(inverted, c.powi(n)?)?;
                Some(result)
            }
            _ => Some(Polynomial::atom(base.into_expr(), n)),
        }
    }

    fn derivative_of_call(&self, function: Intrinsic, arg: &Expr) -> Expr {
        let call = |f| Expr::call(f, arg.clone());
        match function {
            Intrinsic::Exp => call(Intrinsic::Exp),
            Intrinsic::Log => Expr::pow(arg.clone(), -1),
            Intrinsic::Sin => call(Intrinsic::Cos),
            Intrinsic::Cos => -call(Intrinsic::Sin),
            Intrinsic::Tan => Expr::one() + Expr::pow(call(Intrinsic::Tan), 2),
            Intrinsic::Tanh => Expr::one() - Expr::pow(call(Intrinsic::Tanh), 2),
            Intrinsic::Sqrt => Expr::number(Rational::new(1, 2)) * Expr::pow(call(Intrinsic::Sqrt), -1),
            Intrinsic::Abs => arg.clone() * Expr::pow(call(Intrinsic::Abs), -1),
        }
    }

    fn differentiate_raw(&self, expr: &Expr, var: &Expr) -> Result<Expr> {
        if expr == var {
            return Ok(Expr::one());
        }
        Ok(match expr.node() {
            Node::Add(terms) => Expr::add(
                terms
                    .iter()
                    .map(|t| self.differentiate_raw(t, var))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Node::Mul(factors) => {
                let mut terms = Vec::with_capacity(factors.len());
                for i in 0..factors.len() {
                    let mut product: Vec<Expr> = factors.clone();
                    product[i] = self.differentiate_raw(&factors[i], var)?;
                    terms.push(Expr::mul(product));
                }
                Expr::add(terms)
            }
            Node::Pow(base, n) => {
                let lowered = n.checked_sub(1).ok_or_else(|| overflow(expr))?;
                Expr::mul(vec![
                    Expr::integer(i64::from(*n)),
                    Expr::pow(base.clone(), lowered),
                    self.differentiate_raw(base, var)?,
                ])
            }
            Node::Call(function, arg) => {
                let inner = self.differentiate_raw(arg, var)?;
                if self.simplify(&inner)?.is_zero() {
                    Expr::zero()
                } else {
                    self.derivative_of_call(*function, arg) * inner
                }
            }
            _ => Expr::zero(),
        })
    }
}




// ============================================================================
impl Algebra for Canonical {

    fn simplify(&self, expr: &Expr) -> Result<Expr> {
        Ok(self.to_polynomial(expr)?.into_expr())
    }

    fn differentiate(&self, expr: &Expr, var: &Expr) -> Result<Expr> {
        self.simplify(&self.differentiate_raw(expr, var)?)
    }

    fn substitute(&self, expr: &Expr, from: &Expr, to: &Expr) -> Expr {
        if expr == from {
            to.clone()
        } else {
            expr.map_children(|c| self.substitute(c, from, to))
        }
    }

    fn reduce_known_form(&self, expr: &Expr) -> Option<Expr> {
        match expr.node() {
            Node::Delta(Index::Value(a), Index::Value(b)) => Some(Expr::integer((a == b) as i64)),
            Node::LeviCivita(indices) => {
                let values: Vec<usize> = indices.iter().map(|i| i.as_value()).collect::<Option<_>>()?;
                Some(Expr::integer(permutation_sign(&values)))
            }
            _ => None,
        }
    }
}




/**
 * Sign of the permutation given by a sequence of distinct values, or zero if
 * any value repeats.
 */
fn permutation_sign(values: &[usize]) -> i64 {
    let mut sign = 1;
    for i in 0..values.len() {
        for j in i + 1..values.len() {
            if values[i] == values[j] {
                return 0;
            }
            if values[i] > values[j] {
                sign = -sign;
            }
        }
    }
    sign
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    fn s(name: &str) -> Expr {
        Expr::symbol(name)
    }

    #[test]
    fn like_terms_are_collected() {
        let algebra = Canonical;
        let e = s("a") * s("b") + s("b") * s("a") - s("a") * s("b") * Expr::integer(2);
        assert!(algebra.simplify(&e).unwrap().is_zero());
    }

    #[test]
    fn products_distribute_over_sums() {
        let algebra = Canonical;
        let lhs = (s("a") + s("b")) * (s("a") - s("b"));
        let rhs = Expr::pow(s("a"), 2) - Expr::pow(s("b"), 2);
        assert!(algebra.equivalent(&lhs, &rhs));
    }

    #[test]
    fn simplified_forms_are_order_independent() {
        let algebra = Canonical;
        let a = algebra.simplify(&(s("x") * s("y") + s("z"))).unwrap();
        let b = algebra.simplify(&(s("z") + s("y") * s("x"))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rational_coefficients_are_exact() {
        let algebra = Canonical;
        let third = Expr::number(Rational::new(1, 3));
        let e = third.clone() * s("a") + third.clone() * s("a") + third * s("a") - s("a");
        assert!(algebra.simplify(&e).unwrap().is_zero());
    }

    #[test]
    fn division_by_a_monomial_cancels() {
        let algebra = Canonical;
        let e = (s("a") * s("b")) / s("b");
        assert_eq!(algebra.simplify(&e).unwrap(), s("a"));
    }

    #[test]
    fn product_rule_is_applied() {
        let algebra = Canonical;
        let f = s("f");
        let g = s("g");
        let d = algebra.differentiate(&(f.clone() * g.clone() * f.clone()), &f).unwrap();
        assert!(algebra.equivalent(&d, &(Expr::integer(2) * f * g)));
    }

    #[test]
    fn chain_rule_goes_through_intrinsics() {
        let algebra = Canonical;
        let u = s("u");
        let e = Expr::call(Intrinsic::Exp, Expr::pow(u.clone(), 2));
        let d = algebra.differentiate(&e, &u).unwrap();
        let expected = Expr::integer(2) * u * Expr::call(Intrinsic::Exp, Expr::pow(s("u"), 2));
        assert!(algebra.equivalent(&d, &expected));
    }

    #[test]
    fn kronecker_delta_reduces_to_zero_or_one() {
        let algebra = Canonical;
        for i in 0..2 {
            for j in 0..2 {
                let delta = Expr::delta(Index::Value(i), Index::Value(j));
                let expected = if i == j { 1 } else { 0 };
                assert_eq!(algebra.reduce_known_form(&delta), Some(Expr::integer(expected)));
            }
        }
        assert_eq!(algebra.reduce_known_form(&Expr::delta(Index::letter("i"), Index::Value(0))), None);
    }

    #[test]
    fn levi_civita_has_permutation_sign() {
        let algebra = Canonical;
        let lc = |a, b, c| Expr::levi_civita(vec![Index::Value(a), Index::Value(b), Index::Value(c)]);
        assert_eq!(algebra.reduce_known_form(&lc(0, 1, 2)), Some(Expr::integer(1)));
        assert_eq!(algebra.reduce_known_form(&lc(1, 0, 2)), Some(Expr::integer(-1)));
        assert_eq!(algebra.reduce_known_form(&lc(2, 0, 1)), Some(Expr::integer(1)));
        assert_eq!(algebra.reduce_known_form(&lc(0, 0, 1)), Some(Expr::integer(0)));
    }

    #[test]
    fn substitution_replaces_subtrees() {
        let algebra = Canonical;
        let e = s("a") * (s("b") + s("c"));
        let r = algebra.substitute(&e, &(s("b") + s("c")), &s("d"));
        assert_eq!(r, s("a") * s("d"));
    }

    #[test]
    fn coefficient_overflow_is_an_error() {
        let algebra = Canonical;
        let huge = Expr::pow(Expr::integer(2), 200);
        assert!(matches!(algebra.simplify(&huge), Err(Error::CoefficientOverflow { .. })));

        let large = Expr::number(Rational::new(1 << 100, 1));
        let product = large.clone() * s("a") * large * s("b");
        assert!(matches!(algebra.simplify(&product), Err(Error::CoefficientOverflow { .. })));

        let fits = Expr::pow(Expr::integer(2), 120) - Expr::number(Rational::new(1 << 120, 1));
        assert!(algebra.simplify(&fits).unwrap().is_zero());
    }

    #[test]
    fn large_powers_are_taken_by_squaring() {
        let algebra = Canonical;
        let e = Expr::pow(s("a") * Expr::integer(-1), 1001) + Expr::pow(s("a"), 1001);
        assert!(algebra.simplify(&e).unwrap().is_zero());
    }
}
