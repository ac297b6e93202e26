//! Rewrite rules for the conservative and skew-symmetric derivative forms.
//! Both reduce a special-form derivative to plain derivatives and pointwise
//! products, so the discretiser only ever sees plain operators.

use log::debug;
use crate::algebra::Algebra;
use crate::error::{Error, Result};
use crate::expr::{Axis, Derivative, DerivativeKind, Expr, Node};
use crate::rational::Rational;




/**
 * Return the functions a derivative of `expr` distributes over: the
 * non-constant tensors, field accesses and inner derivatives, in order of
 * first appearance. The search does not descend into inner derivatives.
 */
pub fn participating_functions(expr: &Expr) -> Vec<Expr> {
    let mut result: Vec<Expr> = Vec::new();
    collect_participants(expr, &mut result);
    result
}

fn collect_participants(expr: &Expr, result: &mut Vec<Expr>) {
    let participates = match expr.node() {
        Node::Tensor(t) => !t.constant,
        Node::Field(_) | Node::Der(_) => true,
        Node::Coordinate(Axis::Space(_)) => true,
        _ => false,
    };
    if participates {
        if !result.contains(expr) {
            result.push(expr.clone());
        }
        return;
    }
    for child in expr.children() {
        collect_participants(child, result);
    }
}

/// Plain derivative of a single participating function along one axis.
fn derivative_of(function: &Expr, axis: &Axis) -> Expr {
    match function.node() {
        Node::Coordinate(a) if a == axis => Expr::one(),
        Node::Coordinate(_) => Expr::zero(),
        _ => Expr::der(DerivativeKind::Plain, function.clone(), vec![axis.clone()]),
    }
}

fn split_axes(derivative: &Derivative) -> Result<(&Axis, &[Axis])> {
    derivative.wrt.split_first().ok_or_else(|| Error::UnresolvedDerivative {
        derivative: Expr::from_node(Node::Der(derivative.clone())).to_string(),
        reason: "no direction given".to_string(),
    })
}

fn wrap_remaining(inner: Expr, rest: &[Axis]) -> Expr {
    if rest.is_empty() {
        inner
    } else {
        Expr::der(DerivativeKind::Plain, inner, rest.to_vec())
    }
}




/**
 * Distribute a derivative over the participating functions of its argument
 * by the product and chain rules:
 *
 * `Der(F, x) = sum_p dF/dp * Der(p, x)`
 *
 * When several directions are given, the rule is applied along the first and
 * the remaining directions wrap the result as a plain derivative.
 */
pub fn conservative(derivative: &Derivative, participants: &[Expr], algebra: &dyn Algebra) -> Result<Expr> {
    let (axis, rest) = split_axes(derivative)?;
    let mut terms = Vec::new();

    for p in participants {
        let partial = algebra.differentiate(&derivative.arg, p)?;
        if !partial.is_zero() {
            terms.push(partial * derivative_of(p, axis));
        }
    }
    Ok(wrap_remaining(Expr::add(terms), rest))
}




/**
 * Rewrite a convective derivative `Der(a*b, x)` as the average of its
 * divergence form and its advective form:
 *
 * `1/2 Der(a*b, x) + 1/2 (a Der(b, x) + b Der(a, x))`
 *
 * where `a` is the first participating function and `b` the rest of the
 * product. A compound `b` is itself distributed by the conservative rule.
 */
pub fn skew(derivative: &Derivative, participants: &[Expr], algebra: &dyn Algebra) -> Result<Expr> {
    let (axis, rest) = split_axes(derivative)?;
    let arg = &derivative.arg;

    if participants.len() < 2 {
        let plain = Expr::der(DerivativeKind::Plain, arg.clone(), vec![axis.clone()]);
        return Ok(wrap_remaining(plain, rest));
    }
    let a = &participants[0];
    let b = algebra.simplify(&(arg.clone() / a.clone()))?;

    if b.any(&|e| matches!(e.node(), Node::Pow(base, n) if base == a && *n < 0)) {
        return Err(Error::UnresolvedDerivative {
            derivative: Expr::from_node(Node::Der(derivative.clone())).to_string(),
            reason: format!("argument is not a product with {}", a),
        });
    }
    let b_participants = participating_functions(&b);
    let der_b = if b_participants.len() > 1 {
        let inner = Derivative { kind: DerivativeKind::Conservative, arg: b.clone(), wrt: vec![axis.clone()] };
        conservative(&inner, &b_participants, algebra)?
    } else {
        Expr::der(DerivativeKind::Plain, b.clone(), vec![axis.clone()])
    };
    let half = Expr::number(Rational::new(1, 2));
    let divergence = Expr::der(DerivativeKind::Plain, arg.clone(), vec![axis.clone()]);
    let advective = a.clone() * der_b + b * derivative_of(a, axis);

    Ok(wrap_remaining(half.clone() * divergence + half * advective, rest))
}




/**
 * Replace every conservative or skew-symmetric derivative in an expression
 * with its plain-derivative rewrite. Inner forms are rewritten first.
 */
pub fn rewrite_special_forms(expr: &Expr, algebra: &dyn Algebra) -> Result<Expr> {
    let expr = expr.try_map_children(|c| rewrite_special_forms(c, algebra))?;

    match expr.node() {
        Node::Der(d) if d.kind != DerivativeKind::Plain => {
            let participants = participating_functions(&d.arg);
            let result = match d.kind {
                DerivativeKind::Conservative => conservative(d, &participants, algebra)?,
                DerivativeKind::Skew => skew(d, &participants, algebra)?,
                DerivativeKind::Plain => expr.clone(),
            };
            debug!("rewrote {} as {}", expr, result);
            Ok(result)
        }
        _ => Ok(expr),
    }
}
