use log::debug;
use serde::Serialize;
use crate::algebra::Algebra;
use crate::error::{Error, Result};
use crate::expr::{Axis, Derivative, DerivativeKind, Equation, Expr, FieldAccess, Node, TimeLevel};
use crate::grid::Grid;
use crate::kernel::{Phase, Statement};
use crate::scheme::{Limits, SchemeBindings, TemporalScheme};
use crate::special::rewrite_special_forms;




/// Name of the time step symbol in generated expressions.
pub const TIME_STEP: &str = "dt";




/**
 * An explicit equation with every derivative replaced by its stencil. The
 * right-hand side reads fields at the current time level; time stepping
 * relabels the level per stage.
 */
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum DiscreteEquation {
    /// `Der(field, t) = residual`
    Evolution { field: String, residual: Expr },
    /// `field = value`, evaluated pointwise
    Formula { field: String, value: Expr },
}




// ============================================================================
impl DiscreteEquation {

    pub fn field(&self) -> &str {
        match self {
            DiscreteEquation::Evolution { field, .. } => field,
            DiscreteEquation::Formula { field, .. } => field,
        }
    }

    pub fn value(&self) -> &Expr {
        match self {
            DiscreteEquation::Evolution { residual, .. } => residual,
            DiscreteEquation::Formula { value, .. } => value,
        }
    }

    pub fn is_evolution(&self) -> bool {
        matches!(self, DiscreteEquation::Evolution { .. })
    }


    /**
     * Return the statements this equation contributes to one stage of the
     * given time integration scheme, tagged with their phase. A formula is
     * tagged `Formula(slot)` and computed at the level the stage reads.
     * Forward Euler fuses the residual into the update; longer schemes store
     * it in `Residual_<field>` first.
     */
    pub fn stage_statements(&self, scheme: &TemporalScheme, stage: u32, ndim: usize, slot: usize) -> Vec<(Phase, Statement)> {
        let input = scheme.input_level(stage);
        match self {
            DiscreteEquation::Formula { field, value } => {
                let target = FieldAccess::new(field, ndim, input);
                vec![(Phase::Formula(slot), Statement::new(target, value.at_level(input)))]
            }
            DiscreteEquation::Evolution { field, residual } => {
                let dt = Expr::symbol(TIME_STEP);
                let old = Expr::field(FieldAccess::new(field, ndim, TimeLevel::Current));
                let previous = Expr::field(FieldAccess::new(field, ndim, input));
                let target = FieldAccess::new(field, ndim, scheme.output_level(stage));

                if scheme.stages() == 1 {
                    let value = previous + dt * residual.at_level(input);
                    return vec![(Phase::Update, Statement::new(target, value))];
                }
                let storage = FieldAccess::new(&format!("Residual_{}", field), ndim, TimeLevel::Stage(stage));
                let (a, b) = scheme.stage_weights(stage);
                let step = previous + dt * Expr::field(storage.clone());
                let value = if a.is_zero() {
                    step
                } else {
                    Expr::number(a) * old + Expr::number(b) * step
                };
                vec![
                    (Phase::Residual, Statement::new(storage, residual.at_level(input))),
                    (Phase::Update, Statement::new(target, value)),
                ]
            }
        }
    }
}




/**
 * Turns explicit equations into discrete ones against a grid and a set of
 * scheme bindings.
 */
pub struct Discretiser<'a> {
    schemes: &'a SchemeBindings,
    grid: &'a Grid,
    limits: Limits,
    algebra: &'a dyn Algebra,
}




// ============================================================================
impl<'a> Discretiser<'a> {

    pub fn new(schemes: &'a SchemeBindings, grid: &'a Grid, limits: Limits, algebra: &'a dyn Algebra) -> Self {
        Self { schemes, grid, limits, algebra }
    }


    /**
     * Discretise an explicit equation. The left-hand side must be either the
     * time derivative of a field (an evolution equation) or a field (a
     * formula). Scheme bindings for every derivative are checked before any
     * stencil is built.
     */
    pub fn discretise(&self, equation: &Equation) -> Result<DiscreteEquation> {
        let invalid = |reason: &str| Error::InvalidEquation {
            equation: equation.to_string(),
            reason: reason.to_string(),
        };
        let (evolution, target) = match equation.lhs.node() {
            Node::Der(d) if d.kind == DerivativeKind::Plain && d.wrt == [Axis::Time] => (true, &d.arg),
            Node::Der(_) => return Err(invalid("the left-hand side may only be differentiated once in time")),
            _ => (false, &equation.lhs),
        };
        let field = match target.node() {
            Node::Tensor(t) if !t.constant && t.is_concrete() => t.component_name(),
            Node::Tensor(t) if t.constant => return Err(invalid("a constant cannot be defined")),
            _ => return Err(invalid("the left-hand side must be a field or its time derivative")),
        };
        self.check_schemes(&equation.rhs)?;

        if evolution {
            self.schemes.temporal()?;
        }
        let rhs = rewrite_special_forms(&equation.rhs, self.algebra)?;
        let value = self.algebra.simplify(&self.value(&rhs, 0, 0)?)?;

        debug!("discretised {} as {} = {}", equation, field, value);

        Ok(if evolution {
            DiscreteEquation::Evolution { field, residual: value }
        } else {
            DiscreteEquation::Formula { field, value }
        })
    }


    /**
     * Replace fields and derivatives in an expression by their discrete
     * counterparts at the current time level.
     */
    pub fn discretise_expr(&self, expr: &Expr) -> Result<Expr> {
        self.check_schemes(expr)?;
        let expr = rewrite_special_forms(expr, self.algebra)?;
        self.algebra.simplify(&self.value(&expr, 0, 0)?)
    }


    fn check_schemes(&self, expr: &Expr) -> Result<()> {
        let mut derivatives = Vec::new();
        expr.visit(&mut |e| {
            if let Node::Der(d) = e.node() {
                derivatives.push(d.clone())
            }
        });
        for d in &derivatives {
            for axis in &d.wrt {
                match axis {
                    Axis::Space(_) => {
                        let direction = self.direction(d, axis)?;
                        self.schemes.spatial(direction)?;
                    }
                    Axis::Time => {
                        return Err(self.unresolved(d, "time derivatives may only appear on the left-hand side"))
                    }
                }
            }
        }
        Ok(())
    }

    fn unresolved(&self, d: &Derivative, reason: &str) -> Error {
        Error::UnresolvedDerivative {
            derivative: Expr::from_node(Node::Der(d.clone())).to_string(),
            reason: reason.to_string(),
        }
    }

    fn direction(&self, d: &Derivative, axis: &Axis) -> Result<usize> {
        match axis.direction() {
            Some(direction) if direction < self.grid.ndim() => Ok(direction),
            Some(direction) => Err(self.unresolved(
                d,
                &format!("direction {} is outside the {}-dimensional grid", direction, self.grid.ndim()),
            )),
            None => Err(self.unresolved(d, "direction index is not resolved")),
        }
    }

    fn value(&self, expr: &Expr, nesting: usize, order: usize) -> Result<Expr> {
        match expr.node() {
            Node::Tensor(t) if !t.is_concrete() => Err(Error::InvalidIndexUsage {
                term: expr.to_string(),
                reason: "index letters remain after expansion".to_string(),
            }),
            Node::Tensor(t) if t.constant => Ok(Expr::symbol(&t.component_name())),
            Node::Tensor(t) => Ok(Expr::field(FieldAccess::new(
                &t.component_name(),
                self.grid.ndim(),
                TimeLevel::Current,
            ))),
            Node::Der(d) => self.derivative(d, nesting + 1, order),
            _ => expr.try_map_children(|c| self.value(c, nesting, order)),
        }
    }


    /**
     * Discretise a plain derivative. Repeated directions in one operator use
     * the direct higher-order stencil; nested operators are discretised inner
     * first and the outer stencil is applied to the result.
     */
    fn derivative(&self, d: &Derivative, nesting: usize, order: usize) -> Result<Expr> {
        if d.kind != DerivativeKind::Plain {
            return Err(self.unresolved(d, "special form was not rewritten"));
        }
        let order = order + d.wrt.len();

        if nesting > self.limits.max_nesting {
            return Err(self.unresolved(d, &format!("nested deeper than {}", self.limits.max_nesting)));
        }
        if order > self.limits.max_derivative_order {
            return Err(self.unresolved(
                d,
                &format!("total order {} exceeds {}", order, self.limits.max_derivative_order),
            ));
        }
        let mut directions: Vec<(usize, usize)> = Vec::new();

        for axis in &d.wrt {
            let direction = self.direction(d, axis)?;
            match directions.iter_mut().find(|(dir, _)| *dir == direction) {
                Some((_, m)) => *m += 1,
                None => directions.push((direction, 1)),
            }
        }
        let mut result = self.value(&d.arg, nesting, order)?;

        for (direction, m) in directions {
            result = self.stencil(d, &result, direction, m)?;
        }
        Ok(result)
    }

    fn stencil(&self, d: &Derivative, expr: &Expr, direction: usize, m: usize) -> Result<Expr> {
        let scheme = self.schemes.spatial(direction)?;
        let weights = scheme
            .weights(m)
            .ok_or_else(|| self.unresolved(d, "no stencil weights for this order"))?;
        let terms = weights
            .into_iter()
            .map(|(k, w)| Expr::number(w) * self.grid.shift_point(expr, direction, k));

        Ok(Expr::add(terms.collect()) * Expr::pow(self.grid.spacing_symbol(direction), -(m as i32)))
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::algebra::Canonical;
    use crate::expr::Index;
    use crate::parse::{parse_equation, parse_expr, Notation};
    use crate::rational::Rational;
    use crate::scheme::SpatialScheme;

    fn notation() -> Notation {
        Notation::default().with_constants(vec!["c"])
    }

    fn grid(ndim: usize) -> Grid {
        Grid::new(0, "x", vec![10; ndim], vec![0.1; ndim]).unwrap()
    }

    fn f(name: &str, offset: Vec<i64>) -> Expr {
        let ndim = offset.len();
        Expr::field(FieldAccess::new(name, ndim, TimeLevel::Current).at(offset))
    }

    fn dx(d: usize) -> Expr {
        Expr::symbol(&format!("dx{}", d))
    }

    fn discretise_expr(text: &str, ndim: usize, order: usize) -> Result<Expr> {
        let algebra = Canonical;
        let grid = grid(ndim);
        let schemes = SchemeBindings::central(ndim, order);
        let discretiser = Discretiser::new(&schemes, &grid, Limits::default(), &algebra);
        discretiser.discretise_expr(&parse_expr(text, &notation()).unwrap())
    }

    #[test]
    fn first_derivative_is_central_difference() {
        let result = discretise_expr("Der(f, x_0)", 1, 2).unwrap();
        let expected = (f("f", vec![1]) - f("f", vec![-1])) / (Expr::integer(2) * dx(0));
        assert!(Canonical.equivalent(&result, &expected));
    }

    #[test]
    fn second_derivative_is_three_point() {
        let result = discretise_expr("Der(f, x_0, x_0)", 1, 2).unwrap();
        let expected = (f("f", vec![1]) - Expr::integer(2) * f("f", vec![0]) + f("f", vec![-1])) / Expr::pow(dx(0), 2);
        assert!(Canonical.equivalent(&result, &expected));
    }

    #[test]
    fn fourth_order_first_derivative_uses_five_points() {
        let result = discretise_expr("Der(f, x_0)", 1, 4).unwrap();
        let twelfth = Expr::number(Rational::new(1, 12));
        let expected = twelfth
            * (f("f", vec![-2]) - Expr::integer(8) * f("f", vec![-1]) + Expr::integer(8) * f("f", vec![1]) - f("f", vec![2]))
            / dx(0);
        assert!(Canonical.equivalent(&result, &expected));
    }

    #[test]
    fn mixed_derivatives_chain_along_each_direction() {
        let chained = discretise_expr("Der(Der(f, x_0), x_1)", 2, 2).unwrap();
        let direct = discretise_expr("Der(f, x_0, x_1)", 2, 2).unwrap();
        let expected = (f("f", vec![1, 1]) - f("f", vec![1, -1]) - f("f", vec![-1, 1]) + f("f", vec![-1, -1]))
            / (Expr::integer(4) * dx(0) * dx(1));
        assert!(Canonical.equivalent(&chained, &expected));
        assert!(Canonical.equivalent(&direct, &expected));
    }

    #[test]
    fn nested_repeated_derivative_is_a_wide_stencil() {
        let chained = discretise_expr("Der(Der(f, x_0), x_0)", 1, 2).unwrap();
        let expected = (f("f", vec![2]) - Expr::integer(2) * f("f", vec![0]) + f("f", vec![-2]))
            / (Expr::integer(4) * Expr::pow(dx(0), 2));
        assert!(Canonical.equivalent(&chained, &expected));
    }

    #[test]
    fn conservative_form_matches_product_rule() {
        let via_handler = discretise_expr("Conservative(f*g, x_0)", 1, 2).unwrap();
        let by_hand = discretise_expr("f*Der(g, x_0) + g*Der(f, x_0)", 1, 2).unwrap();
        assert!(Canonical.equivalent(&via_handler, &by_hand));
    }

    #[test]
    fn constants_and_coordinates_stay_symbolic() {
        let result = discretise_expr("c*x_0*f + g_1", 1, 2).unwrap();
        let x = Expr::coordinate(Axis::Space(Index::Value(0)));
        let expected = Expr::symbol("c") * x * f("f", vec![0]) + f("g1", vec![0]);
        assert!(Canonical.equivalent(&result, &expected));
    }

    #[test]
    fn coordinates_are_differentiated_by_the_stencil() {
        let result = discretise_expr("Der(x_0*f, x_0)", 1, 2).unwrap();
        let x = Expr::coordinate(Axis::Space(Index::Value(0)));
        let expected = Expr::number(Rational::new(1, 2)) * ((x.clone() + dx(0)) * f("f", vec![1]) - (x - dx(0)) * f("f", vec![-1])) / dx(0);
        assert!(Canonical.equivalent(&result, &expected));
    }

    #[test]
    fn unbound_directions_are_unsupported() {
        let algebra = Canonical;
        let grid = grid(2);
        let schemes = SchemeBindings::new().with_spatial(0, SpatialScheme::Central { order: 2 });
        let discretiser = Discretiser::new(&schemes, &grid, Limits::default(), &algebra);
        let equation = parse_equation("Eq(q, Der(f, x_0) + Der(g, x_1))", &notation()).unwrap();
        assert!(matches!(
            discretiser.discretise(&equation),
            Err(Error::UnsupportedScheme { direction: Some(1), .. })
        ));
    }

    #[test]
    fn evolution_without_temporal_scheme_is_unsupported() {
        let algebra = Canonical;
        let grid = grid(1);
        let schemes = SchemeBindings::central(1, 2);
        let discretiser = Discretiser::new(&schemes, &grid, Limits::default(), &algebra);
        let equation = parse_equation("Eq(Der(u, t), -c*Der(u, x_0))", &notation()).unwrap();
        assert!(matches!(
            discretiser.discretise(&equation),
            Err(Error::UnsupportedScheme { role: "temporal", .. })
        ));
    }

    #[test]
    fn derivatives_beyond_limits_are_unresolved() {
        assert!(matches!(
            discretise_expr("Der(f, x_0, x_0, x_0, x_0, x_0)", 1, 2),
            Err(Error::UnresolvedDerivative { .. })
        ));
        assert!(matches!(
            discretise_expr("Der(Der(Der(Der(Der(f, x_0), x_0), x_0), x_0), x_0)", 1, 2),
            Err(Error::UnresolvedDerivative { .. })
        ));
        assert!(matches!(discretise_expr("Der(f, t)", 1, 2), Err(Error::UnresolvedDerivative { .. })));
        assert!(matches!(discretise_expr("Der(f, x_3)", 1, 2), Err(Error::UnresolvedDerivative { .. })));
    }

    #[test]
    fn left_hand_side_must_define_a_field() {
        let algebra = Canonical;
        let grid = grid(1);
        let schemes = SchemeBindings::central(1, 2);
        let discretiser = Discretiser::new(&schemes, &grid, Limits::default(), &algebra);
        let equation = parse_equation("Eq(Der(u, x_0), v)", &notation()).unwrap();
        assert!(matches!(discretiser.discretise(&equation), Err(Error::InvalidEquation { .. })));
        let equation = parse_equation("Eq(c, v)", &notation()).unwrap();
        assert!(matches!(discretiser.discretise(&equation), Err(Error::InvalidEquation { .. })));
    }

    #[test]
    fn runge_kutta_stages_chain_levels() {
        let equation = DiscreteEquation::Evolution { field: "u".into(), residual: f("u", vec![1]) };
        let rk2 = TemporalScheme::RungeKutta { stages: 2 };
        let first = equation.stage_statements(&rk2, 1, 1, 0);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].0, Phase::Residual);
        assert_eq!(first[0].1.to_string(), "Residual_u_s1[i0] = u[i0+1]");
        assert_eq!(first[1].1.to_string(), "u_s1[i0] = u[i0] + dt*Residual_u_s1[i0]");

        let second = equation.stage_statements(&rk2, 2, 1, 0);
        assert_eq!(second[0].1.to_string(), "Residual_u_s2[i0] = u_s1[i0+1]");
        assert_eq!(second[1].1.target.level, TimeLevel::Next);
        let expected = Expr::number(Rational::new(1, 2)) * f("u", vec![0])
            + Expr::number(Rational::new(1, 2))
                * (Expr::field(FieldAccess::new("u", 1, TimeLevel::Stage(1)))
                    + Expr::symbol("dt") * Expr::field(FieldAccess::new("Residual_u", 1, TimeLevel::Stage(2))));
        assert!(Canonical.equivalent(&second[1].1.value, &expected));
    }

    #[test]
    fn forward_euler_fuses_the_residual() {
        let equation = DiscreteEquation::Evolution { field: "u".into(), residual: f("u", vec![-1]) };
        let euler = TemporalScheme::RungeKutta { stages: 1 };
        let statements = equation.stage_statements(&euler, 1, 1, 0);
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].1.to_string(), "u_new[i0] = u[i0] + dt*u[i0-1]");

        let formula = DiscreteEquation::Formula { field: "p".into(), value: f("rho", vec![0]) };
        let rk3 = TemporalScheme::RungeKutta { stages: 3 };
        let statements = formula.stage_statements(&rk3, 3, 1, 4);
        assert_eq!(statements[0].0, Phase::Formula(4));
        assert_eq!(statements[0].1.to_string(), "p_s2[i0] = rho_s2[i0]");
    }
}
