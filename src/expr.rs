use core::fmt;
use core::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;
use serde::Serialize;
use crate::rational::Rational;




/**
 * One slot of an indexed quantity: either an Einstein index letter still to
 * be expanded, or a concrete component number.
 */
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Index {
    Letter(String),
    Value(usize),
}

impl Index {
    pub fn letter(name: &str) -> Self {
        Index::Letter(name.to_string())
    }

    pub fn as_letter(&self) -> Option<&str> {
        match self {
            Index::Letter(l) => Some(l),
            Index::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<usize> {
        match self {
            Index::Letter(_) => None,
            Index::Value(v) => Some(*v),
        }
    }
}




/**
 * Identifier for a coordinate axis a derivative can be taken along.
 */
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Axis {
    Time,
    Space(Index),
}

impl Axis {
    /**
     * Return the concrete spatial direction, if this is a resolved spatial
     * axis.
     */
    pub fn direction(&self) -> Option<usize> {
        match self {
            Axis::Space(Index::Value(d)) => Some(*d),
            _ => None,
        }
    }
}




/**
 * A named quantity with zero or more index slots. Rank 0 is a scalar.
 */
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Tensor {
    pub name: String,
    pub indices: Vec<Index>,
    pub constant: bool,
}

impl Tensor {
    pub fn rank(&self) -> usize {
        self.indices.len()
    }

    /**
     * Determine whether every index slot holds a concrete value.
     */
    pub fn is_concrete(&self) -> bool {
        self.indices.iter().all(|i| i.as_value().is_some())
    }

    /**
     * Return the name of this component once all indices are concrete, e.g.
     * `rhou` with index 1 becomes `rhou1`.
     */
    pub fn component_name(&self) -> String {
        let mut name = self.name.clone();
        for index in &self.indices {
            match index {
                Index::Value(v) => name.push_str(&v.to_string()),
                Index::Letter(l) => {
                    name.push('_');
                    name.push_str(l);
                }
            }
        }
        name
    }
}




/**
 * Logical time level of a discrete field value. Levels are ordered: the
 * current solution, then the intermediate stages of a multi-stage scheme,
 * then the next time step.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TimeLevel {
    Current,
    Stage(u32),
    Next,
}

impl fmt::Display for TimeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeLevel::Current => write!(f, "current"),
            TimeLevel::Stage(k) => write!(f, "stage {}", k),
            TimeLevel::Next => write!(f, "next"),
        }
    }
}




/**
 * A read or write of a grid array at a relative offset from the point being
 * updated.
 */
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FieldAccess {
    pub name: String,
    pub offset: Vec<i64>,
    pub level: TimeLevel,
}

impl FieldAccess {
    pub fn new(name: &str, ndim: usize, level: TimeLevel) -> Self {
        Self { name: name.to_string(), offset: vec![0; ndim], level }
    }

    pub fn at(mut self, offset: Vec<i64>) -> Self {
        self.offset = offset;
        self
    }

    /**
     * Return this access moved by the given number of points along one
     * direction.
     */
    pub fn shifted(&self, direction: usize, by: i64) -> Self {
        let mut result = self.clone();
        if let Some(o) = result.offset.get_mut(direction) {
            *o += by;
        }
        result
    }

    /**
     * Return the name the backend sees for this access: time levels other
     * than the current one get a suffix.
     */
    pub fn array_name(&self) -> String {
        match self.level {
            TimeLevel::Current => self.name.clone(),
            TimeLevel::Stage(k) => format!("{}_s{}", self.name, k),
            TimeLevel::Next => format!("{}_new", self.name),
        }
    }
}

impl fmt::Display for FieldAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.array_name())?;
        for (d, o) in self.offset.iter().enumerate() {
            if d > 0 {
                write!(f, ",")?;
            }
            match o {
                0 => write!(f, "i{}", d)?,
                o if *o > 0 => write!(f, "i{}+{}", d, o)?,
                o => write!(f, "i{}{}", d, o)?,
            }
        }
        write!(f, "]")
    }
}




/**
 * The closed set of derivative forms. Conservative and skew-symmetric forms
 * are rewritten into plain derivatives before discretisation.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DerivativeKind {
    Plain,
    Conservative,
    Skew,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Derivative {
    pub kind: DerivativeKind,
    pub arg: Expr,
    pub wrt: Vec<Axis>,
}




#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Intrinsic {
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Tanh,
    Sqrt,
    Abs,
}

impl Intrinsic {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "exp" => Some(Self::Exp),
            "log" => Some(Self::Log),
            "sin" => Some(Self::Sin),
            "cos" => Some(Self::Cos),
            "tan" => Some(Self::Tan),
            "tanh" => Some(Self::Tanh),
            "sqrt" => Some(Self::Sqrt),
            "abs" => Some(Self::Abs),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Tanh => "tanh",
            Self::Sqrt => "sqrt",
            Self::Abs => "abs",
        }
    }
}




/**
 * Node types of the expression tree. The variant order is also the canonical
 * sort order used when terms are collected.
 */
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Node {
    Number(Rational),
    Symbol(String),
    Coordinate(Axis),
    Tensor(Tensor),
    Field(FieldAccess),
    Delta(Index, Index),
    LeviCivita(Vec<Index>),
    Add(Vec<Expr>),
    Mul(Vec<Expr>),
    Pow(Expr, i32),
    Call(Intrinsic, Expr),
    Der(Derivative),
}




/**
 * An immutable expression. Sub-trees are shared through `Arc`, which is
 * sound because no node is ever mutated after construction.
 */
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Expr(Arc<Node>);




// ============================================================================
impl Expr {

    pub fn from_node(node: Node) -> Self {
        Expr(Arc::new(node))
    }

    pub fn node(&self) -> &Node {
        &self.0
    }

    pub fn number(r: Rational) -> Self {
        Self::from_node(Node::Number(r))
    }

    pub fn integer(n: i64) -> Self {
        Self::number(Rational::integer(n))
    }

    pub fn zero() -> Self {
        Self::integer(0)
    }

    pub fn one() -> Self {
        Self::integer(1)
    }

    pub fn symbol(name: &str) -> Self {
        Self::from_node(Node::Symbol(name.to_string()))
    }

    pub fn coordinate(axis: Axis) -> Self {
        Self::from_node(Node::Coordinate(axis))
    }

    pub fn tensor(name: &str, indices: Vec<Index>) -> Self {
        Self::from_node(Node::Tensor(Tensor { name: name.to_string(), indices, constant: false }))
    }

    pub fn constant_tensor(name: &str, indices: Vec<Index>) -> Self {
        Self::from_node(Node::Tensor(Tensor { name: name.to_string(), indices, constant: true }))
    }

    pub fn field(access: FieldAccess) -> Self {
        Self::from_node(Node::Field(access))
    }

    pub fn delta(i: Index, j: Index) -> Self {
        Self::from_node(Node::Delta(i, j))
    }

    pub fn levi_civita(indices: Vec<Index>) -> Self {
        Self::from_node(Node::LeviCivita(indices))
    }

    /**
     * Build a sum, flattening nested sums. No simplification is performed.
     */
    pub fn add(terms: Vec<Expr>) -> Self {
        let mut flat = Vec::with_capacity(terms.len());
        for t in terms {
            match t.node() {
                Node::Add(inner) => flat.extend(inner.iter().cloned()),
                _ => flat.push(t),
            }
        }
        match flat.len() {
            0 => Self::zero(),
            1 => flat.remove(0),
            _ => Self::from_node(Node::Add(flat)),
        }
    }

    /**
     * Build a product, flattening nested products. No simplification is
     * performed.
     */
    pub fn mul(factors: Vec<Expr>) -> Self {
        let mut flat = Vec::with_capacity(factors.len());
        for f in factors {
            match f.node() {
                Node::Mul(inner) => flat.extend(inner.iter().cloned()),
                _ => flat.push(f),
            }
        }
        match flat.len() {
            0 => Self::one(),
            1 => flat.remove(0),
            _ => Self::from_node(Node::Mul(flat)),
        }
    }

    pub fn pow(base: Expr, exponent: i32) -> Self {
        match exponent {
            1 => base,
            _ => Self::from_node(Node::Pow(base, exponent)),
        }
    }

    pub fn call(function: Intrinsic, arg: Expr) -> Self {
        Self::from_node(Node::Call(function, arg))
    }

    pub fn der(kind: DerivativeKind, arg: Expr, wrt: Vec<Axis>) -> Self {
        Self::from_node(Node::Der(Derivative { kind, arg, wrt }))
    }

    pub fn as_number(&self) -> Option<Rational> {
        match self.node() {
            Node::Number(r) => Some(*r),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_number().map_or(false, |r| r.is_zero())
    }

    pub fn is_one(&self) -> bool {
        self.as_number().map_or(false, |r| r.is_one())
    }


    /**
     * Return the direct children of this node, in order.
     */
    pub fn children(&self) -> Vec<&Expr> {
        match self.node() {
            Node::Add(terms) | Node::Mul(terms) => terms.iter().collect(),
            Node::Pow(base, _) => vec![base],
            Node::Call(_, arg) => vec![arg],
            Node::Der(d) => vec![&d.arg],
            _ => Vec::new(),
        }
    }


    /**
     * Rebuild this node with each child replaced by `f(child)`. Leaves are
     * returned unchanged.
     */
    pub fn map_children<F>(&self, mut f: F) -> Expr
    where
        F: FnMut(&Expr) -> Expr,
    {
        match self.node() {
            Node::Add(terms) => Expr::add(terms.iter().map(&mut f).collect()),
            Node::Mul(terms) => Expr::mul(terms.iter().map(&mut f).collect()),
            Node::Pow(base, n) => Expr::pow(f(base), *n),
            Node::Call(function, arg) => Expr::call(*function, f(arg)),
            Node::Der(d) => Expr::der(d.kind, f(&d.arg), d.wrt.clone()),
            _ => self.clone(),
        }
    }


    /**
     * Fallible counterpart of `map_children`.
     */
    pub fn try_map_children<F, E>(&self, mut f: F) -> Result<Expr, E>
    where
        F: FnMut(&Expr) -> Result<Expr, E>,
    {
        Ok(match self.node() {
            Node::Add(terms) => Expr::add(terms.iter().map(&mut f).collect::<Result<_, _>>()?),
            Node::Mul(terms) => Expr::mul(terms.iter().map(&mut f).collect::<Result<_, _>>()?),
            Node::Pow(base, n) => Expr::pow(f(base)?, *n),
            Node::Call(function, arg) => Expr::call(*function, f(arg)?),
            Node::Der(d) => Expr::der(d.kind, f(&d.arg)?, d.wrt.clone()),
            _ => self.clone(),
        })
    }


    /**
     * Visit every node of the tree in pre-order.
     */
    pub fn visit<F>(&self, f: &mut F)
    where
        F: FnMut(&Expr),
    {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }


    /**
     * Return every field access in the tree, in pre-order.
     */
    pub fn field_accesses(&self) -> Vec<FieldAccess> {
        let mut result = Vec::new();
        self.visit(&mut |e| {
            if let Node::Field(access) = e.node() {
                result.push(access.clone())
            }
        });
        result
    }


    /**
     * Determine whether any node of the tree satisfies the predicate.
     */
    pub fn any<F>(&self, predicate: &F) -> bool
    where
        F: Fn(&Expr) -> bool,
    {
        predicate(self) || self.children().into_iter().any(|c| c.any(predicate))
    }

    pub fn contains_derivative(&self) -> bool {
        self.any(&|e| matches!(e.node(), Node::Der(_)))
    }


    /**
     * Return this expression with every field access moved along a direction.
     * This is how a stencil evaluates an operand at a neighbouring point.
     */
    pub fn shifted(&self, direction: usize, by: i64) -> Expr {
        match self.node() {
            Node::Field(access) => Expr::field(access.shifted(direction, by)),
            _ => self.map_children(|c| c.shifted(direction, by)),
        }
    }


    /**
     * Return this expression with every field access moved to the given time
     * level.
     */
    pub fn at_level(&self, level: TimeLevel) -> Expr {
        match self.node() {
            Node::Field(access) => Expr::field(FieldAccess { level, ..access.clone() }),
            _ => self.map_children(|c| c.at_level(level)),
        }
    }
}




// ============================================================================
impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::add(vec![self, rhs])
    }
}

impl Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::add(vec![self, -rhs])
    }
}

impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::mul(vec![self, rhs])
    }
}

impl Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::mul(vec![self, Expr::pow(rhs, -1)])
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        match self.as_number() {
            Some(r) => Expr::number(-r),
            None => Expr::mul(vec![Expr::integer(-1), self]),
        }
    }
}

impl From<Rational> for Expr {
    fn from(r: Rational) -> Self {
        Expr::number(r)
    }
}

impl From<FieldAccess> for Expr {
    fn from(access: FieldAccess) -> Self {
        Expr::field(access)
    }
}




/**
 * An equality between a defining term and an expression.
 */
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Equation {
    pub lhs: Expr,
    pub rhs: Expr,
}

impl Equation {
    pub fn new(lhs: Expr, rhs: Expr) -> Self {
        Self { lhs, rhs }
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Eq({}, {})", self.lhs, self.rhs)
    }
}




// ============================================================================
const PREC_ADD: u8 = 1;
const PREC_MUL: u8 = 2;
const PREC_POW: u8 = 3;
const PREC_ATOM: u8 = 4;

fn precedence(e: &Expr) -> u8 {
    match e.node() {
        Node::Add(_) => PREC_ADD,
        Node::Mul(_) => PREC_MUL,
        Node::Number(r) if !r.is_integer() || r.is_negative() => PREC_MUL,
        Node::Pow(..) => PREC_POW,
        _ => PREC_ATOM,
    }
}

/// Split a leading negative coefficient off a term, for printing `a - b`.
fn negated_term(e: &Expr) -> Option<Expr> {
    match e.node() {
        Node::Number(r) if r.is_negative() => Some(Expr::number(-*r)),
        Node::Mul(factors) => match factors.first().and_then(|f| f.as_number()) {
            Some(r) if r.is_negative() => {
                let mut rest: Vec<Expr> = factors[1..].to_vec();
                if !(-r).is_one() {
                    rest.insert(0, Expr::number(-r));
                }
                Some(Expr::mul(rest))
            }
            _ => None,
        },
        _ => None,
    }
}

fn write_wrapped(f: &mut fmt::Formatter<'_>, e: &Expr, min: u8) -> fmt::Result {
    if precedence(e) < min {
        write!(f, "({})", e)
    } else {
        write!(f, "{}", e)
    }
}

fn write_index(f: &mut fmt::Formatter<'_>, index: &Index) -> fmt::Result {
    match index {
        Index::Letter(l) => write!(f, "_{}", l),
        Index::Value(v) => write!(f, "{}", v),
    }
}

fn write_axis(f: &mut fmt::Formatter<'_>, axis: &Axis) -> fmt::Result {
    match axis {
        Axis::Time => write!(f, "t"),
        Axis::Space(index) => {
            write!(f, "x")?;
            write_index(f, index)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node() {
            Node::Number(r) => write!(f, "{}", r),
            Node::Symbol(s) => write!(f, "{}", s),
            Node::Coordinate(axis) => write_axis(f, axis),
            Node::Tensor(t) => {
                write!(f, "{}", t.name)?;
                for i in &t.indices {
                    write_index(f, i)?;
                }
                Ok(())
            }
            Node::Field(access) => write!(f, "{}", access),
            Node::Delta(i, j) => {
                write!(f, "KD(")?;
                write_index(f, i)?;
                write!(f, ",")?;
                write_index(f, j)?;
                write!(f, ")")
            }
            Node::LeviCivita(indices) => {
                write!(f, "LC(")?;
                for (n, i) in indices.iter().enumerate() {
                    if n > 0 {
                        write!(f, ",")?;
                    }
                    write_index(f, i)?;
                }
                write!(f, ")")
            }
            Node::Add(terms) => {
                for (n, term) in terms.iter().enumerate() {
                    match (n, negated_term(term)) {
                        (0, Some(positive)) => {
                            write!(f, "-")?;
                            write_wrapped(f, &positive, PREC_MUL)?;
                        }
                        (0, None) => write!(f, "{}", term)?,
                        (_, Some(positive)) => {
                            write!(f, " - ")?;
                            write_wrapped(f, &positive, PREC_MUL)?;
                        }
                        (_, None) => write!(f, " + {}", term)?,
                    }
                }
                Ok(())
            }
            Node::Mul(factors) => {
                let (denominator, numerator): (Vec<&Expr>, Vec<&Expr>) = factors
                    .iter()
                    .partition(|e| matches!(e.node(), Node::Pow(_, n) if *n < 0));
                let mut first = true;
                for (n, factor) in numerator.iter().enumerate() {
                    if n == 0 && factor.as_number().map_or(false, |r| (-r).is_one()) && numerator.len() > 1 {
                        write!(f, "-")?;
                        continue;
                    }
                    if !first {
                        write!(f, "*")?;
                    }
                    write_wrapped(f, factor, PREC_POW)?;
                    first = false;
                }
                if first {
                    write!(f, "1")?;
                }
                if !denominator.is_empty() {
                    let inverted: Vec<Expr> = denominator
                        .iter()
                        .map(|e| match e.node() {
                            Node::Pow(base, n) => Expr::pow(base.clone(), -n),
                            _ => (*e).clone(),
                        })
                        .collect();
                    write!(f, "/")?;
                    write_wrapped(f, &Expr::mul(inverted), PREC_ATOM)?;
                }
                Ok(())
            }
            Node::Pow(base, n) => {
                write_wrapped(f, base, PREC_ATOM)?;
                if *n < 0 {
                    write!(f, "**({})", n)
                } else {
                    write!(f, "**{}", n)
                }
            }
            Node::Call(function, arg) => write!(f, "{}({})", function.name(), arg),
            Node::Der(d) => {
                let name = match d.kind {
                    DerivativeKind::Plain => "Der",
                    DerivativeKind::Conservative => "Conservative",
                    DerivativeKind::Skew => "Skew",
                };
                write!(f, "{}({}", name, d.arg)?;
                for axis in &d.wrt {
                    write!(f, ", ")?;
                    write_axis(f, axis)?;
                }
                write!(f, ")")
            }
        }
    }
}
