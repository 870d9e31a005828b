//! # Symbolic Expression Backend
//!
//! A small expression tree with the operations the solver needs: parsing
//! (with implicit multiplication), simplification, substitution,
//! differentiation, numeric evaluation and polynomial coefficient extraction.
//!
//! ## Design
//! - Expressions are immutable values; every transform returns a new tree
//! - Operations that can fail on messy input return `Option` - `None` is the
//!   "backend unavailable" signal, never a hard error
//! - Parsing errors are real errors (the caller handed us garbage)

use anysolve_error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Cap on polynomial degree during coefficient extraction.
/// Anything beyond this is treated as backend-unavailable.
const MAX_POLY_DEGREE: usize = 16;

/// Known unary functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Exp,
    Ln,
    Sqrt,
    Abs,
}

impl Func {
    pub fn as_str(&self) -> &'static str {
        match self {
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Exp => "exp",
            Func::Ln => "ln",
            Func::Sqrt => "sqrt",
            Func::Abs => "abs",
        }
    }

    fn from_name(name: &str) -> Option<Func> {
        match name {
            "sin" => Some(Func::Sin),
            "cos" => Some(Func::Cos),
            "tan" => Some(Func::Tan),
            "exp" => Some(Func::Exp),
            "ln" | "log" => Some(Func::Ln),
            "sqrt" => Some(Func::Sqrt),
            "abs" => Some(Func::Abs),
            _ => None,
        }
    }

    fn apply(&self, x: f64) -> Option<f64> {
        let y = match self {
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tan => x.tan(),
            Func::Exp => x.exp(),
            Func::Ln => {
                if x <= 0.0 {
                    return None;
                }
                x.ln()
            }
            Func::Sqrt => {
                if x < 0.0 {
                    return None;
                }
                x.sqrt()
            }
            Func::Abs => x.abs(),
        };
        y.is_finite().then_some(y)
    }
}

/// A symbolic expression.
///
/// `Add` and `Mul` are n-ary; negation is normalized to `Mul[-1, e]` and
/// division to `Mul[a, Pow(b, -1)]` so the tree has one canonical shape
/// for each algebraic idea.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Num(f64),
    Var(String),
    Add(Vec<Expr>),
    Mul(Vec<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

impl Expr {
    pub fn num(n: f64) -> Expr {
        Expr::Num(n)
    }

    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }

    pub fn add(terms: Vec<Expr>) -> Expr {
        Expr::Add(terms)
    }

    pub fn mul(factors: Vec<Expr>) -> Expr {
        Expr::Mul(factors)
    }

    pub fn pow(base: Expr, exp: Expr) -> Expr {
        Expr::Pow(Box::new(base), Box::new(exp))
    }

    pub fn neg(e: Expr) -> Expr {
        Expr::Mul(vec![Expr::Num(-1.0), e])
    }

    /// Is this expression the literal zero?
    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Num(n) if *n == 0.0)
    }

    /// Extract the numeric value if this is a literal
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Expr::Num(n) => Some(*n),
            _ => None,
        }
    }

    // =========================================================================
    // Variables
    // =========================================================================

    /// Collect the free variable names in this expression
    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Num(_) => {}
            Expr::Var(v) => {
                out.insert(v.clone());
            }
            Expr::Add(ts) | Expr::Mul(ts) => {
                for t in ts {
                    t.collect_vars(out);
                }
            }
            Expr::Pow(b, e) => {
                b.collect_vars(out);
                e.collect_vars(out);
            }
            Expr::Call(_, a) => a.collect_vars(out),
        }
    }

    /// True when `var` appears anywhere in this expression
    pub fn contains_var(&self, var: &str) -> bool {
        match self {
            Expr::Num(_) => false,
            Expr::Var(v) => v == var,
            Expr::Add(ts) | Expr::Mul(ts) => ts.iter().any(|t| t.contains_var(var)),
            Expr::Pow(b, e) => b.contains_var(var) || e.contains_var(var),
            Expr::Call(_, a) => a.contains_var(var),
        }
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Evaluate numerically with the given variable bindings.
    ///
    /// Returns `None` on unbound variables, domain errors (ln of a
    /// non-positive number) or non-finite results.
    pub fn eval(&self, env: &BTreeMap<String, f64>) -> Option<f64> {
        let v = match self {
            Expr::Num(n) => *n,
            Expr::Var(name) => *env.get(name)?,
            Expr::Add(ts) => {
                let mut acc = 0.0;
                for t in ts {
                    acc += t.eval(env)?;
                }
                acc
            }
            Expr::Mul(fs) => {
                let mut acc = 1.0;
                for f in fs {
                    acc *= f.eval(env)?;
                }
                acc
            }
            Expr::Pow(b, e) => {
                let b = b.eval(env)?;
                let e = e.eval(env)?;
                b.powf(e)
            }
            Expr::Call(f, a) => f.apply(a.eval(env)?)?,
        };
        v.is_finite().then_some(v)
    }

    /// Substitute variables with replacement expressions
    pub fn substitute(&self, map: &BTreeMap<String, Expr>) -> Expr {
        match self {
            Expr::Num(_) => self.clone(),
            Expr::Var(v) => map.get(v).cloned().unwrap_or_else(|| self.clone()),
            Expr::Add(ts) => Expr::Add(ts.iter().map(|t| t.substitute(map)).collect()),
            Expr::Mul(fs) => Expr::Mul(fs.iter().map(|f| f.substitute(map)).collect()),
            Expr::Pow(b, e) => Expr::pow(b.substitute(map), e.substitute(map)),
            Expr::Call(f, a) => Expr::Call(*f, Box::new(a.substitute(map))),
        }
    }

    // =========================================================================
    // Simplification
    // =========================================================================

    /// Bounded canonicalization: flatten, fold constants, combine like terms.
    ///
    /// This is not a full CAS simplifier; it is the deterministic subset the
    /// solver relies on for progress measurement and candidate cleanup.
    pub fn simplify(&self) -> Expr {
        match self {
            Expr::Num(_) | Expr::Var(_) => self.clone(),
            Expr::Add(ts) => Self::simplify_add(ts),
            Expr::Mul(fs) => Self::simplify_mul(fs),
            Expr::Pow(b, e) => {
                let b = b.simplify();
                let e = e.simplify();
                if let (Some(bn), Some(en)) = (b.as_num(), e.as_num()) {
                    let v = bn.powf(en);
                    if v.is_finite() {
                        return Expr::Num(v);
                    }
                }
                if let Some(en) = e.as_num() {
                    if en == 0.0 {
                        return Expr::Num(1.0);
                    }
                    if en == 1.0 {
                        return b;
                    }
                }
                if let Some(bn) = b.as_num() {
                    if bn == 1.0 {
                        return Expr::Num(1.0);
                    }
                }
                Expr::pow(b, e)
            }
            Expr::Call(f, a) => {
                let a = a.simplify();
                if let Some(an) = a.as_num() {
                    if let Some(v) = f.apply(an) {
                        return Expr::Num(v);
                    }
                }
                Expr::Call(*f, Box::new(a))
            }
        }
    }

    fn simplify_add(terms: &[Expr]) -> Expr {
        // Flatten and partition into a constant part and keyed like terms.
        let mut constant = 0.0;
        let mut combined: BTreeMap<String, (f64, Expr)> = BTreeMap::new();
        let mut stack: Vec<Expr> = terms.iter().map(|t| t.simplify()).collect();
        stack.reverse();
        while let Some(t) = stack.pop() {
            match t {
                Expr::Add(inner) => {
                    for e in inner.into_iter().rev() {
                        stack.push(e);
                    }
                }
                Expr::Num(n) => constant += n,
                other => {
                    let (coeff, body) = split_coeff(&other);
                    let key = body.to_string();
                    let entry = combined.entry(key).or_insert((0.0, body));
                    entry.0 += coeff;
                }
            }
        }

        let mut out: Vec<Expr> = Vec::new();
        for (_, (coeff, body)) in combined {
            if coeff == 0.0 {
                continue;
            }
            if coeff == 1.0 {
                out.push(body);
            } else {
                out.push(Expr::Mul(vec![Expr::Num(coeff), body]).simplify_mul_shallow());
            }
        }
        if constant != 0.0 || out.is_empty() {
            out.push(Expr::Num(constant));
        }
        match out.len() {
            1 => out.remove(0),
            _ => Expr::Add(out),
        }
    }

    fn simplify_mul(factors: &[Expr]) -> Expr {
        let mut constant = 1.0;
        // base key -> (exponent sum, base expr)
        let mut powers: BTreeMap<String, (f64, Expr)> = BTreeMap::new();
        let mut opaque: Vec<Expr> = Vec::new();
        let mut stack: Vec<Expr> = factors.iter().map(|f| f.simplify()).collect();
        stack.reverse();
        while let Some(f) = stack.pop() {
            match f {
                Expr::Mul(inner) => {
                    for e in inner.into_iter().rev() {
                        stack.push(e);
                    }
                }
                Expr::Num(n) => constant *= n,
                Expr::Pow(b, e) => {
                    if let Some(en) = e.as_num() {
                        let key = b.to_string();
                        let entry = powers.entry(key).or_insert((0.0, (*b).clone()));
                        entry.0 += en;
                    } else {
                        opaque.push(Expr::Pow(b, e));
                    }
                }
                other => {
                    let key = other.to_string();
                    let entry = powers.entry(key).or_insert((0.0, other));
                    entry.0 += 1.0;
                }
            }
        }

        if constant == 0.0 {
            return Expr::Num(0.0);
        }

        let mut out: Vec<Expr> = Vec::new();
        if constant != 1.0 {
            out.push(Expr::Num(constant));
        }
        for (_, (exp, base)) in powers {
            if exp == 0.0 {
                continue;
            }
            if exp == 1.0 {
                out.push(base);
            } else {
                out.push(Expr::pow(base, Expr::Num(exp)));
            }
        }
        out.extend(opaque);
        match out.len() {
            0 => Expr::Num(1.0),
            1 => out.remove(0),
            _ => Expr::Mul(out),
        }
    }

    /// One-level Mul cleanup without re-simplifying children
    fn simplify_mul_shallow(self) -> Expr {
        if let Expr::Mul(fs) = &self {
            if fs.len() == 1 {
                return fs[0].clone();
            }
        }
        self
    }

    // =========================================================================
    // Differentiation
    // =========================================================================

    /// Symbolic derivative with respect to `var`.
    ///
    /// Returns `None` for shapes the backend does not handle (general
    /// `f(x)^g(x)` powers); callers treat that as unavailable.
    pub fn differentiate(&self, var: &str) -> Option<Expr> {
        let d = match self {
            Expr::Num(_) => Expr::Num(0.0),
            Expr::Var(v) => {
                if v == var {
                    Expr::Num(1.0)
                } else {
                    Expr::Num(0.0)
                }
            }
            Expr::Add(ts) => {
                let mut parts = Vec::with_capacity(ts.len());
                for t in ts {
                    parts.push(t.differentiate(var)?);
                }
                Expr::Add(parts)
            }
            Expr::Mul(fs) => {
                // Product rule over n factors
                let mut terms = Vec::with_capacity(fs.len());
                for (i, fi) in fs.iter().enumerate() {
                    let di = fi.differentiate(var)?;
                    let mut factors = vec![di];
                    for (j, fj) in fs.iter().enumerate() {
                        if i != j {
                            factors.push(fj.clone());
                        }
                    }
                    terms.push(Expr::Mul(factors));
                }
                Expr::Add(terms)
            }
            Expr::Pow(b, e) => {
                match (b.contains_var(var), e.contains_var(var)) {
                    (false, false) => Expr::Num(0.0),
                    // d/dx b^n = n * b^(n-1) * b'
                    (true, false) => {
                        let db = b.differentiate(var)?;
                        Expr::Mul(vec![
                            (**e).clone(),
                            Expr::pow((**b).clone(), Expr::Add(vec![(**e).clone(), Expr::Num(-1.0)])),
                            db,
                        ])
                    }
                    // d/dx a^g = a^g * ln(a) * g'
                    (false, true) => {
                        let de = e.differentiate(var)?;
                        Expr::Mul(vec![
                            Expr::pow((**b).clone(), (**e).clone()),
                            Expr::Call(Func::Ln, b.clone()),
                            de,
                        ])
                    }
                    (true, true) => return None,
                }
            }
            Expr::Call(f, a) => {
                let da = a.differentiate(var)?;
                let outer = match f {
                    Func::Sin => Expr::Call(Func::Cos, a.clone()),
                    Func::Cos => Expr::neg(Expr::Call(Func::Sin, a.clone())),
                    Func::Tan => Expr::pow(Expr::Call(Func::Cos, a.clone()), Expr::Num(-2.0)),
                    Func::Exp => Expr::Call(Func::Exp, a.clone()),
                    Func::Ln => Expr::pow((**a).clone(), Expr::Num(-1.0)),
                    Func::Sqrt => Expr::Mul(vec![
                        Expr::Num(0.5),
                        Expr::pow((**a).clone(), Expr::Num(-0.5)),
                    ]),
                    // |x| is not differentiable at 0; unavailable
                    Func::Abs => return None,
                };
                Expr::Mul(vec![outer, da])
            }
        };
        Some(d.simplify())
    }

    // =========================================================================
    // Polynomial view
    // =========================================================================

    /// Extract polynomial coefficients in `var` (ascending order), resolving
    /// other variables through `env`. Returns `None` when the expression is
    /// not polynomial in `var` or references unbound symbols.
    pub fn poly_coeffs(&self, var: &str, env: &BTreeMap<String, f64>) -> Option<Vec<f64>> {
        let coeffs = self.poly_rec(var, env)?;
        Some(trim_poly(coeffs))
    }

    fn poly_rec(&self, var: &str, env: &BTreeMap<String, f64>) -> Option<Vec<f64>> {
        match self {
            Expr::Num(n) => Some(vec![*n]),
            Expr::Var(v) => {
                if v == var {
                    Some(vec![0.0, 1.0])
                } else {
                    Some(vec![*env.get(v)?])
                }
            }
            Expr::Add(ts) => {
                let mut acc = vec![0.0];
                for t in ts {
                    let p = t.poly_rec(var, env)?;
                    if p.len() > acc.len() {
                        acc.resize(p.len(), 0.0);
                    }
                    for (i, c) in p.iter().enumerate() {
                        acc[i] += c;
                    }
                }
                Some(acc)
            }
            Expr::Mul(fs) => {
                let mut acc = vec![1.0];
                for f in fs {
                    let p = f.poly_rec(var, env)?;
                    acc = poly_mul(&acc, &p)?;
                }
                Some(acc)
            }
            Expr::Pow(b, e) => {
                let exp = e.poly_rec(var, env)?;
                // Exponent must be a non-negative integer constant
                if exp.len() != 1 {
                    return None;
                }
                let n = exp[0];
                if n < 0.0 || n.fract() != 0.0 || n > MAX_POLY_DEGREE as f64 {
                    // Constant bases still fold: b^n with both constant
                    let base = b.poly_rec(var, env)?;
                    if base.len() == 1 {
                        let v = base[0].powf(n);
                        return v.is_finite().then(|| vec![v]);
                    }
                    return None;
                }
                let base = b.poly_rec(var, env)?;
                let mut acc = vec![1.0];
                for _ in 0..(n as usize) {
                    acc = poly_mul(&acc, &base)?;
                }
                Some(acc)
            }
            Expr::Call(f, a) => {
                let inner = a.poly_rec(var, env)?;
                if inner.len() == 1 {
                    f.apply(inner[0]).map(|v| vec![v])
                } else {
                    None
                }
            }
        }
    }

    // =========================================================================
    // Linear collection
    // =========================================================================

    /// Write this expression as `a*var + b` with `a`, `b` free of `var`.
    ///
    /// Returns `None` when `var` enters non-linearly (powers, functions,
    /// products of var-dependent factors).
    pub fn collect_linear(&self, var: &str) -> Option<(Expr, Expr)> {
        if !self.contains_var(var) {
            return Some((Expr::Num(0.0), self.clone()));
        }
        match self {
            Expr::Var(v) if v == var => Some((Expr::Num(1.0), Expr::Num(0.0))),
            Expr::Add(ts) => {
                let mut a_parts = Vec::new();
                let mut b_parts = Vec::new();
                for t in ts {
                    let (a, b) = t.collect_linear(var)?;
                    a_parts.push(a);
                    b_parts.push(b);
                }
                Some((Expr::Add(a_parts).simplify(), Expr::Add(b_parts).simplify()))
            }
            Expr::Mul(fs) => {
                let mut dependent: Option<&Expr> = None;
                let mut rest = Vec::new();
                for f in fs {
                    if f.contains_var(var) {
                        if dependent.is_some() {
                            return None; // var * var shaped product
                        }
                        dependent = Some(f);
                    } else {
                        rest.push(f.clone());
                    }
                }
                let dep = dependent?;
                let (a, b) = dep.collect_linear(var)?;
                let rest_prod = if rest.is_empty() {
                    Expr::Num(1.0)
                } else {
                    Expr::Mul(rest)
                };
                let a_out = Expr::Mul(vec![a, rest_prod.clone()]).simplify();
                let b_out = Expr::Mul(vec![b, rest_prod]).simplify();
                Some((a_out, b_out))
            }
            _ => None,
        }
    }
}

fn poly_mul(a: &[f64], b: &[f64]) -> Option<Vec<f64>> {
    if a.len() + b.len() > MAX_POLY_DEGREE + 2 {
        return None;
    }
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    Some(out)
}

fn trim_poly(mut coeffs: Vec<f64>) -> Vec<f64> {
    while coeffs.len() > 1 && coeffs.last() == Some(&0.0) {
        coeffs.pop();
    }
    coeffs
}

/// Split a term into (numeric coefficient, remaining body)
fn split_coeff(e: &Expr) -> (f64, Expr) {
    match e {
        Expr::Num(n) => (*n, Expr::Num(1.0)),
        Expr::Mul(fs) => {
            let mut coeff = 1.0;
            let mut rest = Vec::new();
            for f in fs {
                if let Expr::Num(n) = f {
                    coeff *= n;
                } else {
                    rest.push(f.clone());
                }
            }
            let body = match rest.len() {
                0 => Expr::Num(1.0),
                1 => rest.remove(0),
                _ => Expr::Mul(rest),
            };
            (coeff, body)
        }
        other => (1.0, other.clone()),
    }
}

// =============================================================================
// Display
// =============================================================================

fn fmt_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl Expr {
    fn precedence(&self) -> u8 {
        match self {
            Expr::Add(_) => 1,
            Expr::Mul(_) => 2,
            Expr::Pow(..) => 3,
            Expr::Num(n) if *n < 0.0 => 1,
            _ => 4,
        }
    }

    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, parent: u8) -> fmt::Result {
        let me = self.precedence();
        if me < parent {
            write!(f, "(")?;
        }
        match self {
            Expr::Num(n) => write!(f, "{}", fmt_num(*n))?,
            Expr::Var(v) => write!(f, "{}", v)?,
            Expr::Add(ts) => {
                for (i, t) in ts.iter().enumerate() {
                    if i == 0 {
                        t.fmt_prec(f, 1)?;
                        continue;
                    }
                    let (coeff, body) = split_coeff(t);
                    if coeff < 0.0 {
                        write!(f, " - ")?;
                        let flipped = if coeff == -1.0 && !matches!(body, Expr::Num(_)) {
                            body
                        } else {
                            Expr::Mul(vec![Expr::Num(-coeff), body]).simplify()
                        };
                        flipped.fmt_prec(f, 2)?;
                    } else {
                        write!(f, " + ")?;
                        t.fmt_prec(f, 2)?;
                    }
                }
            }
            Expr::Mul(fs) => {
                // Leading -1 renders as a sign
                let mut rest: &[Expr] = fs;
                if let Some(Expr::Num(n)) = fs.first() {
                    if *n == -1.0 && fs.len() > 1 {
                        write!(f, "-")?;
                        rest = &fs[1..];
                    }
                }
                for (i, t) in rest.iter().enumerate() {
                    if i > 0 {
                        write!(f, "*")?;
                    }
                    t.fmt_prec(f, 3)?;
                }
            }
            Expr::Pow(b, e) => {
                b.fmt_prec(f, 4)?;
                write!(f, "**")?;
                e.fmt_prec(f, 4)?;
            }
            Expr::Call(fun, a) => {
                write!(f, "{}(", fun.as_str())?;
                a.fmt_prec(f, 1)?;
                write!(f, ")")?;
            }
        }
        if me < parent {
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_prec(f, 0)
    }
}

// =============================================================================
// Parsing
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

/// Normalize input quirks before tokenizing: LaTeX dollars, unicode minus,
/// unicode multiplication sign.
pub fn clean_input(s: &str) -> String {
    s.trim()
        .replace('$', "")
        .replace('\u{2212}', "-")
        .replace('\u{00d7}', "*")
}

fn tokenize(input: &str) -> Result<Vec<Tok>> {
    let mut toks = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                toks.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                toks.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    toks.push(Tok::Caret);
                    i += 2;
                } else {
                    toks.push(Tok::Star);
                    i += 1;
                }
            }
            '/' => {
                toks.push(Tok::Slash);
                i += 1;
            }
            '^' => {
                toks.push(Tok::Caret);
                i += 1;
            }
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text.parse().map_err(|_| {
                    Error::parse_failed(input, format!("invalid number '{}'", text))
                        .with_operation("expr::tokenize")
                })?;
                toks.push(Tok::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                toks.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::parse_failed(
                    input,
                    format!("unexpected character '{}'", other),
                )
                .with_operation("expr::tokenize"));
            }
        }
    }
    Ok(toks)
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
    input: String,
}

const PREC_ADD: u8 = 1;
const PREC_MUL: u8 = 2;
const PREC_POW: u8 = 3;

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn err(&self, msg: impl Into<String>) -> Error {
        Error::parse_failed(self.input.clone(), msg).with_operation("expr::parse")
    }

    fn parse(&mut self, min_prec: u8) -> Result<Expr> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let (prec, implicit) = match self.peek() {
                Some(Tok::Plus) | Some(Tok::Minus) => (PREC_ADD, false),
                Some(Tok::Star) | Some(Tok::Slash) => (PREC_MUL, false),
                Some(Tok::Caret) => (PREC_POW, false),
                // Implicit multiplication: `2x`, `3(x+1)`, `x y`
                Some(Tok::Num(_)) | Some(Tok::Ident(_)) | Some(Tok::LParen) => (PREC_MUL, true),
                _ => break,
            };
            if prec < min_prec {
                break;
            }

            if implicit {
                let rhs = self.parse(PREC_MUL + 1)?;
                lhs = Expr::Mul(vec![lhs, rhs]);
                continue;
            }

            let op = match self.bump() {
                Some(t) => t,
                None => break,
            };
            match op {
                Tok::Plus => {
                    let rhs = self.parse(PREC_ADD + 1)?;
                    lhs = Expr::Add(vec![lhs, rhs]);
                }
                Tok::Minus => {
                    let rhs = self.parse(PREC_ADD + 1)?;
                    lhs = Expr::Add(vec![lhs, Expr::neg(rhs)]);
                }
                Tok::Star => {
                    let rhs = self.parse(PREC_MUL + 1)?;
                    lhs = Expr::Mul(vec![lhs, rhs]);
                }
                Tok::Slash => {
                    let rhs = self.parse(PREC_MUL + 1)?;
                    lhs = Expr::Mul(vec![lhs, Expr::pow(rhs, Expr::Num(-1.0))]);
                }
                Tok::Caret => {
                    // Right-associative
                    let rhs = self.parse(PREC_POW)?;
                    lhs = Expr::pow(lhs, rhs);
                }
                _ => unreachable!("not an infix operator"),
            }
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Tok::Num(n)) => Ok(Expr::Num(n)),
            Some(Tok::Ident(name)) => {
                if self.peek() == Some(&Tok::LParen) {
                    if let Some(func) = Func::from_name(&name) {
                        self.bump(); // consume '('
                        let arg = self.parse(PREC_ADD)?;
                        match self.bump() {
                            Some(Tok::RParen) => return Ok(Expr::Call(func, Box::new(arg))),
                            _ => return Err(self.err("expected ')' after function argument")),
                        }
                    }
                }
                Ok(Expr::Var(name))
            }
            Some(Tok::LParen) => {
                let inner = self.parse(PREC_ADD)?;
                match self.bump() {
                    Some(Tok::RParen) => Ok(inner),
                    _ => Err(self.err("unbalanced parentheses")),
                }
            }
            Some(Tok::Minus) => {
                let operand = self.parse(PREC_MUL)?;
                Ok(Expr::neg(operand))
            }
            Some(other) => Err(self.err(format!("unexpected token {:?}", other))),
            None => Err(self.err("empty expression")),
        }
    }
}

/// Parse an expression string with implicit multiplication support
pub fn parse_expr(input: &str) -> Result<Expr> {
    let cleaned = clean_input(input);
    let toks = tokenize(&cleaned)?;
    if toks.is_empty() {
        return Err(Error::parse_failed(input, "empty expression").with_operation("expr::parse"));
    }
    let mut parser = Parser {
        toks,
        pos: 0,
        input: cleaned,
    };
    let expr = parser.parse(PREC_ADD)?;
    if parser.pos != parser.toks.len() {
        return Err(parser.err("trailing tokens after expression"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_parse_implicit_multiplication() {
        let e = parse_expr("2x + 3").unwrap();
        assert_eq!(e.eval(&env(&[("x", 4.0)])), Some(11.0));

        let e = parse_expr("3(x + 1)").unwrap();
        assert_eq!(e.eval(&env(&[("x", 1.0)])), Some(6.0));
    }

    #[test]
    fn test_parse_powers_both_spellings() {
        let a = parse_expr("x^2").unwrap();
        let b = parse_expr("x**2").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.eval(&env(&[("x", 3.0)])), Some(9.0));
    }

    #[test]
    fn test_parse_unary_minus() {
        let e = parse_expr("-x^2").unwrap();
        assert_eq!(e.eval(&env(&[("x", 2.0)])), Some(-4.0));
    }

    #[test]
    fn test_parse_unicode_cleanup() {
        let e = parse_expr("$x \u{2212} 1$").unwrap();
        assert_eq!(e.eval(&env(&[("x", 3.0)])), Some(2.0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_expr("2x + (3").is_err());
        assert!(parse_expr("").is_err());
        assert!(parse_expr("x ? y").is_err());
    }

    #[test]
    fn test_eval_unavailable_on_unbound() {
        let e = parse_expr("x + y").unwrap();
        assert_eq!(e.eval(&env(&[("x", 1.0)])), None);
    }

    #[test]
    fn test_eval_domain_errors_are_unavailable() {
        let e = parse_expr("ln(x)").unwrap();
        assert_eq!(e.eval(&env(&[("x", -1.0)])), None);
        let e = parse_expr("sqrt(x)").unwrap();
        assert_eq!(e.eval(&env(&[("x", -4.0)])), None);
    }

    #[test]
    fn test_simplify_combines_like_terms() {
        let e = parse_expr("x + x + 1 + 2").unwrap().simplify();
        assert_eq!(e.to_string(), "2*x + 3");
    }

    #[test]
    fn test_simplify_folds_constants() {
        let e = parse_expr("2 * 3 + 4").unwrap().simplify();
        assert_eq!(e, Expr::Num(10.0));
    }

    #[test]
    fn test_simplify_powers() {
        let e = parse_expr("x * x").unwrap().simplify();
        assert_eq!(e.to_string(), "x**2");

        let e = parse_expr("x^1").unwrap().simplify();
        assert_eq!(e, Expr::var("x"));
    }

    #[test]
    fn test_differentiate_polynomial() {
        let e = parse_expr("x^2 + 3x").unwrap();
        let d = e.differentiate("x").unwrap().simplify();
        // d/dx (x^2 + 3x) = 2x + 3
        assert_eq!(d.eval(&env(&[("x", 5.0)])), Some(13.0));
    }

    #[test]
    fn test_differentiate_chain_rule() {
        let e = parse_expr("sin(2x)").unwrap();
        let d = e.differentiate("x").unwrap();
        let expected = 2.0 * (2.0_f64).cos();
        let got = d.eval(&env(&[("x", 1.0)])).unwrap();
        assert!((got - expected).abs() < 1e-12);
    }

    #[test]
    fn test_differentiate_unavailable_for_general_power() {
        let e = parse_expr("x^x").unwrap();
        assert!(e.differentiate("x").is_none());
    }

    #[test]
    fn test_poly_coeffs_linear() {
        let e = parse_expr("2x + 3 - 11").unwrap();
        let c = e.poly_coeffs("x", &BTreeMap::new()).unwrap();
        assert_eq!(c, vec![-8.0, 2.0]);
    }

    #[test]
    fn test_poly_coeffs_quadratic() {
        let e = parse_expr("(x + 1)^2").unwrap();
        let c = e.poly_coeffs("x", &BTreeMap::new()).unwrap();
        assert_eq!(c, vec![1.0, 2.0, 1.0]);
    }

    #[test]
    fn test_poly_coeffs_not_polynomial() {
        let e = parse_expr("sin(x)").unwrap();
        assert!(e.poly_coeffs("x", &BTreeMap::new()).is_none());
    }

    #[test]
    fn test_poly_coeffs_resolves_env() {
        let e = parse_expr("a x + 1").unwrap();
        let c = e.poly_coeffs("x", &env(&[("a", 4.0)])).unwrap();
        assert_eq!(c, vec![1.0, 4.0]);
    }

    #[test]
    fn test_collect_linear() {
        let e = parse_expr("2x + 3").unwrap();
        let (a, b) = e.collect_linear("x").unwrap();
        assert_eq!(a.as_num(), Some(2.0));
        assert_eq!(b.as_num(), Some(3.0));
    }

    #[test]
    fn test_collect_linear_symbolic_coeff() {
        let e = parse_expr("a*x + b").unwrap();
        let (a, b) = e.collect_linear("x").unwrap();
        assert_eq!(a, Expr::var("a"));
        assert_eq!(b, Expr::var("b"));
    }

    #[test]
    fn test_collect_linear_rejects_quadratic() {
        let e = parse_expr("x^2 + 1").unwrap();
        assert!(e.collect_linear("x").is_none());
    }

    #[test]
    fn test_substitute() {
        let e = parse_expr("x + y").unwrap();
        let mut map = BTreeMap::new();
        map.insert("y".to_string(), parse_expr("2x").unwrap());
        let s = e.substitute(&map).simplify();
        assert_eq!(s.to_string(), "3*x");
    }

    #[test]
    fn test_display_roundtrip() {
        for src in ["2*x + 3", "x**2 - 1", "sin(x)*cos(x)", "(x + 1)*(x - 1)"] {
            let e = parse_expr(src).unwrap();
            let reparsed = parse_expr(&e.to_string()).unwrap();
            // Display output must parse back to the same tree
            assert_eq!(e, reparsed, "roundtrip failed for {}", src);
        }
    }
}
