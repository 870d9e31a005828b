//! # Solver State
//!
//! The single evolving container the scheduler and operators share. It keeps
//! the problem's original constraints immutable (verification always happens
//! against them) while operators work on a rewritable active view.
//!
//! ## Facets
//! - representations: symbolic, numeric and alternate views of the constraints
//! - constraints: the original relation list, never mutated after intake
//! - variables: targets, parameters, known bindings, domain intervals and
//!   qualitative facts
//! - candidates: scored proposed answers plus the best-so-far

use crate::candidate::Candidate;
use crate::expr::Expr;
use crate::relation::Relation;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Which representation operators currently rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReprKind {
    Symbolic,
    Numeric,
    Alternate,
}

impl ReprKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReprKind::Symbolic => "symbolic",
            ReprKind::Numeric => "numeric",
            ReprKind::Alternate => "alternate",
        }
    }

    /// Rotation order used when a representation breaks down
    pub fn next(&self) -> ReprKind {
        match self {
            ReprKind::Symbolic => ReprKind::Numeric,
            ReprKind::Numeric => ReprKind::Alternate,
            ReprKind::Alternate => ReprKind::Symbolic,
        }
    }
}

/// What the run is trying to produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    /// Find values for the named variables
    SolveFor(Vec<String>),
    /// Evaluate a definite integral
    Integrate {
        integrand: Expr,
        var: String,
        lo: f64,
        hi: f64,
    },
    /// Extremize an objective over the constraint set
    Optimize { objective: Expr, minimize: bool },
    /// Any assignment satisfying the constraints
    Satisfy,
}

/// A qualitative fact about one variable, usable for bound inference and
/// candidate cleanup without committing to an interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualFact {
    NonNegative,
    NonPositive,
    Integer,
}

/// A closed interval restriction on one variable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub lo: f64,
    pub hi: f64,
}

impl Domain {
    pub fn unbounded() -> Domain {
        Domain {
            lo: f64::NEG_INFINITY,
            hi: f64::INFINITY,
        }
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.lo && x <= self.hi
    }

    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }

    /// Intersect with another interval; empty results collapse hi below lo
    pub fn intersect(&self, other: &Domain) -> Domain {
        Domain {
            lo: self.lo.max(other.lo),
            hi: self.hi.min(other.hi),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lo > self.hi
    }
}

/// One rewritable view of the constraint set
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct View {
    pub relations: Vec<Relation>,
    /// Working integrand for integral goals; transforms rewrite this copy,
    /// never the goal itself
    pub integrand: Option<Expr>,
}

/// The three rewritable views. Always fully populated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Views {
    pub symbolic: View,
    pub numeric: View,
    pub alternate: View,
}

impl Views {
    fn seeded(view: View) -> Views {
        Views {
            symbolic: view.clone(),
            numeric: view.clone(),
            alternate: view,
        }
    }

    pub fn get(&self, kind: ReprKind) -> &View {
        match kind {
            ReprKind::Symbolic => &self.symbolic,
            ReprKind::Numeric => &self.numeric,
            ReprKind::Alternate => &self.alternate,
        }
    }

    pub fn get_mut(&mut self, kind: ReprKind) -> &mut View {
        match kind {
            ReprKind::Symbolic => &mut self.symbolic,
            ReprKind::Numeric => &mut self.numeric,
            ReprKind::Alternate => &mut self.alternate,
        }
    }

    fn each_mut(&mut self) -> [&mut View; 3] {
        [&mut self.symbolic, &mut self.numeric, &mut self.alternate]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverState {
    /// Problem statement as given
    pub problem_text: String,
    /// Constraints as declared at intake. Verification runs against these;
    /// no operator ever rewrites them.
    original: Vec<Relation>,
    pub goal: Goal,
    pub views: Views,
    pub active: ReprKind,
    /// Variable names the goal asks for
    pub targets: BTreeSet<String>,
    /// Symbols treated as known parameters rather than unknowns
    pub parameters: BTreeSet<String>,
    /// Numeric bindings established so far
    pub env: BTreeMap<String, f64>,
    /// Symbolic bindings (substitutions derived by elimination)
    pub bindings: BTreeMap<String, Expr>,
    /// Interval restrictions per variable
    pub domains: BTreeMap<String, Domain>,
    /// Qualitative facts per variable
    pub facts: BTreeMap<String, BTreeSet<QualFact>>,
    /// Alternate constraint sets produced by case splits
    pub case_splits: Vec<Vec<Relation>>,
    pub active_case: Option<usize>,
    /// Open subgoals produced by goal decomposition
    pub subgoals: Vec<Goal>,
    pub candidates: Vec<Candidate>,
    pub best: Option<Candidate>,
    /// Seed index for numeric restarts
    pub numeric_seed: u64,
}

impl SolverState {
    pub fn new(
        problem_text: impl Into<String>,
        constraints: Vec<Relation>,
        goal: Goal,
    ) -> SolverState {
        let mut targets = BTreeSet::new();
        if let Goal::SolveFor(vars) = &goal {
            targets.extend(vars.iter().cloned());
        }
        let integrand = match &goal {
            Goal::Integrate { integrand, .. } => Some(integrand.clone()),
            _ => None,
        };
        let view = View {
            relations: constraints.clone(),
            integrand,
        };
        SolverState {
            problem_text: problem_text.into(),
            original: constraints,
            goal,
            views: Views::seeded(view),
            active: ReprKind::Symbolic,
            targets,
            parameters: BTreeSet::new(),
            env: BTreeMap::new(),
            bindings: BTreeMap::new(),
            domains: BTreeMap::new(),
            facts: BTreeMap::new(),
            case_splits: Vec::new(),
            active_case: None,
            subgoals: Vec::new(),
            candidates: Vec::new(),
            best: None,
            numeric_seed: 0,
        }
    }

    /// The immutable original constraints
    pub fn original(&self) -> &[Relation] {
        &self.original
    }

    pub fn add_fact(&mut self, var: impl Into<String>, fact: QualFact) {
        self.facts.entry(var.into()).or_default().insert(fact);
    }

    pub fn has_fact(&self, var: &str, fact: QualFact) -> bool {
        self.facts.get(var).map(|f| f.contains(&fact)).unwrap_or(false)
    }

    /// The currently active rewritable view
    pub fn active_view(&self) -> &View {
        self.views.get(self.active)
    }

    pub fn active_view_mut(&mut self) -> &mut View {
        self.views.get_mut(self.active)
    }

    /// Unknowns: free variables of the active view and goal, minus
    /// parameters, bound names, and names resolved by a symbolic binding.
    pub fn unknowns(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        for r in &self.active_view().relations {
            vars.extend(r.free_vars());
        }
        match &self.goal {
            Goal::SolveFor(ts) => vars.extend(ts.iter().cloned()),
            Goal::Integrate { .. } => {}
            Goal::Optimize { objective, .. } => vars.extend(objective.free_vars()),
            Goal::Satisfy => {}
        }
        vars.retain(|v| {
            !self.parameters.contains(v)
                && !self.env.contains_key(v)
                && !self.bindings.contains_key(v)
        });
        vars
    }

    /// Record a numeric binding, propagate it into every view, and resolve
    /// any symbolic bindings that became numeric as a result.
    pub fn bind(&mut self, var: impl Into<String>, value: f64) {
        let var = var.into();
        self.env.insert(var.clone(), value);
        let mut map = BTreeMap::new();
        map.insert(var, Expr::Num(value));
        for view in self.views.each_mut() {
            for r in view.relations.iter_mut() {
                *r = r.substitute(&map).simplify();
            }
        }
        let resolved: Vec<(String, f64)> = self
            .bindings
            .iter()
            .filter_map(|(v, e)| e.eval(&self.env).map(|x| (v.clone(), x)))
            .collect();
        for (v, x) in resolved {
            self.bindings.remove(&v);
            self.bind(v, x);
        }
    }

    /// Record a candidate, updating the best-so-far when it ranks higher.
    /// The previous best is never discarded by a worse arrival.
    pub fn push_candidate(&mut self, cand: Candidate) {
        let better = match &self.best {
            Some(best) => cand.better_than(best),
            None => true,
        };
        if better {
            self.best = Some(cand.clone());
        }
        self.candidates.push(cand);
    }

    /// Switch the active representation, leaving all views intact
    pub fn swap_representation(&mut self) -> ReprKind {
        self.active = self.active.next();
        self.active
    }

    /// Restore the active view from the original constraints
    pub fn reset_active_view(&mut self) {
        let fresh = View {
            relations: self.original.clone(),
            integrand: match &self.goal {
                Goal::Integrate { integrand, .. } => Some(integrand.clone()),
                _ => None,
            },
        };
        *self.views.get_mut(self.active) = fresh;
    }

    /// Install a case split branch: the active view becomes the original
    /// constraints plus the branch relations. Variables the branch pins are
    /// unbound first so the new branch can rebind them.
    pub fn activate_case(&mut self, index: usize) -> bool {
        let branch = match self.case_splits.get(index) {
            Some(b) => b.clone(),
            None => return false,
        };
        let mut branch_vars = BTreeSet::new();
        for r in &branch {
            branch_vars.extend(r.free_vars());
        }
        for v in &branch_vars {
            self.env.remove(v);
        }
        let map: BTreeMap<String, Expr> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), Expr::Num(*v)))
            .collect();
        let mut relations: Vec<Relation> = self.original.clone();
        relations.extend(branch);
        self.active_view_mut().relations = relations
            .iter()
            .map(|r| r.substitute(&map).simplify())
            .collect();
        self.active_case = Some(index);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::parse_relation;

    fn state(constraints: &[&str], goal: Goal) -> SolverState {
        let rels = constraints
            .iter()
            .map(|c| parse_relation(c).unwrap())
            .collect();
        SolverState::new("test", rels, goal)
    }

    #[test]
    fn test_original_constraints_survive_rewrites() {
        let mut s = state(&["2x + 3 = 11"], Goal::SolveFor(vec!["x".into()]));
        s.bind("x", 4.0);
        // Active view was rewritten, original untouched
        assert_eq!(s.original()[0].to_string(), "2*x + 3 = 11");
        assert!(s.active_view().relations[0].to_string() != "2*x + 3 = 11");
    }

    #[test]
    fn test_unknowns_excludes_bound_and_parameters() {
        let mut s = state(&["x + y = 5"], Goal::SolveFor(vec!["x".into()]));
        assert_eq!(
            s.unknowns().into_iter().collect::<Vec<_>>(),
            vec!["x".to_string(), "y".to_string()]
        );
        s.parameters.insert("y".into());
        assert_eq!(
            s.unknowns().into_iter().collect::<Vec<_>>(),
            vec!["x".to_string()]
        );
        s.bind("x", 1.0);
        assert!(s.unknowns().is_empty());
    }

    #[test]
    fn test_best_candidate_is_monotone() {
        let mut s = state(&["x = 1"], Goal::SolveFor(vec!["x".into()]));
        let mut good =
            Candidate::assignment([("x".to_string(), 1.0)].into_iter().collect(), "solve");
        good.verified = true;
        good.residuals = vec![0.0];
        s.push_candidate(good.clone());

        let mut bad =
            Candidate::assignment([("x".to_string(), 9.0)].into_iter().collect(), "sample");
        bad.residuals = vec![8.0];
        s.push_candidate(bad);

        assert_eq!(s.best.as_ref().map(|c| c.values["x"]), Some(1.0));
        assert_eq!(s.candidates.len(), 2);
    }

    #[test]
    fn test_representation_rotation() {
        let mut s = state(&["x = 1"], Goal::Satisfy);
        assert_eq!(s.active, ReprKind::Symbolic);
        assert_eq!(s.swap_representation(), ReprKind::Numeric);
        assert_eq!(s.swap_representation(), ReprKind::Alternate);
        assert_eq!(s.swap_representation(), ReprKind::Symbolic);
    }

    #[test]
    fn test_case_activation() {
        let mut s = state(&["x^2 = 4"], Goal::SolveFor(vec!["x".into()]));
        s.case_splits = vec![
            vec![parse_relation("x = 2").unwrap()],
            vec![parse_relation("x = -2").unwrap()],
        ];
        s.bind("x", -2.0);
        assert!(s.activate_case(0));
        // Branch variable was unbound; view is originals plus the branch pin
        assert!(!s.env.contains_key("x"));
        assert_eq!(s.active_view().relations.len(), 2);
        assert_eq!(s.active_view().relations[1].pins("x"), Some(2.0));
        assert!(!s.activate_case(5));
    }

    #[test]
    fn test_integrand_seeded_for_integral_goals() {
        let integrand = crate::expr::parse_expr("x^2").unwrap();
        let s = SolverState::new(
            "integrate",
            Vec::new(),
            Goal::Integrate {
                integrand: integrand.clone(),
                var: "x".into(),
                lo: 0.0,
                hi: 1.0,
            },
        );
        assert_eq!(s.active_view().integrand.as_ref(), Some(&integrand));
    }

    #[test]
    fn test_domain_intersection() {
        let a = Domain { lo: 0.0, hi: 10.0 };
        let b = Domain { lo: 5.0, hi: 20.0 };
        let c = a.intersect(&b);
        assert_eq!((c.lo, c.hi), (5.0, 10.0));
        assert!(!c.is_empty());
        let d = Domain { lo: 11.0, hi: 12.0 };
        assert!(a.intersect(&d).is_empty());
    }
}
