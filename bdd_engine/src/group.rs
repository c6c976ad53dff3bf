//! Partitioning of call paths on their next call.
//!
//! Given the set of paths that reached the same point of the merge, the
//! group either proves that every path performs the same call next, or
//! splits the set in two and produces the path constraint that separates
//! the halves.

use crate::solver::SolverToolbox;
use crate::symbols::{retrieve_symbols, ReplaceSymbols};
use crate::Config;
use bdd_ir::call_path::{Call, PathCursor};
use bdd_ir::ExprRef;
use log::warn;

pub struct CallPathsGroup<'a> {
    pub on_true: Vec<PathCursor>,
    pub on_false: Vec<PathCursor>,
    pub constraint: Option<ExprRef>,
    toolbox: &'a SolverToolbox,
    config: &'a Config,
}

impl<'a> CallPathsGroup<'a> {
    pub fn new(call_paths: &[PathCursor], toolbox: &'a SolverToolbox, config: &'a Config) -> Self {
        let mut group = CallPathsGroup {
            on_true: Vec::new(),
            on_false: Vec::new(),
            constraint: None,
            toolbox,
            config,
        };
        group.group_call_paths(call_paths);
        group
    }

    fn group_call_paths(&mut self, call_paths: &[PathCursor]) {
        assert!(!call_paths.is_empty());

        for pivot in call_paths {
            self.on_true.clear();
            self.on_false.clear();

            let Some(call) = pivot.current_call() else {
                continue;
            };

            for cp in call_paths {
                match cp.current_call() {
                    Some(next) if self.are_calls_equal(next, call) => {
                        self.on_true.push(cp.clone())
                    }
                    _ => self.on_false.push(cp.clone()),
                }
            }

            // All next calls are equal, nothing to discriminate.
            if self.on_false.is_empty() {
                return;
            }

            self.constraint = self.find_discriminating_constraint();

            if self.constraint.is_some() {
                return;
            }
        }

        // No pivot had a remaining call.
        if self.on_true.is_empty() && self.on_false.is_empty() {
            self.on_true = call_paths.to_vec();
            return;
        }

        panic!(
            "call paths disagree on their next call and no path constraint \
             explains the disagreement (first path: {})",
            call_paths[0].path.file_name
        );
    }

    fn are_calls_equal(&self, c1: &Call, c2: &Call) -> bool {
        if c1.function_name != c2.function_name {
            return false;
        }

        if self.config.is_skip_function(&c1.function_name) {
            return true;
        }

        for (arg_name, c1_arg) in &c1.args {
            if self.config.is_ignored_arg(arg_name) {
                continue;
            }

            // Output arguments are written by the call, not compared.
            if c1_arg.is_output() {
                continue;
            }

            let Some(c2_arg) = c2.args.get(arg_name) else {
                return false;
            };

            // Modifications to the received packet live in the pointee
            // state, not in the argument value.
            if c1.function_name == "packet_return_chunk" && arg_name == "the_chunk" {
                if !self
                    .toolbox
                    .exprs_equivalent(c1_arg.before.as_ref(), c2_arg.before.as_ref())
                {
                    return false;
                }
                continue;
            }

            if !self
                .toolbox
                .exprs_equivalent(c1_arg.expr.as_ref(), c2_arg.expr.as_ref())
            {
                if c1.function_name == "packet_receive" {
                    warn!("packet_receive calls disagree on argument {}", arg_name);
                }
                return false;
            }
        }

        true
    }

    fn find_discriminating_constraint(&mut self) -> Option<ExprRef> {
        for constraint in self.possible_discriminating_constraints() {
            if self.check_discriminating_constraint(&constraint) {
                return Some(constraint);
            }
        }
        None
    }

    /// Constraints of the first grouped path that every grouped path
    /// implies, in constraint-list order.
    fn possible_discriminating_constraints(&self) -> Vec<ExprRef> {
        assert!(!self.on_true.is_empty());
        self.on_true[0]
            .path
            .constraints
            .iter()
            .filter(|constraint| {
                self.on_true
                    .iter()
                    .all(|cp| self.satisfies_constraint(cp, constraint))
            })
            .cloned()
            .collect()
    }

    fn satisfies_constraint(&self, call_path: &PathCursor, constraint: &ExprRef) -> bool {
        let replacer = ReplaceSymbols::new(retrieve_symbols(constraint));
        let not_constraint = self.toolbox.builder.not(constraint.clone());
        self.toolbox
            .always_false_with(&call_path.path.constraints, &not_constraint, &replacer)
    }

    fn satisfies_not_constraint(&self, call_path: &PathCursor, constraint: &ExprRef) -> bool {
        let replacer = ReplaceSymbols::new(retrieve_symbols(constraint));
        let not_constraint = self.toolbox.builder.not(constraint.clone());
        self.toolbox
            .always_true_with(&call_path.path.constraints, &not_constraint, &replacer)
    }

    /// A candidate discriminates when, after pulling over the excluded
    /// paths that also imply it, some excluded paths remain and all of them
    /// imply its negation. The winning partition is committed.
    fn check_discriminating_constraint(&mut self, constraint: &ExprRef) -> bool {
        assert!(!self.on_true.is_empty());
        assert!(!self.on_false.is_empty());

        let mut new_on_true = self.on_true.clone();
        let mut new_on_false = Vec::new();

        for cp in &self.on_false {
            if self.satisfies_constraint(cp, constraint) {
                new_on_true.push(cp.clone());
            } else {
                new_on_false.push(cp.clone());
            }
        }

        if !new_on_false.is_empty()
            && new_on_false
                .iter()
                .all(|cp| self.satisfies_not_constraint(cp, constraint))
        {
            self.on_true = new_on_true;
            self.on_false = new_on_false;
            return true;
        }

        false
    }
}
