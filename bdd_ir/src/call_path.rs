//! Passive record of one symbolic execution path: the path constraints that
//! make it feasible plus the ordered library calls it performs.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::ExprRef;

/// One argument of a library call. By-value arguments carry `expr`;
/// pass-by-reference arguments carry the pointee state `before` and `after`
/// the call.
#[derive(Clone, Debug, Default)]
pub struct Arg {
    pub expr: Option<ExprRef>,
    pub before: Option<ExprRef>,
    pub after: Option<ExprRef>,
}

impl Arg {
    /// An output argument is one whose pointee was written by the call.
    pub fn is_output(&self) -> bool {
        self.after.is_some()
    }
}

/// A single library call with symbolic arguments. Argument order is the
/// name order of the map, which is observable through grouping decisions,
/// so the map must be ordered.
#[derive(Clone, Debug, Default)]
pub struct Call {
    pub function_name: String,
    pub args: BTreeMap<String, Arg>,
    pub extra_vars: BTreeMap<String, (Option<ExprRef>, Option<ExprRef>)>,
    pub ret: Option<ExprRef>,
}

/// One feasible execution trace loaded from a call-path file.
#[derive(Clone, Debug)]
pub struct CallPath {
    pub file_name: String,
    pub constraints: Vec<ExprRef>,
    pub calls: Vec<Call>,
}

pub type CallPathRef = Rc<CallPath>;

/// A read-only position within a call path. The merge driver advances
/// cursors instead of draining calls from the (shared, immutable) paths.
#[derive(Clone, Debug)]
pub struct PathCursor {
    pub path: CallPathRef,
    pub next: usize,
}

impl PathCursor {
    pub fn new(path: CallPathRef) -> Self {
        PathCursor { path, next: 0 }
    }

    pub fn current_call(&self) -> Option<&Call> {
        self.path.calls.get(self.next)
    }

    pub fn advance(&mut self) {
        assert!(
            self.next < self.path.calls.len(),
            "advanced past the end of {}",
            self.path.file_name
        );
        self.next += 1;
    }
}
