//! The merged decision diagram: a tree whose interior nodes are either
//! library calls shared by every path that reaches them, or branches on a
//! discriminating path constraint.

use crate::group::CallPathsGroup;
use crate::solver::SolverToolbox;
use crate::Config;
use bdd_ir::call_path::{Call, CallPathRef, PathCursor};
use bdd_ir::ExprRef;
use itertools::Itertools;

pub struct CallNode {
    pub id: u64,
    pub call: Call,
    pub call_paths: Vec<CallPathRef>,
    pub next: Option<Box<Node>>,
}

pub struct BranchNode {
    pub id: u64,
    pub condition: ExprRef,
    pub call_paths: Vec<CallPathRef>,
    pub on_true: Option<Box<Node>>,
    pub on_false: Option<Box<Node>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Call,
    Branch,
}

pub enum Node {
    Call(CallNode),
    Branch(BranchNode),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Call(_) => NodeKind::Call,
            Node::Branch(_) => NodeKind::Branch,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Node::Call(call) => call.id,
            Node::Branch(branch) => branch.id,
        }
    }

    pub fn as_call(&self) -> Option<&CallNode> {
        match self {
            Node::Call(call) => Some(call),
            Node::Branch(_) => None,
        }
    }

    pub fn as_branch(&self) -> Option<&BranchNode> {
        match self {
            Node::Branch(branch) => Some(branch),
            Node::Call(_) => None,
        }
    }

    pub fn next(&self) -> Option<&Node> {
        match self {
            Node::Call(call) => call.next.as_deref(),
            Node::Branch(_) => None,
        }
    }

    pub fn on_true(&self) -> Option<&Node> {
        self.as_branch().and_then(|b| b.on_true.as_deref())
    }

    pub fn on_false(&self) -> Option<&Node> {
        self.as_branch().and_then(|b| b.on_false.as_deref())
    }

    pub fn call_paths_filenames(&self) -> Vec<String> {
        let paths = match self {
            Node::Call(call) => &call.call_paths,
            Node::Branch(branch) => &branch.call_paths,
        };
        paths.iter().map(|cp| cp.file_name.clone()).collect()
    }

    pub fn dump_compact(&self, lvl: usize, out: &mut String) {
        let sep = " ".repeat(lvl * 2);
        match self {
            Node::Call(call) => {
                out.push_str(&format!("{}{}: {}\n", sep, call.id, format_call(&call.call)));
            }
            Node::Branch(branch) => {
                out.push_str(&format!("{}{}: if {}\n", sep, branch.id, branch.condition));
            }
        }
    }
}

fn format_call(call: &Call) -> String {
    let args = call
        .args
        .iter()
        .map(|(name, arg)| {
            if let Some(after) = &arg.after {
                let before = arg
                    .before
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                format!("{}:[{} -> {}]", name, before, after)
            } else if let Some(expr) = &arg.expr {
                format!("{}:{}", name, expr)
            } else if let Some(before) = &arg.before {
                format!("{}:[{}]", name, before)
            } else {
                name.clone()
            }
        })
        .join(", ");
    match &call.ret {
        Some(ret) => format!("{}({}) -> {}", call.function_name, args, ret),
        None => format!("{}({})", call.function_name, args),
    }
}

pub struct Bdd {
    root: Option<Box<Node>>,
    next_id: u64,
}

impl Bdd {
    /// Merge the given call paths into a single decision diagram.
    pub fn from_call_paths(
        call_paths: Vec<CallPathRef>,
        toolbox: &SolverToolbox,
        config: &Config,
    ) -> Bdd {
        let cursors: Vec<PathCursor> = call_paths.into_iter().map(PathCursor::new).collect();
        let mut bdd = Bdd {
            root: None,
            next_id: 0,
        };
        bdd.root = bdd.populate(cursors, toolbox, config);
        bdd
    }

    pub fn root(&self) -> Option<&Node> {
        self.root.as_deref()
    }

    fn get_and_inc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn populate(
        &mut self,
        mut call_paths: Vec<PathCursor>,
        toolbox: &SolverToolbox,
        config: &Config,
    ) -> Option<Box<Node>> {
        let mut chain: Vec<Node> = Vec::new();

        while !call_paths.is_empty() {
            let group = CallPathsGroup::new(&call_paths, toolbox, config);

            if group.on_false.is_empty() {
                let Some(first_call) = group.on_true[0].current_call() else {
                    // All paths are exhausted.
                    break;
                };

                // Skip-listed calls leave no node behind. Commit functions
                // are kept even when skip-listed: the code generator needs
                // them as procedure boundaries.
                if config.is_skip_function(&first_call.function_name)
                    && !config.is_commit_function(&first_call.function_name)
                {
                    for cp in &mut call_paths {
                        cp.advance();
                    }
                    continue;
                }

                let call = successful_call(&group.on_true, toolbox);
                chain.push(Node::Call(CallNode {
                    id: self.get_and_inc_id(),
                    call,
                    call_paths: paths_of(&group.on_true),
                    next: None,
                }));

                for cp in &mut call_paths {
                    cp.advance();
                }
            } else {
                let condition = group
                    .constraint
                    .clone()
                    .expect("split committed without a discriminating constraint");
                let id = self.get_and_inc_id();
                let provenance = paths_of(&call_paths);
                let on_true = self.populate(group.on_true, toolbox, config);
                let on_false = self.populate(group.on_false, toolbox, config);
                chain.push(Node::Branch(BranchNode {
                    id,
                    condition,
                    call_paths: provenance,
                    on_true,
                    on_false,
                }));
                break;
            }
        }

        link_chain(chain)
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        Self::dump_node(0, self.root.as_deref(), &mut out);
        out
    }

    fn dump_node(lvl: usize, node: Option<&Node>, out: &mut String) {
        let sep = " ".repeat(lvl * 2);

        if let Some(node) = node {
            out.push('\n');
            for filename in node.call_paths_filenames() {
                out.push_str(&format!("{}[{}]\n", sep, filename));
            }
        }

        let mut current = node;
        while let Some(node) = current {
            node.dump_compact(lvl, out);

            if let Node::Branch(branch) = node {
                Self::dump_node(lvl + 1, branch.on_true.as_deref(), out);
                Self::dump_node(lvl + 1, branch.on_false.as_deref(), out);
                return;
            }

            current = node.next();
        }
    }
}

/// The representative call stored in a call node: the first one that
/// provably succeeded, judged by its return value.
fn successful_call(call_paths: &[PathCursor], toolbox: &SolverToolbox) -> Call {
    assert!(!call_paths.is_empty());

    for cp in call_paths {
        let call = cp.current_call().expect("grouped path has no next call");

        let Some(ret) = &call.ret else {
            return call.clone();
        };

        let zero = toolbox.builder.constant(ret.width(), 0);
        let eq_zero = toolbox.builder.eq(ret.clone(), zero);
        if toolbox.always_false(&[], &eq_zero) {
            return call.clone();
        }
    }

    // No call with a provably successful return.
    call_paths[0]
        .current_call()
        .expect("grouped path has no next call")
        .clone()
}

fn paths_of(cursors: &[PathCursor]) -> Vec<CallPathRef> {
    cursors.iter().map(|cp| cp.path.clone()).collect()
}

fn link_chain(chain: Vec<Node>) -> Option<Box<Node>> {
    let mut next: Option<Box<Node>> = None;
    for mut node in chain.into_iter().rev() {
        match &mut node {
            Node::Call(call) => call.next = next.take(),
            Node::Branch(_) => {
                assert!(next.is_none(), "a branch node cannot have a successor");
            }
        }
        next = Some(Box::new(node));
    }
    next
}
