//! Generation of the `nf_init` procedure from the merged diagram, plus the
//! variable scoping the transpiler resolves symbol names against.
//!
//! Only the state-allocation calls of the init phase are recognized;
//! everything past the commit boundary belongs to `nf_process`, whose
//! generation is not implemented.

use crate::bdd::{Bdd, Node};
use crate::transpile::transpile;
use crate::Config;
use anyhow::{bail, Result};
use bdd_ir::c_ast::{
    CExpr, CExprKind, CFunction, CInclude, CPrimitive, CStmt, CType, CUnit,
};
use bdd_ir::call_path::Call;
use log::error;
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct CVar {
    pub symbol: String,
    pub ty: CType,
}

/// One borrowed packet chunk: reads of the symbolic packet at indices
/// inside the window resolve to this variable, rebased to the window start.
#[derive(Clone, Debug)]
pub struct ChunkWindow {
    pub var: CVar,
    pub start_index: u64,
    pub length: u64,
}

/// Program state and local variables visible to the transpiler, resolved by
/// symbol name: state first, then the local frames from innermost out.
#[derive(Debug, Default)]
pub struct VariableScopes {
    state: Vec<CVar>,
    locals: Vec<Vec<CVar>>,
    chunks: Vec<ChunkWindow>,
}

impl VariableScopes {
    pub fn new() -> Self {
        VariableScopes {
            state: Vec::new(),
            locals: vec![Vec::new()],
            chunks: Vec::new(),
        }
    }

    pub fn get_from_state(&self, symbol: &str) -> Option<&CVar> {
        self.state.iter().find(|v| v.symbol == symbol)
    }

    pub fn get_from_local(&self, symbol: &str) -> Option<&CVar> {
        self.locals
            .iter()
            .rev()
            .find_map(|frame| frame.iter().find(|v| v.symbol == symbol))
    }

    pub fn push_to_state(&mut self, var: CVar) {
        assert!(
            self.get_from_state(&var.symbol).is_none(),
            "state variable {} redeclared",
            var.symbol
        );
        self.state.push(var);
    }

    pub fn push_to_local(&mut self, var: CVar) {
        assert!(
            self.get_from_local(&var.symbol).is_none(),
            "local variable {} redeclared",
            var.symbol
        );
        let frame = self
            .locals
            .last_mut()
            .expect("no local frame is open");
        frame.push(var);
    }

    pub fn push_frame(&mut self) {
        self.locals.push(Vec::new());
    }

    pub fn pop_frame(&mut self) {
        assert!(self.locals.pop().is_some(), "no local frame is open");
    }

    pub fn add_chunk(&mut self, chunk: ChunkWindow) {
        self.chunks.push(chunk);
    }

    /// The most recently borrowed chunk whose window contains `index`.
    pub fn chunk_for_index(&self, index: u64) -> Option<&ChunkWindow> {
        self.chunks
            .iter()
            .rev()
            .find(|c| index >= c.start_index && index < c.start_index + c.length)
    }

    pub fn state(&self) -> &[CVar] {
        &self.state
    }
}

/// Produces `symbol`, `symbol_1`, `symbol_2`, ... per base name and type.
#[derive(Debug, Default)]
pub struct VariableGenerator {
    counters: HashMap<String, u64>,
}

impl VariableGenerator {
    pub fn generate(&mut self, symbol: &str, ty: CType) -> CVar {
        let indexer = format!("{}::{:?}", symbol, ty);
        let counter = self.counters.entry(indexer).or_insert(0);
        let new_symbol = if *counter > 0 {
            format!("{}_{}", symbol, counter)
        } else {
            symbol.to_string()
        };
        *counter += 1;
        CVar {
            symbol: new_symbol,
            ty,
        }
    }
}

/// Build the generated translation unit for `nf_init` from the BDD.
pub fn generate_init(bdd: &Bdd, config: &Config) -> Result<CUnit> {
    let mut gen = InitCodegen {
        scopes: VariableScopes::new(),
        generator: VariableGenerator::default(),
        config,
    };

    let body = gen.build(bdd.root(), None)?;

    let nf_init = CFunction {
        name: "nf_init".to_string(),
        args: vec![],
        ret: CType::named("bool"),
        body: vec![CStmt::Block(body)],
    };

    Ok(CUnit {
        includes: vec![
            CInclude::system("stdint.h"),
            CInclude::local("nf.h"),
            CInclude::local("nf-util.h"),
            CInclude::local("nf-log.h"),
            CInclude::local("libvig/verified/double-chain.h"),
            CInclude::local("libvig/verified/map.h"),
            CInclude::local("libvig/verified/vector.h"),
        ],
        state: gen
            .scopes
            .state()
            .iter()
            .map(|v| (v.symbol.clone(), v.ty.clone()))
            .collect(),
        functions: vec![nf_init],
    })
}

/// The `nf_process` half of the generator is a stub: the BDD traversal it
/// would consume is in place, the lowering is not.
pub fn generate_process(_bdd: &Bdd, _config: &Config) -> Result<CFunction> {
    bail!("nf_process generation is not implemented")
}

struct InitCodegen<'a> {
    scopes: VariableScopes,
    generator: VariableGenerator,
    config: &'a Config,
}

impl InitCodegen<'_> {
    fn build(&mut self, node: Option<&Node>, governing: Option<&CExpr>) -> Result<Vec<CStmt>> {
        let mut stmts = Vec::new();
        let mut current = node;

        while let Some(node) = current {
            match node {
                Node::Call(call_node) => {
                    if self.config.is_commit_function(&call_node.call.function_name) {
                        stmts.push(CStmt::Return(init_return(governing)?));
                        return Ok(stmts);
                    }
                    stmts.push(self.init_stmt_from_call(&call_node.call)?);
                    current = call_node.next.as_deref();
                }
                Node::Branch(branch) => {
                    let condition = transpile(&self.scopes, &branch.condition);
                    let negated = match &condition.kind {
                        CExprKind::Not(inner) => (**inner).clone(),
                        _ => CExpr::not(condition.clone()),
                    };
                    let on_true = self.build(branch.on_true.as_deref(), Some(&condition))?;
                    let on_false = self.build(branch.on_false.as_deref(), Some(&negated))?;
                    stmts.push(CStmt::Branch {
                        condition,
                        on_true,
                        on_false,
                    });
                    return Ok(stmts);
                }
            }
        }

        // The subtree ended without reaching the commit boundary: the path
        // bailed out, and the return value follows from the constraint that
        // got us here.
        stmts.push(CStmt::Return(init_return(governing)?));
        Ok(stmts)
    }

    fn init_stmt_from_call(&mut self, call: &Call) -> Result<CStmt> {
        let fname = call.function_name.as_str();

        let (args, ret_var) = match fname {
            "map_allocate" => {
                let capacity = self
                    .generator
                    .generate("capacity", CType::Primitive(CPrimitive::U32));
                let map = self
                    .generator
                    .generate("map", CType::pointer(CType::named("struct Map")));
                self.scopes.push_to_state(capacity.clone());
                self.scopes.push_to_state(map.clone());

                let args = vec![
                    CExpr::variable(capacity.symbol, capacity.ty),
                    CExpr::address_of(CExpr::variable(map.symbol, map.ty)),
                ];
                let ret = self
                    .generator
                    .generate("map_allocation_succeeded", CType::named("int"));
                (args, ret)
            }
            "vector_allocate" => {
                let capacity = self
                    .generator
                    .generate("capacity", CType::Primitive(CPrimitive::U32));
                let elem_size = self
                    .generator
                    .generate("elem_size", CType::Primitive(CPrimitive::U32));
                let vector = self
                    .generator
                    .generate("vector", CType::pointer(CType::named("struct Vector")));
                self.scopes.push_to_state(capacity.clone());
                self.scopes.push_to_state(elem_size.clone());
                self.scopes.push_to_state(vector.clone());

                let args = vec![
                    CExpr::variable(capacity.symbol, capacity.ty),
                    CExpr::variable(elem_size.symbol, elem_size.ty),
                    CExpr::address_of(CExpr::variable(vector.symbol, vector.ty)),
                ];
                let ret = self
                    .generator
                    .generate("vector_alloc_success", CType::named("int"));
                (args, ret)
            }
            "dchain_allocate" => {
                let index_range = self.generator.generate("index_range", CType::named("int"));
                let dchain = self
                    .generator
                    .generate("dchain", CType::pointer(CType::named("struct DoubleChain")));
                self.scopes.push_to_state(index_range.clone());
                self.scopes.push_to_state(dchain.clone());

                let args = vec![
                    CExpr::variable(index_range.symbol, index_range.ty),
                    CExpr::address_of(CExpr::variable(dchain.symbol, dchain.ty)),
                ];
                let ret = self
                    .generator
                    .generate("is_dchain_allocated", CType::named("int"));
                (args, ret)
            }
            _ => {
                error!("unrecognized init call {}", fname);
                for (name, arg) in &call.args {
                    error!(
                        "  {} : {} | {}",
                        name,
                        arg.expr
                            .as_ref()
                            .or(arg.before.as_ref())
                            .map(|e| e.to_string())
                            .unwrap_or_default(),
                        arg.after.as_ref().map(|e| e.to_string()).unwrap_or_default()
                    );
                }
                if let Some(ret) = &call.ret {
                    error!("  ret: {}", ret);
                }
                bail!("init call {} is not implemented", fname);
            }
        };

        assert_eq!(
            args.len(),
            call.args.len(),
            "traced {} has an unexpected argument count",
            fname
        );

        let assignment = CExpr::assignment(
            CExpr::variable_decl(ret_var.symbol.clone(), ret_var.ty.clone()),
            CExpr::function_call(fname, args),
        );
        self.scopes.push_to_local(ret_var);

        Ok(CStmt::Expr(assignment))
    }
}

/// Derive the value `nf_init` returns at a leaf from the branch condition
/// that governs the leaf. Allocation-success constraints compare a literal
/// against the allocator's return value.
fn init_return(governing: Option<&CExpr>) -> Result<CExpr> {
    let Some(condition) = governing else {
        return Ok(CExpr::unsigned(CPrimitive::U32, 1));
    };

    match &condition.kind {
        CExprKind::Binary {
            op: bdd_ir::c_ast::CBinOp::Eq,
            lhs,
            ..
        } => {
            if let CExprKind::Unsigned { value, .. } = lhs.kind {
                return Ok(CExpr::unsigned(CPrimitive::U32, u64::from(value != 0)));
            }
            bail!(
                "unexpected init branch condition: {}",
                render_condition(condition)
            );
        }
        CExprKind::Not(inner) => {
            if let CExprKind::Binary {
                op: bdd_ir::c_ast::CBinOp::Eq,
                lhs,
                ..
            } = &inner.kind
            {
                if let CExprKind::Unsigned { value, .. } = lhs.kind {
                    return Ok(CExpr::unsigned(CPrimitive::U32, u64::from(value == 0)));
                }
            }
            bail!(
                "unexpected init branch condition: {}",
                render_condition(condition)
            );
        }
        _ => bail!(
            "unexpected init branch condition: {}",
            render_condition(condition)
        ),
    }
}

fn render_condition(condition: &CExpr) -> String {
    let mut c = condition.clone();
    c.set_wrap(false);
    c.set_terminate_line(false);
    c.render()
}
