//! Shared helpers for the integration suites: small-domain expression
//! builders, a brute-force evaluation oracle so the merge logic can be
//! tested hermetically, and a probe for a usable z3 on PATH.

#![allow(dead_code)]

use anyhow::{bail, Result};
use bdd_engine_lib::solver::{Oracle, SolverToolbox};
use bdd_ir::call_path::{Arg, Call, CallPath, CallPathRef};
use bdd_ir::{Array, ArrayRef, BinaryOp, CmpOp, Expr, ExprBuilder, ExprRef, Width};
use std::collections::HashMap;
use std::rc::Rc;

pub fn builder() -> ExprBuilder {
    ExprBuilder
}

/// A 4-byte symbolic array indexed by w32, the shape packet fields and
/// return values come in.
pub fn byte_array(name: &str) -> ArrayRef {
    Array::new(name, 32, 8, 4)
}

/// An 8-bit read at a concrete index.
pub fn read8(array: &ArrayRef, index: u64) -> ExprRef {
    let b = ExprBuilder;
    b.read(array.clone(), b.constant(32, index), 8)
}

pub fn call(name: &str) -> Call {
    Call {
        function_name: name.to_string(),
        ..Call::default()
    }
}

pub fn call_with_arg(name: &str, arg_name: &str, expr: ExprRef) -> Call {
    let mut c = call(name);
    c.args.insert(
        arg_name.to_string(),
        Arg {
            expr: Some(expr),
            ..Arg::default()
        },
    );
    c
}

pub fn call_with_output_arg(
    name: &str,
    arg_name: &str,
    before: ExprRef,
    after: ExprRef,
) -> Call {
    let mut c = call(name);
    c.args.insert(
        arg_name.to_string(),
        Arg {
            expr: None,
            before: Some(before),
            after: Some(after),
        },
    );
    c
}

pub fn path(file_name: &str, constraints: Vec<ExprRef>, calls: Vec<Call>) -> CallPathRef {
    Rc::new(CallPath {
        file_name: file_name.to_string(),
        constraints,
        calls,
    })
}

pub fn eval_toolbox() -> SolverToolbox {
    SolverToolbox::new(Box::new(EvalOracle))
}

pub fn z3_available() -> bool {
    std::process::Command::new("z3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Decides validity questions by enumerating every assignment to the free
/// reads of the query. Only usable over the small domains the tests build:
/// constant read indices, at most 16 total bits of symbolic input.
pub struct EvalOracle;

type Cell = (String, u64, Width);
type Env = HashMap<Cell, u64>;

impl EvalOracle {
    fn for_all(
        constraints: &[ExprRef],
        expr: &ExprRef,
        accept: impl Fn(u64) -> bool,
    ) -> Result<bool> {
        let mut cells = Vec::new();
        for c in constraints {
            collect_cells(c, &mut cells);
        }
        collect_cells(expr, &mut cells);
        cells.sort();
        cells.dedup();

        let total_bits: u32 = cells.iter().map(|(_, _, w)| *w).sum();
        if total_bits > 16 {
            bail!("evaluation oracle domain too large: {} bits", total_bits);
        }

        for assignment in 0u64..(1u64 << total_bits) {
            let mut env = Env::new();
            let mut consumed = 0;
            for cell in &cells {
                let width = cell.2;
                let value = (assignment >> consumed) & mask(width);
                env.insert(cell.clone(), value);
                consumed += width;
            }

            if constraints.iter().any(|c| eval(c, &env) == 0) {
                continue;
            }
            if !accept(eval(expr, &env)) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Oracle for EvalOracle {
    fn must_be_true(&self, constraints: &[ExprRef], expr: &ExprRef) -> Result<bool> {
        Self::for_all(constraints, expr, |v| v == 1)
    }

    fn must_be_false(&self, constraints: &[ExprRef], expr: &ExprRef) -> Result<bool> {
        Self::for_all(constraints, expr, |v| v == 0)
    }

    fn get_value(&self, constraints: &[ExprRef], expr: &ExprRef) -> Result<u64> {
        if let Some(value) = expr.constant_value() {
            return Ok(value);
        }

        let mut cells = Vec::new();
        for c in constraints {
            collect_cells(c, &mut cells);
        }
        collect_cells(expr, &mut cells);
        cells.sort();
        cells.dedup();

        let total_bits: u32 = cells.iter().map(|(_, _, w)| *w).sum();
        if total_bits > 16 {
            bail!("evaluation oracle domain too large: {} bits", total_bits);
        }

        // First satisfying assignment wins.
        for assignment in 0u64..(1u64 << total_bits) {
            let mut env = Env::new();
            let mut consumed = 0;
            for cell in &cells {
                let width = cell.2;
                env.insert(cell.clone(), (assignment >> consumed) & mask(width));
                consumed += width;
            }
            if constraints.iter().all(|c| eval(c, &env) == 1) {
                return Ok(eval(expr, &env));
            }
        }
        bail!("no value exists: constraints are unsatisfiable")
    }
}

fn collect_cells(expr: &ExprRef, out: &mut Vec<Cell>) {
    match &**expr {
        Expr::Constant { .. } => {}
        Expr::Read {
            array,
            index,
            width,
        } => {
            let idx = index
                .constant_value()
                .expect("the evaluation oracle needs constant read indices");
            out.push((array.name.clone(), idx, *width));
        }
        Expr::Select {
            cond,
            on_true,
            on_false,
        } => {
            collect_cells(cond, out);
            collect_cells(on_true, out);
            collect_cells(on_false, out);
        }
        Expr::Concat { lhs, rhs } => {
            collect_cells(lhs, out);
            collect_cells(rhs, out);
        }
        Expr::Extract { expr, .. }
        | Expr::ZExt { expr, .. }
        | Expr::SExt { expr, .. }
        | Expr::Cast { expr, .. } => collect_cells(expr, out),
        Expr::Not(expr) => collect_cells(expr, out),
        Expr::Binary { lhs, rhs, .. } | Expr::Cmp { lhs, rhs, .. } => {
            collect_cells(lhs, out);
            collect_cells(rhs, out);
        }
    }
}

fn mask(width: Width) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn to_signed(value: u64, width: Width) -> i64 {
    let value = value & mask(width);
    if width == 64 {
        return value as i64;
    }
    let sign_bit = 1u64 << (width - 1);
    if value & sign_bit != 0 {
        (value as i64) - (1i64 << width)
    } else {
        value as i64
    }
}

fn eval(expr: &ExprRef, env: &Env) -> u64 {
    let w = expr.width();
    match &**expr {
        Expr::Constant { value, .. } => *value,
        Expr::Read {
            array,
            index,
            width,
        } => {
            let idx = eval(index, env);
            *env.get(&(array.name.clone(), idx, *width))
                .expect("read outside the collected cells")
        }
        Expr::Select {
            cond,
            on_true,
            on_false,
        } => {
            if eval(cond, env) == 1 {
                eval(on_true, env)
            } else {
                eval(on_false, env)
            }
        }
        Expr::Concat { lhs, rhs } => {
            (eval(lhs, env) << rhs.width()) | eval(rhs, env)
        }
        Expr::Extract {
            expr,
            offset,
            width,
        } => (eval(expr, env) >> offset) & mask(*width),
        Expr::ZExt { expr, width } => eval(expr, env) & mask(*width),
        Expr::SExt { expr, width } => {
            (to_signed(eval(expr, env), expr.width()) as u64) & mask(*width)
        }
        Expr::Cast { expr, .. } => eval(expr, env),
        Expr::Not(expr) => !eval(expr, env) & mask(w),
        Expr::Binary { op, lhs, rhs } => {
            let l = eval(lhs, env);
            let r = eval(rhs, env);
            let ls = to_signed(l, lhs.width());
            let rs = to_signed(r, rhs.width());
            let raw = match op {
                BinaryOp::Add => l.wrapping_add(r),
                BinaryOp::Sub => l.wrapping_sub(r),
                BinaryOp::Mul => l.wrapping_mul(r),
                BinaryOp::UDiv => {
                    if r == 0 {
                        mask(w)
                    } else {
                        l / r
                    }
                }
                BinaryOp::SDiv => {
                    if r == 0 {
                        mask(w)
                    } else {
                        (ls / rs) as u64
                    }
                }
                BinaryOp::URem => {
                    if r == 0 {
                        l
                    } else {
                        l % r
                    }
                }
                BinaryOp::SRem => {
                    if r == 0 {
                        l
                    } else {
                        (ls % rs) as u64
                    }
                }
                BinaryOp::And => l & r,
                BinaryOp::Or => l | r,
                BinaryOp::Xor => l ^ r,
                BinaryOp::Shl => {
                    if r >= u64::from(w) {
                        0
                    } else {
                        l << r
                    }
                }
                BinaryOp::LShr => {
                    if r >= u64::from(w) {
                        0
                    } else {
                        l >> r
                    }
                }
                BinaryOp::AShr => {
                    if r >= u64::from(w) {
                        if ls < 0 {
                            mask(w)
                        } else {
                            0
                        }
                    } else {
                        (ls >> r) as u64
                    }
                }
            };
            raw & mask(w)
        }
        Expr::Cmp { op, lhs, rhs } => {
            let l = eval(lhs, env);
            let r = eval(rhs, env);
            let ls = to_signed(l, lhs.width());
            let rs = to_signed(r, rhs.width());
            let holds = match op {
                CmpOp::Eq => l == r,
                CmpOp::Ne => l != r,
                CmpOp::Ult => l < r,
                CmpOp::Ule => l <= r,
                CmpOp::Ugt => l > r,
                CmpOp::Uge => l >= r,
                CmpOp::Slt => ls < rs,
                CmpOp::Sle => ls <= rs,
                CmpOp::Sgt => ls > rs,
                CmpOp::Sge => ls >= rs,
            };
            u64::from(holds)
        }
    }
}
