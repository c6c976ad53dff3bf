//! Solver toolbox: wraps an opaque validity oracle with the
//! renaming-aware entailment and equivalence questions the grouping engine
//! asks, and provides the production oracle that lowers the symbolic IR to
//! SMT and queries a z3 subprocess.

use crate::symbols::{retrieve_symbols, ReplaceSymbols};
use anyhow::{bail, Context as _, Result};
use bdd_ir::{Array, BinaryOp, CmpOp, Expr, ExprBuilder, ExprRef, WIDTH_BOOL};
use easy_smt::{Response, SExpr};
use std::cell::RefCell;
use std::collections::HashMap;

/// The decision procedure as seen by the toolbox. `Err` means the oracle
/// itself failed, which callers treat as a fatal invariant violation.
pub trait Oracle {
    fn must_be_true(&self, constraints: &[ExprRef], expr: &ExprRef) -> Result<bool>;
    fn must_be_false(&self, constraints: &[ExprRef], expr: &ExprRef) -> Result<bool>;
    fn get_value(&self, constraints: &[ExprRef], expr: &ExprRef) -> Result<u64>;
}

/// Production oracle: one `z3 -smt2 -in` subprocess per run, queries
/// serialized through it inside push/pop scopes. Queries are logically
/// const, hence the interior mutability.
pub struct SmtOracle {
    smt: RefCell<easy_smt::Context>,
}

impl SmtOracle {
    pub fn with_z3() -> Result<Self> {
        let smt = easy_smt::ContextBuilder::new()
            .solver("z3", ["-smt2", "-in"])
            .build()
            .context("failed to start the z3 subprocess")?;
        Ok(SmtOracle {
            smt: RefCell::new(smt),
        })
    }

    /// Assert the constraint set plus `expr = counterexample_bit`; UNSAT
    /// means no counterexample exists.
    fn refutes(
        &self,
        constraints: &[ExprRef],
        expr: &ExprRef,
        counterexample_bit: bool,
    ) -> Result<bool> {
        let mut smt = self.smt.borrow_mut();
        smt.push().context("solver push")?;
        let outcome = (|| {
            let mut lower = Lower::new(&mut smt);
            for constraint in constraints {
                let c = lower.lower_bool(constraint)?;
                lower.smt.assert(c).context("assert constraint")?;
            }
            let e = lower.lower(expr)?;
            let bit = lower.bv_literal(WIDTH_BOOL, u64::from(counterexample_bit));
            let probe = lower.smt.eq(e, bit);
            lower.smt.assert(probe).context("assert probe")?;
            match lower.smt.check().context("check-sat")? {
                Response::Unsat => Ok(true),
                Response::Sat => Ok(false),
                Response::Unknown => bail!("solver returned unknown"),
            }
        })();
        smt.pop().context("solver pop")?;
        outcome
    }
}

impl Oracle for SmtOracle {
    fn must_be_true(&self, constraints: &[ExprRef], expr: &ExprRef) -> Result<bool> {
        self.refutes(constraints, expr, false)
    }

    fn must_be_false(&self, constraints: &[ExprRef], expr: &ExprRef) -> Result<bool> {
        self.refutes(constraints, expr, true)
    }

    fn get_value(&self, constraints: &[ExprRef], expr: &ExprRef) -> Result<u64> {
        if let Some(value) = expr.constant_value() {
            return Ok(value);
        }
        let mut smt = self.smt.borrow_mut();
        smt.push().context("solver push")?;
        let outcome = (|| {
            let mut lower = Lower::new(&mut smt);
            for constraint in constraints {
                let c = lower.lower_bool(constraint)?;
                lower.smt.assert(c).context("assert constraint")?;
            }
            let e = lower.lower(expr)?;
            match lower.smt.check().context("check-sat")? {
                Response::Sat => {}
                Response::Unsat => bail!("no value exists: constraints are unsatisfiable"),
                Response::Unknown => bail!("solver returned unknown"),
            }
            let values = lower.smt.get_value(vec![e]).context("get-value")?;
            assert_eq!(values.len(), 1);
            let rendered = lower.smt.display(values[0].1).to_string();
            parse_bv_literal(&rendered)
                .with_context(|| format!("unparseable model value {}", rendered))
        })();
        smt.pop().context("solver pop")?;
        outcome
    }
}

fn parse_bv_literal(text: &str) -> Result<u64> {
    if let Some(bits) = text.strip_prefix("#b") {
        return Ok(u64::from_str_radix(bits, 2)?);
    }
    if let Some(digits) = text.strip_prefix("#x") {
        return Ok(u64::from_str_radix(digits, 16)?);
    }
    // (_ bvN W)
    if let Some(rest) = text.strip_prefix("(_ bv") {
        if let Some(end) = rest.find(' ') {
            return Ok(rest[..end].parse()?);
        }
    }
    bail!("not a bit-vector literal")
}

/// One query's lowering scope. Everything becomes a bit-vector; symbolic
/// arrays are SMT arrays declared on first use, so reads with equal symbols
/// across the constraint set and the probe refer to the same storage.
struct Lower<'a> {
    smt: &'a mut easy_smt::Context,
    arrays: HashMap<String, (SExpr, Array)>,
}

impl<'a> Lower<'a> {
    fn new(smt: &'a mut easy_smt::Context) -> Self {
        Lower {
            smt,
            arrays: HashMap::new(),
        }
    }

    fn bv_literal(&self, width: u32, value: u64) -> SExpr {
        self.smt
            .atom(format!("#b{:0fill$b}", value, fill = width as usize))
    }

    fn bv_sort(&self, width: u32) -> SExpr {
        self.smt.list(vec![
            self.smt.atom("_"),
            self.smt.atom("BitVec"),
            self.smt.numeral(width as usize),
        ])
    }

    fn app(&self, op: &str, args: Vec<SExpr>) -> SExpr {
        let mut items = vec![self.smt.atom(op)];
        items.extend(args);
        self.smt.list(items)
    }

    fn array_const(&mut self, array: &Array) -> Result<SExpr> {
        if let Some((sexpr, shape)) = self.arrays.get(&array.name) {
            assert_eq!(
                shape, array,
                "arrays named {} disagree on shape within one query",
                array.name
            );
            return Ok(*sexpr);
        }
        let sort = self.smt.list(vec![
            self.smt.atom("Array"),
            self.bv_sort(array.domain),
            self.bv_sort(array.range),
        ]);
        self.smt
            .declare_const(array.name.clone(), sort)
            .with_context(|| format!("declare array {}", array.name))?;
        let sexpr = self.smt.atom(array.name.clone());
        self.arrays
            .insert(array.name.clone(), (sexpr, array.clone()));
        Ok(sexpr)
    }

    /// Lower a width-1 expression to an SMT Bool.
    fn lower_bool(&mut self, expr: &ExprRef) -> Result<SExpr> {
        assert_eq!(
            expr.width(),
            WIDTH_BOOL,
            "constraint is not boolean: {}",
            expr
        );
        let e = self.lower(expr)?;
        let one = self.bv_literal(WIDTH_BOOL, 1);
        Ok(self.smt.eq(e, one))
    }

    fn lower(&mut self, expr: &ExprRef) -> Result<SExpr> {
        match &**expr {
            Expr::Constant { width, value } => Ok(self.bv_literal(*width, *value)),
            Expr::Read {
                array,
                index,
                width,
            } => {
                let arr = self.array_const(array)?;
                let idx = self.lower(index)?;
                if *width == array.range || *width == WIDTH_BOOL {
                    let selected = self.app("select", vec![arr, idx]);
                    if *width == array.range {
                        return Ok(selected);
                    }
                    // Boolean read out of a wider cell: its low bit.
                    return Ok(self.extract(0, 0, selected));
                }
                // Wide read: little-endian element order, most significant
                // element at the highest index.
                let count = width / array.range;
                let mut result: Option<SExpr> = None;
                for element in 0..count {
                    let offset = self.bv_literal(array.domain, u64::from(element));
                    let at = self.app("bvadd", vec![idx, offset]);
                    let selected = self.app("select", vec![arr, at]);
                    result = Some(match result {
                        None => selected,
                        Some(low) => self.app("concat", vec![selected, low]),
                    });
                }
                Ok(result.expect("read of zero elements"))
            }
            Expr::Select {
                cond,
                on_true,
                on_false,
            } => {
                let c = self.lower_bool(cond)?;
                let t = self.lower(on_true)?;
                let f = self.lower(on_false)?;
                Ok(self.smt.ite(c, t, f))
            }
            Expr::Concat { lhs, rhs } => {
                let l = self.lower(lhs)?;
                let r = self.lower(rhs)?;
                Ok(self.app("concat", vec![l, r]))
            }
            Expr::Extract {
                expr: inner,
                offset,
                width,
            } => {
                let e = self.lower(inner)?;
                Ok(self.extract(offset + width - 1, *offset, e))
            }
            Expr::ZExt { expr: inner, width } => self.lower_extension(inner, *width, "zero_extend"),
            Expr::SExt { expr: inner, width } => self.lower_extension(inner, *width, "sign_extend"),
            Expr::Cast { expr: inner, .. } => self.lower(inner),
            Expr::Not(inner) => {
                let e = self.lower(inner)?;
                Ok(self.app("bvnot", vec![e]))
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.lower(lhs)?;
                let r = self.lower(rhs)?;
                let name = match op {
                    BinaryOp::Add => "bvadd",
                    BinaryOp::Sub => "bvsub",
                    BinaryOp::Mul => "bvmul",
                    BinaryOp::UDiv => "bvudiv",
                    BinaryOp::SDiv => "bvsdiv",
                    BinaryOp::URem => "bvurem",
                    BinaryOp::SRem => "bvsrem",
                    BinaryOp::And => "bvand",
                    BinaryOp::Or => "bvor",
                    BinaryOp::Xor => "bvxor",
                    BinaryOp::Shl => "bvshl",
                    BinaryOp::LShr => "bvlshr",
                    BinaryOp::AShr => "bvashr",
                };
                Ok(self.app(name, vec![l, r]))
            }
            Expr::Cmp { op, lhs, rhs } => {
                let l = self.lower(lhs)?;
                let r = self.lower(rhs)?;
                let test = match op {
                    CmpOp::Eq => self.smt.eq(l, r),
                    CmpOp::Ne => {
                        let eq = self.smt.eq(l, r);
                        self.smt.not(eq)
                    }
                    CmpOp::Ult => self.app("bvult", vec![l, r]),
                    CmpOp::Ule => self.app("bvule", vec![l, r]),
                    CmpOp::Ugt => self.app("bvugt", vec![l, r]),
                    CmpOp::Uge => self.app("bvuge", vec![l, r]),
                    CmpOp::Slt => self.app("bvslt", vec![l, r]),
                    CmpOp::Sle => self.app("bvsle", vec![l, r]),
                    CmpOp::Sgt => self.app("bvsgt", vec![l, r]),
                    CmpOp::Sge => self.app("bvsge", vec![l, r]),
                };
                let one = self.bv_literal(WIDTH_BOOL, 1);
                let zero = self.bv_literal(WIDTH_BOOL, 0);
                Ok(self.smt.ite(test, one, zero))
            }
        }
    }

    fn lower_extension(&mut self, inner: &ExprRef, width: u32, op: &str) -> Result<SExpr> {
        let source_width = inner.width();
        let e = self.lower(inner)?;
        if width == source_width {
            return Ok(e);
        }
        if width < source_width {
            // The executor also uses the extension kinds to truncate.
            return Ok(self.extract(width - 1, 0, e));
        }
        let marker = self.smt.list(vec![
            self.smt.atom("_"),
            self.smt.atom(op),
            self.smt.numeral((width - source_width) as usize),
        ]);
        Ok(self.smt.list(vec![marker, e]))
    }

    fn extract(&self, high: u32, low: u32, e: SExpr) -> SExpr {
        let marker = self.smt.list(vec![
            self.smt.atom("_"),
            self.smt.atom("extract"),
            self.smt.numeral(high as usize),
            self.smt.numeral(low as usize),
        ]);
        self.smt.list(vec![marker, e])
    }
}

/// The questions the merge asks, phrased over the oracle. Holds the one
/// expression builder of the run so callers construct probe expressions
/// through it.
pub struct SolverToolbox {
    oracle: Box<dyn Oracle>,
    pub builder: ExprBuilder,
}

impl SolverToolbox {
    pub fn new(oracle: Box<dyn Oracle>) -> Self {
        SolverToolbox {
            oracle,
            builder: ExprBuilder,
        }
    }

    pub fn with_z3() -> Result<Self> {
        Ok(SolverToolbox::new(Box::new(SmtOracle::with_z3()?)))
    }

    /// Does the constraint set imply `expr`?
    pub fn always_true(&self, constraints: &[ExprRef], expr: &ExprRef) -> bool {
        self.oracle
            .must_be_true(constraints, expr)
            .expect("solver failed on a must-be-true query")
    }

    /// Like `always_true`, with the constraint set first renamed into the
    /// probe's symbol vocabulary.
    pub fn always_true_with(
        &self,
        constraints: &[ExprRef],
        expr: &ExprRef,
        replacer: &ReplaceSymbols,
    ) -> bool {
        let replaced: Vec<ExprRef> = constraints.iter().map(|c| replacer.visit(c)).collect();
        self.always_true(&replaced, expr)
    }

    /// Does the constraint set imply the negation of `expr`?
    pub fn always_false(&self, constraints: &[ExprRef], expr: &ExprRef) -> bool {
        self.oracle
            .must_be_false(constraints, expr)
            .expect("solver failed on a must-be-false query")
    }

    pub fn always_false_with(
        &self,
        constraints: &[ExprRef],
        expr: &ExprRef,
        replacer: &ReplaceSymbols,
    ) -> bool {
        let replaced: Vec<ExprRef> = constraints.iter().map(|c| replacer.visit(c)).collect();
        self.always_false(&replaced, expr)
    }

    /// Are the two (optional) expressions equal under every assignment,
    /// after renaming the second one's reads onto the first's?
    pub fn exprs_equivalent(&self, expr1: Option<&ExprRef>, expr2: Option<&ExprRef>) -> bool {
        match (expr1, expr2) {
            (None, None) => true,
            (Some(e1), Some(e2)) => {
                let symbols = retrieve_symbols(e1);
                let replaced = ReplaceSymbols::new(symbols).visit(e2);
                let probe = self.builder.eq(e1.clone(), replaced);
                self.always_true(&[], &probe)
            }
            _ => false,
        }
    }

    /// Extract a witnessing constant. Only meaningful for expressions that
    /// are constant under no constraints.
    pub fn concrete_value(&self, expr: &ExprRef) -> u64 {
        self.oracle
            .get_value(&[], expr)
            .expect("solver failed on a get-value query")
    }
}
