//! Retrieval and renaming of the free symbolic reads of an expression.
//!
//! Every call path comes out of the executor with its own fresh symbol
//! instances. Before two expressions from different paths can be handed to
//! the solver as one query, the reads of one must be re-anchored onto the
//! reads of the other; `ReplaceSymbols` performs that rewrite.

use bdd_ir::{Expr, ExprRef};
use std::rc::Rc;

/// Collect the `Read` subtrees of `expr` in visit order. Duplicates are
/// kept, and concat operands are revisited even when an equal subtree was
/// already seen elsewhere.
pub fn retrieve_symbols(expr: &ExprRef) -> Vec<ExprRef> {
    let mut retrieved = Vec::new();
    walk(expr, &mut retrieved);
    retrieved
}

fn walk(expr: &ExprRef, out: &mut Vec<ExprRef>) {
    match &**expr {
        Expr::Constant { .. } => {}
        Expr::Read { index, .. } => {
            out.push(expr.clone());
            walk(index, out);
        }
        Expr::Select {
            cond,
            on_true,
            on_false,
        } => {
            walk(cond, out);
            walk(on_true, out);
            walk(on_false, out);
        }
        Expr::Concat { lhs, rhs } => {
            walk(lhs, out);
            walk(rhs, out);
        }
        Expr::Extract { expr, .. }
        | Expr::ZExt { expr, .. }
        | Expr::SExt { expr, .. }
        | Expr::Cast { expr, .. } => walk(expr, out),
        Expr::Not(expr) => walk(expr, out),
        Expr::Binary { lhs, rhs, .. } | Expr::Cmp { lhs, rhs, .. } => {
            walk(lhs, out);
            walk(rhs, out);
        }
    }
}

/// Rewrites the reads of a target expression onto a reference read set.
///
/// A read matches a reference read when the result width, the index
/// expression (syntactically), and the source array (name, domain, range,
/// size) all agree; the first match in reference order wins. A matched read
/// is replaced wholesale, without descending into it; an unmatched read
/// keeps its array but still has its index rewritten. The rewrite is
/// idempotent.
pub struct ReplaceSymbols {
    reads: Vec<ExprRef>,
}

impl ReplaceSymbols {
    pub fn new(reads: Vec<ExprRef>) -> Self {
        assert!(
            reads.iter().all(|r| matches!(&**r, Expr::Read { .. })),
            "reference symbols must be reads"
        );
        ReplaceSymbols { reads }
    }

    pub fn visit(&self, expr: &ExprRef) -> ExprRef {
        match &**expr {
            Expr::Constant { .. } => expr.clone(),
            Expr::Read {
                array,
                index,
                width,
            } => {
                for read in &self.reads {
                    let Expr::Read {
                        array: ref_array,
                        index: ref_index,
                        width: ref_width,
                    } = &**read
                    else {
                        unreachable!();
                    };
                    if ref_width == width && ref_index == index && ref_array == array {
                        return read.clone();
                    }
                }
                let new_index = self.visit(index);
                if Rc::ptr_eq(&new_index, index) {
                    expr.clone()
                } else {
                    Rc::new(Expr::Read {
                        array: array.clone(),
                        index: new_index,
                        width: *width,
                    })
                }
            }
            Expr::Select {
                cond,
                on_true,
                on_false,
            } => self.rebuild3(expr, cond, on_true, on_false, |c, t, f| Expr::Select {
                cond: c,
                on_true: t,
                on_false: f,
            }),
            Expr::Concat { lhs, rhs } => {
                self.rebuild2(expr, lhs, rhs, |l, r| Expr::Concat { lhs: l, rhs: r })
            }
            Expr::Extract {
                expr: inner,
                offset,
                width,
            } => {
                let (offset, width) = (*offset, *width);
                self.rebuild1(expr, inner, move |e| Expr::Extract {
                    expr: e,
                    offset,
                    width,
                })
            }
            Expr::ZExt { expr: inner, width } => {
                let width = *width;
                self.rebuild1(expr, inner, move |e| Expr::ZExt { expr: e, width })
            }
            Expr::SExt { expr: inner, width } => {
                let width = *width;
                self.rebuild1(expr, inner, move |e| Expr::SExt { expr: e, width })
            }
            Expr::Cast {
                expr: inner,
                signed,
            } => {
                let signed = *signed;
                self.rebuild1(expr, inner, move |e| Expr::Cast { expr: e, signed })
            }
            Expr::Not(inner) => self.rebuild1(expr, inner, Expr::Not),
            Expr::Binary { op, lhs, rhs } => {
                let op = *op;
                self.rebuild2(expr, lhs, rhs, move |l, r| Expr::Binary {
                    op,
                    lhs: l,
                    rhs: r,
                })
            }
            Expr::Cmp { op, lhs, rhs } => {
                let op = *op;
                self.rebuild2(expr, lhs, rhs, move |l, r| Expr::Cmp { op, lhs: l, rhs: r })
            }
        }
    }

    fn rebuild1(
        &self,
        original: &ExprRef,
        child: &ExprRef,
        make: impl FnOnce(ExprRef) -> Expr,
    ) -> ExprRef {
        let new_child = self.visit(child);
        if Rc::ptr_eq(&new_child, child) {
            original.clone()
        } else {
            Rc::new(make(new_child))
        }
    }

    fn rebuild2(
        &self,
        original: &ExprRef,
        lhs: &ExprRef,
        rhs: &ExprRef,
        make: impl FnOnce(ExprRef, ExprRef) -> Expr,
    ) -> ExprRef {
        let new_lhs = self.visit(lhs);
        let new_rhs = self.visit(rhs);
        if Rc::ptr_eq(&new_lhs, lhs) && Rc::ptr_eq(&new_rhs, rhs) {
            original.clone()
        } else {
            Rc::new(make(new_lhs, new_rhs))
        }
    }

    fn rebuild3(
        &self,
        original: &ExprRef,
        a: &ExprRef,
        b: &ExprRef,
        c: &ExprRef,
        make: impl FnOnce(ExprRef, ExprRef, ExprRef) -> Expr,
    ) -> ExprRef {
        let new_a = self.visit(a);
        let new_b = self.visit(b);
        let new_c = self.visit(c);
        if Rc::ptr_eq(&new_a, a) && Rc::ptr_eq(&new_b, b) && Rc::ptr_eq(&new_c, c) {
            original.clone()
        } else {
            Rc::new(make(new_a, new_b, new_c))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdd_ir::{Array, ExprBuilder};

    #[test]
    fn retrieval_keeps_duplicates_and_order() {
        let b = ExprBuilder;
        let arr = Array::new("x", 32, 8, 4);
        let r0 = b.read(arr.clone(), b.constant(32, 0), 8);
        let r1 = b.read(arr.clone(), b.constant(32, 1), 8);
        let e = b.binary(
            bdd_ir::BinaryOp::Add,
            b.concat(r1.clone(), r0.clone()),
            b.concat(r1.clone(), r0.clone()),
        );
        let reads = retrieve_symbols(&e);
        assert_eq!(reads, vec![r1.clone(), r0.clone(), r1, r0]);
    }

    #[test]
    fn replacement_matches_width_index_and_array() {
        let b = ExprBuilder;
        // Same shape, distinct instances: the rewrite re-anchors one onto
        // the other so the trees become syntactically equal.
        let theirs = b.read(Array::new("k", 32, 8, 4), b.constant(32, 2), 8);
        let ours = b.read(Array::new("k", 32, 8, 4), b.constant(32, 2), 8);
        let replacer = ReplaceSymbols::new(vec![ours.clone()]);

        let replaced = replacer.visit(&theirs);
        assert!(Rc::ptr_eq(&replaced, &ours));

        // A read over a different index is left alone.
        let other = b.read(Array::new("k", 32, 8, 4), b.constant(32, 3), 8);
        let replaced = replacer.visit(&other);
        assert_eq!(replaced, other);
    }

    #[test]
    fn replacement_is_idempotent() {
        let b = ExprBuilder;
        let arr = Array::new("k", 32, 8, 4);
        let reference = b.read(arr.clone(), b.constant(32, 0), 8);
        let replacer = ReplaceSymbols::new(vec![reference.clone()]);

        let target = b.binary(
            bdd_ir::BinaryOp::Add,
            b.read(Array::new("k", 32, 8, 4), b.constant(32, 0), 8),
            b.constant(8, 1),
        );
        let once = replacer.visit(&target);
        let twice = replacer.visit(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn unmatched_read_keeps_its_array_but_rewrites_its_index() {
        let b = ExprBuilder;
        let idx_arr = Array::new("i", 32, 32, 4);
        let reference = b.read(idx_arr.clone(), b.constant(32, 0), 32);
        let replacer = ReplaceSymbols::new(vec![reference.clone()]);

        let data = Array::new("d", 32, 8, 16);
        let target = b.read(
            data.clone(),
            b.read(Array::new("i", 32, 32, 4), b.constant(32, 0), 32),
            8,
        );
        let replaced = replacer.visit(&target);
        let Expr::Read { array, index, .. } = &*replaced else {
            panic!("expected a read");
        };
        assert_eq!(*array, data);
        assert!(Rc::ptr_eq(index, &reference));
    }
}
