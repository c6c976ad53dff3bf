//! Lowering of symbolic bit-vector expressions to C expressions over the
//! generated program's variables.

use crate::codegen::VariableScopes;
use crate::symbols::retrieve_symbols;
use bdd_ir::c_ast::{CBinOp, CExpr, CExprKind, CPrimitive, CType};
use bdd_ir::{BinaryOp, CmpOp, Expr, ExprRef, Width};

/// Convert one symbolic expression into a C expression. Symbol names are
/// resolved against the program state first, then against the local scope;
/// a read that resolves to neither is a fatal error.
pub fn transpile(scopes: &VariableScopes, expr: &ExprRef) -> CExpr {
    match &**expr {
        Expr::Constant { width, value } => constant(*width, *value),
        Expr::Read {
            array,
            index,
            width,
        } => transpile_read(scopes, &array.name, index, *width),
        Expr::Select {
            cond,
            on_true,
            on_false,
        } => CExpr::select(
            transpile(scopes, cond),
            transpile(scopes, on_true),
            transpile(scopes, on_false),
        ),
        Expr::Concat { .. } => transpile_concat(scopes, expr),
        Expr::Extract {
            expr: inner,
            offset,
            width,
        } => {
            let operand = transpile(scopes, inner);
            let extracted = if *offset > 0 {
                let shifted = CExpr::binary(
                    CBinOp::Shr,
                    operand,
                    CExpr::unsigned(CPrimitive::U64, u64::from(*offset)),
                );
                CExpr::binary(
                    CBinOp::And,
                    shifted,
                    CExpr::unsigned_hex(CPrimitive::U64, width_mask(*width)),
                )
            } else {
                operand
            };
            CExpr::cast(extracted, CType::from_width(*width))
        }
        Expr::ZExt { expr: inner, width } => {
            CExpr::cast(transpile(scopes, inner), CType::from_width(*width))
        }
        Expr::SExt { expr: inner, width } => transpile_sext(scopes, inner, *width),
        Expr::Cast {
            expr: inner,
            signed,
        } => {
            let operand = transpile(scopes, inner);
            if *signed {
                CExpr::signed_cast(operand)
            } else {
                CExpr::cast(operand, CType::from_width(inner.width()))
            }
        }
        Expr::Not(inner) => CExpr::not(transpile(scopes, inner)),
        Expr::Binary { op, lhs, rhs } => {
            let l = transpile(scopes, lhs);
            let r = transpile(scopes, rhs);
            match op {
                BinaryOp::Add => CExpr::binary(CBinOp::Add, l, r),
                BinaryOp::Sub => CExpr::binary(CBinOp::Sub, l, r),
                BinaryOp::Mul => CExpr::binary(CBinOp::Mul, l, r),
                BinaryOp::UDiv => CExpr::binary(CBinOp::Div, l, r),
                BinaryOp::URem => CExpr::binary(CBinOp::Mod, l, r),
                BinaryOp::SDiv => CExpr::binary(CBinOp::Div, CExpr::signed_cast(l), r),
                BinaryOp::SRem => CExpr::binary(CBinOp::Mod, CExpr::signed_cast(l), r),
                BinaryOp::And => CExpr::binary(CBinOp::And, l, r),
                BinaryOp::Or => CExpr::binary(CBinOp::Or, l, r),
                BinaryOp::Xor => CExpr::binary(CBinOp::Xor, l, r),
                BinaryOp::Shl => CExpr::binary(CBinOp::Shl, l, r),
                BinaryOp::LShr => CExpr::binary(CBinOp::Shr, l, r),
                BinaryOp::AShr => CExpr::binary(CBinOp::Shr, CExpr::signed_cast(l), r),
            }
        }
        Expr::Cmp { op, lhs, rhs } => {
            let l = transpile(scopes, lhs);
            let r = transpile(scopes, rhs);
            match op {
                CmpOp::Eq => {
                    if let Some(collapsed) = collapse_double_negation(&l, &r) {
                        return collapsed;
                    }
                    CExpr::binary(CBinOp::Eq, l, r)
                }
                CmpOp::Ne => CExpr::binary(CBinOp::Ne, l, r),
                CmpOp::Ult => CExpr::binary(CBinOp::Lt, l, r),
                CmpOp::Ule => CExpr::binary(CBinOp::Le, l, r),
                CmpOp::Ugt => CExpr::binary(CBinOp::Gt, l, r),
                CmpOp::Uge => CExpr::binary(CBinOp::Ge, l, r),
                CmpOp::Slt => {
                    CExpr::binary(CBinOp::Lt, CExpr::signed_cast(l), CExpr::signed_cast(r))
                }
                CmpOp::Sle => {
                    CExpr::binary(CBinOp::Le, CExpr::signed_cast(l), CExpr::signed_cast(r))
                }
                CmpOp::Sgt => {
                    CExpr::binary(CBinOp::Gt, CExpr::signed_cast(l), CExpr::signed_cast(r))
                }
                CmpOp::Sge => {
                    CExpr::binary(CBinOp::Ge, CExpr::signed_cast(l), CExpr::signed_cast(r))
                }
            }
        }
    }
}

fn constant(width: Width, value: u64) -> CExpr {
    match CType::from_width(width) {
        CType::Primitive(kind) => CExpr::unsigned(kind, value),
        other => panic!("constant of non-primitive type {:?}", other),
    }
}

fn width_mask(width: Width) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// The executor canonicalizes a handful of its symbol names onto the
/// process ABI's variable names.
fn canonical_symbol(symbol: &str) -> &str {
    match symbol {
        "VIGOR_DEVICE" => "src_devices",
        "next_time" => "now",
        "data_len" => "pkt_len",
        other => other,
    }
}

fn transpile_read(scopes: &VariableScopes, symbol: &str, index: &ExprRef, width: Width) -> CExpr {
    let ty = CType::from_width(width);
    let idx = transpile(scopes, index);

    if symbol == "packet_chunks" {
        let idx_value = index
            .constant_value()
            .expect("packet chunk reads must use a concrete index");
        let chunk = scopes
            .chunk_for_index(idx_value)
            .expect("packet chunk read outside every borrowed chunk");
        let rebased = idx_value - chunk.start_index;
        let idx_kind = match idx.ty() {
            Some(CType::Primitive(kind)) => kind,
            _ => CPrimitive::U32,
        };
        let var = CExpr::variable(chunk.var.symbol.clone(), chunk.var.ty.clone());
        return CExpr::read(var, ty, CExpr::unsigned(idx_kind, rebased));
    }

    let symbol = canonical_symbol(symbol);
    let var = scopes
        .get_from_state(symbol)
        .or_else(|| scopes.get_from_local(symbol))
        .unwrap_or_else(|| panic!("symbol {} is not a variable in scope", symbol));

    CExpr::read(
        CExpr::variable(var.symbol.clone(), var.ty.clone()),
        ty,
        idx,
    )
}

fn transpile_concat(scopes: &VariableScopes, expr: &ExprRef) -> CExpr {
    let Expr::Concat { lhs, rhs } = &**expr else {
        unreachable!();
    };

    let ty = CType::from_width(expr.width());
    let concat = CExpr::concat(transpile(scopes, lhs), transpile(scopes, rhs), ty);

    let mut symbols: Vec<String> = retrieve_symbols(expr)
        .iter()
        .filter_map(|read| match &**read {
            Expr::Read { array, .. } => Some(array.name.clone()),
            _ => None,
        })
        .collect();
    symbols.sort();
    symbols.dedup();

    if symbols.len() != 1 {
        return concat;
    }

    let Some(var) = scopes
        .get_from_state(&symbols[0])
        .or_else(|| scopes.get_from_local(&symbols[0]))
    else {
        return concat;
    };

    // A concat that reassembles the whole variable byte by byte is the
    // variable itself.
    if is_sequential_read_cover(expr) && var.ty.width() == Some(expr.width()) {
        return CExpr::variable(var.symbol.clone(), var.ty.clone());
    }

    concat
}

/// True when every leaf of the concat is a constant-indexed read and the
/// leaves cover adjacent indices in most-significant-first order.
fn is_sequential_read_cover(expr: &ExprRef) -> bool {
    let mut leaves = Vec::new();
    concat_leaves(expr, &mut leaves);

    let mut reads = Vec::new();
    for leaf in leaves {
        let Expr::Read { index, width, .. } = &*leaf else {
            return false;
        };
        let Some(idx) = index.constant_value() else {
            return false;
        };
        if width % 8 != 0 {
            return false;
        }
        reads.push((idx, u64::from(width / 8)));
    }

    reads
        .windows(2)
        .all(|pair| pair[0].0 == pair[1].0 + pair[1].1)
}

fn concat_leaves(expr: &ExprRef, out: &mut Vec<ExprRef>) {
    match &**expr {
        Expr::Concat { lhs, rhs } => {
            concat_leaves(lhs, out);
            concat_leaves(rhs, out);
        }
        _ => out.push(expr.clone()),
    }
}

fn transpile_sext(scopes: &VariableScopes, inner: &ExprRef, width: Width) -> CExpr {
    let source_width = inner.width();
    let operand = transpile(scopes, inner);
    let ty = CType::from_width(width);

    if width == source_width {
        return operand;
    }
    if width < source_width {
        return CExpr::cast(operand, ty);
    }

    let CType::Primitive(kind) = ty.clone() else {
        panic!("sign extension to non-primitive width {}", width);
    };

    // The top `width - source_width` bits, set when the operand's sign bit
    // is set.
    let mask = width_mask(width) & !width_mask(source_width);

    let msb = CExpr::binary(
        CBinOp::Shr,
        operand.clone(),
        CExpr::unsigned(kind, u64::from(source_width - 1)),
    );
    let if_negative = CExpr::binary(
        CBinOp::Or,
        CExpr::unsigned_hex(kind, mask),
        operand.clone(),
    );
    let if_positive = CExpr::cast(operand, ty);

    CExpr::select(msb, if_negative, if_positive)
}

fn collapse_double_negation(lhs: &CExpr, rhs: &CExpr) -> Option<CExpr> {
    let CExprKind::Unsigned { value: 0, .. } = lhs.kind else {
        return None;
    };
    let CExprKind::Binary {
        op: CBinOp::Eq,
        lhs: inner_lhs,
        rhs: inner_rhs,
    } = &rhs.kind
    else {
        return None;
    };
    let CExprKind::Unsigned { value: 0, .. } = inner_lhs.kind else {
        return None;
    };
    Some((**inner_rhs).clone())
}
