//! Symbolic intermediate representation for call-path merging: immutable
//! bit-vector expression trees as produced by a symbolic executor, eventually
//! to be lowered to SMT queries or to a C expression AST. The goal is to keep
//! the representation independent from both the solver backend and the
//! generated-code surface.
//!
//! Note: the generated-code surface uses the higher-level AST in c_ast.rs.

pub mod c_ast;
pub mod call_path;

use std::fmt;
use std::rc::Rc;

/// Bit-width of an expression result.
pub type Width = u32;

pub const WIDTH_BOOL: Width = 1;

/// A named symbolic byte-array, the source of `Read`s. Two arrays with the
/// same name, domain, range, and size are the same array.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Array {
    pub name: String,
    /// Width of index expressions into this array.
    pub domain: Width,
    /// Width of a single element.
    pub range: Width,
    /// Total size, in bytes.
    pub size: u64,
}

pub type ArrayRef = Rc<Array>;

impl Array {
    pub fn new(name: impl Into<String>, domain: Width, range: Width, size: u64) -> ArrayRef {
        Rc::new(Array {
            name: name.into(),
            domain,
            range,
            size,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl BinaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "Add",
            BinaryOp::Sub => "Sub",
            BinaryOp::Mul => "Mul",
            BinaryOp::UDiv => "UDiv",
            BinaryOp::SDiv => "SDiv",
            BinaryOp::URem => "URem",
            BinaryOp::SRem => "SRem",
            BinaryOp::And => "And",
            BinaryOp::Or => "Or",
            BinaryOp::Xor => "Xor",
            BinaryOp::Shl => "Shl",
            BinaryOp::LShr => "LShr",
            BinaryOp::AShr => "AShr",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl CmpOp {
    pub fn name(&self) -> &'static str {
        match self {
            CmpOp::Eq => "Eq",
            CmpOp::Ne => "Ne",
            CmpOp::Ult => "Ult",
            CmpOp::Ule => "Ule",
            CmpOp::Ugt => "Ugt",
            CmpOp::Uge => "Uge",
            CmpOp::Slt => "Slt",
            CmpOp::Sle => "Sle",
            CmpOp::Sgt => "Sgt",
            CmpOp::Sge => "Sge",
        }
    }
}

/// Reference-counted handle to an immutable expression tree. Equality and
/// hashing are by value, so structurally equal trees collide regardless of
/// sharing.
pub type ExprRef = Rc<Expr>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr {
    Constant {
        width: Width,
        value: u64,
    },
    Read {
        array: ArrayRef,
        index: ExprRef,
        width: Width,
    },
    Select {
        cond: ExprRef,
        on_true: ExprRef,
        on_false: ExprRef,
    },
    Concat {
        lhs: ExprRef,
        rhs: ExprRef,
    },
    Extract {
        expr: ExprRef,
        offset: Width,
        width: Width,
    },
    ZExt {
        expr: ExprRef,
        width: Width,
    },
    SExt {
        expr: ExprRef,
        width: Width,
    },
    /// Width-preserving signed-reinterpretation marker.
    Cast {
        expr: ExprRef,
        signed: bool,
    },
    Not(ExprRef),
    Binary {
        op: BinaryOp,
        lhs: ExprRef,
        rhs: ExprRef,
    },
    Cmp {
        op: CmpOp,
        lhs: ExprRef,
        rhs: ExprRef,
    },
}

impl Expr {
    pub fn width(&self) -> Width {
        match self {
            Expr::Constant { width, .. }
            | Expr::Read { width, .. }
            | Expr::Extract { width, .. }
            | Expr::ZExt { width, .. }
            | Expr::SExt { width, .. } => *width,
            Expr::Select { on_true, .. } => on_true.width(),
            Expr::Concat { lhs, rhs } => lhs.width() + rhs.width(),
            Expr::Cast { expr, .. } => expr.width(),
            Expr::Not(expr) => expr.width(),
            Expr::Binary { lhs, .. } => lhs.width(),
            Expr::Cmp { .. } => WIDTH_BOOL,
        }
    }

    pub fn constant_value(&self) -> Option<u64> {
        match self {
            Expr::Constant { value, .. } => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant { width, value } => write!(f, "(w{} {})", width, value),
            Expr::Read {
                array,
                index,
                width,
            } => write!(f, "(Read w{} {} {})", width, index, array.name),
            Expr::Select {
                cond,
                on_true,
                on_false,
            } => write!(
                f,
                "(Select w{} {} {} {})",
                on_true.width(),
                cond,
                on_true,
                on_false
            ),
            Expr::Concat { lhs, rhs } => write!(f, "(Concat w{} {} {})", self.width(), lhs, rhs),
            Expr::Extract {
                expr,
                offset,
                width,
            } => write!(f, "(Extract w{} {} {})", width, offset, expr),
            Expr::ZExt { expr, width } => write!(f, "(ZExt w{} {})", width, expr),
            Expr::SExt { expr, width } => write!(f, "(SExt w{} {})", width, expr),
            Expr::Cast { expr, signed } => {
                write!(f, "(Cast {} {})", if *signed { "s" } else { "u" }, expr)
            }
            Expr::Not(expr) => write!(f, "(Not {})", expr),
            Expr::Binary { op, lhs, rhs } => {
                write!(f, "({} w{} {} {})", op.name(), self.width(), lhs, rhs)
            }
            Expr::Cmp { op, lhs, rhs } => write!(f, "({} {} {})", op.name(), lhs, rhs),
        }
    }
}

/// Constructor for expression nodes. Width-composition invariants are
/// asserted here so malformed trees fail at the build site.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExprBuilder;

impl ExprBuilder {
    pub fn constant(&self, width: Width, value: u64) -> ExprRef {
        assert!(
            (1..=64).contains(&width),
            "constant width {} out of range",
            width
        );
        if width < 64 {
            assert!(
                value < (1u64 << width),
                "constant {:#x} does not fit in {} bits",
                value,
                width
            );
        }
        Rc::new(Expr::Constant { width, value })
    }

    pub fn read(&self, array: ArrayRef, index: ExprRef, width: Width) -> ExprRef {
        assert_eq!(
            index.width(),
            array.domain,
            "index width {} does not match domain of array {}",
            index.width(),
            array.name
        );
        assert!(
            width == WIDTH_BOOL || width % array.range == 0,
            "read width {} is not a multiple of the range of array {}",
            width,
            array.name
        );
        Rc::new(Expr::Read {
            array,
            index,
            width,
        })
    }

    pub fn select(&self, cond: ExprRef, on_true: ExprRef, on_false: ExprRef) -> ExprRef {
        assert_eq!(cond.width(), WIDTH_BOOL, "select condition must be boolean");
        assert_eq!(
            on_true.width(),
            on_false.width(),
            "select arms disagree on width"
        );
        Rc::new(Expr::Select {
            cond,
            on_true,
            on_false,
        })
    }

    pub fn concat(&self, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Rc::new(Expr::Concat { lhs, rhs })
    }

    pub fn extract(&self, expr: ExprRef, offset: Width, width: Width) -> ExprRef {
        assert!(
            offset + width <= expr.width(),
            "extract [{}, {}) exceeds operand width {}",
            offset,
            offset + width,
            expr.width()
        );
        Rc::new(Expr::Extract {
            expr,
            offset,
            width,
        })
    }

    pub fn zext(&self, expr: ExprRef, width: Width) -> ExprRef {
        Rc::new(Expr::ZExt { expr, width })
    }

    pub fn sext(&self, expr: ExprRef, width: Width) -> ExprRef {
        Rc::new(Expr::SExt { expr, width })
    }

    pub fn cast(&self, expr: ExprRef, signed: bool) -> ExprRef {
        Rc::new(Expr::Cast { expr, signed })
    }

    pub fn not(&self, expr: ExprRef) -> ExprRef {
        Rc::new(Expr::Not(expr))
    }

    pub fn binary(&self, op: BinaryOp, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        assert_eq!(
            lhs.width(),
            rhs.width(),
            "{} operands disagree on width",
            op.name()
        );
        Rc::new(Expr::Binary { op, lhs, rhs })
    }

    pub fn cmp(&self, op: CmpOp, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        assert_eq!(
            lhs.width(),
            rhs.width(),
            "{} operands disagree on width",
            op.name()
        );
        Rc::new(Expr::Cmp { op, lhs, rhs })
    }

    pub fn eq(&self, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        self.cmp(CmpOp::Eq, lhs, rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_array(name: &str, size: u64) -> ArrayRef {
        Array::new(name, 32, 8, size)
    }

    #[test]
    fn widths_compose() {
        let b = ExprBuilder;
        let arr = byte_array("x", 4);
        let idx = b.constant(32, 0);
        let r = b.read(arr.clone(), idx.clone(), 8);
        assert_eq!(r.width(), 8);

        let wide = b.concat(b.read(arr.clone(), b.constant(32, 1), 8), r.clone());
        assert_eq!(wide.width(), 16);

        assert_eq!(b.extract(wide.clone(), 8, 8).width(), 8);
        assert_eq!(b.zext(r.clone(), 32).width(), 32);
        assert_eq!(b.eq(r.clone(), b.constant(8, 0)).width(), WIDTH_BOOL);
    }

    #[test]
    fn value_equal_hashing() {
        use std::collections::HashSet;

        let b = ExprBuilder;
        let arr = byte_array("x", 4);
        let e1 = b.read(arr.clone(), b.constant(32, 0), 8);
        let e2 = b.read(byte_array("x", 4), b.constant(32, 0), 8);
        assert_eq!(e1, e2);

        let mut set = HashSet::new();
        set.insert(e1);
        assert!(set.contains(&e2));
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn constant_must_fit_width() {
        ExprBuilder.constant(8, 256);
    }

    #[test]
    fn display_is_one_line() {
        let b = ExprBuilder;
        let arr = byte_array("data_len", 4);
        let e = b.eq(
            b.constant(8, 0),
            b.read(arr, b.constant(32, 0), 8),
        );
        assert_eq!(e.to_string(), "(Eq (w8 0) (Read w8 (w32 0) data_len))");
    }
}
