//! Typed AST for the generated C program. Expression nodes carry their own
//! wrapping and line-termination flags so a parent can embed a child without
//! re-deriving how it must be rendered; rendering is plain text into a
//! string buffer.

use crate::{Width, WIDTH_BOOL};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CPrimitive {
    Bool,
    U8,
    U16,
    U32,
    U64,
}

impl CPrimitive {
    pub fn name(&self) -> &'static str {
        match self {
            CPrimitive::Bool => "bool",
            CPrimitive::U8 => "uint8_t",
            CPrimitive::U16 => "uint16_t",
            CPrimitive::U32 => "uint32_t",
            CPrimitive::U64 => "uint64_t",
        }
    }

    pub fn width(&self) -> Width {
        match self {
            CPrimitive::Bool => WIDTH_BOOL,
            CPrimitive::U8 => 8,
            CPrimitive::U16 => 16,
            CPrimitive::U32 => 32,
            CPrimitive::U64 => 64,
        }
    }

    pub fn signed_name(&self) -> &'static str {
        match self {
            CPrimitive::Bool | CPrimitive::U8 => "int8_t",
            CPrimitive::U16 => "int16_t",
            CPrimitive::U32 => "int32_t",
            CPrimitive::U64 => "int64_t",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CType {
    Primitive(CPrimitive),
    Named(String),
    Pointer(Box<CType>),
    Array { elem: Box<CType>, size: u64 },
}

impl CType {
    pub fn named(name: impl Into<String>) -> CType {
        CType::Named(name.into())
    }

    pub fn pointer(inner: CType) -> CType {
        CType::Pointer(Box::new(inner))
    }

    /// Map a bit-vector width to the primitive type of the same width, or a
    /// byte array for wider byte-multiple widths.
    pub fn from_width(width: Width) -> CType {
        match width {
            WIDTH_BOOL => CType::Primitive(CPrimitive::Bool),
            8 => CType::Primitive(CPrimitive::U8),
            16 => CType::Primitive(CPrimitive::U16),
            32 => CType::Primitive(CPrimitive::U32),
            64 => CType::Primitive(CPrimitive::U64),
            _ => {
                assert!(width % 8 == 0, "width {} is not a byte multiple", width);
                CType::Array {
                    elem: Box::new(CType::Primitive(CPrimitive::U8)),
                    size: u64::from(width / 8),
                }
            }
        }
    }

    pub fn width(&self) -> Option<Width> {
        match self {
            CType::Primitive(p) => Some(p.width()),
            CType::Named(_) => None,
            CType::Pointer(_) => Some(64),
            CType::Array { elem, size } => {
                elem.width().map(|w| w * u32::try_from(*size).unwrap())
            }
        }
    }

    pub fn render(&self) -> String {
        match self {
            CType::Primitive(p) => p.name().to_string(),
            CType::Named(name) => name.clone(),
            CType::Pointer(inner) => format!("{}*", inner.render()),
            CType::Array { elem, .. } => format!("{}*", elem.render()),
        }
    }

    /// Render a declaration of `symbol` with this type, placing array sizes
    /// after the symbol as C requires.
    pub fn render_decl(&self, symbol: &str) -> String {
        match self {
            CType::Array { elem, size } => format!("{} {}[{}]", elem.render(), symbol, size),
            _ => format!("{} {}", self.render(), symbol),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CBinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CBinOp::Add => "+",
            CBinOp::Sub => "-",
            CBinOp::Mul => "*",
            CBinOp::Div => "/",
            CBinOp::Mod => "%",
            CBinOp::And => "&",
            CBinOp::Or => "|",
            CBinOp::Xor => "^",
            CBinOp::Shl => "<<",
            CBinOp::Shr => ">>",
            CBinOp::Eq => "==",
            CBinOp::Ne => "!=",
            CBinOp::Lt => "<",
            CBinOp::Le => "<=",
            CBinOp::Gt => ">",
            CBinOp::Ge => ">=",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            CBinOp::Eq | CBinOp::Ne | CBinOp::Lt | CBinOp::Le | CBinOp::Gt | CBinOp::Ge
        )
    }
}

#[derive(Clone, Debug)]
pub enum CExprKind {
    Unsigned {
        kind: CPrimitive,
        value: u64,
        hex: bool,
    },
    Signed {
        value: i64,
    },
    Variable {
        symbol: String,
        ty: CType,
    },
    /// Byte-indexed read out of a variable: `(var >> index*8) & mask`.
    Read {
        var: Box<CExpr>,
        ty: CType,
        index: Box<CExpr>,
    },
    Concat {
        lhs: Box<CExpr>,
        rhs: Box<CExpr>,
        ty: CType,
    },
    Select {
        cond: Box<CExpr>,
        on_true: Box<CExpr>,
        on_false: Box<CExpr>,
    },
    Cast {
        expr: Box<CExpr>,
        ty: CType,
    },
    /// Reinterpret the operand as the signed type of the same width.
    SignedCast {
        expr: Box<CExpr>,
    },
    Not(Box<CExpr>),
    Binary {
        op: CBinOp,
        lhs: Box<CExpr>,
        rhs: Box<CExpr>,
    },
    AddressOf(Box<CExpr>),
    FunctionCall {
        name: String,
        args: Vec<CExpr>,
    },
    VariableDecl {
        symbol: String,
        ty: CType,
    },
    Assignment {
        target: Box<CExpr>,
        value: Box<CExpr>,
    },
}

#[derive(Clone, Debug)]
pub struct CExpr {
    pub kind: CExprKind,
    wrap: bool,
    terminate_line: bool,
}

fn embed(mut e: CExpr) -> Box<CExpr> {
    e.set_terminate_line(false);
    Box::new(e)
}

impl CExpr {
    fn new(kind: CExprKind, wrap: bool) -> CExpr {
        CExpr {
            kind,
            wrap,
            terminate_line: true,
        }
    }

    pub fn set_wrap(&mut self, wrap: bool) {
        self.wrap = wrap;
    }

    pub fn set_terminate_line(&mut self, terminate: bool) {
        self.terminate_line = terminate;
    }

    pub fn unsigned(kind: CPrimitive, value: u64) -> CExpr {
        CExpr::new(
            CExprKind::Unsigned {
                kind,
                value,
                hex: false,
            },
            false,
        )
    }

    pub fn unsigned_hex(kind: CPrimitive, value: u64) -> CExpr {
        CExpr::new(
            CExprKind::Unsigned {
                kind,
                value,
                hex: true,
            },
            false,
        )
    }

    pub fn signed(value: i64) -> CExpr {
        CExpr::new(CExprKind::Signed { value }, false)
    }

    pub fn variable(symbol: impl Into<String>, ty: CType) -> CExpr {
        CExpr::new(
            CExprKind::Variable {
                symbol: symbol.into(),
                ty,
            },
            false,
        )
    }

    pub fn read(var: CExpr, ty: CType, index: CExpr) -> CExpr {
        CExpr::new(
            CExprKind::Read {
                var: embed(var),
                ty,
                index: embed(index),
            },
            true,
        )
    }

    pub fn concat(lhs: CExpr, rhs: CExpr, ty: CType) -> CExpr {
        CExpr::new(
            CExprKind::Concat {
                lhs: embed(lhs),
                rhs: embed(rhs),
                ty,
            },
            true,
        )
    }

    pub fn select(cond: CExpr, on_true: CExpr, on_false: CExpr) -> CExpr {
        CExpr::new(
            CExprKind::Select {
                cond: embed(cond),
                on_true: embed(on_true),
                on_false: embed(on_false),
            },
            true,
        )
    }

    pub fn cast(expr: CExpr, ty: CType) -> CExpr {
        CExpr::new(
            CExprKind::Cast {
                expr: embed(expr),
                ty,
            },
            true,
        )
    }

    pub fn signed_cast(expr: CExpr) -> CExpr {
        CExpr::new(CExprKind::SignedCast { expr: embed(expr) }, true)
    }

    pub fn not(expr: CExpr) -> CExpr {
        CExpr::new(CExprKind::Not(embed(expr)), true)
    }

    pub fn binary(op: CBinOp, lhs: CExpr, rhs: CExpr) -> CExpr {
        CExpr::new(
            CExprKind::Binary {
                op,
                lhs: embed(lhs),
                rhs: embed(rhs),
            },
            true,
        )
    }

    pub fn address_of(expr: CExpr) -> CExpr {
        CExpr::new(CExprKind::AddressOf(embed(expr)), false)
    }

    pub fn function_call(name: impl Into<String>, args: Vec<CExpr>) -> CExpr {
        let args = args
            .into_iter()
            .map(|mut a| {
                a.set_terminate_line(false);
                a
            })
            .collect();
        CExpr::new(
            CExprKind::FunctionCall {
                name: name.into(),
                args,
            },
            false,
        )
    }

    pub fn variable_decl(symbol: impl Into<String>, ty: CType) -> CExpr {
        CExpr::new(
            CExprKind::VariableDecl {
                symbol: symbol.into(),
                ty,
            },
            false,
        )
    }

    pub fn assignment(target: CExpr, value: CExpr) -> CExpr {
        CExpr::new(
            CExprKind::Assignment {
                target: embed(target),
                value: embed(value),
            },
            false,
        )
    }

    /// Best-effort type of the rendered expression, used to check width
    /// preservation through the transpiler.
    pub fn ty(&self) -> Option<CType> {
        match &self.kind {
            CExprKind::Unsigned { kind, .. } => Some(CType::Primitive(*kind)),
            CExprKind::Signed { .. } => Some(CType::named("int")),
            CExprKind::Variable { ty, .. }
            | CExprKind::Read { ty, .. }
            | CExprKind::Concat { ty, .. }
            | CExprKind::Cast { ty, .. }
            | CExprKind::VariableDecl { ty, .. } => Some(ty.clone()),
            CExprKind::SignedCast { expr } => match expr.ty()? {
                CType::Primitive(p) => Some(CType::named(p.signed_name())),
                other => Some(other),
            },
            CExprKind::Select { on_true, .. } => on_true.ty(),
            CExprKind::Not(_) => Some(CType::Primitive(CPrimitive::Bool)),
            CExprKind::Binary { op, lhs, rhs } => {
                if op.is_comparison() {
                    Some(CType::Primitive(CPrimitive::Bool))
                } else {
                    lhs.ty().or_else(|| rhs.ty())
                }
            }
            CExprKind::AddressOf(inner) => inner.ty().map(CType::pointer),
            CExprKind::FunctionCall { .. } => None,
            CExprKind::Assignment { target, .. } => target.ty(),
        }
    }

    pub fn emit(&self, out: &mut String, lvl: usize) {
        out.push_str(&" ".repeat(lvl));
        if self.wrap {
            out.push('(');
        }
        self.emit_kind(out);
        if self.wrap {
            out.push(')');
        }
        if self.terminate_line {
            out.push(';');
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.emit(&mut out, 0);
        out
    }

    fn emit_kind(&self, out: &mut String) {
        match &self.kind {
            CExprKind::Unsigned { value, hex, .. } => {
                if *hex {
                    out.push_str(&format!("{:#x}u", value));
                } else {
                    out.push_str(&format!("{}", value));
                }
            }
            CExprKind::Signed { value } => out.push_str(&format!("{}", value)),
            CExprKind::Variable { symbol, .. } => out.push_str(symbol),
            CExprKind::Read { var, ty, index } => {
                let mask_width = ty.width().expect("read type must have a width");
                let mask = if mask_width >= 64 {
                    u64::MAX
                } else {
                    (1u64 << mask_width) - 1
                };
                out.push('(');
                var.emit(out, 0);
                out.push_str(" >> ");
                match &index.kind {
                    CExprKind::Unsigned { value, .. } => {
                        out.push_str(&format!("{}", value * 8));
                    }
                    _ => {
                        out.push('(');
                        index.emit(out, 0);
                        out.push_str(" * 8)");
                    }
                }
                out.push_str(&format!(") & {:#x}", mask));
            }
            CExprKind::Concat { lhs, rhs, .. } => {
                let shift = rhs
                    .ty()
                    .and_then(|t| t.width())
                    .expect("concat rhs must have a width");
                out.push('(');
                lhs.emit(out, 0);
                out.push_str(&format!(" << {}) | ", shift));
                rhs.emit(out, 0);
            }
            CExprKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                cond.emit(out, 0);
                out.push_str(" ? ");
                on_true.emit(out, 0);
                out.push_str(" : ");
                on_false.emit(out, 0);
            }
            CExprKind::Cast { expr, ty } => {
                out.push_str(&format!("({})", ty.render()));
                expr.emit(out, 0);
            }
            CExprKind::SignedCast { expr } => {
                let ty = expr
                    .ty()
                    .expect("signed cast applied to an untyped expression");
                let name = match ty {
                    CType::Primitive(p) => p.signed_name().to_string(),
                    other => other.render(),
                };
                out.push_str(&format!("({})", name));
                expr.emit(out, 0);
            }
            CExprKind::Not(expr) => {
                out.push('!');
                expr.emit(out, 0);
            }
            CExprKind::Binary { op, lhs, rhs } => {
                lhs.emit(out, 0);
                out.push_str(&format!(" {} ", op.symbol()));
                rhs.emit(out, 0);
            }
            CExprKind::AddressOf(expr) => {
                out.push('&');
                expr.emit(out, 0);
            }
            CExprKind::FunctionCall { name, args } => {
                out.push_str(name);
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    arg.emit(out, 0);
                }
                out.push(')');
            }
            CExprKind::VariableDecl { symbol, ty } => {
                out.push_str(&ty.render_decl(symbol));
            }
            CExprKind::Assignment { target, value } => {
                target.emit(out, 0);
                out.push_str(" = ");
                value.emit(out, 0);
            }
        }
    }
}

#[derive(Clone, Debug)]
pub enum CStmt {
    Expr(CExpr),
    Block(Vec<CStmt>),
    Branch {
        condition: CExpr,
        on_true: Vec<CStmt>,
        on_false: Vec<CStmt>,
    },
    Return(CExpr),
}

impl CStmt {
    pub fn emit(&self, out: &mut String, lvl: usize) {
        let indent = " ".repeat(lvl);
        match self {
            CStmt::Expr(e) => {
                e.emit(out, lvl);
                out.push('\n');
            }
            CStmt::Block(stmts) => {
                for stmt in stmts {
                    stmt.emit(out, lvl);
                }
            }
            CStmt::Branch {
                condition,
                on_true,
                on_false,
            } => {
                let mut cond = condition.clone();
                cond.set_wrap(false);
                cond.set_terminate_line(false);
                let comment = cond.render();

                out.push('\n');
                out.push_str(&indent);
                out.push_str("if (");
                cond.emit(out, 0);
                out.push_str(") {\n");
                for stmt in on_true {
                    stmt.emit(out, lvl + 2);
                }
                out.push_str(&indent);
                out.push_str("}\n\n");
                out.push_str(&indent);
                out.push_str("else {\n");
                for stmt in on_false {
                    stmt.emit(out, lvl + 2);
                }
                out.push_str(&indent);
                out.push_str(&format!("}} // {}\n", comment));
            }
            CStmt::Return(value) => {
                let mut value = value.clone();
                value.set_wrap(false);
                value.set_terminate_line(false);
                out.push_str(&indent);
                out.push_str("return ");
                value.emit(out, 0);
                out.push_str(";\n");
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct CFunctionArg {
    pub symbol: String,
    pub ty: CType,
}

#[derive(Clone, Debug)]
pub struct CFunction {
    pub name: String,
    pub args: Vec<CFunctionArg>,
    pub ret: CType,
    pub body: Vec<CStmt>,
}

impl CFunction {
    pub fn emit(&self, out: &mut String) {
        out.push_str(&format!("{} {}(", self.ret.render(), self.name));
        if self.args.is_empty() {
            out.push_str("void");
        }
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&arg.ty.render_decl(&arg.symbol));
        }
        out.push_str(") {\n");
        for stmt in &self.body {
            stmt.emit(out, 2);
        }
        out.push_str("}\n");
    }
}

#[derive(Clone, Debug)]
pub struct CInclude {
    pub path: String,
    /// `#include "path"` when true, `#include <path>` otherwise.
    pub relative: bool,
}

impl CInclude {
    pub fn system(path: impl Into<String>) -> CInclude {
        CInclude {
            path: path.into(),
            relative: false,
        }
    }

    pub fn local(path: impl Into<String>) -> CInclude {
        CInclude {
            path: path.into(),
            relative: true,
        }
    }
}

/// A full generated translation unit: includes, global state, functions.
#[derive(Clone, Debug, Default)]
pub struct CUnit {
    pub includes: Vec<CInclude>,
    pub state: Vec<(String, CType)>,
    pub functions: Vec<CFunction>,
}

impl CUnit {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for include in &self.includes {
            if include.relative {
                out.push_str(&format!("#include \"{}\"\n", include.path));
            } else {
                out.push_str(&format!("#include <{}>\n", include.path));
            }
        }
        if !self.state.is_empty() {
            out.push('\n');
        }
        for (symbol, ty) in &self.state {
            out.push_str(&format!("{};\n", ty.render_decl(symbol)));
        }
        for function in &self.functions {
            out.push('\n');
            function.emit(&mut out);
        }
        out
    }
}
