//! Loader for call-path files.
//!
//! A file has three marker-delimited sections: the symbolic arrays, the
//! path constraints (kquery-style s-expressions over those arrays), and the
//! sequence of library calls with their symbolic arguments:
//!
//! ```text
//! ;;-- Arrays --
//! array data_len[4] : w32 -> w8 = symbolic
//!
//! ;;-- Constraints --
//! (Eq (w32 0) (ReadLSB w32 (w32 0) data_len))
//!
//! ;;-- Calls --
//! (call map_allocate
//!   (arg capacity (expr (w32 65536)))
//!   (arg map_out (before (w64 0)) (after (ReadLSB w64 (w32 0) map_ptr)))
//!   (ret (w32 1)))
//! ```

use anyhow::{bail, Context, Result};
use bdd_ir::call_path::{Arg, Call, CallPath};
use bdd_ir::{Array, ArrayRef, BinaryOp, CmpOp, Expr, ExprRef, Width, WIDTH_BOOL};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

pub fn parse_call_path_file(path: &Path) -> Result<CallPath> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read call path {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    parse_call_path(&file_name, &source)
        .with_context(|| format!("while parsing {}", path.display()))
}

pub fn parse_call_path(file_name: &str, source: &str) -> Result<CallPath> {
    let sections = split_sections(source)?;

    let mut parser = Parser {
        arrays: HashMap::new(),
    };

    for (line_no, line) in &sections.arrays {
        parser
            .parse_array_decl(line)
            .with_context(|| format!("line {}: bad array declaration", line_no))?;
    }

    let mut constraints = Vec::new();
    let mut tokens = TokenStream::new(&sections.constraints)?;
    while !tokens.at_end() {
        let line = tokens.peek_line();
        let constraint = parser.parse_expr(&mut tokens)?;
        if constraint.width() != WIDTH_BOOL {
            bail!("line {}: constraint is not boolean", line);
        }
        constraints.push(constraint);
    }

    let mut calls = Vec::new();
    let mut tokens = TokenStream::new(&sections.calls)?;
    while !tokens.at_end() {
        calls.push(parser.parse_call(&mut tokens)?);
    }

    Ok(CallPath {
        file_name: file_name.to_string(),
        constraints,
        calls,
    })
}

#[derive(Default)]
struct Sections {
    /// Array declarations, one per line, with their line numbers.
    arrays: Vec<(usize, String)>,
    constraints: Vec<(usize, String)>,
    calls: Vec<(usize, String)>,
}

fn split_sections(source: &str) -> Result<Sections> {
    #[derive(Clone, Copy, PartialEq)]
    enum Section {
        None,
        Arrays,
        Constraints,
        Calls,
    }

    let mut sections = Sections::default();
    let mut current = Section::None;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();

        if let Some(header) = line.strip_prefix(";;--") {
            current = match header.trim_end_matches("--").trim() {
                "Arrays" => Section::Arrays,
                "Constraints" => Section::Constraints,
                "Calls" => Section::Calls,
                other => bail!("line {}: unknown section {:?}", line_no, other),
            };
            continue;
        }

        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        match current {
            Section::None => bail!("line {}: content before the first section marker", line_no),
            Section::Arrays => sections.arrays.push((line_no, line.to_string())),
            Section::Constraints => sections.constraints.push((line_no, raw.to_string())),
            Section::Calls => sections.calls.push((line_no, raw.to_string())),
        }
    }

    Ok(sections)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokKind {
    LParen,
    RParen,
    Atom,
}

#[derive(Clone, Debug)]
struct Token {
    kind: TokKind,
    text: String,
    line: usize,
}

struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenStream {
    fn new(lines: &[(usize, String)]) -> Result<TokenStream> {
        let mut tokens = Vec::new();
        for (line_no, line) in lines {
            let mut chars = line.chars().peekable();
            while let Some(&c) = chars.peek() {
                match c {
                    ';' => break,
                    '(' => {
                        chars.next();
                        tokens.push(Token {
                            kind: TokKind::LParen,
                            text: "(".to_string(),
                            line: *line_no,
                        });
                    }
                    ')' => {
                        chars.next();
                        tokens.push(Token {
                            kind: TokKind::RParen,
                            text: ")".to_string(),
                            line: *line_no,
                        });
                    }
                    c if c.is_whitespace() => {
                        chars.next();
                    }
                    _ => {
                        let mut text = String::new();
                        while let Some(&c) = chars.peek() {
                            if c.is_whitespace() || c == '(' || c == ')' || c == ';' {
                                break;
                            }
                            text.push(c);
                            chars.next();
                        }
                        tokens.push(Token {
                            kind: TokKind::Atom,
                            text,
                            line: *line_no,
                        });
                    }
                }
            }
        }
        Ok(TokenStream { tokens, pos: 0 })
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_line(&self) -> usize {
        self.peek().map(|t| t.line).unwrap_or(0)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .context("unexpected end of input")?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, kind: TokKind) -> Result<Token> {
        let token = self.next()?;
        if token.kind != kind {
            bail!("line {}: expected {:?}, found {:?}", token.line, kind, token.text);
        }
        Ok(token)
    }

    fn atom(&mut self) -> Result<Token> {
        self.expect(TokKind::Atom)
    }

    /// True when the next token opens a list whose head atom is `head`.
    fn peek_list(&self, head: &str) -> bool {
        matches!(self.peek(), Some(t) if t.kind == TokKind::LParen)
            && matches!(
                self.tokens.get(self.pos + 1),
                Some(t) if t.kind == TokKind::Atom && t.text == head
            )
    }
}

struct Parser {
    arrays: HashMap<String, ArrayRef>,
}

impl Parser {
    /// `array NAME[SIZE] : wD -> wR = symbolic`
    fn parse_array_decl(&mut self, line: &str) -> Result<()> {
        let rest = line
            .strip_prefix("array ")
            .context("expected the `array` keyword")?;
        let open = rest.find('[').context("expected `[`")?;
        let close = rest.find(']').context("expected `]`")?;
        let name = rest[..open].trim();
        let size: u64 = rest[open + 1..close].trim().parse().context("bad size")?;

        let mut tail = rest[close + 1..].split_whitespace();
        let colon = tail.next().context("truncated declaration")?;
        let domain = tail.next().context("missing domain width")?;
        let arrow = tail.next().context("truncated declaration")?;
        let range = tail.next().context("missing range width")?;
        let eq = tail.next().context("truncated declaration")?;
        let kind = tail.next().context("missing array kind")?;

        if colon != ":" || arrow != "->" || eq != "=" || kind != "symbolic" {
            bail!("malformed declaration");
        }

        let domain = parse_width_text(domain).context("bad domain width")?;
        let range = parse_width_text(range).context("bad range width")?;

        let array = Array::new(name, domain, range, size);
        if let Some(existing) = self.arrays.get(name) {
            if **existing != *array {
                bail!("array {} redeclared with a different shape", name);
            }
            return Ok(());
        }
        self.arrays.insert(name.to_string(), array);
        Ok(())
    }

    fn parse_expr(&mut self, tokens: &mut TokenStream) -> Result<ExprRef> {
        tokens.expect(TokKind::LParen)?;
        let head = tokens.atom()?;

        let expr = if let Ok(width) = parse_width_text(&head.text) {
            // (wN value)
            let value_tok = tokens.atom()?;
            let value = parse_value_text(&value_tok.text)
                .with_context(|| format!("line {}: bad constant", value_tok.line))?;
            if width < 64 && value >= (1u64 << width) {
                bail!(
                    "line {}: constant {} does not fit w{}",
                    value_tok.line,
                    value,
                    width
                );
            }
            Rc::new(Expr::Constant { width, value })
        } else {
            match head.text.as_str() {
                "Read" | "ReadLSB" => {
                    let width = self.parse_width(tokens)?;
                    let index = self.parse_expr(tokens)?;
                    let name = tokens.atom()?;
                    let array = self
                        .arrays
                        .get(&name.text)
                        .with_context(|| {
                            format!("line {}: unknown array {}", name.line, name.text)
                        })?
                        .clone();
                    if index.width() != array.domain {
                        bail!(
                            "line {}: index width w{} does not match array {} domain w{}",
                            name.line,
                            index.width(),
                            name.text,
                            array.domain
                        );
                    }
                    if width != WIDTH_BOOL && width % array.range != 0 {
                        bail!(
                            "line {}: read width w{} is not a multiple of array {} range w{}",
                            name.line,
                            width,
                            name.text,
                            array.range
                        );
                    }
                    Rc::new(Expr::Read {
                        array,
                        index,
                        width,
                    })
                }
                "Select" => {
                    let width = self.parse_width(tokens)?;
                    let cond = self.parse_expr(tokens)?;
                    let on_true = self.parse_expr(tokens)?;
                    let on_false = self.parse_expr(tokens)?;
                    if cond.width() != WIDTH_BOOL {
                        bail!("line {}: select condition is not boolean", head.line);
                    }
                    self.check_width(&head, width, on_true.width())?;
                    self.check_width(&head, width, on_false.width())?;
                    Rc::new(Expr::Select {
                        cond,
                        on_true,
                        on_false,
                    })
                }
                "Concat" => {
                    let width = self.parse_width(tokens)?;
                    let lhs = self.parse_expr(tokens)?;
                    let rhs = self.parse_expr(tokens)?;
                    self.check_width(&head, width, lhs.width() + rhs.width())?;
                    Rc::new(Expr::Concat { lhs, rhs })
                }
                "Extract" => {
                    let width = self.parse_width(tokens)?;
                    let offset_tok = tokens.atom()?;
                    let offset: Width = offset_tok
                        .text
                        .parse()
                        .with_context(|| format!("line {}: bad offset", offset_tok.line))?;
                    let expr = self.parse_expr(tokens)?;
                    if offset + width > expr.width() {
                        bail!(
                            "line {}: extract [{}, {}) exceeds operand width w{}",
                            head.line,
                            offset,
                            offset + width,
                            expr.width()
                        );
                    }
                    Rc::new(Expr::Extract {
                        expr,
                        offset,
                        width,
                    })
                }
                "ZExt" => {
                    let width = self.parse_width(tokens)?;
                    let expr = self.parse_expr(tokens)?;
                    Rc::new(Expr::ZExt { expr, width })
                }
                "SExt" => {
                    let width = self.parse_width(tokens)?;
                    let expr = self.parse_expr(tokens)?;
                    Rc::new(Expr::SExt { expr, width })
                }
                "Not" => {
                    let expr = self.parse_expr(tokens)?;
                    Rc::new(Expr::Not(expr))
                }
                name => {
                    if let Some(op) = binary_op(name) {
                        let width = self.parse_width(tokens)?;
                        let lhs = self.parse_expr(tokens)?;
                        let rhs = self.parse_expr(tokens)?;
                        self.check_width(&head, lhs.width(), rhs.width())?;
                        self.check_width(&head, width, lhs.width())?;
                        Rc::new(Expr::Binary { op, lhs, rhs })
                    } else if let Some(op) = cmp_op(name) {
                        let lhs = self.parse_expr(tokens)?;
                        let rhs = self.parse_expr(tokens)?;
                        self.check_width(&head, lhs.width(), rhs.width())?;
                        Rc::new(Expr::Cmp { op, lhs, rhs })
                    } else {
                        bail!("line {}: unknown operator {}", head.line, name);
                    }
                }
            }
        };

        tokens.expect(TokKind::RParen)?;
        Ok(expr)
    }

    fn parse_width(&self, tokens: &mut TokenStream) -> Result<Width> {
        let token = tokens.atom()?;
        parse_width_text(&token.text)
            .with_context(|| format!("line {}: expected a width, found {}", token.line, token.text))
    }

    fn check_width(&self, at: &Token, expected: Width, found: Width) -> Result<()> {
        if expected != found {
            bail!(
                "line {}: {} width mismatch: w{} vs w{}",
                at.line,
                at.text,
                expected,
                found
            );
        }
        Ok(())
    }

    /// `(call NAME (arg N fields...) (extra N fields...) (ret E))`
    fn parse_call(&mut self, tokens: &mut TokenStream) -> Result<Call> {
        tokens.expect(TokKind::LParen)?;
        let keyword = tokens.atom()?;
        if keyword.text != "call" {
            bail!("line {}: expected a call, found {}", keyword.line, keyword.text);
        }
        let name = tokens.atom()?;

        let mut call = Call {
            function_name: name.text,
            ..Call::default()
        };

        loop {
            if tokens.peek_list("arg") {
                tokens.expect(TokKind::LParen)?;
                tokens.atom()?;
                let arg_name = tokens.atom()?;
                let arg = self.parse_arg_fields(tokens)?;
                if call.args.insert(arg_name.text.clone(), arg).is_some() {
                    bail!("line {}: argument {} repeated", arg_name.line, arg_name.text);
                }
                tokens.expect(TokKind::RParen)?;
            } else if tokens.peek_list("extra") {
                tokens.expect(TokKind::LParen)?;
                tokens.atom()?;
                let var_name = tokens.atom()?;
                let arg = self.parse_arg_fields(tokens)?;
                if arg.expr.is_some() {
                    bail!("line {}: extra vars carry before/after only", var_name.line);
                }
                call.extra_vars
                    .insert(var_name.text.clone(), (arg.before, arg.after));
                tokens.expect(TokKind::RParen)?;
            } else if tokens.peek_list("ret") {
                tokens.expect(TokKind::LParen)?;
                tokens.atom()?;
                call.ret = Some(self.parse_expr(tokens)?);
                tokens.expect(TokKind::RParen)?;
            } else {
                break;
            }
        }

        tokens.expect(TokKind::RParen)?;
        Ok(call)
    }

    fn parse_arg_fields(&mut self, tokens: &mut TokenStream) -> Result<Arg> {
        let mut arg = Arg::default();
        loop {
            let field = if tokens.peek_list("expr") {
                "expr"
            } else if tokens.peek_list("before") {
                "before"
            } else if tokens.peek_list("after") {
                "after"
            } else {
                break;
            };
            tokens.expect(TokKind::LParen)?;
            tokens.atom()?;
            let value = self.parse_expr(tokens)?;
            match field {
                "expr" => arg.expr = Some(value),
                "before" => arg.before = Some(value),
                _ => arg.after = Some(value),
            }
            tokens.expect(TokKind::RParen)?;
        }
        Ok(arg)
    }
}

fn binary_op(name: &str) -> Option<BinaryOp> {
    let op = match name {
        "Add" => BinaryOp::Add,
        "Sub" => BinaryOp::Sub,
        "Mul" => BinaryOp::Mul,
        "UDiv" => BinaryOp::UDiv,
        "SDiv" => BinaryOp::SDiv,
        "URem" => BinaryOp::URem,
        "SRem" => BinaryOp::SRem,
        "And" => BinaryOp::And,
        "Or" => BinaryOp::Or,
        "Xor" => BinaryOp::Xor,
        "Shl" => BinaryOp::Shl,
        "LShr" => BinaryOp::LShr,
        "AShr" => BinaryOp::AShr,
        _ => return None,
    };
    Some(op)
}

fn cmp_op(name: &str) -> Option<CmpOp> {
    let op = match name {
        "Eq" => CmpOp::Eq,
        "Ne" => CmpOp::Ne,
        "Ult" => CmpOp::Ult,
        "Ule" => CmpOp::Ule,
        "Ugt" => CmpOp::Ugt,
        "Uge" => CmpOp::Uge,
        "Slt" => CmpOp::Slt,
        "Sle" => CmpOp::Sle,
        "Sgt" => CmpOp::Sgt,
        "Sge" => CmpOp::Sge,
        _ => return None,
    };
    Some(op)
}

fn parse_width_text(text: &str) -> Result<Width> {
    let digits = text.strip_prefix('w').context("widths are written wN")?;
    let width: Width = digits.parse().context("bad width")?;
    if width == 0 || width > 64 {
        bail!("width w{} out of range", width);
    }
    Ok(width)
}

fn parse_value_text(text: &str) -> Result<u64> {
    if let Some(hex) = text.strip_prefix("0x") {
        Ok(u64::from_str_radix(hex, 16)?)
    } else {
        Ok(text.parse()?)
    }
}
