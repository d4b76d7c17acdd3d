//! Recursive-descent parser for the C subset
//!
//! Consumes the token stream from [`crate::lexer`] and produces a
//! [`TranslationUnit`]. The grammar covers what the analyzer models:
//! declarations with pointers, arrays, and function declarators,
//! struct/union/enum definitions, typedefs, the full statement set, and
//! expressions down to GNU statement expressions.
//!
//! Parse errors inside a function body are recoverable: the function is
//! skipped, an issue is recorded, and parsing resumes at the next
//! top-level definition. Errors at top level synchronize to the next
//! `;` or `}`.

use crate::ast::{
    BinaryOp, CmpOp, Declaration, Expr, ExprKind, FunctionDef, LogOp, ParseIssue, PostOp, Stmt,
    StmtKind, SymId, Symbol, SymbolTable, TopLevel, TranslationUnit, UnOp,
};
use crate::ctype::{CType, StructDef, TypeTable};
use crate::lexer::{Token, TokKind, tokenize};
use crate::position::Pos;
use sift_core::IntType;
use std::collections::HashMap;
use std::rc::Rc;

const TYPE_KEYWORDS: &[&str] = &[
    "void", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "_Bool",
    "struct", "union", "enum", "const", "volatile", "static", "extern", "inline", "register",
    "typedef", "__restrict", "restrict",
];

/// Storage-class and qualifier flags collected from declaration
/// specifiers.
#[derive(Debug, Default, Clone, Copy)]
struct Specs {
    is_static: bool,
    is_extern: bool,
    is_typedef: bool,
}

/// Result of parsing one declarator.
struct DeclResult {
    name: Option<String>,
    ty: CType,
    /// Set when the outermost derivation was a function: parameter
    /// names, types, positions, and whether `...` appeared.
    fn_params: Option<(Vec<(Option<String>, CType, Pos)>, bool)>,
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: Rc<str>,
    symbols: SymbolTable,
    types: TypeTable,
    scopes: Vec<HashMap<String, SymId>>,
    issues: Vec<ParseIssue>,
    anon_counter: u32,
}

impl Parser {
    pub fn new(file: &str, source: &str) -> Result<Self, String> {
        let tokens = tokenize(source)?;
        Ok(Parser {
            tokens,
            pos: 0,
            file: Rc::from(file),
            symbols: SymbolTable::new(),
            types: TypeTable::new(),
            scopes: vec![HashMap::new()],
            issues: Vec::new(),
            anon_counter: 0,
        })
    }

    /// Parse the whole translation unit. Function-level errors are
    /// collected into `issues` rather than failing the unit.
    pub fn parse(mut self) -> TranslationUnit {
        let mut toplevels = Vec::new();

        while !self.at_end() {
            match self.parse_toplevel(&mut toplevels) {
                Ok(()) => {}
                Err(msg) => {
                    let pos = self.here();
                    self.issues.push(ParseIssue { pos, message: msg });
                    self.synchronize_toplevel();
                }
            }
            // Error paths may bail out of nested blocks; only the file
            // scope survives between top-level items.
            self.scopes.truncate(1);
        }

        TranslationUnit {
            file: self.file,
            toplevels,
            symbols: Rc::new(self.symbols),
            types: self.types,
            issues: self.issues,
        }
    }

    fn parse_toplevel(&mut self, out: &mut Vec<TopLevel>) -> Result<(), String> {
        if self.consume_punct(";") {
            return Ok(());
        }

        let (base, specs) = self
            .parse_decl_specs()?
            .ok_or_else(|| format!("expected declaration, found {}", self.describe_here()))?;

        // Bare `struct foo { ... };` or `enum bar { ... };`
        if self.consume_punct(";") {
            return Ok(());
        }

        if specs.is_typedef {
            let d = self.parse_declarator(base)?;
            let name = d.name.ok_or("typedef requires a name")?;
            self.types.define_typedef(&name, d.ty);
            self.expect_punct(";")?;
            return Ok(());
        }

        let first = self.parse_declarator(base.clone())?;

        // Function definition?
        if let Some((params, variadic)) = &first.fn_params
            && self.peek_punct("{")
        {
            let name = first.name.clone().ok_or("function definition requires a name")?;
            let ret = match &first.ty {
                CType::Func { ret, .. } => ret.as_ref().clone(),
                _ => CType::Unknown,
            };
            let fn_pos = self.here();
            let fn_sym = self.declare(
                &name,
                CType::Func {
                    ret: Box::new(ret.clone()),
                    params: params.iter().map(|(_, t, _)| t.clone()).collect(),
                    variadic: *variadic,
                },
                specs.is_static,
                None,
                fn_pos.clone(),
            );

            self.enter_scope();
            let mut param_syms = Vec::new();
            for (i, (pname, pty, ppos)) in params.clone().into_iter().enumerate() {
                if let Some(pname) = pname {
                    let id = self.declare(&pname, pty, false, Some(i), ppos);
                    param_syms.push(id);
                }
            }

            let brace_at = self.pos;
            match self.parse_stmt() {
                Ok(body) => {
                    self.leave_scope();
                    out.push(TopLevel::Func(FunctionDef {
                        name,
                        sym: fn_sym,
                        params: param_syms,
                        ret,
                        body,
                        pos: fn_pos,
                        is_static: specs.is_static,
                    }));
                }
                Err(msg) => {
                    self.leave_scope();
                    let pos = self.here();
                    self.issues.push(ParseIssue {
                        pos,
                        message: format!("in function '{}': {}", name, msg),
                    });
                    self.pos = brace_at;
                    self.skip_balanced_braces();
                }
            }
            return Ok(());
        }

        // Global declaration list.
        let mut d = first;
        loop {
            if let Some(name) = &d.name {
                let pos = self.here();
                let sym = self.declare(name, d.ty.clone(), specs.is_static, None, pos.clone());
                let assign = if self.consume_punct("=") {
                    let init = self.parse_initializer()?;
                    Some(self.make_decl_assign(sym, name, &d.ty, init))
                } else {
                    None
                };
                // Prototypes and extern objects are recorded as symbols only.
                let is_proto = matches!(d.ty, CType::Func { .. });
                if !is_proto && !specs.is_extern {
                    out.push(TopLevel::Decl(Declaration { sym, pos, assign }));
                }
            }
            if self.consume_punct(",") {
                d = self.parse_declarator(base.clone())?;
                continue;
            }
            break;
        }
        self.expect_punct(";")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Declaration specifiers and declarators
    // ------------------------------------------------------------------

    /// Parse declaration specifiers. Returns `None` when the cursor is
    /// not at a declaration (used to tell statements from declarations).
    fn parse_decl_specs(&mut self) -> Result<Option<(CType, Specs)>, String> {
        let mut specs = Specs::default();
        let mut signedness: Option<bool> = None;
        let mut base: Option<CType> = None;
        let mut long_count = 0u32;
        let mut short_seen = false;
        let mut saw_any = false;

        loop {
            let word = match self.peek_ident() {
                Some(w) => w.to_string(),
                None => break,
            };
            match word.as_str() {
                "static" => specs.is_static = true,
                "extern" => specs.is_extern = true,
                "typedef" => specs.is_typedef = true,
                "const" | "volatile" | "inline" | "register" | "__restrict" | "restrict" => {}
                "unsigned" => signedness = Some(false),
                "signed" => signedness = Some(true),
                "void" => base = Some(CType::Void),
                "char" => base = Some(CType::Int(IntType::CHAR)),
                "short" => short_seen = true,
                "int" => base = base.or(Some(CType::int())),
                "long" => long_count += 1,
                "float" => base = Some(CType::Float { bits: 32 }),
                "double" => base = Some(CType::Float { bits: 64 }),
                "_Bool" => base = Some(CType::Int(IntType::BOOL)),
                "struct" | "union" => {
                    self.advance();
                    base = Some(self.parse_struct_spec(word == "union")?);
                    saw_any = true;
                    continue;
                }
                "enum" => {
                    self.advance();
                    base = Some(self.parse_enum_spec()?);
                    saw_any = true;
                    continue;
                }
                other => {
                    // A typedef name acts as the base type, but only if no
                    // base has been seen yet.
                    if base.is_none() && !short_seen && long_count == 0 && signedness.is_none() {
                        if let Some(ty) = self.types.typedef(other).cloned() {
                            base = Some(ty);
                            self.advance();
                            saw_any = true;
                            continue;
                        }
                    }
                    break;
                }
            }
            saw_any = true;
            self.advance();
        }

        if !saw_any {
            return Ok(None);
        }

        let ty = match base {
            Some(CType::Int(t)) => {
                if t.bits == 1 {
                    CType::Int(IntType::BOOL)
                } else {
                    let bits = if short_seen {
                        16
                    } else if long_count > 0 {
                        64
                    } else {
                        t.bits
                    };
                    CType::Int(IntType::new(bits, signedness.unwrap_or(t.signed)))
                }
            }
            Some(other) => other,
            None => {
                // `unsigned`, `short`, `long` and friends without `int`.
                let bits = if short_seen {
                    16
                } else if long_count > 0 {
                    64
                } else {
                    32
                };
                CType::Int(IntType::new(bits, signedness.unwrap_or(true)))
            }
        };

        Ok(Some((ty, specs)))
    }

    fn parse_struct_spec(&mut self, is_union: bool) -> Result<CType, String> {
        let tag = match self.take_ident() {
            Some(name) => name,
            None => {
                self.anon_counter += 1;
                format!("<anon{}>", self.anon_counter)
            }
        };

        if self.consume_punct("{") {
            let mut members = Vec::new();
            while !self.peek_punct("}") {
                let (base, _) = self
                    .parse_decl_specs()?
                    .ok_or_else(|| format!("expected member declaration, found {}", self.describe_here()))?;
                loop {
                    let d = self.parse_declarator(base.clone())?;
                    if let Some(name) = d.name {
                        members.push((name, d.ty));
                    }
                    if !self.consume_punct(",") {
                        break;
                    }
                }
                self.expect_punct(";")?;
            }
            self.expect_punct("}")?;
            self.types.define_struct(StructDef { tag: tag.clone(), is_union, members });
        }

        Ok(CType::Struct { tag, is_union })
    }

    fn parse_enum_spec(&mut self) -> Result<CType, String> {
        let tag = match self.peek_ident() {
            Some(name) => {
                let name = name.to_string();
                self.advance();
                name
            }
            None => {
                self.anon_counter += 1;
                format!("<anon{}>", self.anon_counter)
            }
        };

        if self.consume_punct("{") {
            let mut next = 0i64;
            loop {
                let name = self
                    .take_ident()
                    .ok_or_else(|| format!("expected enumerator name, found {}", self.describe_here()))?;
                if self.consume_punct("=") {
                    let e = self.parse_conditional()?;
                    next = self
                        .eval_const(&e)
                        .ok_or("enumerator value must be constant")?;
                }
                self.types.define_enumerator(&name, next);
                next += 1;
                if !self.consume_punct(",") {
                    break;
                }
                if self.peek_punct("}") {
                    break;
                }
            }
            self.expect_punct("}")?;
        }

        Ok(CType::Enum { tag })
    }

    /// Parse one declarator against a base type. Handles pointers, the
    /// grouped `(*name)` form, array suffixes, and function suffixes.
    fn parse_declarator(&mut self, base: CType) -> Result<DeclResult, String> {
        let mut ty = base;
        while self.consume_punct("*") {
            while matches!(self.peek_ident(), Some("const" | "volatile" | "restrict" | "__restrict"))
            {
                self.advance();
            }
            ty = CType::Ptr(Box::new(ty));
        }

        // Grouped declarator (function pointers): `(*name)(...)`.
        if self.peek_punct("(") && self.peek_is_punct_at(1, "*") {
            self.expect_punct("(")?;
            let inner = self.parse_declarator(CType::Unknown)?;
            self.expect_punct(")")?;
            let (outer, fn_params) = self.parse_declarator_suffixes(ty)?;
            let final_ty = substitute_hole(inner.ty, &outer);
            return Ok(DeclResult { name: inner.name, ty: final_ty, fn_params });
        }

        let name = self.take_ident();
        let (ty, fn_params) = self.parse_declarator_suffixes(ty)?;
        Ok(DeclResult { name, ty, fn_params })
    }

    fn parse_declarator_suffixes(
        &mut self,
        mut ty: CType,
    ) -> Result<(CType, Option<(Vec<(Option<String>, CType, Pos)>, bool)>), String> {
        let mut fn_params = None;
        // Collect suffixes outermost-first, apply in reverse so
        // `int a[2][3]` builds array-of-array in the right order.
        let mut array_lens: Vec<Option<u64>> = Vec::new();
        loop {
            if self.consume_punct("[") {
                if self.consume_punct("]") {
                    array_lens.push(None);
                } else {
                    let e = self.parse_conditional()?;
                    let len = self.eval_const(&e).and_then(|v| u64::try_from(v).ok());
                    self.expect_punct("]")?;
                    array_lens.push(len);
                }
                continue;
            }
            if self.peek_punct("(") && fn_params.is_none() && array_lens.is_empty() {
                self.expect_punct("(")?;
                let (params, variadic) = self.parse_params()?;
                self.expect_punct(")")?;
                ty = CType::Func {
                    ret: Box::new(ty),
                    params: params.iter().map(|(_, t, _)| t.clone()).collect(),
                    variadic,
                };
                fn_params = Some((params, variadic));
                continue;
            }
            break;
        }
        for len in array_lens.into_iter().rev() {
            ty = CType::Array { elem: Box::new(ty), len };
        }
        Ok((ty, fn_params))
    }

    fn parse_params(&mut self) -> Result<(Vec<(Option<String>, CType, Pos)>, bool), String> {
        let mut params = Vec::new();
        let mut variadic = false;
        if self.peek_punct(")") {
            return Ok((params, variadic));
        }
        loop {
            if self.consume_punct("...") {
                variadic = true;
                break;
            }
            let pos = self.here();
            let (base, _) = self
                .parse_decl_specs()?
                .ok_or_else(|| format!("expected parameter type, found {}", self.describe_here()))?;
            // `(void)` parameter list
            if base.is_void() && self.peek_punct(")") {
                break;
            }
            let d = self.parse_declarator(base)?;
            // Array parameters adjust to pointers.
            let ty = match d.ty {
                CType::Array { elem, .. } => CType::Ptr(elem),
                other => other,
            };
            params.push((d.name, ty, pos));
            if !self.consume_punct(",") {
                break;
            }
        }
        Ok((params, variadic))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_stmt(&mut self) -> Result<Stmt, String> {
        let pos = self.here();

        if self.consume_punct("{") {
            self.enter_scope();
            let mut stmts = Vec::new();
            while !self.peek_punct("}") {
                if self.at_end() {
                    self.leave_scope();
                    return Err("unexpected end of input inside block".to_string());
                }
                stmts.push(self.parse_block_item()?);
            }
            self.expect_punct("}")?;
            self.leave_scope();
            return Ok(Stmt::new(StmtKind::Compound(stmts), pos));
        }

        if self.consume_punct(";") {
            return Ok(Stmt::new(StmtKind::Empty, pos));
        }

        // Label: `name:` at statement start.
        if let Some(name) = self.peek_ident()
            && self.peek_is_punct_at(1, ":")
            && !matches!(name, "default" | "case")
        {
            let name = name.to_string();
            self.advance();
            self.advance();
            return Ok(Stmt::new(StmtKind::Label(name), pos));
        }

        if let Some(word) = self.peek_ident() {
            match word {
                "if" => {
                    self.advance();
                    self.expect_punct("(")?;
                    let cond = self.parse_expr()?;
                    self.expect_punct(")")?;
                    let then = Box::new(self.parse_stmt()?);
                    let otherwise = if self.consume_ident("else") {
                        Some(Box::new(self.parse_stmt()?))
                    } else {
                        None
                    };
                    return Ok(Stmt::new(StmtKind::If { cond, then, otherwise }, pos));
                }
                "while" => {
                    self.advance();
                    self.expect_punct("(")?;
                    let cond = self.parse_expr()?;
                    self.expect_punct(")")?;
                    let body = Box::new(self.parse_stmt()?);
                    return Ok(Stmt::new(StmtKind::While { cond, body }, pos));
                }
                "do" => {
                    self.advance();
                    let body = Box::new(self.parse_stmt()?);
                    if !self.consume_ident("while") {
                        return Err(format!("expected 'while' after do body, found {}", self.describe_here()));
                    }
                    self.expect_punct("(")?;
                    let cond = self.parse_expr()?;
                    self.expect_punct(")")?;
                    self.expect_punct(";")?;
                    return Ok(Stmt::new(StmtKind::DoWhile { body, cond }, pos));
                }
                "for" => {
                    self.advance();
                    self.expect_punct("(")?;
                    self.enter_scope();
                    let init = if self.consume_punct(";") {
                        None
                    } else if self.starts_decl() {
                        let d = self.parse_local_decl()?;
                        Some(Box::new(d))
                    } else {
                        let e = self.parse_expr()?;
                        self.expect_punct(";")?;
                        let epos = e.pos.clone();
                        Some(Box::new(Stmt::new(StmtKind::Expr(e), epos)))
                    };
                    let cond = if self.peek_punct(";") { None } else { Some(self.parse_expr()?) };
                    self.expect_punct(";")?;
                    let post = if self.peek_punct(")") { None } else { Some(self.parse_expr()?) };
                    self.expect_punct(")")?;
                    let body = Box::new(self.parse_stmt()?);
                    self.leave_scope();
                    return Ok(Stmt::new(StmtKind::For { init, cond, post, body }, pos));
                }
                "switch" => {
                    self.advance();
                    self.expect_punct("(")?;
                    let cond = self.parse_expr()?;
                    self.expect_punct(")")?;
                    let body = Box::new(self.parse_stmt()?);
                    return Ok(Stmt::new(StmtKind::Switch { cond, body }, pos));
                }
                "case" => {
                    self.advance();
                    let e = self.parse_conditional()?;
                    let value = self
                        .eval_const(&e)
                        .ok_or("case label must be a constant expression")?;
                    self.expect_punct(":")?;
                    return Ok(Stmt::new(StmtKind::Case(value), pos));
                }
                "default" => {
                    self.advance();
                    self.expect_punct(":")?;
                    return Ok(Stmt::new(StmtKind::Default, pos));
                }
                "return" => {
                    self.advance();
                    let value = if self.peek_punct(";") { None } else { Some(self.parse_expr()?) };
                    self.expect_punct(";")?;
                    return Ok(Stmt::new(StmtKind::Return(value), pos));
                }
                "break" => {
                    self.advance();
                    self.expect_punct(";")?;
                    return Ok(Stmt::new(StmtKind::Break, pos));
                }
                "continue" => {
                    self.advance();
                    self.expect_punct(";")?;
                    return Ok(Stmt::new(StmtKind::Continue, pos));
                }
                "goto" => {
                    self.advance();
                    let label = self
                        .take_ident()
                        .ok_or_else(|| format!("expected label after goto, found {}", self.describe_here()))?;
                    self.expect_punct(";")?;
                    return Ok(Stmt::new(StmtKind::Goto(label), pos));
                }
                _ => {}
            }
        }

        let expr = self.parse_expr()?;
        self.expect_punct(";")?;
        Ok(Stmt::new(StmtKind::Expr(expr), pos))
    }

    fn parse_block_item(&mut self) -> Result<Stmt, String> {
        if self.starts_decl() {
            return self.parse_local_decl();
        }
        self.parse_stmt()
    }

    /// Does the cursor sit at a declaration?
    fn starts_decl(&self) -> bool {
        match self.peek_ident() {
            Some(word) => {
                if TYPE_KEYWORDS.contains(&word) {
                    // `case`, labels etc. are not in the list, but guard
                    // against typedef-shadowing keywords anyway.
                    return true;
                }
                // typedef name followed by something declarator-like
                self.types.typedef(word).is_some()
                    && (self.peek_is_punct_at(1, "*")
                        || matches!(
                            self.tokens.get(self.pos + 1).map(|t| &t.kind),
                            Some(TokKind::Ident(_))
                        ))
            }
            None => false,
        }
    }

    fn parse_local_decl(&mut self) -> Result<Stmt, String> {
        let pos = self.here();
        let (base, specs) = self
            .parse_decl_specs()?
            .ok_or_else(|| format!("expected declaration, found {}", self.describe_here()))?;

        if specs.is_typedef {
            let d = self.parse_declarator(base)?;
            let name = d.name.ok_or("typedef requires a name")?;
            self.types.define_typedef(&name, d.ty);
            self.expect_punct(";")?;
            return Ok(Stmt::new(StmtKind::Empty, pos));
        }

        let mut decls = Vec::new();
        if self.consume_punct(";") {
            // Bare struct/enum definition in block scope.
            return Ok(Stmt::new(StmtKind::Empty, pos));
        }
        loop {
            let dpos = self.here();
            let d = self.parse_declarator(base.clone())?;
            let name = d
                .name
                .ok_or_else(|| format!("expected declarator name, found {}", self.describe_here()))?;

            let mut ty = d.ty;
            let assign = if self.consume_punct("=") {
                let init = self.parse_initializer()?;
                // `char s[] = "..."` infers the array length.
                if let CType::Array { elem, len } = &mut ty
                    && len.is_none()
                    && matches!(elem.as_ref(), CType::Int(t) if t.bits == 8)
                    && let ExprKind::StrLit(s) = &init.kind
                {
                    *len = Some(s.len() as u64 + 1);
                }
                Some(init)
            } else {
                None
            };

            let sym = self.declare(&name, ty.clone(), specs.is_static, None, dpos.clone());
            let assign = assign.map(|init| self.make_decl_assign(sym, &name, &ty, init));
            decls.push(Declaration { sym, pos: dpos, assign });

            if !self.consume_punct(",") {
                break;
            }
        }
        self.expect_punct(";")?;
        Ok(Stmt::new(StmtKind::Decl(decls), pos))
    }

    fn parse_initializer(&mut self) -> Result<Expr, String> {
        if self.peek_punct("{") {
            let pos = self.here();
            self.expect_punct("{")?;
            let mut items = Vec::new();
            while !self.peek_punct("}") {
                items.push(self.parse_initializer()?);
                if !self.consume_punct(",") {
                    break;
                }
            }
            self.expect_punct("}")?;
            return Ok(Expr::new(ExprKind::InitList(items), pos, CType::Unknown));
        }
        self.parse_assignment()
    }

    /// Desugar `T x = init` into the assignment `x = init` so the walk
    /// sees initializers and assignments identically.
    fn make_decl_assign(&self, sym: SymId, name: &str, ty: &CType, init: Expr) -> Expr {
        let pos = init.pos.clone();
        let lhs = Expr::new(
            ExprKind::Ident { name: name.to_string(), sym: Some(sym) },
            pos.clone(),
            ty.clone(),
        );
        Expr::new(
            ExprKind::Assign { op: None, left: Box::new(lhs), right: Box::new(init) },
            pos,
            ty.clone(),
        )
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_assignment()?;
        while self.consume_punct(",") {
            let right = self.parse_assignment()?;
            let pos = expr.pos.clone();
            let ty = right.ctype.clone();
            expr = Expr::new(
                ExprKind::Comma { left: Box::new(expr), right: Box::new(right) },
                pos,
                ty,
            );
        }
        Ok(expr)
    }

    fn parse_assignment(&mut self) -> Result<Expr, String> {
        let left = self.parse_conditional()?;

        let op = if self.consume_punct("=") {
            Some(None)
        } else if self.consume_punct("+=") {
            Some(Some(BinaryOp::Add))
        } else if self.consume_punct("-=") {
            Some(Some(BinaryOp::Sub))
        } else if self.consume_punct("*=") {
            Some(Some(BinaryOp::Mul))
        } else if self.consume_punct("/=") {
            Some(Some(BinaryOp::Div))
        } else if self.consume_punct("%=") {
            Some(Some(BinaryOp::Mod))
        } else if self.consume_punct("&=") {
            Some(Some(BinaryOp::And))
        } else if self.consume_punct("|=") {
            Some(Some(BinaryOp::Or))
        } else if self.consume_punct("^=") {
            Some(Some(BinaryOp::Xor))
        } else if self.consume_punct("<<=") {
            Some(Some(BinaryOp::Shl))
        } else if self.consume_punct(">>=") {
            Some(Some(BinaryOp::Shr))
        } else {
            None
        };

        match op {
            Some(op) => {
                let right = self.parse_assignment()?;
                let pos = left.pos.clone();
                let ty = left.ctype.clone();
                Ok(Expr::new(
                    ExprKind::Assign { op, left: Box::new(left), right: Box::new(right) },
                    pos,
                    ty,
                ))
            }
            None => Ok(left),
        }
    }

    fn parse_conditional(&mut self) -> Result<Expr, String> {
        let cond = self.parse_logical_or()?;
        if !self.consume_punct("?") {
            return Ok(cond);
        }
        // GNU `a ?: b` omits the middle operand.
        let then = if self.peek_punct(":") {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        self.expect_punct(":")?;
        let otherwise = Box::new(self.parse_conditional()?);
        let pos = cond.pos.clone();
        let ty = then
            .as_ref()
            .map(|t| t.ctype.clone())
            .unwrap_or_else(|| otherwise.ctype.clone());
        Ok(Expr::new(
            ExprKind::Ternary { cond: Box::new(cond), then, otherwise },
            pos,
            ty,
        ))
    }

    fn parse_logical_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_logical_and()?;
        while self.consume_punct("||") {
            let right = self.parse_logical_and()?;
            let pos = left.pos.clone();
            left = Expr::new(
                ExprKind::Logical { op: LogOp::Or, left: Box::new(left), right: Box::new(right) },
                pos,
                CType::int(),
            );
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_bit_or()?;
        while self.consume_punct("&&") {
            let right = self.parse_bit_or()?;
            let pos = left.pos.clone();
            left = Expr::new(
                ExprKind::Logical { op: LogOp::And, left: Box::new(left), right: Box::new(right) },
                pos,
                CType::int(),
            );
        }
        Ok(left)
    }

    fn parse_bit_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_bit_xor()?;
        while self.consume_punct("|") {
            let right = self.parse_bit_xor()?;
            left = self.make_binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_bit_and()?;
        while self.consume_punct("^") {
            let right = self.parse_bit_and()?;
            left = self.make_binary(BinaryOp::Xor, left, right);
        }
        Ok(left)
    }

    fn parse_bit_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_equality()?;
        while self.consume_punct("&") {
            let right = self.parse_equality()?;
            left = self.make_binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_relational()?;
        loop {
            let op = if self.consume_punct("==") {
                CmpOp::Eq
            } else if self.consume_punct("!=") {
                CmpOp::Ne
            } else {
                break;
            };
            let right = self.parse_relational()?;
            let pos = left.pos.clone();
            left = Expr::new(
                ExprKind::Compare { op, left: Box::new(left), right: Box::new(right) },
                pos,
                CType::int(),
            );
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_shift()?;
        loop {
            let op = if self.consume_punct("<=") {
                CmpOp::Le
            } else if self.consume_punct(">=") {
                CmpOp::Ge
            } else if self.consume_punct("<") {
                CmpOp::Lt
            } else if self.consume_punct(">") {
                CmpOp::Gt
            } else {
                break;
            };
            let right = self.parse_shift()?;
            let pos = left.pos.clone();
            left = Expr::new(
                ExprKind::Compare { op, left: Box::new(left), right: Box::new(right) },
                pos,
                CType::int(),
            );
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_additive()?;
        loop {
            let op = if self.consume_punct("<<") {
                BinaryOp::Shl
            } else if self.consume_punct(">>") {
                BinaryOp::Shr
            } else {
                break;
            };
            let right = self.parse_additive()?;
            left = self.make_binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.consume_punct("+") {
                BinaryOp::Add
            } else if self.consume_punct("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.parse_multiplicative()?;
            left = self.make_binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_cast()?;
        loop {
            let op = if self.consume_punct("*") {
                BinaryOp::Mul
            } else if self.consume_punct("/") {
                BinaryOp::Div
            } else if self.consume_punct("%") {
                BinaryOp::Mod
            } else {
                break;
            };
            let right = self.parse_cast()?;
            left = self.make_binary(op, left, right);
        }
        Ok(left)
    }

    fn make_binary(&self, op: BinaryOp, left: Expr, right: Expr) -> Expr {
        let pos = left.pos.clone();
        let ty = if left.ctype.is_pointerish() {
            left.ctype.clone()
        } else if right.ctype.is_pointerish() {
            right.ctype.clone()
        } else {
            match (left.ctype.int_type(), right.ctype.int_type()) {
                (Some(a), Some(b)) => CType::Int(IntType::binop_type(a, b)),
                _ => CType::Unknown,
            }
        };
        Expr::new(
            ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) },
            pos,
            ty,
        )
    }

    fn parse_cast(&mut self) -> Result<Expr, String> {
        if self.peek_punct("(") && self.type_starts_at(1) {
            let pos = self.here();
            self.expect_punct("(")?;
            let ty = self.parse_type_name()?;
            self.expect_punct(")")?;
            let inner = self.parse_cast()?;
            return Ok(Expr::new(ExprKind::Cast { expr: Box::new(inner) }, pos, ty));
        }
        self.parse_unary()
    }

    fn parse_type_name(&mut self) -> Result<CType, String> {
        let (base, _) = self
            .parse_decl_specs()?
            .ok_or_else(|| format!("expected type name, found {}", self.describe_here()))?;
        let d = self.parse_declarator(base)?;
        Ok(d.ty)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        let pos = self.here();

        if self.consume_ident("sizeof") {
            if self.peek_punct("(") && self.type_starts_at(1) {
                self.expect_punct("(")?;
                let ty = self.parse_type_name()?;
                self.expect_punct(")")?;
                // Fold when the size is known to the model.
                if let Some(sz) = ty.byte_size(&self.types) {
                    return Ok(Expr::new(
                        ExprKind::IntLit(sz as i64, IntType::ULONG),
                        pos,
                        CType::Int(IntType::ULONG),
                    ));
                }
                return Ok(Expr::new(
                    ExprKind::SizeofType(ty),
                    pos,
                    CType::Int(IntType::ULONG),
                ));
            }
            let inner = self.parse_unary()?;
            if let Some(sz) = inner.ctype.byte_size(&self.types) {
                return Ok(Expr::new(
                    ExprKind::IntLit(sz as i64, IntType::ULONG),
                    pos,
                    CType::Int(IntType::ULONG),
                ));
            }
            return Ok(Expr::new(
                ExprKind::SizeofExpr(Box::new(inner)),
                pos,
                CType::Int(IntType::ULONG),
            ));
        }

        let op = if self.consume_punct("++") {
            Some(UnOp::PreInc)
        } else if self.consume_punct("--") {
            Some(UnOp::PreDec)
        } else if self.consume_punct("&") {
            Some(UnOp::AddrOf)
        } else if self.consume_punct("*") {
            Some(UnOp::Deref)
        } else if self.consume_punct("-") {
            Some(UnOp::Neg)
        } else if self.consume_punct("+") {
            // Unary plus is a no-op.
            return self.parse_cast();
        } else if self.consume_punct("~") {
            Some(UnOp::BitNot)
        } else if self.consume_punct("!") {
            Some(UnOp::LogNot)
        } else {
            None
        };

        if let Some(op) = op {
            let inner = self.parse_cast()?;
            let ty = match op {
                UnOp::Deref => inner.ctype.pointee().cloned().unwrap_or(CType::Unknown),
                UnOp::AddrOf => {
                    self.mark_addressable(&inner);
                    CType::Ptr(Box::new(inner.ctype.clone()))
                }
                UnOp::LogNot => CType::int(),
                _ => inner.ctype.clone(),
            };
            return Ok(Expr::new(ExprKind::Unary { op, expr: Box::new(inner) }, pos, ty));
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            let pos = self.here();
            if self.consume_punct("[") {
                let index = self.parse_expr()?;
                self.expect_punct("]")?;
                let ty = expr.ctype.pointee().cloned().unwrap_or(CType::Unknown);
                expr = Expr::new(
                    ExprKind::Index { base: Box::new(expr), index: Box::new(index) },
                    pos,
                    ty,
                );
            } else if self.consume_punct("(") {
                let mut args = Vec::new();
                if !self.peek_punct(")") {
                    loop {
                        args.push(self.parse_assignment()?);
                        if !self.consume_punct(",") {
                            break;
                        }
                    }
                }
                self.expect_punct(")")?;
                let ret = match &expr.ctype {
                    CType::Func { ret, .. } => ret.as_ref().clone(),
                    CType::Ptr(inner) => match inner.as_ref() {
                        CType::Func { ret, .. } => ret.as_ref().clone(),
                        _ => CType::Unknown,
                    },
                    _ => CType::Unknown,
                };
                expr = Expr::new(ExprKind::Call { callee: Box::new(expr), args }, pos, ret);
            } else if self.consume_punct(".") {
                let member = self
                    .take_ident()
                    .ok_or_else(|| format!("expected member name, found {}", self.describe_here()))?;
                let ty = self.types.member_type(&expr.ctype, &member);
                expr = Expr::new(
                    ExprKind::Member { base: Box::new(expr), member, arrow: false },
                    pos,
                    ty,
                );
            } else if self.consume_punct("->") {
                let member = self
                    .take_ident()
                    .ok_or_else(|| format!("expected member name, found {}", self.describe_here()))?;
                let ty = self.types.member_type(&expr.ctype, &member);
                expr = Expr::new(
                    ExprKind::Member { base: Box::new(expr), member, arrow: true },
                    pos,
                    ty,
                );
            } else if self.consume_punct("++") {
                let ty = expr.ctype.clone();
                expr = Expr::new(
                    ExprKind::Postfix { op: PostOp::Inc, expr: Box::new(expr) },
                    pos,
                    ty,
                );
            } else if self.consume_punct("--") {
                let ty = expr.ctype.clone();
                expr = Expr::new(
                    ExprKind::Postfix { op: PostOp::Dec, expr: Box::new(expr) },
                    pos,
                    ty,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        let pos = self.here();
        let tok = match self.tokens.get(self.pos) {
            Some(t) => t.clone(),
            None => return Err("unexpected end of input in expression".to_string()),
        };

        match tok.kind {
            TokKind::Num(v, ty) => {
                self.advance();
                Ok(Expr::new(ExprKind::IntLit(v, ty), pos, CType::Int(ty)))
            }
            TokKind::Str(s) => {
                self.advance();
                Ok(Expr::new(ExprKind::StrLit(s), pos, CType::char_ptr()))
            }
            TokKind::Ident(name) => {
                self.advance();
                if let Some(v) = self.types.enumerator(&name) {
                    return Ok(Expr::new(
                        ExprKind::IntLit(v, IntType::INT),
                        pos,
                        CType::int(),
                    ));
                }
                let sym = self.lookup(&name);
                let ty = sym
                    .map(|id| self.symbols.get(id).ctype.clone())
                    .unwrap_or(CType::Unknown);
                Ok(Expr::new(ExprKind::Ident { name, sym }, pos, ty))
            }
            TokKind::Punct("(") => {
                self.advance();
                // GNU statement expression.
                if self.peek_punct("{") {
                    let block = self.parse_stmt()?;
                    self.expect_punct(")")?;
                    let ty = stmt_expr_type(&block);
                    return Ok(Expr::new(ExprKind::StmtExpr(Box::new(block)), pos, ty));
                }
                let inner = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            other => Err(format!("unexpected token {:?} in expression", other)),
        }
    }

    /// Constant-fold a parsed expression for case labels, array sizes,
    /// and enumerator values.
    fn eval_const(&self, expr: &Expr) -> Option<i64> {
        match &expr.kind {
            ExprKind::IntLit(v, _) => Some(*v),
            ExprKind::Cast { expr } => self.eval_const(expr),
            ExprKind::Unary { op: UnOp::Neg, expr } => Some(-self.eval_const(expr)?),
            ExprKind::Unary { op: UnOp::BitNot, expr } => Some(!self.eval_const(expr)?),
            ExprKind::Unary { op: UnOp::LogNot, expr } => {
                Some((self.eval_const(expr)? == 0) as i64)
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.eval_const(left)?;
                let r = self.eval_const(right)?;
                match op {
                    BinaryOp::Add => l.checked_add(r),
                    BinaryOp::Sub => l.checked_sub(r),
                    BinaryOp::Mul => l.checked_mul(r),
                    BinaryOp::Div => l.checked_div(r),
                    BinaryOp::Mod => l.checked_rem(r),
                    BinaryOp::And => Some(l & r),
                    BinaryOp::Or => Some(l | r),
                    BinaryOp::Xor => Some(l ^ r),
                    BinaryOp::Shl => l.checked_shl(u32::try_from(r).ok()?),
                    BinaryOp::Shr => l.checked_shr(u32::try_from(r).ok()?),
                }
            }
            ExprKind::SizeofType(ty) => ty.byte_size(&self.types).map(|v| v as i64),
            ExprKind::SizeofExpr(e) => e.ctype.byte_size(&self.types).map(|v| v as i64),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Symbols and scopes
    // ------------------------------------------------------------------

    fn declare(
        &mut self,
        name: &str,
        ctype: CType,
        is_static: bool,
        param_index: Option<usize>,
        pos: Pos,
    ) -> SymId {
        let depth = (self.scopes.len() - 1) as u32;
        let toplevel = depth == 0;
        // Re-declarations at the same scope (prototypes then definition)
        // reuse the existing symbol.
        if let Some(&existing) = self.scopes.last().and_then(|s| s.get(name)) {
            let sym = self.symbols.get_mut(existing);
            sym.ctype = ctype;
            sym.is_static |= is_static;
            return existing;
        }
        let id = self.symbols.add(Symbol {
            name: name.to_string(),
            ctype,
            pos,
            is_static,
            toplevel,
            nonlocal: toplevel || is_static,
            addressable: false,
            param_index,
            scope: depth,
        });
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.to_string(), id);
        id
    }

    fn lookup(&self, name: &str) -> Option<SymId> {
        for scope in self.scopes.iter().rev() {
            if let Some(&id) = scope.get(name) {
                return Some(id);
            }
        }
        None
    }

    fn mark_addressable(&mut self, expr: &Expr) {
        let mut e = expr;
        loop {
            match &e.kind {
                ExprKind::Ident { sym: Some(id), .. } => {
                    self.symbols.get_mut(*id).addressable = true;
                    return;
                }
                ExprKind::Member { base, .. } => e = base,
                ExprKind::Index { base, .. } => e = base,
                ExprKind::Cast { expr } => e = expr,
                ExprKind::Unary { expr, .. } => e = expr,
                _ => return,
            }
        }
    }

    fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn leave_scope(&mut self) {
        self.scopes.pop();
    }

    // ------------------------------------------------------------------
    // Token cursor helpers
    // ------------------------------------------------------------------

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn here(&self) -> Pos {
        match self.tokens.get(self.pos) {
            Some(t) => Pos::new(&self.file, t.line, t.col),
            None => {
                let line = self.tokens.last().map(|t| t.line).unwrap_or(1);
                Pos::new(&self.file, line, 1)
            }
        }
    }

    fn describe_here(&self) -> String {
        match self.tokens.get(self.pos) {
            Some(t) => match &t.kind {
                TokKind::Ident(s) => format!("'{}'", s),
                TokKind::Num(v, _) => format!("'{}'", v),
                TokKind::Str(_) => "string literal".to_string(),
                TokKind::Punct(p) => format!("'{}'", p),
            },
            None => "end of input".to_string(),
        }
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn peek_ident(&self) -> Option<&str> {
        match self.tokens.get(self.pos).map(|t| &t.kind) {
            Some(TokKind::Ident(s)) => Some(s),
            _ => None,
        }
    }

    fn take_ident(&mut self) -> Option<String> {
        if let Some(TokKind::Ident(s)) = self.tokens.get(self.pos).map(|t| t.kind.clone()) {
            self.advance();
            Some(s)
        } else {
            None
        }
    }

    fn peek_punct(&self, p: &str) -> bool {
        self.tokens.get(self.pos).is_some_and(|t| t.is_punct(p))
    }

    fn peek_is_punct_at(&self, offset: usize, p: &str) -> bool {
        self.tokens.get(self.pos + offset).is_some_and(|t| t.is_punct(p))
    }

    fn consume_punct(&mut self, p: &str) -> bool {
        if self.peek_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume_ident(&mut self, name: &str) -> bool {
        if self.tokens.get(self.pos).is_some_and(|t| t.is_ident(name)) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), String> {
        if self.consume_punct(p) {
            Ok(())
        } else {
            Err(format!(
                "expected '{}' at line {}, found {}",
                p,
                self.here().line,
                self.describe_here()
            ))
        }
    }

    /// Is there a type name at `pos + offset`? Used for cast/sizeof
    /// disambiguation.
    fn type_starts_at(&self, offset: usize) -> bool {
        match self.tokens.get(self.pos + offset).map(|t| &t.kind) {
            Some(TokKind::Ident(s)) => {
                TYPE_KEYWORDS.contains(&s.as_str()) || self.types.typedef(s).is_some()
            }
            _ => false,
        }
    }

    /// After a top-level error, skip forward to something that looks
    /// like the start of the next definition.
    fn synchronize_toplevel(&mut self) {
        let mut depth = 0i32;
        while !self.at_end() {
            if self.peek_punct("{") {
                depth += 1;
            } else if self.peek_punct("}") {
                depth -= 1;
                if depth <= 0 {
                    self.advance();
                    if depth == 0 {
                        return;
                    }
                    continue;
                }
            } else if depth == 0 && self.peek_punct(";") {
                self.advance();
                return;
            }
            self.advance();
        }
    }

    /// Skip a `{ ... }` block the cursor sits at, tracking nesting.
    fn skip_balanced_braces(&mut self) {
        let mut depth = 0i32;
        while !self.at_end() {
            if self.peek_punct("{") {
                depth += 1;
            } else if self.peek_punct("}") {
                depth -= 1;
                if depth == 0 {
                    self.advance();
                    return;
                }
            }
            self.advance();
        }
    }
}

/// Replace the `Unknown` placeholder inside a grouped declarator's type
/// with the outer type.
fn substitute_hole(ty: CType, replacement: &CType) -> CType {
    match ty {
        CType::Unknown => replacement.clone(),
        CType::Ptr(inner) => CType::Ptr(Box::new(substitute_hole(*inner, replacement))),
        CType::Array { elem, len } => CType::Array {
            elem: Box::new(substitute_hole(*elem, replacement)),
            len,
        },
        CType::Func { ret, params, variadic } => CType::Func {
            ret: Box::new(substitute_hole(*ret, replacement)),
            params,
            variadic,
        },
        other => other,
    }
}

/// A statement expression takes the type of its final expression.
fn stmt_expr_type(block: &Stmt) -> CType {
    if let StmtKind::Compound(stmts) = &block.kind
        && let Some(Stmt { kind: StmtKind::Expr(e), .. }) = stmts.last()
    {
        return e.ctype.clone();
    }
    CType::Unknown
}

/// Convenience entry point: parse one source string.
pub fn parse_source(file: &str, source: &str) -> Result<TranslationUnit, String> {
    Ok(Parser::new(file, source)?.parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{StmtKind, TopLevel};

    fn parse_ok(src: &str) -> TranslationUnit {
        let tu = parse_source("test.c", src).unwrap();
        assert!(tu.issues.is_empty(), "issues: {:?}", tu.issues);
        tu
    }

    fn first_fn(tu: &TranslationUnit) -> &FunctionDef {
        tu.toplevels
            .iter()
            .find_map(|t| match t {
                TopLevel::Func(f) => Some(f),
                _ => None,
            })
            .expect("no function in unit")
    }

    #[test]
    fn test_simple_function() {
        let tu = parse_ok("int add(int a, int b) { return a + b; }");
        let f = first_fn(&tu);
        assert_eq!(f.name, "add");
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.ret, CType::int());
        assert_eq!(tu.symbol(f.params[0]).param_index, Some(0));
    }

    #[test]
    fn test_pointer_and_array_declarators() {
        let tu = parse_ok("void f(void) { int a[4]; char *p; int *q[2]; }");
        let f = first_fn(&tu);
        let StmtKind::Compound(stmts) = &f.body.kind else { panic!() };
        let StmtKind::Decl(d) = &stmts[0].kind else { panic!() };
        assert_eq!(
            tu.symbol(d[0].sym).ctype,
            CType::Array { elem: Box::new(CType::int()), len: Some(4) }
        );
        let StmtKind::Decl(d) = &stmts[1].kind else { panic!() };
        assert_eq!(tu.symbol(d[0].sym).ctype, CType::char_ptr());
        let StmtKind::Decl(d) = &stmts[2].kind else { panic!() };
        assert_eq!(
            tu.symbol(d[0].sym).ctype,
            CType::Array { elem: Box::new(CType::Ptr(Box::new(CType::int()))), len: Some(2) }
        );
    }

    #[test]
    fn test_function_pointer_declarator() {
        let tu = parse_ok("void g(void) { int (*fp)(int); }");
        let f = first_fn(&tu);
        let StmtKind::Compound(stmts) = &f.body.kind else { panic!() };
        let StmtKind::Decl(d) = &stmts[0].kind else { panic!() };
        match &tu.symbol(d[0].sym).ctype {
            CType::Ptr(inner) => assert!(matches!(inner.as_ref(), CType::Func { .. })),
            other => panic!("expected function pointer, got {:?}", other),
        }
    }

    #[test]
    fn test_struct_definition_and_member_access() {
        let tu = parse_ok(
            "struct point { int x; int y; };\n\
             int getx(struct point *p) { return p->x; }",
        );
        assert!(tu.types.struct_def("point").is_some());
        let f = first_fn(&tu);
        let StmtKind::Compound(stmts) = &f.body.kind else { panic!() };
        let StmtKind::Return(Some(e)) = &stmts[0].kind else { panic!() };
        assert!(matches!(&e.kind, ExprKind::Member { arrow: true, .. }));
        assert_eq!(e.ctype, CType::int());
    }

    #[test]
    fn test_enum_and_typedef() {
        let tu = parse_ok(
            "enum color { RED, GREEN = 5, BLUE };\n\
             typedef unsigned long size_t;\n\
             size_t f(void) { return BLUE; }",
        );
        assert_eq!(tu.types.enumerator("BLUE"), Some(6));
        let f = first_fn(&tu);
        assert_eq!(f.ret, CType::Int(IntType::ULONG));
        let StmtKind::Compound(stmts) = &f.body.kind else { panic!() };
        let StmtKind::Return(Some(e)) = &stmts[0].kind else { panic!() };
        assert_eq!(e.const_value(), Some(6));
    }

    #[test]
    fn test_statement_kinds() {
        let tu = parse_ok(
            "void f(int n) {\n\
               int i;\n\
               for (i = 0; i < n; i++) { if (i == 3) break; else continue; }\n\
               while (n) n--;\n\
               do { n++; } while (n < 10);\n\
               switch (n) { case 1: n = 2; break; default: n = 3; }\n\
               goto out;\n\
             out:\n\
               return;\n\
             }",
        );
        let f = first_fn(&tu);
        let StmtKind::Compound(stmts) = &f.body.kind else { panic!() };
        assert!(matches!(stmts[1].kind, StmtKind::For { .. }));
        assert!(matches!(stmts[2].kind, StmtKind::While { .. }));
        assert!(matches!(stmts[3].kind, StmtKind::DoWhile { .. }));
        assert!(matches!(stmts[4].kind, StmtKind::Switch { .. }));
        assert!(matches!(stmts[5].kind, StmtKind::Goto(_)));
        assert!(matches!(stmts[6].kind, StmtKind::Label(_)));
        assert!(matches!(stmts[7].kind, StmtKind::Return(None)));
    }

    #[test]
    fn test_initializer_desugars_to_assignment() {
        let tu = parse_ok("void f(void) { int x = 5; }");
        let f = first_fn(&tu);
        let StmtKind::Compound(stmts) = &f.body.kind else { panic!() };
        let StmtKind::Decl(d) = &stmts[0].kind else { panic!() };
        let assign = d[0].assign.as_ref().unwrap();
        assert!(matches!(&assign.kind, ExprKind::Assign { op: None, .. }));
    }

    #[test]
    fn test_cast_vs_paren_disambiguation() {
        let tu = parse_ok("int f(int x) { return (long)x + (x) * 2; }");
        let f = first_fn(&tu);
        let StmtKind::Compound(stmts) = &f.body.kind else { panic!() };
        let StmtKind::Return(Some(e)) = &stmts[0].kind else { panic!() };
        let ExprKind::Binary { op: BinaryOp::Add, left, .. } = &e.kind else {
            panic!("expected addition, got {:?}", e.kind)
        };
        assert!(matches!(left.kind, ExprKind::Cast { .. }));
        assert_eq!(left.ctype, CType::Int(IntType::LONG));
    }

    #[test]
    fn test_statement_expression() {
        let tu = parse_ok("int f(void) { int x = ({ int y = 2; y + 1; }); return x; }");
        let f = first_fn(&tu);
        let StmtKind::Compound(stmts) = &f.body.kind else { panic!() };
        let StmtKind::Decl(d) = &stmts[0].kind else { panic!() };
        let assign = d[0].assign.as_ref().unwrap();
        let ExprKind::Assign { right, .. } = &assign.kind else { panic!() };
        assert!(matches!(right.kind, ExprKind::StmtExpr(_)));
    }

    #[test]
    fn test_addressable_marking() {
        let tu = parse_ok("void g(int *); void f(void) { int x; g(&x); }");
        let f = first_fn(&tu);
        let StmtKind::Compound(stmts) = &f.body.kind else { panic!() };
        let StmtKind::Decl(d) = &stmts[0].kind else { panic!() };
        assert!(tu.symbol(d[0].sym).addressable);
    }

    #[test]
    fn test_char_array_length_from_string() {
        let tu = parse_ok("void f(void) { char s[] = \"abc\"; }");
        let f = first_fn(&tu);
        let StmtKind::Compound(stmts) = &f.body.kind else { panic!() };
        let StmtKind::Decl(d) = &stmts[0].kind else { panic!() };
        assert_eq!(
            tu.symbol(d[0].sym).ctype.array_info().unwrap().1,
            Some(4)
        );
    }

    #[test]
    fn test_function_error_is_recoverable() {
        let tu = parse_source(
            "test.c",
            "int bad(void) { return 1 +; }\nint good(void) { return 2; }",
        )
        .unwrap();
        assert_eq!(tu.issues.len(), 1);
        let names: Vec<_> = tu
            .toplevels
            .iter()
            .filter_map(|t| match t {
                TopLevel::Func(f) => Some(f.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["good"]);
    }

    #[test]
    fn test_static_and_globals() {
        let tu = parse_ok("static int counter; int shared = 1;");
        let decls: Vec<_> = tu
            .toplevels
            .iter()
            .filter_map(|t| match t {
                TopLevel::Decl(d) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(decls.len(), 2);
        assert!(tu.symbol(decls[0].sym).is_static);
        assert!(tu.symbol(decls[0].sym).toplevel);
        assert!(!tu.symbol(decls[1].sym).is_static);
    }

    #[test]
    fn test_ternary_and_comma() {
        let tu = parse_ok("int f(int a) { return a ? 1 : (a = 2, 3); }");
        let f = first_fn(&tu);
        let StmtKind::Compound(stmts) = &f.body.kind else { panic!() };
        let StmtKind::Return(Some(e)) = &stmts[0].kind else { panic!() };
        assert!(matches!(e.kind, ExprKind::Ternary { .. }));
    }

    #[test]
    fn test_compound_assignment_ops() {
        let tu = parse_ok("void f(int x) { x += 2; x <<= 1; x &= 3; }");
        let f = first_fn(&tu);
        let StmtKind::Compound(stmts) = &f.body.kind else { panic!() };
        let StmtKind::Expr(e) = &stmts[0].kind else { panic!() };
        assert!(matches!(
            e.kind,
            ExprKind::Assign { op: Some(BinaryOp::Add), .. }
        ));
    }
}
