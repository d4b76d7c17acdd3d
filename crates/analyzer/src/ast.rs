//! Abstract syntax tree for the C subset the analyzer consumes
//!
//! The parser produces one [`TranslationUnit`] per input file: top-level
//! declarations and function definitions, a frozen [`SymbolTable`], and a
//! [`TypeTable`]. Every node carries a [`Pos`]; identifier expressions
//! carry the [`SymId`] they were bound to at parse time.

use crate::ctype::{CType, TypeTable};
use crate::position::Pos;
use sift_core::IntType;
use std::rc::Rc;

// ============================================================================
//                                 SYMBOLS
// ============================================================================

pub type SymId = u32;

/// An identifier bound to storage. Owned by the translation unit; the
/// engine and checkers refer to symbols by id.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub ctype: CType,
    pub pos: Pos,
    /// Declared `static`.
    pub is_static: bool,
    /// File-scope (global or static at top level).
    pub toplevel: bool,
    /// Visible outside the function: extern, global, or static.
    pub nonlocal: bool,
    /// Had its address taken somewhere in the unit.
    pub addressable: bool,
    /// Function parameter, and at which position.
    pub param_index: Option<usize>,
    /// Lexical nesting depth at the declaration (0 = file scope).
    pub scope: u32,
}

/// Append-only symbol storage. Frozen once parsing finishes.
#[derive(Debug, Default)]
pub struct SymbolTable {
    syms: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn add(&mut self, sym: Symbol) -> SymId {
        self.syms.push(sym);
        (self.syms.len() - 1) as SymId
    }

    pub fn get(&self, id: SymId) -> &Symbol {
        &self.syms[id as usize]
    }

    pub fn get_mut(&mut self, id: SymId) -> &mut Symbol {
        &mut self.syms[id as usize]
    }

    pub fn len(&self) -> usize {
        self.syms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }
}

// ============================================================================
//                               EXPRESSIONS
// ============================================================================

/// Unary operators (prefix).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    LogNot,
    BitNot,
    Deref,
    AddrOf,
    PreInc,
    PreDec,
}

/// Postfix `++` / `--`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOp {
    Inc,
    Dec,
}

/// Arithmetic and bitwise binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
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
}

/// Relational and equality operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    /// The comparison that holds when this one does not.
    pub fn negate(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
        }
    }

    /// The comparison with operands swapped.
    pub fn swap(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
        }
    }
}

/// Short-circuit logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOp {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
    pub ctype: CType,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLit(i64, IntType),
    StrLit(String),
    Ident { name: String, sym: Option<SymId> },
    Unary { op: UnOp, expr: Box<Expr> },
    Postfix { op: PostOp, expr: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Compare { op: CmpOp, left: Box<Expr>, right: Box<Expr> },
    Logical { op: LogOp, left: Box<Expr>, right: Box<Expr> },
    /// `op` is `None` for plain `=`, the compound operator otherwise.
    Assign { op: Option<BinaryOp>, left: Box<Expr>, right: Box<Expr> },
    Ternary { cond: Box<Expr>, then: Option<Box<Expr>>, otherwise: Box<Expr> },
    Comma { left: Box<Expr>, right: Box<Expr> },
    Cast { expr: Box<Expr> },
    SizeofType(CType),
    SizeofExpr(Box<Expr>),
    Member { base: Box<Expr>, member: String, arrow: bool },
    Index { base: Box<Expr>, index: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    /// GNU statement expression `({ ...; last })`.
    StmtExpr(Box<Stmt>),
    InitList(Vec<Expr>),
}

impl Expr {
    pub fn new(kind: ExprKind, pos: Pos, ctype: CType) -> Expr {
        Expr { kind, pos, ctype }
    }

    /// Constant integer value, if the expression is a literal (possibly
    /// through casts and unary minus).
    pub fn const_value(&self) -> Option<i64> {
        match &self.kind {
            ExprKind::IntLit(v, _) => Some(*v),
            ExprKind::Cast { expr } => expr.const_value(),
            ExprKind::Unary { op: UnOp::Neg, expr } => expr.const_value().map(|v| -v),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.const_value() == Some(0)
    }

    /// The symbol of a plain identifier expression (through casts).
    pub fn ident_sym(&self) -> Option<SymId> {
        match &self.kind {
            ExprKind::Ident { sym, .. } => *sym,
            ExprKind::Cast { expr } => expr.ident_sym(),
            _ => None,
        }
    }

    /// The name of a plain identifier expression (through casts).
    pub fn ident_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Ident { name, .. } => Some(name),
            ExprKind::Cast { expr } => expr.ident_name(),
            _ => None,
        }
    }
}

/// Look through casts to the underlying expression. Checkers usually
/// want this view; the cast still matters for value typing.
pub fn strip_expr(expr: &Expr) -> &Expr {
    match &expr.kind {
        ExprKind::Cast { expr: inner } => strip_expr(inner),
        _ => expr,
    }
}

impl std::fmt::Display for Expr {
    /// C-ish rendition for diagnostics and condition keys. Not a
    /// pretty-printer: parentheses are minimal and initializer lists
    /// abbreviate.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ExprKind::IntLit(v, _) => write!(f, "{}", v),
            ExprKind::StrLit(s) => write!(f, "\"{}\"", s),
            ExprKind::Ident { name, .. } => write!(f, "{}", name),
            ExprKind::Unary { op, expr } => {
                let op = match op {
                    UnOp::Neg => "-",
                    UnOp::LogNot => "!",
                    UnOp::BitNot => "~",
                    UnOp::Deref => "*",
                    UnOp::AddrOf => "&",
                    UnOp::PreInc => "++",
                    UnOp::PreDec => "--",
                };
                write!(f, "{}{}", op, expr)
            }
            ExprKind::Postfix { op, expr } => {
                write!(f, "{}{}", expr, if *op == PostOp::Inc { "++" } else { "--" })
            }
            ExprKind::Binary { op, left, right } => {
                let op = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                    BinaryOp::Mod => "%",
                    BinaryOp::And => "&",
                    BinaryOp::Or => "|",
                    BinaryOp::Xor => "^",
                    BinaryOp::Shl => "<<",
                    BinaryOp::Shr => ">>",
                };
                write!(f, "{} {} {}", left, op, right)
            }
            ExprKind::Compare { op, left, right } => {
                let op = match op {
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Gt => ">",
                    CmpOp::Ge => ">=",
                    CmpOp::Eq => "==",
                    CmpOp::Ne => "!=",
                };
                write!(f, "{} {} {}", left, op, right)
            }
            ExprKind::Logical { op, left, right } => {
                write!(f, "{} {} {}", left, if *op == LogOp::And { "&&" } else { "||" }, right)
            }
            ExprKind::Assign { op, left, right } => {
                let op = match op {
                    None => "=",
                    Some(BinaryOp::Add) => "+=",
                    Some(BinaryOp::Sub) => "-=",
                    Some(BinaryOp::Mul) => "*=",
                    Some(BinaryOp::Div) => "/=",
                    Some(BinaryOp::Mod) => "%=",
                    Some(BinaryOp::And) => "&=",
                    Some(BinaryOp::Or) => "|=",
                    Some(BinaryOp::Xor) => "^=",
                    Some(BinaryOp::Shl) => "<<=",
                    Some(BinaryOp::Shr) => ">>=",
                };
                write!(f, "{} {} {}", left, op, right)
            }
            ExprKind::Ternary { cond, then, otherwise } => match then {
                Some(then) => write!(f, "{} ? {} : {}", cond, then, otherwise),
                None => write!(f, "{} ?: {}", cond, otherwise),
            },
            ExprKind::Comma { left, right } => write!(f, "{}, {}", left, right),
            ExprKind::Cast { expr } => write!(f, "({}){}", self.ctype, expr),
            ExprKind::SizeofType(ty) => write!(f, "sizeof({})", ty),
            ExprKind::SizeofExpr(e) => write!(f, "sizeof({})", e),
            ExprKind::Member { base, member, arrow } => {
                write!(f, "{}{}{}", base, if *arrow { "->" } else { "." }, member)
            }
            ExprKind::Index { base, index } => write!(f, "{}[{}]", base, index),
            ExprKind::Call { callee, args } => {
                write!(f, "{}(", callee)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            ExprKind::StmtExpr(_) => write!(f, "({{...}})"),
            ExprKind::InitList(_) => write!(f, "{{...}}"),
        }
    }
}

// ============================================================================
//                               STATEMENTS
// ============================================================================

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Compound(Vec<Stmt>),
    Expr(Expr),
    Decl(Vec<Declaration>),
    If { cond: Expr, then: Box<Stmt>, otherwise: Option<Box<Stmt>> },
    While { cond: Expr, body: Box<Stmt> },
    DoWhile { body: Box<Stmt>, cond: Expr },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Expr>,
        body: Box<Stmt>,
    },
    Switch { cond: Expr, body: Box<Stmt> },
    /// `case N:` marker; the labeled statement follows it in the
    /// enclosing compound.
    Case(i64),
    /// `default:` marker.
    Default,
    /// `name:` marker.
    Label(String),
    Goto(String),
    Return(Option<Expr>),
    Break,
    Continue,
    Empty,
}

impl Stmt {
    pub fn new(kind: StmtKind, pos: Pos) -> Stmt {
        Stmt { kind, pos }
    }

    pub fn is_loop(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::While { .. } | StmtKind::DoWhile { .. } | StmtKind::For { .. }
        )
    }
}

// ============================================================================
//                        DECLARATIONS AND TOP LEVEL
// ============================================================================

/// One declared object, possibly initialized. `assign` is the
/// initializer desugared into a full assignment expression so the walk
/// treats `int x = f();` exactly like `x = f();`.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub sym: SymId,
    pub pos: Pos,
    pub assign: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub sym: SymId,
    pub params: Vec<SymId>,
    pub ret: CType,
    pub body: Stmt,
    pub pos: Pos,
    pub is_static: bool,
}

#[derive(Debug)]
pub enum TopLevel {
    Func(FunctionDef),
    Decl(Declaration),
}

/// A parse problem that aborted one function but not the file.
#[derive(Debug, Clone)]
pub struct ParseIssue {
    pub pos: Pos,
    pub message: String,
}

#[derive(Debug)]
pub struct TranslationUnit {
    pub file: Rc<str>,
    pub toplevels: Vec<TopLevel>,
    pub symbols: Rc<SymbolTable>,
    pub types: TypeTable,
    pub issues: Vec<ParseIssue>,
}

impl TranslationUnit {
    pub fn symbol(&self, id: SymId) -> &Symbol {
        self.symbols.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(v: i64) -> Expr {
        Expr::new(ExprKind::IntLit(v, IntType::INT), Pos::none(), CType::int())
    }

    #[test]
    fn test_const_value_through_cast_and_neg() {
        let e = Expr::new(
            ExprKind::Cast { expr: Box::new(lit(5)) },
            Pos::none(),
            CType::Int(IntType::LONG),
        );
        assert_eq!(e.const_value(), Some(5));
        let n = Expr::new(
            ExprKind::Unary { op: UnOp::Neg, expr: Box::new(lit(5)) },
            Pos::none(),
            CType::int(),
        );
        assert_eq!(n.const_value(), Some(-5));
        assert!(lit(0).is_zero());
    }

    #[test]
    fn test_strip_expr() {
        let inner = lit(1);
        let cast = Expr::new(
            ExprKind::Cast { expr: Box::new(inner) },
            Pos::none(),
            CType::Int(IntType::LONG),
        );
        assert!(matches!(strip_expr(&cast).kind, ExprKind::IntLit(1, _)));
    }

    #[test]
    fn test_cmp_op_negate_swap() {
        assert_eq!(CmpOp::Lt.negate(), CmpOp::Ge);
        assert_eq!(CmpOp::Lt.swap(), CmpOp::Gt);
        assert_eq!(CmpOp::Eq.negate(), CmpOp::Ne);
        assert_eq!(CmpOp::Eq.swap(), CmpOp::Eq);
    }

    #[test]
    fn test_symbol_table() {
        let mut table = SymbolTable::new();
        let id = table.add(Symbol {
            name: "x".to_string(),
            ctype: CType::int(),
            pos: Pos::none(),
            is_static: false,
            toplevel: false,
            nonlocal: false,
            addressable: false,
            param_index: None,
            scope: 1,
        });
        assert_eq!(table.get(id).name, "x");
        table.get_mut(id).addressable = true;
        assert!(table.get(id).addressable);
    }
}
