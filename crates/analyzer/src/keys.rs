//! Symbol and key resolution
//!
//! Converts between three equivalent ways of naming an observable:
//!
//! 1. an AST expression (`p->base.resv`)
//! 2. a printable name plus base symbol (`"p->base.resv"`, sym of `p`),
//!    the form state trees are keyed by
//! 3. a canonical *key* relative to a base (`"$->base.resv"`), the
//!    database-portable form
//!
//! `$` stands for the base itself, a leading `*` for the dereferenced
//! base; member access prints `->` after a pointer and `.` after a
//! struct value, and `(*p).m` normalizes to `p->m` so both spellings of
//! the same storage produce one key. Constant array indices print
//! literally, non-constant ones as `*`. `&` cancels a leading `*` in
//! either order. A depth guard rejects chains deeper than recursive
//! types could print sensibly.

use crate::ast::{Expr, ExprKind, SymId, UnOp, strip_expr};
use crate::ctype::CType;
use crate::position::Pos;

/// Longest member/index chain the resolver will print.
const MAX_DEPTH: u32 = 8;

/// Printable name and base symbol for an lvalue-ish expression.
/// `None` for rvalues and chains too complex to name.
pub fn expr_to_name_sym(expr: &Expr) -> Option<(String, Option<SymId>)> {
    let mut depth = 0;
    let name = print_name(strip_expr(expr), &mut depth)?;
    if depth > MAX_DEPTH {
        return None;
    }
    Some((name, base_sym(expr)))
}

fn print_name(expr: &Expr, depth: &mut u32) -> Option<String> {
    *depth += 1;
    if *depth > MAX_DEPTH {
        return None;
    }
    match &expr.kind {
        ExprKind::Ident { name, .. } => Some(name.clone()),
        ExprKind::Member { base, member, arrow } => {
            let base = strip_expr(base);
            // `(*p).m` and `p->m` denote the same storage.
            if !*arrow
                && let ExprKind::Unary { op: UnOp::Deref, expr: inner } = &base.kind
            {
                let b = print_name(strip_expr(inner), depth)?;
                return Some(format!("{}->{}", b, member));
            }
            let sep = if *arrow { "->" } else { "." };
            let b = print_name(base, depth)?;
            Some(format!("{}{}{}", b, sep, member))
        }
        ExprKind::Unary { op: UnOp::Deref, expr: inner } => {
            let inner = strip_expr(inner);
            // `*&x` is x.
            if let ExprKind::Unary { op: UnOp::AddrOf, expr: e } = &inner.kind {
                return print_name(strip_expr(e), depth);
            }
            Some(format!("*{}", print_name(inner, depth)?))
        }
        ExprKind::Unary { op: UnOp::AddrOf, expr: inner } => {
            let inner = strip_expr(inner);
            // `&*p` is p.
            if let ExprKind::Unary { op: UnOp::Deref, expr: e } = &inner.kind {
                return print_name(strip_expr(e), depth);
            }
            Some(format!("&{}", print_name(inner, depth)?))
        }
        ExprKind::Index { base, index } => {
            let b = print_name(strip_expr(base), depth)?;
            match index.const_value() {
                Some(v) => Some(format!("{}[{}]", b, v)),
                None => Some(format!("{}[*]", b)),
            }
        }
        _ => None,
    }
}

/// The symbol anchoring an lvalue chain.
pub fn base_sym(expr: &Expr) -> Option<SymId> {
    let mut e = strip_expr(expr);
    loop {
        match &e.kind {
            ExprKind::Ident { sym, .. } => return *sym,
            ExprKind::Member { base, .. } => e = strip_expr(base),
            ExprKind::Index { base, .. } => e = strip_expr(base),
            ExprKind::Unary { op: UnOp::Deref | UnOp::AddrOf, expr } => e = strip_expr(expr),
            _ => return None,
        }
    }
}

/// Print `target` as a key relative to `base`: the base itself is `$`.
/// `None` when `target` does not hang off `base`.
pub fn expr_to_key(base: &Expr, target: &Expr) -> Option<String> {
    let (base_name, base_sym_id) = expr_to_name_sym(base)?;
    let (target_name, target_sym_id) = expr_to_name_sym(target)?;
    if base_sym_id != target_sym_id {
        return None;
    }
    name_to_key(&base_name, &target_name)
}

/// The string-level form of [`expr_to_key`], used when only names are
/// at hand (summary publication).
pub fn name_to_key(base_name: &str, target_name: &str) -> Option<String> {
    if target_name == base_name {
        return Some("$".to_string());
    }
    // Leading address-of / dereference wrap the whole chain.
    if let Some(rest) = target_name.strip_prefix('*') {
        return name_to_key(base_name, rest).map(|k| cancel(&format!("*{}", k)));
    }
    if let Some(rest) = target_name.strip_prefix('&') {
        return name_to_key(base_name, rest).map(|k| cancel(&format!("&{}", k)));
    }
    if let Some(rest) = target_name.strip_prefix(base_name) {
        if rest.starts_with("->") || rest.starts_with('.') || rest.starts_with('[') {
            return Some(format!("${}", rest));
        }
    }
    None
}

/// Substitute a concrete base name into a key: key `"$->a.b"` with base
/// `"p"` is `"p->a.b"`. Cancels `&*` / `*&` pairs the substitution can
/// produce.
pub fn key_to_name(base_name: &str, key: &str) -> String {
    cancel(&key.replace('$', base_name))
}

fn cancel(name: &str) -> String {
    let mut s = name.to_string();
    loop {
        if let Some(rest) = s.strip_prefix("&*") {
            s = rest.to_string();
        } else if let Some(rest) = s.strip_prefix("*&") {
            s = rest.to_string();
        } else {
            return s;
        }
    }
}

/// Rebuild an expression denoting `key` applied to `base_expr`. Member
/// types come out `Unknown`; the result denotes the same storage, which
/// is what callers need to look up or set states.
pub fn key_to_expr(base_expr: &Expr, key: &str) -> Option<Expr> {
    let key = cancel(key);
    let pos = base_expr.pos.clone();

    if let Some(rest) = key.strip_prefix('*') {
        let inner = key_to_expr(base_expr, rest)?;
        let ty = inner.ctype.pointee().cloned().unwrap_or(CType::Unknown);
        return Some(Expr::new(
            ExprKind::Unary { op: UnOp::Deref, expr: Box::new(inner) },
            pos,
            ty,
        ));
    }
    if let Some(rest) = key.strip_prefix('&') {
        let inner = key_to_expr(base_expr, rest)?;
        let ty = CType::Ptr(Box::new(inner.ctype.clone()));
        return Some(Expr::new(
            ExprKind::Unary { op: UnOp::AddrOf, expr: Box::new(inner) },
            pos,
            ty,
        ));
    }

    let rest = key.strip_prefix('$')?;
    let mut expr = base_expr.clone();
    let mut cursor = rest;
    let mut depth = 0;
    while !cursor.is_empty() {
        depth += 1;
        if depth > MAX_DEPTH {
            return None;
        }
        if let Some(after) = cursor.strip_prefix("->") {
            let (member, next) = take_member(after);
            expr = Expr::new(
                ExprKind::Member { base: Box::new(expr), member: member.to_string(), arrow: true },
                pos.clone(),
                CType::Unknown,
            );
            cursor = next;
        } else if let Some(after) = cursor.strip_prefix('.') {
            let (member, next) = take_member(after);
            expr = Expr::new(
                ExprKind::Member { base: Box::new(expr), member: member.to_string(), arrow: false },
                pos.clone(),
                CType::Unknown,
            );
            cursor = next;
        } else if let Some(after) = cursor.strip_prefix('[') {
            let close = after.find(']')?;
            let idx: i64 = after[..close].parse().ok()?;
            let index = Expr::new(
                ExprKind::IntLit(idx, sift_core::IntType::INT),
                pos.clone(),
                CType::int(),
            );
            expr = Expr::new(
                ExprKind::Index { base: Box::new(expr), index: Box::new(index) },
                pos.clone(),
                CType::Unknown,
            );
            cursor = &after[close + 1..];
        } else {
            return None;
        }
    }
    Some(expr)
}

fn take_member(s: &str) -> (&str, &str) {
    let end = s
        .find(|c: char| !c.is_alphanumeric() && c != '_')
        .unwrap_or(s.len());
    (&s[..end], &s[end..])
}

/// The `n`th argument of a call expression.
pub fn call_arg(call: &Expr, n: usize) -> Option<&Expr> {
    match &call.kind {
        ExprKind::Call { args, .. } => args.get(n),
        _ => None,
    }
}

/// The callee name of a direct call.
pub fn call_name(call: &Expr) -> Option<&str> {
    match &call.kind {
        ExprKind::Call { callee, .. } => strip_expr(callee).ident_name(),
        _ => None,
    }
}

/// Build a bare identifier expression for a `(name, sym)` pair, for
/// applying database facts where no AST node exists.
pub fn ident_expr(name: &str, sym: Option<SymId>, ctype: CType, pos: Pos) -> Expr {
    Expr::new(ExprKind::Ident { name: name.to_string(), sym }, pos, ctype)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::ast::{StmtKind, TopLevel};

    /// Parse a function and return the expression of its single
    /// `return` statement.
    fn ret_expr(body: &str) -> (crate::ast::TranslationUnit, Expr) {
        let src = format!(
            "struct inner {{ int y; int arr[4]; }};\n\
             struct outer {{ struct inner in; struct inner *pin; }};\n\
             int f(struct outer *p, struct outer v, int *q, int i) {{ return {}; }}",
            body
        );
        let tu = parse_source("t.c", &src).unwrap();
        assert!(tu.issues.is_empty(), "{:?}", tu.issues);
        let expr = {
            let f = tu
                .toplevels
                .iter()
                .find_map(|t| match t {
                    TopLevel::Func(f) => Some(f),
                    _ => None,
                })
                .unwrap();
            let StmtKind::Compound(stmts) = &f.body.kind else { panic!() };
            let StmtKind::Return(Some(e)) = &stmts[0].kind else { panic!() };
            e.clone()
        };
        (tu, expr)
    }

    fn name_of(body: &str) -> String {
        let (_, e) = ret_expr(body);
        expr_to_name_sym(&e).unwrap().0
    }

    #[test]
    fn test_names() {
        assert_eq!(name_of("q"), "q");
        assert_eq!(name_of("*q"), "*q");
        assert_eq!(name_of("p->in.y"), "p->in.y");
        assert_eq!(name_of("v.in.y"), "v.in.y");
        assert_eq!(name_of("p->in.arr[2]"), "p->in.arr[2]");
        assert_eq!(name_of("p->in.arr[i]"), "p->in.arr[*]");
    }

    #[test]
    fn test_deref_of_struct_value_normalizes_to_arrow() {
        assert_eq!(name_of("(*p).in.y"), "p->in.y");
    }

    #[test]
    fn test_addr_deref_cancel() {
        assert_eq!(name_of("*&i"), "i");
        assert_eq!(name_of("&*q"), "q");
    }

    #[test]
    fn test_expr_to_key() {
        let (_, member) = ret_expr("p->in.y");
        let ExprKind::Member { base, .. } = &member.kind else { panic!() };
        let ExprKind::Member { base: p, .. } = &base.kind else { panic!() };
        assert_eq!(expr_to_key(p, &member).unwrap(), "$->in.y");
        assert_eq!(expr_to_key(p, p).unwrap(), "$");
    }

    #[test]
    fn test_name_to_key() {
        assert_eq!(name_to_key("p", "p").unwrap(), "$");
        assert_eq!(name_to_key("p", "*p").unwrap(), "*$");
        assert_eq!(name_to_key("p", "p->a.b").unwrap(), "$->a.b");
        assert_eq!(name_to_key("p", "&p->lock").unwrap(), "&$->lock");
        assert_eq!(name_to_key("p", "q->a"), None);
    }

    #[test]
    fn test_key_to_name() {
        assert_eq!(key_to_name("p", "$"), "p");
        assert_eq!(key_to_name("p", "*$"), "*p");
        assert_eq!(key_to_name("p", "$->a.b"), "p->a.b");
        assert_eq!(key_to_name("&x", "*$"), "x");
    }

    #[test]
    fn test_key_round_trip() {
        // key_to_expr(base, expr_to_key(base, e)) denotes the same storage.
        for body in ["p->in.y", "p->in.arr[2]", "*q"] {
            let (_, e) = ret_expr(body);
            let base = match body {
                "*q" => ret_expr("q").1,
                _ => ret_expr("p").1,
            };
            let key = expr_to_key(&base, &e).unwrap();
            let rebuilt = key_to_expr(&base, &key).unwrap();
            assert_eq!(
                expr_to_name_sym(&rebuilt).unwrap(),
                expr_to_name_sym(&e).unwrap(),
                "key was '{}'",
                key
            );
        }
    }

    #[test]
    fn test_depth_guard() {
        let deep = "p->pin->pin->pin->pin->pin->pin->pin->pin->in.y";
        let (_, e) = ret_expr(deep);
        assert!(expr_to_name_sym(&e).is_none());
    }

    #[test]
    fn test_call_helpers() {
        let tu = parse_source("t.c", "void g(int, int); void f(void) { g(1, 2); }").unwrap();
        let TopLevel::Func(f) = &tu.toplevels[0] else { panic!() };
        let StmtKind::Compound(stmts) = &f.body.kind else { panic!() };
        let StmtKind::Expr(call) = &stmts[0].kind else { panic!() };
        assert_eq!(call_name(call), Some("g"));
        assert_eq!(call_arg(call, 1).unwrap().const_value(), Some(2));
        assert!(call_arg(call, 2).is_none());
    }
}
