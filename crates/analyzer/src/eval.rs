//! Symbolic expression evaluation
//!
//! Evaluating an expression produces the range list of its possible
//! values, updates the state tree (assignments, increments, call
//! clobbers), and fires the walk events checkers subscribe to. When
//! nothing better is known the result is the whole range of the
//! expression's type.
//!
//! Left operands evaluate before right ones throughout. C leaves some
//! of those orders unsequenced; checkers must not rely on the order
//! beyond what the language guarantees.

use crate::ast::{BinaryOp, CmpOp, Expr, ExprKind, PostOp, UnOp, strip_expr};
use crate::condition;
use crate::ctype::CType;
use crate::db::ReturnStateRow;
use crate::engine::Engine;
use crate::extra;
use crate::flow;
use crate::hooks::Event;
use crate::modify;
use sift_core::{BinOp, IntType, RangeList, Sval};
use tracing::trace;

/// Evaluate one expression for value and effect.
pub fn eval_expr(eng: &mut Engine, expr: &Expr) -> RangeList {
    if eng.bail {
        return whole_of(expr);
    }
    eng.fx.line = expr.pos.line;

    match &expr.kind {
        ExprKind::IntLit(v, ty) => RangeList::single(Sval::from_i64(*ty, *v)),

        ExprKind::StrLit(_) => extra::valid_ptr_rl(),

        ExprKind::Ident { .. } => {
            eng.dispatch(&Event::Sym(expr));
            if expr.ctype.is_array() || matches!(expr.ctype, CType::Func { .. }) {
                // The value of an array or function name is its address.
                return extra::valid_ptr_rl();
            }
            extra::get_rl(eng, expr).unwrap_or_else(|| whole_of(expr))
        }

        ExprKind::Unary { op, expr: inner } => eval_unary(eng, expr, *op, inner),

        ExprKind::Postfix { op, expr: inner } => {
            let old = eval_expr(eng, inner);
            let delta = if *op == PostOp::Inc { BinaryOp::Add } else { BinaryOp::Sub };
            step_lvalue(eng, expr, inner, &old, delta);
            old
        }

        ExprKind::Binary { op, left, right } => {
            let lrl = eval_expr(eng, left);
            let rrl = eval_expr(eng, right);
            eng.dispatch(&Event::Binop(expr));
            rl_binop(*op, &lrl, &rrl, result_type(expr, left, right))
        }

        ExprKind::Compare { op, left, right } => {
            let lrl = eval_expr(eng, left);
            let rrl = eval_expr(eng, right);
            match compare_rls(*op, &lrl, &rrl) {
                Some(true) => RangeList::single(Sval::from_i64(IntType::INT, 1)),
                Some(false) => RangeList::single(Sval::from_i64(IntType::INT, 0)),
                None => bool_rl(),
            }
        }

        ExprKind::Logical { .. } => {
            // Short-circuit evaluation forks the tree; the value context
            // joins both outcomes back together.
            let (t, f) = condition::split(eng, expr);
            eng.fx.cur = eng.merge_strees(&t, &f);
            bool_rl()
        }

        ExprKind::Assign { op, left, right } => eval_assign(eng, expr, *op, left, right),

        ExprKind::Ternary { cond, then, otherwise } => {
            let (t, f) = condition::split(eng, cond);
            let saved_line = eng.fx.line;

            eng.fx.cur = t;
            let then_rl = match then {
                Some(e) => eval_expr(eng, e),
                // GNU `a ?: b`: the true branch's value is the condition.
                None => extra::get_rl(eng, cond).unwrap_or_else(|| whole_of(expr)),
            };
            let true_tree = eng.fx.cur.clone();

            eng.fx.cur = f;
            let else_rl = eval_expr(eng, otherwise);
            let false_tree = eng.fx.cur.clone();

            eng.fx.line = saved_line;
            eng.fx.cur = eng.merge_strees(&true_tree, &false_tree);
            then_rl.union(&else_rl)
        }

        ExprKind::Comma { left, right } => {
            eval_expr(eng, left);
            eval_expr(eng, right)
        }

        ExprKind::Cast { expr: inner } => {
            let rl = eval_expr(eng, inner);
            match expr.ctype.int_type() {
                Some(ty) => rl.cast(ty),
                None => whole_of(expr),
            }
        }

        // Unresolved sizeof (incomplete types); the parser folds the rest.
        ExprKind::SizeofType(_) | ExprKind::SizeofExpr(_) => RangeList::whole(IntType::ULONG),

        ExprKind::Member { base, arrow, .. } => {
            eval_expr(eng, base);
            if *arrow {
                eng.dispatch(&Event::Deref(expr));
            }
            extra::get_rl(eng, expr).unwrap_or_else(|| whole_of(expr))
        }

        ExprKind::Index { base, index } => {
            eval_expr(eng, base);
            eval_expr(eng, index);
            eng.dispatch(&Event::Deref(expr));
            extra::get_rl(eng, expr).unwrap_or_else(|| whole_of(expr))
        }

        ExprKind::Call { .. } => eval_call(eng, expr, None),

        ExprKind::StmtExpr(block) => flow::walk_block_expr(eng, block),

        ExprKind::InitList(items) => {
            for item in items {
                eval_expr(eng, item);
            }
            whole_of(expr)
        }
    }
}

fn eval_unary(eng: &mut Engine, expr: &Expr, op: UnOp, inner: &Expr) -> RangeList {
    match op {
        UnOp::Deref => {
            eval_expr(eng, inner);
            eng.dispatch(&Event::Deref(expr));
            extra::get_rl(eng, expr).unwrap_or_else(|| whole_of(expr))
        }
        UnOp::AddrOf => {
            // `&x` does not evaluate x, but an index or inner deref is
            // still computed.
            match &strip_expr(inner).kind {
                ExprKind::Index { base: _, index } => {
                    eval_expr(eng, index);
                }
                ExprKind::Unary { op: UnOp::Deref, expr: e } => {
                    eval_expr(eng, e);
                }
                _ => {}
            }
            extra::valid_ptr_rl()
        }
        UnOp::Neg => {
            let rl = eval_expr(eng, inner);
            let ty = expr_ty(expr);
            match rl.as_single() {
                Some(v) => {
                    let zero = Sval::new(ty, 0);
                    let (neg, _) = zero.binop(BinOp::Sub, v);
                    RangeList::single(neg)
                }
                None => match (rl.min(), rl.max()) {
                    (Some(lo), Some(hi)) if !rl.is_whole() => {
                        let zero = Sval::new(ty, 0);
                        let (a, ova) = zero.binop(BinOp::Sub, hi);
                        let (b, ovb) = zero.binop(BinOp::Sub, lo);
                        if ova || ovb {
                            RangeList::whole(ty)
                        } else {
                            RangeList::new(ty, a, b)
                        }
                    }
                    _ => RangeList::whole(ty),
                },
            }
        }
        UnOp::BitNot => {
            let rl = eval_expr(eng, inner);
            let ty = expr_ty(expr);
            match rl.as_single() {
                Some(v) => RangeList::single(Sval::from_i128(ty, !v.value())),
                None => RangeList::whole(ty),
            }
        }
        UnOp::LogNot => {
            let rl = eval_expr(eng, inner);
            if rl.as_single().map(|v| v.is_zero()) == Some(true) {
                RangeList::single(Sval::from_i64(IntType::INT, 1))
            } else if !rl.contains_zero() && !rl.is_empty() {
                RangeList::single(Sval::from_i64(IntType::INT, 0))
            } else {
                bool_rl()
            }
        }
        UnOp::PreInc | UnOp::PreDec => {
            let old = eval_expr(eng, inner);
            let delta = if op == UnOp::PreInc { BinaryOp::Add } else { BinaryOp::Sub };
            step_lvalue(eng, expr, inner, &old, delta)
        }
    }
}

/// Apply `lv += 1` / `lv -= 1` for the four increment forms; returns
/// the new range.
fn step_lvalue(eng: &mut Engine, whole: &Expr, lv: &Expr, old: &RangeList, op: BinaryOp) -> RangeList {
    let ty = expr_ty(lv);
    let one = RangeList::single(Sval::new(ty, 1));
    let new = rl_binop(op, old, &one, ty);
    eng.dispatch(&Event::Op(whole));
    modify::modified_lvalue(eng, lv, Some(whole));
    extra::set_rl(eng, lv, new.clone());
    new
}

fn eval_assign(
    eng: &mut Engine,
    expr: &Expr,
    op: Option<BinaryOp>,
    left: &Expr,
    right: &Expr,
) -> RangeList {
    let is_call = matches!(strip_expr(right).kind, ExprKind::Call { .. });

    let rhs = if is_call {
        eval_call(eng, strip_expr(right), Some(expr))
    } else {
        eval_expr(eng, right)
    };

    // Computing the destination's address evaluates its subparts, and
    // storing through a pointer dereferences it.
    eval_lvalue_address(eng, left);

    eng.fx.line = expr.pos.line;

    let ty = expr_ty(left);
    let new = match op {
        None => rhs.cast(ty),
        Some(binop) => {
            let old = extra::get_rl(eng, left).unwrap_or_else(|| RangeList::whole(ty));
            rl_binop(binop, &old, &rhs, ty)
        }
    };

    // The overwrite notification goes out first; states the assignment
    // hooks establish for the left side must survive it.
    trace!(target: "sift::eval", line = eng.fx.line, "assign {:?}", new.to_string());
    modify::modified_lvalue(eng, left, Some(expr));
    eng.dispatch(&Event::Assignment(expr));
    extra::set_rl(eng, left, new.clone());
    record_function_ptr(eng, left, right);

    // Call-assignment hooks run after the overwrite so the states they
    // establish for the left side survive the modification tracker.
    if is_call {
        let stripped = strip_expr(right);
        if let ExprKind::Call { callee, .. } = &stripped.kind
            && let Some(name) = resolve_callee(eng, callee)
        {
            eng.dispatch_assign_fn_hooks(&name, expr);
        }
        eng.dispatch(&Event::CallAssignment(expr));
    }

    eng.dispatch(&Event::AssignmentAfter(expr));
    new
}

/// Evaluate the address computation of a store destination and fire
/// `Deref` for stores that go through a pointer (`*p = x`, `p->m = x`,
/// `a[i] = x`).
fn eval_lvalue_address(eng: &mut Engine, left: &Expr) {
    let stripped = strip_expr(left);
    match &stripped.kind {
        ExprKind::Unary { op: UnOp::Deref, expr: inner } => {
            eval_expr(eng, inner);
            eng.dispatch(&Event::Deref(left));
        }
        ExprKind::Member { base, arrow, .. } => {
            if *arrow {
                eval_expr(eng, base);
                eng.dispatch(&Event::Deref(left));
            }
        }
        ExprKind::Index { base, index } => {
            eval_expr(eng, base);
            eval_expr(eng, index);
            eng.dispatch(&Event::Deref(left));
        }
        _ => {}
    }
}

/// `s.ops.open = my_open;` records a function-pointer binding the
/// call resolver can use later.
fn record_function_ptr(eng: &mut Engine, left: &Expr, right: &Expr) {
    let right = strip_expr(right);
    let Some(fname) = right.ident_name() else { return };
    let Some(sym) = right.ident_sym() else { return };
    if !matches!(eng.symbol(sym).ctype, CType::Func { .. }) {
        return;
    }
    if let Some(path) = member_fn_path(left) {
        if eng.cfg.no_db {
            return;
        }
        eng.db.insert_function_ptr(&path, fname);
    }
}

/// Canonical path for a struct-member function pointer, keyed by the
/// struct tag so every instance of the struct shares the binding.
fn member_fn_path(expr: &Expr) -> Option<String> {
    let ExprKind::Member { base, member, .. } = &strip_expr(expr).kind else {
        return None;
    };
    let tag = match &strip_expr(base).ctype {
        CType::Struct { tag, .. } => tag.clone(),
        CType::Ptr(inner) => match inner.as_ref() {
            CType::Struct { tag, .. } => tag.clone(),
            _ => return None,
        },
        _ => return None,
    };
    Some(format!("(struct {})->{}", tag, member))
}

/// Evaluate a call: arguments, hooks, database summaries, clobbers.
/// `assign` is the enclosing assignment when the result is stored.
pub fn eval_call(eng: &mut Engine, call: &Expr, assign: Option<&Expr>) -> RangeList {
    let ExprKind::Call { callee, args } = &call.kind else {
        return whole_of(call);
    };

    let mut arg_rls = Vec::with_capacity(args.len());
    for arg in args {
        arg_rls.push(eval_expr(eng, arg));
    }
    eng.fx.line = call.pos.line;

    let fname = resolve_callee(eng, callee);

    if let Some(name) = &fname
        && name.starts_with("__builtin_")
    {
        return eval_builtin(eng, name, args, &arg_rls, call);
    }

    eng.dispatch(&Event::FunctionCall(call));

    // An unknown callee may write through any pointer argument. Known
    // functions (hooked primitives, summarized callees) model their own
    // effects instead.
    let known = fname.as_ref().is_some_and(|n| {
        eng.hooks.knows_function(n)
            || (!eng.cfg.no_db && eng.db.has_summary(n, &eng.fx.file))
    });
    if !known {
        for arg in args {
            let stripped = strip_expr(arg);
            if let ExprKind::Unary { op: UnOp::AddrOf, expr: target } = &stripped.kind {
                modify::modified_lvalue(eng, target, Some(call));
                extra::clear_derefed(eng, target);
            }
        }
    }

    if let Some(name) = &fname {
        eng.dispatch_fn_hooks(name, call);
        eng.dispatch_param_key_hooks(name, call);
    }

    let mut ret = None;
    if let Some(name) = &fname
        && !eng.cfg.no_db
    {
        ret = apply_return_states(eng, name, call, assign);
    }
    eng.dispatch(&Event::FunctionCallAfterDb(call));

    ret.unwrap_or_else(|| whole_of(call))
}

/// Resolve the callee to a function name: a direct identifier, or a
/// struct-member function pointer known to the database.
fn resolve_callee(eng: &Engine, callee: &Expr) -> Option<String> {
    let callee = strip_expr(callee);
    if let Some(name) = callee.ident_name() {
        return Some(name.to_string());
    }
    let path = member_fn_path(callee)?;
    eng.db.lookup_function_ptr(&path).map(|s| s.to_string())
}

/// Apply the callee's recorded return states: dispatch fact hooks and
/// compute the return range.
fn apply_return_states(
    eng: &mut Engine,
    fname: &str,
    call: &Expr,
    assign: Option<&Expr>,
) -> Option<RangeList> {
    let rows: Vec<ReturnStateRow> = eng
        .db
        .select_return_states(fname, &eng.fx.file)
        .into_iter()
        .cloned()
        .collect();
    if rows.is_empty() {
        return None;
    }

    let ret_ty = call.ctype.int_type().unwrap_or(IntType::LONG);
    let mut ranges: Option<RangeList> = None;
    let mut seen_ids = Vec::new();
    for row in &rows {
        if !seen_ids.contains(&row.return_id) {
            seen_ids.push(row.return_id);
            if let Ok(rl) = RangeList::parse(ret_ty, &row.return_ranges) {
                ranges = Some(match ranges {
                    Some(acc) => acc.union(&rl),
                    None => rl,
                });
            }
        }
        eng.dispatch_return_fact(call, assign, row.tag, row.param, &row.key, &row.value);
    }
    ranges
}

fn eval_builtin(
    eng: &mut Engine,
    name: &str,
    args: &[Expr],
    arg_rls: &[RangeList],
    call: &Expr,
) -> RangeList {
    match name {
        "__builtin_expect" => arg_rls.first().cloned().unwrap_or_else(|| whole_of(call)),
        "__builtin_constant_p" => {
            let known = args.first().and_then(|a| a.const_value()).is_some();
            RangeList::single(Sval::from_i64(IntType::INT, known as i64))
        }
        "__builtin_popcount" | "__builtin_popcountl" | "__builtin_popcountll" => {
            match arg_rls.first().and_then(|rl| rl.as_single()) {
                Some(v) => RangeList::single(Sval::from_i64(
                    IntType::INT,
                    v.as_u64().count_ones() as i64,
                )),
                None => RangeList::new(
                    IntType::INT,
                    Sval::from_i64(IntType::INT, 0),
                    Sval::from_i64(IntType::INT, 64),
                ),
            }
        }
        "__builtin_object_size" => RangeList::single(Sval::type_max(IntType::ULONG)),
        "__builtin_types_compatible_p" => bool_rl(),
        "__builtin_unreachable" => {
            eng.fx.reachable = false;
            RangeList::empty(IntType::INT)
        }
        _ => whole_of(call),
    }
}

// ----------------------------------------------------------------------
// Range arithmetic
// ----------------------------------------------------------------------

/// Combine two range lists under a binary operator in `ty`. Exact for
/// single values; endpoint arithmetic for add/sub of bounded ranges;
/// everything else degrades to the whole range.
pub fn rl_binop(op: BinaryOp, l: &RangeList, r: &RangeList, ty: IntType) -> RangeList {
    let core_op = match op {
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => BinOp::Mul,
        BinaryOp::Div => BinOp::Div,
        BinaryOp::Mod => BinOp::Mod,
        BinaryOp::And => BinOp::And,
        BinaryOp::Or => BinOp::Or,
        BinaryOp::Xor => BinOp::Xor,
        BinaryOp::Shl => BinOp::Shl,
        BinaryOp::Shr => BinOp::Shr,
    };

    if let (Some(a), Some(b)) = (l.as_single(), r.as_single()) {
        let (v, overflowed) = a.binop(core_op, b);
        if overflowed {
            return RangeList::whole(ty);
        }
        return RangeList::single(v.cast(ty));
    }

    if matches!(op, BinaryOp::Add | BinaryOp::Sub)
        && !l.is_whole()
        && !r.is_whole()
        && let (Some(lmin), Some(lmax), Some(rmin), Some(rmax)) = (l.min(), l.max(), r.min(), r.max())
    {
        let (lo, hi) = if op == BinaryOp::Add {
            (lmin.binop(BinOp::Add, rmin), lmax.binop(BinOp::Add, rmax))
        } else {
            (lmin.binop(BinOp::Sub, rmax), lmax.binop(BinOp::Sub, rmin))
        };
        if !lo.1 && !hi.1 {
            return RangeList::new(ty, lo.0.cast(ty), hi.0.cast(ty));
        }
    }

    // Unsigned modulo by a known value bounds the result.
    if op == BinaryOp::Mod
        && let Some(b) = r.as_single()
        && !b.is_zero()
        && !b.is_negative()
        && l.min().map(|v| !v.is_negative()).unwrap_or(false)
    {
        return RangeList::new(ty, Sval::new(ty, 0), b.pred().cast(ty));
    }

    RangeList::whole(ty)
}

/// Decide a comparison of two range lists, when the ranges allow it.
pub fn compare_rls(op: CmpOp, l: &RangeList, r: &RangeList) -> Option<bool> {
    let (lmin, lmax) = (l.min()?, l.max()?);
    let (rmin, rmax) = (r.min()?, r.max()?);
    let lt = lmax.cmp_val(rmin) == std::cmp::Ordering::Less;
    let gt = lmin.cmp_val(rmax) == std::cmp::Ordering::Greater;
    match op {
        CmpOp::Lt => {
            if lt {
                Some(true)
            } else if lmin.cmp_val(rmax) != std::cmp::Ordering::Less {
                Some(false)
            } else {
                None
            }
        }
        CmpOp::Gt => compare_rls(CmpOp::Lt, r, l),
        CmpOp::Le => compare_rls(CmpOp::Lt, r, l).map(|b| !b),
        CmpOp::Ge => compare_rls(CmpOp::Lt, l, r).map(|b| !b),
        CmpOp::Eq => {
            if lt || gt {
                Some(false)
            } else if let (Some(a), Some(b)) = (l.as_single(), r.as_single()) {
                Some(a.cmp_val(b) == std::cmp::Ordering::Equal)
            } else {
                None
            }
        }
        CmpOp::Ne => compare_rls(CmpOp::Eq, l, r).map(|b| !b),
    }
}

pub fn whole_of(expr: &Expr) -> RangeList {
    RangeList::whole(expr_ty(expr))
}

fn expr_ty(expr: &Expr) -> IntType {
    extra::expr_int_type(expr)
}

fn bool_rl() -> RangeList {
    RangeList::new(
        IntType::INT,
        Sval::from_i64(IntType::INT, 0),
        Sval::from_i64(IntType::INT, 1),
    )
}

fn result_type(expr: &Expr, left: &Expr, right: &Expr) -> IntType {
    expr.ctype
        .int_type()
        .or_else(|| left.ctype.int_type())
        .or_else(|| right.ctype.int_type())
        .unwrap_or(IntType::INT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rl(min: i64, max: i64) -> RangeList {
        RangeList::new(
            IntType::INT,
            Sval::from_i64(IntType::INT, min),
            Sval::from_i64(IntType::INT, max),
        )
    }

    #[test]
    fn test_rl_binop_singles() {
        let out = rl_binop(BinaryOp::Mul, &rl(6, 6), &rl(7, 7), IntType::INT);
        assert_eq!(out.as_single().unwrap().value(), 42);
    }

    #[test]
    fn test_rl_binop_add_ranges() {
        let out = rl_binop(BinaryOp::Add, &rl(1, 3), &rl(10, 20), IntType::INT);
        assert_eq!(out.min().unwrap().value(), 11);
        assert_eq!(out.max().unwrap().value(), 23);
    }

    #[test]
    fn test_rl_binop_sub_ranges() {
        let out = rl_binop(BinaryOp::Sub, &rl(10, 20), &rl(1, 3), IntType::INT);
        assert_eq!(out.min().unwrap().value(), 7);
        assert_eq!(out.max().unwrap().value(), 19);
    }

    #[test]
    fn test_rl_binop_overflow_is_whole() {
        let big = RangeList::single(Sval::type_max(IntType::INT));
        let out = rl_binop(BinaryOp::Add, &big, &rl(1, 1), IntType::INT);
        assert!(out.is_whole());
    }

    #[test]
    fn test_rl_binop_mod_bound() {
        let out = rl_binop(BinaryOp::Mod, &rl(0, 1000), &rl(8, 8), IntType::INT);
        assert_eq!(out.min().unwrap().value(), 0);
        assert_eq!(out.max().unwrap().value(), 7);
    }

    #[test]
    fn test_compare_rls() {
        assert_eq!(compare_rls(CmpOp::Lt, &rl(0, 3), &rl(5, 9)), Some(true));
        assert_eq!(compare_rls(CmpOp::Lt, &rl(5, 9), &rl(0, 3)), Some(false));
        assert_eq!(compare_rls(CmpOp::Lt, &rl(0, 5), &rl(3, 9)), None);
        assert_eq!(compare_rls(CmpOp::Eq, &rl(1, 1), &rl(1, 1)), Some(true));
        assert_eq!(compare_rls(CmpOp::Eq, &rl(0, 3), &rl(7, 9)), Some(false));
        assert_eq!(compare_rls(CmpOp::Ne, &rl(1, 1), &rl(2, 2)), Some(true));
        assert_eq!(compare_rls(CmpOp::Ge, &rl(5, 9), &rl(0, 3)), Some(true));
    }
}
