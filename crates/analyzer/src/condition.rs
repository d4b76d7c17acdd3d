//! Condition splitting
//!
//! Given a boolean expression and the walker's current tree, produce the
//! `(true, false)` successor trees. Comparisons narrow the value ranges
//! of both operands; pointers in truthy position lose `{0}` on the true
//! branch and become exactly `{0}` on the false branch; `&&`/`||`
//! evaluate with short-circuit semantics; `!` swaps. Single-bit mask
//! tests refine the numeric range as far as intervals can express.
//!
//! Each leaf condition fires the `Condition` hook once with the raw
//! expression while the forks are open, so checkers can add their own
//! refinements through `set_true_false_states`. Calls in conditions also
//! activate return-implies hooks and database rows on whichever branch
//! their range matches exclusively.

use crate::ast::{BinaryOp, CmpOp, Expr, ExprKind, LogOp, UnOp, strip_expr};
use crate::db::ReturnImpliesRow;
use crate::engine::{CondStates, Engine};
use crate::eval;
use crate::extra;
use crate::hooks::Event;
use crate::stree::Stree;
use sift_core::{IntType, RangeList, Sval};

/// Split a condition into its true and false successor trees. Side
/// effects of evaluating the condition land in `eng.fx.cur`; the caller
/// decides which fork to continue with.
pub fn split(eng: &mut Engine, expr: &Expr) -> (Stree, Stree) {
    let stripped = strip_expr(expr);
    match &stripped.kind {
        ExprKind::Logical { op: LogOp::And, left, right } => {
            let (t1, f1) = split(eng, left);
            eng.fx.cur = t1;
            let (t2, f2) = split(eng, right);
            let false_side = eng.merge_strees(&f1, &f2);
            (t2, false_side)
        }
        ExprKind::Logical { op: LogOp::Or, left, right } => {
            let (t1, f1) = split(eng, left);
            eng.fx.cur = f1;
            let (t2, f2) = split(eng, right);
            let true_side = eng.merge_strees(&t1, &t2);
            (true_side, f2)
        }
        ExprKind::Unary { op: UnOp::LogNot, expr: inner } => {
            let (t, f) = split(eng, inner);
            (f, t)
        }
        ExprKind::Compare { op, left, right } => compare_split(eng, expr, *op, left, right),
        _ => truthy_split(eng, expr, stripped),
    }
}

/// `a op b`: narrow both sides using the relation.
fn compare_split(
    eng: &mut Engine,
    raw: &Expr,
    op: CmpOp,
    left: &Expr,
    right: &Expr,
) -> (Stree, Stree) {
    let lrl = eval::eval_expr(eng, left);
    let rrl = eval::eval_expr(eng, right);

    open_forks(eng);

    let lt = narrow(&lrl, op, &rrl);
    let lf = narrow(&lrl, op.negate(), &rrl);
    extra::set_true_false_rl(eng, left, lt, lf);

    let rt = narrow(&rrl, op.swap(), &lrl);
    let rf = narrow(&rrl, op.swap().negate(), &lrl);
    extra::set_true_false_rl(eng, right, rt, rf);

    // `call() == CONST` style comparisons activate return implications.
    for (side, other_rl) in [(left, &rrl), (right, &lrl)] {
        let side_stripped = strip_expr(side);
        if matches!(side_stripped.kind, ExprKind::Call { .. }) {
            let side_rl = if std::ptr::eq(side, left) { &lrl } else { &rrl };
            let t_rl = narrow(side_rl, if std::ptr::eq(side, left) { op } else { op.swap() }, other_rl)
                .unwrap_or_else(|| side_rl.clone());
            let f_rl = t_rl.invert().intersect(side_rl);
            apply_implies(eng, side_stripped, &t_rl, &f_rl);
        }
    }

    eng.dispatch(&Event::Condition(raw));
    close_forks(eng)
}

/// A bare expression in boolean position.
fn truthy_split(eng: &mut Engine, raw: &Expr, stripped: &Expr) -> (Stree, Stree) {
    let rl = eval::eval_expr(eng, stripped);

    open_forks(eng);

    let ty = rl.ty();
    let zero = RangeList::single(Sval::new(ty, 0));
    let mut true_rl = rl.remove(&zero);
    let false_rl = if rl.contains_zero() { zero.clone() } else { RangeList::empty(ty) };

    // On the kernel profile a successfully-tested pointer is neither
    // NULL nor in the error-pointer block.
    if eng.cfg.project == crate::engine::Project::Kernel && stripped.ctype.is_pointerish() {
        let err_lo = Sval::from_i128(ty, -4095);
        let err_hi = Sval::from_i128(ty, -1);
        true_rl = true_rl.remove(&RangeList::new(ty, err_lo, err_hi));
    }

    match &stripped.kind {
        // Single-bit mask test: `x & M` set means x >= M, clear means x
        // is outside [M..2M-1].
        ExprKind::Binary { op: BinaryOp::And, left, right }
            if single_bit_mask(right).is_some() || single_bit_mask(left).is_some() =>
        {
            let (var, mask) = match single_bit_mask(right) {
                Some(m) => (left, m),
                None => (right, single_bit_mask(left).expect("one side is the mask")),
            };
            let vty = extra::expr_int_type(var);
            let var_rl =
                extra::get_rl(eng, var).unwrap_or_else(|| RangeList::whole(vty));
            if var_rl.min().map(|v| !v.is_negative()).unwrap_or(false) {
                let m = Sval::from_i128(vty, mask);
                let t = var_rl.intersect(&RangeList::above(vty, m));
                let bit_block = RangeList::new(vty, m, Sval::from_i128(vty, 2 * mask - 1));
                let f = var_rl.remove(&bit_block);
                extra::set_true_false_rl(eng, var, Some(t), Some(f));
            }
        }
        ExprKind::Call { .. } => {
            apply_implies(eng, stripped, &true_rl, &false_rl);
        }
        _ => {
            // An lvalue's own range narrows on both branches.
            if !true_rl.is_empty() || !false_rl.is_empty() {
                let false_side = if false_rl.is_empty() { zero } else { false_rl };
                extra::set_true_false_rl(eng, stripped, Some(true_rl), Some(false_side));
            }
        }
    }

    eng.dispatch(&Event::Condition(raw));
    close_forks(eng)
}

fn open_forks(eng: &mut Engine) {
    let base = eng.fx.cur.clone();
    eng.fx.cond = Some(CondStates {
        true_stree: base.clone(),
        false_stree: base,
        target: None,
    });
}

fn close_forks(eng: &mut Engine) -> (Stree, Stree) {
    match eng.fx.cond.take() {
        Some(cond) => (cond.true_stree, cond.false_stree),
        None => eng.internal_bug("condition forks vanished during split"),
    }
}

/// The subset of `rl` satisfying `rl' op bound` for some value of
/// `bound`. `None` means no narrowing is possible.
fn narrow(rl: &RangeList, op: CmpOp, bound: &RangeList) -> Option<RangeList> {
    let ty = rl.ty();
    let implied = match op {
        CmpOp::Lt => RangeList::below(ty, bound.max()?.cast(ty).pred()),
        CmpOp::Le => RangeList::below(ty, bound.max()?.cast(ty)),
        CmpOp::Gt => RangeList::above(ty, bound.min()?.cast(ty).succ()),
        CmpOp::Ge => RangeList::above(ty, bound.min()?.cast(ty)),
        CmpOp::Eq => bound.cast(ty),
        CmpOp::Ne => {
            let single = bound.as_single()?;
            return Some(rl.remove(&RangeList::single(single.cast(ty))));
        }
    };
    Some(rl.intersect(&implied))
}

/// Is this expression a constant with exactly one bit set?
fn single_bit_mask(expr: &Expr) -> Option<i128> {
    let v = expr.const_value()?;
    if v > 0 && (v & (v - 1)) == 0 {
        Some(v as i128)
    } else {
        None
    }
}

/// Activate return-implies hooks and database rows for a call whose
/// return value is being tested: a hook fires on the branch its range
/// matches exclusively, and the states it sets land only there.
fn apply_implies(eng: &mut Engine, call: &Expr, true_rl: &RangeList, false_rl: &RangeList) {
    let Some(fname) = crate::keys::call_name(call).map(|s| s.to_string()) else {
        return;
    };
    let ty = call.ctype.int_type().unwrap_or(IntType::LONG);

    for hook in eng.hooks.implies_hooks_for(&fname) {
        let range = RangeList::new(
            ty,
            Sval::from_i64(ty, hook.lo),
            Sval::from_i64(ty, hook.hi),
        );
        match exclusive_branch(&range, true_rl, false_rl) {
            Some(branch) => {
                eng.set_cond_target(Some(branch));
                eng.dispatch_implied_return(&fname, call, hook.check, hook.cookie);
                eng.set_cond_target(None);
            }
            None => continue,
        }
    }

    if eng.cfg.no_db {
        return;
    }
    let rows: Vec<ReturnImpliesRow> = eng
        .db
        .select_return_implies(&fname, &eng.fx.file)
        .into_iter()
        .cloned()
        .collect();
    for row in rows {
        let range = RangeList::new(
            ty,
            Sval::from_i64(ty, row.range_start),
            Sval::from_i64(ty, row.range_end),
        );
        if let Some(branch) = exclusive_branch(&range, true_rl, false_rl) {
            eng.set_cond_target(Some(branch));
            eng.dispatch_return_fact(call, None, row.tag, row.param, &row.key, &row.value);
            eng.set_cond_target(None);
        }
    }
}

/// Which branch does `range` select, if exactly one?
fn exclusive_branch(range: &RangeList, true_rl: &RangeList, false_rl: &RangeList) -> Option<bool> {
    let hits_true = !range.intersect(true_rl).is_empty();
    let hits_false = !range.intersect(false_rl).is_empty();
    match (hits_true, hits_false) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
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
    fn test_narrow_lt() {
        let out = narrow(&rl(0, 100), CmpOp::Lt, &rl(10, 10)).unwrap();
        assert_eq!(out, rl(0, 9));
    }

    #[test]
    fn test_narrow_ge() {
        let out = narrow(&rl(0, 100), CmpOp::Ge, &rl(10, 20)).unwrap();
        assert_eq!(out, rl(10, 100));
    }

    #[test]
    fn test_narrow_eq_ne() {
        let out = narrow(&rl(0, 100), CmpOp::Eq, &rl(5, 5)).unwrap();
        assert_eq!(out, rl(5, 5));
        let out = narrow(&rl(0, 10), CmpOp::Ne, &rl(5, 5)).unwrap();
        assert_eq!(out.to_string(), "0-4,6-10");
    }

    #[test]
    fn test_single_bit_mask() {
        use crate::ctype::CType;
        use crate::position::Pos;
        let lit = |v| Expr::new(ExprKind::IntLit(v, IntType::INT), Pos::none(), CType::int());
        assert_eq!(single_bit_mask(&lit(8)), Some(8));
        assert_eq!(single_bit_mask(&lit(1)), Some(1));
        assert_eq!(single_bit_mask(&lit(6)), None);
        assert_eq!(single_bit_mask(&lit(0)), None);
    }

    #[test]
    fn test_exclusive_branch() {
        let one = rl(1, 1);
        let zero = rl(0, 0);
        let nonzero = rl(1, 100);
        assert_eq!(exclusive_branch(&one, &nonzero, &zero), Some(true));
        assert_eq!(exclusive_branch(&zero, &nonzero, &zero), Some(false));
        assert_eq!(exclusive_branch(&rl(0, 1), &nonzero, &zero), None);
    }
}
