//! Control-flow walking
//!
//! Drives the abstract interpretation over one function: statements in
//! order, conditions split through the condition engine, branches
//! walked with forked trees and joined afterwards. Loops are not
//! iterated to a fixpoint: the body is walked a fixed two times with a
//! join at the back edge, trading precision on loop-carried values for
//! termination and speed. `return` snapshots the tree and kills the
//! path; `goto` parks the tree on the label's pending slot;
//! `break`/`continue` land in the enclosing construct's collectors.
//!
//! Reachability is a flag: once a path ends, statements are skipped
//! until a label or case marker revives the walk with its pending tree.

use crate::ast::{Expr, FunctionDef, Stmt, StmtKind, TranslationUnit};
use crate::condition;
use crate::db::CallerInfoRow;
use crate::engine::{CurFn, Engine, FnCtx, LoopCtx, ReturnSnapshot};
use crate::eval;
use crate::extra;
use crate::hooks::Event;
use crate::keys;
use crate::stree::Stree;
use sift_core::{IntType, RangeList, Sval};
use tracing::debug;

/// How many times a loop body is walked before the engine gives up on
/// the back edge.
const LOOP_UNROLL: u32 = 2;

/// Walk one function definition from a fresh context and flush its
/// summaries. The per-function context is dropped at the end; facts
/// that must outlive it are in the database by then.
pub fn walk_function(eng: &mut Engine, tu: &TranslationUnit, f: &FunctionDef) {
    debug!(function = %f.name, file = %tu.file, "walking function");

    eng.bail = false;
    eng.fx = FnCtx {
        func: Some(CurFn {
            name: f.name.clone(),
            sym: f.sym,
            params: f.params.clone(),
            ret: f.ret.clone(),
            is_static: f.is_static,
            pos: f.pos.clone(),
        }),
        symbols: tu.symbols.clone(),
        file: tu.file.clone(),
        ..FnCtx::default()
    };
    eng.fx.line = f.pos.line;

    seed_caller_info(eng);

    eng.dispatch(&Event::FuncDef(f));
    eng.dispatch(&Event::AfterDef(f));

    walk_stmt(eng, &f.body);

    // Falling off the end is an implicit return.
    if eng.fx.reachable {
        let id = eng.fx.returns.len() as u32 + 1;
        let snapshot = ReturnSnapshot {
            return_id: id,
            ranges: String::new(),
            line: eng.fx.line,
            stree: eng.fx.cur.clone(),
        };
        eng.fx.returns.push(snapshot);
    }

    eng.dispatch(&Event::EndFunc);
    eng.dispatch_split_returns();
    eng.dispatch_all_return_states();
    eng.dispatch(&Event::AfterFunc);

    // Arena release: everything per-function dies here.
    eng.fx = FnCtx::default();
    eng.bail = false;
}

/// Inject caller-info facts recorded for this function into its initial
/// tree (second pass only).
fn seed_caller_info(eng: &mut Engine) {
    if !eng.use_caller_info || eng.cfg.no_db {
        return;
    }
    let Some(key) = eng.cur_fn_key() else { return };
    let rows: Vec<CallerInfoRow> = eng
        .db
        .select_caller_info(&key)
        .into_iter()
        .cloned()
        .collect();
    for row in rows {
        eng.dispatch_caller_fact(row.tag, row.param, &row.key, &row.value);
    }
}

pub fn walk_stmt(eng: &mut Engine, stmt: &Stmt) {
    if eng.bail || eng.oom_hit {
        return;
    }

    // Labels revive dead paths with whatever gotos parked there.
    if let StmtKind::Label(name) = &stmt.kind {
        if let Some(pending) = eng.fx.labels.remove(name) {
            if eng.fx.reachable {
                let cur = eng.fx.cur.clone();
                eng.fx.cur = eng.merge_strees(&cur, &pending);
            } else {
                eng.fx.cur = pending;
                eng.fx.reachable = true;
            }
        }
        return;
    }

    if !eng.fx.reachable {
        return;
    }

    eng.fx.line = stmt.pos.line;
    eng.check_oom();
    if eng.bail {
        return;
    }
    eng.dispatch(&Event::Stmt(stmt));

    match &stmt.kind {
        StmtKind::Compound(stmts) => {
            for s in stmts {
                walk_stmt(eng, s);
            }
        }

        StmtKind::Expr(e) => {
            eval::eval_expr(eng, e);
        }

        StmtKind::Decl(decls) => {
            for d in decls {
                eng.dispatch(&Event::Declaration(d));
                if let Some(assign) = &d.assign {
                    eval::eval_expr(eng, assign);
                }
            }
        }

        StmtKind::If { cond, then, otherwise } => walk_if(eng, cond, then, otherwise.as_deref()),

        StmtKind::While { cond, body } => {
            eng.dispatch(&Event::Preloop(stmt));
            walk_loop(eng, Some(cond), None, body, false);
        }

        StmtKind::DoWhile { body, cond } => {
            eng.dispatch(&Event::Preloop(stmt));
            walk_loop(eng, Some(cond), None, body, true);
        }

        StmtKind::For { init, cond, post, body } => {
            if let Some(init) = init {
                walk_stmt(eng, init);
            }
            eng.dispatch(&Event::Preloop(stmt));
            walk_loop(eng, cond.as_ref(), post.as_ref(), body, false);
        }

        StmtKind::Switch { cond, body } => walk_switch(eng, cond, body),

        // Case markers are handled by the enclosing switch walk; one
        // showing up here is outside any switch.
        StmtKind::Case(_) | StmtKind::Default => {}

        StmtKind::Label(_) => unreachable!("labels are handled before the reachability check"),

        StmtKind::Goto(label) => {
            let cur = eng.fx.cur.clone();
            let merged = match eng.fx.labels.remove(label) {
                Some(pending) => eng.merge_strees(&pending, &cur),
                None => cur,
            };
            eng.fx.labels.insert(label.clone(), merged);
            eng.fx.reachable = false;
        }

        StmtKind::Return(value) => {
            let rl = value.as_ref().map(|e| eval::eval_expr(eng, e));
            eng.fx.line = stmt.pos.line;
            eng.dispatch(&Event::Return { expr: value.as_ref(), pos: &stmt.pos });
            let id = eng.fx.returns.len() as u32 + 1;
            let snapshot = ReturnSnapshot {
                return_id: id,
                ranges: rl.map(|r| r.to_string()).unwrap_or_default(),
                line: stmt.pos.line,
                stree: eng.fx.cur.clone(),
            };
            eng.fx.returns.push(snapshot);
            eng.fx.reachable = false;
        }

        StmtKind::Break => {
            let cur = eng.fx.cur.clone();
            let existing = eng.fx.loops.last_mut().and_then(|c| c.breaks.take());
            let merged = match existing {
                Some(b) => eng.merge_strees(&b, &cur),
                None => cur,
            };
            if let Some(ctx) = eng.fx.loops.last_mut() {
                ctx.breaks = Some(merged);
            }
            eng.fx.reachable = false;
        }

        StmtKind::Continue => {
            if let Some(idx) = eng.fx.loops.iter().rposition(|c| c.is_loop) {
                let cur = eng.fx.cur.clone();
                let existing = eng.fx.loops[idx].continues.take();
                let merged = match existing {
                    Some(c) => eng.merge_strees(&c, &cur),
                    None => cur,
                };
                eng.fx.loops[idx].continues = Some(merged);
            }
            eng.fx.reachable = false;
        }

        StmtKind::Empty => {}
    }

    eng.dispatch(&Event::StmtAfter(stmt));
}

fn walk_if(eng: &mut Engine, cond: &Expr, then: &Stmt, otherwise: Option<&Stmt>) {
    let (t, f) = condition::split(eng, cond);
    let const_cond = cond.const_value();

    eng.fx.cur = t;
    eng.fx.reachable = const_cond != Some(0);
    walk_stmt(eng, then);
    let then_tree = eng.fx.cur.clone();
    let then_reach = eng.fx.reachable;

    eng.fx.cur = f;
    eng.fx.reachable = const_cond.map(|v| v == 0).unwrap_or(true);
    if let Some(otherwise) = otherwise {
        walk_stmt(eng, otherwise);
    }
    let else_tree = eng.fx.cur.clone();
    let else_reach = eng.fx.reachable;

    match (then_reach, else_reach) {
        (true, true) => {
            eng.fx.cur = eng.merge_strees(&then_tree, &else_tree);
            eng.fx.reachable = true;
        }
        (true, false) => {
            eng.fx.cur = then_tree;
            eng.fx.reachable = true;
        }
        (false, true) => {
            eng.fx.cur = else_tree;
            eng.fx.reachable = true;
        }
        (false, false) => {
            eng.fx.reachable = false;
        }
    }
}

/// Shared loop driver. `cond` of `None` means a `for (;;)` style loop
/// whose only exits are breaks; `post_body_cond` walks the body before
/// the first condition test (do-while).
fn walk_loop(
    eng: &mut Engine,
    cond: Option<&Expr>,
    post: Option<&Expr>,
    body: &Stmt,
    post_body_cond: bool,
) {
    eng.fx.loops.push(LoopCtx { breaks: None, continues: None, is_loop: true });
    let mut exit: Option<Stree> = None;

    for iteration in 0..LOOP_UNROLL {
        let test_first = !post_body_cond || iteration > 0;
        if test_first && let Some(cond) = cond {
            let (t, f) = condition::split(eng, cond);
            let const_cond = cond.const_value();
            // An always-true condition has no exit edge here.
            if const_cond.map(|v| v != 0) != Some(true) {
                exit = merge_opt(eng, exit, f);
            }
            eng.fx.cur = t;
            eng.fx.reachable = const_cond != Some(0);
            if !eng.fx.reachable {
                break;
            }
        }

        walk_stmt(eng, body);
        collect_continues(eng);

        // No live back edge: nothing reaches the next iteration.
        if !eng.fx.reachable {
            break;
        }

        if let Some(post) = post {
            eval::eval_expr(eng, post);
        }

        // A do-while tests after the body on every pass.
        if post_body_cond
            && iteration + 1 < LOOP_UNROLL
            && let Some(cond) = cond
        {
            let (t, f) = condition::split(eng, cond);
            exit = merge_opt(eng, exit, f);
            eng.fx.cur = t;
        }
    }

    // Last do-while iteration still owes its condition test.
    if post_body_cond
        && eng.fx.reachable
        && let Some(cond) = cond
    {
        let (_, f) = condition::split(eng, cond);
        exit = merge_opt(eng, exit, f);
    }

    let ctx = eng.fx.loops.pop().unwrap_or_default();
    let exit = match (exit, ctx.breaks) {
        (Some(e), Some(b)) => Some(eng.merge_strees(&e, &b)),
        (e, b) => e.or(b),
    };
    match exit {
        Some(tree) => {
            eng.fx.cur = tree;
            eng.fx.reachable = true;
        }
        None => eng.fx.reachable = false,
    }
}

fn collect_continues(eng: &mut Engine) {
    let pending = eng.fx.loops.last_mut().and_then(|c| c.continues.take());
    if let Some(cont) = pending {
        if eng.fx.reachable {
            let cur = eng.fx.cur.clone();
            eng.fx.cur = eng.merge_strees(&cur, &cont);
        } else {
            eng.fx.cur = cont;
            eng.fx.reachable = true;
        }
    }
}

fn merge_opt(eng: &mut Engine, acc: Option<Stree>, tree: Stree) -> Option<Stree> {
    Some(match acc {
        Some(a) => eng.merge_strees(&a, &tree),
        None => tree,
    })
}

/// Walk a switch: each case gets the entry tree with the selector
/// narrowed to its value, merged with whatever falls through from the
/// previous section; `default` receives the residual.
fn walk_switch(eng: &mut Engine, cond: &Expr, body: &Stmt) {
    let sel_rl = eval::eval_expr(eng, cond);
    let sel_ty = sel_rl.ty();
    let entry = eng.fx.cur.clone();

    eng.fx.loops.push(LoopCtx { breaks: None, continues: None, is_loop: false });

    let mut matched = RangeList::empty(sel_ty);
    let mut seen_default = false;
    eng.fx.reachable = false;

    let StmtKind::Compound(stmts) = &body.kind else {
        // Degenerate `switch (x) stmt;`: nothing is reachable without a
        // case label.
        restore_after_switch(eng, &entry, &sel_rl, &matched, true);
        return;
    };

    for s in stmts {
        match &s.kind {
            StmtKind::Case(v) => {
                let case_rl = RangeList::single(Sval::from_i64(sel_ty, *v));
                matched = matched.union(&case_rl);
                let incoming = narrowed_entry(eng, &entry, cond, case_rl);
                merge_case_entry(eng, incoming);
            }
            StmtKind::Default => {
                seen_default = true;
                let residual = sel_rl.remove(&matched);
                let incoming = narrowed_entry(eng, &entry, cond, residual);
                merge_case_entry(eng, incoming);
            }
            _ => walk_stmt(eng, s),
        }
    }

    restore_after_switch(eng, &entry, &sel_rl, &matched, !seen_default);
}

/// The entry tree with the selector's range narrowed, when the selector
/// is something nameable.
fn narrowed_entry(eng: &mut Engine, entry: &Stree, cond: &Expr, rl: RangeList) -> Stree {
    if keys::expr_to_name_sym(cond).is_none() {
        return entry.clone();
    }
    let saved = std::mem::replace(&mut eng.fx.cur, entry.clone());
    extra::set_rl(eng, cond, rl);
    std::mem::replace(&mut eng.fx.cur, saved)
}

fn merge_case_entry(eng: &mut Engine, incoming: Stree) {
    if eng.fx.reachable {
        // Fallthrough from the previous section joins the new entry.
        let cur = eng.fx.cur.clone();
        eng.fx.cur = eng.merge_strees(&cur, &incoming);
    } else {
        eng.fx.cur = incoming;
        eng.fx.reachable = true;
    }
}

fn restore_after_switch(
    eng: &mut Engine,
    entry: &Stree,
    sel_rl: &RangeList,
    matched: &RangeList,
    add_residual: bool,
) {
    let tail = if eng.fx.reachable { Some(eng.fx.cur.clone()) } else { None };
    let ctx = eng.fx.loops.pop().unwrap_or_default();

    let mut out = match (tail, ctx.breaks) {
        (Some(t), Some(b)) => Some(eng.merge_strees(&t, &b)),
        (t, b) => t.or(b),
    };

    // Without a default, selector values no case matched skip the body.
    if add_residual && !sel_rl.remove(matched).is_empty() {
        out = merge_opt(eng, out, entry.clone());
    }

    match out {
        Some(tree) => {
            eng.fx.cur = tree;
            eng.fx.reachable = true;
        }
        None => eng.fx.reachable = false,
    }
}

/// Walk a GNU statement expression: the block runs against the current
/// tree and the final expression's value is the block's value.
pub fn walk_block_expr(eng: &mut Engine, block: &Stmt) -> RangeList {
    if let StmtKind::Compound(stmts) = &block.kind
        && let Some((last, rest)) = stmts.split_last()
    {
        for s in rest {
            walk_stmt(eng, s);
        }
        if let StmtKind::Expr(e) = &last.kind {
            return eval::eval_expr(eng, e);
        }
        walk_stmt(eng, last);
    }
    RangeList::whole(IntType::INT)
}
