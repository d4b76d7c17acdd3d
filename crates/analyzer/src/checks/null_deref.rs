//! NULL dereferences
//!
//! Pointers assigned NULL are `null`; results of allocators that can
//! fail are `maybe_null` until tested. Dereferencing either state is
//! reported. A truthiness test clears the pointer on the non-NULL
//! branch and pins it to `null` on the other.

use crate::ast::{Expr, ExprKind, UnOp, strip_expr};
use crate::checks::allocation_funcs;
use crate::engine::Engine;
use crate::hooks::{Check, Event, HookKind};
use crate::keys;
use crate::state::State;
use crate::stree::{CheckId, SmState};

pub struct NullDerefCheck {
    id: CheckId,
}

impl NullDerefCheck {
    pub fn new() -> NullDerefCheck {
        NullDerefCheck { id: 0 }
    }

    fn null() -> State {
        State::new("null")
    }

    fn maybe_null() -> State {
        State::new("maybe_null")
    }

    fn checked() -> State {
        State::new("checked")
    }
}

impl Default for NullDerefCheck {
    fn default() -> Self {
        Self::new()
    }
}

fn deref_target(expr: &Expr) -> Option<&Expr> {
    match &strip_expr(expr).kind {
        ExprKind::Unary { op: UnOp::Deref, expr: inner } => Some(strip_expr(inner)),
        ExprKind::Member { base, arrow: true, .. } => Some(strip_expr(base)),
        ExprKind::Index { base, .. } => Some(strip_expr(base)),
        _ => None,
    }
}

impl Check for NullDerefCheck {
    fn name(&self) -> &'static str {
        "null_deref"
    }

    fn register(&mut self, id: CheckId, eng: &mut Engine) {
        self.id = id;
        for fname in allocation_funcs(eng.cfg.project) {
            eng.hooks.add_function_assign_hook(fname, id, 0);
        }
        eng.hooks.add_hook(HookKind::Assignment, id);
        eng.hooks.add_hook(HookKind::Condition, id);
        eng.hooks.add_hook(HookKind::Deref, id);
        eng.hooks.add_modification_hook(id);
    }

    fn on_fn_assign(&mut self, eng: &mut Engine, _fname: &str, assign: &Expr, _cookie: u32) {
        let ExprKind::Assign { left, .. } = &assign.kind else { return };
        eng.set_state_expr(self.id, strip_expr(left), Self::maybe_null());
    }

    fn on_event(&mut self, eng: &mut Engine, ev: &Event<'_>) {
        match ev {
            // `p = 0;` on a pointer.
            Event::Assignment(assign) => {
                let ExprKind::Assign { op: None, left, right } = &assign.kind else {
                    return;
                };
                let left = strip_expr(left);
                if left.ctype.is_pointerish() && right.is_zero() {
                    eng.set_state_expr(self.id, left, Self::null());
                }
            }

            Event::Condition(expr) => {
                let expr = strip_expr(expr);
                if eng.get_state_expr(self.id, expr).is_some() {
                    eng.set_true_false_states_expr(
                        self.id,
                        expr,
                        Some(Self::checked()),
                        Some(Self::null()),
                    );
                }
            }

            Event::Deref(expr) => {
                let Some(ptr) = deref_target(expr) else { return };
                let Some(state) = eng.get_state_expr(self.id, ptr) else {
                    return;
                };
                if state.name() != "null" && state.name() != "maybe_null" {
                    return;
                }
                if let Some((name, _)) = keys::expr_to_name_sym(ptr) {
                    eng.error(format!("potential NULL dereference '{}'", name));
                }
                eng.set_state_expr(self.id, ptr, Self::checked());
            }

            _ => {}
        }
    }

    fn on_modified(&mut self, eng: &mut Engine, sm: &SmState, _mod_expr: Option<&Expr>, _indirect: bool) {
        // Reassignment invalidates whatever we knew; the assignment
        // handlers re-establish the interesting cases.
        if sm.state.name() != "undefined" {
            let key = sm.key.clone();
            eng.set_state(self.id, &key.name, key.sym, State::undefined());
        }
    }
}
