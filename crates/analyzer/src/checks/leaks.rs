//! Memory leaks
//!
//! A local, non-argument, non-addressable pointer assigned a fresh
//! allocation goes to `allocated`. Storing it anywhere that survives
//! the function (a global, a structure member, a dereference target),
//! returning it, or freeing it clears the tracking. Whatever still
//! carries `allocated` in a return path's possible-set at end of
//! function may leak.

use crate::ast::{Expr, ExprKind, strip_expr};
use crate::checks::{allocation_funcs, free_funcs};
use crate::engine::Engine;
use crate::hooks::{Check, Event, HookKind};
use crate::keys;
use crate::state::State;
use crate::stree::CheckId;

pub struct LeaksCheck {
    id: CheckId,
}

impl LeaksCheck {
    pub fn new() -> LeaksCheck {
        LeaksCheck { id: 0 }
    }

    fn allocated() -> State {
        State::new("allocated")
    }

    fn isnull() -> State {
        State::new("isnull")
    }
}

impl Default for LeaksCheck {
    fn default() -> Self {
        Self::new()
    }
}

/// Does storing into `lhs` let the value escape the function?
fn escapes_through(eng: &Engine, lhs: &Expr) -> bool {
    let lhs = strip_expr(lhs);
    match &lhs.kind {
        ExprKind::Ident { sym: Some(sym), .. } => {
            let s = eng.symbol(*sym);
            s.nonlocal || s.toplevel || s.param_index.is_some()
        }
        // Members, derefs, and array slots all reach storage someone
        // else can see.
        _ => true,
    }
}

impl Check for LeaksCheck {
    fn name(&self) -> &'static str {
        "leaks"
    }

    fn register(&mut self, id: CheckId, eng: &mut Engine) {
        self.id = id;
        for fname in allocation_funcs(eng.cfg.project) {
            eng.hooks.add_function_assign_hook(fname, id, 0);
        }
        for (fname, arg) in free_funcs(eng.cfg.project) {
            eng.hooks.add_function_hook(fname, id, *arg);
        }
        eng.hooks.add_hook(HookKind::Condition, id);
        eng.hooks.add_hook(HookKind::Assignment, id);
        eng.hooks.add_hook(HookKind::Return, id);
        eng.hooks.all_return_states_hook(id);
    }

    fn on_fn_assign(&mut self, eng: &mut Engine, _fname: &str, assign: &Expr, _cookie: u32) {
        let ExprKind::Assign { left, .. } = &assign.kind else { return };
        let left = strip_expr(left);
        let Some(sym) = left.ident_sym() else { return };
        let s = eng.symbol(sym);
        if s.param_index.is_some() || s.nonlocal || s.is_static || s.addressable {
            return;
        }
        eng.set_state_expr(self.id, left, Self::allocated());
    }

    fn on_fn_call(&mut self, eng: &mut Engine, _fname: &str, call: &Expr, cookie: u32) {
        let Some(arg) = keys::call_arg(call, cookie as usize) else {
            return;
        };
        let arg = strip_expr(arg);
        if eng.get_state_expr(self.id, arg).is_some() {
            eng.set_state_expr(self.id, arg, State::new("freed"));
        }
    }

    fn on_event(&mut self, eng: &mut Engine, ev: &Event<'_>) {
        match ev {
            // `if (x)` splits an allocation into allocated/NULL.
            Event::Condition(expr) => {
                let expr = strip_expr(expr);
                if eng.get_state_expr(self.id, expr).is_some() {
                    eng.set_true_false_states_expr(
                        self.id,
                        expr,
                        Some(Self::allocated()),
                        Some(Self::isnull()),
                    );
                }
            }
            // Storing the pointer somewhere reachable is not a leak.
            Event::Assignment(expr) => {
                let ExprKind::Assign { left, right, .. } = &expr.kind else {
                    return;
                };
                let right = strip_expr(right);
                if eng.get_state_expr(self.id, right).is_some()
                    && escapes_through(eng, left)
                    && let Some((name, sym)) = keys::expr_to_name_sym(right)
                {
                    eng.delete_state(self.id, &name, sym);
                }
            }
            // Returning it hands ownership to the caller.
            Event::Return { expr: Some(expr), .. } => {
                let expr = strip_expr(expr);
                if let Some((name, sym)) = keys::expr_to_name_sym(expr) {
                    eng.delete_state(self.id, &name, sym);
                }
            }
            _ => {}
        }
    }

    fn on_all_return_states(&mut self, eng: &mut Engine) {
        let snapshots = eng.fx.returns.clone();
        let mut reported: Vec<String> = Vec::new();
        for snap in &snapshots {
            for sm in snap.stree.owned_by(self.id) {
                if sm.state.name() == "freed" || !sm.possible_has("allocated") {
                    continue;
                }
                let name = sm.key.name.to_string();
                if reported.contains(&name) {
                    continue;
                }
                eng.fx.line = snap.line;
                eng.warn(format!("possible memory leak of '{}'", name));
                reported.push(name);
            }
        }
    }
}
