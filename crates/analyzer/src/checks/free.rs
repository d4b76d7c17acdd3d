//! Use-after-free and double-free
//!
//! Tracks pointers through `freed`/`ok` states. Freeing something whose
//! possible-set already contains `freed` is a double free; dereferencing
//! it is a use after free. Reassignment returns the pointer to `ok`.
//! Cross-function: `ParamFreed` facts published by release functions
//! (see the frees-argument checker) mark arguments freed at their call
//! sites, so a wrapper like `my_free(p)` poisons `p` in the caller once
//! the summary is in the database.

use crate::ast::{Expr, ExprKind, UnOp, strip_expr};
use crate::checks::free_funcs;
use crate::db::FactTag;
use crate::engine::Engine;
use crate::hooks::{Check, Event, HookKind};
use crate::keys;
use crate::state::State;
use crate::stree::{CheckId, SmState};

pub struct FreeCheck {
    id: CheckId,
}

impl FreeCheck {
    pub fn new() -> FreeCheck {
        FreeCheck { id: 0 }
    }

    fn freed() -> State {
        State::new("freed")
    }

    fn ok() -> State {
        State::new("ok")
    }

    fn is_freed(&self, eng: &Engine, expr: &Expr) -> bool {
        eng.get_sm_expr(self.id, expr)
            .is_some_and(|sm| sm.possible_has("freed"))
    }

    fn match_free_arg(&mut self, eng: &mut Engine, arg: &Expr) {
        if !eng.cfg.spammy && self.is_freed(eng, arg) {
            if let Some((name, _)) = keys::expr_to_name_sym(arg) {
                eng.error(format!("double free of '{}'", name));
            }
        }
        eng.set_state_expr(self.id, arg, Self::freed());
    }
}

impl Default for FreeCheck {
    fn default() -> Self {
        Self::new()
    }
}

/// The pointer a dereferencing expression reads through.
fn deref_target(expr: &Expr) -> Option<&Expr> {
    match &strip_expr(expr).kind {
        ExprKind::Unary { op: UnOp::Deref, expr: inner } => Some(strip_expr(inner)),
        ExprKind::Member { base, arrow: true, .. } => Some(strip_expr(base)),
        ExprKind::Index { base, .. } => Some(strip_expr(base)),
        _ => None,
    }
}

impl Check for FreeCheck {
    fn name(&self) -> &'static str {
        "free"
    }

    fn register(&mut self, id: CheckId, eng: &mut Engine) {
        self.id = id;
        for (fname, arg) in free_funcs(eng.cfg.project) {
            eng.hooks.add_function_hook(fname, id, *arg);
        }
        if eng.cfg.spammy {
            eng.hooks.add_hook(HookKind::Sym, id);
        } else {
            eng.hooks.add_hook(HookKind::Deref, id);
        }
        eng.hooks.add_modification_hook(id);
        eng.hooks.select_return_states_hook(FactTag::ParamFreed, id);
        eng.hooks.select_return_states_hook(FactTag::MaybeFreed, id);
    }

    fn on_event(&mut self, eng: &mut Engine, ev: &Event<'_>) {
        match ev {
            Event::Deref(expr) => {
                let Some(ptr) = deref_target(expr) else { return };
                if !self.is_freed(eng, ptr) {
                    return;
                }
                if let Some((name, _)) = keys::expr_to_name_sym(ptr) {
                    eng.error(format!("dereferencing freed memory '{}'", name));
                }
                // One report per pointer is enough.
                eng.set_state_expr(self.id, ptr, Self::ok());
            }
            Event::Sym(expr) => {
                if self.is_freed(eng, expr)
                    && let Some((name, _)) = keys::expr_to_name_sym(expr)
                {
                    eng.warn(format!("'{}' was already freed.", name));
                }
            }
            _ => {}
        }
    }

    fn on_fn_call(&mut self, eng: &mut Engine, _fname: &str, call: &Expr, cookie: u32) {
        let Some(arg) = keys::call_arg(call, cookie as usize) else {
            return;
        };
        self.match_free_arg(eng, strip_expr(arg));
    }

    fn on_return_fact(
        &mut self,
        eng: &mut Engine,
        call: &Expr,
        _assign: Option<&Expr>,
        tag: FactTag,
        param: i32,
        key: &str,
        _value: &str,
    ) {
        // A callee that frees its argument on every path poisons it
        // here too. Maybe-freed stays quiet: warning on it would flag
        // every refcount drop.
        if tag != FactTag::ParamFreed {
            return;
        }
        let Some(arg) = keys::call_arg(call, param as usize) else {
            return;
        };
        let Some((arg_name, sym)) = keys::expr_to_name_sym(strip_expr(arg)) else {
            return;
        };
        let name = keys::key_to_name(&arg_name, key);
        let already = eng
            .get_sm(self.id, &name, sym)
            .is_some_and(|sm| sm.possible_has("freed"));
        if already && !eng.cfg.spammy {
            eng.error(format!("double free of '{}'", name));
        }
        eng.set_state(self.id, &name, sym, Self::freed());
    }

    fn on_modified(&mut self, eng: &mut Engine, sm: &SmState, _mod_expr: Option<&Expr>, _indirect: bool) {
        if sm.state.name() != "ok" {
            let key = sm.key.clone();
            eng.set_state(self.id, &key.name, key.sym, Self::ok());
        }
    }
}
