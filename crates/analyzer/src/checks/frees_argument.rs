//! Functions that free their arguments
//!
//! Watches the current function free its own parameters and publishes
//! the fact: `ParamFreed` when the parameter is freed on every return
//! path, `MaybeFreed` when only some paths free it. The free checker
//! consumes these rows at call sites, which is how `my_free(p)` style
//! wrappers and release callbacks poison pointers across function
//! boundaries.

use crate::ast::{Expr, strip_expr};
use crate::checks::free_funcs;
use crate::db::FactTag;
use crate::engine::Engine;
use crate::hooks::Check;
use crate::keys;
use crate::state::State;
use crate::stree::CheckId;

pub struct FreesArgumentCheck {
    id: CheckId,
}

impl FreesArgumentCheck {
    pub fn new() -> FreesArgumentCheck {
        FreesArgumentCheck { id: 0 }
    }

    fn mark_if_param(&self, eng: &mut Engine, arg: &Expr) {
        let arg = strip_expr(arg);
        let Some(sym) = arg.ident_sym() else { return };
        if eng.param_index(sym).is_none() {
            return;
        }
        eng.set_state_expr(self.id, arg, State::new("freed"));
    }
}

impl Default for FreesArgumentCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl Check for FreesArgumentCheck {
    fn name(&self) -> &'static str {
        "frees_argument"
    }

    fn register(&mut self, id: CheckId, eng: &mut Engine) {
        self.id = id;
        for (fname, arg) in free_funcs(eng.cfg.project) {
            eng.hooks.add_function_hook(fname, id, *arg);
        }
        // Freeing through a helper with a summary counts too.
        eng.hooks.select_return_states_hook(FactTag::ParamFreed, id);
        eng.hooks.add_split_return_callback(id);
    }

    fn on_fn_call(&mut self, eng: &mut Engine, _fname: &str, call: &Expr, cookie: u32) {
        if let Some(arg) = keys::call_arg(call, cookie as usize) {
            self.mark_if_param(eng, arg);
        }
    }

    fn on_return_fact(
        &mut self,
        eng: &mut Engine,
        call: &Expr,
        _assign: Option<&Expr>,
        _tag: FactTag,
        param: i32,
        key: &str,
        _value: &str,
    ) {
        if key != "$" {
            return;
        }
        if let Some(arg) = keys::call_arg(call, param as usize) {
            self.mark_if_param(eng, arg);
        }
    }

    fn on_split_return(&mut self, eng: &mut Engine, _return_id: u32, _ranges: &str) {
        let Some(func) = eng.fx.func.clone() else { return };
        for (idx, &psym) in func.params.iter().enumerate() {
            let pname = eng.symbol(psym).name.clone();
            let Some(sm) = eng.get_sm(self.id, &pname, Some(psym)) else {
                continue;
            };
            if sm.state.name() == "freed" {
                eng.info(format!("frees argument {}", idx));
                eng.insert_return_state(FactTag::ParamFreed, idx as i32, "$", "");
            } else if sm.possible_has("freed") {
                eng.info(format!("maybe frees argument {}", idx));
                eng.insert_return_state(FactTag::MaybeFreed, idx as i32, "$", "");
            }
        }
    }
}
