//! The built-in value-range checker ("extra")
//!
//! Owns one state per observable holding the [`RangeList`] of values it
//! may have. The evaluator reads these states to value expressions, the
//! condition engine narrows them on branches, and assignments overwrite
//! them. At call sites the known ranges of arguments are published as
//! caller-info facts; on the second pass those facts seed parameter
//! ranges at function entry.
//!
//! This checker is registered first so its owner id is stable; the
//! engine records it as [`crate::engine::Engine::extra_id`].

use crate::ast::{Expr, SymId};
use crate::db::FactTag;
use crate::engine::Engine;
use crate::hooks::{Check, Event, HookKind};
use crate::keys;
use crate::state::State;
use crate::stree::{CheckId, SmKey};
use sift_core::{IntType, RangeList, Sval};

/// Wrap a range list in a state named after its text form.
pub fn state_for(rl: RangeList) -> State {
    State::with_range(rl.to_string(), rl)
}

/// The integer type value tracking uses for an expression.
pub fn expr_int_type(expr: &Expr) -> IntType {
    expr.ctype.int_type().unwrap_or(IntType::INT)
}

/// The range of plausible non-NULL pointer values.
pub fn valid_ptr_rl() -> RangeList {
    RangeList::new(
        IntType::PTR,
        Sval::from_i64(IntType::PTR, 4096),
        Sval::type_max(IntType::PTR),
    )
}

/// The stored range for an expression, if one is being tracked.
pub fn get_rl(eng: &Engine, expr: &Expr) -> Option<RangeList> {
    let state = eng.get_state_expr(eng.extra_id(), expr)?;
    state.range().cloned()
}

pub fn get_rl_name(eng: &Engine, name: &str, sym: Option<SymId>) -> Option<RangeList> {
    let state = eng.get_state(eng.extra_id(), name, sym)?;
    state.range().cloned()
}

pub fn set_rl(eng: &mut Engine, expr: &Expr, rl: RangeList) {
    let owner = eng.extra_id();
    eng.set_state_expr(owner, expr, state_for(rl));
}

pub fn set_rl_name(eng: &mut Engine, name: &str, sym: Option<SymId>, rl: RangeList) {
    let owner = eng.extra_id();
    eng.set_state(owner, name, sym, state_for(rl));
}

/// Branch-specific ranges for the condition currently being split.
pub fn set_true_false_rl(
    eng: &mut Engine,
    expr: &Expr,
    true_rl: Option<RangeList>,
    false_rl: Option<RangeList>,
) {
    let owner = eng.extra_id();
    eng.set_true_false_states_expr(owner, expr, true_rl.map(state_for), false_rl.map(state_for));
}

/// Forget everything reachable through `base`: `*base`, `base->...`,
/// `base[...]`. Used when a pointer is handed to an unknown callee.
pub fn clear_derefed(eng: &mut Engine, base: &Expr) {
    let Some((name, sym)) = keys::expr_to_name_sym(base) else {
        return;
    };
    let owner = eng.extra_id();
    let star = format!("*{}", name);
    let arrow = format!("{}->", name);
    let dot = format!("{}.", name);
    let index = format!("{}[", name);
    for sm in eng.fx.cur.owned_by(owner) {
        if sm.key.sym != sym {
            continue;
        }
        let n = &*sm.key.name;
        if n == star || n.starts_with(&arrow) || n.starts_with(&dot) || n.starts_with(&index) {
            eng.delete_state(owner, n, sym);
        }
    }
}

#[derive(Default)]
pub struct ExtraCheck;

impl ExtraCheck {
    pub fn new() -> ExtraCheck {
        ExtraCheck
    }
}

impl Check for ExtraCheck {
    fn name(&self) -> &'static str {
        "extra"
    }

    fn register(&mut self, id: CheckId, eng: &mut Engine) {
        eng.set_extra_id(id);
        eng.hooks.add_merge_hook(id);
        eng.hooks.add_unmatched_state_hook(id);
        eng.hooks.add_hook(HookKind::FunctionCall, id);
        eng.hooks.select_caller_info_hook(FactTag::ParamSet, id);
    }

    fn on_event(&mut self, eng: &mut Engine, ev: &Event<'_>) {
        // Publish known argument ranges for the callee's next walk.
        let Event::FunctionCall(call) = ev else { return };
        let Some(fname) = keys::call_name(call) else { return };
        if fname.starts_with("__builtin_") {
            return;
        }
        let crate::ast::ExprKind::Call { args, .. } = &call.kind else { return };
        for (i, arg) in args.iter().enumerate() {
            let Some(rl) = get_rl(eng, arg).or_else(|| {
                arg.const_value()
                    .map(|v| RangeList::single(Sval::from_i64(expr_int_type(arg), v)))
            }) else {
                continue;
            };
            if rl.is_whole() {
                continue;
            }
            eng.insert_caller_info(fname, FactTag::ParamSet, i as i32, "$", &rl.to_string());
        }
    }

    fn on_caller_fact(&mut self, eng: &mut Engine, _tag: FactTag, param: i32, key: &str, value: &str) {
        let Some((pname, psym)) = eng.param_name_sym(param as usize) else {
            return;
        };
        let name = keys::key_to_name(&pname, key);
        let ty = eng
            .symbol(psym)
            .ctype
            .int_type()
            .unwrap_or(IntType::LONG);
        let Ok(rl) = RangeList::parse(ty, value) else {
            return;
        };
        // Facts from several call sites union together.
        let merged = match get_rl_name(eng, &name, Some(psym)) {
            Some(existing) => existing.union(&rl),
            None => rl,
        };
        set_rl_name(eng, &name, Some(psym), merged);
    }

    fn merge_states(&mut self, _key: &SmKey, s1: &State, s2: &State) -> Option<State> {
        let (Some(a), Some(b)) = (s1.range(), s2.range()) else {
            return None;
        };
        Some(state_for(a.union(b)))
    }

    fn unmatched_state(&mut self, sm: &crate::stree::SmState) -> Option<State> {
        // A variable unknown on the other path can hold anything of its
        // type.
        sm.state.range().map(|rl| state_for(RangeList::whole(rl.ty())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_for_names_after_range() {
        let rl = RangeList::new(
            IntType::INT,
            Sval::from_i64(IntType::INT, 0),
            Sval::from_i64(IntType::INT, 7),
        );
        let s = state_for(rl);
        assert_eq!(s.name(), "0-7");
        assert!(s.range().is_some());
    }

    #[test]
    fn test_valid_ptr_excludes_null() {
        let rl = valid_ptr_rl();
        assert!(!rl.contains_zero());
        assert!(rl.contains(Sval::from_i64(IntType::PTR, 4096)));
    }
}
