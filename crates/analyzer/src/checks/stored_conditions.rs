//! Condition memory
//!
//! Records every simple condition the walk tests, keyed by the
//! condition's text, with a `true` state on the branch where it held
//! and `false` where it did not. Each variable participating in a
//! condition gets a link state naming the conditions it appears in;
//! modifying the variable invalidates them. Other checkers (double
//! checking, primarily) consult the store to recognize a re-test.
//!
//! States here are dynamic: each recorded condition is its own state
//! object, compared by identity, so merges of different outcomes decay
//! to `merged` instead of conflating unrelated records.

use crate::ast::{Expr, ExprKind, strip_expr};
use crate::engine::Engine;
use crate::hooks::{Check, Event, HookKind};
use crate::state::State;
use crate::stree::{CheckId, SmKey, SmState};

/// Conditions more complicated than this are not worth remembering.
const MAX_SCORE: u32 = 2;

pub struct StoredConditionsCheck {
    id: CheckId,
}

impl StoredConditionsCheck {
    pub fn new() -> StoredConditionsCheck {
        StoredConditionsCheck { id: 0 }
    }
}

impl Default for StoredConditionsCheck {
    fn default() -> Self {
        Self::new()
    }
}

/// Look up the recorded outcome of a condition, by text. Reads the
/// pre-fork tree on purpose: while a condition is being split, the
/// record being written for *this* test must not shadow the one from
/// the previous test.
pub fn get_stored_condition(eng: &Engine, stored_id: CheckId, expr: &Expr) -> Option<State> {
    let text = strip_expr(expr).to_string();
    eng.fx.cur.get(stored_id, &text, None).map(|sm| sm.state.clone())
}

/// How hairy is this condition? Local variables and constants are
/// cheap, everything else (calls, globals, side effects) is not worth
/// tracking.
fn complication_score(eng: &Engine, expr: &Expr) -> u32 {
    let expr = strip_expr(expr);
    match &expr.kind {
        ExprKind::IntLit(..) => 0,
        ExprKind::Ident { sym: Some(sym), .. } => {
            let s = eng.symbol(*sym);
            if s.nonlocal || s.is_static { 999 } else { 1 }
        }
        ExprKind::Binary { left, right, .. } | ExprKind::Compare { left, right, .. } => {
            complication_score(eng, left).saturating_add(complication_score(eng, right))
        }
        _ => 999,
    }
}

/// Every named variable under a condition expression.
fn condition_vars(expr: &Expr, out: &mut Vec<Expr>) {
    let expr = strip_expr(expr);
    match &expr.kind {
        ExprKind::Ident { sym: Some(_), .. } => out.push(expr.clone()),
        ExprKind::Binary { left, right, .. } | ExprKind::Compare { left, right, .. } => {
            condition_vars(left, out);
            condition_vars(right, out);
        }
        _ => {}
    }
}

impl Check for StoredConditionsCheck {
    fn name(&self) -> &'static str {
        "stored_conditions"
    }

    fn register(&mut self, id: CheckId, eng: &mut Engine) {
        self.id = id;
        eng.hooks.add_hook(HookKind::Condition, id);
        eng.hooks.add_modification_hook(id);
        eng.hooks.add_merge_hook(id);
        eng.hooks.set_dynamic_states(id);
    }

    fn on_event(&mut self, eng: &mut Engine, ev: &Event<'_>) {
        let Event::Condition(expr) = ev else { return };
        let expr = strip_expr(expr);
        if expr.const_value().is_some() {
            return;
        }
        if complication_score(eng, expr) > MAX_SCORE {
            return;
        }

        let text = expr.to_string();
        eng.set_true_false_states(
            self.id,
            &text,
            None,
            Some(State::with_text("true", text.clone())),
            Some(State::with_text("false", text.clone())),
        );

        let mut vars = Vec::new();
        condition_vars(expr, &mut vars);
        for var in vars {
            self.save_link(eng, &var, &text);
        }
    }

    fn merge_states(&mut self, _key: &SmKey, s1: &State, s2: &State) -> Option<State> {
        // Link states combine their condition lists; condition records
        // themselves fall through to `merged`.
        let (Some(a), Some(b)) = (s1.text(), s2.text()) else {
            return None;
        };
        if s1.name() != "linked" || s2.name() != "linked" {
            return None;
        }
        let mut all: Vec<&str> = a.split(';').collect();
        for c in b.split(';') {
            if !all.contains(&c) {
                all.push(c);
            }
        }
        Some(State::with_text("linked", all.join(";")))
    }

    fn on_modified(&mut self, eng: &mut Engine, sm: &SmState, _mod_expr: Option<&Expr>, _indirect: bool) {
        // A write to a linked variable retires its conditions.
        if sm.state.name() != "linked" {
            return;
        }
        let conditions: Vec<String> = sm
            .state
            .text()
            .map(|t| t.split(';').map(str::to_string).collect())
            .unwrap_or_default();
        for cond in conditions {
            eng.set_state(self.id, &cond, None, State::undefined());
        }
        let key = sm.key.clone();
        eng.set_state(self.id, &key.name, key.sym, State::undefined());
    }
}

impl StoredConditionsCheck {
    fn save_link(&mut self, eng: &mut Engine, var: &Expr, condition: &str) {
        let Some(sym) = var.ident_sym() else { return };
        let Some(name) = var.ident_name() else { return };
        let existing = eng
            .get_state(self.id, name, Some(sym))
            .and_then(|s| s.text().map(str::to_string));
        let combined = match existing {
            Some(old) if old.split(';').any(|c| c == condition) => old,
            Some(old) => format!("{};{}", old, condition),
            None => condition.to_string(),
        };
        eng.set_state(self.id, name, Some(sym), State::with_text("linked", combined));
    }
}
