//! Duplicate condition tests
//!
//! Warns when code re-tests a condition whose outcome is already known
//! and whose variables were not modified in between:
//!
//! ```c
//! if (!p)
//!         return;
//! ...
//! if (p)          /* we tested 'p' before and it was 'true' */
//!         frob(p);
//! ```
//!
//! Inside loops the re-test is legitimate control flow, so those are
//! deferred onto a list and reconsidered after the loop: if the
//! variable was never modified, the loop tested a constant.
//!
//! High noise by definition; only enabled under `--spammy`.

use crate::ast::{Expr, SymId, strip_expr};
use crate::checks::stored_conditions;
use crate::engine::Engine;
use crate::hooks::{Check, Event, HookKind};
use crate::state::State;
use crate::stree::{CheckId, SmState};

pub struct DoubleCheckingCheck {
    id: CheckId,
    stored_id: CheckId,
    /// Conditions seen inside a loop, reconsidered once the loop ends.
    to_check: Vec<(String, Option<SymId>)>,
}

impl DoubleCheckingCheck {
    pub fn new(stored_id: CheckId) -> DoubleCheckingCheck {
        DoubleCheckingCheck { id: 0, stored_id, to_check: Vec::new() }
    }

    fn inside_loop(eng: &Engine) -> bool {
        eng.fx.loops.iter().any(|c| c.is_loop)
    }

    /// Does the engine already know this condition's outcome from the
    /// value ranges alone? Reads the pre-fork tree so the narrowing the
    /// current split just applied does not count as knowledge.
    fn implied(eng: &Engine, expr: &Expr) -> Option<bool> {
        let (name, sym) = crate::keys::expr_to_name_sym(expr)?;
        let sm = eng.fx.cur.get(eng.extra_id(), &name, sym)?;
        let rl = sm.state.range()?;
        if rl.is_whole() || rl.is_empty() {
            return None;
        }
        if !rl.contains_zero() {
            return Some(true);
        }
        if rl.as_single().map(|v| v.is_zero()) == Some(true) {
            return Some(false);
        }
        None
    }
}

impl Check for DoubleCheckingCheck {
    fn name(&self) -> &'static str {
        "double_checking"
    }

    fn register(&mut self, id: CheckId, eng: &mut Engine) {
        self.id = id;
        if !eng.cfg.spammy {
            return;
        }
        eng.hooks.add_hook(HookKind::Condition, id);
        eng.hooks.add_hook(HookKind::StmtAfter, id);
        eng.hooks.add_hook(HookKind::EndFunc, id);
        eng.hooks.add_modification_hook(id);
    }

    fn on_event(&mut self, eng: &mut Engine, ev: &Event<'_>) {
        match ev {
            Event::Condition(expr) => {
                let expr = strip_expr(expr);
                if expr.const_value().is_some() {
                    return;
                }
                if Self::implied(eng, expr).is_none() {
                    return;
                }
                let Some(state) = stored_conditions::get_stored_condition(eng, self.stored_id, expr)
                else {
                    return;
                };
                if state.name() != "true" && state.name() != "false" {
                    return;
                }

                if Self::inside_loop(eng) {
                    if let Some((name, sym)) = crate::keys::expr_to_name_sym(expr) {
                        eng.set_state(self.id, &name, sym, State::new("checked"));
                        if !self.to_check.contains(&(name.clone(), sym)) {
                            self.to_check.push((name, sym));
                        }
                    }
                    return;
                }

                eng.warn(format!(
                    "we tested '{}' before and it was '{}'",
                    expr,
                    state.name()
                ));
            }

            // A loop ended: anything deferred that was never modified
            // inside it was a constant test.
            Event::StmtAfter(stmt) => {
                if !stmt.is_loop() || Self::inside_loop(eng) {
                    return;
                }
                let pending = std::mem::take(&mut self.to_check);
                for (name, sym) in pending {
                    let Some(sm) = eng.get_sm(self.id, &name, sym) else {
                        continue;
                    };
                    if sm.possible_has("modified") {
                        continue;
                    }
                    eng.warn(format!("we tested '{}' already", name));
                }
            }

            Event::EndFunc => {
                self.to_check.clear();
            }

            _ => {}
        }
    }

    fn on_modified(&mut self, eng: &mut Engine, sm: &SmState, _mod_expr: Option<&Expr>, _indirect: bool) {
        let key = sm.key.clone();
        eng.set_state(self.id, &key.name, key.sym, State::new("modified"));
    }
}
