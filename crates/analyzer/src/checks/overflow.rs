//! Array bounds
//!
//! Remembers the element count of every declared array and checks
//! indices against it: an index whose known range reaches the bound is
//! an out-of-bounds access when dereferenced, and storing the
//! one-past-end address (`p = &a[4]` for `int a[4]`) is flagged at the
//! assignment as likely pointer-walk fallout.

use crate::ast::{Expr, ExprKind, UnOp, strip_expr};
use crate::engine::Engine;
use crate::extra;
use crate::hooks::{Check, Event, HookKind};
use crate::keys;
use crate::state::State;
use crate::stree::CheckId;

pub struct OverflowCheck {
    id: CheckId,
}

impl OverflowCheck {
    pub fn new() -> OverflowCheck {
        OverflowCheck { id: 0 }
    }

    /// Declared element count of the array expression, from the
    /// recorded declaration state or the type itself.
    fn array_size(&self, eng: &Engine, base: &Expr) -> Option<u64> {
        if let Some((_, Some(len))) = base.ctype.array_info() {
            return Some(len);
        }
        let state = eng.get_state_expr(self.id, base)?;
        state.line().map(|n| n as u64)
    }

    /// The highest index an expression may take, when its range is
    /// actually known (a whole-range index is not a finding).
    fn known_max_index(eng: &Engine, index: &Expr) -> Option<i64> {
        if let Some(v) = index.const_value() {
            return Some(v);
        }
        let rl = extra::get_rl(eng, index)?;
        if rl.is_whole() {
            return None;
        }
        let max = rl.max()?;
        i64::try_from(max.value()).ok()
    }
}

impl Default for OverflowCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl Check for OverflowCheck {
    fn name(&self) -> &'static str {
        "overflow"
    }

    fn register(&mut self, id: CheckId, eng: &mut Engine) {
        self.id = id;
        eng.hooks.add_hook(HookKind::Declaration, id);
        eng.hooks.add_hook(HookKind::Deref, id);
        eng.hooks.add_hook(HookKind::Assignment, id);
    }

    fn on_event(&mut self, eng: &mut Engine, ev: &Event<'_>) {
        match ev {
            Event::Declaration(decl) => {
                let sym = eng.symbol(decl.sym);
                if let Some((_, Some(len))) = sym.ctype.array_info() {
                    let name = sym.name.clone();
                    let state = State::with_line(&len.to_string(), len as u32);
                    eng.set_state(self.id, &name, Some(decl.sym), state);
                }
            }

            Event::Deref(expr) => {
                let ExprKind::Index { base, index } = &strip_expr(expr).kind else {
                    return;
                };
                let base = strip_expr(base);
                let Some(size) = self.array_size(eng, base) else { return };
                let Some(idx) = Self::known_max_index(eng, index) else {
                    return;
                };
                if idx >= 0 && (idx as u64) < size {
                    return;
                }
                if let Some((name, _)) = keys::expr_to_name_sym(base) {
                    eng.error(format!("buffer overflow '{}' {} <= {}", name, size, idx));
                }
            }

            // `p = &a[size]` stores a pointer past the end.
            Event::Assignment(assign) => {
                let ExprKind::Assign { right, .. } = &assign.kind else { return };
                let right = strip_expr(right);
                let ExprKind::Unary { op: UnOp::AddrOf, expr: target } = &right.kind else {
                    return;
                };
                let ExprKind::Index { base, index } = &strip_expr(target).kind else {
                    return;
                };
                let base = strip_expr(base);
                let Some(size) = self.array_size(eng, base) else { return };
                let Some(idx) = Self::known_max_index(eng, index) else {
                    return;
                };
                if idx >= 0 && (idx as u64) < size {
                    return;
                }
                if let Some((name, _)) = keys::expr_to_name_sym(base) {
                    eng.warn(format!("buffer overflow '{}' {} <= {}", name, size, idx));
                }
            }

            _ => {}
        }
    }
}
