//! Lock balance
//!
//! Tracks lock/unlock transitions against the primitive table embedded
//! in `locking.toml`. Double lock and double unlock are reported at the
//! call; at end of function every return site must agree on each lock's
//! state or the function gets an inconsistent-returns warning. Clean
//! transitions (started one way, ended the other) are published as
//! `Lock`/`Unlock` facts so call sites replay them, and trylock-style
//! rows register return-implies hooks that take effect only on the
//! branch where the primitive succeeded.

use crate::ast::Expr;
use crate::db::FactTag;
use crate::engine::Engine;
use crate::hooks::{Check, Event, HookKind};
use crate::keys;
use crate::state::State;
use crate::stree::{CheckId, SmState};
use serde::Deserialize;
use std::collections::HashMap;

/// Embedded primitive table.
static LOCK_TABLE: &str = include_str!("locking.toml");

#[derive(Debug, Clone, Deserialize)]
struct LockRow {
    function: String,
    action: String,
    /// Lock argument index; -1 means a named pseudo-lock.
    arg: i32,
    key: String,
    /// Return range gating the action (trylock success / fail codes).
    implies: Option<[i64; 2]>,
    profile: String,
}

#[derive(Debug, Deserialize)]
struct LockTable {
    lock: Vec<LockRow>,
}

fn profile_name(project: crate::engine::Project) -> &'static str {
    match project {
        crate::engine::Project::None => "none",
        crate::engine::Project::Kernel => "kernel",
        crate::engine::Project::Wine => "wine",
    }
}

pub struct LockingCheck {
    id: CheckId,
    rows: Vec<LockRow>,
    /// Assumed state of each lock at function entry, inferred from the
    /// first transition seen.
    start_states: HashMap<String, &'static str>,
}

impl LockingCheck {
    pub fn new() -> LockingCheck {
        LockingCheck { id: 0, rows: Vec::new(), start_states: HashMap::new() }
    }

    fn locked() -> State {
        State::new("locked")
    }

    fn unlocked() -> State {
        State::new("unlocked")
    }

    /// Resolve the lock a call manipulates to `(name, sym)`. The
    /// address-of on `spin_lock(&l)` is dropped so the lock prints as
    /// the object, not its address.
    fn lock_name(&self, call: &Expr, row: &LockRow) -> Option<(String, Option<crate::ast::SymId>)> {
        if row.arg < 0 {
            return Some((row.key.clone(), None));
        }
        let arg = keys::call_arg(call, row.arg as usize)?;
        let (arg_name, sym) = keys::expr_to_name_sym(arg)?;
        let name = keys::key_to_name(&arg_name, &row.key);
        let name = name.strip_prefix('&').unwrap_or(&name).to_string();
        Some((name, sym))
    }

    fn do_lock(&mut self, eng: &mut Engine, name: &str, sym: Option<crate::ast::SymId>) {
        let sm = eng.get_sm(self.id, name, sym);
        if sm.is_none() {
            self.start_states.entry(name.to_string()).or_insert("unlocked");
        }
        if let Some(sm) = &sm
            && sm.possible_has("locked")
        {
            eng.error(format!("double lock '{}'", name));
        }
        eng.set_state(self.id, name, sym, Self::locked());
    }

    fn do_unlock(&mut self, eng: &mut Engine, name: &str, sym: Option<crate::ast::SymId>) {
        let sm = eng.get_sm(self.id, name, sym);
        if sm.is_none() {
            self.start_states.entry(name.to_string()).or_insert("locked");
        }
        if let Some(sm) = &sm
            && sm.possible_has("unlocked")
        {
            eng.error(format!("double unlock '{}'", name));
        }
        eng.set_state(self.id, name, sym, Self::unlocked());
    }

    fn apply(&mut self, eng: &mut Engine, call: &Expr, row_idx: usize) {
        let row = self.rows[row_idx].clone();
        let Some((name, sym)) = self.lock_name(call, &row) else {
            return;
        };
        match row.action.as_str() {
            "lock" => self.do_lock(eng, &name, sym),
            "unlock" | "restore" => self.do_unlock(eng, &name, sym),
            other => eng.internal_bug(&format!("unknown lock action '{}'", other)),
        }
    }
}

impl Default for LockingCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl Check for LockingCheck {
    fn name(&self) -> &'static str {
        "locking"
    }

    fn register(&mut self, id: CheckId, eng: &mut Engine) {
        self.id = id;
        let table: LockTable = match toml::from_str(LOCK_TABLE) {
            Ok(t) => t,
            Err(e) => eng.internal_bug(&format!("bad embedded lock table: {}", e)),
        };
        let profile = profile_name(eng.cfg.project);
        self.rows = table
            .lock
            .into_iter()
            .filter(|row| row.profile == profile)
            .collect();

        for (idx, row) in self.rows.iter().enumerate() {
            match row.implies {
                Some([lo, hi]) => {
                    eng.hooks.return_implies_hook(&row.function, lo, hi, id, idx as u32)
                }
                None => eng.hooks.add_function_hook(&row.function, id, idx as u32),
            }
        }

        eng.hooks.add_hook(HookKind::FuncDef, id);
        eng.hooks.add_modification_hook(id);
        eng.hooks.select_return_states_hook(FactTag::Lock, id);
        eng.hooks.select_return_states_hook(FactTag::Unlock, id);
        eng.hooks.add_split_return_callback(id);
        eng.hooks.all_return_states_hook(id);
    }

    fn on_event(&mut self, _eng: &mut Engine, ev: &Event<'_>) {
        if matches!(ev, Event::FuncDef(_)) {
            self.start_states.clear();
        }
    }

    fn on_fn_call(&mut self, eng: &mut Engine, _fname: &str, call: &Expr, cookie: u32) {
        self.apply(eng, call, cookie as usize);
    }

    fn on_implied_return(&mut self, eng: &mut Engine, _fname: &str, call: &Expr, cookie: u32) {
        // The engine routed us onto the branch where the primitive
        // succeeded; the transition lands only there.
        self.apply(eng, call, cookie as usize);
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
        let (name, sym) = if param < 0 {
            (key.to_string(), None)
        } else {
            let Some(arg) = keys::call_arg(call, param as usize) else {
                return;
            };
            let Some((arg_name, sym)) = keys::expr_to_name_sym(arg) else {
                return;
            };
            let name = keys::key_to_name(&arg_name, key);
            (name.strip_prefix('&').unwrap_or(&name).to_string(), sym)
        };
        match tag {
            FactTag::Lock => self.do_lock(eng, &name, sym),
            FactTag::Unlock => self.do_unlock(eng, &name, sym),
            _ => {}
        }
    }

    fn on_modified(&mut self, eng: &mut Engine, sm: &SmState, _mod_expr: Option<&Expr>, _indirect: bool) {
        let key = sm.key.clone();
        eng.set_state(self.id, &key.name, key.sym, State::undefined());
    }

    /// Publish clean transitions: a lock that started in one state and
    /// returns in the other.
    fn on_split_return(&mut self, eng: &mut Engine, _return_id: u32, _ranges: &str) {
        for sm in eng.get_all_states(self.id) {
            let final_name = sm.state.name();
            let tag = match final_name {
                "locked" => FactTag::Lock,
                "unlocked" => FactTag::Unlock,
                _ => continue,
            };
            let start = self.start_states.get(&*sm.key.name).copied();
            let clean = match (start, final_name) {
                (Some("unlocked"), "locked") | (Some("locked"), "unlocked") => true,
                _ => false,
            };
            if !clean {
                continue;
            }
            eng.info(format!("returns {} '{}'", final_name, sm.key.name));
            let (param, key) = match sm.key.sym.and_then(|s| eng.param_index(s)) {
                Some(idx) => {
                    let pname = eng
                        .param_name_sym(idx)
                        .map(|(n, _)| n)
                        .unwrap_or_default();
                    match keys::name_to_key(&pname, &sm.key.name) {
                        Some(k) => (idx as i32, k),
                        None => (-1, sm.key.name.to_string()),
                    }
                }
                None => (-1, sm.key.name.to_string()),
            };
            eng.insert_return_state(tag, param, &key, "");
        }
    }

    /// Every return site must agree on every lock.
    fn on_all_return_states(&mut self, eng: &mut Engine) {
        let snapshots = eng.fx.returns.clone();
        if snapshots.is_empty() {
            return;
        }

        // All lock names seen on any return path.
        let mut names: Vec<(String, Option<crate::ast::SymId>)> = Vec::new();
        for snap in &snapshots {
            for sm in snap.stree.owned_by(self.id) {
                let entry = (sm.key.name.to_string(), sm.key.sym);
                if !names.contains(&entry) {
                    names.push(entry);
                }
            }
        }

        for (name, sym) in names {
            let start = self.start_states.get(&name).copied().unwrap_or("unlocked");
            let mut locked_line = None;
            let mut unlocked_line = None;
            for snap in &snapshots {
                let state = snap
                    .stree
                    .get(self.id, &name, sym)
                    .map(|sm| sm.state.name().to_string())
                    .unwrap_or_else(|| start.to_string());
                match state.as_str() {
                    "locked" => locked_line = locked_line.or(Some(snap.line)),
                    "unlocked" => unlocked_line = unlocked_line.or(Some(snap.line)),
                    _ => {}
                }
            }
            if let (Some(l), Some(u)) = (locked_line, unlocked_line) {
                eng.warn(format!(
                    "inconsistent returns {}: locked ({}) unlocked ({})",
                    name, l, u
                ));
            }
        }
    }
}
