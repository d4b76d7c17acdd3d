//! The analyzer engine
//!
//! One [`Engine`] bundles everything a walk needs: configuration, the
//! hook registry, the fact database, the checker set, and the
//! per-function context (current state tree, condition forks, return
//! snapshots). Checkers receive `&mut Engine` in every hook and talk to
//! the world exclusively through it; there is no process-global state.
//!
//! Checkers live in `Rc<RefCell<dyn Check>>` slots: dispatch clones the
//! handle, borrows the checker mutably, and hands it the engine. The
//! walk is single-threaded, so the only aliasing to avoid is a checker
//! re-entering itself, which the event protocol does not do.

use crate::ast::{Expr, SymId, Symbol, SymbolTable};
use crate::ctype::CType;
use crate::db::{CallerInfoRow, FactDb, FactTag, FnKey, ReturnImpliesRow, ReturnStateRow};
use crate::hooks::{Check, Event, HookRegistry};
use crate::keys;
use crate::oom;
use crate::position::Pos;
use crate::state::State;
use crate::stree::{CheckId, SmKey, SmState, Stree};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::debug;

// ============================================================================
//                              Configuration
// ============================================================================

/// Project profile: gates checker families and selects the names of the
/// allocator and lock primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Project {
    #[default]
    None,
    Kernel,
    Wine,
}

impl std::str::FromStr for Project {
    type Err = String;

    fn from_str(s: &str) -> Result<Project, String> {
        match s {
            "none" => Ok(Project::None),
            "kernel" => Ok(Project::Kernel),
            "wine" => Ok(Project::Wine),
            other => Err(format!("unknown project '{}' (expected none, kernel, or wine)", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub project: Project,
    /// Emit `info:` rows useful for building summaries.
    pub info: bool,
    /// Enable high-noise checkers.
    pub spammy: bool,
    /// Analyze each function in isolation, no summaries.
    pub no_db: bool,
    /// Abort once VmSize exceeds this many kilobytes.
    pub oom_kb: Option<u64>,
    pub two_pass: bool,
    /// Persist the fact database here across invocations.
    pub db_file: Option<PathBuf>,
}

// ============================================================================
//                               Diagnostics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// One reported finding. Printed to stderr as
/// `<file>:<line> <function>(<return_index>) <severity>: <message>`,
/// with empty parens when the finding is not tied to one return site.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub function: String,
    pub return_index: Option<u32>,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}(", self.file, self.line, self.function)?;
        if let Some(idx) = self.return_index {
            write!(f, "{}", idx)?;
        }
        write!(f, ") {}: {}", self.severity, self.message)
    }
}

// ============================================================================
//                         Per-function walk context
// ============================================================================

/// The function currently being walked.
#[derive(Debug, Clone)]
pub struct CurFn {
    pub name: String,
    pub sym: SymId,
    pub params: Vec<SymId>,
    pub ret: CType,
    pub is_static: bool,
    pub pos: Pos,
}

/// Snapshot of the state tree at one `return` site.
#[derive(Debug, Clone)]
pub struct ReturnSnapshot {
    pub return_id: u32,
    pub ranges: String,
    pub line: u32,
    pub stree: Stree,
}

/// The true/false forks being built while a condition is split. When
/// `target` is set, state writes land on that side only (used by
/// return-implies application).
#[derive(Debug)]
pub struct CondStates {
    pub true_stree: Stree,
    pub false_stree: Stree,
    pub target: Option<bool>,
}

/// Break/continue collectors for one enclosing loop or switch.
#[derive(Debug, Default)]
pub struct LoopCtx {
    pub breaks: Option<Stree>,
    pub continues: Option<Stree>,
    /// Loops take `continue`; switches only take `break`.
    pub is_loop: bool,
}

/// Everything that lives for exactly one function walk. Dropped at
/// `AFTER_FUNC`; cross-function facts must be copied into the database
/// before then.
#[derive(Debug)]
pub struct FnCtx {
    pub func: Option<CurFn>,
    pub symbols: Rc<SymbolTable>,
    pub file: Rc<str>,
    pub cur: Stree,
    pub reachable: bool,
    pub line: u32,
    pub cond: Option<CondStates>,
    pub returns: Vec<ReturnSnapshot>,
    pub loops: Vec<LoopCtx>,
    /// Pending strees merged in by `goto`, keyed by label.
    pub labels: HashMap<String, Stree>,
    /// Set while split-return callbacks run: (return_id, ranges).
    pub cur_return: Option<(u32, String)>,
    pub pool_counter: u32,
}

impl Default for FnCtx {
    fn default() -> FnCtx {
        FnCtx {
            func: None,
            symbols: Rc::new(SymbolTable::new()),
            file: Rc::from(""),
            cur: Stree::new(),
            reachable: true,
            line: 0,
            cond: None,
            returns: Vec::new(),
            loops: Vec::new(),
            labels: HashMap::new(),
            cur_return: None,
            pool_counter: 0,
        }
    }
}

// ============================================================================
//                                  Engine
// ============================================================================

pub struct Engine {
    pub cfg: Config,
    pub hooks: HookRegistry,
    pub db: FactDb,
    pub fx: FnCtx,
    pub diagnostics: Vec<Diagnostic>,
    /// Skip the rest of the current function (set by the walker's guard
    /// points or by a checker).
    pub bail: bool,
    /// The memory budget was exceeded; the driver aborts the run.
    pub oom_hit: bool,
    /// Collect but do not print (pass 1 of two-pass mode).
    pub quiet: bool,
    /// Seed caller-info facts at function entry (second pass).
    pub use_caller_info: bool,
    checks: Vec<Rc<RefCell<dyn Check>>>,
    extra_id: CheckId,
}

impl Engine {
    pub fn new(cfg: Config) -> Engine {
        Engine {
            cfg,
            hooks: HookRegistry::new(),
            db: FactDb::new(),
            fx: FnCtx::default(),
            diagnostics: Vec::new(),
            bail: false,
            oom_hit: false,
            quiet: false,
            use_caller_info: false,
            checks: Vec::new(),
            extra_id: 0,
        }
    }

    /// Install a checker and let it register its hooks. Ids are handed
    /// out in call order, which fixes dispatch order for the process.
    pub fn register_check(&mut self, check: Rc<RefCell<dyn Check>>) -> CheckId {
        let id = self.checks.len() as CheckId;
        self.checks.push(check.clone());
        debug!(id, name = check.borrow().name(), "registering checker");
        check.borrow_mut().register(id, self);
        id
    }

    pub fn set_extra_id(&mut self, id: CheckId) {
        self.extra_id = id;
    }

    /// The id of the built-in value-range checker.
    pub fn extra_id(&self) -> CheckId {
        self.extra_id
    }

    fn check_handle(&self, id: CheckId) -> Rc<RefCell<dyn Check>> {
        self.checks[id as usize].clone()
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    pub fn dispatch(&mut self, ev: &Event<'_>) {
        for id in self.hooks.subscribers(ev.kind()) {
            let check = self.check_handle(id);
            check.borrow_mut().on_event(self, ev);
        }
    }

    pub fn dispatch_fn_hooks(&mut self, fname: &str, call: &Expr) {
        for hook in self.hooks.fn_hooks_for(fname) {
            let check = self.check_handle(hook.check);
            check.borrow_mut().on_fn_call(self, fname, call, hook.cookie);
        }
    }

    pub fn dispatch_assign_fn_hooks(&mut self, fname: &str, assign: &Expr) {
        for hook in self.hooks.assign_fn_hooks_for(fname) {
            let check = self.check_handle(hook.check);
            check.borrow_mut().on_fn_assign(self, fname, assign, hook.cookie);
        }
    }

    pub fn dispatch_param_key_hooks(&mut self, fname: &str, call: &Expr) {
        for hook in self.hooks.param_key_hooks_for(fname) {
            let check = self.check_handle(hook.check);
            let arg = keys::call_arg(call, hook.param);
            check
                .borrow_mut()
                .on_param_key(self, call, arg, hook.param, &hook.key, hook.cookie);
        }
    }

    pub fn dispatch_return_fact(
        &mut self,
        call: &Expr,
        assign: Option<&Expr>,
        tag: FactTag,
        param: i32,
        key: &str,
        value: &str,
    ) {
        for id in self.hooks.return_fact_subscribers(tag) {
            let check = self.check_handle(id);
            check
                .borrow_mut()
                .on_return_fact(self, call, assign, tag, param, key, value);
        }
    }

    pub fn dispatch_caller_fact(&mut self, tag: FactTag, param: i32, key: &str, value: &str) {
        for id in self.hooks.caller_fact_subscribers(tag) {
            let check = self.check_handle(id);
            check.borrow_mut().on_caller_fact(self, tag, param, key, value);
        }
    }

    pub fn dispatch_implied_return(&mut self, fname: &str, call: &Expr, check_id: CheckId, cookie: u32) {
        let check = self.check_handle(check_id);
        check.borrow_mut().on_implied_return(self, fname, call, cookie);
    }

    pub fn dispatch_modified(&mut self, owner: CheckId, sm: &SmState, mod_expr: Option<&Expr>, indirect: bool) {
        let check = self.check_handle(owner);
        check.borrow_mut().on_modified(self, sm, mod_expr, indirect);
    }

    pub fn dispatch_split_returns(&mut self) {
        let callbacks = self.hooks.split_return_callbacks();
        let snapshots = self.fx.returns.clone();
        let saved = self.fx.cur.clone();
        for snap in &snapshots {
            self.fx.cur = snap.stree.clone();
            self.fx.line = snap.line;
            self.fx.cur_return = Some((snap.return_id, snap.ranges.clone()));
            for &id in &callbacks {
                let check = self.check_handle(id);
                check.borrow_mut().on_split_return(self, snap.return_id, &snap.ranges);
            }
        }
        self.fx.cur_return = None;
        self.fx.cur = saved;
    }

    pub fn dispatch_all_return_states(&mut self) {
        for id in self.hooks.all_return_states_callbacks() {
            let check = self.check_handle(id);
            check.borrow_mut().on_all_return_states(self);
        }
    }

    // ------------------------------------------------------------------
    // State access
    // ------------------------------------------------------------------

    pub fn new_pool(&mut self) -> u32 {
        self.fx.pool_counter += 1;
        self.fx.pool_counter
    }

    /// The tree reads go against: the true fork while a condition is
    /// being split, the current tree otherwise.
    fn read_tree(&self) -> &Stree {
        match &self.fx.cond {
            Some(cond) => &cond.true_stree,
            None => &self.fx.cur,
        }
    }

    pub fn get_sm(&self, owner: CheckId, name: &str, sym: Option<SymId>) -> Option<Rc<SmState>> {
        self.read_tree().get(owner, name, sym).cloned()
    }

    pub fn get_state(&self, owner: CheckId, name: &str, sym: Option<SymId>) -> Option<State> {
        self.get_sm(owner, name, sym).map(|sm| sm.state.clone())
    }

    pub fn get_sm_expr(&self, owner: CheckId, expr: &Expr) -> Option<Rc<SmState>> {
        let (name, sym) = keys::expr_to_name_sym(expr)?;
        self.get_sm(owner, &name, sym)
    }

    pub fn get_state_expr(&self, owner: CheckId, expr: &Expr) -> Option<State> {
        self.get_sm_expr(owner, expr).map(|sm| sm.state.clone())
    }

    pub fn set_state(&mut self, owner: CheckId, name: &str, sym: Option<SymId>, state: State) {
        let sm = Rc::new(SmState::new(
            SmKey::new(owner, name, sym),
            state,
            self.fx.line,
            self.fx.pool_counter,
        ));
        match &mut self.fx.cond {
            Some(cond) => match cond.target {
                Some(true) => cond.true_stree = cond.true_stree.set(sm),
                Some(false) => cond.false_stree = cond.false_stree.set(sm),
                None => {
                    cond.true_stree = cond.true_stree.set(sm.clone());
                    cond.false_stree = cond.false_stree.set(sm);
                }
            },
            None => self.fx.cur = self.fx.cur.set(sm),
        }
    }

    pub fn set_state_expr(&mut self, owner: CheckId, expr: &Expr, state: State) {
        if let Some((name, sym)) = keys::expr_to_name_sym(expr) {
            self.set_state(owner, &name, sym, state);
        }
    }

    pub fn delete_state(&mut self, owner: CheckId, name: &str, sym: Option<SymId>) {
        self.fx.cur = self.fx.cur.delete(owner, name, sym);
    }

    /// Give an observable different states on the two branches of the
    /// condition currently being split. Outside a split, the true state
    /// is applied to the current tree.
    pub fn set_true_false_states(
        &mut self,
        owner: CheckId,
        name: &str,
        sym: Option<SymId>,
        true_state: Option<State>,
        false_state: Option<State>,
    ) {
        if self.fx.cond.is_some() {
            if let Some(t) = true_state {
                let saved = self.cond_target();
                self.set_cond_target(Some(true));
                self.set_state(owner, name, sym, t);
                self.set_cond_target(saved);
            }
            if let Some(f) = false_state {
                let saved = self.cond_target();
                self.set_cond_target(Some(false));
                self.set_state(owner, name, sym, f);
                self.set_cond_target(saved);
            }
        } else if let Some(t) = true_state {
            self.set_state(owner, name, sym, t);
        }
    }

    pub fn set_true_false_states_expr(
        &mut self,
        owner: CheckId,
        expr: &Expr,
        true_state: Option<State>,
        false_state: Option<State>,
    ) {
        if let Some((name, sym)) = keys::expr_to_name_sym(expr) {
            self.set_true_false_states(owner, &name, sym, true_state, false_state);
        }
    }

    fn cond_target(&self) -> Option<bool> {
        self.fx.cond.as_ref().and_then(|c| c.target)
    }

    pub fn set_cond_target(&mut self, target: Option<bool>) {
        if let Some(cond) = &mut self.fx.cond {
            cond.target = target;
        }
    }

    pub fn get_all_states(&self, owner: CheckId) -> Vec<Rc<SmState>> {
        self.read_tree().owned_by(owner)
    }

    // ------------------------------------------------------------------
    // Joins
    // ------------------------------------------------------------------

    /// Join two trees. For keys on both sides the owner's merge policy
    /// decides; keys on one side go through the owner's unmatched-state
    /// hook (default `undefined`). Reuses entries untouched by the join
    /// so `merge(a, a)` is `a` up to pointer identity.
    pub fn merge_strees(&mut self, a: &Stree, b: &Stree) -> Stree {
        let left = a.to_vec();
        let right = b.to_vec();
        let pool = self.new_pool();
        let mut out = Stree::new();
        let (mut i, mut j) = (0, 0);

        while i < left.len() || j < right.len() {
            let pick = match (left.get(i), right.get(j)) {
                (Some(l), Some(r)) => l.key.cmp(&r.key),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => break,
            };
            match pick {
                std::cmp::Ordering::Equal => {
                    let l = &left[i];
                    let r = &right[j];
                    i += 1;
                    j += 1;
                    if Rc::ptr_eq(l, r) {
                        out = out.set(l.clone());
                        continue;
                    }
                    self.run_pre_merge(l, r);
                    let dynamic = self.hooks.is_dynamic(l.key.owner);
                    let possible = SmState::merge_possible(&l.possible, &r.possible);
                    // The right side contributed nothing new.
                    if State::same(&l.state, &r.state, dynamic) && possible.len() == l.possible.len()
                    {
                        out = out.set(l.clone());
                        continue;
                    }
                    let state = self.merge_states_for(&l.key, &l.state, &r.state);
                    out = out.set(Rc::new(SmState {
                        key: l.key.clone(),
                        state,
                        possible,
                        line: self.fx.line,
                        pool,
                    }));
                }
                std::cmp::Ordering::Less => {
                    let sm = self.merge_one_sided(&left[i], pool);
                    out = out.set(sm);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    let sm = self.merge_one_sided(&right[j], pool);
                    out = out.set(sm);
                    j += 1;
                }
            }
        }
        out
    }

    fn merge_one_sided(&mut self, sm: &Rc<SmState>, pool: u32) -> Rc<SmState> {
        let owner = sm.key.owner;
        let other = if self.hooks.has_unmatched_state_hook(owner) {
            let check = self.check_handle(owner);
            let result = check.borrow_mut().unmatched_state(sm);
            result.unwrap_or_else(State::undefined)
        } else {
            State::undefined()
        };
        let dynamic = self.hooks.is_dynamic(owner);
        if State::same(&sm.state, &other, dynamic) {
            return sm.clone();
        }
        let state = self.merge_states_for(&sm.key, &sm.state, &other);
        let possible = SmState::merge_possible(&sm.possible, std::slice::from_ref(&other));
        Rc::new(SmState { key: sm.key.clone(), state, possible, line: self.fx.line, pool })
    }

    fn run_pre_merge(&mut self, l: &Rc<SmState>, r: &Rc<SmState>) {
        let owner = l.key.owner;
        if self.hooks.has_pre_merge_hook(owner) {
            let check = self.check_handle(owner);
            check.borrow_mut().pre_merge(self, l, r);
        }
    }

    /// The state-level join: equal states stay, `undefined` wins, then
    /// the owner's merge function, then `merged`.
    pub fn merge_states_for(&mut self, key: &SmKey, s1: &State, s2: &State) -> State {
        let owner = key.owner;
        let dynamic = self.hooks.is_dynamic(owner);
        if State::same(s1, s2, dynamic) {
            return s1.clone();
        }
        if s1.is_undefined() || s2.is_undefined() {
            return State::undefined();
        }
        if self.hooks.has_merge_hook(owner) {
            let check = self.check_handle(owner);
            if let Some(merged) = check.borrow_mut().merge_states(key, s1, s2) {
                return merged;
            }
        }
        State::merged()
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    fn emit(&mut self, severity: Severity, message: String) {
        let diag = Diagnostic {
            file: self.fx.file.to_string(),
            line: self.fx.line,
            function: self
                .fx
                .func
                .as_ref()
                .map(|f| f.name.clone())
                .unwrap_or_default(),
            return_index: self.fx.cur_return.as_ref().map(|(id, _)| *id),
            severity,
            message,
        };
        if !self.quiet {
            eprintln!("{}", diag);
        }
        self.diagnostics.push(diag);
    }

    pub fn error(&mut self, message: String) {
        self.emit(Severity::Error, message);
    }

    pub fn warn(&mut self, message: String) {
        self.emit(Severity::Warn, message);
    }

    /// `info:` rows are only produced under `--info`.
    pub fn info(&mut self, message: String) {
        if self.cfg.info {
            self.emit(Severity::Info, message);
        }
    }

    /// A broken engine invariant. Loud on purpose.
    pub fn internal_bug(&self, message: &str) -> ! {
        eprintln!(
            "internal bug: {} (in {} at {}:{})",
            message,
            self.fx.func.as_ref().map(|f| f.name.as_str()).unwrap_or("<no function>"),
            self.fx.file,
            self.fx.line,
        );
        std::process::abort();
    }

    // ------------------------------------------------------------------
    // Database helpers for checkers
    // ------------------------------------------------------------------

    pub fn cur_fn_key(&self) -> Option<FnKey> {
        let f = self.fx.func.as_ref()?;
        Some(FnKey::new(&self.fx.file, &f.name, f.is_static))
    }

    /// The database key a call to `name` from here resolves to.
    pub fn callee_key(&self, name: &str) -> FnKey {
        for i in 0..self.fx.symbols.len() {
            let sym = self.fx.symbols.get(i as SymId);
            if sym.toplevel && sym.name == name && matches!(sym.ctype, CType::Func { .. }) {
                return FnKey::new(&self.fx.file, name, sym.is_static);
            }
        }
        FnKey::new(&self.fx.file, name, false)
    }

    /// Record a `return_states` fact for the return site currently
    /// being published (valid inside `on_split_return`).
    pub fn insert_return_state(&mut self, tag: FactTag, param: i32, key: &str, value: &str) {
        let Some((return_id, ranges)) = self.fx.cur_return.clone() else {
            return;
        };
        let Some(func) = self.cur_fn_key() else { return };
        if self.cfg.no_db {
            return;
        }
        self.db.insert_return_state(
            func,
            ReturnStateRow {
                return_id,
                return_ranges: ranges,
                tag,
                param,
                key: key.to_string(),
                value: value.to_string(),
            },
        );
    }

    /// Record a `caller_info` fact for `callee` from the current call
    /// site.
    pub fn insert_caller_info(&mut self, callee: &str, tag: FactTag, param: i32, key: &str, value: &str) {
        if self.cfg.no_db {
            return;
        }
        let func = self.callee_key(callee);
        self.db.insert_caller_info(
            func,
            CallerInfoRow {
                call_id: 0,
                tag,
                param,
                key: key.to_string(),
                value: value.to_string(),
            },
        );
    }

    pub fn insert_return_implies(&mut self, lo: i64, hi: i64, tag: FactTag, param: i32, key: &str, value: &str) {
        if self.cfg.no_db {
            return;
        }
        let Some(func) = self.cur_fn_key() else { return };
        self.db.insert_return_implies(
            func,
            ReturnImpliesRow {
                range_start: lo,
                range_end: hi,
                tag,
                param,
                key: key.to_string(),
                value: value.to_string(),
            },
        );
    }

    // ------------------------------------------------------------------
    // Symbols and parameters
    // ------------------------------------------------------------------

    pub fn symbol(&self, id: SymId) -> &Symbol {
        self.fx.symbols.get(id)
    }

    pub fn func_name(&self) -> &str {
        self.fx.func.as_ref().map(|f| f.name.as_str()).unwrap_or("")
    }

    /// Parameter index of a symbol in the current function.
    pub fn param_index(&self, sym: SymId) -> Option<usize> {
        self.fx.symbols.get(sym).param_index
    }

    /// Name and symbol of the current function's `idx`th parameter.
    pub fn param_name_sym(&self, idx: usize) -> Option<(String, SymId)> {
        let f = self.fx.func.as_ref()?;
        let &sym = f.params.get(idx)?;
        Some((self.fx.symbols.get(sym).name.clone(), sym))
    }

    // ------------------------------------------------------------------
    // Resource budget
    // ------------------------------------------------------------------

    /// Statement-boundary memory check. Emits one diagnostic and
    /// requests an abort when the budget is gone.
    pub fn check_oom(&mut self) {
        if self.oom_hit {
            return;
        }
        let Some(limit_kb) = self.cfg.oom_kb else { return };
        if let Some(vsz) = oom::vm_size_kb()
            && vsz > limit_kb
        {
            self.oom_hit = true;
            self.bail = true;
            self.error(format!("out of memory: VmSize {} kb exceeds limit {} kb", vsz, limit_kb));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null;

    impl Check for Null {
        fn name(&self) -> &'static str {
            "null"
        }
        fn register(&mut self, _id: CheckId, _eng: &mut Engine) {}
    }

    fn engine() -> Engine {
        let mut eng = Engine::new(Config::default());
        eng.quiet = true;
        eng.register_check(Rc::new(RefCell::new(Null)));
        eng
    }

    #[test]
    fn test_set_get_state() {
        let mut eng = engine();
        eng.set_state(0, "p", None, State::new("freed"));
        assert_eq!(eng.get_state(0, "p", None).unwrap().name(), "freed");
        assert!(eng.get_state(0, "q", None).is_none());
        eng.delete_state(0, "p", None);
        assert!(eng.get_state(0, "p", None).is_none());
    }

    #[test]
    fn test_merge_equal_is_identity() {
        let mut eng = engine();
        eng.set_state(0, "p", None, State::new("locked"));
        let a = eng.fx.cur.clone();
        let merged = eng.merge_strees(&a, &a);
        let sm_a = a.get(0, "p", None).unwrap();
        let sm_m = merged.get(0, "p", None).unwrap();
        assert!(Rc::ptr_eq(sm_a, sm_m));
    }

    #[test]
    fn test_merge_commutative() {
        let mut eng = engine();
        eng.set_state(0, "p", None, State::new("locked"));
        let a = eng.fx.cur.clone();
        eng.fx.cur = Stree::new();
        eng.set_state(0, "p", None, State::new("unlocked"));
        let b = eng.fx.cur.clone();

        let ab = eng.merge_strees(&a, &b);
        let ba = eng.merge_strees(&b, &a);
        let sm_ab = ab.get(0, "p", None).unwrap();
        let sm_ba = ba.get(0, "p", None).unwrap();
        assert_eq!(sm_ab.state, sm_ba.state);
        assert!(sm_ab.state.is_merged());
        assert_eq!(sm_ab.possible.len(), 2);
    }

    #[test]
    fn test_merge_unmatched_defaults_to_undefined() {
        let mut eng = engine();
        eng.set_state(0, "p", None, State::new("locked"));
        let a = eng.fx.cur.clone();
        let b = Stree::new();
        let merged = eng.merge_strees(&a, &b);
        let sm = merged.get(0, "p", None).unwrap();
        assert!(sm.state.is_undefined());
        assert!(sm.possible_has("locked"));
    }

    #[test]
    fn test_undefined_wins_merge() {
        let mut eng = engine();
        let key = SmKey::new(0, "p", None);
        let out = eng.merge_states_for(&key, &State::new("locked"), &State::undefined());
        assert!(out.is_undefined());
    }

    #[test]
    fn test_true_false_states_during_split() {
        let mut eng = engine();
        eng.fx.cond = Some(CondStates {
            true_stree: eng.fx.cur.clone(),
            false_stree: eng.fx.cur.clone(),
            target: None,
        });
        eng.set_true_false_states(0, "p", None, Some(State::new("yes")), Some(State::new("no")));
        let cond = eng.fx.cond.take().unwrap();
        assert_eq!(cond.true_stree.get(0, "p", None).unwrap().state.name(), "yes");
        assert_eq!(cond.false_stree.get(0, "p", None).unwrap().state.name(), "no");
    }

    #[test]
    fn test_diagnostic_format() {
        let d = Diagnostic {
            file: "x.c".to_string(),
            line: 12,
            function: "frob".to_string(),
            return_index: None,
            severity: Severity::Error,
            message: "dereferencing freed memory 'p'".to_string(),
        };
        assert_eq!(d.to_string(), "x.c:12 frob() error: dereferencing freed memory 'p'");
        let d2 = Diagnostic { return_index: Some(2), severity: Severity::Warn, ..d };
        assert_eq!(
            d2.to_string(),
            "x.c:12 frob(2) warn: dereferencing freed memory 'p'"
        );
    }
}
