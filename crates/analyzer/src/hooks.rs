//! Hook registry and the checker interface
//!
//! Checkers subscribe to walk events through the [`HookRegistry`] during
//! their `register` call and are dispatched in registration order. The
//! old function-pointer-plus-cookie scheme became the [`Check`] trait:
//! one typed method per hook family, all defaulted to no-ops, so a
//! checker implements exactly the hooks it registered.
//!
//! `InlineFnStart`/`InlineFnEnd` are part of the event vocabulary for
//! checkers that care about inlining boundaries; the current engine does
//! not inline functions and never fires them.

use crate::ast::{Declaration, Expr, FunctionDef, Stmt};
use crate::db::FactTag;
use crate::engine::Engine;
use crate::position::Pos;
use crate::state::State;
use crate::stree::{CheckId, SmKey, SmState};
use std::collections::{HashMap, HashSet};

/// Event families checkers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    FuncDef,
    AfterDef,
    Declaration,
    Assignment,
    AssignmentAfter,
    Binop,
    Condition,
    Preloop,
    Stmt,
    StmtAfter,
    Deref,
    Op,
    Sym,
    FunctionCall,
    FunctionCallAfterDb,
    CallAssignment,
    Return,
    InlineFnStart,
    InlineFnEnd,
    EndFunc,
    AfterFunc,
    Base,
    EndFile,
}

/// One walk event with its payload.
#[derive(Debug)]
pub enum Event<'a> {
    FuncDef(&'a FunctionDef),
    AfterDef(&'a FunctionDef),
    Declaration(&'a Declaration),
    /// The whole assignment expression, fired before the store.
    Assignment(&'a Expr),
    /// Fired after the store took effect.
    AssignmentAfter(&'a Expr),
    Binop(&'a Expr),
    /// The raw condition expression, fired once per condition while the
    /// true/false forks are being built.
    Condition(&'a Expr),
    Preloop(&'a Stmt),
    Stmt(&'a Stmt),
    StmtAfter(&'a Stmt),
    /// A dereferencing expression: `*p`, `p->m`, `p[i]`.
    Deref(&'a Expr),
    /// `++`/`--` in either position.
    Op(&'a Expr),
    /// A plain identifier use.
    Sym(&'a Expr),
    FunctionCall(&'a Expr),
    /// Fired after database summaries for the call were applied.
    FunctionCallAfterDb(&'a Expr),
    /// An assignment whose right side is a function call.
    CallAssignment(&'a Expr),
    Return { expr: Option<&'a Expr>, pos: &'a Pos },
    EndFunc,
    AfterFunc,
    /// A top-level declaration, fired once per global.
    Base(&'a Declaration),
    EndFile,
}

impl Event<'_> {
    pub fn kind(&self) -> HookKind {
        match self {
            Event::FuncDef(_) => HookKind::FuncDef,
            Event::AfterDef(_) => HookKind::AfterDef,
            Event::Declaration(_) => HookKind::Declaration,
            Event::Assignment(_) => HookKind::Assignment,
            Event::AssignmentAfter(_) => HookKind::AssignmentAfter,
            Event::Binop(_) => HookKind::Binop,
            Event::Condition(_) => HookKind::Condition,
            Event::Preloop(_) => HookKind::Preloop,
            Event::Stmt(_) => HookKind::Stmt,
            Event::StmtAfter(_) => HookKind::StmtAfter,
            Event::Deref(_) => HookKind::Deref,
            Event::Op(_) => HookKind::Op,
            Event::Sym(_) => HookKind::Sym,
            Event::FunctionCall(_) => HookKind::FunctionCall,
            Event::FunctionCallAfterDb(_) => HookKind::FunctionCallAfterDb,
            Event::CallAssignment(_) => HookKind::CallAssignment,
            Event::Return { .. } => HookKind::Return,
            Event::EndFunc => HookKind::EndFunc,
            Event::AfterFunc => HookKind::AfterFunc,
            Event::Base(_) => HookKind::Base,
            Event::EndFile => HookKind::EndFile,
        }
    }
}

/// The checker interface. Every method except `name`/`register` has a
/// default empty body; a checker overrides the ones matching its
/// registrations.
pub trait Check {
    fn name(&self) -> &'static str;

    /// Called once at engine construction with the checker's assigned
    /// id; the checker registers its hooks here.
    fn register(&mut self, id: CheckId, eng: &mut Engine);

    /// Generic event dispatch for hooks registered via
    /// [`HookRegistry::add_hook`].
    fn on_event(&mut self, _eng: &mut Engine, _ev: &Event<'_>) {}

    /// A call to a function name this checker registered for.
    fn on_fn_call(&mut self, _eng: &mut Engine, _fname: &str, _call: &Expr, _cookie: u32) {}

    /// An assignment whose right side calls a registered function name.
    /// `assign` is the whole assignment expression.
    fn on_fn_assign(&mut self, _eng: &mut Engine, _fname: &str, _assign: &Expr, _cookie: u32) {}

    /// A registered return-implies hook fired on the branch where the
    /// callee's return value is inside the hook's range. State written
    /// here lands only in that branch.
    fn on_implied_return(&mut self, _eng: &mut Engine, _fname: &str, _call: &Expr, _cookie: u32) {}

    /// A call to a function name this checker registered a
    /// `(name, param, key)` hook for; `arg` is the argument at the
    /// registered parameter index, when the call provides one.
    fn on_param_key(
        &mut self,
        _eng: &mut Engine,
        _call: &Expr,
        _arg: Option<&Expr>,
        _param: usize,
        _key: &str,
        _cookie: u32,
    ) {
    }

    /// A `return_states` fact of a subscribed tag was applied at a call
    /// site. `assign` is the enclosing assignment, when there is one.
    fn on_return_fact(
        &mut self,
        _eng: &mut Engine,
        _call: &Expr,
        _assign: Option<&Expr>,
        _tag: FactTag,
        _param: i32,
        _key: &str,
        _value: &str,
    ) {
    }

    /// A `caller_info` fact of a subscribed tag is being seeded into the
    /// current function's initial state.
    fn on_caller_fact(&mut self, _eng: &mut Engine, _tag: FactTag, _param: i32, _key: &str, _value: &str) {
    }

    /// An observable owned by this checker was overwritten. `indirect`
    /// is set when a parent or member of the tracked key was modified
    /// rather than the key itself.
    fn on_modified(&mut self, _eng: &mut Engine, _sm: &SmState, _mod_expr: Option<&Expr>, _indirect: bool) {
    }

    /// Join two of this checker's states. `None` falls back to the
    /// engine default (`merged`).
    fn merge_states(&mut self, _key: &SmKey, _s1: &State, _s2: &State) -> Option<State> {
        None
    }

    /// State for a key present on only one side of a join. `None` falls
    /// back to `undefined`.
    fn unmatched_state(&mut self, _sm: &SmState) -> Option<State> {
        None
    }

    /// Called for each pairing before the states are merged, letting a
    /// checker adjust its own bookkeeping based on what the other path
    /// did.
    fn pre_merge(&mut self, _eng: &mut Engine, _cur: &SmState, _other: &SmState) {}

    /// Called once per return site after the walk, with the engine's
    /// current tree set to that return's snapshot; the checker publishes
    /// its summary rows here.
    fn on_split_return(&mut self, _eng: &mut Engine, _return_id: u32, _ranges: &str) {}

    /// Called at end of function after all return snapshots were
    /// collected (`eng.fx.returns`).
    fn on_all_return_states(&mut self, _eng: &mut Engine) {}
}

/// A function-name hook registration.
#[derive(Debug, Clone, Copy)]
pub struct FnHook {
    pub check: CheckId,
    pub cookie: u32,
}

/// A return-implies registration: fires on the branch where the return
/// value is within `[lo..hi]`.
#[derive(Debug, Clone, Copy)]
pub struct ImpliesHook {
    pub check: CheckId,
    pub lo: i64,
    pub hi: i64,
    pub cookie: u32,
}

/// A `(function, param, key)` registration.
#[derive(Debug, Clone)]
pub struct ParamKeyHook {
    pub check: CheckId,
    pub param: usize,
    pub key: String,
    pub cookie: u32,
}

/// Table of everything checkers registered. Dispatch order within one
/// hook point is registration order.
#[derive(Debug, Default)]
pub struct HookRegistry {
    events: HashMap<HookKind, Vec<CheckId>>,
    fn_hooks: HashMap<String, Vec<FnHook>>,
    assign_fn_hooks: HashMap<String, Vec<FnHook>>,
    implies_hooks: HashMap<String, Vec<ImpliesHook>>,
    param_key_hooks: HashMap<String, Vec<ParamKeyHook>>,
    return_fact_hooks: HashMap<FactTag, Vec<CheckId>>,
    caller_fact_hooks: HashMap<FactTag, Vec<CheckId>>,
    modification_hooks: HashSet<CheckId>,
    indirect_modification_hooks: HashSet<CheckId>,
    merge_owners: HashSet<CheckId>,
    unmatched_owners: HashSet<CheckId>,
    pre_merge_owners: HashSet<CheckId>,
    dynamic_owners: HashSet<CheckId>,
    split_return_cbs: Vec<CheckId>,
    all_return_states_cbs: Vec<CheckId>,
}

impl HookRegistry {
    pub fn new() -> HookRegistry {
        HookRegistry::default()
    }

    pub fn add_hook(&mut self, kind: HookKind, check: CheckId) {
        self.events.entry(kind).or_default().push(check);
    }

    pub fn add_function_hook(&mut self, fname: &str, check: CheckId, cookie: u32) {
        self.fn_hooks
            .entry(fname.to_string())
            .or_default()
            .push(FnHook { check, cookie });
    }

    pub fn add_function_assign_hook(&mut self, fname: &str, check: CheckId, cookie: u32) {
        self.assign_fn_hooks
            .entry(fname.to_string())
            .or_default()
            .push(FnHook { check, cookie });
    }

    pub fn return_implies_hook(&mut self, fname: &str, lo: i64, hi: i64, check: CheckId, cookie: u32) {
        self.implies_hooks
            .entry(fname.to_string())
            .or_default()
            .push(ImpliesHook { check, lo, hi, cookie });
    }

    pub fn add_param_key_hook(&mut self, fname: &str, param: usize, key: &str, check: CheckId, cookie: u32) {
        self.param_key_hooks
            .entry(fname.to_string())
            .or_default()
            .push(ParamKeyHook { check, param, key: key.to_string(), cookie });
    }

    pub fn select_return_states_hook(&mut self, tag: FactTag, check: CheckId) {
        self.return_fact_hooks.entry(tag).or_default().push(check);
    }

    pub fn select_caller_info_hook(&mut self, tag: FactTag, check: CheckId) {
        self.caller_fact_hooks.entry(tag).or_default().push(check);
    }

    pub fn add_modification_hook(&mut self, owner: CheckId) {
        self.modification_hooks.insert(owner);
    }

    pub fn add_indirect_modification_hook(&mut self, owner: CheckId) {
        self.indirect_modification_hooks.insert(owner);
    }

    pub fn add_merge_hook(&mut self, owner: CheckId) {
        self.merge_owners.insert(owner);
    }

    pub fn add_unmatched_state_hook(&mut self, owner: CheckId) {
        self.unmatched_owners.insert(owner);
    }

    pub fn add_pre_merge_hook(&mut self, owner: CheckId) {
        self.pre_merge_owners.insert(owner);
    }

    /// Mark an owner's states as compared by identity instead of name.
    pub fn set_dynamic_states(&mut self, owner: CheckId) {
        self.dynamic_owners.insert(owner);
    }

    pub fn add_split_return_callback(&mut self, check: CheckId) {
        self.split_return_cbs.push(check);
    }

    pub fn all_return_states_hook(&mut self, check: CheckId) {
        self.all_return_states_cbs.push(check);
    }

    // ---- dispatch-side accessors ----

    pub fn subscribers(&self, kind: HookKind) -> Vec<CheckId> {
        self.events.get(&kind).cloned().unwrap_or_default()
    }

    pub fn fn_hooks_for(&self, fname: &str) -> Vec<FnHook> {
        self.fn_hooks.get(fname).cloned().unwrap_or_default()
    }

    pub fn assign_fn_hooks_for(&self, fname: &str) -> Vec<FnHook> {
        self.assign_fn_hooks.get(fname).cloned().unwrap_or_default()
    }

    pub fn implies_hooks_for(&self, fname: &str) -> Vec<ImpliesHook> {
        self.implies_hooks.get(fname).cloned().unwrap_or_default()
    }

    pub fn param_key_hooks_for(&self, fname: &str) -> Vec<ParamKeyHook> {
        self.param_key_hooks.get(fname).cloned().unwrap_or_default()
    }

    pub fn return_fact_subscribers(&self, tag: FactTag) -> Vec<CheckId> {
        self.return_fact_hooks.get(&tag).cloned().unwrap_or_default()
    }

    pub fn caller_fact_subscribers(&self, tag: FactTag) -> Vec<CheckId> {
        self.caller_fact_hooks.get(&tag).cloned().unwrap_or_default()
    }

    pub fn has_modification_hook(&self, owner: CheckId) -> bool {
        self.modification_hooks.contains(&owner)
    }

    pub fn has_indirect_modification_hook(&self, owner: CheckId) -> bool {
        self.indirect_modification_hooks.contains(&owner)
    }

    pub fn has_merge_hook(&self, owner: CheckId) -> bool {
        self.merge_owners.contains(&owner)
    }

    pub fn has_unmatched_state_hook(&self, owner: CheckId) -> bool {
        self.unmatched_owners.contains(&owner)
    }

    pub fn has_pre_merge_hook(&self, owner: CheckId) -> bool {
        self.pre_merge_owners.contains(&owner)
    }

    pub fn is_dynamic(&self, owner: CheckId) -> bool {
        self.dynamic_owners.contains(&owner)
    }

    pub fn split_return_callbacks(&self) -> Vec<CheckId> {
        self.split_return_cbs.clone()
    }

    pub fn all_return_states_callbacks(&self) -> Vec<CheckId> {
        self.all_return_states_cbs.clone()
    }

    /// Does any checker respond to calls of this function name?
    pub fn knows_function(&self, fname: &str) -> bool {
        self.fn_hooks.contains_key(fname)
            || self.assign_fn_hooks.contains_key(fname)
            || self.implies_hooks.contains_key(fname)
            || self.param_key_hooks.contains_key(fname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_order_is_registration_order() {
        let mut reg = HookRegistry::new();
        reg.add_hook(HookKind::Condition, 3);
        reg.add_hook(HookKind::Condition, 1);
        reg.add_hook(HookKind::Condition, 2);
        assert_eq!(reg.subscribers(HookKind::Condition), vec![3, 1, 2]);
        assert!(reg.subscribers(HookKind::Deref).is_empty());
    }

    #[test]
    fn test_function_hooks() {
        let mut reg = HookRegistry::new();
        reg.add_function_hook("kfree", 4, 0);
        reg.add_function_hook("kfree", 5, 1);
        let hooks = reg.fn_hooks_for("kfree");
        assert_eq!(hooks.len(), 2);
        assert_eq!((hooks[0].check, hooks[0].cookie), (4, 0));
        assert!(reg.knows_function("kfree"));
        assert!(!reg.knows_function("free"));
    }

    #[test]
    fn test_param_key_hooks() {
        let mut reg = HookRegistry::new();
        reg.add_param_key_hook("mod_timer", 1, "$", 2, 0);
        let hooks = reg.param_key_hooks_for("mod_timer");
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].param, 1);
        assert_eq!(hooks[0].key, "$");
        assert!(reg.knows_function("mod_timer"));
    }

    #[test]
    fn test_implies_hooks() {
        let mut reg = HookRegistry::new();
        reg.return_implies_hook("mutex_trylock", 1, 1, 6, 7);
        let hooks = reg.implies_hooks_for("mutex_trylock");
        assert_eq!(hooks.len(), 1);
        assert_eq!((hooks[0].lo, hooks[0].hi, hooks[0].cookie), (1, 1, 7));
    }

    #[test]
    fn test_owner_flag_sets() {
        let mut reg = HookRegistry::new();
        reg.add_modification_hook(2);
        reg.add_merge_hook(2);
        reg.set_dynamic_states(3);
        assert!(reg.has_modification_hook(2));
        assert!(!reg.has_modification_hook(3));
        assert!(reg.has_merge_hook(2));
        assert!(reg.is_dynamic(3));
        assert!(!reg.is_dynamic(2));
    }
}
