//! The checker collection
//!
//! Checkers are instantiated here in a fixed order, which fixes their
//! numeric ids and therefore hook dispatch order for the whole process.
//! The `extra` value-range checker always comes first so everything else
//! can rely on its id. Profile and flag gating happens inside each
//! checker's `register`: a gated-off checker simply registers no hooks.

pub mod double_checking;
pub mod free;
pub mod frees_argument;
pub mod leaks;
pub mod locking;
pub mod null_deref;
pub mod overflow;
pub mod stored_conditions;

use crate::engine::{Engine, Project};
use crate::extra::ExtraCheck;
use std::cell::RefCell;
use std::rc::Rc;

/// The allocation functions whose results the leak and NULL checkers
/// track, per profile.
pub fn allocation_funcs(project: Project) -> &'static [&'static str] {
    match project {
        Project::Kernel => &["kmalloc", "kzalloc", "kcalloc", "vmalloc", "kmemdup"],
        Project::Wine => &["malloc", "calloc", "HeapAlloc", "RtlAllocateHeap"],
        Project::None => &["malloc", "calloc", "realloc", "strdup"],
    }
}

/// The free functions, with the freed argument's index.
pub fn free_funcs(project: Project) -> &'static [(&'static str, u32)] {
    match project {
        Project::Kernel => &[("kfree", 0), ("kvfree", 0), ("kfree_skb", 0)],
        Project::Wine => &[("free", 0), ("HeapFree", 2), ("RtlFreeHeap", 2)],
        Project::None => &[("free", 0)],
    }
}

/// Instantiate every checker against the engine.
pub fn register_all(eng: &mut Engine) {
    eng.register_check(Rc::new(RefCell::new(ExtraCheck::new())));
    let stored = eng.register_check(Rc::new(RefCell::new(
        stored_conditions::StoredConditionsCheck::new(),
    )));
    eng.register_check(Rc::new(RefCell::new(
        double_checking::DoubleCheckingCheck::new(stored),
    )));
    eng.register_check(Rc::new(RefCell::new(free::FreeCheck::new())));
    eng.register_check(Rc::new(RefCell::new(frees_argument::FreesArgumentCheck::new())));
    eng.register_check(Rc::new(RefCell::new(leaks::LeaksCheck::new())));
    eng.register_check(Rc::new(RefCell::new(locking::LockingCheck::new())));
    eng.register_check(Rc::new(RefCell::new(overflow::OverflowCheck::new())));
    eng.register_check(Rc::new(RefCell::new(null_deref::NullDerefCheck::new())));
}
