//! Checker lattice states
//!
//! A [`State`] is an opaque lattice value owned by one checker: a short
//! printable name plus an optional payload. Two states are normally the
//! same state when their names match; checkers that mint states
//! dynamically (one per condition text, one per range) register as
//! dynamic and are compared by identity instead; see
//! [`crate::hooks::HookRegistry::set_dynamic_states`].
//!
//! `undefined` is the universal top: merging anything with it yields
//! `undefined`. `merged` is what a join produces for two incompatible
//! leaf states when the owning checker supplies no merge function.

use sift_core::RangeList;
use std::fmt;
use std::rc::Rc;

/// Payload carried by a state. Checkers pick whichever fits: the free
/// checker's `freed`/`ok` carry nothing, the value-range checker carries
/// a [`RangeList`], stored conditions carry the condition text.
#[derive(Debug, Clone)]
pub enum StateData {
    None,
    Range(RangeList),
    Text(String),
    Line(u32),
}

#[derive(Debug)]
struct StateInner {
    name: String,
    data: StateData,
}

/// A reference-counted lattice value. Cloning shares the payload.
#[derive(Debug, Clone)]
pub struct State(Rc<StateInner>);

impl State {
    pub fn new(name: &str) -> State {
        State(Rc::new(StateInner { name: name.to_string(), data: StateData::None }))
    }

    pub fn with_range(name: String, rl: RangeList) -> State {
        State(Rc::new(StateInner { name, data: StateData::Range(rl) }))
    }

    pub fn with_text(name: &str, text: String) -> State {
        State(Rc::new(StateInner { name: name.to_string(), data: StateData::Text(text) }))
    }

    pub fn with_line(name: &str, line: u32) -> State {
        State(Rc::new(StateInner { name: name.to_string(), data: StateData::Line(line) }))
    }

    /// The universal top state.
    pub fn undefined() -> State {
        State::new("undefined")
    }

    /// The default result of joining incompatible states.
    pub fn merged() -> State {
        State::new("merged")
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn data(&self) -> &StateData {
        &self.0.data
    }

    pub fn range(&self) -> Option<&RangeList> {
        match &self.0.data {
            StateData::Range(rl) => Some(rl),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.0.data {
            StateData::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn line(&self) -> Option<u32> {
        match &self.0.data {
            StateData::Line(l) => Some(*l),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.0.name == "undefined"
    }

    pub fn is_merged(&self) -> bool {
        self.0.name == "merged"
    }

    /// Identity comparison, for dynamic-state owners.
    pub fn ptr_eq(a: &State, b: &State) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// The comparison the engine uses: identity for dynamic owners,
    /// name equality otherwise.
    pub fn same(a: &State, b: &State, dynamic: bool) -> bool {
        if dynamic {
            State::ptr_eq(a, b)
        } else {
            a.name() == b.name()
        }
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.0.name == other.0.name
    }
}

impl Eq for State {}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::{IntType, RangeList};

    #[test]
    fn test_equality_by_name() {
        let a = State::new("locked");
        let b = State::new("locked");
        assert_eq!(a, b);
        assert!(!State::ptr_eq(&a, &b));
        assert!(State::same(&a, &b, false));
        assert!(!State::same(&a, &b, true));
    }

    #[test]
    fn test_distinguished_states() {
        assert!(State::undefined().is_undefined());
        assert!(State::merged().is_merged());
        assert_ne!(State::undefined(), State::merged());
    }

    #[test]
    fn test_range_payload() {
        let rl = RangeList::whole(IntType::INT);
        let s = State::with_range(rl.to_string(), rl.clone());
        assert_eq!(s.range(), Some(&rl));
        assert_eq!(s.name(), "min-max");
    }

    #[test]
    fn test_display() {
        assert_eq!(State::new("freed").to_string(), "freed");
    }
}
