//! Persistent state trees
//!
//! A [`Stree`] maps `(owner, name, sym)` keys to [`SmState`] entries. It
//! is a persistent AVL tree: `set` and `delete` return a new handle that
//! shares structure with the old one, so the walker can snapshot the
//! tree at a branch point for the cost of one `Rc` clone and keep
//! mutating its own copy. Lookups and updates are O(log n).
//!
//! SM entries are immutable once inserted. Besides the current state,
//! each entry accumulates the `possible` set, every state observed on
//! any path reaching it, which answers "may" queries like *was this
//! pointer ever freed?* The set is deduplicated by state equality and
//! capped; past the cap it collapses to `undefined` rather than growing
//! without bound.
//!
//! Joining two trees is checker-policy-driven and therefore lives on the
//! engine (see `Engine::merge_strees`), not here.

use crate::ast::SymId;
use crate::state::State;
use std::cmp::Ordering;
use std::rc::Rc;

pub type CheckId = u16;

/// Upper bound on a `possible` set before it degrades to `undefined`.
pub const POSSIBLE_CAP: usize = 8;

/// The key of one tracked observable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SmKey {
    pub owner: CheckId,
    pub name: Rc<str>,
    pub sym: Option<SymId>,
}

impl SmKey {
    pub fn new(owner: CheckId, name: &str, sym: Option<SymId>) -> SmKey {
        SmKey { owner, name: Rc::from(name), sym }
    }
}

/// One state-machine entry: the current lattice value for an observable
/// plus the history needed for may-queries.
#[derive(Debug)]
pub struct SmState {
    pub key: SmKey,
    pub state: State,
    /// Every concrete state seen on some path reaching this entry.
    pub possible: Vec<State>,
    /// Line where the state was (last) set or merged.
    pub line: u32,
    /// Id of the tree generation this entry was born in; used to tell
    /// which side of a later merge a value came from.
    pub pool: u32,
}

impl SmState {
    pub fn new(key: SmKey, state: State, line: u32, pool: u32) -> SmState {
        let possible = vec![state.clone()];
        SmState { key, state, possible, line, pool }
    }

    /// Does any path reaching this entry carry `name`?
    pub fn possible_has(&self, name: &str) -> bool {
        self.possible.iter().any(|s| s.name() == name)
    }

    /// Combine two possible-sets, deduplicating by state equality and
    /// collapsing to `[undefined]` past the cap.
    pub fn merge_possible(a: &[State], b: &[State]) -> Vec<State> {
        let mut out: Vec<State> = a.to_vec();
        for s in b {
            if !out.iter().any(|o| o == s) {
                out.push(s.clone());
            }
        }
        if out.len() > POSSIBLE_CAP {
            return vec![State::undefined()];
        }
        out
    }
}

// ============================================================================
//                          Persistent AVL nodes
// ============================================================================

#[derive(Debug)]
struct Node {
    key: SmKey,
    sm: Rc<SmState>,
    left: Option<Rc<Node>>,
    right: Option<Rc<Node>>,
    height: u8,
}

fn height(node: &Option<Rc<Node>>) -> u8 {
    node.as_ref().map(|n| n.height).unwrap_or(0)
}

fn mk(key: SmKey, sm: Rc<SmState>, left: Option<Rc<Node>>, right: Option<Rc<Node>>) -> Rc<Node> {
    let height = 1 + height(&left).max(height(&right));
    Rc::new(Node { key, sm, left, right, height })
}

fn balance_factor(node: &Node) -> i16 {
    height(&node.left) as i16 - height(&node.right) as i16
}

/// Rebuild `node` with AVL rotations if it became unbalanced.
fn balance(node: Rc<Node>) -> Rc<Node> {
    let bf = balance_factor(&node);
    if bf > 1 {
        let left = node.left.clone().expect("left-heavy node has a left child");
        if balance_factor(&left) < 0 {
            // left-right
            let lr = left.right.clone().expect("right-heavy node has a right child");
            let new_left = mk(left.key.clone(), left.sm.clone(), left.left.clone(), lr.left.clone());
            let new_right = mk(node.key.clone(), node.sm.clone(), lr.right.clone(), node.right.clone());
            mk(lr.key.clone(), lr.sm.clone(), Some(new_left), Some(new_right))
        } else {
            // left-left
            let new_right = mk(node.key.clone(), node.sm.clone(), left.right.clone(), node.right.clone());
            mk(left.key.clone(), left.sm.clone(), left.left.clone(), Some(new_right))
        }
    } else if bf < -1 {
        let right = node.right.clone().expect("right-heavy node has a right child");
        if balance_factor(&right) > 0 {
            // right-left
            let rl = right.left.clone().expect("left-heavy node has a left child");
            let new_left = mk(node.key.clone(), node.sm.clone(), node.left.clone(), rl.left.clone());
            let new_right = mk(right.key.clone(), right.sm.clone(), rl.right.clone(), right.right.clone());
            mk(rl.key.clone(), rl.sm.clone(), Some(new_left), Some(new_right))
        } else {
            // right-right
            let new_left = mk(node.key.clone(), node.sm.clone(), node.left.clone(), right.left.clone());
            mk(right.key.clone(), right.sm.clone(), Some(new_left), right.right.clone())
        }
    } else {
        node
    }
}

fn insert(node: &Option<Rc<Node>>, key: &SmKey, sm: &Rc<SmState>) -> Rc<Node> {
    match node {
        None => mk(key.clone(), sm.clone(), None, None),
        Some(n) => match key.cmp(&n.key) {
            Ordering::Equal => mk(key.clone(), sm.clone(), n.left.clone(), n.right.clone()),
            Ordering::Less => {
                let new_left = insert(&n.left, key, sm);
                balance(mk(n.key.clone(), n.sm.clone(), Some(new_left), n.right.clone()))
            }
            Ordering::Greater => {
                let new_right = insert(&n.right, key, sm);
                balance(mk(n.key.clone(), n.sm.clone(), n.left.clone(), Some(new_right)))
            }
        },
    }
}

fn find<'a>(node: &'a Option<Rc<Node>>, key: &SmKey) -> Option<&'a Rc<SmState>> {
    let mut cur = node;
    while let Some(n) = cur {
        match key.cmp(&n.key) {
            Ordering::Equal => return Some(&n.sm),
            Ordering::Less => cur = &n.left,
            Ordering::Greater => cur = &n.right,
        }
    }
    None
}

/// Remove `key`, replacing the node with its in-order successor when it
/// has two children.
fn remove(node: &Option<Rc<Node>>, key: &SmKey) -> Option<Rc<Node>> {
    let n = node.as_ref()?;
    match key.cmp(&n.key) {
        Ordering::Less => {
            let new_left = remove(&n.left, key);
            if same_tree(&new_left, &n.left) {
                return Some(n.clone());
            }
            Some(balance(mk(n.key.clone(), n.sm.clone(), new_left, n.right.clone())))
        }
        Ordering::Greater => {
            let new_right = remove(&n.right, key);
            if same_tree(&new_right, &n.right) {
                return Some(n.clone());
            }
            Some(balance(mk(n.key.clone(), n.sm.clone(), n.left.clone(), new_right)))
        }
        Ordering::Equal => match (&n.left, &n.right) {
            (None, None) => None,
            (Some(l), None) => Some(l.clone()),
            (None, Some(r)) => Some(r.clone()),
            (Some(_), Some(r)) => {
                let succ = leftmost(r);
                let new_right = remove(&n.right, &succ.key);
                Some(balance(mk(succ.key.clone(), succ.sm.clone(), n.left.clone(), new_right)))
            }
        },
    }
}

fn same_tree(a: &Option<Rc<Node>>, b: &Option<Rc<Node>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

fn leftmost(node: &Rc<Node>) -> &Node {
    let mut cur = node;
    while let Some(l) = &cur.left {
        cur = l;
    }
    cur
}

// ============================================================================
//                                  Stree
// ============================================================================

/// A persistent map from [`SmKey`] to [`SmState`]. Cloning is O(1).
#[derive(Debug, Clone, Default)]
pub struct Stree {
    root: Option<Rc<Node>>,
    len: usize,
}

impl Stree {
    pub fn new() -> Stree {
        Stree::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn get(&self, owner: CheckId, name: &str, sym: Option<SymId>) -> Option<&Rc<SmState>> {
        let key = SmKey::new(owner, name, sym);
        find(&self.root, &key)
    }

    /// Insert or replace; returns the new tree. The old handle still
    /// sees the old contents.
    pub fn set(&self, sm: Rc<SmState>) -> Stree {
        let existed = find(&self.root, &sm.key).is_some();
        let key = sm.key.clone();
        let root = Some(insert(&self.root, &key, &sm));
        Stree { root, len: self.len + usize::from(!existed) }
    }

    pub fn delete(&self, owner: CheckId, name: &str, sym: Option<SymId>) -> Stree {
        let key = SmKey::new(owner, name, sym);
        if find(&self.root, &key).is_none() {
            return self.clone();
        }
        Stree { root: remove(&self.root, &key), len: self.len - 1 }
    }

    /// In-order entries, so iteration order is the key order and merges
    /// can merge-join two trees.
    pub fn to_vec(&self) -> Vec<Rc<SmState>> {
        let mut out = Vec::with_capacity(self.len);
        collect(&self.root, &mut out);
        out
    }

    /// Entries belonging to one checker.
    pub fn owned_by(&self, owner: CheckId) -> Vec<Rc<SmState>> {
        self.to_vec().into_iter().filter(|sm| sm.key.owner == owner).collect()
    }
}

fn collect(node: &Option<Rc<Node>>, out: &mut Vec<Rc<SmState>>) {
    if let Some(n) = node {
        collect(&n.left, out);
        out.push(n.sm.clone());
        collect(&n.right, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sm(owner: CheckId, name: &str, state: &str) -> Rc<SmState> {
        Rc::new(SmState::new(SmKey::new(owner, name, None), State::new(state), 1, 0))
    }

    #[test]
    fn test_set_get_delete() {
        let t = Stree::new();
        let t = t.set(sm(1, "p", "freed"));
        let t = t.set(sm(1, "q", "ok"));
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(1, "p", None).unwrap().state.name(), "freed");
        assert!(t.get(2, "p", None).is_none());
        let t = t.delete(1, "p", None);
        assert!(t.get(1, "p", None).is_none());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_replace_keeps_len() {
        let t = Stree::new().set(sm(1, "p", "a")).set(sm(1, "p", "b"));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get(1, "p", None).unwrap().state.name(), "b");
    }

    #[test]
    fn test_persistence() {
        let before = Stree::new().set(sm(1, "p", "allocated"));
        let after = before.set(sm(1, "p", "freed")).set(sm(1, "q", "ok"));
        // The old handle is unchanged by later sets.
        assert_eq!(before.get(1, "p", None).unwrap().state.name(), "allocated");
        assert!(before.get(1, "q", None).is_none());
        assert_eq!(after.get(1, "p", None).unwrap().state.name(), "freed");
    }

    #[test]
    fn test_ordering_and_balance() {
        let mut t = Stree::new();
        for i in 0..100 {
            t = t.set(sm(1, &format!("v{:03}", i), "s"));
        }
        let entries = t.to_vec();
        assert_eq!(entries.len(), 100);
        for w in entries.windows(2) {
            assert!(w[0].key < w[1].key);
        }
    }

    #[test]
    fn test_keys_ordered_by_owner_then_name() {
        let t = Stree::new()
            .set(sm(2, "a", "x"))
            .set(sm(1, "b", "y"))
            .set(sm(1, "a", "z"));
        let keys: Vec<_> = t.to_vec().iter().map(|e| (e.key.owner, e.key.name.to_string())).collect();
        assert_eq!(
            keys,
            vec![(1, "a".to_string()), (1, "b".to_string()), (2, "a".to_string())]
        );
    }

    #[test]
    fn test_owned_by() {
        let t = Stree::new().set(sm(1, "a", "x")).set(sm(2, "b", "y"));
        let mine = t.owned_by(2);
        assert_eq!(mine.len(), 1);
        assert_eq!(&*mine[0].key.name, "b");
    }

    #[test]
    fn test_possible_merge_dedup_and_cap() {
        let a = vec![State::new("locked")];
        let b = vec![State::new("locked"), State::new("unlocked")];
        let merged = SmState::merge_possible(&a, &b);
        assert_eq!(merged.len(), 2);

        let many: Vec<State> = (0..POSSIBLE_CAP + 1).map(|i| State::new(&format!("s{}", i))).collect();
        let collapsed = SmState::merge_possible(&many, &[]);
        assert_eq!(collapsed.len(), 1);
        assert!(collapsed[0].is_undefined());
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let t = Stree::new().set(sm(1, "a", "x"));
        let t2 = t.delete(1, "zzz", None);
        assert_eq!(t2.len(), 1);
    }
}
