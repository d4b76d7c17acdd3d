//! Modification tracking
//!
//! When a tracked observable is overwritten, the owning checker's
//! modification hook fires with the previous SM entry. Matching is by
//! name prefix against the modified lvalue:
//!
//! - exact: the tracked name *is* the modified name
//! - indirect: the tracked name is a member chain hanging off the
//!   modified name (`p->x` when `p` is assigned), or a dereference of
//!   it (`*p` when `p` is assigned)
//!
//! The evaluator calls [`modified_lvalue`] on assignments and `++`/`--`,
//! and for `&arg` arguments of any call, since the callee may store
//! through the pointer.

use crate::ast::Expr;
use crate::engine::Engine;
use crate::keys;
use crate::stree::SmState;
use std::rc::Rc;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Match {
    None,
    Exact,
    Indirect,
}

/// How does an SM tracked under `sm_name` relate to a write to `name`?
fn matches(name: &str, sm_name: &str) -> Match {
    if let Some(rest) = sm_name.strip_prefix(name) {
        if rest.is_empty() {
            return Match::Exact;
        }
        if rest.starts_with("->") || rest.starts_with('.') || rest.starts_with('[') {
            return Match::Indirect;
        }
    }
    // `*name` and its members are invalidated by writes to `name`.
    if let Some(deref) = sm_name.strip_prefix('*')
        && let Some(rest) = deref.strip_prefix(name)
        && (rest.is_empty() || rest.starts_with("->") || rest.starts_with('.') || rest.starts_with('['))
    {
        return Match::Indirect;
    }
    Match::None
}

/// Notify owners of every SM affected by a write to `lvalue`.
/// `mod_expr` is the expression performing the modification, when one
/// exists (conservative call clobbers pass `None`... the call itself).
pub fn modified_lvalue(eng: &mut Engine, lvalue: &Expr, mod_expr: Option<&Expr>) {
    let Some((name, sym)) = keys::expr_to_name_sym(lvalue) else {
        return;
    };

    let entries: Vec<Rc<SmState>> = eng.fx.cur.to_vec();
    for sm in entries {
        if sm.key.sym != sym {
            continue;
        }
        let m = matches(&name, &sm.key.name);
        if m == Match::None {
            continue;
        }
        let owner = sm.key.owner;
        if eng.hooks.has_modification_hook(owner) {
            eng.dispatch_modified(owner, &sm, mod_expr, false);
        }
        if m == Match::Indirect && eng.hooks.has_indirect_modification_hook(owner) {
            eng.dispatch_modified(owner, &sm, mod_expr, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert_eq!(matches("p", "p"), Match::Exact);
        assert_eq!(matches("p->x", "p->x"), Match::Exact);
    }

    #[test]
    fn test_indirect_member() {
        assert_eq!(matches("p", "p->x"), Match::Indirect);
        assert_eq!(matches("s", "s.field"), Match::Indirect);
        assert_eq!(matches("a", "a[2]"), Match::Indirect);
    }

    #[test]
    fn test_indirect_deref() {
        assert_eq!(matches("p", "*p"), Match::Indirect);
        assert_eq!(matches("p", "*p->x"), Match::Indirect);
    }

    #[test]
    fn test_no_match_on_prefix_names() {
        assert_eq!(matches("p", "ptr"), Match::None);
        assert_eq!(matches("p", "q->x"), Match::None);
    }
}
