//! sift-core: value and range algebra for the sift analyzer
//!
//! This crate is the dependency-free foundation the analyzer builds on.
//! It knows nothing about C syntax or checkers; it provides exact
//! integer arithmetic over explicitly typed scalars and canonical
//! interval sets over them.
//!
//! - `sval`: a scalar value tagged with width and signedness, with
//!   overflow-flagged arithmetic and signedness-correct comparison
//! - `range`: canonical lists of disjoint intervals with union,
//!   intersection, difference, and value-preserving casts
//!
//! Everything here is a plain value type: cloning a [`RangeList`] is a
//! `Vec` clone, and no operation allocates outside its result.

pub mod range;
pub mod sval;

pub use range::{Range, RangeList};
pub use sval::{BinOp, IntType, Sval};
