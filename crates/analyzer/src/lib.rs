//! sift: a flow- and path-sensitive static analyzer for C
//!
//! A translation unit is parsed into an AST, each function is walked by
//! an abstract interpreter, and pluggable checkers subscribe to walk
//! events to track per-path states and report defects: use after free,
//! double free, lock imbalance, leaks, buffer overflows, and friends.
//! Checkers publish per-function summaries into a fact database that
//! later functions (or a second pass) consult at call sites, which is
//! what makes the analysis cross-function.
//!
//! # Embedding
//!
//! ```rust,ignore
//! use sift::{Config, analyze_source};
//!
//! let eng = analyze_source(Config::default(), "input.c", source)?;
//! for diag in &eng.diagnostics {
//!     println!("{}", diag);
//! }
//! ```

pub mod ast;
pub mod checks;
pub mod condition;
pub mod ctype;
pub mod db;
pub mod driver;
pub mod engine;
pub mod eval;
pub mod extra;
pub mod flow;
pub mod hooks;
pub mod keys;
pub mod lexer;
pub mod modify;
pub mod oom;
pub mod parser;
pub mod position;
pub mod state;
pub mod stree;

pub use ast::{Expr, ExprKind, Stmt, StmtKind, TranslationUnit};
pub use db::{FactDb, FactTag};
pub use driver::{analyze_files, analyze_source, build_engine};
pub use engine::{Config, Diagnostic, Engine, Project, Severity};
pub use hooks::{Check, Event, HookKind, HookRegistry};
pub use state::{State, StateData};
pub use stree::{CheckId, SmKey, SmState, Stree};
