//! Source positions
//!
//! Every AST node carries one of these so diagnostics can point at the
//! offending line. The file name is reference-counted; positions are
//! cloned freely during the walk.

use std::fmt;
use std::rc::Rc;

/// A `(file, line, col)` source position. Lines and columns are 1-based
/// for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pos {
    pub file: Rc<str>,
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(file: &Rc<str>, line: u32, col: u32) -> Self {
        Pos { file: Rc::clone(file), line, col }
    }

    /// A position for synthesized nodes with no source text.
    pub fn none() -> Self {
        Pos { file: Rc::from("<none>"), line: 0, col: 0 }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}
