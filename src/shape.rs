//! Classification of a tokenized command line into an execution shape.
//!
//! Markers are matched as whole tokens only. When several markers are present
//! the priority is fixed: background, then redirection, then pipe. A marker
//! that loses that contest is handed to the program as an ordinary argument.

use crate::error::ShapeError;

pub const BACKGROUND: &str = "&";
pub const REDIRECT: &str = ">";
pub const PIPE: &str = "|";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Simple,
    Background,
    Redirected,
    Piped { at: usize },
}

impl Shape {
    /// Index of the shape-defining token in a list of `len` tokens.
    pub fn marker_index(&self, len: usize) -> Option<usize> {
        match *self {
            Shape::Simple => None,
            Shape::Background => len.checked_sub(1),
            Shape::Redirected => len.checked_sub(2),
            Shape::Piped { at } => Some(at),
        }
    }
}

/// Borrowed split view of an argument list, one variant per shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan<'a, S> {
    Simple { argv: &'a [S] },
    Background { argv: &'a [S] },
    Redirected { argv: &'a [S], target: &'a str },
    Piped { left: &'a [S], right: &'a [S] },
}

impl<S> Plan<'_, S> {
    pub fn shape_name(&self) -> &'static str {
        match self {
            Plan::Simple { .. } => "simple",
            Plan::Background { .. } => "background",
            Plan::Redirected { .. } => "redirected",
            Plan::Piped { .. } => "piped",
        }
    }
}

fn is<S: AsRef<str>>(tok: &S, marker: &str) -> bool {
    tok.as_ref() == marker
}

/// Total over all lists. Empty and single-token lists are always `Simple`,
/// even when the lone token is a marker.
pub fn classify<S: AsRef<str>>(argv: &[S]) -> Shape {
    let count = argv.len();
    if count < 2 {
        return Shape::Simple;
    }
    if is(&argv[count - 1], BACKGROUND) {
        return Shape::Background;
    }
    if is(&argv[count - 2], REDIRECT) {
        return Shape::Redirected;
    }
    match argv.iter().position(|t| is(t, PIPE)) {
        Some(at) => Shape::Piped { at },
        None => Shape::Simple,
    }
}

/// Classify and split `argv` without copying or mutating it.
pub fn plan<S: AsRef<str>>(argv: &[S]) -> Result<Plan<'_, S>, ShapeError> {
    if argv.is_empty() {
        return Err(ShapeError::Empty);
    }
    let count = argv.len();
    match classify(argv) {
        Shape::Simple => Ok(Plan::Simple { argv }),
        Shape::Background => Ok(Plan::Background { argv: &argv[..count - 1] }),
        Shape::Redirected => {
            let target = argv[count - 1].as_ref();
            let argv = &argv[..count - 2];
            if argv.is_empty() {
                return Err(ShapeError::MissingCommand { marker: REDIRECT });
            }
            Ok(Plan::Redirected { argv, target })
        }
        Shape::Piped { at } => {
            let (left, right) = (&argv[..at], &argv[at + 1..]);
            if left.is_empty() {
                return Err(ShapeError::MalformedPipeline { reason: "nothing before '|'" });
            }
            if right.is_empty() {
                return Err(ShapeError::MalformedPipeline { reason: "nothing after '|'" });
            }
            if right.iter().any(|t| is(t, PIPE)) {
                return Err(ShapeError::MalformedPipeline { reason: "only one '|' is supported" });
            }
            Ok(Plan::Piped { left, right })
        }
    }
}
