//! Internal failure type shared by the compilation passes.
//!
//! Problems in the input program are never reported through this type; they
//! are recorded as diagnostics and compilation carries on. A `CompileError`
//! means the passes themselves fell out of step with each other (the code
//! generator walked into a block the analyzer never opened, or asked for a
//! symbol the scope tree does not hold). The pipeline turns such an error into
//! a semantic diagnostic anchored at the offending node.

use snafu::Snafu;

use crate::ast::Pos;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
pub enum CompileError {
  #[snafu(display("internal: symbol '{name}' is not visible from the current scope"))]
  UnresolvedSymbol { name: String, pos: Pos },

  #[snafu(display("internal: symbol '{name}' has no storage assigned"))]
  MissingStorage { name: String, pos: Pos },

  #[snafu(display("internal: no analyzed scope matches this block"))]
  MissingScope { pos: Pos },

  #[snafu(display("internal: scope tree is already at its root"))]
  UnbalancedScope { pos: Pos },
}

impl CompileError {
  pub fn unresolved(name: impl Into<String>, pos: Pos) -> Self {
    Self::UnresolvedSymbol {
      name: name.into(),
      pos,
    }
  }

  pub fn missing_storage(name: impl Into<String>, pos: Pos) -> Self {
    Self::MissingStorage {
      name: name.into(),
      pos,
    }
  }

  /// Source position the failure is anchored at.
  pub fn pos(&self) -> Pos {
    match self {
      Self::UnresolvedSymbol { pos, .. }
      | Self::MissingStorage { pos, .. }
      | Self::MissingScope { pos }
      | Self::UnbalancedScope { pos } => *pos,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn position_is_kept_apart_from_the_message() {
    let err = CompileError::unresolved("x", Pos::new(3, 7));
    assert_eq!(
      err.to_string(),
      "internal: symbol 'x' is not visible from the current scope"
    );
    assert_eq!(err.pos(), Pos::new(3, 7));
  }
}
