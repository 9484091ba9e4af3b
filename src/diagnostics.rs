//! Diagnostic collection for one compilation.
//!
//! Nothing in the analyzer stops at the first problem: each one is recorded
//! here and traversal carries on. Errors set a sticky failure flag that gates
//! code generation; warnings never do.

use std::fmt;
use std::io::{self, Write};

use log::{error, warn};

use crate::ast::Pos;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
  Lexical,
  Syntax,
  Semantic,
  Type,
  Warning,
}

impl Category {
  pub fn label(self) -> &'static str {
    match self {
      Self::Lexical => "LEXICAL",
      Self::Syntax => "SYNTAX",
      Self::Semantic => "SEMANTIC",
      Self::Type => "TYPE",
      Self::Warning => "WARNING",
    }
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
  pub category: Category,
  pub pos: Pos,
  pub message: String,
}

impl Diagnostic {
  pub fn new(category: Category, pos: Pos, message: impl Into<String>) -> Self {
    Self {
      category,
      pos,
      message: message.into(),
    }
  }
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}] {}: {}", self.category, self.pos, self.message)
  }
}

/// Errors and warnings in the order they were recorded.
#[derive(Debug, Default)]
pub struct Diagnostics {
  errors: Vec<Diagnostic>,
  warnings: Vec<Diagnostic>,
  failed: bool,
}

impl Diagnostics {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record an error. The failure flag stays set until `reset`.
  pub fn add_error(&mut self, diagnostic: Diagnostic) {
    error!("{diagnostic}");
    self.errors.push(diagnostic);
    self.failed = true;
  }

  pub fn add_warning(&mut self, diagnostic: Diagnostic) {
    warn!("{diagnostic}");
    self.warnings.push(diagnostic);
  }

  pub fn lexical(&mut self, pos: Pos, message: impl Into<String>) {
    self.add_error(Diagnostic::new(Category::Lexical, pos, message));
  }

  pub fn syntax(&mut self, pos: Pos, message: impl Into<String>) {
    self.add_error(Diagnostic::new(Category::Syntax, pos, message));
  }

  pub fn semantic(&mut self, pos: Pos, message: impl Into<String>) {
    self.add_error(Diagnostic::new(Category::Semantic, pos, message));
  }

  pub fn type_error(&mut self, pos: Pos, message: impl Into<String>) {
    self.add_error(Diagnostic::new(Category::Type, pos, message));
  }

  pub fn warning(&mut self, pos: Pos, message: impl Into<String>) {
    self.add_warning(Diagnostic::new(Category::Warning, pos, message));
  }

  pub fn has_errors(&self) -> bool {
    self.failed
  }

  pub fn errors(&self) -> &[Diagnostic] {
    &self.errors
  }

  pub fn warnings(&self) -> &[Diagnostic] {
    &self.warnings
  }

  pub fn summary(&self) -> String {
    format!(
      "{} error(s), {} warning(s)",
      self.errors.len(),
      self.warnings.len()
    )
  }

  /// Write warnings to `out` and errors to `err`, one line each.
  pub fn emit(&self, out: &mut impl Write, err: &mut impl Write) -> io::Result<()> {
    for warning in &self.warnings {
      writeln!(out, "{warning}")?;
    }
    for error in &self.errors {
      writeln!(err, "{error}")?;
    }
    Ok(())
  }

  /// Forget everything recorded so far, including the failure flag.
  pub fn reset(&mut self) {
    self.errors.clear();
    self.warnings.clear();
    self.failed = false;
  }
}
