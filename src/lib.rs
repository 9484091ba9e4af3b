//! Crate root: wires together the compilation pipeline.
//!
//! The input is a syntax tree already produced by a front end. Two passes run
//! over it:
//! - `sema` resolves names through `scope`, checks types with `ty`, folds
//!   constants with `eval`, and records problems in `diagnostics`.
//! - `codegen` lowers the tree into x86-64 assembly, but only when analysis
//!   recorded no errors.
//!
//! Each call to [`compile`] owns a fresh scope tree and diagnostic collector,
//! so independent compilations never share state.

pub mod ast;
pub mod codegen;
pub mod diagnostics;
pub mod error;
pub mod eval;
pub mod options;
pub mod scope;
pub mod sema;
pub mod ty;

use log::info;

pub use ast::{Pos, Program};
pub use diagnostics::{Category, Diagnostic, Diagnostics};
pub use error::{CompileError, CompileResult};
pub use options::Options;
pub use scope::ScopeManager;
pub use ty::Type;

use codegen::CodeGenerator;
use sema::SemanticAnalyzer;

/// Everything one compilation produced.
#[derive(Debug)]
pub struct Compilation {
  /// Generated assembly; `None` when analysis (or generation) failed.
  pub assembly: Option<String>,
  pub diagnostics: Diagnostics,
  /// Scope tree as left by the passes, with storage filled in on success.
  pub scopes: ScopeManager,
}

impl Compilation {
  pub fn succeeded(&self) -> bool {
    !self.diagnostics.has_errors()
  }

  pub fn failed(&self) -> bool {
    self.diagnostics.has_errors()
  }

  pub fn errors(&self) -> &[Diagnostic] {
    self.diagnostics.errors()
  }

  pub fn warnings(&self) -> &[Diagnostic] {
    self.diagnostics.warnings()
  }
}

/// Compile with default [`Options`].
pub fn compile(program: &Program) -> Compilation {
  compile_with(program, &Options::default())
}

pub fn compile_with(program: &Program, options: &Options) -> Compilation {
  let mut scopes = ScopeManager::new();
  let mut diagnostics = Diagnostics::new();

  SemanticAnalyzer::new(&mut scopes, &mut diagnostics)
    .with_entry_label(&options.entry_label)
    .analyze(program);

  let assembly = if diagnostics.has_errors() {
    info!("code generation skipped: {}", diagnostics.summary());
    None
  } else {
    match CodeGenerator::new(&mut scopes, &mut diagnostics, options).generate(program) {
      Ok(asm) if !diagnostics.has_errors() => Some(asm),
      Ok(_) => None,
      Err(err) => {
        diagnostics.semantic(err.pos(), err.to_string());
        None
      }
    }
  };

  Compilation {
    assembly,
    diagnostics,
    scopes,
  }
}
