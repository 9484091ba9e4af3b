//! Settings for one compilation.

/// Label of the process-entry stub unless overridden.
pub const DEFAULT_ENTRY_LABEL: &str = "_start";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
  /// Label of the process-entry stub that calls the program's function.
  pub entry_label: String,
  /// Frame sizes are rounded up to this many bytes.
  pub stack_align: u32,
  /// Lower literal-only subexpressions as a single immediate.
  pub fold_constants: bool,
  /// Annotate the text section with the statements being lowered.
  pub emit_comments: bool,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      entry_label: DEFAULT_ENTRY_LABEL.to_string(),
      stack_align: 16,
      fold_constants: true,
      emit_comments: false,
    }
  }
}

impl Options {
  pub fn with_entry_label(mut self, label: impl Into<String>) -> Self {
    self.entry_label = label.into();
    self
  }

  pub fn with_stack_align(mut self, align: u32) -> Self {
    self.stack_align = align;
    self
  }

  pub fn with_fold_constants(mut self, fold: bool) -> Self {
    self.fold_constants = fold;
    self
  }

  pub fn with_emit_comments(mut self, emit: bool) -> Self {
    self.emit_comments = emit;
    self
  }

  /// `stack_align` rounded up to a power of two (at least 1).
  pub fn alignment(&self) -> u32 {
    self.stack_align.max(1).next_power_of_two()
  }
}
