//! Code generation: lower an analyzed program into x86-64 NASM assembly.
//!
//! Every expression leaves its result in `eax`. Binary operators save the
//! left operand on the machine stack while the right one is computed, then
//! pop it into `ecx`. Each variable gets a fixed frame slot addressed
//! relative to `rbp`; globals live in labelled data-section cells.
//!
//! The generator replays the analyzer's scope tree in the same order the
//! analyzer built it, so every name resolves to the entry the analyzer saw.

use std::borrow::Cow;
use std::fmt::Write as _;

use log::{debug, info};

use crate::ast::{
  BinaryOp, Declaration, Expr, ExprKind, FunctionDef, Param, Pos, Program, Stmt, StmtKind, UnaryOp,
  always_returns, for_each_declaration,
};
use crate::diagnostics::Diagnostics;
use crate::error::{CompileError, CompileResult};
use crate::eval::{Evaluator, is_constant};
use crate::options::Options;
use crate::scope::{ScopeManager, Storage, SymbolEntry};
use crate::ty::Type;

/// Registers carrying the first six integer arguments.
const ARG_REGS: [&str; 6] = ["edi", "esi", "edx", "ecx", "r8d", "r9d"];
const ARG_REGS_BYTE: [&str; 6] = ["dil", "sil", "dl", "cl", "r8b", "r9b"];

/// Bytes of locals and parameters `func` needs, rounded up to `align`.
///
/// Declarations nested in `if`/`while` bodies count too: every variable keeps
/// its own slot for the whole call.
pub fn frame_size(func: &FunctionDef, align: u32) -> u32 {
  let params: u32 = func.params.iter().map(|param| param.ty.size()).sum();
  let mut locals = 0;
  for_each_declaration(&func.body, &mut |decl| {
    locals += decl.ty.size() * decl.vars.len() as u32;
  });
  align_to(params + locals, align)
}

fn align_to(size: u32, align: u32) -> u32 {
  (size + align - 1) & !(align - 1)
}

const CONSTRUCT_LABELS: [&str; 4] = ["else_", "endif_", "while_start_", "while_end_"];
const KEYWORDS: [&str; 8] = ["byte", "word", "dword", "qword", "rel", "abs", "section", "global"];

/// Whether a global named `name` cannot become a data-section label because
/// the generated file already defines or reserves that symbol.
pub fn clashes_with_label(name: &str, function: &str, entry: &str) -> bool {
  if name == function || name == entry || name.strip_suffix("_exit") == Some(function) {
    return true;
  }
  let numbered = CONSTRUCT_LABELS
    .iter()
    .any(|&prefix| name.strip_prefix(prefix).is_some_and(is_number));
  // NASM matches registers and keywords case-insensitively.
  let lower = name.to_ascii_lowercase();
  numbered || is_register(&lower) || KEYWORDS.contains(&lower.as_str())
}

fn is_number(text: &str) -> bool {
  !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

fn is_register(name: &str) -> bool {
  const WORD: [&str; 8] = ["ax", "bx", "cx", "dx", "si", "di", "bp", "sp"];
  const BYTE: [&str; 13] = [
    "al", "bl", "cl", "dl", "ah", "bh", "ch", "dh", "sil", "dil", "bpl", "spl", "rip",
  ];
  if WORD.contains(&name) || BYTE.contains(&name) {
    return true;
  }
  if let Some(base) = name.strip_prefix(&['r', 'e'][..])
    && WORD.contains(&base)
  {
    return true;
  }
  // r8 through r15, optionally sized: r8d, r8w, r8b.
  let Some(rest) = name.strip_prefix('r') else {
    return false;
  };
  let split = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
  let (digits, suffix) = rest.split_at(split);
  !digits.starts_with('0')
    && matches!(digits.parse::<u8>(), Ok(8..=15))
    && matches!(suffix, "" | "d" | "w" | "b")
}

fn operand(entry: &SymbolEntry, pos: Pos) -> CompileResult<String> {
  let width = entry.ty.ptr_width();
  match entry.storage {
    Some(Storage::Global) => Ok(format!("{width} [{}]", entry.name)),
    Some(Storage::Local { offset }) => Ok(format!("{width} [rbp-{offset}]")),
    None => Err(CompileError::missing_storage(&entry.name, pos)),
  }
}

pub struct CodeGenerator<'a> {
  scopes: &'a mut ScopeManager,
  diagnostics: &'a mut Diagnostics,
  options: &'a Options,
  data: String,
  text: String,
  labels: usize,
  /// Name of the function being lowered; `None` at global scope.
  function: Option<String>,
  frame_size: u32,
  next_offset: u32,
}

impl<'a> CodeGenerator<'a> {
  pub fn new(
    scopes: &'a mut ScopeManager,
    diagnostics: &'a mut Diagnostics,
    options: &'a Options,
  ) -> Self {
    Self {
      scopes,
      diagnostics,
      options,
      data: String::new(),
      text: String::new(),
      labels: 0,
      function: None,
      frame_size: 0,
      next_offset: 0,
    }
  }

  /// Emit the whole program. Only meaningful once analysis reported no
  /// errors: the generator trusts every name and type it meets.
  pub fn generate(mut self, program: &Program) -> CompileResult<String> {
    info!("code generation started");
    self.scopes.rewind();

    for decl in &program.globals {
      self.declaration(decl)?;
    }
    self.function(&program.function)?;

    let entry = &self.options.entry_label;
    let mut asm = String::new();
    asm.push_str("section .data\n");
    asm.push_str(&self.data);
    asm.push_str("\nsection .text\n");
    let _ = writeln!(asm, "global {entry}\n");
    let _ = writeln!(asm, "{entry}:");
    let _ = writeln!(asm, "    call {}", program.function.name);
    asm.push_str("    mov edi, eax\n");
    asm.push_str("    mov eax, 60\n");
    asm.push_str("    syscall\n\n");
    asm.push_str(&self.text);

    info!("code generation finished ({} labels)", self.labels);
    Ok(asm)
  }

  fn emit(&mut self, instruction: &str) {
    self.text.push_str("    ");
    self.text.push_str(instruction);
    self.text.push('\n');
  }

  fn emit_label(&mut self, label: &str) {
    self.text.push_str(label);
    self.text.push_str(":\n");
  }

  fn comment(&mut self, what: impl FnOnce() -> String) {
    if self.options.emit_comments {
      let line = format!("; {}", what());
      self.emit(&line);
    }
  }

  fn next_label(&mut self) -> usize {
    let id = self.labels;
    self.labels += 1;
    id
  }

  fn enter_block(&mut self, pos: Pos) -> CompileResult<()> {
    self
      .scopes
      .descend()
      .map(|_| ())
      .ok_or(CompileError::MissingScope { pos })
  }

  fn leave_block(&mut self, pos: Pos) -> CompileResult<()> {
    if self.scopes.exit_scope() {
      Ok(())
    } else {
      Err(CompileError::UnbalancedScope { pos })
    }
  }

  fn function(&mut self, func: &FunctionDef) -> CompileResult<()> {
    self.frame_size = frame_size(func, self.options.alignment());
    self.next_offset = 0;
    self.function = Some(func.name.clone());
    debug!("function {}: frame of {} bytes", func.name, self.frame_size);

    self.enter_block(func.pos)?;
    self.emit_label(&func.name);
    self.emit("push rbp");
    self.emit("mov rbp, rsp");
    if self.frame_size > 0 {
      let reserve = format!("sub rsp, {}", self.frame_size);
      self.emit(&reserve);
    }

    for (index, param) in func.params.iter().enumerate() {
      self.param(index, param)?;
    }
    self.block(&func.body)?;

    if !always_returns(&func.body) {
      self.emit("mov eax, 0");
    }
    self.emit_label(&format!("{}_exit", func.name));
    self.emit("mov rsp, rbp");
    self.emit("pop rbp");
    self.emit("ret");
    self.text.push('\n');

    self.leave_block(func.pos)?;
    self.function = None;
    Ok(())
  }

  /// Reserve the next frame slot for a value of type `ty`.
  fn allocate(&mut self, ty: Type) -> Storage {
    self.next_offset += ty.size();
    Storage::Local {
      offset: self.next_offset,
    }
  }

  fn place(&mut self, name: &str, storage: Storage, pos: Pos) -> CompileResult<String> {
    if !self.scopes.place(name, storage) {
      return Err(CompileError::unresolved(name, pos));
    }
    let entry = self
      .scopes
      .lookup_local(name)
      .ok_or_else(|| CompileError::unresolved(name, pos))?;
    operand(entry, pos)
  }

  fn param(&mut self, index: usize, param: &Param) -> CompileResult<()> {
    let storage = self.allocate(param.ty);
    let slot = self.place(&param.name, storage, param.pos)?;
    let wide = param.ty != Type::Bool;

    if let Some(reg) = ARG_REGS.get(index) {
      let reg = if wide { reg } else { &ARG_REGS_BYTE[index] };
      self.emit(&format!("mov {slot}, {reg}"));
    } else {
      // Arguments past the sixth sit above the saved rbp and return address.
      let caller_slot = 16 + 8 * (index - ARG_REGS.len());
      self.emit(&format!("mov eax, dword [rbp+{caller_slot}]"));
      self.emit(&format!("mov {slot}, {}", if wide { "eax" } else { "al" }));
    }
    Ok(())
  }

  fn block(&mut self, body: &[Stmt]) -> CompileResult<()> {
    for stmt in body {
      self.statement(stmt)?;
    }
    Ok(())
  }

  fn scoped_block(&mut self, body: &[Stmt], pos: Pos) -> CompileResult<()> {
    self.enter_block(pos)?;
    self.block(body)?;
    self.leave_block(pos)
  }

  fn statement(&mut self, stmt: &Stmt) -> CompileResult<()> {
    match &stmt.kind {
      StmtKind::Declaration(decl) => {
        self.comment(|| decl.to_string());
        self.declaration(decl)
      }
      StmtKind::Assign { name, value } => {
        self.comment(|| stmt.to_string());
        self.expr(value)?;
        let entry = self
          .scopes
          .lookup_stored(name)
          .ok_or_else(|| CompileError::unresolved(name, stmt.pos))?;
        let store = store_from_eax(entry, stmt.pos)?;
        self.emit(&store);
        Ok(())
      }
      StmtKind::Return(value) => {
        self.comment(|| stmt.to_string());
        match value {
          Some(value) => self.expr(value)?,
          None => self.emit("mov eax, 0"),
        }
        let function = self.function.clone().unwrap_or_default();
        self.emit(&format!("jmp {function}_exit"));
        Ok(())
      }
      StmtKind::Expr(expr) => {
        self.comment(|| stmt.to_string());
        self.expr(expr)
      }
      StmtKind::If {
        cond,
        then_body,
        else_body,
      } => {
        self.comment(|| format!("if ({cond})"));
        let id = self.next_label();
        let end_label = format!("endif_{id}");

        self.expr(cond)?;
        self.emit("cmp eax, 0");
        match else_body {
          Some(else_body) => {
            let else_label = format!("else_{id}");
            self.emit(&format!("je {else_label}"));
            self.scoped_block(then_body, stmt.pos)?;
            self.emit(&format!("jmp {end_label}"));
            self.emit_label(&else_label);
            self.scoped_block(else_body, stmt.pos)?;
          }
          None => {
            self.emit(&format!("je {end_label}"));
            self.scoped_block(then_body, stmt.pos)?;
          }
        }
        self.emit_label(&end_label);
        Ok(())
      }
      StmtKind::While { cond, body } => {
        self.comment(|| format!("while ({cond})"));
        let id = self.next_label();
        let start_label = format!("while_start_{id}");
        let end_label = format!("while_end_{id}");

        self.emit_label(&start_label);
        self.expr(cond)?;
        self.emit("cmp eax, 0");
        self.emit(&format!("je {end_label}"));
        self.scoped_block(body, stmt.pos)?;
        self.emit(&format!("jmp {start_label}"));
        self.emit_label(&end_label);
        Ok(())
      }
    }
  }

  fn declaration(&mut self, decl: &Declaration) -> CompileResult<()> {
    for var in &decl.vars {
      if self.function.is_none() {
        let value = match &var.init {
          Some(init) => Evaluator::new(&*self.scopes, &mut *self.diagnostics)
            .evaluate(init)
            .map_or(0, |value| value.as_machine_int()),
          None => 0,
        };
        self.place(&var.name, Storage::Global, var.pos)?;
        let _ = writeln!(
          self.data,
          "    {} {} {value}",
          var.name,
          decl.ty.data_directive()
        );
        continue;
      }

      // The initializer is lowered before the slot exists so that
      // `int x = x;` reads the outer `x`.
      let immediate = match &var.init {
        Some(init) => {
          let init = self.fold(init);
          match &init.kind {
            ExprKind::Num { value } => Some(*value),
            ExprKind::Bool { value } => Some(i32::from(*value)),
            _ => {
              self.expr(&init)?;
              None
            }
          }
        }
        None => Some(0),
      };

      let storage = self.allocate(decl.ty);
      let slot = self.place(&var.name, storage, var.pos)?;
      match immediate {
        Some(value) => self.emit(&format!("mov {slot}, {value}")),
        None => {
          let reg = if decl.ty == Type::Bool { "al" } else { "eax" };
          self.emit(&format!("mov {slot}, {reg}"));
        }
      }
    }
    Ok(())
  }

  /// Replace a literal-only expression by its value when folding is on.
  fn fold<'e>(&mut self, expr: &'e Expr) -> Cow<'e, Expr> {
    if self.options.fold_constants && !expr.is_literal() && is_constant(expr) {
      Cow::Owned(Evaluator::new(&*self.scopes, &mut *self.diagnostics).constant_fold(expr))
    } else {
      Cow::Borrowed(expr)
    }
  }

  /// Lower `expr`, leaving its value in `eax`.
  fn expr(&mut self, expr: &Expr) -> CompileResult<()> {
    let expr = self.fold(expr);
    match &expr.kind {
      ExprKind::Num { value } => self.emit(&format!("mov eax, {value}")),
      ExprKind::Bool { value } => self.emit(&format!("mov eax, {}", i32::from(*value))),
      ExprKind::Var { name } => {
        let entry = self
          .scopes
          .lookup_stored(name)
          .ok_or_else(|| CompileError::unresolved(name, expr.pos))?;
        let load = load_into_eax(entry, expr.pos)?;
        self.emit(&load);
      }
      ExprKind::Unary { op, operand } => {
        self.expr(operand)?;
        match op {
          UnaryOp::Not => self.emit("xor eax, 1"),
        }
      }
      ExprKind::Binary { op, lhs, rhs } => {
        self.expr(lhs)?;
        self.emit("push rax");
        self.expr(rhs)?;
        self.emit("pop rcx");
        self.binary(*op);
      }
    }
    Ok(())
  }

  /// Combine `ecx` (left operand) with `eax` (right operand) into `eax`.
  fn binary(&mut self, op: BinaryOp) {
    match op {
      BinaryOp::Add => self.emit("add eax, ecx"),
      BinaryOp::Sub => {
        self.emit("sub ecx, eax");
        self.emit("mov eax, ecx");
      }
      BinaryOp::Mul => self.emit("imul eax, ecx"),
      BinaryOp::Div => {
        self.emit("xchg eax, ecx");
        self.emit("cdq");
        self.emit("idiv ecx");
      }
      BinaryOp::Lt => self.compare("setl"),
      BinaryOp::Gt => self.compare("setg"),
      BinaryOp::Eq => self.compare("sete"),
      // Booleans are 0 or 1, so bitwise and/or are the logical ones.
      BinaryOp::And => self.emit("and eax, ecx"),
      BinaryOp::Or => self.emit("or eax, ecx"),
    }
  }

  fn compare(&mut self, set: &str) {
    self.emit("cmp ecx, eax");
    self.emit(&format!("{set} al"));
    self.emit("movzx eax, al");
  }
}

fn load_into_eax(entry: &SymbolEntry, pos: Pos) -> CompileResult<String> {
  let src = operand(entry, pos)?;
  Ok(match entry.ty {
    Type::Bool => format!("movzx eax, {src}"),
    _ => format!("mov eax, {src}"),
  })
}

fn store_from_eax(entry: &SymbolEntry, pos: Pos) -> CompileResult<String> {
  let dst = operand(entry, pos)?;
  Ok(match entry.ty {
    Type::Bool => format!("mov {dst}, al"),
    _ => format!("mov {dst}, eax"),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::VarDecl;
  use crate::sema::SemanticAnalyzer;

  fn at(line: u32) -> Pos {
    Pos::new(line, 1)
  }

  fn decl(ty: Type, name: &str, init: Option<Expr>, line: u32) -> Stmt {
    Stmt::declaration(Declaration::new(
      ty,
      vec![VarDecl::new(name, init, at(line))],
      at(line),
    ))
  }

  fn compile(program: &Program, options: &Options) -> String {
    let mut scopes = ScopeManager::new();
    let mut diagnostics = Diagnostics::new();
    SemanticAnalyzer::new(&mut scopes, &mut diagnostics).analyze(program);
    assert!(!diagnostics.has_errors(), "{:?}", diagnostics.errors());
    CodeGenerator::new(&mut scopes, &mut diagnostics, options)
      .generate(program)
      .unwrap()
  }

  fn lines(asm: &str) -> Vec<&str> {
    asm.lines().map(str::trim).collect()
  }

  fn position(asm: &[&str], line: &str) -> usize {
    asm
      .iter()
      .position(|l| *l == line)
      .unwrap_or_else(|| panic!("missing `{line}` in\n{}", asm.join("\n")))
  }

  #[test]
  fn frame_counts_nested_declarations() {
    let func = FunctionDef::new(
      Type::Int,
      "main",
      vec![Param::new(Type::Int, "n", at(1))],
      vec![
        decl(Type::Int, "a", None, 2),
        Stmt::while_loop(
          Expr::boolean(true, at(3)),
          vec![decl(Type::Bool, "flag", None, 4), decl(Type::Int, "b", None, 5)],
          at(3),
        ),
      ],
      at(1),
    );
    assert_eq!(frame_size(&func, 16), 16);
    assert_eq!(frame_size(&func, 8), 16);
    assert_eq!(frame_size(&func, 4), 16);
    assert_eq!(frame_size(&func, 1), 13);
  }

  #[test]
  fn subtraction_keeps_operand_order() {
    let body = vec![Stmt::ret(
      Some(Expr::binary(
        BinaryOp::Sub,
        Expr::var("a", at(2)),
        Expr::var("b", at(2)),
        at(2),
      )),
      at(2),
    )];
    let params = vec![
      Param::new(Type::Int, "a", at(1)),
      Param::new(Type::Int, "b", at(1)),
    ];
    let program = Program::new(FunctionDef::new(Type::Int, "main", params, body, at(1)));
    let asm = compile(&program, &Options::default());
    let asm = lines(&asm);

    let store_a = position(&asm, "mov dword [rbp-4], edi");
    let store_b = position(&asm, "mov dword [rbp-8], esi");
    assert!(store_a < store_b);

    let load_a = position(&asm, "mov eax, dword [rbp-4]");
    let push = position(&asm, "push rax");
    let load_b = position(&asm, "mov eax, dword [rbp-8]");
    let pop = position(&asm, "pop rcx");
    let sub = position(&asm, "sub ecx, eax");
    assert!(load_a < push && push < load_b && load_b < pop && pop < sub);
    assert_eq!(asm[sub + 1], "mov eax, ecx");
  }

  #[test]
  fn shadowed_variable_gets_its_own_slot() {
    let body = vec![
      decl(Type::Int, "x", Some(Expr::number(1, at(2))), 2),
      Stmt::if_else(
        Expr::boolean(true, at(3)),
        vec![
          decl(Type::Int, "x", Some(Expr::number(2, at(4))), 4),
          Stmt::assign("x", Expr::number(3, at(5)), at(5)),
        ],
        None,
        at(3),
      ),
      Stmt::ret(Some(Expr::var("x", at(6))), at(6)),
    ];
    let program = Program::new(FunctionDef::new(Type::Int, "main", vec![], body, at(1)));
    let asm = compile(&program, &Options::default());
    let asm = lines(&asm);

    position(&asm, "mov dword [rbp-4], 1");
    position(&asm, "mov dword [rbp-8], 2");
    // Inside the block the inner slot is written; the return reads the outer.
    let store = position(&asm, "mov dword [rbp-8], eax");
    let endif = position(&asm, "endif_0:");
    assert!(store < endif);
    assert_eq!(asm[endif + 1], "mov eax, dword [rbp-4]");
  }

  #[test]
  fn bool_slots_are_bytes() {
    let body = vec![
      decl(Type::Bool, "done", Some(Expr::boolean(false, at(2))), 2),
      Stmt::assign(
        "done",
        Expr::not(Expr::var("done", at(3)), at(3)),
        at(3),
      ),
    ];
    let program = Program::new(FunctionDef::new(Type::Void, "main", vec![], body, at(1)));
    let asm = compile(&program, &Options::default());
    let asm = lines(&asm);
    position(&asm, "mov byte [rbp-1], 0");
    position(&asm, "movzx eax, byte [rbp-1]");
    position(&asm, "xor eax, 1");
    position(&asm, "mov byte [rbp-1], al");
    // No return statement: falls back to zero.
    let exit = position(&asm, "main_exit:");
    assert_eq!(asm[exit - 1], "mov eax, 0");
  }

  #[test]
  fn globals_go_to_the_data_section() {
    let globals = vec![Declaration::new(
      Type::Int,
      vec![
        VarDecl::new("limit", Some(Expr::number(10, at(1))), at(1)),
        VarDecl::new("count", Some(Expr::number(0, at(1))), at(1)),
      ],
      at(1),
    )];
    let body = vec![
      Stmt::assign(
        "count",
        Expr::binary(BinaryOp::Add, Expr::var("count", at(3)), Expr::number(1, at(3)), at(3)),
        at(3),
      ),
      Stmt::ret(Some(Expr::var("limit", at(4))), at(4)),
    ];
    let program =
      Program::new(FunctionDef::new(Type::Int, "main", vec![], body, at(2))).with_globals(globals);
    let asm = compile(&program, &Options::default());
    let asm = lines(&asm);
    let data = position(&asm, "section .data");
    assert_eq!(asm[data + 1], "limit dd 10");
    assert_eq!(asm[data + 2], "count dd 0");
    position(&asm, "mov eax, dword [count]");
    position(&asm, "mov dword [count], eax");
    position(&asm, "mov eax, dword [limit]");
  }

  #[test]
  fn constant_subexpressions_fold_unless_disabled() {
    let body = vec![Stmt::ret(
      Some(Expr::binary(
        BinaryOp::Mul,
        Expr::binary(BinaryOp::Add, Expr::number(2, at(2)), Expr::number(3, at(2)), at(2)),
        Expr::number(4, at(2)),
        at(2),
      )),
      at(2),
    )];
    let program = Program::new(FunctionDef::new(Type::Int, "main", vec![], body, at(1)));

    let folded = compile(&program, &Options::default());
    assert!(lines(&folded).contains(&"mov eax, 20"));
    assert!(!folded.contains("imul"));

    let unfolded = compile(&program, &Options::default().with_fold_constants(false));
    assert!(unfolded.contains("imul eax, ecx"));
    assert!(!lines(&unfolded).contains(&"mov eax, 20"));
  }

  #[test]
  fn comments_and_entry_label_follow_options() {
    let body = vec![Stmt::ret(Some(Expr::number(7, at(2))), at(2))];
    let program = Program::new(FunctionDef::new(Type::Int, "main", vec![], body, at(1)));
    let options = Options::default()
      .with_emit_comments(true)
      .with_entry_label("entry");
    let asm = compile(&program, &options);
    assert!(asm.contains("global entry\n"));
    assert!(asm.contains("entry:\n    call main\n"));
    assert!(asm.contains("; return 7;"));
  }

  #[test]
  fn reserved_label_names() {
    for name in ["main", "main_exit", "_start", "else_3", "while_end_12", "eax", "R9D", "rbp", "dword"] {
      assert!(clashes_with_label(name, "main", "_start"), "{name}");
    }
    for name in ["count", "else_", "else_x", "r16", "r08", "exit", "other_exit", "rdx_total"] {
      assert!(!clashes_with_label(name, "main", "_start"), "{name}");
    }
    assert!(clashes_with_label("entry", "main", "entry"));
  }
}
