//! Semantic analysis: scope resolution and type checking in one walk.
//!
//! The analyzer records every problem it finds and keeps going, so one run
//! reports as much as possible. Types flow upward from expressions; after a
//! type error the subtree evaluates to `Type::Error`, which the parent
//! accepts without a second report.

use log::{debug, info};

use crate::ast::{
  Declaration, Expr, ExprKind, FunctionDef, Param, Pos, Program, Stmt, StmtKind, contains_return,
};
use crate::codegen::clashes_with_label;
use crate::diagnostics::Diagnostics;
use crate::eval::{Evaluator, Value, is_constant};
use crate::options::DEFAULT_ENTRY_LABEL;
use crate::scope::ScopeManager;
use crate::ty::{Type, binary_result, compatible, unary_result};

pub struct SemanticAnalyzer<'a> {
  scopes: &'a mut ScopeManager,
  diagnostics: &'a mut Diagnostics,
  /// Declared return type of the function being analyzed.
  return_type: Option<Type>,
  entry_label: &'a str,
}

impl<'a> SemanticAnalyzer<'a> {
  pub fn new(scopes: &'a mut ScopeManager, diagnostics: &'a mut Diagnostics) -> Self {
    Self {
      scopes,
      diagnostics,
      return_type: None,
      entry_label: DEFAULT_ENTRY_LABEL,
    }
  }

  /// Entry stub label that globals must not reuse.
  pub fn with_entry_label(mut self, label: &'a str) -> Self {
    self.entry_label = label;
    self
  }

  pub fn analyze(&mut self, program: &Program) {
    info!("semantic analysis started");
    for decl in &program.globals {
      self.declaration(decl, true);
      self.global_labels(decl, &program.function.name);
    }
    self.function(&program.function);
    info!(
      "semantic analysis finished: {}",
      self.diagnostics.summary()
    );
  }

  fn global_labels(&mut self, decl: &Declaration, function: &str) {
    if !decl.ty.is_storable() {
      return;
    }
    for var in &decl.vars {
      if clashes_with_label(&var.name, function, self.entry_label) {
        self.diagnostics.semantic(
          var.pos,
          format!(
            "global '{}' collides with a name reserved in the generated assembly",
            var.name
          ),
        );
      }
    }
  }

  fn function(&mut self, func: &FunctionDef) {
    debug!("analyzing function {} ({})", func.name, func.return_type);
    self.return_type = Some(func.return_type);
    self.scopes.enter_scope(&format!("function_{}", func.name));

    for param in &func.params {
      self.param(param);
    }
    self.block(&func.body);

    if func.return_type != Type::Void && !contains_return(&func.body) {
      self.diagnostics.semantic(
        func.pos,
        format!(
          "function '{}' with return type '{}' must have a return statement",
          func.name, func.return_type
        ),
      );
    }

    self.leave_scope();
    self.return_type = None;
  }

  fn param(&mut self, param: &Param) {
    if !param.ty.is_storable() {
      self.diagnostics.semantic(
        param.pos,
        format!("parameter '{}' cannot have type {}", param.name, param.ty),
      );
      return;
    }
    let value = param.ty.default_value();
    if !self.scopes.declare(&param.name, param.ty, value, param.pos) {
      self.diagnostics.semantic(
        param.pos,
        format!("parameter '{}' is already declared in this scope", param.name),
      );
    }
  }

  fn block(&mut self, body: &[Stmt]) {
    for stmt in body {
      self.statement(stmt);
    }
  }

  fn scoped_block(&mut self, name: &str, body: &[Stmt]) {
    self.scopes.enter_scope(name);
    self.block(body);
    self.leave_scope();
  }

  fn leave_scope(&mut self) {
    let exited = self.scopes.exit_scope();
    debug_assert!(exited, "analyzer exited past the root scope");
  }

  fn statement(&mut self, stmt: &Stmt) {
    match &stmt.kind {
      StmtKind::Declaration(decl) => self.declaration(decl, false),
      StmtKind::Assign { name, value } => self.assignment(name, value, stmt.pos),
      StmtKind::Return(value) => self.return_stmt(value.as_ref(), stmt.pos),
      StmtKind::Expr(expr) => {
        if !self.expr(expr).is_error() {
          self.check_constant_parts(expr);
        }
      }
      StmtKind::If {
        cond,
        then_body,
        else_body,
      } => {
        self.condition(cond, "if");
        self.scoped_block("if_then", then_body);
        if let Some(else_body) = else_body {
          self.scoped_block("if_else", else_body);
        }
      }
      StmtKind::While { cond, body } => {
        self.condition(cond, "while");
        self.scoped_block("while_body", body);
      }
    }
  }

  fn condition(&mut self, cond: &Expr, construct: &str) {
    let ty = self.expr(cond);
    if ty.is_error() {
      return;
    }
    if !ty.is_boolean() {
      self.diagnostics.semantic(
        cond.pos,
        format!("condition of '{construct}' must be bool, found {ty}"),
      );
      return;
    }
    self.check_constant_parts(cond);
  }

  fn declaration(&mut self, decl: &Declaration, global: bool) {
    if !decl.ty.is_storable() {
      for var in &decl.vars {
        self.diagnostics.semantic(
          var.pos,
          format!("variable '{}' cannot have type {}", var.name, decl.ty),
        );
      }
      return;
    }

    for var in &decl.vars {
      if self.scopes.exists_local(&var.name) {
        self.diagnostics.semantic(
          var.pos,
          format!("variable '{}' is already declared in this scope", var.name),
        );
        continue;
      }

      let Some(init) = &var.init else {
        let declared = self.scopes.declare(&var.name, decl.ty, None, var.pos);
        debug_assert!(declared);
        debug!("declared {}: {}", var.name, decl.ty);
        self.diagnostics.warning(
          var.pos,
          format!("variable '{}' declared but not initialized", var.name),
        );
        continue;
      };

      let init_ty = self.expr(init);
      let matches = compatible(decl.ty, init_ty);
      if !matches && !init_ty.is_error() {
        self.diagnostics.type_error(
          var.pos,
          format!(
            "cannot assign {init_ty} to variable '{}' of type {}",
            var.name, decl.ty
          ),
        );
      }
      if global && !is_constant(init) {
        self.diagnostics.semantic(
          init.pos,
          format!(
            "initializer of global '{}' must be a constant expression",
            var.name
          ),
        );
      }

      let value = if matches { self.evaluate(init) } else { None };
      let declared = self.scopes.declare(&var.name, decl.ty, value, var.pos);
      debug_assert!(declared);
      if value.is_none() {
        // The initializer still runs; only its value is unknown here.
        let assigned = self.scopes.assign(&var.name, None);
        debug_assert!(assigned);
      }
      debug!(
        "declared {}: {} = {}",
        var.name,
        decl.ty,
        value.map_or_else(|| "?".to_string(), |v| v.to_string())
      );
    }
  }

  fn assignment(&mut self, name: &str, value: &Expr, pos: Pos) {
    let Some(target_ty) = self.scopes.type_of(name) else {
      self
        .diagnostics
        .semantic(pos, format!("variable '{name}' is not declared"));
      return;
    };

    let value_ty = self.expr(value);
    let matches = compatible(target_ty, value_ty);
    if !matches && !value_ty.is_error() {
      self.diagnostics.type_error(
        pos,
        format!("cannot assign {value_ty} to variable '{name}' of type {target_ty}"),
      );
    }

    let folded = if matches { self.evaluate(value) } else { None };
    let assigned = self.scopes.assign(name, folded);
    debug_assert!(assigned);
  }

  fn return_stmt(&mut self, value: Option<&Expr>, pos: Pos) {
    let expected = self.return_type;
    match value {
      Some(expr) => {
        let ty = self.expr(expr);
        if ty.is_error() {
          return;
        }
        match expected {
          Some(expected) if !compatible(expected, ty) => {
            self.diagnostics.type_error(
              expr.pos,
              format!("return type mismatch: expected {expected}, found {ty}"),
            );
          }
          _ => {
            let value = self.evaluate(expr);
            debug!("return {ty} = {value:?}");
          }
        }
      }
      None => {
        if let Some(expected) = expected
          && expected != Type::Void
        {
          self.diagnostics.semantic(
            pos,
            format!("function must return a value of type {expected}"),
          );
        }
      }
    }
  }

  /// Infer the type of `expr`, reporting misuse along the way.
  fn expr(&mut self, expr: &Expr) -> Type {
    match &expr.kind {
      ExprKind::Num { .. } => Type::Int,
      ExprKind::Bool { .. } => Type::Bool,
      ExprKind::Var { name } => {
        let Some(entry) = self.scopes.lookup(name) else {
          self
            .diagnostics
            .semantic(expr.pos, format!("variable '{name}' is not declared"));
          return Type::Error;
        };
        if !entry.initialized {
          self.diagnostics.warning(
            expr.pos,
            format!("variable '{name}' is used before being initialized"),
          );
        }
        entry.ty
      }
      ExprKind::Unary { op, operand } => {
        let operand_ty = self.expr(operand);
        unary_result(*op, operand_ty).unwrap_or_else(|requirement| {
          self.diagnostics.type_error(
            expr.pos,
            format!(
              "operator '{op}' {}, found {operand_ty}",
              requirement.describe()
            ),
          );
          Type::Error
        })
      }
      ExprKind::Binary { op, lhs, rhs } => {
        let lhs_ty = self.expr(lhs);
        let rhs_ty = self.expr(rhs);
        binary_result(*op, lhs_ty, rhs_ty).unwrap_or_else(|requirement| {
          self.diagnostics.type_error(
            expr.pos,
            format!(
              "operator '{op}' {}, found {lhs_ty} and {rhs_ty}",
              requirement.describe()
            ),
          );
          Type::Error
        })
      }
    }
  }

  fn evaluate(&mut self, expr: &Expr) -> Option<Value> {
    Evaluator::new(&*self.scopes, &mut *self.diagnostics).evaluate(expr)
  }

  /// Evaluate every literal-only subtree of `expr` so constant faults such
  /// as division by zero are reported even where the value is not needed.
  fn check_constant_parts(&mut self, expr: &Expr) {
    if is_constant(expr) {
      self.evaluate(expr);
      return;
    }
    match &expr.kind {
      ExprKind::Unary { operand, .. } => self.check_constant_parts(operand),
      ExprKind::Binary { lhs, rhs, .. } => {
        self.check_constant_parts(lhs);
        self.check_constant_parts(rhs);
      }
      ExprKind::Num { .. } | ExprKind::Bool { .. } | ExprKind::Var { .. } => {}
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::{BinaryOp, VarDecl};
  use crate::diagnostics::Category;

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

  fn analyze(program: &Program) -> (ScopeManager, Diagnostics) {
    let mut scopes = ScopeManager::new();
    let mut diagnostics = Diagnostics::new();
    SemanticAnalyzer::new(&mut scopes, &mut diagnostics).analyze(program);
    (scopes, diagnostics)
  }

  fn main_fn(return_type: Type, params: Vec<Param>, body: Vec<Stmt>) -> Program {
    Program::new(FunctionDef::new(return_type, "main", params, body, at(1)))
  }

  #[test]
  fn clean_program_has_no_diagnostics() {
    let program = main_fn(
      Type::Int,
      vec![],
      vec![
        decl(Type::Int, "x", Some(Expr::number(5, at(2))), 2),
        Stmt::ret(Some(Expr::var("x", at(3))), at(3)),
      ],
    );
    let (_, diagnostics) = analyze(&program);
    assert!(!diagnostics.has_errors());
    assert!(diagnostics.warnings().is_empty());
  }

  #[test]
  fn redeclaration_in_same_scope_is_an_error_but_shadowing_is_not() {
    let program = main_fn(
      Type::Void,
      vec![],
      vec![
        decl(Type::Int, "x", Some(Expr::number(1, at(2))), 2),
        decl(Type::Int, "x", Some(Expr::number(2, at(3))), 3),
        Stmt::if_else(
          Expr::boolean(true, at(4)),
          vec![decl(Type::Bool, "x", Some(Expr::boolean(false, at(5))), 5)],
          None,
          at(4),
        ),
      ],
    );
    let (_, diagnostics) = analyze(&program);
    assert_eq!(diagnostics.errors().len(), 1);
    assert_eq!(diagnostics.errors()[0].pos, at(3));
    assert_eq!(diagnostics.errors()[0].category, Category::Semantic);
  }

  #[test]
  fn duplicate_parameter() {
    let program = main_fn(
      Type::Void,
      vec![
        Param::new(Type::Int, "a", Pos::new(1, 10)),
        Param::new(Type::Bool, "a", Pos::new(1, 17)),
      ],
      vec![],
    );
    let (scopes, diagnostics) = analyze(&program);
    assert_eq!(diagnostics.errors().len(), 1);
    assert_eq!(diagnostics.errors()[0].pos, Pos::new(1, 17));
    let function = scopes.scope(scopes.root().children()[0]).unwrap();
    assert_eq!(function.get("a").map(|e| e.ty), Some(Type::Int));
    assert!(function.get("a").is_some_and(|e| e.initialized));
  }

  #[test]
  fn missing_return_is_found_through_nested_blocks() {
    let nested = main_fn(
      Type::Int,
      vec![],
      vec![Stmt::while_loop(
        Expr::boolean(true, at(2)),
        vec![Stmt::ret(Some(Expr::number(1, at(3))), at(3))],
        at(2),
      )],
    );
    assert!(!analyze(&nested).1.has_errors());

    let missing = main_fn(Type::Int, vec![], vec![decl(Type::Int, "x", None, 2)]);
    let (_, diagnostics) = analyze(&missing);
    assert_eq!(diagnostics.errors().len(), 1);
    assert!(diagnostics.errors()[0].message.contains("must have a return"));
  }

  #[test]
  fn non_bool_condition_still_analyzes_branches() {
    let program = main_fn(
      Type::Void,
      vec![],
      vec![Stmt::if_else(
        Expr::number(1, at(2)),
        vec![Stmt::assign("ghost", Expr::number(1, at(3)), at(3))],
        Some(vec![Stmt::assign("phantom", Expr::number(2, at(4)), at(4))]),
        at(2),
      )],
    );
    let (_, diagnostics) = analyze(&program);
    let lines: Vec<u32> = diagnostics.errors().iter().map(|d| d.pos.line).collect();
    assert_eq!(lines, [2, 3, 4]);
  }

  #[test]
  fn type_errors_do_not_cascade() {
    // (1 && 2) + 3: only the && is reported.
    let bad = Expr::binary(
      BinaryOp::Add,
      Expr::binary(
        BinaryOp::And,
        Expr::number(1, at(2)),
        Expr::number(2, at(2)),
        Pos::new(2, 5),
      ),
      Expr::number(3, at(2)),
      at(2),
    );
    let program = main_fn(Type::Int, vec![], vec![Stmt::ret(Some(bad), at(2))]);
    let (_, diagnostics) = analyze(&program);
    assert_eq!(diagnostics.errors().len(), 1);
    assert_eq!(diagnostics.errors()[0].category, Category::Type);
    assert_eq!(diagnostics.errors()[0].pos, Pos::new(2, 5));
  }

  #[test]
  fn undeclared_assignment_aborts_statement() {
    let program = main_fn(
      Type::Void,
      vec![],
      vec![Stmt::assign("nope", Expr::var("also_nope", at(2)), at(2))],
    );
    let (_, diagnostics) = analyze(&program);
    assert_eq!(diagnostics.errors().len(), 1);
    assert!(diagnostics.errors()[0].message.contains("'nope'"));
  }

  #[test]
  fn mismatched_assignment_still_marks_initialized() {
    let program = main_fn(
      Type::Int,
      vec![],
      vec![
        decl(Type::Int, "n", None, 2),
        Stmt::assign("n", Expr::boolean(true, at(3)), at(3)),
        Stmt::ret(Some(Expr::var("n", at(4))), at(4)),
      ],
    );
    let (_, diagnostics) = analyze(&program);
    assert_eq!(diagnostics.errors().len(), 1);
    assert_eq!(diagnostics.errors()[0].category, Category::Type);
    // Only the declaration warns; the later use sees an initialized entry.
    assert!(
      diagnostics
        .warnings()
        .iter()
        .all(|w| !w.message.contains("used before"))
    );
  }

  #[test]
  fn return_checks() {
    let void_with_value = main_fn(
      Type::Void,
      vec![],
      vec![Stmt::ret(Some(Expr::number(1, at(2))), at(2))],
    );
    assert_eq!(analyze(&void_with_value).1.errors().len(), 1);

    let int_without_value = main_fn(Type::Int, vec![], vec![Stmt::ret(None, at(2))]);
    let (_, diagnostics) = analyze(&int_without_value);
    assert_eq!(diagnostics.errors().len(), 1);
    assert_eq!(diagnostics.errors()[0].pos, at(2));
  }

  #[test]
  fn constant_division_by_zero_in_condition() {
    let cond = Expr::binary(
      BinaryOp::Gt,
      Expr::var("p", at(2)),
      Expr::binary(BinaryOp::Div, Expr::number(5, at(2)), Expr::number(0, at(2)), Pos::new(2, 9)),
      at(2),
    );
    let program = main_fn(
      Type::Void,
      vec![Param::new(Type::Int, "p", at(1))],
      vec![Stmt::while_loop(cond, vec![], at(2))],
    );
    let (_, diagnostics) = analyze(&program);
    assert_eq!(diagnostics.errors().len(), 1);
    assert_eq!(diagnostics.errors()[0].pos, Pos::new(2, 9));
    assert!(diagnostics.warnings().is_empty());
  }

  #[test]
  fn global_initializer_must_be_constant() {
    let globals = vec![
      Declaration::new(
        Type::Int,
        vec![VarDecl::new("limit", Some(Expr::number(10, at(1))), at(1))],
        at(1),
      ),
      Declaration::new(
        Type::Int,
        vec![VarDecl::new("twice", Some(Expr::var("limit", at(2))), at(2))],
        at(2),
      ),
    ];
    let program = main_fn(Type::Void, vec![], vec![]).with_globals(globals);
    let (scopes, diagnostics) = analyze(&program);
    assert_eq!(diagnostics.errors().len(), 1);
    assert!(diagnostics.errors()[0].message.contains("'twice'"));
    assert_eq!(
      scopes.root().get("limit").and_then(|e| e.value),
      Some(Value::Int(10))
    );
  }

  #[test]
  fn void_variable_is_rejected() {
    let program = main_fn(Type::Void, vec![], vec![decl(Type::Void, "v", None, 2)]);
    let (scopes, diagnostics) = analyze(&program);
    assert_eq!(diagnostics.errors().len(), 1);
    assert_eq!(scopes.stats().symbols, 0);
  }

  #[test]
  fn global_must_not_reuse_an_assembly_name() {
    let global = |name: &str, line| {
      Declaration::new(
        Type::Int,
        vec![VarDecl::new(name, Some(Expr::number(0, at(line))), at(line))],
        at(line),
      )
    };
    let program = main_fn(Type::Void, vec![], vec![]).with_globals(vec![
      global("main", 1),
      global("ecx", 2),
      global("total", 3),
    ]);
    let (_, diagnostics) = analyze(&program);
    let lines: Vec<u32> = diagnostics.errors().iter().map(|d| d.pos.line).collect();
    assert_eq!(lines, [1, 2]);
    assert!(diagnostics.errors()[0].message.contains("'main'"));

    let mut scopes = ScopeManager::new();
    let mut diagnostics = Diagnostics::new();
    let program = main_fn(Type::Void, vec![], vec![]).with_globals(vec![global("boot", 1)]);
    SemanticAnalyzer::new(&mut scopes, &mut diagnostics)
      .with_entry_label("boot")
      .analyze(&program);
    assert_eq!(diagnostics.errors().len(), 1);
  }

  #[test]
  fn unknown_initializer_value_still_initializes() {
    let program = main_fn(
      Type::Int,
      vec![],
      vec![
        decl(Type::Int, "u", None, 2),
        decl(
          Type::Int,
          "v",
          Some(Expr::binary(BinaryOp::Add, Expr::var("u", at(3)), Expr::number(1, at(3)), at(3))),
          3,
        ),
        Stmt::ret(Some(Expr::var("v", at(4))), at(4)),
      ],
    );
    let (scopes, diagnostics) = analyze(&program);
    assert!(!diagnostics.has_errors());
    let function = scopes.scope(scopes.root().children()[0]).unwrap();
    let v = function.get("v").unwrap();
    assert!(v.initialized);
    assert_eq!(v.value, None);
    assert!(
      diagnostics
        .warnings()
        .iter()
        .all(|w| !w.message.contains("'v' is used before"))
    );
  }
}
