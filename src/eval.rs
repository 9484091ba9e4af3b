//! Compile-time evaluation of expressions.
//!
//! Evaluation never aborts: a problem is recorded as a diagnostic and the
//! offending subexpression simply has no value. Division by zero is the one
//! exception that still produces a value (`0`) so the surrounding
//! expression can keep folding.

use std::fmt;

use crate::ast::{BinaryOp, Expr, ExprKind, Pos, UnaryOp};
use crate::diagnostics::Diagnostics;
use crate::scope::ScopeManager;
use crate::ty::{OpCategory, Requirement, Type};

/// A value known at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
  Int(i32),
  Bool(bool),
}

impl Value {
  pub fn ty(self) -> Type {
    match self {
      Self::Int(_) => Type::Int,
      Self::Bool(_) => Type::Bool,
    }
  }

  /// Machine representation: booleans are the integers 0 and 1.
  pub fn as_machine_int(self) -> i32 {
    match self {
      Self::Int(value) => value,
      Self::Bool(value) => i32::from(value),
    }
  }

  pub fn into_literal(self, pos: Pos) -> Expr {
    match self {
      Self::Int(value) => Expr::number(value, pos),
      Self::Bool(value) => Expr::boolean(value, pos),
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Int(value) => write!(f, "{value}"),
      Self::Bool(value) => write!(f, "{value}"),
    }
  }
}

/// Whether `expr` is built from literals only.
pub fn is_constant(expr: &Expr) -> bool {
  match &expr.kind {
    ExprKind::Num { .. } | ExprKind::Bool { .. } => true,
    ExprKind::Var { .. } => false,
    ExprKind::Unary { operand, .. } => is_constant(operand),
    ExprKind::Binary { lhs, rhs, .. } => is_constant(lhs) && is_constant(rhs),
  }
}

pub struct Evaluator<'a> {
  scopes: &'a ScopeManager,
  diagnostics: &'a mut Diagnostics,
}

impl<'a> Evaluator<'a> {
  pub fn new(scopes: &'a ScopeManager, diagnostics: &'a mut Diagnostics) -> Self {
    Self {
      scopes,
      diagnostics,
    }
  }

  pub fn evaluate(&mut self, expr: &Expr) -> Option<Value> {
    match &expr.kind {
      ExprKind::Num { value } => Some(Value::Int(*value)),
      ExprKind::Bool { value } => Some(Value::Bool(*value)),
      ExprKind::Var { name } => self.variable(name, expr.pos),
      ExprKind::Unary { op, operand } => {
        let operand = self.evaluate(operand)?;
        self.unary(*op, operand, expr.pos)
      }
      ExprKind::Binary { op, lhs, rhs } => {
        // Both sides are evaluated so each reports its own problems.
        let left = self.evaluate(lhs);
        let right = self.evaluate(rhs);
        // A zero divisor read through a variable is only the last value
        // tracked here, not what the machine will see.
        if *op == BinaryOp::Div && right == Some(Value::Int(0)) && !is_constant(rhs) {
          return None;
        }
        self.binary(*op, left?, right?, expr.pos)
      }
    }
  }

  /// Replace a literal-only expression by the literal it evaluates to.
  pub fn constant_fold(&mut self, expr: &Expr) -> Expr {
    if is_constant(expr)
      && let Some(value) = self.evaluate(expr)
    {
      return value.into_literal(expr.pos);
    }
    expr.clone()
  }

  fn variable(&mut self, name: &str, pos: Pos) -> Option<Value> {
    // Undeclared names are reported by the analyzer, not here.
    let entry = self.scopes.lookup(name)?;
    if entry.value.is_none() {
      self.diagnostics.warning(
        pos,
        format!("value of '{name}' is not known at compile time"),
      );
    }
    entry.value
  }

  fn unary(&mut self, op: UnaryOp, operand: Value, pos: Pos) -> Option<Value> {
    match (op, operand) {
      (UnaryOp::Not, Value::Bool(value)) => Some(Value::Bool(!value)),
      (UnaryOp::Not, Value::Int(_)) => {
        self.mismatch(pos, op.symbol(), Requirement::Boolean, operand, None);
        None
      }
    }
  }

  fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value, pos: Pos) -> Option<Value> {
    match OpCategory::of(op) {
      OpCategory::Arithmetic => self.arithmetic(op, lhs, rhs, pos),
      OpCategory::Relational => self.comparison(op, lhs, rhs, pos),
      OpCategory::Equality => self.equality(lhs, rhs, pos),
      OpCategory::Logical => self.logical(op, lhs, rhs, pos),
    }
  }

  fn arithmetic(&mut self, op: BinaryOp, lhs: Value, rhs: Value, pos: Pos) -> Option<Value> {
    let (Value::Int(l), Value::Int(r)) = (lhs, rhs) else {
      self.mismatch(pos, op.symbol(), Requirement::BothArithmetic, lhs, Some(rhs));
      return None;
    };
    let value = match op {
      BinaryOp::Add => l.wrapping_add(r),
      BinaryOp::Sub => l.wrapping_sub(r),
      BinaryOp::Mul => l.wrapping_mul(r),
      BinaryOp::Div if r == 0 => {
        self
          .diagnostics
          .semantic(pos, "division by zero in constant expression");
        0
      }
      BinaryOp::Div => l.wrapping_div(r),
      _ => return None,
    };
    Some(Value::Int(value))
  }

  fn comparison(&mut self, op: BinaryOp, lhs: Value, rhs: Value, pos: Pos) -> Option<Value> {
    let (Value::Int(l), Value::Int(r)) = (lhs, rhs) else {
      self.mismatch(pos, op.symbol(), Requirement::BothArithmetic, lhs, Some(rhs));
      return None;
    };
    match op {
      BinaryOp::Lt => Some(Value::Bool(l < r)),
      BinaryOp::Gt => Some(Value::Bool(l > r)),
      _ => None,
    }
  }

  fn equality(&mut self, lhs: Value, rhs: Value, pos: Pos) -> Option<Value> {
    match (lhs, rhs) {
      (Value::Int(l), Value::Int(r)) => Some(Value::Bool(l == r)),
      (Value::Bool(l), Value::Bool(r)) => Some(Value::Bool(l == r)),
      _ => {
        self.mismatch(pos, BinaryOp::Eq.symbol(), Requirement::Matching, lhs, Some(rhs));
        None
      }
    }
  }

  fn logical(&mut self, op: BinaryOp, lhs: Value, rhs: Value, pos: Pos) -> Option<Value> {
    let (Value::Bool(l), Value::Bool(r)) = (lhs, rhs) else {
      self.mismatch(pos, op.symbol(), Requirement::BothBoolean, lhs, Some(rhs));
      return None;
    };
    match op {
      BinaryOp::And => Some(Value::Bool(l && r)),
      BinaryOp::Or => Some(Value::Bool(l || r)),
      _ => None,
    }
  }

  fn mismatch(
    &mut self,
    pos: Pos,
    symbol: &str,
    requirement: Requirement,
    lhs: Value,
    rhs: Option<Value>,
  ) {
    let found = match rhs {
      Some(rhs) => format!("{} and {}", lhs.ty(), rhs.ty()),
      None => lhs.ty().to_string(),
    };
    self.diagnostics.type_error(
      pos,
      format!(
        "operator '{symbol}' {}, found {found}",
        requirement.describe()
      ),
    );
  }
}
