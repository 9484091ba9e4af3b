//! Type rules: pure functions over the language's handful of types.

use std::fmt;
use std::str::FromStr;

use snafu::Snafu;

use crate::ast::{BinaryOp, UnaryOp};
use crate::eval::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
  Int,
  Bool,
  Void,
  /// Sentinel produced after a type error so the mistake is reported once.
  Error,
}

impl Type {
  pub fn is_arithmetic(self) -> bool {
    matches!(self, Self::Int)
  }

  pub fn is_boolean(self) -> bool {
    matches!(self, Self::Bool)
  }

  pub fn is_error(self) -> bool {
    matches!(self, Self::Error)
  }

  /// Types a program may spell out.
  pub fn is_primitive(self) -> bool {
    matches!(self, Self::Int | Self::Bool | Self::Void)
  }

  /// Whether a variable or parameter may have this type.
  pub fn is_storable(self) -> bool {
    matches!(self, Self::Int | Self::Bool)
  }

  pub fn default_value(self) -> Option<Value> {
    match self {
      Self::Int => Some(Value::Int(0)),
      Self::Bool => Some(Value::Bool(false)),
      Self::Void | Self::Error => None,
    }
  }

  pub fn describe(self) -> &'static str {
    match self {
      Self::Int => "integer",
      Self::Bool => "boolean",
      Self::Void => "void",
      Self::Error => "error type",
    }
  }

  /// Storage size in bytes.
  pub fn size(self) -> u32 {
    match self {
      Self::Int => 4,
      Self::Bool => 1,
      Self::Void | Self::Error => 0,
    }
  }

  /// Data-section storage directive for a cell of this type.
  pub fn data_directive(self) -> &'static str {
    match self {
      Self::Bool => "db",
      Self::Int | Self::Void | Self::Error => "dd",
    }
  }

  /// Operand-size keyword for a memory operand of this type.
  pub fn ptr_width(self) -> &'static str {
    match self {
      Self::Bool => "byte",
      Self::Int | Self::Void | Self::Error => "dword",
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Self::Int => "int",
      Self::Bool => "bool",
      Self::Void => "void",
      Self::Error => "error",
    }
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display("unknown type name '{name}'"))]
pub struct UnknownType {
  pub name: String,
}

impl FromStr for Type {
  type Err = UnknownType;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "int" => Ok(Self::Int),
      "bool" => Ok(Self::Bool),
      "void" => Ok(Self::Void),
      _ => Err(UnknownType { name: s.to_string() }),
    }
  }
}

/// Exact-name compatibility; the error sentinel matches nothing.
pub fn compatible(a: Type, b: Type) -> bool {
  !a.is_error() && !b.is_error() && a == b
}

/// Operator families sharing one operand requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCategory {
  Arithmetic,
  Relational,
  Equality,
  Logical,
}

impl OpCategory {
  pub fn of(op: BinaryOp) -> Self {
    match op {
      BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => Self::Arithmetic,
      BinaryOp::Lt | BinaryOp::Gt => Self::Relational,
      BinaryOp::Eq => Self::Equality,
      BinaryOp::And | BinaryOp::Or => Self::Logical,
    }
  }

  pub fn result(self) -> Type {
    match self {
      Self::Arithmetic => Type::Int,
      Self::Relational | Self::Equality | Self::Logical => Type::Bool,
    }
  }
}

/// An operand requirement an expression failed to meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
  BothArithmetic,
  BothBoolean,
  Matching,
  Boolean,
}

impl Requirement {
  pub fn describe(self) -> &'static str {
    match self {
      Self::BothArithmetic => "requires int operands",
      Self::BothBoolean => "requires bool operands",
      Self::Matching => "requires operands of the same type",
      Self::Boolean => "requires a bool operand",
    }
  }
}

/// Result type of `lhs op rhs`.
///
/// An operand that is already the error sentinel yields the sentinel without
/// a violation, so only the innermost mistake is reported.
pub fn binary_result(op: BinaryOp, lhs: Type, rhs: Type) -> Result<Type, Requirement> {
  if lhs.is_error() || rhs.is_error() {
    return Ok(Type::Error);
  }

  let category = OpCategory::of(op);
  let satisfied = match category {
    OpCategory::Arithmetic | OpCategory::Relational => lhs.is_arithmetic() && rhs.is_arithmetic(),
    OpCategory::Equality => compatible(lhs, rhs),
    OpCategory::Logical => lhs.is_boolean() && rhs.is_boolean(),
  };

  if satisfied {
    return Ok(category.result());
  }
  Err(match category {
    OpCategory::Arithmetic | OpCategory::Relational => Requirement::BothArithmetic,
    OpCategory::Equality => Requirement::Matching,
    OpCategory::Logical => Requirement::BothBoolean,
  })
}

pub fn unary_result(op: UnaryOp, operand: Type) -> Result<Type, Requirement> {
  if operand.is_error() {
    return Ok(Type::Error);
  }
  match op {
    UnaryOp::Not if operand.is_boolean() => Ok(Type::Bool),
    UnaryOp::Not => Err(Requirement::Boolean),
  }
}
