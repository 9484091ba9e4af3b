//! Syntax tree consumed by both passes.
//!
//! The tree is built by an external front end and is read-only from here on.
//! Every node carries the source position it was parsed from so diagnostics
//! can point at it. Passes walk the tree with exhaustive `match`es over the
//! node enums rather than a visitor object.

use std::fmt;

use crate::ty::Type;

/// Line/column of a node in the source text, both 1-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pos {
  pub line: u32,
  pub column: u32,
}

impl Pos {
  pub const fn new(line: u32, column: u32) -> Self {
    Self { line, column }
  }
}

impl fmt::Display for Pos {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Line {}, Column {}", self.line, self.column)
  }
}

/// Binary operators recognised by the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Lt,
  Gt,
  Eq,
  And,
  Or,
}

impl BinaryOp {
  pub fn symbol(self) -> &'static str {
    match self {
      Self::Add => "+",
      Self::Sub => "-",
      Self::Mul => "*",
      Self::Div => "/",
      Self::Lt => "<",
      Self::Gt => ">",
      Self::Eq => "==",
      Self::And => "&&",
      Self::Or => "||",
    }
  }
}

impl fmt::Display for BinaryOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.symbol())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
  Not,
}

impl UnaryOp {
  pub fn symbol(self) -> &'static str {
    match self {
      Self::Not => "!",
    }
  }
}

impl fmt::Display for UnaryOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.symbol())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
  pub kind: ExprKind,
  pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
  Num {
    value: i32,
  },
  Bool {
    value: bool,
  },
  Var {
    name: String,
  },
  Unary {
    op: UnaryOp,
    operand: Box<Expr>,
  },
  Binary {
    op: BinaryOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
}

impl Expr {
  pub fn new(kind: ExprKind, pos: Pos) -> Self {
    Self { kind, pos }
  }

  pub fn number(value: i32, pos: Pos) -> Self {
    Self::new(ExprKind::Num { value }, pos)
  }

  pub fn boolean(value: bool, pos: Pos) -> Self {
    Self::new(ExprKind::Bool { value }, pos)
  }

  pub fn var(name: impl Into<String>, pos: Pos) -> Self {
    Self::new(ExprKind::Var { name: name.into() }, pos)
  }

  pub fn not(operand: Expr, pos: Pos) -> Self {
    Self::new(
      ExprKind::Unary {
        op: UnaryOp::Not,
        operand: Box::new(operand),
      },
      pos,
    )
  }

  pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, pos: Pos) -> Self {
    Self::new(
      ExprKind::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
      },
      pos,
    )
  }

  pub fn is_literal(&self) -> bool {
    matches!(self.kind, ExprKind::Num { .. } | ExprKind::Bool { .. })
  }
}

impl fmt::Display for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.kind {
      ExprKind::Num { value } => write!(f, "{value}"),
      ExprKind::Bool { value } => write!(f, "{value}"),
      ExprKind::Var { name } => f.write_str(name),
      ExprKind::Unary { op, operand } => write!(f, "{op}{operand}"),
      ExprKind::Binary { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
    }
  }
}

/// One name in a declaration list, e.g. `y = 2` in `int x, y = 2;`.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
  pub name: String,
  pub init: Option<Expr>,
  pub pos: Pos,
}

impl VarDecl {
  pub fn new(name: impl Into<String>, init: Option<Expr>, pos: Pos) -> Self {
    Self {
      name: name.into(),
      init,
      pos,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
  pub ty: Type,
  pub vars: Vec<VarDecl>,
  pub pos: Pos,
}

impl Declaration {
  pub fn new(ty: Type, vars: Vec<VarDecl>, pos: Pos) -> Self {
    Self { ty, vars, pos }
  }
}

impl fmt::Display for Declaration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ", self.ty)?;
    for (i, var) in self.vars.iter().enumerate() {
      if i > 0 {
        f.write_str(", ")?;
      }
      f.write_str(&var.name)?;
      if let Some(init) = &var.init {
        write!(f, " = {init}")?;
      }
    }
    f.write_str(";")
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
  pub kind: StmtKind,
  pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
  Declaration(Declaration),
  Assign {
    name: String,
    value: Expr,
  },
  Return(Option<Expr>),
  Expr(Expr),
  If {
    cond: Expr,
    then_body: Vec<Stmt>,
    else_body: Option<Vec<Stmt>>,
  },
  While {
    cond: Expr,
    body: Vec<Stmt>,
  },
}

impl Stmt {
  pub fn new(kind: StmtKind, pos: Pos) -> Self {
    Self { kind, pos }
  }

  pub fn declaration(decl: Declaration) -> Self {
    let pos = decl.pos;
    Self::new(StmtKind::Declaration(decl), pos)
  }

  pub fn assign(name: impl Into<String>, value: Expr, pos: Pos) -> Self {
    Self::new(
      StmtKind::Assign {
        name: name.into(),
        value,
      },
      pos,
    )
  }

  pub fn ret(value: Option<Expr>, pos: Pos) -> Self {
    Self::new(StmtKind::Return(value), pos)
  }

  pub fn expr(expr: Expr, pos: Pos) -> Self {
    Self::new(StmtKind::Expr(expr), pos)
  }

  pub fn if_else(cond: Expr, then_body: Vec<Stmt>, else_body: Option<Vec<Stmt>>, pos: Pos) -> Self {
    Self::new(
      StmtKind::If {
        cond,
        then_body,
        else_body,
      },
      pos,
    )
  }

  pub fn while_loop(cond: Expr, body: Vec<Stmt>, pos: Pos) -> Self {
    Self::new(StmtKind::While { cond, body }, pos)
  }
}

fn fmt_block(f: &mut fmt::Formatter<'_>, body: &[Stmt]) -> fmt::Result {
  f.write_str("{")?;
  for stmt in body {
    write!(f, " {stmt}")?;
  }
  f.write_str(" }")
}

impl fmt::Display for Stmt {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.kind {
      StmtKind::Declaration(decl) => write!(f, "{decl}"),
      StmtKind::Assign { name, value } => write!(f, "{name} = {value};"),
      StmtKind::Return(Some(value)) => write!(f, "return {value};"),
      StmtKind::Return(None) => f.write_str("return;"),
      StmtKind::Expr(expr) => write!(f, "{expr};"),
      StmtKind::If {
        cond,
        then_body,
        else_body,
      } => {
        write!(f, "if ({cond}) ")?;
        fmt_block(f, then_body)?;
        if let Some(else_body) = else_body {
          f.write_str(" else ")?;
          fmt_block(f, else_body)?;
        }
        Ok(())
      }
      StmtKind::While { cond, body } => {
        write!(f, "while ({cond}) ")?;
        fmt_block(f, body)
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
  pub ty: Type,
  pub name: String,
  pub pos: Pos,
}

impl Param {
  pub fn new(ty: Type, name: impl Into<String>, pos: Pos) -> Self {
    Self {
      ty,
      name: name.into(),
      pos,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
  pub return_type: Type,
  pub name: String,
  pub params: Vec<Param>,
  pub body: Vec<Stmt>,
  pub pos: Pos,
}

impl FunctionDef {
  pub fn new(
    return_type: Type,
    name: impl Into<String>,
    params: Vec<Param>,
    body: Vec<Stmt>,
    pos: Pos,
  ) -> Self {
    Self {
      return_type,
      name: name.into(),
      params,
      body,
      pos,
    }
  }
}

impl fmt::Display for FunctionDef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}(", self.return_type, self.name)?;
    for (i, param) in self.params.iter().enumerate() {
      if i > 0 {
        f.write_str(", ")?;
      }
      write!(f, "{} {}", param.ty, param.name)?;
    }
    f.write_str(") ")?;
    fmt_block(f, &self.body)
  }
}

/// A whole translation unit: optional globals followed by the entry function.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
  pub globals: Vec<Declaration>,
  pub function: FunctionDef,
  pub pos: Pos,
}

impl Program {
  pub fn new(function: FunctionDef) -> Self {
    let pos = function.pos;
    Self {
      globals: Vec::new(),
      function,
      pos,
    }
  }

  pub fn with_globals(mut self, globals: Vec<Declaration>) -> Self {
    self.globals = globals;
    self
  }
}

impl fmt::Display for Program {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for decl in &self.globals {
      writeln!(f, "{decl}")?;
    }
    write!(f, "{}", self.function)
  }
}

/// Whether a `return` appears anywhere in `body`, including nested blocks.
pub fn contains_return(body: &[Stmt]) -> bool {
  body.iter().any(|stmt| match &stmt.kind {
    StmtKind::Return(_) => true,
    StmtKind::If {
      then_body,
      else_body,
      ..
    } => contains_return(then_body) || else_body.as_deref().is_some_and(contains_return),
    StmtKind::While { body, .. } => contains_return(body),
    StmtKind::Declaration(_) | StmtKind::Assign { .. } | StmtKind::Expr(_) => false,
  })
}

/// Whether every path through `body` ends in a `return`.
///
/// Loops never count: their condition may be false on entry.
pub fn always_returns(body: &[Stmt]) -> bool {
  body.iter().any(|stmt| match &stmt.kind {
    StmtKind::Return(_) => true,
    StmtKind::If {
      then_body,
      else_body: Some(else_body),
      ..
    } => always_returns(then_body) && always_returns(else_body),
    _ => false,
  })
}

/// Visit every declaration in `body`, descending into nested blocks.
pub fn for_each_declaration<'a>(body: &'a [Stmt], visit: &mut impl FnMut(&'a Declaration)) {
  for stmt in body {
    match &stmt.kind {
      StmtKind::Declaration(decl) => visit(decl),
      StmtKind::If {
        then_body,
        else_body,
        ..
      } => {
        for_each_declaration(then_body, visit);
        if let Some(else_body) = else_body {
          for_each_declaration(else_body, visit);
        }
      }
      StmtKind::While { body, .. } => for_each_declaration(body, visit),
      StmtKind::Assign { .. } | StmtKind::Return(_) | StmtKind::Expr(_) => {}
    }
  }
}
