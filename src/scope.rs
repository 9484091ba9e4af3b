//! Lexical scopes and the symbols declared in them.
//!
//! Scopes form a tree stored in an arena; `ScopeId`s index into it. The tree
//! only grows during analysis: children are appended, never removed, and a
//! symbol entry is created exactly once by its declaration. The code
//! generator later replays the same tree (`rewind`/`descend`) to find the
//! entries the analyzer resolved and record where each one is stored.

use std::fmt;

use indexmap::IndexMap;
use log::trace;

use crate::ast::Pos;
use crate::eval::Value;
use crate::ty::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

impl ScopeId {
  pub const ROOT: ScopeId = ScopeId(0);
}

/// Where the code generator placed a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
  /// A labelled data-section cell named after the symbol.
  Global,
  /// A slot `offset` bytes below the frame base.
  Local { offset: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolEntry {
  pub name: String,
  pub ty: Type,
  pub value: Option<Value>,
  pub initialized: bool,
  pub pos: Pos,
  /// Disambiguated name of the owning scope.
  pub scope: String,
  /// Filled in by the code generator.
  pub storage: Option<Storage>,
  pub size: u32,
}

impl SymbolEntry {
  pub fn is_global(&self) -> bool {
    matches!(self.storage, Some(Storage::Global))
  }
}

impl fmt::Display for SymbolEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.name, self.ty)?;
    match (&self.value, self.initialized) {
      (Some(value), _) => write!(f, " = {value}")?,
      (None, true) => f.write_str(" = ?")?,
      (None, false) => f.write_str(" (uninitialized)")?,
    }
    match self.storage {
      Some(Storage::Global) => write!(f, " @{}", self.name)?,
      Some(Storage::Local { offset }) => write!(f, " @rbp-{offset}")?,
      None => {}
    }
    write!(f, " [{}]", self.pos)
  }
}

#[derive(Debug)]
pub struct Scope {
  name: String,
  parent: Option<ScopeId>,
  children: Vec<ScopeId>,
  symbols: IndexMap<String, SymbolEntry>,
  level: u32,
  /// Next child `descend` will move into.
  cursor: usize,
}

impl Scope {
  fn new(name: String, parent: Option<ScopeId>, level: u32) -> Self {
    Self {
      name,
      parent,
      children: Vec::new(),
      symbols: IndexMap::new(),
      level,
      cursor: 0,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn parent(&self) -> Option<ScopeId> {
    self.parent
  }

  pub fn children(&self) -> &[ScopeId] {
    &self.children
  }

  pub fn level(&self) -> u32 {
    self.level
  }

  pub fn is_global(&self) -> bool {
    self.parent.is_none()
  }

  /// Entries in declaration order.
  pub fn symbols(&self) -> impl Iterator<Item = &SymbolEntry> {
    self.symbols.values()
  }

  pub fn get(&self, name: &str) -> Option<&SymbolEntry> {
    self.symbols.get(name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeStats {
  pub scopes: usize,
  pub symbols: usize,
  pub current: String,
  pub level: u32,
}

#[derive(Debug)]
pub struct ScopeManager {
  scopes: Vec<Scope>,
  current: ScopeId,
  counter: u32,
}

impl Default for ScopeManager {
  fn default() -> Self {
    Self::new()
  }
}

impl ScopeManager {
  pub fn new() -> Self {
    Self {
      scopes: vec![Scope::new("global".to_string(), None, 0)],
      current: ScopeId::ROOT,
      counter: 0,
    }
  }

  /// Drop every scope and symbol, leaving a single empty root.
  pub fn reset(&mut self) {
    *self = Self::new();
  }

  pub fn current(&self) -> ScopeId {
    self.current
  }

  /// `None` for an id that does not belong to this tree, such as one kept
  /// from before a [`reset`](Self::reset).
  pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
    self.scopes.get(id.0)
  }

  // Only for ids produced by this manager since the last reset; the arena
  // never shrinks in between.
  fn node(&self, id: ScopeId) -> &Scope {
    &self.scopes[id.0]
  }

  pub fn current_scope(&self) -> &Scope {
    self.node(self.current)
  }

  pub fn root(&self) -> &Scope {
    self.node(ScopeId::ROOT)
  }

  pub fn level(&self) -> u32 {
    self.current_scope().level
  }

  /// Open a child of the current scope named `<name>_<n>` and make it current.
  pub fn enter_scope(&mut self, name: &str) -> ScopeId {
    self.counter += 1;
    let id = ScopeId(self.scopes.len());
    let level = self.current_scope().level + 1;
    let full_name = format!("{name}_{}", self.counter);
    trace!("enter scope {full_name} (level {level})");
    self.scopes.push(Scope::new(full_name, Some(self.current), level));
    self.scopes[self.current.0].children.push(id);
    self.current = id;
    id
  }

  /// Return to the parent scope. Fails, changing nothing, at the root.
  #[must_use]
  pub fn exit_scope(&mut self) -> bool {
    match self.current_scope().parent {
      Some(parent) => {
        trace!("exit scope {}", self.current_scope().name);
        self.current = parent;
        true
      }
      None => false,
    }
  }

  /// Declare `name` in the current scope. Fails if the current scope already
  /// holds it; outer declarations of the same name are shadowed, not clashed.
  #[must_use]
  pub fn declare(&mut self, name: &str, ty: Type, value: Option<Value>, pos: Pos) -> bool {
    let scope = &mut self.scopes[self.current.0];
    if scope.symbols.contains_key(name) {
      return false;
    }
    let entry = SymbolEntry {
      name: name.to_string(),
      ty,
      initialized: value.is_some(),
      value,
      pos,
      scope: scope.name.clone(),
      storage: None,
      size: 0,
    };
    scope.symbols.insert(name.to_string(), entry);
    true
  }

  fn resolve(&self, name: &str) -> Option<ScopeId> {
    let mut id = Some(self.current);
    while let Some(scope_id) = id {
      let scope = self.node(scope_id);
      if scope.symbols.contains_key(name) {
        return Some(scope_id);
      }
      id = scope.parent;
    }
    None
  }

  /// Nearest enclosing declaration of `name`.
  pub fn lookup(&self, name: &str) -> Option<&SymbolEntry> {
    self.resolve(name).and_then(|id| self.node(id).symbols.get(name))
  }

  pub fn lookup_mut(&mut self, name: &str) -> Option<&mut SymbolEntry> {
    let id = self.resolve(name)?;
    self.scopes[id.0].symbols.get_mut(name)
  }

  pub fn lookup_local(&self, name: &str) -> Option<&SymbolEntry> {
    self.current_scope().symbols.get(name)
  }

  pub fn exists(&self, name: &str) -> bool {
    self.resolve(name).is_some()
  }

  pub fn exists_local(&self, name: &str) -> bool {
    self.current_scope().symbols.contains_key(name)
  }

  pub fn value_of(&self, name: &str) -> Option<Value> {
    self.lookup(name).and_then(|entry| entry.value)
  }

  pub fn type_of(&self, name: &str) -> Option<Type> {
    self.lookup(name).map(|entry| entry.ty)
  }

  pub fn is_initialized(&self, name: &str) -> bool {
    self.lookup(name).is_some_and(|entry| entry.initialized)
  }

  /// Store a (possibly unknown) value into the nearest declaration of `name`
  /// and mark it initialized. Fails if `name` is not visible.
  #[must_use]
  pub fn assign(&mut self, name: &str, value: Option<Value>) -> bool {
    match self.lookup_mut(name) {
      Some(entry) => {
        entry.value = value;
        entry.initialized = true;
        true
      }
      None => false,
    }
  }

  /// Nearest enclosing declaration of `name` that already has storage.
  ///
  /// During replay an entry only becomes visible once the code generator has
  /// placed it, so a later declaration in the same block cannot capture an
  /// earlier use of an outer name.
  pub fn lookup_stored(&self, name: &str) -> Option<&SymbolEntry> {
    let mut id = Some(self.current);
    while let Some(scope_id) = id {
      let scope = self.node(scope_id);
      if let Some(entry) = scope.symbols.get(name)
        && entry.storage.is_some()
      {
        return Some(entry);
      }
      id = scope.parent;
    }
    None
  }

  /// Record where the current scope's `name` lives. Fails if the current
  /// scope never declared it.
  #[must_use]
  pub fn place(&mut self, name: &str, storage: Storage) -> bool {
    match self.scopes[self.current.0].symbols.get_mut(name) {
      Some(entry) => {
        entry.size = entry.ty.size();
        entry.storage = Some(storage);
        true
      }
      None => false,
    }
  }

  /// Go back to the root and forget which children have been replayed.
  pub fn rewind(&mut self) {
    self.current = ScopeId::ROOT;
    for scope in &mut self.scopes {
      scope.cursor = 0;
    }
  }

  /// Move into the next child of the current scope that has not been
  /// replayed yet. Returns `None` when every child has been visited.
  pub fn descend(&mut self) -> Option<ScopeId> {
    let scope = &mut self.scopes[self.current.0];
    let child = *scope.children.get(scope.cursor)?;
    scope.cursor += 1;
    trace!("replay scope {}", self.scopes[child.0].name);
    self.current = child;
    Some(child)
  }

  pub fn stats(&self) -> ScopeStats {
    ScopeStats {
      scopes: self.scopes.len(),
      symbols: self.scopes.iter().map(|scope| scope.symbols.len()).sum(),
      current: self.current_scope().name.clone(),
      level: self.level(),
    }
  }

  fn fmt_scope(&self, f: &mut fmt::Formatter<'_>, id: ScopeId) -> fmt::Result {
    let scope = self.node(id);
    let indent = "  ".repeat(scope.level as usize);
    writeln!(f, "{indent}{} (level {})", scope.name, scope.level)?;
    for entry in scope.symbols.values() {
      writeln!(f, "{indent}  - {entry}")?;
    }
    for &child in &scope.children {
      self.fmt_scope(f, child)?;
    }
    Ok(())
  }
}

impl fmt::Display for ScopeManager {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.fmt_scope(f, ScopeId::ROOT)
  }
}
