//! This module contains operand definitions of the bindplace IR.
use cranelift_entity::entity_impl;
use crate::VarId;

/// An opaque reference to a closure nested in a [`crate::Scope`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClosureId(pub u32);
cranelift_entity::entity_impl!(ClosureId, "closure");

/// An operand of an instruction. Operands are read-only values.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A reference to a variable.
    Var(VarId),

    Fixnum(i64),
    Float(f64),
    Str(String),
    Symbol(String),
    Regexp { source: String, options: u32 },
    Nil,
    Bool(bool),

    /// An array literal whose elements are operands.
    Array(Vec<Operand>),

    /// A hash literal whose keys and values are operands.
    Hash(Vec<(Operand, Operand)>),

    /// A nested closure body.
    Closure(ClosureId),

    SelfValue,
    CurrentScope,
    ScopeModule,
}

impl Operand {
    pub fn as_var(&self) -> Option<VarId> {
        match self {
            Self::Var(var) => Some(*var),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<ClosureId> {
        match self {
            Self::Closure(closure) => Some(*closure),
            _ => None,
        }
    }

    /// Returns `true` if the operand is a compile time constant.
    pub fn is_literal(&self) -> bool {
        match self {
            Self::Fixnum(_)
            | Self::Float(_)
            | Self::Str(_)
            | Self::Symbol(_)
            | Self::Regexp { .. }
            | Self::Nil
            | Self::Bool(_) => true,
            Self::Array(elems) => elems.iter().all(Self::is_literal),
            Self::Hash(pairs) => pairs.iter().all(|(k, v)| k.is_literal() && v.is_literal()),
            Self::Var(_)
            | Self::Closure(_)
            | Self::SelfValue
            | Self::CurrentScope
            | Self::ScopeModule => false,
        }
    }

    /// Visits every variable referenced by the operand, including the ones
    /// nested in compound literals.
    pub fn for_each_var(&self, f: &mut impl FnMut(VarId)) {
        match self {
            Self::Var(var) => f(*var),
            Self::Array(elems) => {
                for elem in elems {
                    elem.for_each_var(f);
                }
            }
            Self::Hash(pairs) => {
                for (key, value) in pairs {
                    key.for_each_var(f);
                    value.for_each_var(f);
                }
            }
            _ => {}
        }
    }

    /// Visits every nested closure referenced by the operand.
    pub fn for_each_closure(&self, f: &mut impl FnMut(ClosureId)) {
        match self {
            Self::Closure(closure) => f(*closure),
            Self::Array(elems) => {
                for elem in elems {
                    elem.for_each_closure(f);
                }
            }
            Self::Hash(pairs) => {
                for (key, value) in pairs {
                    key.for_each_closure(f);
                    value.for_each_closure(f);
                }
            }
            _ => {}
        }
    }

    pub fn uses_var(&self, var: VarId) -> bool {
        let mut found = false;
        self.for_each_var(&mut |v| found |= v == var);
        found
    }
}

impl From<VarId> for Operand {
    fn from(var: VarId) -> Self {
        Self::Var(var)
    }
}

impl From<i64> for Operand {
    fn from(value: i64) -> Self {
        Self::Fixnum(value)
    }
}

impl From<bool> for Operand {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<ClosureId> for Operand {
    fn from(closure: ClosureId) -> Self {
        Self::Closure(closure)
    }
}
