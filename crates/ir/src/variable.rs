//! This module contains variable definitions of the bindplace IR.
use std::fmt;

/// An opaque reference to [`Variable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub u32);
cranelift_entity::entity_impl!(VarId);

/// A variable definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Variable {
    /// A named local variable.
    ///
    /// `depth` counts how many scopes outward the variable lives: `0` is a
    /// local of the scope itself, `1` a local of the directly enclosing
    /// scope, and so on.
    Local { name: String, depth: u32 },

    /// A compiler introduced temporary. Temporaries are never captured.
    Temporary { index: u32 },
}

impl Variable {
    pub fn local(name: &str, depth: u32) -> Self {
        Self::Local {
            name: name.to_string(),
            depth,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary { .. })
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Local { name, .. } => Some(name),
            Self::Temporary { .. } => None,
        }
    }

    /// Returns the scope depth of a local, `None` for temporaries.
    pub fn depth(&self) -> Option<u32> {
        match self {
            Self::Local { depth, .. } => Some(*depth),
            Self::Temporary { .. } => None,
        }
    }

    /// Returns `true` if the variable belongs to an enclosing scope.
    pub fn is_enclosing(&self) -> bool {
        matches!(self, Self::Local { depth, .. } if *depth > 0)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { name, depth: 0 } => write!(f, "%{name}"),
            Self::Local { name, depth } => write!(f, "%{name}@{depth}"),
            Self::Temporary { index } => write!(f, "%t{index}"),
        }
    }
}
