/// What the pass does with a scope it failed to rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Return the error to the caller.
    Abort,

    /// Leave the scope unmodified and mark it `eager_binding`, so every
    /// captured local is treated as always frame backed.
    #[default]
    FallbackToEager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingConfig {
    pub on_error: ErrorPolicy,

    /// Rewrite nested closures before their enclosing scope.
    pub include_closures: bool,

    /// Rewrite independent top level scopes in parallel.
    pub parallel: bool,

    /// Verify every rewritten scope.
    pub verify: bool,
}

impl BindingConfig {
    /// Configuration that surfaces every failure: errors abort and rewritten
    /// scopes are always verified.
    pub fn strict() -> Self {
        Self {
            on_error: ErrorPolicy::Abort,
            include_closures: true,
            parallel: false,
            verify: true,
        }
    }

    pub fn with_policy(mut self, on_error: ErrorPolicy) -> Self {
        self.on_error = on_error;
        self
    }
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            on_error: ErrorPolicy::default(),
            include_closures: true,
            parallel: true,
            verify: cfg!(debug_assertions),
        }
    }
}
