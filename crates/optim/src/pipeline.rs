//! Runs the binding pass over every top level scope of a [`Module`].
//!
//! Top level scopes are independent of each other and are rewritten in
//! parallel when [`BindingConfig::parallel`] is set. Nested closures are
//! always rewritten before their enclosing scope, on the same thread.
use bindplace_ir::{Module, Scope};
use rayon::prelude::*;

use crate::{
    binding::{AddBindingInsns, RewriteStats},
    config::BindingConfig,
    error::RewriteError,
};

pub struct Pipeline {
    pub config: BindingConfig,
}

impl Pipeline {
    pub fn new(config: BindingConfig) -> Self {
        Self { config }
    }

    /// Rewrites every scope of `module`.
    ///
    /// A failing scope is restored on its own; with
    /// [`crate::config::ErrorPolicy::Abort`] the first error is returned and
    /// scopes already rewritten stay rewritten.
    pub fn run(&self, module: &mut Module) -> Result<RewriteStats, RewriteError> {
        let results: Vec<_> = if self.config.parallel {
            module
                .scopes
                .par_iter_mut()
                .map(|scope| self.run_scope(scope))
                .collect()
        } else {
            module
                .scopes
                .iter_mut()
                .map(|scope| self.run_scope(scope))
                .collect()
        };

        let mut stats = RewriteStats::default();
        for result in results {
            stats += result?;
        }

        tracing::debug!(
            scopes = module.scopes.len(),
            inserted = stats.inserted(),
            fallbacks = stats.fallbacks,
            "binding pipeline finished"
        );
        Ok(stats)
    }

    /// Rewrites a single top level scope and its closures.
    pub fn run_scope(&self, scope: &mut Scope) -> Result<RewriteStats, RewriteError> {
        AddBindingInsns::new(self.config).run(scope)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(BindingConfig::default())
    }
}
