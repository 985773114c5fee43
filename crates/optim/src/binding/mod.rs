//! Binding frame placement.
//!
//! A local captured by a nested closure lives in two places: a fast slot of
//! the activation and the binding frame shared with the closures. The
//! analyses here decide where the frame has to be brought up to date
//! ([`store`]) and where the fast slot has to be refreshed from it
//! ([`load`]); [`rewrite::AddBindingInsns`] inserts the resulting
//! instructions.
pub mod effects;
pub mod load;
pub mod rewrite;
pub mod store;

pub use effects::BindingEffects;
pub use rewrite::{AddBindingInsns, RewriteStats};
