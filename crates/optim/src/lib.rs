pub mod binding;
pub mod bitset;
pub mod config;
pub mod dataflow;
pub mod error;
pub mod pipeline;
pub mod verify;

pub use binding::{AddBindingInsns, RewriteStats};
pub use config::{BindingConfig, ErrorPolicy};
pub use dataflow::{DataflowProblem, Direction, Solution, Solver};
pub use error::{RewriteError, SetupError, Violation};
pub use pipeline::Pipeline;
pub use verify::verify_scope;
