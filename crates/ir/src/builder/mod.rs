mod scope_builder;

pub use scope_builder::ScopeBuilder;

pub mod test_util {
    use crate::{ir_writer::ScopeWriter, Scope};

    pub fn dump_scope(scope: &Scope) -> String {
        ScopeWriter::new(scope).dump_string()
    }
}
