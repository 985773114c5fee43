//! Structural checks of a rewritten scope.
use bindplace_ir::{InsnData, Scope};

use crate::error::{RewriteError, Violation};

/// Verifies the layout and the frame instructions of `scope`.
pub fn verify_scope(scope: &Scope) -> Result<(), RewriteError> {
    check_scope(scope).map_err(|violation| RewriteError::InvariantViolation {
        scope: scope.name.clone(),
        violation,
    })
}

fn check_scope(scope: &Scope) -> Result<(), Violation> {
    let layout = &scope.layout;
    let entry = layout.entry_block();

    let mut alloc_pos = None;
    let mut needs_alloc = false;
    let mut own_binding_pos_in_entry = Vec::new();

    for block in layout.iter_block() {
        if let Some(handler) = scope.handler_of(block) {
            if !layout.is_block_inserted(handler) {
                return Err(Violation::HandlerNotInLayout(block));
            }
        }

        let mut last_pos = None;
        for insn in layout.iter_insn(block) {
            let data = scope.insn(insn);
            let pos = layout.position_of(insn);
            if last_pos.is_some_and(|last| last >= pos) {
                return Err(Violation::PositionNotIncreasing(block));
            }
            last_pos = Some(pos);

            if data.is_terminator() && layout.next_insn_of(insn).is_some() {
                return Err(Violation::TerminatorNotLast(block));
            }
            if data
                .branch_dests()
                .iter()
                .any(|dest| !layout.is_block_inserted(*dest))
            {
                return Err(Violation::BranchToMissingBlock(block));
            }

            match data {
                InsnData::AllocBinding => {
                    if Some(block) != entry {
                        return Err(Violation::AllocOutsideEntry(block));
                    }
                    if alloc_pos.replace(pos).is_some() {
                        return Err(Violation::DuplicateAlloc);
                    }
                }

                InsnData::StoreToBinding { var } | InsnData::LoadFromBinding { var } => {
                    match scope.var(*var).depth() {
                        None => return Err(Violation::BindingOfTemporary),
                        Some(0) => {
                            needs_alloc = true;
                            if Some(block) == entry {
                                own_binding_pos_in_entry.push(pos);
                            }
                        }
                        Some(_) => {}
                    }
                }

                _ => {}
            }
        }
    }

    match alloc_pos {
        None if needs_alloc => Err(Violation::MissingAlloc),
        Some(alloc) if own_binding_pos_in_entry.iter().any(|pos| *pos < alloc) => {
            Err(Violation::BindingBeforeAlloc)
        }
        _ => Ok(()),
    }
}
