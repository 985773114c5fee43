use std::io;

use crate::{BlockId, InsnData, InsnId, Operand, Scope, VarId};

/// Writes a textual dump of a [`Scope`] and its nested closures.
pub struct ScopeWriter<'a> {
    scope: &'a Scope,
    level: u8,
}

impl<'a> ScopeWriter<'a> {
    pub fn new(scope: &'a Scope) -> Self {
        Self { scope, level: 0 }
    }

    pub fn write(&mut self, mut w: impl io::Write) -> io::Result<()> {
        self.write_scope(self.scope, &mut w)
    }

    pub fn dump_string(&mut self) -> String {
        let mut s = Vec::new();
        // Writing into a `Vec` never fails.
        let _ = self.write(&mut s);
        String::from_utf8_lossy(&s).into_owned()
    }

    fn write_scope(&mut self, scope: &Scope, w: &mut impl io::Write) -> io::Result<()> {
        self.indent(w)?;
        writeln!(w, "{} {} {{", scope.kind.as_str(), scope.name)?;
        self.level += 1;

        if scope.var_num() > 0 {
            self.indent(w)?;
            write!(w, "vars: ")?;
            self.write_vars(scope, scope.vars().map(|(var, _)| var), w)?;
            writeln!(w)?;
        }
        if !scope.used_by_closures.is_empty() {
            self.indent(w)?;
            write!(w, "captured: ")?;
            self.write_vars(scope, scope.used_by_closures.iter().copied(), w)?;
            writeln!(w)?;
        }
        for (flag, name) in [
            (scope.binding_escapes, "binding_escapes"),
            (scope.eager_binding, "eager_binding"),
        ] {
            if flag {
                self.indent(w)?;
                writeln!(w, "{name}")?;
            }
        }

        for block in scope.layout.iter_block() {
            writeln!(w)?;
            self.write_block(scope, block, w)?;
        }

        for (closure, body) in scope.closures() {
            writeln!(w)?;
            self.indent(w)?;
            writeln!(w, "{closure}:")?;
            self.write_scope(body, w)?;
        }

        self.level -= 1;
        self.indent(w)?;
        writeln!(w, "}}")
    }

    fn write_block(&mut self, scope: &Scope, block: BlockId, w: &mut impl io::Write) -> io::Result<()> {
        self.indent(w)?;
        match scope.handler_of(block) {
            Some(handler) => writeln!(w, "{block} (handler {handler}):")?,
            None => writeln!(w, "{block}:")?,
        }

        self.level += 1;
        for insn in scope.layout.iter_insn(block) {
            self.indent(w)?;
            write_insn(scope, insn, w)?;
            writeln!(w, ";")?;
        }
        self.level -= 1;

        Ok(())
    }

    fn write_vars(
        &self,
        scope: &Scope,
        vars: impl Iterator<Item = VarId>,
        w: &mut impl io::Write,
    ) -> io::Result<()> {
        let mut delim = "";
        for var in vars {
            write!(w, "{delim}{}", scope.var(var))?;
            delim = ", ";
        }
        Ok(())
    }

    fn indent(&self, w: &mut impl io::Write) -> io::Result<()> {
        w.write_all(" ".repeat(self.level as usize * 4).as_bytes())
    }
}

/// Writes a single instruction of `scope` without a trailing delimiter.
pub fn write_insn(scope: &Scope, insn: InsnId, w: &mut impl io::Write) -> io::Result<()> {
    let data = scope.insn(insn);
    if let Some(result) = data.result() {
        if !matches!(data, InsnData::LoadFromBinding { .. }) {
            write!(w, "{} = ", scope.var(result))?;
        }
    }

    let opcode = data.opcode();
    match data {
        InsnData::ReceiveArg { index, .. } => write!(w, "{opcode} {index}"),
        InsnData::Copy { src, .. } => {
            write!(w, "{opcode} ")?;
            write_operand(scope, src, w)
        }
        InsnData::Call {
            receiver,
            method,
            args,
            closure,
            ..
        } => {
            write!(w, "{opcode} ")?;
            write_operand(scope, receiver, w)?;
            write!(w, ".{method}(")?;
            write_operands(scope, args, ", ", w)?;
            write!(w, ")")?;
            if let Some(closure) = closure {
                write!(w, " &")?;
                write_operand(scope, closure, w)?;
            }
            Ok(())
        }
        InsnData::ReceiveException { .. } | InsnData::AllocBinding => write!(w, "{opcode}"),
        InsnData::Jump { dest } => write!(w, "{opcode} {dest}"),
        InsnData::Branch {
            cond,
            then_dest,
            else_dest,
        } => {
            write!(w, "{opcode} ")?;
            write_operand(scope, cond, w)?;
            write!(w, " {then_dest} {else_dest}")
        }
        InsnData::Return { value: op } | InsnData::Raise { exception: op } => {
            write!(w, "{opcode} ")?;
            write_operand(scope, op, w)
        }
        InsnData::StoreToBinding { var } | InsnData::LoadFromBinding { var } => {
            write!(w, "{opcode} {}", scope.var(*var))
        }
    }
}

fn write_operand(scope: &Scope, operand: &Operand, w: &mut impl io::Write) -> io::Result<()> {
    match operand {
        Operand::Var(var) => write!(w, "{}", scope.var(*var)),
        Operand::Fixnum(value) => write!(w, "{value}"),
        Operand::Float(value) => write!(w, "{value:?}"),
        Operand::Str(value) => write!(w, "{value:?}"),
        Operand::Symbol(name) => write!(w, ":{name}"),
        Operand::Regexp { source, options } => write!(w, "/{source}/{options}"),
        Operand::Nil => write!(w, "nil"),
        Operand::Bool(value) => write!(w, "{value}"),
        Operand::Array(elems) => {
            write!(w, "[")?;
            write_operands(scope, elems, ", ", w)?;
            write!(w, "]")
        }
        Operand::Hash(pairs) => {
            write!(w, "{{")?;
            let mut delim = "";
            for (key, value) in pairs {
                write!(w, "{delim}")?;
                write_operand(scope, key, w)?;
                write!(w, " => ")?;
                write_operand(scope, value, w)?;
                delim = ", ";
            }
            write!(w, "}}")
        }
        Operand::Closure(closure) => write!(w, "{closure}"),
        Operand::SelfValue => write!(w, "self"),
        Operand::CurrentScope => write!(w, "%current_scope"),
        Operand::ScopeModule => write!(w, "%scope_module"),
    }
}

fn write_operands(
    scope: &Scope,
    operands: &[Operand],
    delim: &str,
    w: &mut impl io::Write,
) -> io::Result<()> {
    let mut iter = operands.iter().peekable();
    while let Some(operand) = iter.next() {
        write_operand(scope, operand, w)?;
        if iter.peek().is_some() {
            w.write_all(delim.as_bytes())?;
        }
    }
    Ok(())
}
