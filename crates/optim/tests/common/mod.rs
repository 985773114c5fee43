//! Shared helpers of the integration tests.
//!
//! [`run`] interprets a scope tree in one of two ways. `Mode::Reference`
//! keeps every local in its binding frame, which is how a scope behaves
//! before binding instructions exist. `Mode::Split` keeps locals in fast
//! slots and moves values between slots and frames only when a binding
//! instruction says so. A rewritten scope is correct when both runs print
//! the same lines and finish the same way.
#![allow(dead_code)]

use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc};

use bindplace_ir::{
    builder::{test_util::dump_scope, ScopeBuilder},
    InsnData, Opcode, Operand, Scope, ScopeKind, VarId, Variable,
};
use bindplace_optim::{AddBindingInsns, BindingConfig, RewriteStats};

pub const FUEL: usize = 500;

/// Builds a single block scope.
pub fn build(name: &str, kind: ScopeKind, f: impl FnOnce(&mut ScopeBuilder)) -> Scope {
    let mut builder = ScopeBuilder::new(name, kind);
    let b0 = builder.append_block();
    builder.switch_to_block(b0);
    f(&mut builder);
    builder.finish()
}

/// A closure printing the enclosing local `name`.
pub fn printer(name: &str) -> Scope {
    build("block", ScopeKind::Closure, |b| {
        let var = b.outer(name, 1);
        b.call(None, "puts", vec![var.into()], None);
        b.ret(Operand::Nil);
    })
}

/// A closure assigning `value` to the enclosing local `name`.
pub fn assigner(name: &str, value: i64) -> Scope {
    build("block", ScopeKind::Closure, |b| {
        let var = b.outer(name, 1);
        b.copy(var, value);
        b.ret(Operand::Nil);
    })
}

pub fn rewrite(scope: &mut Scope) -> RewriteStats {
    AddBindingInsns::new(BindingConfig::strict())
        .run(scope)
        .unwrap()
}

/// Counts the instructions of `scope` with `opcode`, nested closures
/// excluded.
pub fn count(scope: &Scope, opcode: Opcode) -> usize {
    scope
        .iter_insns()
        .filter(|&insn| scope.insn(insn).opcode() == opcode)
        .count()
}

/// Rewrites a copy of `original` and checks it against the original for
/// every tape.
pub fn assert_equivalent(original: &Scope, tapes: &[&[bool]]) -> Scope {
    let mut rewritten = original.clone();
    rewrite(&mut rewritten);

    for tape in tapes {
        let expected = run(original, Mode::Reference, tape, FUEL);
        let actual = run(&rewritten, Mode::Split, tape, FUEL);
        assert_eq!(
            expected,
            actual,
            "tape {tape:?}\n{}",
            dump_scope(&rewritten)
        );
    }
    rewritten
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Reference,
    Split,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Returned(String),
    Raised(String),
    OutOfFuel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub outcome: Outcome,
    pub output: Vec<String>,
}

/// Runs `scope` as a method without arguments.
///
/// `puts` prints its arguments, `choose` returns the next value of `tape`
/// (`false` once it runs out), `fail` raises, `times` runs the block once per
/// counter value, `call` runs the receiver, and any other method runs its
/// block once. Every non-binding instruction consumes one unit of `fuel`.
pub fn run(scope: &Scope, mode: Mode, tape: &[bool], fuel: usize) -> Run {
    let mut interp = Interp {
        mode,
        fuel,
        tape: tape.to_vec(),
        cursor: 0,
        output: Vec::new(),
    };

    let outcome = match interp.call_scope(scope, vec![None], &[]) {
        Ok(value) => Outcome::Returned(value.to_string()),
        Err(Unwind::Raise(exception)) => Outcome::Raised(exception.to_string()),
        Err(Unwind::OutOfFuel) => Outcome::OutOfFuel,
    };
    Run {
        outcome,
        output: interp.output,
    }
}

type Frame<'a> = Rc<RefCell<HashMap<String, Value<'a>>>>;

/// Frames visible to an activation, indexed by variable depth.
type Env<'a> = Vec<Option<Frame<'a>>>;

#[derive(Clone)]
enum Value<'a> {
    Nil,
    Int(i64),
    Bool(bool),
    Str(String),
    Array(Vec<Value<'a>>),
    Closure(Rc<ClosureValue<'a>>),
}

struct ClosureValue<'a> {
    scope: &'a Scope,
    env: Env<'a>,
}

impl Value<'_> {
    fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value:?}"),
            Self::Array(elems) => {
                write!(f, "[")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, "]")
            }
            Self::Closure(closure) => write!(f, "#<{}>", closure.scope.name),
        }
    }
}

enum Unwind<'a> {
    Raise(Value<'a>),
    OutOfFuel,
}

enum Flow<'a> {
    Next,
    Jump(bindplace_ir::BlockId),
    Return(Value<'a>),
}

struct Interp {
    mode: Mode,
    fuel: usize,
    tape: Vec<bool>,
    cursor: usize,
    output: Vec<String>,
}

struct Activation<'a> {
    scope: &'a Scope,
    env: Env<'a>,
    /// Locals are read and written through their frames.
    framed: bool,
    slots: HashMap<VarId, Value<'a>>,
    args: Vec<Value<'a>>,
    exception: Option<Value<'a>>,
}

impl Interp {
    fn call_scope<'a>(
        &mut self,
        scope: &'a Scope,
        mut env: Env<'a>,
        args: &[Value<'a>],
    ) -> Result<Value<'a>, Unwind<'a>> {
        let framed = self.mode == Mode::Reference || scope.eager_binding;
        if framed {
            env[0] = Some(Frame::default());
        }
        let mut act = Activation {
            scope,
            env,
            framed,
            slots: HashMap::new(),
            args: args.to_vec(),
            exception: None,
        };

        let Some(mut block) = scope.layout.entry_block() else {
            return Ok(Value::Nil);
        };
        'blocks: loop {
            for insn in scope.layout.iter_insn(block) {
                let data = scope.insn(insn);
                if !data.is_binding_insn() {
                    if self.fuel == 0 {
                        return Err(Unwind::OutOfFuel);
                    }
                    self.fuel -= 1;
                }

                match self.exec(&mut act, data) {
                    Ok(Flow::Next) => {}
                    Ok(Flow::Jump(dest)) => {
                        block = dest;
                        continue 'blocks;
                    }
                    Ok(Flow::Return(value)) => return Ok(value),
                    Err(Unwind::Raise(exception)) => match scope.handler_of(block) {
                        Some(handler) => {
                            act.exception = Some(exception);
                            block = handler;
                            continue 'blocks;
                        }
                        None => return Err(Unwind::Raise(exception)),
                    },
                    Err(Unwind::OutOfFuel) => return Err(Unwind::OutOfFuel),
                }
            }

            match scope.layout.next_block_of(block) {
                Some(next) => block = next,
                None => return Ok(Value::Nil),
            }
        }
    }

    fn exec<'a>(
        &mut self,
        act: &mut Activation<'a>,
        data: &'a InsnData,
    ) -> Result<Flow<'a>, Unwind<'a>> {
        match data {
            InsnData::ReceiveArg { dst, index } => {
                let value = act.args.get(*index as usize).cloned().unwrap_or(Value::Nil);
                act.write(*dst, value);
            }

            InsnData::Copy { dst, src } => {
                let value = act.eval(src);
                act.write(*dst, value);
            }

            InsnData::Call {
                dst,
                receiver,
                method,
                args,
                closure,
            } => {
                let receiver = act.eval(receiver);
                let args = args.iter().map(|arg| act.eval(arg)).collect();
                let closure = closure.as_ref().map(|closure| act.eval(closure));
                let result = self.call_method(receiver, method, args, closure)?;
                if let Some(dst) = dst {
                    act.write(*dst, result);
                }
            }

            InsnData::ReceiveException { dst } => {
                let value = act.exception.clone().unwrap_or(Value::Nil);
                act.write(*dst, value);
            }

            InsnData::Jump { dest } => return Ok(Flow::Jump(*dest)),
            InsnData::Branch {
                cond,
                then_dest,
                else_dest,
            } => {
                let dest = if act.eval(cond).is_truthy() {
                    *then_dest
                } else {
                    *else_dest
                };
                return Ok(Flow::Jump(dest));
            }
            InsnData::Return { value } => return Ok(Flow::Return(act.eval(value))),
            InsnData::Raise { exception } => return Err(Unwind::Raise(act.eval(exception))),

            InsnData::AllocBinding => {
                if act.env[0].is_none() {
                    act.env[0] = Some(Frame::default());
                }
            }
            InsnData::StoreToBinding { var } if !act.framed => {
                let value = act.slots.get(var).cloned().unwrap_or(Value::Nil);
                let (frame, name) = act.frame_of(*var);
                frame.borrow_mut().insert(name.to_string(), value);
            }
            InsnData::LoadFromBinding { var } if !act.framed => {
                let (frame, name) = act.frame_of(*var);
                let value = frame.borrow().get(name).cloned().unwrap_or(Value::Nil);
                act.slots.insert(*var, value);
            }
            InsnData::StoreToBinding { .. } | InsnData::LoadFromBinding { .. } => {}
        }

        Ok(Flow::Next)
    }

    fn call_method<'a>(
        &mut self,
        receiver: Value<'a>,
        method: &str,
        args: Vec<Value<'a>>,
        closure: Option<Value<'a>>,
    ) -> Result<Value<'a>, Unwind<'a>> {
        match method {
            "puts" => {
                let line: Vec<_> = args.iter().map(ToString::to_string).collect();
                self.output.push(line.join(" "));
                Ok(Value::Nil)
            }

            "choose" => {
                let choice = self.tape.get(self.cursor).copied().unwrap_or(false);
                self.cursor += 1;
                Ok(Value::Bool(choice))
            }

            "fail" => {
                let exception = args
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| Value::Str("failed".into()));
                Err(Unwind::Raise(exception))
            }

            "times" => {
                let n = match args.first() {
                    Some(Value::Int(n)) => *n,
                    _ => 0,
                };
                for i in 0..n {
                    self.yield_to(closure.as_ref(), vec![Value::Int(i)])?;
                }
                Ok(Value::Nil)
            }

            "call" => self.yield_to(Some(&receiver), args),

            _ => self.yield_to(closure.as_ref(), args),
        }
    }

    fn yield_to<'a>(
        &mut self,
        closure: Option<&Value<'a>>,
        args: Vec<Value<'a>>,
    ) -> Result<Value<'a>, Unwind<'a>> {
        match closure {
            Some(Value::Closure(closure)) => {
                let closure = closure.clone();
                self.call_scope(closure.scope, closure.env.clone(), &args)
            }
            _ => Ok(Value::Nil),
        }
    }
}

impl<'a> Activation<'a> {
    fn frame_of(&self, var: VarId) -> (&Frame<'a>, &'a str) {
        let scope: &'a Scope = self.scope;
        let Variable::Local { name, depth } = scope.var(var) else {
            panic!("{} has no frame in {}", scope.var(var), scope.name);
        };
        let frame = self
            .env
            .get(*depth as usize)
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("frame of {} is not allocated", scope.var(var)));
        (frame, name.as_str())
    }

    fn read(&self, var: VarId) -> Value<'a> {
        if self.framed && self.scope.var(var).is_local() {
            let (frame, name) = self.frame_of(var);
            return frame.borrow().get(name).cloned().unwrap_or(Value::Nil);
        }
        self.slots.get(&var).cloned().unwrap_or(Value::Nil)
    }

    fn write(&mut self, var: VarId, value: Value<'a>) {
        if self.framed && self.scope.var(var).is_local() {
            let (frame, name) = self.frame_of(var);
            frame.borrow_mut().insert(name.to_string(), value);
        } else {
            self.slots.insert(var, value);
        }
    }

    fn eval(&self, operand: &Operand) -> Value<'a> {
        let scope: &'a Scope = self.scope;
        match operand {
            Operand::Var(var) => self.read(*var),
            Operand::Fixnum(value) => Value::Int(*value),
            Operand::Bool(value) => Value::Bool(*value),
            Operand::Nil => Value::Nil,
            Operand::Str(value) => Value::Str(value.clone()),
            Operand::Array(elems) => Value::Array(elems.iter().map(|e| self.eval(e)).collect()),
            Operand::Closure(closure) => {
                let mut env = vec![None];
                env.extend(self.env.iter().cloned());
                Value::Closure(Rc::new(ClosureValue {
                    scope: scope.closure(*closure),
                    env,
                }))
            }
            other => Value::Str(format!("{other:?}")),
        }
    }
}
