//! Virtual Machine for ByteScript
//!
//! Executes prefix-encoded bytecode. Script calls push a frame onto an
//! explicit call stack instead of recursing on the host stack, and each
//! frame evaluates expressions with its own stack of pending operations:
//! an operator opcode pushes a pending entry, a leaf opcode produces a value,
//! and the value is fed to pending entries until one of them needs more
//! operands or completes a statement.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::ast::{BinaryOp, UnaryOp};
use crate::bytecode::{ByteReader, OpCode};
use crate::error::{ErrorKind, Result, ScriptError};
use crate::script::{ByteScript, ExecutionResult, KnownHeaders};
use crate::value::{ScriptType, Value};

/// Default maximum call depth
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Frames reserved up front; deeper stacks grow on demand.
const INITIAL_FRAMES: usize = 64;

/// Runtime limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Frames alive at once, the top-level invocation included.
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

/// Receiver of the signals a running script emits. Nested calls report to
/// the same sink as the top-level invocation.
pub trait EventSink {
    fn print(&mut self, message: &str);
    fn runtime_error(&mut self, message: &str);
}

/// Sink that records every signal, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectingSink {
    pub prints: Vec<String>,
    pub errors: Vec<String>,
}

impl EventSink for CollectingSink {
    fn print(&mut self, message: &str) {
        self.prints.push(message.to_string());
    }

    fn runtime_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
}

/// Compiled units, keyed by script name.
#[derive(Debug, Clone, Default)]
pub struct ScriptRegistry {
    units: HashMap<String, Rc<ByteScript>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit, returning the one it replaces.
    pub fn insert(&mut self, unit: ByteScript) -> Option<Rc<ByteScript>> {
        self.units.insert(unit.name().to_string(), Rc::new(unit))
    }

    pub fn get(&self, name: &str) -> Option<Rc<ByteScript>> {
        self.units.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Rc<ByteScript>> {
        self.units.remove(name)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Script names in alphabetical order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.units.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Headers of every registered unit, for compiling new scripts that call
    /// into this registry.
    pub fn headers(&self) -> KnownHeaders {
        self.units
            .iter()
            .map(|(name, unit)| (name.clone(), unit.header().clone()))
            .collect()
    }
}

/// The Virtual Machine: a registry plus runtime limits. Every `execute`
/// runs on a fresh interpreter.
#[derive(Debug, Clone, Default)]
pub struct Vm {
    registry: ScriptRegistry,
    config: VmConfig,
}

impl Vm {
    pub fn new(registry: ScriptRegistry) -> Self {
        Self::with_config(registry, VmConfig::default())
    }

    pub fn with_config(registry: ScriptRegistry, config: VmConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ScriptRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Run the named script with `args`, reporting prints and runtime errors
    /// to `sink`.
    pub fn execute(&self, name: &str, args: &[Value], sink: &mut dyn EventSink) -> ExecutionResult {
        Interpreter::new(&self.registry, self.config).run(name, args, sink)
    }
}

/// Lifecycle of an interpreter. Only `Ready` accepts a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    Running,
    Returned,
    Errored,
}

/// Single-use executor for one top-level invocation.
pub struct Interpreter<'r> {
    registry: &'r ScriptRegistry,
    config: VmConfig,
    state: State,
    frames: Vec<Frame>,
    /// Return value waiting to be delivered to the caller on top.
    incoming: Option<Value>,
    /// Callee whose failure the expression caller on top must inherit.
    failed_call: Option<String>,
}

impl<'r> Interpreter<'r> {
    pub fn new(registry: &'r ScriptRegistry, config: VmConfig) -> Self {
        Self {
            registry,
            config,
            state: State::Ready,
            frames: Vec::with_capacity(config.max_call_depth.min(INITIAL_FRAMES)),
            incoming: None,
            failed_call: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn run(&mut self, name: &str, args: &[Value], sink: &mut dyn EventSink) -> ExecutionResult {
        if self.state != State::Ready {
            let error = ScriptError::runtime(ErrorKind::RuntimeError(
                "interpreter has already run".to_string(),
            ));
            report(sink, name, &error);
            return ExecutionResult::failed(name, ScriptType::Void);
        }
        self.state = State::Running;

        let return_type = self
            .registry
            .get(name)
            .map_or(ScriptType::Void, |unit| unit.header().return_type());
        if let Err(error) = self.call(name, args.to_vec(), CallKind::Root) {
            report(sink, name, &error);
            self.state = State::Errored;
            return ExecutionResult::failed(name, return_type);
        }

        loop {
            let finished = match self.step(sink) {
                Ok(Step::Continue) => None,
                Ok(Step::Call { callee, args, kind }) => {
                    if let Err(error) = self.call(&callee, args, kind) {
                        report(sink, &callee, &error);
                        self.callee_failed(kind, callee);
                    }
                    None
                }
                Ok(Step::Return(value)) => self.finish_frame(value),
                Err(error) => self.fail_frame(error, sink),
            };

            if let Some(result) = finished {
                return result;
            }
        }
    }

    fn step(&mut self, sink: &mut dyn EventSink) -> Result<Step> {
        if let Some(callee) = self.failed_call.take() {
            return Err(ScriptError::runtime(ErrorKind::NoValue(callee)));
        }
        let incoming = self.incoming.take();
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| ScriptError::runtime(ErrorKind::RuntimeError("no active frame".into())))?;

        match incoming {
            Some(value) => frame.deliver(value, sink),
            None => frame.step(sink),
        }
    }

    /// Validate the arguments and push a frame for `name`.
    fn call(&mut self, name: &str, args: Vec<Value>, kind: CallKind) -> Result<()> {
        let unit = self
            .registry
            .get(name)
            .ok_or_else(|| ScriptError::runtime(ErrorKind::UnknownScript(name.to_string())))?;

        if self.frames.len() >= self.config.max_call_depth {
            return Err(ScriptError::runtime(ErrorKind::StackOverflow(
                self.config.max_call_depth,
            )));
        }

        let header = unit.header();
        if args.len() != header.arity() {
            return Err(ScriptError::runtime(ErrorKind::WrongArity(
                header.arity(),
                args.len(),
            )));
        }
        for (index, (arg, (_, expected))) in args.iter().zip(header.arguments()).enumerate() {
            if arg.script_type() != *expected {
                return Err(ScriptError::runtime(ErrorKind::ArgumentType(
                    index + 1,
                    expected.to_string(),
                    arg.type_name().to_string(),
                )));
            }
        }

        debug!(script = name, depth = self.frames.len() + 1, "entering script");
        self.frames.push(Frame::new(unit, args, kind));
        Ok(())
    }

    fn finish_frame(&mut self, value: Option<Value>) -> Option<ExecutionResult> {
        let Some(frame) = self.frames.pop() else {
            return Some(self.abandon());
        };
        match frame.kind {
            CallKind::Root => {
                self.state = State::Returned;
                Some(ExecutionResult::returned(frame.unit.header(), value))
            }
            CallKind::Statement => None,
            CallKind::Expression => {
                match value {
                    Some(value) => self.incoming = Some(value),
                    None => self.failed_call = Some(frame.unit.name().to_string()),
                }
                None
            }
        }
    }

    fn fail_frame(&mut self, error: ScriptError, sink: &mut dyn EventSink) -> Option<ExecutionResult> {
        let Some(frame) = self.frames.pop() else {
            report(sink, "<vm>", &error);
            return Some(self.abandon());
        };
        report(sink, frame.unit.name(), &error);

        if frame.kind == CallKind::Root {
            self.state = State::Errored;
            return Some(ExecutionResult::failed(
                frame.unit.name(),
                frame.unit.header().return_type(),
            ));
        }
        self.callee_failed(frame.kind, frame.unit.name().to_string());
        None
    }

    fn abandon(&mut self) -> ExecutionResult {
        self.state = State::Errored;
        ExecutionResult::failed("", ScriptType::Void)
    }

    /// A statement caller carries on; an expression caller has lost an
    /// operand and fails next.
    fn callee_failed(&mut self, kind: CallKind, callee: String) {
        if kind == CallKind::Expression {
            self.failed_call = Some(callee);
        }
    }
}

fn report(sink: &mut dyn EventSink, script: &str, error: &ScriptError) {
    let message = format!("{}: {}", script, error.kind);
    warn!(%message, "runtime error");
    sink.runtime_error(&message);
}

/// How a frame's result is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Root,
    /// Call statement, the result is discarded.
    Statement,
    /// Call inside an expression, the result is an operand.
    Expression,
}

/// What the interpreter must do after one frame step.
#[derive(Debug)]
enum Step {
    Continue,
    Call {
        callee: String,
        args: Vec<Value>,
        kind: CallKind,
    },
    Return(Option<Value>),
}

/// An operation waiting for operand values.
#[derive(Debug)]
enum Pending {
    Binary { op: BinaryOp, left: Option<Value> },
    Unary(UnaryOp),
    ToFloat,
    Call {
        callee: String,
        argc: usize,
        args: Vec<Value>,
        discard: bool,
    },
    Return,
    Print,
    Declare(u8),
    Set(u8),
    Test { target: i32 },
}

/// One decoded instruction.
#[derive(Debug)]
enum Instr {
    ReturnVoid,
    ReturnValue,
    Print,
    Declare { slot: u8, init: bool },
    Set(u8),
    Free(u8),
    Test(i32),
    Jump(i32),
    Call { callee: String, argc: u8 },
    Get(u8),
    Binary(BinaryOp),
    Unary(UnaryOp),
    ToFloat,
    Const(Value),
}

impl Instr {
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        let at = reader.pos();
        let op = reader.read_op()?;
        let instr = match op {
            OpCode::ReturnVoid => Instr::ReturnVoid,
            OpCode::ReturnValue => Instr::ReturnValue,
            OpCode::Print => Instr::Print,
            OpCode::DeclareVar => Instr::Declare {
                slot: reader.read_u8()?,
                init: reader.read_bool()?,
            },
            OpCode::SetVar => Instr::Set(reader.read_u8()?),
            OpCode::GetVar => Instr::Get(reader.read_u8()?),
            OpCode::FreeVar => Instr::Free(reader.read_u8()?),
            OpCode::CallFunction => Instr::Call {
                callee: reader.read_str()?,
                argc: reader.read_u8()?,
            },
            OpCode::CondTest => Instr::Test(reader.read_i32()?),
            OpCode::Jump => Instr::Jump(reader.read_i32()?),
            OpCode::Not => Instr::Unary(UnaryOp::Not),
            OpCode::Negate => Instr::Unary(UnaryOp::Neg),
            OpCode::ToFloat => Instr::ToFloat,
            OpCode::ConstBool => Instr::Const(Value::Bool(reader.read_bool()?)),
            OpCode::ConstInt => Instr::Const(Value::Int(reader.read_i32()?)),
            OpCode::ConstFloat => Instr::Const(Value::Float(reader.read_f32()?)),
            OpCode::ConstString => Instr::Const(Value::Str(reader.read_str()?)),
            other => match other.as_binary() {
                Some(op) => Instr::Binary(op),
                None => return Err(ScriptError::runtime(ErrorKind::UnknownOpcode(other.into(), at))),
            },
        };
        Ok(instr)
    }

    /// Statement instructions only appear where no expression is pending.
    /// Calls appear in both positions.
    fn is_statement(&self) -> bool {
        matches!(
            self,
            Instr::ReturnVoid
                | Instr::ReturnValue
                | Instr::Print
                | Instr::Declare { .. }
                | Instr::Set(_)
                | Instr::Free(_)
                | Instr::Test(_)
                | Instr::Jump(_)
        )
    }
}

/// Per-invocation state
struct Frame {
    unit: Rc<ByteScript>,
    pc: usize,
    /// Indexed by slot id, grown on first write.
    slots: Vec<Option<Value>>,
    pending: Vec<Pending>,
    kind: CallKind,
}

impl Frame {
    fn new(unit: Rc<ByteScript>, args: Vec<Value>, kind: CallKind) -> Self {
        let slots = args.into_iter().map(Some).collect();
        Self {
            unit,
            pc: 0,
            slots,
            pending: Vec::new(),
            kind,
        }
    }

    fn step(&mut self, sink: &mut dyn EventSink) -> Result<Step> {
        let unit = Rc::clone(&self.unit);
        let code = unit.bytecode();

        if self.pc >= code.len() {
            if !self.pending.is_empty() {
                return Err(ScriptError::runtime(ErrorKind::TruncatedBytecode(self.pc)));
            }
            return match unit.header().return_type() {
                ScriptType::Void => Ok(Step::Return(None)),
                _ => Err(ScriptError::runtime(ErrorKind::MissingReturn(
                    unit.name().to_string(),
                ))),
            };
        }

        let at = self.pc;
        let mut reader = ByteReader::at(code, at);
        let instr = Instr::decode(&mut reader)?;
        self.pc = reader.pos();
        trace!(script = unit.name(), pc = at, ?instr, "step");

        let statement = self.pending.is_empty();
        if statement != instr.is_statement() && !matches!(instr, Instr::Call { .. }) {
            let place = if statement { "a statement" } else { "an expression" };
            return Err(ScriptError::runtime(ErrorKind::RuntimeError(format!(
                "instruction at {:04} cannot start {}",
                at, place
            ))));
        }

        match instr {
            Instr::ReturnVoid => Ok(Step::Return(None)),
            Instr::ReturnValue => self.push(Pending::Return),
            Instr::Print => self.push(Pending::Print),
            Instr::Declare { slot, init } => {
                if init {
                    return self.push(Pending::Declare(slot));
                }
                self.store(slot, None);
                Ok(Step::Continue)
            }
            Instr::Set(slot) => self.push(Pending::Set(slot)),
            Instr::Free(slot) => {
                self.store(slot, None);
                Ok(Step::Continue)
            }
            Instr::Test(target) => self.push(Pending::Test { target }),
            Instr::Jump(target) => {
                self.jump(target)?;
                Ok(Step::Continue)
            }
            Instr::Call { callee, argc } => {
                let discard = statement;
                if argc == 0 {
                    return Ok(Step::Call {
                        callee,
                        args: Vec::new(),
                        kind: call_kind(discard),
                    });
                }
                self.push(Pending::Call {
                    callee,
                    argc: argc as usize,
                    args: Vec::with_capacity(argc as usize),
                    discard,
                })
            }
            Instr::Get(slot) => {
                let value = self
                    .slots
                    .get(slot as usize)
                    .cloned()
                    .flatten()
                    .ok_or_else(|| ScriptError::runtime(ErrorKind::UnassignedVariable(slot)))?;
                self.deliver(value, sink)
            }
            Instr::Binary(op) => self.push(Pending::Binary { op, left: None }),
            Instr::Unary(op) => self.push(Pending::Unary(op)),
            Instr::ToFloat => self.push(Pending::ToFloat),
            Instr::Const(value) => self.deliver(value, sink),
        }
    }

    fn store(&mut self, slot: u8, value: Option<Value>) {
        let index = slot as usize;
        if index >= self.slots.len() {
            if value.is_none() {
                return;
            }
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = value;
    }

    fn push(&mut self, pending: Pending) -> Result<Step> {
        self.pending.push(pending);
        Ok(Step::Continue)
    }

    /// Feed a finished value to the innermost pending operation, folding
    /// upward until something needs another operand.
    fn deliver(&mut self, value: Value, sink: &mut dyn EventSink) -> Result<Step> {
        let mut value = value;
        loop {
            let pending = self.pending.pop().ok_or_else(|| {
                ScriptError::runtime(ErrorKind::RuntimeError(format!(
                    "value {} has no consumer at {:04}",
                    value, self.pc
                )))
            })?;

            match pending {
                Pending::Binary { op, left: None } => {
                    return self.push(Pending::Binary {
                        op,
                        left: Some(value),
                    });
                }
                Pending::Binary { op, left: Some(left) } => value = binary(op, left, value)?,
                Pending::Unary(op) => value = unary(op, value)?,
                Pending::ToFloat => value = to_float(value)?,
                Pending::Call {
                    callee,
                    argc,
                    mut args,
                    discard,
                } => {
                    args.push(value);
                    if args.len() < argc {
                        return self.push(Pending::Call {
                            callee,
                            argc,
                            args,
                            discard,
                        });
                    }
                    return Ok(Step::Call {
                        callee,
                        args,
                        kind: call_kind(discard),
                    });
                }
                Pending::Return => return Ok(Step::Return(Some(value))),
                Pending::Print => {
                    sink.print(&value.to_string());
                    return Ok(Step::Continue);
                }
                Pending::Declare(slot) | Pending::Set(slot) => {
                    self.store(slot, Some(value));
                    return Ok(Step::Continue);
                }
                Pending::Test { target } => {
                    match value {
                        Value::Bool(true) => {}
                        Value::Bool(false) => self.jump(target)?,
                        other => {
                            return Err(ScriptError::runtime(ErrorKind::TypeMismatch(
                                "bool".to_string(),
                                other.type_name().to_string(),
                            )));
                        }
                    }
                    return Ok(Step::Continue);
                }
            }
        }
    }

    fn jump(&mut self, target: i32) -> Result<()> {
        let mut reader = ByteReader::new(self.unit.bytecode());
        reader.seek(target)?;
        self.pc = reader.pos();
        Ok(())
    }
}

fn call_kind(discard: bool) -> CallKind {
    if discard {
        CallKind::Statement
    } else {
        CallKind::Expression
    }
}

// ==================== Operators ====================

fn mismatch(expected: &str, left: &Value, right: &Value) -> ScriptError {
    ScriptError::runtime(ErrorKind::TypeMismatch(
        expected.to_string(),
        format!("{} and {}", left.type_name(), right.type_name()),
    ))
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value> {
    if op == BinaryOp::Add && (matches!(left, Value::Str(_)) || matches!(right, Value::Str(_))) {
        return Ok(Value::Str(format!("{}{}", left, right)));
    }

    if op.is_arithmetic() {
        return match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => int_arithmetic(op, *a, *b).map(Value::Int),
            _ => match (left.as_f32(), right.as_f32()) {
                (Some(a), Some(b)) => Ok(Value::Float(float_arithmetic(op, a, b))),
                _ => Err(mismatch("numeric operands", &left, &right)),
            },
        };
    }

    if op.is_ordering() {
        let result = match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => compare(op, a, b),
            _ => match (left.as_f32(), right.as_f32()) {
                (Some(a), Some(b)) => compare(op, &a, &b),
                _ => return Err(mismatch("numeric operands", &left, &right)),
            },
        };
        return Ok(Value::Bool(result));
    }

    match op {
        BinaryOp::Eq => Ok(Value::Bool(left.script_eq(&right))),
        BinaryOp::Ne => Ok(Value::Bool(!left.script_eq(&right))),
        BinaryOp::And | BinaryOp::Or => match (&left, &right) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(if op == BinaryOp::And {
                *a && *b
            } else {
                *a || *b
            })),
            _ => Err(mismatch("bool operands", &left, &right)),
        },
        _ => Err(mismatch("valid operands", &left, &right)),
    }
}

/// Integer arithmetic wraps on overflow.
fn int_arithmetic(op: BinaryOp, a: i32, b: i32) -> Result<i32> {
    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div | BinaryOp::Mod if b == 0 => {
            return Err(ScriptError::runtime(ErrorKind::DivisionByZero));
        }
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Mod => a.wrapping_rem(b),
        BinaryOp::Pow => {
            let exponent =
                u32::try_from(b).map_err(|_| ScriptError::runtime(ErrorKind::NegativeExponent))?;
            a.wrapping_pow(exponent)
        }
        _ => {
            return Err(ScriptError::runtime(ErrorKind::RuntimeError(format!(
                "'{}' is not an arithmetic operator",
                op
            ))));
        }
    };
    Ok(value)
}

fn float_arithmetic(op: BinaryOp, a: f32, b: f32) -> f32 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => a.powf(b),
    }
}

fn compare<T: PartialOrd>(op: BinaryOp, a: &T, b: &T) -> bool {
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        _ => a >= b,
    }
}

fn unary(op: UnaryOp, operand: Value) -> Result<Value> {
    match (op, operand) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Int(n)) => Ok(Value::Int(n.wrapping_neg())),
        (UnaryOp::Neg, Value::Float(n)) => Ok(Value::Float(-n)),
        (UnaryOp::Not, other) => Err(ScriptError::runtime(ErrorKind::TypeMismatch(
            "bool".to_string(),
            other.type_name().to_string(),
        ))),
        (UnaryOp::Neg, other) => Err(ScriptError::runtime(ErrorKind::TypeMismatch(
            "int or float".to_string(),
            other.type_name().to_string(),
        ))),
    }
}

fn to_float(value: Value) -> Result<Value> {
    match value {
        Value::Int(n) => Ok(Value::Float(n as f32)),
        Value::Float(n) => Ok(Value::Float(n)),
        other => Err(ScriptError::runtime(ErrorKind::TypeMismatch(
            "int".to_string(),
            other.type_name().to_string(),
        ))),
    }
}
