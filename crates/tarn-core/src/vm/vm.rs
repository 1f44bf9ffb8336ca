// Tarn virtual machine
// Stack-based fetch-execute loop over the flat instruction stream, with a
// chained scope stack and call records for closures

use std::io::{self, Write};
use std::rc::Rc;

use crate::compiler::chunk::{Chunk, Constant};
use crate::compiler::opcode::OpCode;
use crate::error::{Span, StackFrame, TarnError, TarnResult};
use crate::vm::value::{new_frame, Closure, ScopeFrame, Value};

const STACK_MAX: usize = 65_536;
const FRAMES_MAX: usize = 4_096;

/// Saved (return pc, caller scope chain), pushed per call and popped on
/// return to restore both atomically. The name and call site feed runtime
/// fault stack traces.
struct CallRecord {
    return_pc: usize,
    scopes: Vec<ScopeFrame>,
    function: String,
    call_span: Span,
}

/// The Tarn virtual machine
pub struct VM {
    stack: Vec<Value>,
    frames: Vec<CallRecord>,
    /// Active scope chain. Index 0 is the global frame, installed once and
    /// never popped; it persists across runs so a REPL can grow it.
    scopes: Vec<ScopeFrame>,
    file: String,
    source: String,
    current_span: Span,
    stdout: Box<dyn Write>,
}

impl VM {
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(stdout: Box<dyn Write>) -> Self {
        Self {
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            scopes: vec![new_frame(0)],
            file: String::new(),
            source: String::new(),
            current_span: Span::default(),
            stdout,
        }
    }

    /// Execute a chunk from its first instruction
    pub fn run(&mut self, chunk: &Chunk, file: &str, source: &str) -> TarnResult<Value> {
        self.run_from(chunk, 0, file, source)
    }

    /// Execute a chunk from `start`. Used by the REPL to run only the code
    /// appended since the previous input.
    pub fn run_from(
        &mut self,
        chunk: &Chunk,
        start: usize,
        file: &str,
        source: &str,
    ) -> TarnResult<Value> {
        self.file = file.to_string();
        self.source = source.to_string();
        self.stack.clear();

        // Grow the persistent global frame to the final symbol count
        {
            let mut globals = self.scopes[0].borrow_mut();
            if globals.len() < chunk.globals.len() {
                globals.resize(chunk.globals.len(), Value::Null);
            }
        }

        let result = self.dispatch(chunk, start);

        if result.is_err() {
            // A fault aborts the run; drop everything but the global frame so
            // the machine stays usable for a later run
            self.scopes.truncate(1);
            self.frames.clear();
            self.stack.clear();
        }

        result
    }

    fn dispatch(&mut self, chunk: &Chunk, start: usize) -> TarnResult<Value> {
        let mut pc = start;

        while pc < chunk.code.len() {
            self.current_span = chunk.get_span(pc);
            let raw = chunk.code[pc];
            let op = OpCode::from_i32(raw)
                .ok_or_else(|| self.fault(format!("Unrecognized opcode {}", raw)))?;
            pc += 1;

            match op {
                OpCode::Constant => {
                    let idx = self.read_index(chunk, &mut pc)?;
                    let value = match chunk.constants.get(idx) {
                        Some(Constant::Number(n)) => Value::Number(*n),
                        Some(Constant::Str(s)) => Value::Str(s.clone()),
                        Some(Constant::Function(f)) => Value::Function(f.clone()),
                        None => {
                            return Err(
                                self.fault(format!("Constant index {} out of range", idx))
                            );
                        }
                    };
                    self.push(value)?;
                }

                OpCode::True => self.push(Value::Boolean(true))?,
                OpCode::False => self.push(Value::Boolean(false))?,
                OpCode::Null => self.push(Value::Null)?,

                OpCode::GetVar => {
                    let depth = self.read_index(chunk, &mut pc)?;
                    let index = self.read_index(chunk, &mut pc)?;
                    let frame = self.frame_at_depth(depth)?;
                    let value = frame.borrow().get(index).cloned().ok_or_else(|| {
                        self.fault(format!("Frame slot {} out of range", index))
                    })?;
                    self.push(value)?;
                }

                OpCode::SetVar => {
                    let depth = self.read_index(chunk, &mut pc)?;
                    let index = self.read_index(chunk, &mut pc)?;
                    // Stores without popping
                    let value = self.peek()?.clone();
                    let frame = self.frame_at_depth(depth)?;
                    let mut slots = frame.borrow_mut();
                    match slots.get_mut(index) {
                        Some(slot) => *slot = value,
                        None => {
                            drop(slots);
                            return Err(
                                self.fault(format!("Frame slot {} out of range", index))
                            );
                        }
                    }
                }

                OpCode::GetGlobal => {
                    let index = self.read_index(chunk, &mut pc)?;
                    let value = self.scopes[0].borrow().get(index).cloned().ok_or_else(
                        || self.fault(format!("Global slot {} out of range", index)),
                    )?;
                    self.push(value)?;
                }

                OpCode::SetGlobal => {
                    let index = self.read_index(chunk, &mut pc)?;
                    let value = self.pop()?;
                    let frame = self.scopes[0].clone();
                    let mut slots = frame.borrow_mut();
                    match slots.get_mut(index) {
                        Some(slot) => *slot = value,
                        None => {
                            drop(slots);
                            return Err(
                                self.fault(format!("Global slot {} out of range", index))
                            );
                        }
                    }
                }

                OpCode::Closure => {
                    let value = self.pop()?;
                    match value {
                        Value::Function(func) => {
                            // Capture the current chain by reference sharing,
                            // not by deep copy
                            let closure = Closure {
                                name: func.name.clone(),
                                arity: func.arity,
                                entry: func.entry.get(),
                                scopes: self.scopes.clone(),
                            };
                            self.push(Value::Closure(Rc::new(closure)))?;
                        }
                        other => {
                            return Err(self.fault(format!(
                                "Cannot make a closure from a {} value",
                                other.type_name()
                            )));
                        }
                    }
                }

                OpCode::Call => {
                    let argc = self.read_index(chunk, &mut pc)?;
                    if self.frames.len() >= FRAMES_MAX {
                        return Err(self.fault("Call stack overflow"));
                    }

                    // Fresh argument frame, argument order preserved
                    let mut args = vec![Value::Null; argc];
                    for slot in args.iter_mut().rev() {
                        *slot = self.pop()?;
                    }

                    let callee = self.pop()?;
                    let closure = match callee {
                        Value::Closure(c) => c,
                        other => {
                            return Err(self.fault(format!(
                                "Value of type {} is not callable",
                                other.type_name()
                            )));
                        }
                    };

                    if argc != closure.arity {
                        return Err(self.fault(format!(
                            "Function '{}' expects {} arguments, got {}",
                            closure.name, closure.arity, argc
                        )));
                    }

                    // Install the captured chain plus the argument frame; the
                    // caller's own chain goes into the call record untouched
                    let mut chain = closure.scopes.clone();
                    chain.push(Rc::new(std::cell::RefCell::new(args)));
                    let caller_chain = std::mem::replace(&mut self.scopes, chain);

                    self.frames.push(CallRecord {
                        return_pc: pc,
                        scopes: caller_chain,
                        function: closure.name.clone(),
                        call_span: self.current_span,
                    });

                    pc = closure.entry;
                }

                OpCode::Return => {
                    // The return value stays on the operand stack and becomes
                    // the call's result
                    self.scopes.pop();
                    let record = self
                        .frames
                        .pop()
                        .ok_or_else(|| self.fault("'return' outside of a function call"))?;
                    pc = record.return_pc;
                    self.scopes = record.scopes;
                }

                OpCode::EnterScope => {
                    let size = self.read_index(chunk, &mut pc)?;
                    self.scopes.push(new_frame(size));
                }

                OpCode::LeaveScope => {
                    if self.scopes.len() <= 1 {
                        return Err(self.fault("Cannot leave the global scope"));
                    }
                    self.scopes.pop();
                }

                OpCode::Jump => {
                    pc = self.read_target(chunk, &mut pc)?;
                }

                OpCode::JumpTrue => {
                    let target = self.read_target(chunk, &mut pc)?;
                    if self.pop()? == Value::Boolean(true) {
                        pc = target;
                    }
                }

                OpCode::JumpFalse => {
                    let target = self.read_target(chunk, &mut pc)?;
                    if self.pop()? == Value::Boolean(false) {
                        pc = target;
                    }
                }

                OpCode::Add => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let result = match (&a, &b) {
                        (Value::Number(x), Value::Number(y)) => Value::Number(x + y),
                        (Value::Str(x), Value::Str(y)) => {
                            Value::Str(Rc::from(format!("{}{}", x, y)))
                        }
                        _ => {
                            return Err(self.fault(format!(
                                "Cannot add {} and {}",
                                a.type_name(),
                                b.type_name()
                            )));
                        }
                    };
                    self.push(result)?;
                }

                OpCode::Sub => self.arithmetic("-", |a, b| a - b)?,
                OpCode::Mul => self.arithmetic("*", |a, b| a * b)?,

                OpCode::Div => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    match (&a, &b) {
                        (Value::Number(x), Value::Number(y)) => {
                            if *y == 0.0 {
                                return Err(self.fault("Division by zero"));
                            }
                            self.push(Value::Number(x / y))?;
                        }
                        _ => {
                            return Err(self.fault(format!(
                                "Cannot divide {} by {}",
                                a.type_name(),
                                b.type_name()
                            )));
                        }
                    }
                }

                OpCode::Greater => self.comparison(">", |a, b| a > b)?,
                OpCode::GreaterEqual => self.comparison(">=", |a, b| a >= b)?,
                OpCode::Less => self.comparison("<", |a, b| a < b)?,
                OpCode::LessEqual => self.comparison("<=", |a, b| a <= b)?,

                OpCode::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Boolean(a == b))?;
                }

                OpCode::NotEqual => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Boolean(a != b))?;
                }

                OpCode::Not => {
                    let value = self.pop()?;
                    match value {
                        Value::Boolean(b) => self.push(Value::Boolean(!b))?,
                        other => {
                            return Err(self.fault(format!(
                                "Cannot apply '!' to a {} value",
                                other.type_name()
                            )));
                        }
                    }
                }

                OpCode::Negate => {
                    let value = self.pop()?;
                    match value {
                        Value::Number(n) => self.push(Value::Number(-n))?,
                        other => {
                            return Err(self.fault(format!(
                                "Cannot negate a {} value",
                                other.type_name()
                            )));
                        }
                    }
                }

                OpCode::PrintItem => {
                    let value = self.pop()?;
                    let _ = write!(self.stdout, "{} ", value);
                }

                OpCode::PrintNewline => {
                    let _ = writeln!(self.stdout);
                    let _ = self.stdout.flush();
                }

                OpCode::Pop => {
                    self.pop()?;
                }
            }
        }

        Ok(self.stack.pop().unwrap_or(Value::Null))
    }

    // ==================== Helpers ====================

    fn read_index(&self, chunk: &Chunk, pc: &mut usize) -> TarnResult<usize> {
        let raw = chunk
            .code
            .get(*pc)
            .copied()
            .ok_or_else(|| self.fault("Truncated instruction"))?;
        *pc += 1;
        usize::try_from(raw).map_err(|_| self.fault(format!("Invalid operand {}", raw)))
    }

    fn read_target(&self, chunk: &Chunk, pc: &mut usize) -> TarnResult<usize> {
        let raw = chunk
            .code
            .get(*pc)
            .copied()
            .ok_or_else(|| self.fault("Truncated instruction"))?;
        *pc += 1;
        usize::try_from(raw).map_err(|_| self.fault(format!("Invalid jump target {}", raw)))
    }

    /// Frame `depth` steps in from the innermost end of the chain
    fn frame_at_depth(&self, depth: usize) -> TarnResult<ScopeFrame> {
        if depth >= self.scopes.len() {
            return Err(self.fault(format!("Scope depth {} out of range", depth)));
        }
        Ok(self.scopes[self.scopes.len() - 1 - depth].clone())
    }

    fn push(&mut self, value: Value) -> TarnResult<()> {
        if self.stack.len() >= STACK_MAX {
            return Err(self.fault("Operand stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> TarnResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| self.fault("Operand stack underflow"))
    }

    fn peek(&self) -> TarnResult<&Value> {
        self.stack
            .last()
            .ok_or_else(|| self.fault("Operand stack underflow"))
    }

    fn arithmetic(&mut self, symbol: &str, f: fn(f64, f64) -> f64) -> TarnResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => {
                let result = f(*x, *y);
                self.push(Value::Number(result))
            }
            _ => Err(self.fault(format!(
                "Cannot apply '{}' to {} and {}",
                symbol,
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    fn comparison(&mut self, symbol: &str, f: fn(f64, f64) -> bool) -> TarnResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => {
                let result = f(*x, *y);
                self.push(Value::Boolean(result))
            }
            _ => Err(self.fault(format!(
                "Cannot compare {} {} {}",
                a.type_name(),
                symbol,
                b.type_name()
            ))),
        }
    }

    fn fault(&self, message: impl Into<String>) -> TarnError {
        let mut err = TarnError::runtime_fault(message, self.current_span, &self.file)
            .with_source(&self.source);
        if !self.frames.is_empty() {
            let trace = self
                .frames
                .iter()
                .rev()
                .map(|record| {
                    StackFrame::new(
                        record.function.clone(),
                        self.file.clone(),
                        record.call_span.start.line,
                        record.call_span.start.column,
                    )
                })
                .collect();
            err = err.with_stack_trace(trace);
        }
        err
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}
