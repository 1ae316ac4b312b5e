//! Tree-walking interpreter.
//!
//! Runs only inside the sandbox worker. Integer arithmetic is checked,
//! `/` always produces a float, and division by zero is an error for both
//! integers and floats.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::ast::*;
use crate::parser::{parse, ParseError};
use crate::value::{Builtin, Function, ModuleValue, Scope, Value};

/// Nested user function calls allowed before the script is aborted.
pub const MAX_CALL_DEPTH: usize = 128;

/// Upper bound on the number of items `range()` may materialize.
const MAX_RANGE_LEN: i64 = 10_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    pub span: Option<Span>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span: None,
        }
    }

    /// Attach a location unless one is already recorded.
    fn at(mut self, span: Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.span {
            Some(span) => write!(f, "runtime error at {span}: {}", self.message),
            None => write!(f, "runtime error: {}", self.message),
        }
    }
}

impl std::error::Error for RuntimeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    Parse(ParseError),
    Runtime(RuntimeError),
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptError::Parse(e) => write!(f, "{e}"),
            ScriptError::Runtime(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ScriptError {}

impl From<ParseError> for ScriptError {
    fn from(e: ParseError) -> Self {
        ScriptError::Parse(e)
    }
}

impl From<RuntimeError> for ScriptError {
    fn from(e: RuntimeError) -> Self {
        ScriptError::Runtime(e)
    }
}

type RtResult<T> = Result<T, RuntimeError>;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Per-activation state: the scope plus `global`/`nonlocal` declarations.
struct Frame {
    scope: Rc<Scope>,
    globals: BTreeSet<String>,
    nonlocals: BTreeSet<String>,
    in_function: bool,
}

pub struct Interpreter {
    globals: Rc<Scope>,
    depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `source`, execute its top level, then call `entry` with `args`.
pub fn run_entrypoint(source: &str, entry: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
    let module = parse(source)?;
    let mut interp = Interpreter::new();
    interp.load(&module)?;
    Ok(interp.call(entry, args)?)
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            globals: Rc::new(Scope::default()),
            depth: 0,
        }
    }

    /// Execute module top-level statements, defining functions and constants.
    pub fn load(&mut self, module: &Module) -> RtResult<()> {
        let mut frame = Frame {
            scope: Rc::clone(&self.globals),
            globals: BTreeSet::new(),
            nonlocals: BTreeSet::new(),
            in_function: false,
        };
        match self.exec_block(&module.body, &mut frame)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(RuntimeError::new("'return' outside function")),
            Flow::Break | Flow::Continue => Err(RuntimeError::new("'break' or 'continue' outside loop")),
        }
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.lookup(name)
    }

    /// Call a module-level function by name.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> RtResult<Value> {
        let func = self
            .global(name)
            .ok_or_else(|| RuntimeError::new(format!("entrypoint '{name}' is not defined")))?;
        self.call_value(&func, args)
    }

    // ---------------------------------------------------------------------
    // statements
    // ---------------------------------------------------------------------

    fn exec_block(&mut self, stmts: &[Stmt], frame: &mut Frame) -> RtResult<Flow> {
        for stmt in stmts {
            match self.exec(stmt, frame).map_err(|e| e.at(stmt.span))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, frame: &mut Frame) -> RtResult<Flow> {
        match &stmt.kind {
            StmtKind::Import { names } => {
                for alias in names {
                    let module = import_module(&alias.name)?;
                    self.assign_name(frame, alias.bound_name(), module)?;
                }
            }
            StmtKind::FromImport { module, names } => {
                let m = import_module(module)?;
                for alias in names {
                    let member = get_attr(&m, &alias.name)?;
                    self.assign_name(frame, alias.bound_name(), member)?;
                }
            }
            StmtKind::FunctionDef(def) => {
                let func = Value::Function(Rc::new(Function {
                    def: Rc::new(def.clone()),
                    closure: Rc::clone(&frame.scope),
                }));
                self.assign_name(frame, &def.name, func)?;
            }
            StmtKind::Return(value) => {
                if !frame.in_function {
                    return Err(RuntimeError::new("'return' outside function"));
                }
                let v = match value {
                    Some(e) => self.eval(e, frame)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(v));
            }
            StmtKind::If { test, body, orelse } => {
                let flow = if self.eval(test, frame)?.truthy() {
                    self.exec_block(body, frame)?
                } else {
                    self.exec_block(orelse, frame)?
                };
                return Ok(flow);
            }
            StmtKind::While { test, body } => {
                while self.eval(test, frame)?.truthy() {
                    match self.exec_block(body, frame)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
            }
            StmtKind::For { target, iter, body } => {
                let items = iterate(&self.eval(iter, frame)?)?;
                for item in items {
                    self.assign_name(frame, target, item)?;
                    match self.exec_block(body, frame)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Global(names) => {
                if frame.in_function {
                    frame.globals.extend(names.iter().cloned());
                }
            }
            StmtKind::Nonlocal(names) => {
                if !frame.in_function {
                    return Err(RuntimeError::new("nonlocal declaration not allowed at module level"));
                }
                frame.nonlocals.extend(names.iter().cloned());
            }
            StmtKind::Assign { target, value } => {
                let v = self.eval(value, frame)?;
                self.assign(target, v, frame)?;
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, frame)?,
            StmtKind::Expr(e) => {
                self.eval(e, frame)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn assign_name(&mut self, frame: &Frame, name: &str, value: Value) -> RtResult<()> {
        if frame.globals.contains(name) {
            self.globals.set(name, value);
            return Ok(());
        }
        if frame.nonlocals.contains(name) {
            let mut scope = frame.scope.parent.clone();
            while let Some(s) = scope {
                if s.parent.is_none() {
                    break;
                }
                if s.has(name) {
                    s.set(name, value);
                    return Ok(());
                }
                scope = s.parent.clone();
            }
            return Err(RuntimeError::new(format!("no binding for nonlocal '{name}' found")));
        }
        frame.scope.set(name, value);
        Ok(())
    }

    fn lookup(&self, frame: &Frame, name: &str) -> RtResult<Value> {
        let found = if frame.globals.contains(name) {
            self.globals.lookup(name)
        } else {
            frame.scope.lookup(name)
        };
        found
            .or_else(|| Builtin::global(name).map(Value::Builtin))
            .ok_or_else(|| RuntimeError::new(format!("name '{name}' is not defined")))
    }

    fn assign(&mut self, target: &Target, value: Value, frame: &mut Frame) -> RtResult<()> {
        match target {
            Target::Name(n) => self.assign_name(frame, n, value),
            Target::Attribute { value: obj, attr } => {
                let obj = self.eval(obj, frame)?;
                Err(RuntimeError::new(format!(
                    "cannot set attribute '{attr}' on {} object",
                    obj.type_name()
                )))
            }
            Target::Subscript { value: obj, index } => {
                let obj = self.eval(obj, frame)?;
                let index = self.eval(index, frame)?;
                set_item(&obj, &index, value)
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr, frame: &mut Frame) -> RtResult<()> {
        match target {
            Target::Name(n) => {
                let current = self.lookup(frame, n)?;
                let rhs = self.eval(value, frame)?;
                let next = binary(op, &current, &rhs)?;
                self.assign_name(frame, n, next)
            }
            Target::Subscript { value: obj, index } => {
                let obj = self.eval(obj, frame)?;
                let index = self.eval(index, frame)?;
                let current = get_item(&obj, &index)?;
                let rhs = self.eval(value, frame)?;
                set_item(&obj, &index, binary(op, &current, &rhs)?)
            }
            Target::Attribute { .. } => {
                let rhs = self.eval(value, frame)?;
                self.assign(target, rhs, frame)
            }
        }
    }

    // ---------------------------------------------------------------------
    // expressions
    // ---------------------------------------------------------------------

    fn eval(&mut self, expr: &Expr, frame: &mut Frame) -> RtResult<Value> {
        let span = expr.span;
        let v = match &expr.kind {
            ExprKind::Name(n) => self.lookup(frame, n),
            ExprKind::Int(i) => Ok(Value::Int(*i)),
            ExprKind::Float(x) => Ok(Value::Float(*x)),
            ExprKind::Str(s) => Ok(Value::str(s)),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::NoneLit => Ok(Value::None),
            ExprKind::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, frame)?);
                }
                Ok(Value::list(out))
            }
            ExprKind::Dict(pairs) => {
                let mut out = BTreeMap::new();
                for (k, v) in pairs {
                    let key = match self.eval(k, frame)? {
                        Value::Str(s) => s.to_string(),
                        other => {
                            return Err(RuntimeError::new(format!(
                                "dict keys must be str, not {}",
                                other.type_name()
                            ))
                            .at(k.span))
                        }
                    };
                    let value = self.eval(v, frame)?;
                    out.insert(key, value);
                }
                Ok(Value::dict(out))
            }
            ExprKind::Attribute { value, attr } => {
                let obj = self.eval(value, frame)?;
                get_attr(&obj, attr)
            }
            ExprKind::Call { func, args } => {
                let callee = self.eval(func, frame)?;
                let mut argv = Vec::with_capacity(args.len());
                for a in args {
                    argv.push(self.eval(a, frame)?);
                }
                self.call_value(&callee, argv)
            }
            ExprKind::Subscript { value, index } => {
                let obj = self.eval(value, frame)?;
                let index = self.eval(index, frame)?;
                get_item(&obj, &index)
            }
            ExprKind::Unary { op, operand } => {
                let v = self.eval(operand, frame)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
                    UnaryOp::Neg => negate(&v),
                }
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.eval(left, frame)?;
                let r = self.eval(right, frame)?;
                binary(*op, &l, &r)
            }
            ExprKind::Compare { op, left, right } => {
                let l = self.eval(left, frame)?;
                let r = self.eval(right, frame)?;
                compare(*op, &l, &r).map(Value::Bool)
            }
            ExprKind::BoolOp { op, left, right } => {
                let l = self.eval(left, frame)?;
                match (op, l.truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(l),
                    _ => self.eval(right, frame),
                }
            }
        };
        v.map_err(|e| e.at(span))
    }

    fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> RtResult<Value> {
        match callee {
            Value::Function(func) => self.call_function(func, args),
            Value::Builtin(b) => call_builtin(*b, args),
            Value::ListAppend(list) => {
                let [item] = exact_args::<1>("append", args)?;
                list.borrow_mut().push(item);
                Ok(Value::None)
            }
            other => Err(RuntimeError::new(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, func: &Rc<Function>, args: Vec<Value>) -> RtResult<Value> {
        let def = Rc::clone(&func.def);
        if args.len() != def.params.len() {
            return Err(RuntimeError::new(format!(
                "{}() takes {} positional arguments but {} were given",
                def.name,
                def.params.len(),
                args.len()
            )));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::new("maximum recursion depth exceeded"));
        }

        let scope = Scope::child(Rc::clone(&func.closure));
        for (p, a) in def.params.iter().zip(args) {
            scope.set(p, a);
        }
        let mut frame = Frame {
            scope,
            globals: BTreeSet::new(),
            nonlocals: BTreeSet::new(),
            in_function: true,
        };

        self.depth += 1;
        let flow = self.exec_block(&def.body, &mut frame);
        self.depth -= 1;

        match flow? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(Value::None),
            Flow::Break | Flow::Continue => Err(RuntimeError::new("'break' or 'continue' outside loop")),
        }
    }
}

// -------------------------------------------------------------------------
// modules
// -------------------------------------------------------------------------

fn import_module(name: &str) -> RtResult<Value> {
    match name {
        "math" => Ok(math_module()),
        other => Err(RuntimeError::new(format!("module '{other}' is not available"))),
    }
}

fn math_module() -> Value {
    let mut members = BTreeMap::new();
    for b in [
        Builtin::MathSqrt,
        Builtin::MathLog,
        Builtin::MathExp,
        Builtin::MathPow,
        Builtin::MathFloor,
        Builtin::MathCeil,
        Builtin::MathFabs,
        Builtin::MathIsNan,
        Builtin::MathIsInf,
    ] {
        members.insert(b.name().to_string(), Value::Builtin(b));
    }
    members.insert("nan".to_string(), Value::Float(f64::NAN));
    members.insert("inf".to_string(), Value::Float(f64::INFINITY));
    members.insert("pi".to_string(), Value::Float(std::f64::consts::PI));
    members.insert("e".to_string(), Value::Float(std::f64::consts::E));
    Value::Module(Rc::new(ModuleValue {
        name: "math".to_string(),
        members,
    }))
}

fn get_attr(obj: &Value, attr: &str) -> RtResult<Value> {
    let found = match obj {
        Value::Record(fields) => fields.get(attr).cloned(),
        Value::Module(m) => m.members.get(attr).cloned(),
        Value::List(items) if attr == "append" => Some(Value::ListAppend(Rc::clone(items))),
        _ => None,
    };
    found.ok_or_else(|| {
        RuntimeError::new(format!(
            "'{}' object has no attribute '{attr}'",
            obj.type_name()
        ))
    })
}

// -------------------------------------------------------------------------
// containers
// -------------------------------------------------------------------------

fn normalize_index(index: &Value, len: usize) -> RtResult<usize> {
    let i = match index {
        Value::Int(i) => *i,
        Value::Bool(b) => i64::from(*b),
        other => {
            return Err(RuntimeError::new(format!(
                "indices must be integers, not {}",
                other.type_name()
            )))
        }
    };
    let len_i = len as i64;
    let resolved = if i < 0 { i + len_i } else { i };
    if resolved < 0 || resolved >= len_i {
        return Err(RuntimeError::new(format!("index {i} out of range")));
    }
    Ok(resolved as usize)
}

fn dict_key(index: &Value) -> RtResult<String> {
    match index {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(RuntimeError::new(format!(
            "dict keys must be str, not {}",
            other.type_name()
        ))),
    }
}

fn get_item(obj: &Value, index: &Value) -> RtResult<Value> {
    match obj {
        Value::List(items) => {
            let items = items.borrow();
            let i = normalize_index(index, items.len())?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(index, chars.len())?;
            Ok(Value::str(&chars[i].to_string()))
        }
        Value::Dict(map) => {
            let key = dict_key(index)?;
            map.borrow()
                .get(&key)
                .cloned()
                .ok_or_else(|| RuntimeError::new(format!("key '{key}' not found")))
        }
        other => Err(RuntimeError::new(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn set_item(obj: &Value, index: &Value, value: Value) -> RtResult<()> {
    match obj {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = normalize_index(index, items.len())?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(map) => {
            let key = dict_key(index)?;
            map.borrow_mut().insert(key, value);
            Ok(())
        }
        other => Err(RuntimeError::new(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn iterate(v: &Value) -> RtResult<Vec<Value>> {
    match v {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(&c.to_string())).collect()),
        Value::Dict(map) => Ok(map.borrow().keys().map(|k| Value::str(k)).collect()),
        other => Err(RuntimeError::new(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

// -------------------------------------------------------------------------
// arithmetic
// -------------------------------------------------------------------------

fn overflow() -> RuntimeError {
    RuntimeError::new("integer overflow")
}

fn zero_division() -> RuntimeError {
    RuntimeError::new("division by zero")
}

fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn negate(v: &Value) -> RtResult<Value> {
    match v {
        Value::Float(x) => Ok(Value::Float(-x)),
        other => match as_int(other) {
            Some(i) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
            None => Err(RuntimeError::new(format!(
                "bad operand type for unary -: '{}'",
                other.type_name()
            ))),
        },
    }
}

fn int_floor_div(a: i64, b: i64) -> RtResult<i64> {
    if b == 0 {
        return Err(zero_division());
    }
    let q = a.checked_div(b).ok_or_else(overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn int_mod(a: i64, b: i64) -> RtResult<i64> {
    if b == 0 {
        return Err(zero_division());
    }
    let r = a.checked_rem(b).ok_or_else(overflow)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn float_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

fn binary(op: BinOp, l: &Value, r: &Value) -> RtResult<Value> {
    if let (Some(a), Some(b)) = (as_int(l), as_int(r)) {
        return int_binary(op, a, b);
    }
    if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
        return float_binary(op, a, b).map(Value::Float);
    }
    match (op, l, r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::str(&format!("{a}{b}"))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut out = a.borrow().clone();
            out.extend(b.borrow().iter().cloned());
            Ok(Value::list(out))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if as_int(n).is_some() =>
        {
            let n = as_int(n).unwrap_or(0).max(0) as usize;
            let items = items.borrow();
            let total = items.len().checked_mul(n).ok_or_else(overflow)?;
            if total as i64 > MAX_RANGE_LEN {
                return Err(RuntimeError::new("list repetition too large"));
            }
            let mut out = Vec::with_capacity(total);
            for _ in 0..n {
                out.extend(items.iter().cloned());
            }
            Ok(Value::list(out))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if as_int(n).is_some() => {
            let n = as_int(n).unwrap_or(0).max(0) as usize;
            if s.len().saturating_mul(n) as i64 > MAX_RANGE_LEN {
                return Err(RuntimeError::new("string repetition too large"));
            }
            Ok(Value::str(&s.repeat(n)))
        }
        _ => Err(RuntimeError::new(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn int_binary(op: BinOp, a: i64, b: i64) -> RtResult<Value> {
    let v = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(zero_division());
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => int_floor_div(a, b)?,
        BinOp::Mod => int_mod(a, b)?,
        BinOp::Pow => {
            if b < 0 {
                return float_binary(op, a as f64, b as f64).map(Value::Float);
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
    };
    Ok(Value::Int(v))
}

fn float_binary(op: BinOp, a: f64, b: f64) -> RtResult<f64> {
    Ok(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero_division());
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division());
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero_division());
            }
            float_mod(a, b)
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(zero_division());
            }
            a.powf(b)
        }
    })
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> RtResult<bool> {
    match op {
        CmpOp::Eq => return Ok(l.py_eq(r)),
        CmpOp::NotEq => return Ok(!l.py_eq(r)),
        _ => {}
    }
    let ord = match (l, r) {
        (a, b) if as_int(a).is_some() && as_int(b).is_some() => Some(as_int(a).cmp(&as_int(b))),
        (a, b) if a.is_number() && b.is_number() => a.as_f64().partial_cmp(&b.as_f64()),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => {
            return Err(RuntimeError::new(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                match op {
                    CmpOp::Lt => "<",
                    CmpOp::LtE => "<=",
                    CmpOp::Gt => ">",
                    _ => ">=",
                },
                l.type_name(),
                r.type_name()
            )))
        }
    };
    // NaN compares false under every ordering operator.
    let Some(ord) = ord else { return Ok(false) };
    Ok(match op {
        CmpOp::Lt => ord.is_lt(),
        CmpOp::LtE => ord.is_le(),
        CmpOp::Gt => ord.is_gt(),
        _ => ord.is_ge(),
    })
}

// -------------------------------------------------------------------------
// builtins
// -------------------------------------------------------------------------

fn exact_args<const N: usize>(name: &str, args: Vec<Value>) -> RtResult<[Value; N]> {
    let given = args.len();
    args.try_into().map_err(|_| {
        RuntimeError::new(format!(
            "{name}() takes exactly {N} argument{} ({given} given)",
            if N == 1 { "" } else { "s" }
        ))
    })
}

fn number_arg(name: &str, v: &Value) -> RtResult<f64> {
    v.as_f64().ok_or_else(|| {
        RuntimeError::new(format!(
            "{name}() argument must be a number, not '{}'",
            v.type_name()
        ))
    })
}

fn int_arg(name: &str, v: &Value) -> RtResult<i64> {
    as_int(v).ok_or_else(|| {
        RuntimeError::new(format!(
            "{name}() argument must be an integer, not '{}'",
            v.type_name()
        ))
    })
}

fn float_to_int(name: &str, x: f64) -> RtResult<i64> {
    if x.is_nan() {
        return Err(RuntimeError::new(format!("{name}(): cannot convert float NaN to integer")));
    }
    if x.is_infinite() || x >= 9.223_372_036_854_776e18 || x < -9.223_372_036_854_776e18 {
        return Err(RuntimeError::new(format!("{name}(): float out of integer range")));
    }
    Ok(x as i64)
}

fn call_builtin(b: Builtin, args: Vec<Value>) -> RtResult<Value> {
    let name = b.name();
    match b {
        Builtin::Len => {
            let [v] = exact_args::<1>(name, args)?;
            let n = match &v {
                Value::Str(s) => s.chars().count(),
                Value::List(l) => l.borrow().len(),
                Value::Dict(d) => d.borrow().len(),
                other => {
                    return Err(RuntimeError::new(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(n as i64))
        }
        Builtin::Range => {
            let (start, stop, step) = match args.as_slice() {
                [stop] => (0, int_arg(name, stop)?, 1),
                [start, stop] => (int_arg(name, start)?, int_arg(name, stop)?, 1),
                [start, stop, step] => (int_arg(name, start)?, int_arg(name, stop)?, int_arg(name, step)?),
                _ => return Err(RuntimeError::new("range() expects 1 to 3 arguments")),
            };
            if step == 0 {
                return Err(RuntimeError::new("range() arg 3 must not be zero"));
            }
            let span = i128::from(stop) - i128::from(start);
            let count = if (step > 0 && span > 0) || (step < 0 && span < 0) {
                let step = i128::from(step);
                (span + step - step.signum()) / step
            } else {
                0
            };
            if count > i128::from(MAX_RANGE_LEN) {
                return Err(RuntimeError::new("range() too large"));
            }
            let out = (0..count as i64).map(|k| Value::Int(start + k * step)).collect();
            Ok(Value::list(out))
        }
        Builtin::Min | Builtin::Max => {
            let items = match args.len() {
                0 => return Err(RuntimeError::new(format!("{name}() expected at least 1 argument"))),
                1 => iterate(&args[0])?,
                _ => args,
            };
            let mut iter = items.into_iter();
            let mut best = iter
                .next()
                .ok_or_else(|| RuntimeError::new(format!("{name}() arg is an empty sequence")))?;
            let better = if b == Builtin::Min { CmpOp::Lt } else { CmpOp::Gt };
            for item in iter {
                if compare(better, &item, &best)? {
                    best = item;
                }
            }
            Ok(best)
        }
        Builtin::Abs => {
            let [v] = exact_args::<1>(name, args)?;
            match v {
                Value::Float(x) => Ok(Value::Float(x.abs())),
                other => {
                    let i = int_arg(name, &other)?;
                    i.checked_abs().map(Value::Int).ok_or_else(overflow)
                }
            }
        }
        Builtin::Sum => {
            let (items, start) = match args.len() {
                1 => (iterate(&args[0])?, Value::Int(0)),
                2 => (iterate(&args[0])?, args[1].clone()),
                _ => return Err(RuntimeError::new("sum() expects 1 or 2 arguments")),
            };
            items.iter().try_fold(start, |acc, x| binary(BinOp::Add, &acc, x))
        }
        Builtin::Float => {
            let [v] = exact_args::<1>(name, args)?;
            match &v {
                Value::Str(s) => parse_float(s).map(Value::Float),
                other => number_arg(name, other).map(Value::Float),
            }
        }
        Builtin::Int => {
            let [v] = exact_args::<1>(name, args)?;
            match &v {
                Value::Float(x) => float_to_int(name, x.trunc()).map(Value::Int),
                Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    RuntimeError::new(format!("invalid literal for int(): '{s}'"))
                }),
                other => int_arg(name, other).map(Value::Int),
            }
        }
        Builtin::Bool => {
            let [v] = exact_args::<1>(name, args)?;
            Ok(Value::Bool(v.truthy()))
        }
        Builtin::Str => {
            let [v] = exact_args::<1>(name, args)?;
            Ok(Value::str(&v.to_string()))
        }
        Builtin::Round => match args.as_slice() {
            [Value::Float(x)] => float_to_int(name, x.round_ties_even()).map(Value::Int),
            [v] => int_arg(name, v).map(Value::Int),
            [v, digits] => {
                let x = number_arg(name, v)?;
                let d = int_arg(name, digits)?.clamp(-308, 308) as i32;
                let scale = 10f64.powi(d);
                let scaled = x * scale;
                if !scaled.is_finite() {
                    return Ok(Value::Float(x));
                }
                Ok(Value::Float(scaled.round_ties_even() / scale))
            }
            _ => Err(RuntimeError::new("round() expects 1 or 2 arguments")),
        },
        Builtin::IsNan | Builtin::MathIsNan => {
            let [v] = exact_args::<1>(name, args)?;
            Ok(Value::Bool(number_arg(name, &v)?.is_nan()))
        }
        Builtin::MathIsInf => {
            let [v] = exact_args::<1>(name, args)?;
            Ok(Value::Bool(number_arg(name, &v)?.is_infinite()))
        }
        Builtin::MathSqrt => {
            let [v] = exact_args::<1>(name, args)?;
            let x = number_arg(name, &v)?;
            if x < 0.0 {
                return Err(RuntimeError::new("math domain error"));
            }
            Ok(Value::Float(x.sqrt()))
        }
        Builtin::MathLog => {
            let (x, base) = match args.as_slice() {
                [x] => (number_arg(name, x)?, None),
                [x, base] => (number_arg(name, x)?, Some(number_arg(name, base)?)),
                _ => return Err(RuntimeError::new("log() expects 1 or 2 arguments")),
            };
            if x <= 0.0 || base.is_some_and(|b| b <= 0.0 || b == 1.0) {
                return Err(RuntimeError::new("math domain error"));
            }
            Ok(Value::Float(match base {
                Some(b) => x.ln() / b.ln(),
                None => x.ln(),
            }))
        }
        Builtin::MathExp => {
            let [v] = exact_args::<1>(name, args)?;
            let x = number_arg(name, &v)?;
            let y = x.exp();
            if y.is_infinite() && x.is_finite() {
                return Err(RuntimeError::new("math range error"));
            }
            Ok(Value::Float(y))
        }
        Builtin::MathPow => {
            let [a, e] = exact_args::<2>(name, args)?;
            let (a, e) = (number_arg(name, &a)?, number_arg(name, &e)?);
            if a == 0.0 && e < 0.0 {
                return Err(RuntimeError::new("math domain error"));
            }
            Ok(Value::Float(a.powf(e)))
        }
        Builtin::MathFloor | Builtin::MathCeil => {
            let [v] = exact_args::<1>(name, args)?;
            match v {
                Value::Float(x) => {
                    let r = if b == Builtin::MathFloor { x.floor() } else { x.ceil() };
                    float_to_int(name, r).map(Value::Int)
                }
                other => int_arg(name, &other).map(Value::Int),
            }
        }
        Builtin::MathFabs => {
            let [v] = exact_args::<1>(name, args)?;
            Ok(Value::Float(number_arg(name, &v)?.abs()))
        }
    }
}

fn parse_float(s: &str) -> RtResult<f64> {
    let t = s.trim();
    let lower = t.to_ascii_lowercase();
    let unsigned = lower.trim_start_matches(['+', '-']);
    let negative = lower.starts_with('-');
    let special = match unsigned {
        "nan" => Some(f64::NAN),
        "inf" | "infinity" => Some(f64::INFINITY),
        _ => None,
    };
    if let Some(x) = special {
        if lower.len() - unsigned.len() <= 1 {
            return Ok(if negative { -x } else { x });
        }
    }
    t.parse::<f64>()
        .ok()
        .filter(|x| x.is_finite())
        .ok_or_else(|| RuntimeError::new(format!("could not convert string to float: '{s}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_src(body: &str) -> Result<Value, ScriptError> {
        run_entrypoint(body, "main", vec![])
    }

    fn int(body: &str) -> i64 {
        match eval_src(body).unwrap() {
            Value::Int(i) => i,
            other => panic!("expected int, got {other:?}"),
        }
    }

    fn float(body: &str) -> f64 {
        match eval_src(body).unwrap() {
            Value::Float(x) => x,
            other => panic!("expected float, got {other:?}"),
        }
    }

    fn runtime_message(body: &str) -> String {
        match eval_src(body).unwrap_err() {
            ScriptError::Runtime(e) => e.message,
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn python_style_integer_division_and_modulo() {
        assert_eq!(int("def main():\n    return -7 // 2\n"), -4);
        assert_eq!(int("def main():\n    return -7 % 3\n"), 2);
        assert_eq!(int("def main():\n    return 7 % -3\n"), -2);
        assert_eq!(float("def main():\n    return 7 / 2\n"), 3.5);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(runtime_message("def main():\n    return 1 / 0\n"), "division by zero");
        assert_eq!(runtime_message("def main():\n    return 1.0 % 0.0\n"), "division by zero");
    }

    #[test]
    fn integer_overflow_is_an_error() {
        assert_eq!(runtime_message("def main():\n    return 2 ** 64\n"), "integer overflow");
    }

    #[test]
    fn loops_and_accumulation() {
        let src = "\
def main():
    total = 0
    for i in range(10):
        if i % 2 == 0:
            continue
        if i > 7:
            break
        total += i
    return total
";
        assert_eq!(int(src), 1 + 3 + 5 + 7);
    }

    #[test]
    fn while_loop_and_list_append() {
        let src = "\
def main():
    xs = []
    i = 0
    while i < 4:
        xs.append(i * i)
        i += 1
    return sum(xs)
";
        assert_eq!(int(src), 14);
    }

    #[test]
    fn recursion_is_bounded() {
        let src = "def f(n):\n    return f(n + 1)\n\ndef main():\n    return f(0)\n";
        assert_eq!(runtime_message(src), "maximum recursion depth exceeded");
    }

    #[test]
    fn closures_and_nonlocal() {
        let src = "\
def main():
    count = 0
    def bump():
        nonlocal count
        count += 1
    bump()
    bump()
    return count
";
        assert_eq!(int(src), 2);
    }

    #[test]
    fn global_declaration_writes_module_scope() {
        let src = "\
counter = 0

def bump():
    global counter
    counter = counter + 5

def main():
    bump()
    return counter
";
        assert_eq!(int(src), 5);
    }

    #[test]
    fn math_module_and_from_import() {
        assert_eq!(float("import math\ndef main():\n    return math.sqrt(16)\n"), 4.0);
        assert_eq!(float("from math import fabs as f\ndef main():\n    return f(-2)\n"), 2.0);
        assert!(float("import math\ndef main():\n    return math.nan\n").is_nan());
    }

    #[test]
    fn unknown_modules_are_unavailable() {
        assert_eq!(
            runtime_message("import os\ndef main():\n    return 1\n"),
            "module 'os' is not available"
        );
    }

    #[test]
    fn round_ties_to_even_and_float_strings() {
        assert_eq!(int("def main():\n    return round(2.5)\n"), 2);
        assert_eq!(int("def main():\n    return round(3.5)\n"), 4);
        assert!(float("def main():\n    return float('nan')\n").is_nan());
        assert_eq!(float("def main():\n    return float('-inf')\n"), f64::NEG_INFINITY);
    }

    #[test]
    fn str_of_values() {
        let v = eval_src("def main():\n    return str(1.0) + str(None) + str([1, 'a'])\n").unwrap();
        assert_eq!(v.to_string(), "1.0None[1, 'a']");
    }

    #[test]
    fn records_are_read_only() {
        let mut fields = BTreeMap::new();
        fields.insert("close".to_string(), Value::float_list(&[1.0, 2.0]));
        let src = "def compute(bars):\n    bars.close = []\n    return 0\n";
        let err = run_entrypoint(src, "compute", vec![Value::record(fields)]).unwrap_err();
        let ScriptError::Runtime(e) = err else { panic!("expected runtime error") };
        assert_eq!(e.message, "cannot set attribute 'close' on record object");
        assert_eq!(e.span, Some(Span::new(2, 5)));
    }

    #[test]
    fn errors_carry_innermost_span() {
        let src = "def main():\n    x = 1\n    return x + undefined_name\n";
        let ScriptError::Runtime(e) = eval_src(src).unwrap_err() else {
            panic!("expected runtime error");
        };
        assert_eq!(e.message, "name 'undefined_name' is not defined");
        assert_eq!(e.span, Some(Span::new(3, 16)));
    }

    #[test]
    fn min_max_and_comparisons_with_nan() {
        assert_eq!(int("def main():\n    return max(3, 9, 4)\n"), 9);
        assert_eq!(int("def main():\n    return min([3, 9, 4])\n"), 3);
        let v = eval_src("import math\ndef main():\n    return math.nan < 1\n").unwrap();
        assert!(matches!(v, Value::Bool(false)));
    }

    #[test]
    fn missing_entrypoint() {
        assert_eq!(
            runtime_message("x = 1\n"),
            "entrypoint 'main' is not defined"
        );
    }
}
