//! Runtime values.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::FunctionDef;

/// Lexical scope. Function scopes chain to the scope the `def` ran in; the
/// module scope has no parent.
#[derive(Debug, Default)]
pub(crate) struct Scope {
    pub(crate) vars: RefCell<BTreeMap<String, Value>>,
    pub(crate) parent: Option<Rc<Scope>>,
}

impl Scope {
    pub(crate) fn child(parent: Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(BTreeMap::new()),
            parent: Some(parent),
        })
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub(crate) fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    pub(crate) fn has(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }
}

/// A user-defined function together with the scope it closes over.
pub struct Function {
    pub(crate) def: Rc<FunctionDef>,
    pub(crate) closure: Rc<Scope>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn arity(&self) -> usize {
        self.def.params.len()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.def.name)
    }
}

#[derive(Debug)]
pub struct ModuleValue {
    pub name: String,
    pub members: BTreeMap<String, Value>,
}

/// Natively implemented callables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Len,
    Range,
    Min,
    Max,
    Abs,
    Sum,
    Float,
    Int,
    Bool,
    Str,
    Round,
    IsNan,
    MathSqrt,
    MathLog,
    MathExp,
    MathPow,
    MathFloor,
    MathCeil,
    MathFabs,
    MathIsNan,
    MathIsInf,
}

impl Builtin {
    /// Builtins visible without an import.
    pub fn global(name: &str) -> Option<Builtin> {
        Some(match name {
            "len" => Builtin::Len,
            "range" => Builtin::Range,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "abs" => Builtin::Abs,
            "sum" => Builtin::Sum,
            "float" => Builtin::Float,
            "int" => Builtin::Int,
            "bool" => Builtin::Bool,
            "str" => Builtin::Str,
            "round" => Builtin::Round,
            "isnan" => Builtin::IsNan,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Abs => "abs",
            Builtin::Sum => "sum",
            Builtin::Float => "float",
            Builtin::Int => "int",
            Builtin::Bool => "bool",
            Builtin::Str => "str",
            Builtin::Round => "round",
            Builtin::IsNan => "isnan",
            Builtin::MathSqrt => "sqrt",
            Builtin::MathLog => "log",
            Builtin::MathExp => "exp",
            Builtin::MathPow => "pow",
            Builtin::MathFloor => "floor",
            Builtin::MathCeil => "ceil",
            Builtin::MathFabs => "fabs",
            Builtin::MathIsNan => "isnan",
            Builtin::MathIsInf => "isinf",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<BTreeMap<String, Value>>>),
    /// Read-only attribute bag (the `bars` argument).
    Record(Rc<BTreeMap<String, Value>>),
    Function(Rc<Function>),
    Builtin(Builtin),
    Module(Rc<ModuleValue>),
    /// `some_list.append` bound to its receiver.
    ListAppend(Rc<RefCell<Vec<Value>>>),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(items: BTreeMap<String, Value>) -> Value {
        Value::Dict(Rc::new(RefCell::new(items)))
    }

    pub fn record(fields: BTreeMap<String, Value>) -> Value {
        Value::Record(Rc::new(fields))
    }

    pub fn float_list(xs: &[f64]) -> Value {
        Value::list(xs.iter().map(|x| Value::Float(*x)).collect())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Record(_) => "record",
            Value::Function(_) => "function",
            Value::Builtin(_) | Value::ListAppend(_) => "builtin_function_or_method",
            Value::Module(_) => "module",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            _ => true,
        }
    }

    /// Numeric view; bools count as integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_))
    }

    /// Structural equality with numeric cross-type comparison. NaN is never
    /// equal to anything.
    pub fn py_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => a.as_f64() == b.as_f64(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.py_eq(y))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.py_eq(vb))
            }
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            (Value::Record(a), Value::Record(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => other.to_string(),
        }
    }
}

/// Float formatting in the style scripts expect: `1.0`, `nan`, `-inf`.
pub(crate) fn format_float(x: f64) -> String {
    if x.is_nan() {
        "nan".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                let parts: Vec<String> = items.borrow().iter().map(Value::repr).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Dict(items) => {
                let parts: Vec<String> = items
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("'{k}': {}", v.repr()))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Record(_) => f.write_str("<record>"),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Builtin(b) => write!(f, "<built-in function {}>", b.name()),
            Value::Module(m) => write!(f, "<module '{}'>", m.name),
            Value::ListAppend(_) => f.write_str("<built-in method append>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_formatting() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(-0.5), "-0.5");
        assert_eq!(format_float(f64::NAN), "nan");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn numeric_equality_crosses_int_and_float() {
        assert!(Value::Int(2).py_eq(&Value::Float(2.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::Float(f64::NAN).py_eq(&Value::Float(f64::NAN)));
        assert!(!Value::None.py_eq(&Value::Int(0)));
    }

    #[test]
    fn display_nested_containers() {
        let v = Value::list(vec![Value::Int(1), Value::str("a"), Value::Float(2.0)]);
        assert_eq!(v.to_string(), "[1, 'a', 2.0]");
        let mut m = BTreeMap::new();
        m.insert("k".to_string(), Value::None);
        assert_eq!(Value::dict(m).to_string(), "{'k': None}");
    }
}
