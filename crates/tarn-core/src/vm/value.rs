use crate::compiler::chunk::FunctionConstant;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// One runtime scope frame: a fixed-size, index-addressed array of values.
/// Frames are shared by reference between the active chain and any closures
/// that captured them.
pub type ScopeFrame = Rc<RefCell<Vec<Value>>>;

pub fn new_frame(size: usize) -> ScopeFrame {
    Rc::new(RefCell::new(vec![Value::Null; size]))
}

/// A closure value: entry address and arity of its body plus the scope chain
/// as it existed when the closure was materialized. The chain spine is a
/// private copy; the frames in it are shared, which is what keeps a closure
/// correctly scoped after its defining frame is gone.
pub struct Closure {
    pub name: String,
    pub arity: usize,
    pub entry: usize,
    pub scopes: Vec<ScopeFrame>,
}

#[derive(Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    Str(Rc<str>),
    /// Bare function descriptor; only lives on the stack between a Constant
    /// load and the Closure instruction that consumes it.
    Function(Rc<FunctionConstant>),
    Closure(Rc<Closure>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Number(_) => "Number",
            Value::Str(_) => "String",
            Value::Function(_) => "Function",
            Value::Closure(_) => "Closure",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => {
                if n.fract() == 0.0 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::Function(func) => write!(f, "<fn {}>", func.name),
            Value::Closure(closure) => write!(f, "<fn {}>", closure.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_numbers_display_without_fraction() {
        assert_eq!(Value::Number(5.0).to_string(), "5");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
    }

    #[test]
    fn test_cross_kind_equality_is_false() {
        assert_ne!(Value::Number(1.0), Value::Str(Rc::from("1")));
        assert_ne!(Value::Boolean(true), Value::Number(1.0));
        assert_ne!(Value::Null, Value::Boolean(false));
    }

    #[test]
    fn test_string_equality_is_structural() {
        assert_eq!(Value::Str(Rc::from("ab")), Value::Str(Rc::from("ab")));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Null.type_name(), "Null");
        assert_eq!(Value::Number(0.0).type_name(), "Number");
        assert_eq!(Value::Str(Rc::from("")).type_name(), "String");
    }
}
