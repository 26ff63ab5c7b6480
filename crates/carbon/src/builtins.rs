//! Builtin functions and builtin type constructors.
//!
//! Builtins are addressed by enum value in the bytecode (`CallBuiltin` /
//! `ConstructBuiltin`), never by name lookup at runtime. The compile-time
//! pseudo-functions (`__assert`, `__func`, `__line`, `__file`) share the
//! enum but are evaluated away by the analyzer; reaching one at runtime is
//! a compiler bug.

use crate::error::{Error, ErrorKind, Result};
use crate::value::{compare_values, Array, Map, Var};
use crate::vm::Vm;

// ---------------------------------------------------------------------------
// Builtin functions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFunc {
    Print,
    Input,
    Min,
    Max,
    Pow,
    // compile-time pseudo-functions
    Assert,
    FuncName,
    Line,
    File,
}

impl BuiltinFunc {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinFunc::Print => "print",
            BuiltinFunc::Input => "input",
            BuiltinFunc::Min => "min",
            BuiltinFunc::Max => "max",
            BuiltinFunc::Pow => "pow",
            BuiltinFunc::Assert => "__assert",
            BuiltinFunc::FuncName => "__func",
            BuiltinFunc::Line => "__line",
            BuiltinFunc::File => "__file",
        }
    }

    pub fn from_name(name: &str) -> Option<BuiltinFunc> {
        Some(match name {
            "print" => BuiltinFunc::Print,
            "input" => BuiltinFunc::Input,
            "min" => BuiltinFunc::Min,
            "max" => BuiltinFunc::Max,
            "pow" => BuiltinFunc::Pow,
            "__assert" => BuiltinFunc::Assert,
            "__func" => BuiltinFunc::FuncName,
            "__line" => BuiltinFunc::Line,
            "__file" => BuiltinFunc::File,
            _ => return None,
        })
    }

    pub fn is_compiletime(&self) -> bool {
        matches!(
            self,
            BuiltinFunc::Assert | BuiltinFunc::FuncName | BuiltinFunc::Line | BuiltinFunc::File
        )
    }

    /// Pure fixed-behavior numerics the analyzer may fold when every
    /// argument is a compile-time constant.
    pub fn is_foldable(&self) -> bool {
        matches!(self, BuiltinFunc::Min | BuiltinFunc::Max | BuiltinFunc::Pow)
    }

    /// Stable index used by the VM's builtin-function ref cache.
    pub fn index(&self) -> u8 {
        *self as u8
    }

    pub fn from_index(index: u8) -> Option<BuiltinFunc> {
        [
            BuiltinFunc::Print,
            BuiltinFunc::Input,
            BuiltinFunc::Min,
            BuiltinFunc::Max,
            BuiltinFunc::Pow,
            BuiltinFunc::Assert,
            BuiltinFunc::FuncName,
            BuiltinFunc::Line,
            BuiltinFunc::File,
        ]
        .get(index as usize)
        .copied()
    }
}

fn expect_at_least(func: &str, args: &[Var], n: usize) -> Result<()> {
    if args.len() < n {
        return Err(Error::new(
            ErrorKind::InvalidArgCount,
            format!("{}() expects at least {} argument(s), got {}.", func, n, args.len()),
        ));
    }
    Ok(())
}

fn expect_exactly(func: &str, args: &[Var], n: usize) -> Result<()> {
    if args.len() != n {
        return Err(Error::new(
            ErrorKind::InvalidArgCount,
            format!("{}() expects exactly {} argument(s), got {}.", func, n, args.len()),
        ));
    }
    Ok(())
}

fn expect_numeric(func: &str, arg: &Var, index: usize) -> Result<f64> {
    arg.as_float().ok_or_else(|| {
        Error::new(
            ErrorKind::TypeError,
            format!("{}() expects a numeric value at argument {}.", func, index),
        )
    })
}

/// Execute a runtime builtin with already-evaluated arguments.
pub fn call_builtin(vm: &Vm, func: BuiltinFunc, args: &mut [Var]) -> Result<Var> {
    match func {
        BuiltinFunc::Print => {
            let line: Vec<String> = args.iter().map(Var::to_display_string).collect();
            vm.print_line(&line.join(" "));
            Ok(Var::Null)
        }
        BuiltinFunc::Input => {
            expect_exactly("input", args, 0)?;
            vm.input_line().map(Var::String)
        }
        BuiltinFunc::Min | BuiltinFunc::Max | BuiltinFunc::Pow => call_pure(func, args),
        _ => Err(Error::new(
            ErrorKind::Bug,
            format!("compile-time function {}() reached the VM.", func.name()),
        )),
    }
}

/// The side-effect-free builtins; also used by the analyzer when folding
/// calls whose arguments are compile-time constants.
pub fn call_pure(func: BuiltinFunc, args: &[Var]) -> Result<Var> {
    match func {
        BuiltinFunc::Min => {
            expect_at_least("min", args, 2)?;
            let mut best = args[0].clone();
            for arg in args[1..].iter() {
                if compare_values(arg, &best, "<")? == std::cmp::Ordering::Less {
                    best = arg.clone();
                }
            }
            Ok(best)
        }
        BuiltinFunc::Max => {
            expect_at_least("max", args, 2)?;
            let mut best = args[0].clone();
            for arg in args[1..].iter() {
                if compare_values(arg, &best, ">")? == std::cmp::Ordering::Greater {
                    best = arg.clone();
                }
            }
            Ok(best)
        }
        BuiltinFunc::Pow => {
            expect_exactly("pow", args, 2)?;
            let base = expect_numeric("pow", &args[0], 0)?;
            let exp = expect_numeric("pow", &args[1], 1)?;
            Ok(Var::Float(base.powf(exp)))
        }
        _ => Err(Error::new(
            ErrorKind::Bug,
            format!("{}() is not a pure builtin.", func.name()),
        )),
    }
}

/// Compile-time argument-count validation used by the analyzer.
pub fn check_builtin_argc(func: BuiltinFunc, given: usize) -> Result<()> {
    match func {
        BuiltinFunc::Print => Ok(()),
        BuiltinFunc::Input => exactly(func, given, 0),
        BuiltinFunc::Min => at_least(func, given, 2),
        BuiltinFunc::Max => at_least(func, given, 2),
        BuiltinFunc::Pow => exactly(func, given, 2),
        BuiltinFunc::Assert => exactly(func, given, 1),
        BuiltinFunc::FuncName | BuiltinFunc::Line | BuiltinFunc::File => exactly(func, given, 0),
    }
}

fn at_least(func: BuiltinFunc, given: usize, n: usize) -> Result<()> {
    if given < n {
        return Err(Error::new(
            ErrorKind::InvalidArgCount,
            format!("{}() expects at least {} argument(s), got {}.", func.name(), n, given),
        ));
    }
    Ok(())
}

fn exactly(func: BuiltinFunc, given: usize, n: usize) -> Result<()> {
    if given != n {
        return Err(Error::new(
            ErrorKind::InvalidArgCount,
            format!("{}() expects exactly {} argument(s), got {}.", func.name(), n, given),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Builtin types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinType {
    Bool,
    Int,
    Float,
    String,
    Array,
    Map,
}

impl BuiltinType {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinType::Bool => "bool",
            BuiltinType::Int => "int",
            BuiltinType::Float => "float",
            BuiltinType::String => "String",
            BuiltinType::Array => "Array",
            BuiltinType::Map => "Map",
        }
    }

    pub fn from_name(name: &str) -> Option<BuiltinType> {
        Some(match name {
            "bool" => BuiltinType::Bool,
            "int" => BuiltinType::Int,
            "float" => BuiltinType::Float,
            "String" => BuiltinType::String,
            "Array" => BuiltinType::Array,
            "Map" => BuiltinType::Map,
            _ => return None,
        })
    }

    pub fn index(&self) -> u8 {
        *self as u8
    }

    pub fn from_index(index: u8) -> Option<BuiltinType> {
        [
            BuiltinType::Bool,
            BuiltinType::Int,
            BuiltinType::Float,
            BuiltinType::String,
            BuiltinType::Array,
            BuiltinType::Map,
        ]
        .get(index as usize)
        .copied()
    }
}

/// Construct a value of a builtin type (`int("42")`, `Array(1, 2)`, ...).
pub fn construct_builtin(ty: BuiltinType, args: &mut [Var]) -> Result<Var> {
    match ty {
        BuiltinType::Bool => match args {
            [] => Ok(Var::Bool(false)),
            [v] => Ok(Var::Bool(v.is_truthy())),
            _ => Err(ctor_argc("bool", args.len(), 1)),
        },
        BuiltinType::Int => match args {
            [] => Ok(Var::Int(0)),
            [Var::Int(i)] => Ok(Var::Int(*i)),
            [Var::Float(f)] => Ok(Var::Int(*f as i64)),
            [Var::Bool(b)] => Ok(Var::Int(*b as i64)),
            [Var::String(s)] => s.trim().parse::<i64>().map(Var::Int).map_err(|_| {
                Error::new(ErrorKind::TypeError, format!("cannot parse \"{}\" as int.", s))
            }),
            [v] => Err(ctor_type("int", v)),
            _ => Err(ctor_argc("int", args.len(), 1)),
        },
        BuiltinType::Float => match args {
            [] => Ok(Var::Float(0.0)),
            [Var::Int(i)] => Ok(Var::Float(*i as f64)),
            [Var::Float(f)] => Ok(Var::Float(*f)),
            [Var::Bool(b)] => Ok(Var::Float(*b as i64 as f64)),
            [Var::String(s)] => s.trim().parse::<f64>().map(Var::Float).map_err(|_| {
                Error::new(ErrorKind::TypeError, format!("cannot parse \"{}\" as float.", s))
            }),
            [v] => Err(ctor_type("float", v)),
            _ => Err(ctor_argc("float", args.len(), 1)),
        },
        BuiltinType::String => match args {
            [] => Ok(Var::String(String::new())),
            [v] => Ok(Var::String(v.to_display_string())),
            _ => Err(ctor_argc("String", args.len(), 1)),
        },
        BuiltinType::Array => Ok(Var::Array(Array::from_vec(args.to_vec()))),
        BuiltinType::Map => match args {
            [] => Ok(Var::Map(Map::new())),
            _ => Err(ctor_argc("Map", args.len(), 0)),
        },
    }
}

fn ctor_argc(ty: &str, got: usize, max: usize) -> Error {
    Error::new(
        ErrorKind::InvalidArgCount,
        format!("{}() constructor expects at most {} argument(s), got {}.", ty, max, got),
    )
}

fn ctor_type(ty: &str, got: &Var) -> Error {
    Error::new(
        ErrorKind::TypeError,
        format!("cannot construct {} from {}.", ty, got.type_name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtin_lookup_by_name() {
        assert_eq!(BuiltinFunc::from_name("print"), Some(BuiltinFunc::Print));
        assert_eq!(BuiltinFunc::from_name("__assert"), Some(BuiltinFunc::Assert));
        assert_eq!(BuiltinFunc::from_name("nope"), None);
        assert!(BuiltinFunc::Assert.is_compiletime());
        assert!(!BuiltinFunc::Print.is_compiletime());
    }

    #[test]
    fn type_constructors() {
        assert_eq!(
            construct_builtin(BuiltinType::Int, &mut [Var::from("42")]).unwrap(),
            Var::Int(42)
        );
        assert_eq!(
            construct_builtin(BuiltinType::Int, &mut [Var::Float(3.7)]).unwrap(),
            Var::Int(3)
        );
        assert_eq!(
            construct_builtin(BuiltinType::String, &mut [Var::Int(7)]).unwrap(),
            Var::from("7")
        );
        assert_eq!(
            construct_builtin(BuiltinType::Bool, &mut [Var::Int(0)]).unwrap(),
            Var::Bool(false)
        );
        let arr = construct_builtin(BuiltinType::Array, &mut [Var::Int(1), Var::Int(2)]).unwrap();
        if let Var::Array(a) = arr {
            assert_eq!(a.len(), 2);
        } else {
            panic!("expected array");
        }
    }

    #[test]
    fn int_parse_failure_is_type_error() {
        let err = construct_builtin(BuiltinType::Int, &mut [Var::from("abc")]).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::TypeError);
    }
}
