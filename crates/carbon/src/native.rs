//! The native-class registry: host types exposed to scripts.
//!
//! A registry maps class-name -> { parent-name, bind data }. Bind data kinds
//! mirror what a host can attach to a class: methods, static functions,
//! properties, static vars, constants, enums and enum values. The registry
//! is built once through [`ClassBuilder`] closures, then frozen behind an
//! `Rc` before any VM starts; lookups walk the parent chain.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, ErrorKind, Result};
use crate::object::EnumRef;
use crate::value::Var;
use crate::vm::Vm;

pub type MethodFn = Box<dyn Fn(&Vm, &Var, &mut [Var]) -> Result<Var>>;
pub type StaticFn = Box<dyn Fn(&Vm, &mut [Var]) -> Result<Var>>;
pub type CtorFn = Box<dyn Fn(&Vm, &mut [Var]) -> Result<Var>>;
pub type GetterFn = Box<dyn Fn(&Var) -> Result<Var>>;
pub type SetterFn = Box<dyn Fn(&Var, Var) -> Result<()>>;

/// Arity info recorded with every callable bind.
///
/// `argc` counts declared parameters (`None` means variadic); the trailing
/// `defaults` are applied when the caller passes fewer arguments. The
/// analyzer uses this for compile-time argument-count checks.
pub struct ArgSpec {
    pub argc: Option<u32>,
    pub defaults: Vec<Var>,
    /// Expected type names per parameter, for strict callees. `None` skips
    /// the compile-time type check.
    pub param_types: Option<Vec<&'static str>>,
}

impl ArgSpec {
    pub fn exact(argc: u32) -> Self {
        Self {
            argc: Some(argc),
            defaults: Vec::new(),
            param_types: None,
        }
    }

    pub fn with_defaults(argc: u32, defaults: Vec<Var>) -> Self {
        Self {
            argc: Some(argc),
            defaults,
            param_types: None,
        }
    }

    pub fn varargs() -> Self {
        Self {
            argc: None,
            defaults: Vec::new(),
            param_types: None,
        }
    }

    pub fn typed(argc: u32, param_types: Vec<&'static str>) -> Self {
        Self {
            argc: Some(argc),
            defaults: Vec::new(),
            param_types: Some(param_types),
        }
    }

    /// Validate a call-site argument count against this spec.
    pub fn check_argc(&self, name: &str, given: usize) -> Result<()> {
        if let Some(argc) = self.argc {
            let required = argc as usize - self.defaults.len();
            if given < required || given > argc as usize {
                return Err(Error::new(
                    ErrorKind::InvalidArgCount,
                    format!(
                        "\"{}\" expects {} argument(s) ({} with defaults), got {}.",
                        name, required, argc, given
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Extend `args` with trailing default values.
    pub fn apply_defaults(&self, args: &mut Vec<Var>) {
        if let Some(argc) = self.argc {
            let argc = argc as usize;
            while args.len() < argc {
                let from_end = argc - args.len();
                let idx = self.defaults.len().saturating_sub(from_end);
                args.push(self.defaults.get(idx).cloned().unwrap_or(Var::Null));
            }
        }
    }
}

/// One entry bound onto a native class.
pub enum BindData {
    Method { spec: ArgSpec, func: MethodFn },
    StaticFunc { spec: ArgSpec, func: StaticFn },
    MemberVar { getter: GetterFn, setter: Option<SetterFn> },
    StaticVar(Rc<RefCell<Var>>),
    StaticConst(Var),
    Enum(Rc<EnumRef>),
    EnumValue(i64),
}

impl BindData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            BindData::Method { .. } => "method",
            BindData::StaticFunc { .. } => "static function",
            BindData::MemberVar { .. } => "property",
            BindData::StaticVar(_) => "static var",
            BindData::StaticConst(_) => "constant",
            BindData::Enum(_) => "enum",
            BindData::EnumValue(_) => "enum value",
        }
    }
}

struct Constructor {
    spec: ArgSpec,
    func: CtorFn,
}

/// A registered native class.
pub struct NativeClass {
    pub name: String,
    pub parent: Option<String>,
    ctor: Option<Constructor>,
    binds: HashMap<String, BindData>,
}

/// Builder handed to the registration closure.
pub struct ClassBuilder {
    class: NativeClass,
}

impl ClassBuilder {
    pub fn inherit(&mut self, parent: &str) {
        self.class.parent = Some(parent.to_string());
    }

    pub fn ctor<F>(&mut self, spec: ArgSpec, f: F)
    where
        F: Fn(&Vm, &mut [Var]) -> Result<Var> + 'static,
    {
        self.class.ctor = Some(Constructor {
            spec,
            func: Box::new(f),
        });
    }

    pub fn method<F>(&mut self, name: &str, spec: ArgSpec, f: F)
    where
        F: Fn(&Vm, &Var, &mut [Var]) -> Result<Var> + 'static,
    {
        self.class
            .binds
            .insert(name.to_string(), BindData::Method { spec, func: Box::new(f) });
    }

    pub fn static_func<F>(&mut self, name: &str, spec: ArgSpec, f: F)
    where
        F: Fn(&Vm, &mut [Var]) -> Result<Var> + 'static,
    {
        self.class.binds.insert(
            name.to_string(),
            BindData::StaticFunc { spec, func: Box::new(f) },
        );
    }

    pub fn member_var<G>(&mut self, name: &str, getter: G, setter: Option<SetterFn>)
    where
        G: Fn(&Var) -> Result<Var> + 'static,
    {
        self.class.binds.insert(
            name.to_string(),
            BindData::MemberVar {
                getter: Box::new(getter),
                setter,
            },
        );
    }

    pub fn static_var(&mut self, name: &str, value: Var) {
        self.class
            .binds
            .insert(name.to_string(), BindData::StaticVar(Rc::new(RefCell::new(value))));
    }

    pub fn constant(&mut self, name: &str, value: Var) {
        self.class
            .binds
            .insert(name.to_string(), BindData::StaticConst(value));
    }

    pub fn enumeration(&mut self, name: &str, values: Vec<(&str, i64)>) {
        let values: Vec<(String, i64)> = values
            .into_iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect();
        // each value is also reachable bare, like the original's enum binds
        for (n, v) in &values {
            self.class.binds.insert(n.clone(), BindData::EnumValue(*v));
        }
        self.class
            .binds
            .insert(name.to_string(), BindData::Enum(Rc::new(EnumRef::new(name, values))));
    }
}

/// The process-level native-class table. Build it, freeze it in an `Rc`,
/// hand it to every VM; never mutate it afterwards.
#[derive(Default)]
pub struct NativeClasses {
    classes: HashMap<String, NativeClass>,
}

impl NativeClasses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class; the closure fills in its bind data.
    pub fn class<F>(&mut self, name: &str, f: F)
    where
        F: FnOnce(&mut ClassBuilder),
    {
        let mut builder = ClassBuilder {
            class: NativeClass {
                name: name.to_string(),
                parent: None,
                ctor: None,
                binds: HashMap::new(),
            },
        };
        f(&mut builder);
        self.classes.insert(name.to_string(), builder.class);
    }

    pub fn set_inheritance(&mut self, child: &str, parent: &str) -> Result<()> {
        let class = self.classes.get_mut(child).ok_or_else(|| {
            Error::new(ErrorKind::NameError, format!("native class \"{}\" is not registered.", child))
        })?;
        class.parent = Some(parent.to_string());
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn get_class(&self, name: &str) -> Option<&NativeClass> {
        self.classes.get(name)
    }

    pub fn get_parent(&self, name: &str) -> Option<&str> {
        self.classes.get(name)?.parent.as_deref()
    }

    /// Look up bind data, walking the parent chain.
    pub fn find_bind_data(&self, class: &str, attrib: &str) -> Option<&BindData> {
        let mut current = Some(class);
        while let Some(name) = current {
            let entry = self.classes.get(name)?;
            if let Some(bind) = entry.binds.get(attrib) {
                return Some(bind);
            }
            current = entry.parent.as_deref();
        }
        None
    }

    pub fn get_bind_data(&self, class: &str, attrib: &str) -> Result<&BindData> {
        self.find_bind_data(class, attrib).ok_or_else(|| {
            Error::new(
                ErrorKind::AttributeError,
                format!("native class \"{}\" has no attribute \"{}\".", class, attrib),
            )
        })
    }

    /// Arity of the class's constructor, for compile-time checks.
    pub fn ctor_spec(&self, class: &str) -> Option<&ArgSpec> {
        self.classes.get(class)?.ctor.as_ref().map(|c| &c.spec)
    }

    /// Construct an instance of a registered class.
    pub fn construct(&self, vm: &Vm, class: &str, args: &mut [Var]) -> Result<Var> {
        let entry = self.classes.get(class).ok_or_else(|| {
            Error::new(ErrorKind::NameError, format!("native class \"{}\" is not registered.", class))
        })?;
        let ctor = entry.ctor.as_ref().ok_or_else(|| {
            Error::new(
                ErrorKind::NotImplemented,
                format!("native class \"{}\" has no constructor.", class),
            )
        })?;
        ctor.spec.check_argc(class, args.len())?;
        let mut padded = args.to_vec();
        ctor.spec.apply_defaults(&mut padded);
        (ctor.func)(vm, &mut padded)
    }

    /// Dispatch a method call on a native instance through the registry.
    pub fn call_method_on(
        &self,
        vm: &Vm,
        this: &Var,
        class: &str,
        name: &str,
        args: &mut [Var],
    ) -> Result<Var> {
        match self.get_bind_data(class, name)? {
            BindData::Method { spec, func } => {
                spec.check_argc(name, args.len())?;
                let mut padded = args.to_vec();
                spec.apply_defaults(&mut padded);
                func(vm, this, &mut padded)
            }
            BindData::StaticFunc { spec, func } => {
                // calling a static through an instance is acceptable
                spec.check_argc(name, args.len())?;
                let mut padded = args.to_vec();
                spec.apply_defaults(&mut padded);
                func(vm, &mut padded)
            }
            other => Err(Error::new(
                ErrorKind::TypeError,
                format!("\"{}\" on {} is a {}, not callable.", name, class, other.kind_name()),
            )),
        }
    }

    /// Dispatch a static call on the class itself.
    pub fn call_static(&self, vm: &Vm, class: &str, name: &str, args: &mut [Var]) -> Result<Var> {
        match self.get_bind_data(class, name)? {
            BindData::StaticFunc { spec, func } => {
                spec.check_argc(name, args.len())?;
                let mut padded = args.to_vec();
                spec.apply_defaults(&mut padded);
                func(vm, &mut padded)
            }
            BindData::Method { .. } => Err(Error::new(
                ErrorKind::TypeError,
                format!("cannot call method \"{}\" on class {} without an instance.", name, class),
            )),
            other => Err(Error::new(
                ErrorKind::TypeError,
                format!("\"{}\" on {} is a {}, not callable.", name, class, other.kind_name()),
            )),
        }
    }

    /// Read value-like bind data (`ClassName.member`).
    pub fn get_static_member(&self, class: &str, name: &str) -> Result<Var> {
        match self.get_bind_data(class, name)? {
            BindData::StaticVar(holder) => Ok(holder.borrow().clone()),
            BindData::StaticConst(value) => Ok(value.clone()),
            BindData::EnumValue(value) => Ok(Var::Int(*value)),
            BindData::Enum(e) => Ok(Var::Object(e.clone() as Rc<dyn crate::object::Object>)),
            other => Err(Error::new(
                ErrorKind::AttributeError,
                format!("\"{}\" on {} is a {}, not a value.", name, class, other.kind_name()),
            )),
        }
    }

    /// Write a static var (`ClassName.member = v`).
    pub fn set_static_member(&self, class: &str, name: &str, value: Var) -> Result<()> {
        match self.get_bind_data(class, name)? {
            BindData::StaticVar(holder) => {
                *holder.borrow_mut() = value;
                Ok(())
            }
            other => Err(Error::new(
                ErrorKind::AttributeError,
                format!("cannot assign to {} \"{}\" on {}.", other.kind_name(), name, class),
            )),
        }
    }

    /// Read an instance property through its getter.
    pub fn get_property(&self, this: &Var, class: &str, name: &str) -> Result<Var> {
        match self.get_bind_data(class, name)? {
            BindData::MemberVar { getter, .. } => getter(this),
            other => self.get_static_member(class, name).map_err(|_| {
                Error::new(
                    ErrorKind::AttributeError,
                    format!("\"{}\" on {} is a {}, not a property.", name, class, other.kind_name()),
                )
            }),
        }
    }

    pub fn set_property(&self, this: &Var, class: &str, name: &str, value: Var) -> Result<()> {
        match self.get_bind_data(class, name)? {
            BindData::MemberVar { setter, .. } => match setter {
                Some(set) => set(this, value),
                None => Err(Error::new(
                    ErrorKind::AttributeError,
                    format!("property \"{}\" on {} is read only.", name, class),
                )),
            },
            _ => self.set_static_member(class, name, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_data_walks_parent_chain() {
        let mut reg = NativeClasses::new();
        reg.class("Base", |c| {
            c.constant("KIND", Var::from("base"));
        });
        reg.class("Derived", |c| {
            c.inherit("Base");
        });
        assert!(reg.find_bind_data("Derived", "KIND").is_some());
        assert!(reg.find_bind_data("Derived", "missing").is_none());
        assert_eq!(reg.get_parent("Derived"), Some("Base"));
    }

    #[test]
    fn static_members_read_and_write() {
        let mut reg = NativeClasses::new();
        reg.class("Counter", |c| {
            c.static_var("count", Var::Int(0));
        });
        reg.set_static_member("Counter", "count", Var::Int(5)).unwrap();
        assert_eq!(reg.get_static_member("Counter", "count").unwrap(), Var::Int(5));
    }

    #[test]
    fn enum_values_are_reachable() {
        let mut reg = NativeClasses::new();
        reg.class("File", |c| {
            c.enumeration("Mode", vec![("READ", 0), ("WRITE", 1)]);
        });
        assert_eq!(reg.get_static_member("File", "WRITE").unwrap(), Var::Int(1));
        let mode = reg.get_static_member("File", "Mode").unwrap();
        assert_eq!(mode.get_member("READ").unwrap(), Var::Int(0));
    }

    #[test]
    fn argspec_defaults_pad_trailing_parameters() {
        let spec = ArgSpec::with_defaults(3, vec![Var::Int(2), Var::Int(3)]);
        spec.check_argc("f", 1).unwrap();
        assert!(spec.check_argc("f", 0).is_err());
        assert!(spec.check_argc("f", 4).is_err());
        let mut args = vec![Var::Int(1)];
        spec.apply_defaults(&mut args);
        assert_eq!(args, vec![Var::Int(1), Var::Int(2), Var::Int(3)]);
        let mut args = vec![Var::Int(1), Var::Int(10)];
        spec.apply_defaults(&mut args);
        assert_eq!(args, vec![Var::Int(1), Var::Int(10), Var::Int(3)]);
    }
}
