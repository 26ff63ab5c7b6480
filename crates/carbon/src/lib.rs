//! Carbon - a small dynamically-typed, class-based scripting language.
//!
//! This crate is the whole pipeline: a hand-written tokenizer and
//! recursive-descent parser produce an AST, the analyzer resolves
//! identifiers and folds constants, the code generator lowers the reduced
//! AST to a flat opcode stream, and a stack-based VM interprets it with
//! support for classes, inheritance and host-registered native classes.
//!
//! # Quick start
//!
//! ```
//! use carbon::Carbon;
//!
//! let mut carbon = Carbon::new();
//! let console = carbon.capture_console();
//! carbon.run_source("demo.cb", "var x = 1 + 2 * 3; print(x);", vec![]).unwrap();
//! assert_eq!(console.output_text(), "7\n");
//! ```
//!
//! # Language surface
//!
//! A module may contain `var`, `const`, `enum`, `func`, `class` and
//! `import name = "path";` declarations, plus stray statements that run at
//! module load. Classes inherit from one script or native parent; class
//! members may be `static`. Control flow: `if`/`else`, `while`, `for`,
//! `foreach`, `switch`, `break`, `continue`, `return`.
//!
//! # Hosting
//!
//! Hosts expose native classes through [`NativeClasses`]: build the
//! registry once, register classes with methods / properties / constants /
//! enums, then hand it to [`Carbon::with_natives`]. The registry is frozen
//! from that point on.

mod analyzer;
mod ast;
mod builtins;
mod bytecode;
mod codegen;
mod diagnostic;
mod error;
mod native;
mod object;
mod parser;
mod tokenizer;
mod value;
mod vm;

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

pub use builtins::{BuiltinFunc, BuiltinType};
pub use bytecode::{AddrKind, Address, Bytecode, CarbonFunction, Op, VarOp};
pub use diagnostic::{Pos, SourceInfo};
pub use error::{Error, ErrorKind, Result, TraceFrame, Warning};
pub use native::{ArgSpec, BindData, ClassBuilder, NativeClasses};
pub use object::{EnumRef, Object};
pub use value::{Array, Map, Var};
pub use vm::{CaptureConsole, Console, Limits, RuntimeInstance, StdConsole, Vm};

/// Callback resolving an import path to source text.
pub type ModuleLoader = Rc<dyn Fn(&str) -> Result<String>>;

/// The top-level runtime handle: owns the frozen native-class registry, the
/// flat module table and the VM.
///
/// Compile each source file once with [`Carbon::compile`] (imports are
/// resolved against already-compiled modules, or loaded through the module
/// loader), then [`Carbon::run`] initializes every module in dependency
/// order and invokes the entry module's `main`.
pub struct Carbon {
    registry: Rc<NativeClasses>,
    vm: Vm,
    modules: HashMap<String, Rc<Bytecode>>,
    /// Compile order; dependencies come first.
    order: Vec<String>,
    initialized: HashSet<String>,
    compiling: HashSet<String>,
    loader: Option<ModuleLoader>,
    warnings: Vec<Warning>,
}

impl Carbon {
    /// A runtime with no native classes registered.
    pub fn new() -> Self {
        Self::with_natives(NativeClasses::new())
    }

    /// A runtime with the given (now frozen) native-class registry.
    pub fn with_natives(registry: NativeClasses) -> Self {
        let registry = Rc::new(registry);
        Self {
            vm: Vm::new(registry.clone()),
            registry,
            modules: HashMap::new(),
            order: Vec::new(),
            initialized: HashSet::new(),
            compiling: HashSet::new(),
            loader: None,
            warnings: Vec::new(),
        }
    }

    /// Install a loader used to fetch sources of imported paths that have
    /// not been compiled yet.
    pub fn set_module_loader(&mut self, loader: ModuleLoader) {
        self.loader = Some(loader);
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.vm.set_limits(limits);
    }

    pub fn set_console(&self, console: Box<dyn Console>) {
        self.vm.set_console(console);
    }

    /// Swap in a capturing console and return a handle to it. Handy for
    /// tests and embedding.
    pub fn capture_console(&self) -> CaptureConsole {
        let console = CaptureConsole::new();
        self.vm.set_console(Box::new(console.clone()));
        console
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Warnings accumulated by every `compile` so far; draining them is the
    /// driver's job.
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Compile one source file into the module table.
    ///
    /// Imports resolve through the flat table by exact path; missing paths
    /// go through the module loader (recursively), so dependency modules
    /// end up compiled before their importers.
    pub fn compile(&mut self, path: &str, source: &str) -> Result<Rc<Bytecode>> {
        if let Some(module) = self.modules.get(path) {
            return Ok(module.clone());
        }
        if !self.compiling.insert(path.to_string()) {
            return Err(Error::new(
                ErrorKind::TypeError,
                format!("cyclic import of module \"{}\".", path),
            ));
        }
        let result = self.compile_inner(path, source);
        self.compiling.remove(path);
        result
    }

    fn compile_inner(&mut self, path: &str, source: &str) -> Result<Rc<Bytecode>> {
        let mut ast = parser::parse(source, path)?;

        // pull in imports first
        let import_paths: Vec<String> = ast.imports.iter().map(|i| i.path.clone()).collect();
        for import_path in import_paths {
            if self.modules.contains_key(&import_path) {
                continue;
            }
            let loader = self.loader.clone().ok_or_else(|| {
                Error::new(
                    ErrorKind::IoError,
                    format!(
                        "imported module \"{}\" is not compiled and no module loader is set.",
                        import_path
                    ),
                )
            })?;
            let import_source = loader(&import_path)?;
            self.compile(&import_path, &import_source)?;
        }

        let warnings = analyzer::analyze(&mut ast, &self.registry, &self.modules)?;
        self.warnings.extend(warnings);

        let module = codegen::generate(&ast, &self.registry)?;
        self.modules.insert(path.to_string(), module.clone());
        self.order.push(path.to_string());
        Ok(module)
    }

    /// Initialize every compiled module in dependency order (once), then
    /// run the entry module's `main` with the given script arguments.
    pub fn run(&mut self, path: &str, args: Vec<String>) -> Result<Var> {
        let module = self
            .modules
            .get(path)
            .cloned()
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::NameError,
                    format!("module \"{}\" has not been compiled.", path),
                )
            })?;

        for p in self.order.clone() {
            if self.initialized.insert(p.clone()) {
                let m = self.modules[&p].clone();
                self.vm.run_init(&m)?;
            }
        }
        self.vm.run_main(&module, args)
    }

    /// Compile and run in one step.
    pub fn run_source(&mut self, path: &str, source: &str, args: Vec<String>) -> Result<Var> {
        self.compile(path, source)?;
        self.run(path, args)
    }
}

impl Default for Carbon {
    fn default() -> Self {
        Self::new()
    }
}
