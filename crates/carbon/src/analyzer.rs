//! Semantic analysis: identifier resolution, inheritance checking, constant
//! folding and compile-time validation.
//!
//! The analyzer walks the parsed [`FileNode`] in ordered passes:
//!
//! 1. inheritance resolution (with cycle detection and member-shadow checks)
//! 2. constant resolution
//! 3. enum resolution
//! 4. compile-time function evaluation (`__assert` & friends, during reduce)
//! 5. variable initializers
//! 6. parameter defaults
//! 7. function bodies and the module initializer
//!
//! Reduction replaces every compile-time computable subtree with a single
//! constant node. Cycles in const/enum/inheritance definitions are caught
//! with the per-node reducing flag.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::*;
use crate::builtins::{self, BuiltinFunc, BuiltinType};
use crate::bytecode::Bytecode;
use crate::diagnostic::{Pos, SourceInfo};
use crate::error::{Error, ErrorKind, Result, Warning};
use crate::native::{BindData, NativeClasses};
use crate::value::{self, Var};

/// Where a constant lives, for on-demand resolution.
#[derive(Debug, Clone, Copy)]
enum ConstLoc {
    File(usize),
    Class(usize, usize),
}

/// Which enum a value belongs to; `named_index: None` is the unnamed enum.
#[derive(Debug, Clone, Copy, PartialEq)]
struct EnumSlot {
    class: Option<usize>,
    named_index: Option<usize>,
}

/// A local declaration visible in the current block chain.
enum LocalDecl {
    Var(String),
    Const(String, Var),
}

/// Context of the expression currently being reduced.
#[derive(Default)]
struct Ctx {
    class: Option<usize>,
    func_name: Option<String>,
    params: Vec<String>,
    is_static: bool,
    in_ctor: bool,
    loop_depth: u32,
    /// `break` is also legal inside a switch; `continue` is not.
    switch_depth: u32,
    /// Scope chain of local declarations, innermost last.
    locals: Vec<Vec<LocalDecl>>,
    /// True while reducing the first statement of a constructor body.
    at_ctor_entry: bool,
}

impl Ctx {
    fn module_init() -> Ctx {
        Ctx::default()
    }

    fn lookup_local(&self, name: &str) -> Option<&LocalDecl> {
        for scope in self.locals.iter().rev() {
            for decl in scope.iter().rev() {
                match decl {
                    LocalDecl::Var(n) if n == name => return Some(decl),
                    LocalDecl::Const(n, _) if n == name => return Some(decl),
                    _ => {}
                }
            }
        }
        None
    }

    fn param_index(&self, name: &str) -> Option<u32> {
        self.params.iter().position(|p| p == name).map(|i| i as u32)
    }
}

/// What an identifier resolved to.
enum Resolution {
    /// Replace the identifier with this compile-time value.
    Const(Var),
    /// Keep the identifier, tagged with its reference kind.
    Ref(IdentRef),
}

pub struct Analyzer<'a> {
    registry: &'a NativeClasses,
    /// Flat module table keyed by import path.
    modules: &'a HashMap<String, Rc<Bytecode>>,
    path: String,
    source: String,
    warnings: Vec<Warning>,
}

/// Analyze a parsed file in place; returns accumulated warnings.
pub fn analyze(
    file: &mut FileNode,
    registry: &NativeClasses,
    modules: &HashMap<String, Rc<Bytecode>>,
) -> Result<Vec<Warning>> {
    let mut analyzer = Analyzer {
        registry,
        modules,
        path: file.path.clone(),
        source: file.source.clone(),
        warnings: Vec::new(),
    };
    analyzer.run(file)?;
    Ok(std::mem::take(&mut analyzer.warnings))
}

impl<'a> Analyzer<'a> {
    fn err(&self, kind: ErrorKind, message: impl Into<String>, pos: Pos) -> Error {
        Error::new(kind, message).with_source_info(SourceInfo::new(
            &self.path,
            &self.source,
            pos,
            1,
        ))
    }

    fn warn(&mut self, kind: ErrorKind, message: impl Into<String>, pos: Pos) {
        self.warnings.push(
            Warning::new(kind, message).with_source_info(SourceInfo::new(
                &self.path,
                &self.source,
                pos,
                1,
            )),
        );
    }

    fn run(&mut self, file: &mut FileNode) -> Result<()> {
        self.resolve_imports(file)?;

        // pass 1: inheritance
        for i in 0..file.classes.len() {
            self.resolve_inheritance(file, i)?;
        }
        for i in 0..file.classes.len() {
            self.check_member_shadowing(file, i)?;
        }

        // pass 2: constants
        for i in 0..file.constants.len() {
            self.resolve_constant(file, ConstLoc::File(i))?;
        }
        for c in 0..file.classes.len() {
            for i in 0..file.classes[c].constants.len() {
                self.resolve_constant(file, ConstLoc::Class(c, i))?;
            }
        }

        // pass 3: enums
        let mut slots: Vec<EnumSlot> = Vec::new();
        if file.unnamed_enum.is_some() {
            slots.push(EnumSlot { class: None, named_index: None });
        }
        for i in 0..file.enums.len() {
            slots.push(EnumSlot { class: None, named_index: Some(i) });
        }
        for c in 0..file.classes.len() {
            if file.classes[c].unnamed_enum.is_some() {
                slots.push(EnumSlot { class: Some(c), named_index: None });
            }
            for i in 0..file.classes[c].enums.len() {
                slots.push(EnumSlot { class: Some(c), named_index: Some(i) });
            }
        }
        for slot in slots {
            let count = enum_of(file, slot).values.len();
            for v in 0..count {
                self.resolve_enum_value(file, slot, v)?;
            }
        }

        // pass 5: variable initializers (pass 4, compile-time calls, happens
        // inside reduction wherever such a call appears)
        for i in 0..file.vars.len() {
            let mut ctx = Ctx::module_init();
            if let Some(mut expr) = file.vars[i].assignment.take() {
                self.reduce_expr(file, &mut ctx, &mut expr)?;
                file.vars[i].assignment = Some(expr);
            }
        }
        for c in 0..file.classes.len() {
            for i in 0..file.classes[c].vars.len() {
                let is_static = file.classes[c].vars[i].is_static;
                let mut ctx = Ctx {
                    class: Some(c),
                    is_static,
                    ..Ctx::default()
                };
                if let Some(mut expr) = file.classes[c].vars[i].assignment.take() {
                    self.reduce_expr(file, &mut ctx, &mut expr)?;
                    file.classes[c].vars[i].assignment = Some(expr);
                }
            }
        }

        // pass 6: parameter defaults
        for i in 0..file.functions.len() {
            self.resolve_parameters(file, None, i)?;
        }
        for c in 0..file.classes.len() {
            for i in 0..file.classes[c].functions.len() {
                self.resolve_parameters(file, Some(c), i)?;
            }
        }

        // pass 7: function bodies
        for i in 0..file.functions.len() {
            self.reduce_function_body(file, None, i)?;
        }
        for c in 0..file.classes.len() {
            for i in 0..file.classes[c].functions.len() {
                self.reduce_function_body(file, Some(c), i)?;
            }
        }

        // module initializer statements
        for i in 0..file.init_items.len() {
            if let InitItem::Stmt(stmt) = &mut file.init_items[i] {
                let mut taken = std::mem::replace(stmt, Statement::Break { pos: Pos::UNSET });
                let mut ctx = Ctx::module_init();
                self.reduce_statement(file, &mut ctx, &mut taken)?;
                if let InitItem::Stmt(slot) = &mut file.init_items[i] {
                    *slot = taken;
                }
            }
        }

        // missing super-constructor calls
        for i in 0..file.classes.len() {
            self.check_super_ctor(file, i)?;
        }

        Ok(())
    }

    // -- imports ------------------------------------------------------------

    fn resolve_imports(&mut self, file: &mut FileNode) -> Result<()> {
        for import in &mut file.imports {
            match self.modules.get(&import.path) {
                Some(module) => import.module = Some(module.clone()),
                None => {
                    return Err(self.err(
                        ErrorKind::IoError,
                        format!("imported module \"{}\" was not found.", import.path),
                        import.pos,
                    ));
                }
            }
        }
        Ok(())
    }

    fn import_module(&self, file: &FileNode, name: &str) -> Option<Rc<Bytecode>> {
        file.imports
            .iter()
            .find(|i| i.name == name)
            .and_then(|i| i.module.clone())
    }

    // -- pass 1: inheritance ------------------------------------------------

    fn resolve_inheritance(&mut self, file: &mut FileNode, index: usize) -> Result<()> {
        if file.classes[index].is_reduced {
            return Ok(());
        }
        if file.classes[index].is_reducing {
            return Err(self.err(
                ErrorKind::TypeError,
                format!("cyclic inheritance on class \"{}\".", file.classes[index].name),
                file.classes[index].pos,
            ));
        }
        file.classes[index].is_reducing = true;

        if let Base::Unresolved { name, pos } = file.classes[index].base.clone() {
            if let Some(base_index) = file.find_class(&name) {
                if base_index == index {
                    return Err(self.err(
                        ErrorKind::TypeError,
                        format!("class \"{}\" cannot inherit itself.", name),
                        pos,
                    ));
                }
                self.resolve_inheritance(file, base_index)?;
                file.classes[index].base = Base::Local(base_index);
            } else if let Some(extern_class) = file
                .imports
                .iter()
                .filter_map(|i| i.module.as_ref())
                .find_map(|m| m.get_class(&name))
            {
                file.classes[index].base = Base::Extern(extern_class);
            } else if self.registry.is_registered(&name) {
                file.classes[index].base = Base::Native(name);
            } else {
                return Err(self.err(
                    ErrorKind::NameError,
                    format!("base class \"{}\" not found.", name),
                    pos,
                ));
            }
        }

        file.classes[index].is_reducing = false;
        file.classes[index].is_reduced = true;
        Ok(())
    }

    /// A non-static member may not shadow a non-static property anywhere on
    /// the ancestor chain.
    fn check_member_shadowing(&mut self, file: &FileNode, index: usize) -> Result<()> {
        let class = &file.classes[index];
        for var in class.vars.iter().filter(|v| !v.is_static) {
            let mut base = class.base.clone();
            loop {
                match base {
                    Base::None | Base::Unresolved { .. } => break,
                    Base::Local(b) => {
                        let ancestor = &file.classes[b];
                        if ancestor
                            .vars
                            .iter()
                            .any(|v| !v.is_static && v.name == var.name)
                        {
                            return Err(self.err(
                                ErrorKind::AttributeError,
                                format!(
                                    "member \"{}\" already exists on base class \"{}\".",
                                    var.name, ancestor.name
                                ),
                                var.pos,
                            ));
                        }
                        base = ancestor.base.clone();
                    }
                    Base::Extern(module) => {
                        if module.has_member(&var.name) {
                            return Err(self.err(
                                ErrorKind::AttributeError,
                                format!(
                                    "member \"{}\" already exists on base class \"{}\".",
                                    var.name, module.name
                                ),
                                var.pos,
                            ));
                        }
                        break;
                    }
                    Base::Native(name) => {
                        if let Some(BindData::MemberVar { .. }) =
                            self.registry.find_bind_data(&name, &var.name)
                        {
                            return Err(self.err(
                                ErrorKind::AttributeError,
                                format!(
                                    "member \"{}\" already exists on native base \"{}\".",
                                    var.name, name
                                ),
                                var.pos,
                            ));
                        }
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    // -- pass 2: constants ---------------------------------------------------

    fn resolve_constant(&mut self, file: &mut FileNode, loc: ConstLoc) -> Result<Var> {
        let (pos, name) = {
            let node = const_of(file, loc);
            if node.is_reduced {
                return Ok(node.value.clone());
            }
            if node.is_reducing {
                return Err(self.err(
                    ErrorKind::TypeError,
                    format!("cyclic definition of constant \"{}\".", node.name),
                    node.pos,
                ));
            }
            (node.pos, node.name.clone())
        };

        const_of_mut(file, loc).is_reducing = true;
        let mut expr = const_of_mut(file, loc)
            .assignment
            .take()
            .expect("constants always carry an initializer");

        let mut ctx = Ctx {
            class: match loc {
                ConstLoc::Class(c, _) => Some(c),
                ConstLoc::File(_) => None,
            },
            is_static: true,
            ..Ctx::default()
        };
        self.reduce_expr(file, &mut ctx, &mut expr)?;

        let value = match expr.as_const() {
            Some(v) if is_scalar(v) => v.clone(),
            _ => {
                return Err(self.err(
                    ErrorKind::TypeError,
                    format!(
                        "constant \"{}\" must reduce to a compile-time scalar value.",
                        name
                    ),
                    pos,
                ));
            }
        };

        let node = const_of_mut(file, loc);
        node.value = value.clone();
        node.is_reducing = false;
        node.is_reduced = true;
        Ok(value)
    }

    // -- pass 3: enums -------------------------------------------------------

    fn resolve_enum_value(&mut self, file: &mut FileNode, slot: EnumSlot, index: usize) -> Result<i64> {
        {
            let value = &enum_of(file, slot).values[index];
            if value.is_reduced {
                return Ok(value.value);
            }
            if value.is_reducing {
                return Err(self.err(
                    ErrorKind::TypeError,
                    format!("cyclic definition of enum value \"{}\".", value.name),
                    value.pos,
                ));
            }
        }
        enum_of_mut(file, slot).values[index].is_reducing = true;

        let resolved = match enum_of_mut(file, slot).values[index].expr.take() {
            Some(mut expr) => {
                let mut ctx = Ctx {
                    class: slot.class,
                    is_static: true,
                    ..Ctx::default()
                };
                self.reduce_expr(file, &mut ctx, &mut expr)?;
                match expr.as_const() {
                    Some(Var::Int(v)) => *v,
                    _ => {
                        let value = &enum_of(file, slot).values[index];
                        return Err(self.err(
                            ErrorKind::TypeError,
                            format!("enum value \"{}\" must be a constant integer.", value.name),
                            value.pos,
                        ));
                    }
                }
            }
            None => {
                if index == 0 {
                    0
                } else {
                    self.resolve_enum_value(file, slot, index - 1)? + 1
                }
            }
        };

        let value = &mut enum_of_mut(file, slot).values[index];
        value.value = resolved;
        value.is_reducing = false;
        value.is_reduced = true;
        Ok(resolved)
    }

    // -- pass 6: parameter defaults -----------------------------------------

    fn resolve_parameters(&mut self, file: &mut FileNode, class: Option<usize>, index: usize) -> Result<()> {
        let param_count = func_of(file, class, index).params.len();
        let mut defaults = Vec::new();
        for p in 0..param_count {
            let taken = func_of_mut(file, class, index).params[p].default.take();
            if let Some(mut expr) = taken {
                let mut ctx = Ctx {
                    class,
                    is_static: true,
                    ..Ctx::default()
                };
                self.reduce_expr(file, &mut ctx, &mut expr)?;
                let (pos, name) = {
                    let param = &func_of(file, class, index).params[p];
                    (param.pos, param.name.clone())
                };
                match expr.as_const() {
                    Some(v) if is_scalar(v) => defaults.push(v.clone()),
                    _ => {
                        return Err(self.err(
                            ErrorKind::TypeError,
                            format!(
                                "default value of parameter \"{}\" must be a compile-time scalar.",
                                name
                            ),
                            pos,
                        ));
                    }
                }
                func_of_mut(file, class, index).params[p].default = Some(expr);
            }
        }
        func_of_mut(file, class, index).default_values = defaults;
        Ok(())
    }

    // -- pass 7: function bodies --------------------------------------------

    fn reduce_function_body(&mut self, file: &mut FileNode, class: Option<usize>, index: usize) -> Result<()> {
        let (name, is_static, is_constructor, params) = {
            let func = func_of(file, class, index);
            (
                func.name.clone(),
                func.is_static,
                func.is_constructor,
                func.params.iter().map(|p| p.name.clone()).collect::<Vec<_>>(),
            )
        };

        let mut body = std::mem::take(&mut func_of_mut(file, class, index).body);
        let mut ctx = Ctx {
            class,
            func_name: Some(name),
            params,
            is_static,
            in_ctor: is_constructor,
            ..Ctx::default()
        };
        ctx.at_ctor_entry = is_constructor;
        let result = self.reduce_block(file, &mut ctx, &mut body);
        func_of_mut(file, class, index).body = body;
        result
    }

    fn reduce_block(&mut self, file: &mut FileNode, ctx: &mut Ctx, block: &mut BlockNode) -> Result<()> {
        ctx.locals.push(Vec::new());
        let result = self.reduce_block_inner(file, ctx, block);
        ctx.locals.pop();
        result
    }

    fn reduce_block_inner(&mut self, file: &mut FileNode, ctx: &mut Ctx, block: &mut BlockNode) -> Result<()> {
        let mut terminated = false;
        let mut drop_these: Vec<usize> = Vec::new();

        for i in 0..block.statements.len() {
            if terminated {
                self.warn(
                    ErrorKind::UnreachableCode,
                    "statement is unreachable.",
                    block.statements[i].pos(),
                );
                terminated = false; // warn once per block
            }
            if i > 0 {
                // the super-constructor window closes after the first statement
                ctx.at_ctor_entry = false;
            }
            self.reduce_statement(file, ctx, &mut block.statements[i])?;

            if block.statements[i].is_terminator() && i + 1 < block.statements.len() {
                terminated = true;
            }
            if statement_is_dead(&block.statements[i]) {
                drop_these.push(i);
            }
        }

        for &i in drop_these.iter().rev() {
            block.statements.remove(i);
        }
        Ok(())
    }

    fn reduce_statement(&mut self, file: &mut FileNode, ctx: &mut Ctx, stmt: &mut Statement) -> Result<()> {
        if !matches!(stmt, Statement::Expr(_)) {
            ctx.at_ctor_entry = false;
        }
        match stmt {
            Statement::Var(var) => {
                let name = var.name.clone();
                let pos = var.pos;
                if let Some(mut expr) = var.assignment.take() {
                    self.reduce_expr(file, ctx, &mut expr)?;
                    if let Statement::Var(var) = stmt {
                        var.assignment = Some(expr);
                    }
                }
                self.check_shadowing(file, ctx, &name, pos);
                ctx.locals
                    .last_mut()
                    .expect("block scope present")
                    .push(LocalDecl::Var(name));
            }
            Statement::Const(c) => {
                let mut expr = c
                    .assignment
                    .take()
                    .expect("constants always carry an initializer");
                self.reduce_expr(file, ctx, &mut expr)?;
                let value = match expr.as_const() {
                    Some(v) if is_scalar(v) => v.clone(),
                    _ => {
                        return Err(self.err(
                            ErrorKind::TypeError,
                            format!(
                                "constant \"{}\" must reduce to a compile-time scalar value.",
                                c.name
                            ),
                            c.pos,
                        ));
                    }
                };
                c.value = value.clone();
                c.is_reduced = true;
                c.assignment = Some(expr);
                ctx.locals
                    .last_mut()
                    .expect("block scope present")
                    .push(LocalDecl::Const(c.name.clone(), value));
            }
            Statement::Expr(expr) => {
                let was_compile_time = matches!(
                    &expr.kind,
                    ExprKind::Call {
                        is_compile_time: true,
                        ..
                    }
                );
                self.reduce_expr(file, ctx, expr)?;
                if !was_compile_time {
                    let effectful = matches!(&expr.kind, ExprKind::Call { .. })
                        || expr.is_assignment();
                    if !effectful {
                        self.warn(
                            ErrorKind::StandAloneExpression,
                            "expression has no effect.",
                            expr.pos,
                        );
                    }
                }
            }
            Statement::If {
                cond,
                body,
                else_body,
                ..
            } => {
                self.reduce_expr(file, ctx, cond)?;
                self.reduce_block(file, ctx, body)?;
                if let Some(else_body) = else_body {
                    self.reduce_block(file, ctx, else_body)?;
                }
            }
            Statement::Switch { value, cases, pos } => {
                self.reduce_expr(file, ctx, value)?;
                let mut seen: Vec<(i64, Pos)> = Vec::new();
                let mut case_enum: Option<String> = None;
                let mut all_from_one_enum = true;
                for case in cases.iter_mut() {
                    if let Some(case_expr) = &mut case.value {
                        match enum_provenance(case_expr) {
                            Some(enum_name) => match &case_enum {
                                Some(existing) if *existing != enum_name => {
                                    all_from_one_enum = false
                                }
                                Some(_) => {}
                                None => case_enum = Some(enum_name),
                            },
                            None => all_from_one_enum = false,
                        }
                        self.reduce_expr(file, ctx, case_expr)?;
                        let folded = match case_expr.as_const() {
                            Some(Var::Int(v)) => *v,
                            _ => {
                                return Err(self.err(
                                    ErrorKind::TypeError,
                                    "switch case must be a constant integer expression.",
                                    case.pos,
                                ));
                            }
                        };
                        if seen.iter().any(|(v, _)| *v == folded) {
                            return Err(self.err(
                                ErrorKind::AlreadyDefined,
                                format!("duplicate switch case value {}.", folded),
                                case.pos,
                            ));
                        }
                        seen.push((folded, case.pos));
                        case.folded = folded;
                    }
                    ctx.switch_depth += 1;
                    let result = self.reduce_block(file, ctx, &mut case.body);
                    ctx.switch_depth -= 1;
                    result?;
                }

                if all_from_one_enum {
                    if let Some(enum_name) = case_enum {
                        self.warn_missed_enum_values(file, ctx, &enum_name, &seen, *pos);
                    }
                }
            }
            Statement::While { cond, body, pos } => {
                self.reduce_expr(file, ctx, cond)?;
                ctx.loop_depth += 1;
                let result = self.reduce_block(file, ctx, body);
                ctx.loop_depth -= 1;
                result?;
                if matches!(cond.as_const(), Some(v) if v.is_truthy()) && !block_breaks(body) {
                    self.warn(
                        ErrorKind::NonTerminatingLoop,
                        "loop condition is always true and the body never breaks.",
                        *pos,
                    );
                }
            }
            Statement::For {
                init,
                cond,
                step,
                body,
                pos,
            } => {
                ctx.locals.push(Vec::new());
                let result = (|| {
                    if let Some(init) = init {
                        self.reduce_statement(file, ctx, init)?;
                    }
                    if let Some(cond) = cond {
                        self.reduce_expr(file, ctx, cond)?;
                    }
                    if let Some(step) = step {
                        self.reduce_expr(file, ctx, step)?;
                    }
                    ctx.loop_depth += 1;
                    let r = self.reduce_block(file, ctx, body);
                    ctx.loop_depth -= 1;
                    r
                })();
                ctx.locals.pop();
                result?;
                let cond_always_true = match cond {
                    None => true,
                    Some(c) => matches!(c.as_const(), Some(v) if v.is_truthy()),
                };
                if cond_always_true && !block_breaks(body) {
                    self.warn(
                        ErrorKind::NonTerminatingLoop,
                        "loop condition is always true and the body never breaks.",
                        *pos,
                    );
                }
            }
            Statement::Foreach {
                var_name,
                iterable,
                body,
                ..
            } => {
                self.reduce_expr(file, ctx, iterable)?;
                ctx.locals.push(Vec::new());
                ctx.locals
                    .last_mut()
                    .expect("just pushed")
                    .push(LocalDecl::Var(var_name.clone()));
                ctx.loop_depth += 1;
                let result = self.reduce_block(file, ctx, body);
                ctx.loop_depth -= 1;
                ctx.locals.pop();
                result?;
            }
            Statement::Break { pos } => {
                if ctx.loop_depth == 0 && ctx.switch_depth == 0 {
                    return Err(self.err(
                        ErrorKind::SyntaxError,
                        "\"break\" outside of a loop or switch.",
                        *pos,
                    ));
                }
            }
            Statement::Continue { pos } => {
                if ctx.loop_depth == 0 {
                    return Err(self.err(
                        ErrorKind::SyntaxError,
                        "\"continue\" outside of a loop.",
                        *pos,
                    ));
                }
            }
            Statement::Return { value, pos } => {
                if ctx.func_name.is_none() {
                    return Err(self.err(
                        ErrorKind::SyntaxError,
                        "\"return\" outside of a function.",
                        *pos,
                    ));
                }
                if let Some(expr) = value {
                    if ctx.in_ctor {
                        return Err(self.err(
                            ErrorKind::TypeError,
                            "constructor cannot return a value.",
                            *pos,
                        ));
                    }
                    self.reduce_expr(file, ctx, expr)?;
                }
            }
            Statement::Block(block) => self.reduce_block(file, ctx, block)?,
        }
        Ok(())
    }

    fn check_shadowing(&mut self, file: &FileNode, ctx: &Ctx, name: &str, pos: Pos) {
        let shadows = ctx.param_index(name).is_some()
            || ctx.lookup_local(name).is_some()
            || ctx
                .class
                .map(|c| {
                    file.classes[c]
                        .vars
                        .iter()
                        .any(|v| v.name == name)
                })
                .unwrap_or(false);
        if shadows {
            self.warn(
                ErrorKind::VariableShadowing,
                format!("variable \"{}\" shadows an outer declaration.", name),
                pos,
            );
        }
    }

    fn warn_missed_enum_values(
        &mut self,
        file: &FileNode,
        ctx: &Ctx,
        enum_name: &str,
        covered: &[(i64, Pos)],
        pos: Pos,
    ) {
        let slot = self.find_enum(file, ctx, enum_name);
        if let Some(slot) = slot {
            let missing: Vec<String> = enum_of(file, slot)
                .values
                .iter()
                .filter(|v| v.is_reduced && !covered.iter().any(|(c, _)| *c == v.value))
                .map(|v| v.name.clone())
                .collect();
            if !missing.is_empty() {
                self.warn(
                    ErrorKind::MissedEnumInSwitch,
                    format!(
                        "switch over enum \"{}\" misses value(s): {}.",
                        enum_name,
                        missing.join(", ")
                    ),
                    pos,
                );
            }
        }
    }

    fn find_enum(&self, file: &FileNode, ctx: &Ctx, name: &str) -> Option<EnumSlot> {
        if let Some(c) = ctx.class {
            if let Some(i) = file.classes[c].enums.iter().position(|e| e.name.as_deref() == Some(name)) {
                return Some(EnumSlot {
                    class: Some(c),
                    named_index: Some(i),
                });
            }
        }
        file.enums
            .iter()
            .position(|e| e.name.as_deref() == Some(name))
            .map(|i| EnumSlot {
                class: None,
                named_index: Some(i),
            })
    }

    // -- expression reduction ------------------------------------------------

    fn reduce_expr(&mut self, file: &mut FileNode, ctx: &mut Ctx, expr: &mut Expr) -> Result<()> {
        // a super-constructor call is only legal as the whole first
        // statement; any other expression shape closes the window
        if !matches!(expr.kind, ExprKind::Call { .. }) {
            ctx.at_ctor_entry = false;
        }
        match &mut expr.kind {
            ExprKind::Const(_) | ExprKind::This | ExprKind::Super => Ok(()),
            ExprKind::BuiltinType(_) | ExprKind::BuiltinFunc(_) => Ok(()),
            ExprKind::Identifier { .. } => self.reduce_identifier(file, ctx, expr),
            ExprKind::Array(elements) => {
                let mut elements = std::mem::take(elements);
                for element in elements.iter_mut() {
                    self.reduce_expr(file, ctx, element)?;
                }
                expr.kind = ExprKind::Array(elements);
                Ok(())
            }
            ExprKind::Map(pairs) => {
                let mut pairs = std::mem::take(pairs);
                for (key, value) in pairs.iter_mut() {
                    self.reduce_expr(file, ctx, key)?;
                    if let Some(k) = key.as_const() {
                        value::hash_values(k).map_err(|e| self.reframe(e, key.pos))?;
                    }
                    self.reduce_expr(file, ctx, value)?;
                }
                expr.kind = ExprKind::Map(pairs);
                Ok(())
            }
            ExprKind::Operator { .. } => self.reduce_operator(file, ctx, expr),
            ExprKind::Index { .. } => self.reduce_index(file, ctx, expr),
            ExprKind::MappedIndex { base, key } => {
                let mut base = std::mem::take(&mut **base);
                let mut key = std::mem::take(&mut **key);
                self.reduce_expr(file, ctx, &mut base)?;
                self.reduce_expr(file, ctx, &mut key)?;
                if matches!(base.kind, ExprKind::Super) {
                    return Err(self.err(
                        ErrorKind::NotImplemented,
                        "\"super\" cannot be indexed.",
                        base.pos,
                    ));
                }
                expr.kind = ExprKind::MappedIndex {
                    base: Box::new(base),
                    key: Box::new(key),
                };
                Ok(())
            }
            ExprKind::Call { .. } => self.reduce_call(file, ctx, expr),
        }
    }

    fn reframe(&self, error: Error, pos: Pos) -> Error {
        let mut error = error;
        if error.source_info.is_none() {
            error.source_info = Some(SourceInfo::new(&self.path, &self.source, pos, 1));
        }
        error
    }

    fn reduce_identifier(&mut self, file: &mut FileNode, ctx: &mut Ctx, expr: &mut Expr) -> Result<()> {
        let (name, pos) = match &expr.kind {
            ExprKind::Identifier { name, .. } => (name.clone(), expr.pos),
            _ => unreachable!("caller matched an identifier"),
        };
        match self.resolve_name(file, ctx, &name, pos)? {
            Resolution::Const(value) => {
                expr.kind = ExprKind::Const(value);
            }
            Resolution::Ref(resolved) => {
                expr.kind = ExprKind::Identifier { name, resolved };
            }
        }
        Ok(())
    }

    /// Identifier resolution, in the documented order: parameters, block
    /// locals/consts, class members (walking ancestry), module vars, module
    /// consts, module enums, module classes, module functions, imports,
    /// native classes.
    fn resolve_name(
        &mut self,
        file: &mut FileNode,
        ctx: &mut Ctx,
        name: &str,
        pos: Pos,
    ) -> Result<Resolution> {
        if let Some(i) = ctx.param_index(name) {
            return Ok(Resolution::Ref(IdentRef::Parameter(i)));
        }
        if let Some(decl) = ctx.lookup_local(name) {
            return Ok(match decl {
                LocalDecl::Var(_) => Resolution::Ref(IdentRef::LocalVar),
                LocalDecl::Const(_, value) => Resolution::Const(value.clone()),
            });
        }

        // class members, walking the ancestry
        if let Some(class_index) = ctx.class {
            if let Some(res) = self.resolve_in_class(file, ctx, class_index, name, pos)? {
                return Ok(res);
            }
        }

        // module level
        if file.vars.iter().any(|v| v.name == name) {
            return Ok(Resolution::Ref(IdentRef::StaticMember));
        }
        if let Some(i) = file.constants.iter().position(|c| c.name == name) {
            let value = self.resolve_constant(file, ConstLoc::File(i))?;
            return Ok(Resolution::Const(value));
        }
        if let Some(i) = file.enums.iter().position(|e| e.name.as_deref() == Some(name)) {
            return Ok(Resolution::Ref(IdentRef::EnumName {
                class_index: None,
                enum_index: i,
            }));
        }
        if let Some(slot_value) = self.unnamed_enum_value(file, EnumSlot { class: None, named_index: None }, name)? {
            return Ok(Resolution::Const(Var::Int(slot_value)));
        }
        if let Some(i) = file.find_class(name) {
            return Ok(Resolution::Ref(IdentRef::ScriptClass(i)));
        }
        if file.find_function(name).is_some() {
            return Ok(Resolution::Ref(IdentRef::ScriptFunction));
        }
        if file.imports.iter().any(|i| i.name == name) {
            return Ok(Resolution::Ref(IdentRef::ImportedFile(name.to_string())));
        }
        if self.registry.is_registered(name) {
            return Ok(Resolution::Ref(IdentRef::NativeClass(name.to_string())));
        }

        Err(self.err(
            ErrorKind::NameError,
            format!("identifier \"{}\" is not defined.", name),
            pos,
        ))
    }

    fn unnamed_enum_value(&mut self, file: &mut FileNode, slot: EnumSlot, name: &str) -> Result<Option<i64>> {
        let exists = match slot.class {
            None => file.unnamed_enum.as_ref(),
            Some(c) => file.classes[c].unnamed_enum.as_ref(),
        }
        .map(|e| e.values.iter().position(|v| v.name == name));
        match exists {
            Some(Some(index)) => Ok(Some(self.resolve_enum_value(file, slot, index)?)),
            _ => Ok(None),
        }
    }

    /// Resolve `name` against a class and its ancestors.
    fn resolve_in_class(
        &mut self,
        file: &mut FileNode,
        ctx: &Ctx,
        class_index: usize,
        name: &str,
        pos: Pos,
    ) -> Result<Option<Resolution>> {
        let mut current = Some(class_index);
        while let Some(ci) = current {
            // instance and static vars
            if let Some(var) = file.classes[ci].vars.iter().find(|v| v.name == name) {
                if var.is_static {
                    return Ok(Some(Resolution::Ref(IdentRef::StaticMember)));
                }
                if ctx.is_static {
                    return Err(self.err(
                        ErrorKind::TypeError,
                        format!(
                            "cannot access non-static member \"{}\" from a static context.",
                            name
                        ),
                        pos,
                    ));
                }
                return Ok(Some(Resolution::Ref(IdentRef::MemberVar)));
            }
            if let Some(i) = file.classes[ci].constants.iter().position(|c| c.name == name) {
                let value = self.resolve_constant(file, ConstLoc::Class(ci, i))?;
                return Ok(Some(Resolution::Const(value)));
            }
            if let Some(i) = file.classes[ci]
                .enums
                .iter()
                .position(|e| e.name.as_deref() == Some(name))
            {
                return Ok(Some(Resolution::Ref(IdentRef::EnumName {
                    class_index: Some(ci),
                    enum_index: i,
                })));
            }
            if let Some(v) =
                self.unnamed_enum_value(file, EnumSlot { class: Some(ci), named_index: None }, name)?
            {
                return Ok(Some(Resolution::Const(Var::Int(v))));
            }
            if file.classes[ci].functions.iter().any(|f| f.name == name) {
                return Ok(Some(Resolution::Ref(IdentRef::MemberFunction)));
            }

            match file.classes[ci].base.clone() {
                Base::Local(b) => current = Some(b),
                Base::Extern(module) => {
                    return Ok(self.resolve_in_extern(&module, ctx, name, pos)?);
                }
                Base::Native(native) => {
                    return Ok(self.resolve_in_native(&native, name));
                }
                Base::None | Base::Unresolved { .. } => current = None,
            }
        }
        Ok(None)
    }

    fn resolve_in_extern(
        &mut self,
        module: &Rc<Bytecode>,
        ctx: &Ctx,
        name: &str,
        pos: Pos,
    ) -> Result<Option<Resolution>> {
        if module.has_member(name) {
            if ctx.is_static {
                return Err(self.err(
                    ErrorKind::TypeError,
                    format!(
                        "cannot access non-static member \"{}\" from a static context.",
                        name
                    ),
                    pos,
                ));
            }
            return Ok(Some(Resolution::Ref(IdentRef::MemberVar)));
        }
        if let Some(value) = module.get_constant(name) {
            if is_scalar(&value) {
                return Ok(Some(Resolution::Const(value)));
            }
        }
        if module.find_static(name).is_some() {
            return Ok(Some(Resolution::Ref(IdentRef::StaticMember)));
        }
        if module.find_function(name).is_some() {
            return Ok(Some(Resolution::Ref(IdentRef::MemberFunction)));
        }
        Ok(None)
    }

    fn resolve_in_native(&mut self, native: &str, name: &str) -> Option<Resolution> {
        match self.registry.find_bind_data(native, name)? {
            BindData::StaticConst(value) => Some(Resolution::Const(value.clone())),
            BindData::EnumValue(v) => Some(Resolution::Const(Var::Int(*v))),
            BindData::Method { .. } | BindData::StaticFunc { .. } => {
                Some(Resolution::Ref(IdentRef::MemberFunction))
            }
            BindData::StaticVar(_) | BindData::MemberVar { .. } | BindData::Enum(_) => {
                // runtime lookup through the instance / class ref
                Some(Resolution::Ref(IdentRef::MemberVar))
            }
        }
    }

    // -- operators -----------------------------------------------------------

    fn reduce_operator(&mut self, file: &mut FileNode, ctx: &mut Ctx, expr: &mut Expr) -> Result<()> {
        let (op, mut args) = match std::mem::replace(&mut expr.kind, ExprKind::Const(Var::Null)) {
            ExprKind::Operator { op, args } => (op, args),
            _ => unreachable!("caller matched an operator"),
        };
        let pos = expr.pos;

        for arg in args.iter_mut() {
            self.reduce_expr(file, ctx, arg)?;
        }

        if op.is_assignment() {
            self.check_assignable(&args[0])?;
            expr.kind = ExprKind::Operator { op, args };
            return Ok(());
        }

        let all_const = args.iter().all(|a| a.as_const().is_some());
        if all_const {
            let folded = if op.is_unary() {
                eval_unary(op, args[0].as_const().expect("checked const"))
            } else {
                eval_binary(
                    op,
                    args[0].as_const().expect("checked const"),
                    args[1].as_const().expect("checked const"),
                )
            };
            let value = folded.map_err(|e| self.reframe(e, pos))?;
            expr.kind = ExprKind::Const(value);
            return Ok(());
        }

        expr.kind = ExprKind::Operator { op, args };
        Ok(())
    }

    fn check_assignable(&self, target: &Expr) -> Result<()> {
        let ok = match &target.kind {
            ExprKind::Identifier { resolved, .. } => matches!(
                resolved,
                IdentRef::Parameter(_)
                    | IdentRef::LocalVar
                    | IdentRef::MemberVar
                    | IdentRef::StaticMember
            ),
            ExprKind::Index { .. } | ExprKind::MappedIndex { .. } => true,
            _ => false,
        };
        if !ok {
            return Err(self.err(
                ErrorKind::TypeError,
                "invalid assignment target.",
                target.pos,
            ));
        }
        Ok(())
    }

    // -- attribute access ----------------------------------------------------

    fn reduce_index(&mut self, file: &mut FileNode, ctx: &mut Ctx, expr: &mut Expr) -> Result<()> {
        let (base, member, member_pos) =
            match std::mem::replace(&mut expr.kind, ExprKind::Const(Var::Null)) {
                ExprKind::Index {
                    base,
                    member,
                    member_pos,
                } => (*base, member, member_pos),
                _ => unreachable!("caller matched an index"),
            };
        let mut base = base;
        self.reduce_expr(file, ctx, &mut base)?;

        if matches!(base.kind, ExprKind::Super) {
            return Err(self.err(
                ErrorKind::NotImplemented,
                "\"super\" member access is not supported; base members are reachable directly.",
                member_pos,
            ));
        }

        // compile-time attribute folding
        match &base.kind {
            ExprKind::Identifier {
                resolved: IdentRef::EnumName { class_index, enum_index },
                ..
            } => {
                let slot = EnumSlot {
                    class: *class_index,
                    named_index: Some(*enum_index),
                };
                if let Some(i) = enum_of(file, slot).values.iter().position(|v| v.name == member) {
                    let value = self.resolve_enum_value(file, slot, i)?;
                    expr.kind = ExprKind::Const(Var::Int(value));
                    return Ok(());
                }
                let enum_name = enum_of(file, slot).name.clone().unwrap_or_default();
                return Err(self.err(
                    ErrorKind::AttributeError,
                    format!("enum \"{}\" has no value \"{}\".", enum_name, member),
                    member_pos,
                ));
            }
            ExprKind::Identifier {
                resolved: IdentRef::ScriptClass(ci),
                ..
            } => {
                let ci = *ci;
                if let Some(i) = file.classes[ci].constants.iter().position(|c| c.name == member) {
                    let value = self.resolve_constant(file, ConstLoc::Class(ci, i))?;
                    expr.kind = ExprKind::Const(value);
                    return Ok(());
                }
                if let Some(v) = self.unnamed_enum_value(
                    file,
                    EnumSlot { class: Some(ci), named_index: None },
                    &member,
                )? {
                    expr.kind = ExprKind::Const(Var::Int(v));
                    return Ok(());
                }
                // static vars / named enums resolve at runtime on the class object
            }
            ExprKind::Identifier {
                resolved: IdentRef::NativeClass(native),
                ..
            } => {
                if let Some(BindData::StaticConst(value)) = self.registry.find_bind_data(native, &member) {
                    if is_scalar(value) {
                        expr.kind = ExprKind::Const(value.clone());
                        return Ok(());
                    }
                }
                if let Some(BindData::EnumValue(v)) = self.registry.find_bind_data(native, &member) {
                    expr.kind = ExprKind::Const(Var::Int(*v));
                    return Ok(());
                }
            }
            ExprKind::Identifier {
                resolved: IdentRef::ImportedFile(alias),
                ..
            } => {
                if let Some(module) = self.import_module(file, alias) {
                    if let Some(value) = module.get_constant(&member) {
                        if is_scalar(&value) {
                            expr.kind = ExprKind::Const(value);
                            return Ok(());
                        }
                    }
                }
            }
            _ => {}
        }

        expr.kind = ExprKind::Index {
            base: Box::new(base),
            member,
            member_pos,
        };
        Ok(())
    }

    // -- calls ---------------------------------------------------------------

    fn reduce_call(&mut self, file: &mut FileNode, ctx: &mut Ctx, expr: &mut Expr) -> Result<()> {
        let pos = expr.pos;
        let at_ctor_entry = ctx.at_ctor_entry;
        ctx.at_ctor_entry = false;
        let (base, method, mut args, is_compile_time) =
            match std::mem::replace(&mut expr.kind, ExprKind::Const(Var::Null)) {
                ExprKind::Call {
                    base,
                    method,
                    args,
                    is_compile_time,
                } => (base, method, args, is_compile_time),
                _ => unreachable!("caller matched a call"),
            };

        for arg in args.iter_mut() {
            self.reduce_expr(file, ctx, arg)?;
        }

        match (base, method) {
            // print(...) / int(...) / __assert(...)
            (Some(base_expr), None) if matches!(base_expr.kind, ExprKind::BuiltinFunc(_)) => {
                let func = match base_expr.kind {
                    ExprKind::BuiltinFunc(f) => f,
                    _ => unreachable!("just matched"),
                };
                builtins::check_builtin_argc(func, args.len())
                    .map_err(|e| self.reframe(e, pos))?;
                if func.is_compiletime() {
                    let value = self.eval_compiletime(ctx, func, &args, pos)?;
                    expr.kind = ExprKind::Const(value);
                    return Ok(());
                }
                if func.is_foldable() && args.iter().all(|a| a.as_const().is_some()) {
                    let const_args: Vec<Var> =
                        args.iter().map(|a| a.as_const().expect("checked").clone()).collect();
                    let value = builtins::call_pure(func, &const_args)
                        .map_err(|e| self.reframe(e, pos))?;
                    expr.kind = ExprKind::Const(value);
                    return Ok(());
                }
                expr.kind = ExprKind::Call {
                    base: Some(base_expr),
                    method: None,
                    args,
                    is_compile_time,
                };
                Ok(())
            }
            (Some(base_expr), None) if matches!(base_expr.kind, ExprKind::BuiltinType(_)) => {
                let ty = match base_expr.kind {
                    ExprKind::BuiltinType(t) => t,
                    _ => unreachable!("just matched"),
                };
                let scalar_ctor = !matches!(ty, BuiltinType::Array | BuiltinType::Map);
                if scalar_ctor && args.iter().all(|a| a.as_const().is_some()) {
                    let mut const_args: Vec<Var> =
                        args.iter().map(|a| a.as_const().expect("checked").clone()).collect();
                    let value = builtins::construct_builtin(ty, &mut const_args)
                        .map_err(|e| self.reframe(e, pos))?;
                    expr.kind = ExprKind::Const(value);
                    return Ok(());
                }
                expr.kind = ExprKind::Call {
                    base: Some(base_expr),
                    method: None,
                    args,
                    is_compile_time,
                };
                Ok(())
            }
            // this(...): constructor delegation
            (Some(base_expr), None) if matches!(base_expr.kind, ExprKind::This) => {
                if !ctx.in_ctor {
                    return Err(self.err(
                        ErrorKind::SyntaxError,
                        "\"this(...)\" is only valid inside a constructor.",
                        pos,
                    ));
                }
                expr.kind = ExprKind::Call {
                    base: Some(base_expr),
                    method: None,
                    args,
                    is_compile_time,
                };
                Ok(())
            }
            // super(...): the super constructor call
            (Some(base_expr), None) if matches!(base_expr.kind, ExprKind::Super) => {
                if !ctx.in_ctor || !at_ctor_entry {
                    return Err(self.err(
                        ErrorKind::SyntaxError,
                        "the super constructor call must be the first statement of a constructor.",
                        pos,
                    ));
                }
                let class_index = ctx.class.expect("super implies a class context");
                self.check_base_ctor_args(file, class_index, args.len(), pos)?;
                file.classes[class_index].has_super_ctor_call = true;
                expr.kind = ExprKind::Call {
                    base: Some(base_expr),
                    method: None,
                    args,
                    is_compile_time,
                };
                Ok(())
            }
            // super.m(...)
            (Some(base_expr), Some(method_expr)) if matches!(base_expr.kind, ExprKind::Super) => {
                let method_name = ident_name(&method_expr);
                let class_index = ctx.class.expect("super implies a class context");
                self.check_base_method(file, class_index, &method_name, args.len(), method_expr.pos)?;
                expr.kind = ExprKind::Call {
                    base: Some(base_expr),
                    method: Some(method_expr),
                    args,
                    is_compile_time,
                };
                Ok(())
            }
            // foo(...): unresolved callee name
            (None, Some(mut method_expr)) => {
                let name = ident_name(&method_expr);
                let resolution = self.resolve_name(file, ctx, &name, method_expr.pos)?;
                match resolution {
                    Resolution::Const(_) => Err(self.err(
                        ErrorKind::TypeError,
                        format!("\"{}\" is a constant; it cannot be called.", name),
                        method_expr.pos,
                    )),
                    Resolution::Ref(resolved) => {
                        match &resolved {
                            IdentRef::Parameter(_) | IdentRef::LocalVar | IdentRef::StaticMember
                            | IdentRef::MemberVar => {
                                // call through a value
                                set_ident_resolution(&mut method_expr, resolved);
                                expr.kind = ExprKind::Call {
                                    base: Some(method_expr),
                                    method: None,
                                    args,
                                    is_compile_time,
                                };
                                return Ok(());
                            }
                            IdentRef::ScriptClass(ci) => {
                                self.check_ctor_args(file, *ci, args.len(), pos)?;
                            }
                            IdentRef::NativeClass(native) => {
                                self.check_native_ctor_args(native, &args, pos)?;
                            }
                            IdentRef::ScriptFunction => {
                                let func_index =
                                    file.find_function(&name).expect("resolved above");
                                let func = &file.functions[func_index];
                                self.check_argc(
                                    &name,
                                    func.required_argc(),
                                    func.params.len(),
                                    args.len(),
                                    pos,
                                )?;
                            }
                            IdentRef::MemberFunction => {
                                let class_index = ctx.class.expect("member function implies class");
                                self.check_member_call(file, ctx, class_index, &name, args.len(), pos)?;
                            }
                            IdentRef::EnumName { .. } => {
                                return Err(self.err(
                                    ErrorKind::TypeError,
                                    format!("enum \"{}\" is not callable.", name),
                                    method_expr.pos,
                                ));
                            }
                            IdentRef::ImportedFile(_) => {
                                return Err(self.err(
                                    ErrorKind::TypeError,
                                    format!("imported module \"{}\" is not callable.", name),
                                    method_expr.pos,
                                ));
                            }
                            IdentRef::Unknown => unreachable!("resolve_name never returns Unknown"),
                        }
                        set_ident_resolution(&mut method_expr, resolved);
                        expr.kind = ExprKind::Call {
                            base: None,
                            method: Some(method_expr),
                            args,
                            is_compile_time,
                        };
                        Ok(())
                    }
                }
            }
            // expr.m(...): method call
            (Some(base_expr), Some(method_expr)) => {
                let mut base_expr = base_expr;
                self.reduce_expr(file, ctx, &mut base_expr)?;
                let method_name = ident_name(&method_expr);

                // compile-time signature checks where the callee is known
                match &base_expr.kind {
                    ExprKind::Identifier {
                        resolved: IdentRef::ScriptClass(ci),
                        ..
                    } => {
                        let ci = *ci;
                        if let Some(func) =
                            file.classes[ci].functions.iter().find(|f| f.name == method_name)
                        {
                            if !func.is_static {
                                return Err(self.err(
                                    ErrorKind::TypeError,
                                    format!(
                                        "cannot call non-static method \"{}\" without an instance.",
                                        method_name
                                    ),
                                    method_expr.pos,
                                ));
                            }
                            self.check_argc(
                                &method_name,
                                func.required_argc(),
                                func.params.len(),
                                args.len(),
                                pos,
                            )?;
                        }
                    }
                    ExprKind::Identifier {
                        resolved: IdentRef::NativeClass(native),
                        ..
                    } => {
                        if let Some(BindData::StaticFunc { spec, .. }) =
                            self.registry.find_bind_data(native, &method_name)
                        {
                            spec.check_argc(&method_name, args.len())
                                .map_err(|e| self.reframe(e, pos))?;
                            self.check_native_arg_types(spec, &args)?;
                        }
                    }
                    ExprKind::Identifier {
                        resolved: IdentRef::ImportedFile(alias),
                        ..
                    } => {
                        if let Some(module) = self.import_module(file, alias) {
                            if let Some(func) = module.get_function(&method_name) {
                                self.check_argc(
                                    &method_name,
                                    func.required_argc() as usize,
                                    func.arg_count as usize,
                                    args.len(),
                                    pos,
                                )?;
                            }
                        }
                    }
                    _ => {}
                }

                expr.kind = ExprKind::Call {
                    base: Some(base_expr),
                    method: Some(method_expr),
                    args,
                    is_compile_time,
                };
                Ok(())
            }
            // expr(...): call a computed value
            (Some(base_expr), None) => {
                let mut base_expr = base_expr;
                self.reduce_expr(file, ctx, &mut base_expr)?;
                if let Some(value) = base_expr.as_const() {
                    return Err(self.err(
                        ErrorKind::TypeError,
                        format!("{} is not callable.", value.type_name()),
                        base_expr.pos,
                    ));
                }
                expr.kind = ExprKind::Call {
                    base: Some(base_expr),
                    method: None,
                    args,
                    is_compile_time,
                };
                Ok(())
            }
            (None, None) => Err(self.err(ErrorKind::Bug, "call without a callee.", pos)),
        }
    }

    fn eval_compiletime(
        &mut self,
        ctx: &Ctx,
        func: BuiltinFunc,
        args: &[Expr],
        pos: Pos,
    ) -> Result<Var> {
        match func {
            BuiltinFunc::Assert => {
                let value = args[0].as_const().ok_or_else(|| {
                    self.err(
                        ErrorKind::TypeError,
                        "__assert expects a compile-time constant expression.",
                        args[0].pos,
                    )
                })?;
                if !value.is_truthy() {
                    return Err(self.err(ErrorKind::Assertion, "assertion failed.", pos));
                }
                Ok(Var::Null)
            }
            BuiltinFunc::FuncName => Ok(Var::String(
                ctx.func_name.clone().unwrap_or_default(),
            )),
            BuiltinFunc::Line => Ok(Var::Int(pos.line as i64)),
            BuiltinFunc::File => Ok(Var::String(self.path.clone())),
            _ => Err(self.err(ErrorKind::Bug, "not a compile-time function.", pos)),
        }
    }

    // -- call-site checks ----------------------------------------------------

    fn check_argc(
        &self,
        name: &str,
        required: usize,
        total: usize,
        given: usize,
        pos: Pos,
    ) -> Result<()> {
        if given < required || given > total {
            let expected = if required == total {
                format!("{}", total)
            } else {
                format!("{} to {}", required, total)
            };
            return Err(self.err(
                ErrorKind::InvalidArgCount,
                format!(
                    "\"{}\" expects {} argument(s), got {}.",
                    name, expected, given
                ),
                pos,
            ));
        }
        Ok(())
    }

    fn check_ctor_args(&self, file: &FileNode, class_index: usize, given: usize, pos: Pos) -> Result<()> {
        let class = &file.classes[class_index];
        match class.constructor {
            Some(ci) => {
                let ctor = &class.functions[ci];
                self.check_argc(&class.name, ctor.required_argc(), ctor.params.len(), given, pos)
            }
            None => self.check_argc(&class.name, 0, 0, given, pos),
        }
    }

    fn check_native_ctor_args(&self, native: &str, args: &[Expr], pos: Pos) -> Result<()> {
        self.check_native_ctor_argc(native, args.len(), pos)?;
        if let Some(spec) = self.registry.ctor_spec(native) {
            self.check_native_arg_types(spec, args)?;
        }
        Ok(())
    }

    fn check_native_ctor_argc(&self, native: &str, given: usize, pos: Pos) -> Result<()> {
        match self.registry.ctor_spec(native) {
            Some(spec) => spec
                .check_argc(native, given)
                .map_err(|e| self.reframe(e, pos)),
            None if given > 0 => Err(self.err(
                ErrorKind::InvalidArgCount,
                format!("\"{}\" constructor takes no arguments.", native),
                pos,
            )),
            None => Ok(()),
        }
    }

    /// Strict native callees declare parameter types; constant arguments are
    /// checked against them at compile time.
    fn check_native_arg_types(&self, spec: &crate::native::ArgSpec, args: &[Expr]) -> Result<()> {
        if let Some(types) = &spec.param_types {
            for (arg, expected) in args.iter().zip(types.iter()) {
                if let Some(value) = arg.as_const() {
                    if !value.is_null() && value.type_name() != *expected {
                        return Err(self.err(
                            ErrorKind::TypeError,
                            format!("expected {}, got {}.", expected, value.type_name()),
                            arg.pos,
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_member_call(
        &self,
        file: &FileNode,
        ctx: &Ctx,
        class_index: usize,
        name: &str,
        given: usize,
        pos: Pos,
    ) -> Result<()> {
        let mut current = Some(class_index);
        while let Some(ci) = current {
            if let Some(func) = file.classes[ci].functions.iter().find(|f| f.name == name) {
                if ctx.is_static && !func.is_static {
                    return Err(self.err(
                        ErrorKind::TypeError,
                        format!(
                            "cannot call non-static method \"{}\" from a static context.",
                            name
                        ),
                        pos,
                    ));
                }
                return self.check_argc(name, func.required_argc(), func.params.len(), given, pos);
            }
            match &file.classes[ci].base {
                Base::Local(b) => current = Some(*b),
                Base::Extern(module) => {
                    if let Some((_, func)) = module.find_function(name) {
                        return self.check_argc(
                            name,
                            func.required_argc() as usize,
                            func.arg_count as usize,
                            given,
                            pos,
                        );
                    }
                    return Ok(());
                }
                Base::Native(native) => {
                    if let Some(
                        BindData::Method { spec, .. } | BindData::StaticFunc { spec, .. },
                    ) = self.registry.find_bind_data(native, name)
                    {
                        return spec
                            .check_argc(name, given)
                            .map_err(|e| self.reframe(e, pos));
                    }
                    return Ok(());
                }
                Base::None | Base::Unresolved { .. } => current = None,
            }
        }
        Ok(())
    }

    fn check_base_method(
        &self,
        file: &FileNode,
        class_index: usize,
        name: &str,
        given: usize,
        pos: Pos,
    ) -> Result<()> {
        match &file.classes[class_index].base {
            Base::Local(b) => self.check_member_call(file, &Ctx::default(), *b, name, given, pos),
            Base::Extern(module) => {
                match module.find_function(name) {
                    Some((_, func)) => self.check_argc(
                        name,
                        func.required_argc() as usize,
                        func.arg_count as usize,
                        given,
                        pos,
                    ),
                    None => Err(self.err(
                        ErrorKind::AttributeError,
                        format!("base class has no method \"{}\".", name),
                        pos,
                    )),
                }
            }
            Base::Native(native) => match self.registry.find_bind_data(native, name) {
                Some(BindData::Method { spec, .. } | BindData::StaticFunc { spec, .. }) => spec
                    .check_argc(name, given)
                    .map_err(|e| self.reframe(e, pos)),
                _ => Err(self.err(
                    ErrorKind::AttributeError,
                    format!("native base \"{}\" has no method \"{}\".", native, name),
                    pos,
                )),
            },
            Base::None | Base::Unresolved { .. } => Err(self.err(
                ErrorKind::SyntaxError,
                "invalid use of \"super\": the class has no base.",
                pos,
            )),
        }
    }

    fn check_base_ctor_args(
        &self,
        file: &FileNode,
        class_index: usize,
        given: usize,
        pos: Pos,
    ) -> Result<()> {
        match &file.classes[class_index].base {
            Base::Local(b) => self.check_ctor_args(file, *b, given, pos),
            Base::Extern(module) => match module.constructor() {
                Some(ctor) => self.check_argc(
                    &module.name,
                    ctor.required_argc() as usize,
                    ctor.arg_count as usize,
                    given,
                    pos,
                ),
                None => self.check_argc(&module.name, 0, 0, given, pos),
            },
            Base::Native(native) => self.check_native_ctor_argc(native, given, pos),
            Base::None | Base::Unresolved { .. } => Err(self.err(
                ErrorKind::SyntaxError,
                "invalid use of \"super\": the class has no base.",
                pos,
            )),
        }
    }

    /// A derived class with no explicit `super(...)` needs a base whose
    /// constructor is callable with zero arguments: codegen synthesizes the
    /// call, or compilation fails here.
    fn check_super_ctor(&mut self, file: &mut FileNode, class_index: usize) -> Result<()> {
        if file.classes[class_index].base.is_none()
            || file.classes[class_index].has_super_ctor_call
        {
            return Ok(());
        }
        let pos = file.classes[class_index].pos;
        let result = self.check_base_ctor_args(file, class_index, 0, pos);
        result.map_err(|mut e| {
            e.kind = ErrorKind::TypeError;
            e.message = format!(
                "base of class \"{}\" requires constructor arguments; add a super(...) call.",
                file.classes[class_index].name
            );
            e
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_scalar(value: &Var) -> bool {
    matches!(
        value,
        Var::Null | Var::Bool(_) | Var::Int(_) | Var::Float(_) | Var::String(_)
    )
}

fn const_of(file: &FileNode, loc: ConstLoc) -> &ConstNode {
    match loc {
        ConstLoc::File(i) => &file.constants[i],
        ConstLoc::Class(c, i) => &file.classes[c].constants[i],
    }
}

fn const_of_mut(file: &mut FileNode, loc: ConstLoc) -> &mut ConstNode {
    match loc {
        ConstLoc::File(i) => &mut file.constants[i],
        ConstLoc::Class(c, i) => &mut file.classes[c].constants[i],
    }
}

fn enum_of(file: &FileNode, slot: EnumSlot) -> &EnumNode {
    let holder = match slot.class {
        None => (&file.unnamed_enum, &file.enums),
        Some(c) => (&file.classes[c].unnamed_enum, &file.classes[c].enums),
    };
    match slot.named_index {
        None => holder.0.as_ref().expect("slot only built for present enums"),
        Some(i) => &holder.1[i],
    }
}

fn enum_of_mut(file: &mut FileNode, slot: EnumSlot) -> &mut EnumNode {
    let holder = match slot.class {
        None => (&mut file.unnamed_enum, &mut file.enums),
        Some(c) => {
            let class = &mut file.classes[c];
            (&mut class.unnamed_enum, &mut class.enums)
        }
    };
    match slot.named_index {
        None => holder.0.as_mut().expect("slot only built for present enums"),
        Some(i) => &mut holder.1[i],
    }
}

fn func_of<'f>(file: &'f FileNode, class: Option<usize>, index: usize) -> &'f FunctionNode {
    match class {
        None => &file.functions[index],
        Some(c) => &file.classes[c].functions[index],
    }
}

fn func_of_mut<'f>(file: &'f mut FileNode, class: Option<usize>, index: usize) -> &'f mut FunctionNode {
    match class {
        None => &mut file.functions[index],
        Some(c) => &mut file.classes[c].functions[index],
    }
}

fn ident_name(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Identifier { name, .. } => name.clone(),
        _ => String::new(),
    }
}

fn set_ident_resolution(expr: &mut Expr, resolution: IdentRef) {
    if let ExprKind::Identifier { resolved, .. } = &mut expr.kind {
        *resolved = resolution;
    }
}

/// A statement that reduced away entirely (compile-time call results).
fn statement_is_dead(stmt: &Statement) -> bool {
    matches!(stmt, Statement::Expr(e) if e.as_const().is_some())
}

/// Does the block (or any nested non-loop block) contain a `break` that
/// targets the enclosing loop?
fn block_breaks(block: &BlockNode) -> bool {
    block.statements.iter().any(|stmt| match stmt {
        Statement::Break { .. } => true,
        Statement::If {
            body, else_body, ..
        } => block_breaks(body) || else_body.as_ref().map(block_breaks).unwrap_or(false),
        Statement::Block(b) => block_breaks(b),
        Statement::Switch { cases, .. } => {
            // break inside a switch targets the switch, not the loop
            let _ = cases;
            false
        }
        _ => false,
    })
}

/// Pre-reduction provenance of a switch case: `EnumName.VALUE` shape.
fn enum_provenance(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Index { base, .. } => match &base.kind {
            ExprKind::Identifier { name, .. } => Some(name.clone()),
            _ => None,
        },
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Constant evaluation
// ---------------------------------------------------------------------------

fn eval_unary(op: OpType, value: &Var) -> Result<Var> {
    match op {
        OpType::Not => Ok(Var::Bool(!value.is_truthy())),
        OpType::BitNot => value.bit_not(),
        OpType::Negative => value.neg(),
        OpType::Positive => match value {
            Var::Int(_) | Var::Float(_) => Ok(value.clone()),
            _ => Err(Error::new(
                ErrorKind::OperatorNotSupported,
                format!("operator \"+\" not supported on {}.", value.type_name()),
            )),
        },
        _ => Err(Error::new(ErrorKind::Bug, "not a unary operator.")),
    }
}

fn eval_binary(op: OpType, left: &Var, right: &Var) -> Result<Var> {
    use std::cmp::Ordering;
    match op {
        OpType::Plus => value::add_values(left, right),
        OpType::Minus => value::sub_values(left, right),
        OpType::Mul => value::mul_values(left, right),
        OpType::Div => value::div_values(left, right),
        OpType::Mod => value::rem_values(left, right),
        OpType::EqEq => Ok(Var::Bool(left == right)),
        OpType::NotEq => Ok(Var::Bool(left != right)),
        OpType::Lt => Ok(Var::Bool(
            value::compare_values(left, right, "<")? == Ordering::Less,
        )),
        OpType::LtEq => Ok(Var::Bool(
            value::compare_values(left, right, "<=")? != Ordering::Greater,
        )),
        OpType::Gt => Ok(Var::Bool(
            value::compare_values(left, right, ">")? == Ordering::Greater,
        )),
        OpType::GtEq => Ok(Var::Bool(
            value::compare_values(left, right, ">=")? != Ordering::Less,
        )),
        OpType::And => Ok(Var::Bool(left.is_truthy() && right.is_truthy())),
        OpType::Or => Ok(Var::Bool(left.is_truthy() || right.is_truthy())),
        OpType::BitLshift => left.bit_lshift(right),
        OpType::BitRshift => left.bit_rshift(right),
        OpType::BitAnd => left.bit_and(right),
        OpType::BitOr => left.bit_or(right),
        OpType::BitXor => left.bit_xor(right),
        _ => Err(Error::new(ErrorKind::Bug, "not a foldable binary operator.")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use pretty_assertions::assert_eq;

    fn try_analyze(source: &str) -> Result<(FileNode, Vec<Warning>)> {
        let mut file = parser::parse(source, "test.cb")?;
        let registry = NativeClasses::new();
        let modules = HashMap::new();
        let warnings = analyze(&mut file, &registry, &modules)?;
        Ok((file, warnings))
    }

    fn analyzed(source: &str) -> FileNode {
        try_analyze(source).unwrap().0
    }

    fn analyze_err(source: &str) -> Error {
        try_analyze(source).unwrap_err()
    }

    #[test]
    fn constant_expressions_fold() {
        let file = analyzed("var x = 1 + 2 * 3;");
        assert_eq!(
            file.vars[0].assignment.as_ref().unwrap().as_const(),
            Some(&Var::Int(7))
        );
    }

    #[test]
    fn identifiers_bound_to_constants_fold() {
        let file = analyzed("const A = 2; const B = A + 1; var x = B * 2;");
        assert_eq!(file.constants[1].value, Var::Int(3));
        assert_eq!(
            file.vars[0].assignment.as_ref().unwrap().as_const(),
            Some(&Var::Int(6))
        );
    }

    #[test]
    fn pure_builtin_calls_fold() {
        let file = analyzed("var x = pow(2, 3); var y = min(4, 2, 9);");
        assert_eq!(
            file.vars[0].assignment.as_ref().unwrap().as_const(),
            Some(&Var::Float(8.0))
        );
        assert_eq!(
            file.vars[1].assignment.as_ref().unwrap().as_const(),
            Some(&Var::Int(2))
        );
    }

    #[test]
    fn builtin_type_constructor_folds() {
        let file = analyzed("var s = String(42);");
        assert_eq!(
            file.vars[0].assignment.as_ref().unwrap().as_const(),
            Some(&Var::from("42"))
        );
    }

    #[test]
    fn folding_division_by_zero_is_rejected() {
        assert_eq!(analyze_err("var x = 1 / 0;").kind, ErrorKind::ZeroDivision);
        assert_eq!(analyze_err("const C = 1 / 0;").kind, ErrorKind::ZeroDivision);
    }

    #[test]
    fn constant_cycles_are_rejected() {
        let err = analyze_err("const A = B; const B = A;");
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn enum_values_resolve_with_implicit_increment() {
        let file = analyzed("enum E { A, B, C = 10, D }");
        let values: Vec<i64> = file.enums[0].values.iter().map(|v| v.value).collect();
        assert_eq!(values, vec![0, 1, 10, 11]);
    }

    #[test]
    fn enum_value_cycles_are_rejected() {
        let err = analyze_err("enum { A = B, B = A }");
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn enum_values_must_be_integers() {
        let err = analyze_err("enum E { A = \"x\" }");
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn inheritance_cycle_is_rejected() {
        let err = analyze_err("class A : B { } class B : A { }");
        assert_eq!(err.kind, ErrorKind::TypeError);
        let err = analyze_err("class A : A { }");
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn unknown_base_is_a_name_error() {
        assert_eq!(analyze_err("class A : Nope { }").kind, ErrorKind::NameError);
    }

    #[test]
    fn member_shadowing_is_rejected() {
        let err = analyze_err("class A { var x; } class B : A { var x; }");
        assert_eq!(err.kind, ErrorKind::AttributeError);
        // statics do not shadow
        analyzed("class A { var x; } class B : A { static var x; }");
    }

    #[test]
    fn parameter_defaults_must_be_scalars() {
        assert_eq!(analyze_err("func f(a = [1]) { }").kind, ErrorKind::TypeError);
        let file = analyzed("func f(a, b = 2, c = 3) { }");
        assert_eq!(file.functions[0].default_values, vec![Var::Int(2), Var::Int(3)]);
    }

    #[test]
    fn call_argument_counts_are_checked() {
        assert_eq!(
            analyze_err("func f(a) { } func g() { f(); }").kind,
            ErrorKind::InvalidArgCount
        );
        assert_eq!(
            analyze_err("func f(a) { } func g() { f(1, 2); }").kind,
            ErrorKind::InvalidArgCount
        );
    }

    #[test]
    fn non_static_access_from_static_context_is_rejected() {
        let err = analyze_err("class A { var x; static func f() { return x; } }");
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn super_ctor_must_be_first_statement() {
        let err = analyze_err(
            "class A { func A(x) { } } class B : A { func B() { var t = 1; super(t); } }",
        );
        assert_eq!(err.kind, ErrorKind::SyntaxError);
    }

    #[test]
    fn missing_required_super_ctor_is_rejected() {
        let err = analyze_err("class A { func A(x) { } } class B : A { }");
        assert_eq!(err.kind, ErrorKind::TypeError);
        // a zero-arg base constructor is synthesized instead
        analyzed("class A { func A() { } } class B : A { }");
        analyzed("class A { func A(x = 1) { } } class B : A { }");
    }

    #[test]
    fn shadowing_warning_is_reported() {
        let (_, warnings) = try_analyze("var g = 1; func f() { var g = 2; return g; }").unwrap();
        assert!(warnings.iter().any(|w| w.kind == ErrorKind::VariableShadowing));
    }

    #[test]
    fn unreachable_code_warning() {
        let (_, warnings) =
            try_analyze("func f() { return 1; var x = 2; }").unwrap();
        assert!(warnings.iter().any(|w| w.kind == ErrorKind::UnreachableCode));
    }

    #[test]
    fn non_terminating_loop_warning() {
        let (_, warnings) = try_analyze("func f() { while (true) { } }").unwrap();
        assert!(warnings.iter().any(|w| w.kind == ErrorKind::NonTerminatingLoop));
        let (_, warnings) =
            try_analyze("func f() { while (true) { break; } }").unwrap();
        assert!(!warnings.iter().any(|w| w.kind == ErrorKind::NonTerminatingLoop));
    }

    #[test]
    fn missed_enum_in_switch_warning() {
        let src = "enum E { A, B, C }\n\
                   func f(x) { switch (x) { case E.A: break; case E.B: break; } }";
        let (_, warnings) = try_analyze(src).unwrap();
        assert!(warnings.iter().any(|w| w.kind == ErrorKind::MissedEnumInSwitch));
    }

    #[test]
    fn assert_evaluates_at_compile_time() {
        analyzed("__assert(1 + 1 == 2);");
        assert_eq!(analyze_err("__assert(false);").kind, ErrorKind::Assertion);
    }

    #[test]
    fn assignment_to_constant_is_rejected() {
        let err = analyze_err("const C = 1; func f() { C = 2; }");
        assert_eq!(err.kind, ErrorKind::TypeError);
    }
}
