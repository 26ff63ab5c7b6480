//! Recursive-descent parser: tokens -> AST.
//!
//! The top level admits `import`, `class`, `enum`, `func`, `var`, `const`,
//! stray semicolons and stray expression statements (the latter feed the
//! synthesized module initializer). Expressions are parsed in two phases: a
//! linear scan collects unary markers and atoms with their postfix chains
//! (`.name`, `[key]`, `(args)`), then the lowest-precedence-last reduction
//! builds the operator tree.
//!
//! Declaration names are checked against the enclosing lexical scope at
//! parse time; collisions raise `AlreadyDefined` immediately.

use crate::ast::*;
use crate::builtins::BuiltinFunc;
use crate::diagnostic::{Pos, SourceInfo};
use crate::error::{Error, ErrorKind, Result};
use crate::tokenizer::{Bracket, Keyword, OpTk, Punct, Token, Tokenizer};
use crate::value::Var;

/// What the expression scanner collected: an operator marker or a finished
/// sub-expression.
enum ExprItem {
    Op(OpType, Pos),
    Node(Expr),
}

#[derive(Default)]
struct ParserContext {
    /// Name and base-ness of the class being parsed.
    current_class: Option<(String, bool)>,
    /// Name and static-ness of the function being parsed.
    current_func: Option<(String, bool)>,
    /// Inside a `var` initializer; the bool is the var's static flag.
    in_var_init: Option<bool>,
}

pub struct Parser {
    tokenizer: Tokenizer,
    path: String,
    source: String,
    ctx: ParserContext,
    /// One name set per lexical scope (file / class / block chain).
    scopes: Vec<Vec<String>>,
}

/// Parse a source file into its AST.
pub fn parse(source: &str, path: &str) -> Result<FileNode> {
    let tokenizer = Tokenizer::tokenize(source, path)?;
    let mut parser = Parser {
        tokenizer,
        path: path.to_string(),
        source: source.to_string(),
        ctx: ParserContext::default(),
        scopes: vec![Vec::new()],
    };
    parser.parse_file()
}

impl Parser {
    // -- error helpers ------------------------------------------------------

    fn error_at(&self, kind: ErrorKind, message: impl Into<String>, pos: Pos, width: u32) -> Error {
        Error::new(kind, message).with_source_info(SourceInfo::new(
            &self.path,
            &self.source,
            pos,
            width,
        ))
    }

    fn unexpected(&self, expected: &str) -> Error {
        let tok = self.tokenizer.peek(-1, true);
        let kind = if tok.token == Token::Eof {
            ErrorKind::UnexpectedEof
        } else {
            ErrorKind::SyntaxError
        };
        let message = if expected.is_empty() {
            format!("unexpected token ({}).", tok.token.describe())
        } else {
            format!(
                "unexpected token ({}). expected {}.",
                tok.token.describe(),
                expected
            )
        };
        self.error_at(kind, message, tok.pos, tok.token.width())
    }

    // -- scope helpers ------------------------------------------------------

    fn declare(&mut self, name: &str, pos: Pos) -> Result<()> {
        let scope = self.scopes.last_mut().expect("scope stack never empty");
        if scope.iter().any(|n| n == name) {
            return Err(self.error_at(
                ErrorKind::AlreadyDefined,
                format!("identifier \"{}\" already defined in this scope.", name),
                pos,
                name.chars().count() as u32,
            ));
        }
        scope.push(name.to_string());
        Ok(())
    }

    fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    // -- token helpers ------------------------------------------------------

    fn expect_bracket(&mut self, bracket: Bracket, what: &str) -> Result<()> {
        match self.tokenizer.next().token {
            Token::Bracket(b) if b == bracket => Ok(()),
            _ => Err(self.unexpected(what)),
        }
    }

    fn expect_punct(&mut self, punct: Punct, what: &str) -> Result<()> {
        match self.tokenizer.next().token {
            Token::Punct(p) if p == punct => Ok(()),
            _ => Err(self.unexpected(what)),
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<(String, Pos)> {
        let tok = self.tokenizer.next();
        match tok.token {
            Token::Identifier(name) => Ok((name, tok.pos)),
            _ => Err(self.unexpected(what)),
        }
    }

    fn eat_semicolon(&mut self) -> Result<()> {
        self.expect_punct(Punct::SemiColon, "symbol \";\"")
    }

    // -- top level ----------------------------------------------------------

    fn parse_file(&mut self) -> Result<FileNode> {
        let mut file = FileNode {
            path: self.path.clone(),
            source: self.source.clone(),
            ..Default::default()
        };

        loop {
            let tok = self.tokenizer.peek(0, true).clone();
            match &tok.token {
                Token::Eof => break,
                Token::Punct(Punct::SemiColon) => {
                    self.tokenizer.next();
                }
                Token::Keyword(Keyword::Import) => {
                    let import = self.parse_import()?;
                    self.declare(&import.name.clone(), import.pos)?;
                    file.imports.push(import);
                }
                Token::Keyword(Keyword::Class) => {
                    let class = self.parse_class()?;
                    self.declare(&class.name.clone(), class.pos)?;
                    file.classes.push(class);
                    let class_index = file.classes.len() - 1;
                    for (var_index, var) in file.classes[class_index].vars.iter().enumerate() {
                        if var.is_static {
                            file.init_items.push(InitItem::StaticInit {
                                class: class_index,
                                var: var_index,
                            });
                        }
                    }
                }
                Token::Keyword(Keyword::Enum) => {
                    let e = self.parse_enum()?;
                    match &e.name {
                        Some(name) => {
                            self.declare(&name.clone(), e.pos)?;
                            file.enums.push(e);
                        }
                        None => {
                            for value in &e.values {
                                self.declare(&value.name.clone(), value.pos)?;
                            }
                            merge_unnamed_enum(&mut file.unnamed_enum, e);
                        }
                    }
                }
                Token::Keyword(Keyword::Func) => {
                    let func = self.parse_func(false)?;
                    self.declare(&func.name.clone(), func.pos)?;
                    file.functions.push(func);
                }
                Token::Keyword(Keyword::Var) => {
                    let vars = self.parse_var_decl(false)?;
                    for var in vars {
                        self.declare(&var.name.clone(), var.pos)?;
                        file.vars.push(var);
                        file.init_items.push(InitItem::VarInit(file.vars.len() - 1));
                    }
                }
                Token::Keyword(Keyword::Const) => {
                    let c = self.parse_const_decl()?;
                    self.declare(&c.name.clone(), c.pos)?;
                    file.constants.push(c);
                }
                Token::Keyword(Keyword::Static) => {
                    return Err(self.error_at(
                        ErrorKind::SyntaxError,
                        "\"static\" is only valid inside a class.",
                        tok.pos,
                        tok.token.width(),
                    ));
                }
                _ => {
                    // stray top-level statement: executed by the module
                    // initializer in declaration order
                    let expr = self.parse_expression(true)?;
                    self.eat_semicolon()?;
                    file.init_items.push(InitItem::Stmt(Statement::Expr(expr)));
                }
            }
        }

        Ok(file)
    }

    fn parse_import(&mut self) -> Result<ImportNode> {
        let pos = self.tokenizer.next().pos; // eat "import"
        let (name, _) = self.expect_identifier("an import name")?;
        match self.tokenizer.next().token {
            Token::Op(OpTk::Eq) => {}
            _ => return Err(self.unexpected("symbol \"=\"")),
        }
        let tok = self.tokenizer.next();
        let path = match tok.token {
            Token::Value(Var::String(s)) => s,
            _ => return Err(self.unexpected("a path string")),
        };
        self.eat_semicolon()?;
        Ok(ImportNode {
            name,
            path,
            pos,
            module: None,
        })
    }

    // -- class --------------------------------------------------------------

    fn parse_class(&mut self) -> Result<ClassNode> {
        let pos = self.tokenizer.next().pos; // eat "class"
        let (name, _) = self.expect_identifier("a class name")?;

        let mut class = ClassNode {
            name: name.clone(),
            pos,
            ..Default::default()
        };

        if self.tokenizer.peek(0, true).token == Token::Punct(Punct::Colon) {
            self.tokenizer.next(); // eat ":"
            let (base_name, base_pos) = self.expect_identifier("a base class name")?;
            class.base = Base::Unresolved {
                name: base_name,
                pos: base_pos,
            };
        }

        self.expect_bracket(Bracket::LCur, "symbol \"{\"")?;

        self.ctx.current_class = Some((name.clone(), !class.base.is_none()));
        self.push_scope();
        let result = self.parse_class_body(&mut class);
        self.pop_scope();
        self.ctx.current_class = None;
        result?;

        Ok(class)
    }

    fn parse_class_body(&mut self, class: &mut ClassNode) -> Result<()> {
        loop {
            let tok = self.tokenizer.peek(0, true).clone();
            match &tok.token {
                Token::Eof => return Err(self.unexpected("symbol \"}\"")),
                Token::Bracket(Bracket::RCur) => {
                    self.tokenizer.next();
                    return Ok(());
                }
                Token::Punct(Punct::SemiColon) => {
                    self.tokenizer.next();
                }
                Token::Keyword(Keyword::Enum) => {
                    let e = self.parse_enum()?;
                    match &e.name {
                        Some(name) => {
                            self.declare(&name.clone(), e.pos)?;
                            class.enums.push(e);
                        }
                        None => {
                            for value in &e.values {
                                self.declare(&value.name.clone(), value.pos)?;
                            }
                            merge_unnamed_enum(&mut class.unnamed_enum, e);
                        }
                    }
                }
                Token::Keyword(Keyword::Static) => {
                    self.tokenizer.next(); // eat "static"
                    match self.tokenizer.peek(0, true).token.clone() {
                        Token::Keyword(Keyword::Func) => self.parse_class_func(class, true)?,
                        Token::Keyword(Keyword::Var) => {
                            let vars = self.parse_var_decl(true)?;
                            for var in vars {
                                self.declare(&var.name.clone(), var.pos)?;
                                class.vars.push(var);
                            }
                        }
                        _ => return Err(self.unexpected("\"func\" or \"var\" after \"static\"")),
                    }
                }
                Token::Keyword(Keyword::Func) => self.parse_class_func(class, false)?,
                Token::Keyword(Keyword::Var) => {
                    let vars = self.parse_var_decl(false)?;
                    for var in vars {
                        self.declare(&var.name.clone(), var.pos)?;
                        class.vars.push(var);
                    }
                }
                Token::Keyword(Keyword::Const) => {
                    let c = self.parse_const_decl()?;
                    self.declare(&c.name.clone(), c.pos)?;
                    class.constants.push(c);
                }
                _ => return Err(self.unexpected("a class member declaration")),
            }
        }
    }

    fn parse_class_func(&mut self, class: &mut ClassNode, is_static: bool) -> Result<()> {
        let mut func = self.parse_func(is_static)?;
        self.declare(&func.name.clone(), func.pos)?;
        if func.name == class.name {
            if is_static {
                return Err(self.error_at(
                    ErrorKind::SyntaxError,
                    "constructor cannot be static.",
                    func.pos,
                    func.name.chars().count() as u32,
                ));
            }
            func.is_constructor = true;
            class.constructor = Some(class.functions.len());
        }
        class.functions.push(func);
        Ok(())
    }

    // -- declarations -------------------------------------------------------

    fn parse_enum(&mut self) -> Result<EnumNode> {
        let pos = self.tokenizer.next().pos; // eat "enum"
        let name = match self.tokenizer.peek(0, true).token.clone() {
            Token::Identifier(name) => {
                self.tokenizer.next();
                Some(name)
            }
            _ => None,
        };
        self.expect_bracket(Bracket::LCur, "symbol \"{\"")?;

        let mut values: Vec<EnumValueNode> = Vec::new();
        loop {
            let tok = self.tokenizer.next();
            match tok.token {
                Token::Bracket(Bracket::RCur) => break,
                Token::Identifier(value_name) => {
                    if values.iter().any(|v| v.name == value_name) {
                        return Err(self.error_at(
                            ErrorKind::AlreadyDefined,
                            format!("enum value \"{}\" already defined.", value_name),
                            tok.pos,
                            value_name.chars().count() as u32,
                        ));
                    }
                    let expr = if self.tokenizer.peek(0, true).token == Token::Op(OpTk::Eq) {
                        self.tokenizer.next(); // eat "="
                        Some(self.parse_expression(false)?)
                    } else {
                        None
                    };
                    values.push(EnumValueNode {
                        name: value_name,
                        pos: tok.pos,
                        expr,
                        value: 0,
                        is_reduced: false,
                        is_reducing: false,
                    });

                    match self.tokenizer.peek(0, true).token.clone() {
                        Token::Punct(Punct::Comma) => {
                            self.tokenizer.next();
                        }
                        Token::Bracket(Bracket::RCur) => {}
                        _ => {
                            self.tokenizer.next();
                            return Err(self.unexpected("symbol \",\" or \"}\""));
                        }
                    }
                }
                _ => return Err(self.unexpected("an enum value name")),
            }
        }

        Ok(EnumNode { name, pos, values })
    }

    /// `var a = 1, b, c = 3;` makes one node per declared name.
    fn parse_var_decl(&mut self, is_static: bool) -> Result<Vec<VarNode>> {
        self.tokenizer.next(); // eat "var"
        let mut vars = Vec::new();
        loop {
            let (name, pos) = self.expect_identifier("a variable name")?;
            let assignment = if self.tokenizer.peek(0, true).token == Token::Op(OpTk::Eq) {
                self.tokenizer.next(); // eat "="
                self.ctx.in_var_init = Some(is_static);
                let expr = self.parse_expression(false);
                self.ctx.in_var_init = None;
                Some(expr?)
            } else {
                None
            };
            vars.push(VarNode {
                name,
                pos,
                is_static,
                assignment,
            });
            match self.tokenizer.next().token {
                Token::Punct(Punct::Comma) => {}
                Token::Punct(Punct::SemiColon) => break,
                _ => return Err(self.unexpected("symbol \",\" or \";\"")),
            }
        }
        Ok(vars)
    }

    fn parse_const_decl(&mut self) -> Result<ConstNode> {
        self.tokenizer.next(); // eat "const"
        let (name, pos) = self.expect_identifier("a constant name")?;
        match self.tokenizer.next().token {
            Token::Op(OpTk::Eq) => {}
            _ => return Err(self.unexpected("symbol \"=\" (constants must be initialized)")),
        }
        let expr = self.parse_expression(false)?;
        self.eat_semicolon()?;
        Ok(ConstNode {
            name,
            pos,
            assignment: Some(expr),
            value: Var::Null,
            is_reduced: false,
            is_reducing: false,
        })
    }

    fn parse_func(&mut self, is_static: bool) -> Result<FunctionNode> {
        let pos = self.tokenizer.next().pos; // eat "func"
        let (name, _) = self.expect_identifier("a function name")?;
        self.expect_bracket(Bracket::LParen, "symbol \"(\"")?;

        let mut params: Vec<ParamNode> = Vec::new();
        if self.tokenizer.peek(0, true).token == Token::Bracket(Bracket::RParen) {
            self.tokenizer.next();
        } else {
            loop {
                let (param_name, param_pos) = self.expect_identifier("a parameter name")?;
                if params.iter().any(|p| p.name == param_name) {
                    return Err(self.error_at(
                        ErrorKind::AlreadyDefined,
                        format!("parameter \"{}\" already defined.", param_name),
                        param_pos,
                        param_name.chars().count() as u32,
                    ));
                }
                let default = if self.tokenizer.peek(0, true).token == Token::Op(OpTk::Eq) {
                    self.tokenizer.next(); // eat "="
                    Some(self.parse_expression(false)?)
                } else {
                    if params.iter().any(|p| p.default.is_some()) {
                        return Err(self.error_at(
                            ErrorKind::SyntaxError,
                            format!(
                                "parameter \"{}\" needs a default value (it follows one that has one).",
                                param_name
                            ),
                            param_pos,
                            param_name.chars().count() as u32,
                        ));
                    }
                    None
                };
                params.push(ParamNode {
                    name: param_name,
                    pos: param_pos,
                    default,
                });
                match self.tokenizer.next().token {
                    Token::Punct(Punct::Comma) => {}
                    Token::Bracket(Bracket::RParen) => break,
                    _ => return Err(self.unexpected("symbol \",\" or \")\"")),
                }
            }
        }

        self.expect_bracket(Bracket::LCur, "symbol \"{\"")?;
        self.ctx.current_func = Some((name.clone(), is_static));
        self.push_scope();
        for param in &params {
            let scope = self.scopes.last_mut().expect("scope stack never empty");
            scope.push(param.name.clone());
        }
        let body = self.parse_block_body(pos);
        self.pop_scope();
        self.ctx.current_func = None;

        Ok(FunctionNode {
            name,
            pos,
            is_static,
            params,
            default_values: Vec::new(),
            body: body?,
            is_constructor: false,
        })
    }

    // -- statements ---------------------------------------------------------

    /// Parse `{ ... }` contents; the opening brace is already consumed.
    fn parse_block_body(&mut self, pos: Pos) -> Result<BlockNode> {
        let mut block = BlockNode {
            statements: Vec::new(),
            pos,
        };
        loop {
            match self.tokenizer.peek(0, true).token.clone() {
                Token::Eof => return Err(self.unexpected("symbol \"}\"")),
                Token::Bracket(Bracket::RCur) => {
                    self.tokenizer.next();
                    return Ok(block);
                }
                Token::Punct(Punct::SemiColon) => {
                    self.tokenizer.next();
                }
                // `var a, b = 1;` expands to one statement per name, flat in
                // this block so later statements see the declarations
                Token::Keyword(Keyword::Var) => {
                    let vars = self.parse_var_decl(false)?;
                    for var in vars {
                        self.declare(&var.name.clone(), var.pos)?;
                        block.statements.push(Statement::Var(var));
                    }
                }
                _ => {
                    let stmt = self.parse_statement()?;
                    block.statements.push(stmt);
                }
            }
        }
    }

    /// A loop/if body: either a braced block or a single statement.
    fn parse_body(&mut self) -> Result<BlockNode> {
        let tok = self.tokenizer.peek(0, true).clone();
        if tok.token == Token::Bracket(Bracket::LCur) {
            self.tokenizer.next();
            self.push_scope();
            let block = self.parse_block_body(tok.pos);
            self.pop_scope();
            block
        } else {
            self.push_scope();
            let stmt = self.parse_statement();
            self.pop_scope();
            Ok(BlockNode {
                statements: vec![stmt?],
                pos: tok.pos,
            })
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let tok = self.tokenizer.peek(0, true).clone();
        match &tok.token {
            Token::Keyword(Keyword::Var) => {
                // single-statement position (an unbraced if/loop body): the
                // declaration is scoped to that body anyway
                let mut vars = self.parse_var_decl(false)?;
                if vars.len() != 1 {
                    return Err(self.error_at(
                        ErrorKind::SyntaxError,
                        "a multi-variable declaration needs a block around it.",
                        tok.pos,
                        3,
                    ));
                }
                let var = vars.pop().expect("checked above");
                self.declare(&var.name.clone(), var.pos)?;
                Ok(Statement::Var(var))
            }
            Token::Keyword(Keyword::Const) => {
                let c = self.parse_const_decl()?;
                self.declare(&c.name.clone(), c.pos)?;
                Ok(Statement::Const(c))
            }
            Token::Keyword(Keyword::If) => self.parse_if(),
            Token::Keyword(Keyword::While) => {
                self.tokenizer.next();
                self.expect_bracket(Bracket::LParen, "symbol \"(\"")?;
                let cond = self.parse_expression(false)?;
                self.expect_bracket(Bracket::RParen, "symbol \")\"")?;
                let body = self.parse_body()?;
                Ok(Statement::While {
                    cond,
                    body,
                    pos: tok.pos,
                })
            }
            Token::Keyword(Keyword::For) => self.parse_for(tok.pos),
            Token::Keyword(Keyword::Foreach) => self.parse_foreach(tok.pos),
            Token::Keyword(Keyword::Switch) => self.parse_switch(tok.pos),
            Token::Keyword(Keyword::Break) => {
                self.tokenizer.next();
                self.eat_semicolon()?;
                Ok(Statement::Break { pos: tok.pos })
            }
            Token::Keyword(Keyword::Continue) => {
                self.tokenizer.next();
                self.eat_semicolon()?;
                Ok(Statement::Continue { pos: tok.pos })
            }
            Token::Keyword(Keyword::Return) => {
                self.tokenizer.next();
                let value = if self.tokenizer.peek(0, true).token == Token::Punct(Punct::SemiColon)
                {
                    None
                } else {
                    Some(self.parse_expression(false)?)
                };
                self.eat_semicolon()?;
                Ok(Statement::Return {
                    value,
                    pos: tok.pos,
                })
            }
            Token::Bracket(Bracket::LCur) => {
                self.tokenizer.next();
                self.push_scope();
                let block = self.parse_block_body(tok.pos);
                self.pop_scope();
                Ok(Statement::Block(block?))
            }
            _ => {
                let expr = self.parse_expression(true)?;
                self.eat_semicolon()?;
                Ok(Statement::Expr(expr))
            }
        }
    }

    /// `if`/`else if`/`else`, desugared so every `else if` becomes a nested
    /// `if` inside the else block.
    fn parse_if(&mut self) -> Result<Statement> {
        let pos = self.tokenizer.next().pos; // eat "if"
        self.expect_bracket(Bracket::LParen, "symbol \"(\"")?;
        let cond = self.parse_expression(false)?;
        self.expect_bracket(Bracket::RParen, "symbol \")\"")?;
        let body = self.parse_body()?;

        let else_body = if self.tokenizer.peek(0, true).token == Token::Keyword(Keyword::Else) {
            let else_pos = self.tokenizer.next().pos; // eat "else"
            if self.tokenizer.peek(0, true).token == Token::Keyword(Keyword::If) {
                let nested = self.parse_if()?;
                Some(BlockNode {
                    statements: vec![nested],
                    pos: else_pos,
                })
            } else {
                Some(self.parse_body()?)
            }
        } else {
            None
        };

        Ok(Statement::If {
            cond,
            body,
            else_body,
            pos,
        })
    }

    fn parse_for(&mut self, pos: Pos) -> Result<Statement> {
        self.tokenizer.next(); // eat "for"
        self.expect_bracket(Bracket::LParen, "symbol \"(\"")?;
        self.push_scope();

        let result = (|| {
            let init = match self.tokenizer.peek(0, true).token.clone() {
                Token::Punct(Punct::SemiColon) => {
                    self.tokenizer.next();
                    None
                }
                Token::Keyword(Keyword::Var) => {
                    let mut vars = self.parse_var_decl(false)?;
                    if vars.len() != 1 {
                        return Err(self.error_at(
                            ErrorKind::SyntaxError,
                            "for initializer declares exactly one variable.",
                            pos,
                            3,
                        ));
                    }
                    let var = vars.pop().expect("checked above");
                    self.declare(&var.name.clone(), var.pos)?;
                    Some(Box::new(Statement::Var(var)))
                }
                _ => {
                    let expr = self.parse_expression(true)?;
                    self.eat_semicolon()?;
                    Some(Box::new(Statement::Expr(expr)))
                }
            };

            let cond = if self.tokenizer.peek(0, true).token == Token::Punct(Punct::SemiColon) {
                self.tokenizer.next();
                None
            } else {
                let expr = self.parse_expression(false)?;
                self.eat_semicolon()?;
                Some(expr)
            };

            let step = if self.tokenizer.peek(0, true).token == Token::Bracket(Bracket::RParen) {
                None
            } else {
                Some(self.parse_expression(true)?)
            };
            self.expect_bracket(Bracket::RParen, "symbol \")\"")?;

            let body = self.parse_body()?;
            Ok(Statement::For {
                init,
                cond,
                step,
                body,
                pos,
            })
        })();

        self.pop_scope();
        result
    }

    fn parse_foreach(&mut self, pos: Pos) -> Result<Statement> {
        self.tokenizer.next(); // eat "foreach"
        self.expect_bracket(Bracket::LParen, "symbol \"(\"")?;
        self.push_scope();

        let result = (|| {
            // the loop variable may be written `foreach (var x : it)` or
            // `foreach (x : it)`
            if self.tokenizer.peek(0, true).token == Token::Keyword(Keyword::Var) {
                self.tokenizer.next();
            }
            let (var_name, var_pos) = self.expect_identifier("a loop variable name")?;
            self.declare(&var_name.clone(), var_pos)?;
            self.expect_punct(Punct::Colon, "symbol \":\"")?;
            let iterable = self.parse_expression(false)?;
            self.expect_bracket(Bracket::RParen, "symbol \")\"")?;
            let body = self.parse_body()?;
            Ok(Statement::Foreach {
                var_name,
                var_pos,
                iterable,
                body,
                pos,
            })
        })();

        self.pop_scope();
        result
    }

    fn parse_switch(&mut self, pos: Pos) -> Result<Statement> {
        self.tokenizer.next(); // eat "switch"
        self.expect_bracket(Bracket::LParen, "symbol \"(\"")?;
        let value = self.parse_expression(false)?;
        self.expect_bracket(Bracket::RParen, "symbol \")\"")?;
        self.expect_bracket(Bracket::LCur, "symbol \"{\"")?;

        let mut cases: Vec<SwitchCase> = Vec::new();
        loop {
            let tok = self.tokenizer.next();
            match tok.token {
                Token::Bracket(Bracket::RCur) => break,
                Token::Keyword(Keyword::Case) => {
                    let case_value = self.parse_expression(false)?;
                    self.expect_punct(Punct::Colon, "symbol \":\"")?;
                    let body = self.parse_case_body(tok.pos)?;
                    cases.push(SwitchCase {
                        value: Some(case_value),
                        folded: 0,
                        body,
                        pos: tok.pos,
                    });
                }
                Token::Keyword(Keyword::Default) => {
                    if cases.iter().any(|c| c.value.is_none()) {
                        return Err(self.error_at(
                            ErrorKind::AlreadyDefined,
                            "switch already has a default case.",
                            tok.pos,
                            7,
                        ));
                    }
                    self.expect_punct(Punct::Colon, "symbol \":\"")?;
                    let body = self.parse_case_body(tok.pos)?;
                    cases.push(SwitchCase {
                        value: None,
                        folded: 0,
                        body,
                        pos: tok.pos,
                    });
                }
                _ => return Err(self.unexpected("\"case\", \"default\" or \"}\"")),
            }
        }

        Ok(Statement::Switch { value, cases, pos })
    }

    /// Statements until the next `case`/`default`/`}`.
    fn parse_case_body(&mut self, pos: Pos) -> Result<BlockNode> {
        self.push_scope();
        let mut block = BlockNode {
            statements: Vec::new(),
            pos,
        };
        let result = loop {
            match self.tokenizer.peek(0, true).token.clone() {
                Token::Eof => break Err(self.unexpected("symbol \"}\"")),
                Token::Bracket(Bracket::RCur)
                | Token::Keyword(Keyword::Case)
                | Token::Keyword(Keyword::Default) => break Ok(()),
                Token::Punct(Punct::SemiColon) => {
                    self.tokenizer.next();
                }
                _ => match self.parse_statement() {
                    Ok(stmt) => block.statements.push(stmt),
                    Err(e) => break Err(e),
                },
            }
        };
        self.pop_scope();
        result.map(|_| block)
    }

    // -- expressions --------------------------------------------------------

    fn parse_expression(&mut self, allow_assign: bool) -> Result<Expr> {
        let mut items: Vec<ExprItem> = Vec::new();

        loop {
            let tok = self.tokenizer.next();
            let mut expr: Expr;

            match tok.token {
                Token::Bracket(Bracket::LParen) => {
                    expr = self.parse_expression(false)?;
                    self.expect_bracket(Bracket::RParen, "symbol \")\"")?;
                }
                Token::Keyword(Keyword::This) => {
                    self.check_this_legal(tok.pos)?;
                    if self.tokenizer.peek(0, true).token == Token::Bracket(Bracket::LParen) {
                        self.tokenizer.next(); // eat "("
                        let args = self.parse_arguments()?;
                        expr = Expr::new(
                            ExprKind::Call {
                                base: Some(Box::new(Expr::new(ExprKind::This, tok.pos))),
                                method: None,
                                args,
                                is_compile_time: false,
                            },
                            tok.pos,
                        );
                    } else {
                        expr = Expr::new(ExprKind::This, tok.pos);
                    }
                }
                Token::Keyword(Keyword::Super) => {
                    self.check_super_legal(tok.pos)?;
                    if self.tokenizer.peek(0, true).token == Token::Bracket(Bracket::LParen) {
                        self.tokenizer.next(); // eat "("
                        let args = self.parse_arguments()?;
                        expr = Expr::new(
                            ExprKind::Call {
                                base: Some(Box::new(Expr::new(ExprKind::Super, tok.pos))),
                                method: None,
                                args,
                                is_compile_time: false,
                            },
                            tok.pos,
                        );
                    } else {
                        expr = Expr::new(ExprKind::Super, tok.pos);
                    }
                }
                Token::Value(value) => {
                    expr = Expr::const_value(value, tok.pos);
                }
                Token::Op(OpTk::Plus) => {
                    items.push(ExprItem::Op(OpType::Positive, tok.pos));
                    continue;
                }
                Token::Op(OpTk::Minus) => {
                    items.push(ExprItem::Op(OpType::Negative, tok.pos));
                    continue;
                }
                Token::Op(OpTk::Not) | Token::Keyword(Keyword::Not) => {
                    items.push(ExprItem::Op(OpType::Not, tok.pos));
                    continue;
                }
                Token::Op(OpTk::BitNot) => {
                    items.push(ExprItem::Op(OpType::BitNot, tok.pos));
                    continue;
                }
                Token::Identifier(name)
                    if self.tokenizer.peek(0, true).token == Token::Bracket(Bracket::LParen) =>
                {
                    self.tokenizer.next(); // eat "("
                    let args = self.parse_arguments()?;
                    if let Some(builtin) = BuiltinFunc::from_name(&name) {
                        expr = Expr::new(
                            ExprKind::Call {
                                base: Some(Box::new(Expr::new(
                                    ExprKind::BuiltinFunc(builtin),
                                    tok.pos,
                                ))),
                                method: None,
                                args,
                                is_compile_time: builtin.is_compiletime(),
                            },
                            tok.pos,
                        );
                    } else {
                        // could be a builtin-class ctor, another class, a
                        // function, a local callable; known when reducing
                        expr = Expr::new(
                            ExprKind::Call {
                                base: None,
                                method: Some(Box::new(Expr::new(
                                    ExprKind::Identifier {
                                        name,
                                        resolved: IdentRef::Unknown,
                                    },
                                    tok.pos,
                                ))),
                                args,
                                is_compile_time: false,
                            },
                            tok.pos,
                        );
                    }
                }
                Token::BuiltinType(ty)
                    if self.tokenizer.peek(0, true).token == Token::Bracket(Bracket::LParen) =>
                {
                    self.tokenizer.next(); // eat "("
                    let args = self.parse_arguments()?;
                    expr = Expr::new(
                        ExprKind::Call {
                            base: Some(Box::new(Expr::new(ExprKind::BuiltinType(ty), tok.pos))),
                            method: None,
                            args,
                            is_compile_time: false,
                        },
                        tok.pos,
                    );
                }
                Token::Identifier(name) => {
                    if let Some(builtin) = BuiltinFunc::from_name(&name) {
                        expr = Expr::new(ExprKind::BuiltinFunc(builtin), tok.pos);
                    } else {
                        expr = Expr::new(
                            ExprKind::Identifier {
                                name,
                                resolved: IdentRef::Unknown,
                            },
                            tok.pos,
                        );
                    }
                }
                Token::BuiltinType(ty) => {
                    expr = Expr::new(ExprKind::BuiltinType(ty), tok.pos);
                }
                Token::Bracket(Bracket::LSq) => {
                    expr = self.parse_array_literal(tok.pos)?;
                }
                Token::Bracket(Bracket::LCur) => {
                    expr = self.parse_map_literal(tok.pos)?;
                }
                _ => return Err(self.unexpected("an expression")),
            }

            // -- postfix chain: .name, .name(...), [key], (...) -------------
            loop {
                let peeked = self.tokenizer.peek(0, true).token.clone();
                match peeked {
                    Token::Punct(Punct::Dot) => {
                        self.tokenizer.next(); // eat "."
                        let (member, member_pos) = self.expect_identifier("a member name")?;
                        if self.tokenizer.peek(0, true).token == Token::Bracket(Bracket::LParen) {
                            self.tokenizer.next(); // eat "("
                            let args = self.parse_arguments()?;
                            expr = Expr::new(
                                ExprKind::Call {
                                    base: Some(Box::new(expr)),
                                    method: Some(Box::new(Expr::new(
                                        ExprKind::Identifier {
                                            name: member,
                                            resolved: IdentRef::Unknown,
                                        },
                                        member_pos,
                                    ))),
                                    args,
                                    is_compile_time: false,
                                },
                                member_pos,
                            );
                        } else {
                            expr = Expr::new(
                                ExprKind::Index {
                                    base: Box::new(expr),
                                    member,
                                    member_pos,
                                },
                                member_pos,
                            );
                        }
                    }
                    Token::Bracket(Bracket::LSq) => {
                        let pos = self.tokenizer.next().pos; // eat "["
                        let key = self.parse_expression(false)?;
                        self.expect_bracket(Bracket::RSq, "symbol \"]\"")?;
                        expr = Expr::new(
                            ExprKind::MappedIndex {
                                base: Box::new(expr),
                                key: Box::new(key),
                            },
                            pos,
                        );
                    }
                    Token::Bracket(Bracket::LParen) => {
                        let pos = self.tokenizer.next().pos; // eat "("
                        let args = self.parse_arguments()?;
                        expr = Expr::new(
                            ExprKind::Call {
                                base: Some(Box::new(expr)),
                                method: None,
                                args,
                                is_compile_time: false,
                            },
                            pos,
                        );
                    }
                    _ => break,
                }
            }

            items.push(ExprItem::Node(expr));

            // -- binary / assignment operator? ------------------------------
            let peeked = self.tokenizer.peek(0, true).token.clone();
            let op = match peeked {
                Token::Op(op_tk) => binary_op_of(op_tk),
                Token::Keyword(Keyword::And) => Some(OpType::And),
                Token::Keyword(Keyword::Or) => Some(OpType::Or),
                _ => None,
            };
            match op {
                Some(op) => {
                    let op_pos = self.tokenizer.next().pos; // eat the operator
                    items.push(ExprItem::Op(op, op_pos));
                }
                None => break,
            }
        }

        let tree = self.build_operator_tree(items)?;
        if !allow_assign && tree.is_assignment() {
            return Err(self.error_at(
                ErrorKind::SyntaxError,
                "assignment is not allowed inside an expression.",
                tree.pos,
                1,
            ));
        }
        Ok(tree)
    }

    fn parse_array_literal(&mut self, pos: Pos) -> Result<Expr> {
        let mut elements = Vec::new();
        let mut comma_valid = false;
        loop {
            match self.tokenizer.peek(0, true).token.clone() {
                Token::Eof => {
                    self.tokenizer.next();
                    return Err(self.unexpected("symbol \"]\""));
                }
                Token::Punct(Punct::Comma) => {
                    self.tokenizer.next();
                    if !comma_valid {
                        return Err(self.unexpected("an expression"));
                    }
                    comma_valid = false;
                }
                Token::Bracket(Bracket::RSq) => {
                    self.tokenizer.next();
                    break;
                }
                _ => {
                    if comma_valid {
                        self.tokenizer.next();
                        return Err(self.unexpected("symbol \",\""));
                    }
                    elements.push(self.parse_expression(false)?);
                    comma_valid = true;
                }
            }
        }
        Ok(Expr::new(ExprKind::Array(elements), pos))
    }

    fn parse_map_literal(&mut self, pos: Pos) -> Result<Expr> {
        let mut pairs = Vec::new();
        let mut comma_valid = false;
        loop {
            match self.tokenizer.peek(0, true).token.clone() {
                Token::Eof => {
                    self.tokenizer.next();
                    return Err(self.unexpected("symbol \"}\""));
                }
                Token::Punct(Punct::Comma) => {
                    self.tokenizer.next();
                    if !comma_valid {
                        return Err(self.unexpected("an expression"));
                    }
                    comma_valid = false;
                }
                Token::Bracket(Bracket::RCur) => {
                    self.tokenizer.next();
                    break;
                }
                _ => {
                    if comma_valid {
                        self.tokenizer.next();
                        return Err(self.unexpected("symbol \",\""));
                    }
                    let key = self.parse_expression(false)?;
                    self.expect_punct(Punct::Colon, "symbol \":\"")?;
                    let value = self.parse_expression(false)?;
                    pairs.push((key, value));
                    comma_valid = true;
                }
            }
        }
        Ok(Expr::new(ExprKind::Map(pairs), pos))
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.tokenizer.peek(0, true).token == Token::Bracket(Bracket::RParen) {
            self.tokenizer.next();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression(false)?);
            match self.tokenizer.next().token {
                Token::Punct(Punct::Comma) => {}
                Token::Bracket(Bracket::RParen) => break,
                _ => return Err(self.unexpected("symbol \",\" or \")\"")),
            }
        }
        Ok(args)
    }

    /// Reduce the scanned item sequence into a single tree: repeatedly take
    /// the tightest-binding operator (first on ties, so the left operand
    /// wins for equal precedence) and fold it with its operand(s). Unary
    /// runs collapse right-to-left. Nested assignments are rejected here.
    fn build_operator_tree(&mut self, mut items: Vec<ExprItem>) -> Result<Expr> {
        debug_assert!(!items.is_empty());

        while items.len() > 1 {
            let mut next_op: Option<usize> = None;
            let mut min_precedence = i32::MAX;
            let mut unary = false;

            for (i, item) in items.iter().enumerate() {
                if let ExprItem::Op(op, _) = item {
                    let precedence = op.precedence();
                    if precedence < min_precedence {
                        min_precedence = precedence;
                        next_op = Some(i);
                        unary = op.is_unary();
                    }
                }
            }

            let next_op = match next_op {
                Some(i) => i,
                None => {
                    return Err(self.error_at(
                        ErrorKind::SyntaxError,
                        "expected an operator.",
                        self.tokenizer.pos(),
                        1,
                    ));
                }
            };

            if unary {
                // find the operand this run of unary markers applies to
                let mut operand = next_op;
                while matches!(items[operand], ExprItem::Op(..)) {
                    operand += 1;
                    if operand == items.len() {
                        return Err(self.error_at(
                            ErrorKind::SyntaxError,
                            "expected an expression.",
                            self.tokenizer.pos(),
                            1,
                        ));
                    }
                }
                for i in (next_op..operand).rev() {
                    let (op, op_pos) = match &items[i] {
                        ExprItem::Op(op, pos) => (*op, *pos),
                        ExprItem::Node(_) => unreachable!("operand search stopped at a node"),
                    };
                    let arg = match items.remove(i + 1) {
                        ExprItem::Node(expr) => expr,
                        ExprItem::Op(..) => unreachable!("operand search stopped at a node"),
                    };
                    items[i] = ExprItem::Node(Expr::new(
                        ExprKind::Operator {
                            op,
                            args: vec![arg],
                        },
                        op_pos,
                    ));
                }
            } else {
                if next_op == 0 || next_op + 1 >= items.len() {
                    return Err(self.error_at(
                        ErrorKind::SyntaxError,
                        "expected an expression.",
                        self.tokenizer.pos(),
                        1,
                    ));
                }
                let rhs = match items.remove(next_op + 1) {
                    ExprItem::Node(expr) => expr,
                    ExprItem::Op(_, pos) => {
                        return Err(self.error_at(
                            ErrorKind::SyntaxError,
                            "expected an expression.",
                            pos,
                            1,
                        ));
                    }
                };
                let (op, op_pos) = match &items[next_op] {
                    ExprItem::Op(op, pos) => (*op, *pos),
                    ExprItem::Node(_) => unreachable!("selected index holds an operator"),
                };
                let lhs = match items.remove(next_op - 1) {
                    ExprItem::Node(expr) => expr,
                    ExprItem::Op(_, pos) => {
                        return Err(self.error_at(
                            ErrorKind::SyntaxError,
                            "expected an expression.",
                            pos,
                            1,
                        ));
                    }
                };
                for operand in [&lhs, &rhs] {
                    if operand.is_assignment() {
                        return Err(self.error_at(
                            ErrorKind::SyntaxError,
                            "unexpected assignment.",
                            operand.pos,
                            1,
                        ));
                    }
                }
                items[next_op - 1] = ExprItem::Node(Expr::new(
                    ExprKind::Operator {
                        op,
                        args: vec![lhs, rhs],
                    },
                    op_pos,
                ));
            }
        }

        match items.pop().expect("loop leaves exactly one item") {
            ExprItem::Node(expr) => Ok(expr),
            ExprItem::Op(_, pos) => {
                Err(self.error_at(ErrorKind::SyntaxError, "expected an expression.", pos, 1))
            }
        }
    }

    // -- context checks -----------------------------------------------------

    fn check_this_legal(&self, pos: Pos) -> Result<()> {
        let in_class = self.ctx.current_class.is_some();
        let static_func = matches!(self.ctx.current_func, Some((_, true)));
        let static_var = matches!(self.ctx.in_var_init, Some(true));
        if !in_class || static_func || static_var {
            return Err(self.error_at(
                ErrorKind::SyntaxError,
                "keyword \"this\" can only be used in non-static member functions.",
                pos,
                4,
            ));
        }
        Ok(())
    }

    fn check_super_legal(&self, pos: Pos) -> Result<()> {
        match &self.ctx.current_class {
            None => Err(self.error_at(
                ErrorKind::SyntaxError,
                "keyword \"super\" can only be used inside a class.",
                pos,
                5,
            )),
            Some((_, has_base)) => {
                if !*has_base {
                    return Err(self.error_at(
                        ErrorKind::SyntaxError,
                        "invalid use of \"super\": the class has no base.",
                        pos,
                        5,
                    ));
                }
                if self.ctx.current_func.is_none() {
                    return Err(self.error_at(
                        ErrorKind::SyntaxError,
                        "keyword \"super\" can only be used inside a class function.",
                        pos,
                        5,
                    ));
                }
                Ok(())
            }
        }
    }
}

fn binary_op_of(op: OpTk) -> Option<OpType> {
    Some(match op {
        OpTk::Eq => OpType::Eq,
        OpTk::EqEq => OpType::EqEq,
        OpTk::Plus => OpType::Plus,
        OpTk::PlusEq => OpType::PlusEq,
        OpTk::Minus => OpType::Minus,
        OpTk::MinusEq => OpType::MinusEq,
        OpTk::Mul => OpType::Mul,
        OpTk::MulEq => OpType::MulEq,
        OpTk::Div => OpType::Div,
        OpTk::DivEq => OpType::DivEq,
        OpTk::Mod => OpType::Mod,
        OpTk::ModEq => OpType::ModEq,
        OpTk::Lt => OpType::Lt,
        OpTk::LtEq => OpType::LtEq,
        OpTk::Gt => OpType::Gt,
        OpTk::GtEq => OpType::GtEq,
        OpTk::AndAnd => OpType::And,
        OpTk::OrOr => OpType::Or,
        OpTk::NotEq => OpType::NotEq,
        OpTk::Lshift => OpType::BitLshift,
        OpTk::LshiftEq => OpType::BitLshiftEq,
        OpTk::Rshift => OpType::BitRshift,
        OpTk::RshiftEq => OpType::BitRshiftEq,
        OpTk::BitOr => OpType::BitOr,
        OpTk::BitOrEq => OpType::BitOrEq,
        OpTk::BitAnd => OpType::BitAnd,
        OpTk::BitAndEq => OpType::BitAndEq,
        OpTk::BitXor => OpType::BitXor,
        OpTk::BitXorEq => OpType::BitXorEq,
        _ => return None,
    })
}

fn merge_unnamed_enum(slot: &mut Option<EnumNode>, e: EnumNode) {
    match slot {
        Some(existing) => existing.values.extend(e.values),
        None => *slot = Some(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_ok(source: &str) -> FileNode {
        parse(source, "test.cb").unwrap()
    }

    fn parse_err(source: &str) -> Error {
        parse(source, "test.cb").unwrap_err()
    }

    #[test]
    fn top_level_declarations() {
        let file = parse_ok("var x = 1; const C = 2; func f() {} class A {} enum E { V1 }");
        assert_eq!(file.vars.len(), 1);
        assert_eq!(file.constants.len(), 1);
        assert_eq!(file.functions.len(), 1);
        assert_eq!(file.classes.len(), 1);
        assert_eq!(file.enums.len(), 1);
    }

    #[test]
    fn precedence_builds_expected_tree() {
        // 1 + 2 * 3 => (+ 1 (* 2 3))
        let file = parse_ok("var x = 1 + 2 * 3;");
        let init = file.vars[0].assignment.as_ref().unwrap();
        match &init.kind {
            ExprKind::Operator { op, args } => {
                assert_eq!(*op, OpType::Plus);
                assert_eq!(args[0].as_const(), Some(&Var::Int(1)));
                match &args[1].kind {
                    ExprKind::Operator { op, .. } => assert_eq!(*op, OpType::Mul),
                    other => panic!("expected mul, got {:?}", other),
                }
            }
            other => panic!("expected operator, got {:?}", other),
        }
    }

    #[test]
    fn equal_precedence_is_left_associative() {
        // 1 - 2 + 3 => (+ (- 1 2) 3)
        let file = parse_ok("var x = 1 - 2 + 3;");
        let init = file.vars[0].assignment.as_ref().unwrap();
        match &init.kind {
            ExprKind::Operator { op, args } => {
                assert_eq!(*op, OpType::Plus);
                match &args[0].kind {
                    ExprKind::Operator { op, .. } => assert_eq!(*op, OpType::Minus),
                    other => panic!("expected minus on the left, got {:?}", other),
                }
            }
            other => panic!("expected operator, got {:?}", other),
        }
    }

    #[test]
    fn unary_run_collapses() {
        let file = parse_ok("var x = - - 1;");
        let init = file.vars[0].assignment.as_ref().unwrap();
        match &init.kind {
            ExprKind::Operator { op, args } => {
                assert_eq!(*op, OpType::Negative);
                assert!(matches!(
                    args[0].kind,
                    ExprKind::Operator {
                        op: OpType::Negative,
                        ..
                    }
                ));
            }
            other => panic!("expected operator, got {:?}", other),
        }
    }

    #[test]
    fn else_if_desugars_to_nested_if() {
        let file = parse_ok("func f(a) { if (a) { } else if (a) { } else { } }");
        let body = &file.functions[0].body;
        match &body.statements[0] {
            Statement::If { else_body, .. } => {
                let else_body = else_body.as_ref().unwrap();
                assert_eq!(else_body.statements.len(), 1);
                assert!(matches!(else_body.statements[0], Statement::If { .. }));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn nested_assignment_is_rejected() {
        let err = parse_err("func f(a, b) { var x = a = b; }");
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        let err = parse_err("func f(a, b) { f(1 + a = 2, b); }");
        assert_eq!(err.kind, ErrorKind::SyntaxError);
    }

    #[test]
    fn duplicate_names_raise_already_defined() {
        assert_eq!(parse_err("func f() {} func f() {}").kind, ErrorKind::AlreadyDefined);
        assert_eq!(parse_err("var a; func a() {}").kind, ErrorKind::AlreadyDefined);
        assert_eq!(
            parse_err("class A { var m; func m() {} }").kind,
            ErrorKind::AlreadyDefined
        );
        assert_eq!(
            parse_err("func f() { var x; var x; }").kind,
            ErrorKind::AlreadyDefined
        );
    }

    #[test]
    fn this_outside_class_is_rejected() {
        assert_eq!(parse_err("func f() { return this; }").kind, ErrorKind::SyntaxError);
        assert_eq!(
            parse_err("class A { static func f() { return this; } }").kind,
            ErrorKind::SyntaxError
        );
    }

    #[test]
    fn super_requires_base() {
        assert_eq!(
            parse_err("class A { func f() { return super.f(); } }").kind,
            ErrorKind::SyntaxError
        );
    }

    #[test]
    fn default_params_must_be_trailing() {
        assert_eq!(parse_err("func f(a = 1, b) {}").kind, ErrorKind::SyntaxError);
        parse_ok("func f(a, b = 2, c = 3) {}");
    }

    #[test]
    fn constructor_is_detected() {
        let file = parse_ok("class A { func A() {} func m() {} }");
        assert_eq!(file.classes[0].constructor, Some(0));
        assert!(file.classes[0].functions[0].is_constructor);
    }

    #[test]
    fn stray_statements_feed_module_init() {
        let file = parse_ok("var x = 1; print(x);");
        assert_eq!(file.init_items.len(), 2);
        assert!(matches!(file.init_items[0], InitItem::VarInit(0)));
        assert!(matches!(file.init_items[1], InitItem::Stmt(_)));
    }

    #[test]
    fn postfix_chains_parse() {
        let file = parse_ok("func f(a) { return a.b[1].c(2)(3); }");
        let body = &file.functions[0].body;
        match &body.statements[0] {
            Statement::Return { value: Some(expr), .. } => {
                // outermost is the (3) call on the result of .c(2)
                match &expr.kind {
                    ExprKind::Call { base, method, args, .. } => {
                        assert!(method.is_none());
                        assert_eq!(args.len(), 1);
                        assert!(matches!(
                            base.as_ref().unwrap().kind,
                            ExprKind::Call { .. }
                        ));
                    }
                    other => panic!("expected call, got {:?}", other),
                }
            }
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn switch_parses_cases_and_default() {
        let file = parse_ok(
            "func f(x) { switch (x) { case 1: return 1; case 2: return 2; default: return 0; } }",
        );
        match &file.functions[0].body.statements[0] {
            Statement::Switch { cases, .. } => {
                assert_eq!(cases.len(), 3);
                assert!(cases[2].value.is_none());
            }
            other => panic!("expected switch, got {:?}", other),
        }
    }

    #[test]
    fn foreach_parses() {
        let file = parse_ok("func f(a) { foreach (v : a) { print(v); } }");
        assert!(matches!(
            file.functions[0].body.statements[0],
            Statement::Foreach { .. }
        ));
    }

    #[test]
    fn import_declaration() {
        let file = parse_ok("import util = \"lib/util.cb\";");
        assert_eq!(file.imports[0].name, "util");
        assert_eq!(file.imports[0].path, "lib/util.cb");
    }

    #[test]
    fn keyword_logic_operators() {
        let file = parse_ok("var x = true and not false or false;");
        assert!(file.vars[0].assignment.is_some());
    }
}
