use crate::ast::{self, BinOp, Expr, Literal, Span, Stmt, UnaryOp};
use crate::value::Value;

use super::builtins;
use super::chunk::*;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("undefined function: {name}")]
    UndefinedFunction { name: String, span: Span },
    #[error("too many constants in one function (limit 256)")]
    TooManyConstants,
    #[error("too many global variables (limit 256)")]
    TooManyGlobals,
    #[error("too many local variables in '{function}' (limit 255)")]
    TooManyLocals { function: String },
    #[error("too many functions (limit 255)")]
    TooManyFunctions,
    #[error("too many arguments in call to '{name}' (limit 255)")]
    TooManyArguments { name: String },
    #[error("collection literal has {len} entries (limit 255)")]
    CollectionTooLarge { len: usize },
    #[error("jump distance does not fit in 16 bits")]
    JumpTooFar,
}

impl CompileError {
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::UndefinedFunction { .. } => "ZBY-C001",
            CompileError::TooManyConstants => "ZBY-C002",
            CompileError::TooManyGlobals => "ZBY-C003",
            CompileError::TooManyLocals { .. } => "ZBY-C004",
            CompileError::TooManyFunctions => "ZBY-C005",
            CompileError::TooManyArguments { .. } => "ZBY-C006",
            CompileError::CollectionTooLarge { .. } => "ZBY-C007",
            CompileError::JumpTooFar => "ZBY-C008",
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::UndefinedFunction { span, .. } => Some(*span),
            _ => None,
        }
    }
}

type CompileResult<T> = Result<T, CompileError>;

/// Optimization switches. `Default` turns everything on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Evaluate `+ - * /` over literal numbers at compile time.
    pub fold_constants: bool,
    /// CONSTANT_0 / CONSTANT_1 and the integer fast-path opcodes.
    pub specialize: bool,
    /// Compile only the taken branch of `if true` / `if false`.
    pub eliminate_dead_branches: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { fold_constants: true, specialize: true, eliminate_dead_branches: true }
    }
}

impl CompileOptions {
    pub fn unoptimized() -> Self {
        CompileOptions { fold_constants: false, specialize: false, eliminate_dead_branches: false }
    }
}

struct LoopContext {
    /// Known up front for `while`; `None` for `for`, whose step comes after the body.
    continue_target: Option<usize>,
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

struct Compiler {
    options: CompileOptions,
    functions: Vec<Function>,
    global_names: Vec<String>,
    libraries: Vec<String>,
    current: Chunk,
    /// Local slots of the function being compiled; `None` at top level.
    locals: Option<Vec<String>>,
    function_name: String,
    loops: Vec<LoopContext>,
}

impl Compiler {
    fn new(options: CompileOptions) -> Self {
        Compiler {
            options,
            functions: Vec::new(),
            global_names: Vec::new(),
            libraries: Vec::new(),
            current: Chunk::new(),
            locals: None,
            function_name: String::from("<main>"),
            loops: Vec::new(),
        }
    }

    fn compile_program(mut self, program: &ast::Program) -> CompileResult<Program> {
        self.compile_block(&program.statements)?;
        self.current.emit(OP_HALT);
        log::debug!(
            "compiled {} bytes of main code, {} functions, {} globals",
            self.current.code.len(),
            self.functions.len(),
            self.global_names.len()
        );
        Ok(Program {
            main: self.current,
            functions: self.functions,
            global_names: self.global_names,
            libraries: self.libraries,
        })
    }

    // ── Name resolution ──────────────────────────────────────────────

    fn resolve_local(&self, name: &str) -> Option<u8> {
        self.locals.as_ref()?.iter().position(|n| n == name).map(|i| i as u8)
    }

    fn add_local(&mut self, name: &str) -> CompileResult<u8> {
        let function = self.function_name.clone();
        let locals = self.locals.get_or_insert_with(Vec::new);
        if locals.len() >= 255 {
            return Err(CompileError::TooManyLocals { function });
        }
        locals.push(name.to_string());
        Ok((locals.len() - 1) as u8)
    }

    fn global_slot(&mut self, name: &str) -> CompileResult<u8> {
        if let Some(i) = self.global_names.iter().position(|n| n == name) {
            return Ok(i as u8);
        }
        if self.global_names.len() >= 256 {
            return Err(CompileError::TooManyGlobals);
        }
        self.global_names.push(name.to_string());
        Ok((self.global_names.len() - 1) as u8)
    }

    fn emit_get(&mut self, name: &str) -> CompileResult<()> {
        match self.resolve_local(name) {
            Some(slot) => self.current.emit_op(OP_GET_LOCAL, slot),
            None => {
                let id = self.global_slot(name)?;
                self.current.emit_op(OP_GET_GLOBAL, id)
            }
        };
        Ok(())
    }

    /// Store the top of stack into `name` (leaves it on the stack).
    /// Inside a function an unknown name becomes a new local.
    fn emit_set(&mut self, name: &str) -> CompileResult<()> {
        if let Some(slot) = self.resolve_local(name) {
            self.current.emit_op(OP_SET_LOCAL, slot);
        } else if self.locals.is_some() {
            let slot = self.add_local(name)?;
            self.current.emit_op(OP_SET_LOCAL, slot);
        } else {
            let id = self.global_slot(name)?;
            self.current.emit_op(OP_SET_GLOBAL, id);
        }
        Ok(())
    }

    // ── Emission helpers ─────────────────────────────────────────────

    fn emit_constant(&mut self, op: u8, val: Value) -> CompileResult<()> {
        let k = self.current.add_constant(val).ok_or(CompileError::TooManyConstants)?;
        self.current.emit_op(op, k);
        Ok(())
    }

    fn emit_number(&mut self, n: f64) -> CompileResult<()> {
        if self.options.specialize && n.to_bits() == 0f64.to_bits() {
            self.current.emit(OP_CONSTANT_0);
        } else if self.options.specialize && n == 1.0 {
            self.current.emit(OP_CONSTANT_1);
        } else {
            self.emit_constant(OP_CONSTANT, Value::Number(n))?;
        }
        Ok(())
    }

    fn patch(&mut self, operand_pos: usize) -> CompileResult<()> {
        if self.current.patch_jump(operand_pos) { Ok(()) } else { Err(CompileError::JumpTooFar) }
    }

    fn emit_loop(&mut self, target: usize) -> CompileResult<()> {
        if self.current.emit_loop(target) { Ok(()) } else { Err(CompileError::JumpTooFar) }
    }

    fn count(len: usize, err: impl FnOnce() -> CompileError) -> CompileResult<u8> {
        u8::try_from(len).map_err(|_| err())
    }

    // ── Statements ───────────────────────────────────────────────────

    fn compile_block(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Assign { name, value } => {
                self.compile_expr(value)?;
                self.emit_set(name)?;
                self.current.emit(OP_POP);
            }
            Stmt::IndexAssign { name, index, value } => {
                self.emit_get(name)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.current.emit(OP_INDEX_SET);
                self.emit_set(name)?;
                self.current.emit(OP_POP);
            }
            Stmt::FuncDef { name, params, body, .. } => self.compile_function(name, params, body)?,
            Stmt::Return(value) => {
                match value {
                    Some(expr) => self.compile_expr(expr)?,
                    None => {
                        self.current.emit(OP_NULL);
                    }
                }
                self.current.emit(OP_RET);
            }
            Stmt::If { condition, then_branch, else_branch } => {
                if self.options.eliminate_dead_branches {
                    if let Expr::Literal(Literal::Bool(taken)) = condition {
                        log::trace!("eliminating dead branch of constant if ({})", taken);
                        return match (taken, else_branch) {
                            (true, _) => self.compile_block(then_branch),
                            (false, Some(els)) => self.compile_block(els),
                            (false, None) => Ok(()),
                        };
                    }
                }
                self.compile_expr(condition)?;
                let else_jump = self.current.emit_jump(OP_JUMP_IF_FALSE);
                self.current.emit(OP_POP);
                self.compile_block(then_branch)?;
                let end_jump = self.current.emit_jump(OP_JUMP);
                self.patch(else_jump)?;
                self.current.emit(OP_POP);
                if let Some(els) = else_branch {
                    self.compile_block(els)?;
                }
                self.patch(end_jump)?;
            }
            Stmt::While { condition, body } => {
                let start = self.current.code.len();
                self.compile_expr(condition)?;
                let exit = self.current.emit_jump(OP_JUMP_IF_FALSE);
                self.current.emit(OP_POP);
                self.loops.push(LoopContext { continue_target: Some(start), breaks: Vec::new(), continues: Vec::new() });
                self.compile_block(body)?;
                self.emit_loop(start)?;
                self.finish_loop(exit)?;
            }
            Stmt::For { init, condition, step, body } => {
                self.compile_stmt(init)?;
                let start = self.current.code.len();
                self.compile_expr(condition)?;
                let exit = self.current.emit_jump(OP_JUMP_IF_FALSE);
                self.current.emit(OP_POP);
                self.loops.push(LoopContext { continue_target: None, breaks: Vec::new(), continues: Vec::new() });
                self.compile_block(body)?;
                let continues = self.loops.last_mut().map(|l| std::mem::take(&mut l.continues)).unwrap_or_default();
                for at in continues {
                    self.patch(at)?;
                }
                self.compile_stmt(step)?;
                self.emit_loop(start)?;
                self.finish_loop(exit)?;
            }
            Stmt::Break => {
                if self.loops.is_empty() {
                    self.current.emit(OP_BREAK);
                } else {
                    let at = self.current.emit_jump(OP_JUMP);
                    if let Some(ctx) = self.loops.last_mut() {
                        ctx.breaks.push(at);
                    }
                }
            }
            Stmt::Continue => match self.loops.last().map(|l| l.continue_target) {
                Some(Some(target)) => self.emit_loop(target)?,
                Some(None) => {
                    let at = self.current.emit_jump(OP_JUMP);
                    if let Some(ctx) = self.loops.last_mut() {
                        ctx.continues.push(at);
                    }
                }
                None => {
                    self.current.emit(OP_CONTINUE);
                }
            },
            Stmt::Use(library) => {
                if !self.libraries.contains(library) {
                    log::debug!("activating library '{}'", library);
                    self.libraries.push(library.clone());
                }
            }
            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.current.emit(OP_POP);
            }
        }
        Ok(())
    }

    /// Patch the loop's exit jump, emit the exit POP, and send breaks past it.
    fn finish_loop(&mut self, exit: usize) -> CompileResult<()> {
        self.patch(exit)?;
        self.current.emit(OP_POP);
        if let Some(ctx) = self.loops.pop() {
            for at in ctx.breaks {
                self.patch(at)?;
            }
        }
        Ok(())
    }

    fn compile_function(&mut self, name: &str, params: &[String], body: &[Stmt]) -> CompileResult<()> {
        let arity = Self::count(params.len(), || CompileError::TooManyArguments { name: name.to_string() })?;

        // A redefinition gets a new entry; calls compiled earlier keep the old body.
        if self.functions.len() >= BUILTIN_FID as usize {
            return Err(CompileError::TooManyFunctions);
        }
        // Register first so the body can call itself.
        let placeholder = Function { name: name.to_string(), arity, params: params.to_vec(), chunk: Chunk::new() };
        self.functions.push(placeholder);
        let fid = self.functions.len() - 1;

        let saved_chunk = std::mem::take(&mut self.current);
        let saved_locals = self.locals.replace(params.to_vec());
        let saved_loops = std::mem::take(&mut self.loops);
        let saved_name = std::mem::replace(&mut self.function_name, name.to_string());

        let result = self.compile_function_body(body);

        let chunk = std::mem::replace(&mut self.current, saved_chunk);
        self.locals = saved_locals;
        self.loops = saved_loops;
        self.function_name = saved_name;
        result?;

        log::trace!("compiled function '{}' (fid {}, {} bytes)", name, fid, chunk.code.len());
        self.functions[fid].chunk = chunk;
        Ok(())
    }

    fn compile_function_body(&mut self, body: &[Stmt]) -> CompileResult<()> {
        let frame = self.current.emit_op(OP_MAKEFRAME, 0);
        self.compile_block(body)?;
        if !matches!(body.last(), Some(Stmt::Return(_))) {
            self.emit_number(0.0)?;
            self.current.emit(OP_RET);
        }
        let slots = self.locals.as_ref().map_or(0, |l| l.len());
        let function = self.function_name.clone();
        let slots = Self::count(slots, || CompileError::TooManyLocals { function })?;
        self.current.code[frame + 1] = slots;
        Ok(())
    }

    // ── Expressions ──────────────────────────────────────────────────

    /// Evaluate an arithmetic tree over literal numbers.
    fn fold(expr: &Expr) -> Option<f64> {
        match expr {
            Expr::Literal(Literal::Number(n)) => Some(*n),
            Expr::UnaryOp { op: UnaryOp::Negate, operand } => Self::fold(operand).map(|n| -n),
            Expr::BinOp { op, left, right } if op.is_arithmetic() => {
                let (a, b) = (Self::fold(left)?, Self::fold(right)?);
                // Left for the VM so `x / 0` still raises DivisionByZero.
                if *op == BinOp::Divide && b == 0.0 {
                    return None;
                }
                Some(match op {
                    BinOp::Add => a + b,
                    BinOp::Subtract => a - b,
                    BinOp::Multiply => a * b,
                    _ => a / b,
                })
            }
            _ => None,
        }
    }

    fn is_int_literal(expr: &Expr) -> bool {
        expr.as_number_literal().is_some_and(Value::is_integral)
    }

    fn compile_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::Literal(Literal::Number(n)) => self.emit_number(*n)?,
            Expr::Literal(Literal::Text(s)) => self.emit_constant(OP_STRING, Value::Str(s.clone()))?,
            Expr::Literal(Literal::Bool(b)) => {
                self.current.emit(if *b { OP_TRUE } else { OP_FALSE });
            }
            Expr::Literal(Literal::Null) => {
                self.current.emit(OP_NULL);
            }
            Expr::Ident(name) => self.emit_get(name)?,
            Expr::Array(items) => {
                let n = Self::count(items.len(), || CompileError::CollectionTooLarge { len: items.len() })?;
                for item in items {
                    self.compile_expr(item)?;
                }
                self.current.emit_op(OP_ARRAY, n);
            }
            Expr::Map(pairs) => {
                let n = Self::count(pairs.len(), || CompileError::CollectionTooLarge { len: pairs.len() })?;
                for (key, value) in pairs {
                    self.emit_constant(OP_STRING, Value::Str(key.clone()))?;
                    self.compile_expr(value)?;
                }
                self.current.emit_op(OP_HASHMAP, n);
            }
            Expr::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.current.emit(OP_INDEX_GET);
            }
            Expr::BinOp { op: BinOp::And, left, right } => {
                self.compile_expr(left)?;
                let end = self.current.emit_jump(OP_JUMP_IF_FALSE);
                self.current.emit(OP_POP);
                self.compile_expr(right)?;
                self.patch(end)?;
            }
            Expr::BinOp { op: BinOp::Or, left, right } => {
                self.compile_expr(left)?;
                let else_jump = self.current.emit_jump(OP_JUMP_IF_FALSE);
                let end = self.current.emit_jump(OP_JUMP);
                self.patch(else_jump)?;
                self.current.emit(OP_POP);
                self.compile_expr(right)?;
                self.patch(end)?;
            }
            Expr::BinOp { op, left, right } => {
                if self.options.fold_constants && op.is_arithmetic() {
                    if let Some(n) = Self::fold(expr) {
                        return self.emit_number(n);
                    }
                }
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                let fast = self.options.specialize && Self::is_int_literal(left) && Self::is_int_literal(right);
                let opcode = match op {
                    BinOp::Add if fast => OP_ADD_INT,
                    BinOp::Subtract if fast => OP_SUB_INT,
                    BinOp::Multiply if fast => OP_MUL_INT,
                    BinOp::Add => OP_ADD,
                    BinOp::Subtract => OP_SUBTRACT,
                    BinOp::Multiply => OP_MULTIPLY,
                    BinOp::Divide => OP_DIVIDE,
                    BinOp::Equals => OP_EQUAL,
                    BinOp::NotEquals => OP_NOT_EQUAL,
                    BinOp::LessThan => OP_LESS,
                    BinOp::GreaterThan => OP_GREATER,
                    BinOp::LessOrEqual => OP_LESS_EQUAL,
                    BinOp::GreaterOrEqual => OP_GREATER_EQUAL,
                    BinOp::And | BinOp::Or => unreachable!("logical operators compile to jumps"),
                };
                self.current.emit(opcode);
            }
            Expr::UnaryOp { op, operand } => {
                self.compile_expr(operand)?;
                self.current.emit(match op {
                    UnaryOp::Negate => OP_NEGATE,
                    UnaryOp::Not => OP_NOT,
                });
            }
            Expr::Ternary { condition, then_expr, else_expr } => {
                self.compile_expr(condition)?;
                let else_jump = self.current.emit_jump(OP_JUMP_IF_FALSE);
                self.current.emit(OP_POP);
                self.compile_expr(then_expr)?;
                let end = self.current.emit_jump(OP_JUMP);
                self.patch(else_jump)?;
                self.current.emit(OP_POP);
                self.compile_expr(else_expr)?;
                self.patch(end)?;
            }
            Expr::Call { function, args, span } => self.compile_call(function, args, *span)?,
        }
        Ok(())
    }

    fn compile_call(&mut self, name: &str, args: &[Expr], span: Span) -> CompileResult<()> {
        let argc = Self::count(args.len(), || CompileError::TooManyArguments { name: name.to_string() })?;
        if name == "print" {
            for arg in args {
                self.compile_expr(arg)?;
            }
            self.current.emit_op(OP_PRINT, argc);
            return Ok(());
        }
        if builtins::lookup(name).is_some() {
            for arg in args {
                self.compile_expr(arg)?;
            }
            let k = self
                .current
                .add_constant(Value::Str(name.to_string()))
                .ok_or(CompileError::TooManyConstants)?;
            self.current.emit(OP_CALL);
            self.current.emit(BUILTIN_FID);
            self.current.emit(argc);
            self.current.emit(k);
            return Ok(());
        }
        let fid = self
            .functions
            .iter()
            .rposition(|f| f.name == name)
            .ok_or_else(|| CompileError::UndefinedFunction { name: name.to_string(), span })?;
        for arg in args {
            self.compile_expr(arg)?;
        }
        self.current.emit(OP_CALL);
        self.current.emit(fid as u8);
        self.current.emit(argc);
        Ok(())
    }
}

/// Compile a parsed program into bytecode.
pub fn compile(program: &ast::Program, options: CompileOptions) -> Result<Program, CompileError> {
    Compiler::new(options).compile_program(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer, parser};

    fn compile_with(source: &str, options: CompileOptions) -> Result<Program, CompileError> {
        let program = parser::parse(lexer::lex(source).unwrap()).unwrap();
        compile(&program, options)
    }

    fn compile_src(source: &str) -> Program {
        compile_with(source, CompileOptions::default()).unwrap()
    }

    #[test]
    fn assignment_is_stack_neutral() {
        let prog = compile_src("x = 5");
        assert_eq!(prog.main.opcodes(), vec![OP_CONSTANT, OP_SET_GLOBAL, OP_POP, OP_HALT]);
        assert_eq!(prog.global_names, vec!["x".to_string()]);
    }

    #[test]
    fn folding_collapses_literal_arithmetic() {
        let prog = compile_src("x = 2 * 3 + 4");
        assert_eq!(prog.main.opcodes(), vec![OP_CONSTANT, OP_SET_GLOBAL, OP_POP, OP_HALT]);
        assert_eq!(prog.main.constants[0], Value::Number(10.0));
    }

    #[test]
    fn folding_leaves_division_by_zero() {
        let prog = compile_src("x = 1 / 0");
        assert!(prog.main.opcodes().contains(&OP_DIVIDE));
    }

    #[test]
    fn int_fast_path_without_folding() {
        let options = CompileOptions { fold_constants: false, ..CompileOptions::default() };
        let prog = compile_with("x = 2 + 3\ny = 4 * 5\nz = 2.5 + 1", options).unwrap();
        let ops = prog.main.opcodes();
        assert!(ops.contains(&OP_ADD_INT));
        assert!(ops.contains(&OP_MUL_INT));
        // a fractional operand keeps the general opcode
        assert!(ops.contains(&OP_ADD));
    }

    #[test]
    fn unoptimized_uses_general_opcodes() {
        let prog = compile_with("x = 1 + 0", CompileOptions::unoptimized()).unwrap();
        assert_eq!(
            prog.main.opcodes(),
            vec![OP_CONSTANT, OP_CONSTANT, OP_ADD, OP_SET_GLOBAL, OP_POP, OP_HALT]
        );
    }

    #[test]
    fn small_constants_specialized() {
        let prog = compile_src("a = 0\nb = 1");
        let ops = prog.main.opcodes();
        assert!(ops.contains(&OP_CONSTANT_0));
        assert!(ops.contains(&OP_CONSTANT_1));
        assert!(prog.main.constants.is_empty());
    }

    #[test]
    fn constant_if_has_no_conditional_jump() {
        let prog = compile_src("if (true) { print(\"a\") } else { print(\"b\") }");
        assert!(!prog.main.opcodes().contains(&OP_JUMP_IF_FALSE));
        assert_eq!(prog.main.constants, vec![Value::from("a")]);

        let kept = compile_with("if (true) { print(\"a\") }", CompileOptions::unoptimized()).unwrap();
        assert!(kept.main.opcodes().contains(&OP_JUMP_IF_FALSE));
    }

    #[test]
    fn while_loop_jumps_back_to_condition() {
        let prog = compile_src("x = 1\nwhile (x < 4) { x = x + 1 }");
        assert!(prog.main.verify().is_ok());
        let listing = prog.main.disassemble("main");
        assert!(listing.contains("JUMP_IF_FALSE"));
        // back-edge lands on the condition's first instruction (offset 4, after `x = 1`)
        assert!(listing.lines().any(|l| l.contains(" JUMP ") && l.ends_with("-> 0004")));
    }

    #[test]
    fn function_gets_its_own_chunk() {
        let prog = compile_src("func add(a, b) { return a + b }\nprint(add(2, 3))");
        assert_eq!(prog.functions.len(), 1);
        let f = &prog.functions[0];
        assert_eq!(f.arity, 2);
        assert_eq!(
            f.chunk.opcodes(),
            vec![OP_MAKEFRAME, OP_GET_LOCAL, OP_GET_LOCAL, OP_ADD, OP_RET]
        );
        assert_eq!(f.chunk.code[1], 2);
        assert!(prog.main.opcodes().contains(&OP_CALL));
    }

    #[test]
    fn function_locals_reserved_by_makeframe() {
        let prog = compile_src("func f(a) { b = a * 2\nc = b + 1\nreturn c }");
        assert_eq!(prog.functions[0].chunk.code[1], 3);
        assert!(prog.global_names.is_empty());
    }

    #[test]
    fn fallthrough_returns_zero() {
        let prog = compile_src("func f() { print(1) }");
        let ops = prog.functions[0].chunk.opcodes();
        assert_eq!(&ops[ops.len() - 2..], &[OP_CONSTANT_0, OP_RET]);
    }

    #[test]
    fn recursion_resolves_own_name() {
        let prog = compile_src("func fact(n) { return n < 2 ? 1 : n * fact(n - 1) }");
        assert!(prog.functions[0].chunk.opcodes().contains(&OP_CALL));
    }

    #[test]
    fn builtin_call_by_name() {
        let prog = compile_src("n = len([1, 2, 3])");
        assert!(prog.main.constants.contains(&Value::from("len")));
        assert!(prog.main.disassemble("main").contains("len argc=1"));
    }

    #[test]
    fn undefined_function_is_compile_error() {
        let err = compile_with("nope(1)", CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::UndefinedFunction { ref name, .. } if name == "nope"));
        assert_eq!(err.code(), "ZBY-C001");
        assert_eq!(err.span(), Some(Span { start: 0, end: 7 }));
    }

    #[test]
    fn break_outside_loop_emits_opcode() {
        let prog = compile_src("break");
        assert_eq!(prog.main.opcodes(), vec![OP_BREAK, OP_HALT]);
        let prog = compile_src("while (true) { func f() { continue } }");
        assert!(prog.functions[0].chunk.opcodes().contains(&OP_CONTINUE));
    }

    #[test]
    fn break_inside_loop_is_a_jump() {
        let prog = compile_src("while (true) { break }\nfor (i = 0; i < 3; i = i + 1) { continue }");
        let ops = prog.main.opcodes();
        assert!(!ops.contains(&OP_BREAK));
        assert!(!ops.contains(&OP_CONTINUE));
        assert!(prog.main.verify().is_ok());
    }

    #[test]
    fn use_records_library_once() {
        let prog = compile_src("use math\nuse io\nuse math");
        assert_eq!(prog.libraries, vec!["math".to_string(), "io".to_string()]);
        assert_eq!(prog.main.opcodes(), vec![OP_HALT]);
    }

    #[test]
    fn too_many_constants() {
        let source: String = (0..300).map(|i| format!("print({}.5)\n", i)).collect();
        let err = compile_with(&source, CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::TooManyConstants));
    }

    #[test]
    fn too_many_globals() {
        let source: String = (0..257).map(|i| format!("v{} = 2\n", i)).collect();
        let err = compile_with(&source, CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::TooManyGlobals));
    }

    #[test]
    fn redefinition_appends_and_later_calls_take_the_newest() {
        let prog = compile_src("func f() { return 1 }\nprint(f())\nfunc f(a) { return a }\nprint(f(2))");
        assert_eq!(prog.functions.len(), 2);
        assert_eq!(prog.functions[0].arity, 0);
        assert_eq!(prog.functions[1].arity, 1);
        let listing = prog.main.disassemble("main");
        let calls: Vec<&str> = listing.lines().filter(|l| l.contains("CALL")).collect();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("fn#0"), "{}", listing);
        assert!(calls[1].contains("fn#1"), "{}", listing);
    }

    #[test]
    fn collection_over_255_entries() {
        let items = vec!["2"; 256].join(", ");
        let err = compile_with(&format!("a = [{}]", items), CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::CollectionTooLarge { len: 256 }));
        assert_eq!(err.code(), "ZBY-C007");

        let pairs: Vec<String> = (0..256).map(|i| format!("k{}: 1", i)).collect();
        let err = compile_with(&format!("m = {{{}}}", pairs.join(", ")), CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::CollectionTooLarge { len: 256 }));

        let items = vec!["2"; 255].join(", ");
        assert!(compile_with(&format!("a = [{}]", items), CompileOptions::default()).is_ok());
    }

    #[test]
    fn too_many_locals() {
        let body: String = (0..256).map(|i| format!("v{} = 1\n", i)).collect();
        let err = compile_with(&format!("func f() {{\n{}}}", body), CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::TooManyLocals { ref function } if function == "f"));
        assert_eq!(err.code(), "ZBY-C004");
    }

    #[test]
    fn too_many_functions() {
        let source: String = (0..256).map(|i| format!("func f{}() {{ return 1 }}\n", i)).collect();
        let err = compile_with(&source, CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::TooManyFunctions));

        // redefinitions take table entries too
        let source = "func f() { return 1 }\n".repeat(256);
        let err = compile_with(&source, CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::TooManyFunctions));
    }

    #[test]
    fn too_many_arguments() {
        let args = vec!["1"; 256].join(", ");
        let err = compile_with(&format!("print({})", args), CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::TooManyArguments { ref name } if name == "print"));
    }

    #[test]
    fn jump_too_far() {
        let body = "x = x + 1\n".repeat(5000);
        let err = compile_with(&format!("x = 0\nif (x) {{\n{}}}", body), CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::JumpTooFar));
        assert_eq!(err.code(), "ZBY-C008");
    }

    #[test]
    fn index_assignment_writes_back() {
        let prog = compile_src("a = [1, 2]\na[0] = 5");
        let ops = prog.main.opcodes();
        let tail = &ops[ops.len() - 7..];
        assert_eq!(
            tail,
            &[OP_GET_GLOBAL, OP_CONSTANT_0, OP_CONSTANT, OP_INDEX_SET, OP_SET_GLOBAL, OP_POP, OP_HALT]
        );
    }
}
