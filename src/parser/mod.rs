use crate::ast::*;
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .or_else(|| self.tokens.last().map(|(_, s)| Span { start: s.end, end: s.end }))
            .unwrap_or(Span::UNKNOWN)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.advance();
                Ok(span)
            }
            Some(tok) => Err(self.error("ZBY-P001", format!("expected {:?}, got {:?}", expected, tok))),
            None => Err(self.error("ZBY-P002", format!("expected {:?}, got EOF", expected))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            Some(tok) => Err(self.error("ZBY-P001", format!("expected identifier, got {:?}", tok))),
            None => Err(self.error("ZBY-P002", "expected identifier, got EOF".into())),
        }
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError {
            code,
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // ---- Statements ----

    pub fn parse_program(&mut self) -> Result<Program> {
        let mut statements = Vec::new();
        while !self.at_end() {
            statements.push(self.parse_stmt()?);
        }
        Ok(Program { statements })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while !matches!(self.peek(), None | Some(Token::RBrace)) {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let stmt = match self.peek() {
            Some(Token::Use) => {
                self.advance();
                Stmt::Use(self.expect_ident()?)
            }
            Some(Token::Func) => self.parse_func_def()?,
            Some(Token::Return) => {
                self.advance();
                if matches!(self.peek(), None | Some(Token::RBrace) | Some(Token::Semi)) {
                    Stmt::Return(None)
                } else {
                    Stmt::Return(Some(self.parse_expr()?))
                }
            }
            Some(Token::Break) => {
                self.advance();
                Stmt::Break
            }
            Some(Token::Continue) => {
                self.advance();
                Stmt::Continue
            }
            Some(Token::If) => self.parse_if()?,
            Some(Token::While) => {
                self.advance();
                let condition = self.parse_expr()?;
                let body = self.parse_block()?;
                Stmt::While { condition, body }
            }
            Some(Token::For) => self.parse_for()?,
            Some(Token::Try) | Some(Token::Catch) | Some(Token::Throw) => {
                let tok = self.peek().cloned();
                return Err(self.error(
                    "ZBY-P003",
                    format!("{:?} is reserved but exceptions are not supported", tok.unwrap_or(Token::Try)),
                ));
            }
            _ => self.parse_simple_stmt()?,
        };
        self.eat(&Token::Semi);
        Ok(stmt)
    }

    /// Assignment, index assignment, or a bare expression.
    fn parse_simple_stmt(&mut self) -> Result<Stmt> {
        let target_span = self.peek_span();
        let expr = self.parse_expr()?;
        if !self.eat(&Token::Assign) {
            return Ok(Stmt::Expr(expr));
        }
        let value = self.parse_expr()?;
        match expr {
            Expr::Ident(name) => Ok(Stmt::Assign { name, value }),
            Expr::Index { object, index } => match *object {
                Expr::Ident(name) => Ok(Stmt::IndexAssign { name, index: *index, value }),
                _ => Err(ParseError {
                    code: "ZBY-P004",
                    position: self.pos,
                    span: target_span,
                    message: "only a variable can be indexed on the left of '='".into(),
                }),
            },
            _ => Err(ParseError {
                code: "ZBY-P004",
                position: self.pos,
                span: target_span,
                message: "invalid assignment target".into(),
            }),
        }
    }

    fn parse_func_def(&mut self) -> Result<Stmt> {
        let start = self.expect(&Token::Func)?;
        let name = self.expect_ident()?;
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            params.push(self.expect_ident()?);
            while self.eat(&Token::Comma) {
                params.push(self.expect_ident()?);
            }
        }
        let end = self.expect(&Token::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::FuncDef { name, params, body, span: start.merge(end) })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.expect(&Token::If)?;
        let condition = self.parse_expr()?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.eat(&Token::Else) {
            if self.peek() == Some(&Token::If) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If { condition, then_branch, else_branch })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        self.expect(&Token::For)?;
        self.expect(&Token::LParen)?;
        let init = self.parse_simple_stmt()?;
        self.eat(&Token::Semi);
        let condition = self.parse_expr()?;
        self.eat(&Token::Semi);
        let step = self.parse_simple_stmt()?;
        self.expect(&Token::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::For {
            init: Box::new(init),
            condition,
            step: Box::new(step),
            body,
        })
    }

    // ---- Expressions, lowest precedence first ----

    fn parse_expr(&mut self) -> Result<Expr> {
        let condition = self.parse_or()?;
        if !self.eat(&Token::Question) {
            return Ok(condition);
        }
        let then_expr = self.parse_expr()?;
        self.expect(&Token::Colon)?;
        let else_expr = self.parse_expr()?;
        Ok(Expr::Ternary {
            condition: Box::new(condition),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        })
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = binop(BinOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_comparison()?;
        while self.eat(&Token::And) {
            let right = self.parse_comparison()?;
            left = binop(BinOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Less) => BinOp::LessThan,
                Some(Token::Greater) => BinOp::GreaterThan,
                Some(Token::LessEq) => BinOp::LessOrEqual,
                Some(Token::GreaterEq) => BinOp::GreaterOrEqual,
                Some(Token::EqEq) => BinOp::Equals,
                Some(Token::NotEq) => BinOp::NotEquals,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = binop(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Subtract,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_term()?;
            left = binop(op, left, right);
        }
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Multiply,
                Some(Token::Slash) => BinOp::Divide,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binop(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Negate,
            Some(Token::Bang) | Some(Token::Not) => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Expr::UnaryOp { op, operand: Box::new(operand) })
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_atom()?;
        while self.eat(&Token::LBracket) {
            let index = self.parse_expr()?;
            self.expect(&Token::RBracket)?;
            expr = Expr::Index { object: Box::new(expr), index: Box::new(index) };
        }
        Ok(expr)
    }

    /// Parse an atom, the smallest expression unit
    fn parse_atom(&mut self) -> Result<Expr> {
        let span = self.peek_span();
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.advance();
                Ok(Expr::Literal(Literal::Number(n)))
            }
            Some(Token::Text(s)) => {
                self.advance();
                Ok(Expr::Literal(Literal::Text(s)))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            Some(Token::Null) => {
                self.advance();
                Ok(Expr::Literal(Literal::Null))
            }
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Some(Token::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    items.push(self.parse_expr()?);
                    while self.eat(&Token::Comma) {
                        if self.peek() == Some(&Token::RBracket) {
                            break; // trailing comma
                        }
                        items.push(self.parse_expr()?);
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::Array(items))
            }
            Some(Token::LBrace) => {
                self.advance();
                let mut pairs = Vec::new();
                if self.peek() != Some(&Token::RBrace) {
                    pairs.push(self.parse_map_entry()?);
                    while self.eat(&Token::Comma) {
                        if self.peek() == Some(&Token::RBrace) {
                            break;
                        }
                        pairs.push(self.parse_map_entry()?);
                    }
                }
                self.expect(&Token::RBrace)?;
                Ok(Expr::Map(pairs))
            }
            Some(Token::Ident(name)) => {
                self.advance();
                if !self.eat(&Token::LParen) {
                    return Ok(Expr::Ident(name));
                }
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    args.push(self.parse_expr()?);
                    while self.eat(&Token::Comma) {
                        args.push(self.parse_expr()?);
                    }
                }
                let end = self.expect(&Token::RParen)?;
                Ok(Expr::Call { function: name, args, span: span.merge(end) })
            }
            Some(tok) => Err(self.error("ZBY-P001", format!("expected expression, got {:?}", tok))),
            None => Err(self.error("ZBY-P002", "expected expression, got EOF".into())),
        }
    }

    fn parse_map_entry(&mut self) -> Result<(String, Expr)> {
        let key = match self.peek().cloned() {
            Some(Token::Ident(k)) | Some(Token::Text(k)) => {
                self.advance();
                k
            }
            Some(tok) => {
                return Err(self.error("ZBY-P001", format!("expected map key, got {:?}", tok)));
            }
            None => return Err(self.error("ZBY-P002", "expected map key, got EOF".into())),
        };
        self.expect(&Token::Colon)?;
        Ok((key, self.parse_expr()?))
    }
}

fn binop(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::BinOp { op, left: Box::new(left), right: Box::new(right) }
}

/// Parse lexer output (tokens with byte ranges) into a program.
pub fn parse(tokens: Vec<(Token, std::ops::Range<usize>)>) -> Result<Program> {
    let tokens = tokens.into_iter().map(|(t, r)| (t, Span::from(r))).collect();
    Parser::new(tokens).parse_program()
}
