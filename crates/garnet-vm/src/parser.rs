//! Recursive-descent parser.
//!
//! Produces an [`ast::TopBody`] with local variables already resolved to
//! environment slots. Parsing stops at the first syntax error; lexer errors
//! are reported together before any parsing happens.

use crate::ast::*;
use crate::lexer::{Keyword, LexError, Lexer, Spanned, StrSeg, Token};
use std::fmt;
use std::sync::Arc;

/// A diagnostic with a source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserMessage {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl fmt::Display for ParserMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}:{}: {}", self.line, self.col, self.message)
    }
}

impl From<LexError> for ParserMessage {
    fn from(e: LexError) -> Self {
        Self {
            line: e.line,
            col: e.col,
            message: e.message,
        }
    }
}

/// Result of parsing one source unit.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub tree: Option<Arc<TopBody>>,
    /// Top-level local variable names after parsing, for compile contexts.
    pub locals: Vec<String>,
    pub warnings: Vec<ParserMessage>,
    pub errors: Vec<ParserMessage>,
}

impl ParseOutcome {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty() && self.tree.is_some()
    }
}

/// Parse `source`. `locals` pre-declares top-level variables carried over
/// from earlier runs.
pub fn parse(source: &str, file: Option<Arc<str>>, locals: &[String]) -> ParseOutcome {
    let (tokens, lex_errors) = Lexer::new(source).tokenize();
    if !lex_errors.is_empty() {
        return ParseOutcome {
            errors: lex_errors.into_iter().map(ParserMessage::from).collect(),
            ..ParseOutcome::default()
        };
    }
    let mut parser = Parser::new(tokens, file.clone());
    parser.scopes.push(Scope {
        kind: ScopeKind::Top,
        vars: locals.to_vec(),
    });
    match parser.parse_program() {
        Ok(body) => {
            let vars = parser.scopes.pop().map(|s| s.vars).unwrap_or_default();
            ParseOutcome {
                tree: Some(Arc::new(TopBody {
                    body,
                    nlocals: vars.len(),
                    file,
                })),
                locals: vars,
                warnings: parser.warnings,
                errors: Vec::new(),
            }
        }
        Err(e) => ParseOutcome {
            tree: None,
            locals: locals.to_vec(),
            warnings: parser.warnings,
            errors: vec![e],
        },
    }
}

type PResult<T> = Result<T, ParserMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Top,
    Def,
    Class,
    Block,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    vars: Vec<String>,
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    scopes: Vec<Scope>,
    warnings: Vec<ParserMessage>,
    file: Option<Arc<str>>,
    /// Non-zero while a `do` belongs to an enclosing construct.
    no_do: u32,
}

impl Parser {
    fn new(tokens: Vec<Spanned>, file: Option<Arc<str>>) -> Self {
        Self {
            tokens,
            pos: 0,
            scopes: Vec::new(),
            warnings: Vec::new(),
            file,
            no_do: 0,
        }
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    fn cur(&self) -> &Spanned {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn spanned_at(&self, n: usize) -> &Spanned {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn peek_at(&self, n: usize) -> &Token {
        &self.spanned_at(n).token
    }

    fn line(&self) -> u32 {
        self.cur().line
    }

    fn advance(&mut self) -> Token {
        let tok = self.cur().token.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, t: &Token) -> bool {
        self.peek() == t
    }

    fn is_kw(&self, k: Keyword) -> bool {
        matches!(self.peek(), Token::Kw(x) if *x == k)
    }

    fn eat(&mut self, t: &Token) -> bool {
        if self.check(t) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, k: Keyword) -> bool {
        if self.is_kw(k) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, t: Token) -> PResult<()> {
        if self.eat(&t) {
            Ok(())
        } else {
            let expected = match t {
                Token::RParen => "')'",
                Token::RBracket => "']'",
                Token::RBrace => "'}'",
                Token::Pipe => "'|'",
                Token::Colon => "':'",
                Token::FatArrow => "'=>'",
                _ => "token",
            };
            self.unexpected_expecting(expected)
        }
    }

    fn expect_kw(&mut self, k: Keyword) -> PResult<()> {
        if self.eat_kw(k) {
            Ok(())
        } else {
            self.unexpected_expecting(&format!("'{}'", k.as_str()))
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&Token::Newline) {
            self.advance();
        }
    }

    fn skip_terms(&mut self) {
        while matches!(self.peek(), Token::Newline | Token::Semi) {
            self.advance();
        }
    }

    fn error_here(&self, message: String) -> ParserMessage {
        let tok = self.cur();
        ParserMessage {
            line: tok.line,
            col: tok.col,
            message,
        }
    }

    fn unexpected<T>(&self) -> PResult<T> {
        Err(self.error_here(format!(
            "syntax error, unexpected {}",
            self.peek().describe()
        )))
    }

    fn unexpected_expecting<T>(&self, expected: &str) -> PResult<T> {
        Err(self.error_here(format!(
            "syntax error, unexpected {}, expecting {}",
            self.peek().describe(),
            expected
        )))
    }

    fn warn(&mut self, line: u32, col: u32, message: &str) {
        self.warnings.push(ParserMessage {
            line,
            col,
            message: message.to_string(),
        });
    }

    fn with_no_do<T>(&mut self, no_do: u32, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let saved = std::mem::replace(&mut self.no_do, no_do);
        let result = f(self);
        self.no_do = saved;
        result
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    fn push_scope(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope {
            kind,
            vars: Vec::new(),
        });
    }

    fn pop_scope(&mut self) -> usize {
        self.scopes.pop().map(|s| s.vars.len()).unwrap_or(0)
    }

    fn lookup_local(&self, name: &str) -> Option<LocalRef> {
        let mut depth = 0;
        for scope in self.scopes.iter().rev() {
            if let Some(i) = scope.vars.iter().position(|v| v == name) {
                return Some(LocalRef {
                    depth,
                    index: i as u32,
                });
            }
            if scope.kind != ScopeKind::Block {
                return None;
            }
            depth += 1;
        }
        None
    }

    fn declare(&mut self, name: &str) -> LocalRef {
        if let Some(r) = self.lookup_local(name) {
            return r;
        }
        LocalRef {
            depth: 0,
            index: self.declare_param(name),
        }
    }

    /// Declare a parameter slot in the innermost scope.
    fn declare_param(&mut self, name: &str) -> u32 {
        if self.scopes.is_empty() {
            self.push_scope(ScopeKind::Top);
        }
        let scope = self.scopes.len() - 1;
        let vars = &mut self.scopes[scope].vars;
        vars.push(name.to_string());
        (vars.len() - 1) as u32
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_program(&mut self) -> PResult<Vec<Node>> {
        let body = self.parse_stmts()?;
        if !self.check(&Token::Eof) {
            return self.unexpected();
        }
        Ok(body)
    }

    fn at_body_end(&self) -> bool {
        matches!(
            self.peek(),
            Token::Eof
                | Token::RBrace
                | Token::RParen
                | Token::Kw(
                    Keyword::End
                        | Keyword::Else
                        | Keyword::Elsif
                        | Keyword::When
                        | Keyword::Rescue
                        | Keyword::Ensure
                )
        )
    }

    fn parse_stmts(&mut self) -> PResult<Vec<Node>> {
        let mut stmts = Vec::new();
        loop {
            self.skip_terms();
            if self.at_body_end() {
                break;
            }
            stmts.push(self.parse_stmt()?);
            if !matches!(self.peek(), Token::Newline | Token::Semi) && !self.at_body_end() {
                return self.unexpected();
            }
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> PResult<Node> {
        let mut node = if self.looks_like_multi_assign() {
            self.parse_multi_assign()?
        } else {
            self.parse_expr_stmt()?
        };
        loop {
            let line = self.line();
            match self.peek() {
                Token::Kw(Keyword::If) => {
                    self.advance();
                    let cond = self.parse_condition()?;
                    node = Node::new(
                        NodeKind::If {
                            cond: Box::new(cond),
                            then_body: vec![node],
                            else_body: Vec::new(),
                        },
                        line,
                    );
                }
                Token::Kw(Keyword::Unless) => {
                    self.advance();
                    let cond = self.parse_condition()?;
                    node = Node::new(
                        NodeKind::If {
                            cond: Box::new(cond),
                            then_body: Vec::new(),
                            else_body: vec![node],
                        },
                        line,
                    );
                }
                Token::Kw(k @ (Keyword::While | Keyword::Until)) => {
                    let until = *k == Keyword::Until;
                    self.advance();
                    let cond = self.parse_condition()?;
                    node = Node::new(
                        NodeKind::While {
                            cond: Box::new(cond),
                            body: vec![node],
                            until,
                        },
                        line,
                    );
                }
                Token::Kw(Keyword::Rescue) => {
                    self.advance();
                    let fallback = self.parse_expr_stmt()?;
                    node = Node::new(
                        NodeKind::Begin(Box::new(BeginBlock {
                            body: vec![node],
                            rescues: vec![RescueClause {
                                classes: Vec::new(),
                                var: None,
                                body: vec![fallback],
                            }],
                            else_body: None,
                            ensure: None,
                        })),
                        line,
                    );
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_condition(&mut self) -> PResult<Node> {
        let (line, col) = (self.cur().line, self.cur().col);
        let cond = self.parse_expr_stmt()?;
        let literal_assign = match &cond.kind {
            NodeKind::LocalSet(_, v) | NodeKind::IvarSet(_, v) | NodeKind::GvarSet(_, v) => {
                is_literal(v)
            }
            _ => false,
        };
        if literal_assign {
            self.warn(line, col, "found '= literal' in conditional, should be ==");
        }
        Ok(cond)
    }

    fn parse_expr_stmt(&mut self) -> PResult<Node> {
        let mut left = self.parse_not_expr()?;
        loop {
            let line = self.line();
            if self.eat_kw(Keyword::And) {
                self.skip_newlines();
                let right = self.parse_not_expr()?;
                left = Node::new(NodeKind::And(Box::new(left), Box::new(right)), line);
            } else if self.eat_kw(Keyword::Or) {
                self.skip_newlines();
                let right = self.parse_not_expr()?;
                left = Node::new(NodeKind::Or(Box::new(left), Box::new(right)), line);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_not_expr(&mut self) -> PResult<Node> {
        let line = self.line();
        if self.eat_kw(Keyword::Not) {
            let inner = self.parse_not_expr()?;
            return Ok(Node::new(NodeKind::Not(Box::new(inner)), line));
        }
        self.parse_expr()
    }

    fn parse_expr(&mut self) -> PResult<Node> {
        self.parse_assignment()
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    fn looks_like_multi_assign(&self) -> bool {
        let mut i = 0;
        let mut targets = 0;
        loop {
            match self.peek_at(i) {
                Token::Ident(name) if !name.ends_with(['?', '!']) => {}
                Token::Ivar(_) | Token::Gvar(_) => {}
                _ => return false,
            }
            targets += 1;
            i += 1;
            match self.peek_at(i) {
                Token::Comma => i += 1,
                Token::Assign => return targets > 1,
                _ => return false,
            }
        }
    }

    fn parse_multi_assign(&mut self) -> PResult<Node> {
        let line = self.line();
        let mut targets = Vec::new();
        loop {
            let target = match self.advance() {
                Token::Ident(name) => AssignTarget::Local(self.declare(&name)),
                Token::Ivar(name) => AssignTarget::Ivar(name),
                Token::Gvar(name) => AssignTarget::Gvar(name),
                _ => return self.unexpected(),
            };
            targets.push(target);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect_assign()?;
        let first = self.parse_expr()?;
        let value = if self.check(&Token::Comma) {
            let mut items = vec![first];
            while self.eat(&Token::Comma) {
                items.push(self.parse_expr()?);
            }
            Node::new(NodeKind::Array(items), line)
        } else {
            first
        };
        Ok(Node::new(
            NodeKind::MultiAssign {
                targets,
                value: Box::new(value),
            },
            line,
        ))
    }

    fn expect_assign(&mut self) -> PResult<()> {
        if self.eat(&Token::Assign) {
            Ok(())
        } else {
            self.unexpected_expecting("'='")
        }
    }

    fn parse_assignment(&mut self) -> PResult<Node> {
        let line = self.line();
        let next_is_assign = is_assign_op(self.peek_at(1));
        match self.peek().clone() {
            Token::Ident(name) if next_is_assign && !name.ends_with(['?', '!']) => {
                self.advance();
                let target = AssignTarget::Local(self.declare(&name));
                return self.finish_assign(target, line);
            }
            Token::Ivar(name) if next_is_assign => {
                self.advance();
                return self.finish_assign(AssignTarget::Ivar(name), line);
            }
            Token::Gvar(name) if next_is_assign => {
                self.advance();
                return self.finish_assign(AssignTarget::Gvar(name), line);
            }
            Token::Const(name) if next_is_assign => {
                self.advance();
                return self.finish_assign(AssignTarget::Const(name), line);
            }
            _ => {}
        }

        let node = self.parse_ternary()?;
        if !is_assign_op(self.peek()) {
            return Ok(node);
        }
        let target = match node.kind {
            NodeKind::Call(call) if call.recv.is_some() && call.block.is_none() => {
                let call = *call;
                let Some(recv) = call.recv else {
                    return self.unexpected();
                };
                if call.name == "[]" {
                    AssignTarget::Index {
                        recv,
                        args: call.args,
                    }
                } else if call.args.is_empty() && is_method_ident(&call.name) {
                    AssignTarget::Attr {
                        recv,
                        name: call.name,
                    }
                } else {
                    return self.unexpected();
                }
            }
            NodeKind::Const {
                scope: Some(scope),
                name,
                ..
            } if self.check(&Token::Assign) => {
                self.advance();
                self.skip_newlines();
                let value = self.parse_assignment()?;
                return Ok(Node::new(
                    NodeKind::ConstSet {
                        scope: Some(scope),
                        name,
                        value: Box::new(value),
                    },
                    line,
                ));
            }
            _ => return self.unexpected(),
        };
        self.finish_assign(target, line)
    }

    fn finish_assign(&mut self, target: AssignTarget, line: u32) -> PResult<Node> {
        let op = self.advance();
        self.skip_newlines();
        let value = Box::new(self.parse_assignment()?);
        let kind = match op {
            Token::Assign => match target {
                AssignTarget::Local(r) => NodeKind::LocalSet(r, value),
                AssignTarget::Ivar(name) => NodeKind::IvarSet(name, value),
                AssignTarget::Gvar(name) => NodeKind::GvarSet(name, value),
                AssignTarget::Const(name) => NodeKind::ConstSet {
                    scope: None,
                    name,
                    value,
                },
                AssignTarget::Index { recv, mut args } => {
                    args.push(*value);
                    call_kind(Some(recv), "[]=", args)
                }
                AssignTarget::Attr { recv, name } => {
                    call_kind(Some(recv), &format!("{}=", name), vec![*value])
                }
            },
            Token::OpAssign(op) => NodeKind::OpAssign {
                target: Box::new(target),
                op: op.to_string(),
                value,
            },
            Token::OrAssign => NodeKind::OrAssign {
                target: Box::new(target),
                value,
            },
            Token::AndAssign => NodeKind::AndAssign {
                target: Box::new(target),
                value,
            },
            _ => return self.unexpected(),
        };
        Ok(Node::new(kind, line))
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn parse_ternary(&mut self) -> PResult<Node> {
        let cond = self.parse_range()?;
        let line = self.line();
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        self.skip_newlines();
        let then_branch = self.parse_ternary()?;
        self.skip_newlines();
        // `a ? b :c` lexes the else branch as a symbol.
        let else_branch = if let Token::Symbol(name) = self.peek().clone() {
            self.advance();
            let sym_line = self.line();
            if self.lookup_local(&name).is_some() {
                Node::new(NodeKind::LocalGet(self.declare(&name)), sym_line)
            } else {
                Node::new(call_kind(None, &name, Vec::new()), sym_line)
            }
        } else {
            self.expect(Token::Colon)?;
            self.skip_newlines();
            self.parse_ternary()?
        };
        Ok(Node::new(
            NodeKind::If {
                cond: Box::new(cond),
                then_body: vec![then_branch],
                else_body: vec![else_branch],
            },
            line,
        ))
    }

    fn parse_range(&mut self) -> PResult<Node> {
        let lo = self.parse_oror()?;
        let line = self.line();
        let exclusive = match self.peek() {
            Token::Dot2 => false,
            Token::Dot3 => true,
            _ => return Ok(lo),
        };
        self.advance();
        let hi = self.parse_oror()?;
        Ok(Node::new(
            NodeKind::Range {
                lo: Box::new(lo),
                hi: Box::new(hi),
                exclusive,
            },
            line,
        ))
    }

    fn parse_oror(&mut self) -> PResult<Node> {
        let mut left = self.parse_andand()?;
        while self.check(&Token::OrOr) {
            let line = self.line();
            self.advance();
            let right = self.parse_andand()?;
            left = Node::new(NodeKind::Or(Box::new(left), Box::new(right)), line);
        }
        Ok(left)
    }

    fn parse_andand(&mut self) -> PResult<Node> {
        let mut left = self.parse_equality()?;
        while self.check(&Token::AndAnd) {
            let line = self.line();
            self.advance();
            let right = self.parse_equality()?;
            left = Node::new(NodeKind::And(Box::new(left), Box::new(right)), line);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> PResult<Node> {
        let mut left = self.parse_comparison()?;
        loop {
            let line = self.line();
            let op = match self.peek() {
                Token::Eq => "==",
                Token::Eqq => "===",
                Token::Cmp => "<=>",
                Token::Match => "=~",
                Token::Ne | Token::NotMatch => {
                    let negated = if self.check(&Token::Ne) { "==" } else { "=~" };
                    self.advance();
                    let right = self.parse_comparison()?;
                    let inner = Node::new(call_kind(Some(left), negated, vec![right]), line);
                    left = Node::new(NodeKind::Not(Box::new(inner)), line);
                    continue;
                }
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = Node::new(call_kind(Some(left), op, vec![right]), line);
        }
    }

    fn parse_comparison(&mut self) -> PResult<Node> {
        let mut left = self.parse_bitor()?;
        loop {
            let op = match self.peek() {
                Token::Lt => "<",
                Token::Gt => ">",
                Token::Le => "<=",
                Token::Ge => ">=",
                _ => return Ok(left),
            };
            let line = self.line();
            self.advance();
            let right = self.parse_bitor()?;
            left = Node::new(call_kind(Some(left), op, vec![right]), line);
        }
    }

    fn parse_bitor(&mut self) -> PResult<Node> {
        let mut left = self.parse_bitand()?;
        loop {
            let op = match self.peek() {
                Token::Pipe => "|",
                Token::Caret => "^",
                _ => return Ok(left),
            };
            let line = self.line();
            self.advance();
            let right = self.parse_bitand()?;
            left = Node::new(call_kind(Some(left), op, vec![right]), line);
        }
    }

    fn parse_bitand(&mut self) -> PResult<Node> {
        let mut left = self.parse_shift()?;
        while self.check(&Token::Amp) {
            let line = self.line();
            self.advance();
            let right = self.parse_shift()?;
            left = Node::new(call_kind(Some(left), "&", vec![right]), line);
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> PResult<Node> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Shl => "<<",
                Token::Shr => ">>",
                _ => return Ok(left),
            };
            let line = self.line();
            self.advance();
            let right = self.parse_additive()?;
            left = Node::new(call_kind(Some(left), op, vec![right]), line);
        }
    }

    fn parse_additive(&mut self) -> PResult<Node> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => "+",
                Token::Minus => "-",
                _ => return Ok(left),
            };
            let line = self.line();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Node::new(call_kind(Some(left), op, vec![right]), line);
        }
    }

    fn parse_multiplicative(&mut self) -> PResult<Node> {
        let mut left = self.parse_unary_minus()?;
        loop {
            let op = match self.peek() {
                Token::Star => "*",
                Token::Slash => "/",
                Token::Percent => "%",
                _ => return Ok(left),
            };
            let line = self.line();
            self.advance();
            let right = self.parse_unary_minus()?;
            left = Node::new(call_kind(Some(left), op, vec![right]), line);
        }
    }

    fn parse_unary_minus(&mut self) -> PResult<Node> {
        if self.check(&Token::Minus) {
            let next = self.spanned_at(1);
            let literal = matches!(next.token, Token::Int(_) | Token::Float(_)) && !next.space_before;
            if !literal {
                let line = self.line();
                self.advance();
                let operand = self.parse_unary_minus()?;
                return Ok(Node::new(call_kind(Some(operand), "-@", Vec::new()), line));
            }
        }
        self.parse_pow()
    }

    fn parse_pow(&mut self) -> PResult<Node> {
        let base = self.parse_unary()?;
        if self.check(&Token::Pow) {
            let line = self.line();
            self.advance();
            let exp = self.parse_unary_minus()?;
            return Ok(Node::new(call_kind(Some(base), "**", vec![exp]), line));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> PResult<Node> {
        let line = self.line();
        match self.peek() {
            Token::Bang => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Node::new(NodeKind::Not(Box::new(operand)), line))
            }
            Token::Tilde => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Node::new(call_kind(Some(operand), "~", Vec::new()), line))
            }
            Token::Plus => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_postfix(),
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn parse_postfix(&mut self) -> PResult<Node> {
        let mut node = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot | Token::SafeNav => {
                    let safe_nav = self.check(&Token::SafeNav);
                    self.advance();
                    self.skip_newlines();
                    let line = self.line();
                    if self.check(&Token::LParen) {
                        let (args, block) = self.parse_paren_args()?;
                        node = self.finish_call(Some(node), "call".to_string(), args, block, safe_nav, line)?;
                        continue;
                    }
                    let name = self.parse_method_name()?;
                    node = self.parse_call_rest(Some(node), name, safe_nav, line)?;
                }
                Token::Colon2 => {
                    self.advance();
                    let line = self.line();
                    match self.advance() {
                        Token::Const(name) => {
                            if self.check(&Token::LParen) && !self.cur().space_before {
                                node = self.parse_call_rest(Some(node), name, false, line)?;
                            } else {
                                node = Node::new(
                                    NodeKind::Const {
                                        scope: Some(Box::new(node)),
                                        top: false,
                                        name,
                                    },
                                    line,
                                );
                            }
                        }
                        Token::Ident(name) => {
                            node = self.parse_call_rest(Some(node), name, false, line)?;
                        }
                        _ => return self.unexpected(),
                    }
                }
                Token::LBracket if !self.cur().space_before => {
                    let line = self.line();
                    self.advance();
                    let (args, _) = self.with_no_do(0, |p| p.parse_arg_list(Some(Token::RBracket)))?;
                    node = Node::new(call_kind(Some(node), "[]", args), line);
                }
                _ => return Ok(node),
            }
        }
    }

    fn parse_method_name(&mut self) -> PResult<String> {
        let name = match self.peek() {
            Token::Ident(s) | Token::Const(s) => s.clone(),
            Token::Kw(k) => k.as_str().to_string(),
            Token::Label(s) => {
                // `recv.meth:` never appears; split the label back.
                s.clone()
            }
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Slash => "/".into(),
            Token::Eq => "==".into(),
            Token::Lt => "<".into(),
            Token::Gt => ">".into(),
            Token::Cmp => "<=>".into(),
            _ => return self.unexpected(),
        };
        self.advance();
        Ok(name)
    }

    fn parse_call_rest(
        &mut self,
        recv: Option<Node>,
        name: String,
        safe_nav: bool,
        line: u32,
    ) -> PResult<Node> {
        let (args, block) = if self.check(&Token::LParen) && !self.cur().space_before {
            self.parse_paren_args()?
        } else if self.can_start_command_arg() {
            self.parse_command_args()?
        } else {
            (Vec::new(), None)
        };
        self.finish_call(recv, name, args, block, safe_nav, line)
    }

    fn finish_call(
        &mut self,
        recv: Option<Node>,
        name: String,
        args: Vec<Node>,
        block: Option<BlockArg>,
        safe_nav: bool,
        line: u32,
    ) -> PResult<Node> {
        let literal = self.parse_block_opt()?;
        let block = match (block, literal) {
            (Some(_), Some(_)) => {
                return Err(self.error_here("both block arg and actual block given".to_string()))
            }
            (a, b) => a.or(b),
        };
        Ok(Node::new(
            NodeKind::Call(Box::new(Call {
                recv,
                name,
                args,
                block,
                safe_nav,
            })),
            line,
        ))
    }

    fn can_start_command_arg(&self) -> bool {
        let tok = self.cur();
        if !tok.space_before {
            return false;
        }
        let next_adjacent = !self.spanned_at(1).space_before;
        match &tok.token {
            Token::Int(_)
            | Token::Float(_)
            | Token::Str(_)
            | Token::Symbol(_)
            | Token::DSymbol(_)
            | Token::Words(_)
            | Token::Symbols(_)
            | Token::Ident(_)
            | Token::Const(_)
            | Token::Ivar(_)
            | Token::Gvar(_)
            | Token::Label(_)
            | Token::Arrow
            | Token::LParen
            | Token::LBracket
            | Token::Colon2 => true,
            Token::Kw(k) => matches!(
                k,
                Keyword::Nil
                    | Keyword::True
                    | Keyword::False
                    | Keyword::SelfKw
                    | Keyword::Not
                    | Keyword::Super
                    | Keyword::Yield
                    | Keyword::Case
                    | Keyword::Def
            ),
            Token::Minus | Token::Star | Token::Amp | Token::Bang => next_adjacent,
            _ => false,
        }
    }

    fn parse_paren_args(&mut self) -> PResult<(Vec<Node>, Option<BlockArg>)> {
        self.expect(Token::LParen)?;
        self.with_no_do(0, |p| p.parse_arg_list(Some(Token::RParen)))
    }

    fn parse_command_args(&mut self) -> PResult<(Vec<Node>, Option<BlockArg>)> {
        if self.check(&Token::Minus) {
            let (line, col) = (self.cur().line, self.cur().col);
            self.warn(
                line,
                col,
                "ambiguous first argument; put parentheses or a space even after `-` operator",
            );
        }
        let depth = self.no_do + 1;
        self.with_no_do(depth, |p| p.parse_arg_list(None))
    }

    /// Comma separated call arguments, with trailing `key => value` pairs
    /// folded into one hash argument.
    fn parse_arg_list(&mut self, close: Option<Token>) -> PResult<(Vec<Node>, Option<BlockArg>)> {
        let mut args = Vec::new();
        let mut pairs: Vec<(Node, Node)> = Vec::new();
        let mut block = None;
        let start_line = self.line();
        loop {
            if let Some(c) = &close {
                self.skip_newlines();
                if self.check(c) {
                    break;
                }
            }
            let line = self.line();
            match self.peek().clone() {
                Token::Star => {
                    self.advance();
                    let inner = self.parse_ternary()?;
                    args.push(Node::new(NodeKind::Splat(Box::new(inner)), line));
                }
                Token::Amp => {
                    self.advance();
                    let inner = self.parse_ternary()?;
                    block = Some(BlockArg::Pass(Box::new(inner)));
                }
                Token::Label(name) => {
                    self.advance();
                    self.skip_newlines();
                    let value = self.parse_expr()?;
                    pairs.push((Node::new(NodeKind::Sym(name), line), value));
                }
                _ => {
                    let arg = self.parse_expr()?;
                    if self.eat(&Token::FatArrow) {
                        self.skip_newlines();
                        let value = self.parse_expr()?;
                        pairs.push((arg, value));
                    } else {
                        args.push(arg);
                    }
                }
            }
            if close.is_some() {
                self.skip_newlines();
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        if !pairs.is_empty() {
            args.push(Node::new(NodeKind::Hash(pairs), start_line));
        }
        if let Some(c) = close {
            self.expect(c)?;
        }
        Ok((args, block))
    }

    fn parse_block_opt(&mut self) -> PResult<Option<BlockArg>> {
        if self.check(&Token::LBrace) {
            return Ok(Some(BlockArg::Literal(self.parse_brace_block()?)));
        }
        if self.is_kw(Keyword::Do) && self.no_do == 0 {
            return Ok(Some(BlockArg::Literal(self.parse_do_block()?)));
        }
        Ok(None)
    }

    fn parse_brace_block(&mut self) -> PResult<Arc<BlockDef>> {
        let line = self.line();
        self.expect(Token::LBrace)?;
        self.push_scope(ScopeKind::Block);
        let result = self.with_no_do(0, |p| {
            let params = p.parse_block_params()?;
            let body = p.parse_stmts()?;
            p.expect(Token::RBrace)?;
            Ok((params, body))
        });
        let nlocals = self.pop_scope();
        let (params, body) = result?;
        Ok(self.block_def(params, body, nlocals, line))
    }

    fn parse_do_block(&mut self) -> PResult<Arc<BlockDef>> {
        let line = self.line();
        self.expect_kw(Keyword::Do)?;
        self.push_scope(ScopeKind::Block);
        let result = self.with_no_do(0, |p| {
            p.skip_newlines();
            let params = p.parse_block_params()?;
            let body = p.parse_body_with_rescue()?;
            p.expect_kw(Keyword::End)?;
            Ok((params, body))
        });
        let nlocals = self.pop_scope();
        let (params, body) = result?;
        Ok(self.block_def(params, body, nlocals, line))
    }

    fn block_def(&self, params: Params, body: Vec<Node>, nlocals: usize, line: u32) -> Arc<BlockDef> {
        Arc::new(BlockDef {
            params,
            body,
            nlocals,
            file: self.file.clone(),
            line,
        })
    }

    fn parse_block_params(&mut self) -> PResult<Params> {
        if self.eat(&Token::OrOr) {
            return Ok(Params::default());
        }
        if !self.eat(&Token::Pipe) {
            return Ok(Params::default());
        }
        let params = self.parse_param_list(&Token::Pipe)?;
        self.expect(Token::Pipe)?;
        Ok(params)
    }

    /// Parameters up to (not including) `close`. A `Newline` close also
    /// stops at `;`.
    fn parse_param_list(&mut self, close: &Token) -> PResult<Params> {
        let mut params = Params::default();
        let at_close = |p: &Self| {
            p.check(close) || (*close == Token::Newline && matches!(p.peek(), Token::Semi | Token::Eof))
        };
        if at_close(self) {
            return Ok(params);
        }
        loop {
            if *close != Token::Newline {
                self.skip_newlines();
            }
            match self.advance() {
                Token::Ident(name) => {
                    if self.eat(&Token::Assign) {
                        let default = if *close == Token::Pipe {
                            self.parse_unary_minus()?
                        } else {
                            self.parse_ternary()?
                        };
                        let slot = self.declare_param(&name);
                        params.optional.push((slot, default));
                    } else {
                        let slot = self.declare_param(&name);
                        if params.rest.is_some() || !params.optional.is_empty() {
                            params.post.push(slot);
                        } else {
                            params.required.push(slot);
                        }
                    }
                }
                Token::Star => {
                    let name = match self.peek().clone() {
                        Token::Ident(name) => {
                            self.advance();
                            name
                        }
                        _ => "*".to_string(),
                    };
                    params.rest = Some(self.declare_param(&name));
                }
                Token::Amp => match self.advance() {
                    Token::Ident(name) => params.block = Some(self.declare_param(&name)),
                    _ => return self.unexpected(),
                },
                _ => {
                    self.pos -= 1;
                    return self.unexpected();
                }
            }
            if *close != Token::Newline {
                self.skip_newlines();
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(params)
    }

    // ========================================================================
    // Primary expressions
    // ========================================================================

    fn parse_primary(&mut self) -> PResult<Node> {
        let line = self.line();
        let tok = self.peek().clone();
        let kind = match tok {
            Token::Int(n) => {
                self.advance();
                NodeKind::Int(n)
            }
            Token::Float(f) => {
                self.advance();
                NodeKind::Float(f)
            }
            Token::Minus => {
                self.advance();
                match self.advance() {
                    Token::Int(n) => NodeKind::Int(n.wrapping_neg()),
                    Token::Float(f) => NodeKind::Float(-f),
                    _ => return self.unexpected(),
                }
            }
            Token::Str(segs) => {
                self.advance();
                let mut kind = self.string_kind(segs)?;
                // Adjacent literals concatenate.
                while let Token::Str(more) = self.peek().clone() {
                    self.advance();
                    let next = self.string_kind(more)?;
                    kind = concat_strings(kind, next);
                }
                kind
            }
            Token::Symbol(name) => {
                self.advance();
                NodeKind::Sym(name)
            }
            Token::DSymbol(segs) => {
                self.advance();
                match self.string_kind(segs)? {
                    NodeKind::Str(s) => NodeKind::Sym(s),
                    dstr => call_kind(Some(Node::new(dstr, line)), "to_sym", Vec::new()),
                }
            }
            Token::Words(words) => {
                self.advance();
                NodeKind::Array(words.into_iter().map(|w| Node::new(NodeKind::Str(w), line)).collect())
            }
            Token::Symbols(words) => {
                self.advance();
                NodeKind::Array(words.into_iter().map(|w| Node::new(NodeKind::Sym(w), line)).collect())
            }
            Token::Ivar(name) => {
                self.advance();
                NodeKind::IvarGet(name)
            }
            Token::Gvar(name) => {
                self.advance();
                NodeKind::GvarGet(name)
            }
            Token::Const(name) => {
                self.advance();
                if self.check(&Token::LParen) && !self.cur().space_before {
                    return self.parse_call_rest(None, name, false, line);
                }
                NodeKind::Const {
                    scope: None,
                    top: false,
                    name,
                }
            }
            Token::Colon2 => {
                self.advance();
                match self.advance() {
                    Token::Const(name) => NodeKind::Const {
                        scope: None,
                        top: true,
                        name,
                    },
                    _ => return self.unexpected(),
                }
            }
            Token::Ident(name) => {
                self.advance();
                return self.parse_identifier(name, line);
            }
            Token::LParen => {
                self.advance();
                let body = self.with_no_do(0, |p| {
                    let body = p.parse_stmts()?;
                    p.expect(Token::RParen)?;
                    Ok(body)
                })?;
                match body.len() {
                    0 => NodeKind::Nil,
                    1 => return Ok(body.into_iter().next().unwrap_or(Node::new(NodeKind::Nil, line))),
                    _ => NodeKind::Seq(body),
                }
            }
            Token::LBracket => {
                self.advance();
                let (items, _) = self.with_no_do(0, |p| p.parse_arg_list(Some(Token::RBracket)))?;
                NodeKind::Array(items)
            }
            Token::LBrace => {
                self.advance();
                NodeKind::Hash(self.with_no_do(0, |p| p.parse_hash_body())?)
            }
            Token::Arrow => {
                self.advance();
                NodeKind::Lambda(self.parse_lambda(line)?)
            }
            Token::Kw(k) => return self.parse_keyword(k, line),
            _ => return self.unexpected(),
        };
        Ok(Node::new(kind, line))
    }

    fn string_kind(&mut self, segs: Vec<StrSeg>) -> PResult<NodeKind> {
        if segs.iter().all(|s| matches!(s, StrSeg::Lit(_))) {
            let mut out = String::new();
            for seg in segs {
                if let StrSeg::Lit(s) = seg {
                    out.push_str(&s);
                }
            }
            return Ok(NodeKind::Str(out));
        }
        let mut parts = Vec::with_capacity(segs.len());
        for seg in segs {
            match seg {
                StrSeg::Lit(s) => parts.push(StrPart::Lit(s)),
                StrSeg::Code(src, line) => parts.push(StrPart::Code(self.parse_embedded(&src, line)?)),
            }
        }
        Ok(NodeKind::DStr(parts))
    }

    /// Parse interpolated code with the current scopes.
    fn parse_embedded(&mut self, src: &str, line: u32) -> PResult<Vec<Node>> {
        let (tokens, errors) = Lexer::starting_at(src, line).tokenize();
        if let Some(e) = errors.into_iter().next() {
            return Err(e.into());
        }
        let saved_tokens = std::mem::replace(&mut self.tokens, tokens);
        let saved_pos = std::mem::replace(&mut self.pos, 0);
        let result = self.with_no_do(0, |p| {
            let body = p.parse_stmts()?;
            if !p.check(&Token::Eof) {
                return p.unexpected();
            }
            Ok(body)
        });
        self.tokens = saved_tokens;
        self.pos = saved_pos;
        result
    }

    fn parse_hash_body(&mut self) -> PResult<Vec<(Node, Node)>> {
        let mut pairs = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(&Token::RBrace) {
                break;
            }
            let line = self.line();
            if let Token::Label(name) = self.peek().clone() {
                self.advance();
                self.skip_newlines();
                let value = self.parse_expr()?;
                pairs.push((Node::new(NodeKind::Sym(name), line), value));
            } else {
                let key = self.parse_expr()?;
                self.skip_newlines();
                self.expect(Token::FatArrow)?;
                self.skip_newlines();
                let value = self.parse_expr()?;
                pairs.push((key, value));
            }
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.skip_newlines();
        self.expect(Token::RBrace)?;
        Ok(pairs)
    }

    fn parse_lambda(&mut self, line: u32) -> PResult<Arc<BlockDef>> {
        self.push_scope(ScopeKind::Block);
        let result = self.with_no_do(0, |p| {
            let params = if p.eat(&Token::LParen) {
                let params = p.parse_param_list(&Token::RParen)?;
                p.expect(Token::RParen)?;
                params
            } else if matches!(p.peek(), Token::Ident(_) | Token::Star | Token::Amp) {
                p.parse_param_list(&Token::LBrace)?
            } else {
                Params::default()
            };
            let body = if p.eat(&Token::LBrace) {
                let body = p.parse_stmts()?;
                p.expect(Token::RBrace)?;
                body
            } else {
                p.expect_kw(Keyword::Do)?;
                let body = p.parse_body_with_rescue()?;
                p.expect_kw(Keyword::End)?;
                body
            };
            Ok((params, body))
        });
        let nlocals = self.pop_scope();
        let (params, body) = result?;
        Ok(self.block_def(params, body, nlocals, line))
    }

    fn parse_identifier(&mut self, name: String, line: u32) -> PResult<Node> {
        let paren_call = self.check(&Token::LParen) && !self.cur().space_before;
        if !paren_call {
            if let Some(r) = self.lookup_local(&name) {
                return Ok(Node::new(NodeKind::LocalGet(r), line));
            }
            match name.as_str() {
                "__FILE__" => {
                    let file = self.file.as_deref().unwrap_or("(eval)").to_string();
                    return Ok(Node::new(NodeKind::Str(file), line));
                }
                "__LINE__" => return Ok(Node::new(NodeKind::Int(line as i64), line)),
                _ => {}
            }
        }
        self.parse_call_rest(None, name, false, line)
    }

    // ========================================================================
    // Keyword constructs
    // ========================================================================

    fn parse_keyword(&mut self, k: Keyword, line: u32) -> PResult<Node> {
        let kind = match k {
            Keyword::Nil => {
                self.advance();
                NodeKind::Nil
            }
            Keyword::True => {
                self.advance();
                NodeKind::True
            }
            Keyword::False => {
                self.advance();
                NodeKind::False
            }
            Keyword::SelfKw => {
                self.advance();
                NodeKind::SelfRef
            }
            Keyword::If => {
                self.advance();
                let node = self.parse_if_rest(line, false)?;
                self.expect_kw(Keyword::End)?;
                return Ok(node);
            }
            Keyword::Unless => {
                self.advance();
                let node = self.parse_if_rest(line, true)?;
                self.expect_kw(Keyword::End)?;
                return Ok(node);
            }
            Keyword::While | Keyword::Until => {
                self.advance();
                let depth = self.no_do + 1;
                let cond = self.with_no_do(depth, |p| p.parse_condition())?;
                self.eat_kw(Keyword::Do);
                let body = self.with_no_do(0, |p| p.parse_stmts())?;
                self.expect_kw(Keyword::End)?;
                NodeKind::While {
                    cond: Box::new(cond),
                    body,
                    until: k == Keyword::Until,
                }
            }
            Keyword::Case => {
                self.advance();
                return self.parse_case(line);
            }
            Keyword::Begin => {
                self.advance();
                let body = self.with_no_do(0, |p| p.parse_body_with_rescue())?;
                self.expect_kw(Keyword::End)?;
                match body.len() {
                    1 if matches!(body[0].kind, NodeKind::Begin(_)) => {
                        return Ok(body.into_iter().next().unwrap_or(Node::new(NodeKind::Nil, line)))
                    }
                    _ => NodeKind::Seq(body),
                }
            }
            Keyword::Def => {
                self.advance();
                return self.parse_def(line);
            }
            Keyword::Class => {
                self.advance();
                return self.parse_class(line);
            }
            Keyword::Module => {
                self.advance();
                return self.parse_module(line);
            }
            Keyword::Return | Keyword::Break | Keyword::Next => {
                self.advance();
                let value = self.parse_jump_value()?.map(Box::new);
                match k {
                    Keyword::Return => NodeKind::Return(value),
                    Keyword::Break => NodeKind::Break(value),
                    _ => NodeKind::Next(value),
                }
            }
            Keyword::Yield => {
                self.advance();
                let (args, _) = if self.check(&Token::LParen) && !self.cur().space_before {
                    self.parse_paren_args()?
                } else if self.can_start_command_arg() {
                    self.parse_command_args()?
                } else {
                    (Vec::new(), None)
                };
                NodeKind::Yield(args)
            }
            Keyword::Super => {
                self.advance();
                let (args, pass) = if self.check(&Token::LParen) && !self.cur().space_before {
                    let (args, pass) = self.parse_paren_args()?;
                    (Some(args), pass)
                } else if self.can_start_command_arg() {
                    let (args, pass) = self.parse_command_args()?;
                    (Some(args), pass)
                } else {
                    (None, None)
                };
                let literal = self.parse_block_opt()?;
                NodeKind::Super {
                    args,
                    block: pass.or(literal),
                }
            }
            Keyword::Not => {
                self.advance();
                let inner = self.parse_expr()?;
                NodeKind::Not(Box::new(inner))
            }
            _ => return self.unexpected(),
        };
        Ok(Node::new(kind, line))
    }

    fn parse_then(&mut self) {
        self.skip_terms();
        self.eat_kw(Keyword::Then);
    }

    /// After `if`/`elsif`/`unless`; leaves the closing `end` unconsumed.
    fn parse_if_rest(&mut self, line: u32, negate: bool) -> PResult<Node> {
        let cond = self.parse_condition()?;
        self.parse_then();
        let body = self.parse_stmts()?;
        let other = if !negate && self.is_kw(Keyword::Elsif) {
            let elsif_line = self.line();
            self.advance();
            vec![self.parse_if_rest(elsif_line, false)?]
        } else if self.eat_kw(Keyword::Else) {
            self.parse_stmts()?
        } else {
            Vec::new()
        };
        let (then_body, else_body) = if negate { (other, body) } else { (body, other) };
        Ok(Node::new(
            NodeKind::If {
                cond: Box::new(cond),
                then_body,
                else_body,
            },
            line,
        ))
    }

    fn parse_case(&mut self, line: u32) -> PResult<Node> {
        let subject = if matches!(self.peek(), Token::Newline | Token::Semi) {
            None
        } else {
            Some(Box::new(self.parse_expr_stmt()?))
        };
        self.skip_terms();
        let mut whens = Vec::new();
        while self.eat_kw(Keyword::When) {
            let mut values = Vec::new();
            loop {
                self.skip_newlines();
                let vline = self.line();
                if self.eat(&Token::Star) {
                    let inner = self.parse_ternary()?;
                    values.push(Node::new(NodeKind::Splat(Box::new(inner)), vline));
                } else {
                    values.push(self.parse_ternary()?);
                }
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.parse_then();
            let body = self.parse_stmts()?;
            whens.push((values, body));
        }
        if whens.is_empty() {
            return self.unexpected_expecting("'when'");
        }
        let else_body = if self.eat_kw(Keyword::Else) {
            self.parse_stmts()?
        } else {
            Vec::new()
        };
        self.expect_kw(Keyword::End)?;
        Ok(Node::new(
            NodeKind::Case {
                subject,
                whens,
                else_body,
            },
            line,
        ))
    }

    fn parse_jump_value(&mut self) -> PResult<Option<Node>> {
        let ends = matches!(
            self.peek(),
            Token::Newline
                | Token::Semi
                | Token::Eof
                | Token::RBrace
                | Token::RParen
                | Token::Kw(
                    Keyword::End
                        | Keyword::If
                        | Keyword::Unless
                        | Keyword::While
                        | Keyword::Until
                        | Keyword::Rescue
                        | Keyword::And
                        | Keyword::Or
                        | Keyword::Else
                        | Keyword::Elsif
                        | Keyword::When
                        | Keyword::Ensure
                )
        );
        if ends {
            return Ok(None);
        }
        let line = self.line();
        let first = self.parse_expr()?;
        if !self.check(&Token::Comma) {
            return Ok(Some(first));
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            items.push(self.parse_expr()?);
        }
        Ok(Some(Node::new(NodeKind::Array(items), line)))
    }

    /// Statements optionally followed by `rescue`/`else`/`ensure` clauses.
    /// The closing `end` is left for the caller.
    fn parse_body_with_rescue(&mut self) -> PResult<Vec<Node>> {
        let line = self.line();
        let body = self.parse_stmts()?;
        if !matches!(
            self.peek(),
            Token::Kw(Keyword::Rescue | Keyword::Else | Keyword::Ensure)
        ) {
            return Ok(body);
        }
        let mut rescues = Vec::new();
        while self.eat_kw(Keyword::Rescue) {
            let mut classes = Vec::new();
            while !matches!(
                self.peek(),
                Token::Newline | Token::Semi | Token::FatArrow | Token::Kw(Keyword::Then)
            ) {
                classes.push(self.parse_ternary()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
                self.skip_newlines();
            }
            let var = if self.eat(&Token::FatArrow) {
                match self.advance() {
                    Token::Ident(name) => Some(self.declare(&name)),
                    _ => return self.unexpected(),
                }
            } else {
                None
            };
            self.parse_then();
            let body = self.parse_stmts()?;
            rescues.push(RescueClause { classes, var, body });
        }
        let else_body = if self.eat_kw(Keyword::Else) {
            Some(self.parse_stmts()?)
        } else {
            None
        };
        let ensure = if self.eat_kw(Keyword::Ensure) {
            Some(self.parse_stmts()?)
        } else {
            None
        };
        Ok(vec![Node::new(
            NodeKind::Begin(Box::new(BeginBlock {
                body,
                rescues,
                else_body,
                ensure,
            })),
            line,
        )])
    }

    fn parse_def(&mut self, line: u32) -> PResult<Node> {
        let mut singleton = None;
        if self.peek_at(1) == &Token::Dot {
            let target_line = self.line();
            let target = match self.advance() {
                Token::Kw(Keyword::SelfKw) => NodeKind::SelfRef,
                Token::Const(name) => NodeKind::Const {
                    scope: None,
                    top: false,
                    name,
                },
                Token::Ident(name) => match self.lookup_local(&name) {
                    Some(r) => NodeKind::LocalGet(r),
                    None => call_kind(None, &name, Vec::new()),
                },
                _ => {
                    self.pos -= 1;
                    return self.unexpected();
                }
            };
            singleton = Some(Box::new(Node::new(target, target_line)));
            self.advance();
        }
        let name = self.parse_def_name()?;

        self.push_scope(ScopeKind::Def);
        let result = self.with_no_do(0, |p| {
            let params = if p.eat(&Token::LParen) {
                let params = p.parse_param_list(&Token::RParen)?;
                p.expect(Token::RParen)?;
                params
            } else {
                p.parse_param_list(&Token::Newline)?
            };
            let body = p.parse_body_with_rescue()?;
            p.expect_kw(Keyword::End)?;
            Ok((params, body))
        });
        let nlocals = self.pop_scope();
        let (params, body) = result?;
        let def = Arc::new(MethodDef {
            name,
            params,
            body,
            nlocals,
            file: self.file.clone(),
            line,
        });
        Ok(Node::new(NodeKind::Def { singleton, def }, line))
    }

    fn parse_def_name(&mut self) -> PResult<String> {
        let tok = self.cur().clone();
        let mut name = match tok.token {
            Token::Ident(s) | Token::Const(s) => s,
            Token::Label(s) => s,
            Token::Kw(k) => k.as_str().to_string(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Pow => "**".into(),
            Token::Slash => "/".into(),
            Token::Percent => "%".into(),
            Token::Eq => "==".into(),
            Token::Eqq => "===".into(),
            Token::Ne => "!=".into(),
            Token::Match => "=~".into(),
            Token::Lt => "<".into(),
            Token::Gt => ">".into(),
            Token::Le => "<=".into(),
            Token::Ge => ">=".into(),
            Token::Cmp => "<=>".into(),
            Token::Shl => "<<".into(),
            Token::Shr => ">>".into(),
            Token::Bang => "!".into(),
            Token::Tilde => "~".into(),
            Token::Amp => "&".into(),
            Token::Pipe => "|".into(),
            Token::Caret => "^".into(),
            Token::LBracket => {
                self.advance();
                if !self.check(&Token::RBracket) {
                    return self.unexpected_expecting("']'");
                }
                "[]".into()
            }
            _ => return self.unexpected(),
        };
        self.advance();
        // Setter: `def name=(v)` with `=` glued to the name.
        let next = self.cur();
        if next.token == Token::Assign && next.start == self.tokens[self.pos - 1].end {
            let ident_like = name == "[]" || is_method_ident(&name);
            if ident_like {
                self.advance();
                name.push('=');
            }
        }
        Ok(name)
    }

    fn parse_cpath(&mut self) -> PResult<(Option<Box<Node>>, String)> {
        let line = self.line();
        let mut scope: Option<Box<Node>> = None;
        let mut top = false;
        if self.eat(&Token::Colon2) {
            top = true;
        }
        let mut name = match self.advance() {
            Token::Const(name) => name,
            _ => {
                self.pos -= 1;
                return self.unexpected_expecting("constant name");
            }
        };
        while self.check(&Token::Colon2) {
            self.advance();
            let next = match self.advance() {
                Token::Const(n) => n,
                _ => return self.unexpected(),
            };
            scope = Some(Box::new(Node::new(
                NodeKind::Const {
                    scope: scope.take(),
                    top: std::mem::take(&mut top),
                    name,
                },
                line,
            )));
            name = next;
        }
        Ok((scope, name))
    }

    fn parse_scope_body(&mut self) -> PResult<Arc<TopBody>> {
        self.push_scope(ScopeKind::Class);
        let result = self.with_no_do(0, |p| {
            let body = p.parse_body_with_rescue()?;
            p.expect_kw(Keyword::End)?;
            Ok(body)
        });
        let nlocals = self.pop_scope();
        Ok(Arc::new(TopBody {
            body: result?,
            nlocals,
            file: self.file.clone(),
        }))
    }

    fn parse_class(&mut self, line: u32) -> PResult<Node> {
        if self.eat(&Token::Shl) {
            let target = self.parse_expr()?;
            self.skip_terms();
            let body = self.parse_scope_body()?;
            return Ok(Node::new(
                NodeKind::SClassDef {
                    target: Box::new(target),
                    body,
                },
                line,
            ));
        }
        let (scope, name) = self.parse_cpath()?;
        let superclass = if self.eat(&Token::Lt) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.skip_terms();
        let body = self.parse_scope_body()?;
        Ok(Node::new(
            NodeKind::ClassDef {
                scope,
                name,
                superclass,
                body,
            },
            line,
        ))
    }

    fn parse_module(&mut self, line: u32) -> PResult<Node> {
        let (scope, name) = self.parse_cpath()?;
        self.skip_terms();
        let body = self.parse_scope_body()?;
        Ok(Node::new(NodeKind::ModuleDef { scope, name, body }, line))
    }
}

fn call_kind(recv: Option<Node>, name: &str, args: Vec<Node>) -> NodeKind {
    NodeKind::Call(Box::new(Call {
        recv,
        name: name.to_string(),
        args,
        block: None,
        safe_nav: false,
    }))
}

fn is_assign_op(tok: &Token) -> bool {
    matches!(
        tok,
        Token::Assign | Token::OpAssign(_) | Token::OrAssign | Token::AndAssign
    )
}

fn is_method_ident(name: &str) -> bool {
    name.chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_literal(node: &Node) -> bool {
    matches!(
        node.kind,
        NodeKind::Nil
            | NodeKind::True
            | NodeKind::False
            | NodeKind::Int(_)
            | NodeKind::Float(_)
            | NodeKind::Str(_)
            | NodeKind::Sym(_)
    )
}

fn concat_strings(a: NodeKind, b: NodeKind) -> NodeKind {
    let to_parts = |k: NodeKind| match k {
        NodeKind::Str(s) => vec![StrPart::Lit(s)],
        NodeKind::DStr(parts) => parts,
        _ => Vec::new(),
    };
    match (a, b) {
        (NodeKind::Str(mut x), NodeKind::Str(y)) => {
            x.push_str(&y);
            NodeKind::Str(x)
        }
        (a, b) => {
            let mut parts = to_parts(a);
            parts.extend(to_parts(b));
            NodeKind::DStr(parts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Arc<TopBody> {
        let out = parse(src, None, &[]);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        out.tree.expect("tree")
    }

    fn first_call(body: &TopBody) -> &Call {
        match &body.body[0].kind {
            NodeKind::Call(c) => c,
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_command_call_nests() {
        let tree = parse_ok("clearly a syntax error");
        let call = first_call(&tree);
        assert_eq!(call.name, "clearly");
        match &call.args[0].kind {
            NodeKind::Call(inner) => assert_eq!(inner.name, "a"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_locals_resolve_across_blocks() {
        let tree = parse_ok("x = 1\n[1].each { |y| x = y }");
        assert_eq!(tree.nlocals, 1);
        let call = match &tree.body[1].kind {
            NodeKind::Call(c) => c,
            other => panic!("unexpected {:?}", other),
        };
        let Some(BlockArg::Literal(block)) = &call.block else {
            panic!("expected block");
        };
        assert_eq!(block.nlocals, 1);
        match &block.body[0].kind {
            NodeKind::LocalSet(r, _) => assert_eq!(*r, LocalRef { depth: 1, index: 0 }),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_def_params() {
        let tree = parse_ok("def foo(a, b = 2, *rest, &blk)\n a\nend");
        let NodeKind::Def { def, .. } = &tree.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(def.params.required.len(), 1);
        assert_eq!(def.params.optional.len(), 1);
        assert!(def.params.rest.is_some());
        assert!(def.params.block.is_some());
        assert_eq!(def.nlocals, 4);
    }

    #[test]
    fn test_setter_and_operator_defs() {
        let tree = parse_ok("class A\n def x=(v); @x = v; end\n def ==(o); true; end\n def [](i); i; end\nend");
        let NodeKind::ClassDef { body, .. } = &tree.body[0].kind else {
            panic!("expected class");
        };
        let names: Vec<_> = body
            .body
            .iter()
            .map(|n| match &n.kind {
                NodeKind::Def { def, .. } => def.name.clone(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(names, vec!["x=", "==", "[]"]);
    }

    #[test]
    fn test_do_block_binds_to_outer_command() {
        let tree = parse_ok("foo bar do\n 1\nend");
        let call = first_call(&tree);
        assert_eq!(call.name, "foo");
        assert!(call.block.is_some());
        match &call.args[0].kind {
            NodeKind::Call(inner) => assert!(inner.block.is_none()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_end_is_reported() {
        let out = parse("def foo", None, &[]);
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].message.contains("unexpected end of file"));
        assert!(out.tree.is_none());
    }

    #[test]
    fn test_context_locals_carry_over() {
        let out = parse("a = 10", None, &[]);
        assert_eq!(out.locals, vec!["a".to_string()]);
        let next = parse("a + 1", None, &out.locals);
        let tree = next.tree.expect("tree");
        let call = first_call(&tree);
        assert!(matches!(
            call.recv.as_ref().map(|n| &n.kind),
            Some(NodeKind::LocalGet(_))
        ));
    }

    #[test]
    fn test_assignment_in_condition_warns() {
        let out = parse("if a = 1\n a\nend", None, &[]);
        assert!(out.errors.is_empty());
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_hash_literal_and_trailing_hash_args() {
        let tree = parse_ok("foo 1, a: 2, 'b' => 3");
        let call = first_call(&tree);
        assert_eq!(call.args.len(), 2);
        assert!(matches!(&call.args[1].kind, NodeKind::Hash(pairs) if pairs.len() == 2));
    }

    #[test]
    fn test_multi_assign() {
        let tree = parse_ok("a, b = 1, 2");
        assert!(matches!(
            &tree.body[0].kind,
            NodeKind::MultiAssign { targets, .. } if targets.len() == 2
        ));
    }

    #[test]
    fn test_rescue_clauses() {
        let tree = parse_ok("begin\n raise 'x'\nrescue ArgumentError, TypeError => e\n 1\nelse\n 2\nensure\n 3\nend");
        let NodeKind::Begin(begin) = &tree.body[0].kind else {
            panic!("expected begin");
        };
        assert_eq!(begin.rescues.len(), 1);
        assert_eq!(begin.rescues[0].classes.len(), 2);
        assert!(begin.rescues[0].var.is_some());
        assert!(begin.else_body.is_some());
        assert!(begin.ensure.is_some());
    }
}
