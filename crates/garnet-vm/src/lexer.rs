//! Lexer for the guest language.
//!
//! Operators, identifiers and numbers go through a logos automaton. Layout
//! (spaces, comments, newlines) and string literals are handled by hand
//! because the grammar needs to see newlines and `#{...}` interpolation, and
//! because command calls depend on whether a token was preceded by a space.

use logos::Logos;
use thiserror::Error;

/// Alias keeps logos from rewriting the `'static` lifetime to the source lifetime.
type OpStr = &'static str;

#[derive(Logos, Debug, Clone, PartialEq)]
enum LogosToken {
    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*([eE][+-]?[0-9]+)?", parse_float)]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+", parse_float)]
    Float(f64),

    #[regex(r"0[xX][0-9a-fA-F_]+", |lex| parse_radix(lex, 16))]
    #[regex(r"0[bB][01_]+", |lex| parse_radix(lex, 2))]
    #[regex(r"0[oO][0-7_]+", |lex| parse_radix(lex, 8))]
    #[regex(r"[0-9][0-9_]*", parse_int)]
    Integer(i64),

    #[regex(r"[a-z_][a-zA-Z0-9_]*[?!]?", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[A-Z][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Constant(String),

    #[regex(r"@[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    Ivar(String),

    #[regex(r"\$[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    Gvar(String),

    #[regex(r":[a-zA-Z_][a-zA-Z0-9_]*[?!]?", |lex| lex.slice()[1..].to_string())]
    #[regex(r":@[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    #[regex(r":(\[\]=?|\*\*|<=>|===?|=~|!=|<=|>=|<<|>>|[-+*/%<>!&|^~]|[-+]@)", |lex| lex.slice()[1..].to_string())]
    Symbol(String),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("&.")]
    SafeNav,
    #[token("..")]
    Dot2,
    #[token("...")]
    Dot3,
    #[token("::")]
    Colon2,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token("=")]
    Assign,
    #[token("+=", |_| "+")]
    #[token("-=", |_| "-")]
    #[token("*=", |_| "*")]
    #[token("/=", |_| "/")]
    #[token("%=", |_| "%")]
    #[token("**=", |_| "**")]
    #[token("<<=", |_| "<<")]
    #[token(">>=", |_| ">>")]
    #[token("|=", |_| "|")]
    #[token("&=", |_| "&")]
    #[token("^=", |_| "^")]
    OpAssign(OpStr),
    #[token("||=")]
    OrAssign,
    #[token("&&=")]
    AndAssign,
    #[token("==")]
    Eq,
    #[token("===")]
    Eqq,
    #[token("!=")]
    Ne,
    #[token("=~")]
    Match,
    #[token("!~")]
    NotMatch,
    #[token("!")]
    Bang,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    Pow,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<=>")]
    Cmp,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("=>")]
    FatArrow,
    #[token("->")]
    Arrow,
    #[token("?")]
    Question,
    #[token("~")]
    Tilde,
}

fn parse_float(lex: &mut logos::Lexer<'_, LogosToken>) -> Option<f64> {
    lex.slice().replace('_', "").parse().ok()
}

fn parse_int(lex: &mut logos::Lexer<'_, LogosToken>) -> Option<i64> {
    let s = lex.slice().replace('_', "");
    if s.len() > 1 && s.starts_with('0') {
        return i64::from_str_radix(&s[1..], 8).ok();
    }
    s.parse().ok()
}

fn parse_radix(lex: &mut logos::Lexer<'_, LogosToken>, radix: u32) -> Option<i64> {
    let s = lex.slice()[2..].replace('_', "");
    i64::from_str_radix(&s, radix).ok()
}

/// Reserved words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Def,
    End,
    If,
    Elsif,
    Else,
    Unless,
    While,
    Until,
    Do,
    Then,
    Return,
    Class,
    Module,
    SelfKw,
    Nil,
    True,
    False,
    And,
    Or,
    Not,
    Begin,
    Rescue,
    Ensure,
    Yield,
    Break,
    Next,
    Case,
    When,
    Super,
}

impl Keyword {
    fn from_ident(s: &str) -> Option<Keyword> {
        Some(match s {
            "def" => Keyword::Def,
            "end" => Keyword::End,
            "if" => Keyword::If,
            "elsif" => Keyword::Elsif,
            "else" => Keyword::Else,
            "unless" => Keyword::Unless,
            "while" => Keyword::While,
            "until" => Keyword::Until,
            "do" => Keyword::Do,
            "then" => Keyword::Then,
            "return" => Keyword::Return,
            "class" => Keyword::Class,
            "module" => Keyword::Module,
            "self" => Keyword::SelfKw,
            "nil" => Keyword::Nil,
            "true" => Keyword::True,
            "false" => Keyword::False,
            "and" => Keyword::And,
            "or" => Keyword::Or,
            "not" => Keyword::Not,
            "begin" => Keyword::Begin,
            "rescue" => Keyword::Rescue,
            "ensure" => Keyword::Ensure,
            "yield" => Keyword::Yield,
            "break" => Keyword::Break,
            "next" => Keyword::Next,
            "case" => Keyword::Case,
            "when" => Keyword::When,
            "super" => Keyword::Super,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Def => "def",
            Keyword::End => "end",
            Keyword::If => "if",
            Keyword::Elsif => "elsif",
            Keyword::Else => "else",
            Keyword::Unless => "unless",
            Keyword::While => "while",
            Keyword::Until => "until",
            Keyword::Do => "do",
            Keyword::Then => "then",
            Keyword::Return => "return",
            Keyword::Class => "class",
            Keyword::Module => "module",
            Keyword::SelfKw => "self",
            Keyword::Nil => "nil",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::And => "and",
            Keyword::Or => "or",
            Keyword::Not => "not",
            Keyword::Begin => "begin",
            Keyword::Rescue => "rescue",
            Keyword::Ensure => "ensure",
            Keyword::Yield => "yield",
            Keyword::Break => "break",
            Keyword::Next => "next",
            Keyword::Case => "case",
            Keyword::When => "when",
            Keyword::Super => "super",
        }
    }
}

/// A piece of a double-quoted string literal.
#[derive(Debug, Clone, PartialEq)]
pub enum StrSeg {
    Lit(String),
    /// Source of a `#{...}` interpolation and the line it starts on.
    Code(String, u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(Vec<StrSeg>),
    Symbol(String),
    DSymbol(Vec<StrSeg>),
    Words(Vec<String>),
    Symbols(Vec<String>),
    Ident(String),
    Const(String),
    Ivar(String),
    Gvar(String),
    /// `name:` in hash literals and keyword-style arguments.
    Label(String),
    Kw(Keyword),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    SafeNav,
    Dot2,
    Dot3,
    Colon2,
    Colon,
    Semi,
    Newline,
    Assign,
    OpAssign(&'static str),
    OrAssign,
    AndAssign,
    Eq,
    Eqq,
    Ne,
    Match,
    NotMatch,
    Bang,
    AndAnd,
    OrOr,
    Amp,
    Pipe,
    Caret,
    Plus,
    Minus,
    Star,
    Pow,
    Slash,
    Percent,
    Lt,
    Gt,
    Le,
    Ge,
    Cmp,
    Shl,
    Shr,
    FatArrow,
    Arrow,
    Question,
    Tilde,
    Eof,
}

impl Token {
    /// Short description used in syntax error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Int(n) => format!("integer literal {}", n),
            Token::Float(f) => format!("float literal {}", f),
            Token::Str(_) | Token::Words(_) | Token::Symbols(_) => "string literal".to_string(),
            Token::Symbol(s) => format!("symbol :{}", s),
            Token::DSymbol(_) => "symbol literal".to_string(),
            Token::Ident(s) | Token::Const(s) => format!("'{}'", s),
            Token::Ivar(s) => format!("'@{}'", s),
            Token::Gvar(s) => format!("'${}'", s),
            Token::Label(s) => format!("label '{}:'", s),
            Token::Kw(k) => format!("'{}'", k.as_str()),
            Token::Newline => "end of line".to_string(),
            Token::Eof => "end of file".to_string(),
            other => format!("'{}'", other.punct()),
        }
    }

    fn punct(&self) -> &'static str {
        match self {
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::SafeNav => "&.",
            Token::Dot2 => "..",
            Token::Dot3 => "...",
            Token::Colon2 => "::",
            Token::Colon => ":",
            Token::Semi => ";",
            Token::Assign => "=",
            Token::OpAssign(op) => op,
            Token::OrAssign => "||=",
            Token::AndAssign => "&&=",
            Token::Eq => "==",
            Token::Eqq => "===",
            Token::Ne => "!=",
            Token::Match => "=~",
            Token::NotMatch => "!~",
            Token::Bang => "!",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Amp => "&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Pow => "**",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Le => "<=",
            Token::Ge => ">=",
            Token::Cmp => "<=>",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::FatArrow => "=>",
            Token::Arrow => "->",
            Token::Question => "?",
            Token::Tilde => "~",
            _ => "?",
        }
    }
}

/// A token with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
    pub col: u32,
    /// Whitespace separates this token from the previous one.
    pub space_before: bool,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}:{col}: {message}")]
pub struct LexError {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: u32,
    col: u32,
    tokens: Vec<Spanned>,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::starting_at(source, 1)
    }

    /// Lexer whose line numbers start at `line`, for interpolated code.
    pub fn starting_at(source: &'a str, line: u32) -> Self {
        Self {
            source,
            pos: 0,
            line,
            col: 1,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> (Vec<Spanned>, Vec<LexError>) {
        let bytes = self.source.as_bytes();
        let mut at_line_start = true;
        while self.pos < bytes.len() {
            let mut space = false;
            // Layout.
            while self.pos < bytes.len() {
                match bytes[self.pos] {
                    b' ' | b'\t' | b'\r' => {
                        space = true;
                        self.advance(1);
                    }
                    b'\\' if bytes.get(self.pos + 1) == Some(&b'\n') => {
                        space = true;
                        self.advance(2);
                    }
                    b'#' => {
                        while self.pos < bytes.len() && bytes[self.pos] != b'\n' {
                            self.advance(1);
                        }
                    }
                    b'\n' => {
                        let (line, col) = (self.line, self.col);
                        self.advance(1);
                        self.push_newline(line, col);
                        space = true;
                        at_line_start = true;
                    }
                    b'=' if at_line_start && self.source[self.pos..].starts_with("=begin") => {
                        self.skip_block_comment();
                    }
                    _ => break,
                }
            }
            if self.pos >= bytes.len() {
                break;
            }
            at_line_start = false;
            let (line, col, start) = (self.line, self.col, self.pos);
            let ch = bytes[self.pos];
            let manual = match ch {
                b'"' => {
                    self.advance(1);
                    self.lex_double_quoted(line, col).map(Token::Str)
                }
                b'\'' => {
                    self.advance(1);
                    self.lex_single_quoted(line, col)
                        .map(|s| Token::Str(vec![StrSeg::Lit(s)]))
                }
                b':' if bytes.get(self.pos + 1) == Some(&b'"') => {
                    self.advance(2);
                    self.lex_double_quoted(line, col).map(Token::DSymbol)
                }
                b'%' if matches!(bytes.get(self.pos + 1), Some(b'w' | b'i'))
                    && matches!(bytes.get(self.pos + 2), Some(b'[' | b'(' | b'{' | b'<')) =>
                {
                    let symbols = bytes[self.pos + 1] == b'i';
                    self.advance(2);
                    self.lex_word_list(line, col).map(|words| {
                        if symbols {
                            Token::Symbols(words)
                        } else {
                            Token::Words(words)
                        }
                    })
                }
                _ => None,
            };
            let token = match manual {
                Some(t) => Some(t),
                None if matches!(ch, b'"' | b'\'' | b'%' | b':')
                    && self.pos != start =>
                {
                    // A manual literal failed and already reported.
                    continue;
                }
                None => self.lex_logos(),
            };
            if let Some(token) = token {
                self.tokens.push(Spanned {
                    token,
                    line,
                    col,
                    space_before: space,
                    start,
                    end: self.pos,
                });
            }
        }
        let (line, col) = (self.line, self.col);
        self.tokens.push(Spanned {
            token: Token::Eof,
            line,
            col,
            space_before: true,
            start: self.source.len(),
            end: self.source.len(),
        });
        let tokens = mark_labels(self.tokens);
        (tokens, self.errors)
    }

    fn advance(&mut self, n: usize) {
        for c in self.source[self.pos..self.pos + n].chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.pos += n;
    }

    fn push_newline(&mut self, line: u32, col: u32) {
        let skip = matches!(
            self.tokens.last().map(|t| &t.token),
            None | Some(Token::Newline)
                | Some(Token::Semi)
                | Some(Token::Comma)
                | Some(Token::LParen)
                | Some(Token::LBracket)
                | Some(Token::LBrace)
                | Some(Token::Pipe)
                | Some(Token::Dot)
                | Some(Token::SafeNav)
                | Some(Token::Assign)
                | Some(Token::OpAssign(_))
                | Some(Token::OrAssign)
                | Some(Token::AndAssign)
                | Some(Token::AndAnd)
                | Some(Token::OrOr)
                | Some(Token::FatArrow)
                | Some(Token::Plus)
                | Some(Token::Minus)
                | Some(Token::Star)
                | Some(Token::Pow)
                | Some(Token::Slash)
                | Some(Token::Percent)
                | Some(Token::Eq)
                | Some(Token::Eqq)
                | Some(Token::Ne)
                | Some(Token::Cmp)
                | Some(Token::Lt)
                | Some(Token::Gt)
                | Some(Token::Le)
                | Some(Token::Ge)
                | Some(Token::Shl)
                | Some(Token::Shr)
                | Some(Token::Amp)
                | Some(Token::Caret)
                | Some(Token::Question)
                | Some(Token::Colon)
                | Some(Token::Label(_))
        );
        // A `.method` on the next line continues the expression.
        let rest = self.source[self.pos..].trim_start_matches([' ', '\t', '\r']);
        let leading_dot = rest.starts_with('.') && !rest.starts_with("..")
            || rest.starts_with("&.");
        if !skip && !leading_dot {
            self.tokens.push(Spanned {
                token: Token::Newline,
                line,
                col,
                space_before: false,
                start: self.pos - 1,
                end: self.pos,
            });
        }
    }

    fn skip_block_comment(&mut self) {
        match self.source[self.pos..].find("\n=end") {
            Some(off) => {
                self.advance(off + 5);
                while self.pos < self.source.len() && self.source.as_bytes()[self.pos] != b'\n' {
                    self.advance(1);
                }
            }
            None => {
                let rest = self.source.len() - self.pos;
                self.advance(rest);
            }
        }
    }

    fn lex_logos(&mut self) -> Option<Token> {
        let mut lexer = LogosToken::lexer(&self.source[self.pos..]);
        let (line, col) = (self.line, self.col);
        let Some(result) = lexer.next() else {
            let ch = self.source[self.pos..].chars().next().unwrap_or(' ');
            self.advance(ch.len_utf8());
            return None;
        };
        let len = lexer.span().end;
        match result {
            Ok(tok) => {
                self.advance(len.max(1));
                Some(convert(tok))
            }
            Err(()) => {
                let ch = self.source[self.pos..].chars().next().unwrap_or('\0');
                self.errors.push(LexError {
                    line,
                    col,
                    message: format!("invalid character '{}'", ch.escape_default()),
                });
                self.advance(ch.len_utf8());
                None
            }
        }
    }

    fn lex_single_quoted(&mut self, line: u32, col: u32) -> Option<String> {
        let mut out = String::new();
        let mut chars = self.source[self.pos..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\'' => {
                    self.advance(i + 1);
                    return Some(out);
                }
                '\\' => match chars.next() {
                    Some((_, q @ ('\'' | '\\'))) => out.push(q),
                    Some((_, other)) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => break,
                },
                c => out.push(c),
            }
        }
        self.unterminated(line, col);
        None
    }

    fn lex_double_quoted(&mut self, line: u32, col: u32) -> Option<Vec<StrSeg>> {
        let mut segs = Vec::new();
        let mut lit = String::new();
        let src = self.source;
        let bytes = src.as_bytes();
        let mut i = self.pos;
        let mut cur_line = self.line;
        while i < bytes.len() {
            let b = bytes[i];
            if b == b'"' {
                if !lit.is_empty() || segs.is_empty() {
                    segs.push(StrSeg::Lit(lit));
                }
                let n = i + 1 - self.pos;
                self.advance(n);
                return Some(segs);
            }
            match b {
                b'\\' => {
                    let Some(c) = src[i + 1..].chars().next() else {
                        break;
                    };
                    i += 1 + c.len_utf8();
                    match c {
                        'n' => lit.push('\n'),
                        't' => lit.push('\t'),
                        'r' => lit.push('\r'),
                        '0' => lit.push('\0'),
                        's' => lit.push(' '),
                        'e' => lit.push('\x1b'),
                        'a' => lit.push('\x07'),
                        'b' => lit.push('\x08'),
                        'v' => lit.push('\x0b'),
                        'f' => lit.push('\x0c'),
                        '\n' => cur_line += 1,
                        'u' => {
                            let (ch, used) = unicode_escape(&src[i..]);
                            lit.push(ch);
                            i += used;
                        }
                        'x' => {
                            let (byte, used) = hex_escape(&src[i..]);
                            i += used;
                            match byte {
                                Some(b) if b.is_ascii() => lit.push(char::from(b)),
                                Some(b) => self.errors.push(LexError {
                                    line: cur_line,
                                    col,
                                    message: format!("invalid escape \\x{:02x}: strings must be valid UTF-8", b),
                                }),
                                None => self.errors.push(LexError {
                                    line: cur_line,
                                    col,
                                    message: "invalid hex escape".to_string(),
                                }),
                            }
                        }
                        other => lit.push(other),
                    }
                }
                b'#' if bytes.get(i + 1) == Some(&b'{') => {
                    let start = i + 2;
                    let Some(end) = matching_brace(&src[start..]) else {
                        break;
                    };
                    if !lit.is_empty() {
                        segs.push(StrSeg::Lit(std::mem::take(&mut lit)));
                    }
                    let code = &src[start..start + end];
                    segs.push(StrSeg::Code(code.to_string(), cur_line));
                    cur_line += code.matches('\n').count() as u32;
                    i = start + end + 1;
                }
                _ => {
                    let c = src[i..].chars().next().unwrap_or('\0');
                    if c == '\n' {
                        cur_line += 1;
                    }
                    lit.push(c);
                    i += c.len_utf8();
                }
            }
        }
        self.unterminated(line, col);
        None
    }

    fn lex_word_list(&mut self, line: u32, col: u32) -> Option<Vec<String>> {
        let open = self.source.as_bytes()[self.pos];
        let close = match open {
            b'[' => ']',
            b'(' => ')',
            b'{' => '}',
            _ => '>',
        };
        self.advance(1);
        let rest = &self.source[self.pos..];
        match rest.find(close) {
            Some(end) => {
                let words = rest[..end].split_whitespace().map(str::to_string).collect();
                self.advance(end + 1);
                Some(words)
            }
            None => {
                self.unterminated(line, col);
                None
            }
        }
    }

    fn unterminated(&mut self, line: u32, col: u32) {
        self.errors.push(LexError {
            line,
            col,
            message: "unterminated string meets end of file".to_string(),
        });
        let rest = self.source.len() - self.pos;
        self.advance(rest);
    }
}

fn convert(tok: LogosToken) -> Token {
    match tok {
        LogosToken::Float(f) => Token::Float(f),
        LogosToken::Integer(n) => Token::Int(n),
        LogosToken::Ident(s) => match Keyword::from_ident(&s) {
            Some(k) => Token::Kw(k),
            None => Token::Ident(s),
        },
        LogosToken::Constant(s) => Token::Const(s),
        LogosToken::Ivar(s) => Token::Ivar(s),
        LogosToken::Gvar(s) => Token::Gvar(s),
        LogosToken::Symbol(s) => Token::Symbol(s),
        LogosToken::LParen => Token::LParen,
        LogosToken::RParen => Token::RParen,
        LogosToken::LBracket => Token::LBracket,
        LogosToken::RBracket => Token::RBracket,
        LogosToken::LBrace => Token::LBrace,
        LogosToken::RBrace => Token::RBrace,
        LogosToken::Comma => Token::Comma,
        LogosToken::Dot => Token::Dot,
        LogosToken::SafeNav => Token::SafeNav,
        LogosToken::Dot2 => Token::Dot2,
        LogosToken::Dot3 => Token::Dot3,
        LogosToken::Colon2 => Token::Colon2,
        LogosToken::Colon => Token::Colon,
        LogosToken::Semi => Token::Semi,
        LogosToken::Assign => Token::Assign,
        LogosToken::OpAssign(op) => Token::OpAssign(op),
        LogosToken::OrAssign => Token::OrAssign,
        LogosToken::AndAssign => Token::AndAssign,
        LogosToken::Eq => Token::Eq,
        LogosToken::Eqq => Token::Eqq,
        LogosToken::Ne => Token::Ne,
        LogosToken::Match => Token::Match,
        LogosToken::NotMatch => Token::NotMatch,
        LogosToken::Bang => Token::Bang,
        LogosToken::AndAnd => Token::AndAnd,
        LogosToken::OrOr => Token::OrOr,
        LogosToken::Amp => Token::Amp,
        LogosToken::Pipe => Token::Pipe,
        LogosToken::Caret => Token::Caret,
        LogosToken::Plus => Token::Plus,
        LogosToken::Minus => Token::Minus,
        LogosToken::Star => Token::Star,
        LogosToken::Pow => Token::Pow,
        LogosToken::Slash => Token::Slash,
        LogosToken::Percent => Token::Percent,
        LogosToken::Lt => Token::Lt,
        LogosToken::Gt => Token::Gt,
        LogosToken::Le => Token::Le,
        LogosToken::Ge => Token::Ge,
        LogosToken::Cmp => Token::Cmp,
        LogosToken::Shl => Token::Shl,
        LogosToken::Shr => Token::Shr,
        LogosToken::FatArrow => Token::FatArrow,
        LogosToken::Arrow => Token::Arrow,
        LogosToken::Question => Token::Question,
        LogosToken::Tilde => Token::Tilde,
    }
}

/// Rewrite `name` immediately followed by `:` into a label token.
fn mark_labels(tokens: Vec<Spanned>) -> Vec<Spanned> {
    let mut out: Vec<Spanned> = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();
    while let Some(tok) = iter.next() {
        let name = match &tok.token {
            Token::Ident(s) | Token::Const(s) => Some(s.clone()),
            Token::Kw(k) => Some(k.as_str().to_string()),
            _ => None,
        };
        if let Some(name) = name {
            let label = iter
                .peek()
                .is_some_and(|next| next.token == Token::Colon && next.start == tok.end);
            if label && !name.ends_with('?') {
                let colon = iter.next();
                out.push(Spanned {
                    token: Token::Label(name),
                    end: colon.map(|c| c.end).unwrap_or(tok.end),
                    ..tok
                });
                continue;
            }
        }
        out.push(tok);
    }
    out
}

/// Length of `src` up to the `}` closing an interpolation.
fn matching_brace(src: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_str: Option<char> = None;
    let mut escaped = false;
    for (i, c) in src.char_indices() {
        if let Some(q) = in_str {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                in_str = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => in_str = Some(c),
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Up to two hex digits after `\x`, and how many were read.
fn hex_escape(src: &str) -> (Option<u8>, usize) {
    let used = src.bytes().take(2).take_while(u8::is_ascii_hexdigit).count();
    (u8::from_str_radix(&src[..used], 16).ok(), used)
}

fn unicode_escape(src: &str) -> (char, usize) {
    if let Some(rest) = src.strip_prefix('{') {
        if let Some(end) = rest.find('}') {
            let ch = u32::from_str_radix(&rest[..end], 16)
                .ok()
                .and_then(char::from_u32)
                .unwrap_or('\u{fffd}');
            return (ch, end + 2);
        }
    }
    let hex: String = src.chars().take(4).collect();
    let ch = u32::from_str_radix(&hex, 16)
        .ok()
        .and_then(char::from_u32)
        .unwrap_or('\u{fffd}');
    (ch, hex.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        let (tokens, errors) = Lexer::new(src).tokenize();
        assert!(errors.is_empty(), "{:?}", errors);
        tokens.into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_numbers_and_ranges() {
        assert_eq!(
            kinds("1..2 3.5 0x1f 1_000"),
            vec![
                Token::Int(1),
                Token::Dot2,
                Token::Int(2),
                Token::Float(3.5),
                Token::Int(31),
                Token::Int(1000),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("def foo? end"),
            vec![
                Token::Kw(Keyword::Def),
                Token::Ident("foo?".into()),
                Token::Kw(Keyword::End),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_interpolation_segments() {
        let toks = kinds("\"a #{b} c\"");
        assert_eq!(
            toks[0],
            Token::Str(vec![
                StrSeg::Lit("a ".into()),
                StrSeg::Code("b".into(), 1),
                StrSeg::Lit(" c".into())
            ])
        );
    }

    #[test]
    fn test_newlines_collapse_and_continue() {
        let toks = kinds("a\n\n\nb +\nc\n  .d");
        assert_eq!(
            toks,
            vec![
                Token::Ident("a".into()),
                Token::Newline,
                Token::Ident("b".into()),
                Token::Plus,
                Token::Ident("c".into()),
                Token::Dot,
                Token::Ident("d".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_labels_and_symbols() {
        let toks = kinds("{foo: :bar, \"x\" => 1}");
        assert_eq!(toks[1], Token::Label("foo".into()));
        assert_eq!(toks[2], Token::Symbol("bar".into()));
        assert_eq!(toks[5], Token::FatArrow);
    }

    #[test]
    fn test_space_before_flag() {
        let (toks, _) = Lexer::new("foo [1] bar[1]").tokenize();
        assert!(toks[1].space_before);
        assert!(!toks[5].space_before);
    }

    #[test]
    fn test_unterminated_string_reports_position() {
        let (_, errors) = Lexer::new("x = \"abc").tokenize();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 1);
        assert_eq!(errors[0].col, 5);
    }

    #[test]
    fn test_hex_escapes() {
        assert_eq!(kinds("\"\\x41\\x7e!\""), vec![Token::Str(vec![StrSeg::Lit("A~!".into())]), Token::Eof]);

        let (_, errors) = Lexer::new("\"\\xff\"").tokenize();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("\\xff"), "{}", errors[0].message);

        let (_, errors) = Lexer::new("\"\\xg\"").tokenize();
        assert_eq!(errors[0].message, "invalid hex escape");
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("a # comment\nb"),
            vec![
                Token::Ident("a".into()),
                Token::Newline,
                Token::Ident("b".into()),
                Token::Eof
            ]
        );
    }
}
