//! Structural LogQL parser
//!
//! Recognises the subset of LogQL the gateway is willing to send to the
//! store: log queries (stream selector plus pipeline) and metric queries
//! built from range aggregations, vector aggregations and binary operators.
//! The parser only checks shape and extracts stream-selector matchers; it
//! does not evaluate anything.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOp {
    Eq,
    NotEq,
    RegexEq,
    RegexNotEq,
}

impl fmt::Display for LabelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            LabelOp::Eq => "=",
            LabelOp::NotEq => "!=",
            LabelOp::RegexEq => "=~",
            LabelOp::RegexNotEq => "!~",
        };
        f.write_str(op)
    }
}

/// One `name op "value"` matcher inside a stream selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    pub key: String,
    pub op: LabelOp,
    pub value: String,
}

impl LabelMatcher {
    /// Whether this matcher rejects streams that lack the label
    fn excludes_empty(&self) -> bool {
        match self.op {
            LabelOp::Eq => !self.value.is_empty(),
            LabelOp::RegexEq => !matches!(self.value.as_str(), "" | ".*" | "^.*$"),
            LabelOp::NotEq | LabelOp::RegexNotEq => false,
        }
    }
}

/// Whether an expression yields log lines, samples, or a literal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprKind {
    Log,
    Metric,
    Scalar,
}

/// Shape information extracted from a parsed expression
#[derive(Debug, Clone, PartialEq)]
pub struct LogqlExpr {
    pub kind: ExprKind,
    /// Matchers of every stream selector, in source order
    pub selectors: Vec<Vec<LabelMatcher>>,
    /// Pipeline stage names, in source order
    pub stages: Vec<String>,
}

impl LogqlExpr {
    /// Label names used in stream selectors, in source order
    pub fn selector_labels(&self) -> impl Iterator<Item = &str> {
        self.selectors
            .iter()
            .flatten()
            .map(|m| m.key.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

impl std::error::Error for ParseError {}

const RANGE_FUNCTIONS: &[&str] = &[
    "count_over_time",
    "rate",
    "bytes_over_time",
    "bytes_rate",
    "sum_over_time",
    "avg_over_time",
    "max_over_time",
    "min_over_time",
    "first_over_time",
    "last_over_time",
    "stddev_over_time",
    "stdvar_over_time",
    "quantile_over_time",
    "absent_over_time",
];

const VECTOR_AGGREGATIONS: &[&str] = &[
    "sum", "avg", "min", "max", "count", "stddev", "stdvar", "topk", "bottomk", "sort",
    "sort_desc",
];

/// Parenthesis and aggregation nesting accepted before the parser gives up
const MAX_NESTING_DEPTH: usize = 64;

const DURATION_UNITS: &[&str] = &["ns", "us", "µs", "ms", "s", "m", "h", "d", "w", "y"];

/// Parse a complete LogQL expression
pub fn parse(input: &str) -> Result<LogqlExpr, ParseError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
        selectors: Vec::new(),
        stages: Vec::new(),
        depth: 0,
    };

    let kind = parser.expr()?;
    if let Some((token, offset)) = parser.tokens.get(parser.pos) {
        return Err(ParseError {
            message: format!("unexpected {} after end of expression", token),
            offset: *offset,
        });
    }
    if parser.selectors.is_empty() {
        return Err(ParseError {
            message: "expression has no stream selector".to_string(),
            offset: 0,
        });
    }

    Ok(LogqlExpr {
        kind,
        selectors: parser.selectors,
        stages: parser.stages,
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Pipe,
    PipeExact,
    PipeMatch,
    NotEq,
    NotMatch,
    Eq,
    RegexEq,
    EqEq,
    Gt,
    Ge,
    Lt,
    Le,
    Arith(char),
    Ident(String),
    Str(String),
    Number(String),
    Duration(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LBrace => f.write_str("'{'"),
            Token::RBrace => f.write_str("'}'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::LBracket => f.write_str("'['"),
            Token::RBracket => f.write_str("']'"),
            Token::Comma => f.write_str("','"),
            Token::Pipe => f.write_str("'|'"),
            Token::PipeExact => f.write_str("'|='"),
            Token::PipeMatch => f.write_str("'|~'"),
            Token::NotEq => f.write_str("'!='"),
            Token::NotMatch => f.write_str("'!~'"),
            Token::Eq => f.write_str("'='"),
            Token::RegexEq => f.write_str("'=~'"),
            Token::EqEq => f.write_str("'=='"),
            Token::Gt => f.write_str("'>'"),
            Token::Ge => f.write_str("'>='"),
            Token::Lt => f.write_str("'<'"),
            Token::Le => f.write_str("'<='"),
            Token::Arith(c) => write!(f, "'{}'", c),
            Token::Ident(s) => write!(f, "identifier '{}'", s),
            Token::Str(s) => write!(f, "string \"{}\"", s),
            Token::Number(s) => write!(f, "number {}", s),
            Token::Duration(s) => write!(f, "duration {}", s),
        }
    }
}

struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<(Token, usize)>, ParseError> {
        let mut tokens = Vec::new();
        while let Some(&(offset, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
                continue;
            }
            if c == '#' {
                // Comment runs to end of line
                for (_, c) in self.chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                continue;
            }

            let token = match c {
                '{' => self.single(Token::LBrace),
                '}' => self.single(Token::RBrace),
                '(' => self.single(Token::LParen),
                ')' => self.single(Token::RParen),
                '[' => self.single(Token::LBracket),
                ']' => self.single(Token::RBracket),
                ',' => self.single(Token::Comma),
                '+' | '-' | '*' | '/' | '%' | '^' => self.single(Token::Arith(c)),
                '|' => {
                    self.chars.next();
                    match self.peek_char() {
                        Some('=') => self.single(Token::PipeExact),
                        Some('~') => self.single(Token::PipeMatch),
                        _ => Token::Pipe,
                    }
                }
                '!' => {
                    self.chars.next();
                    match self.peek_char() {
                        Some('=') => self.single(Token::NotEq),
                        Some('~') => self.single(Token::NotMatch),
                        _ => {
                            return Err(ParseError {
                                message: "'!' must be followed by '=' or '~'".to_string(),
                                offset,
                            })
                        }
                    }
                }
                '=' => {
                    self.chars.next();
                    match self.peek_char() {
                        Some('~') => self.single(Token::RegexEq),
                        Some('=') => self.single(Token::EqEq),
                        _ => Token::Eq,
                    }
                }
                '>' | '<' => {
                    self.chars.next();
                    let or_equal = self.peek_char() == Some('=');
                    if or_equal {
                        self.chars.next();
                    }
                    match (c, or_equal) {
                        ('>', false) => Token::Gt,
                        ('>', true) => Token::Ge,
                        ('<', false) => Token::Lt,
                        _ => Token::Le,
                    }
                }
                '"' => Token::Str(self.quoted(offset)?),
                '`' => Token::Str(self.raw(offset)?),
                c if c.is_ascii_digit() || c == '.' => self.number(),
                c if c.is_ascii_alphabetic() || c == '_' => Token::Ident(self.ident()),
                other => {
                    return Err(ParseError {
                        message: format!("unexpected character '{}'", other),
                        offset,
                    })
                }
            };
            tokens.push((token, offset));
        }
        Ok(tokens)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn quoted(&mut self, start: usize) -> Result<String, ParseError> {
        self.chars.next();
        let mut value = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                '"' => return Ok(value),
                '\\' => match self.chars.next() {
                    Some((_, escaped)) => {
                        // Regex escapes such as \d are kept verbatim
                        if !matches!(escaped, '"' | '\\') {
                            value.push('\\');
                        }
                        value.push(escaped);
                    }
                    None => break,
                },
                c => value.push(c),
            }
        }
        Err(ParseError {
            message: "unterminated string literal".to_string(),
            offset: start,
        })
    }

    fn raw(&mut self, start: usize) -> Result<String, ParseError> {
        self.chars.next();
        let mut value = String::new();
        for (_, c) in self.chars.by_ref() {
            if c == '`' {
                return Ok(value);
            }
            value.push(c);
        }
        Err(ParseError {
            message: "unterminated raw string literal".to_string(),
            offset: start,
        })
    }

    fn number(&mut self) -> Token {
        let start = self.chars.peek().map(|&(i, _)| i).unwrap_or(self.input.len());
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '.' || c == 'µ' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }

        let text = &self.input[start..end];
        if is_duration(text) {
            Token::Duration(text.to_string())
        } else {
            Token::Number(text.to_string())
        }
    }

    fn ident(&mut self) -> String {
        let mut value = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                value.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        value
    }
}

/// "5m", "1h30m", "250ms", "1.5s": numeric runs each followed by a known unit
fn is_duration(text: &str) -> bool {
    let mut rest = text;
    if rest.is_empty() {
        return false;
    }
    while !rest.is_empty() {
        let digits = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .count();
        if digits == 0 || !is_number(&rest[..digits]) {
            return false;
        }
        rest = &rest[digits..];
        // Longest unit first so "ms" wins over "m"
        let unit = DURATION_UNITS
            .iter()
            .filter(|u| rest.starts_with(*u))
            .max_by_key(|u| u.len());
        match unit {
            Some(unit) => rest = &rest[unit.len()..],
            None => return false,
        }
    }
    true
}

fn is_number(text: &str) -> bool {
    text.parse::<f64>().is_ok()
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
    selectors: Vec<Vec<LabelMatcher>>,
    stages: Vec<String>,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or(self.end)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            offset: self.offset(),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(token) => self.error(format!("expected {}, found {}", expected, token)),
            None => self.error(format!("expected {}, found end of input", expected)),
        }
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<(), ParseError> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_string(&mut self, expected: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Str(value)) => {
                let value = value.clone();
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_duration(&mut self, expected: &str) -> Result<(), ParseError> {
        match self.peek() {
            Some(Token::Duration(_)) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn peek_ident(&self) -> Option<&str> {
        match self.peek() {
            Some(Token::Ident(name)) => Some(name.as_str()),
            _ => None,
        }
    }

    // expr := operand (binary_op ["bool"] operand)*
    fn expr(&mut self) -> Result<ExprKind, ParseError> {
        let mut kind = self.operand()?;
        while self.binary_operator() {
            if self.peek_ident() == Some("bool") {
                self.pos += 1;
            }
            let rhs_offset = self.offset();
            let rhs = self.operand()?;
            if kind == ExprKind::Log || rhs == ExprKind::Log {
                return Err(ParseError {
                    message: "binary operators require metric or scalar operands, not log queries"
                        .to_string(),
                    offset: rhs_offset,
                });
            }
            if rhs == ExprKind::Metric {
                kind = ExprKind::Metric;
            }
        }
        Ok(kind)
    }

    fn binary_operator(&mut self) -> bool {
        let is_op = match self.peek() {
            Some(
                Token::Arith(_)
                | Token::EqEq
                | Token::NotEq
                | Token::Gt
                | Token::Ge
                | Token::Lt
                | Token::Le,
            ) => true,
            Some(Token::Ident(word)) => matches!(word.as_str(), "and" | "or" | "unless"),
            _ => false,
        };
        if is_op {
            self.pos += 1;
        }
        is_op
    }

    fn operand(&mut self) -> Result<ExprKind, ParseError> {
        // Unary minus chains are consumed in place
        while self.peek() == Some(&Token::Arith('-')) {
            self.pos += 1;
        }

        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error(format!(
                "expression nested too deeply (more than {} levels)",
                MAX_NESTING_DEPTH
            )));
        }
        self.depth += 1;
        let kind = self.nested_operand();
        self.depth -= 1;
        kind
    }

    fn nested_operand(&mut self) -> Result<ExprKind, ParseError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let kind = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(kind)
            }
            Some(Token::LBrace) => {
                self.log_query()?;
                Ok(ExprKind::Log)
            }
            Some(Token::Number(text)) => {
                if !is_number(text) {
                    return Err(self.error(format!("invalid number '{}'", text)));
                }
                self.pos += 1;
                Ok(ExprKind::Scalar)
            }
            Some(Token::Ident(name)) => {
                let name = name.clone();
                if RANGE_FUNCTIONS.contains(&name.as_str()) {
                    self.range_aggregation(&name)?;
                    Ok(ExprKind::Metric)
                } else if VECTOR_AGGREGATIONS.contains(&name.as_str()) {
                    self.vector_aggregation(&name)?;
                    Ok(ExprKind::Metric)
                } else if name == "vector" {
                    self.pos += 1;
                    self.expect(Token::LParen, "'(' after vector")?;
                    self.scalar_literal()?;
                    self.expect(Token::RParen, "')'")?;
                    Ok(ExprKind::Scalar)
                } else {
                    Err(self.error(format!("unknown function '{}'", name)))
                }
            }
            _ => Err(self.unexpected("a stream selector, aggregation or number")),
        }
    }

    fn scalar_literal(&mut self) -> Result<(), ParseError> {
        if self.peek() == Some(&Token::Arith('-')) {
            self.pos += 1;
        }
        match self.peek() {
            Some(Token::Number(text)) if is_number(text) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.unexpected("a number")),
        }
    }

    // log_query := selector pipeline
    fn log_query(&mut self) -> Result<(), ParseError> {
        self.selector()?;
        self.pipeline()
    }

    fn selector(&mut self) -> Result<(), ParseError> {
        let start = self.offset();
        self.expect(Token::LBrace, "'{'")?;

        let mut matchers = Vec::new();
        loop {
            if self.peek() == Some(&Token::RBrace) {
                break;
            }
            let key = self.expect_ident("a label name")?;
            let op = match self.peek() {
                Some(Token::Eq) => LabelOp::Eq,
                Some(Token::NotEq) => LabelOp::NotEq,
                Some(Token::RegexEq) => LabelOp::RegexEq,
                Some(Token::NotMatch) => LabelOp::RegexNotEq,
                _ => return Err(self.unexpected("a matcher operator (=, !=, =~, !~)")),
            };
            self.pos += 1;
            let value = self.expect_string("a quoted label value")?;
            matchers.push(LabelMatcher { key, op, value });

            match self.peek() {
                Some(Token::Comma) => self.pos += 1,
                Some(Token::RBrace) => {}
                _ => return Err(self.unexpected("',' or '}'")),
            }
        }
        self.expect(Token::RBrace, "'}'")?;

        if matchers.is_empty() {
            return Err(ParseError {
                message: "stream selector needs at least one label matcher".to_string(),
                offset: start,
            });
        }
        if !matchers.iter().any(LabelMatcher::excludes_empty) {
            return Err(ParseError {
                message: "stream selector needs at least one matcher that does not match empty values"
                    .to_string(),
                offset: start,
            });
        }

        self.selectors.push(matchers);
        Ok(())
    }

    fn pipeline(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(Token::PipeExact | Token::PipeMatch | Token::NotEq | Token::NotMatch) => {
                    self.pos += 1;
                    self.line_filter_value()?;
                    // `|= "a" or "b"`
                    while self.peek_ident() == Some("or")
                        && matches!(self.peek_at(1), Some(Token::Str(_)))
                    {
                        self.pos += 1;
                        self.line_filter_value()?;
                    }
                    self.stages.push("line_filter".to_string());
                }
                Some(Token::Pipe) => {
                    self.pos += 1;
                    self.stage()?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn line_filter_value(&mut self) -> Result<(), ParseError> {
        if self.peek_ident() == Some("ip") {
            self.pos += 1;
            self.expect(Token::LParen, "'(' after ip")?;
            self.expect_string("an IP pattern")?;
            return self.expect(Token::RParen, "')'");
        }
        self.expect_string("a quoted line filter value").map(|_| ())
    }

    fn stage(&mut self) -> Result<(), ParseError> {
        let name = match self.peek_ident() {
            Some(name) => name.to_string(),
            None => return Err(self.unexpected("a pipeline stage after '|'")),
        };

        // A comparison after the identifier means a label filter
        if matches!(
            self.peek_at(1),
            Some(
                Token::Eq
                    | Token::NotEq
                    | Token::RegexEq
                    | Token::NotMatch
                    | Token::EqEq
                    | Token::Gt
                    | Token::Ge
                    | Token::Lt
                    | Token::Le
            )
        ) {
            self.label_filter_chain()?;
            self.stages.push("label_filter".to_string());
            return Ok(());
        }

        self.pos += 1;
        match name.as_str() {
            "json" => self.extraction_list(false)?,
            "logfmt" => {
                self.logfmt_flags()?;
                self.extraction_list(false)?;
            }
            "regexp" | "pattern" | "line_format" => {
                self.expect_string(&format!("a quoted template for {}", name))?;
            }
            "unpack" | "decolorize" => {}
            "label_format" => self.extraction_list(true)?,
            "drop" | "keep" => self.drop_keep_list(&name)?,
            "unwrap" => self.unwrap_target()?,
            other => {
                self.pos -= 1;
                return Err(self.error(format!("unknown pipeline stage '{}'", other)));
            }
        }

        self.stages.push(name);
        Ok(())
    }

    fn logfmt_flags(&mut self) -> Result<(), ParseError> {
        while self.peek() == Some(&Token::Arith('-')) && self.peek_at(1) == Some(&Token::Arith('-'))
        {
            self.pos += 2;
            let flag = self.expect_ident("a logfmt flag")?;
            if !matches!(flag.as_str(), "strict" | "keep_empty") {
                self.pos -= 1;
                return Err(self.error(format!("unknown logfmt flag '--{}'", flag)));
            }
        }
        Ok(())
    }

    // `name`, `name="expr"` or, for label_format, `name=other` / `name="tmpl"`
    fn extraction_list(&mut self, required: bool) -> Result<(), ParseError> {
        if self.peek_ident().is_none() {
            return if required {
                Err(self.unexpected("a label assignment"))
            } else {
                Ok(())
            };
        }

        loop {
            self.expect_ident("a label name")?;
            if self.peek() == Some(&Token::Eq) {
                self.pos += 1;
                match self.peek() {
                    Some(Token::Str(_)) => self.pos += 1,
                    Some(Token::Ident(_)) if required => self.pos += 1,
                    _ => return Err(self.unexpected("a quoted expression")),
                }
            } else if required {
                return Err(self.unexpected("'=' in label_format"));
            }

            if self.peek() == Some(&Token::Comma) && matches!(self.peek_at(1), Some(Token::Ident(_)))
            {
                self.pos += 1;
            } else {
                return Ok(());
            }
        }
    }

    fn drop_keep_list(&mut self, stage: &str) -> Result<(), ParseError> {
        if self.peek_ident().is_none() {
            return Err(self.unexpected(&format!("a label name after {}", stage)));
        }
        loop {
            self.expect_ident("a label name")?;
            if matches!(
                self.peek(),
                Some(Token::Eq | Token::NotEq | Token::RegexEq | Token::NotMatch)
            ) {
                self.pos += 1;
                self.expect_string("a quoted label value")?;
            }
            if self.peek() == Some(&Token::Comma) && matches!(self.peek_at(1), Some(Token::Ident(_)))
            {
                self.pos += 1;
            } else {
                return Ok(());
            }
        }
    }

    fn unwrap_target(&mut self) -> Result<(), ParseError> {
        let name = self.expect_ident("a label to unwrap")?;
        if self.peek() == Some(&Token::LParen) {
            if !matches!(name.as_str(), "duration" | "duration_seconds" | "bytes") {
                self.pos -= 1;
                return Err(self.error(format!("unknown unwrap conversion '{}'", name)));
            }
            self.pos += 1;
            self.expect_ident("a label to unwrap")?;
            self.expect(Token::RParen, "')'")?;
        }
        Ok(())
    }

    // label_filter := predicate (("and" | "or" | ",") predicate)*
    fn label_filter_chain(&mut self) -> Result<(), ParseError> {
        self.label_predicate()?;
        loop {
            let joined = match self.peek() {
                Some(Token::Comma) => true,
                Some(Token::Ident(word)) => matches!(word.as_str(), "and" | "or"),
                _ => false,
            };
            if !joined || !matches!(self.peek_at(1), Some(Token::Ident(_))) {
                return Ok(());
            }
            self.pos += 1;
            self.label_predicate()?;
        }
    }

    fn label_predicate(&mut self) -> Result<(), ParseError> {
        self.expect_ident("a label name")?;
        let op = self.peek().cloned();
        if op.is_some() {
            self.pos += 1;
        }
        match op {
            Some(Token::RegexEq | Token::NotMatch) => {
                self.expect_string("a quoted regular expression")?;
            }
            Some(Token::Eq | Token::NotEq | Token::EqEq) => match self.peek() {
                Some(Token::Str(_) | Token::Duration(_)) => self.pos += 1,
                Some(Token::Number(_)) | Some(Token::Arith('-')) => self.scalar_literal()?,
                _ => return Err(self.unexpected("a string, number or duration")),
            },
            Some(Token::Gt | Token::Ge | Token::Lt | Token::Le) => match self.peek() {
                Some(Token::Duration(_)) => self.pos += 1,
                Some(Token::Number(_)) | Some(Token::Arith('-')) => self.scalar_literal()?,
                _ => return Err(self.unexpected("a number or duration")),
            },
            Some(_) => {
                self.pos -= 1;
                return Err(self.unexpected("a comparison operator"));
            }
            None => return Err(self.unexpected("a comparison operator")),
        }
        Ok(())
    }

    // range_aggregation := fn "(" [number ","] log_range ")" [grouping]
    fn range_aggregation(&mut self, name: &str) -> Result<(), ParseError> {
        self.pos += 1;
        self.expect(Token::LParen, &format!("'(' after {}", name))?;
        if name == "quantile_over_time" {
            self.scalar_literal()?;
            self.expect(Token::Comma, "',' after quantile")?;
        }

        // Both `rate({...} [5m])` and `rate(({...})[5m])` are accepted
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            self.log_query()?;
            self.expect(Token::RParen, "')'")?;
        } else if self.peek() == Some(&Token::LBrace) {
            self.log_query()?;
        } else {
            return Err(self.unexpected(&format!("a log query inside {}", name)));
        }

        if self.peek() != Some(&Token::LBracket) {
            return Err(self.error(format!(
                "range aggregation '{}' requires a [duration] range",
                name
            )));
        }
        self.pos += 1;
        self.expect_duration("a duration such as 5m")?;
        self.expect(Token::RBracket, "']'")?;

        if self.peek_ident() == Some("offset") {
            self.pos += 1;
            self.expect_duration("an offset duration")?;
        }

        self.expect(Token::RParen, "')'")?;
        self.optional_grouping()
    }

    // vector_aggregation := fn [grouping] "(" [number ","] expr ")" [grouping]
    fn vector_aggregation(&mut self, name: &str) -> Result<(), ParseError> {
        self.pos += 1;
        self.optional_grouping()?;
        self.expect(Token::LParen, &format!("'(' after {}", name))?;

        if matches!(name, "topk" | "bottomk") {
            self.scalar_literal()?;
            self.expect(Token::Comma, &format!("',' after {} parameter", name))?;
        }

        let inner_offset = self.offset();
        let inner = self.expr()?;
        if inner == ExprKind::Log {
            return Err(ParseError {
                message: format!(
                    "'{}' aggregates samples; wrap the log query in a range aggregation",
                    name
                ),
                offset: inner_offset,
            });
        }
        self.expect(Token::RParen, "')'")?;
        self.optional_grouping()
    }

    fn optional_grouping(&mut self) -> Result<(), ParseError> {
        if !matches!(self.peek_ident(), Some("by" | "without")) {
            return Ok(());
        }
        self.pos += 1;
        self.expect(Token::LParen, "'(' after by/without")?;
        if self.peek() != Some(&Token::RParen) {
            loop {
                self.expect_ident("a label name")?;
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')'")
    }
}
