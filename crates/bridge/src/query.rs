//! Minimal read-only query evaluation.
//!
//! The bridge is not a SQL engine; it evaluates exactly the shape needed
//! to slice stored datasets:
//!
//! ```text
//! SELECT <col[, col...] | *> FROM <alias>
//!   [WHERE <col> <op> <literal> [AND ...]]
//!   [ORDER BY <col> [ASC|DESC]]
//!   [LIMIT <n>]
//! ```
//!
//! Projection and filters are pushed into the artifact scan; ordering and
//! limit apply to the materialized result. Anything that would write is
//! rejected before any data is touched.

use stowage_columnar::{CmpOp, Filter, ReadOptions, Scalar, Table};
use stowage_core::{Error, Result};

/// A parsed query over one dataset alias.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub table: String,
    /// `None` means `SELECT *`.
    pub projection: Option<Vec<String>>,
    pub filters: Vec<Filter>,
    /// `(column, descending)`.
    pub order_by: Option<(String, bool)>,
    pub limit: Option<usize>,
}

impl QueryPlan {
    /// Columns the scan must produce: the projection plus every column the
    /// plan itself consumes. `None` scans everything.
    fn scan_options(&self) -> ReadOptions {
        let mut options = ReadOptions::default().with_filters(self.filters.clone());
        if let Some(projection) = &self.projection {
            let mut columns = projection.clone();
            for filter in &self.filters {
                if !columns.contains(&filter.column) {
                    columns.push(filter.column.clone());
                }
            }
            if let Some((order_col, _)) = &self.order_by {
                if !columns.contains(order_col) {
                    columns.push(order_col.clone());
                }
            }
            options = options.with_columns(columns);
        }
        options
    }

    /// Run the plan against a dataset reader.
    pub fn execute(
        &self,
        read: impl FnOnce(&ReadOptions) -> Result<Table>,
    ) -> Result<Table> {
        let mut table = read(&self.scan_options())?;
        if let Some((column, descending)) = &self.order_by {
            table = table.sort_by(column, *descending)?;
        }
        if let Some(limit) = self.limit {
            table = table.slice(0, limit);
        }
        if let Some(projection) = &self.projection {
            table = table.project(projection)?;
        }
        Ok(table)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Str(String),
    Symbol(String),
}

impl Token {
    fn keyword_eq(&self, kw: &str) -> bool {
        matches!(self, Token::Ident(s) if s.eq_ignore_ascii_case(kw))
    }
}

fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '\'' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => {
                            // doubled quote is an escaped quote
                            if chars.peek() == Some(&'\'') {
                                chars.next();
                                s.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some(c) => s.push(c),
                        None => {
                            return Err(Error::InvalidArgument(
                                "unterminated string literal".into(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(s));
            }
            c if c.is_ascii_digit() => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(s));
            }
            '-' => {
                chars.next();
                let mut s = String::from("-");
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if s == "-" {
                    return Err(Error::InvalidArgument("dangling '-' in query".into()));
                }
                tokens.push(Token::Number(s));
            }
            '<' | '>' | '!' => {
                chars.next();
                let mut s = c.to_string();
                if let Some(&next) = chars.peek() {
                    if next == '=' || (c == '<' && next == '>') {
                        s.push(next);
                        chars.next();
                    }
                }
                tokens.push(Token::Symbol(s));
            }
            '=' | ',' | '*' => {
                chars.next();
                tokens.push(Token::Symbol(c.to_string()));
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unexpected character in query: {other:?}"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        match self.next() {
            Some(token) if token.keyword_eq(kw) => Ok(()),
            other => Err(Error::InvalidArgument(format!(
                "expected {kw}, found {other:?}"
            ))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(s)) => Ok(s),
            other => Err(Error::InvalidArgument(format!(
                "expected identifier, found {other:?}"
            ))),
        }
    }
}

const WRITE_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "create", "alter", "truncate", "merge",
];

/// Parse a query string into a [`QueryPlan`].
pub fn parse(sql: &str) -> Result<QueryPlan> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser { tokens, pos: 0 };

    match parser.peek() {
        Some(token) if WRITE_KEYWORDS.iter().any(|kw| token.keyword_eq(kw)) => {
            return Err(Error::InvalidArgument(
                "only read-only SELECT queries are supported".into(),
            ));
        }
        _ => {}
    }
    parser.expect_keyword("select")?;

    // projection
    let projection = if matches!(parser.peek(), Some(Token::Symbol(s)) if s == "*") {
        parser.next();
        None
    } else {
        let mut columns = vec![parser.expect_ident()?];
        while matches!(parser.peek(), Some(Token::Symbol(s)) if s == ",") {
            parser.next();
            columns.push(parser.expect_ident()?);
        }
        Some(columns)
    };

    parser.expect_keyword("from")?;
    let table = parser.expect_ident()?;

    let mut filters = Vec::new();
    if parser.peek().map_or(false, |t| t.keyword_eq("where")) {
        parser.next();
        loop {
            filters.push(parse_condition(&mut parser)?);
            if parser.peek().map_or(false, |t| t.keyword_eq("and")) {
                parser.next();
            } else {
                break;
            }
        }
    }

    let mut order_by = None;
    if parser.peek().map_or(false, |t| t.keyword_eq("order")) {
        parser.next();
        parser.expect_keyword("by")?;
        let column = parser.expect_ident()?;
        let descending = match parser.peek() {
            Some(token) if token.keyword_eq("desc") => {
                parser.next();
                true
            }
            Some(token) if token.keyword_eq("asc") => {
                parser.next();
                false
            }
            _ => false,
        };
        order_by = Some((column, descending));
    }

    let mut limit = None;
    if parser.peek().map_or(false, |t| t.keyword_eq("limit")) {
        parser.next();
        match parser.next() {
            Some(Token::Number(n)) => {
                limit = Some(n.parse().map_err(|_| {
                    Error::InvalidArgument(format!("bad LIMIT value: {n}"))
                })?);
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "expected LIMIT count, found {other:?}"
                )))
            }
        }
    }

    if let Some(trailing) = parser.peek() {
        return Err(Error::InvalidArgument(format!(
            "unexpected trailing token: {trailing:?}"
        )));
    }

    Ok(QueryPlan {
        table,
        projection,
        filters,
        order_by,
        limit,
    })
}

fn parse_condition(parser: &mut Parser) -> Result<Filter> {
    let column = parser.expect_ident()?;

    // IS [NOT] NULL sugar
    if parser.peek().map_or(false, |t| t.keyword_eq("is")) {
        parser.next();
        let negated = if parser.peek().map_or(false, |t| t.keyword_eq("not")) {
            parser.next();
            true
        } else {
            false
        };
        parser.expect_keyword("null")?;
        let op = if negated { CmpOp::Ne } else { CmpOp::Eq };
        return Ok(Filter::new(column, op, Scalar::Null));
    }

    let op = match parser.next() {
        Some(Token::Symbol(s)) => CmpOp::parse(&s)?,
        other => {
            return Err(Error::InvalidArgument(format!(
                "expected comparison operator, found {other:?}"
            )))
        }
    };
    let value = match parser.next() {
        Some(Token::Str(s)) => Scalar::Utf8(s),
        Some(Token::Number(n)) => {
            if n.contains('.') {
                Scalar::Float64(n.parse().map_err(|_| {
                    Error::InvalidArgument(format!("bad numeric literal: {n}"))
                })?)
            } else {
                Scalar::Int64(n.parse().map_err(|_| {
                    Error::InvalidArgument(format!("bad numeric literal: {n}"))
                })?)
            }
        }
        Some(token) if token.keyword_eq("true") => Scalar::Bool(true),
        Some(token) if token.keyword_eq("false") => Scalar::Bool(false),
        Some(token) if token.keyword_eq("null") => Scalar::Null,
        other => {
            return Err(Error::InvalidArgument(format!(
                "expected literal, found {other:?}"
            )))
        }
    };
    Ok(Filter::new(column, op, value))
}
