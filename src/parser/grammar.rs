//! Recursive-descent parser for Soar productions.
//!
//! Each production either parses completely or contributes exactly one
//! [`SyntaxError`]; after an error the parser resumes at the next
//! `sp {` / `gp {` so that every broken production in a file is reported.

use crate::error::SyntaxError;
use crate::parser::ast::{
    Action, Anchor, AttrValueMake, AttrValueTest, Condition, ConditionBody, Constant, FunctionCall,
    LiteralKind, Pattern, Preference, PreferenceKind, Production, Relation, RhsValue, SimpleTest,
    SingleTest, Test, ValueMake, ValueTest, Variable,
};
use crate::parser::lexer::{tokenize, Token, TokenKind};
use crate::span::Span;

/// Keywords that anchor a condition's identifier to a schema root.
pub const ANCHOR_KEYWORDS: [&str; 2] = ["state", "impasse"];

/// Result of parsing a whole source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFile {
    /// Productions that parsed successfully, in source order.
    pub productions: Vec<Production>,
    /// One error per production that failed, plus stray top-level text.
    pub errors: Vec<SyntaxError>,
}

impl ParsedFile {
    /// Returns true if no syntax errors were found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parses every production in `src`.
#[must_use]
pub fn parse_file(src: &str) -> ParsedFile {
    let mut parser = Parser::new(tokenize(src));
    let mut out = ParsedFile::default();

    while !parser.at_eof() {
        if !parser.at_production_start() {
            let tok = parser.peek().clone();
            out.errors.push(SyntaxError::new(
                format!("expected 'sp', found {}", tok.kind),
                tok.span,
            ));
            parser.recover();
            continue;
        }
        match parser.production() {
            Ok(p) => out.productions.push(p),
            Err(e) => {
                out.errors.push(e);
                parser.recover();
            }
        }
    }
    out
}

/// Parses text that must contain exactly one production.
pub fn parse_production(src: &str) -> Result<Production, SyntaxError> {
    let mut parsed = parse_file(src);
    if let Some(err) = parsed.errors.into_iter().next() {
        return Err(err);
    }
    match parsed.productions.len() {
        1 => Ok(parsed.productions.remove(0)),
        0 => Err(SyntaxError::new("no production found", Span::new(0, 0, 1, 1))),
        _ => Err(SyntaxError::new(
            "expected a single production",
            parsed.productions[1].span,
        )),
    }
}

/// One production's worth of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChunk {
    /// Production name, when the text after `sp {` starts with one.
    pub name: Option<String>,
    /// Byte range of the chunk; starts at the beginning of a line.
    pub span: Span,
}

/// Splits `src` at every `sp {` / `gp {`, the same points the parser
/// recovers at. Each chunk runs from the start of its keyword's line to the
/// start of the next chunk; text before the first production joins the first
/// chunk.
#[must_use]
pub fn split_productions(src: &str) -> Vec<SourceChunk> {
    let tokens = tokenize(src);
    let mut starts: Vec<(usize, u32, Option<String>)> = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        let is_start = matches!(&tok.kind, TokenKind::Constant(s, LiteralKind::Symbol) if s == "sp" || s == "gp")
            && matches!(tokens.get(i + 1).map(|t| &t.kind), Some(TokenKind::LBrace));
        if !is_start {
            continue;
        }
        let name = match tokens.get(i + 2).map(|t| &t.kind) {
            Some(TokenKind::Constant(name, _)) => Some(name.clone()),
            _ => None,
        };
        let line_start = src[..tok.span.start].rfind('\n').map_or(0, |i| i + 1);
        // Productions sharing a line stay in one chunk.
        if starts.last().is_some_and(|last| last.0 == line_start) {
            continue;
        }
        starts.push((line_start, tok.span.line, name));
    }
    if starts.is_empty() {
        if tokens.iter().all(|t| t.kind == TokenKind::Eof) {
            return Vec::new();
        }
        return vec![SourceChunk {
            name: None,
            span: Span::new(0, src.len(), 1, 1),
        }];
    }
    if let Some(first) = starts.first_mut() {
        first.0 = 0;
        first.1 = 1;
    }

    let mut chunks = Vec::with_capacity(starts.len());
    for (i, (start, line, name)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map_or(src.len(), |next| next.0);
        chunks.push(SourceChunk {
            name: name.clone(),
            span: Span::new(*start, end, *line, 1),
        });
    }
    chunks
}

type PResult<T> = Result<T, SyntaxError>;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_nth_kind(&self, n: usize) -> &TokenKind {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if !self.at_eof() {
            self.pos += 1;
        }
        tok
    }

    fn at_production_start(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Constant(s, LiteralKind::Symbol) if s == "sp" || s == "gp")
            && matches!(self.peek_nth_kind(1), TokenKind::LBrace)
    }

    /// Skips to the next production start.
    fn recover(&mut self) {
        self.advance();
        while !self.at_eof() && !self.at_production_start() {
            self.advance();
        }
    }

    fn unexpected<T>(&self, expected: &str) -> PResult<T> {
        let tok = self.peek();
        Err(SyntaxError::new(
            format!("expected {expected}, found {}", tok.kind),
            tok.span,
        ))
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> PResult<Token> {
        if self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            self.unexpected(expected)
        }
    }

    fn production(&mut self) -> PResult<Production> {
        let start = self.advance();
        if matches!(&start.kind, TokenKind::Constant(s, _) if s == "gp") {
            return Err(SyntaxError::new(
                "gp productions are not supported by the checker",
                start.span,
            ));
        }
        self.expect(&TokenKind::LBrace, "'{'")?;

        let (name, name_span) = match self.peek_kind().clone() {
            TokenKind::Constant(name, _) => (name, self.advance().span),
            _ => return self.unexpected("production name"),
        };

        let mut doc = None;
        if let TokenKind::DocString(text) = self.peek_kind().clone() {
            self.advance();
            doc = Some(text);
        }
        let mut flags = Vec::new();
        while let TokenKind::Flag(flag) = self.peek_kind().clone() {
            self.advance();
            flags.push(flag);
        }

        let mut conditions = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::Arrow) {
            conditions.push(self.condition()?);
        }
        if conditions.is_empty() {
            return self.unexpected("at least one condition");
        }
        self.advance();

        let mut actions = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::RBrace) {
            actions.push(self.action()?);
        }
        let end = self.advance();

        Ok(Production {
            name,
            name_span,
            doc,
            flags,
            conditions,
            actions,
            span: start.span.to(end.span),
        })
    }

    // ------------------------------------------------------------------
    // Conditions
    // ------------------------------------------------------------------

    fn condition(&mut self) -> PResult<Condition> {
        let start = self.peek().span;
        let negated = matches!(self.peek_kind(), TokenKind::Minus);
        if negated {
            self.advance();
        }
        match self.peek_kind() {
            TokenKind::LParen => {
                let pattern = self.pattern()?;
                let span = start.to(pattern.span);
                Ok(Condition {
                    negated,
                    body: ConditionBody::Pattern(pattern),
                    span,
                })
            }
            TokenKind::LBrace => {
                self.advance();
                let mut inner = Vec::new();
                while !matches!(self.peek_kind(), TokenKind::RBrace) {
                    inner.push(self.condition()?);
                }
                if inner.is_empty() {
                    return self.unexpected("a condition");
                }
                let end = self.advance();
                Ok(Condition {
                    negated,
                    body: ConditionBody::Conjunction(inner),
                    span: start.to(end.span),
                })
            }
            _ => self.unexpected("'(' or '{' to start a condition"),
        }
    }

    fn pattern(&mut self) -> PResult<Pattern> {
        let open = self.expect(&TokenKind::LParen, "'('")?;

        let mut anchor = None;
        if let TokenKind::Constant(word, LiteralKind::Symbol) = self.peek_kind() {
            if ANCHOR_KEYWORDS.contains(&word.as_str()) {
                let keyword = word.clone();
                let span = self.advance().span;
                anchor = Some(Anchor { keyword, span });
            }
        }

        let id_test = self.test()?;
        let Some(id) = id_test.binding_variable().cloned() else {
            return Err(SyntaxError::new(
                "identifier test must bind a variable",
                id_test.span(),
            ));
        };
        let id_constraints = id_test
            .parts()
            .iter()
            .filter(|t| t.binding_variable().map(|v| v.name.as_str()) != Some(id.name.as_str()))
            .cloned()
            .collect();

        let mut tests = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::RParen) {
            tests.push(self.attr_value_test()?);
        }
        let close = self.advance();

        Ok(Pattern {
            anchor,
            id,
            id_constraints,
            tests,
            span: open.span.to(close.span),
        })
    }

    fn attr_value_test(&mut self) -> PResult<AttrValueTest> {
        let start = self.peek().span;
        let negated = matches!(self.peek_kind(), TokenKind::Minus);
        if negated {
            self.advance();
        }
        self.expect(&TokenKind::Caret, "'^'")?;

        let mut path = vec![self.test()?];
        while matches!(self.peek_kind(), TokenKind::Dot) {
            self.advance();
            path.push(self.test()?);
        }

        let mut values = Vec::new();
        let mut end = path.last().map_or(start, Test::span);
        while self.at_test_start() {
            let test = self.test()?;
            end = test.span();
            let acceptable = matches!(self.peek_kind(), TokenKind::Plus);
            if acceptable {
                end = self.advance().span;
            }
            values.push(ValueTest { test, acceptable });
        }

        Ok(AttrValueTest {
            negated,
            path,
            values,
            span: start.to(end),
        })
    }

    fn at_test_start(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Variable(_)
                | TokenKind::Constant(..)
                | TokenKind::Quoted(_)
                | TokenKind::DisjOpen
                | TokenKind::LBrace
                | TokenKind::Relation(_)
                | TokenKind::Equals
        )
    }

    fn test(&mut self) -> PResult<Test> {
        if matches!(self.peek_kind(), TokenKind::LBrace) {
            let open = self.advance();
            let mut tests = Vec::new();
            while !matches!(self.peek_kind(), TokenKind::RBrace) {
                tests.push(self.simple_test()?);
            }
            if tests.is_empty() {
                return self.unexpected("a test");
            }
            let close = self.advance();
            return Ok(Test::Conjunctive {
                tests,
                span: open.span.to(close.span),
            });
        }
        Ok(Test::Simple(self.simple_test()?))
    }

    fn simple_test(&mut self) -> PResult<SimpleTest> {
        if matches!(self.peek_kind(), TokenKind::DisjOpen) {
            let open = self.advance();
            let mut values = Vec::new();
            while !matches!(self.peek_kind(), TokenKind::DisjClose) {
                values.push(self.constant()?);
            }
            if values.is_empty() {
                return self.unexpected("a constant");
            }
            let close = self.advance();
            return Ok(SimpleTest::Disjunction {
                values,
                span: open.span.to(close.span),
            });
        }

        let start = self.peek().span;
        let relation = match self.peek_kind() {
            TokenKind::Relation(r) => {
                let r = *r;
                self.advance();
                r
            }
            TokenKind::Equals => {
                self.advance();
                Relation::Equal
            }
            _ => Relation::Equal,
        };
        let operand = match self.peek_kind() {
            TokenKind::Variable(_) => SingleTest::Variable(self.variable()?),
            _ => SingleTest::Constant(self.constant()?),
        };
        let end = match &operand {
            SingleTest::Variable(v) => v.span,
            SingleTest::Constant(c) => c.span,
        };
        Ok(SimpleTest::Relational {
            relation,
            operand,
            span: start.to(end),
        })
    }

    fn variable(&mut self) -> PResult<Variable> {
        match self.peek_kind().clone() {
            TokenKind::Variable(name) => {
                let span = self.advance().span;
                Ok(Variable { name, span })
            }
            _ => self.unexpected("a variable"),
        }
    }

    fn constant(&mut self) -> PResult<Constant> {
        match self.peek_kind().clone() {
            TokenKind::Constant(text, kind) => {
                let span = self.advance().span;
                Ok(Constant { text, kind, span })
            }
            TokenKind::Quoted(text) => {
                let span = self.advance().span;
                Ok(Constant {
                    text,
                    kind: LiteralKind::Quoted,
                    span,
                })
            }
            _ => self.unexpected("a constant"),
        }
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    fn action(&mut self) -> PResult<Action> {
        if !matches!(self.peek_kind(), TokenKind::LParen) {
            return self.unexpected("'(' to start an action");
        }
        if !matches!(self.peek_nth_kind(1), TokenKind::Variable(_)) {
            return Ok(Action::Call(self.function_call()?));
        }

        let open = self.advance();
        let id = self.variable()?;
        let mut makes = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::RParen) {
            makes.push(self.attr_value_make()?);
        }
        if makes.is_empty() {
            return self.unexpected("'^'");
        }
        let close = self.advance();
        Ok(Action::Make {
            id,
            makes,
            span: open.span.to(close.span),
        })
    }

    fn attr_value_make(&mut self) -> PResult<AttrValueMake> {
        let caret = self.expect(&TokenKind::Caret, "'^'")?;
        let mut path = vec![self.rhs_value()?];
        while matches!(self.peek_kind(), TokenKind::Dot) {
            self.advance();
            path.push(self.rhs_value()?);
        }

        let mut values = Vec::new();
        let mut end = path.last().map_or(caret.span, RhsValue::span);
        while self.at_rhs_value_start() {
            let value = self.rhs_value()?;
            end = value.span();
            let mut preferences = Vec::new();
            while let Some(kind) = self.preference_kind() {
                let pref_tok = self.advance();
                let mut span = pref_tok.span;
                let referent = if kind.is_binary_capable() && self.at_rhs_value_start() {
                    let r = self.rhs_value()?;
                    span = span.to(r.span());
                    Some(r)
                } else {
                    None
                };
                end = span;
                preferences.push(Preference {
                    kind,
                    referent,
                    span,
                });
            }
            values.push(ValueMake { value, preferences });
        }
        if values.is_empty() {
            return self.unexpected("a value");
        }

        Ok(AttrValueMake {
            path,
            values,
            span: caret.span.to(end),
        })
    }

    fn preference_kind(&self) -> Option<PreferenceKind> {
        Some(match self.peek_kind() {
            TokenKind::Plus => PreferenceKind::Acceptable,
            TokenKind::Minus => PreferenceKind::Reject,
            TokenKind::Bang => PreferenceKind::Require,
            TokenKind::Tilde => PreferenceKind::Prohibit,
            TokenKind::Equals => PreferenceKind::Indifferent,
            TokenKind::Relation(Relation::Greater) => PreferenceKind::Better,
            TokenKind::Relation(Relation::Less) => PreferenceKind::Worse,
            TokenKind::At => PreferenceKind::Reconsider,
            TokenKind::Amp => PreferenceKind::Parallel,
            _ => return None,
        })
    }

    fn at_rhs_value_start(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Variable(_) | TokenKind::Constant(..) | TokenKind::Quoted(_) | TokenKind::LParen
        )
    }

    fn rhs_value(&mut self) -> PResult<RhsValue> {
        match self.peek_kind() {
            TokenKind::Variable(_) => Ok(RhsValue::Variable(self.variable()?)),
            TokenKind::LParen => Ok(RhsValue::Call(self.function_call()?)),
            _ => Ok(RhsValue::Constant(self.constant()?)),
        }
    }

    fn function_call(&mut self) -> PResult<FunctionCall> {
        let open = self.expect(&TokenKind::LParen, "'('")?;
        let name = match self.peek_kind().clone() {
            TokenKind::Constant(name, _) => name,
            TokenKind::Plus => "+".to_string(),
            TokenKind::Minus => "-".to_string(),
            _ => return self.unexpected("a function name"),
        };
        self.advance();

        let mut args = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::RParen) {
            if !self.at_rhs_value_start() {
                return self.unexpected("a function argument or ')'");
            }
            args.push(self.rhs_value()?);
        }
        let close = self.advance();
        Ok(FunctionCall {
            name,
            args,
            span: open.span.to(close.span),
        })
    }
}
