//! Tokenizer for Soar production text.
//!
//! The lexer never fails: characters it cannot classify become
//! [`TokenKind::Unknown`] and unterminated quotes become
//! [`TokenKind::Unterminated`], both of which the grammar reports as syntax
//! errors so that recovery can continue at the next production.

use std::fmt;

use crate::parser::ast::{LiteralKind, Relation};
use crate::span::Span;

/// Token categories.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `<name>`; the stored text includes the angle brackets.
    Variable(String),
    /// A symbolic, integer, or float constant.
    Constant(String, LiteralKind),
    /// `|text|`; the stored text excludes the bars.
    Quoted(String),
    /// `"text"`, only legal as a production documentation string.
    DocString(String),
    /// `:name` production flag.
    Flag(String),
    /// `^`
    Caret,
    /// `.`
    Dot,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `<<`
    DisjOpen,
    /// `>>`
    DisjClose,
    /// `<>`, `<`, `>`, `<=`, `>=`, `<=>`
    Relation(Relation),
    /// `=`
    Equals,
    /// `-->`
    Arrow,
    /// `-`
    Minus,
    /// `+`
    Plus,
    /// `!`
    Bang,
    /// `~`
    Tilde,
    /// `@`
    At,
    /// `&`
    Amp,
    /// `,`
    Comma,
    /// A character with no meaning in the rule language.
    Unknown(char),
    /// A `|` or `"` quote that runs to end of input.
    Unterminated(char),
    /// End of input.
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable(v) => write!(f, "variable {v}"),
            Self::Constant(c, _) => write!(f, "'{c}'"),
            Self::Quoted(q) => write!(f, "|{q}|"),
            Self::DocString(_) => f.write_str("documentation string"),
            Self::Flag(flag) => write!(f, ":{flag}"),
            Self::Caret => f.write_str("'^'"),
            Self::Dot => f.write_str("'.'"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::LBrace => f.write_str("'{'"),
            Self::RBrace => f.write_str("'}'"),
            Self::DisjOpen => f.write_str("'<<'"),
            Self::DisjClose => f.write_str("'>>'"),
            Self::Relation(r) => write!(f, "'{r}'"),
            Self::Equals => f.write_str("'='"),
            Self::Arrow => f.write_str("'-->'"),
            Self::Minus => f.write_str("'-'"),
            Self::Plus => f.write_str("'+'"),
            Self::Bang => f.write_str("'!'"),
            Self::Tilde => f.write_str("'~'"),
            Self::At => f.write_str("'@'"),
            Self::Amp => f.write_str("'&'"),
            Self::Comma => f.write_str("','"),
            Self::Unknown(c) => write!(f, "unexpected character '{c}'"),
            Self::Unterminated(q) => write!(f, "unterminated {q}"),
            Self::Eof => f.write_str("end of input"),
        }
    }
}

/// A token and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Category and payload.
    pub kind: TokenKind,
    /// Source position.
    pub span: Span,
}

/// Characters allowed inside symbolic constants and variable names.
pub(crate) fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '*' | '$' | '%' | '?' | '/')
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) {
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
    }

    fn mark(&self) -> (usize, u32, u32) {
        (self.pos, self.line, self.column)
    }

    fn span_from(&self, mark: (usize, u32, u32)) -> Span {
        Span::new(mark.0, self.pos, mark.1, mark.2)
    }
}

/// Splits `src` into tokens. The last token is always [`TokenKind::Eof`].
#[must_use]
pub fn tokenize(src: &str) -> Vec<Token> {
    let mut cur = Cursor::new(src);
    let mut tokens = Vec::new();

    loop {
        cur.bump_while(char::is_whitespace);
        if cur.peek() == Some('#') {
            cur.bump_while(|c| c != '\n');
            continue;
        }

        let mark = cur.mark();
        let Some(c) = cur.peek() else {
            tokens.push(Token {
                kind: TokenKind::Eof,
                span: cur.span_from(mark),
            });
            return tokens;
        };

        let kind = match c {
            '^' => single(&mut cur, TokenKind::Caret),
            '.' => single(&mut cur, TokenKind::Dot),
            '(' => single(&mut cur, TokenKind::LParen),
            ')' => single(&mut cur, TokenKind::RParen),
            '{' => single(&mut cur, TokenKind::LBrace),
            '}' => single(&mut cur, TokenKind::RBrace),
            '=' => single(&mut cur, TokenKind::Equals),
            '+' => single(&mut cur, TokenKind::Plus),
            '!' => single(&mut cur, TokenKind::Bang),
            '~' => single(&mut cur, TokenKind::Tilde),
            '@' => single(&mut cur, TokenKind::At),
            '&' => single(&mut cur, TokenKind::Amp),
            ',' => single(&mut cur, TokenKind::Comma),
            '<' => lex_open_angle(&mut cur),
            '>' => lex_close_angle(&mut cur),
            '-' => lex_minus(&mut cur),
            '|' => lex_quoted(&mut cur, '|'),
            '"' => lex_quoted(&mut cur, '"'),
            ':' => {
                cur.bump();
                let start = cur.pos;
                cur.bump_while(is_symbol_char);
                TokenKind::Flag(src[start..cur.pos].to_string())
            }
            c if is_symbol_char(c) => lex_constant(&mut cur),
            other => {
                cur.bump();
                TokenKind::Unknown(other)
            }
        };

        tokens.push(Token {
            kind,
            span: cur.span_from(mark),
        });
    }
}

fn single(cur: &mut Cursor<'_>, kind: TokenKind) -> TokenKind {
    cur.bump();
    kind
}

fn lex_open_angle(cur: &mut Cursor<'_>) -> TokenKind {
    match cur.peek_nth(1) {
        Some('<') => {
            cur.bump();
            cur.bump();
            TokenKind::DisjOpen
        }
        Some('>') => {
            cur.bump();
            cur.bump();
            TokenKind::Relation(Relation::NotEqual)
        }
        Some('=') => {
            cur.bump();
            cur.bump();
            if cur.peek() == Some('>') {
                cur.bump();
                TokenKind::Relation(Relation::SameType)
            } else {
                TokenKind::Relation(Relation::LessOrEqual)
            }
        }
        Some(c) if is_symbol_char(c) => {
            // `<name>` is a variable only if the run of name characters is
            // closed by '>'; otherwise '<' is a less-than relation.
            let name_len: usize = cur.rest()[1..]
                .chars()
                .take_while(|c| is_symbol_char(*c))
                .map(char::len_utf8)
                .sum();
            if cur.rest()[1 + name_len..].starts_with('>') {
                let start = cur.pos;
                for _ in 0..cur.rest()[..name_len + 2].chars().count() {
                    cur.bump();
                }
                TokenKind::Variable(cur.src[start..cur.pos].to_string())
            } else {
                cur.bump();
                TokenKind::Relation(Relation::Less)
            }
        }
        _ => {
            cur.bump();
            TokenKind::Relation(Relation::Less)
        }
    }
}

fn lex_close_angle(cur: &mut Cursor<'_>) -> TokenKind {
    cur.bump();
    match cur.peek() {
        Some('>') => {
            cur.bump();
            TokenKind::DisjClose
        }
        Some('=') => {
            cur.bump();
            TokenKind::Relation(Relation::GreaterOrEqual)
        }
        _ => TokenKind::Relation(Relation::Greater),
    }
}

fn lex_minus(cur: &mut Cursor<'_>) -> TokenKind {
    if cur.rest().starts_with("-->") {
        cur.bump();
        cur.bump();
        cur.bump();
        return TokenKind::Arrow;
    }
    if cur.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
        return lex_constant(cur);
    }
    cur.bump();
    TokenKind::Minus
}

fn lex_quoted(cur: &mut Cursor<'_>, quote: char) -> TokenKind {
    cur.bump();
    let mut text = String::new();
    loop {
        match cur.bump() {
            None => return TokenKind::Unterminated(quote),
            Some('\\') => {
                if let Some(escaped) = cur.bump() {
                    text.push(escaped);
                }
            }
            Some(c) if c == quote => break,
            Some(c) => text.push(c),
        }
    }
    if quote == '|' {
        TokenKind::Quoted(text)
    } else {
        TokenKind::DocString(text)
    }
}

fn lex_constant(cur: &mut Cursor<'_>) -> TokenKind {
    let start = cur.pos;
    if cur.peek() == Some('-') {
        cur.bump();
    }
    cur.bump_while(is_symbol_char);
    // A dot continues the constant only as a decimal point, so that dotted
    // attribute paths like `^io.input-link` still split at the dot.
    let head = &cur.src[start..cur.pos];
    if LiteralKind::classify(head) == LiteralKind::Integer
        && cur.peek() == Some('.')
        && cur.peek_nth(1).is_some_and(|c| c.is_ascii_digit())
    {
        cur.bump();
        cur.bump_while(is_symbol_char);
    }
    let text = cur.src[start..cur.pos].to_string();
    let kind = LiteralKind::classify(&text);
    TokenKind::Constant(text, kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_variables_and_relations() {
        let toks = kinds("<s> < 3 <> <x> <= >= <=> > <<");
        assert_eq!(
            toks,
            vec![
                TokenKind::Variable("<s>".to_string()),
                TokenKind::Relation(Relation::Less),
                TokenKind::Constant("3".to_string(), LiteralKind::Integer),
                TokenKind::Relation(Relation::NotEqual),
                TokenKind::Variable("<x>".to_string()),
                TokenKind::Relation(Relation::LessOrEqual),
                TokenKind::Relation(Relation::GreaterOrEqual),
                TokenKind::Relation(Relation::SameType),
                TokenKind::Relation(Relation::Greater),
                TokenKind::DisjOpen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_dotted_path_splits_but_float_does_not() {
        let toks = kinds("^io.input-link 1.5");
        assert_eq!(
            toks,
            vec![
                TokenKind::Caret,
                TokenKind::Constant("io".to_string(), LiteralKind::Symbol),
                TokenKind::Dot,
                TokenKind::Constant("input-link".to_string(), LiteralKind::Symbol),
                TokenKind::Constant("1.5".to_string(), LiteralKind::Float),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_arrow_minus_and_negative_numbers() {
        let toks = kinds("--> -( -5 -");
        assert_eq!(
            toks,
            vec![
                TokenKind::Arrow,
                TokenKind::Minus,
                TokenKind::LParen,
                TokenKind::Constant("-5".to_string(), LiteralKind::Integer),
                TokenKind::Minus,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_quotes_flags_and_comments() {
        let toks = kinds("# comment\n|hello world| \"doc\" :o-support");
        assert_eq!(
            toks,
            vec![
                TokenKind::Quoted("hello world".to_string()),
                TokenKind::DocString("doc".to_string()),
                TokenKind::Flag("o-support".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_quote() {
        let toks = kinds("|never closed");
        assert_eq!(toks[0], TokenKind::Unterminated('|'));
    }

    #[test]
    fn test_positions() {
        let toks = tokenize("sp {\n  (<s>");
        let var = &toks[3];
        assert_eq!(var.kind, TokenKind::Variable("<s>".to_string()));
        assert_eq!(var.span.line, 2);
        assert_eq!(var.span.column, 4);
        assert_eq!(var.span.slice("sp {\n  (<s>"), Some("<s>"));
    }

    #[test]
    fn test_symbol_with_star() {
        let toks = kinds("propose*move-block");
        assert_eq!(
            toks[0],
            TokenKind::Constant("propose*move-block".to_string(), LiteralKind::Symbol)
        );
    }
}
