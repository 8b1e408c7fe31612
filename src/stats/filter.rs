//! Row filter expressions, pandas-query style.
//!
//! ```text
//! or_expr    := and_expr (("or" | "|") and_expr)*
//! and_expr   := not_expr (("and" | "&") not_expr)*
//! not_expr   := ("not" | "~") not_expr | primary
//! primary    := "(" or_expr ")" | comparison
//! comparison := operand (cmp_op operand | ["not"] "in" list)?
//! ```
//!
//! Comparisons involving a missing value evaluate to false before any
//! boolean operator is applied, except `!=`, which is true. `x != 1`,
//! `x not in [1]` and `not (x == 1)` therefore all keep rows where `x` is
//! missing.

use polars::prelude::*;
use std::collections::BTreeSet;

use crate::error::{StatsError, StatsResult};
use crate::reader::Table;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Literal(Literal),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Membership {
        column: String,
        values: Vec<Literal>,
        negated: bool,
    },
    /// Bare boolean column
    Truthy(String),
    Constant(bool),
    Not(Box<FilterExpr>),
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
}

impl FilterExpr {
    pub fn parse(source: &str) -> StatsResult<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
        };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(parser.error_at(token.offset, "unexpected trailing input")),
        }
    }

    /// Every column the expression references
    pub fn columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            FilterExpr::Compare { left, right, .. } => {
                for operand in [left, right] {
                    if let Operand::Column(name) = operand {
                        out.insert(name.clone());
                    }
                }
            }
            FilterExpr::Membership { column, .. } | FilterExpr::Truthy(column) => {
                out.insert(column.clone());
            }
            FilterExpr::Constant(_) => {}
            FilterExpr::Not(inner) => inner.collect_columns(out),
            FilterExpr::And(a, b) | FilterExpr::Or(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
        }
    }

    /// Columns used directly as conditions; they must be boolean
    fn truthy_columns(&self) -> Vec<String> {
        match self {
            FilterExpr::Truthy(column) => vec![column.clone()],
            FilterExpr::Not(inner) => inner.truthy_columns(),
            FilterExpr::And(a, b) | FilterExpr::Or(a, b) => {
                let mut out = a.truthy_columns();
                out.extend(b.truthy_columns());
                out
            }
            _ => Vec::new(),
        }
    }

    /// Lower to a polars expression yielding a non-null boolean mask
    pub fn to_polars(&self) -> Expr {
        match self {
            FilterExpr::Compare { left, op, right } => {
                let (l, r) = (operand_expr(left), operand_expr(right));
                match op {
                    CompareOp::Eq => l.eq(r).fill_null(lit(false)),
                    CompareOp::Ne => l.eq(r).fill_null(lit(false)).not(),
                    CompareOp::Lt => l.lt(r).fill_null(lit(false)),
                    CompareOp::Le => l.lt_eq(r).fill_null(lit(false)),
                    CompareOp::Gt => l.gt(r).fill_null(lit(false)),
                    CompareOp::Ge => l.gt_eq(r).fill_null(lit(false)),
                }
            }
            FilterExpr::Membership {
                column,
                values,
                negated,
            } => {
                let any = values.iter().fold(lit(false), |acc, value| {
                    acc.or(col(column).eq(literal_expr(value)).fill_null(lit(false)))
                });
                if *negated {
                    any.not()
                } else {
                    any
                }
            }
            FilterExpr::Truthy(column) => col(column).fill_null(lit(false)),
            FilterExpr::Constant(value) => lit(*value),
            FilterExpr::Not(inner) => inner.to_polars().not(),
            FilterExpr::And(a, b) => a.to_polars().and(b.to_polars()),
            FilterExpr::Or(a, b) => a.to_polars().or(b.to_polars()),
        }
    }
}

/// Count the rows of `table` matching `source`
pub fn count_matching(table: &Table, source: &str) -> StatsResult<usize> {
    let expr = FilterExpr::parse(source)?;

    if let Some(missing) = expr.columns().into_iter().find(|c| !table.has_column(c)) {
        let err = table.missing_column(&missing);
        return Err(StatsError::bad_input(format!("filter '{}': {}", source, err)));
    }

    for name in expr.truthy_columns() {
        let dtype = table.column(&name)?.dtype().clone();
        if dtype != DataType::Boolean {
            return Err(StatsError::bad_input(format!(
                "filter '{}': column '{}' is {} and cannot be used as a condition",
                source, name, dtype
            )));
        }
    }

    let filtered = table
        .frame()
        .clone()
        .lazy()
        .filter(expr.to_polars())
        .collect()
        .map_err(|e| StatsError::bad_input(format!("cannot evaluate filter '{}': {}", source, e)))?;
    Ok(filtered.height())
}

fn operand_expr(operand: &Operand) -> Expr {
    match operand {
        Operand::Column(name) => col(name),
        Operand::Literal(value) => literal_expr(value),
    }
}

fn literal_expr(value: &Literal) -> Expr {
    match value {
        Literal::Int(i) => lit(*i),
        Literal::Float(f) => lit(*f),
        Literal::Str(s) => lit(s.clone()),
        Literal::Bool(b) => lit(*b),
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Op(CompareOp),
    And,
    Or,
    Not,
    In,
    True,
    False,
    Minus,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(source: &str) -> StatsResult<Vec<Token>> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let syntax = |offset: usize, msg: &str| {
        StatsError::bad_input(format!(
            "invalid filter expression '{}' at position {}: {}",
            source, offset, msg
        ))
    };

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        let simple = match (c, next) {
            (c, _) if c.is_whitespace() => {
                i += 1;
                continue;
            }
            ('=', Some('=')) => Some((TokenKind::Op(CompareOp::Eq), 2)),
            ('!', Some('=')) => Some((TokenKind::Op(CompareOp::Ne), 2)),
            ('<', Some('=')) => Some((TokenKind::Op(CompareOp::Le), 2)),
            ('>', Some('=')) => Some((TokenKind::Op(CompareOp::Ge), 2)),
            ('<', _) => Some((TokenKind::Op(CompareOp::Lt), 1)),
            ('>', _) => Some((TokenKind::Op(CompareOp::Gt), 1)),
            ('&', Some('&')) => Some((TokenKind::And, 2)),
            ('|', Some('|')) => Some((TokenKind::Or, 2)),
            ('&', _) => Some((TokenKind::And, 1)),
            ('|', _) => Some((TokenKind::Or, 1)),
            ('~', _) => Some((TokenKind::Not, 1)),
            ('-', _) => Some((TokenKind::Minus, 1)),
            ('(', _) => Some((TokenKind::LParen, 1)),
            (')', _) => Some((TokenKind::RParen, 1)),
            ('[', _) => Some((TokenKind::LBracket, 1)),
            (']', _) => Some((TokenKind::RBracket, 1)),
            (',', _) => Some((TokenKind::Comma, 1)),
            _ => None,
        };
        if let Some((kind, width)) = simple {
            tokens.push(Token { kind, offset });
            i += width;
            continue;
        }

        if c == '\'' || c == '"' || c == '`' {
            let mut value = String::new();
            let mut j = i + 1;
            let mut closed = false;
            while j < chars.len() {
                let ch = chars[j].1;
                if ch == '\\' && c != '`' && j + 1 < chars.len() {
                    value.push(chars[j + 1].1);
                    j += 2;
                    continue;
                }
                if ch == c {
                    closed = true;
                    break;
                }
                value.push(ch);
                j += 1;
            }
            if !closed {
                return Err(syntax(offset, "unterminated quote"));
            }
            let kind = if c == '`' {
                TokenKind::Ident(value)
            } else {
                TokenKind::Str(value)
            };
            tokens.push(Token { kind, offset });
            i = j + 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && next.map_or(false, |n| n.is_ascii_digit())) {
            let mut j = i;
            while j < chars.len()
                && (chars[j].1.is_ascii_digit()
                    || chars[j].1 == '.'
                    || chars[j].1 == 'e'
                    || chars[j].1 == 'E'
                    || ((chars[j].1 == '+' || chars[j].1 == '-')
                        && matches!(chars[j - 1].1, 'e' | 'E')))
            {
                j += 1;
            }
            let text: String = chars[i..j].iter().map(|(_, c)| c).collect();
            let kind = if let Ok(int) = text.parse::<i64>() {
                TokenKind::Int(int)
            } else if let Ok(float) = text.parse::<f64>() {
                TokenKind::Float(float)
            } else {
                return Err(syntax(offset, &format!("invalid number '{}'", text)));
            };
            tokens.push(Token { kind, offset });
            i = j;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut j = i;
            while j < chars.len() && (chars[j].1.is_alphanumeric() || chars[j].1 == '_') {
                j += 1;
            }
            let word: String = chars[i..j].iter().map(|(_, c)| c).collect();
            let kind = match word.as_str() {
                "and" => TokenKind::And,
                "or" => TokenKind::Or,
                "not" => TokenKind::Not,
                "in" => TokenKind::In,
                "True" | "true" => TokenKind::True,
                "False" | "false" => TokenKind::False,
                _ => TokenKind::Ident(word),
            };
            tokens.push(Token { kind, offset });
            i = j;
            continue;
        }

        return Err(syntax(offset, &format!("unexpected character '{}'", c)));
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn end_offset(&self) -> usize {
        self.source.len()
    }

    fn error_at(&self, offset: usize, msg: &str) -> StatsError {
        StatsError::bad_input(format!(
            "invalid filter expression '{}' at position {}: {}",
            self.source, offset, msg
        ))
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> StatsResult<()> {
        match self.next() {
            Some(token) if token.kind == kind => Ok(()),
            Some(token) => Err(self.error_at(token.offset, &format!("expected {}", what))),
            None => Err(self.error_at(self.end_offset(), &format!("expected {}", what))),
        }
    }

    fn parse_or(&mut self) -> StatsResult<FilterExpr> {
        let mut left = self.parse_and()?;
        while self.peek_kind() == Some(&TokenKind::Or) {
            self.next();
            let right = self.parse_and()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> StatsResult<FilterExpr> {
        let mut left = self.parse_not()?;
        while self.peek_kind() == Some(&TokenKind::And) {
            self.next();
            let right = self.parse_not()?;
            left = FilterExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> StatsResult<FilterExpr> {
        if self.peek_kind() == Some(&TokenKind::Not) {
            self.next();
            let inner = self.parse_not()?;
            return Ok(FilterExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> StatsResult<FilterExpr> {
        if self.peek_kind() == Some(&TokenKind::LParen) {
            self.next();
            let inner = self.parse_or()?;
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(inner);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> StatsResult<FilterExpr> {
        let start = self.peek().map(|t| t.offset).unwrap_or_else(|| self.end_offset());
        let left = self.parse_operand()?;

        match self.peek_kind().cloned() {
            Some(TokenKind::Op(op)) => {
                self.next();
                let right = self.parse_operand()?;
                Ok(FilterExpr::Compare { left, op, right })
            }
            Some(TokenKind::In) => {
                self.next();
                self.parse_membership(left, false, start)
            }
            Some(TokenKind::Not)
                if self.tokens.get(self.pos + 1).map(|t| &t.kind) == Some(&TokenKind::In) =>
            {
                self.pos += 2;
                self.parse_membership(left, true, start)
            }
            _ => match left {
                Operand::Column(name) => Ok(FilterExpr::Truthy(name)),
                Operand::Literal(Literal::Bool(value)) => Ok(FilterExpr::Constant(value)),
                Operand::Literal(_) => Err(self.error_at(start, "expected a condition")),
            },
        }
    }

    fn parse_membership(&mut self, left: Operand, negated: bool, start: usize) -> StatsResult<FilterExpr> {
        let column = match left {
            Operand::Column(name) => name,
            Operand::Literal(_) => {
                return Err(self.error_at(start, "left side of 'in' must be a column"))
            }
        };

        self.expect(TokenKind::LBracket, "'['")?;
        let mut values = Vec::new();
        if self.peek_kind() != Some(&TokenKind::RBracket) {
            loop {
                let offset = self.peek().map(|t| t.offset).unwrap_or_else(|| self.end_offset());
                match self.parse_operand()? {
                    Operand::Literal(value) => values.push(value),
                    Operand::Column(_) => {
                        return Err(self.error_at(offset, "list items must be literals"))
                    }
                }
                if self.peek_kind() == Some(&TokenKind::Comma) {
                    self.next();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBracket, "']'")?;

        Ok(FilterExpr::Membership {
            column,
            values,
            negated,
        })
    }

    fn parse_operand(&mut self) -> StatsResult<Operand> {
        let token = match self.next() {
            Some(token) => token,
            None => return Err(self.error_at(self.end_offset(), "unexpected end of expression")),
        };

        let operand = match token.kind {
            TokenKind::Ident(name) => Operand::Column(name),
            TokenKind::Int(i) => Operand::Literal(Literal::Int(i)),
            TokenKind::Float(f) => Operand::Literal(Literal::Float(f)),
            TokenKind::Str(s) => Operand::Literal(Literal::Str(s)),
            TokenKind::True => Operand::Literal(Literal::Bool(true)),
            TokenKind::False => Operand::Literal(Literal::Bool(false)),
            TokenKind::Minus => match self.next().map(|t| t.kind) {
                Some(TokenKind::Int(i)) => Operand::Literal(Literal::Int(-i)),
                Some(TokenKind::Float(f)) => Operand::Literal(Literal::Float(-f)),
                _ => return Err(self.error_at(token.offset, "'-' must precede a number")),
            },
            _ => return Err(self.error_at(token.offset, "expected a column or a value")),
        };
        Ok(operand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::table::tests::sample_table;

    fn column(name: &str) -> Operand {
        Operand::Column(name.to_string())
    }

    #[test]
    fn test_parse_comparison() {
        let expr = FilterExpr::parse("age >= 30").unwrap();
        assert_eq!(
            expr,
            FilterExpr::Compare {
                left: column("age"),
                op: CompareOp::Ge,
                right: Operand::Literal(Literal::Int(30)),
            }
        );
    }

    #[test]
    fn test_precedence_and_binds_tighter_than_or() {
        let expr = FilterExpr::parse("a == 1 or b == 2 and not c").unwrap();
        match expr {
            FilterExpr::Or(_, right) => match *right {
                FilterExpr::And(_, not) => assert!(matches!(*not, FilterExpr::Not(_))),
                other => panic!("expected And, got {:?}", other),
            },
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_literals_and_membership() {
        let expr = FilterExpr::parse("`blood type` not in ['A', \"B\", -1, 2.5e1, True]").unwrap();
        assert_eq!(
            expr,
            FilterExpr::Membership {
                column: "blood type".to_string(),
                values: vec![
                    Literal::Str("A".to_string()),
                    Literal::Str("B".to_string()),
                    Literal::Int(-1),
                    Literal::Float(25.0),
                    Literal::Bool(true),
                ],
                negated: true,
            }
        );
        assert_eq!(expr.columns().into_iter().collect::<Vec<_>>(), vec!["blood type"]);
    }

    #[test]
    fn test_syntax_errors_name_the_expression() {
        for bad in ["age >", "age == 'x", "(age > 1", "age > 1 extra", "3", "age $ 1", "1 in [1]"] {
            let err = FilterExpr::parse(bad).unwrap_err();
            assert_eq!(err.kind(), "bad_input", "input {:?}", bad);
            assert!(err.to_string().contains(bad), "input {:?}: {}", bad, err);
        }
    }

    #[test]
    fn test_count_matching() {
        let table = sample_table();
        assert_eq!(count_matching(&table, "age > 30").unwrap(), 2);
        assert_eq!(count_matching(&table, "sex == 'F'").unwrap(), 2);
        assert_eq!(count_matching(&table, "sex == 'F' & smoker").unwrap(), 2);
        assert_eq!(count_matching(&table, "sex in ['M', 'X'] or age < 30").unwrap(), 2);
        assert_eq!(count_matching(&table, "True").unwrap(), 4);
    }

    #[test]
    fn test_missing_values_compare_false() {
        let table = sample_table();
        // age is missing in row 3: excluded from ordering comparisons, kept by the negation
        assert_eq!(count_matching(&table, "age > 30").unwrap(), 2);
        assert_eq!(count_matching(&table, "age <= 30").unwrap(), 1);
        assert_eq!(count_matching(&table, "not (age > 30)").unwrap(), 2);
    }

    #[test]
    fn test_not_equal_keeps_missing_rows() {
        let table = sample_table();
        // sex is missing in row 3; every spelling of "not F" keeps it
        assert_eq!(count_matching(&table, "sex != 'F'").unwrap(), 2);
        assert_eq!(count_matching(&table, "sex not in ['F']").unwrap(), 2);
        assert_eq!(count_matching(&table, "not (sex == 'F')").unwrap(), 2);
        assert_eq!(count_matching(&table, "~(sex == 'F')").unwrap(), 2);
    }

    #[test]
    fn test_unknown_column() {
        let table = sample_table();
        let err = count_matching(&table, "height > 170").unwrap_err();
        let message = err.to_string();
        assert_eq!(err.kind(), "bad_input");
        assert!(message.contains("height > 170"));
        assert!(message.contains("'height'"));
        assert!(message.contains("age, sex, smoker, weight"));
    }

    #[test]
    fn test_non_boolean_column_as_condition() {
        let table = sample_table();
        let err = count_matching(&table, "weight").unwrap_err();
        assert_eq!(err.kind(), "bad_input");
        assert!(err.to_string().contains("'weight'"));
    }
}
