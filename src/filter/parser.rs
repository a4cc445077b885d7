//! Recursive-descent parser for filter expressions.
//!
//! ```text
//! expr      := and ('|' and)*
//! and       := unary ('&' unary)*
//! unary     := '!' unary | '(' expr ')' | condition
//! condition := VALUE (('=' | '!=' | '~' | '!~') VALUE)?
//! ```

use super::lexer::{Token, TokenKind};
use super::{Condition, FilterError, FilterExpr, Operation, properties};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse the whole token stream.
    pub fn parse(mut self) -> Result<FilterExpr, FilterError> {
        if self.is_at_end() {
            return Err(FilterError::Empty);
        }
        let expr = self.or_expr()?;
        if !self.is_at_end() {
            return Err(self.unexpected("end of expression"));
        }
        Ok(expr)
    }

    // ========================================================================
    // Grammar
    // ========================================================================

    fn or_expr(&mut self) -> Result<FilterExpr, FilterError> {
        let mut expr = self.and_expr()?;
        while self.match_token(&TokenKind::Or) {
            let right = self.and_expr()?;
            expr = FilterExpr::Or(Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn and_expr(&mut self) -> Result<FilterExpr, FilterError> {
        let mut expr = self.unary()?;
        while self.match_token(&TokenKind::And) {
            let right = self.unary()?;
            expr = FilterExpr::And(Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<FilterExpr, FilterError> {
        if self.match_token(&TokenKind::Not) {
            return Ok(FilterExpr::Not(Box::new(self.unary()?)));
        }
        if self.match_token(&TokenKind::LParen) {
            let expr = self.or_expr()?;
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(expr);
        }
        self.condition()
    }

    fn condition(&mut self) -> Result<FilterExpr, FilterError> {
        let property = self.expect_value("a property or value")?;

        let operation = match self.peek().kind {
            TokenKind::Equal => Operation::Equal,
            TokenKind::NotEqual => Operation::NotEqual,
            TokenKind::Contains => Operation::Contains,
            TokenKind::NotContains => Operation::NotContains,
            _ => {
                // A bare value matches against the fully qualified name.
                return Ok(FilterExpr::Condition(Condition {
                    property: properties::FULLY_QUALIFIED_NAME.to_string(),
                    operation: Operation::Contains,
                    value: property,
                }));
            }
        };
        self.advance();

        let value = self.expect_value("a value")?;
        Ok(FilterExpr::Condition(Condition {
            property,
            operation,
            value,
        }))
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with `Eof`.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> &Token {
        let index = self.pos.min(self.tokens.len() - 1);
        if !self.is_at_end() {
            self.pos += 1;
        }
        &self.tokens[index]
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(kind) == std::mem::discriminant(&self.peek().kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> Result<&Token, FilterError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_value(&mut self, expected: &str) -> Result<String, FilterError> {
        match &self.peek().kind {
            TokenKind::Value(value) if !value.is_empty() => {
                let value = value.clone();
                self.advance();
                Ok(value)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn unexpected(&self, expected: &str) -> FilterError {
        let token = self.peek();
        FilterError::Unexpected {
            position: token.position,
            expected: expected.to_string(),
            found: describe(&token.kind),
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::And => "'&'".to_string(),
        TokenKind::Or => "'|'".to_string(),
        TokenKind::Not => "'!'".to_string(),
        TokenKind::Equal => "'='".to_string(),
        TokenKind::NotEqual => "'!='".to_string(),
        TokenKind::Contains => "'~'".to_string(),
        TokenKind::NotContains => "'!~'".to_string(),
        TokenKind::Value(value) => format!("'{}'", value),
        TokenKind::Eof => "end of expression".to_string(),
    }
}
