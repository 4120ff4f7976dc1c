//! Tokenizer and recursive-descent parser for the three condition syntaxes.

use super::{CompareOp, Condition, ConditionParser, Literal};
use crate::{ExpectationsError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Quoted(String),
    Str(String),
    Num(f64),
    Op(CompareOp),
    LParen,
    RParen,
    Amp,
    Pipe,
    Tilde,
    Dot,
    Minus,
}

fn tokenize(text: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' => {
                tokens.push(Token::Amp);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '~' => {
                tokens.push(Token::Tilde);
                i += 1;
            }
            '.' if !chars.get(i + 1).is_some_and(char::is_ascii_digit) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '=' => {
                i += if chars.get(i + 1) == Some(&'=') { 2 } else { 1 };
                tokens.push(Token::Op(CompareOp::Eq));
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Op(CompareOp::Le));
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::Op(CompareOp::Ne));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op(CompareOp::Lt));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Gt));
                    i += 1;
                }
            }
            '"' | '\'' | '`' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(format!("unterminated {} quote", quote)),
                        Some('\\') if quote != '`' => {
                            if let Some(next) = chars.get(i + 1) {
                                value.push(*next);
                            }
                            i += 2;
                        }
                        // SQL-style doubled quote
                        Some(ch) if *ch == quote && chars.get(i + 1) == Some(&quote) => {
                            value.push(quote);
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(if quote == '`' {
                    Token::Quoted(value)
                } else {
                    Token::Str(value)
                });
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || chars[i] == 'e'
                        || chars[i] == 'E'
                        || ((chars[i] == '+' || chars[i] == '-')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", literal))?;
                tokens.push(Token::Num(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    dialect: ConditionParser,
    source: &'a str,
}

/// Parses `text` in the given syntax.
pub(super) fn parse(text: &str, dialect: ConditionParser) -> Result<Condition> {
    let tokens = tokenize(text).map_err(|message| ExpectationsError::row_condition(text, message))?;
    if tokens.is_empty() {
        return Err(ExpectationsError::row_condition(text, "condition is empty"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        dialect,
        source: text,
    };
    let condition = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error(format!(
            "unexpected trailing input at token {}",
            parser.pos + 1
        )));
    }
    Ok(condition)
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> ExpectationsError {
        ExpectationsError::row_condition(self.source, message)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(self.error(format!("expected {:?}, found {:?}", expected, token))),
            None => Err(self.error(format!("expected {:?}, found end of input", expected))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        match (self.peek(), self.dialect) {
            (Some(Token::Ident(word)), ConditionParser::Spark) => word.eq_ignore_ascii_case(keyword),
            (Some(Token::Ident(word)), ConditionParser::Pandas) => word == keyword,
            _ => false,
        }
    }

    fn at_or(&self) -> bool {
        match self.dialect {
            ConditionParser::GreatExpectations => self.peek() == Some(&Token::Pipe),
            ConditionParser::Pandas => self.peek() == Some(&Token::Pipe) || self.peek_keyword("or"),
            ConditionParser::Spark => self.peek_keyword("or"),
        }
    }

    fn at_and(&self) -> bool {
        match self.dialect {
            ConditionParser::GreatExpectations => self.peek() == Some(&Token::Amp),
            ConditionParser::Pandas => self.peek() == Some(&Token::Amp) || self.peek_keyword("and"),
            ConditionParser::Spark => self.peek_keyword("and"),
        }
    }

    fn at_not(&self) -> bool {
        match self.dialect {
            ConditionParser::GreatExpectations => self.peek() == Some(&Token::Tilde),
            ConditionParser::Pandas => self.peek() == Some(&Token::Tilde) || self.peek_keyword("not"),
            ConditionParser::Spark => self.peek_keyword("not"),
        }
    }

    fn parse_or(&mut self) -> Result<Condition> {
        let mut left = self.parse_and()?;
        while self.at_or() {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition> {
        let mut left = self.parse_unary()?;
        while self.at_and() {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Condition> {
        if self.at_not() {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Condition> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            self.expect(&Token::RParen)?;
            return Ok(inner);
        }
        let column = self.parse_column()?;
        self.parse_predicate(column)
    }

    fn parse_column(&mut self) -> Result<String> {
        match self.dialect {
            ConditionParser::GreatExpectations => {
                match self.next() {
                    Some(Token::Ident(word)) if word == "col" => {}
                    other => {
                        return Err(self.error(format!(
                            "expected col(\"name\"), found {:?}",
                            other
                        )));
                    }
                }
                self.expect(&Token::LParen)?;
                let name = match self.next() {
                    Some(Token::Str(name)) => name,
                    other => {
                        return Err(self.error(format!("expected a quoted column name, found {:?}", other)));
                    }
                };
                self.expect(&Token::RParen)?;
                Ok(name)
            }
            ConditionParser::Pandas | ConditionParser::Spark => match self.next() {
                Some(Token::Quoted(name)) => Ok(name),
                Some(Token::Ident(name)) => Ok(name),
                other => Err(self.error(format!("expected a column name, found {:?}", other))),
            },
        }
    }

    fn parse_predicate(&mut self, column: String) -> Result<Condition> {
        match self.peek().cloned() {
            Some(Token::Dot) if self.dialect != ConditionParser::Spark => {
                self.pos += 1;
                let method = match self.next() {
                    Some(Token::Ident(method)) => method,
                    other => return Err(self.error(format!("expected a method name, found {:?}", other))),
                };
                self.expect(&Token::LParen)?;
                self.expect(&Token::RParen)?;
                match method.as_str() {
                    "notnull" | "notNull" | "isNotNull" | "notna" => Ok(Condition::NotNull(column)),
                    "isnull" | "isNull" | "isna" => Ok(Condition::IsNull(column)),
                    other => Err(self.error(format!("unsupported method '{}'", other))),
                }
            }
            Some(Token::Ident(word))
                if self.dialect == ConditionParser::Spark && word.eq_ignore_ascii_case("is") =>
            {
                self.pos += 1;
                let negated = self.peek_keyword("not");
                if negated {
                    self.pos += 1;
                }
                if !self.peek_keyword("null") {
                    return Err(self.error("expected NULL after IS"));
                }
                self.pos += 1;
                Ok(if negated {
                    Condition::NotNull(column)
                } else {
                    Condition::IsNull(column)
                })
            }
            Some(Token::Op(op)) => {
                self.pos += 1;
                let value = self.parse_literal()?;
                Ok(Condition::Compare { column, op, value })
            }
            other => Err(self.error(format!(
                "expected a comparison or null check after '{}', found {:?}",
                column, other
            ))),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Literal::Number(n)),
            Some(Token::Minus) => match self.next() {
                Some(Token::Num(n)) => Ok(Literal::Number(-n)),
                other => Err(self.error(format!("expected a number after '-', found {:?}", other))),
            },
            Some(Token::Str(s)) => Ok(Literal::String(s)),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("true") => Ok(Literal::Bool(true)),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("false") => {
                Ok(Literal::Bool(false))
            }
            other => Err(self.error(format!("expected a literal, found {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compare(column: &str, op: CompareOp, value: Literal) -> Condition {
        Condition::Compare {
            column: column.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn test_experimental_syntax() {
        let parsed = parse(
            "col(\"a\") > 5 & ~col(\"b\").isnull()",
            ConditionParser::GreatExpectations,
        )
        .unwrap();
        assert_eq!(
            parsed,
            Condition::And(
                Box::new(compare("a", CompareOp::Gt, Literal::Number(5.0))),
                Box::new(Condition::Not(Box::new(Condition::IsNull("b".to_string())))),
            )
        );
    }

    #[test]
    fn test_experimental_or_binds_looser_than_and() {
        let parsed = parse(
            "col(\"a\")==1 | col(\"b\")==2 & col(\"c\")==3",
            ConditionParser::GreatExpectations,
        )
        .unwrap();
        assert!(matches!(parsed, Condition::Or(_, ref right) if matches!(**right, Condition::And(_, _))));
    }

    #[test]
    fn test_pandas_syntax() {
        let parsed = parse(
            "`my col` >= -2.5 and not name == 'x'",
            ConditionParser::Pandas,
        )
        .unwrap();
        assert_eq!(
            parsed,
            Condition::And(
                Box::new(compare("my col", CompareOp::Ge, Literal::Number(-2.5))),
                Box::new(Condition::Not(Box::new(compare(
                    "name",
                    CompareOp::Eq,
                    Literal::String("x".to_string())
                )))),
            )
        );
        assert_eq!(
            parse("a.notnull()", ConditionParser::Pandas).unwrap(),
            Condition::NotNull("a".to_string())
        );
    }

    #[test]
    fn test_spark_syntax() {
        let parsed = parse("a = 'it''s' OR b IS NOT NULL", ConditionParser::Spark).unwrap();
        assert_eq!(
            parsed,
            Condition::Or(
                Box::new(compare("a", CompareOp::Eq, Literal::String("it's".to_string()))),
                Box::new(Condition::NotNull("b".to_string())),
            )
        );
        assert_eq!(
            parse("x <> 3", ConditionParser::Spark).unwrap(),
            compare("x", CompareOp::Ne, Literal::Number(3.0))
        );
    }

    #[test]
    fn test_syntax_errors_name_the_condition() {
        for (text, dialect) in [
            ("col(a) > 1", ConditionParser::GreatExpectations),
            ("a >", ConditionParser::Pandas),
            ("a IS MAYBE", ConditionParser::Spark),
            ("(a > 1", ConditionParser::Pandas),
            ("a > 1 b", ConditionParser::Pandas),
            ("", ConditionParser::Spark),
            ("a > 'open", ConditionParser::Pandas),
        ] {
            let err = parse(text, dialect).unwrap_err();
            assert!(
                matches!(err, ExpectationsError::RowCondition { ref condition, .. } if condition == text),
                "{text:?} should fail with a row condition error"
            );
        }
    }

    #[test]
    fn test_spark_rejects_method_syntax() {
        assert!(parse("a.isnull()", ConditionParser::Spark).is_err());
    }
}
