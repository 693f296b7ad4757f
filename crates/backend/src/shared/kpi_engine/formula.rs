//! Арифметические формулы над алиасами метрик.
//!
//! Грамматика закрыта: числа, `+ - * /`, скобки, унарный минус и
//! идентификаторы-алиасы. Вызовы функций, доступ к атрибутам и любые
//! другие конструкции отвергаются при разборе.

use std::collections::{BTreeSet, HashMap};

use super::error::KpiError;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Alias(String),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

/// Является ли строка допустимым алиасом
pub fn is_valid_alias(alias: &str) -> bool {
    let mut chars = alias.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn tokenize(src: &str) -> Result<Vec<Token>, KpiError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text.parse::<f64>().map_err(|_| {
                    KpiError::MalformedExpression(format!("invalid number '{}'", text))
                })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(KpiError::MalformedExpression(format!(
                    "unexpected character '{}' at {}",
                    other, i
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<Expr, KpiError> {
        let mut lhs = self.term()?;
        while let Some(op) = match self.peek() {
            Some(Token::Plus) => Some(BinOp::Add),
            Some(Token::Minus) => Some(BinOp::Sub),
            _ => None,
        } {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, KpiError> {
        let mut lhs = self.unary()?;
        while let Some(op) = match self.peek() {
            Some(Token::Star) => Some(BinOp::Mul),
            Some(Token::Slash) => Some(BinOp::Div),
            _ => None,
        } {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, KpiError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(KpiError::MalformedExpression("expression is nested too deeply".into()));
        }
        let result = match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                self.unary().map(|e| Expr::Neg(Box::new(e)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        };
        self.depth -= 1;
        result
    }

    fn primary(&mut self) -> Result<Expr, KpiError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    return Err(KpiError::MalformedExpression(format!(
                        "function calls are not allowed: '{}'",
                        name
                    )));
                }
                Ok(Expr::Alias(name))
            }
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(KpiError::MalformedExpression("missing ')'".into())),
                }
            }
            Some(token) => Err(KpiError::MalformedExpression(format!(
                "unexpected token {:?}",
                token
            ))),
            None => Err(KpiError::MalformedExpression("unexpected end of expression".into())),
        }
    }
}

pub fn parse(src: &str) -> Result<Expr, KpiError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(KpiError::MalformedExpression("expression is empty".into()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(KpiError::MalformedExpression(format!(
            "unexpected token {:?}",
            token
        )));
    }
    Ok(expr)
}

impl Expr {
    /// Алиасы, на которые ссылается выражение
    pub fn aliases(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_aliases(&mut out);
        out
    }

    fn collect_aliases<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Alias(name) => {
                out.insert(name.as_str());
            }
            Expr::Neg(inner) => inner.collect_aliases(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_aliases(out);
                rhs.collect_aliases(out);
            }
        }
    }

    /// Вычислить выражение. `None` у операнда даёт `None`; деление на
    /// ноль и нечисловые результаты тоже дают `None`.
    pub fn eval(&self, bindings: &HashMap<String, Option<f64>>) -> Result<Option<f64>, KpiError> {
        let value = match self {
            Expr::Number(n) => Some(*n),
            Expr::Alias(name) => *bindings
                .get(name)
                .ok_or_else(|| KpiError::UnknownAlias(name.clone()))?,
            Expr::Neg(inner) => inner.eval(bindings)?.map(|v| -v),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.eval(bindings)?;
                let rhs = rhs.eval(bindings)?;
                match (lhs, rhs) {
                    (Some(a), Some(b)) => match op {
                        BinOp::Add => Some(a + b),
                        BinOp::Sub => Some(a - b),
                        BinOp::Mul => Some(a * b),
                        BinOp::Div if b == 0.0 => None,
                        BinOp::Div => Some(a / b),
                    },
                    _ => None,
                }
            }
        };
        Ok(value.filter(|v| v.is_finite()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(pairs: &[(&str, Option<f64>)]) -> HashMap<String, Option<f64>> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_precedence_and_parentheses() {
        let b = bind(&[("a", Some(2.0)), ("b", Some(3.0)), ("c", Some(4.0))]);
        assert_eq!(parse("a + b * c").unwrap().eval(&b).unwrap(), Some(14.0));
        assert_eq!(parse("(a + b) * c").unwrap().eval(&b).unwrap(), Some(20.0));
        assert_eq!(parse("-a + 10 / 4").unwrap().eval(&b).unwrap(), Some(0.5));
        assert_eq!(parse("a - b - c").unwrap().eval(&b).unwrap(), Some(-5.0));
        assert_eq!(parse("--a").unwrap().eval(&b).unwrap(), Some(2.0));
    }

    #[test]
    fn test_division_by_zero_and_null_propagation() {
        let b = bind(&[("a", Some(1.0)), ("zero", Some(0.0)), ("missing", None)]);
        assert_eq!(parse("a / zero").unwrap().eval(&b).unwrap(), None);
        assert_eq!(parse("a + missing").unwrap().eval(&b).unwrap(), None);
        assert_eq!(parse("missing * 0").unwrap().eval(&b).unwrap(), None);
    }

    #[test]
    fn test_sandbox_rejects_everything_else() {
        for src in [
            "abs(a)",
            "a.b",
            "a ** 2",
            "a; b",
            "__import__('os')",
            "a if b else c",
            "",
            "(a + b",
            "a b",
            "1..2",
            "a >= b",
        ] {
            assert!(
                matches!(parse(src), Err(KpiError::MalformedExpression(_))),
                "accepted {:?}",
                src
            );
        }
    }

    #[test]
    fn test_unknown_alias_at_evaluation() {
        let b = bind(&[("a", Some(1.0))]);
        let expr = parse("a + ghost").unwrap();
        assert_eq!(expr.aliases().into_iter().collect::<Vec<_>>(), vec!["a", "ghost"]);
        assert!(matches!(expr.eval(&b), Err(KpiError::UnknownAlias(ref n)) if n == "ghost"));
    }

    #[test]
    fn test_deep_nesting_is_bounded() {
        let src = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(parse(&src).is_err());
        let ok = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert_eq!(parse(&ok).unwrap(), Expr::Number(1.0));
    }

    #[test]
    fn test_alias_syntax() {
        assert!(is_valid_alias("revenue_2024"));
        assert!(is_valid_alias("_a"));
        assert!(!is_valid_alias("2a"));
        assert!(!is_valid_alias("a-b"));
        assert!(!is_valid_alias(""));
    }
}
