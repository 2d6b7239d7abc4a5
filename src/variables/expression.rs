//! Small expression language used by the in-memory parser.
//!
//! Supported syntax:
//! - literals: numbers, `'single'`/`"double"` quoted strings, `true`, `false`, `null`
//! - variable references: `$(connection:name)`
//! - operators: `! -` (unary), `* / %`, `+ -`, `< > <= >=`, `== != === !==`, `&&`, `||`, `? :`
//! - functions: `round`, `floor`, `ceil`, `abs`, `min`, `max`
//!
//! `+` concatenates when either side is a string. `&&` / `||` short-circuit and
//! return the deciding operand.

use std::fmt;

use anyhow::{anyhow, bail, Result};
use chumsky::{input::ValueInput, pratt::*, prelude::*};
use serde_json::Value;

use super::value_to_display;

type Span = SimpleSpan;

#[derive(Debug, Clone, PartialEq)]
pub enum Token<'src> {
    Number(f64),
    Text(String),
    Variable(&'src str),
    Identifier(&'src str),
    True,
    False,
    Null,
    StrictEqual,
    StrictNotEqual,
    Equal,
    NotEqual,
    LessOrEqual,
    GreaterOrEqual,
    Less,
    Greater,
    And,
    Or,
    Not,
    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
    Question,
    Colon,
    Comma,
    BracketRoundOpen,
    BracketRoundClose,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{}", number),
            Self::Text(text) => write!(f, "'{}'", text),
            Self::Variable(name) => write!(f, "$({})", name),
            Self::Identifier(identifier) => write!(f, "{}", identifier),
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Null => write!(f, "null"),
            Self::StrictEqual => write!(f, "==="),
            Self::StrictNotEqual => write!(f, "!=="),
            Self::Equal => write!(f, "=="),
            Self::NotEqual => write!(f, "!="),
            Self::LessOrEqual => write!(f, "<="),
            Self::GreaterOrEqual => write!(f, ">="),
            Self::Less => write!(f, "<"),
            Self::Greater => write!(f, ">"),
            Self::And => write!(f, "&&"),
            Self::Or => write!(f, "||"),
            Self::Not => write!(f, "!"),
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Asterisk => write!(f, "*"),
            Self::Slash => write!(f, "/"),
            Self::Percent => write!(f, "%"),
            Self::Question => write!(f, "?"),
            Self::Colon => write!(f, ":"),
            Self::Comma => write!(f, ","),
            Self::BracketRoundOpen => write!(f, "("),
            Self::BracketRoundClose => write!(f, ")"),
        }
    }
}

fn lexer<'src>() -> impl Parser<'src, &'src str, Vec<(Token<'src>, Span)>, extra::Err<Rich<'src, char, Span>>> {
    let number = text::int(10)
        .then(just('.').then(text::digits(10)).or_not())
        .to_slice()
        .from_str()
        .unwrapped()
        .map(Token::Number);

    let escape = just('\\').ignore_then(choice((just('n').to('\n'), just('t').to('\t'), any())));
    let single_quoted = just('\'')
        .ignore_then(none_of("'\\").or(escape.clone()).repeated().collect::<String>())
        .then_ignore(just('\''));
    let double_quoted = just('"')
        .ignore_then(none_of("\"\\").or(escape).repeated().collect::<String>())
        .then_ignore(just('"'));
    let text = single_quoted.or(double_quoted).map(Token::Text);

    let variable = just("$(")
        .ignore_then(none_of(')').repeated().to_slice())
        .then_ignore(just(')'))
        .try_map(|name: &str, span| {
            if name.contains(':') {
                Ok(Token::Variable(name))
            } else {
                Err(Rich::custom(span, format!("Invalid variable reference '$({})'", name)))
            }
        });

    let comparator = choice((
        just("===").to(Token::StrictEqual),
        just("!==").to(Token::StrictNotEqual),
        just("==").to(Token::Equal),
        just("!=").to(Token::NotEqual),
        just("<=").to(Token::LessOrEqual),
        just(">=").to(Token::GreaterOrEqual),
        just('<').to(Token::Less),
        just('>').to(Token::Greater),
    ));

    let logic = choice((just("&&").to(Token::And), just("||").to(Token::Or), just('!').to(Token::Not)));

    let punctuation = choice((
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Asterisk),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
        just('?').to(Token::Question),
        just(':').to(Token::Colon),
        just(',').to(Token::Comma),
        just('(').to(Token::BracketRoundOpen),
        just(')').to(Token::BracketRoundClose),
    ));

    let identifier = text::ascii::ident().map(|identifier: &str| match identifier {
        "true" => Token::True,
        "false" => Token::False,
        "null" | "undefined" => Token::Null,
        _ => Token::Identifier(identifier),
    });

    // Comparators before logic so `!=` never lexes as `!` `=`
    let token = choice((variable, number, text, comparator, logic, punctuation, identifier));

    token
        .map_with(|token, extra| (token, extra.span()))
        .padded()
        .repeated()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Variable(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary(op, Box::new(left), Box::new(right))
}

fn parser<'tokens, 'src: 'tokens, I>()
-> impl Parser<'tokens, I, Expr, extra::Err<Rich<'tokens, Token<'src>, Span>>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    recursive(|expression| {
        let open = just(Token::BracketRoundOpen);
        let close = just(Token::BracketRoundClose);

        let number = select! { Token::Number(number) => number }
            .try_map(|number, span| number_value(number).map(Expr::Literal).map_err(|e| Rich::custom(span, e)));

        let literal = select! {
            Token::Text(text) => Expr::Literal(Value::String(text)),
            Token::True => Expr::Literal(Value::Bool(true)),
            Token::False => Expr::Literal(Value::Bool(false)),
            Token::Null => Expr::Literal(Value::Null),
            Token::Variable(name) => Expr::Variable(name.to_string()),
        };

        let call = select! { Token::Identifier(name) => name }
            .then(
                expression
                    .clone()
                    .separated_by(just(Token::Comma))
                    .collect::<Vec<_>>()
                    .delimited_by(open.clone(), close.clone()),
            )
            .map(|(name, args)| Expr::Call(name.to_string(), args));

        let nested = expression.clone().delimited_by(open, close);

        let atom = choice((number, literal, call, nested));

        let operators = atom.pratt((
            prefix(7, just(Token::Not), |_, rhs, _| Expr::Unary(UnaryOp::Not, Box::new(rhs))),
            prefix(7, just(Token::Minus), |_, rhs, _| Expr::Unary(UnaryOp::Negate, Box::new(rhs))),
            infix(
                left(6),
                select! {
                    Token::Asterisk => BinaryOp::Multiply,
                    Token::Slash => BinaryOp::Divide,
                    Token::Percent => BinaryOp::Remainder,
                },
                |l, op, r, _| binary(op, l, r),
            ),
            infix(
                left(5),
                select! { Token::Plus => BinaryOp::Add, Token::Minus => BinaryOp::Subtract },
                |l, op, r, _| binary(op, l, r),
            ),
            infix(
                left(4),
                select! {
                    Token::Less => BinaryOp::Less,
                    Token::Greater => BinaryOp::Greater,
                    Token::LessOrEqual => BinaryOp::LessOrEqual,
                    Token::GreaterOrEqual => BinaryOp::GreaterOrEqual,
                },
                |l, op, r, _| binary(op, l, r),
            ),
            // Loose and strict equality behave the same on JSON values
            infix(
                left(3),
                select! {
                    Token::Equal => BinaryOp::Equal,
                    Token::StrictEqual => BinaryOp::Equal,
                    Token::NotEqual => BinaryOp::NotEqual,
                    Token::StrictNotEqual => BinaryOp::NotEqual,
                },
                |l, op, r, _| binary(op, l, r),
            ),
            infix(left(2), just(Token::And), |l, _, r, _| binary(BinaryOp::And, l, r)),
            infix(left(1), just(Token::Or), |l, _, r, _| binary(BinaryOp::Or, l, r)),
        ));

        operators
            .then(
                just(Token::Question)
                    .ignore_then(expression.clone())
                    .then_ignore(just(Token::Colon))
                    .then(expression)
                    .or_not(),
            )
            .map(|(condition, branches)| match branches {
                Some((then, otherwise)) => Expr::Ternary(Box::new(condition), Box::new(then), Box::new(otherwise)),
                None => condition,
            })
    })
}

fn describe<E: fmt::Display>(stage: &str, errors: Vec<E>) -> anyhow::Error {
    let message = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
    anyhow!("{} error: {}", stage, message)
}

/// Parse an expression source into a tree.
pub fn parse(source: &str) -> Result<Expr> {
    let tokens = lexer().parse(source).into_result().map_err(|errors| describe("Lex", errors))?;
    if tokens.is_empty() {
        bail!("Empty expression");
    }
    let input = tokens.as_slice().map((source.len()..source.len()).into(), |(token, span)| (token, span));
    let expr = parser().parse(input).into_result().map_err(|errors| describe("Parse", errors))?;
    Ok(expr)
}

/// Convert a float into a JSON number, keeping whole numbers integral.
pub fn number_value(n: f64) -> Result<Value> {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Ok(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| anyhow!("Result is not a finite number"))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn to_number(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| anyhow!("Invalid number")),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("Cannot convert '{}' to a number", s)),
        other => bail!("Cannot convert {} to a number", other),
    }
}

fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Evaluate a parsed expression; `lookup` resolves variable ids.
pub fn evaluate(expr: &Expr, lookup: &mut dyn FnMut(&str) -> Option<Value>) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Variable(name) => Ok(lookup(name).unwrap_or(Value::Null)),
        Expr::Unary(op, inner) => {
            let value = evaluate(inner, lookup)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Negate => number_value(-to_number(&value)?),
            }
        }
        Expr::Ternary(cond, then, otherwise) => {
            if truthy(&evaluate(cond, lookup)?) {
                evaluate(then, lookup)
            } else {
                evaluate(otherwise, lookup)
            }
        }
        Expr::Binary(BinaryOp::And, left, right) => {
            let l = evaluate(left, lookup)?;
            if truthy(&l) { evaluate(right, lookup) } else { Ok(l) }
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            let l = evaluate(left, lookup)?;
            if truthy(&l) { Ok(l) } else { evaluate(right, lookup) }
        }
        Expr::Binary(op, left, right) => {
            let l = evaluate(left, lookup)?;
            let r = evaluate(right, lookup)?;
            binary_op(*op, &l, &r)
        }
        Expr::Call(name, args) => {
            let values = args
                .iter()
                .map(|a| evaluate(a, lookup).and_then(|v| to_number(&v)))
                .collect::<Result<Vec<f64>>>()?;
            call_function(name, &values)
        }
    }
}

fn binary_op(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinaryOp::Add if l.is_string() || r.is_string() => Ok(Value::String(format!(
            "{}{}",
            value_to_display(l),
            value_to_display(r)
        ))),
        BinaryOp::Add => number_value(to_number(l)? + to_number(r)?),
        BinaryOp::Subtract => number_value(to_number(l)? - to_number(r)?),
        BinaryOp::Multiply => number_value(to_number(l)? * to_number(r)?),
        BinaryOp::Divide | BinaryOp::Remainder => {
            let divisor = to_number(r)?;
            if divisor == 0.0 {
                bail!("Division by zero");
            }
            let n = to_number(l)?;
            number_value(if op == BinaryOp::Divide { n / divisor } else { n % divisor })
        }
        BinaryOp::Equal => Ok(Value::Bool(loose_equals(l, r))),
        BinaryOp::NotEqual => Ok(Value::Bool(!loose_equals(l, r))),
        BinaryOp::Less | BinaryOp::Greater | BinaryOp::LessOrEqual | BinaryOp::GreaterOrEqual => {
            let ordering = match (l, r) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => to_number(l)?
                    .partial_cmp(&to_number(r)?)
                    .ok_or_else(|| anyhow!("Values are not comparable"))?,
            };
            Ok(Value::Bool(match op {
                BinaryOp::Less => ordering.is_lt(),
                BinaryOp::Greater => ordering.is_gt(),
                BinaryOp::LessOrEqual => ordering.is_le(),
                _ => ordering.is_ge(),
            }))
        }
        // Short-circuiting operators never reach here
        BinaryOp::And | BinaryOp::Or => bail!("Unexpected logic operator"),
    }
}

fn call_function(name: &str, args: &[f64]) -> Result<Value> {
    let first = || args.first().copied().ok_or_else(|| anyhow!("{}() expects an argument", name));
    let result = match name {
        "round" => first()?.round(),
        "floor" => first()?.floor(),
        "ceil" => first()?.ceil(),
        "abs" => first()?.abs(),
        "min" => args
            .iter()
            .copied()
            .reduce(f64::min)
            .ok_or_else(|| anyhow!("min() expects an argument"))?,
        "max" => args
            .iter()
            .copied()
            .reduce(f64::max)
            .ok_or_else(|| anyhow!("max() expects an argument"))?,
        _ => bail!("Unknown function '{}'", name),
    };
    number_value(result)
}
