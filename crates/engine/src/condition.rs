//! Constrained expression grammar used by `condition` steps.
//!
//! Expressions are parsed into a small AST and evaluated against the execution context.
//! There is no access to anything but context variables and literals.
//!
//! Supported syntax, lowest precedence first:
//!
//! - `a || b`, `a && b`, `!a`
//! - `==`, `!=` (`===`/`!==` accepted as aliases), `<`, `<=`, `>`, `>=`
//! - `+`, `-`, `*`, `/`, `%`, unary `-`
//! - literals: numbers, `'single'` or `"double"` quoted strings, `true`, `false`, `null`
//! - bare identifiers (`[A-Za-z_][A-Za-z0-9_.]*`) naming context variables
//! - parentheses
//!
//! Context values are strings; a string that parses as a number takes part in numeric
//! comparisons and arithmetic. The result of an expression is its truthiness: `false`,
//! `0`, `null`, the empty string, and the strings `"false"`/`"0"` are false.

use std::fmt;

use anyhow::{Result, anyhow, bail};
use stepflow_types::ExecutionContext;

/// Deepest nesting of parentheses and unary operators accepted by the parser.
const MAX_NESTING_DEPTH: usize = 64;
/// Longest expression, in tokens, accepted by the parser.
const MAX_TOKENS: usize = 512;

/// Parses and evaluates `expression`, returning its truthiness.
pub fn evaluate_condition(expression: &str, context: &ExecutionContext) -> Result<bool> {
    let ast = parse_expression(expression)?;
    Ok(evaluate(&ast, context)?.is_truthy())
}

/// Checks that `expression` parses, without evaluating it.
pub fn validate_expression(expression: &str) -> Result<()> {
    parse_expression(expression).map(|_| ())
}

fn parse_expression(expression: &str) -> Result<Expr> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        bail!("expression cannot be empty");
    }
    if tokens.len() > MAX_TOKENS {
        bail!("expression is too long ({} tokens, at most {MAX_TOKENS})", tokens.len());
    }
    let mut parser = Parser {
        tokens,
        position: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        bail!("unexpected token '{}' at position {}", token, parser.position);
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Identifier(String),
    True,
    False,
    Null,
    Operator(Operator),
    OpenParen,
    CloseParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(number) => write!(f, "{number}"),
            Token::Text(text) => write!(f, "\"{text}\""),
            Token::Identifier(name) => f.write_str(name),
            Token::True => f.write_str("true"),
            Token::False => f.write_str("false"),
            Token::Null => f.write_str("null"),
            Token::Operator(operator) => f.write_str(operator.symbol()),
            Token::OpenParen => f.write_str("("),
            Token::CloseParen => f.write_str(")"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Or,
    And,
    Not,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Operator::Or => "||",
            Operator::And => "&&",
            Operator::Not => "!",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Remainder => "%",
        }
    }
}

// Longest symbols first so `===` wins over `==` and `<=` over `<`.
const OPERATOR_SYMBOLS: &[(&str, Operator)] = &[
    ("===", Operator::Equal),
    ("!==", Operator::NotEqual),
    ("||", Operator::Or),
    ("&&", Operator::And),
    ("==", Operator::Equal),
    ("!=", Operator::NotEqual),
    ("<=", Operator::LessOrEqual),
    (">=", Operator::GreaterOrEqual),
    ("<", Operator::Less),
    (">", Operator::Greater),
    ("!", Operator::Not),
    ("+", Operator::Add),
    ("-", Operator::Subtract),
    ("*", Operator::Multiply),
    ("/", Operator::Divide),
    ("%", Operator::Remainder),
];

fn tokenize(expression: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut index = 0usize;

    while index < expression.len() {
        let rest = &expression[index..];
        let Some(character) = rest.chars().next() else {
            break;
        };

        if character.is_whitespace() {
            index += character.len_utf8();
            continue;
        }

        if character == '(' || character == ')' {
            tokens.push(if character == '(' { Token::OpenParen } else { Token::CloseParen });
            index += 1;
            continue;
        }

        if character == '"' || character == '\'' {
            let (text, consumed) = read_string_literal(rest, character)?;
            tokens.push(Token::Text(text));
            index += consumed;
            continue;
        }

        if character.is_ascii_digit() {
            let length = rest
                .char_indices()
                .find(|(_, candidate)| !(candidate.is_ascii_digit() || *candidate == '.'))
                .map(|(position, _)| position)
                .unwrap_or(rest.len());
            let literal = &rest[..length];
            let number = literal
                .parse::<f64>()
                .map_err(|_| anyhow!("invalid number literal '{literal}'"))?;
            tokens.push(Token::Number(number));
            index += length;
            continue;
        }

        if character.is_ascii_alphabetic() || character == '_' {
            let length = rest
                .char_indices()
                .find(|(_, candidate)| !(candidate.is_ascii_alphanumeric() || *candidate == '_' || *candidate == '.'))
                .map(|(position, _)| position)
                .unwrap_or(rest.len());
            let word = &rest[..length];
            tokens.push(match word {
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                _ => Token::Identifier(word.to_string()),
            });
            index += length;
            continue;
        }

        if let Some((symbol, operator)) = OPERATOR_SYMBOLS.iter().find(|(symbol, _)| rest.starts_with(symbol)) {
            tokens.push(Token::Operator(*operator));
            index += symbol.len();
            continue;
        }

        bail!("unexpected character '{character}' at position {index}");
    }

    Ok(tokens)
}

/// Reads a quoted literal starting at `input[0]`; returns the unescaped text and bytes consumed.
fn read_string_literal(input: &str, quote: char) -> Result<(String, usize)> {
    let mut text = String::new();
    let mut escaped = false;

    for (position, character) in input.char_indices().skip(1) {
        if escaped {
            text.push(match character {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            escaped = false;
            continue;
        }
        if character == '\\' {
            escaped = true;
            continue;
        }
        if character == quote {
            return Ok((text, position + character.len_utf8()));
        }
        text.push(character);
    }

    bail!("unterminated string literal")
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Operand),
    Variable(String),
    Not(Box<Expr>),
    Negate(Box<Expr>),
    Binary(Operator, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> Result<Expr>) -> Result<Expr> {
        if self.depth >= MAX_NESTING_DEPTH {
            bail!("expression nests deeper than {MAX_NESTING_DEPTH} levels");
        }
        self.depth += 1;
        let expr = parse(self);
        self.depth -= 1;
        expr
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn eat_operator(&mut self, candidates: &[Operator]) -> Option<Operator> {
        match self.peek() {
            Some(Token::Operator(operator)) if candidates.contains(operator) => {
                let operator = *operator;
                self.position += 1;
                Some(operator)
            }
            _ => None,
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_operator(&[Operator::Or]).is_some() {
            let right = self.parse_and()?;
            left = Expr::Binary(Operator::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_operator(&[Operator::And]).is_some() {
            let right = self.parse_not()?;
            left = Expr::Binary(Operator::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_operator(&[Operator::Not]).is_some() {
            return Ok(Expr::Not(Box::new(self.nested(Self::parse_not)?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_sum()?;
        let comparison = [
            Operator::Equal,
            Operator::NotEqual,
            Operator::Less,
            Operator::LessOrEqual,
            Operator::Greater,
            Operator::GreaterOrEqual,
        ];
        if let Some(operator) = self.eat_operator(&comparison) {
            let right = self.parse_sum()?;
            if self.eat_operator(&comparison).is_some() {
                bail!("comparisons cannot be chained; use '&&' to combine them");
            }
            return Ok(Expr::Binary(operator, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_sum(&mut self) -> Result<Expr> {
        let mut left = self.parse_product()?;
        while let Some(operator) = self.eat_operator(&[Operator::Add, Operator::Subtract]) {
            let right = self.parse_product()?;
            left = Expr::Binary(operator, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while let Some(operator) = self.eat_operator(&[Operator::Multiply, Operator::Divide, Operator::Remainder]) {
            let right = self.parse_unary()?;
            left = Expr::Binary(operator, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat_operator(&[Operator::Subtract]).is_some() {
            return Ok(Expr::Negate(Box::new(self.nested(Self::parse_unary)?)));
        }
        if self.eat_operator(&[Operator::Not]).is_some() {
            return Ok(Expr::Not(Box::new(self.nested(Self::parse_unary)?)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(number)) => Ok(Expr::Literal(Operand::Number(number))),
            Some(Token::Text(text)) => Ok(Expr::Literal(Operand::Text(text))),
            Some(Token::True) => Ok(Expr::Literal(Operand::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Operand::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Operand::Null)),
            Some(Token::Identifier(name)) => Ok(Expr::Variable(name)),
            Some(Token::OpenParen) => {
                let inner = self.nested(Self::parse_or)?;
                match self.next() {
                    Some(Token::CloseParen) => Ok(inner),
                    _ => bail!("missing closing parenthesis"),
                }
            }
            Some(token) => bail!("unexpected token '{token}'"),
            None => bail!("unexpected end of expression"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl Operand {
    fn is_truthy(&self) -> bool {
        match self {
            Operand::Bool(value) => *value,
            Operand::Number(number) => *number != 0.0 && !number.is_nan(),
            Operand::Text(text) => !(text.is_empty() || text == "0" || text.eq_ignore_ascii_case("false")),
            Operand::Null => false,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Number(number) => Some(*number),
            Operand::Text(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    fn as_text(&self) -> String {
        match self {
            Operand::Number(number) => format_number(*number),
            Operand::Text(text) => text.clone(),
            Operand::Bool(value) => value.to_string(),
            Operand::Null => "null".to_string(),
        }
    }
}

fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}

fn evaluate(expr: &Expr, context: &ExecutionContext) -> Result<Operand> {
    match expr {
        Expr::Literal(operand) => Ok(operand.clone()),
        Expr::Variable(name) => context
            .get(name)
            .map(|value| Operand::Text(value.to_string()))
            .ok_or_else(|| anyhow!("unknown variable '{name}'")),
        Expr::Not(inner) => Ok(Operand::Bool(!evaluate(inner, context)?.is_truthy())),
        Expr::Negate(inner) => {
            let operand = evaluate(inner, context)?;
            let number = operand
                .as_number()
                .ok_or_else(|| anyhow!("cannot negate non-numeric value '{}'", operand.as_text()))?;
            Ok(Operand::Number(-number))
        }
        Expr::Binary(Operator::And, left, right) => {
            if !evaluate(left, context)?.is_truthy() {
                return Ok(Operand::Bool(false));
            }
            Ok(Operand::Bool(evaluate(right, context)?.is_truthy()))
        }
        Expr::Binary(Operator::Or, left, right) => {
            if evaluate(left, context)?.is_truthy() {
                return Ok(Operand::Bool(true));
            }
            Ok(Operand::Bool(evaluate(right, context)?.is_truthy()))
        }
        Expr::Binary(operator, left, right) => {
            let left = evaluate(left, context)?;
            let right = evaluate(right, context)?;
            apply_binary(*operator, &left, &right)
        }
    }
}

fn apply_binary(operator: Operator, left: &Operand, right: &Operand) -> Result<Operand> {
    match operator {
        Operator::Equal => Ok(Operand::Bool(operands_equal(left, right))),
        Operator::NotEqual => Ok(Operand::Bool(!operands_equal(left, right))),
        Operator::Less | Operator::LessOrEqual | Operator::Greater | Operator::GreaterOrEqual => {
            let ordering = compare_operands(left, right)?;
            let result = match operator {
                Operator::Less => ordering.is_lt(),
                Operator::LessOrEqual => ordering.is_le(),
                Operator::Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Operand::Bool(result))
        }
        Operator::Add => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => Ok(Operand::Number(a + b)),
            _ => Ok(Operand::Text(format!("{}{}", left.as_text(), right.as_text()))),
        },
        Operator::Subtract | Operator::Multiply | Operator::Divide | Operator::Remainder => {
            let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
                bail!(
                    "operator '{}' requires numeric operands, got '{}' and '{}'",
                    operator.symbol(),
                    left.as_text(),
                    right.as_text()
                );
            };
            match operator {
                Operator::Subtract => Ok(Operand::Number(a - b)),
                Operator::Multiply => Ok(Operand::Number(a * b)),
                _ if b == 0.0 => bail!("division by zero"),
                Operator::Divide => Ok(Operand::Number(a / b)),
                _ => Ok(Operand::Number(a % b)),
            }
        }
        Operator::And | Operator::Or | Operator::Not => bail!("operator '{}' is not binary here", operator.symbol()),
    }
}

fn operands_equal(left: &Operand, right: &Operand) -> bool {
    match (left, right) {
        (Operand::Null, Operand::Null) => true,
        (Operand::Null, _) | (_, Operand::Null) => false,
        (Operand::Bool(a), Operand::Bool(b)) => a == b,
        (Operand::Bool(flag), Operand::Text(text)) | (Operand::Text(text), Operand::Bool(flag)) => {
            text.eq_ignore_ascii_case(if *flag { "true" } else { "false" })
        }
        (Operand::Text(a), Operand::Text(b)) => a == b,
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => left.as_text() == right.as_text(),
        },
    }
}

fn compare_operands(left: &Operand, right: &Operand) -> Result<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return a
            .partial_cmp(&b)
            .ok_or_else(|| anyhow!("cannot order '{}' and '{}'", left.as_text(), right.as_text()));
    }
    match (left, right) {
        (Operand::Text(a), Operand::Text(b)) => Ok(a.cmp(b)),
        _ => bail!("cannot order '{}' and '{}'", left.as_text(), right.as_text()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ExecutionContext {
        [("env", "prod"), ("count", "5"), ("flag", "false"), ("empty", ""), ("version", "1.10")]
            .into_iter()
            .collect()
    }

    fn eval(expression: &str) -> bool {
        evaluate_condition(expression, &context()).unwrap_or_else(|error| panic!("{expression}: {error:#}"))
    }

    #[test]
    fn literal_comparisons() {
        assert!(eval("1 == 1"));
        assert!(eval("'a' != 'b'"));
        assert!(eval("2 > 1 && 1 <= 1"));
        assert!(!eval("2 < 1 || false"));
        assert!(eval("\"x\" === 'x'"));
    }

    #[test]
    fn variables_compare_numerically_when_possible() {
        assert!(eval("count > 3"));
        assert!(eval("count == 5"));
        assert!(eval("count == '5'"));
        assert!(eval("count + 1 == 6"));
        assert!(eval("count * 2 - 4 == 6"));
        assert!(eval("count % 2 == 1"));
        assert!(!eval("count >= 10"));
    }

    #[test]
    fn string_variables_and_concatenation() {
        assert!(eval("env == 'prod'"));
        assert!(eval("env + '-eu' == 'prod-eu'"));
        assert!(eval("'b' > 'a'"));
    }

    #[test]
    fn truthiness_rules() {
        assert!(!eval("flag"));
        assert!(!eval("empty"));
        assert!(eval("env"));
        assert!(eval("!flag"));
        assert!(eval("!(count < 1)"));
        assert!(!eval("null"));
        assert!(eval("flag == false"));
    }

    #[test]
    fn precedence_and_grouping() {
        assert!(eval("1 + 2 * 3 == 7"));
        assert!(eval("(1 + 2) * 3 == 9"));
        assert!(eval("-2 + 5 == 3"));
        assert!(eval("true || false && false"));
        assert!(!eval("(true || false) && false"));
    }

    #[test]
    fn evaluation_errors() {
        let context = context();
        assert!(evaluate_condition("unknown == 1", &context).is_err());
        assert!(evaluate_condition("count / 0", &context).is_err());
        assert!(evaluate_condition("env - 1", &context).is_err());
        assert!(evaluate_condition("env < 1", &context).is_err());
    }

    #[test]
    fn syntax_errors() {
        assert!(validate_expression("").is_err());
        assert!(validate_expression("1 ==").is_err());
        assert!(validate_expression("(1 == 1").is_err());
        assert!(validate_expression("'open").is_err());
        assert!(validate_expression("1 < 2 < 3").is_err());
        assert!(validate_expression("{{missing}} == 1").is_err());
        assert!(validate_expression("process.exit(1)").is_err());
        assert!(validate_expression("a == b").is_ok());
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let parens = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        let error = validate_expression(&parens).unwrap_err().to_string();
        assert!(error.contains("too long"), "{error}");

        let unclosed = "(".repeat(100);
        let error = validate_expression(&unclosed).unwrap_err().to_string();
        assert!(error.contains("nests deeper"), "{error}");

        let negations = format!("{}true", "!".repeat(65));
        assert!(validate_expression(&negations).unwrap_err().to_string().contains("nests deeper"));
        assert!(eval(&format!("{}true", "!".repeat(64))));
        assert!(eval(&format!("{}1{} == 1", "(".repeat(60), ")".repeat(60))));

        let context = ExecutionContext::new();
        let chain = vec!["1"; 300].join(" + ");
        assert!(evaluate_condition(&chain, &context).is_err());
    }

    #[test]
    fn handles_utf8_literals() {
        assert!(eval("'café' == \"café\""));
    }
}
