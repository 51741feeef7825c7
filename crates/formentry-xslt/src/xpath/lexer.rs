//! XPath 1.0 tokenizer, including the expression-lexical disambiguation rules
//! for `*` and operator names.

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Slash,
    DoubleSlash,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    DotDot,
    At,
    Comma,
    ColonColon,
    Pipe,
    Plus,
    Minus,
    Equals,
    NotEquals,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Multiply,
    And,
    Or,
    Mod,
    Div,
    Literal(String),
    Number(f64),
    Variable(String),
    NameTest(NameTest),
    FunctionName(String),
    NodeType(String),
    AxisName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NameTest {
    Any,
    PrefixAny(String),
    Name {
        prefix: Option<String>,
        local: String,
    },
}

const NODE_TYPES: &[&str] = &["comment", "text", "processing-instruction", "node"];

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        let next = chars.get(index + 1).copied();
        if ch.is_whitespace() {
            index += 1;
            continue;
        }
        let (token, width) = match ch {
            '/' if next == Some('/') => (Token::DoubleSlash, 2),
            '/' => (Token::Slash, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            ',' => (Token::Comma, 1),
            '|' => (Token::Pipe, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '=' => (Token::Equals, 1),
            '@' => (Token::At, 1),
            '!' if next == Some('=') => (Token::NotEquals, 2),
            '<' if next == Some('=') => (Token::LessEq, 2),
            '<' => (Token::Less, 1),
            '>' if next == Some('=') => (Token::GreaterEq, 2),
            '>' => (Token::Greater, 1),
            ':' if next == Some(':') => (Token::ColonColon, 2),
            '.' if next == Some('.') => (Token::DotDot, 2),
            '.' if next.is_some_and(|c| c.is_ascii_digit()) => read_number(&chars, index)?,
            '.' => (Token::Dot, 1),
            '"' | '\'' => {
                let end = chars[index + 1..]
                    .iter()
                    .position(|c| *c == ch)
                    .ok_or_else(|| "unterminated string literal".to_string())?;
                let literal: String = chars[index + 1..index + 1 + end].iter().collect();
                (Token::Literal(literal), end + 2)
            }
            '$' => {
                let (name, width) = read_qname(&chars, index + 1)
                    .ok_or_else(|| "expected variable name after '$'".to_string())?;
                (Token::Variable(name), width + 1)
            }
            '*' if follows_operand(&tokens) => (Token::Multiply, 1),
            '*' => (Token::NameTest(NameTest::Any), 1),
            c if c.is_ascii_digit() => read_number(&chars, index)?,
            c if is_name_start(c) => read_name_token(&chars, index, &tokens)?,
            other => return Err(format!("unexpected character {other:?}")),
        };
        tokens.push(token);
        index += width;
    }

    Ok(tokens)
}

/// True when the previous token ends an operand, so `*` and names must be operators.
fn follows_operand(tokens: &[Token]) -> bool {
    match tokens.last() {
        None => false,
        Some(token) => !matches!(
            token,
            Token::At
                | Token::ColonColon
                | Token::LParen
                | Token::LBracket
                | Token::Comma
                | Token::And
                | Token::Or
                | Token::Mod
                | Token::Div
                | Token::Multiply
                | Token::Slash
                | Token::DoubleSlash
                | Token::Pipe
                | Token::Plus
                | Token::Minus
                | Token::Equals
                | Token::NotEquals
                | Token::Less
                | Token::LessEq
                | Token::Greater
                | Token::GreaterEq
        ),
    }
}

fn is_name_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_name_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.')
}

fn read_ncname(chars: &[char], start: usize) -> Option<(String, usize)> {
    if !chars.get(start).copied().is_some_and(is_name_start) {
        return None;
    }
    let len = chars[start..]
        .iter()
        .take_while(|ch| is_name_char(**ch))
        .count();
    Some((chars[start..start + len].iter().collect(), len))
}

fn read_qname(chars: &[char], start: usize) -> Option<(String, usize)> {
    let (prefix, len) = read_ncname(chars, start)?;
    let colon = start + len;
    if chars.get(colon) == Some(&':') && chars.get(colon + 1) != Some(&':') {
        if let Some((local, local_len)) = read_ncname(chars, colon + 1) {
            return Some((format!("{prefix}:{local}"), len + 1 + local_len));
        }
    }
    Some((prefix, len))
}

fn read_number(chars: &[char], start: usize) -> Result<(Token, usize), String> {
    let mut end = start;
    while end < chars.len() && chars[end].is_ascii_digit() {
        end += 1;
    }
    if end < chars.len() && chars[end] == '.' {
        end += 1;
        while end < chars.len() && chars[end].is_ascii_digit() {
            end += 1;
        }
    }
    let text: String = chars[start..end].iter().collect();
    let value = text
        .parse::<f64>()
        .map_err(|error| format!("invalid number {text:?}: {error}"))?;
    Ok((Token::Number(value), end - start))
}

fn next_non_space(chars: &[char], from: usize) -> usize {
    let mut index = from;
    while index < chars.len() && chars[index].is_whitespace() {
        index += 1;
    }
    index
}

fn read_name_token(
    chars: &[char],
    start: usize,
    tokens: &[Token],
) -> Result<(Token, usize), String> {
    let (name, len) = read_ncname(chars, start).ok_or_else(|| "expected name".to_string())?;

    if follows_operand(tokens) {
        let token = match name.as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "mod" => Token::Mod,
            "div" => Token::Div,
            other => return Err(format!("expected operator, found {other:?}")),
        };
        return Ok((token, len));
    }

    let after = start + len;
    if chars.get(after) == Some(&':') && chars.get(after + 1) != Some(&':') {
        if chars.get(after + 1) == Some(&'*') {
            return Ok((Token::NameTest(NameTest::PrefixAny(name)), len + 2));
        }
        let (local, local_len) = read_ncname(chars, after + 1)
            .ok_or_else(|| format!("expected local name after prefix {name:?}"))?;
        let width = len + 1 + local_len;
        let lookahead = next_non_space(chars, start + width);
        if chars.get(lookahead) == Some(&'(') {
            return Ok((Token::FunctionName(format!("{name}:{local}")), width));
        }
        return Ok((
            Token::NameTest(NameTest::Name {
                prefix: Some(name),
                local,
            }),
            width,
        ));
    }

    let lookahead = next_non_space(chars, after);
    if chars.get(lookahead) == Some(&'(') {
        if NODE_TYPES.contains(&name.as_str()) {
            return Ok((Token::NodeType(name), len));
        }
        return Ok((Token::FunctionName(name), len));
    }
    if chars.get(lookahead) == Some(&':') && chars.get(lookahead + 1) == Some(&':') {
        return Ok((Token::AxisName(name), len));
    }
    Ok((
        Token::NameTest(NameTest::Name {
            prefix: None,
            local: name,
        }),
        len,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_is_multiply_after_operand() {
        let tokens = tokenize("2 * *").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Number(2.0),
                Token::Multiply,
                Token::NameTest(NameTest::Any)
            ]
        );
    }

    #[test]
    fn names_become_operators_after_operand() {
        let tokens = tokenize("div div div").unwrap();
        assert_eq!(tokens[1], Token::Div);
        assert!(matches!(tokens[0], Token::NameTest(_)));
        assert!(matches!(tokens[2], Token::NameTest(_)));
    }

    #[test]
    fn recognises_axes_functions_and_node_types() {
        let tokens = tokenize("following-sibling::text() | count(a:b)").unwrap();
        assert_eq!(tokens[0], Token::AxisName("following-sibling".to_string()));
        assert_eq!(tokens[2], Token::NodeType("text".to_string()));
        assert_eq!(tokens[6], Token::FunctionName("count".to_string()));
        assert_eq!(
            tokens[8],
            Token::NameTest(NameTest::Name {
                prefix: Some("a".to_string()),
                local: "b".to_string()
            })
        );
    }

    #[test]
    fn rejects_unterminated_literal() {
        assert!(tokenize("'abc").is_err());
    }
}
