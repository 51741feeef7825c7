//! XPath core function library plus the XSLT additions used by form transforms.

use crate::dom::NodeKind;
use crate::error::XPathError;
use crate::xpath::eval::evaluate;
use crate::xpath::parser::Expr;
use crate::xpath::{Context, Value, string_to_number};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Function {
    Last,
    Position,
    Count,
    LocalName,
    Name,
    NamespaceUri,
    String,
    Concat,
    StartsWith,
    Contains,
    SubstringBefore,
    SubstringAfter,
    Substring,
    StringLength,
    NormalizeSpace,
    Translate,
    Boolean,
    Not,
    True,
    False,
    Number,
    Sum,
    Floor,
    Ceiling,
    Round,
    Current,
    GenerateId,
    SystemProperty,
}

impl Function {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        let function = match name {
            "last" => Self::Last,
            "position" => Self::Position,
            "count" => Self::Count,
            "local-name" => Self::LocalName,
            "name" => Self::Name,
            "namespace-uri" => Self::NamespaceUri,
            "string" => Self::String,
            "concat" => Self::Concat,
            "starts-with" => Self::StartsWith,
            "contains" => Self::Contains,
            "substring-before" => Self::SubstringBefore,
            "substring-after" => Self::SubstringAfter,
            "substring" => Self::Substring,
            "string-length" => Self::StringLength,
            "normalize-space" => Self::NormalizeSpace,
            "translate" => Self::Translate,
            "boolean" => Self::Boolean,
            "not" => Self::Not,
            "true" => Self::True,
            "false" => Self::False,
            "number" => Self::Number,
            "sum" => Self::Sum,
            "floor" => Self::Floor,
            "ceiling" => Self::Ceiling,
            "round" => Self::Round,
            "current" => Self::Current,
            "generate-id" => Self::GenerateId,
            "system-property" => Self::SystemProperty,
            _ => return None,
        };
        Some(function)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Last => "last",
            Self::Position => "position",
            Self::Count => "count",
            Self::LocalName => "local-name",
            Self::Name => "name",
            Self::NamespaceUri => "namespace-uri",
            Self::String => "string",
            Self::Concat => "concat",
            Self::StartsWith => "starts-with",
            Self::Contains => "contains",
            Self::SubstringBefore => "substring-before",
            Self::SubstringAfter => "substring-after",
            Self::Substring => "substring",
            Self::StringLength => "string-length",
            Self::NormalizeSpace => "normalize-space",
            Self::Translate => "translate",
            Self::Boolean => "boolean",
            Self::Not => "not",
            Self::True => "true",
            Self::False => "false",
            Self::Number => "number",
            Self::Sum => "sum",
            Self::Floor => "floor",
            Self::Ceiling => "ceiling",
            Self::Round => "round",
            Self::Current => "current",
            Self::GenerateId => "generate-id",
            Self::SystemProperty => "system-property",
        }
    }

    /// Allowed argument counts as `(min, max, description)`.
    fn arity(self) -> (usize, Option<usize>, &'static str) {
        match self {
            Self::Last | Self::Position | Self::True | Self::False | Self::Current => {
                (0, Some(0), "0")
            }
            Self::LocalName
            | Self::Name
            | Self::NamespaceUri
            | Self::String
            | Self::StringLength
            | Self::NormalizeSpace
            | Self::Number
            | Self::GenerateId => (0, Some(1), "0 or 1"),
            Self::Count
            | Self::Boolean
            | Self::Not
            | Self::Sum
            | Self::Floor
            | Self::Ceiling
            | Self::Round
            | Self::SystemProperty => (1, Some(1), "1"),
            Self::StartsWith | Self::Contains | Self::SubstringBefore | Self::SubstringAfter => {
                (2, Some(2), "2")
            }
            Self::Substring => (2, Some(3), "2 or 3"),
            Self::Translate => (3, Some(3), "3"),
            Self::Concat => (2, None, "at least 2"),
        }
    }

    pub(crate) fn check_arity(self, actual: usize) -> Result<(), XPathError> {
        let (min, max, expected) = self.arity();
        if actual < min || max.is_some_and(|max| actual > max) {
            return Err(XPathError::Arity {
                name: self.name().to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

pub(crate) fn call(function: Function, args: &[Expr], ctx: &Context<'_>) -> Result<Value, XPathError> {
    let value = match function {
        Function::Last => Value::Number(ctx.size as f64),
        Function::Position => Value::Number(ctx.position as f64),
        Function::Count => Value::Number(node_set_arg(function, args, 0, ctx)?.len() as f64),
        Function::LocalName | Function::Name | Function::NamespaceUri => {
            let node = match args.first() {
                Some(_) => node_set_arg(function, args, 0, ctx)?.first().copied(),
                None => Some(ctx.node),
            };
            let name = node.and_then(|node| ctx.doc.name(node));
            let text = match (function, name) {
                (_, None) => match (function, node.map(|node| ctx.doc.kind(node))) {
                    (
                        Function::LocalName | Function::Name,
                        Some(NodeKind::ProcessingInstruction { target, .. }),
                    ) => target.clone(),
                    _ => String::new(),
                },
                (Function::LocalName, Some(name)) => name.local.clone(),
                (Function::Name, Some(name)) => name.qualified(),
                (_, Some(name)) => name.namespace.clone().unwrap_or_default(),
            };
            Value::String(text)
        }
        Function::String => Value::String(string_arg_or_context(args, ctx)?),
        Function::Concat => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&evaluate(arg, ctx)?.to_string_value(ctx.doc));
            }
            Value::String(out)
        }
        Function::StartsWith => {
            let (haystack, needle) = two_strings(args, ctx)?;
            Value::Boolean(haystack.starts_with(&needle))
        }
        Function::Contains => {
            let (haystack, needle) = two_strings(args, ctx)?;
            Value::Boolean(haystack.contains(&needle))
        }
        Function::SubstringBefore => {
            let (haystack, needle) = two_strings(args, ctx)?;
            let before = haystack
                .find(&needle)
                .map(|index| haystack[..index].to_string())
                .unwrap_or_default();
            Value::String(before)
        }
        Function::SubstringAfter => {
            let (haystack, needle) = two_strings(args, ctx)?;
            let after = haystack
                .find(&needle)
                .map(|index| haystack[index + needle.len()..].to_string())
                .unwrap_or_default();
            Value::String(after)
        }
        Function::Substring => {
            let text = string_arg(args, 0, ctx)?;
            let start = round(number_arg(args, 1, ctx)?);
            let end = match args.get(2) {
                Some(_) => start + round(number_arg(args, 2, ctx)?),
                None => f64::INFINITY,
            };
            let out: String = text
                .chars()
                .enumerate()
                .filter(|(index, _)| {
                    let position = (*index + 1) as f64;
                    position >= start && position < end
                })
                .map(|(_, ch)| ch)
                .collect();
            Value::String(out)
        }
        Function::StringLength => {
            Value::Number(string_arg_or_context(args, ctx)?.chars().count() as f64)
        }
        Function::NormalizeSpace => {
            let text = string_arg_or_context(args, ctx)?;
            Value::String(text.split_whitespace().collect::<Vec<_>>().join(" "))
        }
        Function::Translate => {
            let text = string_arg(args, 0, ctx)?;
            let from: Vec<char> = string_arg(args, 1, ctx)?.chars().collect();
            let to: Vec<char> = string_arg(args, 2, ctx)?.chars().collect();
            let out: String = text
                .chars()
                .filter_map(|ch| match from.iter().position(|candidate| *candidate == ch) {
                    Some(index) => to.get(index).copied(),
                    None => Some(ch),
                })
                .collect();
            Value::String(out)
        }
        Function::Boolean => Value::Boolean(evaluate(&args[0], ctx)?.to_boolean()),
        Function::Not => Value::Boolean(!evaluate(&args[0], ctx)?.to_boolean()),
        Function::True => Value::Boolean(true),
        Function::False => Value::Boolean(false),
        Function::Number => {
            let number = match args.first() {
                Some(arg) => evaluate(arg, ctx)?.to_number(ctx.doc),
                None => string_to_number(&ctx.doc.string_value(ctx.node)),
            };
            Value::Number(number)
        }
        Function::Sum => {
            let total = node_set_arg(function, args, 0, ctx)?
                .iter()
                .map(|node| string_to_number(&ctx.doc.string_value(*node)))
                .sum();
            Value::Number(total)
        }
        Function::Floor => Value::Number(number_arg(args, 0, ctx)?.floor()),
        Function::Ceiling => Value::Number(number_arg(args, 0, ctx)?.ceil()),
        Function::Round => Value::Number(round(number_arg(args, 0, ctx)?)),
        Function::Current => Value::Nodes(vec![ctx.current]),
        Function::GenerateId => {
            let node = match args.first() {
                Some(_) => node_set_arg(function, args, 0, ctx)?.first().copied(),
                None => Some(ctx.node),
            };
            Value::String(
                node.map(|node| format!("n{}", node.index()))
                    .unwrap_or_default(),
            )
        }
        Function::SystemProperty => {
            let property = string_arg(args, 0, ctx)?;
            match property.as_str() {
                "xsl:version" => Value::Number(1.0),
                "xsl:vendor" => Value::String("formentry-xslt".to_string()),
                _ => Value::String(String::new()),
            }
        }
    };
    Ok(value)
}

/// XPath `round()`: halves round towards positive infinity.
fn round(value: f64) -> f64 {
    if value.is_nan() || value.is_infinite() {
        return value;
    }
    let rounded = (value + 0.5).floor();
    if rounded == 0.0 && value < 0.0 {
        -0.0
    } else {
        rounded
    }
}

fn string_arg(args: &[Expr], index: usize, ctx: &Context<'_>) -> Result<String, XPathError> {
    Ok(evaluate(&args[index], ctx)?.to_string_value(ctx.doc))
}

fn string_arg_or_context(args: &[Expr], ctx: &Context<'_>) -> Result<String, XPathError> {
    match args.first() {
        Some(arg) => Ok(evaluate(arg, ctx)?.to_string_value(ctx.doc)),
        None => Ok(ctx.doc.string_value(ctx.node)),
    }
}

fn two_strings(args: &[Expr], ctx: &Context<'_>) -> Result<(String, String), XPathError> {
    Ok((string_arg(args, 0, ctx)?, string_arg(args, 1, ctx)?))
}

fn number_arg(args: &[Expr], index: usize, ctx: &Context<'_>) -> Result<f64, XPathError> {
    Ok(evaluate(&args[index], ctx)?.to_number(ctx.doc))
}

fn node_set_arg(
    function: Function,
    args: &[Expr],
    index: usize,
    ctx: &Context<'_>,
) -> Result<Vec<crate::dom::NodeId>, XPathError> {
    match evaluate(&args[index], ctx)? {
        Value::Nodes(nodes) => Ok(nodes),
        other => Err(XPathError::Type {
            message: format!(
                "{}() expects a node-set, got {}",
                function.name(),
                other.type_name()
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xpath::number_to_string;

    #[test]
    fn round_follows_xpath_rules() {
        assert_eq!(round(2.5), 3.0);
        assert_eq!(round(-2.5), -2.0);
        assert!(round(-0.4).is_sign_negative());
        assert!(round(f64::NAN).is_nan());
    }

    #[test]
    fn number_formatting_round_trips_through_strings() {
        assert_eq!(number_to_string(string_to_number(" 12 ")), "12");
        assert_eq!(number_to_string(string_to_number("1.50")), "1.5");
    }
}
