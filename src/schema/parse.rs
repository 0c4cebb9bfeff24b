use super::{Directive, SchemaError, SchemaUpdate};
use crate::types::TypeId;

/// Parses schema text such as
///
/// ```text
/// name: string @index(term, exact) .
/// friend: uid @reverse .
/// ```
///
/// Each declaration ends with `.`; `#` starts a comment running to the end
/// of the line. Tokenizer names are not checked here, see
/// [`enrich_schema`](super::enrich_schema).
pub fn parse_schema(text: &str) -> Result<Vec<SchemaUpdate>, SchemaError> {
    let mut updates = Vec::new();
    let mut statement = String::new();
    let mut statement_line = 0;
    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.split('#').next().unwrap_or_default();
        for ch in line.chars() {
            if ch == '.' {
                updates.push(parse_declaration(&statement, statement_line)?);
                statement.clear();
                continue;
            }
            if statement.trim().is_empty() && !ch.is_whitespace() {
                statement_line = idx + 1;
            }
            statement.push(ch);
        }
        statement.push('\n');
    }
    if !statement.trim().is_empty() {
        return Err(SchemaError::Parse {
            line: statement_line,
            message: "declaration is missing its terminating '.'".into(),
        });
    }
    Ok(updates)
}

fn parse_declaration(statement: &str, line: usize) -> Result<SchemaUpdate, SchemaError> {
    let fail = |message: String| SchemaError::Parse { line, message };
    let (predicate, rest) = statement
        .split_once(':')
        .ok_or_else(|| fail(format!("expected `predicate: type`, got {:?}", statement.trim())))?;
    let predicate = predicate
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>');
    if predicate.is_empty() || predicate.contains(char::is_whitespace) {
        return Err(fail(format!("invalid predicate name {predicate:?}")));
    }

    let rest = rest.trim();
    let (type_name, mut directives) = match rest.find('@') {
        Some(at) => (rest[..at].trim(), &rest[at..]),
        None => (rest, ""),
    };
    let value_type = TypeId::from_name(type_name)
        .ok_or_else(|| fail(format!("unknown type {type_name:?} for {predicate}")))?;
    let mut update = SchemaUpdate::new(predicate, value_type);

    let mut has_directive = false;
    loop {
        let trimmed = directives.trim_start();
        if trimmed.is_empty() {
            break;
        }
        let body = trimmed
            .strip_prefix('@')
            .ok_or_else(|| fail(format!("unexpected {trimmed:?} after type")))?;
        let name_len = body
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(body.len());
        let (name, mut tail) = body.split_at(name_len);
        let mut args = Vec::new();
        if let Some(inner) = tail.trim_start().strip_prefix('(') {
            let close = inner
                .find(')')
                .ok_or_else(|| fail(format!("unclosed argument list for @{name}")))?;
            args = inner[..close]
                .split(',')
                .map(str::trim)
                .filter(|arg| !arg.is_empty())
                .map(String::from)
                .collect();
            tail = &inner[close + 1..];
        }
        let directive = match name {
            "index" => Directive::Index,
            "reverse" if value_type == TypeId::Uid => Directive::Reverse,
            "reverse" => return Err(fail(format!("@reverse requires uid type on {predicate}"))),
            "count" => Directive::Count,
            other => return Err(fail(format!("unknown directive @{other}"))),
        };
        if has_directive {
            return Err(fail(format!("conflicting directives on {predicate}")));
        }
        if directive != Directive::Index && !args.is_empty() {
            return Err(fail(format!("@{name} takes no arguments")));
        }
        has_directive = true;
        update.directive = directive;
        update.tokenizers = args;
        directives = tail;
    }
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_declarations() {
        let updates = parse_schema(
            "# people\nname: string @index(term, exact) .\n<friend>: uid @reverse .\nage: int .",
        )
        .unwrap();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].predicate, "name");
        assert_eq!(updates[0].directive, Directive::Index);
        assert_eq!(updates[0].tokenizers, vec!["term", "exact"]);
        assert_eq!(updates[1].predicate, "friend");
        assert_eq!(updates[1].directive, Directive::Reverse);
        assert_eq!(updates[2], SchemaUpdate::new("age", TypeId::Int));
    }

    #[test]
    fn several_declarations_on_one_line() {
        let updates = parse_schema("a: int . b: float @index .").unwrap();
        assert_eq!(updates.len(), 2);
        assert!(updates[1].tokenizers.is_empty());
    }

    #[test]
    fn reports_line_of_bad_declaration() {
        let err = parse_schema("a: int .\n\nb: widget .").unwrap_err();
        assert_eq!(
            err,
            SchemaError::Parse {
                line: 3,
                message: "unknown type \"widget\" for b".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_text() {
        assert!(parse_schema("name string .").is_err());
        assert!(parse_schema("name: string").is_err());
        assert!(parse_schema("name: string @index(term .").is_err());
        assert!(parse_schema("name: string @reverse .").is_err());
        assert!(parse_schema("name: string @index @count .").is_err());
        assert!(parse_schema("name: string @fancy .").is_err());
    }
}
