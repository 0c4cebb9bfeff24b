use thiserror::Error;

use super::nquad::{Literal, NQuad, NodeRef, ObjectValue};
use crate::types::{TypeId, Uid};

/// Malformed fact text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("rdf line {line}: {message}")]
pub struct RdfError {
    /// 1-based line of the offending fact.
    pub line: usize,
    /// What went wrong.
    pub message: String,
}

/// Parses N-Quad style fact text, one fact per `.`-terminated statement:
///
/// ```text
/// _:alice <name> "Alice" .
/// <peter> <age> "28"^^<xs:int> .
/// uid(friends) <tag> "close"@en .
/// <0x1f> <age> val(years) .
/// ```
///
/// Lines starting with `#` are comments.
pub fn parse_rdf(text: &str) -> Result<Vec<NQuad>, RdfError> {
    let mut cursor = Cursor::new(text);
    let mut quads = Vec::new();
    loop {
        cursor.skip_blank();
        if cursor.at_end() {
            return Ok(quads);
        }
        let line = cursor.line;
        let subject = cursor.node().map_err(|m| cursor.fail(m))?;
        cursor.skip_inline();
        let predicate = cursor.iri().map_err(|m| cursor.fail(m))?;
        cursor.skip_inline();
        let object = cursor.object().map_err(|m| cursor.fail(m))?;
        cursor.skip_inline();
        if !cursor.eat('.') {
            return Err(RdfError {
                line,
                message: "fact is missing its terminating '.'".into(),
            });
        }
        quads.push(NQuad::new(subject, predicate, object));
    }
}

struct Cursor<'a> {
    rest: &'a str,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text, line: 1 }
    }

    fn fail(&self, message: String) -> RdfError {
        RdfError {
            line: self.line,
            message,
        }
    }

    fn at_end(&self) -> bool {
        self.rest.is_empty()
    }

    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.rest = &self.rest[ch.len_utf8()..];
        if ch == '\n' {
            self.line += 1;
        }
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, expected: &str) -> bool {
        if self.rest.starts_with(expected) {
            for _ in expected.chars() {
                self.bump();
            }
            true
        } else {
            false
        }
    }

    /// Whitespace, newlines and comment lines between facts.
    fn skip_blank(&mut self) {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while !matches!(self.bump(), Some('\n') | None) {}
                }
                _ => return,
            }
        }
    }

    fn skip_inline(&mut self) {
        while matches!(self.peek(), Some(ch) if ch.is_whitespace()) {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let len = self
            .rest
            .find(|c: char| !pred(c))
            .unwrap_or(self.rest.len());
        let (taken, rest) = self.rest.split_at(len);
        self.line += taken.matches('\n').count();
        self.rest = rest;
        taken
    }

    fn iri(&mut self) -> Result<String, String> {
        if !self.eat('<') {
            return Err(format!("expected '<', found {:?}", self.snippet()));
        }
        let body = self.take_while(|c| c != '>' && c != '\n');
        if !self.eat('>') || body.trim().is_empty() {
            return Err(format!("unterminated or empty iri <{body}"));
        }
        Ok(body.trim().to_string())
    }

    fn name(&mut self) -> Result<String, String> {
        let name = self.take_while(|c| c.is_alphanumeric() || c == '_');
        if name.is_empty() {
            return Err(format!("expected a name, found {:?}", self.snippet()));
        }
        Ok(name.to_string())
    }

    fn var_call(&mut self) -> Result<String, String> {
        self.skip_inline();
        let name = self.name()?;
        self.skip_inline();
        if !self.eat(')') {
            return Err(format!("unclosed variable reference {name}"));
        }
        Ok(name)
    }

    fn node(&mut self) -> Result<NodeRef, String> {
        if self.eat_str("_:") {
            let label = self.take_while(|c| c.is_alphanumeric() || c == '_' || c == '-');
            if label.is_empty() {
                return Err("blank node without a label".into());
            }
            return Ok(NodeRef::Blank(label.to_string()));
        }
        if self.eat_str("uid(") {
            return self.var_call().map(NodeRef::Var);
        }
        let iri = self.iri()?;
        if iri.starts_with("0x") || iri.starts_with("0X") {
            return Uid::parse(&iri)
                .map(NodeRef::Uid)
                .ok_or_else(|| format!("invalid uid <{iri}>"));
        }
        Ok(NodeRef::Xid(iri))
    }

    fn object(&mut self) -> Result<ObjectValue, String> {
        if self.peek() == Some('"') {
            return self.literal().map(ObjectValue::Literal);
        }
        if self.eat_str("val(") {
            return self.var_call().map(ObjectValue::ValueVar);
        }
        self.node().map(ObjectValue::Node)
    }

    fn literal(&mut self) -> Result<Literal, String> {
        self.bump();
        let mut raw = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated string literal".into()),
                Some('"') => break,
                Some('\\') => raw.push(match self.bump() {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('r') => '\r',
                    Some(other @ ('"' | '\\')) => other,
                    other => return Err(format!("invalid escape \\{}", other.unwrap_or(' '))),
                }),
                Some(ch) => raw.push(ch),
            }
        }
        let mut literal = Literal::plain(raw);
        if self.eat_str("^^") {
            let iri = self.iri()?;
            let ty = TypeId::from_xsd(&iri).ok_or_else(|| format!("unknown datatype <{iri}>"))?;
            literal.ty = Some(ty);
        } else if self.eat('@') {
            let lang = self.take_while(|c| c.is_ascii_alphanumeric() || c == '-');
            if lang.is_empty() {
                return Err("empty language tag".into());
            }
            literal.lang = Some(lang.to_string());
        }
        Ok(literal)
    }

    fn snippet(&self) -> String {
        self.rest.chars().take(16).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_node_form() {
        let quads = parse_rdf(
            "# people\n_:alice <friend> <peter> .\n<0x1f> <friend> uid(f) .\nuid(f) <knows> _:bob .\n",
        )
        .unwrap();
        assert_eq!(quads.len(), 3);
        assert_eq!(quads[0].subject, NodeRef::Blank("alice".into()));
        assert_eq!(quads[0].object, ObjectValue::Node(NodeRef::Xid("peter".into())));
        assert_eq!(quads[1].subject, NodeRef::Uid(Uid(0x1f)));
        assert_eq!(quads[1].object, ObjectValue::Node(NodeRef::Var("f".into())));
        assert_eq!(quads[2].subject, NodeRef::Var("f".into()));
        assert_eq!(quads[2].predicate, "knows");
    }

    #[test]
    fn parses_literal_annotations() {
        let quads = parse_rdf(
            "<peter> <age> \"28\"^^<xs:int> .\n<peter> <name> \"Pe\\\"ter\"@en .\n<peter> <age> val(a) .",
        )
        .unwrap();
        assert_eq!(
            quads[0].object,
            ObjectValue::Literal(Literal::typed("28", TypeId::Int))
        );
        match &quads[1].object {
            ObjectValue::Literal(lit) => {
                assert_eq!(lit.raw, "Pe\"ter");
                assert_eq!(lit.lang.as_deref(), Some("en"));
                assert_eq!(lit.ty, None);
            }
            other => panic!("unexpected object {other:?}"),
        }
        assert_eq!(quads[2].object, ObjectValue::ValueVar("a".into()));
    }

    #[test]
    fn several_facts_on_one_line() {
        let quads = parse_rdf("_:a <name> \"x\" . _:b <name> \"y\" .").unwrap();
        assert_eq!(quads.len(), 2);
    }

    #[test]
    fn reports_line_of_error() {
        let err = parse_rdf("_:a <name> \"x\" .\n\n_:b name \"y\" .").unwrap_err();
        assert_eq!(err.line, 3);

        assert!(parse_rdf("_:a <name> \"x\"").is_err());
        assert!(parse_rdf("_:a <age> \"1\"^^<xs:geo> .").is_err());
        assert!(parse_rdf("<0xzz> <age> \"1\" .").is_err());
    }
}
