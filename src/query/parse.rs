use std::collections::HashMap;

use super::{
    Attr, Func, Mutation, MutationInput, ParseError, ParsedRequest, QueryAst, QueryBlock, Request,
    RequestParser, SchemaQuery,
};
use crate::mutation::parse_rdf;
use crate::types::Uid;

/// Parser for the node's request text.
///
/// ```text
/// mutation {
///   schema { age: int @index(int) . }
///   set { _:p <age> "28"^^<xs:int> . }
///   delete { <0x1> <age> "27" . }
/// }
/// schema(pred: [age]) {}
/// query q($min: int = 1) {
///   adults as var(func: has(age)) { a as age }
///   me(func: uid(adults)) { name, age, ~friend }
/// }
/// ```
///
/// A request holds at most one block of each kind. The query may be written
/// with or without the `query` keyword.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockParser;

impl RequestParser for BlockParser {
    fn parse(&self, request: &Request) -> Result<ParsedRequest, ParseError> {
        let sections = Sections::split(&request.query)?;

        let mut input = sections.mutation.unwrap_or_default();
        if let Some(extra) = &request.mutation {
            append(&mut input.schema, &extra.schema);
            append(&mut input.set, &extra.set);
            append(&mut input.del, &extra.del);
        }
        let mutation = Mutation {
            schema: input.schema,
            set: parse_rdf(&input.set)?,
            del: parse_rdf(&input.del)?,
        };

        let query = match sections.query {
            Some((header, body)) => {
                let vars = declared_vars(header, &request.vars);
                let text = substitute(body.text, body.base, &vars)?;
                Some(parse_blocks(Scan::new(&text, body.base))?)
            }
            None => None,
        };

        Ok(ParsedRequest {
            query,
            mutation: mutation.has_ops().then_some(mutation),
            schema_query: sections.schema_query,
        })
    }
}

fn append(target: &mut String, extra: &str) {
    if extra.trim().is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push('\n');
    }
    target.push_str(extra);
}

#[derive(Clone, Copy)]
struct Piece<'a> {
    text: &'a str,
    base: usize,
}

#[derive(Default)]
struct Sections<'a> {
    mutation: Option<MutationInput>,
    schema_query: Option<SchemaQuery>,
    query: Option<(&'a str, Piece<'a>)>,
}

impl<'a> Sections<'a> {
    fn split(text: &'a str) -> Result<Self, ParseError> {
        let mut out = Sections::default();
        let mut scan = Scan::new(text, 0);
        loop {
            scan.skip_ws();
            if scan.at_end() {
                return Ok(out);
            }
            if scan.peek() == Some('{') {
                let body = scan.braced()?;
                out.set_query("", body)?;
                continue;
            }
            let keyword = scan.ident()?;
            scan.skip_ws();
            match keyword {
                "mutation" => {
                    if out.mutation.is_some() {
                        return Err(ParseError::DuplicateBlock("mutation"));
                    }
                    let body = scan.braced()?;
                    out.mutation = Some(mutation_sections(body)?);
                }
                "schema" => {
                    if out.schema_query.is_some() {
                        return Err(ParseError::DuplicateBlock("schema"));
                    }
                    let predicates = match scan.peek() {
                        Some('(') => schema_args(scan.parens()?)?,
                        _ => Vec::new(),
                    };
                    scan.skip_ws();
                    scan.braced()?;
                    out.schema_query = Some(SchemaQuery { predicates });
                }
                "query" => {
                    let start = scan.pos;
                    while !matches!(scan.peek(), Some('{') | None) {
                        scan.bump();
                    }
                    let header = &text[start..scan.pos];
                    let body = scan.braced()?;
                    out.set_query(header, body)?;
                }
                other => return Err(scan.error(format!("unexpected {other:?}"))),
            }
        }
    }

    fn set_query(&mut self, header: &'a str, body: Piece<'a>) -> Result<(), ParseError> {
        if self.query.is_some() {
            return Err(ParseError::DuplicateBlock("query"));
        }
        self.query = Some((header, body));
        Ok(())
    }
}

fn mutation_sections(body: Piece<'_>) -> Result<MutationInput, ParseError> {
    let mut input = MutationInput::default();
    let mut seen = [false; 3];
    let mut scan = Scan::new(body.text, body.base);
    loop {
        scan.skip_ws();
        if scan.at_end() {
            return Ok(input);
        }
        let (slot, name, target) = match scan.ident()? {
            "set" => (0, "set", &mut input.set),
            "delete" | "del" => (1, "delete", &mut input.del),
            "schema" => (2, "schema", &mut input.schema),
            other => return Err(scan.error(format!("unexpected {other:?} in mutation block"))),
        };
        if std::mem::replace(&mut seen[slot], true) {
            return Err(ParseError::DuplicateBlock(name));
        }
        scan.skip_ws();
        *target = scan.braced()?.text.to_string();
    }
}

fn schema_args(args: Piece<'_>) -> Result<Vec<String>, ParseError> {
    let mut scan = Scan::new(args.text, args.base);
    scan.skip_ws();
    if scan.at_end() {
        return Ok(Vec::new());
    }
    if scan.ident()? != "pred" {
        return Err(scan.error("schema block only accepts `pred`".into()));
    }
    scan.skip_ws();
    scan.expect(':')?;
    let list = scan.rest().trim();
    let list = list
        .strip_prefix('[')
        .and_then(|l| l.strip_suffix(']'))
        .unwrap_or(list);
    Ok(list
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect())
}

/// Values for `$name` placeholders: header defaults, then request values.
fn declared_vars(header: &str, supplied: &HashMap<String, String>) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    let decls = match (header.find('('), header.rfind(')')) {
        (Some(open), Some(close)) if open < close => &header[open + 1..close],
        _ => "",
    };
    for decl in decls.split(',') {
        let Some((name, rest)) = decl.split_once(':') else {
            continue;
        };
        if let Some((_, default)) = rest.split_once('=') {
            vars.insert(name.trim().to_string(), unquote(default.trim()).to_string());
        }
    }
    for (name, value) in supplied {
        let key = if name.starts_with('$') {
            name.clone()
        } else {
            format!("${name}")
        };
        vars.insert(key, value.clone());
    }
    vars
}

/// Replaces `$name` outside string literals.
fn substitute(text: &str, base: usize, vars: &HashMap<String, String>) -> Result<String, ParseError> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    let mut in_string = false;
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '"' => in_string = !in_string,
            '\\' if in_string => {
                out.push(ch);
                if let Some((_, next)) = chars.next() {
                    out.push(next);
                }
                continue;
            }
            '$' if !in_string => {
                let mut end = idx + 1;
                while let Some((i, c)) = chars.peek().copied() {
                    if c.is_alphanumeric() || c == '_' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = &text[idx..end];
                if name.len() == 1 {
                    return Err(ParseError::Syntax {
                        offset: base + idx,
                        message: "empty variable name".into(),
                    });
                }
                let value = vars
                    .get(name)
                    .ok_or_else(|| ParseError::UndefinedVariable(name.to_string()))?;
                out.push_str(value);
                continue;
            }
            _ => {}
        }
        out.push(ch);
    }
    Ok(out)
}

fn parse_blocks(mut scan: Scan<'_>) -> Result<QueryAst, ParseError> {
    let mut blocks = Vec::new();
    loop {
        scan.skip_separators();
        if scan.at_end() {
            let ast = QueryAst { blocks };
            if let Some(name) = ast.first_undefined_var() {
                return Err(ParseError::UnboundQueryVariable(name.to_string()));
            }
            return Ok(ast);
        }
        let first = scan.ident()?.to_string();
        scan.skip_ws();
        let (var, alias) = if scan.peek() != Some('(') {
            let keyword = scan.ident()?;
            if keyword != "as" {
                return Err(scan.error(format!("expected `as` or `(`, found {keyword:?}")));
            }
            scan.skip_ws();
            (Some(first), scan.ident()?.to_string())
        } else {
            (None, first)
        };
        scan.skip_ws();
        let func = root_func(scan.parens()?)?;
        scan.skip_ws();
        let attrs = attrs(scan.braced()?)?;
        blocks.push(QueryBlock {
            alias,
            var,
            func,
            attrs,
        });
    }
}

fn root_func(args: Piece<'_>) -> Result<Func, ParseError> {
    let mut scan = Scan::new(args.text, args.base);
    scan.skip_ws();
    if scan.ident()? != "func" {
        return Err(scan.error("expected `func:`".into()));
    }
    scan.skip_ws();
    scan.expect(':')?;
    scan.skip_ws();
    let name = scan.ident()?;
    scan.skip_ws();
    let inner = scan.parens()?;
    let params = split_args(inner.text);
    let func = match (name, params.as_slice()) {
        ("uid", [single]) if Uid::parse(single).is_none() => Func::UidVar(single.to_string()),
        ("uid", list) if !list.is_empty() => Func::Uid(
            list.iter()
                .map(|raw| {
                    Uid::parse(raw).ok_or_else(|| scan.error(format!("invalid uid {raw:?}")))
                })
                .collect::<Result<_, _>>()?,
        ),
        ("has", [predicate]) => Func::Has(predicate.to_string()),
        ("eq", [predicate, value]) => Func::Eq {
            predicate: predicate.to_string(),
            value: unquote(value).to_string(),
        },
        (other, _) => return Err(scan.error(format!("unsupported function {other}({})", inner.text))),
    };
    Ok(func)
}

fn attrs(body: Piece<'_>) -> Result<Vec<Attr>, ParseError> {
    let mut scan = Scan::new(body.text, body.base);
    let mut out = Vec::new();
    loop {
        scan.skip_separators();
        if scan.at_end() {
            return Ok(out);
        }
        if scan.peek() == Some('{') {
            return Err(scan.error("nested selections are not supported".into()));
        }
        let first = scan.ident()?.to_string();
        let checkpoint = scan.pos;
        scan.skip_ws();
        let attr = if scan.rest().starts_with("as") && scan.ident()? == "as" {
            scan.skip_ws();
            Attr {
                predicate: scan.ident()?.to_string(),
                var: Some(first),
            }
        } else {
            scan.pos = checkpoint;
            Attr {
                predicate: first,
                var: None,
            }
        };
        out.push(attr);
    }
}

fn split_args(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ',' if !in_string => {
                out.push(text[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    let last = text[start..].trim();
    if !last.is_empty() || !out.is_empty() {
        out.push(last);
    }
    out
}

fn unquote(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

struct Scan<'a> {
    text: &'a str,
    base: usize,
    pos: usize,
}

impl<'a> Scan<'a> {
    fn new(text: &'a str, base: usize) -> Self {
        Self { text, base, pos: 0 }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError::Syntax {
            offset: self.base + self.pos,
            message,
        }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn expect(&mut self, expected: char) -> Result<(), ParseError> {
        if self.peek() == Some(expected) {
            self.bump();
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}")))
        }
    }

    /// Whitespace and `#` comments.
    fn skip_ws(&mut self) {
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

    fn skip_separators(&mut self) {
        loop {
            self.skip_ws();
            if self.peek() != Some(',') {
                return;
            }
            self.bump();
        }
    }

    fn ident(&mut self) -> Result<&'a str, ParseError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || matches!(c, '_' | '.' | '~')) {
            self.bump();
        }
        if start == self.pos {
            return Err(self.error("expected a name".into()));
        }
        Ok(&self.text[start..self.pos])
    }

    fn braced(&mut self) -> Result<Piece<'a>, ParseError> {
        self.delimited('{', '}')
    }

    fn parens(&mut self) -> Result<Piece<'a>, ParseError> {
        self.delimited('(', ')')
    }

    /// Contents between `open` and its matching `close`, skipping string
    /// literals.
    fn delimited(&mut self, open: char, close: char) -> Result<Piece<'a>, ParseError> {
        self.expect(open)?;
        let start = self.pos;
        let mut depth = 1usize;
        let mut in_string = false;
        while let Some(ch) = self.bump() {
            match ch {
                '\\' if in_string => {
                    self.bump();
                }
                '"' => in_string = !in_string,
                c if c == open && !in_string => depth += 1,
                c if c == close && !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        let end = self.pos - close.len_utf8();
                        return Ok(Piece {
                            text: &self.text[start..end],
                            base: self.base + start,
                        });
                    }
                }
                _ => {}
            }
        }
        Err(ParseError::Syntax {
            offset: self.base + start,
            message: format!("unclosed {open:?}"),
        })
    }
}
