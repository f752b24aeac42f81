//! RDF terms and triples
//!
//! Terms use the N-Triples text form everywhere they are serialised:
//! - `<http://example.org/Alice>` for IRIs
//! - `_:b0` for blank nodes
//! - `"Alice"`, `"Alice"@en`, `"42"^^<http://www.w3.org/2001/XMLSchema#integer>` for literals
//!
//! The same text is what the SQLite backend stores in its columns.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A literal value with optional datatype or language tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Literal {
    pub lexical: String,
    pub datatype: Option<String>,
    pub language: Option<String>,
}

impl Literal {
    /// Plain literal without datatype or language
    pub fn new(lexical: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn typed(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    pub fn lang(lexical: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: None,
            language: Some(language.into()),
        }
    }
}

/// A node in the graph: IRI, blank node or literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Iri(String),
    Blank(String),
    Literal(Literal),
}

impl Term {
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Term::Blank(label.into())
    }

    pub fn literal(lexical: impl Into<String>) -> Self {
        Term::Literal(Literal::new(lexical))
    }

    /// The IRI string if this term is an IRI
    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal(_))
    }

    /// Encode to N-Triples text
    pub fn to_ntriples(&self) -> String {
        match self {
            Term::Iri(iri) => format!("<{}>", iri),
            Term::Blank(label) => format!("_:{}", label),
            Term::Literal(lit) => {
                let mut out = String::with_capacity(lit.lexical.len() + 2);
                out.push('"');
                escape_into(&lit.lexical, &mut out);
                out.push('"');
                if let Some(lang) = &lit.language {
                    out.push('@');
                    out.push_str(lang);
                } else if let Some(datatype) = &lit.datatype {
                    out.push_str("^^<");
                    out.push_str(datatype);
                    out.push('>');
                }
                out
            }
        }
    }

    /// Check that this term survives an N-Triples round trip.
    ///
    /// IRIs may not contain whitespace, `<`, `>` or `"`; blank node labels must be
    /// non-empty without whitespace or a trailing `.`; language tags are ASCII
    /// alphanumerics and `-`, and a literal carries a language or a datatype, not both.
    pub fn validate(&self) -> Result<()> {
        match self {
            Term::Iri(iri) => validate_iri(iri),
            Term::Blank(label) => {
                if label.is_empty() || label.ends_with('.') || label.chars().any(char::is_whitespace) {
                    return Err(Error::InvalidTerm(format!("Invalid blank node label: {:?}", label)));
                }
                Ok(())
            }
            Term::Literal(lit) => {
                if let Some(lang) = &lit.language {
                    if lit.datatype.is_some() {
                        return Err(Error::InvalidTerm(format!(
                            "Literal {:?} has both a language tag and a datatype",
                            lit.lexical
                        )));
                    }
                    if lang.is_empty() || !lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                        return Err(Error::InvalidTerm(format!("Invalid language tag: {:?}", lang)));
                    }
                }
                match &lit.datatype {
                    Some(datatype) => validate_iri(datatype),
                    None => Ok(()),
                }
            }
        }
    }

    /// Parse one term from the start of `input`, returning the term and the unparsed rest.
    pub fn parse_prefix(input: &str) -> Result<(Term, &str)> {
        let input = input.trim_start();
        if let Some(rest) = input.strip_prefix('<') {
            let end = rest
                .find('>')
                .ok_or_else(|| Error::InvalidTerm(format!("Unterminated IRI: {}", input)))?;
            let iri = &rest[..end];
            if iri.chars().any(char::is_whitespace) {
                return Err(Error::InvalidTerm(format!("IRI contains whitespace: {}", iri)));
            }
            return Ok((Term::Iri(iri.to_string()), &rest[end + 1..]));
        }

        if let Some(rest) = input.strip_prefix("_:") {
            let mut end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            // a trailing '.' terminates the statement, not the label
            while end > 0 && rest[..end].ends_with('.') {
                end -= 1;
            }
            if end == 0 {
                return Err(Error::InvalidTerm("Empty blank node label".to_string()));
            }
            return Ok((Term::Blank(rest[..end].to_string()), &rest[end..]));
        }

        if let Some(rest) = input.strip_prefix('"') {
            let (lexical, consumed) = unescape_until_quote(rest)?;
            let mut rest = &rest[consumed..];
            let mut literal = Literal::new(lexical);

            if let Some(tail) = rest.strip_prefix('@') {
                let end = tail
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
                    .unwrap_or(tail.len());
                if end == 0 {
                    return Err(Error::InvalidTerm("Empty language tag".to_string()));
                }
                literal.language = Some(tail[..end].to_string());
                rest = &tail[end..];
            } else if let Some(tail) = rest.strip_prefix("^^") {
                let (datatype, tail) = Term::parse_prefix(tail)?;
                match datatype {
                    Term::Iri(iri) => literal.datatype = Some(iri),
                    other => {
                        return Err(Error::InvalidTerm(format!(
                            "Literal datatype must be an IRI, got {}",
                            other
                        )));
                    }
                }
                rest = tail;
            }
            return Ok((Term::Literal(literal), rest));
        }

        Err(Error::InvalidTerm(format!("Unrecognised term: {}", input)))
    }
}

fn validate_iri(iri: &str) -> Result<()> {
    match iri.chars().find(|&c| c.is_whitespace() || matches!(c, '<' | '>' | '"')) {
        Some(c) => Err(Error::InvalidTerm(format!("IRI contains {:?}: {}", c, iri))),
        None => Ok(()),
    }
}

fn escape_into(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
}

/// Read an escaped literal body up to the closing quote.
/// Returns the unescaped text and the number of bytes consumed including the quote.
fn unescape_until_quote(input: &str) -> Result<(String, usize)> {
    let mut out = String::new();
    let mut chars = input.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((out, idx + 1)),
            '\\' => {
                let (_, escaped) = chars
                    .next()
                    .ok_or_else(|| Error::InvalidTerm("Dangling escape in literal".to_string()))?;
                match escaped {
                    '\\' => out.push('\\'),
                    '"' => out.push('"'),
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    'u' | 'U' => {
                        let width = if escaped == 'u' { 4 } else { 8 };
                        let hex: String = chars.by_ref().take(width).map(|(_, c)| c).collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .ok()
                            .filter(|_| hex.len() == width)
                            .and_then(char::from_u32)
                            .ok_or_else(|| {
                                Error::InvalidTerm(format!("Invalid unicode escape: \\{}{}", escaped, hex))
                            })?;
                        out.push(code);
                    }
                    other => {
                        return Err(Error::InvalidTerm(format!("Unknown escape: \\{}", other)));
                    }
                }
            }
            _ => out.push(c),
        }
    }
    Err(Error::InvalidTerm("Unterminated literal".to_string()))
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ntriples())
    }
}

impl FromStr for Term {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (term, rest) = Term::parse_prefix(s)?;
        if !rest.trim().is_empty() {
            return Err(Error::InvalidTerm(format!("Trailing input after term: {}", rest)));
        }
        Ok(term)
    }
}

impl Serialize for Term {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_ntriples())
    }
}

impl<'de> Deserialize<'de> for Term {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A (subject, predicate, object) record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    /// Check whether this triple satisfies a pattern
    pub fn matches(&self, pattern: &TriplePattern) -> bool {
        fn slot(bound: &Option<Term>, value: &Term) -> bool {
            bound.as_ref().is_none_or(|b| b == value)
        }
        slot(&pattern.subject, &self.subject)
            && slot(&pattern.predicate, &self.predicate)
            && slot(&pattern.object, &self.object)
    }

    /// Validate all three terms; see [`Term::validate`]
    pub fn validate(&self) -> Result<()> {
        self.subject.validate()?;
        self.predicate.validate()?;
        self.object.validate()
    }

    /// The fully bound pattern matching exactly this triple
    pub fn as_pattern(&self) -> TriplePattern {
        TriplePattern::new(
            Some(self.subject.clone()),
            Some(self.predicate.clone()),
            Some(self.object.clone()),
        )
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

impl From<(Term, Term, Term)> for Triple {
    fn from((subject, predicate, object): (Term, Term, Term)) -> Self {
        Self::new(subject, predicate, object)
    }
}

/// A triple tagged with the graph (context) it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Quad {
    pub triple: Triple,
    pub context: String,
}

impl Quad {
    pub fn new(triple: Triple, context: impl Into<String>) -> Self {
        Self {
            triple,
            context: context.into(),
        }
    }
}

/// Triple template where `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TriplePattern {
    pub subject: Option<Term>,
    pub predicate: Option<Term>,
    pub object: Option<Term>,
}

impl TriplePattern {
    pub fn new(subject: Option<Term>, predicate: Option<Term>, object: Option<Term>) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    /// Pattern matching every triple
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_subject(mut self, subject: Term) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn with_predicate(mut self, predicate: Term) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_object(mut self, object: Term) -> Self {
        self.object = Some(object);
        self
    }

    pub fn is_fully_bound(&self) -> bool {
        self.subject.is_some() && self.predicate.is_some() && self.object.is_some()
    }
}

impl From<&Triple> for TriplePattern {
    fn from(triple: &Triple) -> Self {
        triple.as_pattern()
    }
}

impl From<Triple> for TriplePattern {
    fn from(triple: Triple) -> Self {
        Self::new(Some(triple.subject), Some(triple.predicate), Some(triple.object))
    }
}
