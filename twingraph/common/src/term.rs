use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// A single RDF term: the subject, predicate, or object of a triple.
///
/// Equality is structural everywhere, including literals: `"01"^^xsd:int` and
/// `"1"^^xsd:int` are two distinct terms. The engine relies on this — its
/// deletion overlays compare triples by term equality, so a store that
/// value-normalizes literals cannot sit underneath it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    /// An IRI reference.
    Iri(SmolStr),
    /// A blank node label.
    Blank(SmolStr),
    /// A literal with an optional datatype IRI.
    Literal {
        lexical: SmolStr,
        datatype: Option<SmolStr>,
    },
}

impl Term {
    pub fn iri(iri: impl AsRef<str>) -> Self {
        Term::Iri(SmolStr::new(iri))
    }

    pub fn blank(label: impl AsRef<str>) -> Self {
        Term::Blank(SmolStr::new(label))
    }

    /// A plain literal without a datatype.
    pub fn literal(lexical: impl AsRef<str>) -> Self {
        Term::Literal {
            lexical: SmolStr::new(lexical),
            datatype: None,
        }
    }

    pub fn typed_literal(lexical: impl AsRef<str>, datatype: impl AsRef<str>) -> Self {
        Term::Literal {
            lexical: SmolStr::new(lexical),
            datatype: Some(SmolStr::new(datatype)),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::Blank(label) => write!(f, "_:{label}"),
            Term::Literal {
                lexical,
                datatype: Some(dt),
            } => write!(f, "\"{lexical}\"^^<{dt}>"),
            Term::Literal {
                lexical,
                datatype: None,
            } => write!(f, "\"{lexical}\""),
        }
    }
}

/// An immutable RDF edge `(subject, predicate, object)`.
///
/// Equality and hashing are componentwise, which makes a [`Triple`] usable as
/// a set member throughout the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Triple {
            subject,
            predicate,
            object,
        }
    }

    pub fn subject(&self) -> &Term {
        &self.subject
    }

    pub fn predicate(&self) -> &Term {
        &self.predicate
    }

    pub fn object(&self) -> &Term {
        &self.object
    }
}

impl Display for Triple {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}
