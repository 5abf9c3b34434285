use serde::{Deserialize, Serialize};

use crate::term::{Term, Triple};

/// One position of a match pattern: either a concrete term or a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermPattern {
    /// Matches any term.
    #[default]
    Any,
    /// Matches exactly the given term.
    Is(Term),
}

impl TermPattern {
    pub fn matches(&self, term: &Term) -> bool {
        match self {
            TermPattern::Any => true,
            TermPattern::Is(t) => t == term,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, TermPattern::Any)
    }

    /// The concrete term, if this position is bound.
    pub fn term(&self) -> Option<&Term> {
        match self {
            TermPattern::Any => None,
            TermPattern::Is(t) => Some(t),
        }
    }
}

impl From<Term> for TermPattern {
    fn from(term: Term) -> Self {
        TermPattern::Is(term)
    }
}

/// A triple match pattern with per-position wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriplePattern {
    pub subject: TermPattern,
    pub predicate: TermPattern,
    pub object: TermPattern,
}

impl TriplePattern {
    pub fn new(
        subject: impl Into<TermPattern>,
        predicate: impl Into<TermPattern>,
        object: impl Into<TermPattern>,
    ) -> Self {
        TriplePattern {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    /// The pattern matching every triple.
    pub fn any() -> Self {
        TriplePattern::default()
    }

    pub fn matches(&self, triple: &Triple) -> bool {
        self.subject.matches(&triple.subject)
            && self.predicate.matches(&triple.predicate)
            && self.object.matches(&triple.object)
    }
}

impl From<&Triple> for TriplePattern {
    fn from(triple: &Triple) -> Self {
        TriplePattern::new(
            triple.subject.clone(),
            triple.predicate.clone(),
            triple.object.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(s: &str, p: &str, o: &str) -> Triple {
        Triple::new(Term::iri(s), Term::iri(p), Term::iri(o))
    }

    #[test]
    fn any_matches_everything() {
        assert!(TriplePattern::any().matches(&triple("a", "p", "b")));
    }

    #[test]
    fn bound_positions_must_agree() {
        let pattern = TriplePattern::new(TermPattern::Any, Term::iri("p"), TermPattern::Any);
        assert!(pattern.matches(&triple("a", "p", "b")));
        assert!(!pattern.matches(&triple("a", "q", "b")));
    }

    #[test]
    fn fully_bound_pattern_matches_one_triple() {
        let t = triple("a", "p", "b");
        let pattern = TriplePattern::from(&t);
        assert!(pattern.matches(&t));
        assert!(!pattern.matches(&triple("a", "p", "c")));
    }
}
