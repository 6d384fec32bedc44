//! Hierarchical key patterns.
//!
//! Keys are dot-separated segments. A pattern segment is either a literal,
//! `*` (exactly one arbitrary segment) or `>` (one or more trailing
//! segments, legal only as the last segment).
//!
//! ```text
//! foo.*.bar   matches foo.1.bar            not foo.1.bar.baz
//! foo.bar.>   matches foo.bar.baz, foo.bar.baz.1   not foo.bar
//! ```

use std::fmt;
use std::str::FromStr;

/// Pattern syntax errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// Empty pattern.
    #[error("empty pattern")]
    Empty,

    /// A segment between two dots (or at either end) is empty.
    #[error("pattern {0:?} has an empty segment")]
    EmptySegment(String),

    /// Whitespace, NUL or a wildcard character inside a literal segment.
    #[error("pattern {0:?} contains an invalid character")]
    InvalidCharacter(String),

    /// `>` used anywhere but the final segment.
    #[error("pattern {0:?} uses '>' before the final segment")]
    MisplacedTail(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
    Tail,
}

/// A parsed key pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPattern {
    segments: Vec<Segment>,
}

impl SubjectPattern {
    /// Parse `pattern`.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let parts: Vec<&str> = pattern.split('.').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (i, part) in parts.into_iter().enumerate() {
            let segment = match part {
                "" => return Err(PatternError::EmptySegment(pattern.to_string())),
                "*" => Segment::Any,
                ">" if i == last => Segment::Tail,
                ">" => return Err(PatternError::MisplacedTail(pattern.to_string())),
                literal if literal.chars().any(is_reserved) => {
                    return Err(PatternError::InvalidCharacter(pattern.to_string()));
                }
                literal => Segment::Literal(literal.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self { segments })
    }

    /// `true` when `subject` is a concrete key matched by this pattern.
    ///
    /// Subjects containing wildcards, whitespace, NUL or empty segments
    /// never match.
    #[must_use]
    pub fn matches(&self, subject: &str) -> bool {
        if subject.is_empty() || subject.chars().any(is_reserved) {
            return false;
        }

        let parts: Vec<&str> = subject.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return false;
        }

        let (prefix, greedy) = match self.segments.split_last() {
            Some((Segment::Tail, prefix)) => (prefix, true),
            _ => (self.segments.as_slice(), false),
        };

        if greedy {
            // `>` needs at least one segment of its own.
            if parts.len() <= prefix.len() {
                return false;
            }
        } else if parts.len() != prefix.len() {
            return false;
        }

        prefix.iter().zip(&parts).all(|(segment, part)| match segment {
            Segment::Literal(literal) => literal == part,
            Segment::Any | Segment::Tail => true,
        })
    }
}

impl FromStr for SubjectPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                Segment::Literal(literal) => f.write_str(literal)?,
                Segment::Any => f.write_str("*")?,
                Segment::Tail => f.write_str(">")?,
            }
        }
        Ok(())
    }
}

fn is_reserved(c: char) -> bool {
    c == '*' || c == '>' || c == '\0' || c.is_whitespace()
}

/// Match `subject` against `pattern`. An invalid pattern matches nothing.
#[must_use]
pub fn match_subject(pattern: &str, subject: &str) -> bool {
    SubjectPattern::parse(pattern).is_ok_and(|p| p.matches(subject))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_wildcard_matches_exactly_one_segment() {
        assert!(match_subject("a.*", "a.b"));
        assert!(!match_subject("a.*", "a.b.c"));
        assert!(!match_subject("a.*", "a"));
        assert!(match_subject("foo.*.bar", "foo.1.bar"));
        assert!(!match_subject("foo.*.bar", "foo.1.bar.baz"));
    }

    #[test]
    fn tail_wildcard_matches_one_or_more_segments() {
        assert!(match_subject("a.>", "a.b.c"));
        assert!(match_subject("a.>", "a.b"));
        assert!(!match_subject("a.>", "a"));
        assert!(match_subject("foo.bar.>", "foo.bar.baz.1"));
        assert!(!match_subject("foo.bar.>", "foo.bar"));
        assert!(match_subject(">", "anything.at.all"));
    }

    #[test]
    fn literal_patterns_need_exact_equality() {
        assert!(match_subject("a.b.c", "a.b.c"));
        assert!(!match_subject("a.b.c", "a.b.d"));
        assert!(!match_subject("a.b", "a.b.c"));
    }

    #[test]
    fn tail_must_be_last() {
        assert_eq!(
            SubjectPattern::parse("a.>.c"),
            Err(PatternError::MisplacedTail("a.>.c".into()))
        );
        assert!(!match_subject("a.>.c", "a.b.c"));
        assert!(!match_subject("a.b>", "a.b"));
    }

    #[test]
    fn mixed_with_wildcards() {
        assert!(match_subject("user_info.*.>", "user_info.usr_1.app"));
        assert!(!match_subject("user_info.*.>", "user_info.usr_1"));
        assert!(match_subject("*.*.app", "user_info.usr_1.app"));
    }

    #[test]
    fn subjects_with_reserved_characters_never_match() {
        assert!(!match_subject(">", "a.*"));
        assert!(!match_subject(">", "a.>"));
        assert!(!match_subject(">", "a b"));
        assert!(!match_subject(">", "a\0"));
        assert!(!match_subject("a.*.c", "a..c"));
        assert!(!match_subject(">", ""));
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        assert_eq!(SubjectPattern::parse(""), Err(PatternError::Empty));
        assert!(matches!(
            SubjectPattern::parse("a..b"),
            Err(PatternError::EmptySegment(_))
        ));
        assert!(matches!(
            SubjectPattern::parse("a b"),
            Err(PatternError::InvalidCharacter(_))
        ));
        assert!(matches!(
            SubjectPattern::parse("a.b*"),
            Err(PatternError::InvalidCharacter(_))
        ));
    }

    #[test]
    fn display_round_trips() {
        let pattern = SubjectPattern::parse("user_info.*.>").unwrap();
        assert_eq!(pattern.to_string(), "user_info.*.>");
    }
}
