//! Scalar datatypes, typed literals and terms.
//!
//! Data properties carry [`Literal`]s tagged with a [`ScalarTag`]; object
//! properties carry individuals. Both are unified as [`Term`] so that values
//! can be held in ordered sets and diffed at commit time.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::iri::Iri;

/// Scalar datatype tag of a data property.
///
/// `Any` is the universal tag used when neither the caller nor the schema
/// declares a datatype; it accepts every literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarTag {
    Any,
    Boolean,
    Integer,
    Double,
    String,
    DateTime,
}

impl ScalarTag {
    /// Returns the XSD datatype IRI for this tag.
    #[must_use]
    pub const fn xsd_iri(self) -> &'static str {
        match self {
            Self::Any => "http://www.w3.org/2000/01/rdf-schema#Literal",
            Self::Boolean => "http://www.w3.org/2001/XMLSchema#boolean",
            Self::Integer => "http://www.w3.org/2001/XMLSchema#integer",
            Self::Double => "http://www.w3.org/2001/XMLSchema#double",
            Self::String => "http://www.w3.org/2001/XMLSchema#string",
            Self::DateTime => "http://www.w3.org/2001/XMLSchema#dateTime",
        }
    }

    /// Maps an XSD datatype IRI back to a tag.
    #[must_use]
    pub fn from_xsd_iri(iri: &str) -> Option<Self> {
        let local = iri.rsplit(['#', ':']).next().unwrap_or(iri);
        match local {
            "Literal" | "anySimpleType" => Some(Self::Any),
            "boolean" => Some(Self::Boolean),
            "integer" | "int" | "long" | "short" | "nonNegativeInteger" => Some(Self::Integer),
            "double" | "float" | "decimal" => Some(Self::Double),
            "string" | "normalizedString" | "token" => Some(Self::String),
            "dateTime" => Some(Self::DateTime),
            _ => None,
        }
    }

    /// Returns true for floating-point tags, the only ones that accept a tolerance.
    #[must_use]
    pub const fn is_floating(self) -> bool {
        matches!(self, Self::Double)
    }

    /// Returns true if a literal of this tag can be compared numerically.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Double)
    }

    /// Returns true if `literal` is acceptable for a property of this tag.
    #[must_use]
    pub fn admits(self, literal: &Literal) -> bool {
        match self {
            Self::Any => true,
            // Integers widen into doubles, never the other way around.
            Self::Double => matches!(literal, Literal::Double(_) | Literal::Integer(_)),
            other => literal.tag() == other,
        }
    }
}

impl fmt::Display for ScalarTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::String => "string",
            Self::DateTime => "date_time",
        };
        f.write_str(name)
    }
}

/// A typed scalar value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
}

impl Literal {
    /// Returns the tag this literal carries on its own.
    #[must_use]
    pub const fn tag(&self) -> ScalarTag {
        match self {
            Self::Boolean(_) => ScalarTag::Boolean,
            Self::Integer(_) => ScalarTag::Integer,
            Self::Double(_) => ScalarTag::Double,
            Self::String(_) => ScalarTag::String,
            Self::DateTime(_) => ScalarTag::DateTime,
        }
    }

    /// Parses `text` as a literal of the given tag.
    ///
    /// With [`ScalarTag::Any`] the most specific interpretation wins:
    /// boolean, integer, double, RFC 3339 timestamp, then plain string.
    #[must_use]
    pub fn parse(tag: ScalarTag, text: &str) -> Option<Self> {
        let trimmed = text.trim();
        match tag {
            ScalarTag::Boolean => match trimmed {
                "true" | "1" => Some(Self::Boolean(true)),
                "false" | "0" => Some(Self::Boolean(false)),
                _ => None,
            },
            ScalarTag::Integer => trimmed.parse().ok().map(Self::Integer),
            ScalarTag::Double => trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| !v.is_nan())
                .map(Self::Double),
            ScalarTag::String => Some(Self::String(text.to_string())),
            ScalarTag::DateTime => DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|dt| Self::DateTime(dt.with_timezone(&Utc))),
            ScalarTag::Any => Self::parse(ScalarTag::Boolean, trimmed)
                .or_else(|| Self::parse(ScalarTag::Integer, trimmed))
                .or_else(|| Self::parse(ScalarTag::Double, trimmed))
                .or_else(|| Self::parse(ScalarTag::DateTime, trimmed))
                .or_else(|| Self::parse(ScalarTag::String, text)),
        }
    }

    /// Converts the literal so that it carries `tag` exactly.
    ///
    /// Only integer-to-double widening changes the representation.
    #[must_use]
    pub fn coerce(self, tag: ScalarTag) -> Self {
        match (tag, self) {
            #[allow(clippy::cast_precision_loss)]
            (ScalarTag::Double, Self::Integer(v)) => Self::Double(v as f64),
            (_, other) => other,
        }
    }

    /// Returns the numeric value of integer and double literals.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Boolean(_) => 0,
            Self::Integer(_) => 1,
            Self::Double(_) => 2,
            Self::String(_) => 3,
            Self::DateTime(_) => 4,
        }
    }

    /// Value ordering used when sorting entities by a property.
    ///
    /// Unlike [`Ord`], integers and doubles compare numerically and the
    /// optional tolerance collapses near-equal floating values.
    #[must_use]
    pub fn compare_value(&self, other: &Self, tolerance: Option<&Tolerance>) -> Ordering {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => match tolerance {
                Some(tol) => tol.compare(a, b),
                None => a.total_cmp(&b),
            },
            _ => self.cmp(other),
        }
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Literal {}

impl PartialOrd for Literal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Literal {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for Literal {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

/// The object position of a property assertion: a literal or an individual.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Term {
    Literal(Literal),
    Individual(Iri),
}

impl Term {
    pub const fn as_literal(&self) -> Option<&Literal> {
        match self {
            Self::Literal(l) => Some(l),
            Self::Individual(_) => None,
        }
    }

    pub const fn as_individual(&self) -> Option<&Iri> {
        match self {
            Self::Individual(i) => Some(i),
            Self::Literal(_) => None,
        }
    }

    /// Ordering of two terms for entity sorting; see [`Literal::compare_value`].
    #[must_use]
    pub fn compare_value(&self, other: &Self, tolerance: Option<&Tolerance>) -> Ordering {
        match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a.compare_value(b, tolerance),
            (a, b) => a.cmp(b),
        }
    }
}

impl std::hash::Hash for Literal {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Boolean(v) => v.hash(state),
            Self::Integer(v) => v.hash(state),
            Self::Double(v) => v.to_bits().hash(state),
            Self::String(v) => v.hash(state),
            Self::DateTime(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(l) => write!(f, "{l}"),
            Self::Individual(i) => write!(f, "<{i}>"),
        }
    }
}

impl From<Literal> for Term {
    fn from(v: Literal) -> Self {
        Self::Literal(v)
    }
}

impl From<Iri> for Term {
    fn from(v: Iri) -> Self {
        Self::Individual(v)
    }
}

impl From<bool> for Term {
    fn from(v: bool) -> Self {
        Self::Literal(v.into())
    }
}

impl From<i32> for Term {
    fn from(v: i32) -> Self {
        Self::Literal(v.into())
    }
}

impl From<i64> for Term {
    fn from(v: i64) -> Self {
        Self::Literal(v.into())
    }
}

impl From<f64> for Term {
    fn from(v: f64) -> Self {
        Self::Literal(v.into())
    }
}

impl From<&str> for Term {
    fn from(v: &str) -> Self {
        Self::Literal(v.into())
    }
}

impl From<String> for Term {
    fn from(v: String) -> Self {
        Self::Literal(v.into())
    }
}

/// Tolerance comparator for floating-point data properties.
///
/// Two values whose distance is within `absolute`, or within `relative`
/// times the larger magnitude, compare as equal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub absolute: f64,
    #[serde(default)]
    pub relative: f64,
}

impl Tolerance {
    /// Creates an absolute tolerance.
    #[must_use]
    pub const fn absolute(epsilon: f64) -> Self {
        Self {
            absolute: epsilon,
            relative: 0.0,
        }
    }

    /// Creates a relative tolerance.
    #[must_use]
    pub const fn relative(ratio: f64) -> Self {
        Self {
            absolute: 0.0,
            relative: ratio,
        }
    }

    /// Returns true if `a` and `b` are within tolerance.
    #[must_use]
    pub fn approx_eq(&self, a: f64, b: f64) -> bool {
        let diff = (a - b).abs();
        diff <= self.absolute || diff <= self.relative * a.abs().max(b.abs())
    }

    /// Compares `a` and `b`, treating values within tolerance as equal.
    #[must_use]
    pub fn compare(&self, a: f64, b: f64) -> Ordering {
        if self.approx_eq(a, b) {
            Ordering::Equal
        } else {
            a.total_cmp(&b)
        }
    }
}
