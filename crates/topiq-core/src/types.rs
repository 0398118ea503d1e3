//! # Core Type Definitions
//!
//! Identifiers, locators, typed literals, and the error taxonomy for the
//! topiq engine.
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Use saturating arithmetic for counters to prevent overflow
//! - Carry no interior mutability

use crate::primitives::{MAX_LOCATOR_LENGTH, MAX_VALUE_LENGTH};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique identifier for a construct (topic, association, role, name,
/// occurrence, variant) within one engine.
///
/// Ids are allocated once and never reused; they are stable across commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConstructId(pub u64);

/// Canonical identifier for an interned theme set.
///
/// `ScopeId(0)` is the unconstrained scope (the empty theme set).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ScopeId(pub u64);

impl ScopeId {
    /// The unconstrained scope: the canonical empty theme set.
    pub const UNCONSTRAINED: ScopeId = ScopeId(0);

    /// Whether this is the unconstrained scope.
    #[must_use]
    pub const fn is_unconstrained(self) -> bool {
        self.0 == 0
    }
}

/// Identifier of an open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(pub u64);

/// Sequence number of a revision in the append-only log. Starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RevisionId(pub u64);

/// Discriminant for the construct kinds stored in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConstructKind {
    Topic,
    Association,
    Role,
    Name,
    Occurrence,
    Variant,
}

/// The three identifier namespaces a locator can be registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IdentifierKind {
    SubjectIdentifier,
    SubjectLocator,
    ItemIdentifier,
}

// =============================================================================
// LOCATOR
// =============================================================================

/// An interned absolute IRI naming a construct or datatype.
///
/// Validated on construction: non-empty, has a scheme, no whitespace,
/// bounded length. Two locators are equal iff their string forms are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Locator(String);

impl Locator {
    /// Create a locator from an absolute IRI string.
    pub fn new(iri: impl Into<String>) -> Result<Self, EngineError> {
        let iri = iri.into();
        if iri.is_empty() || iri.len() > MAX_LOCATOR_LENGTH {
            return Err(EngineError::InvalidLocator(iri));
        }
        if iri.chars().any(char::is_whitespace) {
            return Err(EngineError::InvalidLocator(iri));
        }
        // Absolute IRIs carry a scheme before the first colon.
        match iri.find(':') {
            Some(pos) if pos > 0 => Ok(Self(iri)),
            _ => Err(EngineError::InvalidLocator(iri)),
        }
    }

    /// Construct from a compile-time IRI known to be valid (datatype PSIs).
    pub(crate) fn well_known(iri: &'static str) -> Self {
        Self(iri.to_string())
    }

    /// The IRI as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// DATATYPE IRIS
// =============================================================================

/// Well-known datatype IRIs for typed literals.
pub mod xsd {
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    pub const ANY_URI: &str = "http://www.w3.org/2001/XMLSchema#anyURI";
    pub const INT: &str = "http://www.w3.org/2001/XMLSchema#int";
    pub const LONG: &str = "http://www.w3.org/2001/XMLSchema#long";
    pub const FLOAT: &str = "http://www.w3.org/2001/XMLSchema#float";
    pub const DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
    pub const BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
    pub const DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";

    /// Engine-defined datatype for "lat,lon" coordinate literals.
    pub const GEO_COORDINATE: &str = "http://psi.topiq.org/datatype/geo-coordinate";
}

// =============================================================================
// GEO COORDINATE
// =============================================================================

/// A parsed geo-coordinate literal ("lat,lon" lexical form).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct GeoCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoCoordinate {
    /// Parse from the "lat,lon" lexical form, validating the value ranges.
    pub fn parse(lexical: &str) -> Result<Self, EngineError> {
        let invalid = || EngineError::InvalidLiteral {
            datatype: xsd::GEO_COORDINATE.to_string(),
            value: lexical.to_string(),
        };
        let (lat, lon) = lexical.split_once(',').ok_or_else(invalid)?;
        let latitude: f64 = lat.trim().parse().map_err(|_| invalid())?;
        let longitude: f64 = lon.trim().parse().map_err(|_| invalid())?;
        if !latitude.is_finite() || latitude > 90.0 || latitude < -90.0 {
            return Err(invalid());
        }
        if !longitude.is_finite() || longitude > 180.0 || longitude < -180.0 {
            return Err(invalid());
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

// =============================================================================
// TYPED LITERAL
// =============================================================================

/// A typed literal: datatype IRI plus encoded lexical form.
///
/// Occurrences and variants carry their value as a `LiteralValue`. The
/// typed accessors parse the lexical form on demand and fail with
/// [`EngineError::InvalidLiteral`] on non-conforming input; they coerce
/// across datatypes the way the lexical form allows (an `xsd:string`
/// holding "42" is a valid `as_int` target).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LiteralValue {
    pub value: String,
    pub datatype: Locator,
}

impl LiteralValue {
    /// A plain string literal (`xsd:string`).
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            datatype: Locator::well_known(xsd::STRING),
        }
    }

    /// An IRI literal (`xsd:anyURI`).
    #[must_use]
    pub fn iri(locator: Locator) -> Self {
        Self {
            value: locator.as_str().to_string(),
            datatype: Locator::well_known(xsd::ANY_URI),
        }
    }

    /// A literal with an explicit datatype.
    pub fn typed(value: impl Into<String>, datatype: Locator) -> Result<Self, EngineError> {
        let value = value.into();
        if value.len() > MAX_VALUE_LENGTH {
            return Err(EngineError::InvalidLiteral {
                datatype: datatype.as_str().to_string(),
                value: format!("<{} bytes>", value.len()),
            });
        }
        Ok(Self { value, datatype })
    }

    fn parse_err(&self) -> EngineError {
        EngineError::InvalidLiteral {
            datatype: self.datatype.as_str().to_string(),
            value: self.value.clone(),
        }
    }

    /// Parse as `xsd:int`.
    pub fn as_int(&self) -> Result<i32, EngineError> {
        self.value.trim().parse().map_err(|_| self.parse_err())
    }

    /// Parse as `xsd:long`.
    pub fn as_long(&self) -> Result<i64, EngineError> {
        self.value.trim().parse().map_err(|_| self.parse_err())
    }

    /// Parse as `xsd:float`.
    pub fn as_float(&self) -> Result<f64, EngineError> {
        let parsed: f64 = self.value.trim().parse().map_err(|_| self.parse_err())?;
        if parsed.is_finite() {
            Ok(parsed)
        } else {
            Err(self.parse_err())
        }
    }

    /// Validate as `xsd:decimal` and return the trimmed lexical form.
    ///
    /// Decimals are kept lexical rather than converted to binary floating
    /// point, so no precision is lost.
    pub fn as_decimal(&self) -> Result<String, EngineError> {
        let lexical = self.value.trim();
        let digits = lexical.strip_prefix(['+', '-']).unwrap_or(lexical);
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (digits, None),
        };
        let valid_part = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        let ok = match frac_part {
            Some(frac) => {
                // "1." and ".5" are both valid decimal lexical forms.
                (valid_part(int_part) || int_part.is_empty())
                    && (valid_part(frac) || frac.is_empty())
                    && !(int_part.is_empty() && frac.is_empty())
            }
            None => valid_part(int_part),
        };
        if ok {
            Ok(lexical.to_string())
        } else {
            Err(self.parse_err())
        }
    }

    /// Parse as `xsd:boolean` ("true"/"false"/"1"/"0").
    pub fn as_boolean(&self) -> Result<bool, EngineError> {
        match self.value.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(self.parse_err()),
        }
    }

    /// Parse as `xsd:dateTime` (RFC 3339), normalized to UTC.
    pub fn as_date_time(&self) -> Result<DateTime<Utc>, EngineError> {
        DateTime::parse_from_rfc3339(self.value.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| self.parse_err())
    }

    /// Parse as an IRI.
    pub fn as_iri(&self) -> Result<Locator, EngineError> {
        Locator::new(self.value.trim()).map_err(|_| self.parse_err())
    }

    /// Parse as a geo-coordinate ("lat,lon").
    pub fn as_geo(&self) -> Result<GeoCoordinate, EngineError> {
        GeoCoordinate::parse(&self.value)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by the topiq engine.
///
/// A lookup miss is never an error: absent constructs surface as
/// `Option::None` so a genuine backend failure (`Store`) can never be
/// masked as "not found".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The operation targets a construct removed in the current transaction.
    /// Always fatal; surfaced before any overlay state is touched.
    #[error("construct removed: {0:?}")]
    ConstructRemoved(ConstructId),

    /// A locator already names a different construct.
    #[error("identity constraint: {locator} already names {existing:?}, cannot assign to {candidate:?}")]
    IdentityConstraint {
        locator: Locator,
        existing: ConstructId,
        candidate: ConstructId,
    },

    /// An edit would violate the graph model (double reification, dangling
    /// player, removing a construct still referenced, ...).
    #[error("model constraint: {0}")]
    ModelConstraint(String),

    /// A query was issued against an index that has not been opened.
    #[error("index not open: {0}")]
    IndexClosed(&'static str),

    /// Backend failure, propagated unchanged.
    #[error("store error: {0}")]
    Store(String),

    /// A typed accessor was applied to a non-conforming lexical form.
    #[error("invalid literal for {datatype}: {value:?}")]
    InvalidLiteral { datatype: String, value: String },

    /// The string is not an absolute IRI.
    #[error("invalid locator: {0:?}")]
    InvalidLocator(String),

    /// The transaction handle does not name an open transaction.
    #[error("unknown transaction: {0:?}")]
    UnknownTransaction(TxnId),

    /// A serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("deserialization error: {0}")]
    DeserializationError(String),
}

// =============================================================================
// TESTS
// =============================================================================
