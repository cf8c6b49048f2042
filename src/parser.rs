//! Free-text search term parsing
//!
//! A term such as `"10115, Torstraße 1, Berlin"` is split on commas and each
//! fragment is classified by the first rule in [`RULES`] that accepts it.
//! Fragments no rule accepts are dropped, and a field set by an earlier
//! fragment is never overwritten by a later one.

use regex::Regex;
use thiserror::Error;

use crate::data::{AddressQuery, Coordinates};

/// Errors that can occur when building a parser
#[derive(Debug, Error)]
pub enum TermParseError {
    /// A postal code pattern from the country reference data is not a valid regex
    #[error("Invalid postal code pattern '{pattern}': {source}")]
    InvalidPostalPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// One of the built-in fragment patterns failed to compile
    #[error("Invalid term pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Classification rules, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermRule {
    /// `<lat>|<lon>` in signed decimal degrees
    RawCoordinates,
    /// Whole fragment matches one of the configured postal patterns
    PostalCode,
    /// Two uppercase letters
    CountryCode,
    /// Words followed by a house number, e.g. "Main St 12"
    Street,
    /// Text without any digit
    City,
}

/// Evaluation order of the rule table
pub const RULES: [TermRule; 5] = [
    TermRule::RawCoordinates,
    TermRule::PostalCode,
    TermRule::CountryCode,
    TermRule::Street,
    TermRule::City,
];

/// What a single fragment was recognised as
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentMatch {
    Coordinates(Coordinates),
    Zipcode(String),
    IsoCountry(String),
    Street(String),
    City(String),
}

/// Term parser bound to a set of postal code patterns
#[derive(Debug, Clone)]
pub struct TermParser {
    postal_patterns: Vec<Regex>,
    coordinates: Regex,
    country_code: Regex,
    street: Regex,
    city: Regex,
}

impl TermParser {
    /// Builds a parser for the given postal code patterns
    ///
    /// Patterns are written without anchors; each must match a whole fragment.
    pub fn new<S: AsRef<str>>(postal_patterns: &[S]) -> Result<Self, TermParseError> {
        let postal_patterns = postal_patterns
            .iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| {
                    TermParseError::InvalidPostalPattern {
                        pattern: pattern.to_string(),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            postal_patterns,
            coordinates: Regex::new(r"^(-?\d+(?:\.\d+)?)\|(-?\d+(?:\.\d+)?)$")?,
            country_code: Regex::new(r"^[A-Z]{2}$")?,
            street: Regex::new(r"^[^\W\d_]\D*?\s*\d+\s*[a-zA-Z]?")?,
            city: Regex::new(r"^\D+$")?,
        })
    }

    /// Parses a search term into an address query
    ///
    /// A coordinate fragment short-circuits: the result then carries only
    /// `raw_coords`, whatever else the term contained.
    pub fn parse(&self, term: &str) -> AddressQuery {
        let mut query = AddressQuery::default();

        for fragment in term.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            let Some(matched) = self.classify(fragment) else {
                continue;
            };

            match matched {
                FragmentMatch::Coordinates(coords) => return AddressQuery::from_coords(coords),
                FragmentMatch::Zipcode(zipcode) => {
                    query.zipcode.get_or_insert(zipcode);
                }
                FragmentMatch::IsoCountry(iso) => {
                    query.iso_country.get_or_insert(iso);
                }
                FragmentMatch::Street(street) => {
                    query.street.get_or_insert(street);
                }
                FragmentMatch::City(city) => {
                    query.city.get_or_insert(city);
                }
            }
        }

        query
    }

    /// Classifies one trimmed fragment against the rule table
    pub fn classify(&self, fragment: &str) -> Option<FragmentMatch> {
        RULES.iter().find_map(|rule| self.apply(*rule, fragment))
    }

    /// Applies a single rule, returning its match if it accepts the fragment
    pub fn apply(&self, rule: TermRule, fragment: &str) -> Option<FragmentMatch> {
        match rule {
            TermRule::RawCoordinates => {
                let caps = self.coordinates.captures(fragment)?;
                let lat = caps[1].parse().ok()?;
                let lon = caps[2].parse().ok()?;
                Some(FragmentMatch::Coordinates(Coordinates::new(lat, lon)))
            }
            TermRule::PostalCode => self
                .postal_patterns
                .iter()
                .any(|p| p.is_match(fragment))
                .then(|| FragmentMatch::Zipcode(fragment.to_string())),
            TermRule::CountryCode => self
                .country_code
                .is_match(fragment)
                .then(|| FragmentMatch::IsoCountry(fragment.to_string())),
            TermRule::Street => self
                .street
                .is_match(fragment)
                .then(|| FragmentMatch::Street(fragment.to_string())),
            TermRule::City => self
                .city
                .is_match(fragment)
                .then(|| FragmentMatch::City(fragment.to_string())),
        }
    }
}
