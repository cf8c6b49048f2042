//! Country reference data
//!
//! The resolver only needs two facts about a country: its ISO code, used to
//! scope provider searches, and its default postal code pattern, used by the
//! term parser. `CountryLookup` abstracts over wherever that data lives; a
//! static table of common European countries backs it by default.

/// Reference data for one country
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Country {
    /// Reference id callers use to select the country
    pub id: String,
    /// ISO 3166-1 alpha-2 code
    pub iso: String,
    /// ISO 3166-1 alpha-3 code
    pub iso3: String,
    /// English country name
    pub name: String,
    /// Regex (without anchors) matching the country's postal codes
    pub postal_code_pattern: Option<String>,
}

/// Lookup-by-id service for country reference data
pub trait CountryLookup: Send + Sync {
    /// Returns the countries for `ids`, in the order given, skipping unknown ids
    fn countries_by_ids(&self, ids: &[String]) -> Vec<Country>;

    /// Finds a country by ISO-2 code, ISO-3 code or name
    fn country_by_iso(&self, code: &str) -> Option<Country>;
}

/// Static table entry; `&'static str` keeps the table const-initializable
#[derive(Debug, Clone, Copy)]
struct StaticCountry {
    id: &'static str,
    iso: &'static str,
    iso3: &'static str,
    name: &'static str,
    postal_code_pattern: Option<&'static str>,
}

impl From<&StaticCountry> for Country {
    fn from(c: &StaticCountry) -> Self {
        Country {
            id: c.id.to_string(),
            iso: c.iso.to_string(),
            iso3: c.iso3.to_string(),
            name: c.name.to_string(),
            postal_code_pattern: c.postal_code_pattern.map(str::to_string),
        }
    }
}

static COUNTRIES: [StaticCountry; 12] = [
    StaticCountry {
        id: "de",
        iso: "DE",
        iso3: "DEU",
        name: "Germany",
        postal_code_pattern: Some(r"\d{5}"),
    },
    StaticCountry {
        id: "at",
        iso: "AT",
        iso3: "AUT",
        name: "Austria",
        postal_code_pattern: Some(r"\d{4}"),
    },
    StaticCountry {
        id: "ch",
        iso: "CH",
        iso3: "CHE",
        name: "Switzerland",
        postal_code_pattern: Some(r"\d{4}"),
    },
    StaticCountry {
        id: "fr",
        iso: "FR",
        iso3: "FRA",
        name: "France",
        postal_code_pattern: Some(r"\d{5}"),
    },
    StaticCountry {
        id: "nl",
        iso: "NL",
        iso3: "NLD",
        name: "Netherlands",
        postal_code_pattern: Some(r"\d{4}\s?[A-Z]{2}"),
    },
    StaticCountry {
        id: "be",
        iso: "BE",
        iso3: "BEL",
        name: "Belgium",
        postal_code_pattern: Some(r"\d{4}"),
    },
    StaticCountry {
        id: "lu",
        iso: "LU",
        iso3: "LUX",
        name: "Luxembourg",
        postal_code_pattern: Some(r"\d{4}"),
    },
    StaticCountry {
        id: "dk",
        iso: "DK",
        iso3: "DNK",
        name: "Denmark",
        postal_code_pattern: Some(r"\d{4}"),
    },
    StaticCountry {
        id: "pl",
        iso: "PL",
        iso3: "POL",
        name: "Poland",
        postal_code_pattern: Some(r"\d{2}-\d{3}"),
    },
    StaticCountry {
        id: "it",
        iso: "IT",
        iso3: "ITA",
        name: "Italy",
        postal_code_pattern: Some(r"\d{5}"),
    },
    StaticCountry {
        id: "gb",
        iso: "GB",
        iso3: "GBR",
        name: "United Kingdom",
        postal_code_pattern: Some(r"[A-Z]{1,2}\d[A-Z\d]?\s?\d[A-Z]{2}"),
    },
    StaticCountry {
        id: "li",
        iso: "LI",
        iso3: "LIE",
        name: "Liechtenstein",
        postal_code_pattern: None,
    },
];

/// `CountryLookup` over the built-in country table
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticCountries;

impl StaticCountries {
    /// Number of countries in the built-in table
    pub fn len(&self) -> usize {
        COUNTRIES.len()
    }

    pub fn is_empty(&self) -> bool {
        COUNTRIES.is_empty()
    }
}

impl CountryLookup for StaticCountries {
    fn countries_by_ids(&self, ids: &[String]) -> Vec<Country> {
        ids.iter()
            .filter_map(|id| COUNTRIES.iter().find(|c| c.id.eq_ignore_ascii_case(id)))
            .map(Country::from)
            .collect()
    }

    fn country_by_iso(&self, code: &str) -> Option<Country> {
        let code = code.trim();
        if code.is_empty() {
            return None;
        }
        COUNTRIES
            .iter()
            .find(|c| {
                c.iso.eq_ignore_ascii_case(code)
                    || c.iso3.eq_ignore_ascii_case(code)
                    || c.name.eq_ignore_ascii_case(code)
            })
            .map(Country::from)
    }
}
