//! The three extractable content kinds and request validation.
//!
//! Callers name modalities as strings (`"text"`, `"tables"`, `"images"`);
//! validation turns them into a typed [`Modalities`] set up front so no
//! backend ever sees an unknown name.

use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One extractable content kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Tables,
    Images,
}

impl Modality {
    /// Every modality, in canonical order.
    pub const ALL: [Modality; 3] = [Modality::Text, Modality::Tables, Modality::Images];

    /// Accepted names, sorted.
    pub const NAMES: [&'static str; 3] = ["images", "tables", "text"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Tables => "tables",
            Modality::Images => "images",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Modality::Text),
            "tables" => Ok(Modality::Tables),
            "images" => Ok(Modality::Images),
            other => Err(ParseError::InvalidModality {
                invalid: vec![other.to_string()],
                valid: Modality::NAMES.to_vec(),
            }),
        }
    }
}

/// A validated set of requested modalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modalities {
    text: bool,
    tables: bool,
    images: bool,
}

impl Default for Modalities {
    /// All three modalities.
    fn default() -> Self {
        Self::all()
    }
}

impl Modalities {
    pub const fn all() -> Self {
        Self {
            text: true,
            tables: true,
            images: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            text: false,
            tables: false,
            images: false,
        }
    }

    /// Validate a list of modality names.
    ///
    /// Every offending name is reported at once, in request order.
    /// Duplicates are accepted; an empty list selects nothing.
    pub fn parse<S: AsRef<str>>(requested: &[S]) -> Result<Self, ParseError> {
        let mut set = Self::none();
        let mut invalid = Vec::new();
        for name in requested {
            match name.as_ref().parse::<Modality>() {
                Ok(m) => set.insert(m),
                Err(_) => invalid.push(name.as_ref().to_string()),
            }
        }
        if !invalid.is_empty() {
            return Err(ParseError::InvalidModality {
                invalid,
                valid: Modality::NAMES.to_vec(),
            });
        }
        Ok(set)
    }

    pub fn insert(&mut self, modality: Modality) {
        match modality {
            Modality::Text => self.text = true,
            Modality::Tables => self.tables = true,
            Modality::Images => self.images = true,
        }
    }

    pub fn contains(&self, modality: Modality) -> bool {
        match modality {
            Modality::Text => self.text,
            Modality::Tables => self.tables,
            Modality::Images => self.images,
        }
    }

    pub fn text(&self) -> bool {
        self.text
    }

    pub fn tables(&self) -> bool {
        self.tables
    }

    pub fn images(&self) -> bool {
        self.images
    }

    pub fn is_empty(&self) -> bool {
        !(self.text || self.tables || self.images)
    }

    pub fn iter(&self) -> impl Iterator<Item = Modality> + '_ {
        Modality::ALL.into_iter().filter(|m| self.contains(*m))
    }
}

impl FromIterator<Modality> for Modalities {
    fn from_iter<I: IntoIterator<Item = Modality>>(iter: I) -> Self {
        let mut set = Self::none();
        for m in iter {
            set.insert(m);
        }
        set
    }
}

impl fmt::Display for Modalities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|m| m.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
