//! Company-scoped sequential document numbers (`GR-2025-00001`).

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use stockflow_core::DomainError;

/// A document number: `<PREFIX>-<YEAR>-<SEQUENCE>` with the sequence zero-padded
/// to five digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DocumentNumber {
    prefix: String,
    year: i32,
    sequence: u32,
}

impl DocumentNumber {
    pub fn new(prefix: impl Into<String>, year: i32, sequence: u32) -> Result<Self, DomainError> {
        let prefix = prefix.into();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(DomainError::validation(format!(
                "document number prefix must be uppercase letters, got '{prefix}'"
            )));
        }
        if sequence == 0 {
            return Err(DomainError::validation("document sequence starts at 1"));
        }
        Ok(Self {
            prefix,
            year,
            sequence,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl core::fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}-{:05}", self.prefix, self.year, self.sequence)
    }
}

impl FromStr for DocumentNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::invalid_id(format!("DocumentNumber: '{s}'"));
        let mut parts = s.splitn(3, '-');
        let (Some(prefix), Some(year), Some(seq)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let sequence = seq.parse::<u32>().map_err(|_| invalid())?;
        Self::new(prefix, year, sequence).map_err(|_| invalid())
    }
}

impl From<DocumentNumber> for String {
    fn from(value: DocumentNumber) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for DocumentNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
