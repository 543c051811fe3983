//! Serial identifiers: normalization, wired/wireless classification and
//! administrative exclusion.

use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WIRED_PREFIXES: &str = "01234567";
pub const DEFAULT_WIRELESS_PREFIXES: &str = "8";

/// Serials compare case-insensitively; everything downstream sees the
/// trimmed, upper-cased form.
pub fn normalize_serial(raw: &str) -> String {
    raw.trim().to_uppercase()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialClass {
    Wired,
    Wireless,
}

/// Leading-character convention used to tell hard-wired trackers from
/// battery-powered ones.
///
/// This is a fleet data convention, not a property of the hardware; both sets
/// are configurable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialClassifier {
    pub wired_prefixes: String,
    pub wireless_prefixes: String,
}

impl Default for SerialClassifier {
    fn default() -> Self {
        Self {
            wired_prefixes: DEFAULT_WIRED_PREFIXES.to_string(),
            wireless_prefixes: DEFAULT_WIRELESS_PREFIXES.to_string(),
        }
    }
}

impl SerialClassifier {
    pub fn new(wired_prefixes: &str, wireless_prefixes: &str) -> Result<Self> {
        let classifier = Self {
            wired_prefixes: normalize_serial(wired_prefixes),
            wireless_prefixes: normalize_serial(wireless_prefixes),
        };
        classifier.validate()?;
        Ok(classifier)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(c) = self
            .wired_prefixes
            .chars()
            .find(|c| self.wireless_prefixes.contains(*c))
        {
            return Err(anyhow!(
                "serial prefix '{}' is configured as both wired and wireless",
                c
            ));
        }
        Ok(())
    }

    /// Classify a normalized serial by its first character. Serials with any
    /// other leading character are neither wired nor wireless.
    pub fn classify(&self, serial: &str) -> Option<SerialClass> {
        let first = serial.chars().next()?;
        if self.wired_prefixes.contains(first) {
            Some(SerialClass::Wired)
        } else if self.wireless_prefixes.contains(first) {
            Some(SerialClass::Wireless)
        } else {
            None
        }
    }
}

// -------------------- Exclusion --------------------

/// Predicate for serials an operator has removed from consideration.
pub trait SerialExclusion {
    /// `serial` is always in normalized form.
    fn is_excluded(&self, serial: &str) -> bool;
}

impl<F> SerialExclusion for F
where
    F: Fn(&str) -> bool,
{
    fn is_excluded(&self, serial: &str) -> bool {
        self(serial)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoExclusion;

impl SerialExclusion for NoExclusion {
    fn is_excluded(&self, _serial: &str) -> bool {
        false
    }
}

/// Administratively blacklisted serials.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blacklist {
    serials: BTreeSet<String>,
}

impl Blacklist {
    pub fn new<I, S>(serials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            serials: serials
                .into_iter()
                .map(|s| normalize_serial(s.as_ref()))
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn from_csv(value: &str) -> Self {
        Self::new(value.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.serials.is_empty()
    }

    pub fn len(&self) -> usize {
        self.serials.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.serials.iter().map(String::as_str)
    }
}

impl SerialExclusion for Blacklist {
    fn is_excluded(&self, serial: &str) -> bool {
        self.serials.contains(serial)
    }
}
