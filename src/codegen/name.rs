use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::NameError;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_$][a-zA-Z_$0-9]*$").expect("identifier grammar"));

/// An identifier that is safe to place in a name position of generated code.
///
/// The grammar check runs at construction (and again on deserialization), so
/// nothing that fails it can ever reach the emitted program.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name(String);

impl Name {
    pub fn new(s: impl Into<String>) -> Result<Self, NameError> {
        let s = s.into();
        if IDENTIFIER.is_match(&s) { Ok(Name(s)) } else { Err(NameError(s)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Names built from compiler-owned prefixes; a failure is a compiler defect.
    pub(crate) fn internal(s: String) -> Self {
        Name::new(s).unwrap_or_else(|e| panic!("CodeBuilder: {e}"))
    }
}

impl TryFrom<String> for Name {
    type Error = NameError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Name::new(s)
    }
}

impl From<Name> for String {
    fn from(n: Name) -> String {
        n.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_injection_before_emission() {
        assert!(Name::new("x; doEvil()").is_err());
        assert!(Name::new("1abc").is_err());
        assert!(Name::new("").is_err());
        assert!(Name::new("a b").is_err());
    }

    #[test]
    fn accepts_identifiers() {
        for ok in ["data", "_x", "$data0", "validate12", "A_b$9"] {
            assert_eq!(Name::new(ok).unwrap().as_str(), ok);
        }
    }

    #[test]
    fn deserialization_rechecks_grammar() {
        let ok: Name = serde_json::from_str("\"errs0\"").unwrap();
        assert_eq!(ok.as_str(), "errs0");
        assert!(serde_json::from_str::<Name>("\"a-b\"").is_err());
    }
}
