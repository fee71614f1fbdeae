use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The generation of the Server Reflection Protocol spoken with a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReflectDialect {
    /// Negotiate: try `v1` first, fall back to `v1alpha` when the server does not implement it.
    #[default]
    Unknown,
    /// `grpc.reflection.v1`
    V1,
    /// `grpc.reflection.v1alpha`
    V1Alpha,
}

/// Canonical names, in lookup order. `""` is accepted as an alias of `auto` when parsing.
const DIALECT_NAMES: [(ReflectDialect, &str); 3] = [
    (ReflectDialect::Unknown, "auto"),
    (ReflectDialect::V1, "v1"),
    (ReflectDialect::V1Alpha, "v1alpha"),
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown reflection protocol '{0}', expected one of: auto, v1, v1alpha")]
pub struct UnknownDialectError(pub String);

impl ReflectDialect {
    pub fn as_str(self) -> &'static str {
        DIALECT_NAMES
            .iter()
            .find(|(dialect, _)| *dialect == self)
            .map(|(_, name)| *name)
            .unwrap_or("auto")
    }

    /// The fully qualified reflection service name of a concrete dialect.
    pub fn service_name(self) -> Option<&'static str> {
        match self {
            ReflectDialect::Unknown => None,
            ReflectDialect::V1 => Some("grpc.reflection.v1.ServerReflection"),
            ReflectDialect::V1Alpha => Some("grpc.reflection.v1alpha.ServerReflection"),
        }
    }
}

impl FromStr for ReflectDialect {
    type Err = UnknownDialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(ReflectDialect::Unknown);
        }

        DIALECT_NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(dialect, _)| *dialect)
            .ok_or_else(|| UnknownDialectError(s.to_string()))
    }
}

impl TryFrom<String> for ReflectDialect {
    type Error = UnknownDialectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReflectDialect> for String {
    fn from(value: ReflectDialect) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ReflectDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for (dialect, name) in DIALECT_NAMES {
            assert_eq!(dialect.as_str(), name);
            assert_eq!(name.parse::<ReflectDialect>(), Ok(dialect));
        }
    }

    #[test]
    fn empty_and_mixed_case_names_parse() {
        assert_eq!("".parse(), Ok(ReflectDialect::Unknown));
        assert_eq!("V1Alpha".parse(), Ok(ReflectDialect::V1Alpha));
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(
            "v2".parse::<ReflectDialect>(),
            Err(UnknownDialectError("v2".to_string()))
        );
    }

    #[test]
    fn deserializes_from_config_strings() {
        let dialect: ReflectDialect = serde_json::from_str("\"v1alpha\"").unwrap();
        assert_eq!(dialect, ReflectDialect::V1Alpha);
        assert!(serde_json::from_str::<ReflectDialect>("\"nope\"").is_err());
    }
}
