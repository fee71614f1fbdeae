use super::{Header, RelayError};
use crate::config::{ConfigError, RelayConfig};
use http::{HeaderMap, HeaderName};
use std::collections::HashSet;

/// Which envelope headers are refused and which inbound headers override them.
#[derive(Debug, Clone, Default)]
pub struct HeaderPolicySet {
    disallowed: HashSet<HeaderName>,
    forward: Vec<(HeaderName, HeaderName)>,
}

impl HeaderPolicySet {
    pub fn new<D, F>(disallowed: D, forward: F) -> Result<Self, ConfigError>
    where
        D: IntoIterator,
        D::Item: AsRef<str>,
        F: IntoIterator<Item = (String, String)>,
    {
        let disallowed = disallowed
            .into_iter()
            .map(|name| parse_name(name.as_ref()))
            .collect::<Result<_, _>>()?;

        let forward = forward
            .into_iter()
            .map(|(from, to)| Ok((parse_name(&from)?, parse_name(&to)?)))
            .collect::<Result<_, ConfigError>>()?;

        Ok(Self {
            disallowed,
            forward,
        })
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self, ConfigError> {
        Self::new(
            &config.disallowed_headers,
            config
                .forward_headers
                .iter()
                .map(|f| (f.from.clone(), f.to.clone())),
        )
    }

    /// Fails on the first envelope header whose canonical name is disallowed.
    pub fn check(&self, headers: &[Header]) -> Result<(), RelayError> {
        if self.disallowed.is_empty() {
            return Ok(());
        }

        match headers.iter().find(|h| {
            HeaderName::from_bytes(h.key.as_bytes()).is_ok_and(|name| self.disallowed.contains(&name))
        }) {
            Some(header) => Err(RelayError::DisallowedHeader(header.key.clone())),
            None => Ok(()),
        }
    }

    /// Copies forwarded headers from `inbound` onto `outbound`, replacing existing values.
    pub fn apply_forwarding(&self, inbound: &HeaderMap, outbound: &mut HeaderMap) {
        for (from, to) in &self.forward {
            let mut values = inbound.get_all(from).iter().cloned().peekable();

            if values.peek().is_none() {
                continue;
            }

            outbound.remove(to);
            for value in values {
                outbound.append(to.clone(), value);
            }
        }
    }
}

fn parse_name(name: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ConfigError::Invalid(format!("'{name}' is not a valid header name")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn header(key: &str, values: &[&str]) -> Header {
        Header {
            key: key.to_string(),
            value: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn policy(disallowed: &[&str], forward: &[(&str, &str)]) -> HeaderPolicySet {
        HeaderPolicySet::new(
            disallowed,
            forward.iter().map(|(f, t)| (f.to_string(), t.to_string())),
        )
        .unwrap()
    }

    #[test]
    fn disallowed_names_match_case_insensitively() {
        let policy = policy(&["Cookie", "x-internal"], &[]);

        let err = policy
            .check(&[header("accept-language", &["en"]), header("COOKIE", &["a=b"])])
            .unwrap_err();

        assert!(matches!(err, RelayError::DisallowedHeader(name) if name == "COOKIE"));
        assert!(policy.check(&[header("x-request-id", &["1"])]).is_ok());
    }

    #[test]
    fn forwarded_values_replace_envelope_values() {
        let policy = policy(&[], &[("x-session", "authorization")]);

        let mut inbound = HeaderMap::new();
        inbound.append("x-session", HeaderValue::from_static("Bearer trusted"));

        let mut outbound = HeaderMap::new();
        outbound.append("authorization", HeaderValue::from_static("Bearer forged"));
        outbound.append("authorization", HeaderValue::from_static("Bearer forged-2"));

        policy.apply_forwarding(&inbound, &mut outbound);

        let values: Vec<_> = outbound.get_all("authorization").iter().collect();
        assert_eq!(values, vec!["Bearer trusted"]);
    }

    #[test]
    fn absent_inbound_headers_leave_the_envelope_alone() {
        let policy = policy(&[], &[("authorization", "authorization")]);

        let mut outbound = HeaderMap::new();
        outbound.append("authorization", HeaderValue::from_static("Bearer client"));

        policy.apply_forwarding(&HeaderMap::new(), &mut outbound);

        assert_eq!(outbound["authorization"], "Bearer client");
    }

    #[test]
    fn invalid_names_are_configuration_errors() {
        assert!(matches!(
            HeaderPolicySet::new(["bad name"], Vec::<(String, String)>::new()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
