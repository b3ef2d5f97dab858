//! Signed HTTP API requests
//!
//! Trigger requests carry `auth_key`, `auth_timestamp`, `auth_version` and
//! `auth_signature` query parameters. The signature is the hex HMAC-SHA256 of
//! `METHOD\nPATH\nQUERY` where QUERY holds every other parameter, lowercased
//! keys sorted and joined as `k=v&k=v`.

use std::collections::HashMap;

use super::{AuthError, Authenticator};

impl Authenticator {
    /// Verify a signed API request made at `now` (unix seconds)
    pub fn verify_api_request(
        &self,
        method: &str,
        path: &str,
        params: &HashMap<String, String>,
        now: i64,
        grace_seconds: i64,
    ) -> Result<(), AuthError> {
        let key = params.get("auth_key").ok_or(AuthError::MissingParameter("auth_key"))?;
        if key != self.app_key() {
            return Err(AuthError::UnknownKey(key.clone()));
        }

        let timestamp = params
            .get("auth_timestamp")
            .ok_or(AuthError::MissingParameter("auth_timestamp"))?
            .parse::<i64>()
            .map_err(|_| AuthError::MissingParameter("auth_timestamp"))?;
        if (now - timestamp).abs() > grace_seconds {
            return Err(AuthError::Expired { timestamp, now });
        }

        let signature = params
            .get("auth_signature")
            .ok_or(AuthError::MissingParameter("auth_signature"))?;

        let string_to_sign = api_string_to_sign(method, path, params);
        if self.verify_hex(&string_to_sign, signature) {
            Ok(())
        } else {
            Err(AuthError::invalid_signature(string_to_sign, signature))
        }
    }

    /// Sign an API request the way a server library would
    pub fn sign_api_request(
        &self,
        method: &str,
        path: &str,
        params: &HashMap<String, String>,
    ) -> String {
        self.sign(&api_string_to_sign(method, path, params))
    }
}

fn api_string_to_sign(method: &str, path: &str, params: &HashMap<String, String>) -> String {
    let mut pairs: Vec<(String, &str)> = params
        .iter()
        .filter(|(k, _)| k.as_str() != "auth_signature")
        .map(|(k, v)| (k.to_lowercase(), v.as_str()))
        .collect();
    pairs.sort();

    let query = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}\n{}\n{}", method.to_uppercase(), path, query)
}
