//! Channel subscription and client-event signatures
//!
//! Private and presence channels are authorized by the application's backend,
//! which signs `socket_id:channel_name[:channel_data]` with the app secret and
//! hands the client an `auth` string of the form `<app_key>:<hex digest>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::AppConfig;

use super::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Verifies signatures produced with the application secret
pub struct Authenticator {
    app_key: String,
    secret: String,
}

impl Authenticator {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            app_key: config.key.clone(),
            secret: config.secret.clone(),
        }
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Hex encoded HMAC-SHA256 of `data` under the app secret
    pub fn sign(&self, data: &str) -> String {
        hex::encode(self.mac_for(data).finalize().into_bytes())
    }

    /// The `auth` value a backend would hand a client for this subscription
    pub fn subscription_token(
        &self,
        socket_id: &str,
        channel: &str,
        channel_data: Option<&str>,
    ) -> String {
        let preimage = subscription_preimage(socket_id, channel, channel_data);
        format!("{}:{}", self.app_key, self.sign(&preimage))
    }

    pub fn verify_subscription(
        &self,
        socket_id: &str,
        channel: &str,
        channel_data: Option<&str>,
        auth: Option<&str>,
    ) -> bool {
        self.check_subscription(socket_id, channel, channel_data, auth)
            .is_ok()
    }

    /// Like [`Self::verify_subscription`], but reports the expected preimage on failure
    pub fn check_subscription(
        &self,
        socket_id: &str,
        channel: &str,
        channel_data: Option<&str>,
        auth: Option<&str>,
    ) -> Result<(), AuthError> {
        let preimage = subscription_preimage(socket_id, channel, channel_data);
        let provided = auth.unwrap_or_default();

        let signature = match provided.split_once(':') {
            Some((key, signature)) if key == self.app_key => signature,
            _ => return Err(AuthError::invalid_signature(preimage, provided)),
        };

        if self.verify_hex(&preimage, signature) {
            Ok(())
        } else {
            Err(AuthError::invalid_signature(preimage, provided))
        }
    }

    /// Client events are signed over `socket_id:channel_name`
    pub fn verify_client_event(&self, socket_id: &str, channel: &str, signature: &str) -> bool {
        self.verify_hex(&subscription_preimage(socket_id, channel, None), signature)
    }

    /// Constant-time comparison of a hex digest against the expected MAC
    pub(crate) fn verify_hex(&self, data: &str, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };

        self.mac_for(data).verify_slice(&expected).is_ok()
    }

    fn mac_for(&self, data: &str) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.secret.as_bytes())
            .expect("HMAC-SHA256 accepts keys of any size");
        mac.update(data.as_bytes());
        mac
    }
}

/// `socket_id:channel` or `socket_id:channel:channel_data`, channel_data kept verbatim
pub fn subscription_preimage(socket_id: &str, channel: &str, channel_data: Option<&str>) -> String {
    match channel_data {
        Some(data) => format!("{}:{}:{}", socket_id, channel, data),
        None => format!("{}:{}", socket_id, channel),
    }
}
