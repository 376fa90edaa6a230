//! Activation payloads delivered through the custom URL scheme.
//!
//! A browser hands the OS a URL such as
//! `modlink://activate?code=XXXX-YYYY&username=alice`; the OS launches a new
//! process with it as an argument, which relays it to the running instance.

use crate::error::{LicenseError, LicenseResult};
use serde::{Deserialize, Serialize};

/// URL scheme registered for activation links.
pub const ACTIVATION_SCHEME: &str = "modlink";

const ACTIVATE_ACTION: &str = "activate";

/// An activation request carried by a `modlink://activate` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationPayload {
    pub code: String,
    pub username: String,
}

impl ActivationPayload {
    /// Parses an activation URL.
    pub fn parse(url: &str) -> LicenseResult<Self> {
        let url = url.trim();
        let rest = url
            .strip_prefix(ACTIVATION_SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(|| LicenseError::InvalidActivationUrl(format!("unexpected scheme: {url}")))?;

        let (action, query) = rest.split_once('?').unwrap_or((rest, ""));
        if action.trim_end_matches('/') != ACTIVATE_ACTION {
            return Err(LicenseError::InvalidActivationUrl(format!(
                "unsupported action: {action}"
            )));
        }

        let mut code = None;
        let mut username = None;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = decode_component(value)?;
            match key {
                "code" => code = Some(value),
                "username" | "user" => username = Some(value),
                _ => {}
            }
        }

        let code = code
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LicenseError::InvalidActivationUrl("missing code".into()))?;

        Ok(Self {
            code: code.trim().to_string(),
            username: username.unwrap_or_default(),
        })
    }

    /// Renders the payload back into its URL form.
    #[must_use]
    pub fn to_url(&self) -> String {
        format!(
            "{ACTIVATION_SCHEME}://{ACTIVATE_ACTION}?code={}&username={}",
            urlencoding::encode(&self.code),
            urlencoding::encode(&self.username)
        )
    }
}

fn decode_component(raw: &str) -> LicenseResult<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|e| LicenseError::InvalidActivationUrl(format!("bad escape in {raw:?}: {e}")))
}
