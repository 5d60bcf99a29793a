//! Redirect callback handling

use crate::error::{Error, Result};
use url::Url;

/// Parameters carried by the authorization redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code
    pub code: String,
    /// Echoed `state`, if the provider returned one
    pub state: Option<String>,
}

/// Parse `<scheme>://<host>/callback?code=...`
///
/// An `error` parameter from the provider becomes [`Error::AuthorizationDenied`].
pub fn parse_callback(uri: &str) -> Result<CallbackParams> {
    let url = Url::parse(uri)
        .map_err(|e| Error::MissingAuthorizationCode(format!("{}: {}", uri, e)))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        let message = match description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        };
        return Err(Error::AuthorizationDenied(message));
    }

    match code.filter(|c| !c.is_empty()) {
        Some(code) => Ok(CallbackParams { code, state }),
        None => Err(Error::MissingAuthorizationCode(uri.to_string())),
    }
}

/// Extract just the authorization code
pub fn extract_code(uri: &str) -> Result<String> {
    parse_callback(uri).map(|params| params.code)
}
