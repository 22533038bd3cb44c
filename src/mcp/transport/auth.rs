//! HTTP authentication headers

use base64::Engine;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::RequestBuilder;

use crate::common::{Error, Result};
use crate::testing::AuthConfig;

/// Header name and value for an auth configuration
pub fn auth_header(auth: &AuthConfig) -> Result<(HeaderName, HeaderValue)> {
    let (name, value) = match auth {
        AuthConfig::Bearer { token } => (AUTHORIZATION, format!("Bearer {}", token)),
        AuthConfig::ApiKey { header, key } => {
            let name = HeaderName::from_bytes(header.as_bytes())
                .map_err(|e| Error::Config(format!("Invalid API key header '{}': {}", header, e)))?;
            (name, key.clone())
        }
        AuthConfig::Basic { username, password } => {
            let encoded = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", username, password));
            (AUTHORIZATION, format!("Basic {}", encoded))
        }
    };

    let mut value = HeaderValue::from_str(&value)
        .map_err(|e| Error::Config(format!("Invalid credential for header '{}': {}", name, e)))?;
    value.set_sensitive(true);
    Ok((name, value))
}

/// Attach credentials to a request
pub fn apply_auth(builder: RequestBuilder, auth: Option<&AuthConfig>) -> Result<RequestBuilder> {
    match auth {
        Some(auth) => {
            let (name, value) = auth_header(auth)?;
            Ok(builder.header(name, value))
        }
        None => Ok(builder),
    }
}
