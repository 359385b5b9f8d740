//! The `source` parameter: a base64url-encoded URL the browser returns to
//! after signing in.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use url::Url;

use super::ValidationError;

pub fn encode_return_url(url: &str) -> String {
    URL_SAFE_NO_PAD.encode(url.as_bytes())
}

/// Decode `source` and check it points back at one of `allowed_origins`.
/// Padding is tolerated.
pub fn decode_return_url(source: &str, allowed_origins: &[&str]) -> Result<Url, ValidationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(source.trim().trim_end_matches('='))
        .map_err(|_| ValidationError::ReturnUrlEncoding)?;
    let text = String::from_utf8(bytes).map_err(|_| ValidationError::ReturnUrlEncoding)?;
    let url = Url::parse(&text).map_err(|_| ValidationError::ReturnUrlNotAbsolute)?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ValidationError::ReturnUrlNotAbsolute);
    }

    let origin = url.origin();
    let allowed = allowed_origins
        .iter()
        .filter_map(|base| Url::parse(base).ok())
        .any(|base| base.origin() == origin);
    if !allowed {
        return Err(ValidationError::ReturnUrlForeignOrigin);
    }
    Ok(url)
}
