use crate::error::EtudeError;
use reqwest::Url;
use tracing::debug;

/// Turns the references the generator hands back (usually server-relative paths such as
/// `/static/ex1.mp3`) into absolute URLs against the configured origin.
#[derive(Debug, Clone)]
pub struct UrlResolver {
    origin: String,
}

impl UrlResolver {
    pub fn new(base: &Url) -> Self {
        Self::from_origin(base.as_str())
    }

    pub fn from_origin(origin: &str) -> Self {
        Self { origin: origin.trim().trim_end_matches('/').to_string() }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Absolute references keep their address but come back in canonical form: scheme and
    /// host lowercased, a default port dropped, an empty path written as `/`.
    pub fn resolve(&self, reference: &str) -> Result<Url, EtudeError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(EtudeError::EmptyReference);
        }

        if let Ok(url) = Url::parse(reference) {
            // `localhost:8000/x` parses with scheme `localhost`; only hierarchical URLs count.
            if !url.cannot_be_a_base() {
                if url.as_str() == reference {
                    debug!(reference, "resource reference already absolute");
                } else {
                    debug!(reference, canonical = %url, "absolute reference canonicalized");
                }
                return Ok(url);
            }
        }

        let path = reference.trim_start_matches('/');
        let joined = format!("{}/{}", self.origin, path);
        let url = Url::parse(&joined).map_err(|err| EtudeError::InvalidReference {
            reference: reference.to_string(),
            reason: err.to_string(),
        })?;
        debug!(reference, resolved = %url, "resolved relative resource reference");
        Ok(url)
    }
}
