// src/error.rs

use std::error::Error as StdError;
use std::fmt;

use http::StatusCode;
use url::Url;

/// A `Result` alias where the `Err` case is `clusterauth::Error`.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) type BoxError = Box<dyn StdError + Send + Sync>;

/// The errors that may occur while authenticating a request, signing a
/// token or rotating secrets.
///
/// Note: errors may include the full URL used to make the request, but
/// never the credentials that were presented.
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
    url: Option<Url>,
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                source: source.map(Into::into),
                url: None,
            }),
        }
    }

    /// Returns a possible URL related to this error.
    pub fn url(&self) -> Option<&Url> {
        self.inner.url.as_ref()
    }

    /// Add a url related to this error (overwriting any existing)
    pub fn with_url(mut self, url: Url) -> Self {
        self.inner.url = Some(url);
        self
    }

    /// Returns true if a token string could not be decoded.
    pub fn is_decode(&self) -> bool {
        matches!(self.inner.kind, Kind::Decode)
    }

    /// Returns true if a signed string failed verification.
    ///
    /// Callers should treat this as "not authenticated" and challenge again.
    pub fn is_signature(&self) -> bool {
        matches!(self.inner.kind, Kind::Signature)
    }

    /// Returns true if a negotiation token was malformed or unexpected.
    pub fn is_negotiation(&self) -> bool {
        matches!(self.inner.kind, Kind::Negotiation)
    }

    /// Returns true if a mandatory setting was missing or invalid.
    pub fn is_configuration(&self) -> bool {
        matches!(self.inner.kind, Kind::Configuration)
    }

    /// Returns true if a compare-and-swap write to the coordination store
    /// lost against another writer.
    pub fn is_conflict(&self) -> bool {
        matches!(self.inner.kind, Kind::Conflict)
    }

    /// Returns true if a directory bind rejected the credentials or failed.
    pub fn is_directory_bind(&self) -> bool {
        matches!(self.inner.kind, Kind::DirectoryBind)
    }

    /// Returns true if the coordination store could not be reached or
    /// returned malformed data.
    pub fn is_store(&self) -> bool {
        matches!(self.inner.kind, Kind::Store)
    }

    /// Returns true if the server rejected an authentication attempt.
    pub fn is_status(&self) -> bool {
        matches!(self.inner.kind, Kind::Status(_))
    }

    /// Returns true if the server answered 404 while extracting a token.
    pub fn is_not_found(&self) -> bool {
        matches!(self.inner.kind, Kind::NotFound)
    }

    /// Returns true if the error came from the HTTP transport.
    pub fn is_request(&self) -> bool {
        matches!(self.inner.kind, Kind::Request)
    }

    /// Returns the status code, if the error was generated from a response.
    pub fn status(&self) -> Option<StatusCode> {
        match self.inner.kind {
            Kind::Status(code) => Some(code),
            Kind::NotFound => Some(StatusCode::NOT_FOUND),
            _ => None,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("clusterauth::Error");

        builder.field("kind", &self.inner.kind);

        if let Some(ref url) = self.inner.url {
            builder.field("url", &url.as_str());
        }
        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }

        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.kind {
            Kind::Decode => f.write_str("error decoding authentication token")?,
            Kind::Signature => f.write_str("invalid signature")?,
            Kind::Negotiation => f.write_str("negotiation error")?,
            Kind::Configuration => f.write_str("configuration error")?,
            Kind::Conflict => f.write_str("coordination write conflict")?,
            Kind::DirectoryBind => f.write_str("error validating directory user")?,
            Kind::Store => f.write_str("coordination store error")?,
            Kind::Status(ref code) => {
                let prefix = if code.is_client_error() {
                    "HTTP status client error"
                } else if code.is_server_error() {
                    "HTTP status server error"
                } else {
                    "HTTP status"
                };
                write!(f, "authentication failed, {prefix} ({code})")?;
            }
            Kind::NotFound => f.write_str("resource not found")?,
            Kind::Request => f.write_str("error sending request")?,
        }

        if let Some(url) = &self.inner.url {
            write!(f, " for url ({url})")?;
        }

        if let Some(source) = &self.inner.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Kind {
    Decode,
    Signature,
    Negotiation,
    Configuration,
    Conflict,
    DirectoryBind,
    Store,
    Status(StatusCode),
    NotFound,
    Request,
}

// constructors

pub(crate) fn decode<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Decode, Some(e))
}

pub(crate) fn signature<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Signature, Some(e))
}

pub(crate) fn negotiate<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Negotiation, Some(e))
}

pub(crate) fn configuration<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Configuration, Some(e))
}

pub(crate) fn conflict<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Conflict, Some(e))
}

pub(crate) fn directory_bind<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::DirectoryBind, Some(e))
}

pub(crate) fn store<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Store, Some(e))
}

pub(crate) fn status_code(url: Url, status: StatusCode) -> Error {
    Error::new(Kind::Status(status), None::<Error>).with_url(url)
}

pub(crate) fn not_found(url: Url) -> Error {
    Error::new(Kind::NotFound, None::<Error>).with_url(url)
}

pub(crate) fn request<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Request, Some(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn test_source_chain() {
        let root = Error::new(Kind::Request, None::<Error>);
        assert!(root.source().is_none());

        let link = super::store(root);
        assert!(link.source().is_some());
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn test_display_includes_url_and_source() {
        let url = Url::parse("http://example.com/path").unwrap();
        let err = super::negotiate("Too many authentication round-trips").with_url(url);
        let text = err.to_string();
        assert!(text.starts_with("negotiation error for url (http://example.com/path)"));
        assert!(text.ends_with("Too many authentication round-trips"));
    }

    #[test]
    fn test_status_predicates() {
        let url = Url::parse("http://example.com/").unwrap();
        let err = super::status_code(url.clone(), StatusCode::FORBIDDEN);
        assert!(err.is_status());
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));

        let err = super::not_found(url);
        assert!(err.is_not_found());
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_kinds_are_distinct() {
        assert!(super::decode("x").is_decode());
        assert!(super::signature("x").is_signature());
        assert!(super::configuration("x").is_configuration());
        assert!(super::conflict("x").is_conflict());
        assert!(super::directory_bind("x").is_directory_bind());
        assert!(!super::directory_bind("x").is_signature());
    }
}
