//! Inbound text requests.
//!
//! Binary frames carry raw chunk data and never pass through here.

use serde::Deserialize;

/// A JSON request sent by the client as a text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadRequest {
    /// `{"total": N}`: aggregate byte count for the whole session.
    Sizing { total: u64 },
    /// `{"uri": "...", "size": N}`: starts a new file transfer.
    FileStart { uri: String, size: u64 },
}

/// Field-level view of a request before it is classified.
#[derive(Debug, Deserialize)]
struct RawRequest {
    total: Option<u64>,
    uri: Option<String>,
    size: Option<u64>,
}

impl UploadRequest {
    /// Parses a text frame.
    ///
    /// `total` wins over `uri` when both are present.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawRequest =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        if let Some(total) = raw.total {
            return Ok(UploadRequest::Sizing { total });
        }

        match (raw.uri, raw.size) {
            (Some(uri), Some(size)) => Ok(UploadRequest::FileStart { uri, size }),
            (Some(uri), None) => Err(ProtocolError::MissingSize(uri)),
            (None, _) => Err(ProtocolError::UnknownRequest),
        }
    }
}

/// Errors from request parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown upload request, see backend logs")]
    UnknownRequest,

    #[error("invalid request JSON: {0}")]
    InvalidJson(String),

    #[error("missing size for {0}")]
    MissingSize(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sizing() {
        let req = UploadRequest::parse(r#"{"total": 10}"#).unwrap();
        assert_eq!(req, UploadRequest::Sizing { total: 10 });
    }

    #[test]
    fn parse_zero_total() {
        let req = UploadRequest::parse(r#"{"total": 0}"#).unwrap();
        assert_eq!(req, UploadRequest::Sizing { total: 0 });
    }

    #[test]
    fn parse_file_start() {
        let req = UploadRequest::parse(r#"{"uri":"file:///tmp/x","size":4}"#).unwrap();
        assert_eq!(
            req,
            UploadRequest::FileStart {
                uri: "file:///tmp/x".into(),
                size: 4
            }
        );
    }

    #[test]
    fn total_takes_precedence_over_uri() {
        let req = UploadRequest::parse(r#"{"total":6,"uri":"file:///x","size":2}"#).unwrap();
        assert_eq!(req, UploadRequest::Sizing { total: 6 });
    }

    #[test]
    fn file_start_without_size_rejected() {
        let err = UploadRequest::parse(r#"{"uri":"file:///x"}"#).unwrap_err();
        assert_eq!(err, ProtocolError::MissingSize("file:///x".into()));
    }

    #[test]
    fn empty_object_is_unknown() {
        let err = UploadRequest::parse("{}").unwrap_err();
        assert_eq!(err, ProtocolError::UnknownRequest);
        assert!(err.to_string().contains("unknown upload request"));
    }

    #[test]
    fn unrelated_fields_are_unknown() {
        let err = UploadRequest::parse(r#"{"hello":"world"}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownRequest);
    }

    #[test]
    fn not_json_rejected() {
        let err = UploadRequest::parse("AAAA").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn negative_size_rejected() {
        let err = UploadRequest::parse(r#"{"uri":"file:///x","size":-1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }
}
