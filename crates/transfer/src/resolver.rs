//! Maps client-supplied `file://` URIs to local paths.

use std::path::PathBuf;

use percent_encoding::percent_decode_str;

use crate::TransferError;
use crate::validation::{ensure_within_root, validate_destination_path};

const FILE_SCHEME: &str = "file:";

/// Resolves `file://` URIs, optionally confined to an upload root.
#[derive(Debug, Clone, Default)]
pub struct UriResolver {
    root: Option<PathBuf>,
}

impl UriResolver {
    /// Resolver accepting any absolute local path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver rejecting destinations outside `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn root(&self) -> Option<&std::path::Path> {
        self.root.as_deref()
    }

    /// Resolves `uri` to a validated destination path.
    pub fn resolve(&self, uri: &str) -> Result<PathBuf, TransferError> {
        let path = file_uri_to_path(uri)?;
        validate_destination_path(&path)?;
        if let Some(root) = &self.root {
            ensure_within_root(&path, root)?;
        }
        Ok(path)
    }
}

fn file_uri_to_path(uri: &str) -> Result<PathBuf, TransferError> {
    let scheme_ok = uri
        .get(..FILE_SCHEME.len())
        .is_some_and(|s| s.eq_ignore_ascii_case(FILE_SCHEME));
    if !scheme_ok {
        return Err(TransferError::InvalidUri(format!(
            "only file URIs are supported: {uri}"
        )));
    }

    let rest = uri[FILE_SCHEME.len()..]
        .strip_prefix("//")
        .ok_or_else(|| TransferError::InvalidUri(format!("missing authority: {uri}")))?;

    let (authority, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    if !(authority.is_empty() || authority.eq_ignore_ascii_case("localhost")) {
        return Err(TransferError::InvalidUri(format!(
            "remote host not supported: {authority}"
        )));
    }

    // Query and fragment carry no path information.
    let path = path.split(['?', '#']).next().unwrap_or_default();
    if path.is_empty() {
        return Err(TransferError::InvalidUri(format!("empty path: {uri}")));
    }

    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map_err(|e| TransferError::InvalidUri(format!("{uri}: {e}")))?;
    if decoded.contains('\0') {
        return Err(TransferError::InvalidUri(format!("NUL byte in path: {uri}")));
    }

    Ok(PathBuf::from(native_path(&decoded)))
}

/// `/C:/dir/file` -> `C:/dir/file`
#[cfg(windows)]
fn native_path(decoded: &str) -> &str {
    let bytes = decoded.as_bytes();
    if bytes.len() >= 3 && bytes[0] == b'/' && bytes[2] == b':' {
        &decoded[1..]
    } else {
        decoded
    }
}

#[cfg(not(windows))]
fn native_path(decoded: &str) -> &str {
    decoded
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn resolves_plain_file_uri() {
        let path = UriResolver::new().resolve("file:///tmp/x").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/x"));
    }

    #[test]
    fn accepts_localhost_authority() {
        let path = UriResolver::new()
            .resolve("file://localhost/srv/data.bin")
            .unwrap();
        assert_eq!(path, PathBuf::from("/srv/data.bin"));
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let path = UriResolver::new().resolve("FILE:///tmp/y").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/y"));
    }

    #[test]
    fn decodes_percent_escapes() {
        let path = UriResolver::new()
            .resolve("file:///home/me/My%20Documents/r%C3%A9sum%C3%A9.txt")
            .unwrap();
        assert_eq!(path, PathBuf::from("/home/me/My Documents/résumé.txt"));
    }

    #[test]
    fn strips_query_and_fragment() {
        let path = UriResolver::new().resolve("file:///tmp/a.txt?x=1#frag").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/a.txt"));
    }

    #[test]
    fn rejects_other_schemes() {
        let err = UriResolver::new().resolve("http://example.com/x").unwrap_err();
        assert!(matches!(err, TransferError::InvalidUri(_)));
    }

    #[test]
    fn rejects_plain_path() {
        assert!(UriResolver::new().resolve("/tmp/x").is_err());
    }

    #[test]
    fn rejects_remote_host() {
        let err = UriResolver::new().resolve("file://server/share/x").unwrap_err();
        assert!(matches!(err, TransferError::InvalidUri(_)));
    }

    #[test]
    fn rejects_empty_path() {
        assert!(UriResolver::new().resolve("file://").is_err());
    }

    #[test]
    fn rejects_directory_root() {
        let err = UriResolver::new().resolve("file:///").unwrap_err();
        assert!(matches!(err, TransferError::InvalidPath(_)));
    }

    #[test]
    fn rejects_encoded_traversal() {
        let err = UriResolver::new()
            .resolve("file:///srv/up/%2E%2E/etc/passwd")
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidPath(_)));
    }

    #[test]
    fn rejects_nul_byte() {
        assert!(UriResolver::new().resolve("file:///tmp/a%00b").is_err());
    }

    #[test]
    fn root_confines_destinations() {
        let resolver = UriResolver::with_root("/srv/up");
        assert_eq!(resolver.root(), Some(std::path::Path::new("/srv/up")));
        assert!(resolver.resolve("file:///srv/up/a/b.txt").is_ok());

        let err = resolver.resolve("file:///etc/passwd").unwrap_err();
        assert!(matches!(err, TransferError::InvalidPath(_)));
    }
}
