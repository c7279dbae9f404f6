//! Artifact sources keyed by URI scheme.

use std::cell::OnceCell;
use std::fs::File;
use std::io::{self, Write};

use reqwest::blocking::Client;
use tracing::debug;
use url::Url;

use super::{FetchError, FetchResult};

/// Something that can stream the bytes behind a dependency URI.
pub trait ArtifactSource {
    /// URI schemes this source handles.
    fn schemes(&self) -> &'static [&'static str];

    /// Copy the artifact at `uri` into `dest`, returning the byte count.
    fn download(&self, uri: &Url, dest: &mut dyn Write) -> FetchResult<u64>;
}

/// `file://` URIs, copied from the local filesystem.
#[derive(Debug, Default)]
pub struct FileSource;

impl ArtifactSource for FileSource {
    fn schemes(&self) -> &'static [&'static str] {
        &["file"]
    }

    fn download(&self, uri: &Url, dest: &mut dyn Write) -> FetchResult<u64> {
        let path = uri.to_file_path().map_err(|_| FetchError::InvalidUri {
            uri: uri.to_string(),
            reason: "not a local file path".to_string(),
        })?;
        let mut source = File::open(&path).map_err(|source| FetchError::Io {
            path: path.clone(),
            source,
        })?;
        io::copy(&mut source, dest).map_err(|source| FetchError::Io { path, source })
    }
}

/// `http://` and `https://` URIs, fetched with a single GET.
#[derive(Debug, Default)]
pub struct HttpSource {
    client: OnceCell<Client>,
}

impl HttpSource {
    fn client(&self) -> FetchResult<&Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .user_agent(concat!("buildpack-packager/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| FetchError::Http {
                uri: String::new(),
                source,
            })?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl ArtifactSource for HttpSource {
    fn schemes(&self) -> &'static [&'static str] {
        &["http", "https"]
    }

    fn download(&self, uri: &Url, dest: &mut dyn Write) -> FetchResult<u64> {
        let http_error = |source| FetchError::Http {
            uri: uri.to_string(),
            source,
        };

        let mut response = self
            .client()?
            .get(uri.clone())
            .send()
            .map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = io::copy(&mut response, dest).map_err(|source| FetchError::Transfer {
            uri: uri.to_string(),
            source,
        })?;
        debug!(uri = %uri, bytes, "downloaded dependency");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_file_source_copies_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("artifact.tgz");
        fs::write(&path, b"artifact bytes").unwrap();

        let uri = Url::from_file_path(&path).unwrap();
        let mut out = Vec::new();
        let n = FileSource.download(&uri, &mut out).unwrap();

        assert_eq!(n, 14);
        assert_eq!(out, b"artifact bytes");
    }

    #[test]
    fn test_file_source_missing_file() {
        let dir = TempDir::new().unwrap();
        let uri = Url::from_file_path(dir.path().join("missing.tgz")).unwrap();

        let err = FileSource.download(&uri, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }));
    }

    #[test]
    fn test_schemes() {
        assert_eq!(FileSource.schemes(), &["file"]);
        assert_eq!(HttpSource::default().schemes(), &["http", "https"]);
    }
}
