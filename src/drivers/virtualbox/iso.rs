//! Boot image cache.
//!
//! The boot ISO is shared by every VirtualBox host and downloaded once. A
//! download lands in a temporary file next to the cache entry and is renamed
//! into place, so the cache never holds a truncated image.

use crate::config::Settings;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timeout for a whole boot image download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Location and upstream of the cached boot image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImageCache {
    /// Cached image path.
    pub path: PathBuf,
    /// Releases index URL.
    pub release_index_url: String,
    /// Image URL template with a `{tag}` placeholder.
    pub url_template: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
}

impl BootImageCache {
    /// Cache described by the global settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            path: settings.boot_image_path(),
            release_index_url: settings.release_index_url.clone(),
            url_template: settings.iso_url_template.clone(),
        }
    }

    /// Download URL of the image for a release tag.
    pub fn image_url(&self, tag: &str) -> String {
        self.url_template.replace("{tag}", tag)
    }

    /// Whether the image is already cached.
    pub fn is_cached(&self) -> Result<bool> {
        match std::fs::metadata(&self.path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Return the cached image path, downloading the latest release first if
    /// nothing is cached.
    pub fn ensure(&self) -> Result<PathBuf> {
        if self.is_cached()? {
            tracing::debug!(path = %self.path.display(), "boot image cached");
            return Ok(self.path.clone());
        }

        let client = http_client()?;
        let tag = latest_release_tag(&client, &self.release_index_url)?;
        let url = self.image_url(&tag);

        tracing::info!(tag = %tag, url = %url, "downloading boot image");
        download(&client, &url, &self.path)?;
        Ok(self.path.clone())
    }
}

fn http_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .user_agent(concat!("hostkit/", env!("CARGO_PKG_VERSION")))
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| Error::download(format!("failed to create HTTP client: {}", e)))
}

/// Parse a releases index and return the newest tag (the first entry).
pub fn parse_latest_tag(index: &str) -> Result<String> {
    let releases: Vec<Release> = serde_json::from_str(index)?;
    releases
        .into_iter()
        .next()
        .map(|r| r.tag_name)
        .ok_or_else(|| Error::download("no releases found"))
}

fn latest_release_tag(client: &reqwest::blocking::Client, url: &str) -> Result<String> {
    let body = client
        .get(url)
        .send()
        .and_then(|rsp| rsp.error_for_status())
        .and_then(|rsp| rsp.text())
        .map_err(|e| Error::download(format!("{}: {}", url, e)))?;
    parse_latest_tag(&body)
}

fn download(client: &reqwest::blocking::Client, url: &str, dest: &Path) -> Result<()> {
    let dir = dest
        .parent()
        .ok_or_else(|| Error::download(format!("invalid cache path {}", dest.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut rsp = client
        .get(url)
        .send()
        .and_then(|rsp| rsp.error_for_status())
        .map_err(|e| Error::download(format!("{}: {}", url, e)))?;

    // Same directory as the destination so the rename cannot cross devices.
    let mut tmp = tempfile::Builder::new()
        .prefix(".boot2docker-")
        .tempfile_in(dir)?;
    rsp.copy_to(tmp.as_file_mut())
        .map_err(|e| Error::download(format!("{}: {}", url, e)))?;
    tmp.as_file().sync_all()?;

    tmp.persist(dest).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    /// Serve each body once, in order, over plain HTTP/1.1.
    fn serve(bodies: Vec<&'static [u8]>) -> (String, std::thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let mut paths = Vec::new();
            for body in bodies {
                let (mut conn, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(conn.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                paths.push(request_line.split_whitespace().nth(1).unwrap().to_string());
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                }
                write!(
                    conn,
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                )
                .unwrap();
                conn.write_all(body).unwrap();
            }
            paths
        });
        (base, handle)
    }

    #[test]
    fn test_parse_latest_tag_uses_first_entry() {
        let index = r#"[{"tag_name":"v1.3.0","name":"v1.3.0"},{"tag_name":"v1.2.0"}]"#;
        assert_eq!(parse_latest_tag(index).unwrap(), "v1.3.0");
    }

    #[test]
    fn test_parse_latest_tag_empty_index() {
        assert!(matches!(parse_latest_tag("[]"), Err(Error::Download(_))));
        assert!(matches!(parse_latest_tag("{}"), Err(Error::Json(_))));
    }

    #[test]
    fn test_image_url_from_settings() {
        let cache = BootImageCache::from_settings(&Settings::default());
        assert_eq!(
            cache.image_url("v1.2.0"),
            "https://github.com/boot2docker/boot2docker/releases/download/v1.2.0/boot2docker.iso"
        );
    }

    #[test]
    fn test_cached_image_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BootImageCache {
            path: dir.path().join("boot2docker.iso"),
            release_index_url: "http://127.0.0.1:1/unreachable".into(),
            url_template: "http://127.0.0.1:1/{tag}.iso".into(),
        };
        std::fs::write(&cache.path, b"iso").unwrap();

        assert_eq!(cache.ensure().unwrap(), cache.path);
    }

    #[test]
    fn test_download_latest_release_into_cache() {
        let (base, server) = serve(vec![br#"[{"tag_name":"v9.9.9"}]"#, b"ISO-BYTES"]);
        let dir = tempfile::tempdir().unwrap();
        let cache = BootImageCache {
            path: dir.path().join("cache").join("boot2docker.iso"),
            release_index_url: format!("{}/releases", base),
            url_template: format!("{}/download/{{tag}}/boot2docker.iso", base),
        };

        let path = cache.ensure().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"ISO-BYTES");

        let paths = server.join().unwrap();
        assert_eq!(paths, vec!["/releases", "/download/v9.9.9/boot2docker.iso"]);

        // Only the final image remains; the temporary file was renamed.
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
