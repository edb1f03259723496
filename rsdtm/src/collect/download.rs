use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[cfg(feature = "indicatif")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::collect::global_variables::DOWNLOAD_CHUNK_SIZE;
use crate::commons::basic_functions::{ensure_dir, file_name_from_url};

#[cfg(feature = "indicatif")]
fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes:>10}/{total_bytes:10} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// A url the server answered with anything but 200 OK
#[derive(Debug, Clone)]
pub struct DownloadFailure {
    pub url: String,
    pub reason: String,
}

/// Outcome of a batch of downloads
#[derive(Debug, Default)]
pub struct DownloadReport {
    /// Local files, in request order
    pub saved: Vec<PathBuf>,
    pub failed: Vec<DownloadFailure>,
}

/// Result of a single request that reached the server
#[derive(Debug)]
pub enum Fetched {
    Saved(PathBuf),
    Rejected(StatusCode),
}

/// Streams raster tiles over HTTP into a directory, one file per url
pub struct Fetcher {
    client: Client,
    download_dir: PathBuf,
}

impl Fetcher {
    /// Blocking client without request timeout
    pub fn new(download_dir: PathBuf) -> Result<Self> {
        let client = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Fetcher {
            client,
            download_dir,
        })
    }

    pub fn get_download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Download every url in order. A url answered with a non-200 status is reported
    /// and skipped, any other error (transport, body, file system) aborts the batch.
    pub fn fetch_all(&self, urls: &[String]) -> Result<DownloadReport> {
        ensure_dir(&self.download_dir)?;

        let mut report = DownloadReport::default();
        for url in urls {
            info!("Downloading {}...", url);
            match self.fetch(url)? {
                Fetched::Saved(path) => {
                    info!("Saved {:?}", path);
                    report.saved.push(path);
                }
                Fetched::Rejected(status) => {
                    warn!("Failed to download {}: HTTP {}", url, status);
                    report.failed.push(DownloadFailure {
                        url: url.clone(),
                        reason: format!("HTTP {}", status),
                    });
                }
            }
        }

        info!(
            "Downloaded {} of {} tiles into {:?}",
            report.saved.len(),
            urls.len(),
            self.download_dir
        );
        Ok(report)
    }

    /// Download one url into the download directory, named after the url's last segment.
    /// Anything but 200 OK is rejected and leaves no file behind.
    pub fn fetch(&self, url: &str) -> Result<Fetched> {
        let file_name = file_name_from_url(url)
            .context(format!("Cannot derive a file name from url {}", url))?;
        let path = self.download_dir.join(file_name);

        let response = self
            .client
            .get(url)
            .send()
            .context(format!("Failed to send request to {}", url))?;

        if response.status() != StatusCode::OK {
            return Ok(Fetched::Rejected(response.status()));
        }

        write_in_chunks(response, &path)?;
        Ok(Fetched::Saved(path))
    }
}

/// Copy the response body to `path` in fixed size chunks.
/// A partially written file is removed when the copy fails.
fn write_in_chunks(mut response: Response, path: &Path) -> Result<()> {
    let mut file = File::create(path).context(format!("Failed to create file: {:?}", path))?;

    #[cfg(feature = "indicatif")]
    let download_pb = response.content_length().map(|len| {
        let pb = ProgressBar::new(len);
        pb.set_style(progress_style());
        pb.set_message(path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default());
        pb
    });

    let mut buffer = [0u8; DOWNLOAD_CHUNK_SIZE];
    let copied: Result<()> = loop {
        let n = match response.read(&mut buffer) {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => {
                break Err(e).context(format!("Failed to read response body for {:?}", path))
            }
        };
        if let Err(e) = file.write_all(&buffer[..n]) {
            break Err(e).context(format!("Failed to write file: {:?}", path));
        }

        #[cfg(feature = "indicatif")]
        if let Some(ref pb) = download_pb {
            pb.inc(n as u64);
        }
    };

    #[cfg(feature = "indicatif")]
    if let Some(pb) = download_pb {
        pb.finish_and_clear();
    }

    if copied.is_err() {
        drop(file);
        let _ = std::fs::remove_file(path);
    }
    copied
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    /// Minimal HTTP/1.1 server answering `requests` GETs from a path -> body table,
    /// 404 for unknown paths. Returns the base url.
    pub(crate) fn serve(routes: Vec<(&'static str, Vec<u8>)>, requests: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            for stream in listener.incoming().take(requests) {
                let mut stream = stream.unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut header = String::new();
                    reader.read_line(&mut header).unwrap();
                    if header == "\r\n" || header.is_empty() {
                        break;
                    }
                }

                let path = request_line.split_whitespace().nth(1).unwrap_or("/");
                let (status, body) = match routes.iter().find(|(p, _)| *p == path) {
                    Some((_, body)) => ("200 OK", body.clone()),
                    None => ("404 Not Found", b"not found".to_vec()),
                };
                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                stream.write_all(head.as_bytes()).unwrap();
                stream.write_all(&body).unwrap();
                stream.flush().unwrap();
            }
        });

        format!("http://{}", addr)
    }

    /// Server announcing `declared_len` bytes but closing after `body`
    fn serve_truncated(body: Vec<u8>, declared_len: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            if let Some(Ok(mut stream)) = listener.incoming().next() {
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                }
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    declared_len
                );
                stream.write_all(head.as_bytes()).unwrap();
                stream.write_all(&body).unwrap();
                stream.flush().unwrap();
            }
        });

        format!("http://{}", addr)
    }

    #[test]
    fn test_failed_url_is_skipped() {
        let body: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let base = serve(vec![("/tiles/A.tif", body.clone())], 2);

        let dir = tempfile::tempdir().unwrap();
        let download_dir = dir.path().join("download");
        let fetcher = Fetcher::new(download_dir.clone()).unwrap();

        let urls = vec![format!("{}/tiles/A.tif", base), format!("{}/tiles/B.tif", base)];
        let report = fetcher.fetch_all(&urls).unwrap();

        assert_eq!(report.saved, vec![download_dir.join("A.tif")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].url, urls[1]);
        assert!(report.failed[0].reason.contains("404"));

        assert_eq!(std::fs::read(download_dir.join("A.tif")).unwrap(), body);
        assert!(!download_dir.join("B.tif").exists());
    }

    #[test]
    fn test_unreachable_host_aborts() {
        // bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(dir.path().to_path_buf()).unwrap();

        assert!(fetcher
            .fetch_all(&[format!("http://127.0.0.1:{}/x.tif", port)])
            .is_err());
        assert!(!dir.path().join("x.tif").exists());
    }

    #[test]
    fn test_url_without_file_name_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(dir.path().to_path_buf()).unwrap();
        assert!(fetcher
            .fetch_all(&["http://127.0.0.1:1/tiles/".to_string()])
            .is_err());
    }

    #[test]
    fn test_interrupted_body_leaves_no_file() {
        let base = serve_truncated(vec![7u8; 3000], 10_000);
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(dir.path().to_path_buf()).unwrap();

        let err = fetcher.fetch_all(&[format!("{}/tiles/C.tif", base)]).unwrap_err();
        assert!(format!("{:#}", err).contains("C.tif"));
        assert!(!dir.path().join("C.tif").exists());
    }
}
