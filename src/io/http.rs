use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::ReadAt;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRY: u32 = 10;

/// Reads a remote WACZ with HTTP Range requests, so only the central
/// directory and the members that get materialised are transferred.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
    max_retry: u32,
}

fn http_error(err: impl ToString) -> io::Error {
    io::Error::other(err.to_string())
}

impl HttpRangeReader {
    /// Probe the URL with a HEAD request for its size and Range support.
    pub async fn connect(url: &str) -> io::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(http_error)?;

        let resp = client.head(url).send().await.map_err(http_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{url} returned 404"),
            ));
        }
        if !resp.status().is_success() {
            return Err(http_error(format!("HEAD {url} failed: {}", resp.status())));
        }

        let accepts_ranges = resp
            .headers()
            .get(reqwest::header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("bytes"));
        if !accepts_ranges {
            return Err(http_error(format!("{url} does not support Range requests")));
        }

        let size = resp
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| http_error(format!("{url} did not return Content-Length")))?;

        debug!(url, size, "Remote archive probed");

        Ok(Self {
            client,
            url: url.to_string(),
            size,
            transferred_bytes: AtomicU64::new(0),
            max_retry: DEFAULT_MAX_RETRY,
        })
    }

    /// Total bytes received from the network so far.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let expected = (end - offset + 1) as usize;

        let mut received = 0;
        let mut retries = 0;

        while received < expected {
            let start = offset + received as u64;
            let result = self
                .client
                .get(&self.url)
                .header(reqwest::header::RANGE, format!("bytes={start}-{end}"))
                .send()
                .await;

            match result {
                Ok(resp) => {
                    if resp.status() != StatusCode::PARTIAL_CONTENT {
                        return Err(http_error(format!(
                            "ranged GET {} failed: {}",
                            self.url,
                            resp.status()
                        )));
                    }
                    let bytes = resp.bytes().await.map_err(http_error)?;
                    if bytes.is_empty() {
                        break;
                    }
                    let n = bytes.len().min(expected - received);
                    buf[received..received + n].copy_from_slice(&bytes[..n]);
                    received += n;
                    self.transferred_bytes.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retries += 1;
                    if retries >= self.max_retry {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("giving up on {} after {retries} retries", self.url),
                        ));
                    }
                    warn!(url = %self.url, retries, max = self.max_retry, error = %e, "Range request failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(retries))).await;
                }
                Err(e) => return Err(http_error(e)),
            }
        }

        Ok(received)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
