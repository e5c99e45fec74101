//! Request/response correlation within one archive unit.
//!
//! A unit is scanned twice. The first pass keeps only request records whose
//! URL resolves to a handler, so memory is bounded by the claimed subset of
//! the traffic. The second pass reads the bodies of the responses those
//! requests correlate with. Responses may precede their requests in the
//! stream, which is why the passes cannot be merged.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ContainerError, RecordParseError};
use crate::handler::{HandlerId, PatternRouter, QueryParams, RequestData, ResponseData};
use crate::warc::http::{parse_request, parse_response};
use crate::warc::{self, HeaderMap, RecordHeader, RecordType, WarcReader};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// One request/response exchange claimed by a handler.
#[derive(Debug, Clone)]
pub struct Pair {
    pub request: RequestData,
    pub response: ResponseData,
    pub handler: HandlerId,
}

/// Record counts of one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairingStats {
    pub requests: usize,
    pub responses: usize,
    /// Requests claimed by a handler.
    pub retained: usize,
    pub pairs: usize,
    /// Malformed records passed over.
    pub skipped: usize,
}

/// Pairs of one unit, in the order their requests appear in it.
#[derive(Debug, Default)]
pub struct PairedUnit {
    pub pairs: Vec<Pair>,
    pub stats: PairingStats,
}

/// Request kept by the first pass.
struct RetainedRequest {
    own_id: String,
    concurrent_to: Option<String>,
    url: String,
    method: String,
    headers: HeaderMap,
    post_data: Option<Value>,
    timestamp: String,
    handler: HandlerId,
}

pub struct RecordPairer<'a> {
    router: &'a PatternRouter,
    restrict_to: Option<HandlerId>,
}

impl<'a> RecordPairer<'a> {
    pub fn new(router: &'a PatternRouter, restrict_to: Option<HandlerId>) -> Self {
        Self {
            router,
            restrict_to,
        }
    }

    /// Pair the records of the materialized unit at `path`.
    pub fn pair_unit(&self, path: &Path) -> Result<PairedUnit, ContainerError> {
        let mut stats = PairingStats::default();

        let retained = self.collect_requests(warc::open_unit(path)?, &mut stats);
        stats.retained = retained.len();
        if retained.is_empty() {
            log_stats(path, &stats);
            return Ok(PairedUnit {
                pairs: Vec::new(),
                stats,
            });
        }

        let responses = collect_responses(warc::open_unit(path)?, &retained, &mut stats);

        let pairs: Vec<Pair> = retained
            .into_iter()
            .zip(responses)
            .filter_map(|(request, response)| Some(build_pair(request, response?)))
            .collect();
        stats.pairs = pairs.len();
        log_stats(path, &stats);

        Ok(PairedUnit { pairs, stats })
    }

    fn collect_requests<R: BufRead>(
        &self,
        mut reader: WarcReader<R>,
        stats: &mut PairingStats,
    ) -> Vec<RetainedRequest> {
        let mut retained = Vec::new();
        while let Some(header) = next_record(&mut reader, stats) {
            if *header.record_type() != RecordType::Request {
                continue;
            }
            stats.requests += 1;

            let (Some(url), Some(own_id)) = (header.target_uri(), header.record_id()) else {
                debug!("Skipping request record without target URI or record id");
                stats.skipped += 1;
                continue;
            };
            let Some(handler) = self.router.resolve(url, self.restrict_to) else {
                continue;
            };

            let http = match reader.read_block().and_then(|block| parse_request(&block)) {
                Ok(http) => http,
                Err(e) => {
                    debug!(url, error = %e, "Skipping unparseable request");
                    stats.skipped += 1;
                    continue;
                }
            };

            let mut headers = http.headers;
            let content_type = headers.get("Content-Type").unwrap_or_default().to_string();
            headers.remove("Content-Length");
            let post_data = if http.method == "POST" {
                parse_post_data(&content_type, &http.body)
            } else {
                None
            };

            retained.push(RetainedRequest {
                own_id: own_id.to_string(),
                concurrent_to: header.concurrent_to().next().map(str::to_string),
                url: url.to_string(),
                method: http.method,
                headers,
                post_data,
                timestamp: header.date().unwrap_or_default().to_string(),
                handler,
            });
        }
        retained
    }
}

/// Responses for `retained`, by index. A later correlating response
/// replaces an earlier one.
fn collect_responses<R: BufRead>(
    mut reader: WarcReader<R>,
    retained: &[RetainedRequest],
    stats: &mut PairingStats,
) -> Vec<Option<ResponseData>> {
    // The response's own id names the request's Concurrent-To, or the
    // response's Concurrent-To names the request's own id.
    let mut by_concurrent: HashMap<&str, usize> = HashMap::new();
    let mut by_own_id: HashMap<&str, usize> = HashMap::new();
    for (index, request) in retained.iter().enumerate() {
        if let Some(concurrent) = request.concurrent_to.as_deref() {
            by_concurrent.entry(concurrent).or_insert(index);
        }
        by_own_id.entry(request.own_id.as_str()).or_insert(index);
    }

    let mut responses: Vec<Option<ResponseData>> = vec![None; retained.len()];
    while let Some(header) = next_record(&mut reader, stats) {
        if *header.record_type() != RecordType::Response {
            continue;
        }
        stats.responses += 1;

        let index = header
            .record_id()
            .and_then(|id| by_concurrent.get(id))
            .or_else(|| header.concurrent_to().find_map(|id| by_own_id.get(id)))
            .copied();
        let Some(index) = index else {
            continue;
        };

        match reader.read_block().and_then(|block| parse_response(&block)) {
            Ok(http) => {
                let content_length = http
                    .headers
                    .get("Content-Length")
                    .and_then(|len| len.trim().parse().ok());
                responses[index] = Some(ResponseData {
                    content: http.decoded_body(),
                    content_type: http.headers.get("Content-Type").unwrap_or_default().to_string(),
                    content_length,
                    status_code: Some(http.status),
                });
            }
            Err(e) => {
                debug!(url = %retained[index].url, error = %e, "Skipping unparseable response");
                stats.skipped += 1;
            }
        }
    }
    responses
}

/// Next well-formed record header. Malformed records are counted and
/// skipped; an I/O error ends the unit.
fn next_record<R: BufRead>(reader: &mut WarcReader<R>, stats: &mut PairingStats) -> Option<RecordHeader> {
    loop {
        match reader.next_header()? {
            Ok(header) => return Some(header),
            Err(RecordParseError::Io(e)) => {
                warn!(error = %e, "Unit unreadable past this point");
                return None;
            }
            Err(e) => {
                debug!(error = %e, "Skipping malformed record");
                stats.skipped += 1;
            }
        }
    }
}

fn build_pair(request: RetainedRequest, response: ResponseData) -> Pair {
    let request_data = RequestData {
        query_data: QueryParams::from_url(&request.url),
        url: request.url,
        method: request.method,
        headers: request.headers,
        post_data: request.post_data,
        response_type: response.content_type.clone(),
        content_length: response.content_length,
        timestamp: request.timestamp,
        status_code: response.status_code,
    };
    Pair {
        request: request_data,
        response,
        handler: request.handler,
    }
}

/// Body of a form or JSON POST. Other or unparseable bodies yield nothing.
fn parse_post_data(content_type: &str, body: &[u8]) -> Option<Value> {
    let content_type = content_type.to_ascii_lowercase();
    let text = std::str::from_utf8(body).ok()?;
    if content_type.starts_with(FORM_CONTENT_TYPE) {
        Some(QueryParams::parse(text).to_json())
    } else if content_type.contains("json") {
        serde_json::from_str(text).ok()
    } else {
        None
    }
}

fn log_stats(path: &Path, stats: &PairingStats) {
    let unit = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!(
        unit = %unit,
        requests = stats.requests,
        responses = stats.responses,
        retained = stats.retained,
        pairs = stats.pairs,
        skipped = stats.skipped,
        "Paired archive unit"
    );
}
