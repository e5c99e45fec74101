//! End-to-end extraction runs over WACZ fixtures.

mod common;

use std::path::Path;
use std::sync::{Arc, Mutex};

use common::{Member, get_request, gzip_records, gzip_response, post_request, response, write_wacz};
use serde_json::Value;
use tempfile::TempDir;
use warcex::{
    ContainerError, FailureStage, Handler, HandlerDescriptor, HandlerError, HandlerRegistry,
    ProcessorOptions, RequestData, ResponseData, WaczArchive, WaczProcessor,
};

type Log = Arc<Mutex<Vec<String>>>;

/// Records every call it receives into a shared log.
struct Recorder {
    name: &'static str,
    patterns: Vec<String>,
    log: Log,
    fail_on: Option<&'static str>,
    fail_finalise: bool,
}

impl Recorder {
    fn new(name: &'static str, patterns: &[&str], log: &Log) -> Self {
        Self {
            name,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            log: Arc::clone(log),
            fail_on: None,
            fail_finalise: false,
        }
    }
}

impl Handler for Recorder {
    fn describe(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            name: self.name.to_string(),
            version: 1,
            description: format!("records calls for {}", self.name),
            instructions: None,
            output_data: Vec::new(),
        }
    }

    fn declare_patterns(&self) -> Vec<String> {
        self.patterns.clone()
    }

    fn extract(&mut self, request: &RequestData, response: &ResponseData) -> Result<(), HandlerError> {
        self.log.lock().unwrap().push(format!(
            "{}:extract:{}:{}",
            self.name,
            request.url,
            response.text()
        ));
        if self.fail_on.is_some_and(|url| url == request.url) {
            return Err(HandlerError::Extract("refusing this one".into()));
        }
        Ok(())
    }

    fn finalise(&mut self) -> Result<(), HandlerError> {
        self.log.lock().unwrap().push(format!("{}:finalise", self.name));
        if self.fail_finalise {
            return Err(HandlerError::Finalise("disk full".into()));
        }
        Ok(())
    }
}

fn register(registry: &mut HandlerRegistry, recorder: Recorder) {
    let identity = recorder.name;
    registry
        .register(identity, move |_: &Path| Ok(Box::new(recorder) as Box<dyn Handler>))
        .unwrap();
}

fn unit(records: &[Vec<u8>]) -> Vec<u8> {
    records.concat()
}

async fn processor(
    wacz: &Path,
    registry: HandlerRegistry,
    only: Option<&str>,
) -> WaczProcessor<warcex::LocalFileReader> {
    let archive = WaczArchive::open(wacz).await.unwrap();
    WaczProcessor::with_registry(archive, registry, only.map(str::to_string))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn routes_pairs_and_finalises_after_the_last_extract() {
    let dir = TempDir::new().unwrap();
    let wacz = write_wacz(
        dir.path(),
        "capture.wacz",
        &[
            Member::stored("datapackage.json", "{}"),
            Member::deflated(
                "archive/data.warc",
                unit(&[
                    get_request("<urn:q1>", "https://a.com/api/1", "<urn:r1>"),
                    response("<urn:r1>", "https://a.com/api/1", "text/plain", b"one"),
                    get_request("<urn:q2>", "https://b.com/", "<urn:r2>"),
                    response("<urn:r2>", "https://b.com/", "text/plain", b"unclaimed"),
                    get_request("<urn:q3>", "https://a.com/api/2", "<urn:r3>"),
                    response("<urn:r3>", "https://a.com/api/2", "text/plain", b"two"),
                ]),
            ),
        ],
    );

    let log = Log::default();
    let out = TempDir::new().unwrap();
    let mut registry = HandlerRegistry::new(out.path());
    register(&mut registry, Recorder::new("alpha", &["https://a.com/api/*"], &log));
    register(&mut registry, Recorder::new("idle", &["https://never.example/*"], &log));

    let mut processor = processor(&wacz, registry, None).await;
    let result = processor.run().await.unwrap();

    assert_eq!(result.total_processed, 2);
    assert_eq!(result.handler_counts.get("alpha"), Some(&2));
    assert!(!result.handler_counts.contains_key("idle"));
    assert!(result.failures.is_empty());
    assert_eq!(
        entries(&log),
        vec![
            "alpha:extract:https://a.com/api/1:one",
            "alpha:extract:https://a.com/api/2:two",
            "alpha:finalise",
        ]
    );

    assert!(out.path().join("alpha").is_dir());
    assert!(!out.path().join("idle").exists());
    processor.close().unwrap();
}

#[tokio::test]
async fn first_registered_pattern_wins() {
    let dir = TempDir::new().unwrap();
    let wacz = write_wacz(
        dir.path(),
        "capture.wacz",
        &[Member::stored(
            "archive/data.warc",
            unit(&[
                get_request("<urn:q1>", "https://a.com/api/special", "<urn:r1>"),
                response("<urn:r1>", "https://a.com/api/special", "text/plain", b"x"),
            ]),
        )],
    );

    let log = Log::default();
    let out = TempDir::new().unwrap();
    let mut registry = HandlerRegistry::new(out.path());
    register(&mut registry, Recorder::new("broad", &["https://a.com/*"], &log));
    register(&mut registry, Recorder::new("narrow", &["https://a.com/api/special"], &log));

    let result = processor(&wacz, registry, None).await.run().await.unwrap();
    assert_eq!(result.handler_counts.get("broad"), Some(&1));
    assert!(!result.handler_counts.contains_key("narrow"));
}

#[tokio::test]
async fn only_restricts_routing_to_one_handler() {
    let dir = TempDir::new().unwrap();
    let wacz = write_wacz(
        dir.path(),
        "capture.wacz",
        &[Member::stored(
            "archive/data.warc",
            unit(&[
                get_request("<urn:q1>", "https://a.com/api/special", "<urn:r1>"),
                response("<urn:r1>", "https://a.com/api/special", "text/plain", b"x"),
                get_request("<urn:q2>", "https://a.com/other", "<urn:r2>"),
                response("<urn:r2>", "https://a.com/other", "text/plain", b"y"),
            ]),
        )],
    );

    let log = Log::default();
    let out = TempDir::new().unwrap();
    let mut registry = HandlerRegistry::new(out.path());
    register(&mut registry, Recorder::new("broad", &["https://a.com/*"], &log));
    register(&mut registry, Recorder::new("narrow", &["https://a.com/api/special"], &log));

    let result = processor(&wacz, registry, Some("narrow")).await.run().await.unwrap();
    assert_eq!(result.total_processed, 1);
    assert_eq!(result.handler_counts.get("narrow"), Some(&1));
    assert_eq!(
        entries(&log),
        vec!["narrow:extract:https://a.com/api/special:x", "narrow:finalise"]
    );
}

#[tokio::test]
async fn unknown_only_name_extracts_nothing() {
    let dir = TempDir::new().unwrap();
    let wacz = write_wacz(
        dir.path(),
        "capture.wacz",
        &[Member::stored(
            "archive/data.warc",
            unit(&[
                get_request("<urn:q1>", "https://a.com/1", "<urn:r1>"),
                response("<urn:r1>", "https://a.com/1", "text/plain", b"x"),
            ]),
        )],
    );

    let log = Log::default();
    let out = TempDir::new().unwrap();
    let mut registry = HandlerRegistry::new(out.path());
    register(&mut registry, Recorder::new("broad", &["https://a.com/*"], &log));

    let result = processor(&wacz, registry, Some("missing")).await.run().await.unwrap();
    assert_eq!(result.total_processed, 0);
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn handler_failures_do_not_stop_the_run() {
    let dir = TempDir::new().unwrap();
    let wacz = write_wacz(
        dir.path(),
        "capture.wacz",
        &[Member::stored(
            "archive/data.warc",
            unit(&[
                get_request("<urn:q1>", "https://a.com/bad", "<urn:r1>"),
                response("<urn:r1>", "https://a.com/bad", "text/plain", b"1"),
                get_request("<urn:q2>", "https://a.com/good", "<urn:r2>"),
                response("<urn:r2>", "https://a.com/good", "text/plain", b"2"),
                get_request("<urn:q3>", "https://b.com/x", "<urn:r3>"),
                response("<urn:r3>", "https://b.com/x", "text/plain", b"3"),
            ]),
        )],
    );

    let log = Log::default();
    let out = TempDir::new().unwrap();
    let mut registry = HandlerRegistry::new(out.path());
    let mut flaky = Recorder::new("flaky", &["https://a.com/*"], &log);
    flaky.fail_on = Some("https://a.com/bad");
    flaky.fail_finalise = true;
    register(&mut registry, flaky);
    register(&mut registry, Recorder::new("steady", &["https://b.com/*"], &log));

    let result = processor(&wacz, registry, None).await.run().await.unwrap();

    assert_eq!(result.total_processed, 2);
    assert_eq!(result.handler_counts.get("flaky"), Some(&1));
    assert_eq!(result.handler_counts.get("steady"), Some(&1));

    assert_eq!(result.failures.len(), 2);
    assert_eq!(result.failures[0].handler, "flaky");
    assert_eq!(result.failures[0].stage, FailureStage::Extract);
    assert_eq!(result.failures[0].url.as_deref(), Some("https://a.com/bad"));
    assert_eq!(result.failures[1].stage, FailureStage::Finalise);
    assert_eq!(result.failures[1].url, None);

    let log = entries(&log);
    let finalised: Vec<&String> = log.iter().filter(|e| e.ends_with(":finalise")).collect();
    assert_eq!(finalised, vec!["flaky:finalise", "steady:finalise"]);
}

#[tokio::test]
async fn handler_that_only_failed_is_still_finalised() {
    let dir = TempDir::new().unwrap();
    let wacz = write_wacz(
        dir.path(),
        "capture.wacz",
        &[Member::stored(
            "archive/data.warc",
            unit(&[
                get_request("<urn:q1>", "https://a.com/bad", "<urn:r1>"),
                response("<urn:r1>", "https://a.com/bad", "text/plain", b"1"),
            ]),
        )],
    );

    let log = Log::default();
    let out = TempDir::new().unwrap();
    let mut registry = HandlerRegistry::new(out.path());
    let mut flaky = Recorder::new("flaky", &["https://a.com/*"], &log);
    flaky.fail_on = Some("https://a.com/bad");
    register(&mut registry, flaky);

    let result = processor(&wacz, registry, None).await.run().await.unwrap();
    assert_eq!(result.total_processed, 0);
    assert!(result.handler_counts.is_empty());
    assert_eq!(entries(&log).last().map(String::as_str), Some("flaky:finalise"));
}

#[tokio::test]
async fn units_are_processed_in_stored_order() {
    let dir = TempDir::new().unwrap();
    let wacz = write_wacz(
        dir.path(),
        "capture.wacz",
        &[
            Member::stored(
                "archive/z-first.warc.gz",
                gzip_records(&[
                    get_request("<urn:q1>", "https://a.com/1", "<urn:r1>"),
                    gzip_response("<urn:r1>", "https://a.com/1", b"{\"n\":1}"),
                ]),
            ),
            Member::stored("indexes/index.cdx", "ignored"),
            Member::deflated(
                "archive/a-second.warc",
                unit(&[
                    get_request("<urn:q2>", "https://a.com/2", "<urn:r2>"),
                    response("<urn:r2>", "https://a.com/2", "application/json", b"{\"n\":2}"),
                ]),
            ),
        ],
    );

    let log = Log::default();
    let out = TempDir::new().unwrap();
    let mut registry = HandlerRegistry::new(out.path());
    register(&mut registry, Recorder::new("alpha", &["https://a.com/*"], &log));

    let result = processor(&wacz, registry, None).await.run().await.unwrap();
    assert_eq!(result.total_processed, 2);
    assert_eq!(
        entries(&log),
        vec![
            "alpha:extract:https://a.com/1:{\"n\":1}",
            "alpha:extract:https://a.com/2:{\"n\":2}",
            "alpha:finalise",
        ]
    );
}

#[tokio::test]
async fn archive_failure_mid_run_finalises_and_releases_scratch() {
    let dir = TempDir::new().unwrap();
    let wacz = write_wacz(
        dir.path(),
        "capture.wacz",
        &[
            Member::stored(
                "archive/1.warc",
                unit(&[
                    get_request("<urn:q1>", "https://a.com/1", "<urn:r1>"),
                    response("<urn:r1>", "https://a.com/1", "text/plain", b"ok"),
                ]),
            ),
            Member::stored("archive/2.warc", "corrupted").with_corrupt_crc(),
        ],
    );

    let log = Log::default();
    let out = TempDir::new().unwrap();
    let mut registry = HandlerRegistry::new(out.path());
    register(&mut registry, Recorder::new("alpha", &["https://a.com/*"], &log));

    let mut processor = processor(&wacz, registry, None).await;
    let scratch = processor.archive().scratch_dir().unwrap().to_path_buf();

    let err = processor.run().await.unwrap_err();
    assert!(matches!(err, ContainerError::Extraction { ref member, .. } if member == "archive/2.warc"));
    assert_eq!(
        entries(&log),
        vec!["alpha:extract:https://a.com/1:ok", "alpha:finalise"]
    );
    assert!(!scratch.exists());
    assert!(!processor.archive().is_open());
    processor.close().unwrap();
}

#[tokio::test]
async fn open_reports_missing_archive_and_handler() {
    let dir = TempDir::new().unwrap();
    let err = WaczProcessor::open(&dir.path().join("missing.wacz"), ProcessorOptions::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, warcex::ProcessorError::Container(ContainerError::NotFound { .. })));

    let wacz = write_wacz(dir.path(), "capture.wacz", &[Member::stored("archive/a.warc", "")]);
    let options = ProcessorOptions {
        output_root: dir.path().join("out"),
        extra_handlers: vec![dir.path().join("libmissing.so")],
        only: None,
    };
    let err = WaczProcessor::open(&wacz, options).await.err().unwrap();
    assert!(matches!(
        err,
        warcex::ProcessorError::HandlerLoad(warcex::HandlerLoadError::NotFound { .. })
    ));
}

#[tokio::test]
async fn builtin_facebook_groups_handler_writes_its_dump() {
    let dir = TempDir::new().unwrap();
    let graphql = "https://www.facebook.com/api/graphql/";
    let wacz = write_wacz(
        dir.path(),
        "capture.wacz",
        &[Member::deflated(
            "archive/data.warc",
            unit(&[
                post_request(
                    "<urn:q1>",
                    graphql,
                    "<urn:r1>",
                    "application/x-www-form-urlencoded",
                    "doc_id=123&variables=%7B%7D",
                ),
                response("<urn:r1>", graphql, "text/html", b"{\"data\":{\"node\":1}}\n{\"label\":\"x\"}"),
                post_request("<urn:q2>", graphql, "<urn:r2>", "application/json", "{\"q\":1}"),
                response("<urn:r2>", graphql, "text/html", b"<html>login</html>"),
            ]),
        )],
    );

    let out = dir.path().join("out");
    let options = ProcessorOptions {
        output_root: out.clone(),
        ..Default::default()
    };
    let mut processor = WaczProcessor::open(&wacz, options).await.unwrap();
    let result = processor.run().await.unwrap();
    processor.close().unwrap();

    assert_eq!(result.total_processed, 2);
    assert_eq!(result.handler_counts.get("fb-groups"), Some(&2));

    let handler_dir = out.join("FacebookGroupsPlugin");
    let dump: Value =
        serde_json::from_slice(&std::fs::read(handler_dir.join("data_pairs.json")).unwrap()).unwrap();
    let pairs = dump.as_array().unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0]["response_count"], 2);
    assert_eq!(pairs[0]["request"]["post_data"]["doc_id"], "123");
    assert_eq!(pairs[0]["request"]["post_data"]["variables"], "{}");

    let raw = std::fs::read(handler_dir.join("bad_request_json_data.dat")).unwrap();
    assert_eq!(raw, b"<html>login</html>");
}

#[tokio::test]
async fn single_json_post_yields_one_pair() {
    let dir = TempDir::new().unwrap();
    let url = "https://example.com/api/x";
    let wacz = write_wacz(
        dir.path(),
        "capture.wacz",
        &[Member::stored(
            "archive/data.warc",
            unit(&[
                post_request("<urn:q1>", url, "<urn:r1>", "application/json", "{\"query\":\"x\"}"),
                response("<urn:r1>", url, "application/json", b"{\"a\":1}"),
            ]),
        )],
    );

    let log = Log::default();
    let out = TempDir::new().unwrap();
    let mut registry = HandlerRegistry::new(out.path());
    register(&mut registry, Recorder::new("api", &["https://example.com/api/*"], &log));

    let result = processor(&wacz, registry, None).await.run().await.unwrap();
    assert_eq!(result.total_processed, 1);
    assert_eq!(
        entries(&log),
        vec!["api:extract:https://example.com/api/x:{\"a\":1}", "api:finalise"]
    );
}

#[tokio::test]
async fn no_matching_handler_means_no_calls() {
    let dir = TempDir::new().unwrap();
    let url = "https://example.com/api/x";
    let wacz = write_wacz(
        dir.path(),
        "capture.wacz",
        &[Member::stored(
            "archive/data.warc",
            unit(&[
                post_request("<urn:q1>", url, "<urn:r1>", "application/json", "{}"),
                response("<urn:r1>", url, "application/json", b"{\"a\":1}"),
            ]),
        )],
    );

    let log = Log::default();
    let out = TempDir::new().unwrap();
    let mut registry = HandlerRegistry::new(out.path());
    register(&mut registry, Recorder::new("other", &["https://other.example/*"], &log));

    let result = processor(&wacz, registry, None).await.run().await.unwrap();
    assert_eq!(result.total_processed, 0);
    assert!(result.handler_counts.is_empty());
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn failed_sideload_leaves_existing_handlers_working() {
    let dir = TempDir::new().unwrap();
    let url = "https://example.com/api/x";
    let wacz = write_wacz(
        dir.path(),
        "capture.wacz",
        &[Member::stored(
            "archive/data.warc",
            unit(&[
                get_request("<urn:q1>", url, "<urn:r1>"),
                response("<urn:r1>", url, "text/plain", b"still here"),
            ]),
        )],
    );
    let bogus = dir.path().join("libnot_a_handler.so");
    std::fs::write(&bogus, "plain text, no symbols").unwrap();

    let log = Log::default();
    let out = TempDir::new().unwrap();
    let mut registry = HandlerRegistry::new(out.path());
    register(&mut registry, Recorder::new("api", &["https://example.com/api/*"], &log));

    assert!(registry.sideload(&bogus).is_err());
    assert_eq!(registry.len(), 1);

    let result = processor(&wacz, registry, None).await.run().await.unwrap();
    assert_eq!(result.total_processed, 1);
    assert_eq!(result.handler_counts.get("api"), Some(&1));
}
