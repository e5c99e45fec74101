use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tracing::warn;

use crate::error::HandlerError;
use crate::handler::{Handler, HandlerDescriptor, RequestData, ResponseData};

const GRAPHQL_ENDPOINT: &str = "https://www.facebook.com/api/graphql/";
const DATA_PAIRS_FILE: &str = "data_pairs.json";
const BAD_JSON_FILE: &str = "bad_request_json_data.dat";

/// Collects Facebook Groups GraphQL traffic (posts and comments) and dumps
/// it as one JSON document.
pub struct FacebookGroupsHandler {
    output_dir: PathBuf,
    data_pairs: Vec<Value>,
}

impl FacebookGroupsHandler {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            data_pairs: Vec::new(),
        }
    }
}

impl Handler for FacebookGroupsHandler {
    fn describe(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            name: "fb-groups".to_string(),
            version: 1,
            description: "Facebook Groups Plugin fetches posts and comments.".to_string(),
            instructions: Some(
                "Visit the Facebook Groups page and scroll down to load more content. \
                 Click on the comments to open them up, and keep doing this if comments \
                 remain collapsed. Then move on to the next story and repeat the process. \
                 Once you have loaded all the content you want to extract, save the Web \
                 Archive file."
                    .to_string(),
            ),
            output_data: vec![DATA_PAIRS_FILE.to_string(), BAD_JSON_FILE.to_string()],
        }
    }

    fn declare_patterns(&self) -> Vec<String> {
        vec![GRAPHQL_ENDPOINT.to_string()]
    }

    fn extract(&mut self, request: &RequestData, response: &ResponseData) -> Result<(), HandlerError> {
        let Some(documents) = decode_json_documents(response.content()) else {
            warn!(url = %request.url, "GraphQL response is not JSON; keeping raw bytes");
            fs::write(self.output_dir.join(BAD_JSON_FILE), response.content())?;
            return Ok(());
        };

        self.data_pairs.push(json!({
            "request": request,
            "response_count": documents.len(),
            "response": documents,
        }));
        Ok(())
    }

    fn finalise(&mut self) -> Result<(), HandlerError> {
        let file = fs::File::create(self.output_dir.join(DATA_PAIRS_FILE))?;
        serde_json::to_writer_pretty(file, &self.data_pairs)?;
        Ok(())
    }
}

/// A body holding one JSON document, or JSON lines (GraphQL streams
/// deferred results that way). `None` if any part fails to parse.
fn decode_json_documents(bytes: &[u8]) -> Option<Vec<Value>> {
    if bytes.is_empty() {
        return None;
    }
    let text = std::str::from_utf8(bytes).ok()?;
    if let Ok(document) = serde_json::from_str(text) {
        return Some(vec![document]);
    }
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).ok())
        .collect()
}
