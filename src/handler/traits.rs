use crate::error::HandlerError;

use super::types::{HandlerDescriptor, RequestData, ResponseData};

/// A content handler.
///
/// The core calls `extract` once per pair routed to the handler and
/// `finalise` exactly once after the handler's last `extract` of a run,
/// only if `extract` was called at all. Calls are never concurrent.
pub trait Handler: Send {
    fn describe(&self) -> HandlerDescriptor;

    /// URL patterns, in priority order:
    ///
    /// - `https://host/exact/url` matches that URL only
    /// - `https://host/api/*` matches every URL starting with the prefix
    /// - `/regex/` matches URLs the regular expression finds a match in
    fn declare_patterns(&self) -> Vec<String>;

    /// Process one request/response pair. May accumulate state.
    fn extract(&mut self, request: &RequestData, response: &ResponseData)
    -> Result<(), HandlerError>;

    /// Flush accumulated state.
    fn finalise(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }
}
