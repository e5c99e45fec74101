//! Handlers compiled into the binary.

mod fb_groups;

use std::path::Path;

use crate::error::HandlerError;

use super::traits::Handler;

pub use fb_groups::FacebookGroupsHandler;

/// Constructor of a built-in handler; receives its output directory.
pub type BuiltinFactory = fn(&Path) -> Result<Box<dyn Handler>, HandlerError>;

/// Every built-in handler, keyed by the identity its output namespace is
/// derived from. Registration order is table order.
pub const BUILTIN_HANDLERS: &[(&str, BuiltinFactory)] = &[("FacebookGroupsPlugin", |dir| {
    Ok(Box::new(FacebookGroupsHandler::new(dir)))
})];
