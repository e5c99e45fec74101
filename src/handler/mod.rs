//! Content handlers: the contract, URL routing, the registry and loading
//! handlers from dynamic libraries.
//!
//! A handler claims URLs through patterns. Every pair whose request URL
//! resolves to a handler is passed to its [`Handler::extract`]; once the
//! archive is exhausted, every handler that received a pair is finalised.

pub mod builtin;
mod pattern;
mod registry;
mod sideload;
mod traits;
mod types;

pub use crate::error::HandlerError;
pub use pattern::{PatternEntry, PatternRouter, UrlPattern};
pub use registry::HandlerRegistry;
pub use sideload::{ABI_SYMBOL, CREATE_SYMBOL, HANDLER_ABI_VERSION, HandlerCreateFn};
pub use traits::Handler;
pub use types::{HandlerDescriptor, HandlerId, QueryParams, QueryValue, RequestData, ResponseData};
