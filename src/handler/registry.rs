//! Ownership of handler instances and routing of URLs to them.

use std::any::Any;
use std::collections::BTreeSet;
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, info, warn};

use crate::error::{HandlerError, HandlerLoadError};

use super::builtin::BUILTIN_HANDLERS;
use super::pattern::{PatternRouter, UrlPattern};
use super::sideload::{HandlerLibrary, library_identity};
use super::traits::Handler;
use super::types::{HandlerDescriptor, HandlerId, RequestData, ResponseData};

struct RegisteredHandler {
    descriptor: HandlerDescriptor,
    patterns: Vec<UrlPattern>,
    output_dir: PathBuf,
    output_dir_ready: bool,
    // Declared before `library`: the handler's code lives in it.
    handler: Box<dyn Handler>,
    library: Option<Library>,
}

/// Handlers of one run, in registration order, and the router over their
/// patterns.
pub struct HandlerRegistry {
    output_root: PathBuf,
    handlers: Vec<RegisteredHandler>,
    router: PatternRouter,
    used: BTreeSet<HandlerId>,
}

impl HandlerRegistry {
    /// An empty registry. Handler output directories are nested under
    /// `output_root`.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            handlers: Vec::new(),
            router: PatternRouter::default(),
            used: BTreeSet::new(),
        }
    }

    /// A registry holding every built-in handler. Built-ins that fail to
    /// register are skipped.
    pub fn with_builtins(output_root: impl Into<PathBuf>) -> Self {
        let mut registry = Self::new(output_root);
        for (identity, factory) in BUILTIN_HANDLERS {
            if let Err(e) = registry.register(identity, *factory) {
                warn!(handler = %identity, error = %e, "Skipping built-in handler");
            }
        }
        registry
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Construct a handler into the output namespace `identity` and append it.
    pub fn register<F>(&mut self, identity: &str, factory: F) -> Result<HandlerId, HandlerLoadError>
    where
        F: FnOnce(&Path) -> Result<Box<dyn Handler>, HandlerError>,
    {
        let output_dir = self.output_root.join(identity);
        let handler = factory(&output_dir).map_err(|e| HandlerLoadError::Construct {
            identity: identity.to_string(),
            reason: e.to_string(),
        })?;
        self.insert(identity, output_dir, None, handler)
    }

    /// Load a handler from a dynamic library and append it.
    ///
    /// On failure nothing is registered and existing handlers are untouched.
    pub fn sideload(&mut self, path: &Path) -> Result<HandlerDescriptor, HandlerLoadError> {
        let loaded = HandlerLibrary::open(path)?;
        let identity = library_identity(path);
        let output_dir = self.output_root.join(&identity);
        let handler = loaded.create(&output_dir)?;

        let id = self.insert(&identity, output_dir, Some(loaded.into_library()), handler)?;
        let descriptor = self.handlers[id.0].descriptor.clone();
        info!(handler = %descriptor.name, path = %path.display(), "Sideloaded handler");
        Ok(descriptor)
    }

    fn insert(
        &mut self,
        identity: &str,
        output_dir: PathBuf,
        // Parameters drop in reverse order: on rejection `handler` goes
        // before the library holding its code.
        library: Option<Library>,
        handler: Box<dyn Handler>,
    ) -> Result<HandlerId, HandlerLoadError> {
        if self.handlers.iter().any(|h| h.output_dir == output_dir) {
            return Err(HandlerLoadError::DuplicateOutputDir {
                identity: identity.to_string(),
                path: output_dir,
            });
        }

        let descriptor = handler.describe();
        if descriptor.name.trim().is_empty() {
            return Err(HandlerLoadError::InvalidDescriptor {
                identity: identity.to_string(),
                reason: "empty name".to_string(),
            });
        }
        if self.find(&descriptor.name).is_some() {
            return Err(HandlerLoadError::DuplicateName {
                name: descriptor.name,
            });
        }

        let declared = handler.declare_patterns();
        if declared.is_empty() {
            return Err(HandlerLoadError::InvalidDescriptor {
                identity: identity.to_string(),
                reason: "no URL patterns declared".to_string(),
            });
        }
        let patterns = declared
            .iter()
            .map(|raw| {
                raw.parse::<UrlPattern>()
                    .map_err(|source| HandlerLoadError::InvalidPattern {
                        handler: descriptor.name.clone(),
                        pattern: raw.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let id = HandlerId(self.handlers.len());
        debug!(handler = %descriptor.name, patterns = patterns.len(), "Registered handler");
        self.handlers.push(RegisteredHandler {
            descriptor,
            patterns,
            output_dir,
            output_dir_ready: false,
            handler,
            library,
        });
        self.rebuild_router();
        Ok(id)
    }

    fn rebuild_router(&mut self) {
        self.router = PatternRouter::build(
            self.handlers
                .iter()
                .enumerate()
                .map(|(i, h)| (HandlerId(i), h.patterns.as_slice())),
        );
    }

    /// Handler registered under `name` (exact match).
    pub fn find(&self, name: &str) -> Option<HandlerId> {
        self.handlers
            .iter()
            .position(|h| h.descriptor.name == name)
            .map(HandlerId)
    }

    pub fn resolve(&self, url: &str, restrict_to: Option<HandlerId>) -> Option<HandlerId> {
        self.router.resolve(url, restrict_to)
    }

    pub fn router(&self) -> &PatternRouter {
        &self.router
    }

    pub fn descriptor(&self, id: HandlerId) -> Option<&HandlerDescriptor> {
        self.handlers.get(id.0).map(|h| &h.descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &HandlerDescriptor> {
        self.handlers.iter().map(|h| &h.descriptor)
    }

    pub fn output_dir(&self, id: HandlerId) -> Option<&Path> {
        self.handlers.get(id.0).map(|h| h.output_dir.as_path())
    }

    /// Whether `id` came from a dynamic library.
    pub fn is_sideloaded(&self, id: HandlerId) -> bool {
        self.handlers.get(id.0).is_some_and(|h| h.library.is_some())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Names of handlers that have received at least one pair and are
    /// awaiting finalisation, in registry order.
    pub fn used(&self) -> Vec<&str> {
        self.used
            .iter()
            .filter_map(|id| self.descriptor(*id))
            .map(|d| d.name.as_str())
            .collect()
    }

    /// Hand one pair to handler `id`.
    ///
    /// The handler's output directory is created before its first call. The
    /// handler counts as used once `extract` has been entered, whatever the
    /// outcome.
    pub fn dispatch(
        &mut self,
        id: HandlerId,
        request: &RequestData,
        response: &ResponseData,
    ) -> Result<(), HandlerError> {
        let Some(entry) = self.handlers.get_mut(id.0) else {
            return Err(HandlerError::Extract(format!("no handler registered as #{}", id.0)));
        };

        if !entry.output_dir_ready {
            fs::create_dir_all(&entry.output_dir)?;
            entry.output_dir_ready = true;
        }

        self.used.insert(id);
        let handler = &mut entry.handler;
        catch_unwind(AssertUnwindSafe(|| handler.extract(request, response)))
            .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))))
    }

    /// Finalise every used handler once, in registry order, and clear the
    /// used set. A failing handler does not stop the others.
    pub fn finalise_used(&mut self) -> Vec<(HandlerId, HandlerError)> {
        let used = std::mem::take(&mut self.used);
        let mut failures = Vec::new();
        for id in used {
            let Some(entry) = self.handlers.get_mut(id.0) else {
                continue;
            };
            let handler = &mut entry.handler;
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.finalise()))
                .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))));
            match outcome {
                Ok(()) => debug!(handler = %entry.descriptor.name, "Finalised handler"),
                Err(e) => failures.push((id, e)),
            }
        }
        failures
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
