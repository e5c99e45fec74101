//! The extraction run: archive units → pairs → handlers.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::archive::WaczArchive;
use crate::error::{ContainerError, ProcessorError};
use crate::handler::{HandlerId, HandlerRegistry};
use crate::io::{HttpRangeReader, LocalFileReader, ReadAt};
use crate::pairer::RecordPairer;

/// How a processor is set up.
#[derive(Debug, Clone, Default)]
pub struct ProcessorOptions {
    /// Handler output directories are created under this directory.
    pub output_root: PathBuf,
    /// Handler libraries to sideload after the built-ins.
    pub extra_handlers: Vec<PathBuf>,
    /// Route pairs to this handler only.
    pub only: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Extract,
    Finalise,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Extract => f.write_str("extract"),
            FailureStage::Finalise => f.write_str("finalise"),
        }
    }
}

/// A handler call that failed. The run carried on.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerFailure {
    pub handler: String,
    pub stage: FailureStage,
    /// URL of the pair being extracted; `None` for finalisation.
    pub url: Option<String>,
    pub message: String,
}

/// Outcome of [`WaczProcessor::run`]. Counts include successful `extract`
/// calls only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionResult {
    pub total_processed: usize,
    pub handler_counts: BTreeMap<String, usize>,
    pub failures: Vec<HandlerFailure>,
}

/// An open archive together with the handlers that consume it.
pub struct WaczProcessor<R: ReadAt> {
    archive: WaczArchive<R>,
    registry: HandlerRegistry,
    only: Option<String>,
}

impl WaczProcessor<LocalFileReader> {
    /// Open a local archive with the built-in handlers plus
    /// `options.extra_handlers`.
    pub async fn open(path: &Path, options: ProcessorOptions) -> Result<Self, ProcessorError> {
        let archive = WaczArchive::open(path).await?;
        Self::assemble(archive, options)
    }
}

impl WaczProcessor<HttpRangeReader> {
    /// Open a remote archive, fetched with HTTP range requests.
    pub async fn open_url(url: &str, options: ProcessorOptions) -> Result<Self, ProcessorError> {
        let archive = WaczArchive::open_url(url).await?;
        Self::assemble(archive, options)
    }
}

impl<R: ReadAt> WaczProcessor<R> {
    fn assemble(archive: WaczArchive<R>, options: ProcessorOptions) -> Result<Self, ProcessorError> {
        let mut registry = HandlerRegistry::with_builtins(&options.output_root);
        for path in &options.extra_handlers {
            registry.sideload(path)?;
        }
        Ok(Self::with_registry(archive, registry, options.only))
    }

    /// A processor over a prepared registry.
    pub fn with_registry(archive: WaczArchive<R>, registry: HandlerRegistry, only: Option<String>) -> Self {
        if let Some(name) = &only
            && registry.find(name).is_none()
        {
            warn!(handler = %name, "No handler with this name; nothing will be extracted");
        }
        Self {
            archive,
            registry,
            only,
        }
    }

    pub fn archive(&self) -> &WaczArchive<R> {
        &self.archive
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.registry
    }

    /// Feed every claimed pair of every archive unit to its handler, then
    /// finalise the handlers that received pairs.
    ///
    /// Handler failures are recorded in the result and never abort the run.
    /// An archive failure finalises the handlers used so far, releases
    /// scratch storage and is returned.
    pub async fn run(&mut self) -> Result<ExtractionResult, ContainerError> {
        let mut result = ExtractionResult::default();

        let restrict_to = match &self.only {
            None => None,
            Some(name) => match self.registry.find(name) {
                Some(id) => Some(id),
                None => {
                    warn!(handler = %name, "Unknown handler; skipping extraction");
                    return Ok(result);
                }
            },
        };

        let units: Vec<String> = self
            .archive
            .list_units()
            .map(|unit| unit.path().to_string())
            .collect();
        info!(archive = %self.archive.source_name(), units = units.len(), "Extracting");

        for unit in &units {
            if let Err(e) = self.process_unit(unit, restrict_to, &mut result).await {
                self.finalise(&mut result);
                if let Err(close_error) = self.archive.close() {
                    warn!(error = %close_error, "Failed to release scratch storage");
                }
                return Err(e);
            }
        }

        self.finalise(&mut result);
        info!(total = result.total_processed, failures = result.failures.len(), "Extraction finished");
        for (handler, count) in &result.handler_counts {
            info!(handler = %handler, count, "Handler results");
        }
        Ok(result)
    }

    async fn process_unit(
        &mut self,
        unit: &str,
        restrict_to: Option<HandlerId>,
        result: &mut ExtractionResult,
    ) -> Result<(), ContainerError> {
        let path = self.archive.materialize(unit).await?;
        let paired = RecordPairer::new(self.registry.router(), restrict_to).pair_unit(&path)?;

        for pair in paired.pairs {
            let name = self.handler_name(pair.handler);
            match self.registry.dispatch(pair.handler, &pair.request, &pair.response) {
                Ok(()) => {
                    *result.handler_counts.entry(name).or_default() += 1;
                    result.total_processed += 1;
                }
                Err(e) => {
                    warn!(handler = %name, url = %pair.request.url, error = %e, "Handler failed to extract");
                    result.failures.push(HandlerFailure {
                        handler: name,
                        stage: FailureStage::Extract,
                        url: Some(pair.request.url),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn finalise(&mut self, result: &mut ExtractionResult) {
        for (id, e) in self.registry.finalise_used() {
            let name = self.handler_name(id);
            warn!(handler = %name, error = %e, "Handler failed to finalise");
            result.failures.push(HandlerFailure {
                handler: name,
                stage: FailureStage::Finalise,
                url: None,
                message: e.to_string(),
            });
        }
    }

    fn handler_name(&self, id: HandlerId) -> String {
        self.registry
            .descriptor(id)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| format!("#{}", id.index()))
    }

    /// Release scratch storage. Idempotent.
    pub fn close(&mut self) -> Result<(), ContainerError> {
        debug!(archive = %self.archive.source_name(), "Closing processor");
        self.archive.close()
    }
}
