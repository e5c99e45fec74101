//! Loading handlers from dynamic libraries.
//!
//! A handler library is a `cdylib`/`dylib` built against the same version of
//! this crate with the same compiler, exporting two symbols (see
//! [`export_handler!`](crate::export_handler)):
//!
//! - `warcex_handler_abi`: a `u32` equal to [`HANDLER_ABI_VERSION`]
//! - `warcex_handler_create`: a [`HandlerCreateFn`]

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use crate::error::{HandlerError, HandlerLoadError};

use super::traits::Handler;

/// Bumped whenever [`Handler`] or the types it exchanges change shape.
pub const HANDLER_ABI_VERSION: u32 = 1;

pub const ABI_SYMBOL: &str = "warcex_handler_abi";
pub const CREATE_SYMBOL: &str = "warcex_handler_create";

/// Constructor exported by handler libraries. Receives the handler's
/// output directory.
pub type HandlerCreateFn = fn(&Path) -> Result<Box<dyn Handler>, HandlerError>;

/// A loaded library and its constructor.
pub(crate) struct HandlerLibrary {
    path: PathBuf,
    library: Library,
}

impl HandlerLibrary {
    /// Load `path` and check it speaks this crate's handler ABI.
    pub fn open(path: &Path) -> Result<Self, HandlerLoadError> {
        if !path.is_file() {
            return Err(HandlerLoadError::NotFound {
                path: path.to_path_buf(),
            });
        }

        // SAFETY: loading runs the library's initialisers; handler libraries
        // are trusted input chosen by the operator.
        let library = unsafe { Library::new(path) }.map_err(|e| HandlerLoadError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let found = {
            // SAFETY: the symbol is declared as a `u32` static by `export_handler!`.
            let abi: Symbol<*const u32> = unsafe { library.get(ABI_SYMBOL.as_bytes()) }
                .map_err(|_| HandlerLoadError::MissingEntryPoint {
                    path: path.to_path_buf(),
                    symbol: ABI_SYMBOL,
                })?;
            // SAFETY: points at a static that lives as long as `library`.
            unsafe { **abi }
        };
        if found != HANDLER_ABI_VERSION {
            return Err(HandlerLoadError::AbiMismatch {
                path: path.to_path_buf(),
                expected: HANDLER_ABI_VERSION,
                found,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            library,
        })
    }

    pub fn create(&self, output_dir: &Path) -> Result<Box<dyn Handler>, HandlerLoadError> {
        // SAFETY: the ABI version check guarantees the symbol has the
        // `HandlerCreateFn` signature.
        let create: Symbol<HandlerCreateFn> = unsafe { self.library.get(CREATE_SYMBOL.as_bytes()) }
            .map_err(|_| HandlerLoadError::MissingEntryPoint {
                path: self.path.clone(),
                symbol: CREATE_SYMBOL,
            })?;

        create(output_dir).map_err(|e| HandlerLoadError::Construct {
            identity: library_identity(&self.path),
            reason: e.to_string(),
        })
    }

    pub fn into_library(self) -> Library {
        self.library
    }
}

/// Output namespace of a sideloaded handler: the library file stem without
/// the platform's `lib` prefix.
pub(crate) fn library_identity(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "handler".to_string());
    match stem.strip_prefix("lib") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => stem,
    }
}

/// Export a handler constructor from a handler library.
///
/// ```ignore
/// struct MyHandler { /* ... */ }
/// impl warcex::Handler for MyHandler { /* ... */ }
///
/// fn create(output_dir: &std::path::Path) -> Result<MyHandler, warcex::HandlerError> {
///     Ok(MyHandler::new(output_dir))
/// }
///
/// warcex::export_handler!(create);
/// ```
#[macro_export]
macro_rules! export_handler {
    ($create:path) => {
        #[unsafe(no_mangle)]
        #[allow(non_upper_case_globals)]
        pub static warcex_handler_abi: u32 = $crate::handler::HANDLER_ABI_VERSION;

        #[unsafe(no_mangle)]
        pub fn warcex_handler_create(
            output_dir: &::std::path::Path,
        ) -> ::std::result::Result<
            ::std::boxed::Box<dyn $crate::handler::Handler>,
            $crate::error::HandlerError,
        > {
            $create(output_dir)
                .map(|handler| ::std::boxed::Box::new(handler) as ::std::boxed::Box<dyn $crate::handler::Handler>)
        }
    };
}
