//! Handler library loaded by the sideload tests. Built as a `cdylib`; the
//! `wrong-abi`, `abi-only` and `no-entry` features produce broken variants.

use std::fs;
use std::path::{Path, PathBuf};

use warcex::{Handler, HandlerDescriptor, HandlerError, RequestData, ResponseData};

pub struct EchoHandler {
    output_dir: PathBuf,
    urls: Vec<String>,
}

impl Handler for EchoHandler {
    fn describe(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            name: "echo".to_string(),
            version: 3,
            description: "Writes the URL of every pair it receives.".to_string(),
            instructions: None,
            output_data: vec!["urls.txt".to_string()],
        }
    }

    fn declare_patterns(&self) -> Vec<String> {
        vec!["https://echo.test/*".to_string()]
    }

    fn extract(&mut self, request: &RequestData, _: &ResponseData) -> Result<(), HandlerError> {
        self.urls.push(request.url.clone());
        Ok(())
    }

    fn finalise(&mut self) -> Result<(), HandlerError> {
        fs::write(self.output_dir.join("urls.txt"), self.urls.join("\n"))?;
        Ok(())
    }
}

#[allow(dead_code)]
fn create(output_dir: &Path) -> Result<EchoHandler, HandlerError> {
    Ok(EchoHandler {
        output_dir: output_dir.to_path_buf(),
        urls: Vec::new(),
    })
}

#[cfg(not(any(feature = "wrong-abi", feature = "abi-only", feature = "no-entry")))]
warcex::export_handler!(create);

#[cfg(feature = "wrong-abi")]
#[unsafe(no_mangle)]
#[allow(non_upper_case_globals)]
pub static warcex_handler_abi: u32 = warcex::handler::HANDLER_ABI_VERSION + 1;

#[cfg(feature = "abi-only")]
#[unsafe(no_mangle)]
#[allow(non_upper_case_globals)]
pub static warcex_handler_abi: u32 = warcex::handler::HANDLER_ABI_VERSION;
