#[cfg(feature = "browser")]
pub mod browser_fetcher;
pub mod cleaners;
pub mod detector;
pub mod fetcher;
pub mod processor;

use std::sync::Arc;

#[cfg(feature = "browser")]
pub use browser_fetcher::BrowserFetcher;
pub use cleaners::{ReadabilityCleaner, WhitespaceCleaner, XssCleaner};
pub use detector::HeuristicDetector;
pub use fetcher::ReqwestFetcher;
pub use processor::{HtmlProcessor, PlainTextProcessor};

use sluice_core::error::AppError;
use sluice_core::pipeline::PipelineComponents;

/// Register the built-in HTTP fetcher, processors and cleaners.
///
/// The plain-text processor is installed as the processor fallback. Scrapers
/// are left to the caller since they need a running browser.
pub fn register_defaults(
    components: &PipelineComponents,
    fetcher: ReqwestFetcher,
) -> Result<(), AppError> {
    components.fetchers.register(Arc::new(fetcher))?;
    components.processors.register(Arc::new(HtmlProcessor::new()))?;
    components.processors.set_fallback(Arc::new(PlainTextProcessor));

    components.cleaners.register(Arc::new(XssCleaner))?;
    components.cleaners.register(Arc::new(ReadabilityCleaner))?;
    components.cleaners.register(Arc::new(WhitespaceCleaner))?;
    Ok(())
}
