pub mod batch;
pub mod cleaner;
pub mod config;
pub mod config_store;
pub mod error;
pub mod events;
pub mod models;
pub mod pipeline;
pub mod preset;
pub mod registry;
pub mod retry;
pub mod selector;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod traits;
pub mod validation;

pub use batch::{BatchConfigurationManager, BatchOperation, BatchResult, ConfigDocument};
pub use cleaner::{Cleaner, CleanerChain};
pub use config::PipelineConfig;
pub use config_store::{ConfigManager, ConfigStore, MemoryConfigStore};
pub use error::{AppError, PipelineError};
pub use events::{EventBus, PipelineEvent};
pub use models::{FetchRequest, ProcessedDocument, RawContent, compute_hash};
pub use pipeline::{Orchestrator, PipelineComponents};
pub use preset::PresetCatalog;
pub use registry::{FetcherRegistry, ProcessorRegistry, ProviderRegistry, ScraperRegistry};
pub use retry::RetryPolicy;
pub use selector::{SelectionRule, Selector};
pub use traits::{Detector, DocumentStore, Provider, UrlTracker};
pub use validation::{ParameterService, ParameterValidator};
