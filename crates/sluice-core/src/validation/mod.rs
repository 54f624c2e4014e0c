//! Parameter validation: schemas, per-kind validators and the service that
//! guards the provider-configuration store.

pub mod kinds;
pub mod schema;
pub mod service;

use serde_json::{Map, Value};

use crate::models::Parameters;

pub use kinds::{
    BrowserParameters, BrowserValidator, CrawlerParameters, CrawlerValidator, DocumentParameters,
    DocumentValidator, HttpParameters, HttpValidator, OcrParameters, OcrValidator,
};
pub use schema::{FieldDefault, FieldSpec, FieldType, ParameterSchema, ValidationReport};
pub use service::{AppliedConfiguration, ConfigurationRequest, ParameterService};

/// Validates and normalizes the parameter bag of one provider kind.
///
/// Implementors supply a schema and, optionally, cross-field rules; the
/// field-level checks and normalization come from the schema.
pub trait ParameterValidator: Send + Sync {
    fn schema(&self) -> &ParameterSchema;

    /// Provider kind this validator is registered under.
    fn kind(&self) -> &str {
        self.schema().kind
    }

    /// Rules spanning several fields, evaluated on coerced values with
    /// defaults filled. Returns `(errors, warnings)`.
    fn cross_field(&self, _params: &Map<String, Value>) -> (Vec<String>, Vec<String>) {
        (Vec::new(), Vec::new())
    }

    fn validate(&self, raw: &Map<String, Value>) -> ValidationReport {
        let (mut report, coerced) = self.schema().check(raw);
        let (errors, warnings) = self.cross_field(&coerced);
        report.errors.extend(errors);
        report.warnings.extend(warnings);
        report.valid = report.errors.is_empty();
        report
    }

    fn normalize(&self, raw: &Map<String, Value>) -> Parameters {
        Parameters::from_map(self.schema().normalize(raw))
    }

    fn default_parameters(&self) -> Parameters {
        Parameters::from_map(self.schema().defaults())
    }

    fn supported_parameters(&self) -> &[FieldSpec] {
        &self.schema().fields
    }

    /// Upper bound on batch concurrency for URLs using these parameters.
    fn recommended_concurrency(&self, _params: &Map<String, Value>) -> Option<usize> {
        None
    }
}
