use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("classifier dimension mismatch in {component}: expected {expected}, found {actual}")]
    ClassifierDimensionMismatch {
        component: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid template catalog: {0}")]
    InvalidCatalog(String),

    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
}
