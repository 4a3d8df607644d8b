pub mod config;
pub mod dataset;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod extract;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod server;
pub mod telemetry;
pub mod validation;

pub use dispatcher::{Dispatcher, ProviderRegistry};
pub use error::{GenerateError, ValidationErrors};
pub use llm::ChartGenerator;
pub use models::{ChartSpec, ChartType, DynamicData, ProviderConfig, ProviderKind};

/**
 * \brief Common modules for downstream crates.
 */
pub mod prelude {
    pub use crate::config;
    pub use crate::dataset;
    pub use crate::db;
    pub use crate::dispatcher;
    pub use crate::llm;
    pub use crate::models;
    pub use crate::prompt;
    pub use crate::server;
    pub use crate::telemetry;
    pub use crate::validation;
}
