pub mod artifact;
pub mod catalog;
pub mod config;
pub mod error;
pub mod handle;
pub mod http;
pub mod memory;
pub mod registry;
pub mod store;

pub use artifact::{
    default_flavor_registry, FlavorRegistry, LinearRegressor, LogisticClassifier, Predictor,
};
pub use catalog::RegistryCatalog;
pub use config::RegistryConfig;
pub use error::{PublishPhase, RegistryError};
pub use handle::ScoringHandle;
pub use http::HttpTrackingStore;
pub use memory::InMemoryTrackingStore;
pub use registry::ModelRegistry;
pub use store::TrackingStore;
