mod registry;
mod signature;

pub use registry::{ModelUri, ModelVersion, RegisteredModel};
pub use signature::{ColumnSpec, ModelSignature};
