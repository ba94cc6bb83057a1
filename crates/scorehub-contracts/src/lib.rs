pub mod events;
pub mod features;
pub mod metadata;
pub mod models;
pub mod runs;
