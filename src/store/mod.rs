mod batch;
mod config;
mod error;
mod keys;
mod registry;
mod tool;

pub use batch::{BatchObfuscatedView, BatchPersistStore};
pub use config::StoreConfig;
pub use error::PersistError;
pub use keys::KeySpace;
pub use registry::BatchRegistry;
pub use tool::{ObfuscatedView, OpOptions, Persist, PersistStore, StoreBuilder};
