//! Built-in source connectors.
//!
//! - [`FilesystemConnector`] reads documents from a local directory tree.

mod filesystem;

use kbforge_core::ConnectorRegistry;
use kbforge_shared::Result;

pub use filesystem::{FilesystemConfig, FilesystemConnector};

/// Register every built-in connector under its type key.
pub fn register_builtin_connectors(registry: &mut ConnectorRegistry) -> Result<()> {
    registry.register(filesystem::CONNECTOR_TYPE, || Box::new(FilesystemConnector::new()))?;
    Ok(())
}
