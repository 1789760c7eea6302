//! Service discovery: where the dispatcher learns which backends exist.

pub mod directory;
pub mod endpoint;
pub mod file_registry;
pub mod registry;

pub use directory::EndpointDirectory;
pub use endpoint::Endpoint;
pub use file_registry::FileRegistry;
pub use registry::{EndpointRecord, Registry, StaticRegistry};
