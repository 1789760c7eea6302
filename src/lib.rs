pub mod analytics;
pub mod backend;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod gateway;
pub mod net;

pub use config::Config;
pub use discovery::{Endpoint, EndpointDirectory, FileRegistry, Registry, StaticRegistry};
pub use errors::{DialError, ProxyError, RegistryError};
pub use gateway::{Dispatcher, DispatcherSettings};
