// Gateway orchestration: endpoint selection, pooling and session lifecycle.
pub mod dispatcher;
pub mod pool;
pub mod session;

pub use dispatcher::{Dispatcher, DispatcherSettings};
pub use pool::{EndpointPool, GatewayPools, PoolSettings, PoolStats};
pub use session::{GatewaySession, SessionState};
