//! Proxy surface: middleware, permission dispatch, forwarding and the server

pub mod dispatch;
pub mod domains;
pub mod forward;
pub mod middleware;
pub mod router;
pub mod server;

pub use dispatch::{AuthzOutcome, Denial, Dispatcher, DomainHandler, RequestContext};
pub use domains::EndpointGuard;
pub use forward::Forwarder;
pub use router::{AppState, create_router};
pub use server::PepProxy;
