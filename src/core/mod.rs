pub mod auth;
pub mod change_detector;
pub mod error;
pub mod forwarding;
pub mod matcher;
pub mod route;
pub mod route_table;
pub mod trie;

pub use auth::{AuthError, AuthManager, AuthStrategy, Claims};
pub use change_detector::{ChangeDetector, DetectorState, RouteChange, RouteTableUpdater};
pub use error::GatewayError;
pub use matcher::{MatcherSet, RequestView};
pub use route::{Route, RouteDefinition, RouteValidationError};
pub use route_table::{RouteSnapshot, RouteTable};
