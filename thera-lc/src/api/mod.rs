//! HTTP API handlers for thera-lc

pub mod actor;
pub mod assignments;
pub mod health;
pub mod outbox;
pub mod routes;

pub use actor::{Actor, ACTOR_HEADER};
pub use assignments::assignment_routes;
pub use health::health_routes;
pub use outbox::outbox_routes;
pub use routes::route_routes;
