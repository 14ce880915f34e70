//! HTTP surface: one module per resource, mirroring the review/quarantine/
//! user-lifecycle crates they sit on top of.

pub mod health;
pub mod quarantine;
pub mod reviews;
pub mod users;
