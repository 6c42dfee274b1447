//! Order lifecycle and tracking for a food-ordering platform.
//!
//! Orders are created with a random tracking token and an initial
//! "Order Placed" entry, move through staff-recorded status updates, and are
//! reconciled against a payment gateway. Every status change is an
//! append to the order's tracking ledger and an update of the order row,
//! committed together.

pub mod auth;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod payment;
pub mod service;
pub mod storage;
pub mod tracking;
pub mod utils;

pub use service::OrderService;
