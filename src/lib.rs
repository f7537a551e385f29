//! Visit-fee payments for the Makazi rental marketplace, collected through
//! the AzamPay checkout gateway.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;

pub use api::{router, AppState};
