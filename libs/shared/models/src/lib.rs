pub mod auth;
pub mod error;
pub mod appointment;
pub mod schedule;
pub mod payment;
pub mod profile;
