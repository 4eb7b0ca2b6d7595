//! rollcalld: face-recognition attendance over HTTP.
//!
//! Students register a photo under their matriculation number; a later
//! capture is matched against every registered photo to mark attendance
//! for a course.

pub mod config;
pub mod engine;
pub mod error;
pub mod faces;
pub mod logging;
pub mod recognition;
pub mod routes;
pub mod state;
pub mod store;
pub mod validation;
pub mod views;
