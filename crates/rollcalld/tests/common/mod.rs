#![allow(dead_code)]

pub mod app;
pub mod engine;
pub mod fixtures;
pub mod http;
