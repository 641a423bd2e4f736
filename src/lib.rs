// src/lib.rs

pub mod aggregate;
pub mod cli;
pub mod clock;
pub mod collector;
pub mod config;
pub mod discovery;
pub mod http;
pub mod journal;
pub mod model;
pub mod notion;
pub mod pipeline;
pub mod remote;
pub mod summary;
pub mod sync;
