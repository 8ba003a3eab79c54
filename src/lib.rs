#![allow(clippy::result_large_err)]

pub mod app;
pub mod app_state;
pub mod catalog;
pub mod chat;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod document;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod payload;
pub mod phone;
pub mod service;
pub mod telemetry;
pub mod template;

pub mod transport;
