//! ritratto renders web pages and HTML documents into screenshots, PDFs, and
//! DOM dumps by driving a headless Chromium process per request.
//!
//! The crate is split into three layers: `config` resolves deployment
//! settings (file → environment → CLI), `application` holds the render-job
//! execution engine, and `infra` hosts the HTTP surface and telemetry
//! bootstrap.

pub mod application;
pub mod config;
pub mod infra;
