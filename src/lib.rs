//! # EDGAR Ingest
//!
//! Ingestion pipeline for the public filing archive: discovers filings
//! through directory listings or quarterly index feeds, downloads composite
//! filings with bounded retry, splits them into their constituent documents,
//! stores raw and extracted content by hash, and reconciles companies,
//! filings and documents into a SQLite catalog.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌──────────┐   ┌──────────────┐
//! │ Listing /  │──▶│ Retriever │──▶│ Splitter │──▶│ Content Store│
//! │ Index feed │   │ (HTTP)    │   │          │   │ local / S3   │
//! └────────────┘   └───────────┘   └────┬─────┘   └──────────────┘
//!                                       │
//!                                       ▼
//!                                 ┌──────────┐
//!                                 │ Catalog  │
//!                                 │ (SQLite) │
//!                                 └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! edgar init                                  # create database
//! edgar list /Archives/edgar/data/320193/     # browse the archive
//! edgar ingest-index --year 2024 --quarter 1 --form-type 10-K
//! edgar errors                                # inspect failures
//! edgar status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed stage errors |
//! | [`retriever`] | Remote fetch with retry and poison detection |
//! | [`listing`] | Directory listing discovery |
//! | [`index`] | Quarterly `master.idx` feeds |
//! | [`split`] | Composite filing splitter |
//! | [`extract`] | Plain-text derivation |
//! | [`store`] | Content-addressed blob storage |
//! | [`catalog`] | Catalog reconciliation |
//! | [`ingest`] | Orchestrator and worker pool |
//! | [`status`] | Status and error-filing commands |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod listing;
pub mod migrate;
pub mod models;
pub mod retriever;
pub mod split;
pub mod status;
pub mod store;
