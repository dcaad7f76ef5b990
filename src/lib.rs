//! # Ingesta
//!
//! A document ingestion pipeline for property-management communities.
//!
//! Ingesta takes uploaded files (scanned or digital PDFs), recovers
//! their text through a cost-ordered extraction cascade, detects and
//! splits multi-document bundles, classifies each document into a
//! closed set of Spanish property-management types, extracts structured
//! fields per type, and chunks the text for retrieval. Every persisted
//! record is stamped with the owning organization and tracked through a
//! per-document stage state machine in SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────────┐   ┌──────────┐
//! │  Upload  │──▶│ extract → classify → metadata │──▶│  SQLite   │
//! │ HTTP/CLI │   │        → chunk (gated)        │   │ tenanted │
//! └──────────┘   └───────────────────────────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ingesta init                                  # create database
//! ingesta process factura_luz.pdf --org acme    # full pipeline
//! ingesta analyze bundle.pdf                    # boundary report only
//! ingesta status <id>                           # stage statuses
//! ingesta serve                                 # HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`ai`] | AI provider clients (completion and vision) |
//! | [`models`] | Core data types |
//! | [`state`] | Per-document stage state machine |
//! | [`extract`] | Text-extraction cascade (text layer → OCR → vision) |
//! | [`analyze`] | Multi-document boundary detection and separation |
//! | [`classify`] | Document-type classification |
//! | [`extractors`] | Per-type structured field extraction |
//! | [`chunk`] | Text chunking |
//! | [`pipeline`] | Stage orchestration |
//! | [`store`] | Tenant-stamped persistence |
//! | [`server`] | HTTP upload and status API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod ai;
pub mod analyze;
pub mod chunk;
pub mod classify;
pub mod config;
pub mod db;
pub mod extract;
pub mod extractors;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod state;
pub mod store;
