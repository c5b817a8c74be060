//! # Trial Harness
//!
//! A local-first toolkit for preparing clinical-trial documents for
//! retrieval and matching patient cohorts against trial eligibility
//! criteria.
//!
//! Trial Harness parses semi-structured trial documents into typed
//! sections, packs them into bounded-size chunks for embedding, and
//! exposes semantic cohort matching and recruitment-feasibility analysis
//! via a CLI and an MCP-compatible HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────┐
//! │ Trial corpus │──▶│ Sections +    │──▶│  SQLite   │
//! │   (JSON)     │   │ Chunks+Embed  │   │ rows+vecs │
//! └──────────────┘   └───────────────┘   └────┬─────┘
//!                                             │
//!                         ┌───────────────────┤
//!                         ▼                   ▼
//!                    ┌──────────┐       ┌──────────┐
//!                    │   CLI    │       │   HTTP   │
//!                    │ (trials) │       │  (MCP)   │
//!                    └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! trials init                          # create database
//! trials load patients patients.json  # load patient demographics
//! trials load conditions cond.json    # load observed conditions
//! trials index corpus.json            # chunk + embed trial documents
//! trials match --age-min 40 --age-max 70 --condition "diabetes mellitus"
//! trials analyze "immunotherapy for metastatic melanoma"
//! trials serve mcp                    # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`sections`] | Trial document section extraction |
//! | [`chunk`] | Bounded-size chunk packing |
//! | [`embedding`] | Embedding collaborator abstraction + cache |
//! | [`matcher`] | Semantic eligibility matching |
//! | [`feasibility`] | Recruitment feasibility inference |
//! | [`retrieval`] | Semantic trial search |
//! | [`ingest`] | Corpus indexing and reference-data loading |
//! | [`embed_cmd`] | Embedding backfill commands |
//! | [`tools`] | Tool registry for the MCP surface |
//! | [`server`] | MCP HTTP server |
//! | [`store`] | SQLite persistence |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod embed_cmd;
pub mod embedding;
pub mod feasibility;
pub mod ingest;
pub mod matcher;
pub mod migrate;
pub mod models;
pub mod retrieval;
pub mod sections;
pub mod server;
pub mod store;
pub mod tools;
