//! # finrag
//!
//! A retrieval-augmented chat assistant for financial documents.
//!
//! Upload PDF filings, and finrag splits them into overlapping chunks,
//! embeds them into an in-memory vector index, and answers questions with a
//! ReAct agent that can search the documents, look things up on the web, and
//! run small calculations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌─────────────┐
//! │ PDF bytes│──▶│ extract  │──▶│  chunk   │──▶│ embed+index │
//! └──────────┘   └──────────┘   └──────────┘   └──────┬──────┘
//!                                                     │
//!             ┌───────────────────────────────────────┘
//!             ▼
//!      ┌─────────────┐     ┌────────────────────────────────┐
//!      │ ReAct agent │────▶│ Financial_Document_QA          │
//!      │ (per session)│    │ Web_Search · Code_Exec         │
//!      └──────┬──────┘     └────────────────────────────────┘
//!             │
//!      ┌──────┴──────┐
//!      ▼             ▼
//!  ┌───────┐   ┌──────────┐
//!  │  CLI  │   │   HTTP   │
//!  └───────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! finrag ask --file 10k.pdf "What was the revenue in 2023?"
//! finrag index --dir ./filings --out ./data/index.json
//! finrag chat --index ./data/index.json
//! finrag serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF text extraction |
//! | [`chunk`] | Sliding-window chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | In-memory vector index |
//! | [`ingest`] | Build pipeline |
//! | [`llm`] | Language model backends |
//! | [`tools`] | Agent tools |
//! | [`agent`] | ReAct loop |
//! | [`session`] | Per-user sessions |
//! | [`server`] | HTTP shell |
//! | [`logging`] | Log output setup |

pub mod agent;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
mod http;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod models;
pub mod server;
pub mod session;
pub mod tools;
