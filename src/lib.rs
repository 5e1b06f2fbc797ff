//! # Mailcue
//!
//! A reply-capture and retrieval-augmented drafting pipeline for email
//! clients.
//!
//! Mailcue watches an HTML snapshot of a webmail conversation kept current
//! by a browser bridge. When the user sends a reply, the capture pipeline
//! records the `{incoming, reply}` pair (raw and summarized) in a local
//! collection. When a new conversation appears on screen, the suggestion
//! pipeline ranks prior pairs for similarity with a local language model
//! and drafts a reply in the style of the matches. Status and record CRUD
//! are exposed over HTTP for the bridge to consume.
//!
//! ## Quick Start
//!
//! ```bash
//! mailcue init                  # create the record database
//! mailcue watch                 # watch the page snapshot and serve HTTP
//! mailcue suggest               # one-shot: draft a reply for the open page
//! mailcue records list          # inspect captured pairs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Message extraction from page HTML |
//! | [`page`] | Snapshot access and the reply watcher |
//! | [`store`] | Record store gateway |
//! | [`llm`] | Language model abstraction |
//! | [`summarize`] | Two-detail summarization |
//! | [`rank`] | Similarity ranking of prior records |
//! | [`generate`] | Draft response generation |
//! | [`capture`] | Send-triggered capture pipeline |
//! | [`suggest`] | Suggestion pipeline |
//! | [`records`] | Record management commands |
//! | [`status`] | Cross-context status channel |
//! | [`server`] | HTTP surface |
//! | [`runtime`] | Long-running watch mode |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod capture;
pub mod config;
pub mod db;
pub mod extract;
pub mod generate;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod page;
pub mod rank;
pub mod records;
pub mod runtime;
pub mod server;
pub mod status;
pub mod store;
pub mod suggest;
pub mod summarize;
