//! # Niche Scout
//!
//! Amazon product niche research backed by the Keepa product-data API.
//!
//! A signed-in user searches by keyword with optional buy-box price bounds.
//! The server asks Keepa for matching ASINs, fetches product details for the
//! first 40, scores each product from its average sales rank, filters by
//! price, and returns the top results. Searches are logged per user and
//! chosen results can be saved; both collections are exposed as live views.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │   CLI    │──▶│  HTTP server │──▶│  Keepa   │
//! │ (scout)  │◀──│   (axum)     │   │   API    │
//! └──────────┘   └──────┬───────┘   └──────────┘
//!                       │
//!                       ▼
//!                 ┌──────────┐
//!                 │  SQLite  │  searches / results per user
//!                 └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! scout init                              # create database
//! KEEPA_KEY=... scout serve               # start the server
//! export SCOUT_SERVER_URL=http://127.0.0.1:8787 SCOUT_TOKEN=...
//! scout ping                              # token status
//! scout search "silicone spatula" --max-price 2500
//! scout watch results                     # live saved results
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error codes shared by server and client |
//! | [`models`] | Request, summary, and Keepa payload types |
//! | [`keepa`] | Keepa HTTP client |
//! | [`scoring`] | Product summarizing, scoring, and price filtering |
//! | [`search`] | Search pipeline and diagnostic ping |
//! | [`store`] | Per-user searches and saved results with live views |
//! | [`server`] | HTTP server |
//! | [`client`] | HTTP client and CLI commands |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod keepa;
pub mod migrate;
pub mod models;
pub mod scoring;
pub mod search;
pub mod server;
pub mod store;
