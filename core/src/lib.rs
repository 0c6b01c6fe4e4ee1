//! commission-core: multi-tier commission calculation and batch
//! payout distribution engine.
//!
//! Pipeline: revenue feed -> commission calculator -> ledger store ->
//! batch composer -> approval gate -> payout executor -> channel
//! gateways, with every state change recorded in the audit event log.

pub mod approval;
pub mod calculator;
pub mod composer;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod gateway;
pub mod money;
pub mod query;
pub mod store;
pub mod types;
