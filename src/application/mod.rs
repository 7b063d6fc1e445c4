//! Application layer: the ledger, the subscription lifecycle and the
//! orchestration that ties payments to entitlements.
//!
//! `BillingOrchestrator` is the entry point for every client-facing flow.
//! Inbound gateway callbacks reach it through `WebhookHandler`, and the
//! expiry sweep runs as a background task spawned from `sweeper`.

pub mod ledger;
pub mod lifecycle;
pub mod locks;
pub mod orchestrator;
pub mod sweeper;
pub mod webhook;
