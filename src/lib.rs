//! repo-warden: a webhook-driven merge-readiness engine for GitHub
//! repositories.
//!
//! The flow, end to end:
//!
//! 1. [`server`] accepts webhook deliveries (allowlist, HMAC signature),
//!    parses them with [`webhooks`], and queues them.
//! 2. [`dispatch`] serializes deliveries per PR while running distinct PRs
//!    in parallel, producing one execution record per delivery.
//! 3. [`handlers`] resolve per-repository policy ([`config`]), interpret
//!    `/commands` ([`commands`]) under [`owners`] authorization, and run the
//!    PR state machine ([`engine`]) against ground truth fetched via
//!    [`github`] using tokens from the [`credentials`] pool.
//! 4. Merged PRs flow into [`cherry_pick`] for replay onto release branches.

pub mod cherry_pick;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod engine;
pub mod github;
pub mod handlers;
pub mod owners;
pub mod server;
pub mod types;
pub mod webhooks;
