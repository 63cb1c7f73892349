//! Layered configuration: server settings from the environment, and the
//! per-repository policy document resolved per delivery.
//!
//! Policy resolution is an overlay of three layers (global defaults,
//! per-repository entry, in-repository override file), recomputed for every
//! delivery so configuration changes take effect immediately.

pub mod document;
pub mod server;

pub use document::{
    BranchCheckOverride, ConfigError, ConfigLayer, ConfigResolver, DEFAULT_LABEL_COLOR,
    EffectiveConfig, MergePolicy, OVERRIDE_FILE_PATH, SizeThreshold,
};
pub use server::ServerConfig;
