//! Webhook ingress building blocks: HMAC signature verification, source
//! address allowlisting, and payload parsing into typed events.

pub mod allowlist;
pub mod events;
pub mod parser;
pub mod signature;

pub use allowlist::{CidrBlock, IpAllowlist};
pub use events::Event;
pub use parser::{ParseError, parse_event};
pub use signature::{
    compute_signature, format_signature_header, parse_signature_header, verify_signature,
};
