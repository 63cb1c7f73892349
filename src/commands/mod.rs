//! Slash-command parsing for PR/issue comments.
//!
//! Users steer the bot with one command per comment line:
//!
//! - `/hold` / `/hold cancel` - block or unblock merging
//! - `/wip` / `/wip cancel` - mark or unmark work-in-progress
//! - `/verified` / `/verified cancel` - set or clear the verified label
//! - `/automerge` / `/automerge cancel` - arm or disarm automatic merge
//! - `/cherry-pick <branch>...` - request cherry-picks after merge
//! - `/retest [check...]` - re-run named checks (or all required ones)
//! - `/<label>` / `/<label> cancel` - toggle any managed label
//!
//! # Example
//!
//! ```
//! use repo_warden::commands::{parse_comment, Intent};
//!
//! let comment = "Looks good!\n/verified\n/cherry-pick release-1.2";
//! assert_eq!(
//!     parse_comment(comment),
//!     vec![
//!         Intent::Verified { cancel: false },
//!         Intent::CherryPick { branches: vec!["release-1.2".to_string()] },
//!     ]
//! );
//! ```

mod parser;
mod types;

pub use parser::parse_comment;
pub use types::Intent;
