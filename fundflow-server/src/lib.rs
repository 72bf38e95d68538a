pub mod api;
pub mod config;
pub mod error;
pub mod state_machine;

use std::sync::Arc;

pub use error::EngineError;
pub use state_machine::WorkflowEngine;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn short_hash(git_hash: &str) -> String {
    if git_hash.len() >= 8 {
        git_hash[..8].to_string()
    } else {
        git_hash.to_string()
    }
}

pub fn get_service_version() -> String {
    // First check for git hash from Nix build environment
    if let Some(git_hash) = option_env!("FUNDFLOW_GIT_HASH") {
        short_hash(git_hash)
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        // Fall back to built crate's git detection (for cargo builds)
        short_hash(git_hash)
    } else {
        built_info::PKG_VERSION.to_string()
    }
}

pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub api_auth_token: Option<String>,
}
