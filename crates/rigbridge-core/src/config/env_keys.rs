//! Environment variable key constants and their aliases.
//!
//! Primary variables use the `RIGBRIDGE_*` prefix.

/// Filesystem layout: app root, tool repository, host installation
pub mod paths {
    pub const RIGBRIDGE_APP_ROOT: &str = "RIGBRIDGE_APP_ROOT";

    pub const RIGBRIDGE_TOOL_REPO: &str = "RIGBRIDGE_TOOL_REPO";
    pub const TOOL_REPO_ALIASES: &[&str] = &["UNIRIG_REPO_DIR"];

    pub const RIGBRIDGE_HOST_INSTALL_DIR: &str = "RIGBRIDGE_HOST_INSTALL_DIR";
    pub const HOST_INSTALL_DIR_ALIASES: &[&str] = &["BLENDER_INSTALL_DIR"];

    /// Version subdirectory inside the host install (holds the bundled python)
    pub const RIGBRIDGE_HOST_VERSION_DIR: &str = "RIGBRIDGE_HOST_VERSION_DIR";

    pub const RIGBRIDGE_HOST_SYMLINK: &str = "RIGBRIDGE_HOST_SYMLINK";

    pub const RIGBRIDGE_SETUP_SCRIPT: &str = "RIGBRIDGE_SETUP_SCRIPT";

    pub const RIGBRIDGE_OUTPUT_DIR: &str = "RIGBRIDGE_OUTPUT_DIR";
}

/// Subprocess time budgets (seconds)
pub mod timeouts {
    pub const RIGBRIDGE_STAGE_TIMEOUT_SECS: &str = "RIGBRIDGE_STAGE_TIMEOUT_SECS";
    pub const RIGBRIDGE_SMOKE_TIMEOUT_SECS: &str = "RIGBRIDGE_SMOKE_TIMEOUT_SECS";
    pub const RIGBRIDGE_SETUP_TIMEOUT_SECS: &str = "RIGBRIDGE_SETUP_TIMEOUT_SECS";
}

/// Pipeline behaviour
pub mod pipeline {
    pub const RIGBRIDGE_RUN_DIAGNOSTIC: &str = "RIGBRIDGE_RUN_DIAGNOSTIC";
    pub const RIGBRIDGE_STREAM_STDERR: &str = "RIGBRIDGE_STREAM_STDERR";

    /// `auto`, `cpu` or `cuda:N`
    pub const RIGBRIDGE_DEVICE: &str = "RIGBRIDGE_DEVICE";
}

/// HTTP upload surface
pub mod serve {
    pub const RIGBRIDGE_LISTEN: &str = "RIGBRIDGE_LISTEN";
    pub const RIGBRIDGE_MAX_UPLOAD_MB: &str = "RIGBRIDGE_MAX_UPLOAD_MB";
}

/// Observability and logging
pub mod observability {
    pub const RIGBRIDGE_QUIET: &str = "RIGBRIDGE_QUIET";
    pub const RIGBRIDGE_LOG_LEVEL: &str = "RIGBRIDGE_LOG_LEVEL";
    pub const RIGBRIDGE_LOG_JSON: &str = "RIGBRIDGE_LOG_JSON";
    pub const RIGBRIDGE_AUDIT_LOG: &str = "RIGBRIDGE_AUDIT_LOG";
}
