// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::appointment::LivenessPolicy;

/// Real-time chat gateway for appointment conversations.
#[derive(Debug, Clone, Parser)]
#[command(name = "clinichat", version, about)]
pub struct GatewayConfig {
    /// Host address to bind to.
    #[arg(long, env = "CLINICHAT_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP/WebSocket port to listen on.
    #[arg(long, env = "CLINICHAT_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Shared HS256 secret used to verify access tokens.
    #[arg(long, env = "CLINICHAT_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Bearer token for the conversation registration API. If unset, the API
    /// is disabled.
    #[arg(long, env = "CLINICHAT_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// JSON file with conversations to preload.
    #[arg(long, env = "CLINICHAT_APPOINTMENTS")]
    pub appointments: Option<PathBuf>,

    /// Directory for per-conversation message logs. In-memory when unset.
    #[arg(long, env = "CLINICHAT_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Time a connection has to authenticate and join a conversation.
    #[arg(long, env = "CLINICHAT_AUTH_TIMEOUT_MS", default_value_t = 10_000)]
    pub auth_timeout_ms: u64,

    /// Per-connection outbound queue depth. Events past this are dropped.
    #[arg(long, env = "CLINICHAT_OUTBOUND_BUFFER", default_value_t = 256)]
    pub outbound_buffer: usize,

    /// Maximum message length in characters.
    #[arg(long, env = "CLINICHAT_MAX_MESSAGE_LEN", default_value_t = 4000)]
    pub max_message_len: usize,

    /// Keep conversations of cancelled appointments open.
    #[arg(long, env = "CLINICHAT_ALLOW_CANCELLED_CHAT")]
    pub allow_cancelled_chat: bool,

    /// Log format (json or text).
    #[arg(long, env = "CLINICHAT_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "CLINICHAT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl GatewayConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt_secret.is_empty() {
            anyhow::bail!("--jwt-secret must not be empty");
        }
        if self.admin_token.as_deref() == Some("") {
            anyhow::bail!("--admin-token must not be empty when set");
        }
        if self.auth_timeout_ms == 0 {
            anyhow::bail!("--auth-timeout-ms must be positive");
        }
        if self.outbound_buffer == 0 {
            anyhow::bail!("--outbound-buffer must be positive");
        }
        if self.max_message_len == 0 {
            anyhow::bail!("--max-message-len must be positive");
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid --log-format: {} (expected json or text)", self.log_format);
        }
        Ok(())
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn liveness_policy(&self) -> LivenessPolicy {
        LivenessPolicy { allow_cancelled: self.allow_cancelled_chat }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build a minimal config for tests (port 0, in-memory store).
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            jwt_secret: "test-secret".into(),
            admin_token: None,
            appointments: None,
            store_dir: None,
            auth_timeout_ms: 2_000,
            outbound_buffer: 64,
            max_message_len: 4000,
            allow_cancelled_chat: false,
            log_format: "text".into(),
            log_level: "debug".into(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
