//! # Platform-specific utilities
//!
//! Questo modulo centralizza la gestione dei codec esterni: risoluzione dei
//! tool (bundled o di sistema), scelta del primo tool disponibile in una
//! catena di fallback ed esecuzione con timeout e cancellazione.
//!
//! Nessun singleton: ogni `FileOptimizer` riceve la propria istanza.

use crate::error::{OptimizeError, Result};
use crate::process::{self, ToolOutput};
use crate::tool_resolver::{ToolPathResolver, KNOWN_TOOLS};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// External tool access for one engine instance
#[derive(Debug, Clone)]
pub struct PlatformCommands {
    tool_resolver: ToolPathResolver,
    tool_timeout: Duration,
}

impl PlatformCommands {
    pub fn new(tool_timeout: Duration) -> Self {
        Self::with_resolver(ToolPathResolver::new(), tool_timeout)
    }

    pub fn with_resolver(tool_resolver: ToolPathResolver, tool_timeout: Duration) -> Self {
        Self {
            tool_resolver,
            tool_timeout,
        }
    }

    pub fn is_command_available(&self, base_name: &str) -> bool {
        self.tool_resolver.is_tool_available(base_name)
    }

    /// Resolved path of a tool, or `MissingDependency` with install hints
    pub fn require(&self, base_name: &str) -> Result<PathBuf> {
        self.tool_resolver
            .check_tool_with_instructions(base_name)
            .map_err(OptimizeError::MissingDependency)
    }

    /// First available tool of a fallback chain
    pub fn first_available<'a>(&self, chain: &[&'a str]) -> Result<(&'a str, PathBuf)> {
        for tool in chain {
            if let Some(path) = self.tool_resolver.resolve_tool(tool) {
                debug!("Selected {} from chain {:?}", tool, chain);
                return Ok((tool, path));
            }
        }
        Err(OptimizeError::MissingDependency(format!(
            "none of {} is installed (install with: {})",
            chain.join(", "),
            chain
                .first()
                .map(|tool| ToolPathResolver::install_instructions(tool))
                .unwrap_or_default()
        )))
    }

    /// Run a tool by name with the configured timeout
    pub async fn run(
        &self,
        base_name: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ToolOutput> {
        let program = self.require(base_name)?;
        process::run_tool(&program, base_name, args, self.tool_timeout, cancel).await
    }

    pub fn get_tools_report(&self) -> String {
        self.tool_resolver.get_tools_report()
    }

    /// Known tools split into (installed, missing)
    pub fn tool_availability(&self) -> (Vec<String>, Vec<String>) {
        KNOWN_TOOLS
            .iter()
            .flat_map(|(_, tools)| tools.iter())
            .map(|tool| tool.to_string())
            .partition(|tool| self.is_command_available(tool))
    }

    pub fn system_info() -> SystemInfo {
        SystemInfo {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            family: std::env::consts::FAMILY,
        }
    }
}

impl Default for PlatformCommands {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

/// System information structure
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub os: &'static str,
    pub arch: &'static str,
    pub family: &'static str,
}

impl std::fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.os, self.arch, self.family)
    }
}
