//! # Tool Path Resolver
//!
//! Trova i codec esterni usati dal motore di conversione:
//! - Tool inclusi accanto all'eseguibile o in `TOOLS_DIR`
//! - Tool installati nel `PATH` di sistema

use std::env;
use std::path::PathBuf;
use tracing::debug;

/// External tools the engine knows how to drive, grouped by concern
pub const KNOWN_TOOLS: &[(&str, &[&str])] = &[
    ("Documents", &["pdftoppm", "magick", "soffice"]),
    ("Images", &["cwebp", "heif-enc", "heif-convert"]),
    ("Video", &["ffmpeg", "ffprobe"]),
];

/// Resolves tool names to executable paths
#[derive(Debug, Clone)]
pub struct ToolPathResolver {
    /// Directory holding bundled tools, if any
    tools_dir: Option<PathBuf>,
    /// Search path used for system tools
    search_path: Vec<PathBuf>,
}

impl ToolPathResolver {
    /// Resolver over `TOOLS_DIR` (or `<exe dir>/tools`) and the process `PATH`
    pub fn new() -> Self {
        let search_path = env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).collect())
            .unwrap_or_default();

        Self {
            tools_dir: Self::detect_bundled_tools_dir(),
            search_path,
        }
    }

    /// Resolver over explicit directories only
    pub fn with_dirs(tools_dir: Option<PathBuf>, search_path: Vec<PathBuf>) -> Self {
        Self {
            tools_dir,
            search_path,
        }
    }

    fn detect_bundled_tools_dir() -> Option<PathBuf> {
        if let Ok(tools_dir) = env::var("TOOLS_DIR") {
            let tools_path = PathBuf::from(tools_dir);
            if tools_path.is_dir() {
                debug!("Found tools directory via TOOLS_DIR: {:?}", tools_path);
                return Some(tools_path);
            }
        }

        let exe_path = env::current_exe().ok()?;
        let tools_path = exe_path.parent()?.join("tools");
        if tools_path.is_dir() {
            debug!("Found bundled tools directory: {:?}", tools_path);
            return Some(tools_path);
        }

        None
    }

    /// Resolve the path to a specific tool, bundled copies first
    pub fn resolve_tool(&self, tool_name: &str) -> Option<PathBuf> {
        let file_name = Self::executable_name(tool_name);

        if let Some(ref tools_dir) = self.tools_dir {
            let candidates = [
                tools_dir.join(&file_name),
                tools_dir.join(env::consts::OS).join(&file_name),
                tools_dir.join(env::consts::OS).join(tool_name).join(&file_name),
            ];
            if let Some(found) = candidates.into_iter().find(|p| p.is_file()) {
                debug!("Using bundled tool: {} -> {:?}", tool_name, found);
                return Some(found);
            }
        }

        let found = self
            .search_path
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|path| path.is_file());

        if found.is_none() {
            debug!("Tool not found: {}", tool_name);
        }
        found
    }

    fn executable_name(tool_name: &str) -> String {
        if cfg!(windows) {
            format!("{}.exe", tool_name)
        } else {
            tool_name.to_string()
        }
    }

    pub fn is_tool_available(&self, tool_name: &str) -> bool {
        self.resolve_tool(tool_name).is_some()
    }

    /// Installation hint for a missing tool
    pub fn install_instructions(tool_name: &str) -> String {
        let package = match tool_name {
            "pdftoppm" => "poppler-utils",
            "magick" => "imagemagick",
            "soffice" => "libreoffice",
            "cwebp" => "webp",
            "heif-enc" | "heif-convert" => "libheif-examples",
            "ffmpeg" | "ffprobe" => "ffmpeg",
            other => other,
        };
        if cfg!(target_os = "macos") {
            format!("brew install {}", package)
        } else {
            format!("sudo apt-get install {}", package)
        }
    }

    /// Resolve a tool or explain how to install it
    pub fn check_tool_with_instructions(&self, tool_name: &str) -> Result<PathBuf, String> {
        self.resolve_tool(tool_name).ok_or_else(|| {
            format!(
                "Tool '{}' not found. Install it with: {}",
                tool_name,
                Self::install_instructions(tool_name)
            )
        })
    }

    /// Human-readable availability report
    pub fn get_tools_report(&self) -> String {
        let mut report = String::from("External tools\n");
        if let Some(ref dir) = self.tools_dir {
            report.push_str(&format!("Bundled tools dir: {}\n", dir.display()));
        }

        for (category, tools) in KNOWN_TOOLS {
            report.push_str(&format!("\n{}:\n", category));
            for tool in tools.iter() {
                match self.resolve_tool(tool) {
                    Some(path) => report.push_str(&format!("  ✅ {} -> {}\n", tool, path.display())),
                    None => report.push_str(&format!(
                        "  ❌ {} (install with: {})\n",
                        tool,
                        Self::install_instructions(tool)
                    )),
                }
            }
        }

        report
    }
}

impl Default for ToolPathResolver {
    fn default() -> Self {
        Self::new()
    }
}
