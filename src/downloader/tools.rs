use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "--version",
            ToolType::Ffmpeg => "-version",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<String>,
    pub is_available: bool,
}

/// Locates external binaries the backends shell out to
#[derive(Debug, Clone, Default)]
pub struct ToolManager {
    ytdlp_override: Option<PathBuf>,
}

impl ToolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit yt-dlp path instead of searching
    pub fn with_ytdlp(mut self, path: Option<PathBuf>) -> Self {
        self.ytdlp_override = path;
        self
    }

    /// Path to run yt-dlp with. Falls back to the bare name so PATH lookup
    /// happens at spawn time.
    pub fn ytdlp_path(&self) -> String {
        self.find(ToolType::YtDlp)
            .unwrap_or_else(|| ToolType::YtDlp.as_str().to_string())
    }

    pub fn get_tool_info(&self, tool_type: ToolType) -> ToolInfo {
        let path = self.find(tool_type);
        let version = path.as_deref().and_then(|p| get_version(p, tool_type));

        ToolInfo {
            name: tool_type.as_str().to_string(),
            tool_type,
            version,
            is_available: path.is_some(),
            path,
        }
    }

    pub fn get_all_tools(&self) -> Vec<ToolInfo> {
        vec![
            self.get_tool_info(ToolType::YtDlp),
            self.get_tool_info(ToolType::Ffmpeg),
        ]
    }

    fn find(&self, tool_type: ToolType) -> Option<String> {
        if tool_type == ToolType::YtDlp {
            if let Some(path) = &self.ytdlp_override {
                return Some(path.to_string_lossy().into_owned());
            }
        }
        find_binary(tool_type.as_str())
    }
}

/// Search common install locations, then PATH
pub fn find_binary(binary_name: &str) -> Option<String> {
    let mut candidates = vec![
        PathBuf::from(format!("/opt/homebrew/bin/{}", binary_name)),
        PathBuf::from(format!("/usr/local/bin/{}", binary_name)),
        PathBuf::from(format!("/usr/bin/{}", binary_name)),
    ];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".local/bin").join(binary_name));
    }

    for path in &candidates {
        if path.is_file() {
            return Some(path.to_string_lossy().into_owned());
        }
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(binary_name))
        .find(|p| p.is_file())
        .map(|p| p.to_string_lossy().into_owned())
}

fn get_version(path: &str, tool_type: ToolType) -> Option<String> {
    if !Path::new(path).exists() {
        return None;
    }
    match Command::new(path).arg(tool_type.version_arg()).output() {
        Ok(output) if output.status.success() => {
            // ffmpeg prints a banner; keep only the first line
            let out = String::from_utf8_lossy(&output.stdout);
            out.lines().next().map(|l| l.trim().to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let manager = ToolManager::new().with_ytdlp(Some(PathBuf::from("/custom/yt-dlp")));
        assert_eq!(manager.ytdlp_path(), "/custom/yt-dlp");
    }

    #[test]
    fn test_missing_tool_is_unavailable() {
        assert!(find_binary("surely-not-installed-tool-123").is_none());
    }

    #[test]
    fn test_tool_type_names() {
        assert_eq!(ToolType::YtDlp.as_str(), "yt-dlp");
        assert_eq!(serde_json::to_string(&ToolType::Ffmpeg).unwrap(), "\"ffmpeg\"");
    }
}
