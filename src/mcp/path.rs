//! Path translation between Windows drive paths and WSL mount paths.
//!
//! Server definitions are often shared between a Windows host and a WSL
//! distribution, so launch arguments such as `C:\Users\me\notes` need to be
//! rewritten to `/mnt/c/Users/me/notes` (and back) before a server is spawned.
//! Conversion is best effort: anything that does not look like a path of the
//! expected shape is returned unchanged.

use std::collections::HashMap;

/// Host flavour the client is running on, as far as path syntax is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    /// Native Windows: stored WSL paths are converted to drive paths.
    Windows,
    /// Linux under WSL: stored drive paths are converted to `/mnt/<letter>/`.
    Wsl,
    /// Plain Linux: treated like WSL.
    Linux,
    /// Anything else: no conversion.
    Other,
}

impl HostPlatform {
    /// Detect the platform of the running process.
    pub fn detect() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "linux") {
            let release = std::fs::read_to_string("/proc/sys/kernel/osrelease").unwrap_or_default();
            if release.to_lowercase().contains("microsoft") {
                Self::Wsl
            } else {
                Self::Linux
            }
        } else {
            Self::Other
        }
    }

    /// Convert a single launch argument or environment value for this host.
    pub fn translate(self, value: &str) -> String {
        match self {
            Self::Windows => to_windows(value),
            Self::Wsl | Self::Linux => to_wsl(value),
            Self::Other => value.to_string(),
        }
    }

    /// Convert every argument for this host, preserving order.
    pub fn translate_args(self, args: &[String]) -> Vec<String> {
        args.iter().map(|arg| self.translate(arg)).collect()
    }

    /// Convert every environment value for this host; keys are left alone.
    pub fn translate_env(self, env: &HashMap<String, String>) -> HashMap<String, String> {
        env.iter()
            .map(|(k, v)| (k.clone(), self.translate(v)))
            .collect()
    }
}

/// Split `C:\rest` into `('C', "rest")`.
fn split_windows(path: &str) -> Option<(char, &str)> {
    let mut chars = path.chars();
    let drive = chars.next().filter(char::is_ascii_alphabetic)?;
    let rest = path[1..].strip_prefix(":\\")?;
    Some((drive, rest))
}

/// Split `/mnt/c/rest` into `('c', "rest")`.
fn split_wsl(path: &str) -> Option<(char, &str)> {
    let tail = path.strip_prefix("/mnt/")?;
    let mut chars = tail.chars();
    let drive = chars.next().filter(char::is_ascii_lowercase)?;
    let rest = tail[1..].strip_prefix('/')?;
    Some((drive, rest))
}

/// Rewrite `C:\dir\file` as `/mnt/c/dir/file`.
///
/// Input that does not start with a drive letter, a colon and a backslash is
/// returned unchanged.
pub fn to_wsl(path: &str) -> String {
    match split_windows(path) {
        Some((drive, rest)) => format!(
            "/mnt/{}/{}",
            drive.to_ascii_lowercase(),
            rest.replace('\\', "/")
        ),
        None => path.to_string(),
    }
}

/// Rewrite `/mnt/c/dir/file` as `C:\dir\file`.
///
/// Input that does not start with `/mnt/<lowercase letter>/` is returned
/// unchanged.
pub fn to_windows(path: &str) -> String {
    match split_wsl(path) {
        Some((drive, rest)) => format!(
            "{}:\\{}",
            drive.to_ascii_uppercase(),
            rest.replace('/', "\\")
        ),
        None => path.to_string(),
    }
}
