// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Port links and node volume through the PipeWire command-line tools.

use std::process::Command;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Failed to execute {tool}: {message}")]
    ToolFailed { tool: &'static str, message: String },
    #[error("Link operation failed: {0}")]
    LinkFailed(String),
    #[error("Volume operation failed: {0}")]
    VolumeFailed(String),
}

fn run(tool: &'static str, args: &[String]) -> Result<std::process::Output, RoutingError> {
    Command::new(tool)
        .args(args)
        .output()
        .map_err(|e| RoutingError::ToolFailed {
            tool,
            message: e.to_string(),
        })
}

/// Arguments for linking (or unlinking) two ports.
pub fn link_args(output_port: u32, input_port: u32, disconnect: bool) -> Vec<String> {
    let mut args = Vec::with_capacity(3);
    if disconnect {
        args.push("-d".to_string());
    }
    args.push(output_port.to_string());
    args.push(input_port.to_string());
    args
}

/// Create a link between two ports using pw-link.
pub fn create_link(output_port: u32, input_port: u32) -> Result<(), RoutingError> {
    info!("Creating link: port {} -> port {}", output_port, input_port);

    let output = run("pw-link", &link_args(output_port, input_port, false))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.contains("already linked") {
            return Err(RoutingError::LinkFailed(stderr.to_string()));
        }
        debug!("Ports already linked");
    }

    Ok(())
}

/// Remove the link between two ports.
pub fn destroy_link(output_port: u32, input_port: u32) -> Result<(), RoutingError> {
    info!("Destroying link: port {} -> port {}", output_port, input_port);

    let output = run("pw-link", &link_args(output_port, input_port, true))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RoutingError::LinkFailed(stderr.to_string()));
    }

    Ok(())
}

/// `Props` payload for `pw-cli set-param`.
pub fn volume_props(volume: f32) -> String {
    format!("{{ mute: false, volume: {} }}", volume.max(0.0))
}

/// Set the volume of a node and unmute it.
pub fn set_volume(node_id: u32, volume: f32) -> Result<(), RoutingError> {
    debug!("Setting volume on node {} to {:.2}", node_id, volume);

    let args = vec![
        "s".to_string(),
        node_id.to_string(),
        "Props".to_string(),
        volume_props(volume),
    ];
    let output = run("pw-cli", &args)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RoutingError::VolumeFailed(stderr.to_string()));
    }

    Ok(())
}

/// Check availability of PipeWire CLI tools at startup.
/// Logs a warning for each missing tool.
pub fn check_pipewire_tools() {
    let tools = [
        ("pw-dump", "Required for discovering engine nodes and ports"),
        ("pw-link", "Required for link routing"),
        ("pw-cli", "Required for volume control"),
        ("pw-loopback", "Required for loopback routing"),
        ("pw-jack", "Required for external instruments"),
    ];

    for (tool, purpose) in &tools {
        match Command::new("which").arg(tool).output() {
            Ok(output) if output.status.success() => {
                debug!("{} found", tool);
            }
            _ => {
                warn!("PipeWire tool '{}' not found in PATH. {}", tool, purpose);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_args() {
        assert_eq!(link_args(10, 20, false), vec!["10", "20"]);
        assert_eq!(link_args(10, 20, true), vec!["-d", "10", "20"]);
    }

    #[test]
    fn test_volume_props() {
        assert_eq!(volume_props(0.5), "{ mute: false, volume: 0.5 }");
        assert_eq!(volume_props(-1.0), "{ mute: false, volume: 0 }");
    }

    #[test]
    #[ignore = "requires a running PipeWire"]
    fn test_link_unknown_ports_fails() {
        assert!(create_link(u32::MAX - 1, u32::MAX).is_err());
    }
}
