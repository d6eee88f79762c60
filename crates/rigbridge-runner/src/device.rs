//! Compute device passed to every tool stage as `device=<...>`.

use std::fmt;
use std::process::{Command, Stdio};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(u32),
}

#[derive(Debug, thiserror::Error)]
#[error("unknown device '{0}' (expected auto, cpu or cuda:N)")]
pub struct ParseDeviceError(String);

impl Device {
    /// The `device=...` argument handed to the tool.
    pub fn as_arg(&self) -> String {
        format!("device={self}")
    }

    /// Resolve a user selector: `auto` probes the machine, anything else is parsed.
    pub fn from_selector(selector: &str) -> Result<Self, ParseDeviceError> {
        if selector.trim().eq_ignore_ascii_case("auto") {
            Ok(detect())
        } else {
            selector.parse()
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(i) => write!(f, "cuda:{i}"),
        }
    }
}

impl FromStr for Device {
    type Err = ParseDeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|n| n.parse::<u32>().ok())
                .map(Device::Cuda)
                .ok_or_else(|| ParseDeviceError(s.to_string())),
        }
    }
}

/// Probe for an NVIDIA GPU: `nvidia-smi` on PATH and `nvidia-smi -L` listing one.
pub fn detect() -> Device {
    let Ok(smi) = which::which("nvidia-smi") else {
        tracing::info!("nvidia-smi not found, using CPU");
        return Device::Cpu;
    };
    let output = Command::new(&smi)
        .arg("-L")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();
    match output {
        Ok(out) if out.status.success() && gpu_listed(&String::from_utf8_lossy(&out.stdout)) => {
            tracing::info!("NVIDIA GPU detected, using cuda:0");
            Device::Cuda(0)
        }
        Ok(_) => {
            tracing::info!("nvidia-smi lists no GPU, using CPU");
            Device::Cpu
        }
        Err(e) => {
            tracing::warn!(error = %e, "nvidia-smi failed, using CPU");
            Device::Cpu
        }
    }
}

fn gpu_listed(listing: &str) -> bool {
    listing.lines().any(|l| l.trim_start().starts_with("GPU "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("CUDA:1".parse::<Device>().unwrap(), Device::Cuda(1));
        assert_eq!("cuda".parse::<Device>().unwrap(), Device::Cuda(0));
        assert!("cuda:x".parse::<Device>().is_err());
        assert!("tpu".parse::<Device>().is_err());
    }

    #[test]
    fn test_as_arg() {
        assert_eq!(Device::Cpu.as_arg(), "device=cpu");
        assert_eq!(Device::Cuda(2).as_arg(), "device=cuda:2");
    }

    #[test]
    fn test_explicit_selector_skips_detection() {
        assert_eq!(Device::from_selector("cpu").unwrap(), Device::Cpu);
        assert_eq!(Device::from_selector("cuda:0").unwrap(), Device::Cuda(0));
    }

    #[test]
    fn test_gpu_listing() {
        assert!(gpu_listed("GPU 0: NVIDIA A10G (UUID: GPU-1234)\n"));
        assert!(!gpu_listed("No devices were found\n"));
        assert!(!gpu_listed(""));
    }
}
