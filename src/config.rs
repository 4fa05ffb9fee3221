use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct AppConfig {
    pub root: PathBuf,
    pub bind_addr: String,
    pub catalog_path: Option<PathBuf>,
    pub max_clients: usize,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        let bind_addr = if args.len() > 1 {
            normalize_bind_addr(&args[1])?
        } else {
            std::env::var("STASHD_BIND_ADDR")
                .ok()
                .and_then(|value| {
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed.to_string())
                    }
                })
                .unwrap_or_else(|| "0.0.0.0:7777".to_string())
        };
        let catalog_path = if args.len() > 2 {
            Some(Path::new(&args[2]).to_path_buf())
        } else {
            std::env::var("STASHD_CATALOG").ok().and_then(|value| {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(Path::new(trimmed).to_path_buf())
                }
            })
        };
        let root = if args.len() > 3 {
            Path::new(&args[3]).to_path_buf()
        } else {
            std::env::var("STASHD_ROOT")
                .ok()
                .and_then(|value| {
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(Path::new(trimmed).to_path_buf())
                    }
                })
                .unwrap_or_else(|| Path::new(".").to_path_buf())
        };
        let max_clients = std::env::var("STASHD_MAX_CLIENTS")
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        Ok(Self {
            root,
            bind_addr,
            catalog_path,
            max_clients,
        })
    }
}

/// Accepts either a bare port or a full host:port address.
fn normalize_bind_addr(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if let Ok(port) = trimmed.parse::<u16>() {
        if port == 0 {
            return Err("port 0 is not a usable listen port".to_string());
        }
        return Ok(format!("0.0.0.0:{port}"));
    }
    if trimmed.contains(':') {
        return Ok(trimmed.to_string());
    }
    Err(format!(
        "bind address '{trimmed}' is neither a port nor host:port"
    ))
}
