use std::path::{Path, PathBuf};

use anyhow::Result;

use super::{load_config, seed_store};

pub fn run(config_path: &Path, port: Option<u16>, project: &str, docs: &[PathBuf]) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    let store = seed_store(project, docs)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(ba_server::serve(&config, store))
}
