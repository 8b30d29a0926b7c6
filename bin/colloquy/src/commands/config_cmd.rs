use colloquy_core::Config;
use std::path::PathBuf;

/// Print the configuration as the daemon would resolve it.
pub fn show(path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load_or_default(path.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
