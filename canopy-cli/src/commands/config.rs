use crate::output;
use anyhow::{bail, Context, Result};
use canopy_provision::CanopyConfig;
use std::path::Path;

pub fn sample(write: Option<&Path>) -> Result<()> {
    let sample = CanopyConfig::generate_sample();

    match write {
        None => print!("{}", sample),
        Some(path) => {
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            std::fs::write(path, &sample)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            output::print_success(&format!("Sample configuration written to {}", path.display()));
        }
    }

    Ok(())
}
