use crate::output;
use anyhow::{bail, Result};
use canopy_provision::{teardown, CanopyConfig, Collaborators};

pub async fn down(config: CanopyConfig, yes: bool) -> Result<()> {
    if !yes {
        output::print_warning(&format!(
            "This destroys all {} instances and empties s3://{}; rerun with --yes",
            config.total_instances, config.state.bucket
        ));
        bail!("Teardown not confirmed");
    }

    let deps = Collaborators::production(&config)?;
    match teardown(&config, &deps).await {
        Ok(()) => {
            output::print_success("Environment torn down");
            Ok(())
        }
        Err(errors) => {
            for e in &errors {
                output::print_error(&e.to_string());
            }
            bail!("Teardown finished with {} error(s)", errors.len())
        }
    }
}
