use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use canopy_provision::{CanopyConfig, Collaborators, Orchestrator};

pub async fn validate(config: CanopyConfig) -> Result<()> {
    let deps = Collaborators::production(&config)?;
    let orchestrator = Orchestrator::new(config, deps);

    orchestrator.validate().await.context("Pre-flight checks failed")?;
    output::print_success("Pre-flight checks passed");
    Ok(())
}

pub async fn up(config: CanopyConfig, format: OutputFormat) -> Result<()> {
    output::print_info(&format!(
        "Provisioning 1 host and {} tenant(s)",
        config.tenant_count()
    ));

    let admin = config.host.admin_username.clone();
    let deps = Collaborators::production(&config)?;
    let mut orchestrator = Orchestrator::new(config, deps);
    let result = orchestrator.run().await;

    output::print_report(orchestrator.report(), format)?;

    match result {
        Ok(_) => {
            output::print_success("Provisioning complete");
            if let (Some(session), OutputFormat::Table) = (orchestrator.session(), format) {
                output::print_info(&format!(
                    "Log in at https://{} as {} with password {}",
                    session.host_url,
                    admin,
                    session.admin_password()
                ));
            }
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("Provisioning failed")),
    }
}
