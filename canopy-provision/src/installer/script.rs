//! Generated shell scripts

use crate::remote::shell_quote;

const HOSTNAME_PLACEHOLDER: &str = "--set hostname=placeholder";
const HOSTNAME_FLAG: &str = "--set hostname=";
const BOOTSTRAP_PASSWORD_FLAG: &str = "--set bootstrapPassword=";

/// Fallback admin password when the command carries none
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";

/// Substitute the instance URL into the helm command
pub fn target_command(helm_command: &str, url: &str) -> String {
    if helm_command.contains(HOSTNAME_FLAG) {
        helm_command.replacen(HOSTNAME_PLACEHOLDER, &format!("{}{}", HOSTNAME_FLAG, url), 1)
    } else {
        format!("{} \\\n  {}{}", helm_command.trim(), HOSTNAME_FLAG, url)
    }
}

/// `install.sh` for one instance
pub fn render_install_script(helm_command: &str, url: &str) -> String {
    format!(
        r#"#!/bin/bash
set -e

echo "Verifying connection to Kubernetes cluster..."
if ! kubectl cluster-info; then
  echo "ERROR: Unable to connect to Kubernetes cluster"
  exit 1
fi

echo "Creating cattle-system namespace..."
kubectl create namespace cattle-system --dry-run=client -o yaml | kubectl apply -f -

echo "Installing..."
{command}

echo "Installation complete: https://{url}"
"#,
        command = target_command(helm_command, url),
        url = url
    )
}

/// Value of `--set bootstrapPassword=` in the helm command
pub fn extract_bootstrap_password(helm_command: &str) -> Option<String> {
    helm_command
        .lines()
        .filter_map(|line| line.split_once(BOOTSTRAP_PASSWORD_FLAG))
        .filter_map(|(_, rest)| rest.split_whitespace().next())
        .map(|value| value.trim_matches(|c| c == '\\' || c == '"' || c == '\''))
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Remote command that applies an import manifest on a tenant
pub fn import_command(manifest_url: &str) -> String {
    format!("curl --insecure -sfL {} | sudo k3s kubectl apply -f -", shell_quote(manifest_url))
}

pub fn render_import_script(manifest_url: &str) -> String {
    format!("#!/bin/bash\nset -e\n\n{}\n", import_command(manifest_url))
}
