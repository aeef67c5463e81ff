use crate::management::SessionToken;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Credentials and addresses established once the host authenticates
///
/// Built exactly once and shared read-only with both tenant phases.
#[derive(Clone)]
pub struct ProvisioningSession {
    pub host_url: String,
    admin_password: String,
    token: SessionToken,
    /// Tenant ordinal to node 1 address
    pub tenant_addresses: BTreeMap<usize, IpAddr>,
}

impl ProvisioningSession {
    pub fn new(
        host_url: impl Into<String>,
        admin_password: impl Into<String>,
        token: SessionToken,
        tenant_addresses: BTreeMap<usize, IpAddr>,
    ) -> Self {
        Self {
            host_url: host_url.into(),
            admin_password: admin_password.into(),
            token,
            tenant_addresses,
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Password the host accepted for the admin login
    pub fn admin_password(&self) -> &str {
        &self.admin_password
    }

    pub fn tenant_address(&self, ordinal: usize) -> Option<IpAddr> {
        self.tenant_addresses.get(&ordinal).copied()
    }
}

impl fmt::Debug for ProvisioningSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningSession")
            .field("host_url", &self.host_url)
            .field("admin_password", &"<redacted>")
            .field("token", &self.token)
            .field("tenant_addresses", &self.tenant_addresses)
            .finish()
    }
}
