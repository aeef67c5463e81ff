use super::{InfraError, OutputMap};
use canopy_common::Instance;
use std::net::IpAddr;

/// `infra<N>_<field>`, where N is the instance's 1-based index (1 is the host)
pub fn output_key(index: usize, field: &str) -> String {
    format!("infra{}_{}", index, field)
}

fn lookup<'a>(outputs: &'a OutputMap, index: usize, field: &str) -> Result<&'a str, InfraError> {
    let key = output_key(index, field);
    match outputs.get(&key) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim()),
        _ => Err(InfraError::MissingOutput(key)),
    }
}

fn address(outputs: &OutputMap, index: usize, field: &str) -> Result<IpAddr, InfraError> {
    let value = lookup(outputs, index, field)?;
    value.parse().map_err(|_| InfraError::InvalidOutput {
        key: output_key(index, field),
        value: value.to_string(),
    })
}

/// Build the host followed by every tenant, in ordinal order
pub fn parse_instances(outputs: &OutputMap, total: usize) -> Result<Vec<Instance>, InfraError> {
    let mut instances = Vec::with_capacity(total);

    for index in 1..=total {
        let node1 = address(outputs, index, "server1_ip")?;
        let node2 = address(outputs, index, "server2_ip")?;
        let endpoint = lookup(outputs, index, "mysql_endpoint")?;
        let password = lookup(outputs, index, "mysql_password")?;
        let url = lookup(outputs, index, "rancher_url")?;

        let instance = if index == 1 {
            Instance::host(endpoint, password, url, node1, node2)
        } else {
            Instance::tenant(index - 1, endpoint, password, url, node1, node2)
                .map_err(|e| InfraError::Decode(e.to_string()))?
        };
        instances.push(instance);
    }

    Ok(instances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_common::Role;

    fn outputs(total: usize) -> OutputMap {
        let mut map = OutputMap::new();
        for n in 1..=total {
            map.insert(output_key(n, "server1_ip"), format!("10.0.{}.1", n));
            map.insert(output_key(n, "server2_ip"), format!("10.0.{}.2", n));
            map.insert(output_key(n, "mysql_endpoint"), format!("db{}.example.com:3306", n));
            map.insert(output_key(n, "mysql_password"), format!("pw{}", n));
            map.insert(output_key(n, "rancher_url"), format!("r{}.example.com", n));
        }
        map
    }

    #[test]
    fn test_host_then_tenants() {
        let instances = parse_instances(&outputs(3), 3).unwrap();
        assert_eq!(instances.len(), 3);
        assert_eq!(instances[0].role, Role::Host);
        assert_eq!(instances[0].url, "r1.example.com");
        assert_eq!(instances[1].ordinal, 1);
        assert_eq!(instances[2].ordinal, 2);
        assert_eq!(instances[2].node2.to_string(), "10.0.3.2");
    }

    #[test]
    fn test_missing_key_named() {
        let mut map = outputs(2);
        map.remove("infra2_mysql_password");
        let err = parse_instances(&map, 2).unwrap_err();
        assert!(matches!(err, InfraError::MissingOutput(ref k) if k == "infra2_mysql_password"));
    }

    #[test]
    fn test_invalid_address_rejected() {
        let mut map = outputs(2);
        map.insert("infra1_server2_ip".to_string(), "not-an-ip".to_string());
        let err = parse_instances(&map, 2).unwrap_err();
        assert!(matches!(err, InfraError::InvalidOutput { ref key, .. } if key == "infra1_server2_ip"));
    }
}
