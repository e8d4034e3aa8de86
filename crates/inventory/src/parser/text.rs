//! Text-based format parsers: INI (Ansible), /etc/hosts, ssh_config, TXT.

use std::net::IpAddr;
use std::str::FromStr;

use serde_json::Value;

use crate::model::ParsedHost;

/// IPv4/IPv6 validation through the standard parser, not a regex.
fn is_ip(value: &str) -> bool {
    IpAddr::from_str(value).is_ok()
}

/// Ansible-style INI inventory: `[group]` sections, `hostname k=v ...` lines.
pub fn parse_ini(content: &str) -> (Vec<ParsedHost>, Vec<String>) {
    let mut hosts = Vec::new();
    let mut errors = Vec::new();
    let mut current_group = "ungrouped".to_string();

    for (line_num, raw) in content.lines().enumerate() {
        let line = raw.trim();
        let line_num = line_num + 1;

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let group = line[1..line.len() - 1].trim();
            if group.is_empty() {
                errors.push(format!("Line {line_num}: Empty group name"));
                continue;
            }
            // `[group:vars]` and friends are not membership sections.
            if !group.contains(':') {
                current_group = group.to_string();
            }
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(hostname) = parts.next() else { continue };
        if hostname.starts_with('[') {
            continue;
        }

        let mut host = ParsedHost::named(hostname);
        host.groups = vec![current_group.clone()];

        for part in parts {
            let Some((key, value)) = part.split_once('=') else { continue };
            match key.to_lowercase().as_str() {
                "ansible_host" | "ip" => {
                    if !is_ip(value) {
                        errors.push(format!(
                            "Line {line_num}: Invalid IP address '{value}' for host '{hostname}'"
                        ));
                    }
                    host.ip_address = Some(value.to_string());
                }
                "ansible_port" => match value.parse::<u16>() {
                    Ok(port) => host.ssh_port = port,
                    Err(_) => errors.push(format!(
                        "Line {line_num}: Invalid port '{value}' for host '{hostname}'"
                    )),
                },
                "ansible_user" | "user" => {
                    host.metadata
                        .insert("ssh_user".to_string(), Value::String(value.to_string()));
                }
                other => {
                    host.metadata
                        .insert(other.to_string(), Value::String(value.to_string()));
                }
            }
        }

        // Group names often carry the environment.
        let group_lower = current_group.to_lowercase();
        if group_lower.contains("prod") {
            host.environment = Some("production".to_string());
        } else if group_lower.contains("staging") || group_lower.contains("stage") {
            host.environment = Some("staging".to_string());
        } else if group_lower.contains("dev") {
            host.environment = Some("development".to_string());
        } else if group_lower.contains("test") {
            host.environment = Some("testing".to_string());
        }

        hosts.push(host);
    }

    (hosts, errors)
}

pub fn parse_etc_hosts(content: &str) -> (Vec<ParsedHost>, Vec<String>) {
    let mut hosts = Vec::new();
    let mut errors = Vec::new();

    const SKIP_IPS: &[&str] = &["127.0.0.1", "::1", "255.255.255.255", "0.0.0.0"];
    const SKIP_HOSTS: &[&str] = &["localhost", "broadcasthost", "ip6-localhost", "ip6-loopback"];

    for (line_num, raw) in content.lines().enumerate() {
        let line_num = line_num + 1;
        // Inline comments are stripped before tokenizing.
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            errors.push(format!("Line {line_num}: Malformed entry, expected 'IP hostname'"));
            continue;
        }

        let ip = parts[0];
        if !is_ip(ip) {
            errors.push(format!("Line {line_num}: Invalid IP address '{ip}'"));
            continue;
        }
        if SKIP_IPS.contains(&ip) {
            continue;
        }

        let primary = parts[1].to_lowercase();
        if SKIP_HOSTS.contains(&primary.as_str()) {
            continue;
        }

        let mut host = ParsedHost::named(&primary);
        host.ip_address = Some(ip.to_string());
        host.aliases = parts[2..]
            .iter()
            .map(|a| a.to_lowercase())
            .filter(|a| !SKIP_HOSTS.contains(&a.as_str()))
            .collect();
        hosts.push(host);
    }

    (hosts, errors)
}

pub fn parse_ssh_config(content: &str) -> (Vec<ParsedHost>, Vec<String>) {
    let mut hosts = Vec::new();
    let mut errors = Vec::new();
    let mut current: Option<ParsedHost> = None;
    let mut current_line = 0usize;

    for (line_num, raw) in content.lines().enumerate() {
        let line = raw.trim();
        let line_num = line_num + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.to_lowercase().starts_with("host ") {
            if let Some(host) = current.take() {
                if !host.hostname.is_empty() {
                    hosts.push(host);
                }
            }

            let name = line[5..].trim();
            if name.is_empty() {
                errors.push(format!("Line {line_num}: Empty Host directive"));
                continue;
            }
            // Wildcard blocks configure patterns, not hosts.
            if name.contains('*') || name.contains('?') {
                continue;
            }
            current = Some(ParsedHost::named(name));
            current_line = line_num;
            continue;
        }

        let Some(host) = current.as_mut() else { continue };
        let Some((key, value)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let value = value.trim();

        match key.to_lowercase().as_str() {
            "hostname" => {
                if is_ip(value) {
                    host.ip_address = Some(value.to_string());
                } else {
                    // HostName is the real FQDN; the Host token becomes an
                    // alias of it.
                    let fqdn = value.to_lowercase();
                    if host.hostname != fqdn && !host.aliases.contains(&host.hostname) {
                        host.aliases.push(host.hostname.clone());
                    }
                    host.hostname = fqdn;
                }
            }
            "port" => match value.parse::<u16>() {
                Ok(port) => host.ssh_port = port,
                Err(_) => errors.push(format!(
                    "Line {line_num}: Invalid port '{value}' for host at line {current_line}"
                )),
            },
            "user" => {
                host.metadata
                    .insert("ssh_user".to_string(), Value::String(value.to_string()));
            }
            "identityfile" => {
                host.metadata
                    .insert("ssh_key".to_string(), Value::String(value.to_string()));
            }
            _ => {}
        }
    }

    if let Some(host) = current {
        if !host.hostname.is_empty() {
            hosts.push(host);
        }
    }

    (hosts, errors)
}

/// One host per line: `IP host`, `host IP`, or bare hostname.
pub fn parse_txt(content: &str) -> (Vec<ParsedHost>, Vec<String>) {
    let mut hosts = Vec::new();
    let mut errors = Vec::new();

    for (line_num, raw) in content.lines().enumerate() {
        let line = raw.trim();
        let line_num = line_num + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let host = match parts.as_slice() {
            [ip, name, ..] if is_ip(ip) => {
                let mut host = ParsedHost::named(*name);
                host.ip_address = Some((*ip).to_string());
                host
            }
            [name, ip, ..] if is_ip(ip) => {
                let mut host = ParsedHost::named(*name);
                host.ip_address = Some((*ip).to_string());
                host
            }
            [name, other, ..] => {
                errors.push(format!(
                    "Line {line_num}: Neither '{name}' nor '{other}' is a valid IP address"
                ));
                ParsedHost::named(*name)
            }
            [name] => ParsedHost::named(*name),
            [] => continue,
        };
        hosts.push(host);
    }

    (hosts, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ini_groups_vars_and_environment() {
        let content = "\
[prod_web]
web-01 ansible_host=10.0.0.1 ansible_port=2222 ansible_user=deploy rack=r1

[dev]
dev-01
";
        let (hosts, errors) = parse_ini(content);
        assert!(errors.is_empty());
        assert_eq!(hosts.len(), 2);

        let web = &hosts[0];
        assert_eq!(web.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(web.ssh_port, 2222);
        assert_eq!(web.metadata["ssh_user"], "deploy");
        assert_eq!(web.metadata["rack"], "r1");
        assert_eq!(web.groups, vec!["prod_web"]);
        assert_eq!(web.environment.as_deref(), Some("production"));

        assert_eq!(hosts[1].environment.as_deref(), Some("development"));
    }

    #[test]
    fn ini_flags_invalid_ip() {
        let (_, errors) = parse_ini("[all]\nbad-01 ansible_host=999.1.1.1\n");
        assert!(errors[0].contains("Invalid IP address"));
    }

    #[test]
    fn etc_hosts_skips_loopback_and_tracks_aliases() {
        let content = "\
127.0.0.1 localhost
::1 ip6-localhost ip6-loopback
10.0.0.5 web-01.example.com web-01 www  # primary frontend
not-an-ip broken
";
        let (hosts, errors) = parse_etc_hosts(content);
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].hostname, "web-01.example.com");
        assert_eq!(hosts[0].aliases, vec!["web-01", "www"]);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn ssh_config_aliases_and_wildcards() {
        let content = "\
Host *
  ForwardAgent no

Host bastion
  HostName bastion.internal.example.com
  Port 2200
  User ops
  IdentityFile ~/.ssh/bastion_ed25519

Host cache
  HostName 10.0.3.3
";
        let (hosts, errors) = parse_ssh_config(content);
        assert!(errors.is_empty());
        assert_eq!(hosts.len(), 2);

        let bastion = &hosts[0];
        // HostName was a FQDN, so the Host token moved into aliases.
        assert_eq!(bastion.hostname, "bastion.internal.example.com");
        assert_eq!(bastion.aliases, vec!["bastion"]);
        assert_eq!(bastion.ssh_port, 2200);
        assert_eq!(bastion.metadata["ssh_user"], "ops");
        assert_eq!(bastion.metadata["ssh_key"], "~/.ssh/bastion_ed25519");

        let cache = &hosts[1];
        assert_eq!(cache.hostname, "cache");
        assert_eq!(cache.ip_address.as_deref(), Some("10.0.3.3"));
    }

    #[test]
    fn txt_accepts_both_orders_and_warns() {
        let content = "\
10.0.0.1 web-01
db-01 10.0.0.2
app-01 fe80::1
plain-01
odd-01 not-an-ip
";
        let (hosts, errors) = parse_txt(content);
        assert_eq!(hosts.len(), 5);
        assert_eq!(hosts[0].ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(hosts[1].ip_address.as_deref(), Some("10.0.0.2"));
        // IPv6 validates through the standard parser.
        assert_eq!(hosts[2].ip_address.as_deref(), Some("fe80::1"));
        assert!(hosts[3].ip_address.is_none());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("odd-01"));
    }
}
