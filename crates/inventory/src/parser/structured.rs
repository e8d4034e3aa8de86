//! Structured format parsers: CSV, JSON, YAML.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::model::ParsedHost;

/// Column candidates recognized as the hostname.
const HOSTNAME_FIELDS: &[&str] = &["hostname", "host", "name", "server", "fqdn", "node", "machine"];
const IP_FIELDS: &[&str] = &["ip", "ip_address", "ipaddress", "address", "addr", "ansible_host"];
const ENV_FIELDS: &[&str] = &["environment", "env", "stage", "tier"];

pub fn parse_csv(content: &str) -> (Vec<ParsedHost>, Vec<String>) {
    let mut hosts = Vec::new();
    let mut errors = Vec::new();

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => {
            errors.push(format!("CSV parsing error: {e}"));
            return (hosts, errors);
        }
    };
    let lowered: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();

    let find = |candidates: &[&str]| -> Option<usize> {
        candidates
            .iter()
            .find_map(|c| lowered.iter().position(|h| h == c))
    };

    let Some(hostname_idx) = find(HOSTNAME_FIELDS) else {
        errors.push(format!(
            "No hostname field found. Expected one of: {HOSTNAME_FIELDS:?}"
        ));
        return (hosts, errors);
    };
    let ip_idx = find(IP_FIELDS);
    let env_idx = find(ENV_FIELDS);

    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                errors.push(format!("Row {}: {e}", line + 2));
                continue;
            }
        };
        let Some(hostname) = record.get(hostname_idx).filter(|h| !h.is_empty()) else {
            continue;
        };

        let mut host = ParsedHost::named(hostname);
        host.ip_address = ip_idx
            .and_then(|i| record.get(i))
            .filter(|v| !v.is_empty())
            .map(ToOwned::to_owned);
        host.environment = env_idx
            .and_then(|i| record.get(i))
            .filter(|v| !v.is_empty())
            .map(ToOwned::to_owned);

        for (idx, value) in record.iter().enumerate() {
            if value.is_empty()
                || idx == hostname_idx
                || Some(idx) == ip_idx
                || Some(idx) == env_idx
            {
                continue;
            }
            let Some(column) = lowered.get(idx) else { continue };
            match column.as_str() {
                "groups" | "group" => {
                    host.groups = value.split(',').map(|g| g.trim().to_string()).collect();
                }
                "aliases" | "alias" => {
                    host.aliases = value.split(',').map(|a| a.trim().to_string()).collect();
                }
                "role" => host.role = Some(value.to_string()),
                "service" => host.service = Some(value.to_string()),
                "port" | "ssh_port" => {
                    if let Ok(port) = value.parse::<u16>() {
                        host.ssh_port = port;
                    }
                }
                _ => {
                    host.metadata
                        .insert(column.clone(), Value::String(value.to_string()));
                }
            }
        }
        hosts.push(host);
    }

    (hosts, errors)
}

pub fn parse_json(content: &str) -> (Vec<ParsedHost>, Vec<String>) {
    let mut hosts = Vec::new();
    let mut errors = Vec::new();

    let data: Value = match serde_json::from_str(content) {
        Ok(data) => data,
        Err(e) => {
            errors.push(format!("JSON parsing error: {e}"));
            return (hosts, errors);
        }
    };

    let items: Vec<Value> = match data {
        Value::Array(items) => items,
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("hosts") {
                items.clone()
            } else if map.contains_key("hostname") || map.contains_key("host") {
                vec![Value::Object(map)]
            } else {
                // Object-of-objects: values are the host records.
                map.into_iter().map(|(_, v)| v).collect()
            }
        }
        _ => {
            errors.push("Invalid JSON structure".to_string());
            return (hosts, errors);
        }
    };

    for item in items {
        let Value::Object(item) = item else { continue };
        let Some(hostname) = HOSTNAME_FIELDS
            .iter()
            .find_map(|f| item.get(*f))
            .and_then(json_string)
        else {
            continue;
        };

        let mut host = ParsedHost::named(&hostname);
        host.ip_address = IP_FIELDS.iter().find_map(|f| item.get(*f)).and_then(json_string);
        host.environment = ENV_FIELDS.iter().find_map(|f| item.get(*f)).and_then(json_string);
        host.groups = string_array(item.get("groups"));
        host.aliases = string_array(item.get("aliases"));
        host.role = item.get("role").and_then(json_string);
        host.service = item.get("service").and_then(json_string);
        if let Some(port) = item
            .get("ssh_port")
            .or_else(|| item.get("port"))
            .and_then(json_port)
        {
            host.ssh_port = port;
        }

        const CONSUMED: &[&str] = &[
            "hostname", "host", "ip", "ip_address", "environment", "env", "groups",
            "aliases", "role", "service", "ssh_port", "port",
        ];
        for (key, value) in &item {
            if !CONSUMED.contains(&key.as_str()) {
                host.metadata.insert(key.clone(), value.clone());
            }
        }
        hosts.push(host);
    }

    (hosts, errors)
}

pub fn parse_yaml(content: &str) -> (Vec<ParsedHost>, Vec<String>) {
    match serde_yaml::from_str::<Value>(content) {
        // YAML deserializes straight into a JSON value; reuse that path.
        Ok(data) => parse_json(&data.to_string()),
        Err(e) => (vec![], vec![format!("YAML parsing error: {e}")]),
    }
}

fn json_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(ToOwned::to_owned))
            .collect(),
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_maps_known_columns_and_metadata() {
        let content = "\
hostname,ip,env,groups,role,ssh_port,datacenter
Web-01,10.0.0.1,prod,\"web,frontend\",webserver,2222,eu-west
db-01,10.0.0.2,staging,db,database,22,us-east
";
        let (hosts, errors) = parse_csv(content);
        assert!(errors.is_empty());
        assert_eq!(hosts.len(), 2);

        let web = &hosts[0];
        assert_eq!(web.hostname, "web-01");
        assert_eq!(web.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(web.environment.as_deref(), Some("prod"));
        assert_eq!(web.groups, vec!["web", "frontend"]);
        assert_eq!(web.role.as_deref(), Some("webserver"));
        assert_eq!(web.ssh_port, 2222);
        assert_eq!(web.metadata["datacenter"], "eu-west");
    }

    #[test]
    fn csv_without_hostname_column_errors() {
        let (hosts, errors) = parse_csv("ip,env\n10.0.0.1,prod\n");
        assert!(hosts.is_empty());
        assert!(errors[0].contains("No hostname field"));
    }

    #[test]
    fn json_accepts_all_container_shapes() {
        let array = r#"[{"hostname": "a"}, {"hostname": "b"}]"#;
        assert_eq!(parse_json(array).0.len(), 2);

        let wrapped = r#"{"hosts": [{"hostname": "a"}]}"#;
        assert_eq!(parse_json(wrapped).0.len(), 1);

        let single = r#"{"hostname": "solo", "ip": "10.0.0.9"}"#;
        let (hosts, _) = parse_json(single);
        assert_eq!(hosts[0].hostname, "solo");

        let keyed = r#"{"a": {"hostname": "a"}, "b": {"hostname": "b"}}"#;
        assert_eq!(parse_json(keyed).0.len(), 2);
    }

    #[test]
    fn json_unknown_fields_become_metadata() {
        let (hosts, _) =
            parse_json(r#"[{"hostname": "a", "rack": "r12", "ssh_port": "2200"}]"#);
        assert_eq!(hosts[0].metadata["rack"], "r12");
        assert_eq!(hosts[0].ssh_port, 2200);
    }

    #[test]
    fn yaml_reuses_json_path() {
        let content = "\
hosts:
  - hostname: web-01
    ip: 10.0.0.1
    groups: [web]
  - hostname: db-01
";
        let (hosts, errors) = parse_yaml(content);
        assert!(errors.is_empty());
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].groups, vec!["web"]);
    }

    #[test]
    fn roundtrip_preserves_identity_fields() {
        let (hosts, _) = parse_json(
            r#"[{"hostname": "Edge-01", "ip": "10.9.9.9", "aliases": ["edge"], "groups": ["cdn"], "ssh_port": 2022}]"#,
        );
        let serialized = serde_json::to_string(&hosts).unwrap();
        let (reparsed, _) = parse_json(&serialized);
        assert_eq!(hosts[0].hostname, reparsed[0].hostname);
        assert_eq!(hosts[0].ip_address, reparsed[0].ip_address);
        assert_eq!(hosts[0].aliases, reparsed[0].aliases);
        assert_eq!(hosts[0].groups, reparsed[0].groups);
        assert_eq!(hosts[0].ssh_port, reparsed[0].ssh_port);
    }
}
