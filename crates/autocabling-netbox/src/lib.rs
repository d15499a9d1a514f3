//! NetBox REST inventory client.
//!
//! Talks to a NetBox-compatible DCIM/IPAM API over HTTPS with a bearer
//! token and paginated list endpoints. This crate owns the HTTP
//! boundary; callers never see raw JSON.

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the inventory client. Every variant carries enough
/// context (operation, endpoint) to log and retry at the caller.
#[derive(Debug, Error)]
pub enum NetboxError {
    #[error("request to {endpoint} failed during {operation}: {source}")]
    Request {
        operation: &'static str,
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned status {status} during {operation}: {body}")]
    Status {
        operation: &'static str,
        endpoint: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("unexpected response shape from {endpoint} during {operation}: {detail}")]
    Shape {
        operation: &'static str,
        endpoint: String,
        detail: String,
    },
}

type Result<T> = std::result::Result<T, NetboxError>;

/// Configuration needed by the inventory client.
#[derive(Debug, Clone)]
pub struct NetboxConfig {
    pub url: String,
    pub token: String,
    pub verify_ssl: bool,
    pub switches_role: Option<String>,
    pub cable_status: String,
    pub dry_run: bool,
}

/// An OOB/IPMI/BMC interface discovered on a device with an assigned OOB IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OobInterface {
    pub device_id: i64,
    pub device_name: String,
    pub interface_id: i64,
    pub interface_name: String,
    pub mac_address: String,
    pub has_cable: bool,
    pub site_slug: Option<String>,
    pub rack_label: Option<String>,
    pub cable_peer_switch: Option<String>,
    pub cable_peer_port: Option<String>,
}

/// A switch (top-of-rack device) eligible for FDB polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Switch {
    pub id: i64,
    pub name: String,
    pub primary_ip: Option<String>,
    pub site_slug: Option<String>,
}

/// A switch-side interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchPort {
    pub id: i64,
    pub name: String,
    pub switch_id: i64,
    pub description: Option<String>,
    pub has_cable: bool,
    pub mgmt_only: bool,
}

/// Result of a successful cable creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CableRecord {
    pub id: i64,
}

pub struct NetboxClient {
    http: reqwest::Client,
    base_url: String,
    config: NetboxConfig,
}

impl NetboxClient {
    pub fn new(config: NetboxConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_ssl)
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    format!("Token {}", config.token)
                        .parse()
                        .expect("token header value"),
                );
                headers.insert(reqwest::header::ACCEPT, "application/json".parse().unwrap());
                headers
            })
            .build()
            .map_err(|source| NetboxError::Request {
                operation: "build_client",
                endpoint: config.url.clone(),
                source,
            })?;

        let base_url = config.url.trim_end_matches('/').to_string();
        Ok(Self { http, base_url, config })
    }

    async fn get_json(&self, operation: &'static str, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/api/{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|source| NetboxError::Request { operation, endpoint: url.clone(), source })?;

        self.parse_json(operation, &url, response).await
    }

    async fn parse_json(
        &self,
        operation: &'static str,
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<Value> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| NetboxError::Request { operation, endpoint: endpoint.to_string(), source })?;

        if !status.is_success() {
            return Err(NetboxError::Status {
                operation,
                endpoint: endpoint.to_string(),
                status,
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| NetboxError::Shape {
            operation,
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })
    }

    /// GETs every page of a paginated list endpoint, following `next`
    /// until it is `null`.
    async fn get_all(&self, operation: &'static str, path: &str, params: &[(&str, &str)]) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        let mut url = format!("{}/api/{path}", self.base_url);
        let mut first = true;

        loop {
            let response = if first {
                self.http.get(&url).query(params).send().await
            } else {
                self.http.get(&url).send().await
            }
            .map_err(|source| NetboxError::Request { operation, endpoint: url.clone(), source })?;

            let data = self.parse_json(operation, &url, response).await?;

            let page = data
                .get("results")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            results.extend(page);

            match data.get("next").and_then(Value::as_str) {
                Some(next) => {
                    url = next.to_string();
                    first = false;
                }
                None => break,
            }
        }

        Ok(results)
    }

    /// Enumerates devices with an assigned OOB IP, resolves each to its
    /// OOB interface, and drops devices whose OOB interface has no MAC
    /// or no interface assignment (logged as a warning, not an error).
    pub async fn list_oob_interfaces(&self) -> Result<Vec<OobInterface>> {
        let devices = self
            .get_all("list_oob_interfaces", "dcim/devices/", &[("has_oob_ip", "true")])
            .await?;

        let mut result = Vec::new();
        for device in devices {
            let device_name = device.get("name").and_then(Value::as_str).unwrap_or("").to_string();
            let Some(device_id) = device.get("id").and_then(Value::as_i64) else {
                continue;
            };

            let Some(oob_ip_id) = device
                .get("oob_ip")
                .and_then(|v| v.get("id"))
                .and_then(Value::as_i64)
            else {
                continue;
            };

            let ip_data = self
                .get_json("list_oob_interfaces", &format!("ipam/ip-addresses/{oob_ip_id}/"), &[])
                .await?;

            let Some(interface_id) = ip_data
                .get("assigned_object")
                .and_then(|v| v.get("id"))
                .and_then(Value::as_i64)
            else {
                tracing::warn!(device = %device_name, "OOB IP not assigned to interface");
                continue;
            };

            let iface = self
                .get_json("list_oob_interfaces", &format!("dcim/interfaces/{interface_id}/"), &[])
                .await?;

            let Some(mac) = iface.get("mac_address").and_then(Value::as_str).filter(|m| !m.is_empty()) else {
                tracing::warn!(device = %device_name, interface = ?iface.get("name"), "OOB interface has no MAC");
                continue;
            };
            let mac = autocabling_mac::normalize(mac).map_err(|e| NetboxError::Shape {
                operation: "list_oob_interfaces",
                endpoint: format!("dcim/interfaces/{interface_id}/"),
                detail: e.to_string(),
            })?;

            let cable = iface.get("cable");
            let has_cable = cable.map(|c| !c.is_null()).unwrap_or(false);

            let (cable_peer_switch, cable_peer_port) = if has_cable {
                let peer = iface
                    .get("link_peers")
                    .and_then(Value::as_array)
                    .and_then(|peers| peers.first());
                (
                    peer.and_then(|p| p.get("device")).and_then(|d| d.get("name")).and_then(Value::as_str).map(String::from),
                    peer.and_then(|p| p.get("name")).and_then(Value::as_str).map(String::from),
                )
            } else {
                (None, None)
            };

            result.push(OobInterface {
                device_id,
                device_name,
                interface_id,
                interface_name: iface.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                mac_address: mac,
                has_cable,
                site_slug: device.get("site").and_then(|s| s.get("slug")).and_then(Value::as_str).map(String::from),
                rack_label: device.get("rack").and_then(|r| r.get("display")).and_then(Value::as_str).map(String::from),
                cable_peer_switch,
                cable_peer_port,
            });
        }

        tracing::info!(count = result.len(), "found devices with OOB IP and MAC addresses");
        Ok(result)
    }

    fn device_to_switch(&self, device: &Value, site_slug: Option<String>) -> Option<Switch> {
        let id = device.get("id").and_then(Value::as_i64)?;
        let name = device.get("name").and_then(Value::as_str)?.to_string();
        let primary_ip = device
            .get("primary_ip")
            .and_then(|ip| ip.get("address"))
            .and_then(Value::as_str)
            .and_then(|addr| addr.split('/').next())
            .map(String::from);
        let site_slug = site_slug.or_else(|| {
            device.get("site").and_then(|s| s.get("slug")).and_then(Value::as_str).map(String::from)
        });

        Some(Switch { id, name, primary_ip, site_slug })
    }

    /// Lists switches eligible for FDB polling. If `sites` is non-empty,
    /// unions per-site results (optionally role-filtered); otherwise
    /// filters by the configured role. With neither filter set, warns
    /// and returns every device.
    pub async fn list_switches(&self, sites: &[String]) -> Result<Vec<Switch>> {
        if !sites.is_empty() {
            let mut result = Vec::new();
            for site in sites {
                let mut params = vec![("site__slug", site.as_str())];
                if let Some(role) = &self.config.switches_role {
                    params.push(("role", role.as_str()));
                }
                let devices = self.get_all("list_switches", "dcim/devices/", &params).await?;
                for device in devices {
                    if let Some(sw) = self.device_to_switch(&device, Some(site.clone())) {
                        result.push(sw);
                    }
                }
            }
            tracing::info!(count = result.len(), sites = ?sites, "found switches for sites");
            return Ok(result);
        }

        let params: Vec<(&str, &str)> = match &self.config.switches_role {
            Some(role) => vec![("role", role.as_str())],
            None => {
                tracing::warn!("no switch filters configured, fetching all devices");
                Vec::new()
            }
        };

        let devices = self.get_all("list_switches", "dcim/devices/", &params).await?;
        let result: Vec<Switch> = devices.iter().filter_map(|d| self.device_to_switch(d, None)).collect();
        tracing::info!(count = result.len(), "found switches to poll");
        Ok(result)
    }

    fn json_to_switch_port(&self, iface: &Value, switch_id: i64) -> Option<SwitchPort> {
        let id = iface.get("id").and_then(Value::as_i64)?;
        let name = iface.get("name").and_then(Value::as_str)?.to_string();
        let cable = iface.get("cable");
        let has_cable = cable.map(|c| !c.is_null()).unwrap_or(false);

        Some(SwitchPort {
            id,
            name,
            switch_id,
            description: iface.get("description").and_then(Value::as_str).map(String::from),
            has_cable,
            mgmt_only: iface.get("mgmt_only").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    /// Exact-name switch port lookup.
    pub async fn get_switch_port(&self, switch_id: i64, port_name: &str) -> Result<Option<SwitchPort>> {
        let switch_id_str = switch_id.to_string();
        let interfaces = self
            .get_all(
                "get_switch_port",
                "dcim/interfaces/",
                &[("device_id", switch_id_str.as_str()), ("name", port_name)],
            )
            .await?;

        Ok(interfaces.first().and_then(|i| self.json_to_switch_port(i, switch_id)))
    }

    /// Looks up a switch port by SNMP ifIndex via a NetBox custom field
    /// named `if_index`. NetBox has no native ifIndex concept; this is a
    /// best-effort client-side scan, matching the original implementation.
    pub async fn get_switch_port_by_ifindex(&self, switch_id: i64, ifindex: i64) -> Result<Option<SwitchPort>> {
        let switch_id_str = switch_id.to_string();
        let interfaces = self
            .get_all("get_switch_port_by_ifindex", "dcim/interfaces/", &[("device_id", switch_id_str.as_str())])
            .await?;

        for iface in &interfaces {
            let matches = iface
                .get("custom_fields")
                .and_then(|c| c.get("if_index"))
                .and_then(Value::as_i64)
                == Some(ifindex);
            if matches {
                return Ok(self.json_to_switch_port(iface, switch_id));
            }
        }
        Ok(None)
    }

    /// Checks whether an interface already has a cable attached.
    pub async fn interface_has_cable(&self, port_id: i64) -> Result<bool> {
        let iface = self
            .get_json("interface_has_cable", &format!("dcim/interfaces/{port_id}/"), &[])
            .await?;
        Ok(iface.get("cable").map(|c| !c.is_null()).unwrap_or(false))
    }

    /// Creates a cable between a server OOB interface and a switch port.
    /// Composes the `autocabling:ipmi | source=fdb | created=<ts> | vlan=<n>?`
    /// description, sets the configured status, and in dry-run mode logs
    /// the intent without calling the API.
    pub async fn create_cable(
        &self,
        server_interface_id: i64,
        switch_interface_id: i64,
        vlan: Option<i64>,
        label: Option<&str>,
    ) -> Result<Option<CableRecord>> {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let mut description = format!("autocabling:ipmi | source=fdb | created={timestamp}");
        if let Some(vlan) = vlan {
            description.push_str(&format!(" | vlan={vlan}"));
        }

        if self.config.dry_run {
            tracing::info!(
                server_interface_id,
                switch_interface_id,
                %description,
                "dry run: would create cable"
            );
            return Ok(None);
        }

        let mut payload = serde_json::json!({
            "a_terminations": [{"object_type": "dcim.interface", "object_id": server_interface_id}],
            "b_terminations": [{"object_type": "dcim.interface", "object_id": switch_interface_id}],
            "status": self.config.cable_status,
            "description": description,
        });
        if let Some(label) = label {
            payload["label"] = serde_json::Value::String(label.to_string());
        }

        let url = format!("{}/api/dcim/cables/", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|source| NetboxError::Request {
                operation: "create_cable",
                endpoint: url.clone(),
                source,
            })?;

        let result = match self.parse_json("create_cable", &url, response).await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(server_interface_id, switch_interface_id, error = %e, "failed to create cable");
                return Err(e);
            }
        };

        let id = result.get("id").and_then(Value::as_i64).ok_or_else(|| NetboxError::Shape {
            operation: "create_cable",
            endpoint: url.clone(),
            detail: "response missing id".to_string(),
        })?;

        tracing::info!(cable_id = id, server_interface_id, switch_interface_id, "created cable");
        Ok(Some(CableRecord { id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: String) -> NetboxConfig {
        NetboxConfig {
            url,
            token: "testtoken".to_string(),
            verify_ssl: false,
            switches_role: None,
            cable_status: "connected".to_string(),
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn list_oob_interfaces_follows_pagination_and_drops_macless_devices() {
        let mut server = mockito::Server::new_async().await;

        let page1 = server
            .mock("GET", "/api/dcim/devices/")
            .match_query(mockito::Matcher::UrlEncoded("has_oob_ip".into(), "true".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"results": [{{"id": 1, "name": "srv1", "oob_ip": {{"id": 10}}, "site": {{"slug": "dc1"}}}}], "next": "{}/api/dcim/devices/?page=2"}}"#,
                server.url()
            ))
            .create_async()
            .await;

        let page2 = server
            .mock("GET", "/api/dcim/devices/")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results": [{"id": 2, "name": "srv2-no-mac", "oob_ip": {"id": 20}}], "next": null}"#)
            .create_async()
            .await;

        let ip1 = server
            .mock("GET", "/api/ipam/ip-addresses/10/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"assigned_object": {"id": 100}}"#)
            .create_async()
            .await;

        let ip2 = server
            .mock("GET", "/api/ipam/ip-addresses/20/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"assigned_object": {"id": 200}}"#)
            .create_async()
            .await;

        let iface1 = server
            .mock("GET", "/api/dcim/interfaces/100/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name": "ipmi0", "mac_address": "AA:BB:CC:DD:EE:01", "cable": null}"#)
            .create_async()
            .await;

        let iface2 = server
            .mock("GET", "/api/dcim/interfaces/200/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name": "ipmi0", "mac_address": null, "cable": null}"#)
            .create_async()
            .await;

        let client = NetboxClient::new(config(server.url())).unwrap();
        let interfaces = client.list_oob_interfaces().await.unwrap();

        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0].device_name, "srv1");
        assert_eq!(interfaces[0].mac_address, "aa:bb:cc:dd:ee:01");
        assert_eq!(interfaces[0].site_slug.as_deref(), Some("dc1"));

        page1.assert_async().await;
        page2.assert_async().await;
        ip1.assert_async().await;
        ip2.assert_async().await;
        iface1.assert_async().await;
        iface2.assert_async().await;
    }

    #[tokio::test]
    async fn create_cable_dry_run_skips_request() {
        let server = mockito::Server::new_async().await;
        let mut cfg = config(server.url());
        cfg.dry_run = true;
        let client = NetboxClient::new(cfg).unwrap();

        let result = client.create_cable(1, 2, Some(100), None).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn create_cable_parses_id_and_includes_vlan_in_description() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/dcim/cables/")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "status": "connected",
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": 77}"#)
            .create_async()
            .await;

        let client = NetboxClient::new(config(server.url())).unwrap();
        let result = client.create_cable(1, 2, Some(10), None).await.unwrap();
        assert_eq!(result, Some(CableRecord { id: 77 }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_switch_port_returns_none_when_absent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/dcim/interfaces/")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results": [], "next": null}"#)
            .create_async()
            .await;

        let client = NetboxClient::new(config(server.url())).unwrap();
        let port = client.get_switch_port(1, "Ethernet5").await.unwrap();
        assert!(port.is_none());
    }
}
