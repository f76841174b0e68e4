//! AWS EC2 API client implementation.
//!
//! Requests are unsigned JSON bodies and responses are parsed as JSON. The
//! real EC2 Query API takes form-encoded, SigV4-signed requests and answers
//! in XML, and a signing proxy alone does not translate between the two.
//! This client therefore only talks to an endpoint that speaks this JSON
//! shape, set with [`Aws::with_endpoint`]: a translating gateway or a test
//! double. Use the local backend for dry runs.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use super::models::{
    BlockDeviceMapping, CreateSecurityGroupRequest, CreateSecurityGroupResponse,
    DescribeInstancesResponse, DescribeSecurityGroupsResponse, Ebs, Ec2Instance, IpPermission,
    IpRange, Ipv6Range, RunInstancesRequest, RunInstancesResponse, SecurityGroup,
    SecurityGroupPermissionsRequest, Tag, TagSpecification,
};
use crate::providers::traits::{
    CloudProvider, CloudProviderError, CreateInstanceRequest, Direction, FirewallRule, Instance,
    InstanceStatus, Protocol,
};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Polling interval when waiting for resources.
const POLL_INTERVAL_SECS: u64 = 15;

/// EC2 API version used for every action.
const EC2_API_VERSION: &str = "2016-11-15";

/// AWS cloud provider.
#[derive(Clone)]
pub struct Aws {
    /// HTTP client.
    client: Client,
    /// AWS region.
    region: String,
    /// Endpoint override (JSON gateway or test server).
    endpoint: Option<String>,
    /// Polling interval for `wait_instance_ready`.
    poll_interval: Duration,
}

impl Aws {
    /// Create a new AWS provider.
    ///
    /// # Arguments
    /// * `region` - AWS region (e.g., "us-east-1")
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(region: impl Into<String>) -> Result<Self, CloudProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(CloudProviderError::Http)?;

        Ok(Self {
            client,
            region: region.into(),
            endpoint: None,
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
        })
    }

    /// Send requests to `endpoint` instead of the public regional endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into().trim_end_matches('/').to_string());
        self
    }

    /// Override the status polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Get EC2 API endpoint.
    fn ec2_endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://ec2.{}.amazonaws.com", self.region))
    }

    /// Build the URL for an EC2 action with extra query parameters.
    fn action_url(&self, action: &str, params: &[(&str, &str)]) -> String {
        let mut url = format!(
            "{}/?Action={action}&Version={EC2_API_VERSION}",
            self.ec2_endpoint()
        );
        for (key, value) in params {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(value);
        }
        url
    }

    /// Execute an EC2 action.
    async fn ec2_request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&impl serde::Serialize>,
    ) -> Result<T, CloudProviderError> {
        debug!(url = %url, method = %method, "AWS request");

        let mut request = self.client.request(method, url);
        request = request.header("Content-Type", "application/json").header(
            "X-Amz-Date",
            chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
        );

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// Handle API response.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CloudProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse response");
                CloudProviderError::Serialization(e)
            })
        } else if status == StatusCode::NOT_FOUND {
            Err(CloudProviderError::NotFound(text))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(CloudProviderError::Auth(text))
        } else {
            Err(CloudProviderError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Describe one security group.
    async fn describe_security_group(
        &self,
        group_id: &str,
    ) -> Result<SecurityGroup, CloudProviderError> {
        let url = self.action_url("DescribeSecurityGroups", &[("GroupId.1", group_id)]);
        let response: DescribeSecurityGroupsResponse = self
            .ec2_request(reqwest::Method::GET, &url, None::<&()>)
            .await?;

        response
            .security_groups
            .into_iter()
            .next()
            .ok_or_else(|| CloudProviderError::NotFound(format!("Security group not found: {group_id}")))
    }

    /// Send an authorize/revoke action if there is anything to send.
    async fn permissions_action(
        &self,
        action: &str,
        group_id: &str,
        permissions: Vec<IpPermission>,
    ) -> Result<(), CloudProviderError> {
        if permissions.is_empty() {
            return Ok(());
        }

        let body = SecurityGroupPermissionsRequest {
            group_id: group_id.to_string(),
            ip_permissions: permissions,
        };
        let url = self.action_url(action, &[]);
        self.ec2_request::<serde_json::Value>(reqwest::Method::POST, &url, Some(&body))
            .await?;
        Ok(())
    }

    /// Make the security group carry exactly `rules`.
    ///
    /// Revokes everything currently attached, then authorizes the desired set.
    async fn set_group_rules(
        &self,
        group_id: &str,
        rules: &[FirewallRule],
    ) -> Result<(), CloudProviderError> {
        let current = self.describe_security_group(group_id).await?;

        self.permissions_action("RevokeSecurityGroupIngress", group_id, current.ip_permissions)
            .await?;
        self.permissions_action(
            "RevokeSecurityGroupEgress",
            group_id,
            current.ip_permissions_egress,
        )
        .await?;

        let (ingress, egress): (Vec<_>, Vec<_>) = rules
            .iter()
            .partition(|rule| rule.direction == Direction::Inbound);

        self.permissions_action(
            "AuthorizeSecurityGroupIngress",
            group_id,
            ingress.into_iter().map(Self::to_permission).collect(),
        )
        .await?;
        self.permissions_action(
            "AuthorizeSecurityGroupEgress",
            group_id,
            egress.into_iter().map(Self::to_permission).collect(),
        )
        .await?;

        info!(group_id = %group_id, rule_count = rules.len(), "Security group rules replaced");
        Ok(())
    }

    /// Convert a firewall rule to an EC2 permission.
    fn to_permission(rule: &FirewallRule) -> IpPermission {
        let (ip_protocol, from_port, to_port) = match (rule.protocol, rule.port) {
            (Protocol::All, _) => ("-1".to_string(), None, None),
            (protocol, Some(port)) => (
                protocol.to_string(),
                Some(i32::from(port)),
                Some(i32::from(port)),
            ),
            (protocol, None) => (protocol.to_string(), Some(0), Some(65535)),
        };

        let (ip_ranges, ipv6_ranges) = if rule.cidr.contains(':') {
            (
                Vec::new(),
                vec![Ipv6Range {
                    cidr_ipv6: rule.cidr.clone(),
                    description: rule.description.clone(),
                }],
            )
        } else {
            (
                vec![IpRange {
                    cidr_ip: rule.cidr.clone(),
                    description: rule.description.clone(),
                }],
                Vec::new(),
            )
        };

        IpPermission {
            ip_protocol,
            from_port,
            to_port,
            ip_ranges,
            ipv6_ranges,
        }
    }

    /// Expand EC2 permissions into one firewall rule per CIDR.
    fn to_rules(permissions: &[IpPermission], direction: Direction) -> Vec<FirewallRule> {
        let mut rules = Vec::new();

        for permission in permissions {
            let protocol = match permission.ip_protocol.as_str() {
                "tcp" | "6" => Protocol::Tcp,
                "udp" | "17" => Protocol::Udp,
                _ => Protocol::All,
            };
            let port = match (protocol, permission.from_port, permission.to_port) {
                (Protocol::All, _, _) => None,
                (_, Some(from), Some(to)) if from == to => u16::try_from(from).ok(),
                _ => None,
            };

            let cidrs = permission
                .ip_ranges
                .iter()
                .map(|r| (r.cidr_ip.clone(), r.description.clone()))
                .chain(
                    permission
                        .ipv6_ranges
                        .iter()
                        .map(|r| (r.cidr_ipv6.clone(), r.description.clone())),
                );

            for (cidr, description) in cidrs {
                rules.push(FirewallRule {
                    direction,
                    protocol,
                    port,
                    cidr,
                    description,
                });
            }
        }

        rules
    }

    /// Convert EC2 instance to our type.
    fn to_instance(ec2: &Ec2Instance) -> Instance {
        let status = match ec2.state.name.as_str() {
            "pending" => InstanceStatus::Pending,
            "running" => InstanceStatus::Running,
            "stopped" | "stopping" => InstanceStatus::Stopped,
            "shutting-down" => InstanceStatus::Terminating,
            "terminated" => InstanceStatus::Terminated,
            _ => InstanceStatus::Unknown,
        };

        let tags: BTreeMap<String, String> = ec2
            .tags
            .iter()
            .map(|t| (t.key.clone(), t.value.clone()))
            .collect();

        let name = tags
            .get("Name")
            .cloned()
            .unwrap_or_else(|| ec2.instance_id.clone());

        let region = ec2
            .placement
            .as_ref()
            .map(|p| p.availability_zone.clone())
            .unwrap_or_default();

        Instance {
            id: ec2.instance_id.clone(),
            name,
            status,
            instance_type: ec2.instance_type.clone(),
            region,
            public_ip: ec2.public_ip_address.clone(),
            private_ip: ec2.private_ip_address.clone(),
            image: ec2.image_id.clone(),
            root_volume_gib: ec2
                .block_device_mappings
                .first()
                .and_then(|b| b.volume_size),
            firewall_rules: Vec::new(),
            tags,
            created_at: ec2
                .launch_time
                .as_ref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc)),
        }
    }

    /// Convert an EC2 instance and fill in its security group rules.
    async fn hydrate(&self, ec2: &Ec2Instance) -> Result<Instance, CloudProviderError> {
        let mut instance = Self::to_instance(ec2);

        if let Some(group) = ec2.security_groups.first() {
            let sg = self.describe_security_group(&group.group_id).await?;
            instance.firewall_rules = Self::to_rules(&sg.ip_permissions, Direction::Inbound);
            instance
                .firewall_rules
                .extend(Self::to_rules(&sg.ip_permissions_egress, Direction::Outbound));
        }

        Ok(instance)
    }

    /// Fetch the raw EC2 record for an instance.
    async fn describe_instance(&self, id: &str) -> Result<Ec2Instance, CloudProviderError> {
        let url = self.action_url("DescribeInstances", &[("InstanceId.1", id)]);
        let response: DescribeInstancesResponse = self
            .ec2_request(reqwest::Method::GET, &url, None::<&()>)
            .await?;

        response
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .next()
            .ok_or_else(|| CloudProviderError::NotFound(format!("Instance not found: {id}")))
    }
}

#[async_trait]
impl CloudProvider for Aws {
    async fn create_instance(
        &self,
        req: CreateInstanceRequest,
    ) -> Result<Instance, CloudProviderError> {
        info!(
            name = %req.name,
            instance_type = %req.instance_type,
            region = %req.region,
            "Creating EC2 instance"
        );

        let mut tags = vec![Tag {
            key: "Name".to_string(),
            value: req.name.clone(),
        }];
        tags.extend(
            req.tags
                .iter()
                .filter(|(k, _)| k.as_str() != "Name")
                .map(|(k, v)| Tag {
                    key: k.clone(),
                    value: v.clone(),
                }),
        );

        let sg_body = CreateSecurityGroupRequest {
            // Terminated hosts leave their group behind, so each instance gets
            // a fresh name.
            group_name: format!("{}-sg-{}", req.name, &uuid::Uuid::new_v4().simple().to_string()[..8]),
            description: format!("Inference host access for {}", req.name),
            tag_specifications: Some(vec![TagSpecification {
                resource_type: "security-group".to_string(),
                tags: tags.clone(),
            }]),
        };
        let url = self.action_url("CreateSecurityGroup", &[]);
        let sg: CreateSecurityGroupResponse = self
            .ec2_request(reqwest::Method::POST, &url, Some(&sg_body))
            .await?;
        debug!(group_id = %sg.group_id, "Security group created");

        self.set_group_rules(&sg.group_id, &req.firewall_rules)
            .await?;

        let body = RunInstancesRequest {
            image_id: req.image,
            instance_type: req.instance_type,
            min_count: 1,
            max_count: 1,
            key_name: req.ssh_keys.first().cloned(),
            security_group_ids: Some(vec![sg.group_id.clone()]),
            block_device_mappings: vec![BlockDeviceMapping {
                device_name: req.root_volume.device_name,
                ebs: Ebs {
                    volume_size: req.root_volume.size_gib,
                    volume_type: req.root_volume.volume_type,
                    delete_on_termination: true,
                },
            }],
            user_data: req
                .user_data
                .map(|s| base64::Engine::encode(&base64::engine::general_purpose::STANDARD, s)),
            tag_specifications: Some(vec![TagSpecification {
                resource_type: "instance".to_string(),
                tags,
            }]),
        };

        let url = self.action_url("RunInstances", &[]);
        let response: RunInstancesResponse = self
            .ec2_request(reqwest::Method::POST, &url, Some(&body))
            .await?;

        let ec2 = response
            .instances
            .first()
            .ok_or_else(|| CloudProviderError::Api {
                status: 500,
                message: "No instance returned from creation".to_string(),
            })?;

        info!(instance_id = %ec2.instance_id, group_id = %sg.group_id, "EC2 instance created");

        let mut instance = Self::to_instance(ec2);
        instance.firewall_rules = req.firewall_rules;
        instance.root_volume_gib = Some(req.root_volume.size_gib);
        Ok(instance)
    }

    async fn get_instance(&self, id: &str) -> Result<Instance, CloudProviderError> {
        let ec2 = self.describe_instance(id).await?;
        self.hydrate(&ec2).await
    }

    async fn find_instance(&self, name: &str) -> Result<Option<Instance>, CloudProviderError> {
        let url = self.action_url(
            "DescribeInstances",
            &[("Filter.1.Name", "tag:Name"), ("Filter.1.Value.1", name)],
        );
        let response: DescribeInstancesResponse = self
            .ec2_request(reqwest::Method::GET, &url, None::<&()>)
            .await?;

        let live = response
            .reservations
            .iter()
            .flat_map(|r| r.instances.iter())
            .find(|ec2| !matches!(ec2.state.name.as_str(), "terminated" | "shutting-down"));

        match live {
            Some(ec2) => Ok(Some(self.hydrate(ec2).await?)),
            None => Ok(None),
        }
    }

    async fn wait_instance_ready(
        &self,
        id: &str,
        timeout_secs: u64,
    ) -> Result<Instance, CloudProviderError> {
        info!(instance_id = %id, timeout_secs, "Waiting for instance to be ready");

        let start = std::time::Instant::now();
        let timeout = Duration::from_secs(timeout_secs);

        loop {
            let instance = self.get_instance(id).await?;

            debug!(
                instance_id = %id,
                status = %instance.status,
                elapsed_secs = start.elapsed().as_secs(),
                "Polling instance status"
            );

            if instance.status == InstanceStatus::Running {
                info!(instance_id = %id, "Instance is ready");
                return Ok(instance);
            }

            if instance.status == InstanceStatus::Terminated {
                return Err(CloudProviderError::Api {
                    status: 500,
                    message: "Instance was terminated".to_string(),
                });
            }

            if start.elapsed() > timeout {
                return Err(CloudProviderError::Timeout(timeout_secs));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn replace_firewall_rules(
        &self,
        id: &str,
        rules: Vec<FirewallRule>,
    ) -> Result<(), CloudProviderError> {
        info!(instance_id = %id, rule_count = rules.len(), "Replacing firewall rules");

        let ec2 = self.describe_instance(id).await?;
        let group = ec2.security_groups.first().ok_or_else(|| {
            CloudProviderError::Config(format!("Instance {id} has no security group attached"))
        })?;

        self.set_group_rules(&group.group_id, &rules).await
    }

    async fn terminate_instance(&self, id: &str) -> Result<(), CloudProviderError> {
        info!(instance_id = %id, "Terminating instance");

        let url = self.action_url("TerminateInstances", &[("InstanceId.1", id)]);
        self.ec2_request::<serde_json::Value>(reqwest::Method::POST, &url, None::<&()>)
            .await?;

        info!(instance_id = %id, "Instance termination initiated");
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, CloudProviderError> {
        let url = self.action_url("DescribeInstances", &[]);

        let response: DescribeInstancesResponse = self
            .ec2_request(reqwest::Method::GET, &url, None::<&()>)
            .await?;

        let instances: Vec<Instance> = response
            .reservations
            .iter()
            .flat_map(|r| r.instances.iter())
            .map(Self::to_instance)
            .collect();

        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::aws::models::{GroupIdentifier, InstanceState, Placement};

    fn ec2(state: &str) -> Ec2Instance {
        Ec2Instance {
            instance_id: "i-1234567890abcdef0".to_string(),
            instance_type: "t3.xlarge".to_string(),
            state: InstanceState {
                code: 16,
                name: state.to_string(),
            },
            public_ip_address: Some("198.51.100.7".to_string()),
            private_ip_address: Some("10.0.0.1".to_string()),
            image_id: "ami-0e001c9271cf7f3b9".to_string(),
            placement: Some(Placement {
                availability_zone: "us-east-1a".to_string(),
            }),
            launch_time: None,
            tags: vec![Tag {
                key: "Name".to_string(),
                value: "inference-host".to_string(),
            }],
            key_name: Some("operator".to_string()),
            security_groups: vec![GroupIdentifier {
                group_id: "sg-1".to_string(),
                group_name: None,
            }],
            block_device_mappings: Vec::new(),
        }
    }

    #[test]
    fn test_instance_status_mapping() {
        let converted = Aws::to_instance(&ec2("running"));
        assert_eq!(converted.status, InstanceStatus::Running);
        assert_eq!(converted.id, "i-1234567890abcdef0");
        assert_eq!(converted.name, "inference-host");

        assert_eq!(
            Aws::to_instance(&ec2("shutting-down")).status,
            InstanceStatus::Terminating
        );
    }

    #[test]
    fn test_permission_mapping() {
        let ssh = Aws::to_permission(&FirewallRule::inbound_tcp(22, "203.0.113.5/32"));
        assert_eq!(ssh.ip_protocol, "tcp");
        assert_eq!(ssh.from_port, Some(22));
        assert_eq!(ssh.to_port, Some(22));
        assert_eq!(ssh.ip_ranges[0].cidr_ip, "203.0.113.5/32");

        let egress = Aws::to_permission(&FirewallRule::outbound_all("::/0"));
        assert_eq!(egress.ip_protocol, "-1");
        assert!(egress.from_port.is_none());
        assert_eq!(egress.ipv6_ranges[0].cidr_ipv6, "::/0");
    }

    #[test]
    fn test_permissions_expand_per_cidr() {
        let permission = IpPermission {
            ip_protocol: "tcp".to_string(),
            from_port: Some(11434),
            to_port: Some(11434),
            ip_ranges: vec![
                IpRange {
                    cidr_ip: "203.0.113.5/32".to_string(),
                    description: None,
                },
                IpRange {
                    cidr_ip: "198.51.100.0/24".to_string(),
                    description: None,
                },
            ],
            ipv6_ranges: Vec::new(),
        };

        let rules = Aws::to_rules(&[permission], Direction::Inbound);
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.port == Some(11434)));
    }

    #[test]
    fn test_action_url_uses_endpoint_override() {
        let aws = Aws::new("us-east-1")
            .unwrap()
            .with_endpoint("http://127.0.0.1:9000/");
        assert_eq!(
            aws.action_url("DescribeInstances", &[("InstanceId.1", "i-1")]),
            "http://127.0.0.1:9000/?Action=DescribeInstances&Version=2016-11-15&InstanceId.1=i-1"
        );
    }
}
