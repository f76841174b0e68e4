//! AWS API request and response models.

use serde::{Deserialize, Serialize};

// ============================================================================
// EC2 (Instance) types
// ============================================================================

/// EC2 instance information.
#[derive(Debug, Clone, Deserialize)]
pub struct Ec2Instance {
    /// Instance ID.
    #[serde(rename = "InstanceId")]
    pub instance_id: String,
    /// Instance type.
    #[serde(rename = "InstanceType")]
    pub instance_type: String,
    /// Instance state.
    #[serde(rename = "State")]
    pub state: InstanceState,
    /// Public IP address.
    #[serde(rename = "PublicIpAddress")]
    pub public_ip_address: Option<String>,
    /// Private IP address.
    #[serde(rename = "PrivateIpAddress")]
    pub private_ip_address: Option<String>,
    /// Image ID (AMI).
    #[serde(rename = "ImageId")]
    pub image_id: String,
    /// Availability zone.
    #[serde(rename = "Placement")]
    pub placement: Option<Placement>,
    /// Launch time.
    #[serde(rename = "LaunchTime")]
    pub launch_time: Option<String>,
    /// Tags.
    #[serde(rename = "Tags", default)]
    pub tags: Vec<Tag>,
    /// Key name.
    #[serde(rename = "KeyName")]
    pub key_name: Option<String>,
    /// Attached security groups.
    #[serde(rename = "SecurityGroups", default)]
    pub security_groups: Vec<GroupIdentifier>,
    /// Attached block devices.
    #[serde(rename = "BlockDeviceMappings", default)]
    pub block_device_mappings: Vec<InstanceBlockDevice>,
}

/// Instance state.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceState {
    /// State code.
    #[serde(rename = "Code")]
    pub code: i32,
    /// State name.
    #[serde(rename = "Name")]
    pub name: String,
}

/// Placement information.
#[derive(Debug, Clone, Deserialize)]
pub struct Placement {
    /// Availability zone.
    #[serde(rename = "AvailabilityZone")]
    pub availability_zone: String,
}

/// Security group reference on an instance.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupIdentifier {
    /// Group ID.
    #[serde(rename = "GroupId")]
    pub group_id: String,
    /// Group name.
    #[serde(rename = "GroupName", default)]
    pub group_name: Option<String>,
}

/// Block device attached to a running instance.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceBlockDevice {
    /// Device name.
    #[serde(rename = "DeviceName")]
    pub device_name: String,
    /// Volume size, when the API includes it.
    #[serde(rename = "VolumeSize", default)]
    pub volume_size: Option<u32>,
}

/// Tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key.
    #[serde(rename = "Key")]
    pub key: String,
    /// Tag value.
    #[serde(rename = "Value")]
    pub value: String,
}

/// EBS settings for a block device mapping.
#[derive(Debug, Serialize)]
pub struct Ebs {
    /// Volume size in GiB.
    #[serde(rename = "VolumeSize")]
    pub volume_size: u32,
    /// Volume type.
    #[serde(rename = "VolumeType")]
    pub volume_type: String,
    /// Delete on termination.
    #[serde(rename = "DeleteOnTermination")]
    pub delete_on_termination: bool,
}

/// Block device mapping for instance creation.
#[derive(Debug, Serialize)]
pub struct BlockDeviceMapping {
    /// Device name.
    #[serde(rename = "DeviceName")]
    pub device_name: String,
    /// EBS settings.
    #[serde(rename = "Ebs")]
    pub ebs: Ebs,
}

/// Run instances request.
#[derive(Debug, Serialize)]
pub struct RunInstancesRequest {
    /// Image ID (AMI).
    #[serde(rename = "ImageId")]
    pub image_id: String,
    /// Instance type.
    #[serde(rename = "InstanceType")]
    pub instance_type: String,
    /// Minimum count.
    #[serde(rename = "MinCount")]
    pub min_count: i32,
    /// Maximum count.
    #[serde(rename = "MaxCount")]
    pub max_count: i32,
    /// Key name.
    #[serde(rename = "KeyName", skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    /// Security group IDs.
    #[serde(rename = "SecurityGroupIds", skip_serializing_if = "Option::is_none")]
    pub security_group_ids: Option<Vec<String>>,
    /// Block device mappings.
    #[serde(rename = "BlockDeviceMappings")]
    pub block_device_mappings: Vec<BlockDeviceMapping>,
    /// User data (base64 encoded).
    #[serde(rename = "UserData", skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    /// Tags.
    #[serde(rename = "TagSpecifications", skip_serializing_if = "Option::is_none")]
    pub tag_specifications: Option<Vec<TagSpecification>>,
}

/// Tag specification for instance creation.
#[derive(Debug, Serialize)]
pub struct TagSpecification {
    /// Resource type.
    #[serde(rename = "ResourceType")]
    pub resource_type: String,
    /// Tags.
    #[serde(rename = "Tags")]
    pub tags: Vec<Tag>,
}

/// Run instances response.
#[derive(Debug, Deserialize)]
pub struct RunInstancesResponse {
    /// Launched instances.
    #[serde(rename = "Instances", default)]
    pub instances: Vec<Ec2Instance>,
}

/// Describe instances response.
#[derive(Debug, Deserialize)]
pub struct DescribeInstancesResponse {
    /// Reservations.
    #[serde(rename = "Reservations", default)]
    pub reservations: Vec<Reservation>,
}

/// Reservation.
#[derive(Debug, Deserialize)]
pub struct Reservation {
    /// Instances.
    #[serde(rename = "Instances", default)]
    pub instances: Vec<Ec2Instance>,
}

// ============================================================================
// Security group types
// ============================================================================

/// IPv4 range inside an IP permission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpRange {
    /// CIDR block.
    #[serde(rename = "CidrIp")]
    pub cidr_ip: String,
    /// Description.
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// IPv6 range inside an IP permission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ipv6Range {
    /// CIDR block.
    #[serde(rename = "CidrIpv6")]
    pub cidr_ipv6: String,
    /// Description.
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A security group permission (ingress or egress).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpPermission {
    /// Protocol (`tcp`, `udp`, or `-1` for all).
    #[serde(rename = "IpProtocol")]
    pub ip_protocol: String,
    /// First port of the range.
    #[serde(rename = "FromPort", default, skip_serializing_if = "Option::is_none")]
    pub from_port: Option<i32>,
    /// Last port of the range.
    #[serde(rename = "ToPort", default, skip_serializing_if = "Option::is_none")]
    pub to_port: Option<i32>,
    /// IPv4 ranges.
    #[serde(rename = "IpRanges", default)]
    pub ip_ranges: Vec<IpRange>,
    /// IPv6 ranges.
    #[serde(rename = "Ipv6Ranges", default)]
    pub ipv6_ranges: Vec<Ipv6Range>,
}

/// Create security group request.
#[derive(Debug, Serialize)]
pub struct CreateSecurityGroupRequest {
    /// Group name.
    #[serde(rename = "GroupName")]
    pub group_name: String,
    /// Description.
    #[serde(rename = "Description")]
    pub description: String,
    /// Tags.
    #[serde(rename = "TagSpecifications", skip_serializing_if = "Option::is_none")]
    pub tag_specifications: Option<Vec<TagSpecification>>,
}

/// Create security group response.
#[derive(Debug, Deserialize)]
pub struct CreateSecurityGroupResponse {
    /// New group ID.
    #[serde(rename = "GroupId")]
    pub group_id: String,
}

/// Security group description.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityGroup {
    /// Group ID.
    #[serde(rename = "GroupId")]
    pub group_id: String,
    /// Ingress permissions.
    #[serde(rename = "IpPermissions", default)]
    pub ip_permissions: Vec<IpPermission>,
    /// Egress permissions.
    #[serde(rename = "IpPermissionsEgress", default)]
    pub ip_permissions_egress: Vec<IpPermission>,
}

/// Describe security groups response.
#[derive(Debug, Deserialize)]
pub struct DescribeSecurityGroupsResponse {
    /// Groups.
    #[serde(rename = "SecurityGroups", default)]
    pub security_groups: Vec<SecurityGroup>,
}

/// Authorize/revoke request body, shared by ingress and egress actions.
#[derive(Debug, Serialize)]
pub struct SecurityGroupPermissionsRequest {
    /// Group ID.
    #[serde(rename = "GroupId")]
    pub group_id: String,
    /// Permissions to add or remove.
    #[serde(rename = "IpPermissions")]
    pub ip_permissions: Vec<IpPermission>,
}

/// Pinned Ubuntu AMI IDs.
pub mod amis {
    /// Ubuntu 24.04 LTS (us-east-1).
    pub const UBUNTU_24_04_US_EAST_1: &str = "ami-0e001c9271cf7f3b9";
    /// Ubuntu 22.04 LTS (us-east-1).
    pub const UBUNTU_22_04_US_EAST_1: &str = "ami-0557a15b87f6559cf";
}
