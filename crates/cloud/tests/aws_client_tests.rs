//! AWS client tests against a mock EC2 endpoint.

use std::collections::BTreeMap;

use inference_cloud::aws::Aws;
use inference_cloud::{
    CloudProvider, CloudProviderError, CreateInstanceRequest, FirewallRule, InstanceStatus,
    RootVolume,
};
use serde_json::json;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn aws(server: &MockServer) -> Aws {
    Aws::new("us-east-1").unwrap().with_endpoint(server.uri())
}

fn instance_json(state: &str) -> serde_json::Value {
    json!({
        "InstanceId": "i-0abc",
        "InstanceType": "t3.xlarge",
        "State": { "Code": 16, "Name": state },
        "PublicIpAddress": "198.51.100.7",
        "PrivateIpAddress": "10.0.0.5",
        "ImageId": "ami-0e001c9271cf7f3b9",
        "Placement": { "AvailabilityZone": "us-east-1a" },
        "Tags": [ { "Key": "Name", "Value": "inference-host" } ],
        "SecurityGroups": [ { "GroupId": "sg-0abc", "GroupName": "inference-host-sg" } ]
    })
}

fn security_group_json() -> serde_json::Value {
    json!({
        "SecurityGroups": [{
            "GroupId": "sg-0abc",
            "IpPermissions": [
                {
                    "IpProtocol": "tcp", "FromPort": 22, "ToPort": 22,
                    "IpRanges": [ { "CidrIp": "203.0.113.5/32" } ]
                },
                {
                    "IpProtocol": "tcp", "FromPort": 11434, "ToPort": 11434,
                    "IpRanges": [ { "CidrIp": "203.0.113.5/32" } ]
                }
            ],
            "IpPermissionsEgress": [
                { "IpProtocol": "-1", "IpRanges": [ { "CidrIp": "0.0.0.0/0" } ] }
            ]
        }]
    })
}

async fn mount_action(server: &MockServer, action: &str, body: serde_json::Value) {
    Mock::given(query_param("Action", action))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_create_instance_sets_up_security_group() {
    let server = MockServer::start().await;

    mount_action(&server, "CreateSecurityGroup", json!({ "GroupId": "sg-0abc" })).await;
    mount_action(&server, "DescribeSecurityGroups", security_group_json()).await;
    for action in [
        "RevokeSecurityGroupIngress",
        "RevokeSecurityGroupEgress",
        "AuthorizeSecurityGroupIngress",
        "AuthorizeSecurityGroupEgress",
    ] {
        Mock::given(method("POST"))
            .and(query_param("Action", action))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Return": true })))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("POST"))
        .and(query_param("Action", "RunInstances"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "Instances": [ instance_json("pending") ] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let rules = vec![
        FirewallRule::inbound_tcp(22, "203.0.113.5/32"),
        FirewallRule::inbound_tcp(11434, "203.0.113.5/32"),
        FirewallRule::outbound_all("0.0.0.0/0"),
    ];
    let instance = aws(&server)
        .create_instance(CreateInstanceRequest {
            name: "inference-host".to_string(),
            instance_type: "t3.xlarge".to_string(),
            region: "us-east-1".to_string(),
            image: "ami-0e001c9271cf7f3b9".to_string(),
            ssh_keys: vec!["operator".to_string()],
            root_volume: RootVolume {
                device_name: "/dev/sda1".to_string(),
                size_gib: 50,
                volume_type: "gp3".to_string(),
            },
            firewall_rules: rules.clone(),
            user_data: Some("#!/bin/bash\necho hi\n".to_string()),
            tags: BTreeMap::new(),
        })
        .await
        .unwrap();

    assert_eq!(instance.id, "i-0abc");
    assert_eq!(instance.status, InstanceStatus::Pending);
    assert_eq!(instance.firewall_rules, rules);
    assert_eq!(instance.root_volume_gib, Some(50));
}

#[tokio::test]
async fn test_find_instance_reads_security_group_rules() {
    let server = MockServer::start().await;

    mount_action(
        &server,
        "DescribeInstances",
        json!({ "Reservations": [ { "Instances": [
            instance_json("terminated"),
            instance_json("running")
        ] } ] }),
    )
    .await;
    mount_action(&server, "DescribeSecurityGroups", security_group_json()).await;

    let instance = aws(&server)
        .find_instance("inference-host")
        .await
        .unwrap()
        .expect("live instance");

    assert_eq!(instance.status, InstanceStatus::Running);
    assert_eq!(instance.firewall_rules.len(), 3);
    assert!(instance
        .firewall_rules
        .contains(&FirewallRule::inbound_tcp(11434, "203.0.113.5/32")));
    assert!(instance
        .firewall_rules
        .contains(&FirewallRule::outbound_all("0.0.0.0/0")));
}

#[tokio::test]
async fn test_find_instance_ignores_terminated() {
    let server = MockServer::start().await;

    mount_action(
        &server,
        "DescribeInstances",
        json!({ "Reservations": [ { "Instances": [ instance_json("terminated") ] } ] }),
    )
    .await;

    let found = aws(&server).find_instance("inference-host").await.unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_api_error_is_surfaced_verbatim() {
    let server = MockServer::start().await;

    Mock::given(query_param("Action", "TerminateInstances"))
        .respond_with(ResponseTemplate::new(400).set_body_string("InvalidInstanceID.Malformed"))
        .mount(&server)
        .await;

    let err = aws(&server).terminate_instance("i-bad").await.unwrap_err();
    match err {
        CloudProviderError::Api { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "InvalidInstanceID.Malformed");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_forbidden_maps_to_auth_error() {
    let server = MockServer::start().await;

    Mock::given(query_param("Action", "DescribeInstances"))
        .respond_with(ResponseTemplate::new(403).set_body_string("UnauthorizedOperation"))
        .mount(&server)
        .await;

    let err = aws(&server).list_instances().await.unwrap_err();
    assert!(matches!(err, CloudProviderError::Auth(_)));
}
