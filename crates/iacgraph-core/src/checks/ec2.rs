//! EC2 checks: security group rules, volumes, instances and launch templates.
//!
//! Security group rules are rebuilt from the graph with [`query::reconstruct_record`], so a
//! rule is evaluated once per combination of values its fields may take (parameter
//! defaults, mapping entries, both arms of an `Fn::If`).

use super::{CheckDef, CheckInput, Risk, Service, Vulnerability};
use crate::graph::NodeId;
use crate::query;
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::net::IpAddr;

const SECURITY_GROUP: &str = "AWS::EC2::SecurityGroup";
const INGRESS: &str = "AWS::EC2::SecurityGroupIngress";
const EGRESS: &str = "AWS::EC2::SecurityGroupEgress";
const INSTANCE: &str = "AWS::EC2::Instance";
const LAUNCH_TEMPLATE: &str = "AWS::EC2::LaunchTemplate";
const VOLUME: &str = "AWS::EC2::Volume";

const RULE_FIELDS: &[&str] = &[
    "IpProtocol",
    "FromPort",
    "ToPort",
    "CidrIp",
    "CidrIpv6",
    "GroupId",
    "GroupName",
    "DestinationSecurityGroupId",
];

const ADMIN_PORTS: &[u16] = &[
    22,    // SSH
    445,   // CIFS
    1521,  // Oracle
    2438,  // Oracle
    3306,  // MySQL
    3389,  // RDP
    5432,  // Postgres
    6379,  // Redis
    7199,  // Cassandra
    8111,  // DAX
    8888,  // Cassandra
    9160,  // Cassandra
    11211, // Memcached
    27017, // MongoDB
];

const RFC1918: &[&str] = &["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

pub static CHECKS: &[CheckDef] = &[
    CheckDef {
        id: "ec2.allows_all_outbound_traffic",
        service: Service::Ec2,
        risk: Risk::Medium,
        description: "Security group declares no egress rule, so all outbound traffic is allowed",
        msg_open: "EC2 security groups allows all outbound traffic",
        msg_closed: "EC2 security groups do not allow all outbound traffic",
        eval: allows_all_outbound_traffic,
    },
    CheckDef {
        id: "ec2.unrestricted_cidrs",
        service: Service::Ec2,
        risk: Risk::Medium,
        description: "Security group rule uses an open or non-host CIDR",
        msg_open: "EC2 security groups have unrestricted CIDRs",
        msg_closed: "EC2 security groups do not have unrestricted CIDRs",
        eval: unrestricted_cidrs,
    },
    CheckDef {
        id: "ec2.unrestricted_ip_protocols",
        service: Service::Ec2,
        risk: Risk::Medium,
        description: "Security group rule allows every IP protocol (-1)",
        msg_open: "EC2 security groups have ingress/egress rules with unrestricted IP protocols",
        msg_closed: "EC2 security groups do not have ingress/egress rules with unrestricted IP protocols",
        eval: unrestricted_ip_protocols,
    },
    CheckDef {
        id: "ec2.unrestricted_ports",
        service: Service::Ec2,
        risk: Risk::Medium,
        description: "Security group rule opens a port range instead of a single port",
        msg_open: "EC2 security groups have ingress/egress rules that allow access over a range of ports",
        msg_closed: "EC2 security groups have ingress/egress rules that allow access over single ports",
        eval: unrestricted_ports,
    },
    CheckDef {
        id: "ec2.unencrypted_volumes",
        service: Service::Ec2,
        risk: Risk::Low,
        description: "EBS volume is not encrypted",
        msg_open: "EC2 volumes are not encrypted",
        msg_closed: "EC2 volumes are encrypted",
        eval: unencrypted_volumes,
    },
    CheckDef {
        id: "ec2.missing_iam_instance_profile",
        service: Service::Ec2,
        risk: Risk::Medium,
        description: "Instance has no IAM instance profile",
        msg_open: "EC2 instances have not an IamInstanceProfile set",
        msg_closed: "EC2 instances have an IamInstanceProfile set",
        eval: missing_iam_instance_profile,
    },
    CheckDef {
        id: "ec2.termination_protection_disabled",
        service: Service::Ec2,
        risk: Risk::Low,
        description: "Instance or launch template does not disable API termination",
        msg_open: "EC2 Launch Templates have API termination enabled",
        msg_closed: "EC2 Launch Templates have API termination disabled",
        eval: termination_protection_disabled,
    },
    CheckDef {
        id: "ec2.terminate_shutdown_behavior",
        service: Service::Ec2,
        risk: Risk::Low,
        description: "Shutdown from the operating system terminates the instance",
        msg_open: "EC2 Launch Templates allows the shutdown command to terminate the instance",
        msg_closed: "EC2 Launch Templates disallow the shutdown command to terminate the instance",
        eval: terminate_shutdown_behavior,
    },
    CheckDef {
        id: "ec2.public_ip_on_launch",
        service: Service::Ec2,
        risk: Risk::Low,
        description: "Network interface associates a public IP address on launch",
        msg_open: "EC2 instances will be launched with public ip addresses",
        msg_closed: "EC2 instances won't be launched with public ip addresses",
        eval: public_ip_on_launch,
    },
    CheckDef {
        id: "ec2.default_security_group",
        service: Service::Ec2,
        risk: Risk::Medium,
        description: "Instance or launch template sets no security group and falls back to the default one",
        msg_open: "EC2 Instances or Launch Templates are using the default security group",
        msg_closed: "EC2 Instances or Launch Templates are not using the default security group",
        eval: default_security_group,
    },
    CheckDef {
        id: "ec2.admin_ports_open_to_internet",
        service: Service::Ec2,
        risk: Risk::Medium,
        description: "Ingress rule exposes an administration port to the internet",
        msg_open: "EC2 security groups have ingress/egress rules that allow access to admin ports over the internet",
        msg_closed: "EC2 security groups have ingress/egress rules that deny access to admin ports over the internet",
        eval: admin_ports_open_to_internet,
    },
    CheckDef {
        id: "ec2.unrestricted_dns_access",
        service: Service::Ec2,
        risk: Risk::Medium,
        description: "Ingress rule exposes DNS (port 53) to the internet",
        msg_open: "Security groups allow access to DNS without restrictions.",
        msg_closed: "Security groups allow access to DNS to the necessary IP addresses.",
        eval: unrestricted_dns_access,
    },
    CheckDef {
        id: "ec2.unrestricted_ftp_access",
        service: Service::Ec2,
        risk: Risk::Medium,
        description: "Ingress rule exposes FTP (TCP 20/21) to the internet",
        msg_open: "Security groups allow access to FTP without restrictions.",
        msg_closed: "Security groups allow access to FTP to the necessary IP addresses.",
        eval: unrestricted_ftp_access,
    },
    CheckDef {
        id: "ec2.rfc1918_ingress",
        service: Service::Ec2,
        risk: Risk::Medium,
        description: "Ingress rule admits a whole RFC-1918 private range",
        msg_open: "Security groups contain RFC-1918 CIDRs open.",
        msg_closed: "Security groups do not contain RFC-1918 CIDRs open.",
        eval: rfc1918_ingress,
    },
    CheckDef {
        id: "ec2.all_ports_open_to_public",
        service: Service::Ec2,
        risk: Risk::High,
        description: "Rule opens every port to the internet",
        msg_open: "Security groups has all ports open to the public",
        msg_closed: "Security groups do not have all ports open to the public.",
        eval: all_ports_open_to_public,
    },
];

/// One ingress or egress rule, inline or standalone.
struct SecurityGroupRule {
    /// The security group, or the standalone ingress/egress resource.
    resource: NodeId,
    /// Entity prefix, e.g. `AWS::EC2::SecurityGroup/SecurityGroupIngress`.
    prefix: String,
    ingress: bool,
    line: usize,
    fields: BTreeMap<String, NodeId>,
}

impl SecurityGroupRule {
    fn field(&self, name: &str) -> Option<NodeId> {
        self.fields.get(name).copied()
    }
}

fn security_group_rules(input: &CheckInput<'_>) -> Vec<SecurityGroupRule> {
    let mut rules = Vec::new();

    for group in input.resources(&[SECURITY_GROUP]) {
        for flow in ["SecurityGroupEgress", "SecurityGroupIngress"] {
            let Some(list) = input.property(group, flow) else {
                continue;
            };
            let containers = input
                .items(list)
                .into_iter()
                .flat_map(|item| input.items(item));
            for container in containers {
                let fields = query::reconstruct_record(input.graph, container, RULE_FIELDS, 1);
                if fields.is_empty() {
                    continue;
                }
                rules.push(SecurityGroupRule {
                    resource: group,
                    prefix: format!("{}/{}", SECURITY_GROUP, flow),
                    ingress: flow == "SecurityGroupIngress",
                    line: input.line(container),
                    fields,
                });
            }
        }
    }

    for resource in input.resources(&[INGRESS, EGRESS]) {
        let Some(properties) = input.child(resource, "Properties") else {
            continue;
        };
        let resource_type = input.resource_type(resource);
        rules.push(SecurityGroupRule {
            resource,
            ingress: resource_type == INGRESS,
            prefix: resource_type,
            line: input.line(properties),
            fields: query::reconstruct_record(input.graph, properties, RULE_FIELDS, 1),
        });
    }

    rules
}

fn parse_cidr(text: &str) -> Option<IpNet> {
    let text = text.trim();
    if let Ok(net) = text.parse::<IpNet>() {
        return Some(net);
    }
    let addr = text.parse::<IpAddr>().ok()?;
    let prefix = if addr.is_ipv4() { 32 } else { 128 };
    IpNet::new(addr, prefix).ok()
}

/// CIDRs a rule may carry, as `(literal, text, network)`.
fn cidrs(input: &CheckInput<'_>, rule: &SecurityGroupRule) -> Vec<(NodeId, String, IpNet)> {
    ["CidrIp", "CidrIpv6"]
        .iter()
        .filter_map(|field| rule.field(field))
        .flat_map(|node| input.strings(node))
        .filter_map(|(literal, text)| {
            let net = parse_cidr(&text)?;
            Some((literal, text, net))
        })
        .collect()
}

/// Fields of a rule whose CIDR may be `/0`. IPv4 and IPv6 are reported separately.
fn open_cidr_fields(input: &CheckInput<'_>, rule: &SecurityGroupRule) -> Vec<&'static str> {
    let mut fields = Vec::new();
    for (_, _, net) in cidrs(input, rule) {
        if net.prefix_len() != 0 {
            continue;
        }
        let field = match net {
            IpNet::V4(_) => "CidrIp",
            IpNet::V6(_) => "CidrIpv6",
        };
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    fields
}

fn numbers(input: &CheckInput<'_>, node: NodeId) -> Vec<f64> {
    query::resolve_literal(
        input.graph,
        node,
        |v| v.as_f64().is_some(),
        input.limits.resolve_hops,
    )
    .into_iter()
    .filter_map(|id| input.graph.node(id)?.value.as_ref()?.as_f64())
    .collect()
}

/// Every `(FromPort, ToPort)` pair the rule may take. Empty when either bound is missing.
fn port_ranges(input: &CheckInput<'_>, rule: &SecurityGroupRule) -> Vec<(f64, f64)> {
    let (Some(from), Some(to)) = (rule.field("FromPort"), rule.field("ToPort")) else {
        return Vec::new();
    };
    let to_ports = numbers(input, to);
    numbers(input, from)
        .into_iter()
        .flat_map(|f| to_ports.iter().map(move |t| (f, *t)))
        .collect()
}

fn port_text(port: f64) -> String {
    if port.fract() == 0.0 {
        format!("{}", port as i64)
    } else {
        port.to_string()
    }
}

fn protocols(input: &CheckInput<'_>, rule: &SecurityGroupRule) -> Vec<(NodeId, String)> {
    rule.field("IpProtocol")
        .map(|node| input.texts(node))
        .unwrap_or_default()
}

/// Vulnerabilities for internet-facing ingress rules whose port range covers any of `ports`,
/// one per open CIDR field. `reason` receives the exposed port.
fn exposed_ports(
    input: &CheckInput<'_>,
    ports: &[u16],
    require_protocol: Option<&[&str]>,
    reason: impl Fn(&str) -> String,
) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for rule in security_group_rules(input) {
        if !rule.ingress {
            continue;
        }
        let open = open_cidr_fields(input, &rule);
        if open.is_empty() {
            continue;
        }
        if let Some(allowed) = require_protocol {
            let matches = protocols(input, &rule)
                .iter()
                .any(|(_, p)| allowed.contains(&p.to_lowercase().as_str()));
            if !matches {
                continue;
            }
        }
        for (from, to) in port_ranges(input, &rule) {
            for port in ports {
                if !(from <= f64::from(*port) && f64::from(*port) <= to) {
                    continue;
                }
                let port = port.to_string();
                for field in &open {
                    found.push(input.vulnerability(
                        rule.resource,
                        format!("{}/{}/{}", rule.prefix, field, port),
                        rule.line,
                        reason(&port),
                    ));
                }
            }
        }
    }
    found
}

/// A property is set when it exists and is not an empty list.
fn is_set(input: &CheckInput<'_>, node: Option<NodeId>) -> bool {
    match node {
        Some(id) => {
            let is_array = input.graph.node(id).is_some_and(|n| n.is_array());
            !is_array || !query::children(input.graph, id).is_empty()
        }
        None => false,
    }
}

fn allows_all_outbound_traffic(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let hops = input.limits.search_hops;
    let mut targeted: Vec<NodeId> = Vec::new();
    let mut targeted_names: Vec<String> = Vec::new();
    for egress in input.resources(&[EGRESS]) {
        let Some(properties) = input.child(egress, "Properties") else {
            continue;
        };
        for field in ["GroupId", "DestinationSecurityGroupId"] {
            if let Some(node) = input.child(properties, field) {
                targeted.extend(query::referenced_resources(input.graph, node, hops));
            }
        }
        if let Some(node) = input.child(properties, "GroupName") {
            targeted_names.extend(input.strings(node).into_iter().map(|(_, name)| name));
        }
    }

    input
        .resources(&[SECURITY_GROUP])
        .into_iter()
        .filter(|group| input.property(*group, "SecurityGroupEgress").is_none())
        .filter(|group| !targeted.contains(group))
        .filter(|group| !targeted_names.contains(&input.name(*group)))
        .map(|group| {
            input.vulnerability(
                group,
                SECURITY_GROUP,
                input.line(group),
                "allows all outbound traffic",
            )
        })
        .collect()
}

fn unrestricted_cidrs(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for rule in security_group_rules(input) {
        for (literal, text, net) in cidrs(input, &rule) {
            let (field, open_reason, host_reason, host_len) = match net {
                IpNet::V4(_) => ("CidrIp", "must not be 0.0.0.0/0", "must use /32 subnet mask", 32),
                IpNet::V6(_) => ("CidrIpv6", "must not be ::/0", "must use /128 subnet mask", 128),
            };
            let entity = format!("{}/{}/{}", rule.prefix, field, text);
            let line = input.line(literal);
            if net.prefix_len() == 0 {
                found.push(input.vulnerability(rule.resource, &entity, line, open_reason));
            }
            if rule.ingress && net.prefix_len() < host_len {
                found.push(input.vulnerability(rule.resource, &entity, line, host_reason));
            }
        }
    }
    found
}

fn unrestricted_ip_protocols(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for rule in security_group_rules(input) {
        for (_, protocol) in protocols(input, &rule) {
            if protocol.trim() == "-1" {
                found.push(input.vulnerability(
                    rule.resource,
                    format!("{}/IpProtocol/-1", rule.prefix),
                    rule.line,
                    "Authorize all IP protocols",
                ));
            }
        }
    }
    found
}

fn unrestricted_ports(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for rule in security_group_rules(input) {
        for (from, to) in port_ranges(input, &rule) {
            if from != to {
                found.push(input.vulnerability(
                    rule.resource,
                    format!(
                        "{}/FromPort->ToPort/{}->{}",
                        rule.prefix,
                        port_text(from),
                        port_text(to)
                    ),
                    rule.line,
                    "Grants access over a port range",
                ));
            }
        }
    }
    found
}

fn unencrypted_volumes(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for volume in input.resources(&[VOLUME]) {
        match input.property(volume, "Encrypted") {
            None => found.push(input.vulnerability(
                volume,
                VOLUME,
                input.line(volume),
                "is not encrypted",
            )),
            Some(encrypted) => {
                for (literal, value) in input.booleans(encrypted) {
                    if !value {
                        found.push(input.vulnerability(
                            volume,
                            VOLUME,
                            input.line(literal),
                            "is not encrypted",
                        ));
                    }
                }
            }
        }
    }
    found
}

fn missing_iam_instance_profile(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    input
        .resources(&[INSTANCE])
        .into_iter()
        .filter(|instance| input.property(*instance, "IamInstanceProfile").is_none())
        .map(|instance| {
            input.vulnerability(
                instance,
                "AWS::EC2::Instance/IamInstanceProfile",
                input.line(instance),
                "is not present",
            )
        })
        .collect()
}

/// Launch template data, or an instance's properties, with the entity prefix to report.
fn launch_settings(input: &CheckInput<'_>) -> Vec<(NodeId, NodeId, &'static str)> {
    let mut settings = Vec::new();
    for template in input.resources(&[LAUNCH_TEMPLATE]) {
        if let Some(data) = input.property(template, "LaunchTemplateData") {
            settings.push((template, data, "AWS::EC2::LaunchTemplate/LaunchTemplateData"));
        }
    }
    for instance in input.resources(&[INSTANCE]) {
        if let Some(properties) = input.child(instance, "Properties") {
            settings.push((instance, properties, INSTANCE));
        }
    }
    settings
}

fn termination_protection_disabled(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for (resource, settings, prefix) in launch_settings(input) {
        let entity = format!("{}/DisableApiTermination/false", prefix);
        match input.child(settings, "DisableApiTermination") {
            None => found.push(input.vulnerability(
                resource,
                &entity,
                input.line(resource),
                "has not disabled api termination",
            )),
            Some(node) => {
                for (literal, value) in input.booleans(node) {
                    if !value {
                        found.push(input.vulnerability(
                            resource,
                            &entity,
                            input.line(literal),
                            "has not disabled api termination",
                        ));
                    }
                }
            }
        }
    }
    found
}

fn terminate_shutdown_behavior(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for (resource, settings, prefix) in launch_settings(input) {
        let Some(node) = input.child(settings, "InstanceInitiatedShutdownBehavior") else {
            continue;
        };
        for (literal, behavior) in input.strings(node) {
            if behavior.eq_ignore_ascii_case("terminate") {
                found.push(input.vulnerability(
                    resource,
                    format!("{}/InstanceInitiatedShutdownBehavior/{}", prefix, behavior),
                    input.line(literal),
                    "has -terminate- as shutdown behavior",
                ));
            }
        }
    }
    found
}

fn public_ip_on_launch(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for (resource, settings, prefix) in launch_settings(input) {
        let Some(interfaces) = input.child(settings, "NetworkInterfaces") else {
            continue;
        };
        let interfaces = input
            .items(interfaces)
            .into_iter()
            .flat_map(|item| input.items(item));
        for interface in interfaces {
            let Some(public_ip) = input.child(interface, "AssociatePublicIpAddress") else {
                continue;
            };
            for (literal, value) in input.booleans(public_ip) {
                if value {
                    found.push(input.vulnerability(
                        resource,
                        format!("{}/NetworkInterfaces/AssociatePublicIpAddress/true", prefix),
                        input.line(literal),
                        "associates public IP on launch",
                    ));
                }
            }
        }
    }
    found
}

fn default_security_group(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    launch_settings(input)
        .into_iter()
        .filter(|(_, settings, _)| {
            !is_set(input, input.child(*settings, "SecurityGroups"))
                && !is_set(input, input.child(*settings, "SecurityGroupIds"))
        })
        .map(|(resource, _, prefix)| {
            input.vulnerability(
                resource,
                format!("{}/SecurityGroups(Ids)", prefix),
                input.line(resource),
                "is empty, and therefore uses default security group",
            )
        })
        .collect()
}

fn admin_ports_open_to_internet(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    exposed_ports(input, ADMIN_PORTS, None, |port| {
        format!("Grants access to admin port {} from internet", port)
    })
}

fn unrestricted_dns_access(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    exposed_ports(input, &[53], None, |_| {
        "Group must restrict access to TCP port and UDP 53 to the necessary IP addresses.".to_string()
    })
}

fn unrestricted_ftp_access(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    exposed_ports(input, &[20, 21], Some(&["tcp", "-1"]), |_| {
        "Group must restrict access to TCP port 20/21 to the necessary IP addresses.".to_string()
    })
}

fn rfc1918_ingress(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let private: Vec<IpNet> = RFC1918.iter().filter_map(|c| parse_cidr(c)).collect();
    let mut found = Vec::new();
    for rule in security_group_rules(input) {
        if !rule.ingress {
            continue;
        }
        for (literal, text, net) in cidrs(input, &rule) {
            if private.contains(&net) {
                found.push(input.vulnerability(
                    rule.resource,
                    format!("{}/CidrIp/{}", rule.prefix, text),
                    input.line(literal),
                    "admits a whole RFC-1918 private range",
                ));
            }
        }
    }
    found
}

fn all_ports_open_to_public(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for rule in security_group_rules(input) {
        let open = open_cidr_fields(input, &rule);
        for (from, to) in port_ranges(input, &rule) {
            if from > 1.0 || to < 65535.0 {
                continue;
            }
            for field in &open {
                found.push(input.vulnerability(
                    rule.resource,
                    format!(
                        "{}/{}/FromPort->ToPort/{}->{}",
                        rule.prefix,
                        field,
                        port_text(from),
                        port_text(to)
                    ),
                    rule.line,
                    "Grants public access to all ports",
                ));
            }
        }
    }
    found
}
