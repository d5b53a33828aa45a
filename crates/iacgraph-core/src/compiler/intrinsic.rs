use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Every intrinsic function the compiler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntrinsicFn {
    Ref,
    GetAtt,
    Sub,
    FindInMap,
    Join,
    Split,
    Select,
    Base64,
    Cidr,
    GetAZs,
    ImportValue,
    Transform,
    And,
    Or,
    Not,
    Equals,
    If,
    Length,
    ToJsonString,
}

/// Which structural arguments of a function carry part of its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueArguments {
    /// The arguments only name other elements (`Ref`, `Fn::GetAtt`, `Fn::FindInMap`).
    None,
    /// Every argument but the first (`Fn::If` condition name).
    SkipFirst,
    All,
}

impl IntrinsicFn {
    pub const ALL: [IntrinsicFn; 19] = [
        IntrinsicFn::Ref,
        IntrinsicFn::GetAtt,
        IntrinsicFn::Sub,
        IntrinsicFn::FindInMap,
        IntrinsicFn::Join,
        IntrinsicFn::Split,
        IntrinsicFn::Select,
        IntrinsicFn::Base64,
        IntrinsicFn::Cidr,
        IntrinsicFn::GetAZs,
        IntrinsicFn::ImportValue,
        IntrinsicFn::Transform,
        IntrinsicFn::And,
        IntrinsicFn::Or,
        IntrinsicFn::Not,
        IntrinsicFn::Equals,
        IntrinsicFn::If,
        IntrinsicFn::Length,
        IntrinsicFn::ToJsonString,
    ];

    pub fn key(self) -> &'static str {
        match self {
            IntrinsicFn::Ref => "Ref",
            IntrinsicFn::GetAtt => "Fn::GetAtt",
            IntrinsicFn::Sub => "Fn::Sub",
            IntrinsicFn::FindInMap => "Fn::FindInMap",
            IntrinsicFn::Join => "Fn::Join",
            IntrinsicFn::Split => "Fn::Split",
            IntrinsicFn::Select => "Fn::Select",
            IntrinsicFn::Base64 => "Fn::Base64",
            IntrinsicFn::Cidr => "Fn::Cidr",
            IntrinsicFn::GetAZs => "Fn::GetAZs",
            IntrinsicFn::ImportValue => "Fn::ImportValue",
            IntrinsicFn::Transform => "Fn::Transform",
            IntrinsicFn::And => "Fn::And",
            IntrinsicFn::Or => "Fn::Or",
            IntrinsicFn::Not => "Fn::Not",
            IntrinsicFn::Equals => "Fn::Equals",
            IntrinsicFn::If => "Fn::If",
            IntrinsicFn::Length => "Fn::Length",
            IntrinsicFn::ToJsonString => "Fn::ToJsonString",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    /// `Ref` and everything in the `Fn::` namespace, supported or not.
    pub fn is_intrinsic_key(key: &str) -> bool {
        key == "Ref" || key.starts_with("Fn::")
    }

    pub fn is_conditional(self) -> bool {
        matches!(
            self,
            IntrinsicFn::And
                | IntrinsicFn::Or
                | IntrinsicFn::Not
                | IntrinsicFn::Equals
                | IntrinsicFn::If
        )
    }

    pub fn value_arguments(self) -> ValueArguments {
        match self {
            IntrinsicFn::Ref | IntrinsicFn::GetAtt | IntrinsicFn::FindInMap => ValueArguments::None,
            IntrinsicFn::If => ValueArguments::SkipFirst,
            IntrinsicFn::Sub
            | IntrinsicFn::Join
            | IntrinsicFn::Split
            | IntrinsicFn::Select
            | IntrinsicFn::Base64
            | IntrinsicFn::Cidr
            | IntrinsicFn::GetAZs
            | IntrinsicFn::ImportValue
            | IntrinsicFn::Transform
            | IntrinsicFn::And
            | IntrinsicFn::Or
            | IntrinsicFn::Not
            | IntrinsicFn::Equals
            | IntrinsicFn::Length
            | IntrinsicFn::ToJsonString => ValueArguments::All,
        }
    }
}

impl fmt::Display for IntrinsicFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Provider-reserved `Ref` targets.
pub const PSEUDO_PARAMETERS: &[&str] = &[
    "AWS::AccountId",
    "AWS::NotificationARNs",
    "AWS::NoValue",
    "AWS::Partition",
    "AWS::Region",
    "AWS::StackId",
    "AWS::StackName",
    "AWS::URLSuffix",
];

pub fn is_pseudo_parameter(name: &str) -> bool {
    PSEUDO_PARAMETERS.contains(&name)
}

/// Labels for a template key: `AWS::EC2::SecurityGroup` -> `{AWS, EC2, SecurityGroup}`,
/// `aws:SecureTransport` -> `{aws, SecureTransport}`.
pub fn key_labels(key: &str) -> BTreeSet<String> {
    let normalized = key
        .replace('-', "_")
        .replace(' ', "_")
        .replace('.', "__")
        .replace("::", ":");
    let labels: BTreeSet<String> = normalized
        .split(':')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect();
    if labels.is_empty() {
        BTreeSet::from([key.to_string()])
    } else {
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_function_round_trips_its_key() {
        for f in IntrinsicFn::ALL {
            assert_eq!(IntrinsicFn::from_key(f.key()), Some(f));
        }
        assert_eq!(IntrinsicFn::from_key("Fn::Nope"), None);
        assert!(IntrinsicFn::is_intrinsic_key("Fn::Nope"));
        assert!(!IntrinsicFn::is_intrinsic_key("Condition"));
    }

    #[test]
    fn test_key_labels() {
        let labels = key_labels("AWS::EC2::SecurityGroup");
        assert!(labels.contains("EC2") && labels.contains("SecurityGroup"));
        assert_eq!(
            key_labels("s3:x-amz-server-side-encryption"),
            BTreeSet::from(["s3".to_string(), "x_amz_server_side_encryption".to_string()])
        );
        assert_eq!(key_labels("Fn::GetAtt"), BTreeSet::from(["Fn".to_string(), "GetAtt".to_string()]));
    }

    #[test]
    fn test_pseudo_parameters() {
        assert!(is_pseudo_parameter("AWS::Region"));
        assert!(!is_pseudo_parameter("AWS::Nowhere"));
    }
}
