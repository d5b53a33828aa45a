//! Write-level actions per service, used to judge `Resource: "*"` statements.

/// `(service prefix, write actions)`, sorted by prefix for binary search.
pub const WRITE_ACTIONS: &[(&str, &[&str])] = &[
    (
        "cloudformation",
        &[
            "CancelUpdateStack", "ContinueUpdateRollback", "CreateChangeSet", "CreateStack",
            "CreateStackInstances", "CreateStackSet", "DeleteChangeSet", "DeleteStack",
            "DeleteStackInstances", "DeleteStackSet", "ExecuteChangeSet", "SignalResource",
            "StopStackSetOperation", "UpdateStack", "UpdateStackInstances",
            "UpdateStackSet", "UpdateTerminationProtection", "ValidateTemplate",
        ],
    ),
    (
        "dynamodb",
        &[
            "BatchWriteItem", "CreateBackup", "CreateGlobalTable", "CreateTable",
            "CreateTableReplica", "DeleteBackup", "DeleteItem", "DeleteTable",
            "DeleteTableReplica", "PutItem", "RestoreTableFromBackup",
            "RestoreTableToPointInTime", "UpdateContinuousBackups", "UpdateGlobalTable",
            "UpdateGlobalTableSettings", "UpdateItem", "UpdateTable",
            "UpdateTableReplicaAutoScaling", "UpdateTimeToLive",
        ],
    ),
    (
        "kms",
        &[
            "CancelKeyDeletion", "ConnectCustomKeyStore", "CreateAlias",
            "CreateCustomKeyStore", "CreateKey", "Decrypt", "DeleteAlias",
            "DeleteCustomKeyStore", "DeleteImportedKeyMaterial", "DisableKey",
            "DisableKeyRotation", "DisconnectCustomKeyStore", "EnableKey",
            "EnableKeyRotation", "Encrypt", "GenerateDataKey", "GenerateDataKeyPair",
            "GenerateDataKeyPairWithoutPlaintext", "GenerateDataKeyWithoutPlaintext",
            "GenerateRandom", "ImportKeyMaterial", "ReEncryptFrom", "ReEncryptTo",
            "ScheduleKeyDeletion", "Sign", "UpdateAlias", "UpdateCustomKeyStore",
            "UpdateKeyDescription", "Verify",
        ],
    ),
    (
        "lambda",
        &[
            "CreateAlias", "CreateEventSourceMapping", "CreateFunction", "DeleteAlias",
            "DeleteEventSourceMapping", "DeleteFunction", "DeleteFunctionConcurrency",
            "DeleteLayerVersion", "InvokeAsync", "InvokeFunction", "PublishLayerVersion",
            "PublishVersion", "PutFunctionConcurrency", "TagResource", "UntagResource",
            "UpdateAlias", "UpdateEventSourceMapping", "UpdateFunctionCode",
            "UpdateFunctionConfiguration",
        ],
    ),
    (
        "logs",
        &[
            "AssociateKmsKey", "CancelExportTask", "CreateExportTask", "CreateLogGroup",
            "CreateLogStream", "DeleteDestination", "DeleteLogGroup", "DeleteLogStream",
            "DeleteMetricFilter", "DeleteResourcePolicy", "DeleteRetentionPolicy",
            "DeleteSubscriptionFilter", "DisassociateKmsKey", "PutDestination",
            "PutDestinationPolicy", "PutLogEvents", "PutMetricFilter", "PutResourcePolicy",
            "PutRetentionPolicy", "PutSubscriptionFilter", "TagLogGroup", "UntagLogGroup",
        ],
    ),
    (
        "rds",
        &[
            "AddRoleToDBCluster", "AddRoleToDBInstance",
            "AddSourceIdentifierToSubscription", "ApplyPendingMaintenanceAction",
            "BacktrackDBCluster", "CopyDBClusterParameterGroup", "CopyDBClusterSnapshot",
            "CopyDBParameterGroup", "CopyDBSnapshot", "CopyOptionGroup",
            "CreateDBClusterEndpoint", "CreateGlobalCluster", "DeleteDBCluster",
            "DeleteDBClusterEndpoint", "DeleteDBClusterParameterGroup",
            "DeleteDBClusterSnapshot", "DeleteDBInstance",
            "DeleteDBInstanceAutomatedBackup", "DeleteDBParameterGroup",
            "DeleteDBSecurityGroup", "DeleteDBSnapshot", "DeleteDBSubnetGroup",
            "DeleteEventSubscription", "DeleteGlobalCluster", "DeleteOptionGroup",
            "FailoverDBCluster", "ModifyCurrentDBClusterCapacity", "ModifyDBCluster",
            "ModifyDBClusterEndpoint", "ModifyDBClusterParameterGroup",
            "ModifyDBClusterSnapshotAttribute", "ModifyDBInstance",
            "ModifyDBParameterGroup", "ModifyDBSnapshot", "ModifyDBSnapshotAttribute",
            "ModifyDBSubnetGroup", "ModifyEventSubscription", "ModifyGlobalCluster",
            "ModifyOptionGroup", "PromoteReadReplica", "PromoteReadReplicaDBCluster",
            "PurchaseReservedDBInstancesOffering", "RebootDBInstance",
            "RemoveFromGlobalCluster", "RemoveRoleFromDBCluster",
            "RemoveRoleFromDBInstance", "RemoveSourceIdentifierFromSubscription",
            "ResetDBClusterParameterGroup", "ResetDBParameterGroup",
            "RestoreDBClusterFromS3", "RestoreDBClusterFromSnapshot",
            "RestoreDBClusterToPointInTime", "RestoreDBInstanceFromDBSnapshot",
            "RestoreDBInstanceFromS3", "RestoreDBInstanceToPointInTime",
            "RevokeDBSecurityGroupIngress", "StartActivityStream", "StartDBCluster",
            "StartDBInstance", "StopActivityStream", "StopDBCluster", "StopDBInstance",
        ],
    ),
    (
        "s3",
        &[
            "AbortMultipartUpload", "CreateBucket", "CreateJob", "DeleteBucket",
            "DeleteBucketWebsite", "DeleteObject", "DeleteObjectVersion",
            "GetBucketObjectLockConfiguration", "GetObjectLegalHold", "GetObjectRetention",
            "PutAccelerateConfiguration", "PutAnalyticsConfiguration", "PutBucketCORS",
            "PutBucketLogging", "PutBucketNotification", "PutBucketObjectLockConfiguration",
            "PutBucketRequestPayment", "PutBucketVersioning", "PutBucketWebsite",
            "PutEncryptionConfiguration", "PutInventoryConfiguration",
            "PutLifecycleConfiguration", "PutMetricsConfiguration", "PutObject",
            "PutObjectLegalHold", "PutObjectRetention", "PutReplicationConfiguration",
            "RestoreObject", "UpdateJobPriority", "UpdateJobStatus",
        ],
    ),
    (
        "secretsmanager",
        &[
            "CancelRotateSecret", "DeleteSecret", "PutSecretValue", "RestoreSecret",
            "RotateSecret", "UpdateSecret", "UpdateSecretVersionStage",
        ],
    ),
    (
        "sns",
        &[
            "ConfirmSubscription", "CreatePlatformApplication", "CreatePlatformEndpoint",
            "CreateTopic", "DeleteEndpoint", "DeletePlatformApplication", "DeleteTopic",
            "OptInPhoneNumber", "Publish", "SetEndpointAttributes",
            "SetPlatformApplicationAttributes", "SetSubscriptionAttributes",
            "SetTopicAttributes", "Subscribe", "Unsubscribe",
        ],
    ),
    (
        "sqs",
        &[
            "ChangeMessageVisibility", "ChangeMessageVisibilityBatch", "CreateQueue",
            "DeleteMessage", "DeleteMessageBatch", "DeleteQueue", "PurgeQueue",
            "SendMessage", "SendMessageBatch", "SetQueueAttributes",
        ],
    ),
    (
        "ssm",
        &[
            "CancelCommand", "CancelMaintenanceWindowExecution", "CreateActivation",
            "CreateAssociation", "CreateAssociationBatch", "CreateDocument",
            "CreateMaintenanceWindow", "CreateOpsItem", "CreatePatchBaseline",
            "CreateResourceDataSync", "DeleteActivation", "DeleteAssociation",
            "DeleteDocument", "DeleteInventory", "DeleteMaintenanceWindow",
            "DeleteParameter", "DeleteParameters", "DeletePatchBaseline",
            "DeleteResourceDataSync", "DeregisterManagedInstance",
            "DeregisterPatchBaselineForPatchGroup", "DeregisterTargetFromMaintenanceWindow",
            "DeregisterTaskFromMaintenanceWindow", "LabelParameterVersion",
            "ModifyDocumentPermission", "PutComplianceItems", "PutInventory",
            "PutParameter", "RegisterDefaultPatchBaseline",
            "RegisterPatchBaselineForPatchGroup", "RegisterTargetWithMaintenanceWindow",
            "RegisterTaskWithMaintenanceWindow", "ResetServiceSetting", "ResumeSession",
            "SendAutomationSignal", "SendCommand", "StartAssociationsOnce",
            "StartAutomationExecution", "StartSession", "StopAutomationExecution",
            "TerminateSession", "UpdateAssociation", "UpdateAssociationStatus",
            "UpdateDocument", "UpdateDocumentDefaultVersion", "UpdateInstanceInformation",
            "UpdateMaintenanceWindow", "UpdateMaintenanceWindowTarget",
            "UpdateMaintenanceWindowTask", "UpdateManagedInstanceRole", "UpdateOpsItem",
            "UpdatePatchBaseline", "UpdateResourceDataSync", "UpdateServiceSetting",
        ],
    ),
    (
        "sts",
        &[
            "AssumeRole", "AssumeRoleWithSAML", "AssumeRoleWithWebIdentity",
            "DecodeAuthorizationMessage",
        ],
    ),
];

/// Write actions of a service, or `None` if the service is not catalogued.
pub fn write_actions(service: &str) -> Option<&'static [&'static str]> {
    WRITE_ACTIONS
        .binary_search_by(|(name, _)| name.cmp(&service))
        .ok()
        .map(|i| WRITE_ACTIONS[i].1)
}

/// Whether `action` (`service:Action`, possibly ending in `*`) grants a write privilege.
///
/// `*` and `service:*` always do. A trailing wildcard such as `s3:Put*` matches when the
/// prefix names a catalogued write action; uncatalogued services never match.
pub fn is_write_action(action: &str) -> bool {
    if action == "*" {
        return true;
    }
    let Some((service, name)) = action.split_once(':') else {
        return false;
    };
    if name.starts_with('*') {
        return true;
    }
    let Some(actions) = write_actions(service) else {
        return false;
    };
    match name.strip_suffix('*') {
        Some(prefix) => actions.iter().any(|a| a.starts_with(prefix)),
        None => actions.contains(&name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted() {
        assert!(WRITE_ACTIONS.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_write_actions() {
        assert!(is_write_action("*"));
        assert!(is_write_action("s3:*"));
        assert!(is_write_action("s3:PutObject"));
        assert!(is_write_action("s3:Put*"));
        assert!(is_write_action("sqs:SendMessage"));
        assert!(!is_write_action("s3:GetObject"));
        assert!(!is_write_action("unknown:PutThing"));
        assert!(!is_write_action("s3"));
    }
}
