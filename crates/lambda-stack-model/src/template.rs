//! Rendering of a [`StackDescription`] into a CloudFormation template.
//!
//! The four entities expand into the concrete resources the provisioning
//! engine understands. Custom resource providers (object purge, bucket
//! notifications) belong to the engine and are wired in through template
//! parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ids::LogicalId;
use crate::resources::{AccessGrant, ComputeResourceSpec, EventSubscription, StorageResourceSpec};
use crate::StackDescription;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

pub const AUTO_DELETE_PROVIDER_PARAM: &str = "AutoDeleteObjectsProviderArn";
pub const AUTO_DELETE_PROVIDER_ROLE_PARAM: &str = "AutoDeleteObjectsProviderRoleArn";
pub const NOTIFICATIONS_PROVIDER_PARAM: &str = "BucketNotificationsProviderArn";

/// Tag marking a bucket whose objects are purged before deletion.
pub const AUTO_DELETE_TAG: &str = "aws-cdk:auto-delete-objects";

const LAMBDA_BASIC_EXECUTION_POLICY: &str =
    "arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    pub resources: BTreeMap<String, TemplateResource>,
}

impl Template {
    pub fn resource(&self, id: &LogicalId) -> Option<&TemplateResource> {
        self.resources.get(id.as_str())
    }

    /// Resources of the given type, ordered by logical id.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a TemplateResource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, resource)| resource.resource_type == resource_type)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,
}

impl TemplateResource {
    fn new(resource_type: &str, properties: Value) -> Self {
        Self {
            resource_type: resource_type.to_owned(),
            properties,
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    fn depends_on(mut self, ids: &[&LogicalId]) -> Self {
        self.depends_on = ids.iter().map(|id| id.to_string()).collect();
        self.depends_on.sort();
        self
    }

    fn teardown(mut self, policy: &str) -> Self {
        self.deletion_policy = Some(policy.to_owned());
        self.update_replace_policy = Some(policy.to_owned());
        self
    }
}

/// Logical ids of every resource the description expands into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedIds {
    pub bucket: LogicalId,
    pub bucket_policy: LogicalId,
    pub auto_delete: LogicalId,
    pub notifications: LogicalId,
    pub invoke_permission: LogicalId,
    pub function: LogicalId,
    pub service_role: LogicalId,
    pub grant_policy: LogicalId,
}

impl RenderedIds {
    pub fn for_description(description: &StackDescription) -> Self {
        let stack = description.metadata().id.as_str();
        let bucket = description.storage().construct_id().as_str();
        let function = description.compute().construct_id().as_str();
        let permission = format!("AllowBucketNotificationsTo{stack}{function}");

        Self {
            bucket: description.storage().logical_id().clone(),
            bucket_policy: LogicalId::from_path(&[bucket, "Policy", "Resource"]),
            auto_delete: LogicalId::from_path(&[bucket, "AutoDeleteObjectsCustomResource", "Default"]),
            notifications: LogicalId::from_path(&[bucket, "Notifications", "Resource"]),
            invoke_permission: LogicalId::from_path(&[bucket, permission.as_str()]),
            function: description.compute().logical_id().clone(),
            service_role: LogicalId::from_path(&[function, "ServiceRole", "Resource"]),
            grant_policy: LogicalId::from_path(&[function, "ServiceRole", "DefaultPolicy", "Resource"]),
        }
    }
}

pub fn render(description: &StackDescription) -> Template {
    let ids = RenderedIds::for_description(description);
    let tags = tag_list(&description.metadata().tags);
    let mut parameters = BTreeMap::new();
    let mut resources = BTreeMap::new();

    render_storage(description.storage(), &ids, &tags, &mut parameters, &mut resources);
    render_compute(
        description.compute(),
        &ids,
        &tags,
        &description.metadata().bootstrap_qualifier,
        &mut resources,
    );
    render_grant(description.grant(), &ids, &mut resources);
    render_subscription(description.subscription(), &ids, &mut parameters, &mut resources);

    Template {
        format_version: TEMPLATE_FORMAT_VERSION.to_owned(),
        description: description.metadata().description.clone(),
        parameters,
        resources,
    }
}

fn render_storage(
    storage: &StorageResourceSpec,
    ids: &RenderedIds,
    tags: &[Value],
    parameters: &mut BTreeMap<String, Value>,
    resources: &mut BTreeMap<String, TemplateResource>,
) {
    let deletion_policy = storage.teardown_policy().deletion_policy();
    let bucket_arn = get_att(&ids.bucket, "Arn");
    let objects_arn = json!({ "Fn::Join": ["", [bucket_arn.clone(), "/*"]] });

    let mut bucket_tags = tags.to_vec();
    if storage.purges_before_delete() {
        bucket_tags.push(json!({ "Key": AUTO_DELETE_TAG, "Value": "true" }));
        bucket_tags.sort_by(|a, b| a["Key"].as_str().cmp(&b["Key"].as_str()));
    }
    let mut bucket_props = json!({});
    if !bucket_tags.is_empty() {
        bucket_props["Tags"] = Value::Array(bucket_tags);
    }
    resources.insert(
        ids.bucket.to_string(),
        TemplateResource::new("AWS::S3::Bucket", bucket_props).teardown(deletion_policy),
    );

    let mut statements = Vec::new();
    if storage.enforces_transport_encryption() {
        statements.push(json!({
            "Action": "s3:*",
            "Condition": { "Bool": { "aws:SecureTransport": "false" } },
            "Effect": "Deny",
            "Principal": { "AWS": "*" },
            "Resource": [bucket_arn.clone(), objects_arn.clone()],
        }));
    }
    if storage.purges_before_delete() {
        statements.push(json!({
            "Action": ["s3:PutBucketPolicy", "s3:GetBucket*", "s3:List*", "s3:DeleteObject*"],
            "Effect": "Allow",
            "Principal": { "AWS": reference_param(AUTO_DELETE_PROVIDER_ROLE_PARAM) },
            "Resource": [bucket_arn, objects_arn],
        }));
    }
    if !statements.is_empty() {
        resources.insert(
            ids.bucket_policy.to_string(),
            TemplateResource::new(
                "AWS::S3::BucketPolicy",
                json!({
                    "Bucket": reference(&ids.bucket),
                    "PolicyDocument": { "Statement": statements, "Version": "2012-10-17" },
                }),
            ),
        );
    }

    if storage.purges_before_delete() {
        parameters.insert(
            AUTO_DELETE_PROVIDER_PARAM.to_owned(),
            string_parameter("Service token of the provider that empties buckets before deletion"),
        );
        parameters.insert(
            AUTO_DELETE_PROVIDER_ROLE_PARAM.to_owned(),
            string_parameter("Role assumed by the bucket purge provider"),
        );
        resources.insert(
            ids.auto_delete.to_string(),
            TemplateResource::new(
                "Custom::S3AutoDeleteObjects",
                json!({
                    "ServiceToken": reference_param(AUTO_DELETE_PROVIDER_PARAM),
                    "BucketName": reference(&ids.bucket),
                }),
            )
            .depends_on(&[&ids.bucket_policy])
            .teardown(deletion_policy),
        );
    }
}

fn render_compute(
    compute: &ComputeResourceSpec,
    ids: &RenderedIds,
    tags: &[Value],
    bootstrap_qualifier: &str,
    resources: &mut BTreeMap<String, TemplateResource>,
) {
    let mut role_props = json!({
        "AssumeRolePolicyDocument": {
            "Statement": [{
                "Action": "sts:AssumeRole",
                "Effect": "Allow",
                "Principal": { "Service": "lambda.amazonaws.com" },
            }],
            "Version": "2012-10-17",
        },
        "ManagedPolicyArns": [{ "Fn::Sub": LAMBDA_BASIC_EXECUTION_POLICY }],
    });
    if !tags.is_empty() {
        role_props["Tags"] = Value::Array(tags.to_vec());
    }
    resources.insert(
        ids.service_role.to_string(),
        TemplateResource::new("AWS::IAM::Role", role_props),
    );

    let settings = compute.settings();
    let mut function_props = json!({
        "Architectures": [settings.architecture.as_str()],
        "Code": {
            "S3Bucket": {
                "Fn::Sub": format!("cdk-{bootstrap_qualifier}-assets-${{AWS::AccountId}}-${{AWS::Region}}")
            },
            "S3Key": compute.artifact().object_key(),
        },
        "Handler": compute.entry_point(),
        "MemorySize": settings.memory_size_mb,
        "Role": get_att(&ids.service_role, "Arn"),
        "Runtime": settings.runtime.as_str(),
        "Timeout": settings.timeout_seconds,
    });
    if !settings.environment.is_empty() {
        function_props["Environment"] = json!({ "Variables": settings.environment });
    }
    if !tags.is_empty() {
        function_props["Tags"] = Value::Array(tags.to_vec());
    }
    resources.insert(
        ids.function.to_string(),
        TemplateResource::new("AWS::Lambda::Function", function_props)
            .depends_on(&[&ids.grant_policy, &ids.service_role]),
    );
}

fn render_grant(
    grant: &AccessGrant,
    ids: &RenderedIds,
    resources: &mut BTreeMap<String, TemplateResource>,
) {
    let bucket_arn = get_att(grant.object(), "Arn");
    resources.insert(
        ids.grant_policy.to_string(),
        TemplateResource::new(
            "AWS::IAM::Policy",
            json!({
                "PolicyDocument": {
                    "Statement": [{
                        "Action": grant.rights().storage_actions(),
                        "Effect": "Allow",
                        "Resource": [
                            bucket_arn.clone(),
                            { "Fn::Join": ["", [bucket_arn, "/*"]] },
                        ],
                    }],
                    "Version": "2012-10-17",
                },
                "PolicyName": ids.grant_policy.as_str(),
                "Roles": [reference(&ids.service_role)],
            }),
        ),
    );
}

fn render_subscription(
    subscription: &EventSubscription,
    ids: &RenderedIds,
    parameters: &mut BTreeMap<String, Value>,
    resources: &mut BTreeMap<String, TemplateResource>,
) {
    resources.insert(
        ids.invoke_permission.to_string(),
        TemplateResource::new(
            "AWS::Lambda::Permission",
            json!({
                "Action": "lambda:InvokeFunction",
                "FunctionName": get_att(subscription.destination(), "Arn"),
                "Principal": "s3.amazonaws.com",
                "SourceAccount": { "Ref": "AWS::AccountId" },
                "SourceArn": get_att(subscription.source(), "Arn"),
            }),
        ),
    );

    parameters.insert(
        NOTIFICATIONS_PROVIDER_PARAM.to_owned(),
        string_parameter("Service token of the provider that manages bucket notifications"),
    );
    resources.insert(
        ids.notifications.to_string(),
        TemplateResource::new(
            "Custom::S3BucketNotifications",
            json!({
                "ServiceToken": reference_param(NOTIFICATIONS_PROVIDER_PARAM),
                "BucketName": reference(subscription.source()),
                "Managed": true,
                "NotificationConfiguration": {
                    "LambdaFunctionConfigurations": [{
                        "Events": [subscription.event_kind().notification_event()],
                        "LambdaFunctionArn": get_att(subscription.destination(), "Arn"),
                    }],
                },
            }),
        )
        .depends_on(&[&ids.invoke_permission]),
    );
}

fn tag_list(tags: &BTreeMap<String, String>) -> Vec<Value> {
    tags.iter()
        .map(|(key, value)| json!({ "Key": key, "Value": value }))
        .collect()
}

fn string_parameter(description: &str) -> Value {
    json!({ "Type": "String", "Description": description })
}

fn reference(id: &LogicalId) -> Value {
    json!({ "Ref": id.as_str() })
}

fn reference_param(name: &str) -> Value {
    json!({ "Ref": name })
}

fn get_att(id: &LogicalId, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [id.as_str(), attribute] })
}
