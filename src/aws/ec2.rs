//! EC2 implementation of the cloud provider surface.

use aws_sdk_ec2::types::{
    BlockDeviceMapping, EbsBlockDevice, Filter, Instance, InstanceType, IpPermission, IpRange,
    KeyType, ResourceType, Snapshot, Tag, TagSpecification, VolumeType,
};

use crate::provider::{
    CloudProvider, InstanceSummary, KeyMaterial, LaunchSpec, MANAGED_BY_TAG_KEY,
    MANAGED_BY_TAG_VALUE, PROFILE_TAG_KEY, ProviderFuture, RESTORED_TAG_KEY, SnapshotSummary,
    state,
};

use super::{AwsError, AwsProvider};

const SELF_OWNER: &str = "self";
const BASE_IMAGE_OWNER: &str = "amazon";
const BASE_IMAGE_NAME_PATTERN: &str = "amzn2-ami-hvm-*-x86_64-gp2";
const ROOT_DEVICE_FALLBACK: &str = "/dev/xvda";
const SSH_PORT: i32 = 22;
const SNAPSHOT_INSTANCE_TAG_KEY: &str = "InstanceID";

fn profile_filter(profile: &str) -> Filter {
    Filter::builder()
        .name(format!("tag:{PROFILE_TAG_KEY}"))
        .values(profile)
        .build()
}

fn managed_by_filter() -> Filter {
    Filter::builder()
        .name(format!("tag:{MANAGED_BY_TAG_KEY}"))
        .values(MANAGED_BY_TAG_VALUE)
        .build()
}

fn live_state_filter() -> Filter {
    Filter::builder()
        .name("instance-state-name")
        .values(state::RUNNING)
        .values(state::PENDING)
        .build()
}

fn tag_value<'t>(tags: &'t [Tag], key: &str) -> Option<&'t str> {
    tags.iter()
        .find(|tag| tag.key.as_deref() == Some(key))
        .and_then(|tag| tag.value.as_deref())
}

fn flatten_instances(output: aws_sdk_ec2::operation::describe_instances::DescribeInstancesOutput) -> Vec<Instance> {
    output
        .reservations
        .unwrap_or_default()
        .into_iter()
        .flat_map(|reservation| reservation.instances.unwrap_or_default())
        .collect()
}

fn instance_summary(instance: Instance) -> Result<InstanceSummary, AwsError> {
    let id = instance.instance_id.ok_or(AwsError::MissingField {
        resource: "instance",
        field: "id",
    })?;
    let tags = instance.tags.unwrap_or_default();
    let profile = tag_value(&tags, PROFILE_TAG_KEY).unwrap_or("-").to_owned();
    let restored = tag_value(&tags, RESTORED_TAG_KEY) == Some("true");
    let instance_state = instance
        .state
        .and_then(|current| current.name)
        .map_or_else(|| String::from("unknown"), |name| name.as_str().to_owned());
    let public_address = instance
        .public_dns_name
        .filter(|dns| !dns.is_empty())
        .or_else(|| instance.public_ip_address.filter(|ip| !ip.is_empty()));
    Ok(InstanceSummary {
        id,
        profile,
        state: instance_state,
        public_address,
        launched_at: instance.launch_time.map(|moment| moment.secs()),
        restored,
    })
}

fn snapshot_summary(snapshot: Snapshot) -> Result<SnapshotSummary, AwsError> {
    let id = snapshot.snapshot_id.ok_or(AwsError::MissingField {
        resource: "snapshot",
        field: "id",
    })?;
    let tags = snapshot.tags.unwrap_or_default();
    Ok(SnapshotSummary {
        id,
        profile: tag_value(&tags, PROFILE_TAG_KEY).unwrap_or("-").to_owned(),
        source_instance_id: tag_value(&tags, SNAPSHOT_INSTANCE_TAG_KEY).map(str::to_owned),
        created_at: snapshot.start_time.map_or(0, |moment| moment.secs()),
    })
}

impl AwsProvider {
    async fn describe_by_id(&self, instance_id: &str) -> Result<Option<Instance>, AwsError> {
        let output = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|err| AwsError::api("describe instances", &err))?;
        Ok(flatten_instances(output).into_iter().next())
    }
}

impl CloudProvider for AwsProvider {
    type Error = AwsError;

    fn find_instance<'a>(
        &'a self,
        profile: &'a str,
    ) -> ProviderFuture<'a, Option<InstanceSummary>, Self::Error> {
        Box::pin(async move {
            let output = self
                .client
                .describe_instances()
                .filters(profile_filter(profile))
                .filters(managed_by_filter())
                .filters(live_state_filter())
                .send()
                .await
                .map_err(|err| AwsError::api("describe instances", &err))?;
            flatten_instances(output)
                .into_iter()
                .next()
                .map(instance_summary)
                .transpose()
        })
    }

    fn describe_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, Option<InstanceSummary>, Self::Error> {
        Box::pin(async move {
            self.describe_by_id(instance_id)
                .await?
                .map(instance_summary)
                .transpose()
        })
    }

    fn list_instances(&self) -> ProviderFuture<'_, Vec<InstanceSummary>, Self::Error> {
        Box::pin(async move {
            let output = self
                .client
                .describe_instances()
                .filters(managed_by_filter())
                .send()
                .await
                .map_err(|err| AwsError::api("describe instances", &err))?;
            flatten_instances(output)
                .into_iter()
                .map(instance_summary)
                .collect()
        })
    }

    fn launch_instance<'a>(
        &'a self,
        spec: &'a LaunchSpec,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            spec.validate().map_err(|err| AwsError::InvalidRequest {
                message: err.to_string(),
            })?;

            let mut tags = TagSpecification::builder()
                .resource_type(ResourceType::Instance)
                .tags(
                    Tag::builder()
                        .key(PROFILE_TAG_KEY)
                        .value(spec.profile.as_str())
                        .build(),
                )
                .tags(
                    Tag::builder()
                        .key(MANAGED_BY_TAG_KEY)
                        .value(MANAGED_BY_TAG_VALUE)
                        .build(),
                );
            if spec.restored {
                tags = tags.tags(Tag::builder().key(RESTORED_TAG_KEY).value("true").build());
            }

            let output = self
                .client
                .run_instances()
                .image_id(spec.image_id.as_str())
                .instance_type(InstanceType::from(spec.instance_type.as_str()))
                .min_count(1)
                .max_count(1)
                .security_group_ids(spec.security_group_id.as_str())
                .key_name(spec.key_pair_name.as_str())
                .tag_specifications(tags.build())
                .send()
                .await
                .map_err(|err| AwsError::api("run instances", &err))?;

            output
                .instances
                .unwrap_or_default()
                .into_iter()
                .next()
                .and_then(|instance| instance.instance_id)
                .ok_or(AwsError::MissingField {
                    resource: "run instances",
                    field: "instance id",
                })
        })
    }

    fn instance_state<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let instance =
                self.describe_by_id(instance_id)
                    .await?
                    .ok_or(AwsError::MissingField {
                        resource: "instance",
                        field: "reservation",
                    })?;
            instance
                .state
                .and_then(|current| current.name)
                .map(|name| name.as_str().to_owned())
                .ok_or(AwsError::MissingField {
                    resource: "instance",
                    field: "state",
                })
        })
    }

    fn terminate_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.client
                .terminate_instances()
                .instance_ids(instance_id)
                .send()
                .await
                .map_err(|err| AwsError::api("terminate instances", &err))?;
            Ok(())
        })
    }

    fn root_volume_id<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let instance =
                self.describe_by_id(instance_id)
                    .await?
                    .ok_or(AwsError::MissingField {
                        resource: "instance",
                        field: "reservation",
                    })?;
            let root_device = instance
                .root_device_name
                .clone()
                .unwrap_or_else(|| String::from(ROOT_DEVICE_FALLBACK));
            instance
                .block_device_mappings
                .unwrap_or_default()
                .into_iter()
                .find(|mapping| mapping.device_name.as_deref() == Some(root_device.as_str()))
                .and_then(|mapping| mapping.ebs.and_then(|ebs| ebs.volume_id))
                .ok_or(AwsError::MissingField {
                    resource: "instance",
                    field: "root volume",
                })
        })
    }

    fn latest_base_image(&self) -> ProviderFuture<'_, String, Self::Error> {
        Box::pin(async move {
            let output = self
                .client
                .describe_images()
                .owners(BASE_IMAGE_OWNER)
                .filters(
                    Filter::builder()
                        .name("name")
                        .values(BASE_IMAGE_NAME_PATTERN)
                        .build(),
                )
                .filters(Filter::builder().name("state").values("available").build())
                .send()
                .await
                .map_err(|err| AwsError::api("describe images", &err))?;
            output
                .images
                .unwrap_or_default()
                .into_iter()
                .max_by(|lhs, rhs| lhs.creation_date.cmp(&rhs.creation_date))
                .and_then(|image| image.image_id)
                .ok_or(AwsError::NoBaseImage)
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        profile: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let output = self
                .client
                .create_snapshot()
                .volume_id(volume_id)
                .description(format!("State of instance {instance_id} before retirement"))
                .tag_specifications(
                    TagSpecification::builder()
                        .resource_type(ResourceType::Snapshot)
                        .tags(Tag::builder().key(PROFILE_TAG_KEY).value(profile).build())
                        .tags(
                            Tag::builder()
                                .key(SNAPSHOT_INSTANCE_TAG_KEY)
                                .value(instance_id)
                                .build(),
                        )
                        .tags(
                            Tag::builder()
                                .key(MANAGED_BY_TAG_KEY)
                                .value(MANAGED_BY_TAG_VALUE)
                                .build(),
                        )
                        .build(),
                )
                .send()
                .await
                .map_err(|err| AwsError::api("create snapshot", &err))?;
            output.snapshot_id.ok_or(AwsError::MissingField {
                resource: "snapshot",
                field: "id",
            })
        })
    }

    fn list_snapshots<'a>(
        &'a self,
        profile: &'a str,
    ) -> ProviderFuture<'a, Vec<SnapshotSummary>, Self::Error> {
        Box::pin(async move {
            let output = self
                .client
                .describe_snapshots()
                .owner_ids(SELF_OWNER)
                .filters(profile_filter(profile))
                .filters(managed_by_filter())
                .send()
                .await
                .map_err(|err| AwsError::api("describe snapshots", &err))?;
            output
                .snapshots
                .unwrap_or_default()
                .into_iter()
                .map(snapshot_summary)
                .collect()
        })
    }

    fn list_all_snapshots(&self) -> ProviderFuture<'_, Vec<SnapshotSummary>, Self::Error> {
        Box::pin(async move {
            let output = self
                .client
                .describe_snapshots()
                .owner_ids(SELF_OWNER)
                .filters(managed_by_filter())
                .send()
                .await
                .map_err(|err| AwsError::api("describe snapshots", &err))?;
            output
                .snapshots
                .unwrap_or_default()
                .into_iter()
                .map(snapshot_summary)
                .collect()
        })
    }

    fn find_image_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> ProviderFuture<'a, Option<String>, Self::Error> {
        Box::pin(async move {
            let output = self
                .client
                .describe_images()
                .owners(SELF_OWNER)
                .filters(Filter::builder().name("name").values(name).build())
                .send()
                .await
                .map_err(|err| AwsError::api("describe images", &err))?;
            Ok(output
                .images
                .unwrap_or_default()
                .into_iter()
                .next()
                .and_then(|image| image.image_id))
        })
    }

    fn register_image<'a>(
        &'a self,
        name: &'a str,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let output = self
                .client
                .register_image()
                .name(name)
                .root_device_name(ROOT_DEVICE_FALLBACK)
                .virtualization_type("hvm")
                .block_device_mappings(
                    BlockDeviceMapping::builder()
                        .device_name(ROOT_DEVICE_FALLBACK)
                        .ebs(
                            EbsBlockDevice::builder()
                                .snapshot_id(snapshot_id)
                                .volume_type(VolumeType::Gp2)
                                .delete_on_termination(true)
                                .build(),
                        )
                        .build(),
                )
                .send()
                .await
                .map_err(|err| AwsError::api("register image", &err))?;
            output.image_id.ok_or(AwsError::MissingField {
                resource: "image",
                field: "id",
            })
        })
    }

    fn images_backed_by<'a>(
        &'a self,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, Vec<String>, Self::Error> {
        Box::pin(async move {
            let output = self
                .client
                .describe_images()
                .owners(SELF_OWNER)
                .filters(
                    Filter::builder()
                        .name("block-device-mapping.snapshot-id")
                        .values(snapshot_id)
                        .build(),
                )
                .send()
                .await
                .map_err(|err| AwsError::api("describe images", &err))?;
            Ok(output
                .images
                .unwrap_or_default()
                .into_iter()
                .filter_map(|image| image.image_id)
                .collect())
        })
    }

    fn deregister_image<'a>(&'a self, image_id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.client
                .deregister_image()
                .image_id(image_id)
                .send()
                .await
                .map_err(|err| AwsError::api("deregister image", &err))?;
            Ok(())
        })
    }

    fn delete_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.client
                .delete_snapshot()
                .snapshot_id(snapshot_id)
                .send()
                .await
                .map_err(|err| AwsError::api("delete snapshot", &err))?;
            Ok(())
        })
    }

    fn find_security_group<'a>(
        &'a self,
        name: &'a str,
    ) -> ProviderFuture<'a, Option<String>, Self::Error> {
        Box::pin(async move {
            let output = self
                .client
                .describe_security_groups()
                .filters(Filter::builder().name("group-name").values(name).build())
                .send()
                .await
                .map_err(|err| AwsError::api("describe security groups", &err))?;
            Ok(output
                .security_groups
                .unwrap_or_default()
                .into_iter()
                .next()
                .and_then(|group| group.group_id))
        })
    }

    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let vpcs = self
                .client
                .describe_vpcs()
                .filters(Filter::builder().name("isDefault").values("true").build())
                .send()
                .await
                .map_err(|err| AwsError::api("describe VPCs", &err))?;
            let vpc_id = vpcs
                .vpcs
                .unwrap_or_default()
                .into_iter()
                .next()
                .and_then(|vpc| vpc.vpc_id)
                .ok_or(AwsError::NoDefaultVpc)?;

            let created = self
                .client
                .create_security_group()
                .group_name(name)
                .description("Security group managed by roost")
                .vpc_id(vpc_id)
                .send()
                .await
                .map_err(|err| AwsError::api("create security group", &err))?;
            let group_id = created.group_id.ok_or(AwsError::MissingField {
                resource: "security group",
                field: "id",
            })?;

            // TODO: restrict ingress to the operator's address instead of
            // the open internet.
            self.client
                .authorize_security_group_ingress()
                .group_id(group_id.as_str())
                .ip_permissions(
                    IpPermission::builder()
                        .ip_protocol("tcp")
                        .from_port(SSH_PORT)
                        .to_port(SSH_PORT)
                        .ip_ranges(IpRange::builder().cidr_ip("0.0.0.0/0").build())
                        .build(),
                )
                .send()
                .await
                .map_err(|err| AwsError::api("authorize security group ingress", &err))?;

            Ok(group_id)
        })
    }

    fn create_key_pair<'a>(
        &'a self,
        name: &'a str,
    ) -> ProviderFuture<'a, KeyMaterial, Self::Error> {
        Box::pin(async move {
            let output = self
                .client
                .create_key_pair()
                .key_name(name)
                .key_type(KeyType::Rsa)
                .send()
                .await
                .map_err(|err| AwsError::api("create key pair", &err))?;
            let private_key_pem = output.key_material.ok_or(AwsError::MissingField {
                resource: "key pair",
                field: "key material",
            })?;
            Ok(KeyMaterial {
                name: output.key_name.unwrap_or_else(|| name.to_owned()),
                private_key_pem,
            })
        })
    }
}
