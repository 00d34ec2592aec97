use anyhow::Context;
use bucket_storage::{BucketAcl, BucketManager, Tag};
use clap::Subcommand;
use node_metadata::MetadataResolver;

/// Queries about the node this runs on.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum NodeCmd {
    /// Print the instance id
    InstanceId,
    /// Print the availability zone
    AvailabilityZone,
    /// Print the block device an attached volume shows up as
    DevicePath { volume_id: String },
}

/// Parallel filesystem bucket operations.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum BucketCmd {
    /// Print the bucket, failing if it is not a parallel filesystem
    Get { name: String },
    Exists { name: String },
    Create {
        name: String,
        #[arg(long, default_value_t = BucketAcl::Private)]
        acl: BucketAcl,
    },
    /// Abort multipart uploads and delete every object
    Clean { name: String },
    /// Delete an empty bucket
    Delete { name: String },
    /// Clean, then delete the bucket
    Teardown { name: String },
    Tags { name: String },
    /// Replace the bucket's tags
    SetTags {
        name: String,
        /// Tags as `key=value`
        #[arg(value_parser = parse_tag)]
        tags: Vec<Tag>,
    },
    Usage { name: String },
    /// Print the bucket quota in bytes, 0 if unlimited
    Capacity { name: String },
}

pub fn parse_tag(s: &str) -> anyhow::Result<Tag> {
    let (key, value) = s
        .split_once('=')
        .with_context(|| format!("tag {s:?} is not in the `key=value` form"))?;
    if key.is_empty() {
        anyhow::bail!("tag {s:?} has an empty key");
    }
    Ok(Tag::new(key, value))
}

/// Runs `cmd` and returns what to print.
pub async fn run_node_command(resolver: &MetadataResolver, cmd: &NodeCmd) -> anyhow::Result<String> {
    match cmd {
        NodeCmd::InstanceId => Ok(resolver.instance_id().await?),
        NodeCmd::AvailabilityZone => Ok(resolver.availability_zone().await?),
        NodeCmd::DevicePath { volume_id } => resolver
            .device_path(volume_id)
            .await
            .map(|path| path.into_string())
            .with_context(|| format!("device path of volume {volume_id} is unknown")),
    }
}

/// Runs `cmd` and returns what to print.
pub async fn run_bucket_command(manager: &BucketManager, cmd: &BucketCmd) -> anyhow::Result<String> {
    let output = match cmd {
        BucketCmd::Get { name } => {
            serde_json::to_string_pretty(&manager.get_parallel_fs_bucket(name).await?)?
        }
        BucketCmd::Exists { name } => manager.check_exists(name).await?.to_string(),
        BucketCmd::Create { name, acl } => {
            manager.create(name, *acl).await?;
            format!("created {name}")
        }
        BucketCmd::Clean { name } => {
            manager.clean(name).await?;
            format!("cleaned {name}")
        }
        BucketCmd::Delete { name } => {
            manager.delete(name).await?;
            format!("deleted {name}")
        }
        BucketCmd::Teardown { name } => {
            manager.teardown(name).await?;
            format!("deleted {name}")
        }
        BucketCmd::Tags { name } => serde_json::to_string_pretty(&manager.list_tags(name).await?)?,
        BucketCmd::SetTags { name, tags } => {
            manager.set_tags(name, tags).await?;
            format!("tagged {name}")
        }
        BucketCmd::Usage { name } => {
            serde_json::to_string_pretty(&manager.storage_usage(name).await?)?
        }
        BucketCmd::Capacity { name } => manager.capacity(name).await?.to_string(),
    };
    Ok(output)
}
