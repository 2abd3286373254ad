//! Startup seeding of administrator-managed records.
//!
//! Trust groups, trusted callers and tool providers listed under
//! `[bootstrap]` are created when missing. Rows that already exist (matched
//! by group name, consumer key and provider name) are left untouched.

use std::collections::HashMap;

use ltilaunch::types::consumer::GENERATED_CREDENTIAL_LEN;
use ltilaunch::types::{NewToolConsumer, ToolProvider, generate_random_string};
use ltilaunch::{LaunchError, LaunchResult, LtiStores};
use tracing::{info, warn};

use crate::config::{BootstrapConfig, BootstrapConsumer};

/// What a bootstrap run changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub groups_created: usize,
    pub consumers_created: usize,
    pub providers_created: usize,
}

/// Creates every configured record that does not exist yet.
///
/// # Errors
///
/// Returns an error if a storage call fails or a consumer references a
/// group that is neither configured nor stored.
pub async fn run_bootstrap(
    stores: &LtiStores,
    cfg: &BootstrapConfig,
) -> LaunchResult<BootstrapReport> {
    let mut report = BootstrapReport::default();
    let mut group_ids: HashMap<&str, i64> = HashMap::new();

    for name in &cfg.groups {
        let group = match stores.groups.find_by_name(name).await? {
            Some(existing) => existing,
            None => {
                report.groups_created += 1;
                info!(group = %name, "Creating trust group");
                stores.groups.create(name).await?
            }
        };
        group_ids.insert(name.as_str(), group.id);
    }

    for entry in &cfg.consumers {
        if let Some(key) = &entry.consumer_key
            && stores.consumers.find_by_key(key).await?.is_some()
        {
            continue;
        }
        let group_id = match &entry.group {
            Some(group) => Some(*group_ids.get(group.as_str()).ok_or_else(|| {
                LaunchError::configuration(format!("unknown bootstrap group '{group}'"))
            })?),
            None => None,
        };
        let consumer = stores
            .consumers
            .create(new_consumer(entry, group_id))
            .await?;
        report.consumers_created += 1;

        if entry.consumer_key.is_none() || entry.consumer_secret.is_none() {
            warn!(
                consumer = %consumer.name,
                consumer_key = %consumer.consumer_key,
                consumer_secret = %consumer.consumer_secret,
                "Generated caller credentials; add them to the bootstrap entry to keep them across restarts"
            );
        } else {
            info!(
                consumer = %consumer.name,
                consumer_key = %consumer.consumer_key,
                "Registered trusted caller"
            );
        }
    }

    for entry in &cfg.providers {
        if stores.providers.find_by_name(&entry.name).await?.is_some() {
            continue;
        }
        let provider = ToolProvider {
            name: entry.name.clone(),
            display_name: entry.display_name.clone(),
            description: entry.description.clone(),
            icon_url: entry.icon_url.clone(),
            launch_path: entry.launch_path.clone(),
            visibility: entry.visibility,
        };
        stores.providers.create(&provider).await?;
        report.providers_created += 1;
        info!(provider = %provider.name, "Registered tool provider");
    }

    Ok(report)
}

fn new_consumer(entry: &BootstrapConsumer, group_id: Option<i64>) -> NewToolConsumer {
    NewToolConsumer {
        name: entry.name.clone(),
        description: entry.description.clone(),
        consumer_key: entry
            .consumer_key
            .clone()
            .unwrap_or_else(|| generate_random_string(GENERATED_CREDENTIAL_LEN)),
        consumer_secret: entry
            .consumer_secret
            .clone()
            .unwrap_or_else(|| generate_random_string(GENERATED_CREDENTIAL_LEN)),
        instance_guid: entry.instance_guid.clone(),
        match_guid_and_consumer: entry.match_guid_and_consumer,
        group_id,
        matcher: entry.matcher.clone(),
    }
}
