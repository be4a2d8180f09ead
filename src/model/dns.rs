//! Private DNS zone of clusters that do not publish to a public zone.

use std::collections::BTreeMap;

use crate::cloud::naming::{MAX_NAME_LENGTH, limited_length_name};
use crate::config::DnsType;
use crate::engine::TaskSet;
use crate::error::{ModelError, Result};
use crate::tasks::ManagedZone;

use super::{ModelBuilder, ModelContext};

/// Emits a private managed zone when the cluster DNS type is private.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsModelBuilder;

impl ModelBuilder for DnsModelBuilder {
    fn build(&self, ctx: &ModelContext<'_>, tasks: &mut TaskSet) -> Result<()> {
        let dns = &ctx.cluster.dns;
        if dns.dns_type != DnsType::Private {
            return Ok(());
        }
        let zone = dns.zone.as_deref().ok_or_else(|| ModelError::InvalidSpec {
            message: "a private DNS zone needs a zone name".to_string(),
        })?;
        let name = limited_length_name(&zone.trim_end_matches('.').replace('.', "-"), MAX_NAME_LENGTH);
        let mut managed = ManagedZone::private(name, zone, ctx.network());
        managed.labels = BTreeMap::from([
            ("created-by".to_string(), "kops".to_string()),
            ("cluster".to_string(), ctx.safe_cluster_name()),
        ]);
        tasks.add(managed)
    }
}
