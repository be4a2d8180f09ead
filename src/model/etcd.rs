//! Etcd member volumes.
//!
//! Each member gets a disk in its zone labelled with its etcd membership so
//! that the control plane can find and mount it, and so that cluster status
//! can be rebuilt from the disks alone.

use crate::config::InstanceGroupRole;
use crate::discovery::EtcdClusterSpec;
use crate::engine::TaskSet;
use crate::error::Result;
use crate::tasks::{Disk, Lifecycle};

use super::{ModelBuilder, ModelContext};

/// Emits one disk per etcd member.
#[derive(Debug, Clone, Copy, Default)]
pub struct EtcdVolumeBuilder;

impl ModelBuilder for EtcdVolumeBuilder {
    fn build(&self, ctx: &ModelContext<'_>, tasks: &mut TaskSet) -> Result<()> {
        for etcd in &ctx.cluster.etcd_clusters {
            let node_names: Vec<String> = etcd.members.iter().map(|m| m.name.clone()).collect();
            for member in &etcd.members {
                let spec = EtcdClusterSpec {
                    cluster_key: etcd.name.clone(),
                    node_name: member.name.clone(),
                    node_names: node_names.clone(),
                };
                let mut labels = ctx.cluster_labels();
                let (role_key, role_value) = ModelContext::role_label(InstanceGroupRole::ControlPlane);
                labels.insert(role_key, role_value);
                labels.insert(spec.label_key(), spec.label_value());

                tasks.add(Disk {
                    name: ctx.name_for(&format!("{}-etcd-{}", member.name, etcd.name)),
                    zone: member.zone.clone(),
                    volume_type: member.volume_type.clone(),
                    size_gb: member.volume_size_gb,
                    labels,
                    lifecycle: Lifecycle::Sync,
                })?;
            }
        }
        Ok(())
    }
}
