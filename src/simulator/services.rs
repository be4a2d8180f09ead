//! In-memory service accounts and DNS managed zones.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::cloud::dns::ManagedZoneClient;
use crate::cloud::iam::{ServiceAccountClient, service_account_email};
use crate::cloud::types::{ManagedZone, ServiceAccount};
use crate::error::{CloudError, Result};

/// In-memory service accounts, keyed by `(project, email)`.
#[derive(Debug, Default)]
pub struct MockServiceAccounts {
    accounts: Mutex<BTreeMap<(String, String), ServiceAccount>>,
    counter: AtomicU64,
}

#[async_trait]
impl ServiceAccountClient for MockServiceAccounts {
    async fn get(&self, project: &str, email: &str) -> Result<ServiceAccount> {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(project.to_string(), email.to_string()))
            .cloned()
            .ok_or_else(|| CloudError::not_found("serviceAccount", email).into())
    }

    async fn create(
        &self,
        project: &str,
        account_id: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount> {
        let email = service_account_email(account_id, project);
        let mut accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (project.to_string(), email.clone());
        if accounts.contains_key(&key) {
            return Err(CloudError::already_exists("serviceAccount", email).into());
        }
        let created = ServiceAccount {
            name: format!("projects/{project}/serviceAccounts/{email}"),
            project_id: project.to_string(),
            email,
            unique_id: (100_000_000_000 + self.counter.fetch_add(1, Ordering::Relaxed)).to_string(),
            ..account.clone()
        };
        accounts.insert(key, created.clone());
        Ok(created)
    }

    async fn list(&self, project: &str) -> Result<Vec<ServiceAccount>> {
        Ok(self
            .accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((p, _), _)| p == project)
            .map(|(_, a)| a.clone())
            .collect())
    }
}

/// In-memory DNS managed zones, keyed by `(project, name)`.
#[derive(Debug, Default)]
pub struct MockManagedZones {
    zones: Mutex<BTreeMap<(String, String), ManagedZone>>,
    counter: AtomicU64,
}

#[async_trait]
impl ManagedZoneClient for MockManagedZones {
    async fn create(&self, project: &str, zone: &ManagedZone) -> Result<ManagedZone> {
        if !zone.dns_name.ends_with('.') {
            return Err(CloudError::BadRequest {
                message: format!("dnsName {} must end with a dot", zone.dns_name),
            }
            .into());
        }
        let mut zones = self.zones.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (project.to_string(), zone.name.clone());
        if zones.contains_key(&key) {
            return Err(CloudError::already_exists("managedZone", &zone.name).into());
        }
        let created = ManagedZone {
            id: Some((self.counter.fetch_add(1, Ordering::Relaxed) + 1).to_string()),
            ..zone.clone()
        };
        zones.insert(key, created.clone());
        Ok(created)
    }

    async fn get(&self, project: &str, name: &str) -> Result<ManagedZone> {
        self.zones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(project.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| CloudError::not_found("managedZone", name).into())
    }

    async fn list(&self, project: &str) -> Result<Vec<ManagedZone>> {
        Ok(self
            .zones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((p, _), _)| p == project)
            .map(|(_, z)| z.clone())
            .collect())
    }
}
