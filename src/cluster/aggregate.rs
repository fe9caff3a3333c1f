//!
//! Host aggregate of a cluster.
//!
//! The cluster status is derived from counting host statuses, the thresholds
//! and which host statuses count as usable, installed or failed come from
//! the [`ClusterPolicy`].
use super::ClusterStatus;
use crate::config::ClusterPolicy;
use crate::types::{Host, HostRole};
use std::collections::BTreeMap;

/// Host counts of one cluster
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HostAggregate {
    /// Number of hosts
    pub total: usize,
    /// Master hosts in a status usable for installation
    pub usable_masters: usize,
    /// Hosts reporting a completed installation
    pub installed: usize,
    /// Hosts reporting a failure
    pub failed: usize,
    /// Number of hosts per reported status
    pub by_status: BTreeMap<String, usize>,
    min_masters: usize,
    min_installed_hosts: usize,
}

impl HostAggregate {
    /// Count `hosts` according to `policy`
    #[must_use]
    pub fn new(hosts: &[Host], policy: &ClusterPolicy) -> Self {
        let mut aggregate = Self {
            min_masters: policy.min_masters,
            min_installed_hosts: policy.min_installed_hosts,
            ..Self::default()
        };

        for host in hosts {
            aggregate.total += 1;
            *aggregate.by_status.entry(host.status.clone()).or_default() += 1;

            if host.role == HostRole::Master && policy.is_usable(&host.status) {
                aggregate.usable_masters += 1;
            }
            if policy.is_installed(&host.status) {
                aggregate.installed += 1;
            }
            if policy.is_failed(&host.status) {
                aggregate.failed += 1;
            }
        }
        aggregate
    }

    /// Enough usable masters to start an installation
    #[must_use]
    pub const fn ready_for_install(&self) -> bool {
        self.usable_masters >= self.min_masters
    }

    /// Status of a cluster in installation given these hosts.
    ///
    /// A failed host, or too few hosts to ever complete, ends the installation
    /// in [`ClusterStatus::Error`]; it never falls back to a pre-install status.
    #[must_use]
    pub const fn installation_outcome(&self) -> ClusterStatus {
        if self.failed > 0 || self.total < self.min_installed_hosts {
            ClusterStatus::Error
        } else if self.installed == self.total {
            ClusterStatus::Installed
        } else {
            ClusterStatus::Installing
        }
    }
}
