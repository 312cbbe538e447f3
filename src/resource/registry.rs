use crate::config::{CapacityClass, FetchConfig, ResourceEntry, SchedulerConfig};
use crate::resource::capacity::PoolProfile;
use crate::{ConfigError, HarvestError};
use reqwest::Client;
use std::net::{IpAddr, SocketAddr, UdpSocket};

/// One configured egress path and its dedicated client pool
#[derive(Debug)]
pub struct Resource {
    /// Position in the registry; queues and workers are indexed by it
    pub index: usize,
    /// Identity from configuration
    pub name: String,
    /// Capacity class
    pub class: CapacityClass,
    /// Address clients are bound to; `None` when unbound or degraded
    pub local_address: Option<IpAddr>,
    /// Capacity of this resource's task queue
    pub queue_capacity: usize,
    /// Workers started for this resource at startup
    pub initial_workers: usize,
    clients: Vec<Client>,
}

impl Resource {
    /// Returns true if clients were bound to the configured local address
    pub fn is_bound(&self) -> bool {
        self.local_address.is_some()
    }

    /// Share weight used to split scale-up increments
    pub fn share_weight(&self) -> usize {
        self.class.share_weight()
    }

    /// Number of clients in the pool
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Gets a client by slot, wrapping around the pool
    pub fn client(&self, slot: usize) -> &Client {
        &self.clients[slot % self.clients.len()]
    }
}

/// Static description of every egress path
///
/// Built once at startup; read-only afterwards and shared across workers.
#[derive(Debug)]
pub struct ResourceRegistry {
    resources: Vec<Resource>,
}

impl ResourceRegistry {
    /// Builds the registry and every resource's client pool
    ///
    /// A local address that cannot be bound degrades that resource to unbound
    /// clients with a warning; it never fails construction.
    ///
    /// # Returns
    ///
    /// * `Ok(ResourceRegistry)` - All client pools built
    /// * `Err(HarvestError)` - No resources given, an address failed to parse,
    ///   or the HTTP client could not be constructed
    pub fn new(
        entries: &[ResourceEntry],
        fetch: &FetchConfig,
        scheduler: &SchedulerConfig,
    ) -> Result<Self, HarvestError> {
        if entries.is_empty() {
            return Err(HarvestError::NoResources);
        }

        let clients_per_resource = fetch.clients_per_resource.max(1);
        let mut resources = Vec::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            let requested = entry
                .local_address
                .as_deref()
                .map(|addr| {
                    addr.parse::<IpAddr>()
                        .map_err(|e| ConfigError::InvalidAddress(format!("{}: {}", addr, e)))
                })
                .transpose()?;

            let local_address = match requested {
                Some(addr) => match probe_local_address(addr) {
                    Ok(()) => Some(addr),
                    Err(e) => {
                        tracing::warn!(
                            resource = %entry.name,
                            address = %addr,
                            "Cannot bind local address ({}), falling back to unbound clients",
                            e
                        );
                        None
                    }
                },
                None => None,
            };

            let profile = entry.capacity.pool_profile();
            let clients = (0..clients_per_resource)
                .map(|_| build_resource_client(fetch, profile, local_address))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| HarvestError::Client {
                    resource: entry.name.clone(),
                    source,
                })?;

            let resource = Resource {
                index,
                name: entry.name.clone(),
                class: entry.capacity,
                local_address,
                queue_capacity: entry.capacity.scale(scheduler.queue_capacity_per_resource),
                initial_workers: entry.capacity.scale(scheduler.initial_workers_per_resource),
                clients,
            };

            tracing::info!(
                resource = %resource.name,
                class = ?resource.class,
                bound = resource.is_bound(),
                clients = resource.client_count(),
                queue_capacity = resource.queue_capacity,
                "Resource configured"
            );

            resources.push(resource);
        }

        Ok(Self { resources })
    }

    /// Returns the number of resources
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Gets a resource by index
    pub fn resource(&self, index: usize) -> Option<&Resource> {
        self.resources.get(index)
    }

    /// Gets a specific client of a specific resource
    pub fn client(&self, resource: usize, client: usize) -> Option<&Client> {
        self.resources
            .get(resource)
            .and_then(|r| r.clients.get(client))
    }

    /// Iterates over all resources in index order
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// Share weights in index order
    pub fn share_weights(&self) -> Vec<usize> {
        self.resources.iter().map(Resource::share_weight).collect()
    }
}

/// Checks that a socket can be bound to the address on this host
fn probe_local_address(addr: IpAddr) -> std::io::Result<()> {
    UdpSocket::bind(SocketAddr::new(addr, 0)).map(drop)
}

/// Builds one HTTP client for a resource
fn build_resource_client(
    fetch: &FetchConfig,
    profile: PoolProfile,
    local_address: Option<IpAddr>,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(fetch.user_agent.as_str())
        .timeout(fetch.request_timeout())
        .connect_timeout(profile.connect_timeout)
        .pool_max_idle_per_host(profile.max_idle_per_host)
        .pool_idle_timeout(profile.idle_timeout)
        .tcp_keepalive(profile.idle_timeout)
        .local_address(local_address)
        .gzip(true)
        .brotli(true)
        .build()
}
