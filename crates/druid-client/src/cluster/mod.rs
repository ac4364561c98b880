//! Cluster discovery and per-service clients.

pub mod mapper;
pub mod services;
pub mod topology;

pub use mapper::{map_endpoint, DockerMapper, IdentityMapper, MappedAddress, ServiceMapper};
pub use services::{Broker, Coordinator, Overlord, Router, Service};
pub use topology::{Cluster, ServiceEndpoint};
