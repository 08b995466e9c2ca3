//! KfCluster CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the KfCluster controller,
//! plus the defaulting and validation rules an admission webhook applies.

pub mod admission;
pub mod kf_cluster;
pub mod provider;

pub use admission::*;
pub use kf_cluster::*;
pub use provider::*;
