//! Custom Resource Definitions watched by Bulwark

mod storage_cluster;

pub use storage_cluster::{
    AuthSpec, DesiredSecurityPolicy, GuestAccessMode, SecuritySpec, SelfSignedSpec,
    StorageCluster, StorageClusterSpec, StorageClusterStatus, DEFAULT_SELF_SIGNED_ISSUER,
    DEFAULT_TOKEN_LIFETIME_SECS,
};
