//! Protocol buffer definitions for the storage cluster's role API.
//!
//! The storage daemon exposes `openstorage.api.OpenStorageRole` over gRPC.
//! Bulwark only needs the `Update` call, so `proto/role.proto` declares that
//! subset of the SDK and the client is generated from it at build time.
//!
//! A service or API name prefixed with `!` is negated, so `!*` denies
//! everything.

#![deny(missing_docs)]

#[allow(missing_docs, clippy::all)]
mod api {
    tonic::include_proto!("openstorage.api");
}

pub use api::open_storage_role_client::OpenStorageRoleClient;
pub use api::{SdkRole, SdkRoleUpdateRequest, SdkRoleUpdateResponse, SdkRule};
