//! Version-dialected access to a search cluster's REST surface.

pub(crate) mod client;
pub(crate) mod http;
pub(crate) mod types;

pub(crate) use client::{EsClient, ScrollRequest};
pub(crate) use http::Auth;
pub(crate) use types::{ClusterVersion, IndexSet, ScrollResponse};
