//! The shared contract between the sync queue and whatever carries bytes
//! to the server. `sync-protocol` implements `SyncTransport` over HTTP;
//! tests implement it in-memory.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One feature's worth of updates to send in a PATCH.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureUpdatePayload {
    pub updates: Vec<serde_json::Value>,
    pub modified_since: String,
}

/// What the server returned for one feature, whether from GET or PATCH.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureResponseEnvelope {
    #[serde(default)]
    pub entries: Vec<serde_json::Value>,
    pub last_modified: String,
}

#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// `features_since` is `(feature_name, previous_server_timestamp_or_"0")`
    /// pairs, order preserved in the request.
    async fn get(
        &self,
        token: &str,
        features_since: &[(String, String)],
    ) -> Result<HashMap<String, FeatureResponseEnvelope>>;

    /// `updates` maps feature name to the payload to send; `client_timestamp`
    /// is stamped once for the whole request per the wire contract.
    async fn patch(
        &self,
        token: &str,
        updates: HashMap<String, FeatureUpdatePayload>,
        client_timestamp: &str,
    ) -> Result<HashMap<String, FeatureResponseEnvelope>>;
}
