//! Shared AWS client configuration.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use tracing::info;

/// Region and endpoint override used to build AWS clients.
///
/// An endpoint override points the clients at LocalStack or another
/// AWS-compatible service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsSettings {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsSettings {
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    /// Loads an SDK config from the default provider chain plus these overrides.
    pub async fn load(&self) -> SdkConfig {
        let mut builder = aws_config::defaults(BehaviorVersion::latest());

        if let Some(ref region) = self.region {
            builder = builder.region(Region::new(region.clone()));
        }
        if let Some(ref endpoint) = self.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        let config = builder.load().await;
        info!(region = ?self.region, endpoint = ?self.endpoint_url, "loaded AWS config");
        config
    }
}
