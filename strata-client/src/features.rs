//! Capability probing.
//!
//! Each newly validated endpoint is probed once for the optional RPCs it
//! implements, so callers can branch on server capabilities instead of
//! sniffing version numbers. Servers predating the probe answer with
//! `Unimplemented`, which is a feature-absence signal rather than an error.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Channel;
use tonic::Code;

use crate::error::ClientError;
use crate::types::Endpoint;

/// One optional RPC plus its feature flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedMethod {
    /// Fully qualified service name.
    pub service: String,
    /// Method name within the service.
    pub method: String,
    /// Feature flags the method advertises.
    pub features: Vec<String>,
}

/// Optional server capabilities learned from the one-time probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerFeatures {
    /// Server version string, when reported.
    pub server_version: Option<String>,
    methods: Vec<SupportedMethod>,
}

impl ServerFeatures {
    /// Build from an explicit method catalogue.
    #[must_use]
    pub fn new(server_version: Option<String>, methods: Vec<SupportedMethod>) -> Self {
        Self {
            server_version,
            methods,
        }
    }

    /// Whether the server implements `service`/`method`.
    #[must_use]
    pub fn supports(&self, service: &str, method: &str) -> bool {
        self.method(service, method).is_some()
    }

    /// Whether `service`/`method` advertises `feature`.
    #[must_use]
    pub fn supports_feature(&self, service: &str, method: &str, feature: &str) -> bool {
        self.method(service, method)
            .is_some_and(|m| m.features.iter().any(|f| f == feature))
    }

    fn method(&self, service: &str, method: &str) -> Option<&SupportedMethod> {
        self.methods
            .iter()
            .find(|m| m.service == service && m.method == method)
    }
}

/// Boundary for the one-time capability probe against a validated endpoint.
#[async_trait]
pub trait FeatureProbe: Send + Sync + 'static {
    /// Learn the server's optional capabilities over `channel`.
    ///
    /// Implementations must map an `Unimplemented` status to an empty
    /// [`ServerFeatures`], not an error.
    async fn probe(
        &self,
        endpoint: &Endpoint,
        channel: Channel,
        timeout: Duration,
    ) -> Result<ServerFeatures, ClientError>;
}

/// Production probe driving the `GetSupportedMethods` RPC.
pub struct GrpcFeatureProbe;

#[async_trait]
impl FeatureProbe for GrpcFeatureProbe {
    async fn probe(
        &self,
        endpoint: &Endpoint,
        channel: Channel,
        timeout: Duration,
    ) -> Result<ServerFeatures, ClientError> {
        let mut client = strata_wire::FeaturesClient::new(channel);
        let call = client.get_supported_methods(strata_wire::Empty::default());
        match tokio::time::timeout(timeout, call).await {
            Err(_) => Err(ClientError::transport(endpoint, "capability probe timed out")),
            Ok(Err(status)) if status.code() == Code::Unimplemented => {
                Ok(ServerFeatures::default())
            }
            Ok(Err(status)) => Err(ClientError::from_status(endpoint, &status)),
            Ok(Ok(response)) => Ok(from_wire(response.into_inner())),
        }
    }
}

fn from_wire(methods: strata_wire::features::SupportedMethods) -> ServerFeatures {
    let version = (!methods.server_version.is_empty()).then_some(methods.server_version);
    let methods = methods
        .methods
        .into_iter()
        .map(|m| SupportedMethod {
            service: m.service_name,
            method: m.method_name,
            features: m.features,
        })
        .collect();
    ServerFeatures::new(version, methods)
}
