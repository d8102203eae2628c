//! Kubelet Registration
//!
//! Announces the plugin to the kubelet over its Unix registration socket.

use super::service::DevicePluginService;
use crate::domain::ports::{Registrar, Registration};
use crate::error::{Error, Result};
use crate::v1beta1::registration_client::RegistrationClient;
use crate::v1beta1::RegisterRequest;
use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{error, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a gRPC channel over a Unix socket.
///
/// The endpoint URI is ignored by the connector; only `path` is dialled.
pub async fn connect_unix(path: impl AsRef<Path>) -> Result<Channel> {
    let path = path.as_ref().to_path_buf();

    let channel = Endpoint::try_from("http://[::]:50051")?
        .connect_timeout(CONNECT_TIMEOUT)
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
        }))
        .await?;

    Ok(channel)
}

/// Registers with the kubelet through `kubelet.sock`
#[derive(Debug, Clone)]
pub struct KubeletRegistrar {
    kubelet_socket: PathBuf,
}

impl KubeletRegistrar {
    pub fn new(kubelet_socket: impl Into<PathBuf>) -> Self {
        Self {
            kubelet_socket: kubelet_socket.into(),
        }
    }

    pub fn kubelet_socket(&self) -> &Path {
        &self.kubelet_socket
    }
}

#[async_trait]
impl Registrar for KubeletRegistrar {
    async fn register(&self, registration: Registration) -> Result<()> {
        let channel = connect_unix(&self.kubelet_socket).await.map_err(|e| {
            error!(
                "Cannot connect to kubelet at {}: {}",
                self.kubelet_socket.display(),
                e
            );
            Error::Registration(format!(
                "connect to {}: {}",
                self.kubelet_socket.display(),
                e
            ))
        })?;

        let request = RegisterRequest {
            version: registration.version.clone(),
            endpoint: registration.endpoint.clone(),
            resource_name: registration.resource_name.clone(),
            options: Some(DevicePluginService::options()),
        };

        RegistrationClient::new(channel)
            .register(request)
            .await
            .map_err(|status| {
                error!("Kubelet rejected registration: {}", status.message());
                Error::Registration(status.message().to_string())
            })?;

        info!(
            "Registered {} (endpoint {}, API {}) with kubelet",
            registration.resource_name, registration.endpoint, registration.version
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::API_VERSION;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_register_without_kubelet_fails() {
        let dir = tempfile::tempdir().unwrap();
        let registrar = KubeletRegistrar::new(dir.path().join("kubelet.sock"));

        let result = registrar
            .register(Registration {
                version: API_VERSION.to_string(),
                endpoint: "plugin.sock".to_string(),
                resource_name: "example.com/dev".to_string(),
            })
            .await;

        assert_matches!(result, Err(Error::Registration(_)));
    }
}
