//! Device Plugin gRPC Service
//!
//! Implements the kubelet-facing `DevicePlugin` service on top of the
//! [`DeviceEngine`]. Each ListAndWatch call gets its own session task and
//! its own health channel.

use super::engine::DeviceEngine;
use super::lifecycle::Lifecycle;
use super::session::ListAndWatchSession;
use super::DeviceList;
use crate::hardware::{ContainerGrant, ContainerRequest};
use crate::v1beta1::device_plugin_server::DevicePlugin;
use crate::v1beta1::{
    AllocateRequest, AllocateResponse, ContainerAllocateResponse,
    ContainerPreferredAllocationResponse, Device, DevicePluginOptions, DeviceSpec, Empty,
    ListAndWatchResponse, PreStartContainerRequest, PreStartContainerResponse,
    PreferredAllocationRequest, PreferredAllocationResponse,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

const RESPONSE_BUFFER: usize = 16;
const HEALTH_BUFFER: usize = 16;

/// The `DevicePlugin` gRPC service for one server instance
#[derive(Clone)]
pub struct DevicePluginService {
    engine: Arc<DeviceEngine>,
    devices: DeviceList,
    lifecycle: Arc<Lifecycle>,
    sessions: Arc<Mutex<Vec<mpsc::Sender<Device>>>>,
}

impl DevicePluginService {
    pub fn new(engine: Arc<DeviceEngine>, devices: DeviceList, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            engine,
            devices,
            lifecycle,
            sessions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn options() -> DevicePluginOptions {
        DevicePluginOptions {
            pre_start_required: false,
            get_preferred_allocation_available: false,
        }
    }

    /// Forward a health update to every live session.
    ///
    /// Never blocks; a full channel drops the update for that session.
    /// Returns the number of sessions that accepted it.
    pub fn report_health(&self, device: Device) -> usize {
        let mut sessions = self.sessions.lock();
        sessions.retain(|tx| !tx.is_closed());

        let mut delivered = 0;
        for tx in sessions.iter() {
            match tx.try_send(device.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Health channel full, dropping update for device {}", device.id)
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    pub fn session_count(&self) -> usize {
        let mut sessions = self.sessions.lock();
        sessions.retain(|tx| !tx.is_closed());
        sessions.len()
    }

    async fn seed_devices(&self) -> Result<(), Status> {
        if !self.devices.read().is_empty() {
            return Ok(());
        }

        let engine = self.engine.clone();
        let discovered = tokio::task::spawn_blocking(move || engine.discover())
            .await
            .map_err(|e| Status::internal(format!("discovery task failed: {}", e)))?
            .map_err(|e| {
                error!("Device scan during ListAndWatch failed: {}", e);
                Status::from(e)
            })?;

        info!("Seeded device list with {} devices", discovered.len());
        *self.devices.write() = discovered;
        Ok(())
    }
}

fn to_allocate_response(grants: Vec<ContainerGrant>) -> AllocateResponse {
    let container_responses = grants
        .into_iter()
        .map(|grant| ContainerAllocateResponse {
            devices: grant
                .devices
                .into_iter()
                .map(|d| DeviceSpec {
                    container_path: d.container_path,
                    host_path: d.host_path,
                    permissions: d.permissions,
                })
                .collect(),
            ..Default::default()
        })
        .collect();

    AllocateResponse {
        container_responses,
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<DevicePluginOptions>, Status> {
        Ok(Response::new(Self::options()))
    }

    type ListAndWatchStream = ReceiverStream<Result<ListAndWatchResponse, Status>>;

    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListAndWatchStream>, Status> {
        info!("ListAndWatch stream opened");
        self.seed_devices().await?;

        let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);
        let (health_tx, health_rx) = mpsc::channel(HEALTH_BUFFER);
        self.sessions.lock().push(health_tx);

        let session =
            ListAndWatchSession::new(self.devices.clone(), self.lifecycle.clone(), health_rx, tx);
        tokio::spawn(async move {
            match session.run().await {
                Ok(state) => debug!("ListAndWatch session ended in {:?}", state),
                Err(e) => error!("ListAndWatch session failed: {}", e),
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn get_preferred_allocation(
        &self,
        request: Request<PreferredAllocationRequest>,
    ) -> Result<Response<PreferredAllocationResponse>, Status> {
        let container_responses = request
            .into_inner()
            .container_requests
            .iter()
            .map(|_| ContainerPreferredAllocationResponse::default())
            .collect();

        Ok(Response::new(PreferredAllocationResponse {
            container_responses,
        }))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> Result<Response<AllocateResponse>, Status> {
        let requests: Vec<ContainerRequest> = request
            .into_inner()
            .container_requests
            .into_iter()
            .map(|r| ContainerRequest {
                device_ids: r.devices_ids,
            })
            .collect();
        info!("Allocate request for {} containers", requests.len());

        let engine = self.engine.clone();
        let grants = tokio::task::spawn_blocking(move || engine.allocate(&requests))
            .await
            .map_err(|e| Status::internal(format!("allocation task failed: {}", e)))??;

        Ok(Response::new(to_allocate_response(grants)))
    }

    async fn pre_start_container(
        &self,
        _request: Request<PreStartContainerRequest>,
    ) -> Result<Response<PreStartContainerResponse>, Status> {
        Ok(Response::new(PreStartContainerResponse {}))
    }
}
