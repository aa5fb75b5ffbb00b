//! Client for the in-guest data-copy agent hosted on gateway VMs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::DriverError;
use crate::BoxFuture;

/// Parameters of a device-to-device transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneVolumeRequest {
    pub src_dev_name: String,
    pub des_dev_name: String,
    pub src_dev_format: String,
    pub src_mount_point: String,
    pub src_gw_url: String,
    pub des_gw_url: String,
}

/// Terminality of a transfer task as reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    InProgress,
    Finished,
    Failed,
}

/// One gateway VM's agent, spoken over HTTP/JSON.
pub trait GatewayAgent: Send + Sync {
    /// All block devices currently visible on the gateway.
    fn list_disks(&self) -> BoxFuture<'_, Result<Vec<String>, DriverError>>;

    /// Device name backing a volume, when the agent can resolve it.
    fn get_disk_name<'a>(
        &'a self,
        volume_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, DriverError>>;

    fn get_disk_format<'a>(
        &'a self,
        dev_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, DriverError>>;

    fn get_disk_mount_point<'a>(
        &'a self,
        dev_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, DriverError>>;

    /// Mount a device, creating the mount point if needed. Returns the
    /// effective mount point.
    fn force_mount_disk<'a>(
        &'a self,
        dev_name: &'a str,
        mount_point: &'a str,
    ) -> BoxFuture<'a, Result<String, DriverError>>;

    /// Start a transfer; returns the agent task id to poll.
    fn clone_volume(
        &self,
        request: CloneVolumeRequest,
    ) -> BoxFuture<'_, Result<String, DriverError>>;

    fn get_data_trans_status<'a>(
        &'a self,
        task_id: &'a str,
    ) -> BoxFuture<'a, Result<TransferStatus, DriverError>>;
}

/// Hands out an agent connection for a `host:port` gateway endpoint.
pub trait AgentConnector: Send + Sync {
    fn connect(&self, gw_url: &str) -> Arc<dyn GatewayAgent>;
}

// ── HTTP implementation ──────────────────────────────────────────────────

pub struct HttpGatewayAgent {
    base_url: String,
    client: reqwest::Client,
}

impl HttpGatewayAgent {
    pub fn new(gw_url: &str) -> Self {
        HttpGatewayAgent {
            base_url: format!("http://{gw_url}/v2vGateWayServices"),
            client: reqwest::Client::new(),
        }
    }

    async fn action(&self, body: Value) -> Result<Value, DriverError> {
        let url = format!("{}/{}/action", self.base_url, Uuid::new_v4());
        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(DriverError::Agent(format!(
                "agent action failed with status {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

impl GatewayAgent for HttpGatewayAgent {
    fn list_disks(&self) -> BoxFuture<'_, Result<Vec<String>, DriverError>> {
        Box::pin(async move {
            let rsp = self.action(json!({"getDiskName": {}})).await?;
            let names = rsp
                .get("dev_name")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Ok(names)
        })
    }

    fn get_disk_name<'a>(
        &'a self,
        volume_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, DriverError>> {
        Box::pin(async move {
            let rsp = self
                .action(json!({"getDiskName": {"volume_id": volume_id}}))
                .await?;
            Ok(rsp
                .get("dev_name")
                .and_then(Value::as_str)
                .map(str::to_string))
        })
    }

    fn get_disk_format<'a>(
        &'a self,
        dev_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, DriverError>> {
        Box::pin(async move {
            let rsp = self
                .action(json!({"getDiskFormat": {"disk_name": dev_name}}))
                .await?;
            Ok(rsp
                .get("disk_format")
                .and_then(Value::as_str)
                .map(str::to_string))
        })
    }

    fn get_disk_mount_point<'a>(
        &'a self,
        dev_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, DriverError>> {
        Box::pin(async move {
            let rsp = self
                .action(json!({"getDiskMountPoint": {"disk_name": dev_name}}))
                .await?;
            Ok(rsp
                .get("mount_point")
                .and_then(Value::as_str)
                .map(str::to_string))
        })
    }

    fn force_mount_disk<'a>(
        &'a self,
        dev_name: &'a str,
        mount_point: &'a str,
    ) -> BoxFuture<'a, Result<String, DriverError>> {
        Box::pin(async move {
            tracing::debug!(dev = %dev_name, mount_point = %mount_point, "force mounting disk");
            let rsp = self
                .action(json!({
                    "forceMountDisk": {
                        "disk": {"disk_name": dev_name},
                        "mount_point": mount_point,
                    }
                }))
                .await?;
            rsp.get("mount_disk")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| DriverError::Agent("mount response missing mount_disk".into()))
        })
    }

    fn clone_volume(
        &self,
        request: CloneVolumeRequest,
    ) -> BoxFuture<'_, Result<String, DriverError>> {
        Box::pin(async move {
            tracing::debug!(
                src = %request.src_dev_name,
                dst = %request.des_dev_name,
                "starting volume transfer"
            );
            let response = self
                .client
                .post(&self.base_url)
                .json(&json!({"clone_volume": request}))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(DriverError::Agent(format!(
                    "clone_volume failed with status {}",
                    response.status()
                )));
            }
            let rsp: Value = response.json().await?;
            rsp.get("task_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| DriverError::Agent("clone response missing task_id".into()))
        })
    }

    fn get_data_trans_status<'a>(
        &'a self,
        task_id: &'a str,
    ) -> BoxFuture<'a, Result<TransferStatus, DriverError>> {
        Box::pin(async move {
            let url = format!("{}/{}", self.base_url, task_id);
            let rsp: Value = self.client.get(&url).send().await?.json().await?;
            match rsp.get("task_state").and_then(Value::as_str) {
                Some("DATA_TRANS_FINISHED") => Ok(TransferStatus::Finished),
                Some("DATA_TRANS_FAILED") => Ok(TransferStatus::Failed),
                Some(_) => Ok(TransferStatus::InProgress),
                None => Err(DriverError::Agent(
                    "status response missing task_state".into(),
                )),
            }
        })
    }
}

/// Connector that opens a plain HTTP agent per gateway endpoint.
#[derive(Default)]
pub struct HttpAgentConnector;

impl AgentConnector for HttpAgentConnector {
    fn connect(&self, gw_url: &str) -> Arc<dyn GatewayAgent> {
        Arc::new(HttpGatewayAgent::new(gw_url))
    }
}
