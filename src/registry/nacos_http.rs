//! Nacos Open API (v1) 命名客户端
//!
//! - 订阅：按 `poll_interval` 轮询实例列表，列表变化时推送
//! - 临时实例：注册后按 `beat_interval` 发送心跳，注销或关闭时停止
//! - 多个服务器按顺序尝试，第一个成功的响应生效

use crate::config::NacosConfig;
use crate::error::{DubboError, ErrorCode, InfraResultExt, Result};
use crate::registry::naming::{NacosInstance, NamingClient, grouped_service_name};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const INSTANCE_LIST_PATH: &str = "/nacos/v1/ns/instance/list";
const INSTANCE_PATH: &str = "/nacos/v1/ns/instance";
const BEAT_PATH: &str = "/nacos/v1/ns/instance/beat";
const METRICS_PATH: &str = "/nacos/v1/ns/operator/metrics";

#[derive(Debug, Deserialize)]
struct InstanceListResponse {
    #[serde(default)]
    hosts: Vec<NacosInstance>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BeatInfo<'a> {
    service_name: &'a str,
    ip: &'a str,
    port: u16,
    weight: f64,
    metadata: &'a BTreeMap<String, String>,
    scheduled: bool,
}

struct Endpoint {
    http: reqwest::Client,
    servers: Vec<String>,
    namespace: String,
    poll_interval: Duration,
    beat_interval: Duration,
    shutdown: CancellationToken,
}

/// Nacos HTTP 命名客户端
pub struct HttpNamingClient {
    endpoint: Arc<Endpoint>,
    /// (service, ip, port) → 心跳任务
    beats: Mutex<HashMap<(String, String, u16), CancellationToken>>,
}

impl HttpNamingClient {
    pub fn new(config: &NacosConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .into_dubbo(ErrorCode::ConfigurationError, "failed to build nacos http client")?;

        let servers = config
            .server_list()
            .into_iter()
            .map(|s| {
                let s = s.trim_end_matches('/');
                if s.starts_with("http://") || s.starts_with("https://") {
                    s.to_string()
                } else {
                    format!("http://{}", s)
                }
            })
            .collect();

        Ok(Self {
            endpoint: Arc::new(Endpoint {
                http,
                servers,
                namespace: config.namespace_id().to_string(),
                poll_interval: Duration::from_millis(config.poll_interval.max(100)),
                beat_interval: Duration::from_millis(config.beat_interval.max(100)),
                shutdown: CancellationToken::new(),
            }),
            beats: Mutex::new(HashMap::new()),
        })
    }

    fn beat_key(service: &str, instance: &NacosInstance) -> (String, String, u16) {
        (service.to_string(), instance.ip.clone(), instance.port)
    }
}

impl Endpoint {
    /// 按顺序尝试每个服务器
    async fn request<F>(&self, path: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client, String) -> reqwest::RequestBuilder,
    {
        let mut last_error = None;
        for server in &self.servers {
            let url = format!("{}{}", server, path);
            match build(&self.http, url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    debug!(server = %server, path = %path, %status, "Nacos request rejected");
                    last_error = Some(
                        DubboError::connection_failed(format!("nacos {} returned {}", path, status))
                            .with_details(body),
                    );
                }
                Err(err) => {
                    debug!(server = %server, path = %path, error = %err, "Nacos request failed");
                    last_error = Some(
                        DubboError::connection_failed(format!("nacos {} unreachable", server))
                            .with_details(err.to_string()),
                    );
                }
            }
        }
        Err(last_error.unwrap_or_else(|| DubboError::config("no nacos server configured")))
    }

    async fn list_instances(&self, service: &str) -> Result<Vec<NacosInstance>> {
        let service_name = grouped_service_name(service);
        let resp = self
            .request(INSTANCE_LIST_PATH, |http, url| {
                http.get(url).query(&[
                    ("serviceName", service_name.as_str()),
                    ("namespaceId", self.namespace.as_str()),
                    ("healthyOnly", "false"),
                ])
            })
            .await?;
        let list: InstanceListResponse = resp
            .json()
            .await
            .into_dubbo(ErrorCode::StoreOperationFailed, "invalid nacos instance list")?;

        Ok(list
            .hosts
            .into_iter()
            .map(|mut instance| {
                if instance.service_name.is_empty() {
                    instance.service_name = service_name.clone();
                } else if !instance.service_name.contains("@@") {
                    instance.service_name = grouped_service_name(&instance.service_name);
                }
                instance
            })
            .collect())
    }

    async fn send_beat(&self, service: &str, instance: &NacosInstance) -> Result<()> {
        let service_name = grouped_service_name(service);
        let beat = serde_json::to_string(&BeatInfo {
            service_name: &service_name,
            ip: &instance.ip,
            port: instance.port,
            weight: instance.weight,
            metadata: &instance.metadata,
            scheduled: true,
        })
        .into_dubbo(ErrorCode::InternalError, "failed to encode nacos beat")?;

        self.request(BEAT_PATH, |http, url| {
            http.put(url).query(&[
                ("serviceName", service_name.as_str()),
                ("namespaceId", self.namespace.as_str()),
                ("beat", beat.as_str()),
            ])
        })
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl NamingClient for HttpNamingClient {
    async fn ready(&self) -> Result<()> {
        self.endpoint
            .request(METRICS_PATH, |http, url| http.get(url))
            .await
            .map(|_| ())
    }

    /// 首次列表失败时不报错，轮询任务照常启动，服务恢复后推送
    async fn subscribe(&self, service: &str) -> Result<mpsc::UnboundedReceiver<Vec<NacosInstance>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut last = match self.endpoint.list_instances(service).await {
            Ok(first) => {
                let _ = tx.send(first.clone());
                Some(first)
            }
            Err(err) => {
                warn!(service = %service, error = %err, "Nacos list instances failed, keep polling");
                None
            }
        };

        let client = self.endpoint.clone();
        let service = service.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(client.poll_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = client.shutdown.cancelled() => break,
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {}
                }
                match client.list_instances(&service).await {
                    Ok(instances) if last.as_ref() != Some(&instances) => {
                        debug!(service = %service, count = instances.len(), "Nacos instances changed");
                        if tx.send(instances.clone()).is_err() {
                            break;
                        }
                        last = Some(instances);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(service = %service, error = %err, "Nacos poll instances failed");
                    }
                }
            }
            debug!(service = %service, "Nacos polling stopped");
        });
        Ok(rx)
    }

    async fn register_instance(&self, service: &str, instance: NacosInstance) -> Result<()> {
        let service_name = grouped_service_name(service);
        let endpoint = &self.endpoint;
        let metadata = serde_json::to_string(&instance.metadata)
            .into_dubbo(ErrorCode::InternalError, "failed to encode nacos metadata")?;
        let port = instance.port.to_string();
        let weight = instance.weight.to_string();
        let ephemeral = instance.ephemeral.to_string();
        let enabled = instance.enabled.to_string();

        endpoint.request(INSTANCE_PATH, |http, url| {
            http.post(url).query(&[
                ("serviceName", service_name.as_str()),
                ("ip", instance.ip.as_str()),
                ("port", port.as_str()),
                ("namespaceId", endpoint.namespace.as_str()),
                ("weight", weight.as_str()),
                ("enabled", enabled.as_str()),
                ("healthy", "true"),
                ("ephemeral", ephemeral.as_str()),
                ("metadata", metadata.as_str()),
            ])
        })
        .await?;
        info!(service = %service_name, ip = %instance.ip, port = instance.port, "Nacos instance registered");

        if instance.ephemeral {
            let token = endpoint.shutdown.child_token();
            if let Some(previous) = self
                .beats
                .lock()
                .insert(Self::beat_key(service, &instance), token.clone())
            {
                previous.cancel();
            }

            let client = endpoint.clone();
            let service = service.to_string();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(client.beat_interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    if let Err(err) = client.send_beat(&service, &instance).await {
                        warn!(service = %service, ip = %instance.ip, error = %err, "Nacos beat failed");
                    }
                }
            });
        }
        Ok(())
    }

    async fn deregister_instance(&self, service: &str, instance: &NacosInstance) -> Result<()> {
        if let Some(token) = self.beats.lock().remove(&Self::beat_key(service, instance)) {
            token.cancel();
        }

        let service_name = grouped_service_name(service);
        let port = instance.port.to_string();
        let ephemeral = instance.ephemeral.to_string();
        let endpoint = &self.endpoint;
        endpoint.request(INSTANCE_PATH, |http, url| {
            http.delete(url).query(&[
                ("serviceName", service_name.as_str()),
                ("ip", instance.ip.as_str()),
                ("port", port.as_str()),
                ("namespaceId", endpoint.namespace.as_str()),
                ("ephemeral", ephemeral.as_str()),
            ])
        })
        .await?;
        info!(service = %service_name, ip = %instance.ip, port = instance.port, "Nacos instance deregistered");
        Ok(())
    }

    fn close(&self) {
        self.endpoint.shutdown.cancel();
        self.beats.lock().clear();
    }
}
