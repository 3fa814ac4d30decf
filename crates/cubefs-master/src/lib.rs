//! HTTP client for the small set of master endpoints that describe cluster
//! topology . Not part of the
//! CORE; kept minimal and synchronous-looking from the caller's side.

use cubefs_error::{Error, Result};
use md5::{Digest, Md5};
use rand::seq::SliceRandom;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: u32,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    pub capacity_gb: u64,
    pub owner: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeStat {
    pub total_size: u64,
    pub used_size: u64,
    pub inode_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataPartitionView {
    pub partition_id: u64,
    pub hosts: Vec<String>,
    pub leader_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterInfo {
    pub cluster_name: String,
    pub nodes: Vec<String>,
}

/// Authorization key is the hex of the MD5 digest of the configured owner
/// string . Not a secret-worthy scheme -- it identifies the
/// volume owner to the master, it does not authenticate the transport.
pub fn auth_key(owner: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(owner.as_bytes());
    hex::encode(hasher.finalize())
}

/// Talks to the master tier. Host selection starts from a random host in
/// the configured set and cycles forward on connection failure, so a
/// single down master does not wedge every client that happens to list it
/// first.
pub struct MasterClient {
    hosts: Vec<String>,
    owner: String,
    http: reqwest::Client,
    start_index: AtomicUsize,
}

impl MasterClient {
    pub fn new(hosts: Vec<String>, owner: String) -> Result<Self> {
        if hosts.is_empty() {
            return Err(Error::bad_message("master client requires at least one host"));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::io(format!("building http client: {e}")))?;
        let mut rng = rand::thread_rng();
        let start = (0..hosts.len()).collect::<Vec<_>>().choose(&mut rng).copied().unwrap_or(0);
        Ok(Self {
            hosts,
            owner,
            http,
            start_index: AtomicUsize::new(start),
        })
    }

    fn auth_key(&self) -> String {
        auth_key(&self.owner)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let n = self.hosts.len();
        let start = self.start_index.load(Ordering::Relaxed);
        let mut last_err = None;
        for offset in 0..n {
            let host = &self.hosts[(start + offset) % n];
            let url = format!("http://{host}{path}");
            let req = self
                .http
                .request(method.clone(), &url)
                .query(query)
                // Server-side owner validation is occasionally skipped for
                // internal tooling; the header communicates that this is a
                // real client and should be checked.
                .header("X-Skip-Owner-Validation", "false");
            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.as_u16() != 200 {
                        last_err = Some(Error::bad_message(format!(
                            "master {host} returned status {status}"
                        )));
                        continue;
                    }
                    let envelope: Envelope<T> = resp
                        .json()
                        .await
                        .map_err(|e| Error::bad_message(format!("decoding master reply: {e}")))?;
                    if envelope.code != 0 {
                        return Err(Error::bad_message(format!(
                            "master returned code {}: {}",
                            envelope.code,
                            envelope.msg.unwrap_or_default()
                        )));
                    }
                    return envelope
                        .data
                        .ok_or_else(|| Error::bad_message("master reply missing data"));
                }
                Err(e) => {
                    warn!(host, error = %e, "master request failed, trying next host");
                    last_err = Some(Error::io(format!("request to {host} failed: {e}")));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::io("no master hosts configured")))
    }

    pub async fn get_volume(&self, name: &str) -> Result<VolumeInfo> {
        self.request(
            reqwest::Method::POST,
            "/client/vol",
            &[("name", name.to_string()), ("authKey", self.auth_key())],
        )
        .await
    }

    pub async fn get_volume_stat(&self, name: &str) -> Result<VolumeStat> {
        self.request(
            reqwest::Method::GET,
            "/client/volStat",
            &[("name", name.to_string()), ("version", "1".to_string())],
        )
        .await
    }

    pub async fn get_data_partitions(&self, name: &str) -> Result<Vec<DataPartitionView>> {
        self.request(
            reqwest::Method::GET,
            "/client/partitions",
            &[("name", name.to_string())],
        )
        .await
    }

    pub async fn get_cluster_info(&self) -> Result<ClusterInfo> {
        self.request(reqwest::Method::GET, "/admin/getIp", &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_key_is_hex_md5() {
        let key = auth_key("ltptest");
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn rejects_empty_host_list() {
        assert!(MasterClient::new(vec![], "owner".into()).is_err());
    }
}
