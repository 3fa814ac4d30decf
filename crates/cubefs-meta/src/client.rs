use crate::routing::MetaPartitionDirectory;
use crate::types::{DentryInfo, ExtentWire, IAttr, InodeInfo, QuotaInfo};
use crate::wire::*;
use bytes::Bytes;
use cubefs_cache::ExtentDescriptor;
use cubefs_error::{Error, Result};
use cubefs_proto::{OpCode, Packet, ResultCode};
use cubefs_transport::{Session, TcpSession, TcpSocketConfig};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Bounded retry budget for a single logical call after a non-leader
/// reply.
const META_RETRY_MAX: u32 = 4;

/// Request/reply against metadata partitions. Hides partition
/// routing (consistent hash of the inode id) and leader discovery from
/// every caller; a non-leader reply causes a re-dispatch to the next
/// replica rather than surfacing an error.
pub struct MetaClient {
    routing: RwLock<MetaPartitionDirectory>,
    sessions: DashMap<String, Arc<TcpSession>>,
}

impl MetaClient {
    pub fn new() -> Self {
        Self {
            routing: RwLock::new(MetaPartitionDirectory::new()),
            sessions: DashMap::new(),
        }
    }

    pub fn refresh_partitions(&self, partitions: Vec<cubefs_partition::DataPartition>) {
        self.routing.write().unwrap().refresh(partitions);
    }

    async fn session_for(&self, addr: &str) -> Result<Arc<TcpSession>> {
        if let Some(existing) = self.sessions.get(addr) {
            return Ok(existing.clone());
        }
        let session = Arc::new(TcpSession::connect(addr, TcpSocketConfig { nodelay: true, ..Default::default() }).await?);
        self.sessions.insert(addr.to_string(), session.clone());
        Ok(session)
    }

    fn evict_session(&self, addr: &str) {
        self.sessions.remove(addr);
    }

    async fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        route_ino: u64,
        opcode: OpCode,
        req: &Req,
    ) -> Result<Resp> {
        let partition = {
            let routing = self.routing.read().unwrap();
            routing.route(route_ino).ok_or(Error::NotFound)?
        };

        let mut attempt_index = partition.leader_index();
        let mut retries = 0u32;
        loop {
            let addr = partition
                .member(attempt_index)
                .ok_or_else(|| Error::bad_message("meta partition has no members"))?
                .to_string();

            let payload = serde_json::to_vec(req)
                .map_err(|e| Error::bad_message(format!("encoding meta request: {e}")))?;
            let packet = Packet::new(opcode, 0, Bytes::from(payload));

            let outcome = async {
                let session = self.session_for(&addr).await?;
                session.send_packet(&packet).await?;
                session.recv_packet().await
            }
            .await;

            let (header, payload) = match outcome {
                Ok(v) => v,
                Err(err) => {
                    self.evict_session(&addr);
                    if !err.is_retryable() || retries >= META_RETRY_MAX {
                        return Err(err);
                    }
                    retries += 1;
                    attempt_index = (attempt_index + 1) % partition.replica_count.max(1);
                    continue;
                }
            };

            match header.result_code() {
                ResultCode::Ok => {
                    partition.set_leader_index(attempt_index);
                    let resp: Resp = serde_json::from_slice(&payload)
                        .map_err(|e| Error::bad_message(format!("decoding meta reply: {e}")))?;
                    return Ok(resp);
                }
                ResultCode::NotLeader => {
                    if retries >= META_RETRY_MAX {
                        return Err(Error::io("meta retry budget exceeded against non-leader replies"));
                    }
                    retries += 1;
                    attempt_index = (attempt_index + 1) % partition.replica_count.max(1);
                    warn!(ino = route_ino, attempt = retries, "meta reply was non-leader, retrying");
                    continue;
                }
                other => return Err(result_code_to_error(other)),
            }
        }
    }

    pub async fn lookup(&self, parent_ino: u64, name: &str) -> Result<InodeInfo> {
        let resp: LookupResp = self
            .call(parent_ino, OpCode::MetaLookup, &LookupReq { parent_ino, name })
            .await?;
        Ok(resp.inode)
    }

    pub async fn get(&self, ino: u64) -> Result<InodeInfo> {
        let resp: GetResp = self.call(ino, OpCode::MetaInodeGet, &GetReq { ino }).await?;
        Ok(resp.inode)
    }

    pub async fn batch_get(&self, inos: &[u64]) -> Result<Vec<InodeInfo>> {
        let Some(&first) = inos.first() else {
            return Ok(Vec::new());
        };
        let resp: BatchGetResp = self
            .call(first, OpCode::MetaInodeBatchGet, &BatchGetReq { inos })
            .await?;
        Ok(resp.inodes)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        parent_ino: u64,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
        target: Option<&str>,
        quota: Option<u64>,
        file_type: crate::types::FileType,
    ) -> Result<InodeInfo> {
        let resp: CreateResp = self
            .call(
                parent_ino,
                OpCode::MetaInodeCreate,
                &CreateReq {
                    parent_ino,
                    name,
                    mode,
                    uid,
                    gid,
                    target,
                    quota,
                    file_type,
                },
            )
            .await?;
        Ok(resp.inode)
    }

    pub async fn link(&self, parent_ino: u64, name: &str, ino: u64) -> Result<()> {
        let _: LinkResp = self
            .call(parent_ino, OpCode::MetaDentryCreate, &LinkReq { parent_ino, name, ino })
            .await?;
        Ok(())
    }

    pub async fn delete(&self, parent_ino: u64, name: &str, is_dir: bool) -> Result<u64> {
        let resp: DeleteResp = self
            .call(parent_ino, OpCode::MetaDentryDelete, &DeleteReq { parent_ino, name, is_dir })
            .await?;
        Ok(resp.ino)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn rename(
        &self,
        old_parent: u64,
        old_name: &str,
        new_parent: u64,
        new_name: &str,
        overwrite: bool,
    ) -> Result<()> {
        let _: RenameResp = self
            .call(
                old_parent,
                OpCode::MetaDentryRename,
                &RenameReq {
                    old_parent,
                    old_name,
                    new_parent,
                    new_name,
                    overwrite,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn readdir(&self, ino: u64, marker: Option<&str>, limit: u32) -> Result<Vec<DentryInfo>> {
        let resp: ReadDirResp = self
            .call(ino, OpCode::MetaReadDir, &ReadDirReq { ino, marker, limit })
            .await?;
        Ok(resp.entries)
    }

    pub async fn set_attr(&self, ino: u64, iattr: IAttr) -> Result<()> {
        let _: SetAttrResp = self.call(ino, OpCode::MetaSetAttr, &SetAttrReq { ino, iattr }).await?;
        Ok(())
    }

    pub async fn get_extents(&self, ino: u64) -> Result<Vec<ExtentDescriptor>> {
        let resp: GetExtentsResp = self
            .call(ino, OpCode::MetaExtentsList, &GetExtentsReq { ino })
            .await?;
        Ok(resp.extents.into_iter().map(Into::into).collect())
    }

    /// Persists a writer's contribution. Returns, via `discard_out`, any
    /// descriptors the meta server's authoritative extent list evicted as
    /// a result -- these must be reconciled into the local cache too.
    pub async fn append_extent(
        &self,
        ino: u64,
        extent: ExtentDescriptor,
        discard_out: &mut Vec<ExtentDescriptor>,
    ) -> Result<()> {
        let resp: AppendExtentResp = self
            .call(
                ino,
                OpCode::MetaExtentsAppend,
                &AppendExtentReq {
                    ino,
                    extent: ExtentWire::from(extent),
                },
            )
            .await?;
        discard_out.extend(resp.discards.into_iter().map(Into::<ExtentDescriptor>::into));
        Ok(())
    }

    pub async fn truncate(&self, ino: u64, new_size: u64) -> Result<()> {
        let _: TruncateResp = self
            .call(ino, OpCode::MetaExtentsTruncate, &TruncateReq { ino, new_size })
            .await?;
        Ok(())
    }

    pub async fn get_quota(&self, ino: u64) -> Result<Option<QuotaInfo>> {
        let resp: QuotaGetResp = self.call(ino, OpCode::MetaQuotaGet, &QuotaGetReq { ino }).await?;
        Ok(resp.quota)
    }
}

impl Default for MetaClient {
    fn default() -> Self {
        Self::new()
    }
}

fn result_code_to_error(code: ResultCode) -> Error {
    match code {
        ResultCode::Ok => unreachable!("Ok is handled by the caller"),
        ResultCode::NotFound => Error::NotFound,
        ResultCode::AlreadyExists => Error::AlreadyExists,
        ResultCode::PermissionDenied => Error::permission_denied("meta partition denied the request"),
        ResultCode::QuotaExceeded => Error::QuotaExceeded("inode or namespace quota exceeded".into()),
        ResultCode::NotLeader => unreachable!("NotLeader is handled by the retry loop"),
        ResultCode::NotSupported => Error::NotSupported("operation not supported by this meta partition".into()),
        ResultCode::Internal => Error::io("meta partition returned an internal error"),
    }
}
