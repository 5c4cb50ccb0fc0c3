// SPDX-License-Identifier: MIT OR Apache-2.0

//! Disk Buffer Writer and Replayer
//!
//! Write-ahead store used when the destination is unreachable or a sender
//! queue saturates. Items land in a small in-memory secondary queue, a
//! writer thread appends them as encrypted framed records to rotating
//! buffer files, and a replayer thread streams pending records back to the
//! network once it recovers.
//!
//! A record's `handled` byte transitions 0 -> 1 exactly once, written back
//! in place, and a file is deleted only when no pending record remains.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use prost::Message;

use super::buffer_meta::{EncryptionStateMeta, BUFFER_META_BASE_SIZE};
use super::file_encryption::{FileEncryption, FIELD_KEY_VERSION, HEADER_LENGTH};
use crate::core::alarm::AlarmType;
use crate::core::config::context::AgentContext;
use crate::core::exception::{LogFluxError, LogFluxResult};
use crate::core::flusher::compress::{compress, CompressType, RawDataType};
use crate::core::protocol::models::{BufferMeta, LogGroup};
use crate::core::queue::{QueueSignal, SenderQueueItem};
use crate::core::sender::endpoint_registry::RegionEndpointRegistry;
use crate::core::sender::flow_control::RateLimiter;
use crate::core::sender::send_client::{SendClient, SendRequest, SendResult};

pub const BUFFER_FILE_NAME_PREFIX: &str = "logtail_buffer_file_";

const WRITE_SECONDARY_WAIT_TIMEOUT_SECS: u64 = 2;
const PUSH_RETRY_SLEEP_MS: u64 = 50;
const SEND_RETRY_SLEEP_MS: u64 = 50;

pub struct DiskBufferWriter {
    ctx: AgentContext,
    encryption: &'static FileEncryption,
    queue: Mutex<VecDeque<SenderQueueItem>>,
    queue_signal: QueueSignal,
    buffer_path: PathBuf,
    file_name: Mutex<Option<PathBuf>>,
    divide_time: AtomicI64,
    is_flush: AtomicBool,
    running: AtomicBool,
    stop_signal: QueueSignal,
    client: RwLock<Option<Arc<dyn SendClient>>>,
    network: RwLock<Option<Arc<RegionEndpointRegistry>>>,
    replay_limiter: RateLimiter,
}

impl DiskBufferWriter {
    pub fn new(ctx: AgentContext) -> Self {
        let buffer_path = ctx.data_dir().clone();
        let replay_limiter = RateLimiter::new(ctx.settings().replay_flow_bytes_per_second);
        Self {
            ctx,
            encryption: FileEncryption::instance(),
            queue: Mutex::new(VecDeque::new()),
            queue_signal: QueueSignal::new(),
            buffer_path,
            file_name: Mutex::new(None),
            divide_time: AtomicI64::new(unix_now()),
            is_flush: AtomicBool::new(false),
            running: AtomicBool::new(true),
            stop_signal: QueueSignal::new(),
            client: RwLock::new(None),
            network: RwLock::new(None),
            replay_limiter,
        }
    }

    pub fn set_send_client(&self, client: Arc<dyn SendClient>) {
        *self.client.write().expect("disk buffer client lock") = Some(client);
    }

    pub fn set_endpoint_registry(&self, registry: Arc<RegionEndpointRegistry>) {
        *self.network.write().expect("disk buffer network lock") = Some(registry);
    }

    pub fn encryption(&self) -> &'static FileEncryption {
        self.encryption
    }

    /// Accepts a send item into the secondary queue by cloning it, retrying
    /// while the queue is over its limit. Exactly-once items are never
    /// spilled; their checkpoints rebuild them after a restart.
    pub fn push_to_disk_buffer(&self, item: &SenderQueueItem, retry_times: u32) -> bool {
        if item.exactly_once_checkpoint.is_some() {
            return true;
        }
        let limit = self.ctx.settings().secondary_buffer_count_limit;
        let mut retry = 0;
        loop {
            retry += 1;
            {
                let mut queue = self.queue.lock().expect("disk buffer queue lock");
                if self.is_flush.load(Ordering::Relaxed) || queue.len() < limit {
                    queue.push_back(item.clone());
                    drop(queue);
                    self.queue_signal.signal();
                    return true;
                }
            }
            if retry >= retry_times {
                break;
            }
            std::thread::sleep(Duration::from_millis(PUSH_RETRY_SLEEP_MS));
        }
        tracing::warn!(
            project = %item.project,
            logstore = %item.logstore,
            "failed to add sender queue item to disk buffer writer: queue is full, discard data"
        );
        self.ctx.alarms().send_alarm_for(
            AlarmType::DiscardData,
            "failed to add sender queue item to disk buffer writer: queue is full",
            &item.project,
            &item.logstore,
            &item.region,
        );
        false
    }

    pub fn secondary_empty(&self) -> bool {
        self.queue.lock().expect("disk buffer queue lock").is_empty()
    }

    pub fn stop(&self) {
        self.is_flush.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.queue_signal.signal();
        self.stop_signal.signal();
    }

    /// Writer thread body: drains the secondary queue into buffer files and
    /// rotates files by age.
    pub fn writer_loop(&self) {
        tracing::info!("disk buffer writer started");
        loop {
            self.queue_signal
                .wait(Duration::from_secs(WRITE_SECONDARY_WAIT_TIMEOUT_SECS));
            let now = unix_now();
            if now - self.divide_time.load(Ordering::Relaxed)
                > self.ctx.settings().buffer_file_alive_interval_secs
            {
                if let Err(e) = self.create_new_file() {
                    tracing::error!(error = %e, "failed to rotate buffer file");
                }
            }
            self.flush_pending();
            if self.is_flush.load(Ordering::Relaxed) && self.secondary_empty() {
                break;
            }
        }
        tracing::info!("disk buffer writer stopped");
    }

    /// Writes everything currently queued, synchronously.
    pub fn flush_pending(&self) {
        let items: Vec<SenderQueueItem> = {
            let mut queue = self.queue.lock().expect("disk buffer queue lock");
            queue.drain(..).collect()
        };
        for item in items {
            if let Err(e) = self.send_to_buffer_file(&item) {
                tracing::error!(error = %e, "failed to write item to buffer file");
                self.ctx.alarms().send_alarm_for(
                    AlarmType::SecondaryReadWrite,
                    format!("failed to write item to buffer file: {e}"),
                    &item.project,
                    &item.logstore,
                    &item.region,
                );
            }
        }
    }

    /// Replayer thread body: waits for the network, then replays files
    /// older than the divide time on every check period.
    pub fn replayer_loop(&self) {
        tracing::info!("disk buffer sender started");
        let check_period = Duration::from_secs(self.ctx.settings().buffer_check_period_secs as u64);
        while self.running.load(Ordering::Relaxed) {
            if self.network_available() {
                if let Err(e) = self.replay_once(unix_now()) {
                    tracing::error!(error = %e, "buffer replay pass failed");
                }
            }
            self.stop_signal.wait(check_period);
        }
        tracing::info!("disk buffer sender stopped");
    }

    fn network_available(&self) -> bool {
        self.network
            .read()
            .expect("disk buffer network lock")
            .as_ref()
            .map(|n| n.has_network_available())
            .unwrap_or(true)
    }

    /// One replay sweep over every ready buffer file. Returns how many
    /// files were visited.
    pub fn replay_once(&self, now: i64) -> LogFluxResult<usize> {
        let files = self.load_files_to_send(self.divide_time.load(Ordering::Relaxed))?;
        let keep_from = files
            .len()
            .saturating_sub(self.ctx.settings().num_of_buffer_files);
        let mut visited = 0;
        for path in files.into_iter().skip(keep_from) {
            if !self.running.load(Ordering::Relaxed) && !self.is_flush.load(Ordering::Relaxed) {
                break;
            }
            visited += 1;
            match FileEncryption::check_header(&path) {
                Ok(fields) => {
                    let key_version: i32 = fields
                        .get(FIELD_KEY_VERSION)
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(-1);
                    if key_version >= 1 && key_version <= self.encryption.default_key_version() {
                        if let Err(e) = self.replay_file(&path, key_version, now) {
                            tracing::error!(file = %path.display(), error = %e, "buffer file unreadable, delete");
                            self.ctx.alarms().send_alarm(
                                AlarmType::SecondaryReadWrite,
                                format!("buffer file unreadable: {}: {e}", path.display()),
                            );
                            let _ = std::fs::remove_file(&path);
                        }
                    } else {
                        tracing::error!(
                            file = %path.display(),
                            key_version,
                            "invalid key_version in header, delete buffer file"
                        );
                        self.ctx.alarms().send_alarm(
                            AlarmType::DiscardSecondary,
                            format!("key version in buffer file invalid, delete file: {}", path.display()),
                        );
                        let _ = std::fs::remove_file(&path);
                    }
                }
                Err(_) => {
                    tracing::warn!(file = %path.display(), "check header of buffer file failed, delete file");
                    self.ctx.alarms().send_alarm(
                        AlarmType::DiscardSecondary,
                        format!("check header of buffer file failed, delete file: {}", path.display()),
                    );
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Ok(visited)
    }

    /// Buffer files older than `timeline`, name-sorted ascending.
    pub fn load_files_to_send(&self, timeline: i64) -> LogFluxResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        if !self.buffer_path.exists() {
            std::fs::create_dir_all(&self.buffer_path)?;
            return Ok(files);
        }
        for entry in std::fs::read_dir(&self.buffer_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(suffix) = name.strip_prefix(BUFFER_FILE_NAME_PREFIX) {
                match suffix.parse::<i64>() {
                    Ok(file_time) if file_time < timeline => files.push(entry.path()),
                    Ok(_) => {}
                    Err(_) => {
                        tracing::info!(file = name, "can not get file time from file name");
                    }
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Starts a new buffer file named by the current epoch and evicts the
    /// oldest files beyond the configured count. The file itself is
    /// created lazily on the first record write.
    pub fn create_new_file(&self) -> LogFluxResult<()> {
        let now = unix_now();
        let files = self.load_files_to_send(now)?;
        let limit = self.ctx.settings().num_of_buffer_files;
        if files.len() > limit {
            for path in &files[..files.len() - limit] {
                tracing::error!(file = %path.display(), "buffer file count exceed limit, delete file");
                self.ctx.alarms().send_alarm(
                    AlarmType::DiscardSecondary,
                    format!("buffer file count exceed, delete file: {}", path.display()),
                );
                let _ = std::fs::remove_file(path);
            }
        }
        self.divide_time.store(now, Ordering::Relaxed);
        let new_name = self
            .buffer_path
            .join(format!("{BUFFER_FILE_NAME_PREFIX}{now}"));
        *self.file_name.lock().expect("buffer file name lock") = Some(new_name);
        Ok(())
    }

    /// Appends one record to the current buffer file.
    pub fn send_to_buffer_file(&self, item: &SenderQueueItem) -> LogFluxResult<()> {
        let path = {
            let name = self.file_name.lock().expect("buffer file name lock").clone();
            match name {
                Some(p) => p,
                None => {
                    self.create_new_file()?;
                    self.file_name
                        .lock()
                        .expect("buffer file name lock")
                        .clone()
                        .ok_or_else(|| LogFluxError::internal("no buffer file after rotate"))?
                }
            }
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().append(true).create(true).open(&path)?;
        let pos = file.seek(SeekFrom::End(0))?;
        if pos == 0 {
            // A header that cannot be written means the store is unusable;
            // local durability is gone and the process must not pretend
            // otherwise.
            if let Err(e) = file.write_all(&self.encryption.header_bytes()) {
                tracing::error!(file = %path.display(), error = %e, "error write encryption header");
                self.ctx.alarms().send_alarm(
                    AlarmType::SecondaryReadWrite,
                    format!("write buffer file header failed: {}: {e}", path.display()),
                );
                std::process::abort();
            }
        }

        let cipher = self.encryption.encrypt(&item.data, 0)?;
        let buffer_meta = BufferMeta {
            project: item.project.clone(),
            endpoint: item.region.clone(),
            aliuid: String::new(),
            logstore: Some(item.logstore.clone()),
            datatype: Some(item.data_type.as_i32()),
            rawsize: Some(item.raw_size as i32),
            shardhashkey: if item.shard_hash_key.is_empty() {
                None
            } else {
                Some(item.shard_hash_key.clone())
            },
            compresstype: Some(item.compress_type.as_i32()),
        };
        let encoded = buffer_meta.encode_to_vec();
        let state = EncryptionStateMeta {
            encoded_info_size: encoded.len() as i32 + BUFFER_META_BASE_SIZE,
            log_data_size: item.data.len() as i32,
            encryption_size: cipher.len() as i32,
            timestamp: unix_now() as i32,
            handled: 0,
            retry_times: 0,
        };

        let mut record =
            Vec::with_capacity(EncryptionStateMeta::SIZE + encoded.len() + cipher.len());
        record.extend_from_slice(&state.to_bytes());
        record.extend_from_slice(&encoded);
        record.extend_from_slice(&cipher);
        file.write_all(&record)?;
        file.flush()?;

        if file.seek(SeekFrom::End(0))? > self.ctx.settings().local_file_size_bytes {
            self.create_new_file()?;
        }
        tracing::debug!(file = %path.display(), bytes = record.len(), "write buffer file");
        Ok(())
    }

    /// Replays every pending record of one file; deletes the file when
    /// nothing pending remains.
    pub fn replay_file(&self, path: &Path, key_version: i32, now: i64) -> LogFluxResult<()> {
        let file_len = std::fs::metadata(path)?.len();
        let mut file = File::open(path)?;
        let mut pos = HEADER_LENGTH as u64;
        let mut write_back = false;
        let mut discard_count = 0u32;

        while pos < file_len {
            let record_start = pos;
            let mut state_bytes = [0u8; EncryptionStateMeta::SIZE];
            file.seek(SeekFrom::Start(pos))?;
            file.read_exact(&mut state_bytes)?;
            let mut state = EncryptionStateMeta::from_bytes(&state_bytes)?;
            let meta_size = state.meta_payload_size();
            if state.encryption_size < 0 || meta_size < 0 {
                return Err(LogFluxError::buffer_corrupted(
                    path.display().to_string(),
                    format!(
                        "invalid record sizes: meta {} encryption {}",
                        state.encoded_info_size, state.encryption_size
                    ),
                ));
            }
            pos += (EncryptionStateMeta::SIZE as u64) + meta_size as u64 + state.encryption_size as u64;
            if pos > file_len {
                return Err(LogFluxError::buffer_corrupted(
                    path.display().to_string(),
                    "record overruns file",
                ));
            }
            if state.handled == 1 {
                continue;
            }
            if now - state.timestamp as i64 > self.ctx.settings().log_expire_time_secs {
                tracing::warn!(timestamp = state.timestamp, "timeout buffer file record");
                self.ctx.alarms().send_alarm(
                    AlarmType::DiscardSecondary,
                    format!("buffer record timeout, skip: {}", path.display()),
                );
                continue;
            }

            let mut meta_bytes = vec![0u8; meta_size as usize];
            file.read_exact(&mut meta_bytes)?;
            let mut cipher = vec![0u8; state.encryption_size as usize];
            file.read_exact(&mut cipher)?;

            let mut handled = false;
            match self.prepare_record(path, key_version, &state, &meta_bytes, &cipher) {
                Ok((buffer_meta, log_data)) => {
                    self.replay_limiter
                        .flow_control(buffer_meta.rawsize.unwrap_or(0).max(0) as usize);
                    match self.send_buffer_file_data(&buffer_meta, &log_data) {
                        SendResult::Ok => handled = true,
                        SendResult::Discardable | SendResult::Unauthorized => {
                            self.ctx.alarms().send_alarm_for(
                                AlarmType::SendDataFail,
                                format!(
                                    "send buffer file fail, rawsize: {}",
                                    buffer_meta.rawsize.unwrap_or(0)
                                ),
                                &buffer_meta.project,
                                buffer_meta.logstore.as_deref().unwrap_or(""),
                                "",
                            );
                            handled = true;
                            discard_count += 1;
                        }
                        SendResult::QuotaExceed => {
                            let wait = self.ctx.settings().quota_exceed_wait_interval_secs;
                            if wait > 0 {
                                std::thread::sleep(Duration::from_secs(wait as u64));
                            }
                            write_back = true;
                        }
                        _ => {
                            // Network-class failure: keep the record pending
                            // and retry the file on a later pass.
                            state.retry_times = state.retry_times.saturating_add(1);
                            self.write_back_meta(path, record_start, &state)?;
                            write_back = true;
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(file = %path.display(), error = %e, "discard unreadable buffer record");
                    handled = true;
                    discard_count += 1;
                }
            }
            if handled {
                state.handled = 1;
            }
            self.write_back_meta(path, record_start, &state)?;
        }

        if !write_back {
            std::fs::remove_file(path)?;
            if discard_count > 0 {
                tracing::error!(
                    file = %path.display(),
                    discard_count,
                    "send buffer file done with discards, delete file"
                );
                self.ctx.alarms().send_alarm(
                    AlarmType::DiscardSecondary,
                    format!(
                        "delete buffer file: {}, discard {} records",
                        path.display(),
                        discard_count
                    ),
                );
            } else {
                tracing::info!(file = %path.display(), "send buffer file success, delete buffer file");
            }
        }
        Ok(())
    }

    /// Decrypts a record and normalizes legacy payloads to the current wire
    /// format (old metas without a logstore carry an uncompressed
    /// `LogGroup` that is re-compressed before send).
    fn prepare_record(
        &self,
        path: &Path,
        key_version: i32,
        state: &EncryptionStateMeta,
        meta_bytes: &[u8],
        cipher: &[u8],
    ) -> LogFluxResult<(BufferMeta, Vec<u8>)> {
        let mut buffer_meta = if state.is_pb_meta() {
            BufferMeta::decode(meta_bytes).map_err(|e| {
                self.ctx.alarms().send_alarm(
                    AlarmType::SecondaryReadWrite,
                    format!("parse buffer meta from file error: {}", path.display()),
                );
                LogFluxError::from(e)
            })?
        } else {
            BufferMeta {
                project: String::from_utf8_lossy(meta_bytes).to_string(),
                endpoint: self.ctx.default_region().to_string(),
                aliuid: String::new(),
                ..Default::default()
            }
        };
        if buffer_meta.project.is_empty() {
            return Err(LogFluxError::buffer_corrupted(
                path.display().to_string(),
                "record without project",
            ));
        }
        if buffer_meta.compresstype.is_none() {
            buffer_meta.compresstype = Some(CompressType::Lz4.as_i32());
        }

        let plain = self
            .encryption
            .decrypt(cipher, state.log_data_size as usize, key_version)
            .map_err(|e| {
                self.ctx.alarms().send_alarm(
                    AlarmType::EncryptDecryptFail,
                    format!(
                        "decrypt error, project_name: {}, key_version: {key_version}",
                        buffer_meta.project
                    ),
                );
                e
            })?;

        if buffer_meta.logstore.is_some() {
            return Ok((buffer_meta, plain));
        }

        // Legacy payload path.
        let log_group = LogGroup::decode(plain.as_slice()).map_err(|e| {
            self.ctx.alarms().send_alarm(
                AlarmType::LogGroupParseFail,
                format!(
                    "projectName is: {}, fileName is: {}",
                    buffer_meta.project,
                    path.display()
                ),
            );
            LogFluxError::from(e)
        })?;
        let log_data = compress(&plain, CompressType::Lz4).map_err(|e| {
            self.ctx.alarms().send_alarm(
                AlarmType::SendCompressFail,
                format!(
                    "projectName is: {}, fileName is: {}",
                    buffer_meta.project,
                    path.display()
                ),
            );
            e
        })?;
        buffer_meta.logstore = Some(log_group.category.unwrap_or_default());
        buffer_meta.datatype = Some(RawDataType::EventGroup.as_i32());
        buffer_meta.rawsize = Some(state.log_data_size);
        buffer_meta.compresstype = Some(CompressType::Lz4.as_i32());
        Ok((buffer_meta, log_data))
    }

    /// One synchronous send of a replayed record, with bounded retries for
    /// transient failures and endpoint health upkeep.
    fn send_buffer_file_data(&self, meta: &BufferMeta, log_data: &[u8]) -> SendResult {
        let client = {
            let guard = self.client.read().expect("disk buffer client lock");
            match guard.as_ref() {
                Some(c) => Arc::clone(c),
                None => return SendResult::NetworkError,
            }
        };
        let registry = self.network.read().expect("disk buffer network lock").clone();
        let region = &meta.endpoint;
        let endpoint = registry
            .as_ref()
            .and_then(|r| r.pick_endpoint(region))
            .unwrap_or_else(|| region.clone());

        let request = SendRequest {
            project: &meta.project,
            logstore: meta.logstore.as_deref().unwrap_or(""),
            region,
            endpoint: &endpoint,
            compress_type: CompressType::from_i32(meta.compresstype.unwrap_or(1)),
            data_type: RawDataType::from_i32(meta.datatype.unwrap_or(0)),
            data: log_data,
            raw_size: meta.rawsize.unwrap_or(0).max(0) as usize,
            shard_hash_key: meta.shardhashkey.as_deref().filter(|k| !k.is_empty()),
            sequence_id: None,
        };

        let mut auth_refreshed = false;
        let mut retries = 0;
        loop {
            retries += 1;
            let result = client.send(&request);
            match result {
                SendResult::Ok
                | SendResult::Discardable
                | SendResult::QuotaExceed
                | SendResult::InvalidSequenceId => return result,
                SendResult::Unauthorized => {
                    if !auth_refreshed && client.refresh_auth(&meta.aliuid) {
                        auth_refreshed = true;
                        continue;
                    }
                    return result;
                }
                SendResult::NetworkError
                | SendResult::ServerError
                | SendResult::RequestTimeExpired => {
                    if retries >= self.ctx.settings().send_retrytimes {
                        if result == SendResult::NetworkError {
                            if let Some(registry) = &registry {
                                registry.set_endpoint_status(region, &endpoint, false, 0);
                            }
                        }
                        return result;
                    }
                    std::thread::sleep(Duration::from_millis(SEND_RETRY_SLEEP_MS));
                }
            }
        }
    }

    fn write_back_meta(
        &self,
        path: &Path,
        offset: u64,
        state: &EncryptionStateMeta,
    ) -> LogFluxResult<()> {
        let mut file = OpenOptions::new().write(true).open(path).map_err(|e| {
            self.ctx.alarms().send_alarm(
                AlarmType::SecondaryReadWrite,
                format!("open secondary file for write meta fail: {}: {e}", path.display()),
            );
            LogFluxError::from(e)
        })?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&state.to_bytes()).map_err(|e| {
            self.ctx.alarms().send_alarm(
                AlarmType::SecondaryReadWrite,
                format!("write secondary file for write meta fail: {}: {e}", path.display()),
            );
            LogFluxError::from(e)
        })?;
        file.flush()?;
        Ok(())
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
