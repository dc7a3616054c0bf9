use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{info, warn};

use crate::keyed::{
    KeyedStore, StoreError, StoreResult, StoreStatus, bump_error, bump_usage, token_cas_allows,
};

/// Degraded-mode write-replay queue bound. Overflow drops the oldest entry
/// with a warning; the next full pool save reconciles the store.
const REPLAY_QUEUE_LIMIT: usize = 1024;

const USAGE_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then return nil end
local cred = cjson.decode(raw)
cred.usageCount = (cred.usageCount or 0) + 1
cred.lastUsed = ARGV[2]
redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(cred))
return cred.usageCount
"#;

const ERROR_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then return nil end
local cred = cjson.decode(raw)
cred.errorCount = (cred.errorCount or 0) + 1
cred.lastErrorTime = ARGV[2]
cred.lastErrorMessage = ARGV[3]
cred.lastUsed = ARGV[2]
if ARGV[4] == '1' then cred.isHealthy = false end
redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(cred))
return cred.errorCount
"#;

const TOKEN_CAS_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if raw and ARGV[2] ~= '' then
  local ok, tok = pcall(cjson.decode, raw)
  if ok and tok.refreshToken and tok.refreshToken ~= ARGV[2] then return 0 end
end
if tonumber(ARGV[3]) > 0 then
  redis.call('SET', KEYS[1], ARGV[1], 'EX', tonumber(ARGV[3]))
else
  redis.call('SET', KEYS[1], ARGV[1])
end
return 1
"#;

#[derive(Debug, Clone)]
enum WriteOp {
    Set {
        key: String,
        value: String,
        ttl_seconds: Option<u64>,
    },
    Delete {
        key: String,
    },
    HashSet {
        key: String,
        field: String,
        value: String,
    },
    HashDelete {
        key: String,
        field: String,
    },
    SetAdd {
        key: String,
        member: String,
    },
    SetRemove {
        key: String,
        member: String,
    },
}

#[derive(Debug, Default)]
struct Mirror {
    kv: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
}

/// Redis-backed [`KeyedStore`].
///
/// Every successful read/write also lands in an in-process mirror. When the
/// connection drops, reads are served from the mirror and writes queue into
/// a bounded FIFO that drains in order once the connection returns.
pub struct RedisStore {
    conn: ConnectionManager,
    mirror: Mutex<Mirror>,
    replay: Mutex<VecDeque<WriteOp>>,
    degraded: AtomicBool,
}

impl RedisStore {
    /// Connects and verifies the server is reachable.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        let store = Self {
            conn,
            mirror: Mutex::new(Mirror::default()),
            replay: Mutex::new(VecDeque::new()),
            degraded: AtomicBool::new(false),
        };
        store.ping().await?;
        Ok(store)
    }

    fn note_failure(&self, err: &redis::RedisError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(error = %err, "keyed store unreachable, entering degraded mode");
        }
    }

    fn note_success(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!("keyed store reachable again, draining write-replay queue");
        }
    }

    fn enqueue(&self, op: WriteOp) {
        let mut queue = self.replay.lock().unwrap();
        if queue.len() >= REPLAY_QUEUE_LIMIT {
            queue.pop_front();
            warn!("write-replay queue full, dropping oldest entry");
        }
        queue.push_back(op);
    }

    async fn apply_op(&self, op: &WriteOp) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        match op {
            WriteOp::Set {
                key,
                value,
                ttl_seconds,
            } => {
                let mut cmd = redis::cmd("SET");
                cmd.arg(key).arg(value);
                if let Some(ttl) = ttl_seconds {
                    cmd.arg("EX").arg(ttl);
                }
                cmd.query_async::<()>(&mut conn).await
            }
            WriteOp::Delete { key } => redis::cmd("DEL").arg(key).query_async(&mut conn).await,
            WriteOp::HashSet { key, field, value } => {
                redis::cmd("HSET")
                    .arg(key)
                    .arg(field)
                    .arg(value)
                    .query_async(&mut conn)
                    .await
            }
            WriteOp::HashDelete { key, field } => {
                redis::cmd("HDEL")
                    .arg(key)
                    .arg(field)
                    .query_async(&mut conn)
                    .await
            }
            WriteOp::SetAdd { key, member } => {
                redis::cmd("SADD")
                    .arg(key)
                    .arg(member)
                    .query_async(&mut conn)
                    .await
            }
            WriteOp::SetRemove { key, member } => {
                redis::cmd("SREM")
                    .arg(key)
                    .arg(member)
                    .query_async(&mut conn)
                    .await
            }
        }
    }

    /// FIFO drain; stops at the first failure and re-queues that op.
    async fn drain_replay(&self) {
        loop {
            let Some(op) = self.replay.lock().unwrap().pop_front() else {
                return;
            };
            if let Err(err) = self.apply_op(&op).await {
                self.note_failure(&err);
                self.replay.lock().unwrap().push_front(op);
                return;
            }
        }
    }

    async fn after_success(&self) {
        self.note_success();
        if !self.replay.lock().unwrap().is_empty() {
            self.drain_replay().await;
        }
    }

    fn mirror_write(&self, op: &WriteOp) {
        let mut mirror = self.mirror.lock().unwrap();
        match op {
            WriteOp::Set { key, value, .. } => {
                mirror.kv.insert(key.clone(), value.clone());
            }
            WriteOp::Delete { key } => {
                mirror.kv.remove(key);
            }
            WriteOp::HashSet { key, field, value } => {
                mirror
                    .hashes
                    .entry(key.clone())
                    .or_default()
                    .insert(field.clone(), value.clone());
            }
            WriteOp::HashDelete { key, field } => {
                if let Some(hash) = mirror.hashes.get_mut(key) {
                    hash.remove(field);
                }
            }
            WriteOp::SetAdd { key, member } => {
                mirror
                    .sets
                    .entry(key.clone())
                    .or_default()
                    .insert(member.clone());
            }
            WriteOp::SetRemove { key, member } => {
                if let Some(set) = mirror.sets.get_mut(key) {
                    set.remove(member);
                }
            }
        }
    }

    async fn write(&self, op: WriteOp) -> StoreResult<()> {
        self.mirror_write(&op);
        match self.apply_op(&op).await {
            Ok(()) => {
                self.after_success().await;
                Ok(())
            }
            Err(err) => {
                self.note_failure(&err);
                self.enqueue(op);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl KeyedStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        match redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
        {
            Ok(value) => {
                self.after_success().await;
                let mut mirror = self.mirror.lock().unwrap();
                match &value {
                    Some(value) => {
                        mirror.kv.insert(key.to_string(), value.clone());
                    }
                    None => {
                        mirror.kv.remove(key);
                    }
                }
                Ok(value)
            }
            Err(err) => {
                self.note_failure(&err);
                match self.mirror.lock().unwrap().kv.get(key) {
                    Some(value) => Ok(Some(value.clone())),
                    None => Err(StoreError::Unavailable(format!(
                        "no cached value for {key}"
                    ))),
                }
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> StoreResult<()> {
        self.write(WriteOp::Set {
            key: key.to_string(),
            value: value.to_string(),
            ttl_seconds,
        })
        .await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.write(WriteOp::Delete {
            key: key.to_string(),
        })
        .await
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        match redis::cmd("HGETALL")
            .arg(key)
            .query_async::<HashMap<String, String>>(&mut conn)
            .await
        {
            Ok(value) => {
                self.after_success().await;
                self.mirror
                    .lock()
                    .unwrap()
                    .hashes
                    .insert(key.to_string(), value.clone());
                Ok(value)
            }
            Err(err) => {
                self.note_failure(&err);
                match self.mirror.lock().unwrap().hashes.get(key) {
                    Some(hash) => Ok(hash.clone()),
                    None => Err(StoreError::Unavailable(format!(
                        "no cached hash for {key}"
                    ))),
                }
            }
        }
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        match redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async::<Option<String>>(&mut conn)
            .await
        {
            Ok(value) => {
                self.after_success().await;
                if let Some(value) = &value {
                    self.mirror
                        .lock()
                        .unwrap()
                        .hashes
                        .entry(key.to_string())
                        .or_default()
                        .insert(field.to_string(), value.clone());
                }
                Ok(value)
            }
            Err(err) => {
                self.note_failure(&err);
                let mirror = self.mirror.lock().unwrap();
                match mirror.hashes.get(key) {
                    Some(hash) => Ok(hash.get(field).cloned()),
                    None => Err(StoreError::Unavailable(format!(
                        "no cached hash for {key}"
                    ))),
                }
            }
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.write(WriteOp::HashSet {
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        })
        .await
    }

    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<()> {
        self.write(WriteOp::HashDelete {
            key: key.to_string(),
            field: field.to_string(),
        })
        .await
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        self.write(WriteOp::SetAdd {
            key: key.to_string(),
            member: member.to_string(),
        })
        .await
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        match redis::cmd("SMEMBERS")
            .arg(key)
            .query_async::<Vec<String>>(&mut conn)
            .await
        {
            Ok(members) => {
                self.after_success().await;
                self.mirror
                    .lock()
                    .unwrap()
                    .sets
                    .insert(key.to_string(), members.iter().cloned().collect());
                Ok(members)
            }
            Err(err) => {
                self.note_failure(&err);
                match self.mirror.lock().unwrap().sets.get(key) {
                    Some(set) => Ok(set.iter().cloned().collect()),
                    None => Err(StoreError::Unavailable(format!("no cached set for {key}"))),
                }
            }
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        self.write(WriteOp::SetRemove {
            key: key.to_string(),
            member: member.to_string(),
        })
        .await
    }

    async fn atomic_usage_update(
        &self,
        pool_key: &str,
        uuid: &str,
        timestamp: &str,
    ) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let result = redis::Script::new(USAGE_SCRIPT)
            .key(pool_key)
            .arg(uuid)
            .arg(timestamp)
            .invoke_async::<Option<u64>>(&mut conn)
            .await;
        match result {
            Ok(Some(count)) => {
                self.after_success().await;
                // Refresh the mirrored field so degraded reads stay current.
                if let Ok(Some(value)) = redis::cmd("HGET")
                    .arg(pool_key)
                    .arg(uuid)
                    .query_async::<Option<String>>(&mut conn)
                    .await
                {
                    self.mirror
                        .lock()
                        .unwrap()
                        .hashes
                        .entry(pool_key.to_string())
                        .or_default()
                        .insert(uuid.to_string(), value);
                }
                Ok(count)
            }
            Ok(None) => Err(StoreError::Missing(format!("{pool_key}/{uuid}"))),
            Err(err) => {
                self.note_failure(&err);
                // Degraded: mutate the mirror copy and queue the full write.
                let (updated, count) = {
                    let mirror = self.mirror.lock().unwrap();
                    let Some(raw) = mirror.hashes.get(pool_key).and_then(|hash| hash.get(uuid))
                    else {
                        return Err(StoreError::Unavailable(format!(
                            "no cached value for {pool_key}/{uuid}"
                        )));
                    };
                    bump_usage(raw, timestamp)?
                };
                let op = WriteOp::HashSet {
                    key: pool_key.to_string(),
                    field: uuid.to_string(),
                    value: updated,
                };
                self.mirror_write(&op);
                self.enqueue(op);
                Ok(count)
            }
        }
    }

    async fn atomic_error_update(
        &self,
        pool_key: &str,
        uuid: &str,
        timestamp: &str,
        message: &str,
        mark_unhealthy: bool,
    ) -> StoreResult<u32> {
        let mut conn = self.conn.clone();
        let result = redis::Script::new(ERROR_SCRIPT)
            .key(pool_key)
            .arg(uuid)
            .arg(timestamp)
            .arg(message)
            .arg(if mark_unhealthy { "1" } else { "0" })
            .invoke_async::<Option<u32>>(&mut conn)
            .await;
        match result {
            Ok(Some(count)) => {
                self.after_success().await;
                if let Ok(Some(value)) = redis::cmd("HGET")
                    .arg(pool_key)
                    .arg(uuid)
                    .query_async::<Option<String>>(&mut conn)
                    .await
                {
                    self.mirror
                        .lock()
                        .unwrap()
                        .hashes
                        .entry(pool_key.to_string())
                        .or_default()
                        .insert(uuid.to_string(), value);
                }
                Ok(count)
            }
            Ok(None) => Err(StoreError::Missing(format!("{pool_key}/{uuid}"))),
            Err(err) => {
                self.note_failure(&err);
                let (updated, count) = {
                    let mirror = self.mirror.lock().unwrap();
                    let Some(raw) = mirror.hashes.get(pool_key).and_then(|hash| hash.get(uuid))
                    else {
                        return Err(StoreError::Unavailable(format!(
                            "no cached value for {pool_key}/{uuid}"
                        )));
                    };
                    bump_error(raw, timestamp, message, mark_unhealthy)?
                };
                let op = WriteOp::HashSet {
                    key: pool_key.to_string(),
                    field: uuid.to_string(),
                    value: updated,
                };
                self.mirror_write(&op);
                self.enqueue(op);
                Ok(count)
            }
        }
    }

    async fn atomic_token_update(
        &self,
        token_key: &str,
        new_token: &str,
        expected_refresh_token: Option<&str>,
        ttl_seconds: Option<u64>,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let result = redis::Script::new(TOKEN_CAS_SCRIPT)
            .key(token_key)
            .arg(new_token)
            .arg(expected_refresh_token.unwrap_or(""))
            .arg(ttl_seconds.unwrap_or(0))
            .invoke_async::<u8>(&mut conn)
            .await;
        match result {
            Ok(written) => {
                self.after_success().await;
                let written = written == 1;
                if written {
                    self.mirror
                        .lock()
                        .unwrap()
                        .kv
                        .insert(token_key.to_string(), new_token.to_string());
                }
                Ok(written)
            }
            Err(err) => {
                self.note_failure(&err);
                let current = self.mirror.lock().unwrap().kv.get(token_key).cloned();
                if !token_cas_allows(current.as_deref(), expected_refresh_token) {
                    return Ok(false);
                }
                let op = WriteOp::Set {
                    key: token_key.to_string(),
                    value: new_token.to_string(),
                    ttl_seconds,
                };
                self.mirror_write(&op);
                self.enqueue(op);
                Ok(true)
            }
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => {
                self.after_success().await;
                Ok(())
            }
            Err(err) => {
                self.note_failure(&err);
                Err(StoreError::Unavailable(err.to_string()))
            }
        }
    }

    fn status(&self) -> StoreStatus {
        StoreStatus {
            connected: !self.degraded.load(Ordering::SeqCst),
            queued_writes: self.replay.lock().unwrap().len(),
        }
    }
}
