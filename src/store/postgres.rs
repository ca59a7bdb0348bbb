//! Relational back-end on Postgres via sqlx. In addition to the uniform
//! contract it persists full script sessions (context, transcript) and the
//! step execution log, which the other back-ends keep in memory only.
//! Active sessions are runtime-only everywhere and stay in an embedded
//! memory store.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::entities::{CallRecord, CallStatus, RegistrationInfo, SessionRecord, StepExecution};
use crate::script::model::{PhoneMapping, Script, ScriptStatus, Step, StepData};
use crate::store::{ActiveCall, MemoryStore, PendingDialog, SessionStore, StoreError};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_CONNECTIONS: u32 = 5;

/// Schema for every table this back-end touches. Executed by `--init-sql`.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sip_sessions (
    call_id         TEXT PRIMARY KEY,
    remote_rtp_addr TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'pending',
    created_at      TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS sip_calls (
    call_id         TEXT PRIMARY KEY,
    direction       TEXT NOT NULL,
    status          TEXT NOT NULL,
    from_user       TEXT NOT NULL DEFAULT '',
    from_uri        TEXT NOT NULL DEFAULT '',
    from_ip         TEXT NOT NULL DEFAULT '',
    to_user         TEXT NOT NULL DEFAULT '',
    to_uri          TEXT NOT NULL DEFAULT '',
    local_rtp_addr  TEXT NOT NULL DEFAULT '',
    remote_rtp_addr TEXT NOT NULL DEFAULT '',
    start_time      TIMESTAMPTZ NOT NULL,
    answer_time     TIMESTAMPTZ,
    end_time        TIMESTAMPTZ,
    duration_secs   BIGINT NOT NULL DEFAULT 0,
    error_message   TEXT,
    recording_url   TEXT,
    transcription   TEXT
);
CREATE INDEX IF NOT EXISTS idx_sip_calls_status ON sip_calls (status);
CREATE TABLE IF NOT EXISTS sip_users (
    username       TEXT PRIMARY KEY,
    enabled        BOOLEAN NOT NULL DEFAULT TRUE,
    contact_ip     TEXT NOT NULL DEFAULT '',
    contact_port   INT NOT NULL DEFAULT 0,
    expires        INT NOT NULL DEFAULT 3600,
    user_agent     TEXT NOT NULL DEFAULT '',
    remote_ip      TEXT NOT NULL DEFAULT '',
    last_register  TIMESTAMPTZ,
    register_count BIGINT NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS ai_phone_scripts (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    version         TEXT NOT NULL DEFAULT '1.0.0',
    status          TEXT NOT NULL DEFAULT 'draft',
    speaker_id      TEXT NOT NULL DEFAULT '',
    start_step_id   TEXT NOT NULL,
    max_duration_ms BIGINT NOT NULL DEFAULT 300000,
    max_steps       INT NOT NULL DEFAULT 50,
    execute_count   BIGINT NOT NULL DEFAULT 0,
    success_count   BIGINT NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS ai_phone_script_steps (
    script_id TEXT NOT NULL REFERENCES ai_phone_scripts (id) ON DELETE CASCADE,
    step_id   TEXT NOT NULL,
    group_id  TEXT NOT NULL DEFAULT '',
    ord       INT NOT NULL DEFAULT 0,
    data      TEXT NOT NULL,
    PRIMARY KEY (script_id, step_id)
);
CREATE TABLE IF NOT EXISTS script_phone_mappings (
    id           BIGSERIAL PRIMARY KEY,
    script_id    TEXT NOT NULL,
    phone_number TEXT NOT NULL,
    priority     INT NOT NULL DEFAULT 0,
    enabled      BOOLEAN NOT NULL DEFAULT TRUE,
    description  TEXT NOT NULL DEFAULT '',
    start_time   TEXT,
    end_time     TEXT,
    week_days    TEXT
);
CREATE INDEX IF NOT EXISTS idx_phone_mappings_number ON script_phone_mappings (phone_number);
CREATE TABLE IF NOT EXISTS ai_phone_sessions (
    session_id      TEXT PRIMARY KEY,
    call_id         TEXT NOT NULL,
    status          TEXT NOT NULL,
    script_id       TEXT NOT NULL,
    script_name     TEXT NOT NULL DEFAULT '',
    script_version  TEXT NOT NULL DEFAULT '',
    caller_number   TEXT NOT NULL DEFAULT '',
    callee_number   TEXT NOT NULL DEFAULT '',
    client_rtp_addr TEXT NOT NULL DEFAULT '',
    current_step_id TEXT,
    start_time      TIMESTAMPTZ NOT NULL,
    end_time        TIMESTAMPTZ,
    duration_secs   BIGINT NOT NULL DEFAULT 0,
    context         TEXT NOT NULL DEFAULT '{}',
    conversation    TEXT NOT NULL DEFAULT '[]',
    total_steps     INT NOT NULL DEFAULT 0,
    result          TEXT,
    error_message   TEXT,
    recording_url   TEXT
);
CREATE INDEX IF NOT EXISTS idx_ai_sessions_call ON ai_phone_sessions (call_id);
CREATE TABLE IF NOT EXISTS step_executions (
    id            BIGSERIAL PRIMARY KEY,
    session_id    TEXT NOT NULL,
    step_id       TEXT NOT NULL,
    step_type     TEXT NOT NULL,
    status        TEXT NOT NULL,
    start_time    TIMESTAMPTZ NOT NULL,
    end_time      TIMESTAMPTZ,
    duration_ms   BIGINT NOT NULL DEFAULT 0,
    input         TEXT,
    output        TEXT,
    user_input    TEXT,
    ai_response   TEXT,
    tts_text      TEXT,
    error_message TEXT,
    next_step_id  TEXT
);
CREATE INDEX IF NOT EXISTS idx_step_executions_session ON step_executions (session_id);
"#;

pub struct PostgresStore {
    pool: PgPool,
    runtime: MemoryStore,
}

impl PostgresStore {
    pub async fn connect(dsn: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(dsn)
            .await?;
        Ok(Self {
            pool,
            runtime: MemoryStore::new(),
        })
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA_SQL.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(StoreError::backend)?;
        }
        Ok(())
    }

    fn row_to_call(row: &sqlx::postgres::PgRow) -> Result<CallRecord, StoreError> {
        let direction: String = row.try_get("direction").map_err(StoreError::backend)?;
        let status: String = row.try_get("status").map_err(StoreError::backend)?;
        Ok(CallRecord {
            call_id: row.try_get("call_id").map_err(StoreError::backend)?,
            direction: serde_json::from_value(serde_json::Value::String(direction))
                .map_err(StoreError::backend)?,
            status: serde_json::from_value(serde_json::Value::String(status))
                .map_err(StoreError::backend)?,
            from_user: row.try_get("from_user").map_err(StoreError::backend)?,
            from_uri: row.try_get("from_uri").map_err(StoreError::backend)?,
            from_ip: row.try_get("from_ip").map_err(StoreError::backend)?,
            to_user: row.try_get("to_user").map_err(StoreError::backend)?,
            to_uri: row.try_get("to_uri").map_err(StoreError::backend)?,
            local_rtp_addr: row.try_get("local_rtp_addr").map_err(StoreError::backend)?,
            remote_rtp_addr: row.try_get("remote_rtp_addr").map_err(StoreError::backend)?,
            start_time: row.try_get("start_time").map_err(StoreError::backend)?,
            answer_time: row.try_get("answer_time").map_err(StoreError::backend)?,
            end_time: row.try_get("end_time").map_err(StoreError::backend)?,
            duration_secs: row.try_get("duration_secs").map_err(StoreError::backend)?,
            error_message: row.try_get("error_message").map_err(StoreError::backend)?,
            recording_url: row.try_get("recording_url").map_err(StoreError::backend)?,
            transcription: row.try_get("transcription").map_err(StoreError::backend)?,
        })
    }
}

#[async_trait]
impl SessionStore for PostgresStore {
    async fn put_pending(&self, call_id: &str, peer_rtp: SocketAddr) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sip_sessions (call_id, remote_rtp_addr, status, created_at) \
             VALUES ($1, $2, 'pending', $3) \
             ON CONFLICT (call_id) DO UPDATE SET remote_rtp_addr = $2, created_at = $3",
        )
        .bind(call_id)
        .bind(peer_rtp.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn get_pending(&self, call_id: &str) -> Result<Option<PendingDialog>, StoreError> {
        let row = sqlx::query(
            "SELECT remote_rtp_addr, created_at FROM sip_sessions \
             WHERE call_id = $1 AND status = 'pending'",
        )
        .bind(call_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let Some(row) = row else { return Ok(None) };
        let addr: String = row.try_get("remote_rtp_addr").map_err(StoreError::backend)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(StoreError::backend)?;
        let peer_rtp = addr
            .parse::<SocketAddr>()
            .map_err(|e| StoreError::Backend(format!("bad rtp addr {addr:?}: {e}")))?;
        Ok(Some(PendingDialog {
            call_id: call_id.to_string(),
            peer_rtp,
            created_at,
        }))
    }

    async fn remove_pending(&self, call_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sip_sessions WHERE call_id = $1")
            .bind(call_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn put_call(&self, record: &CallRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sip_calls (call_id, direction, status, from_user, from_uri, from_ip, \
             to_user, to_uri, local_rtp_addr, remote_rtp_addr, start_time, answer_time, end_time, \
             duration_secs, error_message, recording_url, transcription) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17) \
             ON CONFLICT (call_id) DO UPDATE SET status = $3, answer_time = $12, end_time = $13, \
             duration_secs = $14, error_message = $15, recording_url = $16, transcription = $17",
        )
        .bind(&record.call_id)
        .bind(match record.direction {
            crate::entities::CallDirection::Inbound => "inbound",
            crate::entities::CallDirection::Outbound => "outbound",
        })
        .bind(record.status.as_str())
        .bind(&record.from_user)
        .bind(&record.from_uri)
        .bind(&record.from_ip)
        .bind(&record.to_user)
        .bind(&record.to_uri)
        .bind(&record.local_rtp_addr)
        .bind(&record.remote_rtp_addr)
        .bind(record.start_time)
        .bind(record.answer_time)
        .bind(record.end_time)
        .bind(record.duration_secs)
        .bind(&record.error_message)
        .bind(&record.recording_url)
        .bind(&record.transcription)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM sip_calls WHERE call_id = $1")
            .bind(call_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        row.map(|r| Self::row_to_call(&r)).transpose()
    }

    async fn update_call_status(
        &self,
        call_id: &str,
        status: CallStatus,
        answer_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let Some(mut call) = self.get_call(call_id).await? else {
            return Err(StoreError::NotFound(call_id.to_string()));
        };
        if let Some(t) = answer_time {
            call.answer_time = Some(t);
        }
        if status.is_terminal() {
            call.seal(status, Utc::now());
        } else {
            call.status = status;
        }
        self.put_call(&call).await
    }

    async fn set_call_recording(&self, call_id: &str, url: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE sip_calls SET recording_url = $2 WHERE call_id = $1")
            .bind(call_id)
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(call_id.to_string()));
        }
        Ok(())
    }

    async fn put_active(&self, call_id: &str, active: ActiveCall) -> Result<(), StoreError> {
        self.runtime.put_active(call_id, active).await
    }

    async fn get_active(&self, call_id: &str) -> Result<Option<ActiveCall>, StoreError> {
        self.runtime.get_active(call_id).await
    }

    async fn remove_active(&self, call_id: &str) -> Result<(), StoreError> {
        self.runtime.remove_active(call_id).await
    }

    async fn active_count(&self) -> usize {
        self.runtime.active_count().await
    }

    async fn put_registration(&self, info: &RegistrationInfo) -> Result<(), StoreError> {
        let row = sqlx::query("SELECT enabled FROM sip_users WHERE username = $1")
            .bind(&info.username)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        let Some(row) = row else {
            return Err(StoreError::UserUnknown);
        };
        let enabled: bool = row.try_get("enabled").map_err(StoreError::backend)?;
        if !enabled {
            return Err(StoreError::UserDisabled);
        }

        sqlx::query(
            "UPDATE sip_users SET contact_ip = $2, contact_port = $3, expires = $4, \
             user_agent = $5, remote_ip = $6, last_register = $7, \
             register_count = register_count + 1 WHERE username = $1",
        )
        .bind(&info.username)
        .bind(&info.contact_ip)
        .bind(info.contact_port as i32)
        .bind(info.expires as i32)
        .bind(&info.user_agent)
        .bind(&info.source_ip)
        .bind(info.registered_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn save_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let context = serde_json::to_string(&record.context).map_err(StoreError::backend)?;
        let conversation =
            serde_json::to_string(&record.conversation).map_err(StoreError::backend)?;
        sqlx::query(
            "INSERT INTO ai_phone_sessions (session_id, call_id, status, script_id, script_name, \
             script_version, caller_number, callee_number, client_rtp_addr, current_step_id, \
             start_time, end_time, duration_secs, context, conversation, total_steps, result, \
             error_message, recording_url) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19) \
             ON CONFLICT (session_id) DO UPDATE SET status = $3, current_step_id = $10, \
             end_time = $12, duration_secs = $13, context = $14, conversation = $15, \
             total_steps = $16, result = $17, error_message = $18, recording_url = $19",
        )
        .bind(&record.session_id)
        .bind(&record.call_id)
        .bind(record.status.as_str())
        .bind(&record.script_id)
        .bind(&record.script_name)
        .bind(&record.script_version)
        .bind(&record.caller_number)
        .bind(&record.callee_number)
        .bind(&record.client_rtp_addr)
        .bind(&record.current_step_id)
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.duration_secs)
        .bind(context)
        .bind(conversation)
        .bind(record.total_steps as i32)
        .bind(&record.result)
        .bind(&record.error_message)
        .bind(&record.recording_url)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM ai_phone_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        let Some(row) = row else { return Ok(None) };

        let status: String = row.try_get("status").map_err(StoreError::backend)?;
        let context: String = row.try_get("context").map_err(StoreError::backend)?;
        let conversation: String = row.try_get("conversation").map_err(StoreError::backend)?;
        let total_steps: i32 = row.try_get("total_steps").map_err(StoreError::backend)?;
        Ok(Some(SessionRecord {
            session_id: row.try_get("session_id").map_err(StoreError::backend)?,
            call_id: row.try_get("call_id").map_err(StoreError::backend)?,
            status: serde_json::from_value(serde_json::Value::String(status))
                .map_err(StoreError::backend)?,
            script_id: row.try_get("script_id").map_err(StoreError::backend)?,
            script_name: row.try_get("script_name").map_err(StoreError::backend)?,
            script_version: row.try_get("script_version").map_err(StoreError::backend)?,
            caller_number: row.try_get("caller_number").map_err(StoreError::backend)?,
            callee_number: row.try_get("callee_number").map_err(StoreError::backend)?,
            client_rtp_addr: row.try_get("client_rtp_addr").map_err(StoreError::backend)?,
            current_step_id: row.try_get("current_step_id").map_err(StoreError::backend)?,
            start_time: row.try_get("start_time").map_err(StoreError::backend)?,
            end_time: row.try_get("end_time").map_err(StoreError::backend)?,
            duration_secs: row.try_get("duration_secs").map_err(StoreError::backend)?,
            context: serde_json::from_str(&context).map_err(StoreError::backend)?,
            conversation: serde_json::from_str(&conversation).map_err(StoreError::backend)?,
            total_steps: total_steps as u32,
            result: row.try_get("result").map_err(StoreError::backend)?,
            error_message: row.try_get("error_message").map_err(StoreError::backend)?,
            recording_url: row.try_get("recording_url").map_err(StoreError::backend)?,
        }))
    }

    async fn record_step(&self, exec: &StepExecution) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO step_executions (session_id, step_id, step_type, status, start_time, \
             end_time, duration_ms, input, output, user_input, ai_response, tts_text, \
             error_message, next_step_id) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)",
        )
        .bind(&exec.session_id)
        .bind(&exec.step_id)
        .bind(exec.step_type.as_str())
        .bind(exec.status.as_str())
        .bind(exec.start_time)
        .bind(exec.end_time)
        .bind(exec.duration_ms)
        .bind(&exec.input)
        .bind(&exec.output)
        .bind(&exec.user_input)
        .bind(&exec.ai_response)
        .bind(&exec.tts_text)
        .bind(&exec.error_message)
        .bind(&exec.next_step_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn save_script(&self, script: &Script) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ai_phone_scripts (id, name, description, version, status, speaker_id, \
             start_step_id, max_duration_ms, max_steps, execute_count, success_count) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11) \
             ON CONFLICT (id) DO UPDATE SET name = $2, description = $3, version = $4, \
             status = $5, speaker_id = $6, start_step_id = $7, max_duration_ms = $8, \
             max_steps = $9, execute_count = $10, success_count = $11",
        )
        .bind(&script.id)
        .bind(&script.name)
        .bind(&script.description)
        .bind(&script.version)
        .bind(script.status.as_str())
        .bind(&script.speaker_id)
        .bind(&script.start_step_id)
        .bind(script.max_duration_ms as i64)
        .bind(script.max_steps as i32)
        .bind(script.execute_count as i64)
        .bind(script.success_count as i64)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        sqlx::query("DELETE FROM ai_phone_script_steps WHERE script_id = $1")
            .bind(&script.id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        for step in &script.steps {
            let data = serde_json::to_string(&step.data).map_err(StoreError::backend)?;
            sqlx::query(
                "INSERT INTO ai_phone_script_steps (script_id, step_id, group_id, ord, data) \
                 VALUES ($1,$2,$3,$4,$5)",
            )
            .bind(&script.id)
            .bind(&step.id)
            .bind(&step.group_id)
            .bind(step.order as i32)
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        }
        Ok(())
    }

    async fn load_scripts(&self) -> Result<Vec<Script>, StoreError> {
        let rows = sqlx::query("SELECT * FROM ai_phone_scripts")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        let mut scripts = Vec::new();
        for row in rows {
            let id: String = row.try_get("id").map_err(StoreError::backend)?;
            let status: String = row.try_get("status").map_err(StoreError::backend)?;
            let status: ScriptStatus =
                serde_json::from_value(serde_json::Value::String(status))
                    .map_err(StoreError::backend)?;
            let max_duration_ms: i64 =
                row.try_get("max_duration_ms").map_err(StoreError::backend)?;
            let max_steps: i32 = row.try_get("max_steps").map_err(StoreError::backend)?;
            let execute_count: i64 = row.try_get("execute_count").map_err(StoreError::backend)?;
            let success_count: i64 = row.try_get("success_count").map_err(StoreError::backend)?;

            let step_rows = sqlx::query(
                "SELECT step_id, group_id, ord, data FROM ai_phone_script_steps \
                 WHERE script_id = $1 ORDER BY ord ASC",
            )
            .bind(&id)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;

            let mut steps = Vec::new();
            for srow in step_rows {
                let data: String = srow.try_get("data").map_err(StoreError::backend)?;
                let ord: i32 = srow.try_get("ord").map_err(StoreError::backend)?;
                steps.push(Step {
                    id: srow.try_get("step_id").map_err(StoreError::backend)?,
                    group_id: srow.try_get("group_id").map_err(StoreError::backend)?,
                    order: ord as u32,
                    data: serde_json::from_str::<StepData>(&data).map_err(StoreError::backend)?,
                });
            }

            scripts.push(Script {
                id,
                name: row.try_get("name").map_err(StoreError::backend)?,
                description: row.try_get("description").map_err(StoreError::backend)?,
                version: row.try_get("version").map_err(StoreError::backend)?,
                status,
                speaker_id: row.try_get("speaker_id").map_err(StoreError::backend)?,
                start_step_id: row.try_get("start_step_id").map_err(StoreError::backend)?,
                max_duration_ms: max_duration_ms as u64,
                max_steps: max_steps as u32,
                steps,
                execute_count: execute_count as u64,
                success_count: success_count as u64,
            });
        }
        Ok(scripts)
    }

    async fn save_phone_mapping(&self, mapping: &PhoneMapping) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO script_phone_mappings (script_id, phone_number, priority, enabled, \
             description, start_time, end_time, week_days) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(&mapping.script_id)
        .bind(&mapping.phone_number)
        .bind(mapping.priority)
        .bind(mapping.enabled)
        .bind(&mapping.description)
        .bind(&mapping.start_time)
        .bind(&mapping.end_time)
        .bind(&mapping.week_days)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn load_phone_mappings(&self) -> Result<Vec<PhoneMapping>, StoreError> {
        let rows = sqlx::query(
            "SELECT script_id, phone_number, priority, enabled, description, start_time, \
             end_time, week_days FROM script_phone_mappings ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let mut mappings = Vec::new();
        for row in rows {
            mappings.push(PhoneMapping {
                script_id: row.try_get("script_id").map_err(StoreError::backend)?,
                phone_number: row.try_get("phone_number").map_err(StoreError::backend)?,
                priority: row.try_get("priority").map_err(StoreError::backend)?,
                enabled: row.try_get("enabled").map_err(StoreError::backend)?,
                description: row.try_get("description").map_err(StoreError::backend)?,
                start_time: row.try_get("start_time").map_err(StoreError::backend)?,
                end_time: row.try_get("end_time").map_err(StoreError::backend)?,
                week_days: row.try_get("week_days").map_err(StoreError::backend)?,
            });
        }
        Ok(mappings)
    }
}
