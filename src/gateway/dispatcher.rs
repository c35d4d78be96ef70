// Command gateway
use super::cooldown::{BackoffStore, CommandKey, CooldownStore};
use super::payload::Command;
use crate::bridge::{is_unregistered, result_message, Bridge, BridgeError, BridgeReply, BridgeRequest, ALREADY_REGISTERED};
use crate::error::OrchestratorError;
use crate::models::{CommandKind, CommandOutcome, Machine, Settings};
use crate::registry::MachineRegistry;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub cooldown: Duration,
    pub backoff: Duration,
    pub read_timeout: Duration,
    pub control_timeout: Duration,
    pub program_fetch_attempts: u32,
    pub program_fetch_retry_delay: Duration,
}

impl GatewayConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            cooldown: Duration::from_secs(settings.cooldown_secs),
            backoff: Duration::from_secs(settings.backoff_secs),
            read_timeout: Duration::from_millis(settings.read_timeout_ms),
            control_timeout: Duration::from_millis(settings.control_timeout_ms),
            program_fetch_attempts: settings.program_fetch_attempts.max(1),
            program_fetch_retry_delay: Duration::from_millis(settings.program_fetch_retry_delay_ms),
        }
    }

    fn default_timeout(&self, kind: CommandKind) -> Duration {
        if kind.is_control() {
            self.control_timeout
        } else {
            self.read_timeout
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Result of the bounded program-data fetch.
enum FetchOutcome {
    Ok(BridgeReply),
    Exhausted { attempts: u32, last_error: Option<String> },
}

pub struct CommandGateway {
    bridge: Arc<dyn Bridge>,
    registry: Arc<MachineRegistry>,
    cooldowns: Arc<CooldownStore>,
    backoffs: Arc<BackoffStore>,
    control_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    config: GatewayConfig,
}

impl CommandGateway {
    pub fn new(bridge: Arc<dyn Bridge>, registry: Arc<MachineRegistry>, config: GatewayConfig) -> Self {
        let cooldowns = Arc::new(CooldownStore::new(config.cooldown));
        let backoffs = Arc::new(BackoffStore::new(config.backoff));
        Self::with_stores(bridge, registry, cooldowns, backoffs, config)
    }

    /// Lets several gateways share (or isolate) their rate-limit state.
    pub fn with_stores(
        bridge: Arc<dyn Bridge>,
        registry: Arc<MachineRegistry>,
        cooldowns: Arc<CooldownStore>,
        backoffs: Arc<BackoffStore>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            bridge,
            registry,
            cooldowns,
            backoffs,
            control_locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MachineRegistry> {
        &self.registry
    }

    /// Validates a caller's raw payload, then sends it.
    pub async fn send_raw(
        &self,
        uid: &str,
        kind: CommandKind,
        payload: &Value,
        timeout: Option<Duration>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        let command = Command::parse(kind, payload)?;
        self.send(uid, command, timeout).await
    }

    pub async fn send(
        &self,
        uid: &str,
        command: Command,
        timeout: Option<Duration>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        let machine = self.registry.require(uid)?;
        let kind = command.kind();
        check_permissions(&machine, kind)?;

        let key = CommandKey::new(uid, kind);
        if kind.is_cooldown_guarded() {
            let now = Instant::now();
            if !self.cooldowns.try_acquire(&key, now) {
                debug!("{} for {} rejected by cooldown", kind, uid);
                return Err(OrchestratorError::RateLimited {
                    uid: uid.to_string(),
                    kind,
                });
            }
            if self.backoffs.is_blocked(&key, now) {
                debug!("{} for {} suppressed while the bridge backs off", kind, uid);
                return Ok(CommandOutcome::Suppressed { kind });
            }
        }

        let request = BridgeRequest {
            uid: uid.to_string(),
            kind,
            payload: command.wire_payload(),
            timeout: timeout.unwrap_or_else(|| self.config.default_timeout(kind)),
        };

        let reply = if kind.is_control() {
            let lock = self.control_lock(uid);
            let _guard = lock.lock().await;
            self.dispatch(request).await
        } else if kind == CommandKind::GetProgDataInfo {
            match self.fetch_program(request).await {
                Ok(FetchOutcome::Ok(reply)) => Ok(reply),
                Ok(FetchOutcome::Exhausted { attempts, last_error }) => {
                    warn!(
                        "GetProgDataInfo for {} returned no program data after {} attempts",
                        uid, attempts
                    );
                    return Err(OrchestratorError::Transport(last_error.unwrap_or_else(|| {
                        format!("program data unavailable after {} attempts", attempts)
                    })));
                }
                Err(e) => Err(e),
            }
        } else {
            self.dispatch(request).await
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(BridgeError::RateLimited) => {
                if kind.is_cooldown_guarded() {
                    self.backoffs.block(&key, Instant::now());
                    warn!(
                        "Bridge rate-limited {} for {}, backing off for {}s",
                        kind,
                        uid,
                        self.config.backoff.as_secs()
                    );
                }
                return Err(OrchestratorError::RateLimited {
                    uid: uid.to_string(),
                    kind,
                });
            }
            Err(e) => {
                warn!("{} for {} failed: {}", kind, uid, e);
                return Err(e.into());
            }
        };

        self.interpret(&machine, kind, reply).await
    }

    /// Registers a machine with the bridge from its stored address.
    /// "Already registered" counts as success.
    pub async fn register_machine(&self, uid: &str) -> Result<CommandOutcome, OrchestratorError> {
        let machine = self.registry.require(uid)?;
        self.send(uid, Command::AddMachine(machine.address), None).await
    }

    async fn interpret(
        &self,
        machine: &Machine,
        kind: CommandKind,
        reply: BridgeReply,
    ) -> Result<CommandOutcome, OrchestratorError> {
        match reply.result_code {
            None | Some(0) => {
                log_success(&machine.uid, kind, &reply.data);
                Ok(CommandOutcome::Completed {
                    kind,
                    result_code: reply.result_code,
                    data: reply.data,
                })
            }
            Some(ALREADY_REGISTERED) if kind == CommandKind::AddMachine => {
                info!("Machine {} was already registered with the bridge", machine.uid);
                Ok(CommandOutcome::Completed {
                    kind,
                    result_code: Some(ALREADY_REGISTERED),
                    data: reply.data,
                })
            }
            Some(code) if is_unregistered(code) => {
                warn!("{} for {} hit an unregistered machine (code {})", kind, machine.uid, code);
                if kind != CommandKind::AddMachine {
                    self.reregister(machine).await;
                }
                Err(OrchestratorError::DeviceUnregistered {
                    uid: machine.uid.clone(),
                    code,
                })
            }
            Some(code) => {
                let message = result_message(code)
                    .map(String::from)
                    .or(reply.message)
                    .unwrap_or_else(|| format!("Bridge returned result code {}", code));
                warn!("{} for {} rejected: {} (code {})", kind, machine.uid, message, code);
                Err(OrchestratorError::UpstreamRejected { code, message })
            }
        }
    }

    /// One AddMachine from the stored address. Never retried; the caller
    /// still gets the original failure.
    async fn reregister(&self, machine: &Machine) {
        let request = BridgeRequest {
            uid: machine.uid.clone(),
            kind: CommandKind::AddMachine,
            payload: Command::AddMachine(machine.address.clone()).wire_payload(),
            timeout: self.config.control_timeout,
        };

        let lock = self.control_lock(&machine.uid);
        let _guard = lock.lock().await;
        match self.dispatch(request).await {
            Ok(reply) => info!(
                "Re-registered {} at {}:{} (code {:?})",
                machine.uid, machine.address.host, machine.address.port, reply.result_code
            ),
            Err(e) => warn!("Re-registration of {} failed: {}", machine.uid, e),
        }
    }

    /// The bridge sometimes answers GetProgDataInfo with an empty body; those
    /// and transport errors are retried a fixed number of times.
    async fn fetch_program(&self, request: BridgeRequest) -> Result<FetchOutcome, BridgeError> {
        let attempts = self.config.program_fetch_attempts;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.dispatch(request.clone()).await {
                Ok(reply) if has_program_data(&reply) => return Ok(FetchOutcome::Ok(reply)),
                Ok(_) => debug!("GetProgDataInfo for {} attempt {} returned no program", request.uid, attempt),
                Err(BridgeError::Transport(e)) => {
                    debug!("GetProgDataInfo for {} attempt {} failed: {}", request.uid, attempt, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.program_fetch_retry_delay).await;
            }
        }

        Ok(FetchOutcome::Exhausted { attempts, last_error })
    }

    async fn dispatch(&self, request: BridgeRequest) -> Result<BridgeReply, BridgeError> {
        let bridge = self.bridge.clone();
        let timeout = request.timeout;
        let task = tokio::task::spawn_blocking(move || bridge.request(&request));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(BridgeError::Transport(format!("Bridge task failed: {}", e))),
            Err(_) => Err(BridgeError::Transport(format!(
                "Bridge call timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    fn control_lock(&self, uid: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.control_locks
            .lock()
            .entry(uid.to_string())
            .or_default()
            .clone()
    }
}

fn check_permissions(machine: &Machine, kind: CommandKind) -> Result<(), OrchestratorError> {
    let exempt = matches!(kind, CommandKind::ResetButton | CommandKind::AddMachine);
    let blocked = kind.is_control()
        && !exempt
        && (!machine.flags.allow_job_start
            || (kind == CommandKind::DeleteProgram && !machine.flags.allow_program_delete));

    if blocked {
        warn!("{} refused for {} by machine permission flags", kind, machine.uid);
        return Err(OrchestratorError::JobStartBlocked {
            uid: machine.uid.clone(),
            kind,
        });
    }
    Ok(())
}

fn has_program_data(reply: &BridgeReply) -> bool {
    // A real error code is a definite answer, not an intermittent null.
    if matches!(reply.result_code, Some(code) if code != 0) {
        return true;
    }
    reply
        .data
        .get("machineProgramData")
        .map_or(false, |program| program.is_object())
}

fn log_success(uid: &str, kind: CommandKind, data: &Value) {
    let result_type = match data {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    let preview = if kind.carries_program_text() {
        String::from("<program text omitted>")
    } else {
        preview(data)
    };
    info!(
        "uid={} kind={} result_type={} result_preview={}",
        uid, kind, result_type, preview
    );
}

fn preview(data: &Value) -> String {
    let text = data.to_string();
    if text.chars().count() <= PREVIEW_CHARS {
        return text;
    }
    let mut cut: String = text.chars().take(PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}
