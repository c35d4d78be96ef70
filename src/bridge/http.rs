// HTTP client for the bridge service
use super::{Bridge, BridgeError, BridgeReply, BridgeRequest, JobResultSource, StateSource};
use crate::models::{ContinuousState, JobResult};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

const SECRET_HEADER: &str = "X-Bridge-Secret";
const STATUS_TIMEOUT: Duration = Duration::from_millis(3000);

pub struct HttpBridge {
    base: Url,
    secret: Option<String>,
    agent: ureq::Agent,
}

impl HttpBridge {
    pub fn new(base_url: &str, secret: Option<String>) -> Result<Self, String> {
        let base = Url::parse(base_url.trim())
            .map_err(|e| format!("Invalid bridge URL {}: {}", base_url, e))?;
        if base.cannot_be_a_base() {
            return Err(format!("Bridge URL cannot be used as a base: {}", base_url));
        }

        Ok(Self {
            base,
            secret: secret.filter(|s| !s.is_empty()),
            agent: ureq::AgentBuilder::new().build(),
        })
    }

    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, BridgeError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BridgeError::Transport(format!("Invalid bridge URL: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn build_request(&self, method: &str, url: &Url, timeout: Duration) -> ureq::Request {
        let req = self.agent.request_url(method, url).timeout(timeout);
        match &self.secret {
            Some(secret) => req.set(SECRET_HEADER, secret),
            None => req,
        }
    }
}

pub(crate) fn handle_response(result: Result<ureq::Response, ureq::Error>) -> Result<Value, BridgeError> {
    match result {
        Ok(response) => response
            .into_json::<Value>()
            .map_err(|e| BridgeError::Transport(format!("Failed to parse bridge response: {}", e))),
        Err(ureq::Error::Status(429, _)) => Err(BridgeError::RateLimited),
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or(body);
            Err(BridgeError::Http { status, message })
        }
        Err(ureq::Error::Transport(transport)) => Err(BridgeError::Transport(transport.to_string())),
    }
}

/// Bridge answers either `{ success, data }` or the bare object.
fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(Value::Null),
        other => other,
    }
}

impl Bridge for HttpBridge {
    fn request(&self, request: &BridgeRequest) -> Result<BridgeReply, BridgeError> {
        let url = self.endpoint(&["api", "cnc", "raw"])?;
        let body = json!({
            "uid": request.uid,
            "dataType": request.kind.as_str(),
            "payload": request.payload,
            "timeoutMilliseconds": request.timeout.as_millis() as u64,
        });

        let response = handle_response(self.build_request("POST", &url, request.timeout).send_json(body))?;
        parse_raw_reply(&response)
    }
}

/// A `result` that is present but not an `i32` is a malformed reply, never
/// a success.
fn parse_raw_reply(response: &Value) -> Result<BridgeReply, BridgeError> {
    let result_code = match response.get("result") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            raw.as_i64()
                .and_then(|code| i32::try_from(code).ok())
                .ok_or_else(|| BridgeError::Transport(format!("Unexpected bridge result code: {}", raw)))?,
        ),
    };

    Ok(BridgeReply {
        result_code,
        message: response
            .get("message")
            .and_then(|v| v.as_str())
            .map(String::from),
        data: response.get("data").cloned().unwrap_or(Value::Null),
    })
}

impl JobResultSource for HttpBridge {
    fn fetch_job_result(&self, machine_id: &str, job_id: &str) -> Result<JobResult, BridgeError> {
        let url = self.endpoint(&["api", "cnc", "machines", machine_id, "jobs", job_id])?;
        let body = handle_response(self.build_request("GET", &url, STATUS_TIMEOUT).call())?;

        serde_json::from_value(unwrap_data(body))
            .map_err(|e| BridgeError::Transport(format!("Unexpected job result shape: {}", e)))
    }
}

impl StateSource for HttpBridge {
    fn fetch_continuous_state(&self, machine_id: &str) -> Result<ContinuousState, BridgeError> {
        let url = self.endpoint(&["api", "cnc", "machines", machine_id, "continuous", "state"])?;
        let body = handle_response(self.build_request("GET", &url, STATUS_TIMEOUT).call())?;

        let mut data = unwrap_data(body);
        // Older bridges omit the machine id in the state payload.
        if let Value::Object(map) = &mut data {
            map.entry("machineId").or_insert_with(|| json!(machine_id));
        }

        serde_json::from_value(data)
            .map_err(|e| BridgeError::Transport(format!("Unexpected continuous state shape: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_machine_segments() {
        let bridge = HttpBridge::new("http://localhost:8002", None).unwrap();
        let url = bridge
            .endpoint(&["api", "cnc", "machines", "M 1/a", "continuous", "state"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8002/api/cnc/machines/M%201%2Fa/continuous/state"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path_prefix() {
        let bridge = HttpBridge::new("http://bridge.local/proxy/", Some(String::new())).unwrap();
        let url = bridge.endpoint(&["api", "cnc", "raw"]).unwrap();
        assert_eq!(url.as_str(), "http://bridge.local/proxy/api/cnc/raw");
        assert!(bridge.secret.is_none());
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(HttpBridge::new("not a url", None).is_err());
    }

    #[test]
    fn test_unwrap_data_accepts_both_shapes() {
        let wrapped = json!({"success": true, "data": {"jobId": "j1"}});
        let bare = json!({"jobId": "j1"});
        assert_eq!(unwrap_data(wrapped), json!({"jobId": "j1"}));
        assert_eq!(unwrap_data(bare), json!({"jobId": "j1"}));
    }

    #[test]
    fn test_raw_reply_result_code_must_fit() {
        let ok = parse_raw_reply(&json!({"result": -89, "message": "nope"})).unwrap();
        assert_eq!(ok.result_code, Some(-89));
        assert_eq!(ok.message.as_deref(), Some("nope"));

        let missing = parse_raw_reply(&json!({"data": {"a": 1}})).unwrap();
        assert_eq!(missing.result_code, None);
        assert_eq!(missing.data, json!({"a": 1}));

        for bad in [json!({"result": 4_294_967_296i64}), json!({"result": "0"}), json!({"result": 1.5})] {
            assert!(matches!(parse_raw_reply(&bad), Err(BridgeError::Transport(_))));
        }
    }
}
