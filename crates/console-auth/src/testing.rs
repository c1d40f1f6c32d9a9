//! Scripted transport for exercising the pipeline without sockets.

use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub(crate) enum Reply {
    Now(HttpResponse),
    Delayed(Duration, HttpResponse),
    Timeout,
    /// Never resolves.
    Hang,
    PanicAfter(Duration),
}

type Handler = Box<dyn Fn(&HttpRequest) -> Reply + Send + Sync>;

pub(crate) struct ScriptedTransport {
    handler: Handler,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Reply + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn count(&self, path: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.path == path).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> AuthResult<HttpResponse> {
        self.requests.lock().push(request.clone());
        match (self.handler)(request) {
            Reply::Now(response) => Ok(response),
            Reply::Delayed(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Reply::Timeout => Err(AuthError::Timeout),
            Reply::Hang => std::future::pending::<AuthResult<HttpResponse>>().await,
            Reply::PanicAfter(delay) => {
                tokio::time::sleep(delay).await;
                panic!("scripted transport panic");
            }
        }
    }
}

pub(crate) fn envelope(data: Value) -> Value {
    json!({"code": 200, "message": "success", "data": data})
}

pub(crate) fn error_body(code: i64, message: &str) -> Value {
    json!({"code": code, "message": message, "error": "unauthorized"})
}

pub(crate) fn user_json(id: u64, username: &str) -> Value {
    json!({
        "id": id,
        "username": username,
        "email": format!("{}@example.com", username),
        "role": "admin",
        "status": "active",
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z"
    })
}
