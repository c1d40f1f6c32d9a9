//! Request pipeline: bearer attachment and one-shot 401 recovery.

use crate::error::ApiError;
use crate::renewal::RenewalCoordinator;
use crate::session_state::SessionState;
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::ApiEnvelope;
use crate::{AuthError, AuthResult};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Authenticated client over a [`Transport`].
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    session: SessionState,
    renewal: RenewalCoordinator,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, session: SessionState) -> Self {
        let renewal = RenewalCoordinator::new(transport.clone(), session.clone());
        Self {
            transport,
            session,
            renewal,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn renewal(&self) -> &RenewalCoordinator {
        &self.renewal
    }

    /// Send `request` and decode the envelope.
    ///
    /// A 401 on a renewable request is retried exactly once with the token
    /// the coordinator yields. A second 401 is surfaced as is.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        mut request: HttpRequest,
    ) -> AuthResult<ApiEnvelope<T>> {
        request.bearer = self.session.tokens().access_token()?;
        let response = self.transport.send(&request).await?;

        if !response.is_unauthorized() || !is_renewable(&request) {
            return decode(&request, response);
        }

        debug!(method = %request.method, path = %request.path, "Unauthorized, renewing");
        let token = self
            .renewal
            .renew(request.bearer.as_deref())
            .await
            .map_err(AuthError::RenewalFailed)?;

        request.bearer = Some(token);
        request.allow_renewal = false;
        let retried = self.transport.send(&request).await?;
        decode(&request, retried)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> AuthResult<ApiEnvelope<T>> {
        self.execute(HttpRequest::get(path)).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> AuthResult<ApiEnvelope<T>> {
        self.execute(HttpRequest::get(path).with_query(query.iter().copied()))
            .await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> AuthResult<ApiEnvelope<T>> {
        let body = serde_json::to_value(body)?;
        self.execute(HttpRequest::post(path).with_json(body)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> AuthResult<ApiEnvelope<T>> {
        let body = serde_json::to_value(body)?;
        self.execute(HttpRequest::new(Method::PUT, path).with_json(body))
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> AuthResult<ApiEnvelope<T>> {
        self.execute(HttpRequest::new(Method::DELETE, path)).await
    }
}

fn is_renewable(request: &HttpRequest) -> bool {
    request.allow_renewal && !request.is_credential_exchange()
}

fn decode<T: DeserializeOwned>(
    request: &HttpRequest,
    response: HttpResponse,
) -> AuthResult<ApiEnvelope<T>> {
    if !response.is_success() {
        let err = ApiError::from_response(response.status, &response.body);
        debug!(
            path = %request.path,
            status = response.status,
            code = err.code,
            "Request failed"
        );
        return Err(if response.is_unauthorized() && !request.is_credential_exchange() {
            AuthError::Unauthorized(err)
        } else {
            AuthError::Api(err)
        });
    }

    if response.body.is_empty() {
        return Ok(ApiEnvelope {
            code: i64::from(response.status),
            message: String::new(),
            data: None,
            error: None,
            pagination: None,
        });
    }
    Ok(serde_json::from_slice(&response.body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionContext;
    use crate::session_fsm::SessionStatus;
    use crate::testing::{envelope, error_body, user_json, Reply, ScriptedTransport};
    use crate::types::UserSummary;
    use console_storage::{now_millis, MemoryStorage, StorageKeys, TokenStore};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn unauthorized() -> HttpResponse {
        HttpResponse::json(401, &error_body(401, "token expired"))
    }

    fn client_with(
        transport: Arc<ScriptedTransport>,
        storage: Arc<MemoryStorage>,
    ) -> ApiClient {
        let session = SessionState::new(TokenStore::new(storage), PermissionContext::new());
        ApiClient::new(transport, session)
    }

    /// Accepts only the bearer `a1`; refresh yields `a1` after a delay.
    fn renewing_backend(refresh_delay: Duration) -> Arc<ScriptedTransport> {
        ScriptedTransport::new(move |req| match req.path.as_str() {
            "/auth/refresh" => Reply::Delayed(
                refresh_delay,
                HttpResponse::json(
                    200,
                    &envelope(json!({"access_token": "a1", "expires_in": 900, "token_type": "Bearer"})),
                ),
            ),
            _ if req.bearer.as_deref() == Some("a1") => {
                Reply::Now(HttpResponse::json(200, &envelope(json!({"path": req.path}))))
            }
            _ => Reply::Now(unauthorized()),
        })
    }

    #[tokio::test]
    async fn test_attaches_bearer() {
        let transport = ScriptedTransport::new(|_| {
            Reply::Now(HttpResponse::json(200, &envelope(user_json(1, "admin"))))
        });
        let storage = Arc::new(MemoryStorage::new());
        let client = client_with(transport.clone(), storage);
        client.session().tokens().set_tokens("a0", "r0", 900).unwrap();

        let env: ApiEnvelope<UserSummary> = client.get("/users/profile").await.unwrap();
        assert_eq!(env.data.unwrap().username, "admin");
        assert_eq!(transport.requests()[0].bearer.as_deref(), Some("a0"));
    }

    #[tokio::test]
    async fn test_no_bearer_without_token() {
        let transport =
            ScriptedTransport::new(|_| Reply::Now(HttpResponse::json(200, &envelope(json!(null)))));
        let client = client_with(transport.clone(), Arc::new(MemoryStorage::new()));

        let _: ApiEnvelope<Value> = client.get("/auth/captcha").await.unwrap();
        assert!(transport.requests()[0].bearer.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_expiry_refreshes_once() {
        let transport = renewing_backend(Duration::from_millis(100));
        let storage = Arc::new(MemoryStorage::new());
        let client = client_with(transport.clone(), storage.clone());
        client.session().tokens().set_tokens("a0", "r0", 900).unwrap();
        client.session().restore(None).unwrap();

        let paths = ["/a", "/b", "/c", "/d", "/e"];
        let results = futures_join_all(&client, &paths).await;

        for (path, result) in paths.iter().zip(results) {
            let env = result.unwrap();
            assert_eq!(env.data.unwrap()["path"], *path);
        }
        assert_eq!(transport.count("/auth/refresh"), 1);
        // Five originals plus five retries.
        assert_eq!(transport.requests().len(), 11);
        assert_eq!(storage_value(&storage, StorageKeys::ACCESS_TOKEN), "a1");
        assert_eq!(storage_value(&storage, StorageKeys::REFRESH_TOKEN), "r0");

        let expires_at: i64 = storage_value(&storage, StorageKeys::TOKEN_EXPIRES_AT)
            .parse()
            .unwrap();
        assert!((expires_at - (now_millis() + 900_000)).abs() < 5_000);
        assert!(!client.renewal().is_refreshing());
        assert_eq!(client.session().status(), SessionStatus::Authenticated);
    }

    async fn futures_join_all(
        client: &ApiClient,
        paths: &[&'static str],
    ) -> Vec<AuthResult<ApiEnvelope<Value>>> {
        let handles: Vec<_> = paths
            .iter()
            .map(|path| {
                let path: &'static str = *path;
                let client = client.clone();
                tokio::spawn(async move { client.get::<Value>(path).await })
            })
            .collect();
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    fn storage_value(storage: &MemoryStorage, key: &str) -> String {
        use console_storage::ClientStorage;
        storage.get(key).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_invalid_refresh_forces_logout() {
        let transport = ScriptedTransport::new(|req| match req.path.as_str() {
            "/auth/refresh" => {
                Reply::Now(HttpResponse::json(401, &error_body(401, "invalid refresh token")))
            }
            _ => Reply::Now(unauthorized()),
        });
        let storage = Arc::new(MemoryStorage::new());
        let client = client_with(transport.clone(), storage.clone());
        client.session().tokens().set_tokens("a0", "bad", 900).unwrap();
        client.session().restore(None).unwrap();
        let redirects = Arc::new(AtomicUsize::new(0));
        let counter = redirects.clone();
        client.session().set_redirect_callback(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let err = client.get::<Value>("/users/profile").await.unwrap_err();
        match err {
            AuthError::RenewalFailed(e) => assert_eq!(e.message, "invalid refresh token"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(storage.is_empty());
        assert_eq!(client.session().status(), SessionStatus::Unauthenticated);
        assert_eq!(redirects.load(Ordering::SeqCst), 1);
        assert_eq!(transport.count("/auth/refresh"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_refresh_fails_every_queued_request() {
        let transport = ScriptedTransport::new(|req| match req.path.as_str() {
            "/auth/refresh" => Reply::Delayed(
                Duration::from_millis(100),
                HttpResponse::json(401, &error_body(401, "invalid refresh token")),
            ),
            _ => Reply::Now(unauthorized()),
        });
        let storage = Arc::new(MemoryStorage::new());
        let client = client_with(transport.clone(), storage.clone());
        client.session().tokens().set_tokens("a0", "bad", 900).unwrap();
        client.session().restore(None).unwrap();
        let redirects = Arc::new(AtomicUsize::new(0));
        let counter = redirects.clone();
        client.session().set_redirect_callback(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let results = futures_join_all(&client, &["/a", "/b", "/c", "/d", "/e"]).await;

        for result in results {
            match result {
                Err(AuthError::RenewalFailed(e)) => {
                    assert_eq!(e.code, 401);
                    assert_eq!(e.message, "invalid refresh token");
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
        assert_eq!(transport.count("/auth/refresh"), 1);
        // No retries after a failed renewal.
        assert_eq!(transport.requests().len(), 6);
        assert!(storage.is_empty());
        assert_eq!(client.session().status(), SessionStatus::Unauthenticated);
        assert_eq!(redirects.load(Ordering::SeqCst), 1);
        assert!(!client.renewal().is_refreshing());
    }

    #[tokio::test]
    async fn test_credential_exchange_never_renews() {
        let transport = ScriptedTransport::new(|_| {
            Reply::Now(HttpResponse::json(401, &error_body(401, "invalid credentials")))
        });
        let client = client_with(transport.clone(), Arc::new(MemoryStorage::new()));
        client.session().tokens().set_tokens("a0", "r0", 900).unwrap();

        for path in ["/auth/login", "/auth/register"] {
            let err = client
                .post::<Value, _>(path, &json!({"username": "admin"}))
                .await
                .unwrap_err();
            match err {
                AuthError::Api(e) => {
                    assert_eq!(e.code, 401);
                    assert_eq!(e.message, "invalid credentials");
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
        assert_eq!(transport.count("/auth/refresh"), 0);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_surfaced() {
        let transport = ScriptedTransport::new(|req| match req.path.as_str() {
            "/auth/refresh" => Reply::Now(HttpResponse::json(
                200,
                &envelope(json!({"access_token": "a1", "expires_in": 900})),
            )),
            _ => Reply::Now(unauthorized()),
        });
        let client = client_with(transport.clone(), Arc::new(MemoryStorage::new()));
        client.session().tokens().set_tokens("a0", "r0", 900).unwrap();

        let err = client.get::<Value>("/users/profile").await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(_)));
        assert_eq!(transport.count("/users/profile"), 2);
        assert_eq!(transport.count("/auth/refresh"), 1);
    }

    #[tokio::test]
    async fn test_other_failures_are_normalized() {
        let transport = ScriptedTransport::new(|req| match req.path.as_str() {
            "/boom" => Reply::Now(HttpResponse::new(502, b"<html>bad gateway</html>".to_vec())),
            "/missing" => Reply::Now(HttpResponse::json(
                404,
                &json!({"code": 404, "message": "user not found"}),
            )),
            _ => Reply::Timeout,
        });
        let client = client_with(transport.clone(), Arc::new(MemoryStorage::new()));

        match client.get::<Value>("/boom").await.unwrap_err() {
            AuthError::Api(e) => {
                assert_eq!(e.code, 502);
                assert_eq!(e.message, "Request failed with status code 502");
            }
            other => panic!("unexpected: {:?}", other),
        }
        match client.get::<Value>("/missing").await.unwrap_err() {
            AuthError::Api(e) => assert_eq!(e.message, "user not found"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            client.get::<Value>("/slow").await.unwrap_err(),
            AuthError::Timeout
        ));
        // Nothing was retried.
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_without_renewal_surfaces_unauthorized() {
        let transport = ScriptedTransport::new(|_| Reply::Now(unauthorized()));
        let client = client_with(transport.clone(), Arc::new(MemoryStorage::new()));
        client.session().tokens().set_tokens("a0", "r0", 900).unwrap();

        let err = client
            .execute::<Value>(HttpRequest::post("/auth/logout").without_renewal())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(_)));
        assert_eq!(transport.count("/auth/refresh"), 0);
    }

    #[tokio::test]
    async fn test_empty_success_body() {
        let transport = ScriptedTransport::new(|_| Reply::Now(HttpResponse::new(204, Vec::new())));
        let client = client_with(transport, Arc::new(MemoryStorage::new()));

        let env: ApiEnvelope<Value> = client.delete("/users/3").await.unwrap();
        assert_eq!(env.code, 204);
        assert!(env.data.is_none());
    }

    #[tokio::test]
    async fn test_query_is_forwarded() {
        let transport =
            ScriptedTransport::new(|_| Reply::Now(HttpResponse::json(200, &envelope(json!([])))));
        let client = client_with(transport.clone(), Arc::new(MemoryStorage::new()));

        let _: ApiEnvelope<Value> = client
            .get_with_query("/users", &[("page", "2"), ("page_size", "20")])
            .await
            .unwrap();
        let sent = &transport.requests()[0];
        assert_eq!(
            sent.query,
            vec![
                ("page".to_string(), "2".to_string()),
                ("page_size".to_string(), "20".to_string())
            ]
        );
    }
}
