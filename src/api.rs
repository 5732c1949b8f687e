//! REST API Server for the budget ledger
//!
//! Exposes the ledger, the identity provider and the chat assistant via HTTP.
//! Every ledger and chat route sits behind one bearer-token layer; only
//! health, register and login are public.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::assistant::Assistant;
use crate::auth::{AuthService, Identity, LoginResponse};
use crate::currency::Currency;
use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::models::{Budget, BudgetContext, BudgetView, Comment, CommentView, PublicUser};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct BudgetQuery {
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExpenseRequest {
    pub department: String,
    pub amount: f64,
    pub vendor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRequest {
    pub text: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub context: Option<Vec<BudgetContext>>,
}

/// =============================
/// Response Models
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: PublicUser,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub timestamp: String,
}

impl ErrorBody {
    pub fn new(message: String) -> Self {
        Self {
            message,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// Error Mapping
/// =============================

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = match &self {
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LedgerError::Conflict(_) => StatusCode::CONFLICT,
            LedgerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if self.is_internal() {
            error!("Request failed: {}", self);
        }

        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

impl From<JsonRejection> for LedgerError {
    fn from(rejection: JsonRejection) -> Self {
        LedgerError::InvalidInput(rejection.body_text())
    }
}

type ApiResult<T> = std::result::Result<T, LedgerError>;

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub ledger: Arc<Ledger>,
    pub auth: Arc<AuthService>,
    pub assistant: Arc<dyn Assistant>,
}

impl ApiState {
    pub fn new(ledger: Arc<Ledger>, auth: Arc<AuthService>, assistant: Arc<dyn Assistant>) -> Self {
        Self {
            ledger,
            auth,
            assistant,
        }
    }
}

/// =============================
/// Helpers
/// =============================

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// A malformed id can never name a budget
fn parse_budget_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| LedgerError::NotFound(format!("Budget not found: {}", raw)))
}

/// =============================
/// Bearer Gate
/// =============================

async fn require_bearer(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> ApiResult<Response> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| LedgerError::Unauthorized("Missing bearer token".to_string()))?;

    let identity = state.auth.authenticate(token).await?;
    debug!(user = %identity.username, path = %request.uri().path(), "Request authenticated");
    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Ledger Endpoints
/// =============================

async fn list_budgets(
    State(state): State<ApiState>,
    Query(query): Query<BudgetQuery>,
) -> ApiResult<Json<Vec<BudgetView>>> {
    let currency = match query.currency.as_deref() {
        Some(code) => code.parse::<Currency>()?,
        None => Currency::default(),
    };

    Ok(Json(state.ledger.list_budgets(currency).await?))
}

async fn post_expense(
    State(state): State<ApiState>,
    payload: Result<Json<ExpenseRequest>, JsonRejection>,
) -> ApiResult<Json<Budget>> {
    let Json(req) = payload?;

    let budget = state
        .ledger
        .post_expense(&req.department, req.amount, req.vendor.as_deref())
        .await?;

    Ok(Json(budget))
}

async fn list_anomalies(State(state): State<ApiState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.ledger.list_anomalies().await?))
}

async fn add_comment(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Path(budget_id): Path<String>,
    payload: Result<Json<CommentRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Comment>)> {
    let Json(req) = payload?;
    let budget_id = parse_budget_id(&budget_id)?;

    if let Some(claimed) = req.user_id.as_deref() {
        if Uuid::parse_str(claimed).ok() != Some(identity.user_id) {
            return Err(LedgerError::Unauthorized(
                "userId does not match the authenticated user".to_string(),
            ));
        }
    }

    let comment = state
        .ledger
        .add_comment(budget_id, &req.text, identity.user_id)
        .await?;

    Ok((StatusCode::CREATED, Json(comment)))
}

async fn list_comments(
    State(state): State<ApiState>,
    Path(budget_id): Path<String>,
) -> ApiResult<Json<Vec<CommentView>>> {
    let budget_id = parse_budget_id(&budget_id)?;
    Ok(Json(state.ledger.list_comments(budget_id).await?))
}

async fn search(
    State(state): State<ApiState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<Budget>>> {
    let q = query.q.unwrap_or_default();
    Ok(Json(state.ledger.search(&q).await?))
}

/// =============================
/// Identity Endpoints
/// =============================

async fn register(
    State(state): State<ApiState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let Json(req) = payload?;

    let user = state
        .auth
        .register(&req.username, &req.email, &req.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            user,
        }),
    ))
}

async fn login(
    State(state): State<ApiState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<LoginResponse>> {
    let Json(req) = payload?;
    Ok(Json(state.auth.login(&req.email, &req.password).await?))
}

async fn logout(State(state): State<ApiState>, headers: HeaderMap) -> StatusCode {
    if let Some(token) = bearer_token(&headers) {
        state.auth.logout(token).await;
    }
    StatusCode::NO_CONTENT
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chatbot(
    State(state): State<ApiState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatResponse>> {
    let Json(req) = payload?;

    if req.message.trim().is_empty() {
        return Err(LedgerError::InvalidInput("Message cannot be empty".to_string()));
    }

    let context = match req.context {
        Some(context) => context,
        None => state
            .ledger
            .search("")
            .await?
            .iter()
            .map(BudgetContext::from)
            .collect(),
    };

    info!(departments = context.len(), "Chat request");
    let reply = state.assistant.reply(&req.message, &context).await?;

    Ok(Json(ChatResponse { reply }))
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/api/budget", get(list_budgets))
        .route("/api/expense", post(post_expense))
        .route("/api/anomalies", get(list_anomalies))
        .route(
            "/api/budgets/:id/comments",
            get(list_comments).post(add_comment),
        )
        .route("/api/transactions/search", get(search))
        .route("/api/chatbot", post(chatbot))
        .route("/api/logout", post(logout))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(health))
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStore;
    use axum::body::Body;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    /// Replies with a fixed string and remembers how much context it saw
    struct CannedAssistant {
        seen_context: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Assistant for CannedAssistant {
        async fn reply(&self, message: &str, context: &[BudgetContext]) -> crate::Result<String> {
            self.seen_context.store(context.len(), Ordering::SeqCst);
            Ok(format!("echo: {}", message))
        }
    }

    struct FailingAssistant;

    #[async_trait::async_trait]
    impl Assistant for FailingAssistant {
        async fn reply(&self, _message: &str, _context: &[BudgetContext]) -> crate::Result<String> {
            Err(LedgerError::Upstream("provider unavailable".to_string()))
        }
    }

    async fn app_with(assistant: Arc<dyn Assistant>) -> Router {
        let store = Arc::new(InMemoryStore::new());
        let ledger = Arc::new(Ledger::new(store.clone()));
        ledger.create_budget("Marketing", 5000.0, 2200.0).await.unwrap();
        ledger.create_budget("Sports", 15000.0, 18000.0).await.unwrap();
        let auth = Arc::new(AuthService::new(store, chrono::Duration::hours(1)));

        create_router(ApiState::new(ledger, auth, assistant))
    }

    async fn app() -> Router {
        app_with(Arc::new(CannedAssistant {
            seen_context: AtomicUsize::new(0),
        }))
        .await
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Register and log in a user; returns (token, user id)
    async fn login_as(app: &Router, email: &str) -> (String, String) {
        let (status, _) = send(
            app,
            "POST",
            "/api/register",
            None,
            Some(json!({"username": "asha", "email": email, "password": "hunter22"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            app,
            "POST",
            "/api/login",
            None,
            Some(json!({"email": email, "password": "hunter22"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        (
            body["token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    fn budget_id(budgets: &Value, department: &str) -> String {
        budgets
            .as_array()
            .unwrap()
            .iter()
            .find(|b| b["department"] == department)
            .unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ledger_routes_require_token() {
        let app = app().await;

        for (method, uri) in [
            ("GET", "/api/budget"),
            ("GET", "/api/anomalies"),
            ("GET", "/api/transactions/search?q=a"),
            ("POST", "/api/expense"),
            ("POST", "/api/chatbot"),
        ] {
            let (status, body) = send(&app, method, uri, None, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{} {}", method, uri);
            assert!(body["message"].is_string());
        }

        let (status, _) = send(&app, "GET", "/api/budget", Some("forged"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_list_budgets_and_currency() {
        let app = app().await;
        let (token, _) = login_as(&app, "asha@example.com").await;

        let (status, body) = send(&app, "GET", "/api/budget", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let budgets = body.as_array().unwrap();
        assert_eq!(budgets.len(), 2);
        assert_eq!(budgets[0]["department"], "Marketing");
        assert_eq!(budgets[0]["currency"], "INR");
        assert_eq!(budgets[1]["overBudget"], true);

        let (status, body) =
            send(&app, "GET", "/api/budget?currency=usd", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["currency"], "USD");
        assert_eq!(body[0]["allocated"], 60.24);

        let (status, _) = send(&app, "GET", "/api/budget?currency=EUR", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_post_expense() {
        let app = app().await;
        let (token, _) = login_as(&app, "asha@example.com").await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/expense",
            Some(&token),
            Some(json!({"department": "Marketing", "amount": 500, "vendor": "Acme"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["spent"], 2700.0);
        assert_eq!(body["vendor"], "Acme");

        let (status, _) = send(
            &app,
            "POST",
            "/api/expense",
            Some(&token),
            Some(json!({"department": "Payroll", "amount": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            "POST",
            "/api/expense",
            Some(&token),
            Some(json!({"department": "Marketing", "amount": -5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/api/expense",
            Some(&token),
            Some(json!({"department": "Marketing", "amount": "lots"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_anomalies() {
        let app = app().await;
        let (token, _) = login_as(&app, "asha@example.com").await;

        let (status, body) = send(&app, "GET", "/api/anomalies", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let alerts = body.as_array().unwrap();
        assert_eq!(alerts.len(), 1);
        let alert = alerts[0].as_str().unwrap();
        assert!(alert.contains("Sports") && alert.contains("15000") && alert.contains("18000"));
    }

    #[tokio::test]
    async fn test_comment_flow() {
        let app = app().await;
        let (token, user_id) = login_as(&app, "asha@example.com").await;
        let (_, budgets) = send(&app, "GET", "/api/budget", Some(&token), None).await;
        let sports = budget_id(&budgets, "Sports");
        let uri = format!("/api/budgets/{}/comments", sports);

        let (status, body) = send(
            &app,
            "POST",
            &uri,
            Some(&token),
            Some(json!({"text": "Why the overrun?", "userId": user_id})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["authorId"], user_id.as_str());
        assert_eq!(body["budgetId"], sports.as_str());

        let (status, body) = send(&app, "GET", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["text"], "Why the overrun?");
        assert_eq!(body[0]["user"]["username"], "asha");

        let (_, budgets) = send(&app, "GET", "/api/budget", Some(&token), None).await;
        assert_eq!(budgets[1]["comments"][0]["user"]["username"], "asha");
    }

    #[tokio::test]
    async fn test_comment_failures() {
        let app = app().await;
        let (token, _) = login_as(&app, "asha@example.com").await;
        let (_, budgets) = send(&app, "GET", "/api/budget", Some(&token), None).await;
        let uri = format!("/api/budgets/{}/comments", budget_id(&budgets, "Sports"));

        let (status, _) =
            send(&app, "POST", &uri, Some(&token), Some(json!({"text": "   "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            &uri,
            Some(&token),
            Some(json!({"text": "hi", "userId": Uuid::new_v4().to_string()})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let missing = format!("/api/budgets/{}/comments", Uuid::new_v4());
        let (status, _) =
            send(&app, "POST", &missing, Some(&token), Some(json!({"text": "hi"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            "GET",
            "/api/budgets/not-a-uuid/comments",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(&app, "GET", &uri, Some(&token), None).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search() {
        let app = app().await;
        let (token, _) = login_as(&app, "asha@example.com").await;

        send(
            &app,
            "POST",
            "/api/expense",
            Some(&token),
            Some(json!({"department": "Sports", "amount": 10, "vendor": "Acme Turf"})),
        )
        .await;

        let (status, body) = send(
            &app,
            "GET",
            "/api/transactions/search?q=ACME",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["department"], "Sports");

        let (_, body) = send(&app, "GET", "/api/transactions/search?q=", Some(&token), None).await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (_, body) = send(&app, "GET", "/api/transactions/search", Some(&token), None).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_register_and_login_failures() {
        let app = app().await;
        login_as(&app, "asha@example.com").await;

        let (status, _) = send(
            &app,
            "POST",
            "/api/register",
            None,
            Some(json!({"username": "again", "email": "asha@example.com", "password": "hunter22"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            "POST",
            "/api/login",
            None,
            Some(json!({"email": "asha@example.com", "password": "wrong-one"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, "POST", "/api/login", None, Some(json!({"email": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_logout_invalidates_token() {
        let app = app().await;
        let (token, _) = login_as(&app, "asha@example.com").await;

        let (status, _) = send(&app, "POST", "/api/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, "GET", "/api/budget", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_chatbot_uses_ledger_context_by_default() {
        let assistant = Arc::new(CannedAssistant {
            seen_context: AtomicUsize::new(0),
        });
        let app = app_with(assistant.clone()).await;
        let (token, _) = login_as(&app, "asha@example.com").await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/chatbot",
            Some(&token),
            Some(json!({"message": "Who is over budget?"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], "echo: Who is over budget?");
        assert_eq!(assistant.seen_context.load(Ordering::SeqCst), 2);

        let (status, _) = send(
            &app,
            "POST",
            "/api/chatbot",
            Some(&token),
            Some(json!({
                "message": "And now?",
                "context": [{"department": "Sports", "allocated": 1, "spent": 2}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(assistant.seen_context.load(Ordering::SeqCst), 1);

        let (status, _) = send(
            &app,
            "POST",
            "/api/chatbot",
            Some(&token),
            Some(json!({"message": " "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chatbot_upstream_failure_is_500() {
        let app = app_with(Arc::new(FailingAssistant)).await;
        let (token, _) = login_as(&app, "asha@example.com").await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/chatbot",
            Some(&token),
            Some(json!({"message": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["message"].as_str().unwrap().contains("provider unavailable"));
    }
}
