//! HTTP surface driven in-process through the router.

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use trellis_core::Tracker;
use trellis_core::auth::{StaticTokenAuthenticator, token_digest};
use trellis_core::blob::FsBlobStore;
use trellis_core::config::{NotificationConfig, TokenConfig};
use trellis_core::db;
use trellis_core::model::project::Role;
use trellis_core::notify::LiveChannel;
use trellis_server::{AppState, LiveRegistry, build_router};

const ADMIN: &str = "admin-token";
const MANAGER: &str = "manager-token";
const ALICE: &str = "alice-token";
const BOB: &str = "bob-token";

struct Harness {
    app: Router,
    state: AppState,
    _blobs: TempDir,
}

fn token(raw: &str, user_id: i64, role: Role) -> TokenConfig {
    TokenConfig {
        token_blake3: token_digest(raw),
        user_id,
        role,
    }
}

fn harness() -> Harness {
    let blobs = TempDir::new().expect("tempdir");
    let live = Arc::new(LiveRegistry::new());
    let tracker = Tracker::new(db::open_in_memory().expect("store"))
        .with_live(Arc::clone(&live) as Arc<dyn LiveChannel>)
        .with_blobs(
            Arc::new(FsBlobStore::open(blobs.path()).expect("blob root")),
            64,
        );
    let auth = StaticTokenAuthenticator::new(&[
        token(ADMIN, 1_000, Role::Admin),
        token(MANAGER, 1, Role::Manager),
        token(ALICE, 2, Role::Member),
        token(BOB, 3, Role::Member),
    ]);
    let state = AppState {
        tracker: Arc::new(Mutex::new(tracker)),
        auth: Arc::new(auth),
        live,
        notifications: NotificationConfig::default(),
        max_attachment_bytes: 64,
    };
    Harness {
        app: build_router(state.clone()),
        state,
        _blobs: blobs,
    }
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(value) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&value).expect("encode body"))
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(request.body(body).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

/// Users 1..=3 (manager, alice, bob) and project 1 managed by user 1.
async fn seeded() -> Harness {
    let h = harness();
    for (name, role) in [("Mara", "manager"), ("Alice", "member"), ("Bob", "member")] {
        let (status, _) = call(
            &h.app,
            Method::POST,
            "/users",
            Some(ADMIN),
            Some(json!({
                "name": name,
                "email": format!("{}@example.com", name.to_lowercase()),
                "role": role,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, project) = call(
        &h.app,
        Method::POST,
        "/projects",
        Some(MANAGER),
        Some(json!({ "name": "Apollo", "managerId": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(project["id"], 1);
    h
}

async fn create_task(h: &Harness, body: Value) -> i64 {
    let (status, task) = call(
        &h.app,
        Method::POST,
        "/projects/1/tasks",
        Some(MANAGER),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{task}");
    task["id"].as_i64().expect("task id")
}

#[tokio::test]
async fn health_needs_no_credential() {
    let h = harness();
    let (status, body) = call(&h.app, Method::GET, "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_or_unknown_tokens_are_unauthorized() {
    let h = seeded().await;
    for token in [None, Some("not-a-token")] {
        let (status, body) = call(&h.app, Method::GET, "/projects/1", token, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "E4001");
    }
}

#[tokio::test]
async fn malformed_path_ids_use_the_error_envelope() {
    let h = seeded().await;
    for uri in ["/tasks/abc", "/projects/1/phases/first", "/projects/1.5"] {
        let (status, body) = call(&h.app, Method::GET, uri, Some(MANAGER), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "E2001");
    }
}

#[tokio::test]
async fn archive_is_blocked_while_assigned() {
    let h = seeded().await;
    let task_id = create_task(&h, json!({ "title": "Design", "assigneeId": 2 })).await;
    let uri = format!("/projects/1/tasks/{task_id}");

    let (status, body) = call(&h.app, Method::DELETE, &uri, Some(MANAGER), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "E3004");
    assert_eq!(body["hint"], "Unassign the task before archiving it.");

    let (status, _) = call(
        &h.app,
        Method::PATCH,
        &format!("/tasks/{task_id}/unassign"),
        Some(MANAGER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, task) = call(&h.app, Method::DELETE, &uri, Some(MANAGER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["isArchived"], true);

    let (status, _) = call(
        &h.app,
        Method::PATCH,
        &format!("/tasks/{task_id}/unassign"),
        Some(MANAGER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_diff_lands_in_history() {
    let h = seeded().await;
    let task_id = create_task(&h, json!({ "title": "Design" })).await;
    let uri = format!("/projects/1/tasks/{task_id}");

    let (status, task) = call(
        &h.app,
        Method::PUT,
        &uri,
        Some(MANAGER),
        Some(json!({ "status": "in progress", "priority": "high" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["status"], "in progress");

    let (_, view) = call(
        &h.app,
        Method::GET,
        &format!("/tasks/{task_id}"),
        Some(ALICE),
        None,
    )
    .await;
    let history = view["history"].as_array().expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["action"], "Task Updated");
    assert_eq!(history[1]["changes"][0]["field"], "status");
    assert_eq!(history[1]["changes"][0]["old"], "open");

    let (status, body) = call(
        &h.app,
        Method::PUT,
        &uri,
        Some(MANAGER),
        Some(json!({ "status": "blocked" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn phase_routes_use_success_envelope() {
    let h = seeded().await;
    let task_id = create_task(&h, json!({ "title": "Charter" })).await;

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/projects/1/phases",
        Some(MANAGER),
        Some(json!({ "name": "Kickoff", "startDate": "2024-02-01", "endDate": "2024-01-01" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "E2003");

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/projects/1/phases",
        Some(MANAGER),
        Some(json!({ "name": "Kickoff", "startDate": "2024-01-01", "endDate": "2024-01-31" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["phase"]["assignedTasks"], json!([]));
    let phase_id = body["phase"]["id"].as_i64().expect("phase id");

    let member_uri = format!("/projects/1/phases/{phase_id}/tasks/{task_id}");
    let (status, _) = call(&h.app, Method::POST, &member_uri, Some(ALICE), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = call(&h.app, Method::POST, &member_uri, Some(MANAGER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["phaseId"], phase_id);

    let (status, body) = call(
        &h.app,
        Method::POST,
        &format!("/projects/1/phases/{phase_id}/milestones"),
        Some(MANAGER),
        Some(json!({ "title": "Signed off", "progress": 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["milestone"]["completed"], true);

    let (_, body) = call(
        &h.app,
        Method::GET,
        &format!("/projects/1/phases/{phase_id}"),
        Some(MANAGER),
        None,
    )
    .await;
    assert_eq!(body["phase"]["taskCount"], 1);
    assert_eq!(body["phase"]["milestoneProgress"], 100.0);

    let (status, body) = call(
        &h.app,
        Method::DELETE,
        &format!("/projects/1/phases/{phase_id}?deleteTasks=true"),
        Some(MANAGER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["deletion"]["archivedTasks"], json!([task_id]));
    assert_eq!(body["deletion"]["deletedMilestones"], 1);

    let (_, project) = call(&h.app, Method::GET, "/projects/1", Some(MANAGER), None).await;
    assert_eq!(project["phases"], json!([]));
}

#[tokio::test]
async fn assignment_pushes_to_the_live_room_and_inbox() {
    let h = seeded().await;
    let mut alice_socket = h.state.live.join(2);
    let task_id = create_task(&h, json!({ "title": "Design" })).await;

    let (status, _) = call(
        &h.app,
        Method::PATCH,
        &format!("/tasks/{task_id}/assign"),
        Some(MANAGER),
        Some(json!({ "userId": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let frame: Value =
        serde_json::from_str(&alice_socket.rx.try_recv().expect("live frame")).expect("json frame");
    assert_eq!(frame["event"], "notification");
    assert_eq!(frame["data"]["kind"], "task_assigned");

    let (status, page) = call(
        &h.app,
        Method::GET,
        "/notifications/user/2?page=1&limit=5",
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["unread"], 1);
    let notification_id = page["notifications"][0]["id"].as_i64().expect("id");

    let (status, _) = call(&h.app, Method::GET, "/notifications/user/2", Some(BOB), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, read) = call(
        &h.app,
        Method::PATCH,
        &format!("/notifications/markAsRead/{notification_id}/read"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["isRead"], true);
}

#[tokio::test]
async fn join_request_approval_assigns_the_requester() {
    let h = seeded().await;
    let task_id = create_task(&h, json!({ "title": "Design" })).await;

    let (status, request) = call(
        &h.app,
        Method::POST,
        &format!("/tasks/{task_id}/requests"),
        Some(BOB),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(request["status"], "pending");
    let request_uri = format!("/tasks/{task_id}/requests/{}", request["id"]);

    let (status, _) = call(
        &h.app,
        Method::POST,
        &format!("/tasks/{task_id}/requests"),
        Some(BOB),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, decided) = call(
        &h.app,
        Method::PATCH,
        &request_uri,
        Some(MANAGER),
        Some(json!({ "decision": "approved" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decided["status"], "approved");

    let (_, view) = call(&h.app, Method::GET, &format!("/tasks/{task_id}"), Some(BOB), None).await;
    assert_eq!(view["assigneeId"], 3);

    let (status, body) = call(
        &h.app,
        Method::PATCH,
        &request_uri,
        Some(MANAGER),
        Some(json!({ "decision": "rejected" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "E3003");
    assert!(body.get("hint").is_none());
}

#[tokio::test]
async fn attachments_upload_download_and_size_limit() {
    let h = seeded().await;
    let task_id = create_task(&h, json!({ "title": "Design" })).await;
    let upload = |bytes: &'static [u8]| {
        Request::builder()
            .method(Method::POST)
            .uri(format!("/tasks/{task_id}/attachments?fileName=notes.txt"))
            .header(header::AUTHORIZATION, format!("Bearer {ALICE}"))
            .body(Body::from(bytes))
            .expect("request")
    };

    let response = h.app.clone().oneshot(upload(b"kickoff notes")).await.expect("upload");
    assert_eq!(response.status(), StatusCode::CREATED);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let attachment: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(attachment["fileName"], "notes.txt");
    assert_eq!(attachment["sizeBytes"], 13);

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/attachments/{}", attachment["id"]))
                .header(header::AUTHORIZATION, format!("Bearer {ALICE}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("download");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"notes.txt\""
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(&bytes[..], b"kickoff notes");

    let oversized: &'static [u8] = &[b'x'; 65];
    let response = h.app.clone().oneshot(upload(oversized)).await.expect("upload");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (_, list) = call(
        &h.app,
        Method::GET,
        &format!("/tasks/{task_id}/attachments"),
        Some(ALICE),
        None,
    )
    .await;
    assert_eq!(list.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn request_id_is_propagated() {
    let h = harness();
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .header("x-request-id", "abc-123")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.headers()["x-request-id"], "abc-123");

    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert!(response.headers().contains_key("x-request-id"));
}
