//! End-to-end tests for the HTTP surface, driven through the router
//! with an in-memory request (no socket).

use std::io::Write;
use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use rd_domain::config::{project_slug, AgentConfig, Config};
use rd_gateway::api;
use rd_gateway::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Fixture {
    _config_dir: tempfile::TempDir,
    sessions_dir: PathBuf,
    state: AppState,
}

fn fixture(agent_bin: &str) -> Fixture {
    let config_dir = tempfile::tempdir().unwrap();
    let project_cwd = PathBuf::from("/tmp");
    let sessions_dir = config_dir
        .path()
        .join("projects")
        .join(project_slug(&project_cwd));
    std::fs::create_dir_all(&sessions_dir).unwrap();

    let config = Config {
        agent: AgentConfig {
            binary: PathBuf::from(agent_bin),
            config_dir: Some(config_dir.path().to_path_buf()),
        },
        project_cwd,
        ..Default::default()
    };
    let state = AppState::new(config);
    Fixture {
        _config_dir: config_dir,
        sessions_dir,
        state,
    }
}

fn user_line(uuid: &str, parent: Option<&str>, text: &str, ts: &str) -> String {
    serde_json::json!({
        "type": "user", "uuid": uuid, "parentUuid": parent, "sessionId": "s1",
        "timestamp": ts, "message": { "role": "user", "content": text },
    })
    .to_string()
}

fn assistant_line(uuid: &str, parent: &str, text: &str, ts: &str) -> String {
    serde_json::json!({
        "type": "assistant", "uuid": uuid, "parentUuid": parent, "sessionId": "s1",
        "timestamp": ts,
        "message": { "role": "assistant", "content": [{"type":"text","text": text}] },
    })
    .to_string()
}

fn write_session(dir: &Path, id: &str, lines: &[String]) {
    let mut file = std::fs::File::create(dir.join(format!("{id}.log"))).unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
}

fn four_turn_session(dir: &Path, id: &str) {
    write_session(
        dir,
        id,
        &[
            user_line("u1", None, "first ask", "2025-01-01T00:00:01Z"),
            assistant_line("a1", "u1", "first answer", "2025-01-01T00:00:02Z"),
            user_line("u2", Some("a1"), "second ask", "2025-01-01T00:00:03Z"),
            assistant_line("a2", "u2", "second answer", "2025-01-01T00:00:04Z"),
        ],
    );
}

async fn get(state: &AppState, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = api::router()
        .with_state(state.clone())
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

async fn post_converse(state: &AppState, body: serde_json::Value) -> String {
    let response = api::router()
        .with_state(state.clone())
        .oneshot(
            Request::post("/api/converse")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "no-cache"
    );
    assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Parse `data: {...}` SSE frames out of a raw body.
fn sse_frames(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|json| serde_json::from_str(json).unwrap())
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Browsing endpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn config_reports_directories() {
    let fx = fixture("claude");
    let (status, body) = get(&fx.state, "/api/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["project_cwd"], "/tmp");
    assert!(body["config_dir"].as_str().unwrap().len() > 1);
}

#[tokio::test]
async fn sessions_list_and_messages() {
    let fx = fixture("claude");
    four_turn_session(&fx.sessions_dir, "s1");

    let (status, body) = get(&fx.state, "/api/sessions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], "s1");
    assert_eq!(body[0]["name"], "first ask");

    let (status, body) = get(&fx.state, "/api/sessions/s1/messages").await;
    assert_eq!(status, StatusCode::OK);
    let messages = body.as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["uuid"], "u1");
    assert_eq!(messages[3]["content"][0]["text"], "second answer");
}

#[tokio::test]
async fn missing_session_is_404_with_detail() {
    let fx = fixture("claude");
    let (status, body) = get(&fx.state, "/api/sessions/ghost/messages").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn leaves_sorted_by_depth() {
    let fx = fixture("claude");
    write_session(
        &fx.sessions_dir,
        "s1",
        &[
            user_line("u1", None, "ask", "t1"),
            assistant_line("a1", "u1", "short", "t2"),
            assistant_line("a2", "u1", "deep", "t3"),
            user_line("u2", Some("a2"), "more", "t4"),
        ],
    );

    let (status, body) = get(&fx.state, "/api/sessions/s1/leaves").await;
    assert_eq!(status, StatusCode::OK);
    let leaves = body.as_array().unwrap();
    assert_eq!(leaves[0]["uuid"], "u2");
    assert_eq!(leaves[0]["is_active"], true);
    assert_eq!(leaves[0]["depth"], 3);
    assert_eq!(leaves[1]["is_active"], false);
}

#[tokio::test]
async fn path_filter_restricts_to_messages() {
    let fx = fixture("claude");
    write_session(
        &fx.sessions_dir,
        "s1",
        &[
            user_line("u1", None, "ask", "t1"),
            serde_json::json!({
                "type": "progress", "uuid": "p1", "parentUuid": "u1",
                "sessionId": "s1", "timestamp": "t2",
            })
            .to_string(),
            assistant_line("a1", "p1", "answer", "t3"),
        ],
    );

    let (_, all) = get(&fx.state, "/api/sessions/s1/path").await;
    assert_eq!(all.as_array().unwrap().len(), 3);

    let (_, filtered) = get(&fx.state, "/api/sessions/s1/path?filter=messages").await;
    assert_eq!(filtered.as_array().unwrap().len(), 2);

    let (_, partial) = get(&fx.state, "/api/sessions/s1/path?leaf=u1").await;
    assert_eq!(partial.as_array().unwrap().len(), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Converse SSE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(unix)]
mod sse {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fake_agent(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("agent.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{body}").unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn happy_converse_streams_text_then_done() {
        let scripts = tempfile::tempdir().unwrap();
        let agent = fake_agent(
            scripts.path(),
            concat!(
                r#"echo '{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}}'"#,
                "\n",
                r#"echo '{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":" there"}}}'"#,
                "\n",
                r#"echo '{"type":"result","session_id":"S1","is_error":false,"duration_ms":120,"total_cost_usd":0.001}'"#,
            ),
        );

        let fx = fixture(agent.to_str().unwrap());
        let body = post_converse(
            &fx.state,
            serde_json::json!({
                "instruction": "say hi",
                "model": "m1",
                "system_prompt": "s",
                "permission_mode": "plan",
            }),
        )
        .await;

        let frames = sse_frames(&body);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0]["text"], "Hi");
        assert_eq!(frames[1]["text"], " there");
        assert_eq!(frames[2]["done"], true);
        assert_eq!(frames[2]["session_id"], "S1");
        assert_eq!(frames[2]["duration_ms"], 120);
    }

    #[tokio::test]
    async fn spawn_failure_is_single_done_error() {
        let fx = fixture("/nonexistent/agent-bin");
        let body = post_converse(
            &fx.state,
            serde_json::json!({
                "instruction": "x", "model": "m", "system_prompt": "s",
            }),
        )
        .await;

        let frames = sse_frames(&body);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["done"], true);
        assert!(frames[0]["error"].as_str().unwrap().contains("agent-bin"));
    }

    #[tokio::test]
    async fn rewind_forks_before_streaming() {
        let scripts = tempfile::tempdir().unwrap();
        let agent = fake_agent(
            scripts.path(),
            r#"echo '{"type":"result","session_id":"S2","is_error":false,"duration_ms":5}'"#,
        );

        let fx = fixture(agent.to_str().unwrap());
        four_turn_session(&fx.sessions_dir, "s1");

        let body = post_converse(
            &fx.state,
            serde_json::json!({
                "instruction": "instead, do X",
                "session_id": "s1",
                "leaf_uuid": "u2",
                "model": "m1",
                "system_prompt": "s",
            }),
        )
        .await;

        let frames = sse_frames(&body);
        assert_eq!(frames.last().unwrap()["done"], true);
        assert_eq!(frames.last().unwrap()["session_id"], "S2");

        // A new forked log exists alongside the original, ending at u2.
        let logs: Vec<_> = std::fs::read_dir(&fx.sessions_dir)
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .collect();
        assert_eq!(logs.len(), 2);
        let forked = logs
            .iter()
            .find(|p| p.file_stem().unwrap() != "s1")
            .unwrap();
        let raw = std::fs::read_to_string(forked).unwrap();
        assert!(raw.contains("\"queue-operation\""));
        assert!(raw.contains("\"u2\""));
        assert!(!raw.contains("\"a2\""));
    }

    #[tokio::test]
    async fn fork_with_unknown_leaf_reports_done_error() {
        let scripts = tempfile::tempdir().unwrap();
        let agent = fake_agent(scripts.path(), "exit 0");
        let fx = fixture(agent.to_str().unwrap());
        four_turn_session(&fx.sessions_dir, "s1");

        let body = post_converse(
            &fx.state,
            serde_json::json!({
                "instruction": "x",
                "session_id": "s1",
                "leaf_uuid": "ghost",
                "model": "m", "system_prompt": "s",
            }),
        )
        .await;

        let frames = sse_frames(&body);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["done"], true);
        assert!(frames[0]["error"].as_str().unwrap().contains("ghost"));
    }
}
