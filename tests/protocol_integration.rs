//! End-to-end tests against the in-process fake server (`tests/common`),
//! covering the literal scenarios from spec §8.

mod common;

use common::Step;
use reql_core::connection::{ConnectOpts, QueryResult, RunOpts};
use reql_core::error::Error;
use reql_core::term::{expr, Term};
use reql_core::Connection;
use serde_json::json;

const USER: &str = "admin";
const PASSWORD: &str = "hunter2";

#[tokio::test]
async fn scenario_a_add_runs_end_to_end() {
    let _ = env_logger::try_init();
    let server = common::spawn(USER, PASSWORD, vec![Step::Reply(json!({ "t": 1, "r": [3] }))]).await;
    let conn = Connection::connect(ConnectOpts::new(server.addr.ip().to_string(), server.addr.port(), USER, PASSWORD))
        .await
        .unwrap();

    let term = expr(1i64).add(2i64);
    match term.run(&conn, RunOpts::new()).await.unwrap() {
        Some(QueryResult::Atom(datum)) => assert_eq!(datum.as_i64(), Some(3)),
        other => panic!("expected SUCCESS_ATOM, got {}", describe(&other)),
    }
}

#[tokio::test]
async fn scenario_c_missing_row_is_null_atom() {
    let _ = env_logger::try_init();
    let server = common::spawn(USER, PASSWORD, vec![Step::Reply(json!({ "t": 1, "r": [null] }))]).await;
    let conn = Connection::connect(ConnectOpts::new(server.addr.ip().to_string(), server.addr.port(), USER, PASSWORD))
        .await
        .unwrap();

    let term = Term::db("test").table("m").get(1i64);
    match term.run(&conn, RunOpts::new()).await.unwrap() {
        Some(QueryResult::Atom(datum)) => assert!(datum.is_null()),
        other => panic!("expected SUCCESS_ATOM(null), got {}", describe(&other)),
    }
}

#[tokio::test]
async fn scenario_d_changes_cursor_prefetches_and_closes() {
    let _ = env_logger::try_init();
    let server = common::spawn(
        USER,
        PASSWORD,
        vec![
            Step::Reply(json!({ "t": 3, "r": [1, 2] })), // SUCCESS_PARTIAL
            Step::Reply(json!({ "t": 3, "r": [3, 4] })), // SUCCESS_PARTIAL (answers the CONTINUE)
        ],
    )
    .await;
    let conn = Connection::connect(ConnectOpts::new(server.addr.ip().to_string(), server.addr.port(), USER, PASSWORD))
        .await
        .unwrap();

    let term = Term::db("test").table("m").changes();
    let mut cursor = match term.run(&conn, RunOpts::new()).await.unwrap() {
        Some(QueryResult::Sequence(cursor)) => cursor,
        other => panic!("expected SUCCESS_PARTIAL cursor, got {}", describe(&other)),
    };

    assert_eq!(cursor.next().await.unwrap().as_i64(), Some(1));
    // Draining past the threshold (half of the first batch) triggers the
    // CONTINUE that the fake server answers with the second batch.
    assert_eq!(cursor.next().await.unwrap().as_i64(), Some(2));
    assert_eq!(cursor.next().await.unwrap().as_i64(), Some(3));
    assert_eq!(cursor.next().await.unwrap().as_i64(), Some(4));

    assert!(cursor.has_more(), "changes() cursors never reach end_flag on their own");
    cursor.close().await.unwrap();
    let err = cursor.next().await.unwrap_err();
    assert!(matches!(err, Error::ReqlCursorEmpty));
}

#[tokio::test]
async fn scenario_e_query_after_close_is_driver_error() {
    let _ = env_logger::try_init();
    let server = common::spawn(USER, PASSWORD, vec![]).await;
    let conn = Connection::connect(ConnectOpts::new(server.addr.ip().to_string(), server.addr.port(), USER, PASSWORD))
        .await
        .unwrap();

    conn.close(false).await.unwrap();

    let err = expr(1i64).run(&conn, RunOpts::new()).await.unwrap_err();
    match err {
        Error::DriverError { message } => assert_eq!(message, "Connection is closed"),
        other => panic!("expected DriverError, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_f_wrong_password_is_auth_error() {
    let _ = env_logger::try_init();
    let server = common::spawn_auth_failure().await;
    let result = Connection::connect(ConnectOpts::new(
        server.addr.ip().to_string(),
        server.addr.port(),
        USER,
        "not-the-password",
    ))
    .await;

    assert!(matches!(result, Err(Error::AuthError { .. })));
}

#[tokio::test]
async fn server_info_round_trips() {
    let _ = env_logger::try_init();
    let server = common::spawn(
        USER,
        PASSWORD,
        vec![Step::Reply(json!({
            "t": 5,
            "r": [{ "id": "abc-123", "name": "node-1", "proxy": false }],
        }))],
    )
    .await;
    let conn = Connection::connect(ConnectOpts::new(server.addr.ip().to_string(), server.addr.port(), USER, PASSWORD))
        .await
        .unwrap();

    let info = conn.server().await.unwrap();
    assert_eq!(info.id, "abc-123");
    assert_eq!(info.name.as_deref(), Some("node-1"));
    assert!(!info.proxy);
}

#[tokio::test]
async fn raw_time_format_leaves_tagged_object_undecoded() {
    let _ = env_logger::try_init();
    let server = common::spawn(
        USER,
        PASSWORD,
        vec![Step::Reply(json!({
            "t": 1,
            "r": [{ "$reql_type$": "TIME", "epoch_time": 1_600_000_000.0, "timezone": "+00:00" }],
        }))],
    )
    .await;
    let conn = Connection::connect(ConnectOpts::new(server.addr.ip().to_string(), server.addr.port(), USER, PASSWORD))
        .await
        .unwrap();

    let opts = reql_core::connection::RunOpts::new().time_format(reql_core::term::Format::Raw);
    let term = Term::db("test").table("m").get(1i64);
    match term.run(&conn, opts).await.unwrap() {
        Some(QueryResult::Atom(datum)) => {
            let obj = datum.as_object().expect("raw TIME decodes to a plain object");
            assert_eq!(
                obj.get("$reql_type$").and_then(|d| d.as_str()),
                Some("TIME")
            );
        }
        other => panic!("expected SUCCESS_ATOM, got {}", describe(&other)),
    }
}

#[tokio::test]
async fn raw_time_format_survives_across_continue_batches() {
    let _ = env_logger::try_init();
    let server = common::spawn(
        USER,
        PASSWORD,
        vec![
            Step::Reply(json!({
                "t": 3,
                "r": [{ "$reql_type$": "TIME", "epoch_time": 1.0, "timezone": "+00:00" }],
            })), // SUCCESS_PARTIAL, delivered through the one-shot waiter
            Step::Reply(json!({
                "t": 2,
                "r": [{ "$reql_type$": "TIME", "epoch_time": 2.0, "timezone": "+00:00" }],
            })), // SUCCESS_SEQUENCE, answers the CONTINUE
        ],
    )
    .await;
    let conn = Connection::connect(ConnectOpts::new(server.addr.ip().to_string(), server.addr.port(), USER, PASSWORD))
        .await
        .unwrap();

    let opts = reql_core::connection::RunOpts::new().time_format(reql_core::term::Format::Raw);
    let term = Term::db("test").table("m").changes();
    let mut cursor = match term.run(&conn, opts).await.unwrap() {
        Some(QueryResult::Sequence(cursor)) => cursor,
        other => panic!("expected SUCCESS_PARTIAL cursor, got {}", describe(&other)),
    };

    let first = cursor.next().await.unwrap();
    assert_eq!(
        first.as_object().and_then(|o| o.get("$reql_type$")).and_then(|d| d.as_str()),
        Some("TIME"),
        "first batch (delivered through the Atom waiter) must stay raw"
    );
    let second = cursor.next().await.unwrap();
    assert_eq!(
        second.as_object().and_then(|o| o.get("$reql_type$")).and_then(|d| d.as_str()),
        Some("TIME"),
        "CONTINUE batch must still decode with the format requested at run() time"
    );
}

#[tokio::test]
async fn noreply_query_returns_immediately_and_noreply_wait_still_drains_it() {
    let _ = env_logger::try_init();
    // The `noreply` query itself gets no response frame (the server
    // suppresses it); `noreply_wait` submits its own token and only that
    // one gets a WAIT_COMPLETE reply (spec.md's first Open Question).
    let server = common::spawn(
        USER,
        PASSWORD,
        vec![Step::Swallow, Step::Reply(json!({ "t": 4 }))],
    )
    .await;
    let conn = Connection::connect(ConnectOpts::new(server.addr.ip().to_string(), server.addr.port(), USER, PASSWORD))
        .await
        .unwrap();

    let result = expr(1i64)
        .add(2i64)
        .run(&conn, RunOpts::new().noreply(true))
        .await
        .unwrap();
    assert!(result.is_none(), "a noreply run() resolves immediately with no waiter");

    conn.noreply_wait().await.unwrap();
}

fn describe(result: &Option<QueryResult>) -> &'static str {
    match result {
        Some(QueryResult::Atom(_)) => "Atom",
        Some(QueryResult::Sequence(_)) => "Sequence",
        Some(QueryResult::ServerInfo(_)) => "ServerInfo",
        None => "None",
    }
}
