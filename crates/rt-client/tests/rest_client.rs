//! RestClient against an in-process mock RT.

use axum::Form;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use rt_client::{RestClient, RtError, Ticket, TicketClient};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Received {
    contents: Arc<Mutex<Vec<String>>>,
}

async fn serve(state: Received) -> SocketAddr {
    async fn record(
        state: &Received,
        query: &HashMap<String, String>,
        form: HashMap<String, String>,
    ) {
        assert_eq!(query.get("user").map(String::as_str), Some("apiuser"));
        assert_eq!(query.get("pass").map(String::as_str), Some("secret"));
        let content = form.get("content").cloned().unwrap_or_default();
        state.contents.lock().unwrap().push(content);
    }

    let router = Router::new()
        .route(
            "/REST/1.0/ticket/new",
            post(
                |State(state): State<Received>,
                 Query(query): Query<HashMap<String, String>>,
                 Form(form): Form<HashMap<String, String>>| async move {
                    record(&state, &query, form).await;
                    "RT/4.4.4 200 Ok\n\n# Ticket 7 created.\n"
                },
            ),
        )
        .route(
            "/REST/1.0/ticket/{id}",
            get(
                |Path(id): Path<i64>, Query(query): Query<HashMap<String, String>>| async move {
                    assert_eq!(query.get("user").map(String::as_str), Some("apiuser"));
                    if id == 7 {
                        "RT/4.4.4 200 Ok\n\nid: ticket/7\nQueue: general\nOwner: Nobody\nStatus: new\nSubject: Host: web-01 is CRITICAL\n".to_owned()
                    } else {
                        format!("RT/4.4.4 200 Ok\n\n# Ticket {id} does not exist.\n")
                    }
                },
            ),
        )
        .route(
            "/REST/1.0/ticket/{id}/edit",
            post(
                |Path(id): Path<i64>,
                 State(state): State<Received>,
                 Query(query): Query<HashMap<String, String>>,
                 Form(form): Form<HashMap<String, String>>| async move {
                    record(&state, &query, form).await;
                    format!("RT/4.4.4 200 Ok\n\n# Ticket {id} updated.\n")
                },
            ),
        )
        .route(
            "/REST/1.0/ticket/{id}/comment",
            post(
                |Path(id): Path<i64>,
                 State(state): State<Received>,
                 Query(query): Query<HashMap<String, String>>,
                 Form(form): Form<HashMap<String, String>>| async move {
                    record(&state, &query, form).await;
                    format!("RT/4.4.4 200 Ok\n\n# Ticket {id} commented.\n")
                },
            ),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock rt");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("mock rt error");
    });
    addr
}

fn client_for(addr: SocketAddr) -> RestClient {
    RestClient::new(&format!("http://{addr}"), "apiuser", "secret", false).expect("client")
}

#[tokio::test]
async fn create_posts_draft_and_fetches_assigned_ticket() {
    let received = Received::default();
    let addr = serve(received.clone()).await;

    let draft = Ticket {
        queue: "general".to_owned(),
        subject: "Host: web-01 is CRITICAL".to_owned(),
        text: "Output: connection refused".to_owned(),
        ..Ticket::default()
    };
    let created = client_for(addr).new_ticket(&draft).await.expect("create");

    assert_eq!(created.id, 7);
    assert_eq!(created.queue, "general");
    assert_eq!(created.owner, "Nobody");

    let contents = received.contents.lock().unwrap();
    assert_eq!(contents.len(), 1);
    assert!(contents[0].starts_with("id: new\n"), "got: {:?}", contents[0]);
    assert!(contents[0].contains("Queue: general"));
}

#[tokio::test]
async fn update_posts_partial_patch_to_edit() {
    let received = Received::default();
    let addr = serve(received.clone()).await;

    let patch = Ticket {
        id: 7,
        status: "deleted".to_owned(),
        ..Ticket::default()
    };
    let updated = client_for(addr).update_ticket(&patch).await.expect("update");
    assert_eq!(updated.id, 7);

    let contents = received.contents.lock().unwrap();
    assert_eq!(contents[0], "id: 7\nStatus: deleted");
}

#[tokio::test]
async fn comment_posts_comment_action() {
    let received = Received::default();
    let addr = serve(received.clone()).await;

    client_for(addr)
        .comment_ticket(7, "New status: WARNING Output: slow")
        .await
        .expect("comment");

    let contents = received.contents.lock().unwrap();
    assert_eq!(
        contents[0],
        "id: 7\nAction: comment\nText: New status: WARNING Output: slow"
    );
}

#[tokio::test]
async fn fetching_a_missing_ticket_is_not_found() {
    let addr = serve(Received::default()).await;

    match client_for(addr).ticket(99).await {
        Err(RtError::NotFound) => {}
        other => panic!("expected NotFound, got: {other:?}"),
    }
}
