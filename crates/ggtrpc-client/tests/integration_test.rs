//! End-to-end round trips over TCP and the HTTP entry point.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use ggtrpc_client::{dial, dial_http};
use ggtrpc_common::transport::codec::kind;
use ggtrpc_common::Options;
use ggtrpc_server::{Server, Service};

#[derive(Serialize, Deserialize)]
struct SumArgs {
    num1: i32,
    num2: i32,
}

struct Foo;

fn foo_service() -> Service {
    Service::build(Foo)
        .method("Sum", |_foo: Arc<Foo>, args: SumArgs| async move {
            Ok::<_, String>(args.num1 + args.num2)
        })
        .method("Fail", |_foo: Arc<Foo>, _args: i32| async move {
            Err::<i32, _>("boom".to_string())
        })
        .finish()
}

async fn start_server() -> String {
    let server = Arc::new(Server::new());
    server.register(foo_service()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server.accept(listener));
    addr
}

async fn start_http_server() -> String {
    let server = Arc::new(Server::new());
    server.register(foo_service()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server.serve_http(listener));
    addr
}

#[tokio::test]
async fn concurrent_calls_share_one_connection() {
    let addr = start_server().await;
    let client = dial(&addr, None).await.unwrap();

    let mut calls = JoinSet::new();
    for i in 0..5i32 {
        let client = client.clone();
        calls.spawn(async move {
            let reply: i32 = client
                .call(
                    "Foo.Sum",
                    &SumArgs {
                        num1: i,
                        num2: i * i,
                    },
                )
                .await
                .unwrap();
            assert_eq!(reply, i + i * i);
        });
    }
    while let Some(result) = calls.join_next().await {
        result.unwrap();
    }
}

#[tokio::test]
async fn go_call_resolves_out_of_order() {
    let addr = start_server().await;
    let client = dial(&addr, None).await.unwrap();

    let first = client
        .go_call::<_, i32>("Foo.Sum", &SumArgs { num1: 1, num2: 1 })
        .await;
    let second = client
        .go_call::<_, i32>("Foo.Sum", &SumArgs { num1: 2, num2: 2 })
        .await;
    assert!(first.seq() < second.seq());
    assert_eq!(first.service_method(), "Foo.Sum");

    // awaiting in reverse order still matches replies to the right calls
    assert_eq!(second.done().await.unwrap(), 4);
    assert_eq!(first.done().await.unwrap(), 2);
}

#[tokio::test]
async fn handler_errors_propagate_verbatim() {
    let addr = start_server().await;
    let client = dial(&addr, None).await.unwrap();
    let err = client.call::<_, i32>("Foo.Fail", &0).await.unwrap_err();
    assert_eq!(err.to_string(), "boom");
}

#[tokio::test]
async fn unknown_method_is_reported() {
    let addr = start_server().await;
    let client = dial(&addr, None).await.unwrap();
    let err = client.call::<_, i32>("Foo.Mul", &0).await.unwrap_err();
    assert!(err.to_string().contains("can't find method Mul"));
}

#[tokio::test]
async fn json_codec_round_trip() {
    let addr = start_server().await;
    let client = dial(
        &addr,
        Some(Options {
            codec_type: kind::JSON.to_string(),
            ..Options::default()
        }),
    )
    .await
    .unwrap();
    let reply: i32 = client
        .call("Foo.Sum", &SumArgs { num1: 2, num2: 3 })
        .await
        .unwrap();
    assert_eq!(reply, 5);
}

#[tokio::test]
async fn default_server_free_functions() {
    // the default server is process-wide, so the service gets a name no
    // other test registers
    let service = Service::build(Foo)
        .name("DefaultFoo")
        .method("Sum", |_foo: Arc<Foo>, args: SumArgs| async move {
            Ok::<_, String>(args.num1 + args.num2)
        })
        .finish();
    ggtrpc_server::register(service).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(ggtrpc_server::accept(listener));

    let client = dial(&addr, None).await.unwrap();
    let reply: i32 = client
        .call("DefaultFoo.Sum", &SumArgs { num1: 2, num2: 2 })
        .await
        .unwrap();
    assert_eq!(reply, 4);
}

#[tokio::test]
async fn http_connect_upgrade_round_trip() {
    let addr = start_http_server().await;
    let client = dial_http(&addr, None).await.unwrap();
    let reply: i32 = client
        .call("Foo.Sum", &SumArgs { num1: 4, num2: 5 })
        .await
        .unwrap();
    assert_eq!(reply, 9);
}

#[tokio::test]
async fn debug_page_lists_method_calls() {
    let addr = start_http_server().await;
    let client = dial_http(&addr, None).await.unwrap();
    let _: i32 = client
        .call("Foo.Sum", &SumArgs { num1: 1, num2: 2 })
        .await
        .unwrap();

    let mut conn = TcpStream::connect(&addr).await.unwrap();
    conn.write_all(b"GET /_ggt-rpc_/debug HTTP/1.0\r\n\r\n")
        .await
        .unwrap();
    let mut page = String::new();
    conn.read_to_string(&mut page).await.unwrap();
    assert!(page.contains("200 OK"));
    assert!(page.contains("Foo.Sum: 1 calls"));
}

#[tokio::test]
async fn non_connect_requests_are_rejected() {
    let addr = start_http_server().await;
    let mut conn = TcpStream::connect(&addr).await.unwrap();
    conn.write_all(b"GET /_ggt-rpc_ HTTP/1.0\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    conn.read_to_string(&mut response).await.unwrap();
    assert!(response.contains("405"));
    assert!(response.contains("must CONNECT"));
}
