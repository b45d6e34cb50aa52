//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use serde::{Deserialize, Serialize};
use srmp::client::{ApiClient, ClientError, LoginHandler};
use srmp::codec::Body;
use srmp::error::{codes, ApiError};
use srmp::host::HostOptions;
use srmp::server::{ApiServer, ServerOptions};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct User {
    id: i64,
    name: String,
}

fn init_tracing() {
    drop(
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init(),
    );
}

async fn start_server() -> (Arc<ApiServer>, SocketAddr) {
    init_tracing();
    let server = ApiServer::new(ServerOptions::new("127.0.0.1:0"));
    let manager = server.manager();

    manager.register("user/get", |call| async move {
        let id: i64 = call.params.get("id")?;
        Ok(User {
            id,
            name: format!("user-{id}"),
        })
    });
    manager.register("user/missing", |_call| async move {
        Err::<(), _>(ApiError::not_found("user/missing"))
    });
    manager.register("db/broken", |_call| async move {
        Err::<(), _>(ApiError::internal(
            "SqlException: column secret_salt does not exist",
        ))
    });

    let addr = server.start().await.expect("bind");
    (server, addr)
}

#[tokio::test]
async fn typed_call_roundtrip() {
    let (server, addr) = start_server().await;
    let client = ApiClient::new(addr.to_string());
    client.open().await.unwrap();

    let user: User = client
        .invoke("user/get", &serde_json::json!({ "id": 7 }))
        .await
        .unwrap();
    assert_eq!(
        user,
        User {
            id: 7,
            name: "user-7".into()
        }
    );

    client.close().await;
    server.stop();
}

#[tokio::test]
async fn server_error_is_rethrown_with_code() {
    let (server, addr) = start_server().await;
    let client = ApiClient::new(addr.to_string());
    client.open().await.unwrap();

    let err = client
        .invoke::<()>("user/missing", &())
        .await
        .expect_err("must fail");
    match err {
        ClientError::Api(api) => {
            assert_eq!(api.code, codes::NOT_FOUND);
            assert!(api.message.contains("user/missing"));
        }
        other => panic!("expected api error, got {other:?}"),
    }

    client.close().await;
    server.stop();
}

#[tokio::test]
async fn unknown_action_is_404() {
    let (server, addr) = start_server().await;
    let client = ApiClient::new(addr.to_string());
    client.open().await.unwrap();

    let err = client.invoke::<()>("no/such", &()).await.unwrap_err();
    assert!(matches!(err, ClientError::Api(api) if api.code == codes::NOT_FOUND));

    client.close().await;
    server.stop();
}

#[tokio::test]
async fn database_errors_are_redacted() {
    let (server, addr) = start_server().await;
    let client = ApiClient::new(addr.to_string());
    client.open().await.unwrap();

    let err = client.invoke::<()>("db/broken", &()).await.unwrap_err();
    match err {
        ClientError::Api(api) => {
            assert_eq!(api.code, codes::INTERNAL_SERVER_ERROR);
            assert_eq!(api.message, "database error");
            assert!(!api.message.contains("secret_salt"));
        }
        other => panic!("expected api error, got {other:?}"),
    }

    client.close().await;
    server.stop();
}

#[tokio::test]
async fn oneway_call_reaches_handler() {
    let (server, addr) = start_server().await;
    let hits = Arc::new(AtomicUsize::new(0));
    {
        let hits = Arc::clone(&hits);
        server.manager().register("audit/log", move |_call| {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    }

    let client = ApiClient::new(addr.to_string());
    client.open().await.unwrap();

    let written = client.invoke_oneway("audit/log", &"entry").await.unwrap();
    assert!(written > 0);

    // no reply to wait on, poll for the side effect
    for _ in 0..100 {
        if hits.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    client.close().await;
    server.stop();
}

struct CountingLogin {
    attempts: AtomicUsize,
}

#[async_trait::async_trait]
impl LoginHandler for CountingLogin {
    async fn login(&self, client: &ApiClient) -> Result<(), ClientError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        client.invoke("auth/login", &"secret").await
    }
}

#[tokio::test]
async fn unauthorized_triggers_single_login_retry() {
    let (server, addr) = start_server().await;
    server.manager().register("auth/login", |call| async move {
        call.session.set_token("tok");
        Ok(())
    });
    server.manager().register("secure/data", |call| async move {
        if call.session.is_authenticated() {
            Ok("payload")
        } else {
            Err(ApiError::unauthorized("login required"))
        }
    });

    let login = Arc::new(CountingLogin {
        attempts: AtomicUsize::new(0),
    });
    let client = ApiClient::new(addr.to_string()).with_login_handler(Arc::clone(&login) as Arc<dyn LoginHandler>);
    client.open().await.unwrap();

    let data: String = client.invoke("secure/data", &()).await.unwrap();
    assert_eq!(data, "payload");
    assert_eq!(login.attempts.load(Ordering::SeqCst), 1);

    client.close().await;
    server.stop();
}

#[tokio::test]
async fn persistent_unauthorized_is_not_retried_forever() {
    let (server, addr) = start_server().await;
    server
        .manager()
        .register("auth/login", |_call| async move { Ok(()) });
    server.manager().register("secure/data", |_call| async move {
        Err::<(), _>(ApiError::unauthorized("still no"))
    });

    let login = Arc::new(CountingLogin {
        attempts: AtomicUsize::new(0),
    });
    let client = ApiClient::new(addr.to_string()).with_login_handler(Arc::clone(&login) as Arc<dyn LoginHandler>);
    client.open().await.unwrap();

    let err = client.invoke::<()>("secure/data", &()).await.unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(login.attempts.load(Ordering::SeqCst), 1);

    client.close().await;
    server.stop();
}

#[tokio::test]
async fn push_notifications_reach_client() {
    let (server, addr) = start_server().await;
    let client = ApiClient::new(addr.to_string());
    client.open().await.unwrap();
    let mut notifications = client.take_notifications().expect("first take");

    // force the connection open, then fan out
    let _: Option<User> = client
        .invoke("user/get", &serde_json::json!({ "id": 1 }))
        .await
        .ok();
    let delivered = server.invoke_all("event/refresh", &Body::Raw(b"now".to_vec()));
    assert_eq!(delivered, 1);

    let push = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("push within deadline")
        .expect("channel open");
    assert_eq!(push.action, "event/refresh");
    assert_eq!(push.data.as_deref(), Some(&b"now"[..]));

    client.close().await;
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multiplexed_replies_come_out_of_order() {
    let (server, addr) = start_server().await;
    server.manager().register("pace/slow", |_call| async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok("slow")
    });
    server
        .manager()
        .register("pace/fast", |_call| async move { Ok("fast") });

    let client = Arc::new(ApiClient::new(addr.to_string()));
    client.open().await.unwrap();

    let slow = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.invoke::<String>("pace/slow", &()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = std::time::Instant::now();
    let fast: String = client.invoke("pace/fast", &()).await.unwrap();
    assert_eq!(fast, "fast");
    // the fast reply must not queue behind the slow handler
    assert!(started.elapsed() < Duration::from_millis(200));

    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow, "slow");

    client.close().await;
    server.stop();
}

#[tokio::test]
async fn call_times_out_with_action_context() {
    let (server, addr) = start_server().await;
    server.manager().register("hang/forever", |_call| async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    });

    let client = ApiClient::new(addr.to_string())
        .with_options(HostOptions::new().with_timeout(Duration::from_millis(100)));
    client.open().await.unwrap();

    let err = client.invoke::<()>("hang/forever", &()).await.unwrap_err();
    match err {
        ClientError::Timeout { action, timeout } => {
            assert_eq!(action, "hang/forever");
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    client.close().await;
    server.stop();
}

#[tokio::test]
async fn stats_count_calls_and_errors() {
    let (server, addr) = start_server().await;
    let client = ApiClient::new(addr.to_string());
    client.open().await.unwrap();

    let _: User = client
        .invoke("user/get", &serde_json::json!({ "id": 1 }))
        .await
        .unwrap();
    let _ = client.invoke::<()>("user/missing", &()).await;

    let stats = client.stats();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.errors, 1);

    client.close().await;
    server.stop();
}
