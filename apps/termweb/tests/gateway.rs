//! End-to-end gateway tests over a real listener.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::watch;

use termweb_core::auth::{AuthStore, Role};
use termweb_core::config::Config;
use termweb_core::gateway::{self, AppState};

struct TestServer {
    addr: SocketAddr,
    stop: watch::Sender<bool>,
    _data_dir: tempfile::TempDir,
}

impl TestServer {
    async fn start(prepare: impl FnOnce(&mut AuthStore)) -> Self {
        let data_dir = tempfile::TempDir::new().unwrap();
        let mut auth = AuthStore::load(data_dir.path()).unwrap();
        prepare(&mut auth);

        let config = Config {
            data_dir: data_dir.path().to_path_buf(),
            ..Config::default()
        };
        let state = AppState::new(config, auth);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            let _ = gateway::serve(state, listener, stop_rx).await;
        });

        Self {
            addr,
            stop,
            _data_dir: data_dir,
        }
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

fn signed_token_from(body: &str) -> String {
    let marker = "'?token=' + \"";
    let start = body.find(marker).expect("exchange script present") + marker.len();
    let end = body[start..].find('"').unwrap();
    body[start..start + end].to_string()
}

#[tokio::test]
async fn login_page_without_token() {
    let server = TestServer::start(|_| {}).await;
    let response = client().get(server.url("/")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["cross-origin-resource-policy"],
        "cross-origin"
    );
    assert_eq!(
        response.headers()["cache-control"],
        "no-store, no-cache, must-revalidate, max-age=0"
    );
    let body = response.text().await.unwrap();
    assert!(body.contains("window.TERMWEB_CONFIG"));
}

#[tokio::test]
async fn public_paths_skip_the_gate() {
    let server = TestServer::start(|_| {}).await;
    let response = client()
        .get(server.url("/manifest.json"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/json");

    let response = client().get(server.url("/healthz")).send().await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn missing_token_is_unauthorized_off_the_index() {
    let server = TestServer::start(|_| {}).await;
    let response = client()
        .get(server.url("/file-worker.js"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn non_get_post_methods_are_rejected() {
    let server = TestServer::start(|_| {}).await;
    let response = client().delete(server.url("/")).send().await.unwrap();
    assert_eq!(response.status(), 405);
}

#[tokio::test]
async fn permanent_token_is_exchanged_for_a_signed_token() {
    let server = TestServer::start(|auth| {
        auth.issue_permanent("default", "Default", Role::Editor)
            .unwrap();
    })
    .await;

    // Fetch the permanent token back out of the store file the server
    // persisted at startup.
    let raw =
        std::fs::read_to_string(server._data_dir.path().join("auth.json")).unwrap();
    let marker = "\"token\": \"";
    let start = raw.find(marker).unwrap() + marker.len();
    let hex_token = &raw[start..start + 64];

    let response = client()
        .get(server.url(&format!("/?token={hex_token}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("location.replace(location.pathname + '?token='"));

    let signed = signed_token_from(&body);
    assert!(signed.starts_with("eyJ"));
    assert_eq!(signed.matches('.').count(), 2);

    // The signed token is accepted directly and serves the app page.
    let response = client()
        .get(server.url(&format!("/?token={signed}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("window.TERMWEB_CONFIG"));
}

#[tokio::test]
async fn invalid_tokens_count_toward_lockout() {
    let server = TestServer::start(|_| {}).await;
    let bad = "f".repeat(64);
    for _ in 0..10 {
        let response = client()
            .get(server.url(&format!("/?token={bad}")))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
    }
    let response = client()
        .get(server.url(&format!("/?token={bad}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);
}

#[tokio::test]
async fn login_form_runs_the_same_exchange() {
    let server = TestServer::start(|auth| {
        auth.issue_permanent("default", "Default", Role::Admin)
            .unwrap();
    })
    .await;
    let raw =
        std::fs::read_to_string(server._data_dir.path().join("auth.json")).unwrap();
    let marker = "\"token\": \"";
    let start = raw.find(marker).unwrap() + marker.len();
    let hex_token = raw[start..start + 64].to_string();

    let response = client()
        .post(server.url("/auth/login"))
        .form(&[("token", hex_token.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(signed_token_from(&body).starts_with("eyJ"));
}

#[tokio::test]
async fn admin_password_login() {
    let server = TestServer::start(|auth| {
        auth.set_admin_password("hunter2").unwrap();
    })
    .await;

    let response = client()
        .post(server.url("/auth/login"))
        .form(&[("password", "hunter2")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(signed_token_from(&response.text().await.unwrap()).starts_with("eyJ"));

    let response = client()
        .post(server.url("/auth/login"))
        .form(&[("password", "wrong")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 303);
    assert!(response.headers()["location"]
        .to_str()
        .unwrap()
        .starts_with("/?error="));
}

#[tokio::test]
async fn share_link_token_exchanges_with_link_role() {
    let server = TestServer::start(|auth| {
        auth.create_share_link(Role::Viewer, None, None, Some("demo".into()))
            .map(|_| ())
            .unwrap();
    })
    .await;
    let raw =
        std::fs::read_to_string(server._data_dir.path().join("auth.json")).unwrap();
    let marker = "\"token\": \"";
    let start = raw.find(marker).unwrap() + marker.len();
    let link_token = &raw[start..start + 64];

    let response = client()
        .get(server.url(&format!("/?token={link_token}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(signed_token_from(&response.text().await.unwrap()).starts_with("eyJ"));
}

#[tokio::test]
async fn unconfigured_oauth_redirects_with_error() {
    let server = TestServer::start(|_| {}).await;
    let response = client()
        .get(server.url("/auth/github"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 303);
    let location = response.headers()["location"].to_str().unwrap();
    assert!(location.starts_with("/?error="));

    let response = client()
        .get(server.url("/auth/unknown"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 303);
}

#[tokio::test]
async fn unknown_assets_are_404_with_a_token() {
    let server = TestServer::start(|auth| {
        auth.issue_permanent("default", "Default", Role::Editor)
            .unwrap();
    })
    .await;
    let raw =
        std::fs::read_to_string(server._data_dir.path().join("auth.json")).unwrap();
    let marker = "\"token\": \"";
    let start = raw.find(marker).unwrap() + marker.len();
    let hex_token = raw[start..start + 64].to_string();

    // Exchange first, then use the signed token against a missing path.
    let response = client()
        .get(server.url(&format!("/?token={hex_token}")))
        .send()
        .await
        .unwrap();
    let signed = signed_token_from(&response.text().await.unwrap());

    let response = client()
        .get(server.url(&format!("/no-such-asset.js?token={signed}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
