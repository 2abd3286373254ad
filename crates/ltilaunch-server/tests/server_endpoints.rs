use ltilaunch::LtiStores;
use ltilaunch::types::Visibility;
use ltilaunch_server::config::BootstrapProvider;
use ltilaunch_server::{AppConfig, build_app, run_bootstrap};
use serde_json::Value;
use tokio::task::JoinHandle;

async fn start_server(
    cfg: AppConfig,
) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let stores = LtiStores::in_memory();
    run_bootstrap(&stores, &cfg.bootstrap).await.expect("bootstrap");
    let app = build_app(&cfg, stores).expect("build app");

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{addr}"), tx, server)
}

fn config_with_provider() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.bootstrap.providers.push(BootstrapProvider {
        name: "grader".into(),
        display_name: "Grader".into(),
        description: "Automatic grading".into(),
        icon_url: "http://cdn.example/grader.png".into(),
        launch_path: "/lti/launch".into(),
        visibility: Visibility::Members,
    });
    cfg
}

#[tokio::test]
async fn server_endpoints_work() {
    let (base, shutdown_tx, handle) = start_server(AppConfig::default()).await;
    let client = reqwest::Client::new();

    // GET /
    let resp = client.get(format!("{base}/")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["service"], "LTI Launch Server");
    assert_eq!(body["status"], "ok");

    // GET /healthz
    let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // GET /readyz
    let resp = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ready");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn config_cartridge_is_served() {
    let (base, shutdown_tx, handle) = start_server(config_with_provider()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/lti/config/grader"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(
        resp.headers().get(reqwest::header::CONTENT_TYPE).unwrap(),
        "application/xml"
    );
    let xml = resp.text().await.unwrap();
    assert!(xml.contains("<blti:title>Grader</blti:title>"));
    assert!(xml.contains(&format!("<blti:launch_url>{base}/lti/launch</blti:launch_url>")));
    assert!(xml.contains("<blti:secure_icon>https://cdn.example/grader.png</blti:secure_icon>"));
    assert!(xml.contains(r#"<lticm:property name="domain">127.0.0.1</lticm:property>"#));
    assert!(xml.contains(r#"<lticm:property name="visibility">members</lticm:property>"#));

    let resp = client
        .get(format!("{base}/lti/config/unknown"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn configured_base_url_overrides_host() {
    let mut cfg = config_with_provider();
    cfg.server.base_url = Some("https://tool.example.edu/ignored/path".into());
    let (base, shutdown_tx, handle) = start_server(cfg).await;

    let xml = reqwest::get(format!("{base}/lti/config/grader"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(xml.contains("<blti:launch_url>https://tool.example.edu/lti/launch</blti:launch_url>"));
    assert!(xml.contains(r#"<lticm:property name="domain">tool.example.edu</lticm:property>"#));

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}
