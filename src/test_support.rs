//! Helpers shared by unit tests.

use url::Url;

/// Serves `router` on an ephemeral loopback port and returns its base URL.
pub(crate) async fn serve(router: axum::Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });
    format!("http://{addr}/").parse().expect("valid test URL")
}
