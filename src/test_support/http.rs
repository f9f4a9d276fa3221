use httpmock::MockServer;

/// Start a fresh `httpmock::MockServer` instance for use in unit tests.
pub async fn start_mock_server() -> MockServer {
    MockServer::start_async().await
}
