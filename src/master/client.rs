//! HTTP transport to the master.

use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::{ApiError, ConnectionError, Result};
use crate::master::protocol::ResponseEnvelope;

/// Sends form-encoded POSTs to the master and decodes the response envelope.
///
/// The master replies with the `{data, error?, formErrors?, redirect?}`
/// envelope on every status code, so the HTTP status itself is not
/// inspected. Redirects are never followed — a `/login` redirect must
/// surface in the body.
pub struct MasterClient {
    http: reqwest::Client,
    host: String,
    server_id: String,
    password: SecretString,
}

impl MasterClient {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| ConnectionError::Request {
                reason: err.to_string(),
            })?;

        Ok(Self {
            http,
            host: config.master.host.clone(),
            server_id: config.server_id.clone(),
            password: config.password.clone(),
        })
    }

    /// POST `fields` to `path`, stamped with the agent's identity. Returns
    /// the envelope's `data` (`None` when absent or null).
    pub async fn post(&self, path: &str, fields: &[(&'static str, String)]) -> Result<Option<Value>> {
        let message_id = Uuid::new_v4();
        let url = format!("{}{}", self.host, path);

        let mut form: Vec<(&str, &str)> = vec![
            ("serverId", self.server_id.as_str()),
            ("serverPassword", self.password.expose_secret()),
        ];
        form.extend(fields.iter().map(|(key, value)| (*key, value.as_str())));

        tracing::debug!(%message_id, path, "sending message to master");

        let response = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|err| ConnectionError::Request {
                reason: err.to_string(),
            })?;

        let body = response
            .text()
            .await
            .map_err(|err| ConnectionError::Request {
                reason: err.to_string(),
            })?;

        let envelope: ResponseEnvelope =
            serde_json::from_str(&body).map_err(|err| ConnectionError::BadResponse {
                reason: err.to_string(),
            })?;

        if envelope.redirect.as_deref() == Some("/login") {
            tracing::error!(%message_id, "master redirected to login");
            return Err(ApiError::LoginExpired.into());
        }
        if let Some(error) = envelope.error {
            let message = match error {
                Value::String(message) => message,
                other => other.to_string(),
            };
            tracing::error!(%message_id, %message, "master reported an error");
            return Err(ApiError::Server { message }.into());
        }
        if let Some(errors) = envelope.form_errors {
            tracing::error!(%message_id, %errors, "master rejected the request");
            return Err(ApiError::Validation { errors }.into());
        }

        tracing::debug!(%message_id, "received response from master");
        Ok(envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::MasterConfig;
    use crate::error::Error;

    fn client_for(url: &str) -> MasterClient {
        let config = AgentConfig {
            server_id: "agent-1".to_owned(),
            password: SecretString::from("hunter2".to_owned()),
            master: MasterConfig {
                host: url.to_owned(),
                ..MasterConfig::default()
            },
            ..AgentConfig::default()
        };
        MasterClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn post_sends_identity_and_returns_data() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ping")
            .match_header("accept", "application/json")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("serverId".into(), "agent-1".into()),
                mockito::Matcher::UrlEncoded("serverPassword".into(), "hunter2".into()),
                mockito::Matcher::UrlEncoded("status".into(), "Online".into()),
            ]))
            .with_body(r#"{"data": {"ok": true}}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let data = client
            .post("/ping", &[("status", "Online".to_owned())])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(data, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn unreachable_master_is_a_connection_error() {
        // Nothing listens on this port.
        let client = client_for("http://127.0.0.1:9");
        let err = client.post("/ping", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Connection(ConnectionError::Request { .. })));
    }

    #[tokio::test]
    async fn non_json_body_is_a_connection_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/ping")
            .with_body("<html>proxy error</html>")
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client.post("/ping", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ConnectionError::BadResponse { .. })
        ));
    }

    #[tokio::test]
    async fn login_redirect_is_an_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/ping")
            .with_body(r#"{"redirect": "/login"}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client.post("/ping", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Api(ApiError::LoginExpired)));
    }

    #[tokio::test]
    async fn server_error_and_form_errors_are_api_errors() {
        let mut server = mockito::Server::new_async().await;
        let _err_mock = server
            .mock("POST", "/err")
            .with_body(r#"{"error": "no such server"}"#)
            .create_async()
            .await;
        let _form_mock = server
            .mock("POST", "/form")
            .with_body(r#"{"formErrors": {"status": "unknown"}}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());

        let err = client.post("/err", &[]).await.unwrap_err();
        assert!(
            matches!(err, Error::Api(ApiError::Server { ref message }) if message == "no such server")
        );

        let err = client.post("/form", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Api(ApiError::Validation { .. })));
    }
}
