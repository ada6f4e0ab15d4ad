//! The seam between the services and the chat SDK.
//!
//! The SDK itself is an opaque collaborator: the registry only needs to log a
//! credential in and to log it out again.

use async_trait::async_trait;

use crate::{credential::Credential, error::ConnectionError};

/// A live, logged-in session.
#[async_trait]
pub trait ChatClient: Send + Sync + 'static {
    /// Display name of the account behind the session, e.g. `mybot#0001`.
    fn user_tag(&self) -> String;

    /// Close the session. Called once, from idle teardown or shutdown.
    async fn disconnect(&self) -> Result<(), ConnectionError>;
}

/// Opens sessions for credentials.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: ChatClient;

    async fn connect(&self, credential: &Credential) -> Result<Self::Client, ConnectionError>;
}

#[cfg(feature = "serenity")]
pub mod serenity_client {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serenity::http::Http;
    use tracing::debug;

    use super::{ChatClient, Connector};
    use crate::{credential::Credential, error::ConnectionError};

    /// REST-backed connector. The token is validated against the
    /// current-user endpoint before the client is handed out.
    #[derive(Debug, Default, Clone)]
    pub struct SerenityConnector;

    pub struct SerenityClient {
        http: Arc<Http>,
        tag: String,
    }

    impl SerenityClient {
        pub fn http(&self) -> Arc<Http> {
            self.http.clone()
        }
    }

    #[async_trait]
    impl ChatClient for SerenityClient {
        fn user_tag(&self) -> String {
            self.tag.clone()
        }

        async fn disconnect(&self) -> Result<(), ConnectionError> {
            // REST sessions hold no socket; dropping the client is enough.
            debug!(user = %self.tag, "serenity client released");
            Ok(())
        }
    }

    #[async_trait]
    impl Connector for SerenityConnector {
        type Client = SerenityClient;

        async fn connect(&self, credential: &Credential) -> Result<SerenityClient, ConnectionError> {
            let http = Http::new(credential.expose());
            let me = http
                .get_current_user()
                .await
                .map_err(|e| ConnectionError::Connect(e.to_string()))?;
            Ok(SerenityClient {
                http: Arc::new(http),
                tag: me.name.clone(),
            })
        }
    }
}
