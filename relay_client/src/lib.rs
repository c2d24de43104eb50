pub use error::*;
use {
    crate::error::RequestBuildError,
    relay_rpc::domain::ProjectId,
    serde::Serialize,
    tokio_tungstenite::tungstenite::{client::IntoClientRequest, http},
};

pub mod error;
pub mod websocket;

pub type HttpRequest<T> = http::Request<T>;

/// The default websocket address of the relay.
pub const RELAY_WEBSOCKET_ADDRESS: &str = "wss://relay.walletconnect.com";

/// Relay connection options.
///
/// Authorization is not handled at this layer. The project ID and any origin
/// restrictions are provided by the outer client.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// The relay websocket address. The default address is
    /// `wss://relay.walletconnect.com`.
    pub address: String,

    /// The project-specific identifier.
    pub project_id: ProjectId,

    /// Optional origin of the request. Subject to allow-list validation.
    pub origin: Option<String>,
}

impl ConnectionOptions {
    pub fn new(project_id: impl Into<ProjectId>) -> Self {
        Self {
            address: RELAY_WEBSOCKET_ADDRESS.into(),
            project_id: project_id.into(),
            origin: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<Option<String>>) -> Self {
        self.origin = origin.into();
        self
    }

    pub(crate) fn as_ws_request(&self) -> Result<HttpRequest<()>, RequestBuildError> {
        let query = {
            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct QueryParams<'a> {
                project_id: &'a ProjectId,
            }

            serde_qs::to_string(&QueryParams {
                project_id: &self.project_id,
            })
            .map_err(RequestBuildError::Query)?
        };

        let mut request = format!("{}/?{}", self.address, query)
            .into_client_request()
            .map_err(RequestBuildError::Other)?;

        if let Some(origin) = &self.origin {
            let value = origin.parse().map_err(|_| RequestBuildError::Headers)?;

            request.headers_mut().append("Origin", value);
        }

        Ok(request)
    }
}
