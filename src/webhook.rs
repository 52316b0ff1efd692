//! Triggers actions in the sidecar proxy by making plain HTTP GET requests.

use reqwest::StatusCode;

pub mod subscriber;
pub mod validator;


#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot trigger webhook URL {url}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("webhook {url} failed: {status}: {body}")]
    Failed {
        url: String,
        status: StatusCode,
        body: String,
    },
}

/// An HTTP GET trigger with no parameters or request body. Anything but a
/// 200 OK is a failure; the response body is kept for diagnostics.
#[derive(Clone)]
pub struct Webhook {
    url: String,
    client: reqwest::Client,
}

impl Webhook {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn trigger(&self) -> Result<(), Error> {
        let rsp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|source| Error::Request {
                url: self.url.clone(),
                source,
            })?;

        if rsp.status() == StatusCode::OK {
            return Ok(());
        }

        let status = rsp.status();
        let body = rsp.text().await.unwrap_or_default();
        Err(Error::Failed {
            url: self.url.clone(),
            status,
            body,
        })
    }
}
