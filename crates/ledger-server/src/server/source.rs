//! HTTP client for the remote token generator.
//!
//! The generator answers `POST <url>?size=<n>` with one token per line.

use ledger::{Checker, Error, Kind, Op, Result, Token, TokenSource};
use reqwest::{Client, Url};
use std::time::Duration;

/// Pause before the first retry; each further retry waits one step longer.
const RETRY_STEP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct HttpTokenSource {
    client: Client,
    url: Url,
    retry: u32,
}

impl HttpTokenSource {
    /// Builds a client bound to `url`.
    ///
    /// `timeout` applies to each request. Connection failures are retried up
    /// to `retry` times; HTTP error statuses are not.
    pub fn new(url: Url, timeout: Duration, retry: u32) -> Result<Self> {
        const OP: Op = Op::new("source/http.new");

        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            Error::builder()
                .op(OP)
                .kind(Kind::Internal)
                .source(e)
                .build()
        })?;

        Ok(Self { client, url, retry })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn fetch(&self, size: usize) -> Result<String> {
        const OP: Op = Op::new("source/http.fetch");

        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("size", &size.to_string());

        let mut attempt = 0;
        let response = loop {
            match self.client.post(url.clone()).send().await {
                Ok(response) => break response,
                Err(e) if attempt < self.retry && (e.is_connect() || e.is_timeout()) => {
                    attempt += 1;
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Generator unreachable (attempt {attempt}): {e}");
                    tokio::time::sleep(RETRY_STEP * attempt).await;
                }
                Err(e) => {
                    return Err(Error::builder()
                        .op(OP)
                        .kind(Kind::Internal)
                        .source(e)
                        .build());
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::builder()
                .op(OP)
                .kind(Kind::Internal)
                .message(format!("generator answered {status}"))
                .build());
        }

        response.text().await.map_err(|e| {
            Error::builder()
                .op(OP)
                .kind(Kind::Internal)
                .source(e)
                .build()
        })
    }
}

impl Checker for HttpTokenSource {
    async fn check(&self) -> Result<()> {
        const OP: Op = Op::new("source/http.check");

        self.fetch(0).await.map_err(|e| Error::wrap(OP, e))?;
        Ok(())
    }
}

impl TokenSource for HttpTokenSource {
    async fn generate(&self, n: usize) -> Result<Vec<Token>> {
        const OP: Op = Op::new("source/http.generate");

        if n == 0 {
            return Err(Error::builder()
                .op(OP)
                .kind(Kind::Invalid)
                .message("size must be greater than 0")
                .build());
        }

        let body = self.fetch(n).await.map_err(|e| Error::wrap(OP, e))?;

        Ok(body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(Token::from)
            .collect())
    }
}
