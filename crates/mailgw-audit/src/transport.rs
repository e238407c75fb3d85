// transport.rs — One HTTP exchange against one appliance endpoint.
//
// The appliance management API lives behind a self-signed certificate, so
// the client is built with certificate verification disabled. Session
// continuity is carried exclusively via cookies, and the protocol layer
// replaces the cookie set wholesale after each step — so the client's own
// cookie store stays out of the picture and cookies travel explicitly
// through [`Transport::post`].

use std::time::Duration;

use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Client, StatusCode};

use crate::error::Error;

/// One `name=value` pair from a `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    /// Parse the leading `name=value` pair of a `Set-Cookie` header value,
    /// dropping attributes (`Path`, `Expires`, ...) after the first `;`.
    fn parse(header: &str) -> Option<Self> {
        let pair = header.split(';').next()?;
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            value: value.trim().to_string(),
        })
    }
}

/// Decoded response of one exchange: body bytes plus the response cookies.
#[derive(Debug)]
pub struct Reply {
    pub body: Vec<u8>,
    pub cookies: Vec<Cookie>,
}

/// Executes single request/response exchanges with a fixed timeout.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
}

impl Transport {
    /// Build a transport with the given per-request timeout.
    ///
    /// Certificate verification is disabled: appliances ship self-signed
    /// certificates and offer no way to install a trusted chain.
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client })
    }

    /// POST to `url` with `query` pairs appended to the query string, an
    /// optional url-encoded form body, and the given cookies attached.
    ///
    /// Returns the body and the response's `Set-Cookie` pairs. Fails with
    /// [`Error::RequestFailed`] on network error or timeout and with
    /// [`Error::NonSuccessStatus`] for any status other than 200.
    pub async fn post(
        &self,
        url: &str,
        query: &[(&str, String)],
        form: Option<&[(&str, String)]>,
        cookies: &[Cookie],
    ) -> Result<Reply, Error> {
        let mut request = self.client.post(url).query(query);

        if !cookies.is_empty() {
            let header = cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header(COOKIE, header);
        }

        if let Some(fields) = form {
            request = request.form(fields);
        }

        let response = request.send().await?;

        if response.status() != StatusCode::OK {
            return Err(Error::NonSuccessStatus {
                status: response.status().to_string(),
            });
        }

        let cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(Cookie::parse)
            .collect();

        let body = response.bytes().await?.to_vec();

        Ok(Reply { body, cookies })
    }
}
