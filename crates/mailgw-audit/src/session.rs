// session.rs — The five-step retrieval protocol for one target URL.
//
// The appliance will not answer a journal query on a bare authenticated
// session: it demands a two-phase time handshake first, and every step
// depends on output from the one before it. The chain is
//
//   login → time query → time confirm → journal query → journal fetch
//
// with an opaque token issued at login, action identifiers issued by the
// time query and journal query steps, and cookies replaced wholesale by
// each response that returns any. Session state is an explicit value
// threaded step to step and discarded when the run ends; nothing leaks
// across cycles or targets.
//
// The appliance backend processes queries asynchronously, so each step is
// followed by a fixed delay before the next one fires. Querying too soon
// yields stale or empty results, which makes the pacing a correctness
// requirement rather than politeness. A readiness poll would be safer but
// changes observable behavior; keep the delays until the appliance is
// known to tolerate immediate re-query.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::Error;
use crate::record::Record;
use crate::transport::{Cookie, Transport};

/// Cache-buster value the appliance UI sends on login and time steps.
const CB: &str = "332211";

/// Journal filter: `dateType 8` means "entries since the last query".
const JOURNAL_FILTER: &str = r#"{"filters":{"dateType":8}}"#;

/// Fixed inter-step delays, matching the appliance's processing latency.
#[derive(Debug, Clone)]
pub struct Pacing {
    pub after_login: Duration,
    pub after_time_query: Duration,
    pub after_time_confirm: Duration,
    pub after_journal_query: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            after_login: Duration::from_millis(100),
            after_time_query: Duration::from_millis(300),
            after_time_confirm: Duration::from_millis(300),
            after_journal_query: Duration::from_millis(2500),
        }
    }
}

impl Pacing {
    /// Zero delays, for tests against a fake appliance.
    pub fn none() -> Self {
        Self {
            after_login: Duration::ZERO,
            after_time_query: Duration::ZERO,
            after_time_confirm: Duration::ZERO,
            after_journal_query: Duration::ZERO,
        }
    }
}

/// Per-target, per-cycle session state threaded between steps.
#[derive(Debug)]
struct SessionState {
    token: String,
    cookies: Vec<Cookie>,
}

// ── Wire reply shapes ────────────────────────────────────────────
//
// Missing fields decode to defaults, mirroring the appliance's habit of
// omitting parts of the envelope.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoginReply {
    action: String,
    #[serde(rename = "userType")]
    user_type: i64,
    #[serde(rename = "C2HToken")]
    token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ActionReply {
    action: String,
    action_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimeReply {
    action: String,
    data: TimeData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimeData {
    tz: String,
    time: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JournalReply {
    action: String,
    data: JournalData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JournalData {
    count: i64,
    #[serde(rename = "unlimitedResultsSize")]
    unlimited_results_size: i64,
    time: i64,
    items: Vec<Record>,
}

/// Run the full five-step chain against one target and return its batch.
///
/// Any step's failure aborts the whole per-target fetch; the poll loop
/// treats that as a skip for this cycle, not a fatal condition.
pub(crate) async fn fetch_journal(
    transport: &Transport,
    url: &str,
    user: &str,
    password: &str,
    pacing: &Pacing,
) -> Result<Vec<Record>, Error> {
    let state = login(transport, url, user, password).await?;
    tokio::time::sleep(pacing.after_login).await;

    let (action_id, state) = time_query(transport, url, state).await?;
    tokio::time::sleep(pacing.after_time_query).await;

    let state = time_confirm(transport, url, state, action_id).await?;
    tokio::time::sleep(pacing.after_time_confirm).await;

    let action_id = journal_query(transport, url, &state).await?;
    tokio::time::sleep(pacing.after_journal_query).await;

    journal_fetch(transport, url, &state, action_id).await
}

/// Step 1: authenticate, yielding the session token and first cookies.
async fn login(
    transport: &Transport,
    url: &str,
    user: &str,
    password: &str,
) -> Result<SessionState, Error> {
    let query = [("action", "userLogin".to_string()), ("cb", CB.to_string())];
    let form = [
        ("username", user.to_string()),
        ("password", password.to_string()),
    ];

    let reply = transport
        .post(url, &query, Some(&form), &[])
        .await
        .map_err(|e| Error::AuthFailed {
            reason: e.to_string(),
        })?;

    let decoded: LoginReply =
        serde_json::from_slice(&reply.body).map_err(|e| Error::AuthFailed {
            reason: format!("could not decode login reply: {e}"),
        })?;

    debug!(
        action = %decoded.action,
        user_type = decoded.user_type,
        "login reply"
    );

    Ok(SessionState {
        token: decoded.token,
        cookies: reply.cookies,
    })
}

/// Step 2: ask for the appliance time, yielding the first action id.
async fn time_query(
    transport: &Transport,
    url: &str,
    state: SessionState,
) -> Result<(i64, SessionState), Error> {
    let query = [
        ("action", "getCurrentTime".to_string()),
        ("C2HToken", state.token.clone()),
        ("cb", CB.to_string()),
    ];

    let reply = transport
        .post(url, &query, None, &state.cookies)
        .await
        .map_err(|e| protocol_failed("time query", e))?;

    let decoded: ActionReply = serde_json::from_slice(&reply.body)
        .map_err(|e| decode_failed("time query", e))?;

    debug!(action = %decoded.action, action_id = decoded.action_id, "time query reply");

    Ok((
        decoded.action_id,
        SessionState {
            token: state.token,
            cookies: reply.cookies,
        },
    ))
}

/// Step 3: confirm the time query with its action id.
///
/// The reply's time payload is decoded and discarded; only the cookies
/// survive, becoming the session cookies for the journal steps.
async fn time_confirm(
    transport: &Transport,
    url: &str,
    state: SessionState,
    action_id: i64,
) -> Result<SessionState, Error> {
    let query = [
        ("action", "getCurrentTime".to_string()),
        ("C2HToken", state.token.clone()),
        ("action_id", action_id.to_string()),
        ("cb", CB.to_string()),
    ];

    let reply = transport
        .post(url, &query, None, &state.cookies)
        .await
        .map_err(|e| protocol_failed("time confirm", e))?;

    let decoded: TimeReply = serde_json::from_slice(&reply.body)
        .map_err(|e| decode_failed("time confirm", e))?;

    debug!(
        action = %decoded.action,
        tz = %decoded.data.tz,
        time = decoded.data.time,
        "time confirm reply"
    );

    Ok(SessionState {
        token: state.token,
        cookies: reply.cookies,
    })
}

/// Step 4: open a journal query, yielding the fetch action id.
async fn journal_query(
    transport: &Transport,
    url: &str,
    state: &SessionState,
) -> Result<i64, Error> {
    let query = [
        ("action", "eventLoggerJournalQuery".to_string()),
        ("C2HToken", state.token.clone()),
        ("data", JOURNAL_FILTER.to_string()),
    ];

    let reply = transport
        .post(url, &query, None, &state.cookies)
        .await
        .map_err(|e| protocol_failed("journal query", e))?;

    let decoded: ActionReply = serde_json::from_slice(&reply.body)
        .map_err(|e| decode_failed("journal query", e))?;

    debug!(action = %decoded.action, action_id = decoded.action_id, "journal query reply");

    Ok(decoded.action_id)
}

/// Step 5: fetch the batch the journal query prepared.
async fn journal_fetch(
    transport: &Transport,
    url: &str,
    state: &SessionState,
    action_id: i64,
) -> Result<Vec<Record>, Error> {
    let query = [
        ("action", "eventLoggerJournalQuery".to_string()),
        ("C2HToken", state.token.clone()),
        ("data", JOURNAL_FILTER.to_string()),
        ("action_id", action_id.to_string()),
    ];

    let reply = transport
        .post(url, &query, None, &state.cookies)
        .await
        .map_err(|e| protocol_failed("journal fetch", e))?;

    let decoded: JournalReply = serde_json::from_slice(&reply.body)
        .map_err(|e| decode_failed("journal fetch", e))?;

    debug!(
        action = %decoded.action,
        count = decoded.data.count,
        unlimited = decoded.data.unlimited_results_size,
        time = decoded.data.time,
        "journal fetch reply"
    );

    Ok(decoded.data.items)
}

fn protocol_failed(step: &'static str, source: Error) -> Error {
    Error::ProtocolFailed {
        step,
        reason: source.to_string(),
    }
}

fn decode_failed(step: &'static str, source: serde_json::Error) -> Error {
    Error::ProtocolFailed {
        step,
        reason: format!("could not decode reply: {source}"),
    }
}
