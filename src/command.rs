//! Command surface over a running session.
//!
//! Every operational control is expressed as a [`Command`] value that a
//! transport (CLI, socket, embedding application) can hand to [`dispatch`].
//! Commands are serializable so a remote control plane can carry them as
//! JSON. All of them serialize behind the session's state lock, so they
//! never observe a cycle halfway through.

use crate::session::{ErrorRecord, Session};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One operational control request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Run one cycle immediately, outside the schedule.
    TakePoint,
    /// Force a fresh dataset on the next successful cycle.
    NewDataset,
    /// Query (None) or set (Some) whether the poll loop runs.
    Logging(Option<bool>),
    /// Query (None) or set (Some) the poll interval.
    TimeInterval(#[serde(with = "humantime_serde")] Option<Duration>),
    /// Fetch the error list from the most recent cycle.
    Errors,
    /// The logger's current wall-clock time.
    CurrentTime,
}

/// Reply to one [`Command`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandReply {
    /// The command completed with nothing to report.
    Done,
    /// Whether the poll loop is running.
    Logging(bool),
    /// The effective poll interval.
    TimeInterval(#[serde(with = "humantime_serde")] Duration),
    /// The most recent cycle's failures.
    Errors(Vec<ErrorRecord>),
    /// Current wall-clock time, RFC 3339.
    CurrentTime(String),
}

/// Execute one command against a session.
///
/// Queries report the state after the command: setting the interval replies
/// with the new interval, toggling the loop replies with the resulting
/// state.
pub async fn dispatch(session: &Session, command: Command) -> CommandReply {
    match command {
        Command::TakePoint => {
            session.take_point().await;
            CommandReply::Done
        }
        Command::NewDataset => {
            session.new_dataset().await;
            CommandReply::Done
        }
        Command::Logging(request) => {
            if let Some(start) = request {
                session.logging(start).await;
            }
            CommandReply::Logging(session.is_logging().await)
        }
        Command::TimeInterval(request) => {
            if let Some(interval) = request {
                session.set_interval(interval).await;
            }
            CommandReply::TimeInterval(session.interval().await)
        }
        Command::Errors => CommandReply::Errors(session.errors().await),
        Command::CurrentTime => CommandReply::CurrentTime(Local::now().to_rfc3339()),
    }
}
