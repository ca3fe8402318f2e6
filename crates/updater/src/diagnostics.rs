//! Durable record of update failures.
//!
//! Failures that never reach the UI are appended to a daily rolling file so
//! they can be inspected after the fact. Entries are never rewritten or
//! pruned. Each log owns a private tracing dispatcher whose only layer writes
//! `[HH:MM:SS] [UPDATER] <kind>: <message>` lines, so entries never leak into
//! the process-wide subscriber and several logs can coexist.

use crate::error::{ErrorKind, UpdaterError};
use chrono::{Local, NaiveDate};
use std::fmt::{self, Write as _};
use std::io;
use std::path::{Path, PathBuf};
use tracing::field::{Field, Visit};
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{self as tracing_fmt, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const TARGET: &str = "updater::diagnostics";
const FILE_PREFIX: &str = "errors";
const FILE_SUFFIX: &str = "txt";

/// Append-only, timestamped diagnostic log.
#[derive(Debug)]
pub struct DiagnosticLog {
    dir: PathBuf,
    dispatch: Dispatch,
}

impl DiagnosticLog {
    /// Open the log in `dir`, creating the directory and today's file.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(FILE_PREFIX)
            .filename_suffix(FILE_SUFFIX)
            .build(&dir)
            .map_err(io::Error::other)?;

        let layer = tracing_fmt::layer()
            .with_writer(appender)
            .with_ansi(false)
            .event_format(EntryFormat)
            .with_filter(Targets::new().with_target(TARGET, Level::ERROR));
        let dispatch = Dispatch::new(tracing_subscriber::registry().with(layer));

        Ok(Self { dir, dispatch })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File receiving the entries written on `date` (UTC).
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "{FILE_PREFIX}.{}.{FILE_SUFFIX}",
            date.format("%Y-%m-%d")
        ))
    }

    /// Append one line for `message`, tagged with `kind`.
    pub fn record(&self, kind: ErrorKind, message: &str) {
        tracing::dispatcher::with_default(&self.dispatch, || {
            tracing::error!(target: TARGET, kind = %kind, "{}", single_line(message));
        });
    }

    /// Record `err` with `context`.
    pub fn record_error(&self, context: &str, err: &UpdaterError) {
        self.record(err.kind(), &format!("{context}: {err}"));
    }
}

fn single_line(message: &str) -> String {
    message.replace(['\r', '\n'], " ")
}

/// Renders an event as a single diagnostic line.
struct EntryFormat;

impl<S, N> FormatEvent<S, N> for EntryFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut entry = Entry::default();
        event.record(&mut entry);
        writeln!(
            writer,
            "[{}] [UPDATER] {}: {}",
            Local::now().format("%H:%M:%S"),
            entry.kind,
            entry.message
        )
    }
}

#[derive(Default)]
struct Entry {
    kind: String,
    message: String,
}

impl Visit for Entry {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "kind" => self.kind = format!("{value:?}"),
            "message" => self.message = format!("{value:?}"),
            _ => {}
        }
    }
}
