use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

/// Name of the span field that ties events to a job.
pub const JOB_ID_FIELD: &str = "job_id";

/// Captured log lines per job id.
#[derive(Clone, Default, Debug)]
pub struct JobLogBuffer {
    lines: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl JobLogBuffer {
    pub fn append(&self, job_id: &str, line: String) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(job_id.to_string())
            .or_default()
            .push(line);
    }

    /// Registers a job so an empty log is distinguishable from an unknown job.
    pub fn open(&self, job_id: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(job_id.to_string())
            .or_default();
    }

    pub fn get(&self, job_id: &str) -> Option<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .map(|lines| lines.join("\n"))
    }
}

struct JobId(String);

/// Tracing layer that copies every event emitted inside a `job_id` span into a [`JobLogBuffer`].
pub struct JobLogLayer {
    buffer: JobLogBuffer,
}

impl JobLogLayer {
    pub fn new(buffer: JobLogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S> Layer<S> for JobLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = JobIdVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(job_id), Some(span)) = (visitor.job_id, ctx.span(id)) {
            span.extensions_mut().insert(JobId(job_id));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(scope) = ctx.event_scope(event) else {
            return;
        };
        let Some(job_id) = scope
            .from_root()
            .find_map(|span| span.extensions().get::<JobId>().map(|j| j.0.clone()))
        else {
            return;
        };

        let mut visitor = StringVisitor::default();
        event.record(&mut visitor);
        let line = format!(
            "{} [{}] {}",
            Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event.metadata().level(),
            visitor.message
        );
        self.buffer.append(&job_id, line);
    }
}

#[derive(Default)]
struct JobIdVisitor {
    job_id: Option<String>,
}

impl Visit for JobIdVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == JOB_ID_FIELD {
            self.job_id = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == JOB_ID_FIELD {
            self.job_id = Some(format!("{value:?}").trim_matches('"').to_string());
        }
    }
}

#[derive(Default)]
struct StringVisitor {
    message: String,
}

impl Visit for StringVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if !self.message.is_empty() {
            self.message.push(' ');
        }
        if field.name() == "message" {
            self.message.push_str(&format!("{value:?}"));
        } else {
            self.message.push_str(&format!("{}={value:?}", field.name()));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.record_debug(field, &format_args!("{value}"));
        } else {
            self.record_debug(field, &value);
        }
    }
}
