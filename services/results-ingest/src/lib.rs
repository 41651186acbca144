pub mod config;
pub mod params;
pub mod transport;
#[cfg(feature = "async-transport")]
pub mod transport_axum;

use std::{
    io::{self, BufWriter, Write},
    sync::Arc,
};

use params::{
    FIELD_LOG, FIELD_NUM_COMMAND_ERRORS, FIELD_NUM_COMMAND_FAILURES, FIELD_NUM_COMMAND_PASSES,
    FIELD_NUM_TEST_FAILURES, FIELD_NUM_TEST_PASSES, FIELD_NUM_TEST_TOTAL, FIELD_RESULT,
    FIELD_SELENIUM_REVISION, FIELD_SELENIUM_VERSION, FIELD_SUITE, FIELD_TOTAL_TIME, FormParams,
    ParameterExtractor, test_table_field,
};
use report::{
    DrainReport, HtmlReportWriter, ListenerRegistry, RecordError, ReportWriter, ResultsRecord,
    RunSummary, TestTableSequence, TextRepair,
};

pub const POST_RESULTS_PATH: &str = "/postResults";
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("No result was specified!")]
    MissingResult,
    #[error("field '{field}' must be a non-negative integer, got {value:?}")]
    Validation {
        field: &'static str,
        value: Option<String>,
    },
    #[error("test table {index} was declared but not posted")]
    MissingTable { index: usize },
    #[error(transparent)]
    Record(#[from] RecordError),
    /// `drain` is set once listeners were notified before rendering failed.
    #[error("failed to render results: {source}")]
    Render {
        #[source]
        source: io::Error,
        drain: Option<DrainReport>,
    },
}

impl From<io::Error> for IngestError {
    fn from(source: io::Error) -> Self {
        Self::Render {
            source,
            drain: None,
        }
    }
}

impl IngestError {
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingResult
            | Self::Validation { .. }
            | Self::MissingTable { .. }
            | Self::Record(_) => 400,
            Self::Render { .. } => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingResult => "missing_result",
            Self::Validation { .. } => "validation",
            Self::MissingTable { .. } => "missing_table",
            Self::Record(_) => "record",
            Self::Render { .. } => "render",
        }
    }

    /// Listener notification that already happened for a post that failed.
    pub fn dispatched(&self) -> Option<DrainReport> {
        match self {
            Self::Render { drain, .. } => *drain,
            _ => None,
        }
    }

    fn after_dispatch(self, report: DrainReport) -> Self {
        match self {
            Self::Render { source, .. } => Self::Render {
                source,
                drain: Some(report),
            },
            other => other,
        }
    }
}

/// Where a rendered report goes. The content type is fixed before the first
/// byte is written to [`ResponseChannel::output`].
pub trait ResponseChannel {
    fn set_content_type(&mut self, content_type: &'static str);
    fn output(&mut self) -> &mut dyn Write;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub record: ResultsRecord,
    pub drain: DrainReport,
}

/// Strict parse of the declared test count; it bounds the table collection.
pub fn parse_total_tests(raw: Option<&str>) -> Result<usize, IngestError> {
    let invalid = || IngestError::Validation {
        field: FIELD_NUM_TEST_TOTAL,
        value: raw.map(str::to_string),
    };
    let raw = raw.ok_or_else(invalid)?;
    if raw.is_empty() || !raw.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(invalid());
    }
    raw.parse::<usize>().map_err(|_| invalid())
}

pub fn collect_test_tables(
    fields: &ParameterExtractor<'_>,
    num_test_total: usize,
) -> Result<TestTableSequence, IngestError> {
    // The declared count is untrusted; grow only with tables actually posted.
    let mut tables = Vec::new();
    for index in 1..=num_test_total {
        let table = fields
            .text(&test_table_field(index))
            .ok_or(IngestError::MissingTable { index })?;
        tables.push(table);
    }
    Ok(TestTableSequence::new(tables))
}

pub fn aggregate_results(
    summary: RunSummary,
    test_tables: TestTableSequence,
) -> Result<ResultsRecord, IngestError> {
    Ok(ResultsRecord::new(summary, test_tables)?)
}

pub fn render_results(
    writer: &dyn ReportWriter,
    results: &ResultsRecord,
    response: &mut dyn ResponseChannel,
) -> Result<(), IngestError> {
    response.set_content_type(HTML_CONTENT_TYPE);
    let mut out = BufWriter::new(response.output());
    let written = writer.write_report(results, &mut out);
    let flushed = out.flush();
    written?;
    flushed?;
    Ok(())
}

/// Turns posted runner fields into a [`ResultsRecord`], hands it to the
/// registered listeners and renders the acknowledgment.
#[derive(Clone)]
pub struct ResultsIngestor {
    registry: Arc<ListenerRegistry>,
    writer: Arc<dyn ReportWriter>,
    text_repair: TextRepair,
}

impl std::fmt::Debug for ResultsIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultsIngestor")
            .field("registry", &self.registry)
            .field("text_repair", &self.text_repair)
            .finish_non_exhaustive()
    }
}

impl Default for ResultsIngestor {
    fn default() -> Self {
        Self::new(Arc::new(ListenerRegistry::new()))
    }
}

impl ResultsIngestor {
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Self {
            registry,
            writer: Arc::new(HtmlReportWriter),
            text_repair: TextRepair::default(),
        }
    }

    pub fn with_report_writer(mut self, writer: Arc<dyn ReportWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_text_repair(mut self, text_repair: TextRepair) -> Self {
        self.text_repair = text_repair;
        self
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    pub fn text_repair(&self) -> TextRepair {
        self.text_repair
    }

    /// Returns `None` when the request is not a results post; the host is then
    /// free to route it elsewhere.
    pub fn handle(
        &self,
        method: &str,
        path: &str,
        params: &FormParams,
        response: &mut dyn ResponseChannel,
    ) -> Option<Result<IngestOutcome, IngestError>> {
        if path != POST_RESULTS_PATH || !method.eq_ignore_ascii_case("POST") {
            return None;
        }
        tracing::info!(fields = params.len(), "received posted results");
        let outcome = self.ingest(params).and_then(|outcome| {
            render_results(self.writer.as_ref(), &outcome.record, response)
                .map_err(|err| err.after_dispatch(outcome.drain))?;
            Ok(outcome)
        });
        if let Err(err) = &outcome {
            tracing::warn!(kind = err.kind(), error = %err, "rejected posted results");
        }
        Some(outcome)
    }

    /// Validate, collect, aggregate and notify. Required fields are checked
    /// before anything else is built, so a rejected post notifies nobody.
    pub fn ingest(&self, params: &FormParams) -> Result<IngestOutcome, IngestError> {
        let fields = ParameterExtractor::new(params, self.text_repair);

        let result = fields
            .raw_owned(FIELD_RESULT)
            .ok_or(IngestError::MissingResult)?;
        let num_test_total = parse_total_tests(fields.raw(FIELD_NUM_TEST_TOTAL))?;

        let summary = RunSummary {
            selenium_version: fields.raw_owned(FIELD_SELENIUM_VERSION),
            selenium_revision: fields.raw_owned(FIELD_SELENIUM_REVISION),
            result,
            total_time: fields.raw_owned(FIELD_TOTAL_TIME),
            num_test_total,
            num_test_passes: fields.raw_owned(FIELD_NUM_TEST_PASSES),
            num_test_failures: fields.raw_owned(FIELD_NUM_TEST_FAILURES),
            num_command_passes: fields.raw_owned(FIELD_NUM_COMMAND_PASSES),
            num_command_failures: fields.raw_owned(FIELD_NUM_COMMAND_FAILURES),
            num_command_errors: fields.raw_owned(FIELD_NUM_COMMAND_ERRORS),
            suite: fields.text(FIELD_SUITE),
            log: fields.text(FIELD_LOG),
        };
        let test_tables = collect_test_tables(&fields, num_test_total)?;
        let record = aggregate_results(summary, test_tables)?;

        let drain = self.registry.drain_and_notify(&record);
        tracing::info!(
            result = record.result(),
            tests = record.num_test_total(),
            listeners_notified = drain.notified,
            listeners_failed = drain.failed,
            "posted results dispatched"
        );
        Ok(IngestOutcome { record, drain })
    }
}
