mod html;
mod listener;

pub use html::{HtmlReportWriter, ReportWriter, escape_html};
pub use listener::{
    ChannelListener, DrainReport, ListenerError, ListenerRegistry, ResultsListener,
    channel_listener,
};

// ---------------------------------------------------------------------------
// Posted run results
// ---------------------------------------------------------------------------

/// Ordered per-test report fragments, `testTable.1` first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestTableSequence(Vec<String>);

impl TestTableSequence {
    pub fn new(tables: Vec<String>) -> Self {
        Self(tables)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    /// One-based lookup, matching the `testTable.<i>` field numbering.
    pub fn table(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|offset| self.0.get(offset))
            .map(String::as_str)
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl<'a> IntoIterator for &'a TestTableSequence {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Scalar fields of one posted run, before the table sequence is attached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub selenium_version: Option<String>,
    pub selenium_revision: Option<String>,
    pub result: String,
    pub total_time: Option<String>,
    pub num_test_total: usize,
    pub num_test_passes: Option<String>,
    pub num_test_failures: Option<String>,
    pub num_command_passes: Option<String>,
    pub num_command_failures: Option<String>,
    pub num_command_errors: Option<String>,
    pub suite: Option<String>,
    pub log: Option<String>,
}

/// Immutable snapshot of one posted test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsRecord {
    summary: RunSummary,
    test_tables: TestTableSequence,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("declared {declared} test tables but {collected} were collected")]
    TableCountMismatch { declared: usize, collected: usize },
}

impl ResultsRecord {
    pub fn new(summary: RunSummary, test_tables: TestTableSequence) -> Result<Self, RecordError> {
        if test_tables.len() != summary.num_test_total {
            return Err(RecordError::TableCountMismatch {
                declared: summary.num_test_total,
                collected: test_tables.len(),
            });
        }
        Ok(Self {
            summary,
            test_tables,
        })
    }

    pub fn selenium_version(&self) -> Option<&str> {
        self.summary.selenium_version.as_deref()
    }

    pub fn selenium_revision(&self) -> Option<&str> {
        self.summary.selenium_revision.as_deref()
    }

    pub fn result(&self) -> &str {
        &self.summary.result
    }

    /// The runner reports `passed` or `failed`; anything else counts as not passed.
    pub fn result_passed(&self) -> bool {
        self.summary.result.eq_ignore_ascii_case("passed")
    }

    pub fn total_time(&self) -> Option<&str> {
        self.summary.total_time.as_deref()
    }

    pub fn num_test_total(&self) -> usize {
        self.summary.num_test_total
    }

    pub fn num_test_passes(&self) -> Option<&str> {
        self.summary.num_test_passes.as_deref()
    }

    pub fn num_test_failures(&self) -> Option<&str> {
        self.summary.num_test_failures.as_deref()
    }

    pub fn num_command_passes(&self) -> Option<&str> {
        self.summary.num_command_passes.as_deref()
    }

    pub fn num_command_failures(&self) -> Option<&str> {
        self.summary.num_command_failures.as_deref()
    }

    pub fn num_command_errors(&self) -> Option<&str> {
        self.summary.num_command_errors.as_deref()
    }

    pub fn suite(&self) -> Option<&str> {
        self.summary.suite.as_deref()
    }

    pub fn test_tables(&self) -> &TestTableSequence {
        &self.test_tables
    }

    pub fn log(&self) -> Option<&str> {
        self.summary.log.as_deref()
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }
}

// ---------------------------------------------------------------------------
// Text recovery
// ---------------------------------------------------------------------------

/// How text-bearing fields are treated before they enter a [`ResultsRecord`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextRepair {
    /// Undo an ISO-8859-1 decoding of UTF-8 bytes via [`repair_mis_decoded_utf8`].
    #[default]
    Latin1Redecode,
    /// Keep text as received.
    Passthrough,
}

impl TextRepair {
    pub fn apply(self, input: &str) -> String {
        match self {
            Self::Latin1Redecode => repair_mis_decoded_utf8(input),
            Self::Passthrough => input.to_string(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Latin1Redecode => "latin1",
            Self::Passthrough => "passthrough",
        }
    }
}

/// Recover UTF-8 text from a string whose chars were produced by decoding
/// UTF-8 bytes as ISO-8859-1.
///
/// Every char is re-encoded as a single ISO-8859-1 byte and the bytes are
/// decoded as UTF-8. Chars above U+00FF cannot be produced by that decoding
/// and become `?`; byte sequences that are not valid UTF-8 become U+FFFD.
///
/// The input must come from such a mis-decoding. Correctly decoded
/// non-ASCII text is corrupted by this function: `"é"` becomes `"\u{FFFD}"`.
/// ASCII text is returned unchanged.
pub fn repair_mis_decoded_utf8(input: &str) -> String {
    let bytes: Vec<u8> = input
        .chars()
        .map(|ch| u8::try_from(u32::from(ch)).unwrap_or(b'?'))
        .collect();
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

/// Decode bytes as ISO-8859-1: each byte maps to the char with the same code point.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&byte| char::from(byte)).collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn mis_decode(original: &str) -> String {
        decode_latin1(original.as_bytes())
    }

    fn sample_summary(num_test_total: usize) -> RunSummary {
        RunSummary {
            result: "passed".into(),
            num_test_total,
            suite: Some("<table>suite</table>".into()),
            ..RunSummary::default()
        }
    }

    #[test]
    fn repair_reverses_latin1_mis_decoding() {
        for original in [
            "Ünïcödé suite",
            "日本語のテスト",
            "emoji 🚀 passed",
            "mixed ascii and ß",
        ] {
            let garbled = mis_decode(original);
            assert_ne!(garbled, original);
            assert_eq!(repair_mis_decoded_utf8(&garbled), original);
        }
    }

    proptest! {
        #[test]
        fn repair_is_a_left_inverse_of_latin1_mis_decoding(original in any::<String>()) {
            prop_assert_eq!(repair_mis_decoded_utf8(&mis_decode(&original)), original);
        }
    }

    #[test]
    fn repair_leaves_ascii_untouched() {
        assert_eq!(repair_mis_decoded_utf8("plain <b>ascii</b>"), "plain <b>ascii</b>");
        assert_eq!(repair_mis_decoded_utf8(""), "");
    }

    #[test]
    fn repair_corrupts_already_correct_text() {
        assert_eq!(repair_mis_decoded_utf8("é"), "\u{FFFD}");
        assert_eq!(repair_mis_decoded_utf8("日"), "?");
    }

    #[test]
    fn passthrough_mode_keeps_text() {
        assert_eq!(TextRepair::Passthrough.apply("é"), "é");
        assert_eq!(TextRepair::Latin1Redecode.apply(&mis_decode("é")), "é");
    }

    #[test]
    fn record_requires_table_count_to_match_declaration() {
        let err = ResultsRecord::new(
            sample_summary(2),
            TestTableSequence::new(vec!["<A>".into()]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            RecordError::TableCountMismatch {
                declared: 2,
                collected: 1
            }
        );
    }

    #[test]
    fn record_exposes_tables_by_one_based_index() {
        let record = ResultsRecord::new(
            sample_summary(2),
            TestTableSequence::new(vec!["<A>".into(), "<B>".into()]),
        )
        .unwrap();
        assert_eq!(record.test_tables().table(0), None);
        assert_eq!(record.test_tables().table(1), Some("<A>"));
        assert_eq!(record.test_tables().table(2), Some("<B>"));
        assert_eq!(record.test_tables().table(3), None);
        assert!(record.result_passed());
    }

    #[test]
    fn record_with_zero_tests_is_valid() {
        let record = ResultsRecord::new(sample_summary(0), TestTableSequence::default()).unwrap();
        assert!(record.test_tables().is_empty());
        assert_eq!(record.num_test_total(), 0);
    }
}
