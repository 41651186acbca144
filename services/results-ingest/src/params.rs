use std::collections::HashMap;

use report::{TextRepair, decode_latin1};

pub const FIELD_RESULT: &str = "result";
pub const FIELD_SELENIUM_VERSION: &str = "selenium.version";
pub const FIELD_SELENIUM_REVISION: &str = "selenium.revision";
pub const FIELD_TOTAL_TIME: &str = "totalTime";
pub const FIELD_NUM_TEST_TOTAL: &str = "numTestTotal";
pub const FIELD_NUM_TEST_PASSES: &str = "numTestPasses";
pub const FIELD_NUM_TEST_FAILURES: &str = "numTestFailures";
pub const FIELD_NUM_COMMAND_PASSES: &str = "numCommandPasses";
pub const FIELD_NUM_COMMAND_FAILURES: &str = "numCommandFailures";
pub const FIELD_NUM_COMMAND_ERRORS: &str = "numCommandErrors";
pub const FIELD_SUITE: &str = "suite";
pub const FIELD_LOG: &str = "log";

pub fn test_table_field(index: usize) -> String {
    format!("testTable.{index}")
}

/// Decoded request fields, query string first, then the form body.
///
/// Percent-escapes are decoded to bytes and the bytes are read as ISO-8859-1,
/// the default form charset of the runner's host. Text fields are recovered
/// through [`ParameterExtractor::text`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormParams {
    pairs: Vec<(String, String)>,
    // Position of the first pair for each name.
    first_by_name: HashMap<String, usize>,
}

impl FormParams {
    pub fn parse(encoded: &[u8]) -> Self {
        let mut params = Self::default();
        params.extend_from_encoded(encoded);
        params
    }

    pub fn from_request_parts(query: Option<&str>, form_body: Option<&[u8]>) -> Self {
        let mut params = Self::default();
        if let Some(query) = query {
            params.extend_from_encoded(query.as_bytes());
        }
        if let Some(body) = form_body {
            params.extend_from_encoded(body);
        }
        params
    }

    pub fn extend_from_encoded(&mut self, encoded: &[u8]) {
        for pair in encoded.split(|byte| *byte == b'&') {
            if pair.is_empty() {
                continue;
            }
            let (name, value) = match pair.iter().position(|byte| *byte == b'=') {
                Some(split) => (&pair[..split], &pair[split + 1..]),
                None => (pair, &[][..]),
            };
            let name = decode_component(name);
            if name.is_empty() {
                continue;
            }
            self.first_by_name
                .entry(name.clone())
                .or_insert(self.pairs.len());
            self.pairs.push((name, decode_component(value)));
        }
    }

    /// First value received for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        let position = *self.first_by_name.get(name)?;
        self.pairs.get(position).map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn decode_component(raw: &[u8]) -> String {
    let spaced: Vec<u8> = raw
        .iter()
        .map(|byte| if *byte == b'+' { b' ' } else { *byte })
        .collect();
    decode_latin1(&urlencoding::decode_binary(&spaced))
}

/// Read access to the posted fields with the configured text recovery.
#[derive(Debug, Clone, Copy)]
pub struct ParameterExtractor<'a> {
    params: &'a FormParams,
    repair: TextRepair,
}

impl<'a> ParameterExtractor<'a> {
    pub fn new(params: &'a FormParams, repair: TextRepair) -> Self {
        Self { params, repair }
    }

    /// Field as received; used for status tokens and numeric counters.
    pub fn raw(&self, name: &str) -> Option<&'a str> {
        self.params.get(name)
    }

    pub fn raw_owned(&self, name: &str) -> Option<String> {
        self.raw(name).map(str::to_string)
    }

    /// Field passed through the text repair; used for suite, log and tables.
    pub fn text(&self, name: &str) -> Option<String> {
        self.raw(name).map(|value| self.repair.apply(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_decodes_plus_and_percent_escapes() {
        let params = FormParams::parse(b"suite=My+Suite&log=a%26b%3Dc&empty=&flag");
        assert_eq!(params.get("suite"), Some("My Suite"));
        assert_eq!(params.get("log"), Some("a&b=c"));
        assert_eq!(params.get("empty"), Some(""));
        assert_eq!(params.get("flag"), Some(""));
        assert_eq!(params.get("missing"), None);
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn encoded_plus_stays_literal() {
        let params = FormParams::parse(b"totalTime=1%2B2");
        assert_eq!(params.get("totalTime"), Some("1+2"));
    }

    #[test]
    fn first_value_wins_and_query_precedes_body() {
        let params =
            FormParams::from_request_parts(Some("result=passed&result=ignored"), Some(b"result=failed"));
        assert_eq!(params.get("result"), Some("passed"));
    }

    #[test]
    fn percent_decoded_utf8_is_read_as_latin1_then_repaired() {
        // "é" is 0xC3 0xA9 in UTF-8.
        let params = FormParams::parse(b"suite=caf%C3%A9&numTestTotal=1");
        assert_eq!(params.get("suite"), Some("caf\u{c3}\u{a9}"));

        let extractor = ParameterExtractor::new(&params, TextRepair::Latin1Redecode);
        assert_eq!(extractor.text(FIELD_SUITE).as_deref(), Some("café"));
        assert_eq!(extractor.raw(FIELD_NUM_TEST_TOTAL), Some("1"));

        let passthrough = ParameterExtractor::new(&params, TextRepair::Passthrough);
        assert_eq!(passthrough.text(FIELD_SUITE).as_deref(), Some("caf\u{c3}\u{a9}"));
    }

    #[test]
    fn lookups_stay_first_value_wins_across_many_fields() {
        let count = 50_000;
        let first: String = (1..=count)
            .map(|index| format!("testTable.{index}=first-{index}"))
            .collect::<Vec<_>>()
            .join("&");
        let mut params = FormParams::parse(first.as_bytes());
        params.extend_from_encoded(b"testTable.1=late&testTable.50000=late&extra=x");

        assert_eq!(params.len(), count + 3);
        let extractor = ParameterExtractor::new(&params, TextRepair::Passthrough);
        for index in 1..=count {
            assert_eq!(
                extractor.raw(&test_table_field(index)),
                Some(format!("first-{index}").as_str())
            );
        }
        assert_eq!(params.get("extra"), Some("x"));
    }

    #[test]
    fn empty_names_are_skipped() {
        let params = FormParams::parse(b"=orphan&&a=1");
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("a"), Some("1"));
    }

    #[test]
    fn test_table_field_is_one_based_name() {
        assert_eq!(test_table_field(1), "testTable.1");
        assert_eq!(test_table_field(12), "testTable.12");
    }
}
