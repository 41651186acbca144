use std::io::{self, Write};

use crate::ResultsRecord;

/// Turns a [`ResultsRecord`] into the report body sent back to the runner.
pub trait ReportWriter: Send + Sync {
    fn write_report(&self, results: &ResultsRecord, out: &mut dyn Write) -> io::Result<()>;
}

/// Default report: a summary table, the suite markup, every test table in
/// order and the runner log.
///
/// Suite and table fragments are HTML produced by the runner and are embedded
/// as received. Scalar fields and the log are escaped.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlReportWriter;

impl ReportWriter for HtmlReportWriter {
    fn write_report(&self, results: &ResultsRecord, out: &mut dyn Write) -> io::Result<()> {
        let status_class = if results.result_passed() {
            "status_passed"
        } else {
            "status_failed"
        };
        writeln!(out, "<!DOCTYPE html>")?;
        writeln!(out, "<html>")?;
        writeln!(out, "<head>")?;
        writeln!(out, "<meta charset=\"UTF-8\">")?;
        writeln!(out, "<title>Test suite results</title>")?;
        writeln!(
            out,
            "<style>.status_passed {{ background-color: #ccffcc; }} .status_failed {{ background-color: #ffcccc; }}</style>"
        )?;
        writeln!(out, "</head>")?;
        writeln!(out, "<body>")?;
        writeln!(out, "<h1>Test suite results</h1>")?;

        writeln!(out, "<table class=\"summary\">")?;
        writeln!(
            out,
            "<tr><td>result:</td><td class=\"{status_class}\">{}</td></tr>",
            escape_html(results.result())
        )?;
        let num_test_total = results.num_test_total().to_string();
        let rows = [
            ("selenium.version", results.selenium_version()),
            ("selenium.revision", results.selenium_revision()),
            ("totalTime", results.total_time()),
            ("numTestTotal", Some(num_test_total.as_str())),
            ("numTestPasses", results.num_test_passes()),
            ("numTestFailures", results.num_test_failures()),
            ("numCommandPasses", results.num_command_passes()),
            ("numCommandFailures", results.num_command_failures()),
            ("numCommandErrors", results.num_command_errors()),
        ];
        for (label, value) in rows {
            writeln!(
                out,
                "<tr><td>{label}:</td><td>{}</td></tr>",
                escape_html(value.unwrap_or(""))
            )?;
        }
        writeln!(
            out,
            "<tr><td>suite:</td><td>{}</td></tr>",
            results.suite().unwrap_or("")
        )?;
        writeln!(out, "</table>")?;

        for (offset, table) in results.test_tables().iter().enumerate() {
            writeln!(out, "<div class=\"test_table\" id=\"testTable.{}\">", offset + 1)?;
            writeln!(out, "{table}")?;
            writeln!(out, "</div>")?;
        }

        writeln!(out, "<pre class=\"log\">")?;
        writeln!(out, "{}", escape_html(results.log().unwrap_or("")))?;
        writeln!(out, "</pre>")?;
        writeln!(out, "</body>")?;
        writeln!(out, "</html>")
    }
}

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
