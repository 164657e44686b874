// Run Reporter
// Renders a finished run as terminal text, JUnit XML, TAP or JSON

use crate::error::{ServiceError, ServiceResult};
use crate::model::{ActionResult, ActionStatus, RunReport, RunVerdict};

use std::fmt;

/// Output format for run reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// JUnit XML format (for CI systems)
    JUnit,
    /// TAP (Test Anything Protocol) format
    Tap,
    /// Human-readable terminal output
    Terminal,
    Json,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::JUnit => write!(f, "junit"),
            ReportFormat::Tap => write!(f, "tap"),
            ReportFormat::Terminal => write!(f, "terminal"),
            ReportFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "junit" | "junit-xml" | "xml" => Ok(ReportFormat::JUnit),
            "tap" => Ok(ReportFormat::Tap),
            "terminal" | "text" | "console" => Ok(ReportFormat::Terminal),
            "json" => Ok(ReportFormat::Json),
            _ => Err(format!(
                "Unknown report format '{}'. Valid formats: junit, tap, terminal, json",
                s
            )),
        }
    }
}

/// Renders run reports in various formats
pub struct RunReporter;

impl RunReporter {
    /// Generate a report in the specified format
    pub fn report(report: &RunReport, format: ReportFormat) -> ServiceResult<String> {
        match format {
            ReportFormat::JUnit => Ok(Self::to_junit_xml(report)),
            ReportFormat::Tap => Ok(Self::to_tap(report)),
            ReportFormat::Terminal => Ok(Self::to_terminal(report)),
            ReportFormat::Json => Self::to_json(report),
        }
    }

    pub fn to_json(report: &RunReport) -> ServiceResult<String> {
        serde_json::to_string_pretty(report).map_err(|e| ServiceError::Report(e.to_string()))
    }

    /// One testsuite per matrix, one testcase per action
    pub fn to_junit_xml(report: &RunReport) -> String {
        let all: Vec<&ActionResult> = report.matrices.iter().flat_map(|m| m.results()).collect();
        let failures = all.iter().filter(|r| r.is_failed()).count();
        let skipped = all.iter().filter(|r| r.status == ActionStatus::Skipped).count();

        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!(
            "<testsuites name=\"{}\" tests=\"{}\" failures=\"{}\" skipped=\"{}\" errors=\"0\" time=\"{:.3}\">\n",
            xml_escape(&report.user),
            all.len(),
            failures,
            skipped,
            report.duration().as_secs_f64()
        ));

        for matrix in &report.matrices {
            xml.push_str(&format!(
                "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" skipped=\"{}\" errors=\"0\" time=\"{:.3}\">\n",
                xml_escape(&matrix.name),
                matrix.results().count(),
                matrix.count(ActionStatus::Failed),
                matrix.count(ActionStatus::Skipped),
                matrix.duration.as_secs_f64()
            ));

            for result in matrix.results() {
                xml.push_str(&format!(
                    "    <testcase classname=\"{}.{}\" name=\"{} ({})\" time=\"{:.3}\"",
                    xml_escape(&matrix.name),
                    xml_escape(&result.step),
                    xml_escape(&result.action_id),
                    xml_escape(&result.action_type),
                    result.duration.as_secs_f64()
                ));

                match result.status {
                    ActionStatus::Passed => xml.push_str(" />\n"),
                    ActionStatus::Skipped => {
                        xml.push_str(">\n");
                        xml.push_str(&format!(
                            "      <skipped message=\"{}\" />\n",
                            xml_escape(&result.comment)
                        ));
                        xml.push_str("    </testcase>\n");
                    }
                    ActionStatus::Failed | ActionStatus::Pending => {
                        xml.push_str(">\n");
                        xml.push_str(&format!(
                            "      <failure message=\"{}\">\n",
                            xml_escape(&result.comment)
                        ));
                        if let Some(details) = &result.details {
                            for row in details.mismatches() {
                                xml.push_str(&format!(
                                    "        {}: expected '{}', actual '{}'\n",
                                    xml_escape(&row.name),
                                    xml_escape(&row.expected),
                                    xml_escape(row.actual.as_deref().unwrap_or("<missing>"))
                                ));
                            }
                        }
                        if let Some(cause) = &result.cause {
                            xml.push_str(&format!("        {}\n", xml_escape(cause)));
                        }
                        xml.push_str("      </failure>\n");
                        xml.push_str("    </testcase>\n");
                    }
                }
            }

            xml.push_str("  </testsuite>\n");
        }

        xml.push_str("</testsuites>\n");
        xml
    }

    /// TAP version 13 output, one test point per action
    pub fn to_tap(report: &RunReport) -> String {
        let all: Vec<(&str, &ActionResult)> = report
            .matrices
            .iter()
            .flat_map(|m| m.results().map(move |r| (m.name.as_str(), r)))
            .collect();

        let mut tap = String::new();
        tap.push_str("TAP version 13\n");
        tap.push_str(&format!("1..{}\n", all.len()));

        for (i, (matrix, result)) in all.iter().enumerate() {
            let number = i + 1;
            let name = format!("{} / {} / {}", matrix, result.step, result.action_id);
            match result.status {
                ActionStatus::Passed => tap.push_str(&format!("ok {} - {}\n", number, name)),
                ActionStatus::Skipped => tap.push_str(&format!(
                    "ok {} - {} # SKIP {}\n",
                    number, name, result.comment
                )),
                ActionStatus::Failed | ActionStatus::Pending => {
                    tap.push_str(&format!("not ok {} - {}\n", number, name));
                    tap.push_str("  ---\n");
                    tap.push_str(&format!("  duration_ms: {}\n", result.duration.as_millis()));
                    tap.push_str(&format!("  message: \"{}\"\n", result.comment));
                    if let Some(reason) = result.fail_reason {
                        tap.push_str(&format!("  reason: {:?}\n", reason));
                    }
                    tap.push_str("  ...\n");
                }
            }
        }

        let passed = all.iter().filter(|(_, r)| r.is_passed()).count();
        let failed = all.iter().filter(|(_, r)| r.is_failed()).count();
        tap.push_str(&format!(
            "# tests {}\n# pass {}\n# fail {}\n# duration {:.3}s\n",
            all.len(),
            passed,
            failed,
            report.duration().as_secs_f64()
        ));
        tap
    }

    /// Human-readable terminal output
    pub fn to_terminal(report: &RunReport) -> String {
        let mut out = String::new();

        out.push_str(&format!("\nRun by {}: {}\n", report.user, report.verdict));
        out.push_str(&"=".repeat(60));
        out.push('\n');

        for matrix in &report.matrices {
            out.push_str(&format!(
                "Matrix: {} [{:?}] ({:.2}s)\n",
                matrix.name,
                matrix.verdict,
                matrix.duration.as_secs_f64()
            ));

            for step in &matrix.steps {
                out.push_str(&format!("  Step {} [{:?}]", step.name, step.status));
                if let Some(comment) = &step.comment {
                    out.push_str(&format!(" - {}", comment));
                }
                out.push('\n');

                for result in &step.results {
                    let symbol = match result.status {
                        ActionStatus::Passed => "+",
                        ActionStatus::Failed => "x",
                        ActionStatus::Skipped => "-",
                        ActionStatus::Pending => "?",
                    };
                    out.push_str(&format!(
                        "    [{}] {} ({}) {:.2}s {}\n",
                        symbol,
                        result.action_id,
                        result.action_type,
                        result.duration.as_secs_f64(),
                        result.comment
                    ));
                }
            }
        }

        out.push_str(&"-".repeat(60));
        out.push('\n');

        let all: Vec<&ActionResult> = report.matrices.iter().flat_map(|m| m.results()).collect();
        let failed = all.iter().filter(|r| r.is_failed()).count();
        let skipped = all.iter().filter(|r| r.status == ActionStatus::Skipped).count();
        let status_line = match report.verdict {
            RunVerdict::Successful => format!(
                "  All {} actions passed ({:.2}s)",
                all.len() - skipped,
                report.duration().as_secs_f64()
            ),
            _ => format!(
                "  {} of {} actions failed ({:.2}s)",
                failed,
                all.len(),
                report.duration().as_secs_f64()
            ),
        };
        out.push_str(&status_line);
        out.push('\n');

        if skipped > 0 {
            out.push_str(&format!("  {} actions skipped\n", skipped));
        }
        for failure in &report.teardown_failures {
            out.push_str(&format!("  teardown: {}\n", failure));
        }

        out.push('\n');
        out
    }
}

/// Escape special XML characters
fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MatrixReport, MatrixState, StepOutcome, TeardownFailure};
    use chrono::Utc;
    use std::time::Duration;

    fn make_run() -> RunReport {
        let orders = MatrixReport::new(
            "orders",
            MatrixState::Finished,
            vec![
                StepOutcome::from_results(
                    "Setup",
                    vec![ActionResult::passed("2 value(s) set").bind("id1", "SetStatic", "Setup")],
                    Duration::from_millis(5),
                ),
                StepOutcome::from_results(
                    "Verify",
                    vec![ActionResult::failed("1 of 1 fields differ: Price <10>")
                        .bind("id2", "CompareValues", "Verify")],
                    Duration::from_millis(5),
                ),
                StepOutcome::skipped(
                    "Cleanup",
                    vec![ActionResult::skipped("Skipped after failure of step 'Verify'")
                        .bind("id3", "SetStatic", "Cleanup")],
                    "Skipped after failure of step 'Verify'",
                ),
            ],
            Duration::from_millis(20),
        );
        let mut run = RunReport::new("admin", vec![orders], Utc::now(), false);
        run.teardown_failures.push(TeardownFailure {
            key: "router".to_string(),
            message: "already closed".to_string(),
        });
        run
    }

    #[test]
    fn test_junit_xml_output() {
        let xml = RunReporter::to_junit_xml(&make_run());

        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.contains("<testsuite name=\"orders\""));
        assert!(xml.contains("tests=\"3\""));
        assert!(xml.contains("failures=\"1\""));
        assert!(xml.contains("<skipped message="));
        assert!(xml.contains("Price &lt;10&gt;"));
    }

    #[test]
    fn test_tap_output() {
        let tap = RunReporter::to_tap(&make_run());

        assert!(tap.starts_with("TAP version 13\n"));
        assert!(tap.contains("1..3\n"));
        assert!(tap.contains("ok 1 - orders / Setup / id1"));
        assert!(tap.contains("not ok 2 - orders / Verify / id2"));
        assert!(tap.contains("ok 3 - orders / Cleanup / id3 # SKIP"));
        assert!(tap.contains("# fail 1"));
    }

    #[test]
    fn test_terminal_output() {
        let terminal = RunReporter::to_terminal(&make_run());

        assert!(terminal.contains("Run by admin: Failed"));
        assert!(terminal.contains("[+] id1"));
        assert!(terminal.contains("[x] id2"));
        assert!(terminal.contains("[-] id3"));
        assert!(terminal.contains("1 of 3 actions failed"));
        assert!(terminal.contains("teardown: 'router': already closed"));
    }

    #[test]
    fn test_json_output() {
        let json = RunReporter::report(&make_run(), ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["verdict"], "Failed");
        assert_eq!(value["matrices"][0]["steps"][2]["status"], "Skipped");
    }

    #[test]
    fn test_report_format_parsing() {
        assert_eq!("junit".parse::<ReportFormat>().unwrap(), ReportFormat::JUnit);
        assert_eq!("xml".parse::<ReportFormat>().unwrap(), ReportFormat::JUnit);
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!("text".parse::<ReportFormat>().unwrap(), ReportFormat::Terminal);
        assert!("html".parse::<ReportFormat>().is_err());
    }
}
