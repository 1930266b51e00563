use crate::models::ProcessingResult;
use crate::processing::BatchReport;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

/// Output handler for processing results
pub struct OutputHandler {
    format: OutputFormat,
    writer: Option<Box<dyn Write + Send>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputFormat {
    Json,
    Jsonl,
    Console,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "jsonl" => OutputFormat::Jsonl,
            "console" => OutputFormat::Console,
            _ => OutputFormat::Console,
        }
    }
}

impl OutputHandler {
    /// Create a new output handler
    pub fn new(
        format: OutputFormat,
        file_path: Option<PathBuf>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let writer: Option<Box<dyn Write + Send>> = match (&format, file_path) {
            (OutputFormat::Console, _) => None,
            (_, Some(path)) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Box::new(BufWriter::new(file)))
            }
            (_, None) => None,
        };

        Ok(OutputHandler { format, writer })
    }

    /// Send output to an arbitrary writer instead of stdout
    pub fn with_writer(format: OutputFormat, writer: Box<dyn Write + Send>) -> Self {
        OutputHandler {
            format,
            writer: Some(writer),
        }
    }

    /// Write one processed item
    pub fn write_result(
        &mut self,
        result: &ProcessingResult,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(result)?;
                self.write_output(&format!("{}\n", json))?;
            }
            OutputFormat::Jsonl => {
                let json = serde_json::to_string(result)?;
                self.write_output(&format!("{}\n", json))?;
            }
            OutputFormat::Console => {
                let tag = if result.approved { "APPROVED" } else { "REJECTED" };
                self.write_output(&format!("[{}] {} - {}\n", tag, result.input, result.message))?;
            }
        }
        Ok(())
    }

    /// Write the end-of-run counters
    pub fn write_summary(
        &mut self,
        report: &BatchReport,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let session = &report.session;
        match &self.format {
            OutputFormat::Json | OutputFormat::Jsonl => {
                let summary = json!({
                    "summary": {
                        "loaded": session.loaded_count,
                        "tested": session.tested_count,
                        "approved": session.approved_count,
                        "rejected": session.rejected_count,
                        "offline": report.offline_items,
                        "cancelled": report.cancelled,
                    }
                });
                let json = if self.format == OutputFormat::Json {
                    serde_json::to_string_pretty(&summary)?
                } else {
                    serde_json::to_string(&summary)?
                };
                self.write_output(&format!("{}\n", json))?;
            }
            OutputFormat::Console => {
                let mut output = format!(
                    "\nTested {}/{} - Approved: {}, Rejected: {}\n",
                    session.tested_count,
                    session.loaded_count,
                    session.approved_count,
                    session.rejected_count
                );
                if report.offline_items > 0 {
                    output.push_str(&format!("{} item(s) checked offline\n", report.offline_items));
                }
                if report.cancelled {
                    output.push_str("Processing stopped before completion\n");
                }
                self.write_output(&output)?;
            }
        }
        Ok(())
    }

    fn write_output(&mut self, data: &str) -> Result<(), Box<dyn std::error::Error>> {
        match &mut self.writer {
            Some(writer) => {
                writer.write_all(data.as_bytes())?;
                writer.flush()?;
            }
            None => {
                print!("{}", data);
                io::stdout().flush()?;
            }
        }
        Ok(())
    }

    /// Flush any buffered output
    pub fn flush(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(writer) = &mut self.writer {
            writer.flush()?;
        }
        Ok(())
    }
}
