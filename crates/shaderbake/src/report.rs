use std::io::Write;

use anyhow::Result;
use scheduler::{Program, ProgramStatus};
use serde::Serialize;
use shaderlib::StageSources;

#[derive(Debug, Clone, Serialize)]
pub struct ProgramReport {
    pub name: String,
    pub status: String,
    pub deferred: bool,
    pub stages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl ProgramReport {
    pub fn from_program(program: &Program<StageSources>, deferred: bool) -> Self {
        Self {
            name: program.name().to_string(),
            status: program.status().to_string(),
            deferred,
            stages: program
                .source()
                .iter()
                .map(|(stage, _)| stage.to_string())
                .collect(),
            log: program.info_log(),
        }
    }

    fn failed(&self) -> bool {
        self.status == ProgramStatus::Failed.as_str()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BakeReport {
    pub compiled: usize,
    pub failed: usize,
    pub jobs: usize,
    pub programs: Vec<ProgramReport>,
}

impl BakeReport {
    pub fn push(&mut self, program: ProgramReport) {
        if program.failed() {
            self.failed += 1;
        } else if program.status == ProgramStatus::Compiled.as_str() {
            self.compiled += 1;
        }
        self.programs.push(program);
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn write_text(&self, out: &mut impl Write) -> Result<()> {
        for program in &self.programs {
            writeln!(
                out,
                "  {:<9} {:<24} stages={} deferred={}",
                program.status,
                program.name,
                program.stages.join(","),
                program.deferred
            )?;
            if let Some(log) = &program.log {
                for line in log.lines() {
                    writeln!(out, "      {line}")?;
                }
            }
        }
        writeln!(
            out,
            "{} compiled, {} failed, {} background job(s)",
            self.compiled, self.failed, self.jobs
        )?;
        Ok(())
    }

    pub fn write_json(&self, out: &mut impl Write) -> Result<()> {
        serde_json::to_writer_pretty(&mut *out, self)?;
        writeln!(out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> BakeReport {
        let good = Program::new("good", StageSources::fullscreen("void main() {}"));
        good.set_status(ProgramStatus::Compiled);
        let bad = Program::new(
            "bad",
            StageSources::new().with_stage(shaderlib::Stage::Compute, "oops"),
        );
        bad.set_status(ProgramStatus::Failed);
        bad.set_info_log("compute stage failed to parse:\nunexpected token");

        let mut report = BakeReport::default();
        report.push(ProgramReport::from_program(&good, true));
        report.push(ProgramReport::from_program(&bad, false));
        report
    }

    #[test]
    fn counts_outcomes() {
        let report = report();
        assert_eq!(report.compiled, 1);
        assert_eq!(report.failed, 1);
        assert!(report.has_failures());
        assert_eq!(report.programs[0].stages, vec!["vertex", "fragment"]);
    }

    #[test]
    fn text_report_indents_logs() {
        let mut out = Vec::new();
        report().write_text(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("      unexpected token"));
        assert!(text.ends_with("1 compiled, 1 failed, 0 background job(s)\n"));
    }

    #[test]
    fn json_report_omits_empty_logs() {
        let mut out = Vec::new();
        report().write_json(&mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["failed"], 1);
        assert!(value["programs"][0].get("log").is_none());
        assert_eq!(value["programs"][1]["status"], "failed");
    }
}
