//! Report generation for training results
//!
//! Writes the lineage as delimited text, the fitness history and mutation
//! diagnostics as RON, and the fittest member both as a loadable RON
//! morphology and as a DOT graph of its networks.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use morphogen_creature::{LineageRecord, MemberId, MutationDiagnostics, PopulationMember};
use ron::ser::PrettyConfig;
use serde::Serialize;

use super::training_env::TrainingStats;

/// Serialized copy of a member, taken while its generation is current
#[derive(Debug, Clone)]
pub struct BestSnapshot {
    pub member: MemberId,
    pub generation: usize,
    pub fitness: f64,
    /// Morphology as RON; loadable as a base with `--base`
    pub morphology: String,
    /// Networks and inter-network connections as DOT
    pub dot: String,
}

impl BestSnapshot {
    pub fn capture(member: &PopulationMember, fitness: f64) -> Result<Self> {
        let morphology = ron::ser::to_string_pretty(member.morphology(), PrettyConfig::default())
            .with_context(|| format!("Failed to serialize member {}", member.id()))?;
        Ok(Self {
            member: member.id(),
            generation: member.generation(),
            fitness,
            morphology,
            dot: member.morphology().to_dot(),
        })
    }
}

/// Run-level summary written next to the lineage
#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    finished_at: String,
    generations: usize,
    best_member: Option<MemberId>,
    best_fitness: Option<f64>,
    diagnostics: MutationDiagnostics,
    history: &'a [TrainingStats],
}

/// Writes report files into one output directory
pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write every report file, creating the output directory if needed
    pub fn generate(
        &self,
        lineage: &[LineageRecord],
        stats_history: &[TrainingStats],
        best: Option<&BestSnapshot>,
        diagnostics: MutationDiagnostics,
    ) -> Result<()> {
        fs::create_dir_all(&self.output_dir).context("Failed to create output directory")?;

        let lineage_path = self.output_dir.join("lineage.csv");
        fs::write(&lineage_path, Self::lineage_csv(lineage)).context("Failed to write lineage")?;

        let summary = RunSummary {
            finished_at: chrono::Utc::now().to_rfc3339(),
            generations: stats_history.len(),
            best_member: best.map(|b| b.member),
            best_fitness: best.map(|b| b.fitness),
            diagnostics,
            history: stats_history,
        };
        let summary_text =
            ron::ser::to_string_pretty(&summary, PrettyConfig::default()).context("Failed to serialize summary")?;
        fs::write(self.output_dir.join("summary.ron"), summary_text).context("Failed to write summary")?;

        if let Some(best) = best {
            fs::write(self.output_dir.join("best.ron"), &best.morphology).context("Failed to write best morphology")?;
            fs::write(self.output_dir.join("best.dot"), &best.dot).context("Failed to write best DOT graph")?;
        }

        log::info!("Report generated: {}", self.output_dir.display());
        Ok(())
    }

    /// One row per evaluated member; parents are joined with `;`
    fn lineage_csv(lineage: &[LineageRecord]) -> String {
        let mut csv = String::from("generation,member,parents,coherence,fitness,avg_fitness,neurons,connections\n");
        for record in lineage {
            let parents = record
                .parents
                .iter()
                .map(|p| p.raw().to_string())
                .collect::<Vec<_>>()
                .join(";");
            let _ = writeln!(
                csv,
                "{},{},{},{:.6},{:.6},{:.6},{},{}",
                record.generation,
                record.member.raw(),
                parents,
                record.coherence,
                record.fitness,
                record.avg_fitness,
                record.neurons,
                record.connections
            );
        }
        csv
    }
}
