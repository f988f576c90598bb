//! Per-run outcome counts and the end-of-run summary.

use crate::classifier::{CandidatePlan, Mode};
use crate::inventory::ResourceKind;

use colored::Colorize;
use humansize::{format_size, BINARY};
use serde::Serialize;
use std::time::Duration;

/// What happened to one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Removed,
    WouldRemove,
    /// Already gone, or still in use
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub candidates: usize,
    pub removed: usize,
    pub would_remove: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl KindCounts {
    pub fn processed(&self) -> usize {
        self.removed + self.would_remove + self.skipped + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub mode: Mode,
    pub dry_run: bool,
    pub containers: KindCounts,
    pub images: KindCounts,
    pub volumes: KindCounts,
    /// Volume cleanup was requested but the runtime could not do it
    pub volumes_skipped: bool,
    pub held_back_by_age: usize,
    pub reclaimable_bytes: u64,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new(mode: Mode, dry_run: bool) -> Self {
        RunReport {
            mode,
            dry_run,
            containers: KindCounts::default(),
            images: KindCounts::default(),
            volumes: KindCounts::default(),
            volumes_skipped: false,
            held_back_by_age: 0,
            reclaimable_bytes: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Seed candidate counts from a plan before execution starts
    pub fn plan(&mut self, plan: &CandidatePlan) {
        for kind in ResourceKind::ALL {
            self.counts_mut(kind).candidates = plan.of_kind(kind).len();
        }
        self.held_back_by_age = plan.held_back_by_age();
        self.reclaimable_bytes = plan.reclaimable_bytes();
    }

    pub fn counts(&self, kind: ResourceKind) -> &KindCounts {
        match kind {
            ResourceKind::Container => &self.containers,
            ResourceKind::Image => &self.images,
            ResourceKind::Volume => &self.volumes,
        }
    }

    fn counts_mut(&mut self, kind: ResourceKind) -> &mut KindCounts {
        match kind {
            ResourceKind::Container => &mut self.containers,
            ResourceKind::Image => &mut self.images,
            ResourceKind::Volume => &mut self.volumes,
        }
    }

    pub fn record(&mut self, kind: ResourceKind, outcome: Outcome) {
        let counts = self.counts_mut(kind);
        match outcome {
            Outcome::Removed => counts.removed += 1,
            Outcome::WouldRemove => counts.would_remove += 1,
            Outcome::Skipped => counts.skipped += 1,
            Outcome::Failed => counts.failed += 1,
        }
    }

    fn totals(&self) -> KindCounts {
        ResourceKind::ALL
            .iter()
            .map(|kind| *self.counts(*kind))
            .fold(KindCounts::default(), |acc, c| KindCounts {
                candidates: acc.candidates + c.candidates,
                removed: acc.removed + c.removed,
                would_remove: acc.would_remove + c.would_remove,
                skipped: acc.skipped + c.skipped,
                failed: acc.failed + c.failed,
            })
    }

    pub fn candidates(&self) -> usize {
        self.totals().candidates
    }

    pub fn processed(&self) -> usize {
        self.totals().processed()
    }

    /// Nothing was eligible for removal
    pub fn is_clean(&self) -> bool {
        self.candidates() == 0
    }

    /// One plain-text line per resource kind
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = ResourceKind::ALL
            .iter()
            .map(|kind| {
                let counts = self.counts(*kind);
                if *kind == ResourceKind::Volume && self.volumes_skipped {
                    format!("{}: skipped (runtime too old for volume cleanup)", kind.plural())
                } else if self.dry_run {
                    format!("{}: {} would remove", kind.plural(), counts.would_remove)
                } else {
                    format!(
                        "{}: {} removed, {} skipped, {} failed",
                        kind.plural(),
                        counts.removed,
                        counts.skipped,
                        counts.failed
                    )
                }
            })
            .collect();

        if self.reclaimable_bytes > 0 {
            lines.push(format!(
                "images reclaimable: up to {}",
                format_size(self.reclaimable_bytes, BINARY)
            ));
        }
        if self.held_back_by_age > 0 {
            lines.push(format!("held back by age filter: {}", self.held_back_by_age));
        }
        lines
    }

    /// Print the summary to stdout
    pub fn print(&self) {
        let heading = format!(
            "docker-sweep: {} mode{}",
            self.mode,
            if self.dry_run { " (check only)" } else { "" }
        );
        println!("{}", heading.bold());

        if self.is_clean() {
            println!("{}", "Nothing to clean.".green());
        }
        for line in self.summary_lines() {
            println!("  {}", line);
        }

        let totals = self.totals();
        if self.dry_run {
            println!("Dry run mode: nothing was removed.");
        } else if totals.failed > 0 {
            println!("{}", format!("{} removals failed, see the run log", totals.failed).red());
        }
        println!("Finished in {:.1}s", self.elapsed.as_secs_f64());
    }
}
