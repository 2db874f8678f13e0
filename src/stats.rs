//! Run counters, the match-count histogram and the per-scaffold report writers.

use std::io::{self, Write};

use log::info;

use crate::config::HITCOUNT_LEN;
use crate::scaffold::{ScaffoldCatalog, SharedScaffoldCounts};

/// Read and base totals per processing stage. Each thread keeps its own copy; copies are
/// merged when the run ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub reads_in: u64,
    pub bases_in: u64,
    pub reads_out: u64,
    pub bases_out: u64,
    pub bad_header_reads: u64,
    pub bad_header_bases: u64,
    pub ftrimmed_reads: u64,
    pub ftrimmed_bases: u64,
    pub kfiltered_reads: u64,
    pub kfiltered_bases: u64,
    pub ktrimmed_reads: u64,
    pub ktrimmed_bases: u64,
    pub otrimmed_reads: u64,
    pub otrimmed_bases: u64,
    pub qtrimmed_reads: u64,
    pub qtrimmed_bases: u64,
    pub qfiltered_reads: u64,
    pub qfiltered_bases: u64,
    pub efiltered_reads: u64,
    pub efiltered_bases: u64,
}

impl ProcessStats {
    pub fn merge(&mut self, o: &ProcessStats) {
        self.reads_in += o.reads_in;
        self.bases_in += o.bases_in;
        self.reads_out += o.reads_out;
        self.bases_out += o.bases_out;
        self.bad_header_reads += o.bad_header_reads;
        self.bad_header_bases += o.bad_header_bases;
        self.ftrimmed_reads += o.ftrimmed_reads;
        self.ftrimmed_bases += o.ftrimmed_bases;
        self.kfiltered_reads += o.kfiltered_reads;
        self.kfiltered_bases += o.kfiltered_bases;
        self.ktrimmed_reads += o.ktrimmed_reads;
        self.ktrimmed_bases += o.ktrimmed_bases;
        self.otrimmed_reads += o.otrimmed_reads;
        self.otrimmed_bases += o.otrimmed_bases;
        self.qtrimmed_reads += o.qtrimmed_reads;
        self.qtrimmed_bases += o.qtrimmed_bases;
        self.qfiltered_reads += o.qfiltered_reads;
        self.qfiltered_bases += o.qfiltered_bases;
        self.efiltered_reads += o.efiltered_reads;
        self.efiltered_bases += o.efiltered_bases;
    }

    pub fn reads_removed(&self) -> u64 {
        self.reads_in.saturating_sub(self.reads_out)
    }

    pub fn bases_removed(&self) -> u64 {
        self.bases_in.saturating_sub(self.bases_out)
    }

    /// Log one line per non-empty stage, then the totals.
    pub fn log_summary(&self) {
        let pct = |n: u64, d: u64| if d == 0 { 0.0 } else { n as f64 * 100.0 / d as f64 };
        info!("Input:\t{} reads\t{} bases", self.reads_in, self.bases_in);
        let rows = [
            ("Bad headers", self.bad_header_reads, self.bad_header_bases),
            ("FTrimmed", self.ftrimmed_reads, self.ftrimmed_bases),
            ("QTrimmed", self.qtrimmed_reads, self.qtrimmed_bases),
            ("KTrimmed", self.ktrimmed_reads, self.ktrimmed_bases),
            ("Trimmed by overlap", self.otrimmed_reads, self.otrimmed_bases),
            ("Contaminants", self.kfiltered_reads, self.kfiltered_bases),
            ("Low quality discards", self.qfiltered_reads, self.qfiltered_bases),
            ("Low entropy discards", self.efiltered_reads, self.efiltered_bases),
        ];
        for (label, reads, bases) in rows {
            if reads > 0 || bases > 0 {
                info!(
                    "{label}:\t{reads} reads ({:.2}%)\t{bases} bases ({:.2}%)",
                    pct(reads, self.reads_in),
                    pct(bases, self.bases_in)
                );
            }
        }
        info!(
            "Removed:\t{} reads ({:.2}%)\t{} bases ({:.2}%)",
            self.reads_removed(),
            pct(self.reads_removed(), self.reads_in),
            self.bases_removed(),
            pct(self.bases_removed(), self.bases_in)
        );
        info!(
            "Result:\t{} reads ({:.2}%)\t{} bases ({:.2}%)",
            self.reads_out,
            pct(self.reads_out, self.reads_in),
            self.bases_out,
            pct(self.bases_out, self.bases_in)
        );
    }
}

/// Reads per number of matching k-mers, capped at [`HITCOUNT_LEN`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HitHistogram {
    counts: Vec<u64>,
}

impl Default for HitHistogram {
    fn default() -> Self {
        Self {
            counts: vec![0; HITCOUNT_LEN + 1],
        }
    }
}

impl HitHistogram {
    pub fn add(&mut self, other: &[u64]) {
        for (a, b) in self.counts.iter_mut().zip(other) {
            *a += b;
        }
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// `hits<TAB>reads<TAB>percent`, trailing zero rows omitted; the last bucket collects
    /// everything at or above the cap.
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        let total: u64 = self.counts.iter().sum();
        let mult = 100.0 / total.max(1) as f64;
        let last = self.counts.iter().rposition(|&c| c > 0).unwrap_or(0);
        writeln!(w, "#Hits\tReads\tPercent")?;
        for (i, &c) in self.counts[..=last].iter().enumerate() {
            let label = if i == HITCOUNT_LEN { format!("{i}+") } else { i.to_string() };
            writeln!(w, "{label}\t{c}\t{:.4}", c as f64 * mult)?;
        }
        w.flush()
    }
}

/// Hits of one scaffold (or one reference source).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScaffoldRow {
    pub name: String,
    pub length: u64,
    pub scaffolds: u64,
    pub reads: u64,
    pub bases: u64,
}

/// Snapshot of the per-scaffold counters with the report writers.
#[derive(Clone, Debug)]
pub struct ScaffoldReport {
    rows: Vec<ScaffoldRow>,
    sources: Vec<ScaffoldRow>,
    input_label: String,
    print_zero: bool,
}

impl ScaffoldReport {
    /// `input_label` is written on each report's `#File` line.
    pub fn collect(
        catalog: &ScaffoldCatalog,
        counts: &SharedScaffoldCounts,
        input_label: impl Into<String>,
    ) -> Self {
        let rows: Vec<ScaffoldRow> = catalog
            .ids()
            .map(|id| ScaffoldRow {
                name: catalog.name(id).to_string(),
                length: catalog.length(id),
                scaffolds: 1,
                reads: counts.reads(id),
                bases: counts.bases(id),
            })
            .collect();

        let mut sources: Vec<ScaffoldRow> = catalog
            .source_names()
            .iter()
            .map(|n| ScaffoldRow {
                name: strip_to_core(n).to_string(),
                length: 0,
                scaffolds: 0,
                reads: 0,
                bases: 0,
            })
            .collect();
        for (id, row) in catalog.ids().zip(&rows) {
            if let Some(src) = catalog.source_of(id) {
                let agg = &mut sources[src];
                agg.length += row.length;
                agg.scaffolds += 1;
                agg.reads += row.reads;
                agg.bases += row.bases;
            }
        }
        Self {
            rows,
            sources,
            input_label: input_label.into(),
            print_zero: false,
        }
    }

    /// Include scaffolds without hits in every report.
    pub fn print_zero(mut self, yes: bool) -> Self {
        self.print_zero = yes;
        self
    }

    /// Report rows per reference source instead of per scaffold (scaffold stats only).
    pub fn by_source(mut self) -> Self {
        self.rows = self.sources.clone();
        self
    }

    pub fn rows(&self) -> &[ScaffoldRow] {
        &self.rows
    }

    fn mapped(&self) -> u64 {
        self.rows.iter().map(|r| r.reads).sum()
    }

    fn visible<'a>(&self, rows: &'a [ScaffoldRow]) -> impl Iterator<Item = &'a ScaffoldRow> {
        let print_zero = self.print_zero;
        rows.iter().filter(move |r| print_zero || r.reads > 0)
    }

    /// Matched reads per scaffold, most bases first.
    pub fn write_scafstats<W: Write>(
        &self,
        mut w: W,
        reads_in: u64,
        bases_in: u64,
        five_columns: bool,
    ) -> io::Result<()> {
        let mut list: Vec<&ScaffoldRow> = self.visible(&self.rows).collect();
        list.sort_by(|a, b| {
            b.bases
                .cmp(&a.bases)
                .then(b.reads.cmp(&a.reads))
                .then(a.name.cmp(&b.name))
        });
        let rsum: u64 = list.iter().map(|r| r.reads).sum();
        let bsum: u64 = list.iter().map(|r| r.bases).sum();
        let rmult = 100.0 / reads_in.max(1) as f64;
        let bmult = 100.0 / bases_in.max(1) as f64;

        writeln!(w, "#File\t{}", self.input_label)?;
        if five_columns {
            writeln!(w, "#Total\t{reads_in}\t{bases_in}")?;
            writeln!(
                w,
                "#Matched\t{rsum}\t{:.5}%\t{bsum}\t{:.5}%",
                rsum as f64 * rmult,
                bsum as f64 * bmult
            )?;
            writeln!(w, "#Name\tReads\tReadsPct\tBases\tBasesPct")?;
            for r in list {
                writeln!(
                    w,
                    "{}\t{}\t{:.5}%\t{}\t{:.5}%",
                    r.name,
                    r.reads,
                    r.reads as f64 * rmult,
                    r.bases,
                    r.bases as f64 * bmult
                )?;
            }
        } else {
            writeln!(w, "#Total\t{reads_in}")?;
            writeln!(w, "#Matched\t{rsum}\t{:.5}%", rsum as f64 * rmult)?;
            writeln!(w, "#Name\tReads\tReadsPct")?;
            for r in list {
                writeln!(w, "{}\t{}\t{:.5}%", r.name, r.reads, r.reads as f64 * rmult)?;
            }
        }
        w.flush()
    }

    /// Coverage and RPKM per scaffold, in catalog order.
    pub fn write_rpkm<W: Write>(&self, mut w: W, reads_in: u64) -> io::Result<()> {
        let mapped = self.mapped();
        writeln!(w, "#File\t{}", self.input_label)?;
        writeln!(w, "#Reads\t{reads_in}")?;
        writeln!(w, "#Mapped\t{mapped}")?;
        writeln!(w, "#RefSequences\t{}", self.rows.len())?;
        writeln!(w, "#Name\tLength\tBases\tCoverage\tReads\tRPKM")?;
        let mult = 1e9 / mapped.max(1) as f64;
        for r in self.visible(&self.rows) {
            let invlen = 1.0 / r.length.max(1) as f64;
            writeln!(
                w,
                "{}\t{}\t{}\t{:.4}\t{}\t{:.4}",
                r.name,
                r.length,
                r.bases,
                r.bases as f64 * invlen,
                r.reads,
                r.reads as f64 * mult * invlen
            )?;
        }
        w.flush()
    }

    /// Coverage and RPKM per reference source.
    pub fn write_refstats<W: Write>(&self, mut w: W, reads_in: u64) -> io::Result<()> {
        let mapped = self.mapped();
        writeln!(w, "#File\t{}", self.input_label)?;
        writeln!(w, "#Reads\t{reads_in}")?;
        writeln!(w, "#Mapped\t{mapped}")?;
        writeln!(w, "#References\t{}", self.sources.len())?;
        writeln!(w, "#Name\tLength\tScaffolds\tBases\tCoverage\tReads\tRPKM")?;
        let mult = 1e9 / mapped.max(1) as f64;
        for r in self.visible(&self.sources) {
            let invlen = 1.0 / r.length.max(1) as f64;
            writeln!(
                w,
                "{}\t{}\t{}\t{}\t{:.4}\t{}\t{:.4}",
                r.name,
                r.length,
                r.scaffolds,
                r.bases,
                r.bases as f64 * invlen,
                r.reads,
                r.reads as f64 * mult * invlen
            )?;
        }
        w.flush()
    }
}

/// File name without directories or sequence/compression extensions.
fn strip_to_core(path: &str) -> &str {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let mut core = name;
    for ext in [".gz", ".bz2", ".fa", ".fasta", ".fna", ".fq", ".fastq", ".txt"] {
        if let Some(s) = core.strip_suffix(ext) {
            core = s;
        }
    }
    if core.is_empty() { name } else { core }
}
