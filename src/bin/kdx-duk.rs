use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::Parser;
use log::{info, warn};

use kira_kmer_duk::pipeline::ReadSink;
use kira_kmer_duk::*;

/// Filter, trim or mask reads by k-mer matches against reference sequences.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input FASTA/FASTQ(.gz); `-` reads stdin
    #[arg(long = "in")]
    input: PathBuf,
    /// Mate input
    #[arg(long = "in2")]
    input2: Option<PathBuf>,
    /// Treat a single input as interleaved pairs
    #[arg(long)]
    interleaved: bool,
    /// Reads that pass
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    out2: Option<PathBuf>,
    /// Reads that were removed
    #[arg(long)]
    outm: Option<PathBuf>,
    #[arg(long)]
    outm2: Option<PathBuf>,
    /// Surviving mates of removed pairs
    #[arg(long)]
    outs: Option<PathBuf>,

    /// Reference files, comma separated
    #[arg(long = "ref", value_delimiter = ',')]
    refs: Vec<PathBuf>,
    /// Literal reference sequences, comma separated
    #[arg(long, value_delimiter = ',')]
    literal: Vec<String>,
    /// What to do with matches: f (filter), r/l (trim right/left), or a mask symbol
    #[arg(long, default_value = "f")]
    mode: String,
    /// References used only for filtering
    #[arg(long, value_delimiter = ',')]
    fref: Vec<PathBuf>,
    /// References used only for masking
    #[arg(long, value_delimiter = ',')]
    mref: Vec<PathBuf>,
    /// References used only for right trimming
    #[arg(long, value_delimiter = ',')]
    rref: Vec<PathBuf>,
    /// References used only for left trimming
    #[arg(long, value_delimiter = ',')]
    lref: Vec<PathBuf>,
    #[arg(long, value_delimiter = ',')]
    fliteral: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    mliteral: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    rliteral: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    lliteral: Vec<String>,

    #[arg(short = 'k', long, default_value_t = 27)]
    k: usize,
    /// Shortest k-mer used at read tips (enables short k-mers)
    #[arg(long)]
    mink: Option<usize>,
    #[arg(long, default_value_t = 0)]
    hdist: usize,
    #[arg(long, default_value_t = 0)]
    qhdist: usize,
    #[arg(long, default_value_t = 0)]
    edist: usize,
    #[arg(long)]
    hdist2: Option<usize>,
    #[arg(long)]
    qhdist2: Option<usize>,
    #[arg(long)]
    edist2: Option<usize>,
    /// Do not match reverse complements
    #[arg(long)]
    no_rcomp: bool,
    /// Keep the middle base of each k-mer significant
    #[arg(long)]
    no_mask_middle: bool,
    /// Do not create variants through N
    #[arg(long)]
    forbid_n: bool,
    /// Shard backend: array|forest|table
    #[arg(long, default_value = "array")]
    table: String,
    /// Fraction of the memory budget to preallocate
    #[arg(long)]
    prealloc: Option<f64>,

    #[arg(long)]
    threads: Option<usize>,
    /// Keep output in input order
    #[arg(long)]
    ordered: bool,
    /// Remove a pair only when both reads are bad
    #[arg(long)]
    remove_if_both_bad: bool,
    #[arg(long, default_value_t = 10)]
    min_len: usize,
    #[arg(long)]
    max_len: Option<usize>,
    /// Minimum length as a fraction of the original
    #[arg(long, default_value_t = 0.0)]
    mlf: f32,
    /// Reads need more than this many k-mer hits to be filtered
    #[arg(long, default_value_t = 0)]
    max_bad_kmers: usize,
    #[arg(long)]
    find_best_match: bool,
    #[arg(long)]
    rename: bool,
    #[arg(long)]
    use_ref_names: bool,
    #[arg(long, default_value_t = 0)]
    trim_pad: usize,
    #[arg(long)]
    ktrim_exclusive: bool,
    #[arg(long)]
    trim_pairs_evenly: bool,
    /// Keep k-mer trimmed reads out of the removed-reads output
    #[arg(long)]
    no_trimmed_to_bad: bool,
    #[arg(long, default_value_t = 0)]
    speed: u64,
    #[arg(long, default_value_t = 1)]
    qskip: usize,
    #[arg(long, default_value_t = 1)]
    min_skip: usize,
    #[arg(long, default_value_t = 99)]
    max_skip: usize,
    #[arg(long, default_value_t = 0)]
    restrict_left: usize,
    #[arg(long, default_value_t = 0)]
    restrict_right: usize,
    #[arg(long)]
    skip_r1: bool,
    #[arg(long)]
    skip_r2: bool,

    /// Entropy cutoff; negative disables
    #[arg(long, default_value_t = -1.0, allow_negative_numbers = true)]
    entropy: f32,
    #[arg(long, default_value_t = 50)]
    entropy_window: usize,
    #[arg(long, default_value_t = 5)]
    entropy_k: usize,

    #[arg(long, default_value_t = 0)]
    ftl: usize,
    #[arg(long)]
    ftr: Option<usize>,
    #[arg(long, default_value_t = 0)]
    ftr2: usize,
    #[arg(long, default_value_t = 0)]
    ftm: usize,
    /// Quality trim: r, l or rl
    #[arg(long)]
    qtrim: Option<String>,
    #[arg(long, default_value_t = 6)]
    trimq: u8,
    #[arg(long, default_value_t = 0)]
    maq: u8,
    #[arg(long)]
    max_ns: Option<usize>,
    #[arg(long, default_value_t = 0.0)]
    mbf: f32,
    #[arg(long)]
    chastity_filter: bool,
    /// Allowed barcodes, comma separated
    #[arg(long, value_delimiter = ',')]
    barcodes: Vec<String>,
    #[arg(long)]
    remove_bad_barcodes: bool,
    #[arg(long)]
    fail_bad_barcodes: bool,
    /// Trim adapters by pair overlap
    #[arg(long)]
    tbo: bool,
    #[arg(long)]
    loose_overlap: bool,
    #[arg(long)]
    min_overlap: Option<usize>,
    #[arg(long)]
    min_insert: Option<usize>,

    #[arg(long, default_value_t = 0)]
    skip_reads: u64,
    /// Stop after this many pairs
    #[arg(long)]
    reads: Option<u64>,

    /// Per-scaffold statistics
    #[arg(long)]
    stats: Option<PathBuf>,
    #[arg(long)]
    rpkm: Option<PathBuf>,
    #[arg(long)]
    refstats: Option<PathBuf>,
    /// Histogram of k-mer hits per read
    #[arg(long)]
    khist: Option<PathBuf>,
    /// Dump stored k-mers of every loaded index
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Increase logging
    #[arg(short, long)]
    verbose: bool,
    #[arg(short, long)]
    quiet: bool,
}

fn init_log(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    stderrlog::new()
        .module(module_path!())
        .module("kira_kmer_duk")
        .quiet(quiet)
        .verbosity(if verbose { 3 } else { 2 })
        .timestamp(stderrlog::Timestamp::Off)
        .init()
        .context("logger already initialized")
}

fn parse_table(s: &str) -> anyhow::Result<TableKind> {
    Ok(match s {
        "array" => TableKind::Array,
        "forest" => TableKind::Forest,
        "table" => TableKind::Table,
        _ => bail!("unknown table kind {s:?}"),
    })
}

fn parse_mode(s: &str) -> anyhow::Result<(MatchMode, Option<MaskStyle>)> {
    Ok(match s {
        "f" | "filter" => (MatchMode::Filter, None),
        "r" | "right" => (MatchMode::TrimRight, None),
        "l" | "left" => (MatchMode::TrimLeft, None),
        "lc" | "lowercase" => (MatchMode::Mask, Some(MaskStyle::Lowercase)),
        _ if s.len() == 1 => (MatchMode::Mask, Some(MaskStyle::Symbol(s.as_bytes()[0]))),
        _ => bail!("unknown mode {s:?}"),
    })
}

fn reference_set(files: &[PathBuf], literals: &[String]) -> ReferenceSet {
    let mut refs = ReferenceSet::default();
    refs.files.extend(files.iter().cloned());
    refs.literals.extend(literals.iter().cloned());
    refs
}

fn build_config(a: &Args) -> anyhow::Result<DukConfig> {
    let (mode, mask_style) = parse_mode(&a.mode)?;
    let refs = reference_set(&a.refs, &a.literal);

    let mut cfg = DukConfig::default()
        .k(a.k)
        .hdist(a.hdist)
        .qhdist(a.qhdist)
        .edist(a.edist)
        .rcomp(!a.no_rcomp)
        .mask_middle(!a.no_mask_middle)
        .forbid_ns(a.forbid_n)
        .table(parse_table(&a.table)?)
        .ordered(a.ordered)
        .min_read_len(a.min_len)
        .min_len_fraction(a.mlf)
        .max_bad_kmers(a.max_bad_kmers)
        .find_best_match(a.find_best_match)
        .rename(a.rename)
        .use_ref_names(a.use_ref_names)
        .trim_pad(a.trim_pad)
        .ktrim_exclusive(a.ktrim_exclusive)
        .trim_pairs_evenly(a.trim_pairs_evenly)
        .add_trimmed_to_bad(!a.no_trimmed_to_bad)
        .speed(a.speed)
        .qskip(a.qskip)
        .ref_skip(a.min_skip, a.max_skip)
        .restrict_left(a.restrict_left)
        .restrict_right(a.restrict_right)
        .skip_r1(a.skip_r1)
        .skip_r2(a.skip_r2)
        .entropy(EntropySettings {
            k: a.entropy_k,
            window: a.entropy_window,
            cutoff: a.entropy,
            verify: false,
        })
        .force_trim(ForceTrim {
            left: a.ftl,
            right: a.ftr,
            right2: a.ftr2,
            modulo: a.ftm,
        })
        .min_avg_quality(a.maq, 0)
        .min_base_frequency(a.mbf)
        .chastity_filter(a.chastity_filter)
        .trim_by_overlap(a.tbo)
        .strict_overlap(!a.loose_overlap)
        .overlap_minimums(a.min_overlap, a.min_insert)
        .skip_reads(a.skip_reads)
        .match_histogram(a.khist.is_some())
        .generic_references(refs)
        .generic_mode(mode);

    let per_mode = [
        (MatchMode::Filter, &a.fref, &a.fliteral),
        (MatchMode::Mask, &a.mref, &a.mliteral),
        (MatchMode::TrimRight, &a.rref, &a.rliteral),
        (MatchMode::TrimLeft, &a.lref, &a.lliteral),
    ];
    for (m, files, literals) in per_mode {
        if !files.is_empty() || !literals.is_empty() {
            cfg = cfg.mode_references(m, reference_set(files, literals));
        }
    }

    if let Some(style) = mask_style {
        cfg = cfg.mask_style(style);
    }
    if let Some(m) = a.mink {
        cfg = cfg.mink(m).use_short_kmers(true);
    }
    if let Some(d) = a.hdist2 {
        cfg = cfg.hdist2(d);
    }
    if let Some(d) = a.qhdist2 {
        cfg = cfg.qhdist2(d);
    }
    if let Some(d) = a.edist2 {
        cfg = cfg.edist2(d);
    }
    if let Some(p) = a.prealloc {
        cfg = cfg.prealloc(p);
    }
    if let Some(n) = a.threads {
        cfg = cfg.threads(n);
    }
    if a.remove_if_both_bad {
        cfg = cfg.pair_policy(PairPolicy::BothBad);
    }
    if let Some(n) = a.max_len {
        cfg = cfg.max_read_len(n);
    }
    if let Some(n) = a.max_ns {
        cfg = cfg.max_ns(n);
    }
    if let Some(n) = a.reads {
        cfg = cfg.max_reads(n);
    }
    if let Some(q) = &a.qtrim {
        cfg = cfg.quality_trim(QualityTrim {
            left: q.contains('l'),
            right: q.contains('r'),
            trimq: a.trimq,
        });
    }
    if !a.barcodes.is_empty() || a.remove_bad_barcodes || a.fail_bad_barcodes {
        cfg = cfg.barcodes(BarcodeFilter {
            allowed: (!a.barcodes.is_empty()).then(|| a.barcodes.iter().cloned().collect::<HashSet<_>>()),
            remove_bad: a.remove_bad_barcodes,
            fail_bad: a.fail_bad_barcodes,
            fail_if_missing: false,
        });
    }
    Ok(cfg)
}

fn open_sink(first: Option<&PathBuf>, second: Option<&PathBuf>) -> anyhow::Result<Option<FastxWriter>> {
    first
        .map(|p| {
            FastxWriter::create(p, second.map(PathBuf::as_path))
                .with_context(|| format!("cannot create {}", p.display()))
        })
        .transpose()
}

fn create(path: &Path) -> anyhow::Result<BufWriter<File>> {
    let f = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    Ok(BufWriter::new(f))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_log(args.quiet, args.verbose)?;

    let settings = build_config(&args)?.resolve()?;
    let duk = Duk::new(settings)?;

    let mut source = FastxSource::open(&args.input, args.input2.as_deref(), args.interleaved)?
        .with_max_reads(duk.settings().max_reads);

    let mut passed = open_sink(args.out.as_ref(), args.out2.as_ref())?;
    let mut bad = open_sink(args.outm.as_ref(), args.outm2.as_ref())?;
    let mut singles = open_sink(args.outs.as_ref(), None)?;
    let sinks = Sinks {
        passed: passed.as_mut().map(|w| w as &mut dyn ReadSink),
        bad: bad.as_mut().map(|w| w as &mut dyn ReadSink),
        singles: singles.as_mut().map(|w| w as &mut dyn ReadSink),
    };

    let report = duk.run(&mut source, sinks)?;

    let input_label = args.input.display().to_string();
    let scaffolds = duk.scaffold_report(&input_label);
    let (reads_in, bases_in) = (report.stats.reads_in, report.stats.bases_in);
    if let Some(p) = &args.stats {
        scaffolds.write_scafstats(create(p)?, reads_in, bases_in, false)?;
    }
    if let Some(p) = &args.rpkm {
        scaffolds.write_rpkm(create(p)?, reads_in)?;
    }
    if let Some(p) = &args.refstats {
        scaffolds.write_refstats(create(p)?, reads_in)?;
    }
    if let (Some(p), Some(h)) = (&args.khist, &report.histogram) {
        h.write(create(p)?)?;
    }
    if let Some(p) = &args.dump {
        duk.dump_indices(create(p)?)?;
    }

    let matched = report.stats.kfiltered_reads + report.stats.ktrimmed_reads;
    if matched == 0 && !duk.load_stats().is_empty() {
        warn!("no reads matched the reference k-mers");
    }
    if report.error_state {
        bail!("output incomplete: a writer failed during processing");
    }
    info!("done");
    Ok(())
}
