//! The read-processing pipeline and the [`Duk`] engine that owns the loaded indices.
//!
//! Topology: one reader thread numbers input batches, `threads` workers run the pair stage
//! machine, one writer thread hands outcomes to the sinks. Channels are bounded at twice
//! the worker count; dropping the last sender ends the downstream loop.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use crossbeam_channel::bounded;
use log::{error, info, warn};

use crate::config::{DukSettings, MatchMode};
use crate::error::DukError;
use crate::index::ShardedIndex;
use crate::loader::{LoadStats, load_index};
use crate::overlap::{InsertEstimator, MismatchRatioEstimator};
use crate::process::{BatchOutcome, ModeIndices, PairProcessor};
use crate::read::ReadPair;
use crate::scaffold::{CounterStrategy, ScaffoldCatalog, ScaffoldHits, SharedScaffoldCounts};
use crate::stats::{HitHistogram, ProcessStats, ScaffoldReport};

/// Supplies batches of read pairs; `Ok(None)` ends the input.
pub trait ReadSource: Send {
    fn next_batch(&mut self) -> Result<Option<Vec<ReadPair>>, DukError>;
}

/// Consumes batches of read pairs.
pub trait ReadSink: Send {
    fn write_batch(&mut self, pairs: &[ReadPair]) -> Result<(), DukError>;

    fn finish(&mut self) -> Result<(), DukError> {
        Ok(())
    }
}

/// Optional destinations for kept, removed and orphaned reads.
#[derive(Default)]
pub struct Sinks<'a> {
    pub passed: Option<&'a mut dyn ReadSink>,
    pub bad: Option<&'a mut dyn ReadSink>,
    pub singles: Option<&'a mut dyn ReadSink>,
}

/// Result of one processing run.
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    pub stats: ProcessStats,
    pub histogram: Option<HitHistogram>,
    /// A sink failed; output is incomplete.
    pub error_state: bool,
}

/// Loaded indices plus everything the processing threads share.
pub struct Duk {
    settings: DukSettings,
    catalog: ScaffoldCatalog,
    indices: ModeIndices,
    load_stats: Vec<(MatchMode, LoadStats)>,
    counts: SharedScaffoldCounts,
    estimator: Option<Box<dyn InsertEstimator>>,
}

impl Duk {
    /// Load one index per mode that has references.
    pub fn new(settings: DukSettings) -> Result<Self, DukError> {
        let mut catalog = ScaffoldCatalog::new();
        let mut indices = ModeIndices::default();
        let mut load_stats = Vec::new();
        info!(
            "k={} (emulated {}), mink={}, hdist={}, edist={}, modes: {:?}",
            settings.k,
            settings.kbig,
            settings.mink,
            settings.hdist,
            settings.edist,
            settings
                .references
                .active_modes()
                .iter()
                .map(|m| m.label())
                .collect::<Vec<_>>()
        );
        for mode in settings.references.active_modes() {
            let (index, stats) = load_index(mode, &settings, &mut catalog)?;
            indices.set(mode, index);
            load_stats.push((mode, stats));
        }
        let counts = SharedScaffoldCounts::new(catalog.len());
        let estimator = settings
            .overlap
            .map(|o| Box::new(MismatchRatioEstimator::new(o)) as Box<dyn InsertEstimator>);
        Ok(Self {
            settings,
            catalog,
            indices,
            load_stats,
            counts,
            estimator,
        })
    }

    /// Replace the insert-size estimator used for overlap trimming.
    pub fn with_estimator(mut self, estimator: Box<dyn InsertEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn settings(&self) -> &DukSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &ScaffoldCatalog {
        &self.catalog
    }

    pub fn index(&self, mode: MatchMode) -> Option<&ShardedIndex> {
        self.indices.get(mode)
    }

    pub fn load_stats(&self) -> &[(MatchMode, LoadStats)] {
        &self.load_stats
    }

    pub fn scaffold_counts(&self) -> &SharedScaffoldCounts {
        &self.counts
    }

    /// Snapshot of the per-scaffold hits for the statistics writers.
    pub fn scaffold_report(&self, input_label: &str) -> ScaffoldReport {
        let report = ScaffoldReport::collect(&self.catalog, &self.counts, input_label);
        if self.settings.use_ref_names {
            report.by_source()
        } else {
            report
        }
    }

    /// Write every stored k-mer of `mode` as `>id` / k-mer lines.
    pub fn dump_index<W: Write>(&self, mode: MatchMode, w: W) -> Result<(), DukError> {
        if let Some(index) = self.indices.get(mode) {
            index.write_dump(w)?;
        }
        Ok(())
    }

    /// Dump every loaded index, each under a `#<mode label>` line.
    pub fn dump_indices<W: Write>(&self, mut w: W) -> Result<(), DukError> {
        for (mode, _) in &self.load_stats {
            writeln!(w, "#{}", mode.label())?;
            self.dump_index(*mode, &mut w)?;
        }
        Ok(())
    }

    /// Process every batch of `source`, writing outcomes to `sinks`.
    ///
    /// Sink failures do not stop the run: they are logged, remaining output is dropped and
    /// the report carries `error_state`. Errors from the source or from a stage (a rejected
    /// barcode) are returned after all threads have stopped.
    pub fn run(&self, source: &mut dyn ReadSource, sinks: Sinks<'_>) -> Result<RunReport, DukError> {
        let s = &self.settings;
        let threads = s.threads.max(1);
        let strategy = CounterStrategy::choose(threads, self.catalog.len(), s.memory_budget);
        let error_state = AtomicBool::new(false);
        let worker_failed = AtomicBool::new(false);
        let started = Instant::now();

        let (read_result, worker_results, write_result) = thread::scope(|scope| {
            let (in_tx, in_rx) = bounded::<(u64, Vec<ReadPair>)>(2 * threads);
            let (out_tx, out_rx) = bounded::<(u64, BatchOutcome)>(2 * threads);

            let reader = scope.spawn(move || -> Result<(), DukError> {
                let mut skip = s.skip_reads;
                let mut n = 0u64;
                while let Some(mut batch) = source.next_batch()? {
                    if skip > 0 {
                        let d = (skip as usize).min(batch.len());
                        batch.drain(..d);
                        skip -= d as u64;
                        if batch.is_empty() {
                            continue;
                        }
                    }
                    if in_tx.send((n, batch)).is_err() {
                        break;
                    }
                    n += 1;
                }
                Ok(())
            });

            let failed = &worker_failed;
            let workers: Vec<_> = (0..threads)
                .map(|_| {
                    let (rx, tx) = (in_rx.clone(), out_tx.clone());
                    scope.spawn(move || -> Result<(ProcessStats, Option<Vec<u64>>), DukError> {
                        let hits = ScaffoldHits::new(strategy, &self.counts);
                        let mut p = PairProcessor::new(
                            s,
                            &self.indices,
                            &self.catalog,
                            hits,
                            self.estimator.as_deref(),
                        );
                        for (n, batch) in rx {
                            let out = p.process_batch(batch).inspect_err(|_| {
                                failed.store(true, Ordering::Relaxed);
                            })?;
                            if tx.send((n, out)).is_err() {
                                break;
                            }
                        }
                        Ok(p.finish())
                    })
                })
                .collect();
            drop(in_rx);
            drop(out_tx);

            let error_flag = &error_state;
            let ordered = s.ordered;
            let writer = scope.spawn(move || {
                let mut sinks = sinks;
                let mut reorder = Reorder::default();
                for (n, outcome) in out_rx {
                    if !ordered {
                        write_outcome(&mut sinks, &outcome, error_flag);
                        continue;
                    }
                    // a failed worker leaves a gap that never fills
                    let stalled = failed.load(Ordering::Relaxed) || error_flag.load(Ordering::Relaxed);
                    reorder.push(n, outcome, stalled, |o| write_outcome(&mut sinks, o, error_flag));
                }
                reorder.drain(|o| write_outcome(&mut sinks, o, error_flag));
                finish_sinks(&mut sinks, error_flag);
            });

            let read_result = join_or(reader, "reader");
            let worker_results: Vec<_> = workers.into_iter().map(|w| join_or(w, "worker")).collect();
            let write_result = writer
                .join()
                .map_err(|_| DukError::Output("writer thread panicked".into()));
            (read_result, worker_results, write_result)
        });

        read_result?;
        let mut stats = ProcessStats::default();
        let mut histogram = s.match_histogram.then(HitHistogram::default);
        for r in worker_results {
            let (ws, hist) = r?;
            stats.merge(&ws);
            if let (Some(h), Some(local)) = (histogram.as_mut(), hist) {
                h.add(&local);
            }
        }
        write_result?;

        stats.log_summary();
        info!("processed in {:.2?}", started.elapsed());
        let error_state = error_state.into_inner();
        if error_state {
            warn!("output is incomplete: a sink failed during processing");
        }
        Ok(RunReport {
            stats,
            histogram,
            error_state,
        })
    }
}

/// Releases batch outcomes in sequence order.
#[derive(Default)]
struct Reorder {
    pending: BTreeMap<u64, BatchOutcome>,
    next: u64,
}

impl Reorder {
    /// Buffer `o` and emit every outcome that is now in sequence. Once `stalled`, the
    /// buffer is flushed in key order and `o` is emitted right away.
    fn push<F: FnMut(&BatchOutcome)>(&mut self, n: u64, o: BatchOutcome, stalled: bool, mut emit: F) {
        if stalled {
            self.drain(&mut emit);
            emit(&o);
            return;
        }
        self.pending.insert(n, o);
        while let Some(o) = self.pending.remove(&self.next) {
            emit(&o);
            self.next += 1;
        }
    }

    fn drain<F: FnMut(&BatchOutcome)>(&mut self, mut emit: F) {
        for o in std::mem::take(&mut self.pending).values() {
            emit(o);
        }
    }
}

fn join_or<T>(
    h: thread::ScopedJoinHandle<'_, Result<T, DukError>>,
    what: &str,
) -> Result<T, DukError> {
    h.join()
        .map_err(|_| DukError::Output(format!("{what} thread panicked")))?
}

fn write_outcome(sinks: &mut Sinks<'_>, o: &BatchOutcome, error_flag: &AtomicBool) {
    if error_flag.load(Ordering::Relaxed) {
        return;
    }
    let targets = [
        (sinks.passed.as_deref_mut(), &o.passed),
        (sinks.bad.as_deref_mut(), &o.bad),
        (sinks.singles.as_deref_mut(), &o.singles),
    ];
    for (sink, pairs) in targets {
        if let Some(sink) = sink {
            if pairs.is_empty() {
                continue;
            }
            if let Err(e) = sink.write_batch(pairs) {
                error!("{e}");
                error_flag.store(true, Ordering::Relaxed);
                return;
            }
        }
    }
}

fn finish_sinks(sinks: &mut Sinks<'_>, error_flag: &AtomicBool) {
    for sink in [
        sinks.passed.as_deref_mut(),
        sinks.bad.as_deref_mut(),
        sinks.singles.as_deref_mut(),
    ]
    .into_iter()
    .flatten()
    {
        if let Err(e) = sink.finish() {
            error!("{e}");
            error_flag.store(true, Ordering::Relaxed);
        }
    }
}

/// In-memory source over prepared batches.
pub struct VecSource {
    batches: std::vec::IntoIter<Vec<ReadPair>>,
}

impl VecSource {
    pub fn new(pairs: Vec<ReadPair>, batch_size: usize) -> Self {
        let mut batches = Vec::new();
        let mut it = pairs.into_iter().peekable();
        while it.peek().is_some() {
            batches.push(it.by_ref().take(batch_size.max(1)).collect());
        }
        Self {
            batches: batches.into_iter(),
        }
    }
}

impl ReadSource for VecSource {
    fn next_batch(&mut self) -> Result<Option<Vec<ReadPair>>, DukError> {
        Ok(self.batches.next())
    }
}

/// In-memory sink collecting every pair it receives.
#[derive(Default)]
pub struct VecSink {
    pub pairs: Vec<ReadPair>,
}

impl ReadSink for VecSink {
    fn write_batch(&mut self, pairs: &[ReadPair]) -> Result<(), DukError> {
        self.pairs.extend_from_slice(pairs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BarcodeFilter, DukConfig, ReferenceSet};
    use crate::read::Read;

    struct FailingSink;

    impl ReadSink for FailingSink {
        fn write_batch(&mut self, _: &[ReadPair]) -> Result<(), DukError> {
            Err(DukError::Output("disk full".into()))
        }
    }

    fn reads(n: usize) -> Vec<ReadPair> {
        (0..n)
            .map(|i| {
                let mut r = Read::new(format!("r{i}"), b"ACGTTGCAACGGTTAC".to_vec(), None);
                r.numeric_id = i as u64;
                ReadPair::single(r)
            })
            .collect()
    }

    fn engine(threads: usize) -> Duk {
        let s = DukConfig::default()
            .k(7)
            .threads(threads)
            .ordered(true)
            .initial_size(64)
            .generic_references(ReferenceSet::default().with_literal("TTTTTTTTTTTT"))
            .resolve()
            .unwrap();
        Duk::new(s).unwrap()
    }

    #[test]
    fn ordered_output_keeps_input_order() {
        let duk = engine(4);
        let mut source = VecSource::new(reads(1000), 7);
        let mut out = VecSink::default();
        let report = duk
            .run(
                &mut source,
                Sinks {
                    passed: Some(&mut out),
                    ..Sinks::default()
                },
            )
            .unwrap();
        assert!(!report.error_state);
        assert_eq!(report.stats.reads_in, 1000);
        assert_eq!(report.stats.reads_out, 1000);
        let ids: Vec<u64> = out.pairs.iter().map(|p| p.first.numeric_id).collect();
        assert_eq!(ids, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn skip_reads_drops_leading_pairs() {
        let mut s = engine(2).settings().clone();
        s.skip_reads = 5;
        let duk = Duk::new(s).unwrap();
        let mut source = VecSource::new(reads(12), 4);
        let mut out = VecSink::default();
        let report = duk
            .run(
                &mut source,
                Sinks {
                    passed: Some(&mut out),
                    ..Sinks::default()
                },
            )
            .unwrap();
        assert_eq!(report.stats.reads_in, 7);
        assert_eq!(out.pairs[0].first.numeric_id, 5);
    }

    #[test]
    fn sink_failure_sets_error_state() {
        let duk = engine(2);
        let mut source = VecSource::new(reads(50), 5);
        let mut sink = FailingSink;
        let report = duk
            .run(
                &mut source,
                Sinks {
                    passed: Some(&mut sink),
                    ..Sinks::default()
                },
            )
            .unwrap();
        assert!(report.error_state);
        assert_eq!(report.stats.reads_in, 50);
    }

    #[test]
    fn loads_each_active_mode() {
        let duk = engine(1);
        assert!(duk.index(MatchMode::Filter).is_some());
        assert!(duk.index(MatchMode::Mask).is_none());
        assert_eq!(duk.load_stats().len(), 1);
        assert_eq!(duk.catalog().len(), 2);
    }

    fn outcome(id: u64) -> BatchOutcome {
        let mut r = Read::new(format!("r{id}"), b"ACGT".to_vec(), None);
        r.numeric_id = id;
        BatchOutcome {
            passed: vec![ReadPair::single(r)],
            ..BatchOutcome::default()
        }
    }

    #[test]
    fn reorder_flushes_once_stalled() {
        let mut reorder = Reorder::default();
        let mut seen = Vec::new();
        let mut emit = |o: &BatchOutcome| seen.push(o.passed[0].first.numeric_id);
        reorder.push(1, outcome(1), false, &mut emit);
        reorder.push(2, outcome(2), false, &mut emit);
        reorder.push(0, outcome(0), false, &mut emit);
        reorder.push(4, outcome(4), false, &mut emit);
        reorder.push(6, outcome(6), false, &mut emit);
        reorder.push(5, outcome(5), true, &mut emit);
        reorder.push(7, outcome(7), true, &mut emit);
        assert!(reorder.pending.is_empty());
        assert_eq!(seen, vec![0, 1, 2, 4, 6, 5, 7]);
    }

    #[test]
    fn worker_error_ends_an_ordered_run() {
        let s = DukConfig::default()
            .k(7)
            .threads(3)
            .ordered(true)
            .initial_size(64)
            .barcodes(BarcodeFilter {
                fail_bad: true,
                ..BarcodeFilter::default()
            })
            .generic_references(ReferenceSet::default().with_literal("TTTTTTTTTTTT"))
            .resolve()
            .unwrap();
        let duk = Duk::new(s).unwrap();
        let mut pairs = reads(300);
        pairs[10].first.id = "r10 1:N:0:ACNNAC".into();
        let mut source = VecSource::new(pairs, 5);
        let mut out = VecSink::default();
        let result = duk.run(
            &mut source,
            Sinks {
                passed: Some(&mut out),
                ..Sinks::default()
            },
        );
        assert!(matches!(result, Err(DukError::InvalidBarcode(_))));
        // every batch but the failed one still reaches the sink
        let ids: Vec<u64> = out.pairs.iter().map(|p| p.first.numeric_id).collect();
        assert_eq!(ids.len(), 295);
        assert!(ids.contains(&0) && ids.contains(&299));
        assert!(!ids.contains(&10));
    }
}
