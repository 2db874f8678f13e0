//! Sharded k-mer indexing and matching for filtering, trimming and masking DNA reads.
//!
//! Reference k-mers (optionally with Hamming or edit-distance variants) are loaded into
//! `WAYS` independent shards, one per loader thread. Reads are then streamed through a
//! fixed stage machine: header checks, force trimming, k-mer filtering, masking, right and
//! left k-mer trimming, overlap trimming, quality trimming and filtering, and finally an
//! entropy filter.
//!
//! ```no_run
//! use kira_kmer_duk::{Duk, DukConfig, FastxSource, FastxWriter, ReferenceSet, Sinks};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), kira_kmer_duk::DukError> {
//! let settings = DukConfig::default()
//!     .k(23)
//!     .mink(11)
//!     .hdist(1)
//!     .generic_references(ReferenceSet::default().with_file("adapters.fa"))
//!     .generic_mode(kira_kmer_duk::MatchMode::TrimRight)
//!     .resolve()?;
//! let duk = Duk::new(settings)?;
//! let mut source = FastxSource::open(Path::new("reads.fq.gz"), None, false)?;
//! let mut out = FastxWriter::create(Path::new("clean.fq.gz"), None)?;
//! let report = duk.run(&mut source, Sinks { passed: Some(&mut out), ..Default::default() })?;
//! report.stats.log_summary();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod encode;
pub mod entropy;
pub mod error;
pub mod index;
pub mod io;
pub mod loader;
pub mod matcher;
pub mod mutate;
pub mod overlap;
pub mod pipeline;
pub mod process;
pub mod read;
pub mod scaffold;
pub mod stats;
pub mod trim;

pub use config::{
    BarcodeFilter, DukConfig, DukSettings, EntropySettings, ForceTrim, MaskStyle, MatchMode, PairPolicy,
    QualityTrim, ReferenceSet, TableKind, WAYS,
};
pub use encode::{KeyBuilder, RollingKmer, encode_kmer, revcomp};
pub use entropy::EntropyTracker;
pub use error::{ConfigError, DukError};
pub use index::ShardedIndex;
pub use io::{FastxSource, FastxWriter, ReferenceReader};
pub use loader::{LoadStats, load_index};
pub use overlap::{InsertEstimator, MismatchRatioEstimator, OverlapEstimate};
pub use pipeline::{Duk, ReadSink, ReadSource, RunReport, Sinks, VecSink, VecSource};
pub use read::{Read, ReadPair};
pub use scaffold::ScaffoldCatalog;
pub use stats::{HitHistogram, ProcessStats, ScaffoldReport};
