use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::thread;

use crossbeam::channel::{bounded, Sender};
use flate2::read::MultiGzDecoder;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::database::record::Record;
use crate::database::repo::{RecordRepository, StoreError};

const CHANNEL_CAPACITY: usize = 1024;

type FeedReader = BufReader<MultiGzDecoder<File>>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unable to open source file {path}: {source}")]
    SourceOpen {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("unable to initialize gzip reader: {0}")]
    Decompress(#[source] io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("feed reader thread panicked")]
    Pipeline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The store already existed, nothing was touched.
    AlreadyPresent,
    Loaded(IngestReport),
}

/// Counters for one ingestion run. Only logged, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub total_lines: u64,
    pub inserted: u64,
    pub malformed: u64,
    pub failed_records: u64,
    pub failed_children: u64,
    /// The feed ended in a read error; everything before it was loaded.
    pub truncated: bool,
}

enum FeedLine {
    Record(Record),
    Malformed { line_no: u64, error: serde_json::Error },
}

/// Populates the store at `db_path` from the gzip feed at `source`, unless
/// the store already exists.
///
/// The feed is read twice: once to count lines for the progress bar and
/// once to load. Open, decompression and schema failures are fatal; a
/// store file created by a failed run is removed so the next run starts
/// clean. Malformed lines and rejected rows are logged and skipped, and a
/// read error past the gzip header ends the feed early.
pub fn run(source: &Path, db_path: &Path) -> Result<IngestOutcome, IngestError> {
    if db_path.exists() {
        info!("Store {:?} already exists, skipping ingestion", db_path);
        return Ok(IngestOutcome::AlreadyPresent);
    }

    info!("Loading data from {:?} into {:?}", source, db_path);
    let total = count_lines(source)?;

    match populate(source, db_path, total) {
        Ok(report) => {
            info!(
                total = report.total_lines,
                inserted = report.inserted,
                malformed = report.malformed,
                failed_records = report.failed_records,
                failed_children = report.failed_children,
                truncated = report.truncated,
                "Store is ready"
            );
            Ok(IngestOutcome::Loaded(report))
        }
        Err(e) => {
            if let Err(remove_err) = fs::remove_file(db_path) {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove partial store {:?}: {}", db_path, remove_err);
                }
            }
            Err(e)
        }
    }
}

fn populate(source: &Path, db_path: &Path, total: u64) -> Result<IngestReport, IngestError> {
    let repo = RecordRepository::create(db_path)?;
    let progress = progress_bar(total);
    let report = load(&repo, open_feed(source)?, total, &progress)?;
    progress.finish();
    Ok(report)
}

fn open_feed(path: &Path) -> Result<FeedReader, IngestError> {
    let file = File::open(path).map_err(|source| IngestError::SourceOpen {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = BufReader::new(MultiGzDecoder::new(file));
    // Forces the gzip header to be parsed now rather than on the first line.
    reader.fill_buf().map_err(IngestError::Decompress)?;
    Ok(reader)
}

fn count_lines(path: &Path) -> Result<u64, IngestError> {
    let mut total = 0;
    for line in open_feed(path)?.split(b'\n') {
        if let Err(e) = line {
            warn!("Feed is damaged after line {}, counting stops: {}", total, e);
            break;
        }
        total += 1;
    }
    Ok(total)
}

fn load(
    repo: &RecordRepository,
    reader: FeedReader,
    total: u64,
    progress: &ProgressBar,
) -> Result<IngestReport, IngestError> {
    let (tx, rx) = bounded::<FeedLine>(CHANNEL_CAPACITY);
    let reader_handle = thread::spawn(move || read_feed(reader, tx));

    let mut report = IngestReport {
        total_lines: total,
        ..IngestReport::default()
    };

    for line in rx {
        match line {
            FeedLine::Record(record) => store_record(repo, &record, &mut report),
            FeedLine::Malformed { line_no, error } => {
                debug!("Skipping malformed line {}: {}", line_no, error);
                report.malformed += 1;
            }
        }
        progress.inc(1);
    }

    report.truncated = reader_handle.join().map_err(|_| IngestError::Pipeline)?;
    Ok(report)
}

/// Sends every line to the writer. Returns `true` when the stream ended in
/// a read error instead of a clean end of file.
fn read_feed<R: BufRead>(reader: R, tx: Sender<FeedLine>) -> bool {
    for (index, line) in reader.split(b'\n').enumerate() {
        let mut line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Feed is damaged after line {}, loading stops: {}", index, e);
                return true;
            }
        };
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        let item = match Record::from_line(&line) {
            Ok(record) => FeedLine::Record(record),
            Err(error) => FeedLine::Malformed {
                line_no: index as u64 + 1,
                error,
            },
        };

        // The writer only hangs up if it is gone for good.
        if tx.send(item).is_err() {
            break;
        }
    }
    false
}

/// Inserts the record, then each of its tags and images as independent
/// statements. Children are skipped when the parent row was rejected.
fn store_record(repo: &RecordRepository, record: &Record, report: &mut IngestReport) {
    if let Err(e) = repo.insert_record(record) {
        warn!(id = record.id, "Record insertion failed: {}", e);
        report.failed_records += 1;
        return;
    }
    report.inserted += 1;

    for tag in &record.tags {
        if let Err(e) = repo.insert_tag(record.id, tag) {
            warn!(id = record.id, tag = %tag, "Tag insertion failed: {}", e);
            report.failed_children += 1;
        }
    }

    for url in &record.image_urls {
        if let Err(e) = repo.insert_image(record.id, url) {
            warn!(id = record.id, url = %url, "Image insertion failed: {}", e);
            report.failed_children += 1;
        }
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template("Progress {percent_2}% ({pos}/{len})").map(|style| {
        style.with_key(
            "percent_2",
            |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                let _ = write!(w, "{:.2}", state.fraction() * 100.0);
            },
        )
    });
    match style {
        Ok(style) => bar.set_style(style),
        Err(e) => warn!("Invalid progress template: {}", e),
    }
    bar
}
