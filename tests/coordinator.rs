use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use md5::{Digest, Md5};

use kira_ena::coordinator::{BatchSummary, DownloadCoordinator, DownloadOptions};
use kira_ena::domain::FileType;
use kira_ena::error::KiraError;
use kira_ena::layout::OutputLayout;
use kira_ena::ledger::ProgressLedger;
use kira_ena::metadata::{MetadataRow, RunMetadata};
use kira_ena::planner::{FetchPlanner, Outstanding};
use kira_ena::record::{LEDGER_HEADER, TransferRecord};
use kira_ena::transfer::TransferClient;

/// Serves fixed bodies keyed by URL; unknown URLs fail.
struct MockTransfer {
    bodies: BTreeMap<String, Vec<u8>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    hold: Duration,
}

impl MockTransfer {
    fn new(bodies: &[(&str, &[u8])]) -> Self {
        Self {
            bodies: bodies
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_vec()))
                .collect(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            hold: Duration::ZERO,
        }
    }

    fn failing() -> Self {
        Self::new(&[])
    }
}

impl TransferClient for MockTransfer {
    fn fetch(&self, url: &str, destination: &Path, _max_retries: u32) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.hold);
        let fetched = match self.bodies.get(url) {
            Some(body) => {
                fs::create_dir_all(destination.parent().unwrap()).unwrap();
                fs::write(destination, body).unwrap();
                true
            }
            None => false,
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        fetched
    }
}

fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

fn outstanding(records: Vec<TransferRecord>) -> Outstanding {
    records
        .into_iter()
        .map(|record| (record.key().to_string(), record))
        .collect()
}

fn coordinator(
    root: &Path,
    client: Arc<MockTransfer>,
    group_by_study: bool,
    max_concurrent: usize,
) -> (DownloadCoordinator<MockTransfer>, Arc<ProgressLedger>) {
    let layout = OutputLayout::new(
        Utf8PathBuf::from_path_buf(root.to_path_buf()).unwrap(),
        group_by_study,
    );
    let ledger = Arc::new(layout.ledger());
    let options = DownloadOptions {
        max_retries: 0,
        max_concurrent,
        ..DownloadOptions::default()
    };
    (
        DownloadCoordinator::new(client, Arc::clone(&ledger), layout, options),
        ledger,
    )
}

#[test]
fn downloads_and_verifies_single_file() {
    let temp = tempfile::tempdir().unwrap();
    let body: &[u8] = b"I am a fastq file\n";
    let digest = md5_hex(body);
    let client = Arc::new(MockTransfer::new(&[(
        "https://host/path/SRR1.fastq.gz",
        body,
    )]));
    let (coordinator, ledger) = coordinator(temp.path(), Arc::clone(&client), false, 4);

    let record = TransferRecord::new("SRR1", "PRJ1", "host/path/SRR1.fastq.gz", &digest).unwrap();
    let summary = coordinator
        .run_batch("PRJ1", outstanding(vec![record]))
        .unwrap();

    assert_eq!(
        summary,
        BatchSummary {
            attempted: 1,
            fetched: 1,
            verified: 1,
        }
    );
    assert_eq!(fs::read(temp.path().join("SRR1.fastq.gz")).unwrap(), body);
    let content = fs::read_to_string(ledger.path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], LEDGER_HEADER);
    assert_eq!(
        lines.last().copied(),
        Some(format!("SRR1,PRJ1,host/path/SRR1.fastq.gz,{digest},True").as_str())
    );
}

#[test]
fn checksum_mismatch_is_recorded_unverified() {
    let temp = tempfile::tempdir().unwrap();
    let client = Arc::new(MockTransfer::new(&[(
        "https://host/path/SRR2.fastq.gz",
        b"not what was promised",
    )]));
    let (coordinator, ledger) = coordinator(temp.path(), client, false, 4);

    let record = TransferRecord::new("SRR2", "PRJ1", "host/path/SRR2.fastq.gz", "0000").unwrap();
    let summary = coordinator
        .run_batch("PRJ1", outstanding(vec![record]))
        .unwrap();

    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.verified, 0);
    let content = fs::read_to_string(ledger.path()).unwrap();
    assert!(content.ends_with("SRR2,PRJ1,host/path/SRR2.fastq.gz,0000,False\n"));
}

#[test]
fn empty_batch_only_writes_header() {
    let temp = tempfile::tempdir().unwrap();
    let client = Arc::new(MockTransfer::failing());
    let (coordinator, ledger) = coordinator(temp.path(), Arc::clone(&client), false, 4);

    let summary = coordinator.run_batch("PRJ1", Outstanding::new()).unwrap();

    assert_eq!(summary, BatchSummary::default());
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        fs::read_to_string(ledger.path()).unwrap(),
        format!("{LEDGER_HEADER}\n")
    );
}

#[test]
fn all_failures_fail_the_batch() {
    let temp = tempfile::tempdir().unwrap();
    let client = Arc::new(MockTransfer::failing());
    let (coordinator, ledger) = coordinator(temp.path(), Arc::clone(&client), false, 4);

    let records = vec![
        TransferRecord::new("SRR1", "PRJ1", "host/a/SRR1.fastq.gz", "m1").unwrap(),
        TransferRecord::new("SRR2", "PRJ1", "host/a/SRR2.fastq.gz", "m2").unwrap(),
    ];
    let err = coordinator
        .run_batch("PRJ1", outstanding(records))
        .unwrap_err();

    assert_matches!(
        err,
        KiraError::NoSuccessfulDownloads { ref group, attempted: 2 } if group == "PRJ1"
    );
    assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        fs::read_to_string(ledger.path()).unwrap(),
        format!("{LEDGER_HEADER}\n")
    );
    assert!(!temp.path().join("SRR1.fastq.gz").exists());
}

#[test]
fn partial_failure_still_succeeds() {
    let temp = tempfile::tempdir().unwrap();
    let client = Arc::new(MockTransfer::new(&[(
        "https://host/a/SRR1.fastq.gz",
        b"reads",
    )]));
    let (coordinator, ledger) = coordinator(temp.path(), client, false, 4);

    let records = vec![
        TransferRecord::new("SRR1", "PRJ1", "host/a/SRR1.fastq.gz", &md5_hex(b"reads")).unwrap(),
        TransferRecord::new("SRR2", "PRJ1", "host/a/SRR2.fastq.gz", "m2").unwrap(),
    ];
    let summary = coordinator.run_batch("PRJ1", outstanding(records)).unwrap();

    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.fetched, 1);
    let content = fs::read_to_string(ledger.path()).unwrap();
    assert_eq!(content.lines().count(), 2);
    assert!(!content.contains("SRR2"));
}

#[test]
fn concurrency_is_bounded() {
    let temp = tempfile::tempdir().unwrap();
    let urls: Vec<String> = (0..12)
        .map(|idx| format!("https://host/runs/SRR{idx}.fastq.gz"))
        .collect();
    let bodies: Vec<(&str, &[u8])> = urls.iter().map(|url| (url.as_str(), &b"x"[..])).collect();
    let mut client = MockTransfer::new(&bodies);
    client.hold = Duration::from_millis(20);
    let client = Arc::new(client);
    let (coordinator, ledger) = coordinator(temp.path(), Arc::clone(&client), false, 3);

    let records = (0..12)
        .map(|idx| {
            TransferRecord::new(
                &format!("SRR{idx}"),
                "PRJ1",
                &format!("host/runs/SRR{idx}.fastq.gz"),
                &md5_hex(b"x"),
            )
            .unwrap()
        })
        .collect();
    let summary = coordinator.run_batch("PRJ1", outstanding(records)).unwrap();

    assert_eq!(summary.verified, 12);
    assert_eq!(client.calls.load(Ordering::SeqCst), 12);
    let peak = client.peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 3, "peak in-flight transfers: {peak}");

    let content = fs::read_to_string(ledger.path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 13);
    assert_eq!(lines[0], LEDGER_HEADER);
    let mut runs: Vec<String> = lines[1..]
        .iter()
        .map(|line| {
            let record = TransferRecord::from_ledger_line(line).unwrap();
            assert!(record.is_verified(), "unverified line: {line}");
            record.run_id().to_string()
        })
        .collect();
    runs.sort();
    runs.dedup();
    assert_eq!(runs.len(), 12);
}

/// Reports success without writing anything.
struct PhantomTransfer;

impl TransferClient for PhantomTransfer {
    fn fetch(&self, _url: &str, _destination: &Path, _max_retries: u32) -> bool {
        true
    }
}

#[test]
fn unreadable_download_fails_the_batch() {
    let temp = tempfile::tempdir().unwrap();
    let layout = OutputLayout::new(
        Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap(),
        false,
    );
    let ledger = Arc::new(layout.ledger());
    let coordinator = DownloadCoordinator::new(
        Arc::new(PhantomTransfer),
        Arc::clone(&ledger),
        layout,
        DownloadOptions::default(),
    );

    let record = TransferRecord::new("SRR1", "PRJ1", "host/SRR1.fastq.gz", "abc").unwrap();
    let err = coordinator
        .run_batch("PRJ1", outstanding(vec![record]))
        .unwrap_err();

    assert_matches!(err, KiraError::Filesystem(_));
    assert_eq!(
        fs::read_to_string(ledger.path()).unwrap(),
        format!("{LEDGER_HEADER}\n")
    );
}

#[test]
fn study_folders_keep_ledger_at_root() {
    let temp = tempfile::tempdir().unwrap();
    let client = Arc::new(MockTransfer::new(&[(
        "https://host/a/ERR9.fastq.gz",
        b"reads",
    )]));
    let (coordinator, ledger) = coordinator(temp.path(), client, true, 2);

    let record = TransferRecord::new("ERR9", "PRJEB9", "host/a/ERR9.fastq.gz", &md5_hex(b"reads")).unwrap();
    coordinator.run_batch("PRJEB9", outstanding(vec![record])).unwrap();

    assert!(temp.path().join("PRJEB9").join("ERR9.fastq.gz").exists());
    assert_eq!(ledger.path(), temp.path().join(".progress.csv"));
}

#[test]
fn second_plan_after_success_is_empty() {
    let temp = tempfile::tempdir().unwrap();
    let body: &[u8] = b"@r1\nACGT\n+\nIIII\n";
    let digest = md5_hex(body);
    let client = Arc::new(MockTransfer::new(&[(
        "https://host/path/SRR1.fastq.gz",
        body,
    )]));
    let (coordinator, ledger) = coordinator(temp.path(), client, false, 4);

    let mut rows = RunMetadata::new();
    rows.insert(
        "SRR1".to_string(),
        MetadataRow::from_pairs([
            ("run_accession", "SRR1"),
            ("study_accession", "PRJ1"),
            ("fastq_ftp", "host/path/SRR1.fastq.gz"),
            ("fastq_md5", digest.as_str()),
        ]),
    );

    let first = FetchPlanner::new(&ledger, true)
        .plan(&rows, FileType::Fastq)
        .unwrap();
    assert_eq!(first.len(), 1);
    coordinator.run_batch("PRJ1", first).unwrap();

    let second = FetchPlanner::new(&ledger, true)
        .plan(&rows, FileType::Fastq)
        .unwrap();
    assert!(second.is_empty());

    let uncached = FetchPlanner::new(&ledger, false)
        .plan(&rows, FileType::Fastq)
        .unwrap();
    assert_eq!(uncached.len(), 1);
}
