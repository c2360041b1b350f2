//! Crash-recovery tests.
//!
//! Each test hand-builds the on-disk state a process kill can leave
//! behind mid-truncation, then reopens the log and checks that the
//! directory loader reconciles it: victims deleted, the pending marker
//! promoted to a plain segment, indices and reads restored.

use std::fs;
use std::path::Path;

use seglog::format::entry::framed_len;
use seglog::format::segment_name;
use seglog::{Error, Log, LogFormat, Options};
use tempfile::tempdir;

fn opts() -> Options {
    Options::for_testing()
}

fn payload(i: u64) -> Vec<u8> {
    format!("entry-{i:06}").into_bytes()
}

/// Write entries 1..=n across several small segments, then close.
fn build_log(path: &Path, n: u64) {
    let log = Log::open(path, opts()).unwrap();
    for i in 1..=n {
        log.write(i, &payload(i)).unwrap();
    }
    log.close().unwrap();
}

/// Starting indices of the plain segment files in `dir`, ascending.
fn segment_starts(dir: &Path) -> Vec<u64> {
    let mut starts: Vec<u64> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| {
            let name = e.unwrap().file_name().into_string().ok()?;
            if name.len() == 20 && name.bytes().all(|b| b.is_ascii_digit()) {
                name.parse().ok()
            } else {
                None
            }
        })
        .collect();
    starts.sort_unstable();
    starts
}

/// Byte ranges of the framed entries in a binary segment file.
fn entry_spans(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let n = framed_len(&bytes[pos..], LogFormat::Binary).unwrap();
        spans.push((pos, pos + n));
        pos += n;
    }
    spans
}

#[test]
fn test_recover_pending_truncate_front() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log");
    build_log(&path, 30);

    let starts = segment_starts(&path);
    assert!(starts.len() >= 4, "test needs several segments");
    let k = starts[2];

    // A truncate-front to a segment boundary that crashed right after
    // its commit rename: the marker exists, the victims do not yet know
    // they are victims.
    fs::rename(path.join(segment_name(k)), path.join(format!("{}.START", segment_name(k))))
        .unwrap();

    let log = Log::open(&path, opts()).unwrap();
    assert_eq!(log.first_index().unwrap(), k);
    assert_eq!(log.last_index().unwrap(), 30);
    assert!(matches!(log.read(k - 1), Err(Error::NotFound)));
    for i in k..=30 {
        assert_eq!(log.read(i).unwrap(), payload(i));
    }
    drop(log);

    // Everything below the marker is gone, the marker became plain.
    let starts = segment_starts(&path);
    assert_eq!(starts[0], k);
    assert!(!path.join(format!("{}.START", segment_name(k))).exists());
}

#[test]
fn test_recover_truncate_front_mid_segment() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log");
    build_log(&path, 30);

    let starts = segment_starts(&path);
    let seg_start = starts[2];
    let seg_bytes = fs::read(path.join(segment_name(seg_start))).unwrap();
    let spans = entry_spans(&seg_bytes);
    assert!(spans.len() >= 3);

    // The truncation kept this segment's entries from `k` on: its
    // `.START` file holds the original's suffix. The original plain file
    // is still present, as are its lower-indexed siblings.
    let k = seg_start + 2;
    fs::write(
        path.join(format!("{}.START", segment_name(k))),
        &seg_bytes[spans[2].0..],
    )
    .unwrap();

    let log = Log::open(&path, opts()).unwrap();
    assert_eq!(log.first_index().unwrap(), k);
    assert_eq!(log.last_index().unwrap(), 30);
    for i in k..=30 {
        assert_eq!(log.read(i).unwrap(), payload(i));
    }
}

#[test]
fn test_recover_pending_truncate_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log");
    build_log(&path, 30);

    let starts = segment_starts(&path);
    let seg_start = starts[2];
    let seg_bytes = fs::read(path.join(segment_name(seg_start))).unwrap();
    let spans = entry_spans(&seg_bytes);
    assert!(spans.len() >= 2);

    // A truncate-back that kept the first two entries of this segment
    // and crashed after its commit rename: the `.END` file holds the
    // truncated prefix, while the stale plain file and all later
    // segments still exist.
    let new_last = seg_start + 1;
    fs::write(
        path.join(format!("{}.END", segment_name(seg_start))),
        &seg_bytes[..spans[1].1],
    )
    .unwrap();

    let log = Log::open(&path, opts()).unwrap();
    assert_eq!(log.first_index().unwrap(), 1);
    assert_eq!(log.last_index().unwrap(), new_last);
    assert_eq!(log.read(new_last).unwrap(), payload(new_last));
    assert!(matches!(log.read(new_last + 1), Err(Error::NotFound)));

    // The recovered segment is the tail again; appends continue.
    log.write(new_last + 1, b"resumed").unwrap();
    assert_eq!(log.read(new_last + 1).unwrap(), b"resumed");
    drop(log);

    let starts = segment_starts(&path);
    assert_eq!(*starts.last().unwrap(), seg_start);
    assert!(!path.join(format!("{}.END", segment_name(seg_start))).exists());
}

#[test]
fn test_recover_truncate_back_whole_segment() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log");
    build_log(&path, 30);

    let starts = segment_starts(&path);
    let seg_start = starts[2];
    let next_start = starts[3];

    // Crash state where the .END carries the segment's full contents:
    // every entry of the boundary segment survives, later segments are
    // victims.
    fs::copy(
        path.join(segment_name(seg_start)),
        path.join(format!("{}.END", segment_name(seg_start))),
    )
    .unwrap();

    let log = Log::open(&path, opts()).unwrap();
    assert_eq!(log.first_index().unwrap(), 1);
    assert_eq!(log.last_index().unwrap(), next_start - 1);
    for i in 1..next_start {
        assert_eq!(log.read(i).unwrap(), payload(i));
    }
    assert!(matches!(log.read(next_start), Err(Error::NotFound)));
}

#[test]
fn test_both_markers_fail_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log");
    build_log(&path, 30);

    let starts = segment_starts(&path);
    fs::copy(
        path.join(segment_name(starts[1])),
        path.join(format!("{}.START", segment_name(starts[1]))),
    )
    .unwrap();
    fs::copy(
        path.join(segment_name(starts[2])),
        path.join(format!("{}.END", segment_name(starts[2]))),
    )
    .unwrap();

    let err = Log::open(&path, opts()).unwrap_err();
    assert!(err.is_corrupt());
}

#[test]
fn test_open_ignores_temp_and_junk_files() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log");
    build_log(&path, 10);

    // A crash between writing TEMP and the commit rename leaves only the
    // work file, which the loader must ignore.
    fs::write(path.join("TEMP"), b"half-finished replacement").unwrap();
    fs::write(path.join("notes.txt"), b"operator scribbles").unwrap();
    fs::write(path.join("aaaaaaaaaaaaaaaaaaaa"), b"twenty non-digits").unwrap();
    fs::write(path.join("00000000000000000000"), b"index zero").unwrap();
    fs::write(path.join("00000000000000000001.BAK"), b"bad suffix").unwrap();

    let log = Log::open(&path, opts()).unwrap();
    assert_eq!(log.first_index().unwrap(), 1);
    assert_eq!(log.last_index().unwrap(), 10);
    for i in 1..=10 {
        assert_eq!(log.read(i).unwrap(), payload(i));
    }
}

#[test]
fn test_truncations_persist_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log");
    build_log(&path, 30);

    let (front, back) = {
        let starts = segment_starts(&path);
        (starts[1] + 2, starts[3] + 1)
    };

    {
        let log = Log::open(&path, opts()).unwrap();
        log.truncate_front(front).unwrap();
        log.truncate_back(back).unwrap();
        assert_eq!(log.first_index().unwrap(), front);
        assert_eq!(log.last_index().unwrap(), back);
        log.close().unwrap();
    }

    let log = Log::open(&path, opts()).unwrap();
    assert_eq!(log.first_index().unwrap(), front);
    assert_eq!(log.last_index().unwrap(), back);
    for i in front..=back {
        assert_eq!(log.read(i).unwrap(), payload(i));
    }
    assert!(matches!(log.read(front - 1), Err(Error::NotFound)));
    assert!(matches!(log.read(back + 1), Err(Error::NotFound)));
}

#[test]
fn test_recovery_is_idempotent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log");
    build_log(&path, 30);

    let starts = segment_starts(&path);
    let k = starts[2];
    fs::rename(path.join(segment_name(k)), path.join(format!("{}.START", segment_name(k))))
        .unwrap();

    // First open reconciles; later opens see an ordinary directory.
    for _ in 0..3 {
        let log = Log::open(&path, opts()).unwrap();
        assert_eq!(log.first_index().unwrap(), k);
        assert_eq!(log.last_index().unwrap(), 30);
        log.close().unwrap();
    }
}
