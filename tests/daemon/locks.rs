//! Daemon supervisor scenarios from the lock-file protocol.

use std::time::Duration;
use stowage_daemon::{lock, CommandPolicy, DaemonSupervisor, LockState, SupervisorOptions};

/// A supervisor over a `sleep`-backed stand-in daemon whose lock the
/// supervisor manages itself.
fn sleeper(repo: &std::path::Path) -> DaemonSupervisor {
    DaemonSupervisor::new(SupervisorOptions {
        repo_path: repo.to_path_buf(),
        command: vec!["sleep".to_string(), "30".to_string()],
        env: Vec::new(),
        start_timeout: Duration::from_secs(5),
        stop_grace: Duration::from_millis(200),
        manage_lock_file: true,
        policy: CommandPolicy::allowing(["sleep"]),
    })
}

#[test]
fn stale_lock_removed_and_daemon_starts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("repo.lock"), "999999").unwrap();

    let supervisor = sleeper(dir.path());
    let report = supervisor.daemon_start(true).unwrap();

    assert!(report.lock_file_detected);
    assert!(report.lock_is_stale);
    assert!(report.lock_file_removed);
    assert!(report.success);

    // a new lock with a live pid exists
    match lock::inspect(dir.path()).unwrap() {
        LockState::Held { pid } => assert!(lock::pid_alive(pid)),
        other => panic!("expected held lock, got {other:?}"),
    }
    supervisor.daemon_stop().unwrap();
}

#[test]
fn active_lock_means_no_spawn() {
    let dir = tempfile::tempdir().unwrap();
    // the caller's own pid is definitionally alive
    std::fs::write(
        dir.path().join("repo.lock"),
        format!("{}", std::process::id()),
    )
    .unwrap();

    let supervisor = sleeper(dir.path());
    let report = supervisor.daemon_start(true).unwrap();

    assert_eq!(report.status, "already_running");
    assert!(!report.lock_is_stale);
    assert!(!report.lock_file_removed);
    assert!(report.success);
    // the lock content is untouched
    let content = std::fs::read_to_string(dir.path().join("repo.lock")).unwrap();
    assert_eq!(content.trim(), format!("{}", std::process::id()));
}

#[test]
fn second_start_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = sleeper(dir.path());

    let first = supervisor.daemon_start(true).unwrap();
    assert_eq!(first.status, "started");
    let lock_before = std::fs::read_to_string(dir.path().join("repo.lock")).unwrap();

    let second = supervisor.daemon_start(true).unwrap();
    assert_eq!(second.status, "already_running");
    assert_eq!(second.pid, first.pid);
    let lock_after = std::fs::read_to_string(dir.path().join("repo.lock")).unwrap();
    assert_eq!(lock_before, lock_after);

    supervisor.daemon_stop().unwrap();
}

#[test]
fn concurrent_starts_produce_one_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().to_path_buf();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let repo = repo.clone();
        handles.push(std::thread::spawn(move || {
            sleeper(&repo).daemon_start(true).unwrap()
        }));
    }
    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(
        reports.iter().filter(|r| r.status == "started").count(),
        1,
        "exactly one winner"
    );
    assert!(reports
        .iter()
        .all(|r| r.success && (r.status == "started" || r.status == "already_running")));

    sleeper(&repo).daemon_stop().unwrap();
}

#[test]
fn stop_is_idempotent_even_without_a_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = sleeper(dir.path());
    supervisor.daemon_stop().unwrap();
    supervisor.daemon_stop().unwrap();
    assert!(!supervisor.daemon_status().unwrap().running);
}
