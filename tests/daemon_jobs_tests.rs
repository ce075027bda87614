mod common;

use std::time::Duration;

use common::{wait_with_timeout, TestEnv};

#[test]
fn failed_job_is_reported_listed_and_cleared() {
    let env = TestEnv::new();
    let mut daemon = env.spawn_daemon();
    let file = env.write_file("talk.wav", b"RIFF....WAVE");
    let file = file.to_str().unwrap();

    // No models are installed, so the worker reports an input error
    let submit = env.run(&[
        "submit", file, "--model", "base", "--language", "en", "--watch",
    ]);
    let stdout = String::from_utf8_lossy(&submit.stdout);
    let stderr = String::from_utf8_lossy(&submit.stderr);
    assert!(
        !submit.status.success(),
        "a failed job should fail the watching submit\nstdout:\n{}\nstderr:\n{}",
        stdout,
        stderr
    );
    assert!(stdout.contains("Submitted job"));
    assert!(stderr.contains("not installed"), "stderr:\n{}", stderr);

    let jobs = env.run(&["jobs"]);
    let listing = String::from_utf8_lossy(&jobs.stdout);
    assert!(jobs.status.success());
    assert!(listing.contains("talk.wav"));
    assert!(listing.contains("errored"));

    let stop = env.run(&["stop-all"]);
    assert!(stop.status.success());
    let jobs = env.run(&["jobs"]);
    assert!(String::from_utf8_lossy(&jobs.stdout).contains("No jobs"));

    let shutdown = env.run(&["daemon", "stop"]);
    assert!(shutdown.status.success());
    let status = wait_with_timeout(&mut daemon, Duration::from_secs(10));
    assert!(status.map(|s| s.success()).unwrap_or(false));
    assert!(!env.runtime_dir().join("scribe.pid").exists());
}

#[test]
fn invalid_submission_is_rejected_before_launch() {
    let env = TestEnv::new();
    let mut daemon = env.spawn_daemon();
    let file = env.write_file("talk.wav", b"RIFF");

    let submit = env.run(&[
        "submit",
        file.to_str().unwrap(),
        "--model",
        " ",
        "--language",
        "en",
    ]);
    assert!(!submit.status.success());
    assert!(String::from_utf8_lossy(&submit.stderr).contains("Validation error"));

    let jobs = env.run(&["jobs"]);
    assert!(String::from_utf8_lossy(&jobs.stdout).contains("No jobs"));

    let _ = env.run(&["daemon", "stop"]);
    wait_with_timeout(&mut daemon, Duration::from_secs(10));
}

#[test]
fn sigterm_tears_down_and_closes_watchers() {
    let env = TestEnv::new();
    let mut daemon = env.spawn_daemon();

    let mut watcher = env.spawn(&["watch"]);
    std::thread::sleep(Duration::from_millis(300));

    // SAFETY: plain signal delivery to our own child
    let rc = unsafe { libc::kill(daemon.id() as libc::pid_t, libc::SIGTERM) };
    assert_eq!(rc, 0);

    let status = wait_with_timeout(&mut daemon, Duration::from_secs(10));
    assert!(status.map(|s| s.success()).unwrap_or(false));

    let watcher_status = wait_with_timeout(&mut watcher, Duration::from_secs(10));
    assert!(watcher_status.is_some(), "watcher should stop with the daemon");

    let mut printed = String::new();
    if let Some(mut stdout) = watcher.stdout.take() {
        use std::io::Read;
        let _ = stdout.read_to_string(&mut printed);
    }
    assert!(printed.contains("Event stream closed"), "watcher printed:\n{}", printed);
}
