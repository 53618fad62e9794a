use std::fs;
use std::time::{Duration, Instant};

use forksh::{DispatchError, ExitState, Outcome, ShapeError};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};

use test_util::{drain, ready, ready_with, FaultyOs};

#[test]
fn simple_returns_exit_code() {
    let mut sh = ready();
    let outcome = sh.run(&["sh", "-c", "exit 3"]).unwrap();
    assert_eq!(outcome, Outcome::Foreground(ExitState::Exited(3)));
    assert_eq!(outcome.code(), 3);
}

#[test]
fn simple_twice_gives_independent_results() {
    let mut sh = ready();
    assert_eq!(sh.run(&["true"]).unwrap().code(), 0);
    assert_eq!(sh.run(&["false"]).unwrap().code(), 1);
    assert_eq!(sh.run(&["true"]).unwrap().code(), 0);
}

#[test]
fn redirect_creates_and_truncates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("out.txt");
    fs::write(&out, "old contents that are longer\n").unwrap();
    let target = out.to_string_lossy().to_string();

    let mut sh = ready();
    let outcome = sh.run(&["echo", "hi", ">", target.as_str()]).unwrap();
    assert_eq!(outcome, Outcome::Foreground(ExitState::Exited(0)));
    assert_eq!(fs::read_to_string(&out).unwrap(), "hi\n");
}

#[test]
fn redirect_open_failure_fails_only_the_child() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("missing/out.txt").to_string_lossy().to_string();

    let mut sh = ready();
    let outcome = sh.run(&["echo", "hi", ">", target.as_str()]).unwrap();
    assert_eq!(outcome, Outcome::Foreground(ExitState::Exited(1)));
    assert!(sh.dispatch(&["true"]));
}

#[test]
fn pipeline_feeds_right_from_left() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("count.txt");
    let script = format!("wc -l > {}", out.to_string_lossy());

    let mut sh = ready();
    let outcome = sh.run(&["printf", "a\\nb\\nc\\n", "|", "sh", "-c", script.as_str()]).unwrap();
    assert_eq!(
        outcome,
        Outcome::Pipeline { left: ExitState::Exited(0), right: ExitState::Exited(0) }
    );
    assert_eq!(fs::read_to_string(&out).unwrap().trim(), "3");
}

#[test]
fn pipeline_reader_sees_end_of_stream() {
    // cat only exits once every copy of the write end is closed.
    let mut sh = ready();
    let start = Instant::now();
    for _ in 0..2 {
        let outcome = sh.run(&["true", "|", "cat"]).unwrap();
        assert_eq!(outcome.code(), 0);
    }
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn pipeline_code_is_right_side() {
    let mut sh = ready();
    let outcome = sh.run(&["true", "|", "sh", "-c", "cat >/dev/null; exit 5"]).unwrap();
    assert_eq!(outcome.code(), 5);
}

#[test]
fn background_returns_immediately_and_is_reaped() {
    let mut sh = ready();
    let start = Instant::now();
    let outcome = sh.run(&["sleep", "5", "&"]).unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    let pid = match outcome {
        Outcome::Background(pid) => pid,
        other => panic!("expected background outcome, got {other:?}"),
    };
    assert!(sh.background_jobs().contains(&pid));

    kill(pid, Signal::SIGKILL).unwrap();
    drain(&mut sh, Duration::from_secs(5));
    assert!(sh.background_jobs().is_empty());
    assert_eq!(waitpid(pid, Some(WaitPidFlag::WNOHANG)), Err(Errno::ECHILD));
}

#[test]
fn finished_background_job_leaves_no_zombie() {
    let mut sh = ready();
    let pid = match sh.run(&["sh", "-c", "exit 2", "&"]).unwrap() {
        Outcome::Background(pid) => pid,
        other => panic!("expected background outcome, got {other:?}"),
    };
    let done = drain(&mut sh, Duration::from_secs(5));
    assert!(done.contains(&(pid, ExitState::Exited(2))));
    assert_eq!(waitpid(pid, Some(WaitPidFlag::WNOHANG)), Err(Errno::ECHILD));
    #[cfg(target_os = "linux")]
    assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
}

#[test]
fn job_reaped_during_run_is_kept_for_sweep() {
    let mut sh = ready();
    let pid = match sh.run(&["true", "&"]).unwrap() {
        Outcome::Background(pid) => pid,
        other => panic!("expected background outcome, got {other:?}"),
    };
    // Reaped by the sweep that closes this foreground run.
    sh.run(&["sleep", "0.5"]).unwrap();
    assert!(sh.background_jobs().is_empty());
    assert_eq!(drain(&mut sh, Duration::from_secs(1)), vec![(pid, ExitState::Exited(0))]);
    assert!(sh.sweep().is_empty());
}

#[test]
fn lone_marker_runs_as_a_program() {
    let mut sh = ready();
    for marker in ["&", "|", ">"] {
        let outcome = sh.run(&[marker]).unwrap();
        assert_eq!(outcome, Outcome::Foreground(ExitState::Exited(127)), "marker {marker}");
    }
    assert!(sh.background_jobs().is_empty());
}

/// Descriptor numbers listed in a file written by `ls /proc/self/fd`.
#[cfg(target_os = "linux")]
fn listed_fds(path: &std::path::Path) -> Vec<i32> {
    fs::read_to_string(path)
        .unwrap()
        .split_whitespace()
        .map(|fd| fd.parse().unwrap())
        .collect()
}

/// Only stdio plus the one descriptor `ls` opens on the directory itself.
#[cfg(target_os = "linux")]
fn assert_only_stdio(fds: &[i32]) {
    for fd in 0..3 {
        assert!(fds.contains(&fd), "missing fd {fd} in {fds:?}");
    }
    assert!(fds.iter().filter(|&&fd| fd > 2).count() <= 1, "leaked descriptors: {fds:?}");
}

#[cfg(target_os = "linux")]
#[test]
fn pipeline_children_hold_only_their_own_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let left = dir.path().join("left.txt");
    let right = dir.path().join("right.txt");
    let script = format!(
        "cat > {}; ls /proc/self/fd > {}",
        left.to_string_lossy(),
        right.to_string_lossy()
    );

    let mut sh = ready();
    let outcome = sh.run(&["ls", "/proc/self/fd", "|", "sh", "-c", script.as_str()]).unwrap();
    assert_eq!(outcome.code(), 0);
    assert_only_stdio(&listed_fds(&left));
    assert_only_stdio(&listed_fds(&right));
}

#[cfg(target_os = "linux")]
#[test]
fn redirect_leaves_only_the_duplicate_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("fds.txt");
    let target = out.to_string_lossy().to_string();

    let mut sh = ready();
    let outcome = sh.run(&["ls", "/proc/self/fd", ">", target.as_str()]).unwrap();
    assert_eq!(outcome.code(), 0);
    assert_only_stdio(&listed_fds(&out));
}

#[test]
fn foreground_child_dies_on_interrupt() {
    let mut sh = ready();
    let outcome = sh.run(&["sh", "-c", "kill -INT $$; exit 9"]).unwrap();
    assert_eq!(outcome, Outcome::Foreground(ExitState::Signaled(Signal::SIGINT)));
    assert_eq!(outcome.code(), forksh::ABNORMAL_EXIT);
}

#[test]
fn background_child_ignores_interrupt() {
    let mut sh = ready();
    let pid = match sh.run(&["sh", "-c", "kill -INT $$; exit 7", "&"]).unwrap() {
        Outcome::Background(pid) => pid,
        other => panic!("expected background outcome, got {other:?}"),
    };
    let done = drain(&mut sh, Duration::from_secs(5));
    assert!(done.contains(&(pid, ExitState::Exited(7))));
}

#[test]
fn exec_failure_exits_127_and_dispatcher_continues() {
    let mut sh = ready();
    let outcome = sh.run(&["forksh-no-such-program", "arg"]).unwrap();
    assert_eq!(outcome, Outcome::Foreground(ExitState::Exited(127)));
    assert!(sh.dispatch(&["forksh-no-such-program"]));
    assert_eq!(sh.run(&["true"]).unwrap().code(), 0);
}

#[test]
fn pipe_failure_forks_nothing() {
    let os = FaultyOs { fail_pipe: true, ..Default::default() };
    let forks = os.forks.clone();
    let mut sh = ready_with(os);

    let err = sh.run(&["echo", "x", "|", "cat"]).unwrap_err();
    assert!(matches!(err, DispatchError::Pipe(Errno::EMFILE)));
    assert_eq!(forks.get(), 0);
    assert!(sh.dispatch(&["echo", "x", "|", "cat"]));
    assert_eq!(forks.get(), 0);

    assert_eq!(sh.run(&["true"]).unwrap().code(), 0);
    assert_eq!(forks.get(), 1);
}

#[test]
fn fork_failure_is_reported_not_fatal() {
    let os = FaultyOs { fail_fork: Some(1), ..Default::default() };
    let mut sh = ready_with(os);
    assert!(matches!(sh.run(&["true"]), Err(DispatchError::Fork(Errno::EAGAIN))));
    assert_eq!(sh.run(&["true"]).unwrap().code(), 0);
}

#[test]
fn failed_right_fork_does_not_leave_left_running() {
    let os = FaultyOs { fail_fork: Some(2), ..Default::default() };
    let forks = os.forks.clone();
    let mut sh = ready_with(os);

    let start = Instant::now();
    let err = sh.run(&["sleep", "5", "|", "cat"]).unwrap_err();
    assert!(matches!(err, DispatchError::Fork(_)));
    assert_eq!(forks.get(), 2);
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[test]
fn malformed_pipeline_forks_nothing() {
    let os = FaultyOs::default();
    let forks = os.forks.clone();
    let mut sh = ready_with(os);

    for argv in [&["|", "wc"][..], &["ls", "|"][..], &["a", "|", "b", "|", "c"][..]] {
        let err = sh.run(argv).unwrap_err();
        assert!(matches!(err, DispatchError::Plan(ShapeError::MalformedPipeline { .. })));
        assert!(sh.dispatch(argv));
    }
    assert_eq!(forks.get(), 0);
}

#[test]
fn empty_line_is_a_no_op() {
    let mut sh = ready();
    let empty: [&str; 0] = [];
    assert!(sh.dispatch(&empty));
    assert!(matches!(sh.run(&empty), Err(DispatchError::Plan(ShapeError::Empty))));
}

#[test]
fn interior_nul_fails_the_command_only() {
    let mut sh = ready();
    assert!(matches!(sh.run(&["echo", "a\0b"]), Err(DispatchError::Argument(_))));
    assert!(sh.dispatch(&["echo", "a\0b"]));
}

#[test]
fn lifecycle_is_enforced() {
    let mut sh = ready();
    assert!(matches!(sh.setup(), Err(DispatchError::AlreadySetUp)));
    sh.teardown().unwrap();
    sh.teardown().unwrap();
    assert!(!sh.dispatch(&["true"]));
    assert!(matches!(sh.run(&["true"]), Err(DispatchError::Closed)));
}
