
use tempfile::TempDir;

use super::*;

fn temp_pid_file() -> (TempDir, WorkerPidFile) {
    let dir = TempDir::new().unwrap();
    let pid_file = WorkerPidFile::for_worker(dir.path(), "worker-1");
    (dir, pid_file)
}

#[test]
fn test_path_and_worker_id() {
    let (dir, pid_file) = temp_pid_file();
    assert_eq!(pid_file.path(), dir.path().join("worker-1.pid"));
    assert_eq!(pid_file.worker_id(), "worker-1");
}

#[test]
fn test_read_missing_file() {
    let (_dir, pid_file) = temp_pid_file();
    assert!(!pid_file.exists());
    assert!(pid_file.read_pid().unwrap().is_none());
}

#[test]
fn test_write_and_read_pid() {
    let (_dir, pid_file) = temp_pid_file();
    pid_file.write_pid(12345).unwrap();

    assert!(pid_file.exists());
    assert_eq!(pid_file.read_pid().unwrap(), Some(12345));
}

#[test]
fn test_write_creates_parent_directory() {
    let dir = TempDir::new().unwrap();
    let pid_file = WorkerPidFile::for_worker(&dir.path().join("workers"), "w");
    pid_file.write_pid(1).unwrap();
    assert!(pid_file.exists());
}

#[test]
fn test_remove() {
    let (_dir, pid_file) = temp_pid_file();
    pid_file.write_pid(12345).unwrap();

    pid_file.remove().unwrap();
    assert!(!pid_file.exists());

    // Removing again is fine.
    pid_file.remove().unwrap();
}

#[test]
fn test_read_rejects_garbage() {
    let (_dir, pid_file) = temp_pid_file();
    std::fs::write(pid_file.path(), "not a pid").unwrap();
    assert!(matches!(
        pid_file.read_pid(),
        Err(DaemonError::PidFileRead { .. })
    ));
}

#[cfg(unix)]
#[test]
fn test_is_process_running() {
    // Our own process is certainly alive.
    assert!(WorkerPidFile::is_process_running(std::process::id()));
    // PID far outside any plausible pid_max.
    assert!(!WorkerPidFile::is_process_running(0x7FFF_FFF0));
}
