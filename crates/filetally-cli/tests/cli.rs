use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

fn create_test_files(dir: &TempDir, files: &[(&str, &str)]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for (name, content) in files {
        let path = dir.path().join(name);
        std::fs::write(&path, content)?;
        paths.push(path);
    }
    Ok(paths)
}

fn found(count: u64, query: &str, file: &Path) -> String {
    format!(
        "found {} occurrence(s) of '{}' in {}.",
        count,
        query,
        file.display()
    )
}

fn assert_dog_counts(mode: &str) -> Result<()> {
    let temp_dir = tempdir()?;
    let files = create_test_files(
        &temp_dir,
        &[("a.txt", "dog cat dog"), ("b.txt", "dog dog dog")],
    )?;

    let mut cmd = Command::cargo_bin("filetally")?;
    cmd.args(["--mode", mode, "--grace-ms", "0"])
        .args(&files)
        .write_stdin("dog\n");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(found(2, "dog", &files[0])))
        .stdout(predicate::str::contains(found(3, "dog", &files[1])))
        .stdout(predicate::str::contains("Child [").count(2));

    Ok(())
}

#[test]
fn test_task_mode_round() -> Result<()> {
    assert_dog_counts("task")
}

#[test]
fn test_process_mode_round() -> Result<()> {
    assert_dog_counts("process")
}

#[test]
fn test_repeated_and_empty_queries() -> Result<()> {
    let temp_dir = tempdir()?;
    let files = create_test_files(&temp_dir, &[("a.txt", "cat dog cat")])?;

    let mut cmd = Command::cargo_bin("filetally")?;
    cmd.args(["--grace-ms", "0"])
        .args(&files)
        .write_stdin("cat\n\nbird\ncat\n");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(found(2, "cat", &files[0])).count(2))
        .stdout(predicate::str::contains(found(0, "bird", &files[0])))
        .stdout(predicate::str::contains("Child [").count(3));

    Ok(())
}

#[test]
fn test_no_files() -> Result<()> {
    let mut cmd = Command::cargo_bin("filetally")?;

    cmd.assert()
        .code(1)
        .stdout(predicate::str::contains("Pass file name(s) as arguments."));

    Ok(())
}

#[test]
fn test_too_many_files() -> Result<()> {
    let temp_dir = tempdir()?;
    let files = create_test_files(
        &temp_dir,
        &[("a.txt", "x"), ("b.txt", "x"), ("c.txt", "x")],
    )?;

    let mut cmd = Command::cargo_bin("filetally")?;
    cmd.args(["--max-files", "2"]).args(&files);

    cmd.assert()
        .code(1)
        .stdout(predicate::str::contains("No more than 2 files can be processed"));

    Ok(())
}

#[test]
fn test_missing_file() -> Result<()> {
    let temp_dir = tempdir()?;
    let files = create_test_files(&temp_dir, &[("a.txt", "x")])?;
    let missing = temp_dir.path().join("nope.txt");

    let mut cmd = Command::cargo_bin("filetally")?;
    cmd.args(&files).arg(&missing).write_stdin("x\n");

    cmd.assert()
        .code(1)
        .stdout(predicate::str::contains(format!(
            "File '{}' does not exist.",
            missing.display()
        )))
        .stdout(predicate::str::contains("Child [").not());

    Ok(())
}

#[cfg(target_os = "linux")]
mod interrupt {
    use super::*;
    use anyhow::Context;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::process::{Child, ExitStatus, Stdio};
    use std::time::{Duration, Instant};

    /// True while `pid` exists and is not a zombie waiting to be reaped.
    fn is_running(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z'),
            Err(_) => false,
        }
    }

    fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<ExitStatus> {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() > deadline {
                child.kill()?;
                anyhow::bail!("filetally did not exit after SIGINT");
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_interrupt_terminates_every_worker() -> Result<()> {
        let temp_dir = tempdir()?;
        let files = create_test_files(
            &temp_dir,
            &[("a.txt", "dog cat dog"), ("b.txt", "dog dog dog")],
        )?;

        let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin("filetally"))
            .args(["--mode", "process", "--grace-ms", "0"])
            .args(&files)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let mut stdin = child.stdin.take().context("stdin not captured")?;
        let mut stdout = BufReader::new(child.stdout.take().context("stdout not captured")?);

        // Two answers mean both workers are up and the interrupt handler is installed.
        stdin.write_all(b"dog\n")?;
        stdin.flush()?;
        let mut worker_pids = Vec::new();
        for _ in 0..2 {
            let mut line = String::new();
            stdout.read_line(&mut line)?;
            let (pid, _) = line
                .strip_prefix("Child [")
                .and_then(|rest| rest.split_once(']'))
                .with_context(|| format!("unexpected result line: {line:?}"))?;
            worker_pids.push(pid.parse::<u32>()?);
        }
        assert!(worker_pids.iter().all(|&pid| is_running(pid)));

        kill(Pid::from_raw(i32::try_from(child.id())?), Signal::SIGINT)?;
        let status = wait_with_deadline(&mut child, Duration::from_secs(10))?;
        drop(stdin);

        let mut rest = String::new();
        stdout.read_to_string(&mut rest)?;
        assert_eq!(status.code(), Some(0));
        assert!(rest.contains("Program will now exit."));
        assert_eq!(rest.matches("Shutting down child [").count(), 2);
        for pid in &worker_pids {
            assert!(rest.contains(&format!("Shutting down child [{pid}]...")));
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while worker_pids.iter().any(|&pid| is_running(pid)) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        for pid in worker_pids {
            assert!(!is_running(pid), "worker {pid} still running after interrupt");
        }

        Ok(())
    }
}
