//! Supervisor tests against shell scripts standing in for the sandbox

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hearth_runtime::{
    AbortController, RuntimeError, RuntimeOptions, StartOutcome, StartupFailureKind, StdioHandler,
    StdioStream, Supervisor,
};
use parking_lot::Mutex;
use tempfile::TempDir;

fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn options(executable: &Path) -> RuntimeOptions {
    RuntimeOptions::new(executable).with_socket("entry", "127.0.0.1:0")
}

#[derive(Default)]
struct Collect(Mutex<Vec<(StdioStream, String)>>);

impl StdioHandler for Collect {
    fn handle(&self, stream: StdioStream, line: &str) {
        self.0.lock().push((stream, line.to_string()));
    }
}

#[tokio::test]
async fn reports_ports_from_control_channel() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let body = format!(
        r#"echo "$@" > {out}/args
cat > {out}/config
echo "$FORCE_COLOR" > {out}/color
echo "not json" >&3
echo '{{"event":"listen","socket":"entry","port":8787}}' >&3
echo '{{"event":"listen-inspector","port":9229}}' >&3
echo "hello from sandbox"
exec sleep 30
"#,
        out = out.display()
    );
    fs::create_dir(&out).unwrap();
    let exe = script(&dir, "sandbox", &body);

    let mut opts = options(&exe);
    opts.inspector_address = Some("127.0.0.1:0".into());
    opts.force_color = true;
    let handler = Arc::new(Collect::default());
    opts.stdio = Some(handler.clone());

    let mut supervisor = Supervisor::new();
    let outcome = supervisor.start(b"binary-config", &opts, None).await.unwrap();

    let StartOutcome::Ready(ports) = outcome else {
        panic!("expected ready, got {outcome:?}");
    };
    assert_eq!(ports["entry"], 8787);
    assert_eq!(ports["inspector"], 9229);
    assert!(supervisor.is_running());

    // stdin is closed after the config is written, so cat has finished
    assert_eq!(fs::read(out.join("config")).unwrap(), b"binary-config");
    assert_eq!(fs::read_to_string(out.join("color")).unwrap().trim(), "1");
    let args = fs::read_to_string(out.join("args")).unwrap();
    assert!(args.contains("serve --binary --experimental --socket-addr=entry=127.0.0.1:0"));
    assert!(args.contains("--control-fd=3 - --inspector-addr=127.0.0.1:0"));

    // Give the stdout pump a moment to pass the line through
    for _ in 0..50 {
        if !handler.0.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        handler.0.lock().first(),
        Some(&(StdioStream::Stdout, "hello from sandbox".to_string()))
    );

    supervisor.dispose().await;
    assert!(!supervisor.is_running());
    // Idempotent
    supervisor.dispose().await;
}

#[tokio::test]
async fn address_in_use_is_classified() {
    let dir = TempDir::new().unwrap();
    let exe = script(
        &dir,
        "sandbox",
        r#"cat > /dev/null
echo "*** Fatal uncaught kj::Exception: bind(): Address already in use; toString() = 127.0.0.1:8787" >&2
exit 1
"#,
    );

    let mut supervisor = Supervisor::new();
    let err = supervisor
        .start(b"", &options(&exe), None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::Startup {
            kind: StartupFailureKind::AddressInUse { ref address }
        } if address == "127.0.0.1:8787"
    ));
    assert!(!supervisor.is_running());
}

#[tokio::test]
async fn early_exit_is_unknown_failure() {
    let dir = TempDir::new().unwrap();
    let exe = script(&dir, "sandbox", "echo 'boom' >&2\nexit 3\n");

    let mut supervisor = Supervisor::new();
    let err = supervisor
        .start(b"config", &options(&exe), None)
        .await
        .unwrap_err();
    assert_eq!(err.startup_kind(), Some(&StartupFailureKind::Unknown));
}

#[tokio::test]
async fn abort_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let exe = script(&dir, "sandbox", "cat > /dev/null\nexec sleep 30\n");

    let controller = AbortController::new();
    let signal = controller.signal();
    let aborter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.abort();
    });

    let mut supervisor = Supervisor::new();
    let outcome = supervisor
        .start(b"", &options(&exe), Some(signal))
        .await
        .unwrap();
    aborter.await.unwrap();

    assert_eq!(outcome, StartOutcome::Aborted);
    assert!(!supervisor.is_running());
}

#[tokio::test]
async fn abort_interrupts_a_sandbox_that_closed_its_control_channel() {
    let dir = TempDir::new().unwrap();
    let exe = script(&dir, "sandbox", "cat > /dev/null\nexec 3>&-\nexec sleep 30\n");

    let controller = AbortController::new();
    let signal = controller.signal();
    let aborter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        controller.abort();
    });

    let mut supervisor = Supervisor::new();
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        supervisor.start(b"", &options(&exe), Some(signal)),
    )
    .await
    .expect("start ignored the abort signal")
    .unwrap();
    aborter.await.unwrap();

    assert_eq!(outcome, StartOutcome::Aborted);
    assert!(!supervisor.is_running());
}

#[tokio::test]
async fn restart_replaces_previous_process() {
    let dir = TempDir::new().unwrap();
    let exe = script(
        &dir,
        "sandbox",
        r#"cat > /dev/null
echo '{"event":"listen","socket":"entry","port":1234}' >&3
exec sleep 30
"#,
    );

    let mut supervisor = Supervisor::new();
    supervisor.start(b"", &options(&exe), None).await.unwrap();
    let first = supervisor.pid().unwrap();

    supervisor.start(b"", &options(&exe), None).await.unwrap();
    let second = supervisor.pid().unwrap();
    assert_ne!(first, second);

    // The first process has been reaped
    assert!(!Path::new(&format!("/proc/{first}")).exists());
    supervisor.dispose().await;
}

#[tokio::test]
async fn missing_executable_fails_to_spawn() {
    let mut supervisor = Supervisor::new();
    let err = supervisor
        .start(b"", &options(Path::new("/nonexistent/hearth-sandbox")), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Spawn { .. }));
}
