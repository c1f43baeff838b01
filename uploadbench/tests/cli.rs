#![cfg(unix)]

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};

use uploadbench_test::server::TestServer;

#[tokio::test(flavor = "multi_thread")]
async fn ctrl_c_closes_transports() {
    let server = TestServer::new().await;
    let url = server.url("/container/blob");

    let (status, stderr) = tokio::task::spawn_blocking(move || {
        let mut child = Command::new(env!("CARGO_BIN_EXE_uploadbench"))
            .args([url.as_str(), "4096"])
            .env("RUST_LOG", "debug")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let mut stderr = child.stderr.take().unwrap();
        let logs = std::thread::spawn(move || {
            let mut logs = String::new();
            stderr.read_to_string(&mut logs).unwrap();
            logs
        });

        // Wait for the first trial, then keep draining stdout so the process never blocks on it.
        let mut stdout = BufReader::new(child.stdout.take().unwrap()).lines();
        stdout
            .by_ref()
            .map(Result::unwrap)
            .find(|line| line.contains("Put"))
            .unwrap();

        let killed = Command::new("kill")
            .args(["-INT", &child.id().to_string()])
            .status()
            .unwrap();
        assert!(killed.success());

        stdout.for_each(drop);
        let status = child.wait().unwrap();
        (status, logs.join().unwrap())
    })
    .await
    .unwrap();

    assert!(status.success(), "exited with {status}:\n{stderr}");
    assert!(stderr.contains("http1 connection closed"), "{stderr}");
    assert!(stderr.contains("reqwest client released"), "{stderr}");
}
