//! Both backends driven through the shared `ProcessControl` trait

use bgproc::process::{
    MockProcessManager, ProcessControl, ProcessError, ProcessManager, ProcessOutput,
    ProcessRequest,
};

async fn run_echo(backend: &dyn ProcessControl) -> String {
    let id = backend
        .start_process(ProcessRequest::new("echo").args(["hello"]))
        .await
        .expect("start should succeed");
    assert!(backend.list_processes().await.contains(&id));

    let code = backend.wait_for_exit(&id).await.unwrap();
    assert_eq!(code, 0);
    assert_eq!(backend.wait_for_exit(&id).await.unwrap(), 0);

    let info = backend.get_process_info(&id).await.unwrap();
    assert_eq!(info.process_id, id);
    assert_eq!(info.command, "echo");
    assert_eq!(info.args, vec!["hello".to_string()]);
    assert!(!info.is_running);

    let output = backend.get_output(&id).await.unwrap();
    backend.release_process(&id).await.unwrap();
    assert!(!backend.list_processes().await.contains(&id));
    assert!(matches!(
        backend.release_process(&id).await,
        Err(ProcessError::NotFound(_))
    ));

    output.stdout
}

#[cfg(unix)]
#[tokio::test]
async fn test_real_backend_through_trait() {
    let manager = ProcessManager::new();
    let stdout = run_echo(&manager).await;
    assert_eq!(stdout, "hello\n");
    manager.cleanup().await;
}

#[tokio::test]
async fn test_mock_backend_through_trait() {
    let mock = MockProcessManager::default().with_output(
        "echo hello",
        ProcessOutput {
            stdout: "hello\n".to_string(),
            combined: "hello\n".to_string(),
            exit_code: Some(0),
            ..ProcessOutput::default()
        },
    );
    let stdout = run_echo(&mock).await;
    assert_eq!(stdout, "hello\n");
}

#[cfg(unix)]
#[tokio::test]
async fn test_boxed_backends_cleanup() {
    let backends: Vec<Box<dyn ProcessControl>> = vec![
        Box::new(ProcessManager::new()),
        Box::new(MockProcessManager::default()),
    ];

    for backend in &backends {
        backend
            .start_process(ProcessRequest::new("sleep").args(["10"]))
            .await
            .unwrap();
        backend
            .start_process(ProcessRequest::new("sleep").args(["10"]))
            .await
            .unwrap();
        assert_eq!(backend.list_processes().await.len(), 2);

        backend.cleanup().await;
        assert!(backend.list_processes().await.is_empty());
    }
}
