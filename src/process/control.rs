//! Backend-agnostic process control interface

use async_trait::async_trait;

use super::command::ProcessRequest;
use super::error::Result;
use super::manager::ProcessManager;
use super::record::{ProcessInfo, ProcessOutput};

/// Operations shared by every process backend
#[async_trait]
pub trait ProcessControl: Send + Sync {
    async fn start_process(&self, request: ProcessRequest) -> Result<String>;
    async fn get_output(&self, process_id: &str) -> Result<ProcessOutput>;
    async fn wait_for_exit(&self, process_id: &str) -> Result<i32>;
    async fn kill_process(&self, process_id: &str) -> Result<()>;
    async fn release_process(&self, process_id: &str) -> Result<()>;
    async fn list_processes(&self) -> Vec<String>;
    async fn get_process_info(&self, process_id: &str) -> Result<ProcessInfo>;
    async fn cleanup(&self);
}

#[async_trait]
impl ProcessControl for ProcessManager {
    async fn start_process(&self, request: ProcessRequest) -> Result<String> {
        ProcessManager::start_process(self, request).await
    }

    async fn get_output(&self, process_id: &str) -> Result<ProcessOutput> {
        ProcessManager::get_output(self, process_id)
    }

    async fn wait_for_exit(&self, process_id: &str) -> Result<i32> {
        ProcessManager::wait_for_exit(self, process_id).await
    }

    async fn kill_process(&self, process_id: &str) -> Result<()> {
        ProcessManager::kill_process(self, process_id).await
    }

    async fn release_process(&self, process_id: &str) -> Result<()> {
        ProcessManager::release_process(self, process_id)
    }

    async fn list_processes(&self) -> Vec<String> {
        ProcessManager::list_processes(self)
    }

    async fn get_process_info(&self, process_id: &str) -> Result<ProcessInfo> {
        ProcessManager::get_process_info(self, process_id)
    }

    async fn cleanup(&self) {
        ProcessManager::cleanup(self).await
    }
}
