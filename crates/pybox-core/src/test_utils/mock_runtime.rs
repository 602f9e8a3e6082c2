// src/test_utils/mock_runtime.rs
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::RuntimeError;
use crate::runtime::{
    BuildContext, Removal, RuntimeClient, UnitHandle, UnitSpec, WaitStatus,
};

/// How a unit's wait resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedExit {
    Code(i64),
    Timeout,
    /// The wait itself fails, as when the daemon drops the connection.
    WaitError,
}

#[derive(Default)]
struct MockState {
    /// Live units by name.
    units: HashMap<String, (UnitHandle, UnitSpec)>,
    created: Vec<UnitSpec>,
    copy_ins: Vec<(String, Vec<u8>)>,
    waited: Vec<Duration>,
    remove_calls: Vec<String>,
    removed: Vec<String>,
    images: HashSet<String>,
    built: Vec<String>,
}

/// A [`RuntimeClient`] that keeps units in memory and replays a script.
pub struct MockRuntime {
    state: Mutex<MockState>,
    exit: ScriptedExit,
    logs: Vec<u8>,
    echo_code: bool,
    output_files: Vec<(String, Vec<u8>)>,
    raw_archive: Option<Vec<u8>>,
    available: bool,
    fail_create: bool,
    fail_copy_out: bool,
    fail_remove: bool,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        let mut state = MockState::default();
        state.images.insert("sandbox-executor".to_string());
        Self {
            state: Mutex::new(state),
            exit: ScriptedExit::Code(0),
            logs: Vec::new(),
            echo_code: false,
            output_files: Vec::new(),
            raw_archive: None,
            available: true,
            fail_create: false,
            fail_copy_out: false,
            fail_remove: false,
        }
    }

    pub fn with_exit(mut self, exit: ScriptedExit) -> Self {
        self.exit = exit;
        self
    }

    pub fn with_logs(mut self, logs: impl Into<Vec<u8>>) -> Self {
        self.logs = logs.into();
        self
    }

    /// Logs of each unit are the code it was asked to run.
    pub fn with_echo_code(mut self) -> Self {
        self.echo_code = true;
        self
    }

    /// A file present in the working directory after the run.
    pub fn with_output_file(mut self, name: &str, data: Vec<u8>) -> Self {
        self.output_files.push((name.to_string(), data));
        self
    }

    /// Bytes returned verbatim by `copy_out`.
    pub fn with_raw_archive(mut self, archive: Vec<u8>) -> Self {
        self.raw_archive = Some(archive);
        self
    }

    pub fn with_image_present(self, present: bool) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            if present {
                state.images.insert("sandbox-executor".to_string());
            } else {
                state.images.clear();
            }
        }
        self
    }

    pub fn with_unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn with_create_failure(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn with_copy_out_failure(mut self) -> Self {
        self.fail_copy_out = true;
        self
    }

    pub fn with_remove_failure(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    /// Register a unit as if a previous request had created it.
    pub fn insert_unit(&self, name: &str) {
        let handle = UnitHandle {
            id: new_unit_id(),
            name: name.to_string(),
        };
        let spec = UnitSpec {
            name: name.to_string(),
            image: "sandbox-executor".to_string(),
            command: Vec::new(),
            working_dir: "/data".to_string(),
            env: Vec::new(),
            profile: crate::config::ContainerConfig::default()
                .resource_profile()
                .unwrap(),
            binds: Vec::new(),
        };
        self.state
            .lock()
            .unwrap()
            .units
            .insert(name.to_string(), (handle, spec));
    }

    pub fn created_specs(&self) -> Vec<UnitSpec> {
        self.state.lock().unwrap().created.clone()
    }

    /// `(target_path, archive)` for every copy-in.
    pub fn copy_ins(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().unwrap().copy_ins.clone()
    }

    pub fn waited_timeouts(&self) -> Vec<Duration> {
        self.state.lock().unwrap().waited.clone()
    }

    pub fn live_units(&self) -> Vec<String> {
        self.state.lock().unwrap().units.keys().cloned().collect()
    }

    /// Every name `remove` was called with.
    pub fn remove_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().remove_calls.clone()
    }

    /// Names that were actually removed.
    pub fn removed_units(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn built_images(&self) -> Vec<String> {
        self.state.lock().unwrap().built.clone()
    }

    fn spec_for(&self, unit: &UnitHandle) -> Result<UnitSpec, RuntimeError> {
        self.state
            .lock()
            .unwrap()
            .units
            .get(&unit.name)
            .map(|(_, spec)| spec.clone())
            .ok_or_else(|| RuntimeError::operation("lookup", format!("no such container: {}", unit.name)))
    }

    fn output_archive(&self, source_path: &str) -> Vec<u8> {
        let root = Path::new(source_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "data".to_string());

        let mut builder = tar::Builder::new(Vec::new());
        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        builder
            .append_data(&mut dir, format!("{}/", root), std::io::empty())
            .unwrap();
        for (name, data) in &self.output_files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder
                .append_data(&mut header, format!("{}/{}", root, name), data.as_slice())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }
}

fn new_unit_id() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[async_trait]
impl RuntimeClient for MockRuntime {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        if !self.available {
            return Err(RuntimeError::Unavailable("mock runtime is down".to_string()));
        }
        Ok(self.state.lock().unwrap().images.contains(image))
    }

    async fn build_image(&self, image: &str, _context: &BuildContext) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.images.insert(image.to_string());
        state.built.push(image.to_string());
        Ok(())
    }

    async fn create(&self, spec: &UnitSpec) -> Result<UnitHandle, RuntimeError> {
        if self.fail_create || !self.available {
            return Err(RuntimeError::Unavailable("mock runtime refused to create".to_string()));
        }
        let handle = UnitHandle {
            id: new_unit_id(),
            name: spec.name.clone(),
        };
        let mut state = self.state.lock().unwrap();
        if state.units.contains_key(&spec.name) {
            return Err(RuntimeError::operation(
                "create",
                format!("name {} already in use", spec.name),
            ));
        }
        state.created.push(spec.clone());
        state
            .units
            .insert(spec.name.clone(), (handle.clone(), spec.clone()));
        Ok(handle)
    }

    async fn start(&self, unit: &UnitHandle) -> Result<(), RuntimeError> {
        self.spec_for(unit).map(|_| ())
    }

    async fn wait(&self, unit: &UnitHandle, timeout: Duration) -> Result<WaitStatus, RuntimeError> {
        self.spec_for(unit)?;
        self.state.lock().unwrap().waited.push(timeout);
        // Yield so concurrently running requests interleave.
        tokio::task::yield_now().await;
        match self.exit {
            ScriptedExit::Code(code) => Ok(WaitStatus::Exited(code)),
            ScriptedExit::Timeout => Ok(WaitStatus::TimedOut),
            ScriptedExit::WaitError => Err(RuntimeError::operation(
                "wait",
                "container wait stream ended unexpectedly",
            )),
        }
    }

    async fn logs(&self, unit: &UnitHandle) -> Result<Vec<u8>, RuntimeError> {
        let spec = self.spec_for(unit)?;
        if self.echo_code {
            return Ok(spec.command.last().cloned().unwrap_or_default().into_bytes());
        }
        Ok(self.logs.clone())
    }

    async fn copy_in(
        &self,
        unit: &UnitHandle,
        target_path: &str,
        archive: Vec<u8>,
    ) -> Result<(), RuntimeError> {
        self.spec_for(unit)?;
        self.state
            .lock()
            .unwrap()
            .copy_ins
            .push((target_path.to_string(), archive));
        Ok(())
    }

    async fn copy_out(&self, unit: &UnitHandle, source_path: &str) -> Result<Vec<u8>, RuntimeError> {
        if self.fail_copy_out {
            return Err(RuntimeError::operation("copy_out", "archive stream interrupted"));
        }
        if let Some(raw) = &self.raw_archive {
            return Ok(raw.clone());
        }
        self.spec_for(unit)?;
        Ok(self.output_archive(source_path))
    }

    async fn remove(&self, name: &str, _force: bool) -> Result<Removal, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.remove_calls.push(name.to_string());
        if self.fail_remove {
            return Err(RuntimeError::operation("remove", "device or resource busy"));
        }
        match state.units.remove(name) {
            Some(_) => {
                state.removed.push(name.to_string());
                Ok(Removal::Removed)
            }
            None => Ok(Removal::NotFound),
        }
    }
}
