//! In-memory fake of [`ContainerClient`] (testing only)
//!
//! `MemoryContainerClient` keeps units in a `HashMap`, records every call in
//! order, and lets tests script the build program's output and exit code or
//! inject failures into any operation.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::client::{
    ClientError, ClientResult, ContainerClient, LogStream, RemoveOptions, UnitConfig, UnitId,
    UnitState,
};

/// Client operations, used to record calls and to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    CopyArchive,
    Start,
    StreamLogs,
    Inspect,
    Remove,
    Kill,
}

/// One recorded client call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCall {
    pub operation: Operation,
    /// Target unit (`None` for `Create`)
    pub unit: Option<UnitId>,
}

/// State of a fake unit.
#[derive(Debug, Clone)]
pub struct FakeUnit {
    pub config: UnitConfig,
    /// `(target path, archive bytes)` of every copy, in order
    pub copies: Vec<(String, Vec<u8>)>,
    pub running: bool,
    pub killed_with: Option<String>,
}

#[derive(Debug, Default)]
struct Script {
    output: Vec<Vec<u8>>,
    exit_code: i64,
    hold_logs: bool,
    break_stream: bool,
}

/// In-memory container runtime.
#[derive(Debug, Default)]
pub struct MemoryContainerClient {
    units: Mutex<HashMap<UnitId, FakeUnit>>,
    calls: Mutex<Vec<ClientCall>>,
    failures: Mutex<HashSet<Operation>>,
    script: Mutex<Script>,
}

impl MemoryContainerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output chunks the build program writes before exiting.
    pub fn with_output<I, C>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        self.script.lock().unwrap().output = chunks.into_iter().map(Into::into).collect();
        self
    }

    /// Exit code reported by `inspect_unit`.
    pub fn with_exit_code(self, code: i64) -> Self {
        self.script.lock().unwrap().exit_code = code;
        self
    }

    /// Keep the log stream open after the scripted output, as if the build
    /// program never finished.
    pub fn with_held_logs(self) -> Self {
        self.script.lock().unwrap().hold_logs = true;
        self
    }

    /// End the log stream with a transport error after the scripted output.
    pub fn with_broken_stream(self) -> Self {
        self.script.lock().unwrap().break_stream = true;
        self
    }

    /// Make every later call of `operation` fail with an API error.
    pub fn fail_on(&self, operation: Operation) {
        self.failures.lock().unwrap().insert(operation);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Operations made so far, in order.
    pub fn operations(&self) -> Vec<Operation> {
        self.calls().into_iter().map(|c| c.operation).collect()
    }

    /// Snapshot of a unit that has not been removed.
    pub fn unit(&self, id: &UnitId) -> Option<FakeUnit> {
        self.units.lock().unwrap().get(id).cloned()
    }

    pub fn exists(&self, id: &UnitId) -> bool {
        self.units.lock().unwrap().contains_key(id)
    }

    /// Number of units that have not been removed.
    pub fn live_units(&self) -> usize {
        self.units.lock().unwrap().len()
    }

    /// Number of `remove_unit` calls against `id`, successful or not.
    pub fn removals(&self, id: &UnitId) -> usize {
        self.count(Operation::Remove, id)
    }

    /// Number of `kill_unit` calls against `id`, successful or not.
    pub fn kills(&self, id: &UnitId) -> usize {
        self.count(Operation::Kill, id)
    }

    fn count(&self, operation: Operation, id: &UnitId) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation && c.unit.as_ref() == Some(id))
            .count()
    }

    fn record(&self, operation: Operation, unit: Option<&UnitId>) -> ClientResult<()> {
        self.calls.lock().unwrap().push(ClientCall {
            operation,
            unit: unit.cloned(),
        });
        if self.failures.lock().unwrap().contains(&operation) {
            return Err(ClientError::Api(format!("injected {:?} failure", operation)));
        }
        Ok(())
    }

    fn with_unit<T>(
        &self,
        id: &UnitId,
        f: impl FnOnce(&mut FakeUnit) -> ClientResult<T>,
    ) -> ClientResult<T> {
        let mut units = self.units.lock().unwrap();
        let unit = units.get_mut(id).ok_or_else(|| ClientError::NotFound {
            id: id.as_str().to_string(),
        })?;
        f(unit)
    }
}

#[async_trait]
impl ContainerClient for MemoryContainerClient {
    async fn create_unit(&self, config: &UnitConfig) -> ClientResult<UnitId> {
        self.record(Operation::Create, None)?;
        let id = UnitId::new(uuid::Uuid::new_v4().simple().to_string());
        self.units.lock().unwrap().insert(
            id.clone(),
            FakeUnit {
                config: config.clone(),
                copies: Vec::new(),
                running: false,
                killed_with: None,
            },
        );
        Ok(id)
    }

    async fn copy_archive(&self, id: &UnitId, target: &str, archive: Vec<u8>) -> ClientResult<()> {
        self.record(Operation::CopyArchive, Some(id))?;
        self.with_unit(id, |unit| {
            unit.copies.push((target.to_string(), archive));
            Ok(())
        })
    }

    async fn start_unit(&self, id: &UnitId) -> ClientResult<()> {
        self.record(Operation::Start, Some(id))?;
        self.with_unit(id, |unit| {
            unit.running = true;
            Ok(())
        })
    }

    async fn stream_logs(&self, id: &UnitId) -> ClientResult<LogStream> {
        self.record(Operation::StreamLogs, Some(id))?;
        let script = self.script.lock().unwrap();
        self.with_unit(id, |unit| {
            // Without held logs the program runs to completion.
            if !script.hold_logs {
                unit.running = false;
            }
            Ok(())
        })?;

        let mut items: Vec<ClientResult<Vec<u8>>> =
            script.output.iter().cloned().map(Ok).collect();
        if script.break_stream {
            items.push(Err(ClientError::Transport("connection reset".to_string())));
        }

        let logs = stream::iter(items);
        if script.hold_logs {
            Ok(logs.chain(stream::pending()).boxed())
        } else {
            Ok(logs.boxed())
        }
    }

    async fn inspect_unit(&self, id: &UnitId) -> ClientResult<UnitState> {
        self.record(Operation::Inspect, Some(id))?;
        let exit_code = self.script.lock().unwrap().exit_code;
        self.with_unit(id, |_| Ok(UnitState { exit_code }))
    }

    async fn remove_unit(&self, id: &UnitId, _options: RemoveOptions) -> ClientResult<()> {
        self.record(Operation::Remove, Some(id))?;
        self.units
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound {
                id: id.as_str().to_string(),
            })
    }

    async fn kill_unit(&self, id: &UnitId, signal: &str) -> ClientResult<()> {
        self.record(Operation::Kill, Some(id))?;
        self.with_unit(id, |unit| {
            if !unit.running {
                return Err(ClientError::Conflict {
                    id: id.as_str().to_string(),
                    message: "container is not running".to_string(),
                });
            }
            unit.running = false;
            unit.killed_with = Some(signal.to_string());
            Ok(())
        })
    }
}
