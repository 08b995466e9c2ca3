//! Mock ComputeClient for unit testing
//!
//! Instances live in memory and step through a scripted status sequence, one
//! status per `get_instance` call, so tests can exercise the wait loops
//! without a real project. Failures can be queued per operation and calls
//! are counted. Every insert and delete records a zone operation that
//! `get_zone_operation` reports as `DONE`.

use crate::compute_trait::ComputeClientTrait;
use crate::error::ComputeError;
use crate::models::*;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Key = (String, String, String);

#[derive(Debug, Clone)]
struct MockInstance {
    instance: Instance,
    upcoming: VecDeque<InstanceStatus>,
    deleting: bool,
}

/// Mock ComputeClient for testing
#[derive(Debug, Clone)]
pub struct MockComputeClient {
    instances: Arc<Mutex<HashMap<Key, MockInstance>>>,
    create_sequence: Vec<InstanceStatus>,
    delete_sequence: Vec<InstanceStatus>,
    get_failures: Arc<Mutex<VecDeque<ComputeError>>>,
    insert_failures: Arc<Mutex<VecDeque<ComputeError>>>,
    delete_failures: Arc<Mutex<VecDeque<ComputeError>>>,
    failed_inserts: Arc<Mutex<VecDeque<OperationErrorItem>>>,
    operations: Arc<Mutex<HashMap<Key, Operation>>>,
    get_calls: Arc<AtomicU32>,
    insert_calls: Arc<AtomicU32>,
    delete_calls: Arc<AtomicU32>,
    operation_calls: Arc<AtomicU32>,
    next_operation: Arc<AtomicU32>,
}

impl Default for MockComputeClient {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key(project: &str, zone: &str, name: &str) -> Key {
    (project.to_string(), zone.to_string(), name.to_string())
}

impl MockComputeClient {
    /// New instances go `PROVISIONING → STAGING → RUNNING`; deleted ones
    /// report `STOPPING` once and then disappear.
    pub fn new() -> Self {
        Self {
            instances: Arc::new(Mutex::new(HashMap::new())),
            create_sequence: vec![InstanceStatus::Staging, InstanceStatus::Running],
            delete_sequence: vec![InstanceStatus::Stopping],
            get_failures: Arc::new(Mutex::new(VecDeque::new())),
            insert_failures: Arc::new(Mutex::new(VecDeque::new())),
            delete_failures: Arc::new(Mutex::new(VecDeque::new())),
            failed_inserts: Arc::new(Mutex::new(VecDeque::new())),
            operations: Arc::new(Mutex::new(HashMap::new())),
            get_calls: Arc::new(AtomicU32::new(0)),
            insert_calls: Arc::new(AtomicU32::new(0)),
            delete_calls: Arc::new(AtomicU32::new(0)),
            operation_calls: Arc::new(AtomicU32::new(0)),
            next_operation: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Statuses reported by successive gets after an insert. The last one sticks.
    pub fn with_create_sequence(mut self, sequence: Vec<InstanceStatus>) -> Self {
        self.create_sequence = sequence;
        self
    }

    /// Statuses reported by successive gets after a delete, before the instance disappears
    pub fn with_delete_sequence(mut self, sequence: Vec<InstanceStatus>) -> Self {
        self.delete_sequence = sequence;
        self
    }

    /// Seeds an existing instance with a fixed status
    pub fn add_instance(&self, project: &str, zone: &str, mut instance: Instance, status: InstanceStatus) {
        instance.status = status;
        lock(&self.instances).insert(
            key(project, zone, &instance.name),
            MockInstance {
                instance,
                upcoming: VecDeque::new(),
                deleting: false,
            },
        );
    }

    /// Current state of an instance, without advancing its status sequence
    pub fn instance(&self, project: &str, zone: &str, name: &str) -> Option<Instance> {
        lock(&self.instances)
            .get(&key(project, zone, name))
            .map(|m| m.instance.clone())
    }

    /// Queues an error for the next `get_instance` call
    pub fn fail_next_get(&self, error: ComputeError) {
        lock(&self.get_failures).push_back(error);
    }

    /// Queues an error for the next `insert_instance` call
    pub fn fail_next_insert(&self, error: ComputeError) {
        lock(&self.insert_failures).push_back(error);
    }

    /// Queues an error for the next `delete_instance` call
    pub fn fail_next_delete(&self, error: ComputeError) {
        lock(&self.delete_failures).push_back(error);
    }

    /// Makes the next `insert_instance` call accept the request but fail
    /// asynchronously: no instance appears and its operation ends `DONE` with
    /// the given error.
    pub fn fail_next_insert_operation(&self, code: &str, message: &str) {
        lock(&self.failed_inserts).push_back(OperationErrorItem {
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    /// Number of `get_instance` calls so far
    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of `insert_instance` calls so far
    pub fn insert_calls(&self) -> u32 {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Number of `delete_instance` calls so far
    pub fn delete_calls(&self) -> u32 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Number of `get_zone_operation` calls so far
    pub fn operation_calls(&self) -> u32 {
        self.operation_calls.load(Ordering::SeqCst)
    }

    /// Returns the operation as the insert/delete reply reports it (`RUNNING`,
    /// no error) and stores its final state for `get_zone_operation`.
    fn operation(&self, project: &str, zone: &str, operation_type: &str, failure: Option<OperationErrorItem>) -> Operation {
        let id = self.next_operation.fetch_add(1, Ordering::SeqCst);
        let reply = Operation {
            name: format!("operation-{}", id),
            operation_type: Some(operation_type.to_string()),
            status: OperationStatus::Running,
            error: None,
        };
        let finished = Operation {
            status: OperationStatus::Done,
            error: failure.map(|item| OperationErrors { errors: vec![item] }),
            ..reply.clone()
        };
        lock(&self.operations).insert(key(project, zone, &reply.name), finished);
        reply
    }
}

#[async_trait::async_trait]
impl ComputeClientTrait for MockComputeClient {
    async fn get_instance(&self, project: &str, zone: &str, name: &str) -> Result<Instance, ComputeError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.get_failures).pop_front() {
            return Err(error);
        }

        let mut instances = lock(&self.instances);
        let k = key(project, zone, name);
        let Some(entry) = instances.get_mut(&k) else {
            return Err(ComputeError::NotFound(format!("Instance {} not found", name)));
        };

        if let Some(next) = entry.upcoming.pop_front() {
            entry.instance.status = next;
        } else if entry.deleting {
            instances.remove(&k);
            return Err(ComputeError::NotFound(format!("Instance {} not found", name)));
        }
        Ok(entry.instance.clone())
    }

    async fn list_instances(&self, project: &str, zone: &str) -> Result<Vec<Instance>, ComputeError> {
        let mut found: Vec<Instance> = lock(&self.instances)
            .iter()
            .filter(|((p, z, _), _)| p == project && z == zone)
            .map(|(_, m)| m.instance.clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn insert_instance(&self, project: &str, zone: &str, instance: &Instance) -> Result<Operation, ComputeError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.insert_failures).pop_front() {
            return Err(error);
        }

        let mut instances = lock(&self.instances);
        let k = key(project, zone, &instance.name);
        if instances.contains_key(&k) {
            return Err(ComputeError::AlreadyExists(format!(
                "The resource '{}' already exists",
                instance.name
            )));
        }
        if let Some(failure) = lock(&self.failed_inserts).pop_front() {
            return Ok(self.operation(project, zone, "insert", Some(failure)));
        }

        let mut stored = instance.clone();
        stored.status = InstanceStatus::Provisioning;
        instances.insert(
            k,
            MockInstance {
                instance: stored,
                upcoming: self.create_sequence.iter().copied().collect(),
                deleting: false,
            },
        );
        Ok(self.operation(project, zone, "insert", None))
    }

    async fn delete_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.delete_failures).pop_front() {
            return Err(error);
        }

        let mut instances = lock(&self.instances);
        let Some(entry) = instances.get_mut(&key(project, zone, name)) else {
            return Err(ComputeError::NotFound(format!("Instance {} not found", name)));
        };
        entry.upcoming = self.delete_sequence.iter().copied().collect();
        entry.deleting = true;
        drop(instances);
        Ok(self.operation(project, zone, "delete", None))
    }

    async fn get_zone_operation(&self, project: &str, zone: &str, operation: &str) -> Result<Operation, ComputeError> {
        self.operation_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.operations)
            .get(&key(project, zone, operation))
            .cloned()
            .ok_or_else(|| ComputeError::NotFound(format!("Operation {} not found", operation)))
    }
}
