//! Server-side oplog management.

use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use plotsync_protocol::Operation;
use std::collections::HashMap;

/// Server-side operation log.
///
/// One canonical log per project. The project version is the number of
/// accepted operations, so every accepted operation gets the next version
/// and re-served operations carry that version as their id.
#[derive(Debug, Default)]
pub struct ServerOplog {
    projects: RwLock<HashMap<String, ProjectLog>>,
}

#[derive(Debug, Default)]
struct ProjectLog {
    entries: Vec<Entry>,
    /// (device id, client op id) -> assigned version.
    seen: HashMap<(String, i64), u64>,
}

#[derive(Debug)]
struct Entry {
    device_id: String,
    operation: Operation,
}

impl ProjectLog {
    fn version(&self) -> u64 {
        self.entries.len() as u64
    }
}

/// Result of a successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Client ids acknowledged, including duplicates of earlier pushes.
    pub acknowledged: Vec<i64>,
    /// Number of acknowledged ids that were already in the log.
    pub duplicates: usize,
    /// Project version after the append.
    pub version: u64,
}

impl ServerOplog {
    /// Creates a new empty oplog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current version of a project (0 if unknown).
    pub fn version(&self, project_id: &str) -> u64 {
        self.projects
            .read()
            .get(project_id)
            .map_or(0, ProjectLog::version)
    }

    /// Appends a device's operations.
    ///
    /// Fails with [`ServerError::VersionConflict`] if another device wrote
    /// after `known_version`. A device's own writes never conflict with it.
    /// Re-sent operations are acknowledged without being appended again.
    pub fn append(
        &self,
        project_id: &str,
        device_id: &str,
        known_version: u64,
        operations: Vec<Operation>,
    ) -> ServerResult<AppendOutcome> {
        let mut projects = self.projects.write();
        let log = projects.entry(project_id.to_string()).or_default();
        let current = log.version();

        if known_version > current {
            return Err(ServerError::InvalidRequest(format!(
                "known version {known_version} is ahead of server version {current}"
            )));
        }

        let foreign_write = log.entries[known_version as usize..]
            .iter()
            .any(|entry| entry.device_id != device_id);
        if foreign_write {
            return Err(ServerError::VersionConflict {
                server_version: current,
                client_version: known_version,
            });
        }

        if let Some(stray) = operations.iter().find(|op| op.project_id != project_id) {
            return Err(ServerError::InvalidRequest(format!(
                "operation {} belongs to project {}",
                stray.id, stray.project_id
            )));
        }

        let mut acknowledged = Vec::with_capacity(operations.len());
        let mut duplicates = 0;

        for operation in operations {
            let key = (device_id.to_string(), operation.id);
            acknowledged.push(operation.id);
            if log.seen.contains_key(&key) {
                duplicates += 1;
                continue;
            }

            let version = log.version() + 1;
            log.seen.insert(key, version);
            log.entries.push(Entry {
                device_id: device_id.to_string(),
                operation: operation.with_id(version as i64),
            });
        }

        Ok(AppendOutcome {
            acknowledged,
            duplicates,
            version: log.version(),
        })
    }

    /// Returns up to `limit` operations accepted after `since_version`, and
    /// the version of the last one returned.
    pub fn operations_since(
        &self,
        project_id: &str,
        since_version: u64,
        limit: usize,
    ) -> (Vec<Operation>, u64) {
        let projects = self.projects.read();
        let Some(log) = projects.get(project_id) else {
            return (Vec::new(), 0);
        };

        let start = (since_version as usize).min(log.entries.len());
        let operations: Vec<Operation> = log.entries[start..]
            .iter()
            .take(limit)
            .map(|entry| entry.operation.clone())
            .collect();
        let version = start as u64 + operations.len() as u64;
        (operations, version)
    }

    /// Returns the number of operations in a project.
    pub fn len(&self, project_id: &str) -> usize {
        self.projects
            .read()
            .get(project_id)
            .map_or(0, |log| log.entries.len())
    }

    /// Returns true if no project has any operation.
    pub fn is_empty(&self) -> bool {
        self.projects
            .read()
            .values()
            .all(|log| log.entries.is_empty())
    }
}
