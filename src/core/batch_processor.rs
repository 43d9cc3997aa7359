//! Batch processing with resource-based partitioning
//!
//! This module provides the `BatchProcessor` struct, which replays a batch of
//! ledger commands concurrently while keeping the outcome identical to a
//! sequential replay.
//!
//! # Design
//!
//! Two commands can only influence each other through a wallet or an
//! idempotency key they share. The processor groups a batch into connected
//! components over those resources, runs each component on tokio's blocking
//! pool and keeps input order inside each component.
//!
//! ```text
//! batch ──▶ partition (union-find over wallets and keys)
//!              │
//!              ├──▶ component 1 ──▶ spawn_blocking ──▶ engine (in order)
//!              ├──▶ component 2 ──▶ spawn_blocking ──▶ engine (in order)
//!              └──▶ ...
//!                                      │
//!                      results sorted by input line ◀──┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tracing::error;

use super::engine::LedgerEngine;
use super::memory_store::InMemoryLedgerStore;
use super::traits::LedgerStore;
use crate::types::{
    CommandOutcome, IdempotencyKey, LedgerCommand, LedgerError, OperationRequest, ReplayRecord,
    TransactionRef, WalletId,
};

/// Result of processing a single command
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    /// Input line of the command
    pub line: u64,

    /// The result of processing (success or error)
    pub result: Result<CommandOutcome, LedgerError>,
}

/// Anything two commands can contend on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Resource {
    Wallet(WalletId),
    Key(IdempotencyKey),
}

/// Batch processor with resource-based partitioning
pub struct BatchProcessor<S: LedgerStore = InMemoryLedgerStore> {
    engine: Arc<LedgerEngine<S>>,
}

impl<S: LedgerStore> Clone for BatchProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<S: LedgerStore + 'static> BatchProcessor<S> {
    /// Create a new BatchProcessor
    ///
    /// # Arguments
    ///
    /// * `engine` - Arc-wrapped engine shared by all spawned tasks
    pub fn new(engine: Arc<LedgerEngine<S>>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<LedgerEngine<S>> {
        &self.engine
    }

    /// Partition a batch into independent groups of commands
    ///
    /// # Returns
    ///
    /// Groups ordered by their first command. Every command appears in
    /// exactly one group, groups keep input order, and no wallet or
    /// idempotency key is touched by two groups.
    pub fn partition(&self, batch: Vec<ReplayRecord>) -> Vec<Vec<ReplayRecord>> {
        let mut sets = DisjointSets::new(batch.len());
        let mut owner: HashMap<Resource, usize> = HashMap::new();

        for (index, record) in batch.iter().enumerate() {
            for resource in self.resources(&record.command) {
                match owner.get(&resource) {
                    Some(&first) => sets.union(first, index),
                    None => {
                        owner.insert(resource, index);
                    }
                }
            }
        }

        let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<ReplayRecord>> = Vec::new();
        for (index, record) in batch.into_iter().enumerate() {
            let root = sets.find(index);
            let slot = *slot_of_root.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(record);
        }
        groups
    }

    /// Resources a command may read or write
    ///
    /// A reversal also claims the wallets of its target when the target is
    /// already stored; a target later in the same batch is reached through
    /// its idempotency key instead.
    fn resources(&self, command: &LedgerCommand) -> Vec<Resource> {
        match command {
            LedgerCommand::OpenWallet { wallet_id, .. }
            | LedgerCommand::ChangeStatus { wallet_id, .. } => {
                vec![Resource::Wallet(wallet_id.clone())]
            }
            LedgerCommand::Execute(request) => {
                let mut resources: Vec<Resource> = request
                    .wallets()
                    .into_iter()
                    .map(Resource::Wallet)
                    .collect();
                resources.push(Resource::Key(request.idempotency_key().clone()));

                if let OperationRequest::Reverse(reverse) = request {
                    let stored = match &reverse.target {
                        TransactionRef::Id(id) => self.engine.get_transaction(id).ok(),
                        TransactionRef::Reference(key) => {
                            resources.push(Resource::Key(key.clone()));
                            self.engine.transaction_for_key(key).ok()
                        }
                    };
                    if let Some(original) = stored {
                        resources.push(Resource::Key(original.idempotency_key));
                        resources.extend(original.participants.into_iter().map(Resource::Wallet));
                    }
                }
                resources
            }
        }
    }

    /// Process the commands of one group sequentially
    ///
    /// Errors are captured per command and never stop the group.
    pub fn process_group(engine: &LedgerEngine<S>, records: Vec<ReplayRecord>) -> Vec<ProcessingResult> {
        records
            .into_iter()
            .map(|record| ProcessingResult {
                line: record.line,
                result: engine.process(record.command),
            })
            .collect()
    }

    /// Process a batch with resource-based partitioning
    ///
    /// This method:
    /// 1. Partitions the batch into independent groups
    /// 2. Runs every group on the blocking pool, since the engine waits on
    ///    wallet latches
    /// 3. Waits for all groups and collects their results
    ///
    /// # Returns
    ///
    /// One result per command, sorted by input line.
    pub async fn process_batch(&self, batch: Vec<ReplayRecord>) -> Vec<ProcessingResult> {
        let groups = self.partition(batch);

        let mut tasks = Vec::with_capacity(groups.len());
        for records in groups {
            let lines: Vec<u64> = records.iter().map(|record| record.line).collect();
            let engine = Arc::clone(&self.engine);
            let task = tokio::task::spawn_blocking(move || Self::process_group(&engine, records));
            tasks.push((lines, task));
        }

        let mut results = Vec::new();
        for (lines, task) in tasks {
            match task.await {
                Ok(group_results) => results.extend(group_results),
                Err(join_error) => {
                    error!(rows = lines.len(), "Replay task failed: {}", join_error);
                    results.extend(Self::lost_group(lines, &join_error.to_string()));
                }
            }
        }

        results.sort_by_key(|result| result.line);
        results
    }

    /// Failed results for every row of a group whose task did not finish
    ///
    /// Rows before the failure may have committed; a later replay of the same
    /// keys resolves them through idempotency.
    fn lost_group(lines: Vec<u64>, reason: &str) -> Vec<ProcessingResult> {
        lines
            .into_iter()
            .map(|line| ProcessingResult {
                line,
                result: Err(LedgerError::IoError {
                    message: format!("replay task failed: {}", reason),
                }),
            })
            .collect()
    }
}

/// Union-find over batch positions
struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut index: usize) -> usize {
        while self.parent[index] != index {
            self.parent[index] = self.parent[self.parent[index]];
            index = self.parent[index];
        }
        index
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            // Keep the earlier position as root
            self.parent[a.max(b)] = a.min(b);
        }
    }
}
