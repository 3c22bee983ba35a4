// Ordered queue of writes deferred while the primary is down
// Author: kelexine (https://github.com/kelexine)

use super::backend::StorageCommand;
use serde::Serialize;
use std::collections::VecDeque;

/// Outcome of one replay pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub replayed: usize,
    /// Rejected by a reachable primary and dropped.
    pub failed: usize,
    /// Left queued because the primary stopped answering mid-pass.
    pub deferred: usize,
}

impl ReplayReport {
    pub fn total(&self) -> usize {
        self.replayed + self.failed + self.deferred
    }
}

/// FIFO of write commands. Reads never enter the queue.
#[derive(Debug, Default)]
pub struct ReplayQueue {
    commands: VecDeque<StorageCommand>,
}

impl ReplayQueue {
    /// Append a write. Returns false (and drops it) for a read.
    pub fn push(&mut self, command: StorageCommand) -> bool {
        if !command.is_write() {
            return false;
        }
        self.commands.push_back(command);
        true
    }

    /// Remove and return everything queued, oldest first.
    pub fn take_all(&mut self) -> Vec<StorageCommand> {
        self.commands.drain(..).collect()
    }

    /// Put commands back ahead of anything queued since, keeping their order.
    pub fn requeue_front(&mut self, commands: Vec<StorageCommand>) {
        for command in commands.into_iter().rev() {
            self.commands.push_front(command);
        }
    }

    pub fn snapshot(&self) -> Vec<StorageCommand> {
        self.commands.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reads_are_not_queued() {
        let mut queue = ReplayQueue::default();
        assert!(!queue.push(StorageCommand::Get {
            collection: "c".into(),
            id: "1".into(),
        }));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_take_all_preserves_order() {
        let mut queue = ReplayQueue::default();
        for i in 0..3 {
            queue.push(StorageCommand::Insert {
                collection: "c".into(),
                id: i.to_string(),
                document: json!({ "n": i }),
            });
        }
        let ids: Vec<String> = queue
            .take_all()
            .into_iter()
            .map(|c| match c {
                StorageCommand::Insert { id, .. } => id,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["0", "1", "2"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_front_keeps_order_ahead_of_newer_writes() {
        let insert = |id: &str| StorageCommand::Insert {
            collection: "c".into(),
            id: id.into(),
            document: json!({}),
        };
        let mut queue = ReplayQueue::default();
        queue.push(insert("3"));
        queue.requeue_front(vec![insert("1"), insert("2")]);

        let ids: Vec<String> = queue
            .snapshot()
            .into_iter()
            .filter_map(|c| match c {
                StorageCommand::Insert { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
