//! Pid-tree maintainer.
//!
//! A single thread owns the mutable parent/child forest; everyone else
//! talks to it through a request/reply channel pair instead of sharing a
//! lock, mirroring the original implementation's single-goroutine-plus-
//! channels design. Rebuilds are incremental: only the diff between the
//! previous and current `/proc` pid set is applied, so an unrelated churn
//! of short-lived processes elsewhere in the tree never perturbs a stable
//! subtree's identity.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

/// One node's parentage. A ppid of `-1` means "orphaned pending
/// re-resolution": the parent vanished in some past rebuild and a new
/// ancestor chain has not yet been found for this pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Node {
    pub pid: i32,
    pub ppid: i32,
}

enum Request {
    /// Replace the known live pid set with a freshly read one.
    Rebuild {
        live_pids: HashSet<i32>,
        lookup_ppid: Box<dyn Fn(i32) -> Option<i32> + Send>,
        reply: Sender<()>,
    },
    Children { pid: i32, reply: Sender<Vec<i32>> },
    Snapshot { reply: Sender<Vec<Node>> },
}

/// Handle to a running forest actor thread.
pub struct ForestHandle {
    tx: Sender<Request>,
    _join: thread::JoinHandle<()>,
}

impl ForestHandle {
    /// Spawns the owning thread with an empty forest.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        let join = thread::spawn(move || run(rx));
        Self { tx, _join: join }
    }

    /// Applies an incremental rebuild from a freshly observed pid set.
    /// `lookup_ppid` is consulted only for pids not already known, to
    /// resolve their ancestor chain.
    pub fn rebuild(&self, live_pids: HashSet<i32>, lookup_ppid: impl Fn(i32) -> Option<i32> + Send + 'static) {
        let (reply_tx, reply_rx) = mpsc::channel();
        let _ = self.tx.send(Request::Rebuild {
            live_pids,
            lookup_ppid: Box::new(lookup_ppid),
            reply: reply_tx,
        });
        let _ = reply_rx.recv();
    }

    pub fn children(&self, pid: i32) -> Vec<i32> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let _ = self.tx.send(Request::Children { pid, reply: reply_tx });
        reply_rx.recv().unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<Node> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let _ = self.tx.send(Request::Snapshot { reply: reply_tx });
        reply_rx.recv().unwrap_or_default()
    }
}

fn run(rx: Receiver<Request>) {
    let mut forest = Forest::new();
    while let Ok(req) = rx.recv() {
        match req {
            Request::Rebuild {
                live_pids,
                lookup_ppid,
                reply,
            } => {
                forest.rebuild(live_pids, &*lookup_ppid);
                let _ = reply.send(());
            }
            Request::Children { pid, reply } => {
                let _ = reply.send(forest.children(pid));
            }
            Request::Snapshot { reply } => {
                let _ = reply.send(forest.nodes.values().copied().collect());
            }
        }
    }
}

/// Pure, synchronous forest state. Split out from [`ForestHandle`] so the
/// rebuild algorithm can be unit tested directly without a thread.
#[derive(Debug, Default)]
pub struct Forest {
    nodes: HashMap<i32, Node>,
}

impl Forest {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Diffs `live_pids` against the currently known set:
    /// - pids that vanished have every descendant orphaned (`ppid = -1`),
    ///   pending re-resolution on a later rebuild;
    /// - pids that are new (or were orphaned) get their ancestor chain
    ///   resolved via `lookup_ppid` and inserted oldest-ancestor-first, so
    ///   a multi-generation new subtree is never partially linked.
    ///
    /// Idempotent: calling this again with the same `live_pids` and no
    /// `/proc` changes leaves the forest unchanged.
    pub fn rebuild(&mut self, live_pids: HashSet<i32>, lookup_ppid: &dyn Fn(i32) -> Option<i32>) {
        let known: HashSet<i32> = self.nodes.keys().copied().collect();

        for &gone_pid in known.difference(&live_pids) {
            self.orphan_descendants(gone_pid);
            self.nodes.remove(&gone_pid);
        }

        let mut missing: Vec<i32> = live_pids
            .difference(&known)
            .copied()
            .chain(
                self.nodes
                    .values()
                    .filter(|n| n.ppid == -1)
                    .map(|n| n.pid),
            )
            .collect();
        missing.sort_unstable();
        missing.dedup();

        for pid in missing {
            self.insert_with_ancestors(pid, lookup_ppid, &live_pids);
        }
    }

    fn orphan_descendants(&mut self, removed_pid: i32) {
        let children: Vec<i32> = self
            .nodes
            .values()
            .filter(|n| n.ppid == removed_pid)
            .map(|n| n.pid)
            .collect();
        for child in children {
            if let Some(node) = self.nodes.get_mut(&child) {
                node.ppid = -1;
            }
            self.orphan_descendants(child);
        }
    }

    /// Walks `pid`'s ancestor chain via `lookup_ppid`, stopping at the
    /// first already-known ancestor or at the root (ppid 0). If the chain
    /// runs into a pid that is neither known nor currently live, `pid`
    /// stays (or becomes) orphaned — its ancestor will surface on a later
    /// rebuild once it is observed.
    fn insert_with_ancestors(
        &mut self,
        pid: i32,
        lookup_ppid: &dyn Fn(i32) -> Option<i32>,
        live_pids: &HashSet<i32>,
    ) {
        if !live_pids.contains(&pid) {
            return;
        }
        if let Some(existing) = self.nodes.get(&pid)
            && existing.ppid != -1
        {
            return;
        }

        let mut chain = vec![pid];
        let mut cursor = pid;
        let mut resolved = false;
        while let Some(ppid) = lookup_ppid(cursor) {
            if ppid == 0 {
                resolved = true;
                break;
            }
            if ppid == cursor || chain.contains(&ppid) {
                break;
            }
            if self.nodes.contains_key(&ppid) {
                chain.push(ppid);
                resolved = true;
                break;
            }
            if !live_pids.contains(&ppid) {
                break;
            }
            chain.push(ppid);
            cursor = ppid;
        }

        if !resolved {
            self.nodes.entry(pid).or_insert(Node { pid, ppid: -1 });
            return;
        }

        for &node_pid in chain.iter().rev() {
            let ppid = lookup_ppid(node_pid).unwrap_or(0);
            match self.nodes.get_mut(&node_pid) {
                Some(existing) if existing.ppid == -1 => existing.ppid = ppid,
                Some(_) => {}
                None => {
                    self.nodes.insert(node_pid, Node { pid: node_pid, ppid });
                }
            }
        }
    }

    pub fn children(&self, pid: i32) -> Vec<i32> {
        let mut kids: Vec<i32> = self
            .nodes
            .values()
            .filter(|n| n.ppid == pid)
            .map(|n| n.pid)
            .collect();
        kids.sort_unstable();
        kids
    }

    /// All known descendants of `pid`, in no particular order.
    pub fn descendants(&self, pid: i32) -> Vec<i32> {
        let mut result = Vec::new();
        let mut stack = self.children(pid);
        while let Some(cur) = stack.pop() {
            result.push(cur);
            stack.extend(self.children(cur));
        }
        result
    }

    pub fn ppid_of(&self, pid: i32) -> Option<i32> {
        self.nodes.get(&pid).map(|n| n.ppid)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
