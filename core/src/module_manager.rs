//! Loaded module bookkeeping and hook dispatch

use crate::capability::{Capability, CapabilitySet};
use crate::directory::Directory;
use crate::event::{Event, Request};
use crate::module::{HookResult, Module, ModuleId, Priority, Version};
use crate::utils::string::wildcard_match;
use crate::xline::XLineSink;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, warn};

/// Constructor for a module in the catalog
pub type ModuleFactory = fn() -> Box<dyn Module>;

/// Every module the server knows how to load, by name
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    entries: BTreeMap<String, ModuleFactory>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory; a later registration under the same name replaces the earlier one
    pub fn register(&mut self, name: &str, factory: ModuleFactory) -> &mut Self {
        self.entries.insert(name.to_string(), factory);
        self
    }

    pub fn get(&self, name: &str) -> Option<ModuleFactory> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Catalog names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Names matching a glob pattern
    pub fn matching(&self, pattern: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|name| wildcard_match(pattern, name))
            .cloned()
            .collect()
    }
}

/// Summary of a loaded module
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: String,
    pub description: String,
    pub version: Version,
    pub capabilities: CapabilitySet,
}

struct ModuleRecord {
    id: ModuleId,
    name: String,
    module: Box<dyn Module>,
    version: Version,
    capabilities: CapabilitySet,
}

/// Module manager for loading and dispatching to modules
pub struct ModuleManager {
    /// Records in load order
    records: Vec<ModuleRecord>,
    /// Per capability, indices into `records` in dispatch order
    hook_order: Vec<Vec<usize>>,
    directory: Directory,
    xline_sink: XLineSink,
    next_id: u32,
}

impl ModuleManager {
    /// Create a new module manager
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            hook_order: vec![Vec::new(); Capability::COUNT],
            directory: Directory::new(),
            xline_sink: XLineSink::new(),
            next_id: 1,
        }
    }

    /// Lines queued by modules, see [`XLineSink`]
    pub fn xline_sink(&self) -> &XLineSink {
        &self.xline_sink
    }

    pub(crate) fn allocate_id(&mut self) -> ModuleId {
        let id = ModuleId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Take ownership of an initialised module
    pub(crate) fn insert(&mut self, id: ModuleId, name: &str, module: Box<dyn Module>) {
        let capabilities = module.implements();
        let version = module.version();
        self.records.push(ModuleRecord {
            id,
            name: name.to_string(),
            module,
            version,
            capabilities,
        });
        self.rebuild_hook_order();
    }

    /// Remove a module from every dispatch list and hand it back
    pub(crate) fn remove(&mut self, id: ModuleId) -> Option<Box<dyn Module>> {
        let pos = self.records.iter().position(|r| r.id == id)?;
        let record = self.records.remove(pos);
        self.rebuild_hook_order();
        Some(record.module)
    }

    pub fn find(&self, name: &str) -> Option<ModuleId> {
        self.records.iter().find(|r| r.name == name).map(|r| r.id)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn name_of(&self, id: ModuleId) -> Option<&str> {
        self.record(id).map(|r| r.name.as_str())
    }

    pub fn version_of(&self, id: ModuleId) -> Option<Version> {
        self.record(id).map(|r| r.version)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Loaded modules in load order
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.records
            .iter()
            .map(|r| ModuleInfo {
                id: r.id,
                name: r.name.clone(),
                description: r.module.description().to_string(),
                version: r.version,
                capabilities: r.capabilities,
            })
            .collect()
    }

    /// Ids in load order
    pub fn ids(&self) -> Vec<ModuleId> {
        self.records.iter().map(|r| r.id).collect()
    }

    /// Whether `id` subscribed to `capability`
    pub fn subscribes(&self, id: ModuleId, capability: Capability) -> bool {
        self.record(id)
            .map(|r| r.capabilities.contains(capability))
            .unwrap_or(false)
    }

    /// Names of the subscribers of `capability`, in dispatch order
    pub fn hook_order(&self, capability: Capability) -> Vec<&str> {
        self.hook_order[capability.index()]
            .iter()
            .map(|&i| self.records[i].name.as_str())
            .collect()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut Directory {
        &mut self.directory
    }

    fn record(&self, id: ModuleId) -> Option<&ModuleRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Call `hook` on every subscriber of `capability`.
    ///
    /// A panicking module is logged and skipped; the remaining modules still run.
    pub fn dispatch<F>(&mut self, capability: Capability, mut hook: F)
    where
        F: FnMut(&mut dyn Module),
    {
        let order = &self.hook_order[capability.index()];
        for &slot in order {
            let record = &mut self.records[slot];
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| hook(record.module.as_mut())));
            if let Err(payload) = outcome {
                error!(
                    "Module '{}' panicked in {}: {}",
                    record.name,
                    capability,
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    /// Call a result hook until a module answers Allow or Deny.
    ///
    /// Returns `HookResult::Default` when every subscriber abstains. A panicking
    /// module counts as the capability's fail-safe answer.
    pub fn dispatch_result<F>(&mut self, capability: Capability, mut hook: F) -> HookResult
    where
        F: FnMut(&mut dyn Module) -> HookResult,
    {
        let order = &self.hook_order[capability.index()];
        for &slot in order {
            let record = &mut self.records[slot];
            match panic::catch_unwind(AssertUnwindSafe(|| hook(record.module.as_mut()))) {
                Ok(HookResult::Default) => {}
                Ok(decisive) => {
                    debug!("{} answered {:?} by '{}'", capability, decisive, record.name);
                    return decisive;
                }
                Err(payload) => {
                    let fallback = fail_safe(capability);
                    error!(
                        "Module '{}' panicked in {}: {} (treated as {:?})",
                        record.name,
                        capability,
                        panic_message(payload.as_ref()),
                        fallback
                    );
                    if fallback.is_decisive() {
                        return fallback;
                    }
                }
            }
        }
        HookResult::Default
    }

    /// Run `f` against one module regardless of its subscriptions
    pub fn with_module<R, F>(&mut self, id: ModuleId, f: F) -> Option<R>
    where
        F: FnOnce(&mut dyn Module) -> R,
    {
        let record = self.records.iter_mut().find(|r| r.id == id)?;
        match panic::catch_unwind(AssertUnwindSafe(|| f(record.module.as_mut()))) {
            Ok(value) => Some(value),
            Err(payload) => {
                error!(
                    "Module '{}' panicked: {}",
                    record.name,
                    panic_message(payload.as_ref())
                );
                None
            }
        }
    }

    /// Broadcast an event
    pub fn send_event(&mut self, event: &Event<'_>) {
        self.dispatch(Capability::Event, |m| m.on_event(event));
    }

    /// Deliver a request to its destination
    pub fn send_request(&mut self, request: &Request<'_>) -> Option<Box<dyn Any + Send>> {
        if self.record(request.destination()).is_none() {
            warn!(
                "Request '{}' addressed to unloaded module {}",
                request.id(),
                request.destination()
            );
            return None;
        }
        self.with_module(request.destination(), |m| m.on_request(request))
            .flatten()
    }

    fn rebuild_hook_order(&mut self) {
        let order: Vec<Vec<usize>> = Capability::ALL
            .iter()
            .map(|cap| self.order_subscribers(*cap))
            .collect();
        self.hook_order = order;
    }

    /// Topological order of the subscribers of `capability`.
    ///
    /// Before/After relations are hard edges. Among modules free to run, First
    /// beats DontCare beats Last, and load order breaks ties.
    fn order_subscribers(&self, capability: Capability) -> Vec<usize> {
        let subscribers: Vec<usize> = (0..self.records.len())
            .filter(|&i| self.records[i].capabilities.contains(capability))
            .collect();
        if subscribers.len() < 2 {
            return subscribers;
        }

        let priorities: Vec<Priority> = subscribers
            .iter()
            .map(|&i| self.records[i].module.prioritize(capability))
            .collect();
        let position = |name: &str| subscribers.iter().position(|&i| self.records[i].name == name);

        let n = subscribers.len();
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut indegree = vec![0usize; n];
        for (a, priority) in priorities.iter().enumerate() {
            let (from, to) = match priority {
                Priority::Before(other) => match position(other) {
                    Some(b) => (a, b),
                    None => continue,
                },
                Priority::After(other) => match position(other) {
                    Some(b) => (b, a),
                    None => continue,
                },
                _ => continue,
            };
            if from != to {
                edges[from].push(to);
                indegree[to] += 1;
            }
            debug!(
                "{} priority of '{}': tag {:#x}",
                capability,
                self.records[subscribers[a]].name,
                priority.tag(|name| self.records.iter().position(|r| r.name == name))
            );
        }

        let rank = |a: usize| {
            let group = match priorities[a] {
                Priority::First => 0u8,
                Priority::Last => 2,
                _ => 1,
            };
            (group, a)
        };

        let mut placed = vec![false; n];
        let mut order = Vec::with_capacity(n);
        while order.len() < n {
            let ready = (0..n)
                .filter(|&a| !placed[a] && indegree[a] == 0)
                .min_by_key(|&a| rank(a));
            let next = match ready {
                Some(a) => a,
                None => {
                    let Some(a) = (0..n).filter(|&a| !placed[a]).min_by_key(|&a| rank(a)) else {
                        break;
                    };
                    warn!(
                        "Circular priorities for {} involving '{}'",
                        capability, self.records[subscribers[a]].name
                    );
                    a
                }
            };
            placed[next] = true;
            order.push(subscribers[next]);
            for &b in &edges[next] {
                indegree[b] = indegree[b].saturating_sub(1);
            }
        }
        order
    }
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Answer assumed when a module panics inside a result hook
fn fail_safe(capability: Capability) -> HookResult {
    match capability {
        Capability::AccessCheck | Capability::RawMode => HookResult::Deny,
        _ => HookResult::Default,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
